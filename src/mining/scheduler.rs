// Parallel nonce search

use crate::core::{Hash256, hash_candidate};
use crate::metrics::Metrics;
use crate::mining::{MiningError, MiningJob};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// High bit of the found slot marks it as set; the low 32 bits carry the
/// winning nonce.
const FOUND_FLAG: u64 = 1 << 63;

/// Thread-local hash counts are flushed to the shared metrics at this
/// granularity to keep contention off the hot path.
const FLUSH_INTERVAL: u64 = 1 << 16;

/// The wall clock is consulted once per this many hashes.
const TIME_CHECK_MASK: u32 = 0x3ff;

/// How a mining job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiningOutcome {
    /// A nonce whose digest beats the target, with that digest
    Found { nonce: u32, digest: Hash256 },
    /// Every starting-point window was scanned, or the time budget ran out
    Exhausted,
    /// The cancel signal fired
    Cancelled,
}

/// Scan the job's starting points across `threads` workers.
///
/// Starting points are sharded round-robin; each worker scans its starts
/// sequentially, covering `[start, start + window)` modulo 2^32. The first
/// worker to commit a valid nonce through the found slot wins; every other
/// worker observes the slot (and the cancel flag) on its next iteration
/// and exits, so cancellation latency is bounded by one hash.
pub fn mine(
    job: &MiningJob,
    threads: usize,
    max_duration: Option<Duration>,
    cancel: &AtomicBool,
    metrics: &Metrics,
) -> Result<MiningOutcome, MiningError> {
    if threads == 0 {
        return Err(MiningError::Internal("no worker threads".into()));
    }

    let points = &job.starting_points.points;
    if points.is_empty() {
        return Ok(MiningOutcome::Exhausted);
    }

    let found = AtomicU64::new(0);
    let deadline = max_duration.map(|d| Instant::now() + d);
    let window = job.starting_points.window;

    log::debug!(
        "job {}: {} starting points, window {}, {} workers, strategy {}",
        job.id,
        points.len(),
        window,
        threads,
        job.starting_points.strategy
    );

    std::thread::scope(|scope| {
        for worker in 0..threads {
            let found = &found;
            let header_bytes = &job.header_bytes;
            let target = &job.target;
            scope.spawn(move || {
                let mut local_hashes = 0u64;

                'outer: for start in points.iter().skip(worker).step_by(threads) {
                    for offset in 0..window {
                        // Both exits are observed every iteration
                        if found.load(Ordering::Relaxed) != 0 || cancel.load(Ordering::Relaxed) {
                            break 'outer;
                        }
                        if offset & TIME_CHECK_MASK == 0 {
                            if let Some(deadline) = deadline {
                                if Instant::now() >= deadline {
                                    break 'outer;
                                }
                            }
                        }

                        let nonce = start.wrapping_add(offset);
                        let digest = hash_candidate(header_bytes, nonce);
                        local_hashes += 1;

                        if target.meets(&digest) {
                            // First commit wins; later finds are dropped
                            let _ = found.compare_exchange(
                                0,
                                FOUND_FLAG | nonce as u64,
                                Ordering::AcqRel,
                                Ordering::Relaxed,
                            );
                            break 'outer;
                        }

                        if local_hashes % FLUSH_INTERVAL == 0 {
                            metrics.add_hashes(FLUSH_INTERVAL);
                            local_hashes = 0;
                        }
                    }
                }

                metrics.add_hashes(local_hashes % FLUSH_INTERVAL);
            });
        }
    });

    let slot = found.load(Ordering::Acquire);
    if slot & FOUND_FLAG != 0 {
        let nonce = slot as u32;
        let digest = hash_candidate(&job.header_bytes, nonce);
        log::info!("job {}: found nonce {} -> {}", job.id, nonce, digest);
        return Ok(MiningOutcome::Found { nonce, digest });
    }

    if cancel.load(Ordering::Relaxed) {
        log::info!("job {}: cancelled", job.id);
        return Ok(MiningOutcome::Cancelled);
    }

    log::info!("job {}: exhausted", job.id);
    Ok(MiningOutcome::Exhausted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BlockHeader, Target};
    use crate::entropy::{StartingPoints, Strategy};

    const GENESIS_HEX: &str = "0100000000000000000000000000000000000000000000000000000000000000000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a29ab5f49ffff001d1dac2b7c";
    const GENESIS_NONCE: u32 = 2083236893;

    fn points(list: Vec<u32>, window: u32) -> StartingPoints {
        StartingPoints {
            points: list,
            window,
            expected_coverage: 0.0,
            strategy: Strategy::Uniform,
        }
    }

    fn genesis_job(starting_points: StartingPoints) -> MiningJob {
        // Genesis header with the nonce zeroed; the search must rediscover it
        let header = BlockHeader::from_hex(GENESIS_HEX).unwrap().with_nonce(0);
        let target = Target::from_bits(header.bits).unwrap();
        MiningJob::new(1, header, target, starting_points)
    }

    #[test]
    fn test_finds_genesis_nonce_from_seeded_start() {
        let job = genesis_job(points(vec![GENESIS_NONCE - 50], 256));
        let metrics = Metrics::new();
        let cancel = AtomicBool::new(false);

        match mine(&job, 2, None, &cancel, &metrics).unwrap() {
            MiningOutcome::Found { nonce, digest } => {
                assert_eq!(nonce, GENESIS_NONCE);
                assert!(job.target.meets(&digest));
                assert_eq!(
                    digest.to_hex(),
                    "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
                );
            }
            other => panic!("expected Found, got {:?}", other),
        }
        assert!(metrics.snapshot().total_hashes > 0);
    }

    #[test]
    fn test_easy_target_found_on_any_thread_count() {
        let header = BlockHeader::from_hex(GENESIS_HEX).unwrap().with_nonce(0);
        let target = Target::from_bits(0x207fffff).unwrap();

        for threads in [1, 4] {
            let job = MiningJob::new(2, header, target, points(vec![0], 1 << 16));
            let metrics = Metrics::new();
            let cancel = AtomicBool::new(false);
            match mine(&job, threads, None, &cancel, &metrics).unwrap() {
                MiningOutcome::Found { digest, .. } => assert!(target.meets(&digest)),
                other => panic!("expected Found with {} threads, got {:?}", threads, other),
            }
        }
    }

    #[test]
    fn test_impossible_target_exhausts_within_budget() {
        let header = BlockHeader::from_hex(GENESIS_HEX).unwrap();
        // Target of one: only the all-zero digest would qualify
        let target = Target::from_bits(0x01010000).unwrap();
        let job = MiningJob::new(3, header, target, points(vec![0, 1 << 20, 1 << 30], u32::MAX));
        let metrics = Metrics::new();
        let cancel = AtomicBool::new(false);

        let started = Instant::now();
        let outcome = mine(&job, 2, Some(Duration::from_millis(200)), &cancel, &metrics).unwrap();
        let elapsed = started.elapsed();

        assert_eq!(outcome, MiningOutcome::Exhausted);
        assert!(elapsed < Duration::from_millis(250), "took {:?}", elapsed);

        let hashes = metrics.snapshot().total_hashes;
        assert!(hashes > 0 && hashes < u32::MAX as u64);
    }

    #[test]
    fn test_exhausts_small_windows_without_deadline() {
        let header = BlockHeader::from_hex(GENESIS_HEX).unwrap();
        let target = Target::from_bits(0x01010000).unwrap();
        let job = MiningJob::new(4, header, target, points(vec![0, 1000, 2000], 64));
        let metrics = Metrics::new();
        let cancel = AtomicBool::new(false);

        assert_eq!(
            mine(&job, 3, None, &cancel, &metrics).unwrap(),
            MiningOutcome::Exhausted
        );
        assert_eq!(metrics.snapshot().total_hashes, 3 * 64);
    }

    #[test]
    fn test_cancellation_is_prompt() {
        let header = BlockHeader::from_hex(GENESIS_HEX).unwrap();
        let target = Target::from_bits(0x01010000).unwrap();
        let job = MiningJob::new(5, header, target, points(vec![0], u32::MAX));
        let metrics = Metrics::new();
        let cancel = AtomicBool::new(false);

        std::thread::scope(|scope| {
            let cancel_ref = &cancel;
            scope.spawn(move || {
                std::thread::sleep(Duration::from_millis(30));
                cancel_ref.store(true, Ordering::Relaxed);
            });

            let outcome = mine(&job, 2, None, cancel_ref, &metrics).unwrap();
            assert_eq!(outcome, MiningOutcome::Cancelled);
        });
    }

    #[test]
    fn test_empty_points_exhaust_immediately() {
        let header = BlockHeader::from_hex(GENESIS_HEX).unwrap();
        let target = Target::from_bits(0x1d00ffff).unwrap();
        let job = MiningJob::new(6, header, target, points(vec![], 1024));
        let metrics = Metrics::new();
        let cancel = AtomicBool::new(false);

        assert_eq!(
            mine(&job, 2, None, &cancel, &metrics).unwrap(),
            MiningOutcome::Exhausted
        );
    }

    #[test]
    fn test_zero_threads_is_an_error() {
        let header = BlockHeader::from_hex(GENESIS_HEX).unwrap();
        let target = Target::from_bits(0x1d00ffff).unwrap();
        let job = MiningJob::new(7, header, target, points(vec![0], 16));
        let metrics = Metrics::new();
        let cancel = AtomicBool::new(false);

        assert!(mine(&job, 0, None, &cancel, &metrics).is_err());
    }
}
