// Reinforcement pattern memory

use std::collections::VecDeque;

/// Smallest allowed capacity; the ring never holds fewer slots than this.
const MIN_CAPACITY: usize = 100;

/// Cosine similarity below this never counts as "similar".
const SIMILARITY_THRESHOLD: f64 = 0.8;

/// One remembered mining outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternRecord {
    pub features: Vec<f64>,
    pub response: Vec<f64>,
    pub nonce: u32,
    /// 1.0 for a found nonce, 0.0 for a recorded failure
    pub success_score: f64,
    pub timestamp_us: u64,
}

/// Bounded ring buffer of pattern memories. Oldest entries are evicted at
/// capacity. Writes happen only on successful nonces or explicit
/// reinforcement.
#[derive(Debug)]
pub struct PatternMemory {
    records: VecDeque<PatternRecord>,
    capacity: usize,
}

impl PatternMemory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_CAPACITY);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, record: PatternRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &PatternRecord> {
        self.records.iter()
    }

    /// Up to `k` records whose features are cosine-similar (>= 0.8) to the
    /// query, most similar first. Used by retro-learning.
    pub fn similar(&self, features: &[f64], k: usize) -> Vec<&PatternRecord> {
        let mut scored: Vec<(f64, &PatternRecord)> = self
            .records
            .iter()
            .filter_map(|record| {
                let score = cosine_similarity(&record.features, features);
                (score >= SIMILARITY_THRESHOLD).then_some((score, record))
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().take(k).map(|(_, record)| record).collect()
    }

    /// Most recent records, newest first. Used for focused retro passes.
    pub fn recent(&self, k: usize) -> Vec<&PatternRecord> {
        self.records.iter().rev().take(k).collect()
    }
}

/// Cosine similarity of two equal-length vectors; 0.0 when either has no
/// magnitude or the lengths differ.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}
