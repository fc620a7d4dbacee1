// Mining job definition

use crate::core::{BlockHeader, HEADER_LEN, Target};
use crate::entropy::StartingPoints;

/// One unit of mining work: a header, its expanded target and the nonce
/// starting points to scan. Created per new header; superseded jobs are
/// cancelled through the scheduler's cancel flag.
#[derive(Debug, Clone)]
pub struct MiningJob {
    pub id: u64,
    pub header: BlockHeader,
    /// Serialised header; workers overwrite only the nonce bytes
    pub header_bytes: [u8; HEADER_LEN],
    pub target: Target,
    pub starting_points: StartingPoints,
}

impl MiningJob {
    pub fn new(id: u64, header: BlockHeader, target: Target, starting_points: StartingPoints) -> Self {
        Self {
            id,
            header_bytes: header.serialize(),
            header,
            target,
            starting_points,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Hash256;
    use crate::entropy::DEFAULT_WINDOW;

    #[test]
    fn test_job_snapshots_header_bytes() {
        let header = BlockHeader::new(1, Hash256::zero(), Hash256::zero(), 1231469665, 0x1d00ffff, 7);
        let target = Target::from_bits(header.bits).unwrap();
        let job = MiningJob::new(
            1,
            header,
            target,
            StartingPoints::uniform(0, 4, DEFAULT_WINDOW),
        );
        assert_eq!(job.header_bytes, header.serialize());
        assert_eq!(job.starting_points.points.len(), 4);
    }
}
