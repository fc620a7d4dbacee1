// Lock-free engine status

use crate::bio::BioError;
use crate::metrics::MetricsSnapshot;
use crate::mining::MiningError;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Where the per-job pipeline currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineStage {
    Idle = 0,
    Stimulating = 1,
    Seeding = 2,
    Mining = 3,
    Reinforcing = 4,
}

impl EngineStage {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => EngineStage::Stimulating,
            2 => EngineStage::Seeding,
            3 => EngineStage::Mining,
            4 => EngineStage::Reinforcing,
            _ => EngineStage::Idle,
        }
    }
}

impl fmt::Display for EngineStage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EngineStage::Idle => write!(f, "idle"),
            EngineStage::Stimulating => write!(f, "stimulating"),
            EngineStage::Seeding => write!(f, "seeding"),
            EngineStage::Mining => write!(f, "mining"),
            EngineStage::Reinforcing => write!(f, "reinforcing"),
        }
    }
}

/// Flattened error kinds for the status surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorKind {
    InvalidHeader = 1,
    InvalidTarget = 2,
    BioNotReady = 3,
    BioTimeout = 4,
    BioDisconnected = 5,
    SignalQualityLow = 6,
    BioInternal = 7,
    ModelIncompatible = 8,
    Internal = 9,
}

impl ErrorKind {
    fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(ErrorKind::InvalidHeader),
            2 => Some(ErrorKind::InvalidTarget),
            3 => Some(ErrorKind::BioNotReady),
            4 => Some(ErrorKind::BioTimeout),
            5 => Some(ErrorKind::BioDisconnected),
            6 => Some(ErrorKind::SignalQualityLow),
            7 => Some(ErrorKind::BioInternal),
            8 => Some(ErrorKind::ModelIncompatible),
            9 => Some(ErrorKind::Internal),
            _ => None,
        }
    }

    pub fn from_bio(err: &BioError) -> Self {
        match err {
            BioError::NotReady => ErrorKind::BioNotReady,
            BioError::Timeout => ErrorKind::BioTimeout,
            BioError::DeviceDisconnected => ErrorKind::BioDisconnected,
            BioError::SignalQualityBelowFloor => ErrorKind::SignalQualityLow,
            BioError::Internal(_) => ErrorKind::BioInternal,
            BioError::ModelIncompatible(_) => ErrorKind::ModelIncompatible,
        }
    }

    pub fn from_mining(err: &MiningError) -> Self {
        match err {
            MiningError::InvalidHeader(_) => ErrorKind::InvalidHeader,
            MiningError::InvalidTarget(_) => ErrorKind::InvalidTarget,
            MiningError::Bio(bio) => Self::from_bio(bio),
            MiningError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::InvalidHeader => write!(f, "invalid-header"),
            ErrorKind::InvalidTarget => write!(f, "invalid-target"),
            ErrorKind::BioNotReady => write!(f, "bio-not-ready"),
            ErrorKind::BioTimeout => write!(f, "bio-timeout"),
            ErrorKind::BioDisconnected => write!(f, "bio-disconnected"),
            ErrorKind::SignalQualityLow => write!(f, "signal-quality-low"),
            ErrorKind::BioInternal => write!(f, "bio-internal"),
            ErrorKind::ModelIncompatible => write!(f, "model-incompatible"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

/// Two atomics shared between the supervisor (writer) and any reader.
#[derive(Debug, Default)]
pub struct StatusCell {
    stage: AtomicU8,
    error: AtomicU8,
}

impl StatusCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_stage(&self, stage: EngineStage) {
        self.stage.store(stage as u8, Ordering::Relaxed);
    }

    pub fn set_error(&self, kind: ErrorKind) {
        self.error.store(kind as u8, Ordering::Relaxed);
    }

    pub fn clear_error(&self) {
        self.error.store(0, Ordering::Relaxed);
    }

    pub fn stage(&self) -> EngineStage {
        EngineStage::from_u8(self.stage.load(Ordering::Relaxed))
    }

    pub fn last_error(&self) -> Option<ErrorKind> {
        ErrorKind::from_u8(self.error.load(Ordering::Relaxed))
    }
}

/// Read-only view handed to callers: pipeline stage, latest error kind and
/// a metrics snapshot.
#[derive(Debug, Clone, Copy)]
pub struct EngineStatus {
    pub stage: EngineStage,
    pub last_error: Option<ErrorKind>,
    pub metrics: MetricsSnapshot,
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Stage: {}", self.stage)?;
        match self.last_error {
            Some(kind) => writeln!(f, "Last error: {}", kind)?,
            None => writeln!(f, "Last error: none")?,
        }
        write!(f, "{}", self.metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_round_trip() {
        let cell = StatusCell::new();
        assert_eq!(cell.stage(), EngineStage::Idle);

        for stage in [
            EngineStage::Stimulating,
            EngineStage::Seeding,
            EngineStage::Mining,
            EngineStage::Reinforcing,
            EngineStage::Idle,
        ] {
            cell.set_stage(stage);
            assert_eq!(cell.stage(), stage);
        }
    }

    #[test]
    fn test_error_round_trip() {
        let cell = StatusCell::new();
        assert_eq!(cell.last_error(), None);

        cell.set_error(ErrorKind::BioTimeout);
        assert_eq!(cell.last_error(), Some(ErrorKind::BioTimeout));

        cell.clear_error();
        assert_eq!(cell.last_error(), None);
    }

    #[test]
    fn test_bio_error_mapping() {
        assert_eq!(ErrorKind::from_bio(&BioError::Timeout), ErrorKind::BioTimeout);
        assert_eq!(
            ErrorKind::from_bio(&BioError::DeviceDisconnected),
            ErrorKind::BioDisconnected
        );
        assert_eq!(
            ErrorKind::from_mining(&MiningError::InvalidTarget("x".into())),
            ErrorKind::InvalidTarget
        );
        assert_eq!(
            ErrorKind::from_mining(&MiningError::Bio(BioError::NotReady)),
            ErrorKind::BioNotReady
        );
    }
}
