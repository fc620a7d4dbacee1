// Electrode impedance calibration

use crate::bio::BioError;
use crate::bio::mea::framing::{self, FT_RESPONSE, FrameReader};
use crate::bio::mea::transport::Transport;
use crate::entropy::ELECTRODE_COUNT;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Electrodes above this impedance are marked inactive (megaohms).
pub const Z_MAX_MOHM: f64 = 10.0;

/// Test voltage applied per electrode during the sweep.
const TEST_VOLTAGE: f64 = 0.5;

/// One electrode's calibration outcome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElectrodeCalibration {
    /// Measured impedance, megaohms; infinite when no current flows
    pub impedance_mohm: f64,
    /// Usable for stimulation and capture
    pub active: bool,
    /// Multiplier that maps a unit input to a unit measured response
    pub factor: f64,
}

impl Default for ElectrodeCalibration {
    fn default() -> Self {
        Self {
            impedance_mohm: 1.0,
            active: true,
            factor: 1.0,
        }
    }
}

/// Calibration for the whole array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub electrodes: Vec<ElectrodeCalibration>,
}

impl Default for CalibrationResult {
    fn default() -> Self {
        Self {
            electrodes: vec![ElectrodeCalibration::default(); ELECTRODE_COUNT],
        }
    }
}

impl CalibrationResult {
    pub fn active_count(&self) -> usize {
        self.electrodes.iter().filter(|e| e.active).count()
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), String> {
        let json = serde_json::to_string_pretty(self).map_err(|e| e.to_string())?;
        std::fs::write(path.as_ref(), json)
            .map_err(|e| format!("write {}: {}", path.as_ref().display(), e))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let json = std::fs::read_to_string(path.as_ref())
            .map_err(|e| format!("read {}: {}", path.as_ref().display(), e))?;
        let result: Self = serde_json::from_str(&json).map_err(|e| e.to_string())?;
        if result.electrodes.len() != ELECTRODE_COUNT {
            return Err(format!(
                "calibration file holds {} electrodes, expected {}",
                result.electrodes.len(),
                ELECTRODE_COUNT
            ));
        }
        Ok(result)
    }
}

/// Sweep every electrode: apply the test waveform, measure the response,
/// and solve `Z = V / I` under the linear assumption. The measured sample
/// is read as microamps, so volts over microamps lands in megaohms.
/// `progress` is invoked after each electrode.
pub fn run_impedance_sweep<F>(
    transport: &mut dyn Transport,
    reader: &mut FrameReader,
    read_timeout: Duration,
    mut progress: F,
) -> Result<CalibrationResult, BioError>
where
    F: FnMut(usize, &ElectrodeCalibration),
{
    let mut result = CalibrationResult {
        electrodes: Vec::with_capacity(ELECTRODE_COUNT),
    };

    for electrode in 0..ELECTRODE_COUNT {
        transport
            .send(&framing::encode_calibrate(electrode as u8, TEST_VOLTAGE))
            .map_err(BioError::from)?;

        let samples = await_response(transport, reader, read_timeout)?;
        let measured_ua = samples[electrode];

        let calibration = if measured_ua > 0.0 && measured_ua.is_finite() {
            let impedance = TEST_VOLTAGE / measured_ua;
            ElectrodeCalibration {
                impedance_mohm: impedance,
                active: impedance <= Z_MAX_MOHM,
                factor: TEST_VOLTAGE / measured_ua,
            }
        } else {
            ElectrodeCalibration {
                impedance_mohm: f64::INFINITY,
                active: false,
                factor: 0.0,
            }
        };

        progress(electrode, &calibration);
        result.electrodes.push(calibration);
    }

    Ok(result)
}

fn await_response(
    transport: &mut dyn Transport,
    reader: &mut FrameReader,
    timeout: Duration,
) -> Result<Vec<f64>, BioError> {
    loop {
        if let Some(frame) = reader.next_frame() {
            if frame.frame_type == FT_RESPONSE {
                return framing::decode_response(&frame.payload).map_err(BioError::Internal);
            }
            continue;
        }
        let bytes = transport.recv(timeout).map_err(BioError::from)?;
        reader.push(&bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bio::mea::transport::TransportError;
    use crate::config::TransportKind;
    use std::collections::VecDeque;

    /// Scripted in-memory transport: pops one canned reply per send.
    struct ScriptedTransport {
        replies: VecDeque<Vec<u8>>,
        pending: Option<Vec<u8>>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Vec<u8>>) -> Self {
            Self {
                replies: replies.into(),
                pending: None,
            }
        }
    }

    impl Transport for ScriptedTransport {
        fn send(&mut self, _bytes: &[u8]) -> Result<(), TransportError> {
            self.pending = self.replies.pop_front();
            Ok(())
        }

        fn recv(&mut self, _timeout: Duration) -> Result<Vec<u8>, TransportError> {
            self.pending.take().ok_or(TransportError::Timeout)
        }

        fn kind(&self) -> TransportKind {
            TransportKind::File
        }
    }

    fn reply_with_current(electrode: usize, current_ua: f64) -> Vec<u8> {
        let mut samples = vec![0.0; ELECTRODE_COUNT];
        samples[electrode] = current_ua;
        framing::encode_response(&samples)
    }

    #[test]
    fn test_sweep_solves_impedance() {
        // Electrode 0 answers 0.25 uA at 0.5 V -> 2 Mohm; the rest 1 uA
        let mut replies = Vec::new();
        replies.push(reply_with_current(0, 0.25));
        for e in 1..ELECTRODE_COUNT {
            replies.push(reply_with_current(e, 1.0));
        }

        let mut transport = ScriptedTransport::new(replies);
        let mut reader = FrameReader::new();
        let mut seen = 0usize;

        let result = run_impedance_sweep(
            &mut transport,
            &mut reader,
            Duration::from_millis(10),
            |_, _| seen += 1,
        )
        .unwrap();

        assert_eq!(seen, ELECTRODE_COUNT);
        assert!((result.electrodes[0].impedance_mohm - 2.0).abs() < 1e-6);
        assert!(result.electrodes[0].active);
        assert!((result.electrodes[1].impedance_mohm - 0.5).abs() < 1e-6);
        assert_eq!(result.active_count(), ELECTRODE_COUNT);
    }

    #[test]
    fn test_dead_electrode_marked_inactive() {
        // Electrode 5 returns no current
        let mut replies = Vec::new();
        for e in 0..ELECTRODE_COUNT {
            let current = if e == 5 { 0.0 } else { 1.0 };
            replies.push(reply_with_current(e, current));
        }

        let mut transport = ScriptedTransport::new(replies);
        let mut reader = FrameReader::new();
        let result = run_impedance_sweep(
            &mut transport,
            &mut reader,
            Duration::from_millis(10),
            |_, _| {},
        )
        .unwrap();

        assert!(!result.electrodes[5].active);
        assert_eq!(result.electrodes[5].factor, 0.0);
        assert_eq!(result.active_count(), ELECTRODE_COUNT - 1);
    }

    #[test]
    fn test_high_impedance_marked_inactive() {
        // 0.01 uA at 0.5 V -> 50 Mohm, above the cutoff
        let mut replies = Vec::new();
        for e in 0..ELECTRODE_COUNT {
            let current = if e == 7 { 0.01 } else { 1.0 };
            replies.push(reply_with_current(e, current));
        }

        let mut transport = ScriptedTransport::new(replies);
        let mut reader = FrameReader::new();
        let result = run_impedance_sweep(
            &mut transport,
            &mut reader,
            Duration::from_millis(10),
            |_, _| {},
        )
        .unwrap();

        assert!(!result.electrodes[7].active);
        assert!(result.electrodes[7].impedance_mohm > Z_MAX_MOHM);
    }

    #[test]
    fn test_missing_reply_times_out() {
        let mut transport = ScriptedTransport::new(vec![]);
        let mut reader = FrameReader::new();
        let err = run_impedance_sweep(
            &mut transport,
            &mut reader,
            Duration::from_millis(10),
            |_, _| {},
        )
        .unwrap_err();
        assert_eq!(err, BioError::Timeout);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = std::env::temp_dir().join("bio-mining-calibration-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("calibration.json");

        let result = CalibrationResult::default();
        result.save(&path).unwrap();
        let restored = CalibrationResult::load(&path).unwrap();
        assert_eq!(restored.electrodes.len(), ELECTRODE_COUNT);
        assert_eq!(restored.active_count(), ELECTRODE_COUNT);

        std::fs::remove_file(&path).ok();
    }
}
