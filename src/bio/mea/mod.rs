// Real-MEA bio-compute backend

pub mod calibration;
pub mod framing;
pub mod plasticity;
pub mod spike;
pub mod transport;

pub use calibration::{CalibrationResult, ElectrodeCalibration, Z_MAX_MOHM};
pub use plasticity::StdpTable;
pub use spike::{SPIKE_BUFFER_CAPACITY, SpikeDetector};
pub use transport::{Transport, TransportError};

use crate::bio::response::now_us;
use crate::bio::{BioCompute, BioError, BioResponse};
use crate::config::BioConfig;
use crate::entropy::{ELECTRODE_COUNT, StimulusPattern};
use framing::{FT_IDENTITY, FT_RESPONSE, FrameReader};
use std::fmt;
use std::time::Duration;

/// Responses below this signal quality are rejected.
const QUALITY_FLOOR: f64 = 0.05;

/// STDP learning rate and time constant.
const STDP_ETA: f64 = 0.05;
const STDP_TAU_US: f64 = 5000.0;

/// How many recent spikes one reinforcement round considers.
const STDP_RECENT_SPIKES: usize = 200;

/// Connection lifecycle of a hardware session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Calibrating,
    Streaming,
    Error,
}

impl ConnectionState {
    /// Whether moving to `to` is a legal transition. Any state may drop to
    /// `Error`, and any state may close down to `Disconnected`.
    pub fn can_transition(self, to: ConnectionState) -> bool {
        use ConnectionState::*;
        if to == Error || to == Disconnected {
            return true;
        }
        matches!(
            (self, to),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connected, Calibrating)
                | (Calibrating, Connected)
                | (Connected, Streaming)
                | (Streaming, Connected)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Calibrating => write!(f, "calibrating"),
            ConnectionState::Streaming => write!(f, "streaming"),
            ConnectionState::Error => write!(f, "error"),
        }
    }
}

/// Driver for a physical multi-electrode array behind one of the generic
/// byte transports. Owns the connection state machine, per-electrode
/// calibration, the spike detector and the plasticity table.
pub struct MeaBackend {
    config: BioConfig,
    state: ConnectionState,
    transport: Option<Box<dyn Transport>>,
    reader: FrameReader,
    calibration: CalibrationResult,
    spikes: SpikeDetector,
    stdp: StdpTable,
    device_id: Option<String>,
}

impl MeaBackend {
    pub fn new(config: &BioConfig) -> Self {
        Self {
            config: config.clone(),
            state: ConnectionState::Disconnected,
            transport: None,
            reader: FrameReader::new(),
            calibration: CalibrationResult::default(),
            spikes: SpikeDetector::new(config),
            stdp: StdpTable::new(STDP_ETA, STDP_TAU_US),
            device_id: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn calibration(&self) -> &CalibrationResult {
        &self.calibration
    }

    fn transition(&mut self, to: ConnectionState) -> Result<(), BioError> {
        if !self.state.can_transition(to) {
            let msg = format!("illegal state transition {} -> {}", self.state, to);
            self.state = ConnectionState::Error;
            return Err(BioError::Internal(msg));
        }
        log::debug!("mea state {} -> {}", self.state, to);
        self.state = to;
        Ok(())
    }

    fn fail<T>(&mut self, err: BioError) -> Result<T, BioError> {
        self.state = ConnectionState::Error;
        Err(err)
    }

    fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.config.read_timeout_ms as u64)
    }

    /// Pump the transport until a frame of `frame_type` arrives or the
    /// timeout elapses. Unrelated frames are consumed and dropped.
    fn await_frame(&mut self, frame_type: u8, timeout: Duration) -> Result<Vec<u8>, BioError> {
        let transport = self.transport.as_mut().ok_or(BioError::NotReady)?;
        loop {
            if let Some(frame) = self.reader.next_frame() {
                if frame.frame_type == frame_type {
                    return Ok(frame.payload);
                }
                continue;
            }
            let bytes = transport.recv(timeout).map_err(BioError::from)?;
            self.reader.push(&bytes);
        }
    }

    fn query_identity(&mut self) -> Result<String, BioError> {
        let transport = self.transport.as_mut().ok_or(BioError::NotReady)?;
        transport.send(&framing::encode_identify()).map_err(BioError::from)?;
        let timeout = self.read_timeout();
        let payload = self.await_frame(FT_IDENTITY, timeout)?;
        Ok(String::from_utf8_lossy(&payload).into_owned())
    }

    fn calibrate(&mut self) -> Result<(), BioError> {
        self.transition(ConnectionState::Calibrating)?;

        if let Some(path) = self.config.calibration_file.clone() {
            match CalibrationResult::load(&path) {
                Ok(result) => {
                    log::info!(
                        "loaded calibration from {}: {}/{} electrodes active",
                        path.display(),
                        result.active_count(),
                        ELECTRODE_COUNT
                    );
                    self.calibration = result;
                    return self.transition(ConnectionState::Connected);
                }
                Err(err) => {
                    log::warn!("calibration file unusable ({}), running sweep", err);
                }
            }
        }

        let timeout = self.read_timeout();
        let transport = self.transport.as_mut().ok_or(BioError::NotReady)?;
        let result =
            calibration::run_impedance_sweep(transport.as_mut(), &mut self.reader, timeout, |e, c| {
                log::debug!(
                    "electrode {:02}: {:.2} Mohm, {}",
                    e,
                    c.impedance_mohm,
                    if c.active { "active" } else { "inactive" }
                );
            })?;

        log::info!(
            "impedance sweep done: {}/{} electrodes active",
            result.active_count(),
            ELECTRODE_COUNT
        );

        if let Some(path) = &self.config.calibration_file {
            if let Err(err) = result.save(path) {
                log::warn!("could not persist calibration: {}", err);
            }
        }

        self.calibration = result;
        self.transition(ConnectionState::Connected)
    }

    /// Clamp the stimulus to the configured voltage and current limits.
    /// Inactive electrodes are silenced; electrodes whose impedance would
    /// draw more than the current ceiling are attenuated.
    fn safe_amplitudes(&self, pattern: &StimulusPattern) -> Vec<f64> {
        let v_max = self.config.stim_v_max;
        let i_max = self.config.stim_i_max_ua;

        pattern
            .electrodes
            .iter()
            .enumerate()
            .map(|(e, electrode)| {
                let calibration = self
                    .calibration
                    .electrodes
                    .get(e)
                    .copied()
                    .unwrap_or_default();
                if !calibration.active {
                    return 0.0;
                }

                let mut amplitude = electrode.amplitude.clamp(0.0, v_max);
                // I = V / Z: volts over megaohms gives microamps
                if calibration.impedance_mohm.is_finite() && calibration.impedance_mohm > 0.0 {
                    let implied_ua = amplitude / calibration.impedance_mohm;
                    if implied_ua > i_max {
                        amplitude = i_max * calibration.impedance_mohm;
                    }
                }
                amplitude
            })
            .collect()
    }
}

impl BioCompute for MeaBackend {
    fn initialise(&mut self) -> Result<(), BioError> {
        if self.ready() {
            return Ok(());
        }
        if self.state == ConnectionState::Error {
            self.transition(ConnectionState::Disconnected)?;
        }

        self.transition(ConnectionState::Connecting)?;
        self.reader.clear();

        match transport::open(&self.config) {
            Ok(transport) => self.transport = Some(transport),
            Err(err) => {
                log::warn!("mea connect failed on {}: {}", self.config.transport, err);
                return self.fail(err.into());
            }
        }
        self.transition(ConnectionState::Connected)?;

        match self.query_identity() {
            Ok(id) => {
                log::info!("mea device: {}", id);
                self.device_id = Some(id);
            }
            Err(err) => return self.fail(err),
        }

        // Push the acquisition settings; the device applies them silently
        let config_frame = framing::encode_device_config(
            self.config.sampling_rate_hz,
            self.config.amplification,
            self.config.filter_low_hz,
            self.config.filter_high_hz,
        );
        if let Err(err) = self
            .transport
            .as_mut()
            .ok_or(BioError::NotReady)
            .and_then(|t| t.send(&config_frame).map_err(BioError::from))
        {
            return self.fail(err);
        }

        if self.config.auto_calibration {
            if let Err(err) = self.calibrate() {
                return self.fail(err);
            }
        }

        self.transition(ConnectionState::Streaming)
    }

    fn ready(&self) -> bool {
        self.state == ConnectionState::Streaming && self.transport.is_some()
    }

    fn stimulate_and_capture(
        &mut self,
        pattern: &StimulusPattern,
        wait_ms: u64,
    ) -> Result<BioResponse, BioError> {
        if !self.ready() {
            return Err(BioError::NotReady);
        }

        let amplitudes = self.safe_amplitudes(pattern);
        let frame = framing::encode_stimulus(pattern, &amplitudes);
        let wait = Duration::from_millis(wait_ms.max(1));
        let attempts = self.config.max_retries.max(1);

        let mut last_err = BioError::Timeout;
        for attempt in 0..attempts {
            let transport = self.transport.as_mut().ok_or(BioError::NotReady)?;
            if let Err(err) = transport.send(&frame) {
                return self.fail(err.into());
            }

            match self.await_frame(FT_RESPONSE, wait) {
                Ok(payload) => {
                    let raw_uv = match framing::decode_response(&payload) {
                        Ok(samples) => samples,
                        Err(err) => {
                            log::warn!("malformed response frame: {}", err);
                            last_err = BioError::Timeout;
                            continue;
                        }
                    };

                    let captured_at = now_us();
                    let mut spikes = Vec::new();
                    if self.config.spike_detection {
                        let detected = self.spikes.process_frame(&raw_uv, captured_at);
                        if detected > 0 {
                            log::debug!("{} spikes in response frame", detected);
                        }
                        spikes = self.spikes.recent(detected);
                    }

                    // Calibrated millivolt-scale samples
                    let samples: Vec<f64> = raw_uv
                        .iter()
                        .enumerate()
                        .map(|(e, uv)| {
                            let factor = self
                                .calibration
                                .electrodes
                                .get(e)
                                .map(|c| if c.active { c.factor } else { 0.0 })
                                .unwrap_or(1.0);
                            uv * factor / 1000.0
                        })
                        .collect();

                    let response = BioResponse::from_samples(samples).with_spikes(spikes);
                    if response.signal_quality < QUALITY_FLOOR {
                        return Err(BioError::SignalQualityBelowFloor);
                    }
                    return Ok(response);
                }
                Err(BioError::Timeout) => {
                    log::warn!("response timeout, attempt {}/{}", attempt + 1, attempts);
                    last_err = BioError::Timeout;
                }
                Err(BioError::DeviceDisconnected) => {
                    return self.fail(BioError::DeviceDisconnected);
                }
                Err(err) => return self.fail(err),
            }
        }

        Err(last_err)
    }

    fn reinforce(
        &mut self,
        _pattern: &StimulusPattern,
        _nonce: u32,
        reward: f64,
    ) -> Result<(), BioError> {
        if !self.ready() {
            return Err(BioError::NotReady);
        }

        let spikes = self.spikes.recent(STDP_RECENT_SPIKES);
        if spikes.is_empty() {
            return Ok(());
        }
        let updates = self.stdp.apply(&spikes, reward.clamp(-1.0, 1.0));
        log::debug!("stdp round: {} pair updates over {} spikes", updates, spikes.len());
        Ok(())
    }

    fn reset(&mut self) -> Result<(), BioError> {
        self.transport = None;
        self.reader.clear();
        self.spikes.clear();
        self.stdp.reset();
        self.calibration = CalibrationResult::default();
        self.device_id = None;
        self.state = ConnectionState::Disconnected;
        self.initialise()
    }

    fn diagnostic(&self) -> String {
        format!(
            "mea backend: {} via {}, device {}, {}/{} electrodes active, {} buffered spikes",
            self.state,
            self.config.transport,
            self.device_id.as_deref().unwrap_or("unknown"),
            self.calibration.active_count(),
            ELECTRODE_COUNT,
            self.spikes.len()
        )
    }
}
