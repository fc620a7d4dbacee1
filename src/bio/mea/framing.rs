// Wire framing shared by every MEA transport

use crate::entropy::{ELECTRODE_COUNT, StimulusPattern};

/// Two magic bytes open every frame.
pub const FRAME_MAGIC: [u8; 2] = [0x4d, 0x45];

/// Frame types.
pub const FT_STIMULUS: u8 = 0x01;
pub const FT_RESPONSE: u8 = 0x02;
pub const FT_CALIBRATE: u8 = 0x03;
pub const FT_IDENTIFY: u8 = 0x04;
pub const FT_IDENTITY: u8 = 0x05;
pub const FT_CONFIG: u8 = 0x06;

const HEADER_LEN: usize = 5; // magic(2) + type(1) + payload_len(2)

/// A parsed frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub frame_type: u8,
    pub payload: Vec<u8>,
}

/// Encode a frame: magic, type, little-endian payload length, payload,
/// XOR checksum over the payload.
pub fn encode_frame(frame_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + 1);
    out.extend_from_slice(&FRAME_MAGIC);
    out.push(frame_type);
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(payload);
    out.push(xor_checksum(payload));
    out
}

fn xor_checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Incremental frame parser. Bytes arrive in arbitrary chunks; bad magic
/// or a failed checksum drops one byte and resynchronises.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Next complete, checksum-valid frame, if any.
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            // Resync to the magic
            while self.buf.len() >= 2 && self.buf[..2] != FRAME_MAGIC {
                self.buf.remove(0);
            }
            if self.buf.len() < HEADER_LEN {
                return None;
            }

            let payload_len = u16::from_le_bytes([self.buf[3], self.buf[4]]) as usize;
            let total = HEADER_LEN + payload_len + 1;
            if self.buf.len() < total {
                return None;
            }

            let frame_type = self.buf[2];
            let payload = self.buf[HEADER_LEN..HEADER_LEN + payload_len].to_vec();
            let checksum = self.buf[total - 1];

            if checksum == xor_checksum(&payload) {
                self.buf.drain(..total);
                return Some(Frame { frame_type, payload });
            }

            // Corrupt frame: skip the magic byte and rescan
            self.buf.remove(0);
        }
    }
}

/// Stimulus payload: per electrode an f32 amplitude and f32 frequency,
/// then a u32 duration in milliseconds.
pub fn encode_stimulus(pattern: &StimulusPattern, amplitudes: &[f64]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(ELECTRODE_COUNT * 8 + 4);
    for (i, electrode) in pattern.electrodes.iter().enumerate() {
        let amplitude = amplitudes.get(i).copied().unwrap_or(0.0);
        payload.extend_from_slice(&(amplitude as f32).to_le_bytes());
        payload.extend_from_slice(&(electrode.frequency_hz as f32).to_le_bytes());
    }
    payload.extend_from_slice(&(pattern.duration_ms as u32).to_le_bytes());
    encode_frame(FT_STIMULUS, &payload)
}

/// Calibration payload: electrode index and test voltage.
pub fn encode_calibrate(electrode: u8, test_voltage: f64) -> Vec<u8> {
    let mut payload = Vec::with_capacity(5);
    payload.push(electrode);
    payload.extend_from_slice(&(test_voltage as f32).to_le_bytes());
    encode_frame(FT_CALIBRATE, &payload)
}

pub fn encode_identify() -> Vec<u8> {
    encode_frame(FT_IDENTIFY, &[])
}

/// Device-settings payload sent once at bring-up: sampling rate,
/// amplifier gain and band-pass corners. The device applies it silently.
pub fn encode_device_config(
    sampling_rate_hz: u32,
    amplification: u32,
    filter_low_hz: f64,
    filter_high_hz: f64,
) -> Vec<u8> {
    let mut payload = Vec::with_capacity(16);
    payload.extend_from_slice(&sampling_rate_hz.to_le_bytes());
    payload.extend_from_slice(&amplification.to_le_bytes());
    payload.extend_from_slice(&(filter_low_hz as f32).to_le_bytes());
    payload.extend_from_slice(&(filter_high_hz as f32).to_le_bytes());
    encode_frame(FT_CONFIG, &payload)
}

/// Decode a response payload: exactly 60 little-endian f32 samples.
pub fn decode_response(payload: &[u8]) -> Result<Vec<f64>, String> {
    if payload.len() != ELECTRODE_COUNT * 4 {
        return Err(format!(
            "response payload is {} bytes, expected {}",
            payload.len(),
            ELECTRODE_COUNT * 4
        ));
    }
    Ok(payload
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64)
        .collect())
}

/// Encode 60 samples as a response frame. Used by the record/replay
/// transport's fixtures and by tests.
pub fn encode_response(samples: &[f64]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(ELECTRODE_COUNT * 4);
    for i in 0..ELECTRODE_COUNT {
        let v = samples.get(i).copied().unwrap_or(0.0);
        payload.extend_from_slice(&(v as f32).to_le_bytes());
    }
    encode_frame(FT_RESPONSE, &payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_round_trip() {
        let encoded = encode_frame(FT_IDENTIFY, b"hello");
        let mut reader = FrameReader::new();
        reader.push(&encoded);

        let frame = reader.next_frame().unwrap();
        assert_eq!(frame.frame_type, FT_IDENTIFY);
        assert_eq!(frame.payload, b"hello");
        assert!(reader.next_frame().is_none());
    }

    #[test]
    fn test_partial_delivery() {
        let encoded = encode_frame(FT_RESPONSE, &[1, 2, 3]);
        let mut reader = FrameReader::new();

        reader.push(&encoded[..4]);
        assert!(reader.next_frame().is_none());
        reader.push(&encoded[4..]);
        assert_eq!(reader.next_frame().unwrap().payload, vec![1, 2, 3]);
    }

    #[test]
    fn test_resync_after_garbage() {
        let mut reader = FrameReader::new();
        reader.push(&[0x00, 0xff, 0x13]);
        reader.push(&encode_frame(FT_RESPONSE, &[9]));
        let frame = reader.next_frame().unwrap();
        assert_eq!(frame.payload, vec![9]);
    }

    #[test]
    fn test_corrupt_checksum_dropped() {
        let mut encoded = encode_frame(FT_RESPONSE, &[1, 2, 3]);
        let last = encoded.len() - 1;
        encoded[last] ^= 0xff;

        let mut reader = FrameReader::new();
        reader.push(&encoded);
        assert!(reader.next_frame().is_none());

        // A following good frame still parses
        reader.push(&encode_frame(FT_RESPONSE, &[4, 5]));
        assert_eq!(reader.next_frame().unwrap().payload, vec![4, 5]);
    }

    #[test]
    fn test_device_config_frame() {
        let encoded = encode_device_config(25_000, 1200, 300.0, 8000.0);
        let mut reader = FrameReader::new();
        reader.push(&encoded);

        let frame = reader.next_frame().unwrap();
        assert_eq!(frame.frame_type, FT_CONFIG);
        assert_eq!(frame.payload.len(), 16);
        assert_eq!(
            u32::from_le_bytes(frame.payload[0..4].try_into().unwrap()),
            25_000
        );
    }

    #[test]
    fn test_response_round_trip() {
        let samples: Vec<f64> = (0..ELECTRODE_COUNT).map(|i| i as f64 * 0.5).collect();
        let encoded = encode_response(&samples);

        let mut reader = FrameReader::new();
        reader.push(&encoded);
        let frame = reader.next_frame().unwrap();
        assert_eq!(frame.frame_type, FT_RESPONSE);

        let decoded = decode_response(&frame.payload).unwrap();
        assert_eq!(decoded.len(), ELECTRODE_COUNT);
        for (a, b) in samples.iter().zip(&decoded) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_decode_response_wrong_length() {
        assert!(decode_response(&[0u8; 10]).is_err());
    }
}
