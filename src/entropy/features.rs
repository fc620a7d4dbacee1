// Header feature extraction

use crate::core::BlockHeader;

/// Dimension of the feature vector (one value per electrode downstream).
pub const FEATURE_DIM: usize = 60;

/// Start of the normalisation window: 2009-01-01T00:00:00Z.
const EPOCH_WINDOW_START: f64 = 1_230_768_000.0;
/// End of the normalisation window: 2030-01-01T00:00:00Z.
const EPOCH_WINDOW_END: f64 = 1_893_456_000.0;

/// Features computed from a block header. `to_vector` lays them out as a
/// fixed 60-dimensional vector; the named fields feed the stimulus mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderFeatures {
    /// Timestamp position inside the 2009-2030 window, clamped to [0, 1]
    pub timestamp_norm: f64,
    /// log10(difficulty + 1)
    pub difficulty_log: f64,
    /// Shannon entropy of the previous-block hash hex string
    pub prev_entropy: f64,
    /// Leading '0' characters of the previous-block hash hex string
    pub prev_leading_zeros: f64,
    /// Shannon entropy of the merkle-root hex string
    pub merkle_entropy: f64,
    /// First 20 bytes of the previous-block hash, each mapped to [0, 1]
    pub prev_bytes: [f64; 20],
    /// First 20 bytes of the merkle root, each mapped to [0, 1]
    pub merkle_bytes: [f64; 20],
    /// version / 4
    pub version_norm: f64,
    /// bits / 2^32
    pub bits_norm: f64,
}

impl HeaderFeatures {
    /// Fixed layout: scalars, prev bytes, merkle bytes, version/bits,
    /// zero-padded to `FEATURE_DIM`.
    pub fn to_vector(&self) -> [f64; FEATURE_DIM] {
        let mut v = [0.0; FEATURE_DIM];
        v[0] = self.timestamp_norm;
        v[1] = self.difficulty_log;
        v[2] = self.prev_entropy;
        v[3] = self.prev_leading_zeros;
        v[4] = self.merkle_entropy;
        v[5..25].copy_from_slice(&self.prev_bytes);
        v[25..45].copy_from_slice(&self.merkle_bytes);
        v[45] = self.version_norm;
        v[46] = self.bits_norm;
        v
    }

    /// Extract features from a header. Pure: no I/O, bit-identical output
    /// for identical input.
    pub fn extract(header: &BlockHeader, difficulty: f64) -> Self {
        let prev_hex = header.prev_block_hash.to_hex();
        let merkle_hex = header.merkle_root.to_hex();

        let window = EPOCH_WINDOW_END - EPOCH_WINDOW_START;
        let timestamp_norm = ((header.timestamp as f64 - EPOCH_WINDOW_START) / window).clamp(0.0, 1.0);

        Self {
            timestamp_norm,
            difficulty_log: (difficulty.max(0.0) + 1.0).log10(),
            prev_entropy: shannon_entropy(&prev_hex),
            prev_leading_zeros: leading_hex_zeros(&prev_hex) as f64,
            merkle_entropy: shannon_entropy(&merkle_hex),
            prev_bytes: normalized_bytes(&prev_hex),
            merkle_bytes: normalized_bytes(&merkle_hex),
            version_norm: header.version as f64 / 4.0,
            bits_norm: header.bits as f64 / 4_294_967_296.0,
        }
    }
}

/// Shannon entropy of a hex string, each character a symbol: -sum p*log2(p).
/// Empty strings have entropy 0.
pub fn shannon_entropy(hex_str: &str) -> f64 {
    if hex_str.is_empty() {
        return 0.0;
    }

    let mut counts = [0usize; 256];
    let mut total = 0usize;
    for byte in hex_str.bytes() {
        counts[byte as usize] += 1;
        total += 1;
    }

    let total = total as f64;
    counts
        .iter()
        .filter(|count| **count > 0)
        .map(|count| {
            let p = *count as f64 / total;
            -p * p.log2()
        })
        .sum()
}

/// Count of '0' characters at the start of a hex string.
pub fn leading_hex_zeros(hex_str: &str) -> usize {
    hex_str.chars().take_while(|c| *c == '0').count()
}

/// First 20 bytes (40 hex chars) mapped to byte/255. Short strings are
/// right-padded with 0.0; non-hex character pairs yield 0.0.
pub fn normalized_bytes(hex_str: &str) -> [f64; 20] {
    let mut out = [0.0; 20];
    let chars: Vec<char> = hex_str.chars().collect();
    for (i, slot) in out.iter_mut().enumerate() {
        let pos = i * 2;
        if pos + 2 > chars.len() {
            break;
        }
        let pair: String = chars[pos..pos + 2].iter().collect();
        if let Ok(byte) = u8::from_str_radix(&pair, 16) {
            *slot = byte as f64 / 255.0;
        }
    }
    out
}
