// Block header - the 80-byte proof-of-work input

use crate::core::{Hash256, hash256};

/// Serialised header length in bytes.
pub const HEADER_LEN: usize = 80;
/// Offset of the nonce field inside the serialised header.
pub const NONCE_OFFSET: usize = 76;

/// Block header - 80 bytes on the wire, Bitcoin layout.
///
/// The nonce occupies the last four bytes, so a miner can re-hash the
/// header by overwriting only bytes 76..80 of the serialised form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block version
    pub version: u32,
    /// Hash of the previous block
    pub prev_block_hash: Hash256,
    /// Merkle root of all transactions in the block
    pub merkle_root: Hash256,
    /// Block timestamp (Unix epoch)
    pub timestamp: u32,
    /// Difficulty target (compact format)
    pub bits: u32,
    /// Nonce for proof-of-work
    pub nonce: u32,
}

impl BlockHeader {
    pub fn new(
        version: u32,
        prev_block_hash: Hash256,
        merkle_root: Hash256,
        timestamp: u32,
        bits: u32,
        nonce: u32,
    ) -> Self {
        Self {
            version,
            prev_block_hash,
            merkle_root,
            timestamp,
            bits,
            nonce,
        }
    }

    /// Serialise to the canonical 80-byte little-endian wire form.
    pub fn serialize(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&self.version.to_le_bytes());
        buf[4..36].copy_from_slice(self.prev_block_hash.as_bytes());
        buf[36..68].copy_from_slice(self.merkle_root.as_bytes());
        buf[68..72].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[72..76].copy_from_slice(&self.bits.to_le_bytes());
        buf[NONCE_OFFSET..].copy_from_slice(&self.nonce.to_le_bytes());
        buf
    }

    /// Deserialise from at least 80 bytes of wire data.
    pub fn deserialize(data: &[u8]) -> Result<Self, String> {
        if data.len() < HEADER_LEN {
            return Err(format!("block header too short: {} bytes", data.len()));
        }

        let le_u32 = |offset: usize| {
            let mut word = [0u8; 4];
            word.copy_from_slice(&data[offset..offset + 4]);
            u32::from_le_bytes(word)
        };

        Ok(Self {
            version: le_u32(0),
            prev_block_hash: Hash256::from_slice(&data[4..36])?,
            merkle_root: Hash256::from_slice(&data[36..68])?,
            timestamp: le_u32(68),
            bits: le_u32(72),
            nonce: le_u32(NONCE_OFFSET),
        })
    }

    /// Parse a 160-character hex string of the wire form.
    pub fn from_hex(hex_str: &str) -> Result<Self, String> {
        let bytes = hex::decode(hex_str.trim()).map_err(|e| format!("invalid header hex: {}", e))?;
        Self::deserialize(&bytes)
    }

    /// Double-SHA-256 of the serialised header (the canonical block hash).
    pub fn hash(&self) -> Hash256 {
        hash256(&self.serialize())
    }

    /// Copy with the nonce replaced.
    pub fn with_nonce(&self, nonce: u32) -> Self {
        let mut header = *self;
        header.nonce = nonce;
        header
    }
}
