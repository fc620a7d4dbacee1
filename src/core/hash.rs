// Double-SHA-256 hashing

use crate::core::{HEADER_LEN, Hash256, NONCE_OFFSET};
use sha2::{Digest, Sha256};

/// SHA256 double hash (Bitcoin convention): hash256 = SHA256(SHA256(data))
pub fn hash256(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&second);
    Hash256::new(bytes)
}

/// Hash an 80-byte header with its nonce field overwritten by `nonce`.
///
/// Works on a stack copy; the caller's buffer is untouched and no heap
/// allocation happens per call, so this is safe for the hot mining loop.
pub fn hash_candidate(header_bytes: &[u8; HEADER_LEN], nonce: u32) -> Hash256 {
    let mut candidate = *header_bytes;
    candidate[NONCE_OFFSET..].copy_from_slice(&nonce.to_le_bytes());
    hash256(&candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BlockHeader;

    #[test]
    fn test_hash256_is_deterministic() {
        let hash = hash256(b"hello world");
        assert_eq!(hash, hash256(b"hello world"));
        assert_ne!(hash, hash256(b"hello worle"));
    }

    #[test]
    fn test_hash256_known_vector() {
        // SHA256d("hello") per standard test vectors
        assert_eq!(
            hex::encode(hash256(b"hello").as_bytes()),
            "9595c9df90075148eb06860365df33584b75bff782a510c6cd4883a419833d50"
        );
    }

    #[test]
    fn test_hash_candidate_matches_header_hash() {
        let header = BlockHeader::new(
            1,
            Hash256::zero(),
            Hash256::zero(),
            1231006505,
            0x1d00ffff,
            0,
        );
        let bytes = header.serialize();

        for nonce in [0u32, 1, 0xdeadbeef, u32::MAX] {
            assert_eq!(hash_candidate(&bytes, nonce), header.with_nonce(nonce).hash());
        }
    }

    #[test]
    fn test_hash_candidate_leaves_input_untouched() {
        let header = BlockHeader::new(1, Hash256::zero(), Hash256::zero(), 0, 0x1d00ffff, 0);
        let bytes = header.serialize();
        let copy = bytes;
        let _ = hash_candidate(&bytes, 12345);
        assert_eq!(bytes, copy);
    }
}
