// Bitcoin block primitives: hashes, headers, difficulty targets

mod hash;
mod header;
mod target;
mod types;

pub use hash::{hash256, hash_candidate};
pub use header::{BlockHeader, HEADER_LEN, NONCE_OFFSET};
pub use target::Target;
pub use types::Hash256;
