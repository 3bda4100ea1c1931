//! Content digests for migration scripts

use sha2::{Digest, Sha256};

/// Length of a hex encoded SHA-256 digest
pub const HASH_HEX_LEN: usize = 64;

/// SHA-256 of a script, lowercase hex encoded
pub fn hash_script(content: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_ref());
    hex::encode(hasher.finalize())
}
