use sha2::{Digest, Sha256};

const SHORT_HASH_LEN: usize = 10;

pub fn compute_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    format!("sha256:{}", hex::encode(result))
}

/// Hex digest prefix used where the hash is shown to users or embedded in output.
pub fn short_hash(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    hex::encode(digest)[..SHORT_HASH_LEN].to_string()
}
