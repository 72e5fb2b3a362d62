//! Namespace mapper: logical S3 names to cluster (pool, object id) pairs.
//!
//! Object ids are derived deterministically so that retried operations
//! land on the same physical location.  The pool comes from the bucket
//! record's assignment, made once at bucket creation.

use rand::seq::SliceRandom;
use sha2::{Digest, Sha256};

/// Derive the storage object id for a single-PUT object.
///
/// Bucket names cannot contain `/`, so `bucket/key` is unambiguous.
pub fn object_id(bucket: &str, key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bucket.as_bytes());
    hasher.update(b"/");
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Derive the storage object id for an uploaded part.
///
/// Part ids are scoped by upload id, not by (bucket, key), so concurrent
/// sessions for the same key never clobber each other's parts. Re-uploading
/// a part number within one session maps to the same id, which is what
/// makes retried part uploads idempotent at the storage layer.
pub fn part_object_id(upload_id: &str, part_number: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"part/");
    hasher.update(upload_id.as_bytes());
    hasher.update(b"/");
    hasher.update(part_number.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Pick a pool for a new bucket from the configured pool list.
///
/// Assignment is random across the configured pools for capacity
/// spreading; the choice is persisted on the bucket record and never
/// changes afterwards.
pub fn choose_pool(pools: &[String]) -> Option<String> {
    pools.choose(&mut rand::thread_rng()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_deterministic() {
        assert_eq!(object_id("b1", "path/to/key"), object_id("b1", "path/to/key"));
    }

    #[test]
    fn test_object_id_distinguishes_bucket_and_key() {
        assert_ne!(object_id("b1", "k"), object_id("b2", "k"));
        assert_ne!(object_id("b1", "k1"), object_id("b1", "k2"));
        // The separator prevents ("ab", "c") colliding with ("a", "bc").
        assert_ne!(object_id("ab", "c"), object_id("a", "bc"));
    }

    #[test]
    fn test_part_object_id_scoped_by_upload() {
        let a = part_object_id("upload-1", 1);
        let b = part_object_id("upload-2", 1);
        assert_ne!(a, b);
        assert_eq!(a, part_object_id("upload-1", 1));
        assert_ne!(a, part_object_id("upload-1", 2));
    }

    #[test]
    fn test_object_id_is_hex_sha256() {
        let id = object_id("b", "k");
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_choose_pool() {
        assert!(choose_pool(&[]).is_none());
        let pools = vec!["obs".to_string()];
        assert_eq!(choose_pool(&pools).unwrap(), "obs");
        let many = vec!["a".to_string(), "b".to_string()];
        assert!(many.contains(&choose_pool(&many).unwrap()));
    }
}
