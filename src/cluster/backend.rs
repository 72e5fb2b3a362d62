//! Abstract storage cluster backend trait.
//!
//! Every cluster backend must implement [`StorageBackend`].  The trait
//! works in terms of opaque (pool, object id) addresses so callers do
//! not need to know the underlying transport.
//!
//! Unlike the metadata layer, cluster calls fail in ways the gateway
//! must tell apart (retry a read, shed load, surface 503), so the
//! methods return a typed [`BackendError`] instead of `anyhow`.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

/// Failure modes of a cluster operation.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The cluster endpoint could not be reached at all.
    #[error("cluster unreachable: {0}")]
    Unreachable(String),

    /// The operation did not finish within the configured timeout.
    #[error("cluster request timed out")]
    Timeout,

    /// No object exists at the requested (pool, object id).
    #[error("cluster object not found")]
    NotFound,

    /// The target pool refused the write for lack of space.
    #[error("cluster pool quota exceeded")]
    QuotaExceeded,

    /// The backend (or the gateway's own connection limiter) is
    /// saturated; the caller should shed the request.
    #[error("cluster busy")]
    Busy,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result of a successful cluster write.
#[derive(Debug, Clone)]
pub struct PutOutcome {
    /// Number of bytes stored.
    pub size: u64,
    /// Hex-encoded MD5 of the stored payload.
    pub md5_hex: String,
}

/// Result of a successful stat call.
#[derive(Debug, Clone, Copy)]
pub struct ObjectStat {
    /// Size of the stored payload in bytes.
    pub size: u64,
}

/// Async storage cluster contract.
///
/// Writes are atomic per object id: a `put` either stores the whole
/// payload or nothing, and overwriting an id replaces it wholesale.
pub trait StorageBackend: Send + Sync + 'static {
    /// Store `data` at (pool, object id), returning size and digest.
    fn put(
        &self,
        pool: &str,
        object_id: &str,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<PutOutcome, BackendError>> + Send + '_>>;

    /// Read the object at (pool, object id).
    ///
    /// `range` is an inclusive byte range within the object; `None`
    /// reads the full payload.
    fn get(
        &self,
        pool: &str,
        object_id: &str,
        range: Option<(u64, u64)>,
    ) -> Pin<Box<dyn Future<Output = Result<Bytes, BackendError>> + Send + '_>>;

    /// Delete the object at (pool, object id).
    fn delete(
        &self,
        pool: &str,
        object_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>>;

    /// Fetch the stored size of the object at (pool, object id).
    fn stat(
        &self,
        pool: &str,
        object_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<ObjectStat, BackendError>> + Send + '_>>;
}

/// Whether an error is worth retrying for a read-only operation.
///
/// Writes are never retried: a timed-out write may have landed, and
/// retrying hides that ambiguity from the caller.
pub fn is_retryable_read(err: &BackendError) -> bool {
    matches!(
        err,
        BackendError::Unreachable(_) | BackendError::Timeout | BackendError::Busy
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_read_classification() {
        assert!(is_retryable_read(&BackendError::Timeout));
        assert!(is_retryable_read(&BackendError::Busy));
        assert!(is_retryable_read(&BackendError::Unreachable("x".into())));
        assert!(!is_retryable_read(&BackendError::NotFound));
        assert!(!is_retryable_read(&BackendError::QuotaExceeded));
        assert!(!is_retryable_read(&BackendError::Other(anyhow::anyhow!("x"))));
    }
}
