//! In-memory storage cluster backend.
//!
//! Holds payloads in a process-local map.  Used by tests and by
//! single-node development runs where no real cluster is available.
//! An optional byte capacity makes the pool-full path reachable.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;

use bytes::Bytes;
use md5::{Digest, Md5};

use super::backend::{BackendError, ObjectStat, PutOutcome, StorageBackend};

/// In-memory [`StorageBackend`] implementation.
#[derive(Default)]
pub struct MemoryClusterBackend {
    objects: RwLock<HashMap<(String, String), Bytes>>,
    /// Total byte capacity across all pools; `None` means unbounded.
    capacity: Option<u64>,
}

impl MemoryClusterBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that refuses writes once stored bytes would exceed `capacity`.
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            capacity: Some(capacity),
        }
    }

    fn stored_bytes(map: &HashMap<(String, String), Bytes>) -> u64 {
        map.values().map(|b| b.len() as u64).sum()
    }
}

impl StorageBackend for MemoryClusterBackend {
    fn put(
        &self,
        pool: &str,
        object_id: &str,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<PutOutcome, BackendError>> + Send + '_>> {
        let key = (pool.to_string(), object_id.to_string());
        Box::pin(async move {
            let mut objects = self.objects.write().expect("rwlock poisoned");
            if let Some(capacity) = self.capacity {
                // Replacing an id frees its old bytes first.
                let current = Self::stored_bytes(&objects)
                    - objects.get(&key).map(|b| b.len() as u64).unwrap_or(0);
                if current + data.len() as u64 > capacity {
                    return Err(BackendError::QuotaExceeded);
                }
            }

            let mut hasher = Md5::new();
            hasher.update(&data);
            let md5_hex = hex::encode(hasher.finalize());
            let size = data.len() as u64;
            objects.insert(key, data);
            Ok(PutOutcome { size, md5_hex })
        })
    }

    fn get(
        &self,
        pool: &str,
        object_id: &str,
        range: Option<(u64, u64)>,
    ) -> Pin<Box<dyn Future<Output = Result<Bytes, BackendError>> + Send + '_>> {
        let key = (pool.to_string(), object_id.to_string());
        Box::pin(async move {
            let objects = self.objects.read().expect("rwlock poisoned");
            let data = objects.get(&key).ok_or(BackendError::NotFound)?;
            match range {
                None => Ok(data.clone()),
                Some((start, end)) => {
                    let len = data.len() as u64;
                    if start >= len {
                        return Err(BackendError::Other(anyhow::anyhow!(
                            "range start {start} beyond object size {len}"
                        )));
                    }
                    let end = end.min(len - 1);
                    Ok(data.slice(start as usize..=end as usize))
                }
            }
        })
    }

    fn delete(
        &self,
        pool: &str,
        object_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        let key = (pool.to_string(), object_id.to_string());
        Box::pin(async move {
            let mut objects = self.objects.write().expect("rwlock poisoned");
            match objects.remove(&key) {
                Some(_) => Ok(()),
                None => Err(BackendError::NotFound),
            }
        })
    }

    fn stat(
        &self,
        pool: &str,
        object_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<ObjectStat, BackendError>> + Send + '_>> {
        let key = (pool.to_string(), object_id.to_string());
        Box::pin(async move {
            let objects = self.objects.read().expect("rwlock poisoned");
            match objects.get(&key) {
                Some(data) => Ok(ObjectStat {
                    size: data.len() as u64,
                }),
                None => Err(BackendError::NotFound),
            }
        })
    }
}
