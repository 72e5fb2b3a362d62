//! HTTP storage cluster backend.
//!
//! Talks to the cluster's object API over plain HTTP:
//!
//! ```text
//! PUT    {endpoint}/pools/{pool}/objects/{object_id}
//! GET    {endpoint}/pools/{pool}/objects/{object_id}   (supports Range)
//! HEAD   {endpoint}/pools/{pool}/objects/{object_id}
//! DELETE {endpoint}/pools/{pool}/objects/{object_id}
//! ```
//!
//! A semaphore caps in-flight cluster requests; when no permit arrives
//! within the acquire window the call fails fast with [`BackendError::Busy`]
//! so load sheds at the gateway instead of queueing without bound.
//! Reads retry transient failures a bounded number of times.  Writes
//! never retry.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use md5::{Digest, Md5};
use reqwest::StatusCode;
use tokio::sync::Semaphore;

use crate::config::ClusterConfig;

use super::backend::{is_retryable_read, BackendError, ObjectStat, PutOutcome, StorageBackend};

/// Storage cluster backend over HTTP.
pub struct HttpClusterBackend {
    client: reqwest::Client,
    endpoint: String,
    permits: Semaphore,
    acquire_timeout: Duration,
    read_retries: u32,
}

impl HttpClusterBackend {
    pub fn new(config: &ClusterConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            permits: Semaphore::new(config.max_connections),
            acquire_timeout: Duration::from_millis(config.acquire_timeout_ms),
            read_retries: config.read_retries,
        })
    }

    fn object_url(&self, pool: &str, object_id: &str) -> String {
        format!("{}/pools/{}/objects/{}", self.endpoint, pool, object_id)
    }

    /// Acquire an in-flight permit or shed the request.
    async fn acquire(&self) -> Result<tokio::sync::SemaphorePermit<'_>, BackendError> {
        match tokio::time::timeout(self.acquire_timeout, self.permits.acquire()).await {
            Ok(Ok(permit)) => Ok(permit),
            // The semaphore is never closed.
            Ok(Err(_)) => Err(BackendError::Busy),
            Err(_) => Err(BackendError::Busy),
        }
    }
}

/// Map a transport-level reqwest failure onto [`BackendError`].
fn map_transport_error(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout
    } else if err.is_connect() {
        BackendError::Unreachable(err.to_string())
    } else {
        BackendError::Other(err.into())
    }
}

/// Map a non-success cluster status onto [`BackendError`].
fn map_status(status: StatusCode) -> BackendError {
    match status {
        StatusCode::NOT_FOUND => BackendError::NotFound,
        StatusCode::INSUFFICIENT_STORAGE => BackendError::QuotaExceeded,
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => BackendError::Busy,
        status => BackendError::Other(anyhow::anyhow!("cluster returned status {status}")),
    }
}

impl StorageBackend for HttpClusterBackend {
    fn put(
        &self,
        pool: &str,
        object_id: &str,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<PutOutcome, BackendError>> + Send + '_>> {
        let url = self.object_url(pool, object_id);
        Box::pin(async move {
            let _permit = self.acquire().await?;

            let mut hasher = Md5::new();
            hasher.update(&data);
            let md5_hex = hex::encode(hasher.finalize());
            let size = data.len() as u64;

            let response = self
                .client
                .put(&url)
                .header(http::header::CONTENT_TYPE, "application/octet-stream")
                .body(data)
                .send()
                .await
                .map_err(map_transport_error)?;
            if !response.status().is_success() {
                return Err(map_status(response.status()));
            }
            Ok(PutOutcome { size, md5_hex })
        })
    }

    fn get(
        &self,
        pool: &str,
        object_id: &str,
        range: Option<(u64, u64)>,
    ) -> Pin<Box<dyn Future<Output = Result<Bytes, BackendError>> + Send + '_>> {
        let url = self.object_url(pool, object_id);
        Box::pin(async move {
            let mut attempt = 0u32;
            loop {
                let result = async {
                    let _permit = self.acquire().await?;
                    let mut request = self.client.get(&url);
                    if let Some((start, end)) = range {
                        request = request.header(http::header::RANGE, format!("bytes={start}-{end}"));
                    }
                    let response = request.send().await.map_err(map_transport_error)?;
                    if !response.status().is_success() {
                        return Err(map_status(response.status()));
                    }
                    response.bytes().await.map_err(map_transport_error)
                }
                .await;

                match result {
                    Ok(bytes) => return Ok(bytes),
                    Err(err) if is_retryable_read(&err) && attempt < self.read_retries => {
                        attempt += 1;
                        tracing::debug!(url = %url, attempt, error = %err, "retrying cluster read");
                    }
                    Err(err) => return Err(err),
                }
            }
        })
    }

    fn delete(
        &self,
        pool: &str,
        object_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        let url = self.object_url(pool, object_id);
        Box::pin(async move {
            let _permit = self.acquire().await?;
            let response = self
                .client
                .delete(&url)
                .send()
                .await
                .map_err(map_transport_error)?;
            if !response.status().is_success() {
                return Err(map_status(response.status()));
            }
            Ok(())
        })
    }

    fn stat(
        &self,
        pool: &str,
        object_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<ObjectStat, BackendError>> + Send + '_>> {
        let url = self.object_url(pool, object_id);
        Box::pin(async move {
            let mut attempt = 0u32;
            loop {
                let result = async {
                    let _permit = self.acquire().await?;
                    let response = self
                        .client
                        .head(&url)
                        .send()
                        .await
                        .map_err(map_transport_error)?;
                    if !response.status().is_success() {
                        return Err(map_status(response.status()));
                    }
                    let size = response
                        .headers()
                        .get(http::header::CONTENT_LENGTH)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                        .ok_or_else(|| {
                            BackendError::Other(anyhow::anyhow!(
                                "cluster HEAD response missing content-length"
                            ))
                        })?;
                    Ok(ObjectStat { size })
                }
                .await;

                match result {
                    Ok(stat) => return Ok(stat),
                    Err(err) if is_retryable_read(&err) && attempt < self.read_retries => {
                        attempt += 1;
                        tracing::debug!(url = %url, attempt, error = %err, "retrying cluster stat");
                    }
                    Err(err) => return Err(err),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterConfig;

    fn test_backend() -> HttpClusterBackend {
        let config = ClusterConfig {
            backend: "http".to_string(),
            endpoint: "http://cluster.internal:8090/".to_string(),
            pools: vec!["obs".to_string()],
            request_timeout_seconds: 30,
            read_retries: 2,
            max_connections: 4,
            acquire_timeout_ms: 50,
        };
        HttpClusterBackend::new(&config).expect("client build failed")
    }

    #[test]
    fn test_object_url_strips_trailing_slash() {
        let backend = test_backend();
        assert_eq!(
            backend.object_url("obs", "abc123"),
            "http://cluster.internal:8090/pools/obs/objects/abc123"
        );
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            map_status(StatusCode::NOT_FOUND),
            BackendError::NotFound
        ));
        assert!(matches!(
            map_status(StatusCode::INSUFFICIENT_STORAGE),
            BackendError::QuotaExceeded
        ));
        assert!(matches!(
            map_status(StatusCode::TOO_MANY_REQUESTS),
            BackendError::Busy
        ));
        assert!(matches!(
            map_status(StatusCode::SERVICE_UNAVAILABLE),
            BackendError::Busy
        ));
        assert!(matches!(
            map_status(StatusCode::INTERNAL_SERVER_ERROR),
            BackendError::Other(_)
        ));
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_saturated() {
        let backend = test_backend();
        let mut held = Vec::new();
        for _ in 0..4 {
            held.push(backend.acquire().await.expect("permit"));
        }
        let result = backend.acquire().await;
        assert!(matches!(result, Err(BackendError::Busy)));
        drop(held);
        assert!(backend.acquire().await.is_ok());
    }
}
