//! Configuration loading and types for PoolGate.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Components receive the section they need by value
//! at construction time; nothing reads ambient configuration from
//! request-handling code.

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Authentication settings (clock skew, seeded credentials).
    #[serde(default)]
    pub auth: AuthConfig,

    /// Metadata store settings.
    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Storage cluster settings.
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings (metrics endpoint).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Region name presented in credential scopes and bucket records.
    #[serde(default = "default_region")]
    pub region: String,

    /// Maximum object size in bytes (default 5 GiB).
    #[serde(default = "default_max_object_size")]
    pub max_object_size: u64,

    /// Minimum multipart part size in bytes; only the last part of an
    /// upload may be smaller (default 5 MiB).
    #[serde(default = "default_min_part_size")]
    pub min_part_size: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            region: default_region(),
            max_object_size: default_max_object_size(),
            min_part_size: default_min_part_size(),
        }
    }
}

/// Authentication settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Allowed difference between request time and server time, in seconds.
    #[serde(default = "default_clock_skew")]
    pub clock_skew_seconds: u64,

    /// Credentials seeded into the credential store at startup.
    #[serde(default)]
    pub credentials: Vec<CredentialConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            clock_skew_seconds: default_clock_skew(),
            credentials: Vec::new(),
        }
    }
}

/// A single externally provisioned credential.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialConfig {
    /// AWS-style access key ID.
    pub access_key: String,
    /// Secret key used for HMAC signing.
    pub secret_key: String,
    /// Canonical account ID this credential authenticates as.
    /// Defaults to the access key when omitted.
    #[serde(default)]
    pub account_id: Option<String>,
    /// Display name shown in owner fields. Defaults to the account ID.
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Metadata store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataConfig {
    /// Backend type: `sqlite` or `memory`.
    #[serde(default = "default_metadata_engine")]
    pub engine: String,

    /// Path to the SQLite database file.
    #[serde(default = "default_metadata_path")]
    pub path: String,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            engine: default_metadata_engine(),
            path: default_metadata_path(),
        }
    }
}

/// Storage cluster configuration.
///
/// The cluster is an external collaborator reached over HTTP; PoolGate
/// addresses it by (pool, object id).  `pools` is the set of capacity
/// partitions that buckets may be assigned to at creation.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    /// Backend type: `http` or `memory`.
    #[serde(default = "default_cluster_backend")]
    pub backend: String,

    /// Base URL of the cluster's object API (http backend).
    #[serde(default)]
    pub endpoint: String,

    /// Pool names available for bucket assignment.
    #[serde(default = "default_pools")]
    pub pools: Vec<String>,

    /// Per-call request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Retry bound the gateway applies to reads on timeout/unreachable.
    /// Writes are never retried by the gateway.
    #[serde(default = "default_read_retries")]
    pub read_retries: u32,

    /// Maximum concurrent in-flight cluster calls.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// How long a request may wait for a cluster connection permit before
    /// being rejected with 503, in milliseconds.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            backend: default_cluster_backend(),
            endpoint: String::new(),
            pools: default_pools(),
            request_timeout_seconds: default_request_timeout(),
            read_retries: default_read_retries(),
            max_connections: default_max_connections(),
            acquire_timeout_ms: default_acquire_timeout(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and the `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { metrics: true }
    }
}

// -- Defaults -----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9021
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_max_object_size() -> u64 {
    5 * 1024 * 1024 * 1024
}

fn default_min_part_size() -> u64 {
    5 * 1024 * 1024
}

fn default_clock_skew() -> u64 {
    900
}

fn default_metadata_engine() -> String {
    "sqlite".to_string()
}

fn default_metadata_path() -> String {
    "./data/metadata.db".to_string()
}

fn default_cluster_backend() -> String {
    "http".to_string()
}

fn default_pools() -> Vec<String> {
    vec!["obs".to_string()]
}

fn default_request_timeout() -> u64 {
    30
}

fn default_read_retries() -> u32 {
    2
}

fn default_max_connections() -> usize {
    256
}

fn default_acquire_timeout() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader -------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}
