//! PoolGate: an S3-compatible REST gateway for pooled object-storage
//! clusters.
//!
//! The gateway speaks the S3 HTTP dialect on the front (SigV4 header
//! auth, bucket/object CRUD, multipart uploads, ACLs) and stores
//! payloads as opaque objects in a storage cluster on the back.  Object
//! metadata lives in a local store (SQLite or in-memory); payload
//! addresses are derived deterministically so no per-object placement
//! state is needed.

pub mod acl;
pub mod auth;
pub mod cluster;
pub mod config;
pub mod credentials;
pub mod errors;
pub mod handlers;
pub mod mapper;
pub mod metadata;
pub mod metrics;
pub mod multipart;
pub mod server;
pub mod xml;

use std::sync::Arc;

use crate::auth::AuthCache;
use crate::cluster::backend::StorageBackend;
use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::metadata::store::MetadataStore;

/// Shared application state passed to all handlers.
pub struct AppState {
    /// Loaded configuration.
    pub config: Config,
    /// Access-key to credential resolution.
    pub credentials: Arc<dyn CredentialStore>,
    /// Bucket/object/upload metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Storage cluster backend holding object payloads.
    pub cluster: Arc<dyn StorageBackend>,
    /// Cache of derived SigV4 signing keys.
    pub auth_cache: AuthCache,
}
