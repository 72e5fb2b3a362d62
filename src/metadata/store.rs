//! Abstract metadata store trait.
//!
//! Any metadata backend must implement [`MetadataStore`].  The trait
//! uses manually desugared async methods (pinned futures) so trait
//! objects work without an async-trait dependency.
//!
//! Besides plain CRUD, the trait carries two conditional operations the
//! gateway's consistency story hangs on: [`MetadataStore::commit_completed_upload`]
//! (the single durability boundary of multipart completion) and
//! [`MetadataStore::delete_bucket_if_empty`] (emptiness check and delete
//! in one atomic step).

use std::future::Future;
use std::pin::Pin;

// -- Record types -------------------------------------------------------------

/// Metadata record for a bucket.
#[derive(Debug, Clone)]
pub struct BucketRecord {
    /// Bucket name (globally unique).
    pub name: String,
    /// ISO-8601 creation timestamp.
    pub created_at: String,
    /// Canonical owner account ID.
    pub owner_id: String,
    /// Owner display name.
    pub owner_display: String,
    /// Access control list (JSON-serialized [`crate::acl::Acl`]).
    pub acl: String,
    /// Storage cluster pool assigned at creation.
    pub pool: String,
}

/// Metadata record for an object.
///
/// A record only ever refers to fully durable cluster content: it is
/// written by the atomic commit of a single PUT or a multipart
/// completion, never while bytes are still in flight.
#[derive(Debug, Clone)]
pub struct ObjectRecord {
    /// Bucket the object belongs to.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Size in bytes.
    pub size: u64,
    /// Quoted ETag string (e.g., `"d41d8cd98f00b204e9800998ecf8427e"`).
    pub etag: String,
    /// MIME content type.
    pub content_type: String,
    /// ISO-8601 last-modified timestamp.
    pub last_modified: String,
    /// Storage cluster object id this record points at.
    pub object_id: String,
}

/// Lifecycle state of a multipart upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    /// Accepting parts.
    Open,
    /// A completion attempt is in flight; retryable.
    Completing,
    /// Terminal: the object record was committed.
    Completed,
    /// Terminal: the session was aborted.
    Aborted,
}

impl UploadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadState::Open => "open",
            UploadState::Completing => "completing",
            UploadState::Completed => "completed",
            UploadState::Aborted => "aborted",
        }
    }

    pub fn parse(s: &str) -> Option<UploadState> {
        match s {
            "open" => Some(UploadState::Open),
            "completing" => Some(UploadState::Completing),
            "completed" => Some(UploadState::Completed),
            "aborted" => Some(UploadState::Aborted),
            _ => None,
        }
    }

    /// Terminal sessions are never referenced again by clients.
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadState::Completed | UploadState::Aborted)
    }
}

/// Metadata record for a multipart upload session.
#[derive(Debug, Clone)]
pub struct UploadRecord {
    /// Unique upload identifier.
    pub upload_id: String,
    /// Bucket name.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// MIME content type for the final object.
    pub content_type: String,
    /// ACL snapshot taken at initiation (JSON-serialized).
    pub acl: String,
    /// Owner account ID.
    pub owner_id: String,
    /// Owner display name.
    pub owner_display: String,
    /// ISO-8601 initiation timestamp.
    pub initiated_at: String,
    /// Session lifecycle state.
    pub state: UploadState,
}

/// Metadata record for a single uploaded part.
#[derive(Debug, Clone)]
pub struct PartRecord {
    /// Part number (1-based, at most 10000).
    pub part_number: u32,
    /// Size in bytes.
    pub size: u64,
    /// Quoted ETag string (MD5 of the part payload).
    pub etag: String,
    /// Storage cluster object id holding the part bytes.
    pub object_id: String,
    /// ISO-8601 last-modified timestamp.
    pub last_modified: String,
}

// -- Outcome types ------------------------------------------------------------

/// Result of the conditional multipart commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// This caller won: the object record is durable and the session is
    /// `completed`.
    Committed,
    /// The session was not in `completing` state; a concurrent completion
    /// or abort raced this one.
    Conflict,
}

/// Result of the conditional bucket delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteBucketOutcome {
    Deleted,
    NotEmpty,
    NotFound,
}

// -- List result types --------------------------------------------------------

/// Result of a ListObjects operation.
#[derive(Debug, Clone, Default)]
pub struct ListObjectsResult {
    /// The objects matching the query, in key order.
    pub objects: Vec<ObjectRecord>,
    /// Common prefixes when a delimiter is used.
    pub common_prefixes: Vec<String>,
    /// Next continuation token for pagination, if truncated.
    pub next_continuation_token: Option<String>,
    /// Whether the result set was truncated.
    pub is_truncated: bool,
}

/// Result of a ListParts operation.
#[derive(Debug, Clone)]
pub struct ListPartsResult {
    /// The parts matching the query, ascending by part number.
    pub parts: Vec<PartRecord>,
    /// Whether the result set was truncated.
    pub is_truncated: bool,
    /// Next part number marker for pagination, if truncated.
    pub next_part_number_marker: Option<u32>,
}

/// Result of a ListMultipartUploads operation.
#[derive(Debug, Clone)]
pub struct ListUploadsResult {
    /// The open uploads matching the query.
    pub uploads: Vec<UploadRecord>,
    /// Whether the result set was truncated.
    pub is_truncated: bool,
    /// Next key marker for pagination, if truncated.
    pub next_key_marker: Option<String>,
    /// Next upload ID marker for pagination, if truncated.
    pub next_upload_id_marker: Option<String>,
}

// -- Trait --------------------------------------------------------------------

/// Async metadata store contract.
///
/// A successful write is visible to subsequent reads from any task.
pub trait MetadataStore: Send + Sync + 'static {
    // -- Buckets --------------------------------------------------------------

    /// Create a new bucket record. Fails if the name is taken.
    fn create_bucket(
        &self,
        record: BucketRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Get a bucket by name.
    fn get_bucket(
        &self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<BucketRecord>>> + Send + '_>>;

    /// List all buckets.
    fn list_buckets(
        &self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<BucketRecord>>> + Send + '_>>;

    /// Delete a bucket only if it holds no objects and no live upload
    /// sessions. The emptiness check and the delete are one atomic step.
    fn delete_bucket_if_empty(
        &self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<DeleteBucketOutcome>> + Send + '_>>;

    /// Replace the ACL on a bucket.
    fn update_bucket_acl(
        &self,
        name: &str,
        acl: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    // -- Objects --------------------------------------------------------------

    /// Insert or replace an object record (last write wins).
    fn put_object(
        &self,
        record: ObjectRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Get a single object record.
    fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<ObjectRecord>>> + Send + '_>>;

    /// List objects in a bucket with optional prefix and delimiter.
    fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        max_keys: u32,
        continuation_token: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ListObjectsResult>> + Send + '_>>;

    /// Delete an object record. Returns whether a record existed.
    fn delete_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;

    // -- Multipart sessions ---------------------------------------------------

    /// Create a multipart upload session record.
    fn create_upload(
        &self,
        record: UploadRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Get an upload session by id.
    fn get_upload(
        &self,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<UploadRecord>>> + Send + '_>>;

    /// Record an uploaded part (insert or replace).
    fn put_part(
        &self,
        upload_id: &str,
        part: PartRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// List parts belonging to an upload, ascending by part number.
    fn list_parts(
        &self,
        upload_id: &str,
        max_parts: u32,
        part_number_marker: u32,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ListPartsResult>> + Send + '_>>;

    /// Snapshot of all part records for completion validation, ascending
    /// by part number.
    fn parts_snapshot(
        &self,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<PartRecord>>> + Send + '_>>;

    /// Conditionally move an upload session from `from` to `to`.
    /// Returns false if the session was not in `from` (no mutation).
    fn transition_upload(
        &self,
        upload_id: &str,
        from: UploadState,
        to: UploadState,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;

    /// The conditional completion commit: in one atomic step, verify the
    /// session is `completing`, mark it `completed`, replace any prior
    /// object record at (bucket, key) with `final_object`, and drop the
    /// session's part records.
    fn commit_completed_upload(
        &self,
        upload_id: &str,
        final_object: ObjectRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<CommitOutcome>> + Send + '_>>;

    /// List open multipart uploads for a bucket.
    fn list_uploads(
        &self,
        bucket: &str,
        prefix: &str,
        max_uploads: u32,
        key_marker: &str,
        upload_id_marker: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ListUploadsResult>> + Send + '_>>;
}
