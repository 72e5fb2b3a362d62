//! Multipart completion coordinator.
//!
//! Completion is the delicate part of the upload lifecycle: the client
//! names the parts it wants assembled, and exactly one completion
//! attempt may turn them into an object.  The session record acts as
//! the arbiter.  An attempt first moves the session `open` to
//! `completing` (or joins an existing `completing` attempt after a
//! crashed or racing caller), validates the named parts against the
//! recorded ones, assembles and stores the final payload, and then
//! issues the single conditional metadata commit.  Whoever loses that
//! commit gets [`S3Error::OperationAborted`].
//!
//! Validation failures reopen the session so the client can repair and
//! retry; they never destroy uploaded parts.

use bytes::BytesMut;
use md5::{Digest, Md5};

use crate::cluster::backend::StorageBackend;
use crate::errors::S3Error;
use crate::mapper;
use crate::metadata::store::{
    CommitOutcome, MetadataStore, ObjectRecord, PartRecord, UploadRecord, UploadState,
};

/// A part named by the client in a CompleteMultipartUpload request.
#[derive(Debug, Clone)]
pub struct RequestedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Aggregate ETag of a multipart object: MD5 over the concatenated raw
/// part digests, suffixed with the part count.
pub fn aggregate_etag(parts: &[PartRecord]) -> Result<String, S3Error> {
    let mut hasher = Md5::new();
    for part in parts {
        let unquoted = part.etag.trim_matches('"');
        let digest = hex::decode(unquoted)
            .map_err(|_| S3Error::InternalError(anyhow::anyhow!("malformed part etag stored")))?;
        hasher.update(&digest);
    }
    Ok(format!("\"{}-{}\"", hex::encode(hasher.finalize()), parts.len()))
}

fn unquoted_eq(a: &str, b: &str) -> bool {
    a.trim_matches('"') == b.trim_matches('"')
}

/// Validate the requested parts against the recorded ones.
///
/// Returns the matched records in request order.  Any mismatch is an
/// [`S3Error::IncompleteBody`]: the named assembly cannot be built from
/// what was actually uploaded.
fn validate_parts(
    requested: &[RequestedPart],
    recorded: &[PartRecord],
    min_part_size: u64,
) -> Result<Vec<PartRecord>, S3Error> {
    let mut matched = Vec::with_capacity(requested.len());
    for (index, req) in requested.iter().enumerate() {
        let record = recorded
            .iter()
            .find(|p| p.part_number == req.part_number)
            .ok_or_else(|| {
                tracing::debug!(part_number = req.part_number, "completion names a part that was never uploaded");
                S3Error::IncompleteBody
            })?;
        if !unquoted_eq(&record.etag, &req.etag) {
            tracing::debug!(part_number = req.part_number, "part checksum does not match the uploaded data");
            return Err(S3Error::IncompleteBody);
        }
        let is_last = index == requested.len() - 1;
        if !is_last && record.size < min_part_size {
            tracing::debug!(part_number = req.part_number, size = record.size, "non-final part is below the minimum part size");
            return Err(S3Error::IncompleteBody);
        }
        matched.push(record.clone());
    }
    Ok(matched)
}

/// Run a complete-multipart-upload attempt to its conclusion.
///
/// On success the returned record is already durable in the metadata
/// store and the session is terminal.
pub async fn complete_upload(
    metadata: &dyn MetadataStore,
    cluster: &dyn StorageBackend,
    upload: &UploadRecord,
    pool: &str,
    requested: &[RequestedPart],
    min_part_size: u64,
) -> Result<ObjectRecord, S3Error> {
    // Part numbers must arrive strictly ascending.
    for pair in requested.windows(2) {
        if pair[1].part_number <= pair[0].part_number {
            return Err(S3Error::InvalidPartOrder);
        }
    }

    // Claim the session. Losing the claim is fine if a previous attempt
    // stalled in `completing`; the final commit still picks one winner.
    let claimed = metadata
        .transition_upload(&upload.upload_id, UploadState::Open, UploadState::Completing)
        .await?;
    if !claimed {
        match metadata.get_upload(&upload.upload_id).await? {
            Some(current) if current.state == UploadState::Completing => {}
            _ => {
                return Err(S3Error::NoSuchUpload {
                    upload_id: upload.upload_id.clone(),
                })
            }
        }
    }

    let recorded = metadata.parts_snapshot(&upload.upload_id).await?;
    let matched = match validate_parts(requested, &recorded, min_part_size) {
        Ok(matched) => matched,
        Err(err) => {
            // Reopen so the client can upload the missing pieces and retry.
            let _ = metadata
                .transition_upload(&upload.upload_id, UploadState::Completing, UploadState::Open)
                .await;
            return Err(err);
        }
    };

    // Assemble the final payload before touching metadata: an object
    // record must never point at bytes that are not durable yet.
    let total_size: u64 = matched.iter().map(|p| p.size).sum();
    let mut assembled = BytesMut::with_capacity(total_size as usize);
    for part in &matched {
        let data = cluster.get(pool, &part.object_id, None).await?;
        assembled.extend_from_slice(&data);
    }

    let final_object_id = mapper::object_id(&upload.bucket, &upload.key);
    cluster
        .put(pool, &final_object_id, assembled.freeze())
        .await?;

    let etag = aggregate_etag(&matched)?;
    let final_object = ObjectRecord {
        bucket: upload.bucket.clone(),
        key: upload.key.clone(),
        size: total_size,
        etag,
        content_type: upload.content_type.clone(),
        last_modified: crate::handlers::now_iso8601(),
        object_id: final_object_id,
    };

    match metadata
        .commit_completed_upload(&upload.upload_id, final_object.clone())
        .await?
    {
        CommitOutcome::Committed => {}
        CommitOutcome::Conflict => return Err(S3Error::OperationAborted),
    }

    // Parts are garbage once the commit lands; failures here leave
    // orphans in the cluster, nothing more.
    for part in &recorded {
        if let Err(err) = cluster.delete(pool, &part.object_id).await {
            tracing::warn!(
                upload_id = %upload.upload_id,
                part_number = part.part_number,
                error = %err,
                "failed to delete part object after completion"
            );
        }
    }

    Ok(final_object)
}

/// Abort an upload session and best-effort delete its part objects.
pub async fn abort_upload(
    metadata: &dyn MetadataStore,
    cluster: &dyn StorageBackend,
    upload: &UploadRecord,
    pool: &str,
) -> Result<(), S3Error> {
    let aborted = metadata
        .transition_upload(&upload.upload_id, UploadState::Open, UploadState::Aborted)
        .await?;
    if !aborted {
        match metadata.get_upload(&upload.upload_id).await? {
            // A completion attempt holds the session; the abort loses.
            Some(current) if current.state == UploadState::Completing => {
                return Err(S3Error::OperationAborted)
            }
            _ => {
                return Err(S3Error::NoSuchUpload {
                    upload_id: upload.upload_id.clone(),
                })
            }
        }
    }

    let parts = metadata.parts_snapshot(&upload.upload_id).await?;
    for part in &parts {
        if let Err(err) = cluster.delete(pool, &part.object_id).await {
            tracing::warn!(
                upload_id = %upload.upload_id,
                part_number = part.part_number,
                error = %err,
                "failed to delete part object during abort"
            );
        }
    }
    Ok(())
}
