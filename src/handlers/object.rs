//! Object-level S3 handlers: PutObject, GetObject, HeadObject,
//! DeleteObject and ListObjectsV2.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tracing::{info, warn};

use crate::acl::Permission;
use crate::auth::Identity;
use crate::cluster::backend::BackendError;
use crate::errors::S3Error;
use crate::mapper;
use crate::metadata::store::ObjectRecord;
use crate::xml::{self, ObjectEntry};
use crate::AppState;

use super::{
    authorize, check_content_length, extract_content_type, iso8601_to_http_date, now_iso8601,
    require_bucket,
};

/// Maximum object key length in bytes.
const MAX_KEY_LENGTH: usize = 1024;

// -- Range parsing ------------------------------------------------------------

/// Parsed byte range from a Range header.
#[derive(Debug, Clone, PartialEq)]
enum ByteRange {
    /// bytes=start-end (inclusive both ends)
    StartEnd(u64, u64),
    /// bytes=start-  (from start to end of object)
    StartOpen(u64),
    /// bytes=-N  (last N bytes)
    Suffix(u64),
}

/// Parse a Range header value like "bytes=0-4", "bytes=5-", "bytes=-3".
/// Returns None for anything else, including multi-range requests.
fn parse_range_header(range_str: &str) -> Option<ByteRange> {
    let spec = range_str.trim().strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }

    if let Some(suffix) = spec.strip_prefix('-') {
        let n: u64 = suffix.parse().ok()?;
        if n == 0 {
            return None;
        }
        Some(ByteRange::Suffix(n))
    } else if let Some(stripped) = spec.strip_suffix('-') {
        let start: u64 = stripped.parse().ok()?;
        Some(ByteRange::StartOpen(start))
    } else if let Some((start_s, end_s)) = spec.split_once('-') {
        let start: u64 = start_s.parse().ok()?;
        let end: u64 = end_s.parse().ok()?;
        if start > end {
            return None;
        }
        Some(ByteRange::StartEnd(start, end))
    } else {
        None
    }
}

/// Resolve a ByteRange against the object's total size.
/// Returns inclusive (start, end), or None if unsatisfiable.
fn resolve_range(range: &ByteRange, total: u64) -> Option<(u64, u64)> {
    if total == 0 {
        return None;
    }
    match range {
        ByteRange::StartEnd(start, end) => {
            if *start >= total {
                return None;
            }
            Some((*start, (*end).min(total - 1)))
        }
        ByteRange::StartOpen(start) => {
            if *start >= total {
                return None;
            }
            Some((*start, total - 1))
        }
        ByteRange::Suffix(n) => Some((total.saturating_sub(*n), total - 1)),
    }
}

// -- Handlers -----------------------------------------------------------------

/// `PUT /{bucket}/{key}` -- Store an object.
///
/// The payload is written to the bucket's pool first; the metadata
/// record only becomes visible once the cluster write succeeded, so a
/// listed object is always readable.
pub async fn put_object(
    state: Arc<AppState>,
    identity: &Identity,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, S3Error> {
    let record = require_bucket(&state, bucket).await?;
    authorize(&record, identity, Permission::Write)?;

    if key.len() > MAX_KEY_LENGTH {
        return Err(S3Error::KeyTooLongError);
    }
    check_content_length(headers, &body)?;
    if body.len() as u64 > state.config.server.max_object_size {
        return Err(S3Error::EntityTooLarge);
    }

    let content_type = extract_content_type(headers);
    let object_id = mapper::object_id(bucket, key);
    let outcome = state.cluster.put(&record.pool, &object_id, body).await?;
    let etag = format!("\"{}\"", outcome.md5_hex);

    state
        .metadata
        .put_object(ObjectRecord {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: outcome.size,
            etag: etag.clone(),
            content_type,
            last_modified: now_iso8601(),
            object_id,
        })
        .await
        .map_err(S3Error::InternalError)?;

    info!(bucket, key, size = outcome.size, "object stored");
    Ok((StatusCode::OK, [("etag", etag)]).into_response())
}

/// `GET /{bucket}/{key}` -- Fetch an object, optionally a byte range.
pub async fn get_object(
    state: Arc<AppState>,
    identity: &Identity,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
) -> Result<Response, S3Error> {
    let record = require_bucket(&state, bucket).await?;
    authorize(&record, identity, Permission::Read)?;

    let object = state
        .metadata
        .get_object(bucket, key)
        .await
        .map_err(S3Error::InternalError)?
        .ok_or_else(|| S3Error::NoSuchKey {
            key: key.to_string(),
        })?;

    // A syntactically invalid Range header is ignored; a well-formed
    // but unsatisfiable one is a 416.
    let range = match headers
        .get(http::header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_range_header)
    {
        Some(parsed) => Some(resolve_range(&parsed, object.size).ok_or(S3Error::InvalidRange)?),
        None => None,
    };

    let data = state
        .cluster
        .get(&record.pool, &object.object_id, range)
        .await?;

    let status = if range.is_some() {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };
    let mut builder = Response::builder()
        .status(status)
        .header("content-type", &object.content_type)
        .header("etag", &object.etag)
        .header("last-modified", iso8601_to_http_date(&object.last_modified))
        .header("accept-ranges", "bytes");
    if let Some((start, end)) = range {
        builder = builder.header(
            "content-range",
            format!("bytes {start}-{end}/{}", object.size),
        );
    }
    builder
        .body(axum::body::Body::from(data))
        .map_err(|e| S3Error::InternalError(e.into()))
}

/// `HEAD /{bucket}/{key}` -- Object metadata without the payload.
///
/// HEAD responses carry no body, so failures map to bare status codes.
pub async fn head_object(
    state: Arc<AppState>,
    identity: &Identity,
    bucket: &str,
    key: &str,
) -> Result<Response, S3Error> {
    let record = match state
        .metadata
        .get_bucket(bucket)
        .await
        .map_err(S3Error::InternalError)?
    {
        Some(record) => record,
        None => return Ok(StatusCode::NOT_FOUND.into_response()),
    };
    if authorize(&record, identity, Permission::Read).is_err() {
        return Ok(StatusCode::FORBIDDEN.into_response());
    }
    let object = match state
        .metadata
        .get_object(bucket, key)
        .await
        .map_err(S3Error::InternalError)?
    {
        Some(object) => object,
        None => return Ok(StatusCode::NOT_FOUND.into_response()),
    };

    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", &object.content_type)
        .header("content-length", object.size.to_string())
        .header("etag", &object.etag)
        .header("last-modified", iso8601_to_http_date(&object.last_modified))
        .header("accept-ranges", "bytes")
        .body(axum::body::Body::empty())
        .map_err(|e| S3Error::InternalError(e.into()))
}

/// `DELETE /{bucket}/{key}` -- Delete an object.
///
/// Deleting a missing key still succeeds with 204, matching S3.  The
/// metadata record is removed first; the cluster payload delete is
/// best-effort since a dangling payload is harmless while a dangling
/// record is not.
pub async fn delete_object(
    state: Arc<AppState>,
    identity: &Identity,
    bucket: &str,
    key: &str,
) -> Result<Response, S3Error> {
    let record = require_bucket(&state, bucket).await?;
    authorize(&record, identity, Permission::Write)?;

    let object = state
        .metadata
        .get_object(bucket, key)
        .await
        .map_err(S3Error::InternalError)?;

    if let Some(object) = object {
        state
            .metadata
            .delete_object(bucket, key)
            .await
            .map_err(S3Error::InternalError)?;
        match state.cluster.delete(&record.pool, &object.object_id).await {
            Ok(()) | Err(BackendError::NotFound) => {}
            Err(err) => {
                warn!(bucket, key, error = %err, "cluster payload delete failed");
            }
        }
        info!(bucket, key, "object deleted");
    }

    Ok(StatusCode::NO_CONTENT.into_response())
}

/// `GET /{bucket}?list-type=2` -- ListObjectsV2.
pub async fn list_objects_v2(
    state: Arc<AppState>,
    identity: &Identity,
    bucket: &str,
    query: &HashMap<String, String>,
) -> Result<Response, S3Error> {
    let record = require_bucket(&state, bucket).await?;
    authorize(&record, identity, Permission::Read)?;

    let prefix = query.get("prefix").map(String::as_str).unwrap_or("");
    let delimiter = query.get("delimiter").map(String::as_str).unwrap_or("");
    let continuation_token = query.get("continuation-token").map(String::as_str);
    let max_keys: u32 = match query.get("max-keys") {
        Some(raw) => raw.parse().map_err(|_| S3Error::InvalidArgument {
            message: format!("max-keys is not a valid integer: {raw}"),
        })?,
        None => 1000,
    };
    let max_keys = max_keys.min(1000);

    let result = if max_keys == 0 {
        crate::metadata::store::ListObjectsResult::default()
    } else {
        state
            .metadata
            .list_objects(bucket, prefix, delimiter, max_keys, continuation_token)
            .await
            .map_err(S3Error::InternalError)?
    };

    let entries: Vec<ObjectEntry<'_>> = result
        .objects
        .iter()
        .map(|o| ObjectEntry {
            key: &o.key,
            last_modified: &o.last_modified,
            etag: &o.etag,
            size: o.size,
        })
        .collect();
    let common_prefixes: Vec<&str> = result.common_prefixes.iter().map(String::as_str).collect();

    let body = xml::render_list_objects_result(
        bucket,
        prefix,
        delimiter,
        max_keys,
        result.is_truncated,
        &entries,
        &common_prefixes,
        continuation_token,
        result.next_continuation_token.as_deref(),
    );
    Ok((
        StatusCode::OK,
        [("content-type", "application/xml")],
        body,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- parse_range_header ---------------------------------------------------

    #[test]
    fn test_parse_range_start_end() {
        assert_eq!(
            parse_range_header("bytes=0-4"),
            Some(ByteRange::StartEnd(0, 4))
        );
        assert_eq!(
            parse_range_header("bytes=10-20"),
            Some(ByteRange::StartEnd(10, 20))
        );
    }

    #[test]
    fn test_parse_range_open_and_suffix() {
        assert_eq!(parse_range_header("bytes=5-"), Some(ByteRange::StartOpen(5)));
        assert_eq!(parse_range_header("bytes=-3"), Some(ByteRange::Suffix(3)));
    }

    #[test]
    fn test_parse_range_rejects_invalid() {
        assert_eq!(parse_range_header("bytes=4-2"), None);
        assert_eq!(parse_range_header("bytes=-0"), None);
        assert_eq!(parse_range_header("bytes=0-4,6-8"), None);
        assert_eq!(parse_range_header("items=0-4"), None);
        assert_eq!(parse_range_header("bytes=abc-def"), None);
    }

    // -- resolve_range --------------------------------------------------------

    #[test]
    fn test_resolve_range_clamps_end() {
        assert_eq!(resolve_range(&ByteRange::StartEnd(0, 100), 10), Some((0, 9)));
        assert_eq!(resolve_range(&ByteRange::StartEnd(2, 5), 10), Some((2, 5)));
    }

    #[test]
    fn test_resolve_range_unsatisfiable() {
        assert_eq!(resolve_range(&ByteRange::StartEnd(10, 20), 10), None);
        assert_eq!(resolve_range(&ByteRange::StartOpen(10), 10), None);
        assert_eq!(resolve_range(&ByteRange::StartEnd(0, 0), 0), None);
    }

    #[test]
    fn test_resolve_suffix_range() {
        assert_eq!(resolve_range(&ByteRange::Suffix(3), 10), Some((7, 9)));
        // Suffix longer than the object covers the whole object.
        assert_eq!(resolve_range(&ByteRange::Suffix(100), 10), Some((0, 9)));
    }
}
