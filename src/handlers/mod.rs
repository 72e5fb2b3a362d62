//! S3 request handlers, grouped by resource level.
//!
//! Shared helpers live here: timestamp formatting, bucket lookup, and
//! ACL authorization checks used by every handler module.

pub mod bucket;
pub mod multipart;
pub mod object;

use axum::http::HeaderMap;

use crate::acl::{Acl, Permission};
use crate::auth::Identity;
use crate::errors::S3Error;
use crate::metadata::store::BucketRecord;
use crate::AppState;

/// Current UTC time as an ISO-8601 string with millisecond precision,
/// e.g. `2026-08-26T12:34:56.789Z`.  This is the canonical timestamp
/// format for all metadata records and XML responses.
pub fn now_iso8601() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

/// Convert a stored ISO-8601 timestamp to an RFC 7231 HTTP date for
/// `Last-Modified` headers.  Falls back to the raw string if it does
/// not parse.
pub(crate) fn iso8601_to_http_date(iso: &str) -> String {
    match chrono::DateTime::parse_from_rfc3339(iso) {
        Ok(dt) => httpdate::fmt_http_date(dt.into()),
        Err(_) => iso.to_string(),
    }
}

/// Fetch a bucket record or fail with `NoSuchBucket`.
pub(crate) async fn require_bucket(
    state: &AppState,
    bucket: &str,
) -> Result<BucketRecord, S3Error> {
    state
        .metadata
        .get_bucket(bucket)
        .await
        .map_err(S3Error::InternalError)?
        .ok_or_else(|| S3Error::NoSuchBucket {
            bucket: bucket.to_string(),
        })
}

/// Check the requester's permission against a bucket's ACL.
pub(crate) fn authorize(
    record: &BucketRecord,
    identity: &Identity,
    needed: Permission,
) -> Result<(), S3Error> {
    let acl = Acl::from_json(&record.acl);
    if acl.allows(&identity.account_id, needed) {
        Ok(())
    } else {
        Err(S3Error::AccessDenied {
            message: format!(
                "Account does not have {} permission on bucket {}",
                needed.as_str(),
                record.name
            ),
        })
    }
}

/// Resolve the ACL for a new bucket or upload from the `x-amz-acl`
/// canned ACL header, defaulting to owner full control.
pub(crate) fn acl_from_headers(headers: &HeaderMap, identity: &Identity) -> Result<Acl, S3Error> {
    match headers.get("x-amz-acl").and_then(|v| v.to_str().ok()) {
        Some(canned) => Acl::from_canned(canned, &identity.account_id, &identity.display_name),
        None => Ok(Acl::full_control(
            &identity.account_id,
            &identity.display_name,
        )),
    }
}

/// Content-Type of an incoming request, defaulting to octet-stream.
pub(crate) fn extract_content_type(headers: &HeaderMap) -> String {
    headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string()
}

/// Reject requests whose declared Content-Length does not match the
/// bytes actually received.
pub(crate) fn check_content_length(headers: &HeaderMap, body: &[u8]) -> Result<(), S3Error> {
    if let Some(declared) = headers
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
    {
        if declared != body.len() as u64 {
            return Err(S3Error::IncompleteBody);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_iso8601_format() {
        let ts = now_iso8601();
        // 2026-08-26T12:34:56.789Z
        assert_eq!(ts.len(), 24);
        assert!(ts.ends_with('Z'));
        assert_eq!(&ts[4..5], "-");
        assert_eq!(&ts[10..11], "T");
    }

    #[test]
    fn test_iso8601_to_http_date() {
        let http = iso8601_to_http_date("2026-08-26T00:00:00.000Z");
        assert_eq!(http, "Wed, 26 Aug 2026 00:00:00 GMT");
        // Unparseable input passes through.
        assert_eq!(iso8601_to_http_date("not-a-date"), "not-a-date");
    }

    #[test]
    fn test_check_content_length() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_LENGTH, "5".parse().unwrap());
        assert!(check_content_length(&headers, b"hello").is_ok());
        assert!(matches!(
            check_content_length(&headers, b"hell"),
            Err(S3Error::IncompleteBody)
        ));
        // Absent header is not checked.
        assert!(check_content_length(&HeaderMap::new(), b"x").is_ok());
    }
}
