//! Multipart upload handlers: CreateMultipartUpload, UploadPart,
//! CompleteMultipartUpload, AbortMultipartUpload, ListParts and
//! ListMultipartUploads.
//!
//! The handlers own request parsing and authorization; the completion
//! and abort state machines live in [`crate::multipart`].

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tracing::info;

use crate::acl::Permission;
use crate::auth::Identity;
use crate::errors::S3Error;
use crate::mapper;
use crate::metadata::store::{PartRecord, UploadRecord, UploadState};
use crate::multipart::RequestedPart;
use crate::xml::{self, PartEntry, UploadEntry};
use crate::AppState;

use super::{
    acl_from_headers, authorize, check_content_length, extract_content_type, now_iso8601,
    require_bucket,
};

/// Part numbers accepted by UploadPart.
const MIN_PART_NUMBER: u32 = 1;
const MAX_PART_NUMBER: u32 = 10_000;

/// Fetch an upload session and verify it belongs to (bucket, key).
async fn require_upload(
    state: &AppState,
    bucket: &str,
    key: &str,
    upload_id: &str,
) -> Result<UploadRecord, S3Error> {
    let not_found = || S3Error::NoSuchUpload {
        upload_id: upload_id.to_string(),
    };
    let upload = state
        .metadata
        .get_upload(upload_id)
        .await
        .map_err(S3Error::InternalError)?
        .ok_or_else(not_found)?;
    if upload.bucket != bucket || upload.key != key {
        return Err(not_found());
    }
    Ok(upload)
}

/// `POST /{bucket}/{key}?uploads` -- Start a multipart upload session.
pub async fn create_multipart_upload(
    state: Arc<AppState>,
    identity: &Identity,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
) -> Result<Response, S3Error> {
    let record = require_bucket(&state, bucket).await?;
    authorize(&record, identity, Permission::Write)?;
    if key.len() > 1024 {
        return Err(S3Error::KeyTooLongError);
    }

    let acl = acl_from_headers(headers, identity)?;
    let upload_id = uuid::Uuid::new_v4().simple().to_string();

    state
        .metadata
        .create_upload(UploadRecord {
            upload_id: upload_id.clone(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            content_type: extract_content_type(headers),
            acl: acl.to_json(),
            owner_id: identity.account_id.clone(),
            owner_display: identity.display_name.clone(),
            initiated_at: now_iso8601(),
            state: UploadState::Open,
        })
        .await
        .map_err(S3Error::InternalError)?;

    info!(bucket, key, upload_id = %upload_id, "multipart upload initiated");
    let body = xml::render_initiate_multipart_upload_result(bucket, key, &upload_id);
    Ok((
        StatusCode::OK,
        [("content-type", "application/xml")],
        body,
    )
        .into_response())
}

/// `PUT /{bucket}/{key}?partNumber=N&uploadId=ID` -- Upload one part.
///
/// Re-uploading a part number replaces the earlier payload; the session
/// only accepts parts while it is open.
pub async fn upload_part(
    state: Arc<AppState>,
    identity: &Identity,
    bucket: &str,
    key: &str,
    query: &HashMap<String, String>,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, S3Error> {
    let record = require_bucket(&state, bucket).await?;
    authorize(&record, identity, Permission::Write)?;

    let upload_id = query.get("uploadId").map(String::as_str).unwrap_or("");
    let part_number: u32 = query
        .get("partNumber")
        .and_then(|v| v.parse().ok())
        .filter(|n| (MIN_PART_NUMBER..=MAX_PART_NUMBER).contains(n))
        .ok_or_else(|| S3Error::InvalidArgument {
            message: format!(
                "partNumber must be an integer between {MIN_PART_NUMBER} and {MAX_PART_NUMBER}"
            ),
        })?;

    let upload = require_upload(&state, bucket, key, upload_id).await?;
    match upload.state {
        UploadState::Open => {}
        // A completion attempt has claimed the session.
        UploadState::Completing => return Err(S3Error::OperationAborted),
        UploadState::Completed | UploadState::Aborted => {
            return Err(S3Error::NoSuchUpload {
                upload_id: upload_id.to_string(),
            })
        }
    }

    check_content_length(headers, &body)?;
    if body.len() as u64 > state.config.server.max_object_size {
        return Err(S3Error::EntityTooLarge);
    }

    let object_id = mapper::part_object_id(upload_id, part_number);
    let outcome = state.cluster.put(&record.pool, &object_id, body).await?;
    let etag = format!("\"{}\"", outcome.md5_hex);

    state
        .metadata
        .put_part(
            upload_id,
            PartRecord {
                part_number,
                size: outcome.size,
                etag: etag.clone(),
                object_id,
                last_modified: now_iso8601(),
            },
        )
        .await
        .map_err(S3Error::InternalError)?;

    info!(
        upload_id,
        part_number,
        size = outcome.size,
        "part stored"
    );
    Ok((StatusCode::OK, [("etag", etag)]).into_response())
}

/// Parse a `<CompleteMultipartUpload>` request body.
fn parse_complete_multipart_upload_xml(body: &[u8]) -> Result<Vec<RequestedPart>, S3Error> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_reader(body);
    reader.trim_text(true);

    let mut parts: Vec<RequestedPart> = Vec::new();
    let mut current_part_number: Option<u32> = None;
    let mut current_etag: Option<String> = None;
    let mut in_part = false;
    let mut current_tag = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let tag_name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag_name == "Part" {
                    in_part = true;
                    current_part_number = None;
                    current_etag = None;
                } else if in_part {
                    current_tag = tag_name;
                }
            }
            Ok(Event::Text(ref e)) => {
                if in_part {
                    let text = e.unescape().map_err(|_| S3Error::MalformedXML)?.to_string();
                    match current_tag.as_str() {
                        "PartNumber" => current_part_number = text.parse().ok(),
                        "ETag" => current_etag = Some(text),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                if e.name().as_ref() == b"Part" {
                    in_part = false;
                    match (current_part_number, current_etag.take()) {
                        (Some(part_number), Some(etag)) => {
                            parts.push(RequestedPart { part_number, etag });
                        }
                        _ => return Err(S3Error::MalformedXML),
                    }
                    current_tag.clear();
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => return Err(S3Error::MalformedXML),
            _ => {}
        }
        buf.clear();
    }

    if parts.is_empty() {
        return Err(S3Error::MalformedXML);
    }
    Ok(parts)
}

/// `POST /{bucket}/{key}?uploadId=ID` -- Complete a multipart upload.
pub async fn complete_multipart_upload(
    state: Arc<AppState>,
    identity: &Identity,
    bucket: &str,
    key: &str,
    query: &HashMap<String, String>,
    body: &[u8],
) -> Result<Response, S3Error> {
    let record = require_bucket(&state, bucket).await?;
    authorize(&record, identity, Permission::Write)?;

    let upload_id = query.get("uploadId").map(String::as_str).unwrap_or("");
    let upload = require_upload(&state, bucket, key, upload_id).await?;
    let requested = parse_complete_multipart_upload_xml(body)?;

    let final_object = crate::multipart::complete_upload(
        state.metadata.as_ref(),
        state.cluster.as_ref(),
        &upload,
        &record.pool,
        &requested,
        state.config.server.min_part_size,
    )
    .await?;

    info!(
        bucket,
        key,
        upload_id,
        size = final_object.size,
        "multipart upload completed"
    );
    let location = format!("/{bucket}/{key}");
    let response_body =
        xml::render_complete_multipart_upload_result(&location, bucket, key, &final_object.etag);
    Ok((
        StatusCode::OK,
        [("content-type", "application/xml")],
        response_body,
    )
        .into_response())
}

/// `DELETE /{bucket}/{key}?uploadId=ID` -- Abort a multipart upload.
pub async fn abort_multipart_upload(
    state: Arc<AppState>,
    identity: &Identity,
    bucket: &str,
    key: &str,
    query: &HashMap<String, String>,
) -> Result<Response, S3Error> {
    let record = require_bucket(&state, bucket).await?;
    authorize(&record, identity, Permission::Write)?;

    let upload_id = query.get("uploadId").map(String::as_str).unwrap_or("");
    let upload = require_upload(&state, bucket, key, upload_id).await?;

    crate::multipart::abort_upload(
        state.metadata.as_ref(),
        state.cluster.as_ref(),
        &upload,
        &record.pool,
    )
    .await?;

    info!(bucket, key, upload_id, "multipart upload aborted");
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// `GET /{bucket}/{key}?uploadId=ID` -- List recorded parts.
pub async fn list_parts(
    state: Arc<AppState>,
    identity: &Identity,
    bucket: &str,
    key: &str,
    query: &HashMap<String, String>,
) -> Result<Response, S3Error> {
    let record = require_bucket(&state, bucket).await?;
    authorize(&record, identity, Permission::Read)?;

    let upload_id = query.get("uploadId").map(String::as_str).unwrap_or("");
    let upload = require_upload(&state, bucket, key, upload_id).await?;
    if upload.state.is_terminal() {
        return Err(S3Error::NoSuchUpload {
            upload_id: upload_id.to_string(),
        });
    }

    let max_parts: u32 = match query.get("max-parts") {
        Some(raw) => raw.parse().map_err(|_| S3Error::InvalidArgument {
            message: format!("max-parts is not a valid integer: {raw}"),
        })?,
        None => 1000,
    };
    let max_parts = max_parts.min(1000);
    let part_number_marker: u32 = match query.get("part-number-marker") {
        Some(raw) => raw.parse().map_err(|_| S3Error::InvalidArgument {
            message: format!("part-number-marker is not a valid integer: {raw}"),
        })?,
        None => 0,
    };

    let result = state
        .metadata
        .list_parts(upload_id, max_parts, part_number_marker)
        .await
        .map_err(S3Error::InternalError)?;

    let entries: Vec<PartEntry<'_>> = result
        .parts
        .iter()
        .map(|p| PartEntry {
            part_number: p.part_number,
            last_modified: &p.last_modified,
            etag: &p.etag,
            size: p.size,
        })
        .collect();

    let body = xml::render_list_parts_result(
        bucket,
        key,
        upload_id,
        part_number_marker,
        max_parts,
        result.is_truncated,
        &entries,
        result.next_part_number_marker,
        &upload.owner_id,
        &upload.owner_display,
    );
    Ok((
        StatusCode::OK,
        [("content-type", "application/xml")],
        body,
    )
        .into_response())
}

/// `GET /{bucket}?uploads` -- List open multipart uploads.
pub async fn list_multipart_uploads(
    state: Arc<AppState>,
    identity: &Identity,
    bucket: &str,
    query: &HashMap<String, String>,
) -> Result<Response, S3Error> {
    let record = require_bucket(&state, bucket).await?;
    authorize(&record, identity, Permission::Read)?;

    let prefix = query.get("prefix").map(String::as_str).unwrap_or("");
    let key_marker = query.get("key-marker").map(String::as_str).unwrap_or("");
    let upload_id_marker = query
        .get("upload-id-marker")
        .map(String::as_str)
        .unwrap_or("");
    let max_uploads: u32 = match query.get("max-uploads") {
        Some(raw) => raw.parse().map_err(|_| S3Error::InvalidArgument {
            message: format!("max-uploads is not a valid integer: {raw}"),
        })?,
        None => 1000,
    };
    let max_uploads = max_uploads.min(1000);

    let result = state
        .metadata
        .list_uploads(bucket, prefix, max_uploads, key_marker, upload_id_marker)
        .await
        .map_err(S3Error::InternalError)?;

    let entries: Vec<UploadEntry<'_>> = result
        .uploads
        .iter()
        .map(|u| UploadEntry {
            key: &u.key,
            upload_id: &u.upload_id,
            initiated: &u.initiated_at,
            owner_id: &u.owner_id,
            owner_display: &u.owner_display,
        })
        .collect();

    let body = xml::render_list_multipart_uploads_result(
        bucket,
        prefix,
        key_marker,
        upload_id_marker,
        max_uploads,
        result.is_truncated,
        &entries,
        result.next_key_marker.as_deref(),
        result.next_upload_id_marker.as_deref(),
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

    #[test]
    fn test_parse_complete_xml_valid() {
        let body = br#"<CompleteMultipartUpload>
            <Part><PartNumber>1</PartNumber><ETag>"abc"</ETag></Part>
            <Part><PartNumber>2</PartNumber><ETag>"def"</ETag></Part>
        </CompleteMultipartUpload>"#;
        let parts = parse_complete_multipart_upload_xml(body).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].part_number, 1);
        assert_eq!(parts[0].etag, "\"abc\"");
        assert_eq!(parts[1].part_number, 2);
    }

    #[test]
    fn test_parse_complete_xml_unquoted_etag() {
        let body = br#"<CompleteMultipartUpload>
            <Part><PartNumber>1</PartNumber><ETag>abc123</ETag></Part>
        </CompleteMultipartUpload>"#;
        let parts = parse_complete_multipart_upload_xml(body).unwrap();
        assert_eq!(parts[0].etag, "abc123");
    }

    #[test]
    fn test_parse_complete_xml_empty_body() {
        assert!(matches!(
            parse_complete_multipart_upload_xml(b""),
            Err(S3Error::MalformedXML)
        ));
    }

    #[test]
    fn test_parse_complete_xml_missing_etag() {
        let body = br#"<CompleteMultipartUpload>
            <Part><PartNumber>1</PartNumber></Part>
        </CompleteMultipartUpload>"#;
        assert!(matches!(
            parse_complete_multipart_upload_xml(body),
            Err(S3Error::MalformedXML)
        ));
    }

    #[test]
    fn test_parse_complete_xml_missing_part_number() {
        let body = br#"<CompleteMultipartUpload>
            <Part><ETag>"abc"</ETag></Part>
        </CompleteMultipartUpload>"#;
        assert!(matches!(
            parse_complete_multipart_upload_xml(body),
            Err(S3Error::MalformedXML)
        ));
    }

    #[test]
    fn test_parse_complete_xml_truncated_document() {
        let body = br#"<CompleteMultipartUpload><Part><PartNumber>1"#;
        assert!(parse_complete_multipart_upload_xml(body).is_err());
    }
}
