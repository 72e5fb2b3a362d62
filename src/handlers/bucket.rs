//! Bucket-level S3 handlers: ListBuckets, CreateBucket, DeleteBucket,
//! HeadBucket, GetBucketAcl, PutBucketAcl.

use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::info;

use crate::acl::{Acl, AclGrant, AclGrantee, AclOwner, Permission};
use crate::auth::Identity;
use crate::errors::S3Error;
use crate::mapper;
use crate::metadata::store::{BucketRecord, DeleteBucketOutcome};
use crate::xml;
use crate::AppState;

use super::{acl_from_headers, authorize, now_iso8601, require_bucket};

// -- Bucket name validation ---------------------------------------------------

/// Validate a bucket name against the S3 naming rules:
/// 3-63 characters, lowercase letters, digits, hyphens and periods,
/// must begin and end with a letter or digit, must not look like an
/// IP address, and must not use reserved prefixes or suffixes.
pub fn validate_bucket_name(name: &str) -> Result<(), S3Error> {
    let invalid = || S3Error::InvalidBucketName {
        name: name.to_string(),
    };

    if name.len() < 3 || name.len() > 63 {
        return Err(invalid());
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return Err(invalid());
    }
    let first = name.chars().next().unwrap_or(' ');
    let last = name.chars().last().unwrap_or(' ');
    if !first.is_ascii_alphanumeric() || !last.is_ascii_alphanumeric() {
        return Err(invalid());
    }
    // No adjacent periods, no period-hyphen sequences.
    if name.contains("..") || name.contains(".-") || name.contains("-.") {
        return Err(invalid());
    }
    // Must not be formatted like an IPv4 address.
    let labels: Vec<&str> = name.split('.').collect();
    if labels.len() == 4 && labels.iter().all(|l| l.parse::<u8>().is_ok()) {
        return Err(invalid());
    }
    // Reserved prefixes and suffixes.
    if name.starts_with("xn--") {
        return Err(invalid());
    }
    if name.ends_with("-s3alias") || name.ends_with("--ol-s3") {
        return Err(invalid());
    }
    Ok(())
}

// -- Handlers -----------------------------------------------------------------

/// `GET /` -- List all buckets owned by the requester.
pub async fn list_buckets(state: Arc<AppState>, identity: &Identity) -> Result<Response, S3Error> {
    let buckets = state
        .metadata
        .list_buckets()
        .await
        .map_err(S3Error::InternalError)?;

    let owned: Vec<(&str, &str)> = buckets
        .iter()
        .filter(|b| b.owner_id == identity.account_id)
        .map(|b| (b.name.as_str(), b.created_at.as_str()))
        .collect();

    let body = xml::render_list_buckets_result(&identity.account_id, &identity.display_name, &owned);
    Ok((
        StatusCode::OK,
        [("content-type", "application/xml")],
        body,
    )
        .into_response())
}

/// `PUT /{bucket}` -- Create a bucket.
///
/// The bucket is pinned to a cluster pool chosen at creation time; all
/// of its objects will live in that pool.
pub async fn create_bucket(
    state: Arc<AppState>,
    identity: &Identity,
    bucket: &str,
    headers: &HeaderMap,
) -> Result<Response, S3Error> {
    validate_bucket_name(bucket)?;

    if let Some(existing) = state
        .metadata
        .get_bucket(bucket)
        .await
        .map_err(S3Error::InternalError)?
    {
        if existing.owner_id == identity.account_id {
            return Err(S3Error::BucketAlreadyOwnedByYou {
                bucket: bucket.to_string(),
            });
        }
        return Err(S3Error::BucketAlreadyExists {
            bucket: bucket.to_string(),
        });
    }

    let acl = acl_from_headers(headers, identity)?;
    let pool = mapper::choose_pool(&state.config.cluster.pools).ok_or_else(|| {
        S3Error::InternalError(anyhow::anyhow!("no cluster pools configured"))
    })?;

    let record = BucketRecord {
        name: bucket.to_string(),
        created_at: now_iso8601(),
        owner_id: identity.account_id.clone(),
        owner_display: identity.display_name.clone(),
        acl: acl.to_json(),
        pool: pool.clone(),
    };

    // A concurrent create can still win between the check above and
    // this insert; the store's uniqueness constraint decides.
    state
        .metadata
        .create_bucket(record)
        .await
        .map_err(|_| S3Error::BucketAlreadyExists {
            bucket: bucket.to_string(),
        })?;

    info!(bucket, pool = %pool, "bucket created");
    Ok((
        StatusCode::OK,
        [("location", format!("/{bucket}"))],
        String::new(),
    )
        .into_response())
}

/// `DELETE /{bucket}` -- Delete an empty bucket.
///
/// Deletion is reserved for the owning account; a WRITE grant on the
/// bucket ACL does not extend to deleting the bucket itself.
pub async fn delete_bucket(
    state: Arc<AppState>,
    identity: &Identity,
    bucket: &str,
) -> Result<Response, S3Error> {
    let record = require_bucket(&state, bucket).await?;
    if record.owner_id != identity.account_id {
        return Err(S3Error::AccessDenied {
            message: format!("Only the bucket owner can delete bucket {bucket}"),
        });
    }

    match state
        .metadata
        .delete_bucket_if_empty(bucket)
        .await
        .map_err(S3Error::InternalError)?
    {
        DeleteBucketOutcome::Deleted => {
            info!(bucket, "bucket deleted");
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        DeleteBucketOutcome::NotEmpty => Err(S3Error::BucketNotEmpty {
            bucket: bucket.to_string(),
        }),
        DeleteBucketOutcome::NotFound => Err(S3Error::NoSuchBucket {
            bucket: bucket.to_string(),
        }),
    }
}

/// `HEAD /{bucket}` -- Existence and access check.
///
/// HEAD responses carry no body, so failures map to bare status codes
/// instead of XML error documents.
pub async fn head_bucket(
    state: Arc<AppState>,
    identity: &Identity,
    bucket: &str,
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
    Ok(StatusCode::OK.into_response())
}

/// `GET /{bucket}?acl` -- Fetch the bucket's access control policy.
pub async fn get_bucket_acl(
    state: Arc<AppState>,
    identity: &Identity,
    bucket: &str,
) -> Result<Response, S3Error> {
    let record = require_bucket(&state, bucket).await?;
    authorize(&record, identity, Permission::ReadAcp)?;

    let acl = Acl::from_json(&record.acl);
    let body = xml::render_access_control_policy(&acl);
    Ok((
        StatusCode::OK,
        [("content-type", "application/xml")],
        body,
    )
        .into_response())
}

/// `PUT /{bucket}?acl` -- Replace the bucket's access control policy.
///
/// Accepts either a canned ACL via the `x-amz-acl` header or a full
/// `<AccessControlPolicy>` XML body.  The header wins when both are
/// present.
pub async fn put_bucket_acl(
    state: Arc<AppState>,
    identity: &Identity,
    bucket: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, S3Error> {
    let record = require_bucket(&state, bucket).await?;
    authorize(&record, identity, Permission::WriteAcp)?;

    let acl = if let Some(canned) = headers.get("x-amz-acl").and_then(|v| v.to_str().ok()) {
        Acl::from_canned(canned, &record.owner_id, &record.owner_display)?
    } else if !body.is_empty() {
        parse_access_control_policy(body)?
    } else {
        return Err(S3Error::InvalidArgument {
            message: "PutBucketAcl requires an x-amz-acl header or an XML body".to_string(),
        });
    };

    state
        .metadata
        .update_bucket_acl(bucket, &acl.to_json())
        .await
        .map_err(S3Error::InternalError)?;

    info!(bucket, "bucket acl updated");
    Ok(StatusCode::OK.into_response())
}

// -- AccessControlPolicy XML parsing ------------------------------------------

/// Parse an `<AccessControlPolicy>` request body into an [`Acl`].
fn parse_access_control_policy(body: &[u8]) -> Result<Acl, S3Error> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_reader(body);
    reader.trim_text(true);

    let mut owner = AclOwner::default();
    let mut grants: Vec<AclGrant> = Vec::new();

    let mut in_owner = false;
    let mut in_grant = false;
    let mut grantee_type = String::new();
    let mut grantee_id = String::new();
    let mut grantee_display = String::new();
    let mut grantee_uri = String::new();
    let mut permission = String::new();
    let mut current_tag = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let tag_name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match tag_name.as_str() {
                    "Owner" => in_owner = true,
                    "Grant" => {
                        in_grant = true;
                        grantee_type.clear();
                        grantee_id.clear();
                        grantee_display.clear();
                        grantee_uri.clear();
                        permission.clear();
                    }
                    "Grantee" => {
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref().ends_with(b"type") {
                                grantee_type =
                                    String::from_utf8_lossy(&attr.value).to_string();
                            }
                        }
                    }
                    _ => current_tag = tag_name,
                }
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().map_err(|_| S3Error::MalformedXML)?.to_string();
                match current_tag.as_str() {
                    "ID" if in_owner && !in_grant => owner.id = text,
                    "DisplayName" if in_owner && !in_grant => owner.display_name = text,
                    "ID" if in_grant => grantee_id = text,
                    "DisplayName" if in_grant => grantee_display = text,
                    "URI" if in_grant => grantee_uri = text,
                    "Permission" if in_grant => permission = text,
                    _ => {}
                }
            }
            Ok(Event::End(ref e)) => {
                let tag_name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match tag_name.as_str() {
                    "Owner" => in_owner = false,
                    "Grant" => {
                        in_grant = false;
                        let permission =
                            Permission::parse(&permission).ok_or(S3Error::MalformedXML)?;
                        let grantee = if grantee_type == "Group" || !grantee_uri.is_empty() {
                            AclGrantee::Group {
                                uri: grantee_uri.clone(),
                            }
                        } else if !grantee_id.is_empty() {
                            AclGrantee::CanonicalUser {
                                id: grantee_id.clone(),
                                display_name: grantee_display.clone(),
                            }
                        } else {
                            return Err(S3Error::MalformedXML);
                        };
                        grants.push(AclGrant {
                            grantee,
                            permission,
                        });
                    }
                    _ => {}
                }
                current_tag.clear();
            }
            Ok(Event::Eof) => break,
            Err(_) => return Err(S3Error::MalformedXML),
            _ => {}
        }
        buf.clear();
    }

    if owner.id.is_empty() {
        return Err(S3Error::MalformedXML);
    }
    Ok(Acl { owner, grants })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::ALL_USERS_URI;

    // -- validate_bucket_name -------------------------------------------------

    #[test]
    fn test_valid_bucket_names() {
        for name in ["abc", "my-bucket", "my.bucket.2", "a1b2c3", "x".repeat(63).as_str()] {
            assert!(validate_bucket_name(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn test_invalid_bucket_names() {
        for name in [
            "ab",
            "x".repeat(64).as_str(),
            "MyBucket",
            "-leading",
            "trailing-",
            "double..dot",
            "dot.-dash",
            "192.168.0.1",
            "xn--punycode",
            "name-s3alias",
            "name--ol-s3",
            "under_score",
        ] {
            assert!(
                matches!(
                    validate_bucket_name(name),
                    Err(S3Error::InvalidBucketName { .. })
                ),
                "{name} should be invalid"
            );
        }
    }

    // -- parse_access_control_policy ------------------------------------------

    #[test]
    fn test_parse_access_control_policy() {
        let body = br#"<AccessControlPolicy>
            <Owner><ID>alice</ID><DisplayName>Alice</DisplayName></Owner>
            <AccessControlList>
                <Grant>
                    <Grantee xsi:type="CanonicalUser"><ID>alice</ID><DisplayName>Alice</DisplayName></Grantee>
                    <Permission>FULL_CONTROL</Permission>
                </Grant>
                <Grant>
                    <Grantee xsi:type="Group"><URI>http://acs.amazonaws.com/groups/global/AllUsers</URI></Grantee>
                    <Permission>READ</Permission>
                </Grant>
            </AccessControlList>
        </AccessControlPolicy>"#;

        let acl = parse_access_control_policy(body).unwrap();
        assert_eq!(acl.owner.id, "alice");
        assert_eq!(acl.grants.len(), 2);
        assert!(matches!(
            &acl.grants[0].grantee,
            AclGrantee::CanonicalUser { id, .. } if id == "alice"
        ));
        assert_eq!(acl.grants[0].permission, Permission::FullControl);
        assert!(matches!(
            &acl.grants[1].grantee,
            AclGrantee::Group { uri } if uri == ALL_USERS_URI
        ));
        assert_eq!(acl.grants[1].permission, Permission::Read);
    }

    #[test]
    fn test_parse_access_control_policy_rejects_missing_owner() {
        let body = br#"<AccessControlPolicy>
            <AccessControlList>
                <Grant>
                    <Grantee xsi:type="CanonicalUser"><ID>a</ID></Grantee>
                    <Permission>READ</Permission>
                </Grant>
            </AccessControlList>
        </AccessControlPolicy>"#;
        assert!(matches!(
            parse_access_control_policy(body),
            Err(S3Error::MalformedXML)
        ));
    }

    #[test]
    fn test_parse_access_control_policy_rejects_bad_permission() {
        let body = br#"<AccessControlPolicy>
            <Owner><ID>a</ID></Owner>
            <AccessControlList>
                <Grant>
                    <Grantee xsi:type="CanonicalUser"><ID>a</ID></Grantee>
                    <Permission>SUPERUSER</Permission>
                </Grant>
            </AccessControlList>
        </AccessControlPolicy>"#;
        assert!(matches!(
            parse_access_control_policy(body),
            Err(S3Error::MalformedXML)
        ));
    }
}
