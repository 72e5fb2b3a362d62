//! Axum router construction and S3 route mapping.
//!
//! S3 distinguishes operations by query parameters, not just
//! path+method.  `GET /{bucket}` could be ListObjects (`?list-type=2`
//! or bare), GetBucketAcl (`?acl`), or ListMultipartUploads
//! (`?uploads`).  We use a single handler per method+path that
//! dispatches internally based on query params.

use axum::{
    extract::{DefaultBodyLimit, Path, RawQuery, State},
    http::{HeaderMap, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, head, post, put},
    Extension, Router,
};
use sha2::Digest;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::auth::{self, Identity};
use crate::errors::{generate_request_id, S3Error};
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::AppState;

/// Build the axum [`Router`] with all S3-compatible routes.
///
/// The returned router is ready to be passed to `axum::serve`.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check endpoint (not part of S3 API).
        .route("/health", get(health_check))
        // Prometheus metrics endpoint.
        .route("/metrics", get(metrics_handler))
        // Service-level: GET / -> ListBuckets
        .route("/", get(handle_get_service))
        // Bucket-level routes
        .route("/:bucket", get(handle_get_bucket))
        .route("/:bucket", put(handle_put_bucket))
        .route("/:bucket", delete(handle_delete_bucket))
        .route("/:bucket", head(handle_head_bucket))
        // Object-level routes (wildcard key captures slashes)
        .route("/:bucket/*key", get(handle_get_object))
        .route("/:bucket/*key", put(handle_put_object))
        .route("/:bucket/*key", delete(handle_delete_object))
        .route("/:bucket/*key", head(handle_head_object))
        .route("/:bucket/*key", post(handle_post_object))
        // Application state shared across all handlers.
        .with_state(state.clone())
        // Layer ordering: inner layers run first, outer layers wrap them.
        // auth_middleware is innermost (closest to handlers, after routing).
        .layer(middleware::from_fn_with_state(state, auth_middleware))
        // common_headers_middleware adds standard S3 headers.
        .layer(middleware::from_fn(common_headers_middleware))
        // metrics_middleware is outer (captures full request lifecycle).
        .layer(middleware::from_fn(metrics_middleware))
        // Disable the default 2MB body size limit (S3 objects can be large).
        .layer(DefaultBodyLimit::disable())
}

// -- Common headers middleware -----------------------------------------------

/// Tower middleware that adds common S3 response headers to every response:
/// - `x-amz-request-id`: 16-character uppercase hex string
/// - `Date`: RFC 7231 formatted timestamp
/// - `Server`: `PoolGate`
async fn common_headers_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    // The error renderer may already have set a request id.
    if !headers.contains_key("x-amz-request-id") {
        if let Ok(value) = HeaderValue::from_str(&generate_request_id()) {
            headers.insert("x-amz-request-id", value);
        }
    }

    let date = httpdate::fmt_http_date(std::time::SystemTime::now());
    if let Ok(value) = HeaderValue::from_str(&date) {
        headers.insert("date", value);
    }
    headers.insert("server", HeaderValue::from_static("PoolGate"));

    response
}

// -- Auth middleware ---------------------------------------------------------

/// Paths that bypass authentication.
const AUTH_SKIP_PATHS: &[&str] = &["/health", "/metrics"];

/// SigV4 header authentication middleware.
///
/// Runs before handlers.  Parses the Authorization header, resolves
/// the access key, verifies the request signature, and stores the
/// authenticated [`Identity`] in the request extensions for handlers
/// to consume.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, S3Error> {
    let path = req.uri().path().to_string();
    if AUTH_SKIP_PATHS.contains(&path.as_str()) {
        return Ok(next.run(req).await);
    }

    let auth_header = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .ok_or_else(|| S3Error::AccessDenied {
            message: "No authentication information provided".to_string(),
        })?;

    let parsed = auth::parse_authorization_header(&auth_header).map_err(|msg| {
        debug!("Authorization header rejected: {msg}");
        S3Error::AccessDenied { message: msg }
    })?;

    let credential = state
        .credentials
        .lookup(&parsed.access_key_id)
        .ok_or_else(|| {
            debug!("Unknown access key: {}", parsed.access_key_id);
            S3Error::InvalidAccessKeyId
        })?;

    // Check clock skew using the x-amz-date header.
    let amz_date = req
        .headers()
        .get("x-amz-date")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    if !amz_date.is_empty()
        && !auth::check_clock_skew(&amz_date, state.config.auth.clock_skew_seconds)
    {
        warn!(
            access_key = %parsed.access_key_id,
            amz_date = %amz_date,
            "request time outside tolerated skew"
        );
        return Err(S3Error::RequestTimeTooSkewed);
    }

    // Credential scope date must match the request date.
    if amz_date.len() >= 8 && parsed.date_stamp != amz_date[..8] {
        return Err(S3Error::AccessDenied {
            message: "Credential date does not match x-amz-date".to_string(),
        });
    }

    let signed_headers = auth::extract_headers_for_signing(req.headers());
    let query_string = req.uri().query().unwrap_or("").to_string();

    // Payload hash comes from x-amz-content-sha256; clients that omit
    // it signed over SHA256(body), so compute that ourselves.
    let payload_hash = if req.headers().contains_key("x-amz-content-sha256") {
        req.headers()
            .get("x-amz-content-sha256")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("UNSIGNED-PAYLOAD")
            .to_string()
    } else {
        let (parts, body) = req.into_parts();
        let body_bytes = axum::body::to_bytes(body, usize::MAX)
            .await
            .unwrap_or_default();
        let hash = hex::encode(sha2::Sha256::digest(&body_bytes));
        req = Request::from_parts(parts, axum::body::Body::from(body_bytes));
        hash
    };

    // Derive signing key (cache first, then compute).
    let signing_key = if let Some(cached) =
        state
            .auth_cache
            .get_signing_key(&parsed.access_key_id, &parsed.date_stamp, &parsed.region)
    {
        cached
    } else {
        let derived = auth::derive_signing_key(
            &credential.secret_key,
            &parsed.date_stamp,
            &parsed.region,
            &parsed.service,
        );
        state.auth_cache.put_signing_key(
            &parsed.access_key_id,
            &parsed.date_stamp,
            &parsed.region,
            derived.clone(),
        );
        derived
    };

    let method = req.method().as_str().to_string();
    let uri = req.uri().path().to_string();
    let canonical_request = auth::build_canonical_request(
        &method,
        &uri,
        &query_string,
        &signed_headers,
        &parsed.signed_headers,
        &payload_hash,
    );

    let timestamp = auth::find_header_value(&signed_headers, "x-amz-date")
        .or_else(|| auth::find_header_value(&signed_headers, "date"))
        .unwrap_or_default();
    let string_to_sign =
        auth::build_string_to_sign(timestamp, &parsed.credential_scope, &canonical_request);

    let computed = auth::compute_signature(&signing_key, &string_to_sign);
    if !auth::constant_time_eq(&computed, &parsed.signature) {
        debug!("Signature mismatch for access key {}", parsed.access_key_id);
        return Err(S3Error::SignatureDoesNotMatch);
    }

    debug!("Auth OK for access key {}", parsed.access_key_id);
    req.extensions_mut().insert(Identity {
        access_key: credential.access_key.clone(),
        account_id: credential.account_id.clone(),
        display_name: credential.display_name.clone(),
    });

    Ok(next.run(req).await)
}

// -- Health check ------------------------------------------------------------

/// `GET /health` -- Returns `{"status": "ok"}` with 200 OK.
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "application/json")],
        r#"{"status":"ok"}"#,
    )
}

// -- Query parameter parsing helper ------------------------------------------

/// Parse raw query string into a HashMap.
fn parse_query(raw: Option<String>) -> HashMap<String, String> {
    let mut map = HashMap::new();
    if let Some(qs) = raw {
        for part in qs.split('&') {
            if let Some((k, v)) = part.split_once('=') {
                let decoded_k = percent_encoding::percent_decode_str(k)
                    .decode_utf8_lossy()
                    .into_owned();
                let decoded_v = percent_encoding::percent_decode_str(v)
                    .decode_utf8_lossy()
                    .into_owned();
                map.insert(decoded_k, decoded_v);
            } else if !part.is_empty() {
                // Query params without value (e.g., `?acl`, `?uploads`)
                let decoded = percent_encoding::percent_decode_str(part)
                    .decode_utf8_lossy()
                    .into_owned();
                map.insert(decoded, String::new());
            }
        }
    }
    map
}

// -- Service-level dispatch --------------------------------------------------

/// `GET /` -- ListBuckets
async fn handle_get_service(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Response, S3Error> {
    crate::handlers::bucket::list_buckets(state, &identity).await
}

// -- Bucket-level dispatch ---------------------------------------------------

/// `GET /:bucket` -- dispatches based on query params:
/// - `?acl` -> GetBucketAcl
/// - `?uploads` -> ListMultipartUploads
/// - default -> ListObjects (v2 parameters)
async fn handle_get_bucket(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(bucket): Path<String>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, S3Error> {
    let query = parse_query(raw_query);

    if query.contains_key("acl") {
        crate::handlers::bucket::get_bucket_acl(state, &identity, &bucket).await
    } else if query.contains_key("uploads") {
        crate::handlers::multipart::list_multipart_uploads(state, &identity, &bucket, &query).await
    } else {
        crate::handlers::object::list_objects_v2(state, &identity, &bucket, &query).await
    }
}

/// `PUT /:bucket` -- dispatches based on query params:
/// - `?acl` -> PutBucketAcl
/// - default -> CreateBucket
async fn handle_put_bucket(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(bucket): Path<String>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Response, S3Error> {
    let query = parse_query(raw_query);

    if query.contains_key("acl") {
        crate::handlers::bucket::put_bucket_acl(state, &identity, &bucket, &headers, &body).await
    } else {
        crate::handlers::bucket::create_bucket(state, &identity, &bucket, &headers).await
    }
}

/// `DELETE /:bucket` -- DeleteBucket
async fn handle_delete_bucket(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(bucket): Path<String>,
) -> Result<Response, S3Error> {
    crate::handlers::bucket::delete_bucket(state, &identity, &bucket).await
}

/// `HEAD /:bucket` -- HeadBucket
async fn handle_head_bucket(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(bucket): Path<String>,
) -> Result<Response, S3Error> {
    crate::handlers::bucket::head_bucket(state, &identity, &bucket).await
}

// -- Object-level dispatch ---------------------------------------------------

/// `GET /:bucket/*key` -- dispatches based on query params:
/// - `?uploadId=...` -> ListParts
/// - default -> GetObject
async fn handle_get_object(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path((bucket, key)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, S3Error> {
    let query = parse_query(raw_query);

    if query.contains_key("uploadId") {
        crate::handlers::multipart::list_parts(state, &identity, &bucket, &key, &query).await
    } else {
        crate::handlers::object::get_object(state, &identity, &bucket, &key, &headers).await
    }
}

/// `PUT /:bucket/*key` -- dispatches based on query params:
/// - `?partNumber=...&uploadId=...` -> UploadPart
/// - default -> PutObject
async fn handle_put_object(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path((bucket, key)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Response, S3Error> {
    let query = parse_query(raw_query);

    if query.contains_key("partNumber") && query.contains_key("uploadId") {
        crate::handlers::multipart::upload_part(
            state, &identity, &bucket, &key, &query, &headers, body,
        )
        .await
    } else if headers.contains_key("x-amz-copy-source") {
        Err(S3Error::NotImplemented)
    } else {
        crate::handlers::object::put_object(state, &identity, &bucket, &key, &headers, body).await
    }
}

/// `DELETE /:bucket/*key` -- dispatches based on query params:
/// - `?uploadId=...` -> AbortMultipartUpload
/// - default -> DeleteObject
async fn handle_delete_object(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path((bucket, key)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, S3Error> {
    let query = parse_query(raw_query);

    if query.contains_key("uploadId") {
        crate::handlers::multipart::abort_multipart_upload(state, &identity, &bucket, &key, &query)
            .await
    } else {
        crate::handlers::object::delete_object(state, &identity, &bucket, &key).await
    }
}

/// `HEAD /:bucket/*key` -- HeadObject
async fn handle_head_object(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, S3Error> {
    crate::handlers::object::head_object(state, &identity, &bucket, &key).await
}

/// `POST /:bucket/*key` -- dispatches based on query params:
/// - `?uploads` -> CreateMultipartUpload
/// - `?uploadId=...` -> CompleteMultipartUpload
/// - default -> NotImplemented
async fn handle_post_object(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path((bucket, key)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Response, S3Error> {
    let query = parse_query(raw_query);

    if query.contains_key("uploads") {
        crate::handlers::multipart::create_multipart_upload(
            state, &identity, &bucket, &key, &headers,
        )
        .await
    } else if query.contains_key("uploadId") {
        crate::handlers::multipart::complete_multipart_upload(
            state, &identity, &bucket, &key, &query, &body,
        )
        .await
    } else {
        Err(S3Error::NotImplemented)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_flags_and_pairs() {
        let query = parse_query(Some("uploads&max-uploads=10&prefix=a%2Fb".to_string()));
        assert_eq!(query.get("uploads"), Some(&String::new()));
        assert_eq!(query.get("max-uploads"), Some(&"10".to_string()));
        assert_eq!(query.get("prefix"), Some(&"a/b".to_string()));
    }

    #[test]
    fn test_parse_query_empty() {
        assert!(parse_query(None).is_empty());
        assert!(parse_query(Some(String::new())).is_empty());
    }
}
