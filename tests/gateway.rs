//! End-to-end gateway tests.
//!
//! Each test builds the full router with in-memory metadata and cluster
//! backends, signs real SigV4 requests, and drives them through the
//! axum service with `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use bytes::Bytes;
use md5::{Digest, Md5};
use tower::util::ServiceExt;

use poolgate::auth::{
    build_canonical_request, build_string_to_sign, compute_signature, derive_signing_key,
    AuthCache,
};
use poolgate::cluster::memory::MemoryClusterBackend;
use poolgate::config::{Config, CredentialConfig};
use poolgate::credentials::StaticCredentialStore;
use poolgate::metadata::memory::MemoryMetadataStore;
use poolgate::server::app;
use poolgate::AppState;

const ALICE_KEY: &str = "AKIDALICE";
const ALICE_SECRET: &str = "alice-secret";
const BOB_KEY: &str = "AKIDBOB";
const BOB_SECRET: &str = "bob-secret";
const REGION: &str = "us-east-1";

fn test_config(min_part_size: u64) -> Config {
    let mut config: Config = serde_yaml::from_str("{}").expect("default config");
    config.metadata.engine = "memory".to_string();
    config.cluster.backend = "memory".to_string();
    config.server.min_part_size = min_part_size;
    config.auth.credentials = vec![
        CredentialConfig {
            access_key: ALICE_KEY.to_string(),
            secret_key: ALICE_SECRET.to_string(),
            account_id: Some("alice".to_string()),
            display_name: Some("Alice".to_string()),
        },
        CredentialConfig {
            access_key: BOB_KEY.to_string(),
            secret_key: BOB_SECRET.to_string(),
            account_id: Some("bob".to_string()),
            display_name: Some("Bob".to_string()),
        },
    ];
    config
}

fn test_router(min_part_size: u64) -> axum::Router {
    let config = test_config(min_part_size);
    let credentials = Arc::new(StaticCredentialStore::from_config(&config.auth.credentials));
    let state = Arc::new(AppState {
        config,
        credentials,
        metadata: Arc::new(MemoryMetadataStore::new()),
        cluster: Arc::new(MemoryClusterBackend::new()),
        auth_cache: AuthCache::new(),
    });
    app(state)
}

/// Build a SigV4-signed request the way a real S3 client would.
fn signed_request(
    method: &str,
    uri: &str,
    body: &[u8],
    access_key: &str,
    secret_key: &str,
    extra_headers: &[(&str, &str)],
) -> Request<Body> {
    let (path, query) = match uri.split_once('?') {
        Some((p, q)) => (p, q),
        None => (uri, ""),
    };

    let amz_date = chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = amz_date[..8].to_string();
    let payload_hash = hex::encode(sha2::Sha256::digest(body));

    let signing_headers = vec![
        ("host".to_string(), "localhost".to_string()),
        ("x-amz-content-sha256".to_string(), payload_hash.clone()),
        ("x-amz-date".to_string(), amz_date.clone()),
    ];
    let signed_headers_str = "host;x-amz-content-sha256;x-amz-date";

    let canonical = build_canonical_request(
        method,
        path,
        query,
        &signing_headers,
        signed_headers_str,
        &payload_hash,
    );
    let scope = format!("{date_stamp}/{REGION}/s3/aws4_request");
    let string_to_sign = build_string_to_sign(&amz_date, &scope, &canonical);
    let signing_key = derive_signing_key(secret_key, &date_stamp, REGION, "s3");
    let signature = compute_signature(&signing_key, &string_to_sign);

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={access_key}/{scope}, \
         SignedHeaders={signed_headers_str}, Signature={signature}"
    );

    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("host", "localhost")
        .header("x-amz-content-sha256", &payload_hash)
        .header("x-amz-date", &amz_date)
        .header("authorization", authorization);
    for (name, value) in extra_headers {
        builder = builder.header(*name, *value);
    }
    builder
        .body(Body::from(Bytes::copy_from_slice(body)))
        .expect("request build")
}

async fn send(
    router: &axum::Router,
    method: &str,
    uri: &str,
    body: &[u8],
    access_key: &str,
    secret_key: &str,
    extra_headers: &[(&str, &str)],
) -> Response<Body> {
    router
        .clone()
        .oneshot(signed_request(
            method,
            uri,
            body,
            access_key,
            secret_key,
            extra_headers,
        ))
        .await
        .expect("infallible service")
}

async fn body_string(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    String::from_utf8_lossy(&bytes).into_owned()
}

fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

// -- Auth ---------------------------------------------------------------------

#[tokio::test]
async fn test_unknown_access_key_rejected() {
    let router = test_router(8);
    let response = send(&router, "GET", "/", b"", "AKIDNOBODY", "whatever", &[]).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_string(response).await;
    assert!(body.contains("InvalidAccessKeyId"), "{body}");
}

#[tokio::test]
async fn test_wrong_secret_rejected() {
    let router = test_router(8);
    let response = send(&router, "GET", "/", b"", ALICE_KEY, "not-the-secret", &[]).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_string(response).await;
    assert!(body.contains("SignatureDoesNotMatch"), "{body}");
}

#[tokio::test]
async fn test_unauthenticated_request_rejected() {
    let router = test_router(8);
    let request = Request::builder()
        .method("GET")
        .uri("/")
        .header("host", "localhost")
        .body(Body::empty())
        .expect("request build");
    let response = router.oneshot(request).await.expect("infallible service");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_health_needs_no_auth() {
    let router = test_router(8);
    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .expect("request build");
    let response = router.oneshot(request).await.expect("infallible service");
    assert_eq!(response.status(), StatusCode::OK);
}

// -- Bucket lifecycle ---------------------------------------------------------

#[tokio::test]
async fn test_bucket_crud() {
    let router = test_router(8);

    let response = send(&router, "PUT", "/crud-bucket", b"", ALICE_KEY, ALICE_SECRET, &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("location").and_then(|v| v.to_str().ok()),
        Some("/crud-bucket")
    );

    let response = send(&router, "HEAD", "/crud-bucket", b"", ALICE_KEY, ALICE_SECRET, &[]).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&router, "GET", "/", b"", ALICE_KEY, ALICE_SECRET, &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("<Name>crud-bucket</Name>"), "{body}");

    // Re-creating your own bucket is a 409.
    let response = send(&router, "PUT", "/crud-bucket", b"", ALICE_KEY, ALICE_SECRET, &[]).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_string(response).await;
    assert!(body.contains("BucketAlreadyOwnedByYou"), "{body}");

    let response =
        send(&router, "DELETE", "/crud-bucket", b"", ALICE_KEY, ALICE_SECRET, &[]).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = send(&router, "HEAD", "/crud-bucket", b"", ALICE_KEY, ALICE_SECRET, &[]).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_bucket_name_rejected() {
    let router = test_router(8);
    let response = send(&router, "PUT", "/Bad_Name", b"", ALICE_KEY, ALICE_SECRET, &[]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_string(response).await;
    assert!(body.contains("InvalidBucketName"), "{body}");
}

#[tokio::test]
async fn test_delete_nonempty_bucket_rejected() {
    let router = test_router(8);
    send(&router, "PUT", "/full-bucket", b"", ALICE_KEY, ALICE_SECRET, &[]).await;
    send(&router, "PUT", "/full-bucket/key", b"data", ALICE_KEY, ALICE_SECRET, &[]).await;

    let response =
        send(&router, "DELETE", "/full-bucket", b"", ALICE_KEY, ALICE_SECRET, &[]).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_string(response).await;
    assert!(body.contains("BucketNotEmpty"), "{body}");

    send(&router, "DELETE", "/full-bucket/key", b"", ALICE_KEY, ALICE_SECRET, &[]).await;
    let response =
        send(&router, "DELETE", "/full-bucket", b"", ALICE_KEY, ALICE_SECRET, &[]).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

// -- Object lifecycle ---------------------------------------------------------

#[tokio::test]
async fn test_object_put_get_delete() {
    let router = test_router(8);
    send(&router, "PUT", "/obj-bucket", b"", ALICE_KEY, ALICE_SECRET, &[]).await;

    let payload = b"hello pooled storage";
    let response = send(
        &router,
        "PUT",
        "/obj-bucket/docs/readme.txt",
        payload,
        ALICE_KEY,
        ALICE_SECRET,
        &[("content-type", "text/plain")],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let etag = response
        .headers()
        .get("etag")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .expect("etag header");
    assert_eq!(etag, format!("\"{}\"", md5_hex(payload)));

    let response = send(
        &router,
        "GET",
        "/obj-bucket/docs/readme.txt",
        b"",
        ALICE_KEY,
        ALICE_SECRET,
        &[],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("etag").and_then(|v| v.to_str().ok()),
        Some(etag.as_str())
    );
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("text/plain")
    );
    let body = body_string(response).await;
    assert_eq!(body.as_bytes(), payload);

    let response = send(
        &router,
        "HEAD",
        "/obj-bucket/docs/readme.txt",
        b"",
        ALICE_KEY,
        ALICE_SECRET,
        &[],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok()),
        Some(payload.len().to_string().as_str())
    );

    let response = send(
        &router,
        "DELETE",
        "/obj-bucket/docs/readme.txt",
        b"",
        ALICE_KEY,
        ALICE_SECRET,
        &[],
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = send(
        &router,
        "GET",
        "/obj-bucket/docs/readme.txt",
        b"",
        ALICE_KEY,
        ALICE_SECRET,
        &[],
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Deleting a missing key is still a 204.
    let response = send(
        &router,
        "DELETE",
        "/obj-bucket/docs/readme.txt",
        b"",
        ALICE_KEY,
        ALICE_SECRET,
        &[],
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_object_overwrite_is_idempotent() {
    let router = test_router(8);
    send(&router, "PUT", "/idem-bucket", b"", ALICE_KEY, ALICE_SECRET, &[]).await;

    let first = send(&router, "PUT", "/idem-bucket/k", b"same bytes", ALICE_KEY, ALICE_SECRET, &[])
        .await;
    let second =
        send(&router, "PUT", "/idem-bucket/k", b"same bytes", ALICE_KEY, ALICE_SECRET, &[]).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(
        first.headers().get("etag"),
        second.headers().get("etag"),
        "same payload must produce the same etag"
    );
}

#[tokio::test]
async fn test_range_get() {
    let router = test_router(8);
    send(&router, "PUT", "/range-bucket", b"", ALICE_KEY, ALICE_SECRET, &[]).await;
    send(&router, "PUT", "/range-bucket/k", b"0123456789", ALICE_KEY, ALICE_SECRET, &[]).await;

    let response = send(
        &router,
        "GET",
        "/range-bucket/k",
        b"",
        ALICE_KEY,
        ALICE_SECRET,
        &[("range", "bytes=2-5")],
    )
    .await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok()),
        Some("bytes 2-5/10")
    );
    assert_eq!(body_string(response).await, "2345");

    // Range start beyond the object is unsatisfiable.
    let response = send(
        &router,
        "GET",
        "/range-bucket/k",
        b"",
        ALICE_KEY,
        ALICE_SECRET,
        &[("range", "bytes=100-200")],
    )
    .await;
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
}

#[tokio::test]
async fn test_list_objects_prefix_and_delimiter() {
    let router = test_router(8);
    send(&router, "PUT", "/list-bucket", b"", ALICE_KEY, ALICE_SECRET, &[]).await;
    for key in ["a/1", "a/2", "b/1", "top"] {
        send(
            &router,
            "PUT",
            &format!("/list-bucket/{key}"),
            b"x",
            ALICE_KEY,
            ALICE_SECRET,
            &[],
        )
        .await;
    }

    let response = send(
        &router,
        "GET",
        "/list-bucket?list-type=2&delimiter=%2F",
        b"",
        ALICE_KEY,
        ALICE_SECRET,
        &[],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("<Prefix>a/</Prefix>"), "{body}");
    assert!(body.contains("<Prefix>b/</Prefix>"), "{body}");
    assert!(body.contains("<Key>top</Key>"), "{body}");
    assert!(!body.contains("<Key>a/1</Key>"), "{body}");

    let response = send(
        &router,
        "GET",
        "/list-bucket?list-type=2&prefix=a%2F",
        b"",
        ALICE_KEY,
        ALICE_SECRET,
        &[],
    )
    .await;
    let body = body_string(response).await;
    assert!(body.contains("<Key>a/1</Key>"), "{body}");
    assert!(body.contains("<Key>a/2</Key>"), "{body}");
    assert!(!body.contains("<Key>b/1</Key>"), "{body}");
}

// -- ACL ----------------------------------------------------------------------

#[tokio::test]
async fn test_acl_deny_then_grant() {
    let router = test_router(8);
    send(&router, "PUT", "/acl-bucket", b"", ALICE_KEY, ALICE_SECRET, &[]).await;

    // Bob cannot write into Alice's private bucket.
    let response = send(&router, "PUT", "/acl-bucket/k", b"data", BOB_KEY, BOB_SECRET, &[]).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_string(response).await;
    assert!(body.contains("AccessDenied"), "{body}");

    // Alice opens the bucket up.
    let response = send(
        &router,
        "PUT",
        "/acl-bucket?acl",
        b"",
        ALICE_KEY,
        ALICE_SECRET,
        &[("x-amz-acl", "public-read-write")],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&router, "PUT", "/acl-bucket/k", b"data", BOB_KEY, BOB_SECRET, &[]).await;
    assert_eq!(response.status(), StatusCode::OK);

    // The ACL document reflects the grant.
    let response = send(&router, "GET", "/acl-bucket?acl", b"", ALICE_KEY, ALICE_SECRET, &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("AllUsers"), "{body}");
    assert!(body.contains("<Permission>WRITE</Permission>"), "{body}");
}

#[tokio::test]
async fn test_delete_bucket_is_owner_only() {
    let router = test_router(8);
    send(&router, "PUT", "/shared-bucket", b"", ALICE_KEY, ALICE_SECRET, &[]).await;

    // A WRITE grant lets Bob put objects, not delete the bucket.
    let response = send(
        &router,
        "PUT",
        "/shared-bucket?acl",
        b"",
        ALICE_KEY,
        ALICE_SECRET,
        &[("x-amz-acl", "public-read-write")],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response =
        send(&router, "DELETE", "/shared-bucket", b"", BOB_KEY, BOB_SECRET, &[]).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_string(response).await;
    assert!(body.contains("AccessDenied"), "{body}");

    // The bucket survived, and the owner can still delete it.
    let response =
        send(&router, "HEAD", "/shared-bucket", b"", ALICE_KEY, ALICE_SECRET, &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    let response =
        send(&router, "DELETE", "/shared-bucket", b"", ALICE_KEY, ALICE_SECRET, &[]).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

// -- Multipart ----------------------------------------------------------------

async fn initiate_upload(router: &axum::Router, bucket: &str, key: &str) -> String {
    let response = send(
        router,
        "POST",
        &format!("/{bucket}/{key}?uploads"),
        b"",
        ALICE_KEY,
        ALICE_SECRET,
        &[],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    let start = body.find("<UploadId>").expect("UploadId tag") + "<UploadId>".len();
    let end = body.find("</UploadId>").expect("UploadId close");
    body[start..end].to_string()
}

async fn put_part(
    router: &axum::Router,
    bucket: &str,
    key: &str,
    upload_id: &str,
    part_number: u32,
    data: &[u8],
) -> String {
    let response = send(
        router,
        "PUT",
        &format!("/{bucket}/{key}?partNumber={part_number}&uploadId={upload_id}"),
        data,
        ALICE_KEY,
        ALICE_SECRET,
        &[],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    response
        .headers()
        .get("etag")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .expect("part etag")
}

fn complete_body(parts: &[(u32, &str)]) -> Vec<u8> {
    let mut xml = String::from("<CompleteMultipartUpload>");
    for (number, etag) in parts {
        xml.push_str(&format!(
            "<Part><PartNumber>{number}</PartNumber><ETag>{etag}</ETag></Part>"
        ));
    }
    xml.push_str("</CompleteMultipartUpload>");
    xml.into_bytes()
}

#[tokio::test]
async fn test_multipart_complete_assembles_object() {
    // Minimum part size lowered so small test parts are acceptable.
    let router = test_router(8);
    send(&router, "PUT", "/mp-bucket", b"", ALICE_KEY, ALICE_SECRET, &[]).await;

    let upload_id = initiate_upload(&router, "mp-bucket", "big.bin").await;
    let part1 = b"AAAAAAAA"; // exactly the minimum size
    let part2 = b"BB"; // final part may be short
    let etag1 = put_part(&router, "mp-bucket", "big.bin", &upload_id, 1, part1).await;
    let etag2 = put_part(&router, "mp-bucket", "big.bin", &upload_id, 2, part2).await;

    let body = complete_body(&[(1, &etag1), (2, &etag2)]);
    let response = send(
        &router,
        "POST",
        &format!("/mp-bucket/big.bin?uploadId={upload_id}"),
        &body,
        ALICE_KEY,
        ALICE_SECRET,
        &[],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let completion = body_string(response).await;

    // Aggregate etag: md5 over the raw part digests, "-2" suffix.
    let mut hasher = Md5::new();
    hasher.update(hex::decode(md5_hex(part1)).expect("hex"));
    hasher.update(hex::decode(md5_hex(part2)).expect("hex"));
    let expected = format!("\"{}-2\"", hex::encode(hasher.finalize()));
    assert!(completion.contains(&expected), "{completion}");

    // The assembled object is readable as one payload.
    let response =
        send(&router, "GET", "/mp-bucket/big.bin", b"", ALICE_KEY, ALICE_SECRET, &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "AAAAAAAABB");

    // The session is terminal: a second completion attempt 404s.
    let response = send(
        &router,
        "POST",
        &format!("/mp-bucket/big.bin?uploadId={upload_id}"),
        &body,
        ALICE_KEY,
        ALICE_SECRET,
        &[],
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_multipart_out_of_order_completion_rejected() {
    let router = test_router(8);
    send(&router, "PUT", "/ord-bucket", b"", ALICE_KEY, ALICE_SECRET, &[]).await;
    let upload_id = initiate_upload(&router, "ord-bucket", "k").await;
    let etag1 = put_part(&router, "ord-bucket", "k", &upload_id, 1, b"AAAAAAAA").await;
    let etag2 = put_part(&router, "ord-bucket", "k", &upload_id, 2, b"BB").await;

    let body = complete_body(&[(2, &etag2), (1, &etag1)]);
    let response = send(
        &router,
        "POST",
        &format!("/ord-bucket/k?uploadId={upload_id}"),
        &body,
        ALICE_KEY,
        ALICE_SECRET,
        &[],
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let text = body_string(response).await;
    assert!(text.contains("InvalidPartOrder"), "{text}");
}

#[tokio::test]
async fn test_multipart_incomplete_body_leaves_session_repairable() {
    let router = test_router(8);
    send(&router, "PUT", "/fix-bucket", b"", ALICE_KEY, ALICE_SECRET, &[]).await;
    let upload_id = initiate_upload(&router, "fix-bucket", "k").await;
    let etag1 = put_part(&router, "fix-bucket", "k", &upload_id, 1, b"AAAAAAAA").await;

    // Completion names a part that was never uploaded.
    let body = complete_body(&[(1, &etag1), (2, "\"deadbeefdeadbeefdeadbeefdeadbeef\"")]);
    let response = send(
        &router,
        "POST",
        &format!("/fix-bucket/k?uploadId={upload_id}"),
        &body,
        ALICE_KEY,
        ALICE_SECRET,
        &[],
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let text = body_string(response).await;
    assert!(text.contains("IncompleteBody"), "{text}");

    // The session reopened: upload the missing part and retry.
    let etag2 = put_part(&router, "fix-bucket", "k", &upload_id, 2, b"BB").await;
    let body = complete_body(&[(1, &etag1), (2, &etag2)]);
    let response = send(
        &router,
        "POST",
        &format!("/fix-bucket/k?uploadId={upload_id}"),
        &body,
        ALICE_KEY,
        ALICE_SECRET,
        &[],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_multipart_abort() {
    let router = test_router(8);
    send(&router, "PUT", "/abort-bucket", b"", ALICE_KEY, ALICE_SECRET, &[]).await;
    let upload_id = initiate_upload(&router, "abort-bucket", "k").await;
    put_part(&router, "abort-bucket", "k", &upload_id, 1, b"AAAAAAAA").await;

    let response = send(
        &router,
        "DELETE",
        &format!("/abort-bucket/k?uploadId={upload_id}"),
        b"",
        ALICE_KEY,
        ALICE_SECRET,
        &[],
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // Parts can no longer be uploaded to the aborted session.
    let response = send(
        &router,
        "PUT",
        &format!("/abort-bucket/k?partNumber=2&uploadId={upload_id}"),
        b"BB",
        ALICE_KEY,
        ALICE_SECRET,
        &[],
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let text = body_string(response).await;
    assert!(text.contains("NoSuchUpload"), "{text}");
}

#[tokio::test]
async fn test_multipart_listings() {
    let router = test_router(8);
    send(&router, "PUT", "/mplist-bucket", b"", ALICE_KEY, ALICE_SECRET, &[]).await;
    let upload_id = initiate_upload(&router, "mplist-bucket", "video.mp4").await;
    put_part(&router, "mplist-bucket", "video.mp4", &upload_id, 1, b"AAAAAAAA").await;
    put_part(&router, "mplist-bucket", "video.mp4", &upload_id, 3, b"CC").await;

    let response = send(
        &router,
        "GET",
        &format!("/mplist-bucket/video.mp4?uploadId={upload_id}"),
        b"",
        ALICE_KEY,
        ALICE_SECRET,
        &[],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("<PartNumber>1</PartNumber>"), "{body}");
    assert!(body.contains("<PartNumber>3</PartNumber>"), "{body}");

    let response = send(
        &router,
        "GET",
        "/mplist-bucket?uploads",
        b"",
        ALICE_KEY,
        ALICE_SECRET,
        &[],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains(&upload_id), "{body}");
    assert!(body.contains("<Key>video.mp4</Key>"), "{body}");
}

#[tokio::test]
async fn test_list_parts_with_maximal_marker_is_empty() {
    let router = test_router(8);
    send(&router, "PUT", "/marker-bucket", b"", ALICE_KEY, ALICE_SECRET, &[]).await;
    let upload_id = initiate_upload(&router, "marker-bucket", "k").await;
    put_part(&router, "marker-bucket", "k", &upload_id, 1, b"AAAAAAAA").await;

    // No part number can follow u32::MAX; the page must come back empty.
    let response = send(
        &router,
        "GET",
        &format!("/marker-bucket/k?uploadId={upload_id}&part-number-marker=4294967295"),
        b"",
        ALICE_KEY,
        ALICE_SECRET,
        &[],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(!body.contains("<PartNumber>"), "{body}");
    assert!(body.contains("<IsTruncated>false</IsTruncated>"), "{body}");
}

#[tokio::test]
async fn test_upload_part_rejects_bad_part_number() {
    let router = test_router(8);
    send(&router, "PUT", "/pn-bucket", b"", ALICE_KEY, ALICE_SECRET, &[]).await;
    let upload_id = initiate_upload(&router, "pn-bucket", "k").await;

    for bad in ["0", "10001", "abc"] {
        let response = send(
            &router,
            "PUT",
            &format!("/pn-bucket/k?partNumber={bad}&uploadId={upload_id}"),
            b"x",
            ALICE_KEY,
            ALICE_SECRET,
            &[],
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "partNumber={bad}");
    }
}
