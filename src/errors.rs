//! S3-compatible error types.
//!
//! Every variant maps to a well-known S3 error code.  The enum
//! implements [`axum::response::IntoResponse`] so handlers can simply
//! return `Err(S3Error::NoSuchBucket { .. })`.  This is the only place
//! internal failures are translated to wire-format XML.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::cluster::backend::BackendError;
use crate::xml::render_error;

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes).to_uppercase()
}

/// S3 error codes expressed as a Rust enum.
#[derive(Debug, Error)]
pub enum S3Error {
    /// The specified bucket does not exist.
    #[error("The specified bucket does not exist")]
    NoSuchBucket { bucket: String },

    /// The specified key does not exist.
    #[error("The specified key does not exist.")]
    NoSuchKey { key: String },

    /// The specified multipart upload does not exist.
    #[error("The specified upload does not exist. The upload ID may be invalid, or the upload may have been aborted or completed.")]
    NoSuchUpload { upload_id: String },

    /// A bucket with the requested name already exists.
    #[error("The requested bucket name is not available. The bucket namespace is shared by all users of the system. Please select a different name and try again.")]
    BucketAlreadyExists { bucket: String },

    /// You already own this bucket.
    #[error("Your previous request to create the named bucket succeeded and you already own it.")]
    BucketAlreadyOwnedByYou { bucket: String },

    /// The bucket you tried to delete is not empty.
    #[error("The bucket you tried to delete is not empty")]
    BucketNotEmpty { bucket: String },

    /// Access denied.
    #[error("Access Denied")]
    AccessDenied { message: String },

    /// The request signature does not match.
    #[error("The request signature we calculated does not match the signature you provided.")]
    SignatureDoesNotMatch,

    /// Invalid access key ID.
    #[error("The AWS Access Key Id you provided does not exist in our records.")]
    InvalidAccessKeyId,

    /// Request timestamp outside the allowed clock-skew window.
    #[error("The difference between the request time and the server's time is too large.")]
    RequestTimeTooSkewed,

    /// A request argument is invalid.
    #[error("{message}")]
    InvalidArgument { message: String },

    /// An invalid bucket name was provided.
    #[error("The specified bucket is not valid.")]
    InvalidBucketName { name: String },

    /// The entity is too large.
    #[error("Your proposed upload exceeds the maximum allowed object size.")]
    EntityTooLarge,

    /// The object key is too long (> 1024 bytes).
    #[error("Your key is too long")]
    KeyTooLongError,

    /// The request body does not match what the request declared, or a
    /// multipart completion referenced parts that are missing, mismatched,
    /// or undersized.
    #[error("You did not provide the number of bytes specified by the Content-Length HTTP header, or a part referenced by the completion request was missing, mismatched, or too small.")]
    IncompleteBody,

    /// Invalid part order in CompleteMultipartUpload.
    #[error("The list of parts was not in ascending order. Parts must be ordered by part number.")]
    InvalidPartOrder,

    /// Malformed XML in request body.
    #[error("The XML you provided was not well-formed or did not validate against our published schema.")]
    MalformedXML,

    /// A conflicting conditional operation won the race against this one.
    #[error("A conflicting conditional operation is currently in progress against this resource. Please try again.")]
    OperationAborted,

    /// Invalid range request.
    #[error("The requested range is not satisfiable")]
    InvalidRange,

    /// HTTP method not allowed for this resource.
    #[error("The specified method is not allowed against this resource.")]
    MethodNotAllowed,

    /// Feature not implemented.
    #[error("A header you provided implies functionality that is not implemented")]
    NotImplemented,

    /// The gateway is shedding load; the client should back off.
    #[error("Please reduce your request rate.")]
    SlowDown,

    /// The storage cluster is unavailable or timed out.
    #[error("The service is temporarily unable to handle your request. Please try again.")]
    ServiceUnavailable,

    /// Catch-all for unexpected internal errors.
    #[error("We encountered an internal error, please try again.")]
    InternalError(#[from] anyhow::Error),
}

impl S3Error {
    /// Return the S3 XML error code string.
    pub fn code(&self) -> &'static str {
        match self {
            S3Error::NoSuchBucket { .. } => "NoSuchBucket",
            S3Error::NoSuchKey { .. } => "NoSuchKey",
            S3Error::NoSuchUpload { .. } => "NoSuchUpload",
            S3Error::BucketAlreadyExists { .. } => "BucketAlreadyExists",
            S3Error::BucketAlreadyOwnedByYou { .. } => "BucketAlreadyOwnedByYou",
            S3Error::BucketNotEmpty { .. } => "BucketNotEmpty",
            S3Error::AccessDenied { .. } => "AccessDenied",
            S3Error::SignatureDoesNotMatch => "SignatureDoesNotMatch",
            S3Error::InvalidAccessKeyId => "InvalidAccessKeyId",
            S3Error::RequestTimeTooSkewed => "RequestTimeTooSkewed",
            S3Error::InvalidArgument { .. } => "InvalidArgument",
            S3Error::InvalidBucketName { .. } => "InvalidBucketName",
            S3Error::EntityTooLarge => "EntityTooLarge",
            S3Error::KeyTooLongError => "KeyTooLongError",
            S3Error::IncompleteBody => "IncompleteBody",
            S3Error::InvalidPartOrder => "InvalidPartOrder",
            S3Error::MalformedXML => "MalformedXML",
            S3Error::OperationAborted => "OperationAborted",
            S3Error::InvalidRange => "InvalidRange",
            S3Error::MethodNotAllowed => "MethodNotAllowed",
            S3Error::NotImplemented => "NotImplemented",
            S3Error::SlowDown => "SlowDown",
            S3Error::ServiceUnavailable => "ServiceUnavailable",
            S3Error::InternalError(_) => "InternalError",
        }
    }

    /// Return the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            S3Error::NoSuchBucket { .. } => StatusCode::NOT_FOUND,
            S3Error::NoSuchKey { .. } => StatusCode::NOT_FOUND,
            S3Error::NoSuchUpload { .. } => StatusCode::NOT_FOUND,
            S3Error::BucketAlreadyExists { .. } => StatusCode::CONFLICT,
            S3Error::BucketAlreadyOwnedByYou { .. } => StatusCode::CONFLICT,
            S3Error::BucketNotEmpty { .. } => StatusCode::CONFLICT,
            S3Error::AccessDenied { .. } => StatusCode::FORBIDDEN,
            S3Error::SignatureDoesNotMatch => StatusCode::FORBIDDEN,
            S3Error::InvalidAccessKeyId => StatusCode::FORBIDDEN,
            S3Error::RequestTimeTooSkewed => StatusCode::FORBIDDEN,
            S3Error::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
            S3Error::InvalidBucketName { .. } => StatusCode::BAD_REQUEST,
            S3Error::EntityTooLarge => StatusCode::BAD_REQUEST,
            S3Error::KeyTooLongError => StatusCode::BAD_REQUEST,
            S3Error::IncompleteBody => StatusCode::BAD_REQUEST,
            S3Error::InvalidPartOrder => StatusCode::BAD_REQUEST,
            S3Error::MalformedXML => StatusCode::BAD_REQUEST,
            S3Error::OperationAborted => StatusCode::CONFLICT,
            S3Error::InvalidRange => StatusCode::RANGE_NOT_SATISFIABLE,
            S3Error::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            S3Error::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            S3Error::SlowDown => StatusCode::SERVICE_UNAVAILABLE,
            S3Error::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            S3Error::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Default translation of storage-cluster failures to wire errors.
///
/// Handlers that can do better (e.g. DeleteObject tolerating NotFound)
/// intercept the variant before it reaches this conversion.
impl From<BackendError> for S3Error {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unreachable(_) | BackendError::Timeout => S3Error::ServiceUnavailable,
            BackendError::Busy => S3Error::SlowDown,
            BackendError::QuotaExceeded => S3Error::ServiceUnavailable,
            BackendError::NotFound => {
                S3Error::InternalError(anyhow::anyhow!("cluster object missing for live record"))
            }
            BackendError::Other(e) => S3Error::InternalError(e),
        }
    }
}

impl IntoResponse for S3Error {
    fn into_response(self) -> Response {
        let request_id = generate_request_id();
        let status = self.status_code();
        let date = httpdate::fmt_http_date(std::time::SystemTime::now());

        let body = render_error(self.code(), &self.to_string(), "", &request_id);

        (
            status,
            [
                ("content-type", "application/xml".to_string()),
                ("x-amz-request-id", request_id),
                ("date", date),
                ("server", "PoolGate".to_string()),
            ],
            body,
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_format() {
        let id = generate_request_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            S3Error::NoSuchBucket {
                bucket: "b".to_string()
            }
            .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            S3Error::OperationAborted.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            S3Error::SlowDown.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            S3Error::RequestTimeTooSkewed.status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            S3Error::IncompleteBody.status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_backend_error_mapping() {
        assert_eq!(S3Error::from(BackendError::Timeout).code(), "ServiceUnavailable");
        assert_eq!(S3Error::from(BackendError::Busy).code(), "SlowDown");
        assert_eq!(
            S3Error::from(BackendError::Unreachable("refused".to_string())).code(),
            "ServiceUnavailable"
        );
    }
}
