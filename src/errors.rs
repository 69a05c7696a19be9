//! S3-compatible error types.
//!
//! Every variant maps to a well-known S3 error code.  The enum
//! implements [`axum::response::IntoResponse`] so the response layer can
//! turn any failure on the PUT path into a rendered `<Error>` document.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

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
    #[error("The resource you requested does not exist")]
    NoSuchKey { key: String },

    /// You already own this bucket.
    #[error("Your previous request to create the named bucket succeeded and you already own it.")]
    BucketAlreadyOwnedByYou { bucket: String },

    /// The bucket name is taken by another owner.
    #[error("The requested bucket name is not available. Please select a different name and try again.")]
    BucketAlreadyExists { bucket: String },

    /// Identity verified but not permitted, or no identity supplied.
    #[error("Access Denied")]
    AccessDenied { message: String },

    /// A request argument is invalid.
    #[error("{message}")]
    InvalidArgument { message: String },

    /// The request signature does not match.
    #[error("The request signature we calculated does not match the signature you provided.")]
    SignatureDoesNotMatch,

    /// Invalid access key ID.
    #[error("The AWS Access Key Id you provided does not exist in our records.")]
    InvalidAccessKeyId,

    /// An invalid bucket name was provided.
    #[error("The specified bucket is not valid.")]
    InvalidBucketName { name: String },

    /// Malformed XML in request body.
    #[error("The XML you provided was not well-formed or did not validate against our published schema.")]
    MalformedXML,

    /// Malformed `AccessControlPolicy` body.
    #[error("The XML you provided was not well-formed or did not validate against our published schema.")]
    MalformedACLError,

    /// The Content-MD5 value is not a valid digest in either wire encoding.
    #[error("The Content-MD5 you specified is not valid.")]
    InvalidDigest,

    /// The Content-MD5 value does not match the received payload.
    #[error("The Content-MD5 you specified did not match what we received.")]
    BadDigest,

    /// Feature not implemented.
    #[error("A header you provided implies functionality that is not implemented")]
    NotImplemented,

    /// HTTP method not allowed for this resource.
    #[error("The specified method is not allowed against this resource.")]
    MethodNotAllowed,

    /// A buffered request body exceeded the configured limit.
    #[error("Your request was too big.")]
    MaxMessageLengthExceeded,

    /// Fewer (or more) payload bytes arrived than Content-Length declared.
    #[error("You did not provide the number of bytes specified by the Content-Length HTTP header.")]
    IncompleteBody,

    /// Content-Length header is required but missing.
    #[error("You must provide the Content-Length HTTP header.")]
    MissingContentLength,

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
            S3Error::BucketAlreadyOwnedByYou { .. } => "BucketAlreadyOwnedByYou",
            S3Error::BucketAlreadyExists { .. } => "BucketAlreadyExists",
            S3Error::AccessDenied { .. } => "AccessDenied",
            S3Error::InvalidArgument { .. } => "InvalidArgument",
            S3Error::SignatureDoesNotMatch => "SignatureDoesNotMatch",
            S3Error::InvalidAccessKeyId => "InvalidAccessKeyId",
            S3Error::InvalidBucketName { .. } => "InvalidBucketName",
            S3Error::MalformedXML => "MalformedXML",
            S3Error::MalformedACLError => "MalformedACLError",
            S3Error::InvalidDigest => "InvalidDigest",
            S3Error::BadDigest => "BadDigest",
            S3Error::NotImplemented => "NotImplemented",
            S3Error::MethodNotAllowed => "MethodNotAllowed",
            S3Error::MaxMessageLengthExceeded => "MaxMessageLengthExceeded",
            S3Error::IncompleteBody => "IncompleteBody",
            S3Error::MissingContentLength => "MissingContentLength",
            S3Error::InternalError(_) => "InternalError",
        }
    }

    /// Return the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            S3Error::NoSuchBucket { .. } => StatusCode::NOT_FOUND,
            S3Error::NoSuchKey { .. } => StatusCode::NOT_FOUND,
            S3Error::BucketAlreadyOwnedByYou { .. } => StatusCode::CONFLICT,
            S3Error::BucketAlreadyExists { .. } => StatusCode::CONFLICT,
            S3Error::AccessDenied { .. } => StatusCode::FORBIDDEN,
            S3Error::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
            S3Error::SignatureDoesNotMatch => StatusCode::FORBIDDEN,
            S3Error::InvalidAccessKeyId => StatusCode::FORBIDDEN,
            S3Error::InvalidBucketName { .. } => StatusCode::BAD_REQUEST,
            S3Error::MalformedXML => StatusCode::BAD_REQUEST,
            S3Error::MalformedACLError => StatusCode::BAD_REQUEST,
            S3Error::InvalidDigest => StatusCode::BAD_REQUEST,
            S3Error::BadDigest => StatusCode::BAD_REQUEST,
            S3Error::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            S3Error::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            S3Error::MaxMessageLengthExceeded => StatusCode::BAD_REQUEST,
            S3Error::IncompleteBody => StatusCode::BAD_REQUEST,
            S3Error::MissingContentLength => StatusCode::LENGTH_REQUIRED,
            S3Error::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The resource string reported in the `<Error>` body.
    fn resource(&self) -> &str {
        match self {
            S3Error::NoSuchBucket { bucket }
            | S3Error::BucketAlreadyOwnedByYou { bucket }
            | S3Error::BucketAlreadyExists { bucket } => bucket,
            S3Error::NoSuchKey { key } => key,
            S3Error::InvalidBucketName { name } => name,
            _ => "",
        }
    }
}

impl IntoResponse for S3Error {
    fn into_response(self) -> Response {
        let request_id = generate_request_id();
        let status = self.status_code();
        let date = httpdate::fmt_http_date(std::time::SystemTime::now());

        let body = render_error(self.code(), &self.to_string(), self.resource(), &request_id);

        (
            status,
            [
                ("content-type", "application/xml".to_string()),
                ("x-amz-request-id", request_id),
                ("date", date),
                ("server", "s3gate".to_string()),
            ],
            body,
        )
            .into_response()
    }
}
