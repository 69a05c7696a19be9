//! Response emission for routed S3 operations.
//!
//! Every routed request ends in exactly one call to one of these
//! functions, success or failure.

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::errors::S3Error;
use crate::integrity::quote_etag;

/// Emit an empty-bodied response carrying `headers`, or the rendered error.
pub fn response_no_body(result: Result<HeaderMap, S3Error>, status: StatusCode) -> Response {
    match result {
        Ok(headers) => (status, headers).into_response(),
        Err(err) => error_response(err),
    }
}

/// Emit an XML document with 200 OK, or the rendered error.
pub fn response_xml_body(result: Result<String, S3Error>) -> Response {
    match result {
        Ok(xml) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/xml")],
            xml,
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

/// Metadata headers for a write: the digest, quoted, as `ETag`.
pub fn etag_headers(digest: &str) -> Result<HeaderMap, S3Error> {
    let value = HeaderValue::from_str(&quote_etag(digest))
        .map_err(|e| S3Error::InternalError(anyhow::anyhow!("invalid etag {digest:?}: {e}")))?;
    let mut headers = HeaderMap::new();
    headers.insert(header::ETAG, value);
    Ok(headers)
}

fn error_response(err: S3Error) -> Response {
    debug!(code = err.code(), status = err.status_code().as_u16(), "request failed");
    err.into_response()
}
