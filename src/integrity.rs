//! Content-MD5 normalization and Content-Length validation for writes.
//!
//! Content-MD5 arrives either as the standard base64 encoding of the
//! 16-byte digest or, from some clients, already as 32 hex characters.
//! Both are reduced to lowercase hex here; anything that does not reduce
//! cleanly is an [`S3Error::InvalidDigest`].  The digest itself is never
//! computed in this module; storage handlers compare against it.

use axum::http::HeaderMap;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use tracing::warn;

use crate::errors::S3Error;

/// MD5 of the empty payload, reported for zero-length writes.
pub const EMPTY_PAYLOAD_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

/// Length of a hex-rendered MD5 digest.
const MD5_HEX_LEN: usize = 32;

/// Standard-alphabet base64 that accepts the digest with or without `=` padding.
const DIGEST_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Metadata header where s3cmd stashes its own attributes, `md5:<hex>` among them.
const S3CMD_ATTRS_HEADER: &str = "x-amz-meta-s3cmd-attrs";

/// The raw Content-MD5 for a request: the standard header when present,
/// else the value recovered from s3cmd's metadata header.
///
/// Empty values count as absent.  A value that is not visible ASCII is
/// present but unusable, so it is an [`S3Error::InvalidDigest`].
pub fn raw_content_md5(headers: &HeaderMap) -> Result<Option<String>, S3Error> {
    if let Some(value) = headers.get("content-md5") {
        let value = value.to_str().map_err(|_| {
            warn!("content-md5 is not visible ascii");
            S3Error::InvalidDigest
        })?;
        let value = value.trim();
        if !value.is_empty() {
            return Ok(Some(value.to_string()));
        }
    }
    md5_from_s3cmd_attrs(headers)
}

/// Extract `md5` from `x-amz-meta-s3cmd-attrs: uid:0/gid:0/md5:<hex>/...`.
fn md5_from_s3cmd_attrs(headers: &HeaderMap) -> Result<Option<String>, S3Error> {
    let Some(attrs) = headers.get(S3CMD_ATTRS_HEADER) else {
        return Ok(None);
    };
    let attrs = attrs.to_str().map_err(|_| {
        warn!("{S3CMD_ATTRS_HEADER} is not visible ascii");
        S3Error::InvalidDigest
    })?;
    Ok(attrs
        .split('/')
        .filter_map(|entry| entry.split_once(':'))
        .find(|(name, _)| *name == "md5")
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty()))
}

/// Reduce a Content-MD5 value to 32 lowercase hex characters.
///
/// Values that are not already 32 characters long are treated as base64
/// and re-rendered as hex.  The single length check afterwards rejects
/// malformed base64 and malformed hex alike.
pub fn normalize_content_md5(raw: &str) -> Result<String, S3Error> {
    let candidate = if raw.len() == MD5_HEX_LEN {
        raw.to_ascii_lowercase()
    } else {
        DIGEST_BASE64
            .decode(raw)
            .map(hex::encode)
            .unwrap_or_default()
    };

    if candidate.len() != MD5_HEX_LEN || !candidate.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(S3Error::InvalidDigest);
    }
    Ok(candidate)
}

/// Resolve and normalize the request's Content-MD5, if any.
pub fn validate_content_md5(headers: &HeaderMap) -> Result<Option<String>, S3Error> {
    let Some(raw) = raw_content_md5(headers)? else {
        return Ok(None);
    };
    normalize_content_md5(&raw).map(Some).map_err(|err| {
        warn!(content_md5 = %raw, "invalid md5 digest");
        err
    })
}

/// Parse the declared Content-Length of a streamed write.
///
/// Missing (or empty) → [`S3Error::MissingContentLength`];
/// present but not a non-negative integer → [`S3Error::InvalidArgument`].
pub fn parse_content_length(headers: &HeaderMap) -> Result<u64, S3Error> {
    let raw = headers
        .get("content-length")
        .map(|v| v.to_str().map(str::trim).unwrap_or("?"))
        .filter(|v| !v.is_empty())
        .ok_or(S3Error::MissingContentLength)?;

    raw.parse::<u64>().map_err(|_| S3Error::InvalidArgument {
        message: format!("Invalid Content-Length: {raw}"),
    })
}

/// Wrap a hex digest in the double quotes the `ETag` header requires.
pub fn quote_etag(digest: &str) -> String {
    format!("\"{}\"", digest.trim_matches('"'))
}
