//! AWS Signature Version 4 header authentication.
//!
//! The default [`Authenticator`] for the gateway.  It verifies
//! `Authorization: AWS4-HMAC-SHA256 ...` headers against the configured
//! credentials, then checks the credential's scope against the
//! [`RequestContext`] being authorized.
//!
//! The algorithm:
//! 1. Build a canonical request
//! 2. Build a string-to-sign
//! 3. Derive a signing key via HMAC chain
//! 4. Compute and compare the signature

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::debug;

use super::{AuthFuture, AuthInfo, Authenticator, Credential};
use crate::context::RequestContext;
use crate::errors::S3Error;
use crate::request::ApiRequest;

type HmacSha256 = Hmac<Sha256>;

/// Clock skew tolerance for header-based auth (15 minutes).
const CLOCK_SKEW_SECONDS: u64 = 900;

/// Payload hash used when the client did not sign the body.
const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Parsed components from an Authorization header.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAuthorization {
    pub access_key_id: String,
    /// YYYYMMDD from the Credential field.
    pub date_stamp: String,
    pub region: String,
    pub service: String,
    /// Semicolon-separated, lowercase, sorted.
    pub signed_headers: String,
    pub signature: String,
    pub credential_scope: String,
}

/// Parse the `Authorization` header value into its components.
///
/// ```text
/// AWS4-HMAC-SHA256 Credential=AKID/20260222/us-east-1/s3/aws4_request, SignedHeaders=host;x-amz-date, Signature=abcdef...
/// ```
pub fn parse_authorization_header(header: &str) -> Result<ParsedAuthorization, String> {
    let rest = header
        .trim()
        .strip_prefix("AWS4-HMAC-SHA256")
        .ok_or("Authorization header does not start with AWS4-HMAC-SHA256")?
        .trim();

    let mut credential = None;
    let mut signed_headers = None;
    let mut signature = None;

    for part in rest.split(',') {
        let part = part.trim();
        if let Some(val) = part.strip_prefix("Credential=") {
            credential = Some(val.trim());
        } else if let Some(val) = part.strip_prefix("SignedHeaders=") {
            signed_headers = Some(val.trim());
        } else if let Some(val) = part.strip_prefix("Signature=") {
            signature = Some(val.trim());
        }
    }

    let credential = credential.ok_or("Missing Credential in Authorization header")?;
    let signed_headers = signed_headers.ok_or("Missing SignedHeaders in Authorization header")?;
    let signature = signature.ok_or("Missing Signature in Authorization header")?;

    // AKID/YYYYMMDD/region/service/aws4_request
    let parts: Vec<&str> = credential.splitn(5, '/').collect();
    if parts.len() != 5 {
        return Err("Invalid Credential format in Authorization header".to_string());
    }
    if parts[4] != "aws4_request" {
        return Err("Credential must end with aws4_request".to_string());
    }

    Ok(ParsedAuthorization {
        access_key_id: parts[0].to_string(),
        date_stamp: parts[1].to_string(),
        region: parts[2].to_string(),
        service: parts[3].to_string(),
        signed_headers: signed_headers.to_string(),
        signature: signature.to_string(),
        credential_scope: parts[1..].join("/"),
    })
}

/// Build the canonical request string.
///
/// For S3 the canonical URI is the raw path, without double-encoding.
pub fn build_canonical_request(
    method: &str,
    uri: &str,
    query_string: &str,
    headers: &[(String, String)],
    signed_headers: &str,
    payload_hash: &str,
) -> String {
    let canonical_uri = if uri.is_empty() { "/" } else { uri };
    let canonical_query = build_canonical_query_string(query_string);

    let mut canonical_headers = String::new();
    for name in signed_headers.split(';') {
        if let Some((hname, hval)) = headers.iter().find(|(n, _)| n == name) {
            canonical_headers.push_str(hname);
            canonical_headers.push(':');
            canonical_headers.push_str(&collapse_whitespace(hval));
            canonical_headers.push('\n');
        }
    }

    format!(
        "{method}\n{canonical_uri}\n{canonical_query}\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
    )
}

/// Sort query parameters and re-encode them with S3 rules.
///
/// The raw query is already percent-encoded, so each name and value is
/// decoded first to avoid double-encoding.  Valueless params become `acl=`.
pub fn build_canonical_query_string(query_string: &str) -> String {
    let mut params: Vec<(String, String)> = query_string
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (k, v) = part.split_once('=').unwrap_or((part, ""));
            (
                s3_uri_encode(&percent_decode(k)),
                s3_uri_encode(&percent_decode(v)),
            )
        })
        .filter(|(k, _)| k != "X-Amz-Signature")
        .collect();
    params.sort();

    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Build the string to sign.
pub fn build_string_to_sign(
    timestamp: &str,
    credential_scope: &str,
    canonical_request: &str,
) -> String {
    let hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
    format!("AWS4-HMAC-SHA256\n{timestamp}\n{credential_scope}\n{hash}")
}

/// Derive the signing key for a given date, region, and service.
pub fn derive_signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Vec<u8> {
    let k_secret = format!("AWS4{secret_key}");
    let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// HexEncode(HMAC-SHA256(SigningKey, StringToSign)).
pub fn compute_signature(signing_key: &[u8], string_to_sign: &str) -> String {
    hex::encode(hmac_sha256(signing_key, string_to_sign.as_bytes()))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Compare two signature strings in constant time.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

/// Whether an `x-amz-date` value is within the clock skew tolerance.
pub fn check_clock_skew(amz_date: &str) -> bool {
    let Some(req_time) = parse_amz_date(amz_date) else {
        return false;
    };
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    now.abs_diff(req_time) <= CLOCK_SKEW_SECONDS
}

/// S3 URI encoding: unreserved characters pass, everything else
/// (including `/`) becomes uppercase `%XX`.
fn s3_uri_encode(input: &str) -> String {
    let mut encoded = String::with_capacity(input.len() * 2);
    for byte in input.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}

fn percent_decode(s: &str) -> String {
    percent_encoding::percent_decode_str(s)
        .decode_utf8_lossy()
        .into_owned()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse an X-Amz-Date string (YYYYMMDDTHHMMSSZ) into a Unix timestamp.
fn parse_amz_date(date: &str) -> Option<u64> {
    if date.len() != 16 || !date.ends_with('Z') || date.as_bytes()[8] != b'T' {
        return None;
    }

    let year: u64 = date[0..4].parse().ok()?;
    let month: u64 = date[4..6].parse().ok()?;
    let day: u64 = date[6..8].parse().ok()?;
    let hour: u64 = date[9..11].parse().ok()?;
    let min: u64 = date[11..13].parse().ok()?;
    let sec: u64 = date[13..15].parse().ok()?;
    if !(1..=12).contains(&month) || day == 0 || year < 1970 {
        return None;
    }

    let mut days: u64 = (1970..year)
        .map(|y| if is_leap_year(y) { 366 } else { 365 })
        .sum();
    let month_days = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    for (m, &md) in month_days.iter().enumerate().take(month as usize - 1) {
        days += md;
        if m == 1 && is_leap_year(year) {
            days += 1;
        }
    }
    days += day - 1;

    Some(days * 86400 + hour * 3600 + min * 60 + sec)
}

fn is_leap_year(year: u64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Lowercased `(name, value)` pairs for canonicalization.
pub fn extract_headers_for_signing(header_map: &axum::http::HeaderMap) -> Vec<(String, String)> {
    header_map
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect()
}

/// SigV4 header authenticator over a fixed credential set.
#[derive(Debug, Clone, Default)]
pub struct SigV4Authenticator {
    credentials: HashMap<String, Credential>,
}

impl SigV4Authenticator {
    pub fn new(credentials: impl IntoIterator<Item = Credential>) -> Self {
        Self {
            credentials: credentials
                .into_iter()
                .map(|c| (c.access_key.clone(), c))
                .collect(),
        }
    }

    /// Verify the request signature and return the matching credential.
    fn verify(&self, request: &ApiRequest) -> Result<&Credential, S3Error> {
        let header = request
            .header("authorization")
            .ok_or_else(|| S3Error::AccessDenied {
                message: "No authentication information provided".to_string(),
            })?;
        let parsed = parse_authorization_header(header)
            .map_err(|message| S3Error::AccessDenied { message })?;

        let credential = self.credentials.get(&parsed.access_key_id).ok_or_else(|| {
            debug!("Unknown access key: {}", parsed.access_key_id);
            S3Error::InvalidAccessKeyId
        })?;

        let amz_date = request.header("x-amz-date").unwrap_or("");
        if !amz_date.is_empty() {
            if !check_clock_skew(amz_date) {
                return Err(S3Error::AccessDenied {
                    message:
                        "The difference between the request time and the server's time is too large"
                            .to_string(),
                });
            }
            if amz_date.len() < 8 || parsed.date_stamp != amz_date[..8] {
                return Err(S3Error::AccessDenied {
                    message: "Credential date does not match x-amz-date".to_string(),
                });
            }
        }

        let headers = extract_headers_for_signing(request.headers());
        let payload_hash = request
            .header("x-amz-content-sha256")
            .unwrap_or(UNSIGNED_PAYLOAD);

        let canonical_request = build_canonical_request(
            request.method().as_str(),
            request.path(),
            request.raw_query(),
            &headers,
            &parsed.signed_headers,
            payload_hash,
        );
        let timestamp = if amz_date.is_empty() {
            request.header("date").unwrap_or("")
        } else {
            amz_date
        };
        let string_to_sign =
            build_string_to_sign(timestamp, &parsed.credential_scope, &canonical_request);
        let signing_key = derive_signing_key(
            &credential.secret_key,
            &parsed.date_stamp,
            &parsed.region,
            &parsed.service,
        );
        let computed = compute_signature(&signing_key, &string_to_sign);

        if !constant_time_eq(&computed, &parsed.signature) {
            debug!("Signature mismatch for access key {}", parsed.access_key_id);
            return Err(S3Error::SignatureDoesNotMatch);
        }

        Ok(credential)
    }
}

impl Authenticator for SigV4Authenticator {
    fn authorize<'a>(
        &'a self,
        request: &'a ApiRequest,
        context: &'a RequestContext,
    ) -> AuthFuture<'a> {
        Box::pin(async move {
            let credential = self.verify(request)?;
            if !credential.permits(context) {
                debug!(
                    access_key = %credential.access_key,
                    operation = %context.operation(),
                    resource = %context.resource(),
                    "credential scope does not cover request"
                );
                return Err(S3Error::AccessDenied {
                    message: format!(
                        "Not permitted to perform {} on {}",
                        context.operation(),
                        context.resource()
                    ),
                });
            }
            debug!("Auth OK for access key {}", credential.access_key);
            Ok(AuthInfo {
                access_key: credential.access_key.clone(),
                canonical_id: credential.owner_id.clone(),
                display_name: credential.display_name.clone(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ApiMethod, PROTOCOL_FAMILY_S3};
    use axum::http::{HeaderMap, Method};

    #[test]
    fn test_derive_signing_key() {
        // Example from the AWS SigV4 documentation.
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn test_parse_authorization_header() {
        let header = "AWS4-HMAC-SHA256 Credential=AKID/20260222/us-east-1/s3/aws4_request, SignedHeaders=host;x-amz-date, Signature=abc123";
        let parsed = parse_authorization_header(header).unwrap();
        assert_eq!(parsed.access_key_id, "AKID");
        assert_eq!(parsed.date_stamp, "20260222");
        assert_eq!(parsed.region, "us-east-1");
        assert_eq!(parsed.service, "s3");
        assert_eq!(parsed.signed_headers, "host;x-amz-date");
        assert_eq!(parsed.signature, "abc123");
        assert_eq!(parsed.credential_scope, "20260222/us-east-1/s3/aws4_request");
    }

    #[test]
    fn test_parse_authorization_header_errors() {
        assert!(parse_authorization_header("Basic abc").is_err());
        assert!(parse_authorization_header(
            "AWS4-HMAC-SHA256 SignedHeaders=host, Signature=abc"
        )
        .is_err());
        assert!(parse_authorization_header(
            "AWS4-HMAC-SHA256 Credential=AKID/20260222/us-east-1/s3/other, SignedHeaders=host, Signature=abc"
        )
        .is_err());
    }

    #[test]
    fn test_canonical_query() {
        assert_eq!(build_canonical_query_string(""), "");
        assert_eq!(build_canonical_query_string("b=2&a=1"), "a=1&b=2");
        assert_eq!(build_canonical_query_string("acl"), "acl=");
        assert_eq!(
            build_canonical_query_string("uploadId=a%2Fb&partNumber=1"),
            "partNumber=1&uploadId=a%2Fb"
        );
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
    }

    #[test]
    fn test_parse_amz_date() {
        assert_eq!(parse_amz_date("19700101T000000Z"), Some(0));
        assert_eq!(parse_amz_date("20000301T000000Z"), Some(951_868_800));
        assert_eq!(parse_amz_date("2000-03-01"), None);
        assert_eq!(parse_amz_date("20001301T000000Z"), None);
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  a   b \t c "), "a b c");
    }

    fn credential(read_only: bool) -> Credential {
        Credential {
            access_key: "AKID".to_string(),
            secret_key: "secret".to_string(),
            owner_id: "owner-1".to_string(),
            display_name: "Owner".to_string(),
            buckets: vec!["*".to_string()],
            read_only,
        }
    }

    /// Sign a PUT the way a client would. Uses `date` rather than
    /// `x-amz-date` so the clock skew check does not apply.
    fn signed_request(secret: &str) -> ApiRequest {
        let mut headers = HeaderMap::new();
        headers.insert("host", "localhost:9000".parse().unwrap());
        headers.insert("date", "Mon, 19 Oct 2026 10:00:00 GMT".parse().unwrap());
        let signed_headers = "date;host";
        let canonical = build_canonical_request(
            "PUT",
            "/bucket/key",
            "acl",
            &extract_headers_for_signing(&headers),
            signed_headers,
            UNSIGNED_PAYLOAD,
        );
        let scope = "20261019/us-east-1/s3/aws4_request";
        let sts = build_string_to_sign("Mon, 19 Oct 2026 10:00:00 GMT", scope, &canonical);
        let key = derive_signing_key(secret, "20261019", "us-east-1", "s3");
        let signature = compute_signature(&key, &sts);
        headers.insert(
            "authorization",
            format!(
                "AWS4-HMAC-SHA256 Credential=AKID/{scope}, SignedHeaders={signed_headers}, Signature={signature}"
            )
            .parse()
            .unwrap(),
        );
        ApiRequest::new(
            Method::PUT,
            "/bucket/key",
            Some("acl"),
            headers,
            "bucket",
            Some("key"),
        )
    }

    fn context_for(request: &ApiRequest, operation: ApiMethod) -> RequestContext {
        RequestContext::new(
            request.headers(),
            request.query(),
            request.bucket(),
            request.object_key(),
            None,
            false,
            operation,
            PROTOCOL_FAMILY_S3,
            None,
        )
    }

    #[tokio::test]
    async fn test_authorize_roundtrip() {
        let auth = SigV4Authenticator::new([credential(false)]);
        let request = signed_request("secret");
        let ctx = context_for(&request, ApiMethod::ObjectPutAcl);
        let info = auth.authorize(&request, &ctx).await.unwrap();
        assert_eq!(info.access_key, "AKID");
        assert_eq!(info.canonical_id, "owner-1");
    }

    #[tokio::test]
    async fn test_authorize_wrong_secret() {
        let auth = SigV4Authenticator::new([credential(false)]);
        let request = signed_request("not-the-secret");
        let ctx = context_for(&request, ApiMethod::ObjectPutAcl);
        assert!(matches!(
            auth.authorize(&request, &ctx).await,
            Err(S3Error::SignatureDoesNotMatch)
        ));
    }

    #[tokio::test]
    async fn test_authorize_unknown_key() {
        let auth = SigV4Authenticator::default();
        let request = signed_request("secret");
        let ctx = context_for(&request, ApiMethod::ObjectPutAcl);
        assert!(matches!(
            auth.authorize(&request, &ctx).await,
            Err(S3Error::InvalidAccessKeyId)
        ));
    }

    #[tokio::test]
    async fn test_authorize_anonymous_denied() {
        let auth = SigV4Authenticator::new([credential(false)]);
        let request = ApiRequest::new(Method::PUT, "/b", None, HeaderMap::new(), "b", None);
        let ctx = context_for(&request, ApiMethod::BucketPut);
        assert!(matches!(
            auth.authorize(&request, &ctx).await,
            Err(S3Error::AccessDenied { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_only_credential_limited_to_reads() {
        let auth = SigV4Authenticator::new([credential(true)]);
        let request = signed_request("secret");
        let read = context_for(&request, ApiMethod::ObjectGet);
        assert!(auth.authorize(&request, &read).await.is_ok());
        let write = context_for(&request, ApiMethod::ObjectPut);
        assert!(matches!(
            auth.authorize(&request, &write).await,
            Err(S3Error::AccessDenied { .. })
        ));
    }
}
