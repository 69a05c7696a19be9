//! PUT request classification and routing.
//!
//! A PUT is one of six operations, told apart by path shape, query
//! parameters and headers.  The checks form a priority cascade: for an
//! object key, `partNumber` wins over `acl`, which wins over
//! `x-amz-copy-source`, which wins over a plain object write.
//!
//! Everything that can be validated without credentials (Content-MD5,
//! Content-Length, the bucket configuration XML) is validated in
//! [`prepare`], before [`Api::authorize_and_dispatch`] is ever called.

use std::collections::HashMap;

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use tracing::{debug, trace};

use crate::api::{Api, HandlerOutput};
use crate::context::ApiMethod;
use crate::errors::S3Error;
use crate::integrity::{parse_content_length, validate_content_md5, EMPTY_PAYLOAD_MD5};
use crate::request::ApiRequest;
use crate::routes::response::{etag_headers, response_no_body, response_xml_body};
use crate::xml::parse_create_bucket_configuration;

/// The six things a PUT can mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOperation {
    BucketPutAcl,
    BucketCreate,
    ObjectPutPart,
    ObjectPutAcl,
    ObjectCopy,
    ObjectPut,
}

impl PutOperation {
    pub fn api_method(self) -> ApiMethod {
        match self {
            PutOperation::BucketPutAcl => ApiMethod::BucketPutAcl,
            PutOperation::BucketCreate => ApiMethod::BucketPut,
            PutOperation::ObjectPutPart => ApiMethod::ObjectPutPart,
            PutOperation::ObjectPutAcl => ApiMethod::ObjectPutAcl,
            PutOperation::ObjectCopy => ApiMethod::ObjectCopy,
            PutOperation::ObjectPut => ApiMethod::ObjectPut,
        }
    }

    pub fn is_object_level(self) -> bool {
        !matches!(self, PutOperation::BucketPutAcl | PutOperation::BucketCreate)
    }

    /// Operations that need the whole body in memory before dispatch.
    fn buffers_body(self) -> bool {
        matches!(
            self,
            PutOperation::BucketPutAcl | PutOperation::BucketCreate | PutOperation::ObjectPutAcl
        )
    }
}

/// An object key that addresses something inside the bucket.
///
/// `""` and `"/"` address the bucket itself.
pub fn effective_object_key(key: Option<&str>) -> Option<&str> {
    key.filter(|k| !k.is_empty() && *k != "/")
}

/// Decide which operation a PUT represents.  Pure; the body is not consulted.
///
/// `acl` counts as soon as it appears; an empty `partNumber` or
/// `x-amz-copy-source` counts as absent.
pub fn classify(
    object_key: Option<&str>,
    query: &HashMap<String, String>,
    headers: &HeaderMap,
) -> PutOperation {
    if effective_object_key(object_key).is_none() {
        return if query.contains_key("acl") {
            PutOperation::BucketPutAcl
        } else {
            PutOperation::BucketCreate
        };
    }

    if query.get("partNumber").is_some_and(|v| !v.is_empty()) {
        PutOperation::ObjectPutPart
    } else if query.contains_key("acl") {
        PutOperation::ObjectPutAcl
    } else if headers
        .get("x-amz-copy-source")
        .is_some_and(|v| !v.as_bytes().is_empty())
    {
        PutOperation::ObjectCopy
    } else {
        PutOperation::ObjectPut
    }
}

/// A classified, validated PUT waiting for authorization.
#[derive(Debug)]
pub struct PendingWrite {
    operation: PutOperation,
    request: ApiRequest,
    /// Declared payload length for streamed writes.
    content_length: Option<u64>,
    /// Location constraint from a bucket configuration body.
    location_constraint: Option<String>,
}

impl PendingWrite {
    pub fn operation(&self) -> PutOperation {
        self.operation
    }

    pub fn request(&self) -> &ApiRequest {
        &self.request
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn location_constraint(&self) -> Option<&str> {
        self.location_constraint.as_deref()
    }
}

/// Classify `request`, read or attach its body, and run every
/// credential-independent check.
pub async fn prepare(
    request: ApiRequest,
    body: Body,
    max_buffered_body: usize,
) -> Result<PendingWrite, S3Error> {
    let operation = classify(request.object_key(), request.query(), request.headers());
    debug!(
        operation = operation.api_method().as_str(),
        bucket = request.bucket(),
        key = request.object_key().unwrap_or_default(),
        "routing request"
    );

    let mut request = request;
    if operation.is_object_level() {
        let content_md5 = validate_content_md5(request.headers())?;
        request = request.with_content_md5(content_md5);
    }

    let mut content_length = None;
    let mut location_constraint = None;

    if operation.buffers_body() {
        let post = buffer_body(body, max_buffered_body).await?;
        if operation == PutOperation::BucketCreate && !post.is_empty() {
            let constraint = parse_create_bucket_configuration(&post).map_err(|err| {
                debug!("request xml is malformed");
                err
            })?;
            trace!(location_constraint = %constraint, "location constraint");
            location_constraint = Some(constraint);
        }
        request = request.with_post(post);
    } else if operation != PutOperation::ObjectCopy {
        let declared = parse_content_length(request.headers())?;
        content_length = Some(declared);
        request = request
            .with_content_length(Some(declared))
            .with_stream(body);
    }

    Ok(PendingWrite {
        operation,
        request,
        content_length,
        location_constraint,
    })
}

/// Authorize and dispatch a prepared write, then emit its response.
pub async fn execute(api: &Api, pending: PendingWrite) -> Response {
    let result = api
        .authorize_and_dispatch(
            pending.operation.api_method(),
            &pending.request,
            pending.location_constraint.as_deref(),
        )
        .await;

    match pending.operation {
        PutOperation::BucketPutAcl | PutOperation::BucketCreate | PutOperation::ObjectPutAcl => {
            response_no_body(result.map(|_| HeaderMap::new()), StatusCode::OK)
        }
        PutOperation::ObjectCopy => response_xml_body(result.and_then(copy_result_xml)),
        PutOperation::ObjectPutPart | PutOperation::ObjectPut => {
            let headers = result
                .and_then(|output| reported_digest(output, pending.content_length))
                .and_then(|digest| etag_headers(&digest));
            response_no_body(headers, StatusCode::OK)
        }
    }
}

/// Route one PUT from classification to response.
pub async fn route_put(
    api: &Api,
    request: ApiRequest,
    body: Body,
    max_buffered_body: usize,
) -> Response {
    match prepare(request, body, max_buffered_body).await {
        Ok(pending) => execute(api, pending).await,
        Err(err) => response_no_body(Err(err), StatusCode::OK),
    }
}

/// The digest a write reports: the empty-payload constant when nothing was
/// declared, otherwise whatever the handler computed.
fn reported_digest(output: HandlerOutput, declared: Option<u64>) -> Result<String, S3Error> {
    if declared == Some(0) {
        return Ok(EMPTY_PAYLOAD_MD5.to_string());
    }
    output
        .etag
        .ok_or_else(|| S3Error::InternalError(anyhow::anyhow!("handler reported no digest")))
}

fn copy_result_xml(output: HandlerOutput) -> Result<String, S3Error> {
    output
        .xml
        .ok_or_else(|| S3Error::InternalError(anyhow::anyhow!("copy produced no result document")))
}

/// Read `body` to the end, failing once more than `limit` bytes arrive.
async fn buffer_body(body: Body, limit: usize) -> Result<Bytes, S3Error> {
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => {
            Err(S3Error::MaxMessageLengthExceeded)
        }
        Err(err) => Err(S3Error::InternalError(anyhow::anyhow!(
            "failed to read request body: {err}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::parse_query;
    use axum::http::Method;

    fn request(path_key: Option<&str>, query: &str, headers: &[(&'static str, &str)]) -> ApiRequest {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(*name, value.parse().unwrap());
        }
        let raw_query = (!query.is_empty()).then_some(query);
        ApiRequest::new(Method::PUT, "/bucket", raw_query, map, "bucket", path_key)
    }

    fn classify_parts(key: Option<&str>, query: &str, headers: &[(&'static str, &str)]) -> PutOperation {
        let req = request(key, query, headers);
        classify(req.object_key(), &parse_query((!query.is_empty()).then_some(query)), req.headers())
    }

    #[test]
    fn test_bucket_level_classification() {
        assert_eq!(classify_parts(None, "acl", &[]), PutOperation::BucketPutAcl);
        assert_eq!(classify_parts(None, "", &[]), PutOperation::BucketCreate);
        assert_eq!(classify_parts(Some("/"), "", &[]), PutOperation::BucketCreate);
        assert_eq!(classify_parts(Some(""), "acl", &[]), PutOperation::BucketPutAcl);
        // Object-only parameters do not apply at bucket level.
        assert_eq!(
            classify_parts(None, "partNumber=1", &[("x-amz-copy-source", "a/b")]),
            PutOperation::BucketCreate
        );
    }

    #[test]
    fn test_object_level_priority() {
        let copy = [("x-amz-copy-source", "src/key")];
        assert_eq!(
            classify_parts(Some("k"), "partNumber=1&acl", &copy),
            PutOperation::ObjectPutPart
        );
        assert_eq!(classify_parts(Some("k"), "acl", &copy), PutOperation::ObjectPutAcl);
        assert_eq!(classify_parts(Some("k"), "", &copy), PutOperation::ObjectCopy);
        assert_eq!(classify_parts(Some("k"), "", &[]), PutOperation::ObjectPut);
        assert_eq!(
            classify_parts(Some("k"), "partNumber=2&uploadId=u", &[]),
            PutOperation::ObjectPutPart
        );
    }

    #[test]
    fn test_empty_values_fall_through() {
        assert_eq!(classify_parts(Some("k"), "partNumber=", &[]), PutOperation::ObjectPut);
        assert_eq!(
            classify_parts(Some("k"), "partNumber=&acl", &[]),
            PutOperation::ObjectPutAcl
        );
        assert_eq!(
            classify_parts(Some("k"), "", &[("x-amz-copy-source", "")]),
            PutOperation::ObjectPut
        );
    }

    #[test]
    fn test_classification_is_idempotent() {
        let req = request(Some("k"), "acl&partNumber=3", &[("x-amz-copy-source", "a/b")]);
        let first = classify(req.object_key(), req.query(), req.headers());
        let second = classify(req.object_key(), req.query(), req.headers());
        assert_eq!(first, second);
        assert_eq!(first, PutOperation::ObjectPutPart);
    }

    #[tokio::test]
    async fn test_prepare_outcome_is_repeatable() {
        let invalid = || {
            request(
                Some("k"),
                "partNumber=2",
                &[("content-md5", "bogus"), ("content-length", "3")],
            )
        };
        let first = prepare(invalid(), Body::from("abc"), 1024).await.unwrap_err();
        let second = prepare(invalid(), Body::from("abc"), 1024).await.unwrap_err();
        assert!(matches!(first, S3Error::InvalidDigest));
        assert_eq!(first.code(), second.code());

        let missing = || request(Some("k"), "partNumber=2", &[]);
        let first = prepare(missing(), Body::empty(), 1024).await.unwrap_err();
        let second = prepare(missing(), Body::empty(), 1024).await.unwrap_err();
        assert!(matches!(first, S3Error::MissingContentLength));
        assert_eq!(first.code(), second.code());
    }

    #[test]
    fn test_api_methods() {
        assert_eq!(PutOperation::BucketCreate.api_method(), ApiMethod::BucketPut);
        assert_eq!(PutOperation::ObjectPutAcl.api_method(), ApiMethod::ObjectPutAcl);
        assert!(PutOperation::ObjectCopy.is_object_level());
        assert!(!PutOperation::BucketPutAcl.is_object_level());
    }

    #[tokio::test]
    async fn test_prepare_requires_content_length() {
        let err = prepare(request(Some("k"), "", &[]), Body::empty(), 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, S3Error::MissingContentLength));

        let err = prepare(
            request(Some("k"), "partNumber=1", &[("content-length", "ten")]),
            Body::empty(),
            1024,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, S3Error::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn test_prepare_rejects_bad_digest_before_anything_else() {
        // Even a copy (which needs no Content-Length) validates Content-MD5.
        let err = prepare(
            request(
                Some("k"),
                "",
                &[("x-amz-copy-source", "a/b"), ("content-md5", "nope")],
            ),
            Body::empty(),
            1024,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, S3Error::InvalidDigest));
    }

    #[tokio::test]
    async fn test_prepare_normalizes_digest() {
        let pending = prepare(
            request(
                Some("k"),
                "",
                &[("content-length", "11"), ("content-md5", "XrY7u+Ae7tCTyyK7j1rNww==")],
            ),
            Body::from("hello world"),
            1024,
        )
        .await
        .unwrap();
        assert_eq!(pending.operation(), PutOperation::ObjectPut);
        assert_eq!(pending.content_length(), Some(11));
        assert_eq!(
            pending.request().content_md5(),
            Some("5eb63bbbe01eeed093cb22bb8f5acdc3")
        );
        assert!(pending.request().take_stream().is_some());
    }

    #[tokio::test]
    async fn test_prepare_bucket_create_parses_configuration() {
        let xml = "<CreateBucketConfiguration><LocationConstraint>us-west-1</LocationConstraint></CreateBucketConfiguration>";
        let pending = prepare(request(None, "", &[]), Body::from(xml), 1024)
            .await
            .unwrap();
        assert_eq!(pending.operation(), PutOperation::BucketCreate);
        assert_eq!(pending.location_constraint(), Some("us-west-1"));

        let pending = prepare(request(None, "", &[]), Body::empty(), 1024)
            .await
            .unwrap();
        assert_eq!(pending.location_constraint(), None);

        let err = prepare(
            request(None, "", &[]),
            Body::from("<CreateBucketConfiguration/>"),
            1024,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, S3Error::MalformedXML));
    }

    #[tokio::test]
    async fn test_prepare_buffers_acl_body() {
        let pending = prepare(request(Some("k"), "acl", &[]), Body::from("<acl/>"), 1024)
            .await
            .unwrap();
        assert_eq!(pending.request().post(), Bytes::from_static(b"<acl/>"));

        let err = prepare(request(None, "acl", &[]), Body::from(vec![b'x'; 64]), 16)
            .await
            .unwrap_err();
        assert!(matches!(err, S3Error::MaxMessageLengthExceeded));
    }

    #[test]
    fn test_reported_digest() {
        let output = HandlerOutput {
            etag: Some("0123".into()),
            xml: None,
        };
        assert_eq!(reported_digest(output.clone(), Some(0)).unwrap(), EMPTY_PAYLOAD_MD5);
        assert_eq!(reported_digest(output, Some(4)).unwrap(), "0123");
        assert!(reported_digest(HandlerOutput::default(), Some(4)).is_err());
    }
}
