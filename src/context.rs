//! Authorization context: who is trying to do what to which resource.
//!
//! A [`RequestContext`] is built fresh for every authorization check and
//! never mutated afterwards.  Object copy builds two of them (a read of
//! the source, a write of the destination) rather than reusing one.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;

use axum::http::HeaderMap;

/// Protocol family tag carried by every context this gateway builds.
pub const PROTOCOL_FAMILY_S3: &str = "s3";

/// Every operation the gateway can authorize and dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ApiMethod {
    BucketDelete,
    BucketGet,
    BucketGetAcl,
    BucketHead,
    BucketPut,
    BucketPutAcl,
    CompleteMultipartUpload,
    InitiateMultipartUpload,
    ListMultipartUploads,
    ListParts,
    MultipartDelete,
    ObjectCopy,
    ObjectDelete,
    ObjectGet,
    ObjectGetAcl,
    ObjectHead,
    ObjectPut,
    ObjectPutAcl,
    ObjectPutPart,
    ServiceGet,
}

impl ApiMethod {
    /// All operations, in declaration order.
    pub const ALL: [ApiMethod; 20] = [
        ApiMethod::BucketDelete,
        ApiMethod::BucketGet,
        ApiMethod::BucketGetAcl,
        ApiMethod::BucketHead,
        ApiMethod::BucketPut,
        ApiMethod::BucketPutAcl,
        ApiMethod::CompleteMultipartUpload,
        ApiMethod::InitiateMultipartUpload,
        ApiMethod::ListMultipartUploads,
        ApiMethod::ListParts,
        ApiMethod::MultipartDelete,
        ApiMethod::ObjectCopy,
        ApiMethod::ObjectDelete,
        ApiMethod::ObjectGet,
        ApiMethod::ObjectGetAcl,
        ApiMethod::ObjectHead,
        ApiMethod::ObjectPut,
        ApiMethod::ObjectPutAcl,
        ApiMethod::ObjectPutPart,
        ApiMethod::ServiceGet,
    ];

    /// Stable camelCase name used in logs, metrics and policy evaluation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiMethod::BucketDelete => "bucketDelete",
            ApiMethod::BucketGet => "bucketGet",
            ApiMethod::BucketGetAcl => "bucketGetACL",
            ApiMethod::BucketHead => "bucketHead",
            ApiMethod::BucketPut => "bucketPut",
            ApiMethod::BucketPutAcl => "bucketPutACL",
            ApiMethod::CompleteMultipartUpload => "completeMultipartUpload",
            ApiMethod::InitiateMultipartUpload => "initiateMultipartUpload",
            ApiMethod::ListMultipartUploads => "listMultipartUploads",
            ApiMethod::ListParts => "listParts",
            ApiMethod::MultipartDelete => "multipartDelete",
            ApiMethod::ObjectCopy => "objectCopy",
            ApiMethod::ObjectDelete => "objectDelete",
            ApiMethod::ObjectGet => "objectGet",
            ApiMethod::ObjectGetAcl => "objectGetACL",
            ApiMethod::ObjectHead => "objectHead",
            ApiMethod::ObjectPut => "objectPut",
            ApiMethod::ObjectPutAcl => "objectPutACL",
            ApiMethod::ObjectPutPart => "objectPutPart",
            ApiMethod::ServiceGet => "serviceGet",
        }
    }

    /// Whether the operation addresses a single object (needs a key).
    pub fn is_object_level(&self) -> bool {
        matches!(
            self,
            ApiMethod::CompleteMultipartUpload
                | ApiMethod::InitiateMultipartUpload
                | ApiMethod::ListParts
                | ApiMethod::MultipartDelete
                | ApiMethod::ObjectCopy
                | ApiMethod::ObjectDelete
                | ApiMethod::ObjectGet
                | ApiMethod::ObjectGetAcl
                | ApiMethod::ObjectHead
                | ApiMethod::ObjectPut
                | ApiMethod::ObjectPutAcl
                | ApiMethod::ObjectPutPart
        )
    }

    /// Whether the operation only reads state.
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            ApiMethod::BucketGet
                | ApiMethod::BucketGetAcl
                | ApiMethod::BucketHead
                | ApiMethod::ListMultipartUploads
                | ApiMethod::ListParts
                | ApiMethod::ObjectGet
                | ApiMethod::ObjectGetAcl
                | ApiMethod::ObjectHead
                | ApiMethod::ServiceGet
        )
    }
}

impl fmt::Display for ApiMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable description of one authorization question.
#[derive(Debug, Clone)]
pub struct RequestContext {
    headers: HeaderMap,
    query: HashMap<String, String>,
    bucket: String,
    object_key: Option<String>,
    remote_addr: Option<IpAddr>,
    encrypted: bool,
    operation: ApiMethod,
    protocol_family: &'static str,
    location_constraint: Option<String>,
}

impl RequestContext {
    /// Assemble a context from request attributes.
    ///
    /// Total: callers validate their inputs first.  The object key is
    /// dropped for bucket-level operations so a stray key can never widen
    /// the resource a bucket operation is authorized against.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        headers: &HeaderMap,
        query: &HashMap<String, String>,
        bucket: &str,
        object_key: Option<&str>,
        remote_addr: Option<IpAddr>,
        encrypted: bool,
        operation: ApiMethod,
        protocol_family: &'static str,
        location_constraint: Option<&str>,
    ) -> Self {
        let object_key = if operation.is_object_level() {
            object_key.map(str::to_string)
        } else {
            None
        };
        Self {
            headers: headers.clone(),
            query: query.clone(),
            bucket: bucket.to_string(),
            object_key,
            remote_addr,
            encrypted,
            operation,
            protocol_family,
            location_constraint: location_constraint.map(str::to_string),
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn query(&self) -> &HashMap<String, String> {
        &self.query
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn object_key(&self) -> Option<&str> {
        self.object_key.as_deref()
    }

    pub fn remote_addr(&self) -> Option<IpAddr> {
        self.remote_addr
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    pub fn operation(&self) -> ApiMethod {
        self.operation
    }

    pub fn protocol_family(&self) -> &'static str {
        self.protocol_family
    }

    pub fn location_constraint(&self) -> Option<&str> {
        self.location_constraint.as_deref()
    }

    /// `bucket` or `bucket/key`, as used in log lines.
    pub fn resource(&self) -> String {
        match &self.object_key {
            Some(key) => format!("{}/{}", self.bucket, key),
            None => self.bucket.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(operation: ApiMethod, key: Option<&str>) -> RequestContext {
        let mut headers = HeaderMap::new();
        headers.insert("Content-Length", "5".parse().unwrap());
        let mut query = HashMap::new();
        query.insert("acl".to_string(), String::new());
        RequestContext::new(
            &headers,
            &query,
            "bucket",
            key,
            Some("127.0.0.1".parse().unwrap()),
            true,
            operation,
            PROTOCOL_FAMILY_S3,
            Some("us-west-1"),
        )
    }

    #[test]
    fn test_object_operation_keeps_key() {
        let ctx = build(ApiMethod::ObjectPut, Some("a/b.txt"));
        assert_eq!(ctx.object_key(), Some("a/b.txt"));
        assert_eq!(ctx.resource(), "bucket/a/b.txt");
        assert_eq!(ctx.operation(), ApiMethod::ObjectPut);
        assert_eq!(ctx.protocol_family(), "s3");
        assert!(ctx.is_encrypted());
        assert_eq!(ctx.location_constraint(), Some("us-west-1"));
    }

    #[test]
    fn test_bucket_operation_drops_key() {
        let ctx = build(ApiMethod::BucketPutAcl, Some("stray"));
        assert_eq!(ctx.object_key(), None);
        assert_eq!(ctx.resource(), "bucket");
    }

    #[test]
    fn test_headers_case_insensitive() {
        let ctx = build(ApiMethod::ObjectGet, Some("k"));
        assert_eq!(ctx.headers().get("content-length").unwrap(), "5");
        assert!(ctx.query().contains_key("acl"));
    }

    #[test]
    fn test_method_names() {
        assert_eq!(ApiMethod::BucketPutAcl.as_str(), "bucketPutACL");
        assert_eq!(ApiMethod::ObjectPutPart.to_string(), "objectPutPart");
        let mut names: Vec<_> = ApiMethod::ALL.iter().map(|m| m.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), ApiMethod::ALL.len());
    }

    #[test]
    fn test_read_only_classification() {
        assert!(ApiMethod::ObjectGet.is_read_only());
        assert!(!ApiMethod::ObjectPut.is_read_only());
        assert!(!ApiMethod::ObjectCopy.is_read_only());
        assert!(!ApiMethod::BucketPut.is_read_only());
    }
}
