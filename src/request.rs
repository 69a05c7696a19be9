//! The inbound request as seen by the authenticator and the handlers.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;

use axum::body::Body;
use axum::http::{HeaderMap, Method};
use bytes::Bytes;

/// Parse a raw query string into a map.
///
/// Keys without a value (`?acl`, `?uploads`) map to an empty string.
pub fn parse_query(raw: Option<&str>) -> HashMap<String, String> {
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
                let decoded = percent_encoding::percent_decode_str(part)
                    .decode_utf8_lossy()
                    .into_owned();
                map.insert(decoded, String::new());
            }
        }
    }
    map
}

/// One S3 request after path splitting, owned by the task serving it.
///
/// Streaming payloads sit behind a mutex so a handler holding `&ApiRequest`
/// can take ownership of the body exactly once.
#[derive(Debug)]
pub struct ApiRequest {
    method: Method,
    path: String,
    raw_query: String,
    query: HashMap<String, String>,
    headers: HeaderMap,
    bucket: String,
    object_key: Option<String>,
    remote_addr: Option<IpAddr>,
    encrypted: bool,
    content_md5: Option<String>,
    content_length: Option<u64>,
    post: Option<Bytes>,
    stream: Mutex<Option<Body>>,
}

impl ApiRequest {
    /// Build a request without payload state.
    pub fn new(
        method: Method,
        path: &str,
        raw_query: Option<&str>,
        headers: HeaderMap,
        bucket: &str,
        object_key: Option<&str>,
    ) -> Self {
        Self {
            method,
            path: path.to_string(),
            raw_query: raw_query.unwrap_or_default().to_string(),
            query: parse_query(raw_query),
            headers,
            bucket: bucket.to_string(),
            object_key: object_key.map(str::to_string),
            remote_addr: None,
            encrypted: false,
            content_md5: None,
            content_length: None,
            post: None,
            stream: Mutex::new(None),
        }
    }

    pub fn with_peer(mut self, remote_addr: Option<IpAddr>, encrypted: bool) -> Self {
        self.remote_addr = remote_addr;
        self.encrypted = encrypted;
        self
    }

    /// Normalized (hex) Content-MD5 the handler must check the payload against.
    pub fn with_content_md5(mut self, content_md5: Option<String>) -> Self {
        self.content_md5 = content_md5;
        self
    }

    pub fn with_content_length(mut self, content_length: Option<u64>) -> Self {
        self.content_length = content_length;
        self
    }

    /// Attach a fully buffered body (ACL puts, bucket creation).
    pub fn with_post(mut self, post: Bytes) -> Self {
        self.post = Some(post);
        self
    }

    /// Attach a payload the handler streams itself (object writes, parts).
    pub fn with_stream(mut self, body: Body) -> Self {
        self.stream = Mutex::new(Some(body));
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn raw_query(&self) -> &str {
        &self.raw_query
    }

    pub fn query(&self) -> &HashMap<String, String> {
        &self.query
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
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

    pub fn content_md5(&self) -> Option<&str> {
        self.content_md5.as_deref()
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// The buffered body, empty when nothing was buffered.
    pub fn post(&self) -> Bytes {
        self.post.clone().unwrap_or_default()
    }

    /// Take the streaming body. Returns `None` on the second call.
    pub fn take_stream(&self) -> Option<Body> {
        self.stream.lock().ok().and_then(|mut slot| slot.take())
    }
}
