//! In-memory gateway backing the PUT-side operations.
//!
//! Buckets, objects and uploaded parts live in
//! `tokio::sync::RwLock<HashMap<...>>` maps.  Nothing is persisted.
//!
//! Object and part payloads arrive as a streaming body; the MD5 is
//! computed while the body is drained and compared against the request's
//! normalized Content-MD5, if any.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use bytes::{Bytes, BytesMut};
use garde::Validate;
use http_body_util::BodyExt;
use md5::{Digest, Md5};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::api::{
    ApiHandler, DispatchTable, HandlerArgs, HandlerFuture, HandlerOutput, IncompleteDispatchTable,
};
use crate::auth::AuthInfo;
use crate::context::ApiMethod;
use crate::errors::S3Error;
use crate::handlers::acl::{resolve_acl, Acl};
use crate::handlers::NotImplementedHandler;
use crate::metrics;
use crate::request::ApiRequest;
use crate::xml::render_copy_object_result;

/// Largest part number S3 accepts.
const MAX_PART_NUMBER: u32 = 10_000;

#[derive(Debug, Clone)]
pub struct BucketRecord {
    pub owner_id: String,
    pub region: String,
    pub created_at: String,
    pub acl: Acl,
}

#[derive(Debug, Clone)]
pub struct ObjectRecord {
    pub data: Bytes,
    /// Hex MD5, unquoted.
    pub etag: String,
    pub owner_id: String,
    pub last_modified: String,
    pub acl: Acl,
}

/// Part key: (bucket, object key, upload id, part number).
type PartKey = (String, String, String, u32);

/// Bucket name input validated with S3 naming rules.
#[derive(Debug, Validate)]
struct BucketNameInput {
    #[garde(length(min = 3, max = 63), pattern(r"^[a-z0-9][a-z0-9.\-]*[a-z0-9]$"))]
    name: String,
}

/// Why a name that passes the character rules is still unusable.
fn reserved_name_reason(name: &str) -> Option<&'static str> {
    if looks_like_ipv4(name) {
        Some("must not be formatted as an IP address")
    } else if name.starts_with("xn--") || name.ends_with("-s3alias") || name.ends_with("--ol-s3") {
        Some("uses a reserved prefix or suffix")
    } else if name.contains("..") {
        Some("must not contain adjacent periods")
    } else {
        None
    }
}

fn looks_like_ipv4(s: &str) -> bool {
    let parts: Vec<&str> = s.split('.').collect();
    parts.len() == 4 && parts.iter().all(|p| p.parse::<u8>().is_ok())
}

/// Check a bucket name against S3 naming rules.
pub fn validate_bucket_name(name: &str) -> Result<(), S3Error> {
    let input = BucketNameInput {
        name: name.to_string(),
    };
    let reason = match input.validate() {
        Err(report) => Some(report.to_string()),
        Ok(()) => reserved_name_reason(name).map(str::to_string),
    };
    match reason {
        Some(reason) => {
            debug!(bucket = name, reason = %reason, "invalid bucket name");
            Err(S3Error::InvalidBucketName {
                name: name.to_string(),
            })
        }
        None => Ok(()),
    }
}

/// In-memory bucket and object store.
#[derive(Debug)]
pub struct MemoryGateway {
    default_region: String,
    buckets: RwLock<HashMap<String, BucketRecord>>,
    objects: RwLock<HashMap<(String, String), ObjectRecord>>,
    parts: RwLock<HashMap<PartKey, ObjectRecord>>,
}

impl MemoryGateway {
    /// Buckets created without a location constraint land in `default_region`.
    pub fn new(default_region: &str) -> Self {
        Self {
            default_region: default_region.to_string(),
            buckets: RwLock::new(HashMap::new()),
            objects: RwLock::new(HashMap::new()),
            parts: RwLock::new(HashMap::new()),
        }
    }

    /// Dispatch table binding the PUT operations to this gateway and every
    /// other operation to `NotImplemented`.
    pub fn dispatch_table(self: &Arc<Self>) -> Result<DispatchTable, IncompleteDispatchTable> {
        let mut builder = DispatchTable::builder();
        for method in [
            ApiMethod::BucketPut,
            ApiMethod::BucketPutAcl,
            ApiMethod::ObjectPut,
            ApiMethod::ObjectPutAcl,
            ApiMethod::ObjectPutPart,
            ApiMethod::ObjectCopy,
        ] {
            builder = builder.register(
                method,
                Arc::new(GatewayHandler {
                    gateway: Arc::clone(self),
                    method,
                }),
            );
        }
        builder
            .register_remaining(Arc::new(NotImplementedHandler))
            .build()
    }

    pub async fn bucket(&self, name: &str) -> Option<BucketRecord> {
        self.buckets.read().await.get(name).cloned()
    }

    pub async fn object(&self, bucket: &str, key: &str) -> Option<ObjectRecord> {
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub async fn part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
    ) -> Option<ObjectRecord> {
        self.parts
            .read()
            .await
            .get(&(
                bucket.to_string(),
                key.to_string(),
                upload_id.to_string(),
                part_number,
            ))
            .cloned()
    }

    async fn require_bucket(&self, name: &str) -> Result<BucketRecord, S3Error> {
        self.bucket(name).await.ok_or_else(|| S3Error::NoSuchBucket {
            bucket: name.to_string(),
        })
    }

    // ── Bucket operations ───────────────────────────────────────────

    async fn create_bucket(
        &self,
        auth: &AuthInfo,
        request: &ApiRequest,
        location_constraint: Option<String>,
    ) -> Result<HandlerOutput, S3Error> {
        let name = request.bucket();
        validate_bucket_name(name)?;
        let acl = resolve_acl(request.headers(), b"", &auth.canonical_id, &auth.display_name)?;
        let region = location_constraint.unwrap_or_else(|| self.default_region.clone());

        let mut buckets = self.buckets.write().await;
        if let Some(existing) = buckets.get(name) {
            if existing.owner_id != auth.canonical_id {
                return Err(S3Error::BucketAlreadyExists {
                    bucket: name.to_string(),
                });
            }
            // Re-creating your own bucket in the default region is a no-op.
            if region == self.default_region {
                return Ok(HandlerOutput::default());
            }
            return Err(S3Error::BucketAlreadyOwnedByYou {
                bucket: name.to_string(),
            });
        }

        info!(bucket = name, region = %region, "bucket created");
        buckets.insert(
            name.to_string(),
            BucketRecord {
                owner_id: auth.canonical_id.clone(),
                region,
                created_at: now_iso8601(),
                acl,
            },
        );
        Ok(HandlerOutput::default())
    }

    async fn put_bucket_acl(&self, request: &ApiRequest) -> Result<HandlerOutput, S3Error> {
        let name = request.bucket();
        let mut buckets = self.buckets.write().await;
        let record = buckets.get_mut(name).ok_or_else(|| S3Error::NoSuchBucket {
            bucket: name.to_string(),
        })?;
        let owner = record.acl.owner.clone();
        record.acl = resolve_acl(
            request.headers(),
            &request.post(),
            &owner.id,
            &owner.display_name,
        )?;
        Ok(HandlerOutput::default())
    }

    // ── Object operations ───────────────────────────────────────────

    async fn put_object(
        &self,
        auth: &AuthInfo,
        request: &ApiRequest,
    ) -> Result<HandlerOutput, S3Error> {
        let (bucket, key) = object_target(request)?;
        self.require_bucket(bucket).await?;
        let acl = resolve_acl(request.headers(), b"", &auth.canonical_id, &auth.display_name)?;
        let (data, etag) = receive_payload(request).await?;

        debug!(bucket, key, size = data.len(), etag = %etag, "object stored");
        self.objects.write().await.insert(
            (bucket.to_string(), key.to_string()),
            ObjectRecord {
                data,
                etag: etag.clone(),
                owner_id: auth.canonical_id.clone(),
                last_modified: now_iso8601(),
                acl,
            },
        );
        Ok(HandlerOutput {
            etag: Some(etag),
            xml: None,
        })
    }

    async fn put_part(&self, auth: &AuthInfo, request: &ApiRequest) -> Result<HandlerOutput, S3Error> {
        let (bucket, key) = object_target(request)?;
        let part_number = request
            .query()
            .get("partNumber")
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|n| (1..=MAX_PART_NUMBER).contains(n))
            .ok_or_else(|| S3Error::InvalidArgument {
                message: format!("Part number must be an integer between 1 and {MAX_PART_NUMBER}"),
            })?;
        let upload_id = request
            .query()
            .get("uploadId")
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or_else(|| S3Error::InvalidArgument {
                message: "Missing uploadId".to_string(),
            })?;
        self.require_bucket(bucket).await?;
        let (data, etag) = receive_payload(request).await?;

        debug!(bucket, key, upload_id = %upload_id, part_number, etag = %etag, "part stored");
        self.parts.write().await.insert(
            (bucket.to_string(), key.to_string(), upload_id, part_number),
            ObjectRecord {
                data,
                etag: etag.clone(),
                owner_id: auth.canonical_id.clone(),
                last_modified: now_iso8601(),
                acl: Acl::private(&auth.canonical_id, &auth.display_name),
            },
        );
        Ok(HandlerOutput {
            etag: Some(etag),
            xml: None,
        })
    }

    async fn put_object_acl(&self, request: &ApiRequest) -> Result<HandlerOutput, S3Error> {
        let (bucket, key) = object_target(request)?;
        self.require_bucket(bucket).await?;
        let mut objects = self.objects.write().await;
        let record = objects
            .get_mut(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| S3Error::NoSuchKey {
                key: key.to_string(),
            })?;
        let owner = record.acl.owner.clone();
        record.acl = resolve_acl(
            request.headers(),
            &request.post(),
            &owner.id,
            &owner.display_name,
        )?;
        Ok(HandlerOutput::default())
    }

    async fn copy_object(
        &self,
        auth: &AuthInfo,
        request: &ApiRequest,
        source_bucket: &str,
        source_object: &str,
    ) -> Result<HandlerOutput, S3Error> {
        let (bucket, key) = object_target(request)?;
        self.require_bucket(source_bucket).await?;
        self.require_bucket(bucket).await?;
        let source = self
            .object(source_bucket, source_object)
            .await
            .ok_or_else(|| S3Error::NoSuchKey {
                key: source_object.to_string(),
            })?;
        let acl = resolve_acl(request.headers(), b"", &auth.canonical_id, &auth.display_name)?;

        let last_modified = now_iso8601();
        let xml = render_copy_object_result(&source.etag, &last_modified);
        self.objects.write().await.insert(
            (bucket.to_string(), key.to_string()),
            ObjectRecord {
                data: source.data,
                etag: source.etag.clone(),
                owner_id: auth.canonical_id.clone(),
                last_modified,
                acl,
            },
        );
        debug!(source_bucket, source_object, bucket, key, "object copied");
        Ok(HandlerOutput {
            etag: Some(source.etag),
            xml: Some(xml),
        })
    }
}

/// Binds one [`ApiMethod`] to a [`MemoryGateway`] operation.
struct GatewayHandler {
    gateway: Arc<MemoryGateway>,
    method: ApiMethod,
}

impl ApiHandler for GatewayHandler {
    fn call<'a>(
        &'a self,
        auth_info: AuthInfo,
        request: &'a ApiRequest,
        args: HandlerArgs,
    ) -> HandlerFuture<'a> {
        Box::pin(async move {
            let gateway = &self.gateway;
            match (self.method, args) {
                (ApiMethod::BucketPut, HandlerArgs::BucketPut { location_constraint }) => {
                    gateway
                        .create_bucket(&auth_info, request, location_constraint)
                        .await
                }
                (ApiMethod::BucketPutAcl, _) => gateway.put_bucket_acl(request).await,
                (ApiMethod::ObjectPut, _) => gateway.put_object(&auth_info, request).await,
                (ApiMethod::ObjectPutPart, _) => gateway.put_part(&auth_info, request).await,
                (ApiMethod::ObjectPutAcl, _) => gateway.put_object_acl(request).await,
                (
                    ApiMethod::ObjectCopy,
                    HandlerArgs::ObjectCopy {
                        source_bucket,
                        source_object,
                    },
                ) => {
                    gateway
                        .copy_object(&auth_info, request, &source_bucket, &source_object)
                        .await
                }
                (method, args) => Err(S3Error::InternalError(anyhow::anyhow!(
                    "{method} dispatched with unexpected arguments {args:?}"
                ))),
            }
        })
    }
}

fn object_target(request: &ApiRequest) -> Result<(&str, &str), S3Error> {
    let key = request.object_key().ok_or_else(|| S3Error::InvalidArgument {
        message: "Object key is required".to_string(),
    })?;
    Ok((request.bucket(), key))
}

/// Drain the request's streaming body, hashing as it goes.
///
/// Fails with `IncompleteBody` when the byte count differs from the
/// declared Content-Length, and `BadDigest` when a Content-MD5 was given
/// and does not match.  Returns the payload and its hex MD5.
async fn receive_payload(request: &ApiRequest) -> Result<(Bytes, String), S3Error> {
    let mut body: Body = request.take_stream().unwrap_or_else(Body::empty);
    let declared = request.content_length();

    let mut hasher = Md5::new();
    let mut data = BytesMut::new();
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|e| {
            S3Error::InternalError(anyhow::anyhow!("failed to read request body: {e}"))
        })?;
        if let Ok(chunk) = frame.into_data() {
            hasher.update(&chunk);
            data.extend_from_slice(&chunk);
            if declared.is_some_and(|limit| data.len() as u64 > limit) {
                return Err(S3Error::IncompleteBody);
            }
        }
    }

    if declared.is_some_and(|limit| data.len() as u64 != limit) {
        return Err(S3Error::IncompleteBody);
    }

    let etag = hex::encode(hasher.finalize());
    if let Some(expected) = request.content_md5() {
        if expected != etag {
            debug!(expected, computed = %etag, "content-md5 mismatch");
            return Err(S3Error::BadDigest);
        }
    }

    metrics::record_bytes_received(data.len() as u64);
    Ok((data.freeze(), etag))
}

/// Current time as ISO-8601 with millisecond precision.
fn now_iso8601() -> String {
    let since_epoch = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = since_epoch.as_secs();
    let (year, month, day) = civil_from_days(secs / 86_400);
    let day_secs = secs % 86_400;

    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{:03}Z",
        day_secs / 3600,
        (day_secs % 3600) / 60,
        day_secs % 60,
        since_epoch.subsec_millis()
    )
}

/// Days since the Unix epoch to a proleptic Gregorian (year, month, day).
fn civil_from_days(days: u64) -> (i64, u32, u32) {
    let z = days as i64 + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe as i64 + era * 400 + i64::from(month <= 2);
    (year, month, day)
}
