//! Authorization orchestration and operation dispatch.
//!
//! [`Api::authorize_and_dispatch`] is the only way a routed request reaches
//! a storage handler.  It builds the [`RequestContext`] for the operation,
//! asks the installed [`Authenticator`] for a verified identity, and only
//! then looks the operation up in the [`DispatchTable`].
//!
//! Object copy is authorized twice, strictly in sequence: a read of the
//! source first, then a write of the destination.  The destination check
//! is never attempted when the source check fails.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace};

use crate::auth::{AuthInfo, Authenticator};
use crate::context::{ApiMethod, RequestContext, PROTOCOL_FAMILY_S3};
use crate::errors::S3Error;
use crate::metrics;
use crate::request::ApiRequest;

/// Future returned by [`ApiHandler::call`].
pub type HandlerFuture<'a> =
    Pin<Box<dyn Future<Output = Result<HandlerOutput, S3Error>> + Send + 'a>>;

/// Per-operation extras a handler receives beside the request itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerArgs {
    None,
    /// Bucket creation authorizes and configures placement in one call.
    BucketPut { location_constraint: Option<String> },
    /// Source resource of an object copy, already authorized for reading.
    ObjectCopy {
        source_bucket: String,
        source_object: String,
    },
}

/// What a handler reports back to the routing layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerOutput {
    /// Hex digest of the written payload, unquoted.
    pub etag: Option<String>,
    /// XML document for the response body.
    pub xml: Option<String>,
}

/// A storage-side operation. Owns the side effect; returns exactly once.
pub trait ApiHandler: Send + Sync + 'static {
    fn call<'a>(
        &'a self,
        auth_info: AuthInfo,
        request: &'a ApiRequest,
        args: HandlerArgs,
    ) -> HandlerFuture<'a>;
}

/// Raised when a dispatch table is built without covering every operation.
#[derive(Debug, Error)]
#[error("no handler registered for: {}", join_methods(.0))]
pub struct IncompleteDispatchTable(pub Vec<ApiMethod>);

fn join_methods(methods: &[ApiMethod]) -> String {
    methods
        .iter()
        .map(ApiMethod::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Exhaustive mapping from [`ApiMethod`] to its handler.
///
/// Only obtainable through [`DispatchTableBuilder::build`], which refuses
/// to produce a table with gaps.
pub struct DispatchTable {
    handlers: HashMap<ApiMethod, Arc<dyn ApiHandler>>,
}

impl DispatchTable {
    pub fn builder() -> DispatchTableBuilder {
        DispatchTableBuilder::default()
    }

    pub fn get(&self, method: ApiMethod) -> Option<&Arc<dyn ApiHandler>> {
        self.handlers.get(&method)
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<_> = self.handlers.keys().collect();
        methods.sort();
        f.debug_struct("DispatchTable")
            .field("methods", &methods)
            .finish()
    }
}

#[derive(Default)]
pub struct DispatchTableBuilder {
    handlers: HashMap<ApiMethod, Arc<dyn ApiHandler>>,
}

impl DispatchTableBuilder {
    /// Bind `method` to `handler`, replacing any earlier binding.
    pub fn register(mut self, method: ApiMethod, handler: Arc<dyn ApiHandler>) -> Self {
        self.handlers.insert(method, handler);
        self
    }

    /// Bind every method in `methods` to the same handler.
    pub fn register_all(mut self, methods: &[ApiMethod], handler: Arc<dyn ApiHandler>) -> Self {
        for method in methods {
            self.handlers.insert(*method, Arc::clone(&handler));
        }
        self
    }

    /// Bind every still-unbound method to `handler`.
    pub fn register_remaining(self, handler: Arc<dyn ApiHandler>) -> Self {
        let missing: Vec<ApiMethod> = ApiMethod::ALL
            .iter()
            .copied()
            .filter(|m| !self.handlers.contains_key(m))
            .collect();
        self.register_all(&missing, handler)
    }

    pub fn build(self) -> Result<DispatchTable, IncompleteDispatchTable> {
        let missing: Vec<ApiMethod> = ApiMethod::ALL
            .iter()
            .copied()
            .filter(|m| !self.handlers.contains_key(m))
            .collect();
        if !missing.is_empty() {
            return Err(IncompleteDispatchTable(missing));
        }
        Ok(DispatchTable {
            handlers: self.handlers,
        })
    }
}

/// Split a percent-encoded `x-amz-copy-source` into (bucket, key).
///
/// One leading `/` is accepted (`/bucket/key`); the remainder is split on
/// its first `/`.  No separator, or an empty side, is an invalid argument.
pub fn parse_copy_source(raw: &str) -> Result<(String, String), S3Error> {
    let decoded = percent_encoding::percent_decode_str(raw).decode_utf8_lossy();
    let source = decoded.strip_prefix('/').unwrap_or(&decoded);

    match source.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
            Ok((bucket.to_string(), key.to_string()))
        }
        _ => Err(S3Error::InvalidArgument {
            message: format!("Invalid copy source: {raw}"),
        }),
    }
}

/// The authorization orchestrator.
pub struct Api {
    authenticator: Arc<dyn Authenticator>,
    table: DispatchTable,
}

impl fmt::Debug for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Api").field("table", &self.table).finish()
    }
}

impl Api {
    pub fn new(authenticator: Arc<dyn Authenticator>, table: DispatchTable) -> Self {
        Self {
            authenticator,
            table,
        }
    }

    /// Authorize `operation` for `request` and run its handler.
    ///
    /// `location_constraint` is only meaningful for [`ApiMethod::BucketPut`].
    pub async fn authorize_and_dispatch(
        &self,
        operation: ApiMethod,
        request: &ApiRequest,
        location_constraint: Option<&str>,
    ) -> Result<HandlerOutput, S3Error> {
        let result = if operation == ApiMethod::ObjectCopy {
            self.authorize_copy(request, location_constraint).await
        } else {
            self.authorize_single(operation, request, location_constraint)
                .await
        };
        metrics::record_operation(operation, &result);
        result
    }

    async fn authorize_single(
        &self,
        operation: ApiMethod,
        request: &ApiRequest,
        location_constraint: Option<&str>,
    ) -> Result<HandlerOutput, S3Error> {
        let context = request_context(
            request,
            request.bucket(),
            request.object_key(),
            operation,
            location_constraint,
        );
        let auth_info = self
            .authenticator
            .authorize(request, &context)
            .await
            .map_err(|err| {
                trace!(error = %err, "authentication error");
                metrics::record_auth_failure("request");
                err
            })?;

        let args = match operation {
            ApiMethod::BucketPut => HandlerArgs::BucketPut {
                location_constraint: location_constraint.map(str::to_string),
            },
            _ => HandlerArgs::None,
        };
        self.dispatch(operation, auth_info, request, args).await
    }

    async fn authorize_copy(
        &self,
        request: &ApiRequest,
        location_constraint: Option<&str>,
    ) -> Result<HandlerOutput, S3Error> {
        let raw_source = request
            .header("x-amz-copy-source")
            .ok_or_else(|| S3Error::InvalidArgument {
                message: "Missing x-amz-copy-source header".to_string(),
            })?;
        let (source_bucket, source_object) = parse_copy_source(raw_source)?;

        let get_context = request_context(
            request,
            &source_bucket,
            Some(&source_object),
            ApiMethod::ObjectGet,
            location_constraint,
        );
        self.authenticator
            .authorize(request, &get_context)
            .await
            .map_err(|err| {
                trace!(error = %err, "auth error on get portion of request");
                metrics::record_auth_failure("copy_get");
                err
            })?;

        let put_context = request_context(
            request,
            request.bucket(),
            request.object_key(),
            ApiMethod::ObjectPut,
            location_constraint,
        );
        let auth_info = self
            .authenticator
            .authorize(request, &put_context)
            .await
            .map_err(|err| {
                trace!(error = %err, "auth error on put portion of request");
                metrics::record_auth_failure("copy_put");
                err
            })?;

        debug!(
            source = %get_context.resource(),
            destination = %put_context.resource(),
            "copy authorized"
        );
        let args = HandlerArgs::ObjectCopy {
            source_bucket,
            source_object,
        };
        self.dispatch(ApiMethod::ObjectCopy, auth_info, request, args)
            .await
    }

    async fn dispatch(
        &self,
        operation: ApiMethod,
        auth_info: AuthInfo,
        request: &ApiRequest,
        args: HandlerArgs,
    ) -> Result<HandlerOutput, S3Error> {
        let handler = self.table.get(operation).ok_or_else(|| {
            S3Error::InternalError(anyhow::anyhow!("no handler for {operation}"))
        })?;
        handler.call(auth_info, request, args).await
    }
}

fn request_context(
    request: &ApiRequest,
    bucket: &str,
    object_key: Option<&str>,
    operation: ApiMethod,
    location_constraint: Option<&str>,
) -> RequestContext {
    RequestContext::new(
        request.headers(),
        request.query(),
        bucket,
        object_key,
        request.remote_addr(),
        request.is_encrypted(),
        operation,
        PROTOCOL_FAMILY_S3,
        location_constraint,
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::AuthFuture;
    use axum::http::{HeaderMap, Method};
    use std::sync::Mutex;

    /// Authenticator double recording every context it is asked about.
    #[derive(Default)]
    pub(crate) struct ScriptedAuth {
        pub calls: Mutex<Vec<(ApiMethod, String)>>,
        /// Operations that fail authorization.
        pub deny: Vec<ApiMethod>,
    }

    impl ScriptedAuth {
        pub(crate) fn denying(deny: &[ApiMethod]) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                deny: deny.to_vec(),
            }
        }

        pub(crate) fn calls(&self) -> Vec<(ApiMethod, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Authenticator for ScriptedAuth {
        fn authorize<'a>(
            &'a self,
            _request: &'a ApiRequest,
            context: &'a RequestContext,
        ) -> AuthFuture<'a> {
            self.calls
                .lock()
                .unwrap()
                .push((context.operation(), context.resource()));
            let denied = self.deny.contains(&context.operation());
            let resource = context.resource();
            Box::pin(async move {
                if denied {
                    Err(S3Error::AccessDenied { message: resource })
                } else {
                    Ok(AuthInfo {
                        access_key: "ak".into(),
                        canonical_id: format!("id-for-{resource}"),
                        display_name: "tester".into(),
                    })
                }
            })
        }
    }

    /// Handler double recording its invocations.
    #[derive(Default)]
    pub(crate) struct RecordingHandler {
        pub calls: Mutex<Vec<(AuthInfo, HandlerArgs)>>,
    }

    impl ApiHandler for RecordingHandler {
        fn call<'a>(
            &'a self,
            auth_info: AuthInfo,
            _request: &'a ApiRequest,
            args: HandlerArgs,
        ) -> HandlerFuture<'a> {
            self.calls.lock().unwrap().push((auth_info, args));
            Box::pin(async {
                Ok(HandlerOutput {
                    etag: Some("abc".into()),
                    xml: None,
                })
            })
        }
    }

    fn api(auth: Arc<ScriptedAuth>, handler: Arc<RecordingHandler>) -> Api {
        let table = DispatchTable::builder()
            .register_remaining(handler)
            .build()
            .unwrap();
        Api::new(auth, table)
    }

    fn copy_request(source: &str) -> ApiRequest {
        let mut headers = HeaderMap::new();
        headers.insert("x-amz-copy-source", source.parse().unwrap());
        ApiRequest::new(
            Method::PUT,
            "/dst/key",
            None,
            headers,
            "dst",
            Some("key"),
        )
    }

    #[test]
    fn test_parse_copy_source() {
        assert_eq!(
            parse_copy_source("src/a/b.txt").unwrap(),
            ("src".to_string(), "a/b.txt".to_string())
        );
        assert_eq!(
            parse_copy_source("/src/key").unwrap(),
            ("src".to_string(), "key".to_string())
        );
        assert_eq!(
            parse_copy_source("src%2Fmy%20key").unwrap(),
            ("src".to_string(), "my key".to_string())
        );
        assert!(parse_copy_source("nobucketslash").is_err());
        assert!(parse_copy_source("src/").is_err());
    }

    #[test]
    fn test_incomplete_table_rejected() {
        let err = DispatchTable::builder()
            .register(ApiMethod::ObjectPut, Arc::new(RecordingHandler::default()))
            .build()
            .unwrap_err();
        assert!(err.0.contains(&ApiMethod::BucketPut));
        assert!(!err.0.contains(&ApiMethod::ObjectPut));
        assert!(err.to_string().contains("bucketPut"));
    }

    #[tokio::test]
    async fn test_copy_without_slash_skips_auth() {
        let auth = Arc::new(ScriptedAuth::default());
        let handler = Arc::new(RecordingHandler::default());
        let api = api(auth.clone(), handler.clone());

        let result = api
            .authorize_and_dispatch(ApiMethod::ObjectCopy, &copy_request("nobucket"), None)
            .await;
        assert!(matches!(result, Err(S3Error::InvalidArgument { .. })));
        assert!(auth.calls().is_empty());
        assert!(handler.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_copy_source_denied_never_checks_destination() {
        let auth = Arc::new(ScriptedAuth::denying(&[ApiMethod::ObjectGet]));
        let handler = Arc::new(RecordingHandler::default());
        let api = api(auth.clone(), handler.clone());

        let result = api
            .authorize_and_dispatch(ApiMethod::ObjectCopy, &copy_request("src/obj"), None)
            .await;
        assert!(matches!(result, Err(S3Error::AccessDenied { .. })));
        assert_eq!(
            auth.calls(),
            vec![(ApiMethod::ObjectGet, "src/obj".to_string())]
        );
        assert!(handler.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_copy_destination_denied() {
        let auth = Arc::new(ScriptedAuth::denying(&[ApiMethod::ObjectPut]));
        let handler = Arc::new(RecordingHandler::default());
        let api = api(auth.clone(), handler.clone());

        let result = api
            .authorize_and_dispatch(ApiMethod::ObjectCopy, &copy_request("src/obj"), None)
            .await;
        assert!(matches!(result, Err(S3Error::AccessDenied { message }) if message == "dst/key"));
        assert_eq!(auth.calls().len(), 2);
        assert!(handler.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_copy_success_uses_write_identity() {
        let auth = Arc::new(ScriptedAuth::default());
        let handler = Arc::new(RecordingHandler::default());
        let api = api(auth.clone(), handler.clone());

        api.authorize_and_dispatch(ApiMethod::ObjectCopy, &copy_request("src/obj"), None)
            .await
            .unwrap();

        assert_eq!(
            auth.calls(),
            vec![
                (ApiMethod::ObjectGet, "src/obj".to_string()),
                (ApiMethod::ObjectPut, "dst/key".to_string()),
            ]
        );
        let calls = handler.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0.canonical_id, "id-for-dst/key");
        assert_eq!(
            calls[0].1,
            HandlerArgs::ObjectCopy {
                source_bucket: "src".into(),
                source_object: "obj".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_single_auth_failure_skips_handler() {
        let auth = Arc::new(ScriptedAuth::denying(&[ApiMethod::ObjectPut]));
        let handler = Arc::new(RecordingHandler::default());
        let api = api(auth.clone(), handler.clone());
        let request = ApiRequest::new(Method::PUT, "/b/k", None, HeaderMap::new(), "b", Some("k"));

        let result = api
            .authorize_and_dispatch(ApiMethod::ObjectPut, &request, None)
            .await;
        assert!(result.is_err());
        assert_eq!(auth.calls(), vec![(ApiMethod::ObjectPut, "b/k".to_string())]);
        assert!(handler.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bucket_put_receives_location_constraint() {
        let auth = Arc::new(ScriptedAuth::default());
        let handler = Arc::new(RecordingHandler::default());
        let api = api(auth.clone(), handler.clone());
        let request = ApiRequest::new(Method::PUT, "/b", None, HeaderMap::new(), "b", None);

        api.authorize_and_dispatch(ApiMethod::BucketPut, &request, Some("us-west-1"))
            .await
            .unwrap();
        let calls = handler.calls.lock().unwrap();
        assert_eq!(
            calls[0].1,
            HandlerArgs::BucketPut {
                location_constraint: Some("us-west-1".into())
            }
        );
    }

    #[tokio::test]
    async fn test_non_bucket_put_gets_no_args() {
        let auth = Arc::new(ScriptedAuth::default());
        let handler = Arc::new(RecordingHandler::default());
        let api = api(auth.clone(), handler.clone());
        let request = ApiRequest::new(Method::PUT, "/b", Some("acl"), HeaderMap::new(), "b", None);

        api.authorize_and_dispatch(ApiMethod::BucketPutAcl, &request, None)
            .await
            .unwrap();
        assert_eq!(auth.calls(), vec![(ApiMethod::BucketPutAcl, "b".to_string())]);
        assert_eq!(handler.calls.lock().unwrap()[0].1, HandlerArgs::None);
    }
}
