//! Pluggable request authentication and authorization.
//!
//! The orchestrator in [`crate::api`] only ever talks to an
//! [`Authenticator`] trait object.  It is installed once when the
//! [`crate::api::Api`] is built and never replaced.

pub mod sigv4;

use std::future::Future;
use std::pin::Pin;

use crate::config::CredentialConfig;
use crate::context::RequestContext;
use crate::errors::S3Error;
use crate::request::ApiRequest;

pub use sigv4::SigV4Authenticator;

/// Future returned by [`Authenticator::authorize`].
pub type AuthFuture<'a> = Pin<Box<dyn Future<Output = Result<AuthInfo, S3Error>> + Send + 'a>>;

/// Verified identity. Opaque to routing; handlers use it for ownership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthInfo {
    pub access_key: String,
    pub canonical_id: String,
    pub display_name: String,
}

/// Identity verification plus permission check for one [`RequestContext`].
pub trait Authenticator: Send + Sync + 'static {
    /// Verify the caller behind `request` and decide whether it may perform
    /// the action described by `context`.
    ///
    /// Authentication failures surface as `AccessDenied`,
    /// `InvalidAccessKeyId` or `SignatureDoesNotMatch`; a verified caller
    /// lacking permission gets `AccessDenied`.
    fn authorize<'a>(
        &'a self,
        request: &'a ApiRequest,
        context: &'a RequestContext,
    ) -> AuthFuture<'a>;
}

/// An access key with its secret and the scope it is allowed to touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_key: String,
    pub secret_key: String,
    pub owner_id: String,
    pub display_name: String,
    /// Bucket name patterns; `*` matches everything, a trailing `*` is a prefix match.
    pub buckets: Vec<String>,
    /// Only read operations are permitted.
    pub read_only: bool,
}

impl Credential {
    /// Whether this credential's scope covers the context's operation and bucket.
    pub fn permits(&self, context: &RequestContext) -> bool {
        if self.read_only && !context.operation().is_read_only() {
            return false;
        }
        self.buckets
            .iter()
            .any(|pattern| bucket_matches(pattern, context.bucket()))
    }
}

impl From<&CredentialConfig> for Credential {
    fn from(config: &CredentialConfig) -> Self {
        Self {
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
            owner_id: config
                .owner_id
                .clone()
                .unwrap_or_else(|| config.access_key.clone()),
            display_name: config
                .display_name
                .clone()
                .unwrap_or_else(|| config.access_key.clone()),
            buckets: config.buckets.clone(),
            read_only: config.read_only,
        }
    }
}

fn bucket_matches(pattern: &str, bucket: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => bucket.starts_with(prefix),
        None => pattern == bucket,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ApiMethod, PROTOCOL_FAMILY_S3};
    use axum::http::HeaderMap;
    use std::collections::HashMap;

    fn ctx(bucket: &str, operation: ApiMethod) -> RequestContext {
        RequestContext::new(
            &HeaderMap::new(),
            &HashMap::new(),
            bucket,
            Some("key"),
            None,
            false,
            operation,
            PROTOCOL_FAMILY_S3,
            None,
        )
    }

    fn credential(buckets: &[&str], read_only: bool) -> Credential {
        Credential {
            access_key: "ak".into(),
            secret_key: "sk".into(),
            owner_id: "ak".into(),
            display_name: "ak".into(),
            buckets: buckets.iter().map(|b| b.to_string()).collect(),
            read_only,
        }
    }

    #[test]
    fn test_bucket_patterns() {
        assert!(bucket_matches("*", "anything"));
        assert!(bucket_matches("logs-*", "logs-2026"));
        assert!(!bucket_matches("logs-*", "data"));
        assert!(bucket_matches("exact", "exact"));
        assert!(!bucket_matches("exact", "exact2"));
    }

    #[test]
    fn test_permits_scope() {
        let c = credential(&["src-*"], false);
        assert!(c.permits(&ctx("src-a", ApiMethod::ObjectPut)));
        assert!(!c.permits(&ctx("dst", ApiMethod::ObjectPut)));

        let ro = credential(&["*"], true);
        assert!(ro.permits(&ctx("any", ApiMethod::ObjectGet)));
        assert!(!ro.permits(&ctx("any", ApiMethod::ObjectPutAcl)));
    }

    #[test]
    fn test_from_config_defaults_identity_to_access_key() {
        let config = CredentialConfig {
            access_key: "key".into(),
            secret_key: "secret".into(),
            owner_id: None,
            display_name: None,
            buckets: vec!["*".into()],
            read_only: false,
        };
        let c = Credential::from(&config);
        assert_eq!(c.owner_id, "key");
        assert_eq!(c.display_name, "key");
    }
}
