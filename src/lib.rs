//! s3gate library: the request-classification, authorization and
//! body-integrity layer of an S3-compatible gateway.
//!
//! Inbound PUTs are classified into one of six operations
//! ([`routes::put`]), validated ([`integrity`], [`xml`]), authorized
//! through a pluggable [`auth::Authenticator`] and dispatched through an
//! exhaustive [`api::DispatchTable`] to storage handlers.

use std::sync::Arc;

pub mod api;
pub mod auth;
pub mod config;
pub mod context;
pub mod errors;
pub mod handlers;
pub mod integrity;
pub mod metrics;
pub mod request;
pub mod routes;
pub mod server;
pub mod xml;

use crate::api::Api;
use crate::auth::{Credential, SigV4Authenticator};
use crate::config::Config;
use crate::handlers::MemoryGateway;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Authorization orchestrator with its dispatch table.
    pub api: Arc<Api>,
}

impl AppState {
    pub fn new(config: Config, api: Arc<Api>) -> Self {
        Self { config, api }
    }

    /// SigV4 authentication against the configured credentials, backed by
    /// the in-memory gateway.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let authenticator =
            SigV4Authenticator::new(config.auth.credentials.iter().map(Credential::from));
        let gateway = Arc::new(MemoryGateway::new(&config.server.region));
        let table = gateway.dispatch_table()?;
        let api = Api::new(Arc::new(authenticator), table);
        Ok(Self::new(config, Arc::new(api)))
    }
}
