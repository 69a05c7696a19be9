//! Storage-side handlers bound into the dispatch table.

pub mod acl;
pub mod memory;

use crate::api::{ApiHandler, HandlerArgs, HandlerFuture};
use crate::auth::AuthInfo;
use crate::errors::S3Error;
use crate::request::ApiRequest;

pub use memory::MemoryGateway;

/// Bound to every operation this gateway does not route.
pub struct NotImplementedHandler;

impl ApiHandler for NotImplementedHandler {
    fn call<'a>(
        &'a self,
        _auth_info: AuthInfo,
        _request: &'a ApiRequest,
        _args: HandlerArgs,
    ) -> HandlerFuture<'a> {
        Box::pin(async { Err(S3Error::NotImplemented) })
    }
}
