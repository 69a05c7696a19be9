//! S3 request routing.
//!
//! Only PUT is routed here; see [`put`].

pub mod put;
pub mod response;

pub use put::{classify, route_put, PendingWrite, PutOperation};
