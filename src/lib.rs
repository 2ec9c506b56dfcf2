//! Authenticated currency lookup over gRPC.
//!
//! The server keeps an in-memory table of currency records and answers
//! queries in all four gRPC call shapes (unary, server streaming, client
//! streaming, bidirectional). Query calls need a bearer token issued by the
//! login service. The client side adds the token to every call and retries
//! transient failures of unary calls.
//!
//! # Layout
//!
//! - [`record`]: the record type, CSV loading and request validation
//! - [`auth`]: password hashing and HS256 tokens
//! - [`server`]: services, interceptor chain, configuration, record store
//! - [`client`]: query client, bearer token, retry policy

#![warn(missing_docs)]

/// Credentials and bearer tokens.
pub mod auth;
/// Client side.
pub mod client;
/// Error types.
pub mod error;
/// Currency records.
pub mod record;
/// Server side.
pub mod server;

/// Generated gRPC types for package `lookup.v1`.
#[allow(missing_docs)]
pub mod proto {
    tonic::include_proto!("lookup.v1");
}

pub use error::{Error, Result};
pub use record::Record;
