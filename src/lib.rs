//! Resolve the originating client of an HTTP request from its forwarded
//! headers, without believing anything an untrusted hop wrote.
//!
//! The core lives in [`forwarded`]; [`middleware`] runs it in front of an
//! axum `Router`.

pub mod config;
pub mod forwarded;
pub mod middleware;
pub mod observability;
pub mod routes;
