//! sserve: serve a directory over HTTPS with a locally trusted certificate.
//!
//! Responses flow through an optional minify stage and an optional gzip
//! stage before reaching the client. Certificates are found in a per-user
//! data directory or provisioned on first start.

pub mod app;
pub mod certs;
pub mod config;
pub mod error;
pub mod http;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod templates;

pub use app::{build_chain, build_router, run};
pub use error::{AppError, StartupError};
