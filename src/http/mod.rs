//! HTTP server module with TLS support.
//!
//! The server includes:
//! - HTTPS listener with a locally provisioned or user-provided certificate
//! - HTTP to HTTPS redirect on a second, independent listener
//! - Static file serving with a directory-listing fallback
//! - Graceful shutdown on SIGTERM/SIGINT

pub mod redirect;
mod server;
mod shutdown;
pub mod static_files;

pub use server::{start_server, ServerError};
