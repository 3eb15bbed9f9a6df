//! Application bootstrap: build the router, provision TLS material, serve.

use std::sync::Arc;

use axum::Router;

use crate::certs::obtain_certificate;
use crate::config::{ServerConfig, ENCODER_POOL_MAX_IDLE};
use crate::error::StartupError;
use crate::http::start_server;
use crate::middleware::{EncoderPool, MiddlewareChain, MinifierRegistry, SharedEncoderPool};
use crate::routes::create_router;
use crate::state::AppState;
use crate::templates::init_templates;

/// Build the content transform chain selected by the configuration.
pub fn build_chain(config: &ServerConfig) -> Result<MiddlewareChain, StartupError> {
    let minify = if config.minify {
        Some(Arc::new(MinifierRegistry::standard()?))
    } else {
        None
    };
    let compress = config.compression.then(|| {
        let pool: Arc<dyn EncoderPool> = Arc::new(SharedEncoderPool::new(ENCODER_POOL_MAX_IDLE));
        pool
    });
    Ok(MiddlewareChain::new(minify, compress))
}

/// Build the full application router for `config`.
pub fn build_router(config: ServerConfig) -> Result<Router, StartupError> {
    let chain = build_chain(&config)?;
    tracing::info!(stages = ?chain, "Response pipeline configured");

    let tera = init_templates()?;
    let state = AppState::new(config, tera);
    Ok(create_router(state, &chain))
}

/// Provision certificates and serve until shutdown.
pub async fn run(config: ServerConfig) -> Result<(), StartupError> {
    // reqwest pulls in ring as well; pin aws-lc-rs for the listener.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let material = obtain_certificate(&config.tls).await?;
    let app = build_router(config.clone())?;
    start_server(app, &config, &material).await?;
    Ok(())
}
