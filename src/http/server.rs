//! HTTPS server startup logic.

use std::net::SocketAddr;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;

use crate::certs::CertificateMaterial;
use crate::config::ServerConfig;

use super::redirect;
use super::shutdown;

/// Server startup error
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind server: {0}")]
    Bind(#[from] std::io::Error),

    #[error("Failed to load TLS configuration: {0}")]
    TlsConfig(String),
}

/// Start the HTTPS server (and the redirector, if enabled).
///
/// This function blocks until the server shuts down.
pub async fn start_server(
    app: Router,
    config: &ServerConfig,
    material: &CertificateMaterial,
) -> Result<(), ServerError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    let rustls_config = RustlsConfig::from_pem_file(&material.cert_path, &material.key_path)
        .await
        .map_err(|e| {
            ServerError::TlsConfig(format!(
                "Failed to load certificates from {} and {}: {}",
                material.cert_path.display(),
                material.key_path.display(),
                e
            ))
        })?;

    let handle = Handle::new();
    shutdown::setup_shutdown_handler(handle.clone());

    if config.redirect {
        redirect::spawn_redirect_server(config.redirect_port);
        tracing::info!(port = config.redirect_port, "HTTP redirect activated");
    }

    tracing::info!(
        %addr,
        root = %config.root.display(),
        url = %config.public_url(),
        "Serving static files"
    );

    axum_server::bind_rustls(addr, rustls_config)
        .handle(handle)
        .serve(app.into_make_service())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}
