use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use std::io;

use crate::certs::CertError;
use crate::config::ConfigError;
use crate::http::ServerError;
use crate::middleware::MinifyError;

/// Errors raised while answering a single request.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Template rendering error: {0}")]
    Template(#[from] tera::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "404 page not found".to_string()),
            _ => {
                tracing::error!("Internal error: {:?}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <title>Error {}</title>
</head>
<body>
    <h1>Error {}</h1>
    <p>{}</p>
</body>
</html>"#,
            status.as_u16(),
            status.as_u16(),
            message
        );

        (status, Html(body)).into_response()
    }
}

/// Errors that stop the server before or while it is listening.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Certificate(#[from] CertError),

    #[error("Failed to build response pipeline: {0}")]
    Pipeline(#[from] MinifyError),

    #[error("Failed to load templates: {0}")]
    Template(#[from] tera::Error),

    #[error(transparent)]
    Server(#[from] ServerError),
}
