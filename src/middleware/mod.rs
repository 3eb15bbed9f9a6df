//! Request pipeline around the static file responder.
//!
//! Content transforms are applied as an ordered [`MiddlewareChain`]:
//! minification wraps the file server and compression wraps minification, so
//! a response is always minified before it is compressed. The request span
//! layer sits outside the chain.

pub mod compress;
pub mod minify;
pub mod pool;

use std::sync::Arc;
use std::time::Instant;

use axum::{extract::Request, middleware, middleware::Next, response::Response, Router};
use tracing::Instrument;
use uuid::Uuid;

pub use compress::{accepts_gzip, compress_response};
pub use minify::{minify_response, Minifier, MinifierRegistry, MinifyError};
pub use pool::{EncoderPool, GzipEncoder, PooledEncoder, SharedEncoderPool};

/// Extension type for accessing request ID in handlers if needed.
#[derive(Clone, Debug)]
pub struct RequestId(pub Uuid);

/// Middleware that generates a request ID and creates a request span.
///
/// This should be the outermost middleware layer so the span wraps
/// all request processing, including the content transforms.
pub async fn request_id_layer(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let path = uri.path();

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %path,
        duration_ms = tracing::field::Empty,
    );

    let start = Instant::now();

    let mut request = request;
    request.extensions_mut().insert(RequestId(request_id));

    async move {
        let response = next.run(request).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        tracing::Span::current().record("duration_ms", duration_ms);
        tracing::info!(
            status = response.status().as_u16(),
            duration_ms,
            "Request completed"
        );

        response
    }
    .instrument(span)
    .await
}

/// One content transform.
#[derive(Clone)]
pub enum Stage {
    Minify(Arc<MinifierRegistry>),
    Compress(Arc<dyn EncoderPool>),
}

impl Stage {
    /// Wrap `inner` so its responses pass through this stage.
    pub fn wrap(&self, inner: Router) -> Router {
        match self {
            Stage::Minify(registry) => {
                inner.layer(middleware::from_fn_with_state(registry.clone(), minify_response))
            }
            Stage::Compress(pool) => {
                inner.layer(middleware::from_fn_with_state(pool.clone(), compress_response))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Minify(_) => "minify",
            Stage::Compress(_) => "compress",
        }
    }
}

/// Ordered content transforms, innermost first.
///
/// Only minify-then-compress can be built; compressed bytes are never fed to
/// a minifier.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    stages: Vec<Stage>,
}

impl MiddlewareChain {
    pub fn new(minify: Option<Arc<MinifierRegistry>>, compress: Option<Arc<dyn EncoderPool>>) -> Self {
        let stages = minify
            .map(Stage::Minify)
            .into_iter()
            .chain(compress.map(Stage::Compress))
            .collect();
        Self { stages }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Apply every stage; each successive stage wraps the previous one.
    pub fn wrap(&self, handler: Router) -> Router {
        self.stages.iter().fold(handler, |inner, stage| stage.wrap(inner))
    }
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.stages.iter().map(Stage::name))
            .finish()
    }
}
