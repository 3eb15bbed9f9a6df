//! Router assembly.
//!
//! Every request goes to the static file responder, wrapped by the content
//! transform chain. The request ID layer is outermost so its span covers the
//! whole pipeline.

use axum::{middleware, Router};

use crate::http::static_files::create_static_service;
use crate::middleware::{request_id_layer, MiddlewareChain};
use crate::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState, chain: &MiddlewareChain) -> Router {
    let static_routes = Router::new().fallback_service(create_static_service(state));

    chain
        .wrap(static_routes)
        .layer(middleware::from_fn(request_id_layer))
}
