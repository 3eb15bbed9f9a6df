//! HTTP to HTTPS redirect server.
//!
//! Spawns a lightweight HTTP server on port 80 (or the configured port) that
//! answers every request with a 307 to the same host, path and query over
//! HTTPS.

use std::net::SocketAddr;

use axum::http::{header::HOST, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Redirect};
use axum::routing::any;
use axum::Router;

/// Spawn an HTTP server that redirects all requests to HTTPS.
///
/// This runs in the background and does not block. A failure (port taken,
/// missing privileges) is logged and leaves the HTTPS listener running.
pub fn spawn_redirect_server(http_port: u16) {
    tokio::spawn(async move {
        let addr = SocketAddr::from(([0, 0, 0, 0], http_port));

        tracing::info!(http_port = %http_port, "Starting HTTP->HTTPS redirect server");

        match axum_server::bind(addr)
            .serve(redirect_router().into_make_service())
            .await
        {
            Ok(()) => {
                tracing::debug!("HTTP redirect server stopped");
            }
            Err(e) => {
                tracing::error!(error = %e, http_port = %http_port, "HTTP redirect server failed");
            }
        }
    });
}

/// Router answering every method and path with a redirect.
pub fn redirect_router() -> Router {
    Router::new().fallback(any(|headers: HeaderMap, uri: Uri| async move {
        match request_host(&headers, &uri) {
            Some(host) => redirect_to_https(host, &uri).into_response(),
            None => (StatusCode::BAD_REQUEST, "missing Host header").into_response(),
        }
    }))
}

/// The host the client asked for: the `Host` header, else the URI authority.
///
/// Forwarding headers are ignored.
fn request_host<'a>(headers: &'a HeaderMap, uri: &'a Uri) -> Option<&'a str> {
    headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| uri.authority().map(|authority| authority.as_str()))
        .filter(|host| !host.is_empty())
}

/// HTTPS URL for a plain request: host kept verbatim, path and query unchanged.
pub fn https_target(host: &str, uri: &Uri) -> String {
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    format!("https://{}{}", host, path_and_query)
}

/// Generate a redirect response from HTTP to HTTPS.
fn redirect_to_https(host: &str, uri: &Uri) -> Redirect {
    let https_url = https_target(host, uri);
    tracing::debug!(from = %uri, to = %https_url, "Redirecting HTTP to HTTPS");
    Redirect::temporary(&https_url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use tower::ServiceExt;

    #[test]
    fn test_https_target_keeps_path_and_query() {
        let uri: Uri = "/some/path?q=1".parse().unwrap();
        assert_eq!(https_target("host", &uri), "https://host/some/path?q=1");
    }

    #[test]
    fn test_https_target_root() {
        let uri: Uri = "/".parse().unwrap();
        assert_eq!(https_target("example.test", &uri), "https://example.test/");
    }

    #[test]
    fn test_https_target_keeps_host_port() {
        let uri: Uri = "/a".parse().unwrap();
        assert_eq!(https_target("localhost:8080", &uri), "https://localhost:8080/a");
    }

    #[tokio::test]
    async fn test_redirect_router_uses_307() {
        let response = redirect_router()
            .oneshot(
                Request::builder()
                    .uri("/some/path?q=1")
                    .header(header::HOST, "host")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://host/some/path?q=1"
        );
    }

    #[tokio::test]
    async fn test_redirect_ignores_forwarded_host() {
        let response = redirect_router()
            .oneshot(
                Request::builder()
                    .uri("/login")
                    .header(header::HOST, "localhost:8080")
                    .header("x-forwarded-host", "elsewhere.test")
                    .header(header::FORWARDED, "host=elsewhere.test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://localhost:8080/login"
        );
    }

    #[tokio::test]
    async fn test_redirect_without_host_is_bad_request() {
        let response = redirect_router()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_redirect_preserves_method_semantics_for_post() {
        let response = redirect_router()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/submit")
                    .header(header::HOST, "host")
                    .body(Body::from("payload"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers()[header::LOCATION], "https://host/submit");
    }
}
