//! Content-type keyed minification stage.
//!
//! The registry maps media types to minifiers: exact matches first, then
//! regular expressions in registration order. Only complete `200 OK` bodies
//! are rewritten. Range requests for minifiable paths are served whole, so a
//! client never sees slices of the unminified file.

use std::sync::Arc;

use axum::{
    body::{Body, HttpBody},
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http::header::{
    HeaderMap, ACCEPT_RANGES, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, IF_RANGE, RANGE,
};
use http::{Method, StatusCode};
use quick_xml::events::{BytesText, Event};
use quick_xml::{Reader, Writer};
use regex::Regex;

use crate::config::MINIFY_MAX_BODY_BYTES;

/// JavaScript / ECMAScript media types
pub const SCRIPT_PATTERN: &str = "^(application|text)/(x-)?(java|ecma)script$";

/// Any JSON-based media type
pub const JSON_PATTERN: &str = "[/+]json$";

/// Any XML-based media type
pub const XML_PATTERN: &str = "[/+]xml$";

#[derive(Debug, thiserror::Error)]
pub enum MinifyError {
    #[error("Body is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("Invalid CSS: {0}")]
    Css(String),

    #[error("Invalid JavaScript: {0}")]
    Script(String),

    #[error("Invalid XML: {0}")]
    Xml(String),

    #[error("Invalid minifier pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// A content-specific minification transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Minifier {
    Css,
    Html,
    Svg,
    JavaScript,
    Json,
    Xml,
}

impl Minifier {
    /// Minify `input`. The result is never longer than the input.
    pub fn minify(self, input: &[u8]) -> Result<Vec<u8>, MinifyError> {
        let output = match self {
            Minifier::Html => minify_html::minify(input, &html_config()),
            Minifier::Css => minifier::css::minify(std::str::from_utf8(input)?)
                .map_err(|e| MinifyError::Css(e.to_string()))?
                .to_string()
                .into_bytes(),
            Minifier::JavaScript => minify_script(input)?,
            Minifier::Json => minifier::json::minify(std::str::from_utf8(input)?)
                .to_string()
                .into_bytes(),
            Minifier::Svg | Minifier::Xml => minify_xml(std::str::from_utf8(input)?)?,
        };

        if output.len() > input.len() {
            Ok(input.to_vec())
        } else {
            Ok(output)
        }
    }
}

fn html_config() -> minify_html::Cfg {
    let mut cfg = minify_html::Cfg::spec_compliant();
    cfg.minify_css = true;
    cfg
}

/// Parse and re-emit a classic script; semicolon insertion follows the parser.
fn minify_script(source: &[u8]) -> Result<Vec<u8>, MinifyError> {
    let session = minify_js::Session::new();
    let mut output = Vec::with_capacity(source.len());
    minify_js::minify(&session, minify_js::TopLevelMode::Global, source, &mut output)
        .map_err(|e| MinifyError::Script(e.to_string()))?;
    Ok(output)
}

/// Drop comments and whitespace-only text, collapse whitespace runs elsewhere.
fn minify_xml(source: &str) -> Result<Vec<u8>, MinifyError> {
    let xml_err = |e: &dyn std::fmt::Display| MinifyError::Xml(e.to_string());

    let mut reader = Reader::from_str(source);
    let mut writer = Writer::new(Vec::with_capacity(source.len()));

    loop {
        let event = reader.read_event().map_err(|e| xml_err(&e))?;
        let event = match event {
            Event::Eof => break,
            Event::Comment(_) => continue,
            Event::Text(text) => {
                let raw = std::str::from_utf8(&text)?;
                if raw.trim().is_empty() {
                    continue;
                }
                Event::Text(BytesText::from_escaped(collapse_whitespace(raw)))
            }
            other => other,
        };
        writer.write_event(event).map_err(|e| xml_err(&e))?;
    }

    Ok(writer.into_inner())
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.chars() {
        if c.is_ascii_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

/// Fixed mapping from media type to minifier.
#[derive(Debug)]
pub struct MinifierRegistry {
    exact: Vec<(&'static str, Minifier)>,
    patterns: Vec<(Regex, Minifier)>,
    max_body: usize,
}

impl MinifierRegistry {
    /// CSS, HTML, SVG, JavaScript, JSON and XML.
    pub fn standard() -> Result<Self, MinifyError> {
        Ok(Self {
            exact: vec![
                ("text/css", Minifier::Css),
                ("text/html", Minifier::Html),
                ("image/svg+xml", Minifier::Svg),
            ],
            patterns: vec![
                (Regex::new(SCRIPT_PATTERN)?, Minifier::JavaScript),
                (Regex::new(JSON_PATTERN)?, Minifier::Json),
                (Regex::new(XML_PATTERN)?, Minifier::Xml),
            ],
            max_body: MINIFY_MAX_BODY_BYTES,
        })
    }

    /// Bodies larger than `max_body` bytes are sent unminified.
    pub fn with_max_body(mut self, max_body: usize) -> Self {
        self.max_body = max_body;
        self
    }

    /// Minifier for the type `ServeDir` will report for `path`.
    ///
    /// Directory paths resolve to their `index.html` (or the HTML listing).
    pub fn lookup_path(&self, path: &str) -> Option<Minifier> {
        if path.ends_with('/') {
            return self.lookup("text/html");
        }
        mime_guess::from_path(path)
            .first_raw()
            .and_then(|content_type| self.lookup(content_type))
    }

    /// Minifier for a Content-Type header value, parameters ignored.
    pub fn lookup(&self, content_type: &str) -> Option<Minifier> {
        let media_type = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();

        self.exact
            .iter()
            .find(|(name, _)| *name == media_type)
            .map(|(_, minifier)| *minifier)
            .or_else(|| {
                self.patterns
                    .iter()
                    .find(|(pattern, _)| pattern.is_match(&media_type))
                    .map(|(_, minifier)| *minifier)
            })
    }
}

/// Length of a body that is about to be minified, if it is known up front.
fn known_length(headers: &HeaderMap, body: &Body) -> Option<usize> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok())
        .or_else(|| body.size_hint().upper().and_then(|n| usize::try_from(n).ok()))
}

/// Middleware minifying registered content types.
pub async fn minify_response(
    State(registry): State<Arc<MinifierRegistry>>,
    mut request: Request,
    next: Next,
) -> Response {
    let is_head = request.method() == Method::HEAD;

    // Minifiable paths are always served whole.
    if registry.lookup_path(request.uri().path()).is_some() {
        request.headers_mut().remove(RANGE);
        request.headers_mut().remove(IF_RANGE);
    }

    let response = next.run(request).await;

    if response.status() != StatusCode::OK || response.headers().contains_key(CONTENT_ENCODING) {
        return response;
    }

    let Some(minifier) = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|content_type| registry.lookup(content_type))
    else {
        return response;
    };

    let (mut parts, body) = response.into_parts();
    parts.headers.remove(ACCEPT_RANGES);

    match known_length(&parts.headers, &body) {
        Some(len) if len <= registry.max_body => {}
        len => {
            tracing::debug!(?minifier, ?len, max = registry.max_body, "Body too large to minify");
            return Response::from_parts(parts, body);
        }
    }

    // Recomputed from the new body; HEAD reports what GET would send.
    parts.headers.remove(CONTENT_LENGTH);
    if is_head {
        return Response::from_parts(parts, body);
    }

    let original = match axum::body::to_bytes(body, registry.max_body).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, "Failed to read response body for minification");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let body = match minifier.minify(&original) {
        Ok(minified) => {
            tracing::debug!(
                ?minifier,
                before = original.len(),
                after = minified.len(),
                "Minified response"
            );
            Body::from(minified)
        }
        Err(e) => {
            tracing::warn!(?minifier, error = %e, "Minification failed, sending original");
            Body::from(original)
        }
    };

    Response::from_parts(parts, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> MinifierRegistry {
        MinifierRegistry::standard().unwrap()
    }

    fn minify_str(minifier: Minifier, input: &str) -> String {
        String::from_utf8(minifier.minify(input.as_bytes()).unwrap()).unwrap()
    }

    #[test]
    fn test_lookup_exact_types() {
        let registry = registry();
        assert_eq!(registry.lookup("text/css"), Some(Minifier::Css));
        assert_eq!(registry.lookup("text/html; charset=utf-8"), Some(Minifier::Html));
        assert_eq!(registry.lookup("image/svg+xml"), Some(Minifier::Svg));
        assert_eq!(registry.lookup("Text/CSS"), Some(Minifier::Css));
    }

    #[test]
    fn test_lookup_patterns() {
        let registry = registry();
        assert_eq!(registry.lookup("text/javascript"), Some(Minifier::JavaScript));
        assert_eq!(registry.lookup("application/x-javascript"), Some(Minifier::JavaScript));
        assert_eq!(registry.lookup("application/ecmascript"), Some(Minifier::JavaScript));
        assert_eq!(registry.lookup("application/json"), Some(Minifier::Json));
        assert_eq!(registry.lookup("application/ld+json"), Some(Minifier::Json));
        assert_eq!(registry.lookup("application/xml"), Some(Minifier::Xml));
        assert_eq!(registry.lookup("application/atom+xml"), Some(Minifier::Xml));
    }

    #[test]
    fn test_lookup_unregistered() {
        let registry = registry();
        assert_eq!(registry.lookup("image/png"), None);
        assert_eq!(registry.lookup("text/plain"), None);
        assert_eq!(registry.lookup("application/javascript-module"), None);
        assert_eq!(registry.lookup("application/jsonl"), None);
        assert_eq!(registry.lookup(""), None);
    }

    #[test]
    fn test_svg_exact_match_wins_over_xml_pattern() {
        assert_eq!(registry().lookup("image/svg+xml"), Some(Minifier::Svg));
    }

    #[test]
    fn test_css_shrinks_and_is_idempotent() {
        let input = "body {\n    color : red ;\n    margin : 0 ;\n}\n\n/* trailing comment */\n";
        let once = minify_str(Minifier::Css, input);
        assert!(once.len() < input.len());
        assert!(once.contains("color:red"));
        assert!(!once.contains("comment"));
        assert_eq!(minify_str(Minifier::Css, &once), once);
    }

    #[test]
    fn test_json_shrinks_and_is_idempotent() {
        let input = "{\n  \"name\" : \"sserve\",\n  \"tags\" : [ \"a b\", 2 ]\n}\n";
        let once = minify_str(Minifier::Json, input);
        assert_eq!(once, r#"{"name":"sserve","tags":["a b",2]}"#);
        assert_eq!(minify_str(Minifier::Json, &once), once);
    }

    #[test]
    fn test_js_never_grows() {
        let input = "function add ( a , b ) {\n    // sum\n    return a + b ;\n}\n";
        let once = minify_str(Minifier::JavaScript, input);
        assert!(once.len() < input.len());
        assert!(!once.contains("// sum"));
    }

    /// Re-minifying parses the output again, so success means the output is valid script.
    fn assert_valid_and_idempotent(minifier: Minifier, input: &str) -> String {
        let once = minify_str(minifier, input);
        let twice = minify_str(minifier, &once);
        assert_eq!(twice, once, "not idempotent for {:?}", input);
        once
    }

    #[test]
    fn test_js_without_semicolons() {
        let once = assert_valid_and_idempotent(
            Minifier::JavaScript,
            "let a = 1\nlet b = 2\nconsole.log(a + b)\n",
        );
        assert!(!once.contains("1let"));
        assert!(!once.contains("2console"));
        assert!(once.contains("console.log("));
    }

    #[test]
    fn test_js_prefix_increment_stays_separate() {
        let once = assert_valid_and_idempotent(Minifier::JavaScript, "var x = a\n++b\n");
        assert!(!once.contains("a++b"));
    }

    #[test]
    fn test_js_return_newline_keeps_semantics() {
        let once =
            assert_valid_and_idempotent(Minifier::JavaScript, "function f() {\n  return\n  42\n}\n");
        assert!(!once.contains("return 42"));
    }

    #[test]
    fn test_js_syntax_error() {
        assert!(matches!(
            Minifier::JavaScript.minify(b"let = = ;"),
            Err(MinifyError::Script(_))
        ));
    }

    #[test]
    fn test_html_shrinks() {
        let input = "<!doctype html>\n<html>\n  <body>\n    <p>  Hello   world  </p>\n    <!-- note -->\n  </body>\n</html>\n";
        let once = assert_valid_and_idempotent(Minifier::Html, input);
        assert!(once.len() < input.len());
        assert!(once.contains("<!doctype html>"));
        assert!(once.contains("Hello"));
        assert!(!once.contains("note"));
    }

    #[test]
    fn test_lookup_path() {
        let registry = registry();
        assert_eq!(registry.lookup_path("/css/site.css"), Some(Minifier::Css));
        assert_eq!(registry.lookup_path("/app.js"), Some(Minifier::JavaScript));
        assert_eq!(registry.lookup_path("/docs/"), Some(Minifier::Html));
        assert_eq!(registry.lookup_path("/video.mp4"), None);
        assert_eq!(registry.lookup_path("/README"), None);
    }

    #[test]
    fn test_xml_minify() {
        let input = "<?xml version=\"1.0\"?>\n<!-- header -->\n<root>\n  <item id=\"1\">  some   text  </item>\n  <empty/>\n</root>\n";
        let once = minify_str(Minifier::Xml, input);
        assert_eq!(
            once,
            "<?xml version=\"1.0\"?><root><item id=\"1\"> some text </item><empty/></root>"
        );
        assert_eq!(minify_str(Minifier::Xml, &once), once);
    }

    #[test]
    fn test_svg_minify_keeps_markup() {
        let input = "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"10\" height=\"10\">\n  <!-- box -->\n  <rect width=\"10\" height=\"10\"/>\n</svg>\n";
        let once = minify_str(Minifier::Svg, input);
        assert_eq!(
            once,
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"10\" height=\"10\"><rect width=\"10\" height=\"10\"/></svg>"
        );
    }

    #[test]
    fn test_invalid_xml_is_an_error() {
        assert!(Minifier::Xml.minify(b"<a><b></a>").is_err());
    }

    #[test]
    fn test_invalid_utf8_is_an_error() {
        assert!(matches!(
            Minifier::Json.minify(&[0xff, 0xfe]),
            Err(MinifyError::Utf8(_))
        ));
    }

    async fn serve_css(registry: MinifierRegistry, request: Request) -> Response {
        use axum::{middleware, routing::get, Router};
        use tower::ServiceExt;

        Router::new()
            .route(
                "/site.css",
                get(|| async { ([(CONTENT_TYPE, "text/css")], "a {\n  color : red ;\n}\n") }),
            )
            .layer(middleware::from_fn_with_state(
                Arc::new(registry),
                minify_response,
            ))
            .oneshot(request)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_large_body_passes_through() {
        let request = Request::builder()
            .uri("/site.css")
            .body(Body::empty())
            .unwrap();
        let response = serve_css(registry().with_max_body(8), request).await;

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"a {\n  color : red ;\n}\n");
    }

    #[tokio::test]
    async fn test_small_body_is_minified() {
        let request = Request::builder()
            .uri("/site.css")
            .body(Body::empty())
            .unwrap();
        let response = serve_css(registry(), request).await;

        assert!(response.headers().get(CONTENT_LENGTH).is_none());
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(body.len() < "a {\n  color : red ;\n}\n".len());
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("a  b\n\tc"), "a b c");
        assert_eq!(collapse_whitespace("  a "), " a ");
    }
}
