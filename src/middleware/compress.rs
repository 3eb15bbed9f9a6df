//! Streaming gzip compression stage.
//!
//! Responses to clients that accept gzip are re-encoded chunk by chunk with
//! an encoder checked out of the shared pool. The encoder travels with the
//! response body and goes back to the pool when the body is finished or
//! dropped.

use std::io;
use std::sync::Arc;

use axum::{
    body::{Body, BodyDataStream},
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use http::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, VARY};

use super::pool::{checkout, EncoderPool, GzipEncoder, PooledEncoder};

/// Parse quality value from Accept-Encoding part (e.g., "gzip;q=0.5" -> 0.5)
fn parse_quality(part: &str) -> f32 {
    part.split(';')
        .nth(1)
        .and_then(|s| s.trim().strip_prefix("q="))
        .and_then(|s| s.parse::<f32>().ok())
        .unwrap_or(1.0)
}

/// True when any Accept-Encoding header lists gzip with a non-zero quality.
pub fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT_ENCODING)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|part| {
            let encoding = part.split(';').next().unwrap_or("").trim();
            (encoding.eq_ignore_ascii_case("gzip") || encoding.eq_ignore_ascii_case("x-gzip"))
                && parse_quality(part) > 0.0
        })
}

/// Responses that must not carry a body, or are already encoded, stay as-is.
fn should_compress(response: &Response) -> bool {
    let status = response.status();
    !(status.is_informational()
        || status == http::StatusCode::NO_CONTENT
        || status == http::StatusCode::NOT_MODIFIED
        || response.headers().contains_key(CONTENT_ENCODING))
}

/// Middleware gzip-encoding the inner response when the client allows it.
pub async fn compress_response(
    State(pool): State<Arc<dyn EncoderPool>>,
    request: Request,
    next: Next,
) -> Response {
    if !accepts_gzip(request.headers()) {
        return next.run(request).await;
    }

    // Held across the inner call; a panic or early return drops the guard,
    // which returns the encoder.
    let encoder = checkout(&pool);
    let response = next.run(request).await;
    if !should_compress(&response) {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    parts.headers.remove(CONTENT_LENGTH);
    parts
        .headers
        .insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    parts
        .headers
        .append(VARY, HeaderValue::from_static("accept-encoding"));

    Response::from_parts(parts, Body::from_stream(gzip_body(body, encoder)))
}

/// State of one compressed body.
struct GzipBody {
    inner: BodyDataStream,
    /// `None` once the stream has ended; dropping it returns the encoder.
    encoder: Option<PooledEncoder>,
    header_sent: bool,
}

impl GzipBody {
    fn with_encoder<T>(
        &mut self,
        f: impl FnOnce(&mut GzipEncoder) -> io::Result<T>,
    ) -> io::Result<T> {
        match self.encoder.as_mut() {
            Some(pooled) => f(pooled.encoder()?),
            None => Err(io::Error::other("Encoder already released")),
        }
    }

    async fn next_chunk(&mut self) -> Option<io::Result<Bytes>> {
        self.encoder.as_ref()?;

        if !self.header_sent {
            self.header_sent = true;
            return Some(self.with_encoder(|encoder| Ok(encoder.header())));
        }

        loop {
            let result = match self.inner.next().await {
                Some(Ok(chunk)) => self.with_encoder(|encoder| encoder.write(&chunk)),
                Some(Err(err)) => Err(io::Error::other(err)),
                None => {
                    // Trailer first, then the encoder goes back to the pool.
                    let trailer = self.with_encoder(GzipEncoder::finish);
                    self.encoder = None;
                    return Some(trailer);
                }
            };

            match result {
                // Deflate buffers small writes internally
                Ok(bytes) if bytes.is_empty() => continue,
                Ok(bytes) => return Some(Ok(bytes)),
                Err(err) => {
                    tracing::warn!(error = %err, "Compressed response body failed");
                    self.encoder = None;
                    return Some(Err(err));
                }
            }
        }
    }
}

fn gzip_body(body: Body, encoder: PooledEncoder) -> impl Stream<Item = io::Result<Bytes>> + Send {
    let state = GzipBody {
        inner: body.into_data_stream(),
        encoder: Some(encoder),
        header_sent: false,
    };
    futures::stream::unfold(state, |mut state| async move {
        let chunk = state.next_chunk().await?;
        Some((chunk, state))
    })
}
