//! Static file responder.
//!
//! Files under the configured root are served by `ServeDir`, which handles
//! content types, conditional requests and ranges. Directories without an
//! `index.html` fall through to a generated listing.

use std::path::{Component, Path, PathBuf};

use axum::{
    extract::State,
    http::Uri,
    response::{Html, IntoResponse, Response},
    routing::{get, MethodRouter},
};
use serde::Serialize;
use tower_http::services::ServeDir;

use crate::config::LISTING_TEMPLATE_NAME;
use crate::error::AppError;
use crate::state::AppState;

/// Create the file service for the configured root.
pub fn create_static_service(state: AppState) -> ServeDir<MethodRouter> {
    let root = state.config.root.clone();
    ServeDir::new(root).fallback(get(directory_listing).with_state(state))
}

/// One row of a directory listing.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ListingEntry {
    pub name: String,
    /// Percent-encoded, relative to the listed directory
    pub href: String,
    pub is_dir: bool,
}

/// Map a request path onto the filesystem below `root`.
///
/// Returns `None` for paths that are not valid UTF-8 after decoding or that
/// try to leave the root.
pub fn resolve_dir(root: &Path, request_path: &str) -> Option<PathBuf> {
    let decoded = urlencoding::decode(request_path).ok()?;
    let mut resolved = root.to_path_buf();
    for component in Path::new(decoded.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(resolved)
}

async fn read_entries(dir: &Path) -> std::io::Result<Vec<ListingEntry>> {
    let mut reader = tokio::fs::read_dir(dir).await?;
    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = entry.file_type().await?.is_dir();
        let mut href = urlencoding::encode(&name).into_owned();
        if is_dir {
            href.push('/');
        }
        entries.push(ListingEntry { name, href, is_dir });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Listing for directories that have no `index.html`; 404 for anything else.
async fn directory_listing(State(state): State<AppState>, uri: Uri) -> Result<Response, AppError> {
    let not_found = || AppError::NotFound(uri.path().to_string());

    let dir = resolve_dir(&state.config.root, uri.path()).ok_or_else(not_found)?;
    if !tokio::fs::metadata(&dir).await.is_ok_and(|meta| meta.is_dir()) {
        return Err(not_found());
    }

    let entries = read_entries(&dir).await?;
    tracing::debug!(path = %uri.path(), count = entries.len(), "Rendering directory listing");

    let path = urlencoding::decode(uri.path())
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| uri.path().to_string());

    let mut context = tera::Context::new();
    context.insert("path", &path);
    context.insert("has_parent", &(path != "/"));
    context.insert("entries", &entries);

    let html = state.tera.render(LISTING_TEMPLATE_NAME, &context)?;
    Ok(Html(html).into_response())
}
