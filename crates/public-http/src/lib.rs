//! Public read HTTP surface (§6 "Public read HTTP"): directory browsing and
//! file reads over the FAT tree, served locally or forwarded through the
//! read proxy.
//!
//! Named out of scope as a "trivial collaborator" in the distilled spec, but
//! it is the thing every end-to-end scenario in §8 actually drives, so it is
//! implemented for real rather than stubbed. Rendering and MIME typing are
//! kept deliberately minimal, grounded in `original_source/httpface/server.go`'s
//! `<pre>`-table directory listing.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use fat::{FileStat, ListingEntry, TreeNode, WalkControl};
use futures_util::TryStreamExt;
use proxy::{ProxyError, ReadBody};
use serde::Deserialize;

#[derive(Clone)]
struct AppState {
    fat_root: Arc<TreeNode>,
    proxy: Arc<proxy::Proxy>,
}

pub fn router(fat_root: Arc<TreeNode>, proxy: Arc<proxy::Proxy>) -> Router<()> {
    Router::new()
        .route("/", get(index))
        .route("/fs/", get(get_fs_root))
        .route("/fs/*path", get(get_fs))
        .route("/find/", get(get_find))
        .with_state(AppState { fat_root, proxy })
}

async fn index() -> &'static str {
    "Hi! See /fs/ for filesystem browser."
}

#[derive(Debug, Deserialize, Default)]
struct FsQuery {
    #[serde(rename = "redirN")]
    redir_n: Option<u32>,
    format: Option<String>,
}

async fn get_fs_root(state: State<AppState>, query: Query<FsQuery>) -> Response {
    serve_path(state, Path(String::new()), query).await
}

async fn get_fs(state: State<AppState>, path: Path<String>, query: Query<FsQuery>) -> Response {
    serve_path(state, path, query).await
}

async fn serve_path(State(state): State<AppState>, Path(path): Path<String>, Query(query): Query<FsQuery>) -> Response {
    let path = path.trim_matches('/');
    let Some(node) = state.fat_root.seek(path) else {
        return (StatusCode::NOT_FOUND, format!("`{path}` not found in DFS")).into_response();
    };
    let stat = node.stat();
    if stat.is_tombstone() {
        return (StatusCode::NOT_FOUND, format!("`{path}` not found in DFS")).into_response();
    }

    if stat.is_dir {
        return render_listing(&node, path);
    }

    let redir_n = query.redir_n.unwrap_or(0);
    match state.proxy.fetch(path, stat.owner.as_str(), redir_n).await {
        Ok(ReadBody::Local(file)) => serve_local_file(file, path, query.format.as_deref()),
        Ok(ReadBody::Remote(resp)) => serve_remote_body(resp),
        Err(ProxyError::TooManyRedirects) => (StatusCode::BAD_GATEWAY, "too many redirects").into_response(),
        Err(ProxyError::UnknownNode(node)) => {
            (StatusCode::NOT_FOUND, format!("owning node `{node}` is unknown")).into_response()
        }
        Err(e @ (ProxyError::Local(_) | ProxyError::Transport(_) | ProxyError::UpstreamStatus(_))) => {
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

fn serve_local_file(file: std::fs::File, path: &str, format: Option<&str>) -> Response {
    let file = tokio::fs::File::from_std(file);
    let stream = tokio_util::io::ReaderStream::new(file);
    let body = Body::from_stream(stream.map_err(std::io::Error::from));
    let content_type = if format == Some("txt") {
        "text/plain; charset=utf-8".to_string()
    } else {
        mime_guess::from_path(path).first_or_octet_stream().to_string()
    };
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .body(body)
        .expect("response builder")
}

fn serve_remote_body(resp: reqwest::Response) -> Response {
    let content_type = resp
        .headers()
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| header::HeaderValue::from_static("application/octet-stream"));
    let stream = resp.bytes_stream().map_err(std::io::Error::other);
    let body = Body::from_stream(stream);
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .body(body)
        .expect("response builder")
}

/// Renders a `<pre>`-formatted directory listing, filtering tombstones per
/// §4.1's listing filter and §8 scenario 4.
fn render_listing(node: &Arc<TreeNode>, path: &str) -> Response {
    let snapshot = node.readonly();
    let mut entries: Vec<(String, FileStat)> = snapshot
        .children
        .into_iter()
        .map(|(name, child)| (name, child.stat()))
        .filter(|(_, stat)| !stat.is_tombstone())
        .collect();
    entries.sort_by(|(an, astat), (bn, bstat)| {
        (!astat.is_dir, an).cmp(&(!bstat.is_dir, bn))
    });

    let mut html = String::new();
    html.push_str("<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Index of /");
    html.push_str(path);
    html.push_str("</title></head><body><h1>Index of /");
    html.push_str(path);
    html.push_str("</h1><hr/><pre>");
    if !path.is_empty() {
        html.push_str("<a href=\"../\">../</a>\r\n");
    }
    for (name, stat) in &entries {
        let display_name = if stat.is_dir { format!("{name}/") } else { name.clone() };
        let size = if stat.is_dir { "[DIR]".to_string() } else { stat.size().to_string() };
        let txt_link = if stat.is_dir {
            String::new()
        } else {
            format!(" <a href=\"{name}?format=txt\" title=\"view as plain text\">txt</a>")
        };
        html.push_str(&format!(
            "<a href=\"{display_name}\">{display_name}</a>  {size:>10}  {owner}{txt_link}\r\n",
            owner = stat.owner()
        ));
    }
    html.push_str("</pre><hr/></body></html>");

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Body::from(html))
        .expect("response builder")
}

#[derive(Debug, Deserialize, Default)]
struct FindQuery {
    path: Option<String>,
}

/// `GET /find/`: plaintext recursive listing, one path per line, tombstones
/// **included** (§8 scenario 4: "Find listing still includes it").
async fn get_find(State(state): State<AppState>, Query(query): Query<FindQuery>) -> Response {
    let start_path = query.path.unwrap_or_default();
    let Some(start) = state.fat_root.seek(start_path.trim_matches('/')) else {
        return (StatusCode::NOT_FOUND, format!("`{start_path}` not found in DFS")).into_response();
    };

    let mut lines = Vec::new();
    start.walk(|relative, _stat| {
        lines.push(relative.to_string());
        WalkControl::Continue
    });
    lines.sort();
    let mut body = lines.join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    (StatusCode::OK, body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::Request;
    use fat::FileAnnouncement;
    use localfs::LocalFs;
    use tower::ServiceExt;

    fn test_app() -> Router<()> {
        let root = TreeNode::new_root();
        root.update(vec![
            FileAnnouncement::new("/a.txt", 10, 1000, 5000, "me"),
            FileAnnouncement::tombstone("/gone.txt", 6000, "me"),
        ]);
        let localfs = Arc::new(LocalFs::new(".", "", "me"));
        let registry = cluster::Registry::new("c1", "me", "127.0.0.1:7040", "127.0.0.1:7041", Arc::clone(&root), Arc::clone(&localfs));
        let proxy = Arc::new(proxy::Proxy::new(registry, localfs));
        router(root, proxy)
    }

    #[tokio::test]
    async fn directory_listing_filters_tombstones() {
        let app = test_app();
        let resp = app.oneshot(Request::builder().uri("/fs/").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains("a.txt"));
        assert!(!html.contains("gone.txt"));
    }

    #[tokio::test]
    async fn missing_path_is_404() {
        let app = test_app();
        let resp = app.oneshot(Request::builder().uri("/fs/missing.txt").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn find_listing_includes_tombstones() {
        let app = test_app();
        let resp = app.oneshot(Request::builder().uri("/find/").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("gone.txt"));
        assert!(text.contains("a.txt"));
    }
}
