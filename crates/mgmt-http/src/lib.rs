//! Management HTTP surface (§6 "Management HTTP"): the peer-to-peer control
//! plane for greeting, operator-initiated join, and update reception.

mod panic_catch;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{ConnectInfo, Query, State};
use axum::http::{header::CONTENT_TYPE, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use cluster::{combine_host_and_port, GreetState, NodeUpdate, PublicClusterInfo, Registry, UpdateData};

pub use panic_catch::CatchPanicLayer;

#[derive(Clone)]
struct AppState {
    registry: Arc<Registry>,
}

/// Builds the management HTTP router. The caller is responsible for serving
/// it with `axum::serve` using `into_make_service_with_connect_info::<SocketAddr>()`
/// so `POST /cluster/` can observe the caller's address for rewriting.
pub fn router(registry: Arc<Registry>) -> Router<()> {
    Router::new()
        .route("/", get(help))
        .route("/cluster/", get(get_cluster).post(post_cluster))
        .route("/join/", post(post_join))
        .route("/update/", post(post_update))
        .layer(CatchPanicLayer)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { registry })
}

async fn help() -> &'static str {
    "dftp management endpoint.\n\n\
     GET  /           this text\n\
     GET  /cluster/   cluster membership as JSON\n\
     POST /cluster/   greet this node (name, public-addr, mgmt-addr[, request-full-update])\n\
     POST /join/?peer=host:port   operator-initiated cluster join\n\
     POST /update/    receive a full or partial tree update\n"
}

async fn get_cluster(State(state): State<AppState>) -> Json<PublicClusterInfo> {
    Json(state.registry.public_info())
}

#[derive(Debug, Deserialize)]
struct GreetForm {
    name: String,
    #[serde(rename = "public-addr")]
    public_addr: String,
    #[serde(rename = "mgmt-addr")]
    mgmt_addr: String,
    #[serde(rename = "request-full-update", default)]
    request_full_update: Option<String>,
}

/// `POST /cluster/`: the peer's submitted addresses have their host
/// component substituted by the observed remote IP (§6, §8 "Address
/// rewriting"), then the sender is folded into the registry.
async fn post_cluster(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    axum::extract::Form(form): axum::extract::Form<GreetForm>,
) -> Json<PublicClusterInfo> {
    let remote_addr = remote.to_string();
    let rewritten_public = combine_host_and_port(&remote_addr, &form.public_addr);
    let rewritten_mgmt = combine_host_and_port(&remote_addr, &form.mgmt_addr);

    state.registry.update_node(NodeUpdate {
        name: form.name.clone(),
        public_addr: rewritten_public,
        mgmt_addr: rewritten_mgmt,
        last_alive: now(),
        greet_state: GreetState::Never,
    });

    if form.request_full_update.as_deref() == Some("true") {
        if let Some(peer) = state.registry.peer(&form.name) {
            state.registry.schedule_push(peer);
        }
    }

    Json(state.registry.public_info())
}

/// `POST /join/?peer=host:port` (repeatable). Method is POST-only; any other
/// verb on this path falls through to axum's built-in 405.
async fn post_join(State(state): State<AppState>, Query(params): Query<Vec<(String, String)>>) -> StatusCode {
    for (key, addr) in params {
        if key != "peer" {
            continue;
        }
        let registry = Arc::clone(&state.registry);
        let addr_for_log = addr.clone();
        tokio::spawn(async move {
            if let Err(e) = registry.greet_node(&addr, true).await {
                tracing::warn!(peer = %addr_for_log, error = %e, "mgmt-http: operator join failed");
            }
        });
    }
    StatusCode::OK
}

/// `POST /update/`: `Content-Type` must be `application/json`; a malformed
/// body or wrong content type is a protocol error (400). Reception is
/// dispatched asynchronously so the HTTP response does not wait on the FAT
/// tree merge.
async fn post_update(State(state): State<AppState>, headers: HeaderMap, body: axum::body::Bytes) -> impl IntoResponse {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !content_type.starts_with("application/json") {
        return (StatusCode::BAD_REQUEST, "Content-Type must be application/json").into_response();
    }

    let update: UpdateData = match serde_json::from_slice(&body) {
        Ok(u) => u,
        Err(e) => return (StatusCode::BAD_REQUEST, format!("malformed update body: {e}")).into_response(),
    };

    let registry = Arc::clone(&state.registry);
    tokio::spawn(async move {
        registry.receive_update(update);
    });

    (StatusCode::OK, "ok").into_response()
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}
