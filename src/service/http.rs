//! API and gateway listeners.
//!
//! Listeners are bound before any task starts, so a bad or busy address
//! aborts startup. Serving runs in its own task and stops gracefully on
//! cancellation.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::handle::ServiceHandle;
use super::{DaemonError, ServiceError};
use crate::metrics::PROMETHEUS_CONTENT_TYPE;
use crate::node::Node;
use crate::version;

/// Parse `/ip4/<ip>/tcp/<port>`, `/ip6/<ip>/tcp/<port>` or `<ip>:<port>`.
pub fn parse_listen_addr(addr: &str) -> Result<SocketAddr, DaemonError> {
    let invalid = || DaemonError::InvalidListenAddr(addr.to_string());

    if !addr.starts_with('/') {
        return addr.parse().map_err(|_| invalid());
    }

    let parts: Vec<&str> = addr.split('/').skip(1).collect();
    let [proto, ip, "tcp", port] = parts.as_slice() else {
        return Err(invalid());
    };
    let ip: IpAddr = match *proto {
        "ip4" => ip.parse::<std::net::Ipv4Addr>().map_err(|_| invalid())?.into(),
        "ip6" => ip.parse::<std::net::Ipv6Addr>().map_err(|_| invalid())?.into(),
        _ => return Err(invalid()),
    };
    let port: u16 = port.parse().map_err(|_| invalid())?;
    Ok(SocketAddr::new(ip, port))
}

/// Bind every address, returning each listener with its bound address.
pub async fn bind_listeners(
    service: &'static str,
    addrs: &[String],
) -> Result<Vec<(SocketAddr, TcpListener)>, DaemonError> {
    let mut listeners = Vec::with_capacity(addrs.len());
    for addr in addrs {
        let addr = parse_listen_addr(addr)?;
        let bind_err = |source| DaemonError::Bind {
            service,
            addr,
            source,
        };
        let listener = TcpListener::bind(addr).await.map_err(bind_err)?;
        let local = listener.local_addr().map_err(bind_err)?;
        listeners.push((local, listener));
    }
    Ok(listeners)
}

pub fn serve(
    service: &'static str,
    listener: TcpListener,
    router: Router,
    cancel: CancellationToken,
) -> ServiceHandle {
    ServiceHandle::spawn(service, async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
                info!("{} server shutting down", service);
            })
            .await
            .map_err(|source| ServiceError::Serve { service, source })
    })
}

// ============================================================================
// Routers
// ============================================================================

#[derive(Clone)]
struct ApiState {
    node: Arc<Node>,
}

pub fn api_router(node: Arc<Node>) -> Router {
    Router::new()
        .route("/api/v0/version", get(version_handler))
        .route("/api/v0/id", get(id_handler))
        .route("/debug/metrics/prometheus", get(metrics_handler))
        .with_state(ApiState { node })
}

/// Gateway routes. A read-only gateway refuses write methods with 405.
pub fn gateway_router(writable: bool) -> Router {
    Router::new()
        .route("/version", get(version_handler))
        .fallback(gateway_fallback)
        .with_state(writable)
}

async fn version_handler() -> Json<Value> {
    Json(json!({
        "Version": version::DAEMON_VERSION,
        "Repo": crate::repo::REPO_VERSION.to_string(),
        "System": version::system(),
    }))
}

async fn id_handler(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({ "ID": state.node.peer_id() }))
}

async fn metrics_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let node = &state.node;
    let storage = match node.storage().storage_usage().await {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!("Metrics scrape without storage usage: {}", e);
            None
        }
    };
    let body = node
        .metrics()
        .to_prometheus(storage, &node.exchange().ledger_totals());
    ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body)
}

async fn gateway_fallback(State(writable): State<bool>, method: Method) -> StatusCode {
    let write = matches!(method, Method::POST | Method::PUT | Method::DELETE | Method::PATCH);
    if write && !writable {
        StatusCode::METHOD_NOT_ALLOWED
    } else {
        StatusCode::NOT_FOUND
    }
}
