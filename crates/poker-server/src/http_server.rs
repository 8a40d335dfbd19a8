// HTTP side channel. Serves the address browsers should share to invite
// others; all session traffic stays on the WebSocket port.

use std::net::{IpAddr, UdpSocket};

use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Body of `GET /api/server-info`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub ip: String,
    pub port: u16,
    pub ws_port: u16,
    pub started_at: DateTime<Utc>,
}

pub fn router(info: ServerInfo) -> Router {
    Router::new()
        .route("/api/server-info", get(server_info_handler))
        .with_state(info)
}

async fn server_info_handler(State(info): State<ServerInfo>) -> Json<ServerInfo> {
    Json(info)
}

pub async fn bind(host: &str, port: u16) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind((host, port)).await?;
    Ok(listener)
}

/// Serve the router until `shutdown` fires.
pub async fn run(
    listener: TcpListener,
    info: ServerInfo,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let local_addr = listener.local_addr()?;
    info!("HTTP server listening on {local_addr}");
    axum::serve(listener, router(info))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("HTTP server on {local_addr} stopped");
    Ok(())
}

/// The host to advertise: the configured one if set, else the machine's
/// LAN address, else `localhost`.
pub fn public_host(configured: Option<&str>) -> String {
    if let Some(host) = configured.map(str::trim).filter(|h| !h.is_empty()) {
        return host.to_string();
    }
    match local_ip() {
        Some(ip) => ip.to_string(),
        None => "localhost".to_string(),
    }
}

/// Discover the outbound IPv4 address. Connecting a UDP socket only consults
/// the routing table; no packets are sent.
pub fn local_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    if let Err(e) = socket.connect("8.8.8.8:80") {
        debug!("No route for local IP discovery: {e}");
        return None;
    }
    let ip = socket.local_addr().ok()?.ip();
    if ip.is_unspecified() || ip.is_loopback() {
        None
    } else {
        Some(ip)
    }
}
