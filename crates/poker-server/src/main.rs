// Planning poker server entry point.
//
// Startup sequence:
// 1. Load config
// 2. Initialize tracing (stdout)
// 3. Build the session hub
// 4. Create the event channel and shutdown token
// 5. Bind and spawn the WebSocket server task
// 6. Bind and spawn the HTTP server-info task
// 7. Spawn the app logic task
// 8. Wait for Ctrl+C or the app loop to end
// 9. Cancel the shutdown token and wait for every task to drain

use poker_core::{Hub, SessionRegistry};
use poker_server::app;
use poker_server::config::{self, Config};
use poker_server::http_server;
use poker_server::ws_server;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const DEFAULT_LOG_FILTER: &str = "poker_server=info,poker_core=info,warn";
const SHUTDOWN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config
    let config = config::load_config().context("failed to load configuration")?;

    // 2. Initialize tracing
    init_tracing(&config)?;
    info!("Planning poker server starting up");
    info!(
        "Config loaded: http port {}, websocket port {}, {}-character session ids",
        config.server.http_port, config.websocket.port, config.sessions.id_length
    );

    // 3. Build the session hub
    let hub = Hub::new(SessionRegistry::new(config.sessions.id_length));
    let app_state = app::AppState::new(hub);

    // 4. Create the event channel and the shutdown token
    let (ws_tx, ws_rx) = mpsc::channel(256);
    let shutdown = CancellationToken::new();

    // 5. Bind and spawn the WebSocket server task
    let ws_listener = ws_server::bind(&config.server.host, config.websocket.port)
        .await
        .with_context(|| {
            format!(
                "failed to bind WebSocket server on {}:{}",
                config.server.host, config.websocket.port
            )
        })?;
    let ws_settings = ws_server::WsSettings::from(&config.websocket);
    let ws_shutdown = shutdown.clone();
    let mut ws_handle = tokio::spawn(async move {
        if let Err(e) = ws_server::run(ws_listener, ws_tx, ws_settings, ws_shutdown).await {
            error!("WebSocket server error: {}", e);
        }
    });

    // 6. Bind and spawn the HTTP server-info task
    let http_listener = http_server::bind(&config.server.host, config.server.http_port)
        .await
        .with_context(|| {
            format!(
                "failed to bind HTTP server on {}:{}",
                config.server.host, config.server.http_port
            )
        })?;
    let info = server_info(&config);
    log_urls(&info);
    let http_shutdown = shutdown.clone();
    let mut http_handle = tokio::spawn(async move {
        if let Err(e) = http_server::run(http_listener, info, http_shutdown).await {
            error!("HTTP server error: {}", e);
        }
    });

    // 7. Spawn app logic task
    let stats_interval = config.sessions.stats_interval();
    let mut app_handle = tokio::spawn(async move {
        if let Err(e) = app::run(ws_rx, app_state, stats_interval).await {
            error!("Application loop error: {}", e);
        }
    });

    // 8. Wait for Ctrl+C or the app loop to end
    let app_finished = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Ctrl+C received, shutting down"),
                Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
            }
            false
        }
        _ = &mut app_handle => {
            info!("Application loop ended");
            true
        }
    };

    // 9. Cleanup: the token stops the listeners and closes every client
    // socket. Once the last connection task reports its disconnect, the
    // event channel closes and the app loop returns.
    shutdown.cancel();
    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = (&mut ws_handle).await;
        let _ = (&mut http_handle).await;
        if !app_finished {
            let _ = (&mut app_handle).await;
        }
    })
    .await;
    if drained.is_err() {
        warn!("Shutdown timed out after {:?}, aborting remaining tasks", SHUTDOWN_TIMEOUT);
        ws_handle.abort();
        http_handle.abort();
        if !app_finished {
            app_handle.abort();
        }
    }

    info!("Planning poker server shut down cleanly");
    Ok(())
}

fn server_info(config: &Config) -> http_server::ServerInfo {
    http_server::ServerInfo {
        ip: http_server::public_host(config.server.public_host.as_deref()),
        port: config.server.http_port,
        ws_port: config.websocket.port,
        started_at: chrono::Utc::now(),
    }
}

fn log_urls(info: &http_server::ServerInfo) {
    info!("Planning poker server running on:");
    info!("  - Local:   http://localhost:{}", info.port);
    info!("  - Network: http://{}:{}", info.ip, info.port);
    info!("  - WebSocket: ws://{}:{}", info.ip, info.ws_port);
}

/// Initialize tracing to stdout. `RUST_LOG` wins over the configured filter.
fn init_tracing(config: &Config) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let fallback = config
        .logging
        .filter
        .as_deref()
        .unwrap_or(DEFAULT_LOG_FILTER);

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_target(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
