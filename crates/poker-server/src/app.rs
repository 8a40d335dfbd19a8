// Application state and orchestration logic.
//
// A single task owns the session hub and consumes WebSocket events one at a
// time, so every intent and the broadcasts it triggers run without
// interleaving with any other event. Outbound frames are pushed into each
// connection's queue without waiting.

use std::collections::HashMap;
use std::time::Duration;

use poker_core::protocol::decode_intent;
use poker_core::{ConnectionId, Delivery, Hub};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::ws_server::WsEvent;

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// The complete application state.
pub struct AppState {
    pub hub: Hub,
    /// Outbound queue of every live connection, bound to a session or not.
    pub outboxes: HashMap<ConnectionId, mpsc::Sender<String>>,
}

impl AppState {
    pub fn new(hub: Hub) -> Self {
        AppState {
            hub,
            outboxes: HashMap::new(),
        }
    }

    /// Apply one transport event.
    pub fn handle_event(&mut self, event: WsEvent) {
        match event {
            WsEvent::Connected { conn, addr, outbox } => {
                debug!("Connection {} registered from {}", conn, addr);
                self.outboxes.insert(conn, outbox);
            }
            WsEvent::Disconnected { conn } => {
                self.outboxes.remove(&conn);
                let deliveries = self.hub.disconnect(&conn);
                self.dispatch(deliveries);
            }
            WsEvent::Message { conn, text } => {
                self.handle_ws_message(&conn, &text);
            }
        }
    }

    /// Handle an incoming WebSocket message (JSON intent from a browser).
    fn handle_ws_message(&mut self, conn: &ConnectionId, json_str: &str) {
        let intent = match decode_intent(json_str) {
            Ok(intent) => intent,
            Err(e) => {
                warn!("Failed to parse message from {}: {}", conn, e);
                return;
            }
        };
        let deliveries = self.hub.handle(conn, intent);
        self.dispatch(deliveries);
    }

    /// Queue each delivery for its recipients. Never waits: a full queue
    /// drops the frame for that recipient.
    pub fn dispatch(&self, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            let kind = delivery.signal.kind();
            let json = match delivery.signal.encode() {
                Ok(json) => json,
                Err(e) => {
                    warn!("Dropping {}: {}", kind, e);
                    continue;
                }
            };

            for conn in &delivery.recipients {
                let Some(outbox) = self.outboxes.get(conn) else {
                    debug!("No outbox for {}, dropping {}", conn, kind);
                    continue;
                };
                match outbox.try_send(json.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!("Outbound queue full for {}, dropping {}", conn, kind);
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!("Outbox for {} closed, dropping {}", conn, kind);
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Main event loop
// ---------------------------------------------------------------------------

/// Run the main application event loop.
///
/// Listens on the WebSocket event channel and a stats timer using
/// `tokio::select!`. Exits when the event channel closes.
pub async fn run(
    mut ws_rx: mpsc::Receiver<WsEvent>,
    mut state: AppState,
    stats_interval: Duration,
) -> anyhow::Result<()> {
    info!("Application event loop started");

    let mut stats_timer = tokio::time::interval(stats_interval);
    // The first tick completes immediately; consume it so the first
    // report happens after one full interval.
    stats_timer.tick().await;

    loop {
        tokio::select! {
            ws_event = ws_rx.recv() => {
                match ws_event {
                    Some(event) => state.handle_event(event),
                    None => {
                        info!("WebSocket channel closed, shutting down");
                        break;
                    }
                }
            }

            _ = stats_timer.tick() => {
                let stats = state.hub.stats();
                info!(
                    "{} active sessions, {} bound connections, {} open sockets",
                    stats.sessions,
                    stats.connections,
                    state.outboxes.len()
                );
            }
        }
    }

    info!("Application event loop exiting");
    Ok(())
}
