// WebSocket server for browser clients.

use std::fmt::Display;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use futures_util::stream::Stream;
use futures_util::{Sink, SinkExt, StreamExt};
use poker_core::ConnectionId;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::WebsocketConfig;

/// Events emitted by the WebSocket server to the application layer.
#[derive(Debug)]
pub enum WsEvent {
    /// A client finished the handshake. Frames pushed into `outbox` are
    /// written to it as text.
    Connected {
        conn: ConnectionId,
        addr: String,
        outbox: mpsc::Sender<String>,
    },
    /// The client is gone (close frame, transport error, or idle timeout).
    /// Sent exactly once per `Connected`.
    Disconnected { conn: ConnectionId },
    /// A text message was received from the client (raw JSON string).
    Message { conn: ConnectionId, text: String },
}

/// Per-connection transport settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WsSettings {
    pub outbound_buffer: usize,
    pub ping_interval: Duration,
    pub idle_timeout: Duration,
}

impl From<&WebsocketConfig> for WsSettings {
    fn from(config: &WebsocketConfig) -> Self {
        WsSettings {
            outbound_buffer: config.outbound_buffer,
            ping_interval: config.ping_interval(),
            idle_timeout: config.idle_timeout(),
        }
    }
}

/// Bind the listening socket. Port 0 picks a free port.
pub async fn bind(host: &str, port: u16) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind((host, port)).await?;
    Ok(listener)
}

/// Pause after a failed `accept` (e.g. out of file descriptors) so the loop
/// does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Accept clients until `shutdown` fires, forwarding their events through
/// `tx`.
///
/// Each accepted socket gets its own task and a fresh [`ConnectionId`].
/// Connection tasks watch the same token, so once they have all reported
/// their disconnect every clone of `tx` is gone and the receiver sees the
/// channel close.
pub async fn run(
    listener: TcpListener,
    tx: mpsc::Sender<WsEvent>,
    settings: WsSettings,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let local_addr = listener.local_addr()?;
    info!("WebSocket server listening on {local_addr}");

    let listener = &listener;
    let mut next_id: u64 = 0;
    while let Some((stream, addr)) =
        accept_with_backoff(move || listener.accept(), &shutdown).await
    {
        if tx.is_closed() {
            break;
        }

        next_id += 1;
        let conn = ConnectionId::new(format!("conn-{next_id}"));
        tokio::spawn(serve_connection(
            stream,
            addr,
            conn,
            tx.clone(),
            settings,
            shutdown.clone(),
        ));
    }

    info!("WebSocket server on {local_addr} stopped accepting");
    Ok(())
}

/// Wait for the next accepted connection, sleeping [`ACCEPT_ERROR_BACKOFF`]
/// after each failure. Returns `None` once `shutdown` fires.
async fn accept_with_backoff<T, F, Fut>(mut accept: F, shutdown: &CancellationToken) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    loop {
        tokio::select! {
            accepted = accept() => match accepted {
                Ok(value) => return Some(value),
                Err(e) => {
                    warn!("Failed to accept TCP connection: {e}, retrying in {ACCEPT_ERROR_BACKOFF:?}");
                }
            },
            () = shutdown.cancelled() => return None,
        }

        tokio::select! {
            () = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => {}
            () = shutdown.cancelled() => return None,
        }
    }
}

/// Handshake, pump frames both ways until the client goes away, then report
/// the disconnect.
async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    conn: ConnectionId,
    tx: mpsc::Sender<WsEvent>,
    settings: WsSettings,
    shutdown: CancellationToken,
) {
    let addr_str = addr.to_string();
    let handshake = tokio_tungstenite::accept_async(stream);
    let ws_stream = match tokio::time::timeout(settings.idle_timeout, handshake).await {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            warn!("WebSocket handshake failed for {addr_str}: {e}");
            return;
        }
        Err(_) => {
            warn!(
                "No WebSocket handshake from {addr_str} within {:?}, closing",
                settings.idle_timeout
            );
            return;
        }
    };
    info!("User connected: {conn} from {addr_str}");

    let (outbox_tx, outbox_rx) = mpsc::channel(settings.outbound_buffer);
    let connected = WsEvent::Connected {
        conn: conn.clone(),
        addr: addr_str,
        outbox: outbox_tx,
    };
    if tx.send(connected).await.is_err() {
        return;
    }

    let (write, read) = ws_stream.split();
    let _ = drive_connection(read, write, outbox_rx, &tx, &conn, settings, &shutdown).await;

    info!("User disconnected: {conn}");
    let _ = tx.send(WsEvent::Disconnected { conn }).await;
}

/// Pump one connection: forward inbound text frames through `tx`, write
/// queued outbound frames to `write`, and ping on an interval.
///
/// Ends on a close frame, a transport error, end of stream, an idle
/// timeout, shutdown, or when the outbox is closed. Returns `Err(())` if the
/// event channel is closed (receiver dropped), signalling the caller to stop.
///
/// Generic over the stream and sink so it can be tested with in-memory
/// streams without opening TCP ports.
pub async fn drive_connection<St, Si>(
    mut read: St,
    mut write: Si,
    mut outbox: mpsc::Receiver<String>,
    tx: &mpsc::Sender<WsEvent>,
    conn: &ConnectionId,
    settings: WsSettings,
    shutdown: &CancellationToken,
) -> Result<(), ()>
where
    St: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    let mut ping = tokio::time::interval(settings.ping_interval);
    // The first tick completes immediately; consume it so the first ping
    // goes out after one full interval.
    ping.tick().await;
    let mut last_inbound = Instant::now();

    let outcome = loop {
        tokio::select! {
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        last_inbound = Instant::now();
                        let event = WsEvent::Message {
                            conn: conn.clone(),
                            text: text.to_string(),
                        };
                        if tx.send(event).await.is_err() {
                            break Err(());
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client {conn} sent close frame");
                        break Ok(());
                    }
                    Some(Ok(_)) => {
                        // Binary, Ping, Pong, Frame: not forwarded, but they
                        // prove the peer is alive.
                        last_inbound = Instant::now();
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error from {conn}: {e}");
                        break Ok(());
                    }
                    None => break Ok(()),
                }
            }

            outgoing = outbox.recv() => {
                match outgoing {
                    Some(text) => {
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            warn!("Failed to write to {conn}: {e}");
                            break Ok(());
                        }
                    }
                    None => {
                        debug!("Outbox for {conn} closed");
                        break Ok(());
                    }
                }
            }

            _ = ping.tick() => {
                let idle = last_inbound.elapsed();
                if idle > settings.idle_timeout {
                    warn!("No frames from {conn} for {idle:?}, closing connection");
                    break Ok(());
                }
                if let Err(e) = write.send(Message::Ping(Vec::<u8>::new().into())).await {
                    warn!("Failed to ping {conn}: {e}");
                    break Ok(());
                }
            }

            () = shutdown.cancelled() => {
                debug!("Closing {conn} for shutdown");
                break Ok(());
            }
        }
    };

    let _ = write.close().await;
    outcome
}
