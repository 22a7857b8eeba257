//! WebSocket relay link over `tokio-tungstenite`
//!
//! A writer task owns the sink and a reader task decodes inbound text frames
//! onto the broadcast channel; undecodable frames are logged and skipped.

use super::messages::{decode_server, encode, ClientMessage, ServerMessage};
use super::{RelayLink, INBOUND_CAPACITY};
use crate::error::{MeshError, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

struct Connection {
    outbound: mpsc::UnboundedSender<Message>,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

pub struct WsRelay {
    url: String,
    inbound: broadcast::Sender<ServerMessage>,
    conn: Mutex<Option<Connection>>,
}

impl WsRelay {
    pub fn new(url: impl Into<String>) -> Self {
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);
        Self {
            url: url.into(),
            inbound,
            conn: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RelayLink for WsRelay {
    fn is_connected(&self) -> bool {
        self.conn
            .lock()
            .as_ref()
            .is_some_and(|c| c.alive.load(Ordering::Acquire))
    }

    async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let (stream, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| MeshError::Relay(format!("connect to {} failed: {e}", self.url)))?;
        let (mut sink, mut source) = stream.split();
        info!(url = %self.url, "relay connected");

        let alive = Arc::new(AtomicBool::new(true));
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

        let writer_alive = Arc::clone(&alive);
        let writer = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if let Err(e) = sink.send(msg).await {
                    warn!(error = %e, "relay write failed");
                    break;
                }
            }
            writer_alive.store(false, Ordering::Release);
            let _ = sink.close().await;
        });

        let reader_alive = Arc::clone(&alive);
        let pong = outbound.clone();
        let inbound = self.inbound.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => match decode_server(&text) {
                        Ok(msg) => {
                            debug!(event = msg.event(), "relay frame");
                            let _ = inbound.send(msg);
                        }
                        Err(e) => warn!(error = %e, "skipping malformed relay frame"),
                    },
                    Ok(Message::Ping(data)) => {
                        let _ = pong.send(Message::Pong(data));
                    }
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "relay closed by server");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "relay read failed");
                        break;
                    }
                }
            }
            reader_alive.store(false, Ordering::Release);
        });

        let previous = self.conn.lock().replace(Connection {
            outbound,
            alive,
            reader,
            writer,
        });
        if let Some(stale) = previous {
            stale.reader.abort();
            stale.writer.abort();
        }
        Ok(())
    }

    async fn disconnect(&self) {
        let Some(conn) = self.conn.lock().take() else {
            return;
        };
        conn.alive.store(false, Ordering::Release);
        let _ = conn.outbound.send(Message::Close(None));
        drop(conn.outbound);
        conn.reader.abort();
        // writer drains the close frame and exits once the channel is dropped
        let _ = conn.writer.await;
        info!(url = %self.url, "relay disconnected");
    }

    async fn send(&self, msg: ClientMessage) -> Result<()> {
        let text = encode(&msg)?;
        let guard = self.conn.lock();
        let conn = guard
            .as_ref()
            .filter(|c| c.alive.load(Ordering::Acquire))
            .ok_or(MeshError::RelayDisconnected)?;
        debug!(event = msg.event(), "relay send");
        conn.outbound
            .send(Message::Text(text))
            .map_err(|_| MeshError::RelayDisconnected)
    }

    fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.inbound.subscribe()
    }
}

impl Drop for WsRelay {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.get_mut().take() {
            conn.reader.abort();
            conn.writer.abort();
        }
    }
}
