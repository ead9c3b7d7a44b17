//! WebSocket transport for the notification bridge.
//!
//! The socket is split: the write half backs a [`Connection`] the bridge fans
//! notifications out to, the read half runs an inbound loop that only logs
//! frames. Whatever ends the read loop (close frame, error, panic, task
//! abort), the connection is detached and the transport closed.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, info, trace};

use multiroom_core::{ConnectionId, UserKey};
use multiroom_realtime::{Connection, ConnectionError, ConnectionHandle, NotificationBridge};

/// Write half of one client socket.
pub struct WsConnection {
    sink: Mutex<Option<SplitSink<WebSocket, Message>>>,
}

impl WsConnection {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink: Mutex::new(Some(sink)),
        }
    }
}

/// JSON payloads go out as text frames; anything else as binary.
fn frame(payload: &[u8]) -> Message {
    match std::str::from_utf8(payload) {
        Ok(text) => Message::Text(text.to_string()),
        Err(_) => Message::Binary(payload.to_vec()),
    }
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&self, payload: &[u8]) -> Result<(), ConnectionError> {
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(ConnectionError::Closed)?;
        sink.send(frame(payload))
            .await
            .map_err(|e| ConnectionError::Write(e.to_string()))
    }

    async fn close(&self) {
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        }
    }
}

/// Detaches the connection and closes its transport when dropped.
struct DetachGuard {
    bridge: NotificationBridge,
    key: UserKey,
    id: ConnectionId,
    conn: Arc<WsConnection>,
}

impl Drop for DetachGuard {
    fn drop(&mut self) {
        self.bridge.detach(&self.key, self.id);

        let conn = self.conn.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move { conn.close().await });
        }
    }
}

/// Serve one authenticated socket until the client goes away.
pub async fn serve_socket(socket: WebSocket, bridge: NotificationBridge, key: UserKey) {
    let (sink, mut stream) = socket.split();
    let conn = Arc::new(WsConnection::new(sink));
    let handle = ConnectionHandle::new(conn.clone());
    let connection_id = handle.id();

    let _guard = DetachGuard {
        bridge: bridge.clone(),
        key: key.clone(),
        id: connection_id,
        conn,
    };
    bridge.attach(&key, handle);

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                debug!(user_key = %key, %connection_id, bytes = text.len(), frame = %text, "inbound text frame")
            }
            Ok(Message::Binary(data)) => {
                debug!(user_key = %key, %connection_id, bytes = data.len(), "inbound binary frame")
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                trace!(user_key = %key, %connection_id, "keepalive")
            }
            Ok(Message::Close(_)) => break,
            Err(err) => {
                debug!(user_key = %key, %connection_id, error = %err, "read failed");
                break;
            }
        }
    }

    info!(user_key = %key, %connection_id, "socket closed");
}
