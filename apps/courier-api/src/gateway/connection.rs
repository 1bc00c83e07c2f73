//! Per-subscriber connection state and the transport seam.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

/// Lifecycle of one subscriber connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Open,
    Closing,
    Closed,
}

/// A failed send on one subscriber's transport. Contained to that
/// connection; it never crosses over to siblings or the broadcast caller.
#[derive(Debug)]
pub struct SendError(pub String);

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport send failed: {}", self.0)
    }
}

impl std::error::Error for SendError {}

/// Outbound side of a subscriber's transport.
///
/// Implementations must serialize concurrent `send_text` calls on the same
/// transport so interleaved broadcasts cannot corrupt the frame stream.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one text frame to the subscriber.
    async fn send_text(&self, payload: &str) -> Result<(), SendError>;

    /// Send a close frame. Failures are ignored; the peer may already be gone.
    async fn close(&self);
}

/// Production transport: the write half of an axum WebSocket.
///
/// The sink lives behind an async mutex so a broadcast send and a close ack
/// never interleave on the wire.
pub struct WsTransport {
    sink: AsyncMutex<SplitSink<WebSocket, Message>>,
}

impl WsTransport {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink: AsyncMutex::new(sink),
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&self, payload: &str) -> Result<(), SendError> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(payload.to_string().into()))
            .await
            .map_err(|e| SendError(e.to_string()))
    }

    async fn close(&self) {
        let mut sink = self.sink.lock().await;
        let _ = sink.send(Message::Close(None)).await;
    }
}

/// One subscriber's live connection: opaque session id, lifecycle state,
/// and the transport used to reach it.
pub struct Connection {
    pub session_id: String,
    state: Mutex<ConnState>,
    transport: Arc<dyn Transport>,
}

impl Connection {
    pub fn new(session_id: String, transport: Arc<dyn Transport>) -> Self {
        Self {
            session_id,
            state: Mutex::new(ConnState::Open),
            transport,
        }
    }

    pub fn state(&self) -> ConnState {
        *self.state.lock()
    }

    pub fn set_state(&self, next: ConnState) {
        *self.state.lock() = next;
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnState::Open
    }

    pub async fn send_text(&self, payload: &str) -> Result<(), SendError> {
        self.transport.send_text(payload).await
    }

    /// Acknowledge/initiate close on the transport.
    pub async fn close(&self) {
        self.transport.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopTransport;

    #[async_trait]
    impl Transport for NoopTransport {
        async fn send_text(&self, _payload: &str) -> Result<(), SendError> {
            Ok(())
        }

        async fn close(&self) {}
    }

    #[test]
    fn new_connection_starts_open() {
        let conn = Connection::new("sub_a".to_string(), Arc::new(NoopTransport));
        assert_eq!(conn.state(), ConnState::Open);
        assert!(conn.is_open());
    }

    #[test]
    fn state_transitions() {
        let conn = Connection::new("sub_a".to_string(), Arc::new(NoopTransport));

        conn.set_state(ConnState::Closing);
        assert_eq!(conn.state(), ConnState::Closing);
        assert!(!conn.is_open());

        conn.set_state(ConnState::Closed);
        assert_eq!(conn.state(), ConnState::Closed);
        assert!(!conn.is_open());
    }
}
