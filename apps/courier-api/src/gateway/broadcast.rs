//! Fan-out engine: deliver one payload to every registered subscriber.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::time;

use super::connection::ConnState;
use super::registry::ConnectionRegistry;

/// Upper bound on a single subscriber's send. A subscriber that cannot
/// accept the frame within this window is treated as failed and reaped, so
/// one slow consumer can only delay broadcast completion by this much.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// The broadcast engine. Cloneable — store in `AppState`.
///
/// `broadcast` is fire-and-forget from the caller's perspective: individual
/// subscriber failures are logged and reaped, never surfaced.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver `payload` to every connection in a registry snapshot taken at
    /// call time. Returns the number of delivery attempts.
    ///
    /// Sends run as independent tasks and are joined before returning; a
    /// failed or timed-out send marks that one connection closed and removes
    /// it, without cancelling the others. Entries found non-open at snapshot
    /// time are reaped immediately. An empty payload is a silent no-op.
    pub async fn broadcast(&self, payload: &str) -> usize {
        if payload.is_empty() {
            return 0;
        }

        let payload: Arc<str> = Arc::from(payload);
        let snapshot = self.registry.snapshot();
        let mut sends = Vec::with_capacity(snapshot.len());

        for conn in snapshot {
            if !conn.is_open() {
                tracing::warn!(session_id = %conn.session_id, "subscriber no longer open, reaping");
                self.registry.remove(&conn.session_id);
                continue;
            }

            tracing::debug!(session_id = %conn.session_id, "dispatching frame");
            let payload = Arc::clone(&payload);
            let registry = Arc::clone(&self.registry);
            sends.push(tokio::spawn(async move {
                match time::timeout(SEND_TIMEOUT, conn.send_text(&payload)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(
                            session_id = %conn.session_id,
                            error = %e,
                            "send failed, reaping subscriber"
                        );
                        conn.set_state(ConnState::Closed);
                        registry.remove(&conn.session_id);
                    }
                    Err(_) => {
                        tracing::warn!(
                            session_id = %conn.session_id,
                            timeout_secs = SEND_TIMEOUT.as_secs(),
                            "send timed out, reaping subscriber"
                        );
                        conn.set_state(ConnState::Closed);
                        registry.remove(&conn.session_id);
                    }
                }
            }));
        }

        let attempts = sends.len();

        // Wait for every per-connection attempt to resolve. A panicked send
        // task surfaces here as a JoinError and is contained like any other
        // per-connection failure.
        for result in join_all(sends).await {
            if let Err(e) = result {
                tracing::error!(?e, "broadcast send task aborted");
            }
        }

        tracing::debug!(attempts, "broadcast complete");
        attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::connection::{Connection, SendError, Transport};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<String>>,
        fail: bool,
    }

    impl RecordingTransport {
        fn failing() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send_text(&self, payload: &str) -> Result<(), SendError> {
            if self.fail {
                return Err(SendError("simulated transport failure".to_string()));
            }
            self.sent.lock().push(payload.to_string());
            Ok(())
        }

        async fn close(&self) {}
    }

    fn register(
        registry: &Arc<ConnectionRegistry>,
        id: &str,
        transport: Arc<RecordingTransport>,
    ) -> Arc<Connection> {
        let conn = Arc::new(Connection::new(id.to_string(), transport));
        registry.add(id.to_string(), conn.clone());
        conn
    }

    #[tokio::test]
    async fn delivers_identical_payload_to_every_open_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());

        let transports: Vec<Arc<RecordingTransport>> = (0..3)
            .map(|_| Arc::new(RecordingTransport::default()))
            .collect();
        for (i, transport) in transports.iter().enumerate() {
            register(&registry, &format!("sub_{i}"), transport.clone());
        }

        let attempts = broadcaster.broadcast("hello").await;

        assert_eq!(attempts, 3);
        for transport in &transports {
            assert_eq!(transport.sent(), vec!["hello".to_string()]);
        }
        assert_eq!(registry.len(), 3);
    }

    #[tokio::test]
    async fn failed_send_is_isolated_and_reaps_only_that_subscriber() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());

        let a = Arc::new(RecordingTransport::default());
        let b = Arc::new(RecordingTransport::failing());
        let c = Arc::new(RecordingTransport::default());
        register(&registry, "sub_a", a.clone());
        register(&registry, "sub_b", b.clone());
        register(&registry, "sub_c", c.clone());

        let attempts = broadcaster.broadcast("hello").await;

        // B was attempted, failed, and got removed; A and C are untouched.
        assert_eq!(attempts, 3);
        assert_eq!(a.sent(), vec!["hello".to_string()]);
        assert_eq!(c.sent(), vec!["hello".to_string()]);
        assert!(b.sent().is_empty());
        assert!(!registry.contains("sub_b"));
        assert!(registry.contains("sub_a"));
        assert!(registry.contains("sub_c"));
    }

    #[tokio::test]
    async fn non_open_connection_is_lazily_reaped_without_an_attempt() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());

        let live = Arc::new(RecordingTransport::default());
        let dead = Arc::new(RecordingTransport::default());
        register(&registry, "sub_live", live.clone());
        let dead_conn = register(&registry, "sub_dead", dead.clone());
        dead_conn.set_state(ConnState::Closed);

        let attempts = broadcaster.broadcast("hello").await;

        assert_eq!(attempts, 1);
        assert_eq!(live.sent(), vec!["hello".to_string()]);
        assert!(dead.sent().is_empty());
        assert!(!registry.contains("sub_dead"));
    }

    #[tokio::test]
    async fn empty_payload_is_a_silent_noop() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());

        let transport = Arc::new(RecordingTransport::default());
        register(&registry, "sub_a", transport.clone());

        let attempts = broadcaster.broadcast("").await;

        assert_eq!(attempts, 0);
        assert!(transport.sent().is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn broadcast_with_no_connections_succeeds() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());

        assert_eq!(broadcaster.broadcast("ping").await, 0);
    }

    #[tokio::test]
    async fn payload_bytes_survive_untouched() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());

        let transport = Arc::new(RecordingTransport::default());
        register(&registry, "sub_a", transport.clone());

        let payload = r#"{"id":1,"content":"héllo ✓","sequence_number":7}"#;
        broadcaster.broadcast(payload).await;

        assert_eq!(transport.sent(), vec![payload.to_string()]);
    }
}
