//! Fan-out of signed event batches and heartbeats to connected WebSocket
//! clients (spec §4.6). Built on `tokio::sync::broadcast`, the same
//! primitive the teacher's `AppState::broadcast_registry` uses per stream —
//! Canaria only ever has one logical stream, so there is a single channel
//! rather than a `HashMap<Uuid, _>` of them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use canaria_protocol::WsFrame;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;

pub struct ConnectionHub {
    tx: broadcast::Sender<WsFrame>,
    connected: AtomicUsize,
    total_connections: AtomicUsize,
}

impl ConnectionHub {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        ConnectionHub {
            tx,
            connected: AtomicUsize::new(0),
            total_connections: AtomicUsize::new(0),
        }
    }

    /// Subscribe a new WebSocket connection. Callers must send the current
    /// snapshot frame to the client themselves before consuming this
    /// receiver, since a fresh subscriber only sees frames broadcast after
    /// this call (spec §4.6 snapshot-then-stream ordering).
    pub fn subscribe(&self) -> broadcast::Receiver<WsFrame> {
        self.connected.fetch_add(1, Ordering::SeqCst);
        self.total_connections.fetch_add(1, Ordering::SeqCst);
        self.tx.subscribe()
    }

    /// Call once the connection's receive loop exits.
    pub fn unregister(&self) {
        self.connected.fetch_sub(1, Ordering::SeqCst);
    }

    /// Best-effort fan-out; a lagged or closed receiver never blocks or
    /// fails the sender.
    pub fn broadcast(&self, frame: WsFrame) {
        let _ = self.tx.send(frame);
    }

    pub fn size(&self) -> usize {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn total_connection_count(&self) -> usize {
        self.total_connections.load(Ordering::SeqCst)
    }
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs for the lifetime of the process: sends a `ping` frame on the shared
/// channel every 60 seconds so that idle clients and intermediaries don't
/// time out the connection (spec §4.6).
pub async fn run_keepalive(hub: Arc<ConnectionHub>) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
    loop {
        interval.tick().await;
        hub.broadcast(canaria_protocol::ping());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_only_see_frames_sent_after_they_joined() {
        let hub = ConnectionHub::new();
        hub.broadcast(canaria_protocol::ping());
        let mut rx = hub.subscribe();
        hub.broadcast(canaria_protocol::ping());
        let received = rx.recv().await.unwrap();
        assert!(matches!(received, WsFrame::Ping { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn size_tracks_register_and_unregister() {
        let hub = ConnectionHub::new();
        let _rx1 = hub.subscribe();
        let _rx2 = hub.subscribe();
        assert_eq!(hub.size(), 2);
        hub.unregister();
        assert_eq!(hub.size(), 1);
        assert_eq!(hub.total_connection_count(), 2);
    }
}
