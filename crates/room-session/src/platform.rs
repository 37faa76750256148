//! Platform collaborators: host network reachability and audio routing.

use crate::errors::NetworkError;

use tokio::sync::mpsc;
use tracing::trace;

/// Host network reachability change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    /// A usable network became available.
    Available,
    /// The host lost its network.
    Lost,
}

/// Where a [`NetworkMonitor`] delivers reachability notifications.
#[derive(Debug, Clone)]
pub struct NetworkEventSink {
    sender: mpsc::UnboundedSender<NetworkEvent>,
}

impl NetworkEventSink {
    pub(crate) fn new(sender: mpsc::UnboundedSender<NetworkEvent>) -> Self {
        Self { sender }
    }

    /// Deliver a notification. Returns `false` once the session stopped listening.
    pub fn notify(&self, event: NetworkEvent) -> bool {
        if self.sender.send(event).is_err() {
            trace!(
                target: "room.platform",
                event = ?event,
                "Network event dropped, session no longer listening"
            );
            return false;
        }
        true
    }

    /// Create a sink over a caller-owned channel, for tests.
    #[cfg(any(test, feature = "test-utils"))]
    #[must_use]
    pub fn from_test_channel(sender: mpsc::UnboundedSender<NetworkEvent>) -> Self {
        Self { sender }
    }
}

/// Platform network-reachability notifications.
pub trait NetworkMonitor: Send + Sync {
    /// Start delivering notifications to `sink`, replacing any previous sink.
    fn register(&self, sink: NetworkEventSink) -> Result<(), NetworkError>;

    /// Stop delivering notifications.
    ///
    /// Returns [`NetworkError::NotRegistered`] when nothing is registered.
    fn unregister(&self) -> Result<(), NetworkError>;
}

/// Monitor for hosts without reachability signals.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNetworkMonitor;

impl NetworkMonitor for NoopNetworkMonitor {
    fn register(&self, _sink: NetworkEventSink) -> Result<(), NetworkError> {
        Ok(())
    }

    fn unregister(&self) -> Result<(), NetworkError> {
        Ok(())
    }
}

/// Audio routing or a platform audio workaround, active while a session is live.
pub trait AudioHandler: Send + Sync {
    /// Called on entering `Connecting`.
    fn start(&self);

    /// Called on entering `Disconnected`.
    fn stop(&self);
}
