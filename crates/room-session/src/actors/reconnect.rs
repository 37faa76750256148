//! Reconnection control.
//!
//! Tracks host reachability and builds the sync state replayed to the server
//! after a resumed signaling connection. The transition decisions live here;
//! the session actor performs the engine calls.

use crate::directory::Directory;
use crate::engine::{SyncState, UpdateSubscription};
use crate::participant::LocalParticipant;
use crate::platform::NetworkEvent;
use crate::types::{ConnectionState, TrackSid};

use tracing::debug;

#[derive(Debug, Default)]
pub(crate) struct ReconnectController {
    has_lost_connectivity: bool,
}

impl ReconnectController {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record a reachability change. Returns `true` when the engine should be
    /// asked to reconnect.
    ///
    /// Losing the network only arms the flag. The next `Available` triggers a
    /// reconnect (unless one is already running) and clears it.
    pub(crate) fn on_network_event(&mut self, event: NetworkEvent, state: ConnectionState) -> bool {
        match event {
            NetworkEvent::Lost => {
                debug!(target: "room.reconnect", "Host network lost");
                self.has_lost_connectivity = true;
                false
            }
            NetworkEvent::Available => {
                if !self.has_lost_connectivity {
                    return false;
                }
                self.has_lost_connectivity = false;
                match state {
                    ConnectionState::Connected | ConnectionState::Connecting => {
                        debug!(
                            target: "room.reconnect",
                            state = state.as_str(),
                            "Host network restored, requesting reconnect"
                        );
                        true
                    }
                    ConnectionState::Reconnecting | ConnectionState::Disconnected => false,
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn has_lost_connectivity(&self) -> bool {
        self.has_lost_connectivity
    }
}

/// Sync state for a resumed connection.
///
/// With auto-subscribe the server subscribes to everything, so the message
/// lists the tracks that are not subscribed (`subscribe = false`). Without it
/// the message lists the subscribed tracks (`subscribe = true`).
pub(crate) fn build_sync_state(
    directory: &Directory,
    local: &LocalParticipant,
    auto_subscribe: bool,
) -> SyncState {
    let subscribe = !auto_subscribe;
    let mut track_sids: Vec<TrackSid> = directory
        .participants()
        .flat_map(|participant| participant.tracks_with_subscription(subscribe))
        .collect();
    track_sids.sort();

    SyncState {
        subscription: UpdateSubscription {
            track_sids,
            subscribe,
        },
        publish_tracks: local.publish_tracks_info(),
    }
}
