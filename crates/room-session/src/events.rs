//! Room events and the ordered event bus.
//!
//! Every subscriber owns an unbounded queue. Posting appends the event to
//! every queue while holding the bus lock, so all subscribers see the same
//! order and a post has been delivered to every queue by the time it returns.
//! Events never embed the room itself.

use crate::engine::MediaTrack;
use crate::errors::{ConnectError, EventBusError};
use crate::observability::metrics;
use crate::participant::{
    Participant, ParticipantEvent, ParticipantListener, RemoteParticipant, TrackPublication,
};
use crate::types::{
    ConnectionQuality, DisconnectReason, ParticipantPermission, ParticipantSid, StreamState,
    TrackSid,
};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Room-level notification.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    Connected,
    Reconnecting,
    Reconnected,
    Disconnected {
        reason: DisconnectReason,
    },
    FailedToConnect {
        error: ConnectError,
    },
    ParticipantConnected {
        participant: Arc<RemoteParticipant>,
    },
    ParticipantDisconnected {
        participant: Arc<RemoteParticipant>,
    },
    /// Current speakers. Snapshot updates keep the server's order; delta
    /// updates are ordered by ascending audio level.
    ActiveSpeakersChanged {
        speakers: Vec<Participant>,
    },
    RoomMetadataChanged {
        previous: String,
        metadata: String,
    },
    RecordingStatusChanged {
        is_recording: bool,
    },
    ParticipantMetadataChanged {
        participant: Participant,
        previous: String,
        metadata: String,
    },
    ParticipantNameChanged {
        participant: Participant,
        name: String,
    },
    ParticipantPermissionsChanged {
        participant: Participant,
        previous: ParticipantPermission,
        permissions: ParticipantPermission,
    },
    ConnectionQualityChanged {
        participant: Participant,
        quality: ConnectionQuality,
    },
    TrackPublished {
        participant: Arc<RemoteParticipant>,
        publication: TrackPublication,
    },
    TrackUnpublished {
        participant: Arc<RemoteParticipant>,
        publication: TrackPublication,
    },
    TrackSubscribed {
        participant: Arc<RemoteParticipant>,
        publication: TrackPublication,
        track: MediaTrack,
    },
    TrackUnsubscribed {
        participant: Arc<RemoteParticipant>,
        publication: TrackPublication,
        track: MediaTrack,
    },
    /// A media track arrived but its publication never did.
    TrackSubscriptionFailed {
        participant_sid: ParticipantSid,
        track_sid: TrackSid,
    },
    TrackMuted {
        participant: Participant,
        publication: TrackPublication,
    },
    TrackUnmuted {
        participant: Participant,
        publication: TrackPublication,
    },
    TrackStreamStateChanged {
        participant: Arc<RemoteParticipant>,
        publication: TrackPublication,
        state: StreamState,
    },
    TrackSubscriptionPermissionChanged {
        participant: Arc<RemoteParticipant>,
        publication: TrackPublication,
        allowed: bool,
    },
    LocalTrackPublished {
        publication: TrackPublication,
    },
    LocalTrackUnpublished {
        publication: TrackPublication,
    },
}

impl RoomEvent {
    /// Short name for logs and metric labels.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            RoomEvent::Connected => "connected",
            RoomEvent::Reconnecting => "reconnecting",
            RoomEvent::Reconnected => "reconnected",
            RoomEvent::Disconnected { .. } => "disconnected",
            RoomEvent::FailedToConnect { .. } => "failed_to_connect",
            RoomEvent::ParticipantConnected { .. } => "participant_connected",
            RoomEvent::ParticipantDisconnected { .. } => "participant_disconnected",
            RoomEvent::ActiveSpeakersChanged { .. } => "active_speakers_changed",
            RoomEvent::RoomMetadataChanged { .. } => "room_metadata_changed",
            RoomEvent::RecordingStatusChanged { .. } => "recording_status_changed",
            RoomEvent::ParticipantMetadataChanged { .. } => "participant_metadata_changed",
            RoomEvent::ParticipantNameChanged { .. } => "participant_name_changed",
            RoomEvent::ParticipantPermissionsChanged { .. } => "participant_permissions_changed",
            RoomEvent::ConnectionQualityChanged { .. } => "connection_quality_changed",
            RoomEvent::TrackPublished { .. } => "track_published",
            RoomEvent::TrackUnpublished { .. } => "track_unpublished",
            RoomEvent::TrackSubscribed { .. } => "track_subscribed",
            RoomEvent::TrackUnsubscribed { .. } => "track_unsubscribed",
            RoomEvent::TrackSubscriptionFailed { .. } => "track_subscription_failed",
            RoomEvent::TrackMuted { .. } => "track_muted",
            RoomEvent::TrackUnmuted { .. } => "track_unmuted",
            RoomEvent::TrackStreamStateChanged { .. } => "track_stream_state_changed",
            RoomEvent::TrackSubscriptionPermissionChanged { .. } => {
                "track_subscription_permission_changed"
            }
            RoomEvent::LocalTrackPublished { .. } => "local_track_published",
            RoomEvent::LocalTrackUnpublished { .. } => "local_track_unpublished",
        }
    }
}

/// One subscriber's view of the bus.
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<RoomEvent>,
}

impl EventStream {
    /// Next event, or `None` once the room has been released.
    pub async fn recv(&mut self) -> Option<RoomEvent> {
        self.receiver.recv().await
    }

    /// Next already-delivered event, if any.
    pub fn try_recv(&mut self) -> Option<RoomEvent> {
        self.receiver.try_recv().ok()
    }
}

#[derive(Debug, Default)]
struct BusState {
    subscribers: Vec<mpsc::UnboundedSender<RoomEvent>>,
    closed: bool,
}

/// Ordered multi-subscriber broadcast of [`RoomEvent`]s.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventBus {
    state: Arc<Mutex<BusState>>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe to every event posted from now on.
    pub(crate) fn subscribe(&self) -> EventStream {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.lock();
        if !state.closed {
            state.subscribers.push(sender);
        }
        EventStream { receiver }
    }

    /// Post on behalf of a connection context.
    ///
    /// Fails without delivering once `context` has been cancelled.
    pub(crate) fn post(
        &self,
        context: &CancellationToken,
        event: RoomEvent,
    ) -> Result<(), EventBusError> {
        if context.is_cancelled() {
            debug!(
                target: "room.events",
                event = event.kind(),
                "Dropping event for closed context"
            );
            return Err(EventBusError::ContextClosed);
        }
        self.deliver(event);
        Ok(())
    }

    /// Post regardless of any connection context.
    pub(crate) fn try_post(&self, event: RoomEvent) {
        self.deliver(event);
    }

    fn deliver(&self, event: RoomEvent) {
        let kind = event.kind();
        let mut state = self.lock();
        state
            .subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
        trace!(
            target: "room.events",
            event = kind,
            subscribers = state.subscribers.len(),
            "Event posted"
        );
        metrics::record_event_posted(kind);
    }

    /// End every stream. Later subscriptions receive nothing.
    pub(crate) fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.subscribers.clear();
    }
}

/// Re-emits participant changes as room events within one connection
/// context.
pub(crate) struct ParticipantEventRelay {
    bus: EventBus,
    context: CancellationToken,
}

impl ParticipantEventRelay {
    pub(crate) fn new(bus: EventBus, context: CancellationToken) -> Arc<Self> {
        Arc::new(Self { bus, context })
    }
}

impl ParticipantListener for ParticipantEventRelay {
    fn on_participant_event(&self, participant: Participant, event: ParticipantEvent) {
        let Some(room_event) = to_room_event(participant, event) else {
            return;
        };
        // Events from a finished connection are intentionally dropped.
        let _ = self.bus.post(&self.context, room_event);
    }
}

fn to_room_event(participant: Participant, event: ParticipantEvent) -> Option<RoomEvent> {
    let remote = participant.as_remote().cloned();
    let event = match event {
        ParticipantEvent::NameChanged { name } => {
            RoomEvent::ParticipantNameChanged { participant, name }
        }
        ParticipantEvent::MetadataChanged { previous, metadata } => {
            RoomEvent::ParticipantMetadataChanged {
                participant,
                previous,
                metadata,
            }
        }
        ParticipantEvent::PermissionsChanged {
            previous,
            permissions,
        } => RoomEvent::ParticipantPermissionsChanged {
            participant,
            previous,
            permissions,
        },
        ParticipantEvent::TrackMuted(publication) => RoomEvent::TrackMuted {
            participant,
            publication,
        },
        ParticipantEvent::TrackUnmuted(publication) => RoomEvent::TrackUnmuted {
            participant,
            publication,
        },
        ParticipantEvent::LocalTrackPublished(publication) => {
            RoomEvent::LocalTrackPublished { publication }
        }
        ParticipantEvent::LocalTrackUnpublished(publication) => {
            RoomEvent::LocalTrackUnpublished { publication }
        }
        ParticipantEvent::TrackPublished(publication) => RoomEvent::TrackPublished {
            participant: remote?,
            publication,
        },
        ParticipantEvent::TrackUnpublished(publication) => RoomEvent::TrackUnpublished {
            participant: remote?,
            publication,
        },
        ParticipantEvent::TrackSubscribed { publication, track } => RoomEvent::TrackSubscribed {
            participant: remote?,
            publication,
            track,
        },
        ParticipantEvent::TrackUnsubscribed { publication, track } => {
            RoomEvent::TrackUnsubscribed {
                participant: remote?,
                publication,
                track,
            }
        }
        ParticipantEvent::TrackStreamStateChanged { publication, state } => {
            RoomEvent::TrackStreamStateChanged {
                participant: remote?,
                publication,
                state,
            }
        }
        ParticipantEvent::TrackSubscriptionPermissionChanged {
            publication,
            allowed,
        } => RoomEvent::TrackSubscriptionPermissionChanged {
            participant: remote?,
            publication,
            allowed,
        },
    };
    Some(event)
}
