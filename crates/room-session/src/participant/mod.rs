//! Local and remote participants.
//!
//! Both kinds share a [`ParticipantCore`]: an observable sid plus the mutable
//! fields and publications behind a short-lived lock. Participants never talk
//! to the event bus directly. They report changes through a
//! [`ParticipantListener`] supplied by the owning session, which re-emits them
//! as room events. Events are always delivered after the core lock is
//! released.

mod local;
mod publication;
mod remote;

pub use local::{LocalParticipant, LocalTrack};
pub use publication::{RemoteTrackState, TrackPublication};
pub use remote::RemoteParticipant;

use crate::engine::{MediaTrack, ParticipantInfo};
use crate::observable::Observable;
use crate::types::{
    ConnectionQuality, ParticipantIdentity, ParticipantPermission, ParticipantSid, StreamState,
    TrackSid,
};

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Participant-level change, re-emitted by the session as a room event.
#[derive(Debug, Clone)]
pub enum ParticipantEvent {
    NameChanged {
        name: String,
    },
    MetadataChanged {
        previous: String,
        metadata: String,
    },
    PermissionsChanged {
        previous: ParticipantPermission,
        permissions: ParticipantPermission,
    },
    TrackPublished(TrackPublication),
    TrackUnpublished(TrackPublication),
    TrackSubscribed {
        publication: TrackPublication,
        track: MediaTrack,
    },
    TrackUnsubscribed {
        publication: TrackPublication,
        track: MediaTrack,
    },
    TrackMuted(TrackPublication),
    TrackUnmuted(TrackPublication),
    TrackStreamStateChanged {
        publication: TrackPublication,
        state: StreamState,
    },
    TrackSubscriptionPermissionChanged {
        publication: TrackPublication,
        allowed: bool,
    },
    LocalTrackPublished(TrackPublication),
    LocalTrackUnpublished(TrackPublication),
}

/// Receives participant-level changes.
pub trait ParticipantListener: Send + Sync {
    fn on_participant_event(&self, participant: Participant, event: ParticipantEvent);
}

/// Shared handle to either participant kind.
///
/// Equality is handle identity, not field equality.
#[derive(Clone)]
pub enum Participant {
    Local(Arc<LocalParticipant>),
    Remote(Arc<RemoteParticipant>),
}

impl Participant {
    /// Identity, unset for a local participant that has not joined yet.
    #[must_use]
    pub fn identity(&self) -> Option<ParticipantIdentity> {
        match self {
            Participant::Local(local) => local.identity(),
            Participant::Remote(remote) => Some(remote.identity().clone()),
        }
    }

    #[must_use]
    pub fn sid(&self) -> Option<ParticipantSid> {
        self.core().sid()
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.core().name()
    }

    #[must_use]
    pub fn audio_level(&self) -> f32 {
        self.core().audio_level()
    }

    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.core().is_speaking()
    }

    #[must_use]
    pub fn connection_quality(&self) -> ConnectionQuality {
        self.core().connection_quality()
    }

    #[must_use]
    pub fn track_publications(&self) -> Vec<TrackPublication> {
        self.core().publications()
    }

    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self, Participant::Local(_))
    }

    #[must_use]
    pub fn as_remote(&self) -> Option<&Arc<RemoteParticipant>> {
        match self {
            Participant::Remote(remote) => Some(remote),
            Participant::Local(_) => None,
        }
    }

    #[must_use]
    pub fn as_local(&self) -> Option<&Arc<LocalParticipant>> {
        match self {
            Participant::Local(local) => Some(local),
            Participant::Remote(_) => None,
        }
    }

    pub(crate) fn core(&self) -> &ParticipantCore {
        match self {
            Participant::Local(local) => &local.core,
            Participant::Remote(remote) => &remote.core,
        }
    }
}

impl PartialEq for Participant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Participant::Local(a), Participant::Local(b)) => Arc::ptr_eq(a, b),
            (Participant::Remote(a), Participant::Remote(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_local() { "Local" } else { "Remote" };
        f.debug_struct("Participant")
            .field("kind", &kind)
            .field("identity", &self.identity())
            .field("sid", &self.sid())
            .finish()
    }
}

/// Mutable participant fields.
#[derive(Debug, Default)]
pub(crate) struct CoreState {
    pub(crate) name: String,
    pub(crate) metadata: String,
    pub(crate) permissions: ParticipantPermission,
    pub(crate) audio_level: f32,
    pub(crate) is_speaking: bool,
    pub(crate) connection_quality: ConnectionQuality,
    pub(crate) publications: HashMap<TrackSid, TrackPublication>,
    /// Server info has been applied at least once.
    pub(crate) has_info: bool,
}

/// State shared by local and remote participants.
#[derive(Debug)]
pub(crate) struct ParticipantCore {
    sid: Observable<Option<ParticipantSid>>,
    state: Mutex<CoreState>,
}

impl ParticipantCore {
    pub(crate) fn new(sid: Option<ParticipantSid>) -> Self {
        Self {
            sid: Observable::new(sid),
            state: Mutex::new(CoreState::default()),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, CoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn sid(&self) -> Option<ParticipantSid> {
        self.sid.get()
    }

    pub(crate) async fn sid_ready(&self) -> ParticipantSid {
        self.sid.first_value().await
    }

    /// Set the sid once. A different sid for an already-confirmed participant
    /// is ignored.
    pub(crate) fn set_sid(&self, sid: &ParticipantSid) {
        match self.sid.get() {
            None => {
                self.sid.set(Some(sid.clone()));
            }
            Some(current) if current != *sid => {
                warn!(
                    target: "room.participant",
                    current = %current,
                    received = %sid,
                    "Ignoring sid change for confirmed participant"
                );
            }
            Some(_) => {}
        }
    }

    /// Replace the sid after a rejoin, where the server issues a new one.
    pub(crate) fn reset_sid(&self, sid: &ParticipantSid) {
        if sid.is_empty() {
            return;
        }
        if let Some(previous) = self.sid.set(Some(sid.clone())).flatten() {
            debug!(
                target: "room.participant",
                previous = %previous,
                sid = %sid,
                "Participant sid reassigned"
            );
        }
    }

    pub(crate) fn name(&self) -> String {
        self.lock().name.clone()
    }

    pub(crate) fn metadata(&self) -> String {
        self.lock().metadata.clone()
    }

    pub(crate) fn permissions(&self) -> ParticipantPermission {
        self.lock().permissions.clone()
    }

    pub(crate) fn audio_level(&self) -> f32 {
        self.lock().audio_level
    }

    pub(crate) fn is_speaking(&self) -> bool {
        self.lock().is_speaking
    }

    pub(crate) fn connection_quality(&self) -> ConnectionQuality {
        self.lock().connection_quality
    }

    pub(crate) fn publications(&self) -> Vec<TrackPublication> {
        self.lock().publications.values().cloned().collect()
    }

    pub(crate) fn publication(&self, sid: &TrackSid) -> Option<TrackPublication> {
        self.lock().publications.get(sid).cloned()
    }

    pub(crate) fn set_speaking(&self, audio_level: f32, is_speaking: bool) {
        let mut state = self.lock();
        state.audio_level = audio_level;
        state.is_speaking = is_speaking;
    }

    /// Returns `true` when the quality changed.
    pub(crate) fn set_connection_quality(&self, quality: ConnectionQuality) -> bool {
        let mut state = self.lock();
        let changed = state.connection_quality != quality;
        state.connection_quality = quality;
        changed
    }

    /// Apply sid, name, metadata and permissions from server info.
    ///
    /// Change events are only produced once info has been applied before.
    /// Returns whether info had been applied before this call.
    pub(crate) fn apply_common_info(
        &self,
        info: &ParticipantInfo,
        state: &mut CoreState,
        events: &mut Vec<ParticipantEvent>,
    ) -> bool {
        self.set_sid(&info.sid);
        let had_info = state.has_info;

        if state.name != info.name {
            state.name.clone_from(&info.name);
            if had_info {
                events.push(ParticipantEvent::NameChanged {
                    name: info.name.clone(),
                });
            }
        }

        if state.metadata != info.metadata {
            let previous = std::mem::replace(&mut state.metadata, info.metadata.clone());
            if had_info {
                events.push(ParticipantEvent::MetadataChanged {
                    previous,
                    metadata: info.metadata.clone(),
                });
            }
        }

        if let Some(permissions) = &info.permission {
            if state.permissions != *permissions {
                let previous = std::mem::replace(&mut state.permissions, permissions.clone());
                if had_info {
                    events.push(ParticipantEvent::PermissionsChanged {
                        previous,
                        permissions: permissions.clone(),
                    });
                }
            }
        }

        had_info
    }
}

/// Accessors shared by both participant kinds.
macro_rules! core_accessors {
    () => {
        /// Server session id, unset until confirmed.
        #[must_use]
        pub fn sid(&self) -> Option<crate::types::ParticipantSid> {
            self.core.sid()
        }

        /// Wait for the server to confirm the sid.
        pub async fn sid_ready(&self) -> crate::types::ParticipantSid {
            self.core.sid_ready().await
        }

        #[must_use]
        pub fn name(&self) -> String {
            self.core.name()
        }

        #[must_use]
        pub fn metadata(&self) -> String {
            self.core.metadata()
        }

        #[must_use]
        pub fn permissions(&self) -> crate::types::ParticipantPermission {
            self.core.permissions()
        }

        #[must_use]
        pub fn audio_level(&self) -> f32 {
            self.core.audio_level()
        }

        #[must_use]
        pub fn is_speaking(&self) -> bool {
            self.core.is_speaking()
        }

        #[must_use]
        pub fn connection_quality(&self) -> crate::types::ConnectionQuality {
            self.core.connection_quality()
        }

        /// Snapshot of all publications.
        #[must_use]
        pub fn track_publications(&self) -> Vec<crate::participant::TrackPublication> {
            self.core.publications()
        }

        #[must_use]
        pub fn track_publication(
            &self,
            sid: &crate::types::TrackSid,
        ) -> Option<crate::participant::TrackPublication> {
            self.core.publication(sid)
        }
    };
}

pub(crate) use core_accessors;
