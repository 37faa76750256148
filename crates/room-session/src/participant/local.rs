//! The local participant.
//!
//! One instance per connection attempt. Publishing goes through the transport
//! engine; the publication is only recorded once the server confirms it.

use super::{core_accessors, Participant, ParticipantCore, ParticipantEvent, ParticipantListener};
use crate::engine::{AddTrackRequest, ParticipantInfo, RtcEngine, TrackPublishedInfo};
use crate::errors::RoomError;
use crate::participant::TrackPublication;
use crate::types::{
    EncryptionType, ParticipantIdentity, ParticipantSid, TrackKind, TrackSid, TrackSource,
};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A local media track to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTrack {
    /// Client-side id, unique per track.
    pub cid: String,
    pub name: String,
    pub kind: TrackKind,
    pub source: TrackSource,
}

impl LocalTrack {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: TrackKind, source: TrackSource) -> Self {
        Self {
            cid: Uuid::new_v4().to_string(),
            name: name.into(),
            kind,
            source,
        }
    }

    #[must_use]
    pub fn microphone() -> Self {
        Self::new("microphone", TrackKind::Audio, TrackSource::Microphone)
    }

    #[must_use]
    pub fn camera() -> Self {
        Self::new("camera", TrackKind::Video, TrackSource::Camera)
    }

    fn from_publication(publication: &TrackPublication) -> Self {
        Self {
            cid: publication
                .cid
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            name: publication.name.clone(),
            kind: publication.kind,
            source: publication.source,
        }
    }
}

/// This client's participant in the room.
pub struct LocalParticipant {
    identity: OnceLock<ParticipantIdentity>,
    pub(crate) core: ParticipantCore,
    engine: Arc<dyn RtcEngine>,
    listener: Arc<dyn ParticipantListener>,
    encryption: EncryptionType,
    /// Tracks to republish after a full reconnect.
    pending_republish: Mutex<Vec<LocalTrack>>,
    disposed: AtomicBool,
}

impl LocalParticipant {
    pub(crate) fn new(
        engine: Arc<dyn RtcEngine>,
        listener: Arc<dyn ParticipantListener>,
        encryption: EncryptionType,
    ) -> Arc<Self> {
        Arc::new(Self {
            identity: OnceLock::new(),
            core: ParticipantCore::new(None),
            engine,
            listener,
            encryption,
            pending_republish: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        })
    }

    /// Identity assigned by the join response.
    #[must_use]
    pub fn identity(&self) -> Option<ParticipantIdentity> {
        self.identity.get().cloned()
    }

    core_accessors!();

    fn emit(self: &Arc<Self>, events: Vec<ParticipantEvent>) {
        for event in events {
            self.listener
                .on_participant_event(Participant::Local(Arc::clone(self)), event);
        }
    }

    fn ensure_live(&self) -> Result<(), RoomError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(RoomError::NotConnected);
        }
        Ok(())
    }

    /// Take the sid the server assigned on a rejoin.
    pub(crate) fn reset_sid(&self, sid: &ParticipantSid) {
        self.core.reset_sid(sid);
    }

    /// Apply the server's view of this participant.
    pub(crate) fn update_from_info(self: &Arc<Self>, info: &ParticipantInfo) {
        if !info.identity.is_empty() && self.identity.set(info.identity.clone()).is_err() {
            if let Some(current) = self.identity.get() {
                if *current != info.identity {
                    warn!(
                        target: "room.participant",
                        current = %current,
                        received = %info.identity,
                        "Ignoring identity change for local participant"
                    );
                }
            }
        }

        let mut events = Vec::new();
        {
            let mut state = self.core.lock();
            self.core.apply_common_info(info, &mut state, &mut events);
            for track in &info.tracks {
                if let Some(publication) = state.publications.get_mut(&track.sid) {
                    if publication.muted != track.muted {
                        publication.muted = track.muted;
                        events.push(mute_event(publication.clone()));
                    }
                }
            }
            state.has_info = true;
        }
        self.emit(events);
    }

    /// Publish a track and record the confirmed publication.
    pub async fn publish_track(
        self: &Arc<Self>,
        track: LocalTrack,
    ) -> Result<TrackPublication, RoomError> {
        self.ensure_live()?;

        let request = AddTrackRequest {
            cid: track.cid.clone(),
            name: track.name.clone(),
            kind: track.kind,
            source: track.source,
            muted: false,
            encryption: self.encryption,
        };
        let info = self.engine.publish_track(request).await?;
        let publication = TrackPublication::local(&info, &track.cid);

        self.core
            .lock()
            .publications
            .insert(publication.sid.clone(), publication.clone());

        info!(
            target: "room.participant",
            track_sid = %publication.sid,
            kind = ?publication.kind,
            source = ?publication.source,
            "Local track published"
        );
        self.emit(vec![ParticipantEvent::LocalTrackPublished(publication.clone())]);
        Ok(publication)
    }

    /// Unpublish a track. The publication is removed locally even when the
    /// engine request fails.
    pub async fn unpublish_track(self: &Arc<Self>, sid: &TrackSid) -> Result<(), RoomError> {
        let publication = self
            .core
            .lock()
            .publications
            .remove(sid)
            .ok_or_else(|| RoomError::TrackNotFound(sid.to_string()))?;

        self.emit(vec![ParticipantEvent::LocalTrackUnpublished(publication)]);
        self.engine.unpublish_track(sid).await?;
        Ok(())
    }

    /// Mute or unmute a published track.
    pub async fn set_track_muted(
        self: &Arc<Self>,
        sid: &TrackSid,
        muted: bool,
    ) -> Result<(), RoomError> {
        self.ensure_live()?;
        if self.core.publication(sid).is_none() {
            return Err(RoomError::TrackNotFound(sid.to_string()));
        }
        self.engine.set_track_muted(sid, muted).await?;
        self.apply_mute(sid, muted);
        Ok(())
    }

    pub async fn set_microphone_enabled(self: &Arc<Self>, enabled: bool) -> Result<(), RoomError> {
        self.set_source_enabled(TrackSource::Microphone, enabled, LocalTrack::microphone)
            .await
    }

    pub async fn set_camera_enabled(self: &Arc<Self>, enabled: bool) -> Result<(), RoomError> {
        self.set_source_enabled(TrackSource::Camera, enabled, LocalTrack::camera)
            .await
    }

    /// Unmute the existing track for `source`, or publish a new one. Disabling
    /// mutes the existing track.
    async fn set_source_enabled(
        self: &Arc<Self>,
        source: TrackSource,
        enabled: bool,
        create: fn() -> LocalTrack,
    ) -> Result<(), RoomError> {
        let existing = self
            .core
            .publications()
            .into_iter()
            .find(|publication| publication.source == source);

        match (existing, enabled) {
            (Some(publication), _) => self.set_track_muted(&publication.sid, !enabled).await,
            (None, true) => self.publish_track(create()).await.map(|_| ()),
            (None, false) => Ok(()),
        }
    }

    /// Server-side mute of a local track.
    pub(crate) fn on_remote_mute_changed(self: &Arc<Self>, sid: &TrackSid, muted: bool) {
        if !self.apply_mute(sid, muted) {
            debug!(
                target: "room.participant",
                track_sid = %sid,
                "Remote mute for unknown local track"
            );
        }
    }

    /// Returns `false` when no publication with `sid` exists.
    fn apply_mute(self: &Arc<Self>, sid: &TrackSid, muted: bool) -> bool {
        let event = {
            let mut state = self.core.lock();
            let Some(publication) = state.publications.get_mut(sid) else {
                return false;
            };
            if publication.muted == muted {
                return true;
            }
            publication.muted = muted;
            mute_event(publication.clone())
        };
        self.emit(vec![event]);
        true
    }

    /// Summary of every published track, for sync state.
    pub(crate) fn publish_tracks_info(&self) -> Vec<TrackPublishedInfo> {
        self.core
            .lock()
            .publications
            .values()
            .filter_map(TrackPublication::published_info)
            .collect()
    }

    /// Drop all publications ahead of a full reconnect, remembering the tracks
    /// so they can be republished afterwards.
    pub(crate) fn prepare_for_full_reconnect(self: &Arc<Self>) {
        let publications: Vec<TrackPublication> = {
            let mut state = self.core.lock();
            state.publications.drain().map(|(_, publication)| publication).collect()
        };

        let tracks: Vec<LocalTrack> = publications
            .iter()
            .map(LocalTrack::from_publication)
            .collect();
        debug!(
            target: "room.participant",
            count = tracks.len(),
            "Stashed local tracks for republish"
        );
        self.pending_republish
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(tracks);

        self.emit(
            publications
                .into_iter()
                .map(ParticipantEvent::LocalTrackUnpublished)
                .collect(),
        );
    }

    /// Republish tracks stashed by [`Self::prepare_for_full_reconnect`].
    ///
    /// Failures are logged per track; the remaining tracks are still published.
    pub(crate) async fn republish_tracks(self: &Arc<Self>) {
        let tracks = std::mem::take(
            &mut *self
                .pending_republish
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for track in tracks {
            let source = track.source;
            if let Err(e) = self.publish_track(track).await {
                warn!(
                    target: "room.participant",
                    source = ?source,
                    error = %e,
                    "Failed to republish local track"
                );
            }
        }
    }

    /// Release all publications. The participant cannot publish afterwards.
    pub(crate) fn dispose(self: &Arc<Self>) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let publications: Vec<TrackPublication> = {
            let mut state = self.core.lock();
            state.publications.drain().map(|(_, publication)| publication).collect()
        };
        self.pending_republish
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.emit(
            publications
                .into_iter()
                .map(ParticipantEvent::LocalTrackUnpublished)
                .collect(),
        );
    }
}

fn mute_event(publication: TrackPublication) -> ParticipantEvent {
    if publication.muted {
        ParticipantEvent::TrackMuted(publication)
    } else {
        ParticipantEvent::TrackUnmuted(publication)
    }
}

impl fmt::Debug for LocalParticipant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalParticipant")
            .field("identity", &self.identity.get())
            .field("sid", &self.core.sid())
            .field("disposed", &self.disposed.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::participant::tests::{RecordingListener, TestEngine};
    use crate::types::{ParticipantSid, ParticipantState};

    fn local() -> (Arc<LocalParticipant>, Arc<TestEngine>, Arc<RecordingListener>) {
        let engine = Arc::new(TestEngine::default());
        let listener = Arc::new(RecordingListener::default());
        let participant =
            LocalParticipant::new(engine.clone(), listener.clone(), EncryptionType::None);
        (participant, engine, listener)
    }

    #[tokio::test]
    async fn test_microphone_enable_publishes_then_mutes() {
        let (participant, engine, listener) = local();

        participant.set_microphone_enabled(true).await.unwrap();
        let publications = participant.track_publications();
        assert_eq!(publications.len(), 1);
        assert_eq!(
            publications.first().unwrap().source,
            TrackSource::Microphone
        );

        participant.set_microphone_enabled(false).await.unwrap();
        assert!(participant.track_publications().first().unwrap().muted);
        assert_eq!(engine.muted.lock().unwrap().len(), 1);

        assert!(matches!(
            listener.take().as_slice(),
            [
                ParticipantEvent::LocalTrackPublished(_),
                ParticipantEvent::TrackMuted(_)
            ]
        ));
    }

    #[tokio::test]
    async fn test_full_reconnect_republishes_stashed_tracks() {
        let (participant, _engine, _listener) = local();
        participant.publish_track(LocalTrack::camera()).await.unwrap();
        participant.publish_track(LocalTrack::microphone()).await.unwrap();

        participant.prepare_for_full_reconnect();
        assert!(participant.track_publications().is_empty());
        assert!(participant.publish_tracks_info().is_empty());

        participant.republish_tracks().await;
        assert_eq!(participant.track_publications().len(), 2);
        assert_eq!(participant.publish_tracks_info().len(), 2);
    }

    #[tokio::test]
    async fn test_disposed_participant_rejects_publish() {
        let (participant, _engine, listener) = local();
        participant.publish_track(LocalTrack::camera()).await.unwrap();
        listener.take();

        participant.dispose();
        participant.dispose();

        assert!(matches!(
            listener.take().as_slice(),
            [ParticipantEvent::LocalTrackUnpublished(_)]
        ));
        assert!(matches!(
            participant.publish_track(LocalTrack::camera()).await,
            Err(RoomError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_unpublish_unknown_track() {
        let (participant, _engine, _listener) = local();
        assert!(matches!(
            participant.unpublish_track(&TrackSid::new("TR_X")).await,
            Err(RoomError::TrackNotFound(_))
        ));
    }

    #[test]
    fn test_identity_set_from_first_info() {
        let (participant, _engine, _listener) = local();
        let info = ParticipantInfo {
            sid: ParticipantSid::new("PA_L"),
            identity: ParticipantIdentity::new("me"),
            name: String::new(),
            metadata: String::new(),
            state: ParticipantState::Active,
            tracks: Vec::new(),
            permission: None,
        };
        participant.update_from_info(&info);

        let mut renamed = info.clone();
        renamed.identity = ParticipantIdentity::new("someone-else");
        participant.update_from_info(&renamed);

        assert_eq!(participant.identity(), Some(ParticipantIdentity::new("me")));
        assert_eq!(participant.sid(), Some(ParticipantSid::new("PA_L")));
    }
}
