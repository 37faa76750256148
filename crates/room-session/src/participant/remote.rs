//! Remote participants.

use super::{core_accessors, Participant, ParticipantCore, ParticipantEvent, ParticipantListener};
use crate::engine::{MediaTrack, ParticipantInfo, TrackSettings};
use crate::participant::TrackPublication;
use crate::types::{ParticipantIdentity, ParticipantSid, StreamState, TrackSid};

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A participant joined from another client.
pub struct RemoteParticipant {
    identity: ParticipantIdentity,
    pub(crate) core: ParticipantCore,
    listener: Arc<dyn ParticipantListener>,
}

impl RemoteParticipant {
    pub(crate) fn new(
        identity: ParticipantIdentity,
        sid: Option<ParticipantSid>,
        listener: Arc<dyn ParticipantListener>,
    ) -> Arc<Self> {
        Arc::new(Self {
            identity,
            core: ParticipantCore::new(sid),
            listener,
        })
    }

    #[must_use]
    pub fn identity(&self) -> &ParticipantIdentity {
        &self.identity
    }

    core_accessors!();

    fn emit(self: &Arc<Self>, events: Vec<ParticipantEvent>) {
        for event in events {
            self.listener
                .on_participant_event(Participant::Remote(Arc::clone(self)), event);
        }
    }

    /// Apply server info.
    ///
    /// The first application populates silently; later ones report field
    /// changes, newly published tracks and mute flips. Tracks missing from
    /// `info` are unpublished.
    pub(crate) fn update_from_info(self: &Arc<Self>, info: &ParticipantInfo) {
        let mut events = Vec::new();
        let stale: Vec<TrackSid> = {
            let mut state = self.core.lock();
            let had_info = self.core.apply_common_info(info, &mut state, &mut events);

            let mut seen = HashSet::with_capacity(info.tracks.len());
            for track in &info.tracks {
                seen.insert(track.sid.clone());
                match state.publications.get_mut(&track.sid) {
                    Some(publication) => {
                        if publication.apply_info(track) {
                            let snapshot = publication.clone();
                            events.push(if snapshot.muted {
                                ParticipantEvent::TrackMuted(snapshot)
                            } else {
                                ParticipantEvent::TrackUnmuted(snapshot)
                            });
                        }
                    }
                    None => {
                        let publication = TrackPublication::remote(track);
                        if had_info {
                            events.push(ParticipantEvent::TrackPublished(publication.clone()));
                        }
                        state.publications.insert(track.sid.clone(), publication);
                    }
                }
            }
            state.has_info = true;

            state
                .publications
                .keys()
                .filter(|sid| !seen.contains(*sid))
                .cloned()
                .collect()
        };

        self.emit(events);
        for sid in stale {
            self.unpublish_track(&sid, true);
        }
    }

    /// Attach an arrived media track to its publication.
    ///
    /// Returns the track back when no publication with `sid` exists yet, so
    /// the caller can retry once metadata arrives.
    pub(crate) fn add_subscribed_media_track(
        self: &Arc<Self>,
        track: MediaTrack,
        sid: &TrackSid,
    ) -> Result<(), MediaTrack> {
        let event = {
            let mut state = self.core.lock();
            let Some(publication) = state.publications.get_mut(sid) else {
                return Err(track);
            };
            publication.track = Some(track.clone());
            ParticipantEvent::TrackSubscribed {
                publication: publication.clone(),
                track,
            }
        };
        debug!(
            target: "room.participant",
            participant = %self.identity,
            track_sid = %sid,
            "Track subscribed"
        );
        self.emit(vec![event]);
        Ok(())
    }

    /// Remove a publication, unsubscribing its media track first.
    pub(crate) fn unpublish_track(self: &Arc<Self>, sid: &TrackSid, send_unpublished: bool) {
        let Some(publication) = self.core.lock().publications.remove(sid) else {
            return;
        };

        let mut events = Vec::with_capacity(2);
        if let Some(track) = publication.track.clone() {
            let mut unsubscribed = publication.clone();
            unsubscribed.track = None;
            events.push(ParticipantEvent::TrackUnsubscribed {
                publication: unsubscribed,
                track,
            });
        }
        if send_unpublished {
            events.push(ParticipantEvent::TrackUnpublished(publication));
        }
        self.emit(events);
    }

    /// Unpublish every publication. Used before the participant is dropped.
    pub(crate) fn unpublish_all(self: &Arc<Self>) {
        let sids: Vec<TrackSid> = self.core.lock().publications.keys().cloned().collect();
        for sid in sids {
            self.unpublish_track(&sid, true);
        }
    }

    pub(crate) fn update_stream_state(self: &Arc<Self>, sid: &TrackSid, stream_state: StreamState) {
        let event = {
            let mut state = self.core.lock();
            let Some(publication) = state.publications.get_mut(sid) else {
                return;
            };
            let Some(remote) = publication.remote.as_mut() else {
                return;
            };
            if remote.stream_state == stream_state {
                return;
            }
            remote.stream_state = stream_state;
            ParticipantEvent::TrackStreamStateChanged {
                publication: publication.clone(),
                state: stream_state,
            }
        };
        self.emit(vec![event]);
    }

    pub(crate) fn update_subscription_permission(self: &Arc<Self>, sid: &TrackSid, allowed: bool) {
        let mut events = Vec::with_capacity(2);
        {
            let mut state = self.core.lock();
            let Some(publication) = state.publications.get_mut(sid) else {
                return;
            };
            let Some(remote) = publication.remote.as_mut() else {
                return;
            };
            if remote.subscription_allowed == allowed {
                return;
            }
            remote.subscription_allowed = allowed;
            let revoked_track = if allowed { None } else { publication.track.take() };
            let snapshot = publication.clone();
            if let Some(track) = revoked_track {
                events.push(ParticipantEvent::TrackUnsubscribed {
                    publication: snapshot.clone(),
                    track,
                });
            }
            events.push(ParticipantEvent::TrackSubscriptionPermissionChanged {
                publication: snapshot,
                allowed,
            });
        }
        self.emit(events);
    }

    /// Record local subscription intent. Returns `false` for an unknown track.
    pub(crate) fn set_subscription_desired(
        self: &Arc<Self>,
        sid: &TrackSid,
        desired: bool,
    ) -> bool {
        let event = {
            let mut state = self.core.lock();
            let Some(publication) = state.publications.get_mut(sid) else {
                return false;
            };
            let Some(remote) = publication.remote.as_mut() else {
                return false;
            };
            remote.subscription_desired = desired;
            if desired {
                None
            } else {
                publication.track.take().map(|track| ParticipantEvent::TrackUnsubscribed {
                    publication: publication.clone(),
                    track,
                })
            }
        };
        if let Some(event) = event {
            self.emit(vec![event]);
        }
        true
    }

    /// Remote tracks whose subscribed state equals `subscribed`.
    pub(crate) fn tracks_with_subscription(&self, subscribed: bool) -> Vec<TrackSid> {
        self.core
            .lock()
            .publications
            .values()
            .filter(|publication| publication.remote.is_some())
            .filter(|publication| publication.is_subscribed() == subscribed)
            .map(|publication| publication.sid.clone())
            .collect()
    }

    /// Receive settings for every subscribed publication.
    pub(crate) fn subscribed_track_settings(&self) -> Vec<TrackSettings> {
        self.core
            .lock()
            .publications
            .values()
            .filter(|publication| publication.is_subscribed())
            .filter_map(TrackPublication::track_settings)
            .collect()
    }
}

impl fmt::Debug for RemoteParticipant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteParticipant")
            .field("identity", &self.identity)
            .field("sid", &self.core.sid())
            .finish()
    }
}
