//! Track publications.
//!
//! A publication is owned by exactly one participant and only changes
//! through that participant's operations. Callers receive cloned snapshots.

use crate::engine::{MediaTrack, TrackInfo, TrackPublishedInfo, TrackSettings};
use crate::types::{StreamState, TrackKind, TrackSid, TrackSource, VideoQuality};

/// Subscription-side state of a remote publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrackState {
    /// Local intent to receive the track.
    pub subscription_desired: bool,
    /// Whether the publisher allows this client to subscribe.
    pub subscription_allowed: bool,
    pub stream_state: StreamState,
    /// Receive enabled (disabled tracks are paused by the server).
    pub enabled: bool,
    pub quality: VideoQuality,
}

impl Default for RemoteTrackState {
    fn default() -> Self {
        Self {
            subscription_desired: true,
            subscription_allowed: true,
            stream_state: StreamState::Unknown,
            enabled: true,
            quality: VideoQuality::High,
        }
    }
}

/// Handle to one published or subscribed track.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackPublication {
    pub sid: TrackSid,
    pub name: String,
    pub kind: TrackKind,
    pub source: TrackSource,
    pub muted: bool,
    /// Media track, absent for remote publications known only by metadata.
    pub track: Option<MediaTrack>,
    /// Present for remote publications.
    pub remote: Option<RemoteTrackState>,
    /// Client-side id, present for local publications.
    pub cid: Option<String>,
}

impl TrackPublication {
    /// Metadata-only remote publication.
    pub(crate) fn remote(info: &TrackInfo) -> Self {
        Self {
            sid: info.sid.clone(),
            name: info.name.clone(),
            kind: info.kind,
            source: info.source,
            muted: info.muted,
            track: None,
            remote: Some(RemoteTrackState::default()),
            cid: None,
        }
    }

    /// Local publication confirmed by the server.
    pub(crate) fn local(info: &TrackInfo, cid: &str) -> Self {
        Self {
            sid: info.sid.clone(),
            name: info.name.clone(),
            kind: info.kind,
            source: info.source,
            muted: info.muted,
            track: Some(MediaTrack {
                id: cid.to_string(),
                kind: info.kind,
            }),
            remote: None,
            cid: Some(cid.to_string()),
        }
    }

    /// Apply server metadata. Returns `true` when the mute flag flipped.
    pub(crate) fn apply_info(&mut self, info: &TrackInfo) -> bool {
        self.name.clone_from(&info.name);
        self.source = info.source;
        let mute_changed = self.muted != info.muted;
        self.muted = info.muted;
        mute_changed
    }

    /// Whether this is a local publication.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.remote.is_none()
    }

    /// Whether media for this remote track is being received.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        match &self.remote {
            Some(state) => {
                state.subscription_desired && state.subscription_allowed && self.track.is_some()
            }
            None => false,
        }
    }

    /// Current receive settings, for remote publications.
    #[must_use]
    pub fn track_settings(&self) -> Option<TrackSettings> {
        self.remote.as_ref().map(|state| TrackSettings {
            track_sid: self.sid.clone(),
            disabled: !state.enabled,
            quality: state.quality,
        })
    }

    /// Published-track summary used in sync state, for local publications.
    pub(crate) fn published_info(&self) -> Option<TrackPublishedInfo> {
        self.cid.as_ref().map(|cid| TrackPublishedInfo {
            cid: cid.clone(),
            track: TrackInfo {
                sid: self.sid.clone(),
                name: self.name.clone(),
                kind: self.kind,
                source: self.source,
                muted: self.muted,
            },
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn audio_info(sid: &str, muted: bool) -> TrackInfo {
        TrackInfo {
            sid: TrackSid::new(sid),
            name: "mic".to_string(),
            kind: TrackKind::Audio,
            source: TrackSource::Microphone,
            muted,
        }
    }

    #[test]
    fn test_remote_publication_subscribed_needs_track() {
        let mut publication = TrackPublication::remote(&audio_info("TR_1", false));
        assert!(!publication.is_subscribed());

        publication.track = Some(MediaTrack {
            id: "m1".to_string(),
            kind: TrackKind::Audio,
        });
        assert!(publication.is_subscribed());

        if let Some(state) = publication.remote.as_mut() {
            state.subscription_allowed = false;
        }
        assert!(!publication.is_subscribed());
    }

    #[test]
    fn test_apply_info_reports_mute_flip() {
        let mut publication = TrackPublication::remote(&audio_info("TR_1", false));
        assert!(!publication.apply_info(&audio_info("TR_1", false)));
        assert!(publication.apply_info(&audio_info("TR_1", true)));
        assert!(publication.muted);
    }

    #[test]
    fn test_local_publication_reports_published_info() {
        let publication = TrackPublication::local(&audio_info("TR_5", false), "cid-5");
        assert!(publication.is_local());
        assert!(!publication.is_subscribed());
        assert!(publication.track_settings().is_none());
        let info = publication.published_info().unwrap();
        assert_eq!(info.cid, "cid-5");
        assert_eq!(info.track.sid.as_str(), "TR_5");
    }
}
