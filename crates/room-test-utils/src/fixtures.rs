//! Pre-configured test data fixtures for room session testing.
//!
//! Provides builders and test data for:
//! - Participants with tracks
//! - Join responses
//! - Join tokens and URLs
//! - Test tracing setup

use room_session::engine::{JoinResponse, MediaTrack, ParticipantInfo, RoomInfo, TrackInfo};
use room_session::types::{
    ParticipantIdentity, ParticipantPermission, ParticipantSid, ParticipantState, RoomSid,
    TrackKind, TrackSid, TrackSource,
};
use secrecy::SecretString;
use std::sync::Once;

/// URL used by tests that do not care about it.
pub const TEST_URL: &str = "wss://rtc.example.com";

/// Join token used by tests that do not care about it.
#[must_use]
pub fn test_token() -> SecretString {
    SecretString::from("test-join-token".to_string())
}

/// Test participant fixture.
#[derive(Debug, Clone)]
pub struct TestParticipant {
    identity: String,
    sid: String,
    name: String,
    metadata: String,
    state: ParticipantState,
    tracks: Vec<TrackInfo>,
    permission: Option<ParticipantPermission>,
}

impl TestParticipant {
    /// Participant `identity` with sid `PA_<identity>`.
    #[must_use]
    pub fn new(identity: impl Into<String>) -> Self {
        let identity = identity.into();
        Self {
            sid: format!("PA_{identity}"),
            identity,
            name: String::new(),
            metadata: String::new(),
            state: ParticipantState::Active,
            tracks: Vec::new(),
            permission: None,
        }
    }

    #[must_use]
    pub fn with_sid(mut self, sid: impl Into<String>) -> Self {
        self.sid = sid.into();
        self
    }

    /// Omit the identity, as older servers do on disconnect notifications.
    #[must_use]
    pub fn without_identity(mut self) -> Self {
        self.identity = String::new();
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = metadata.into();
        self
    }

    #[must_use]
    pub fn with_permission(mut self, permission: ParticipantPermission) -> Self {
        self.permission = Some(permission);
        self
    }

    #[must_use]
    pub fn disconnected(mut self) -> Self {
        self.state = ParticipantState::Disconnected;
        self
    }

    #[must_use]
    pub fn with_track(mut self, track: TrackInfo) -> Self {
        self.tracks.push(track);
        self
    }

    #[must_use]
    pub fn sid(&self) -> ParticipantSid {
        ParticipantSid::new(self.sid.clone())
    }

    #[must_use]
    pub fn identity(&self) -> ParticipantIdentity {
        ParticipantIdentity::new(self.identity.clone())
    }

    #[must_use]
    pub fn build(&self) -> ParticipantInfo {
        ParticipantInfo {
            sid: self.sid(),
            identity: self.identity(),
            name: self.name.clone(),
            metadata: self.metadata.clone(),
            state: self.state,
            tracks: self.tracks.clone(),
            permission: self.permission.clone(),
        }
    }
}

/// Unmuted audio track metadata.
#[must_use]
pub fn audio_track(sid: &str) -> TrackInfo {
    TrackInfo {
        sid: TrackSid::new(sid),
        name: "microphone".to_string(),
        kind: TrackKind::Audio,
        source: TrackSource::Microphone,
        muted: false,
    }
}

/// Unmuted camera track metadata.
#[must_use]
pub fn video_track(sid: &str) -> TrackInfo {
    TrackInfo {
        sid: TrackSid::new(sid),
        name: "camera".to_string(),
        kind: TrackKind::Video,
        source: TrackSource::Camera,
        muted: false,
    }
}

/// Transport-level handle for an arriving track.
#[must_use]
pub fn media_track(id: &str, kind: TrackKind) -> MediaTrack {
    MediaTrack {
        id: id.to_string(),
        kind,
    }
}

/// Join response for room `room_sid` with the given local and remote
/// participants.
#[must_use]
pub fn join_response(
    room_sid: &str,
    local: ParticipantInfo,
    others: Vec<ParticipantInfo>,
) -> JoinResponse {
    JoinResponse {
        room: RoomInfo {
            sid: Some(RoomSid::new(room_sid)),
            name: format!("room-{room_sid}"),
            metadata: String::new(),
            active_recording: false,
        },
        participant: Some(local),
        other_participants: others,
        sif_trailer: None,
    }
}

static TRACING: Once = Once::new();

/// Install a test subscriber honouring `RUST_LOG`. Safe to call from every
/// test.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "room=debug".into()),
            )
            .with_test_writer()
            .try_init();
    });
}
