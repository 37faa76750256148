//! Transport engine capability and the typed signaling messages it exchanges
//! with the session.
//!
//! The engine performs media negotiation and transport; the session only sees
//! already-deserialized messages. Inbound callbacks are delivered as
//! [`EngineEvent`] values through an [`EngineEventSink`] handed to the engine
//! on `join`. Emitting is synchronous and never blocks, so engine callbacks
//! cannot stall on a busy session.

use crate::errors::EngineError;
use crate::types::{
    ConnectionQuality, DisconnectReason, EncryptionType, ParticipantIdentity,
    ParticipantPermission, ParticipantSid, ParticipantState, RoomSid, StreamState, TrackKind,
    TrackSid, TrackSource, VideoQuality, TRACK_SID_PREFIX,
};

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

/// Separator between participant sid and track id in a packed stream id.
pub const STREAM_ID_DELIMITER: char = '|';

// ----------------------------------------------------------------------------
// Signaling messages
// ----------------------------------------------------------------------------

/// Published track metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub sid: TrackSid,
    #[serde(default)]
    pub name: String,
    pub kind: TrackKind,
    #[serde(default)]
    pub source: TrackSource,
    #[serde(default)]
    pub muted: bool,
}

/// Participant description as sent by the server.
///
/// `identity` may be empty on disconnect notifications from older servers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub sid: ParticipantSid,
    #[serde(default = "empty_identity")]
    pub identity: ParticipantIdentity,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub metadata: String,
    #[serde(default)]
    pub state: ParticipantState,
    #[serde(default)]
    pub tracks: Vec<TrackInfo>,
    #[serde(default)]
    pub permission: Option<ParticipantPermission>,
}

fn empty_identity() -> ParticipantIdentity {
    ParticipantIdentity::new("")
}

/// Room description carried by the join response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomInfo {
    #[serde(default)]
    pub sid: Option<RoomSid>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub metadata: String,
    #[serde(default)]
    pub active_recording: bool,
}

/// Result of the join handshake.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinResponse {
    pub room: RoomInfo,
    #[serde(default)]
    pub participant: Option<ParticipantInfo>,
    #[serde(default)]
    pub other_participants: Vec<ParticipantInfo>,
    /// Frame trailer used by the end-to-end-encryption key provider.
    #[serde(default)]
    pub sif_trailer: Option<Vec<u8>>,
}

/// One entry of a speaker update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerInfo {
    pub sid: ParticipantSid,
    pub level: f32,
    pub active: bool,
}

/// Connection quality of one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionQualityInfo {
    pub participant_sid: ParticipantSid,
    pub quality: ConnectionQuality,
}

/// Forwarding state of one subscribed track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStateInfo {
    pub participant_sid: ParticipantSid,
    pub track_sid: TrackSid,
    pub state: StreamState,
}

/// Whether the local participant may subscribe to a remote track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionPermissionUpdate {
    pub participant_sid: ParticipantSid,
    pub track_sid: TrackSid,
    pub allowed: bool,
}

/// Handle to a media track produced by the transport engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaTrack {
    /// Transport-level track id.
    pub id: String,
    pub kind: TrackKind,
}

/// Subscription intent for a set of tracks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSubscription {
    pub track_sids: Vec<TrackSid>,
    pub subscribe: bool,
}

/// A locally published track as reported in sync state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackPublishedInfo {
    /// Client-side id of the track.
    pub cid: String,
    pub track: TrackInfo,
}

/// State replayed to the server after a resumed signaling connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub subscription: UpdateSubscription,
    pub publish_tracks: Vec<TrackPublishedInfo>,
}

/// Receive settings for a subscribed track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackSettings {
    pub track_sid: TrackSid,
    pub disabled: bool,
    pub quality: VideoQuality,
}

/// Request to publish a local track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddTrackRequest {
    pub cid: String,
    pub name: String,
    pub kind: TrackKind,
    pub source: TrackSource,
    pub muted: bool,
    pub encryption: EncryptionType,
}

/// Parameters of the join handshake.
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub url: String,
    pub token: SecretString,
    pub auto_subscribe: bool,
    pub adaptive_stream: bool,
    pub dynacast: bool,
}

// ----------------------------------------------------------------------------
// Inbound callbacks
// ----------------------------------------------------------------------------

/// Callbacks delivered by the transport engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Join (or full-reconnect rejoin) completed.
    JoinResponse(Box<JoinResponse>),
    /// Participants joined, changed or left.
    ParticipantUpdates(Vec<ParticipantInfo>),
    /// Periodic authoritative list of current speakers.
    ActiveSpeakersSnapshot(Vec<SpeakerInfo>),
    /// Speakers that became active or inactive.
    ActiveSpeakersDelta(Vec<SpeakerInfo>),
    /// A media track arrived on the subscriber transport.
    TrackAdded { track: MediaTrack, stream_id: String },
    ConnectionQuality(Vec<ConnectionQualityInfo>),
    StreamStateUpdate(Vec<StreamStateInfo>),
    SubscriptionPermission(SubscriptionPermissionUpdate),
    /// The server muted or unmuted one of the local tracks.
    RemoteMuteChanged { track_sid: TrackSid, muted: bool },
    RoomMetadataUpdate {
        sid: Option<RoomSid>,
        metadata: String,
        active_recording: bool,
    },
    /// Signaling channel (re)established.
    SignalConnected { is_resume: bool },
    EngineConnected,
    EngineReconnecting,
    EngineReconnected,
    EngineDisconnected(DisconnectReason),
    /// A full reconnect is about to rejoin from scratch.
    FullReconnecting,
    /// A reconnect of either kind finished.
    PostReconnect { is_full_reconnect: bool },
    FailToConnect(EngineError),
}

impl EngineEvent {
    /// Short name for logs and metric labels.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            EngineEvent::JoinResponse(_) => "join_response",
            EngineEvent::ParticipantUpdates(_) => "participant_updates",
            EngineEvent::ActiveSpeakersSnapshot(_) => "speakers_snapshot",
            EngineEvent::ActiveSpeakersDelta(_) => "speakers_delta",
            EngineEvent::TrackAdded { .. } => "track_added",
            EngineEvent::ConnectionQuality(_) => "connection_quality",
            EngineEvent::StreamStateUpdate(_) => "stream_state",
            EngineEvent::SubscriptionPermission(_) => "subscription_permission",
            EngineEvent::RemoteMuteChanged { .. } => "remote_mute",
            EngineEvent::RoomMetadataUpdate { .. } => "room_metadata",
            EngineEvent::SignalConnected { .. } => "signal_connected",
            EngineEvent::EngineConnected => "engine_connected",
            EngineEvent::EngineReconnecting => "engine_reconnecting",
            EngineEvent::EngineReconnected => "engine_reconnected",
            EngineEvent::EngineDisconnected(_) => "engine_disconnected",
            EngineEvent::FullReconnecting => "full_reconnecting",
            EngineEvent::PostReconnect { .. } => "post_reconnect",
            EngineEvent::FailToConnect(_) => "fail_to_connect",
        }
    }
}

/// Where the engine delivers its callbacks for one connection attempt.
#[derive(Debug, Clone)]
pub struct EngineEventSink {
    sender: mpsc::UnboundedSender<EngineEvent>,
}

impl EngineEventSink {
    pub(crate) fn new(sender: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self { sender }
    }

    /// Deliver a callback. Returns `false` once the session attempt is gone.
    pub fn emit(&self, event: EngineEvent) -> bool {
        let kind = event.kind();
        if self.sender.send(event).is_err() {
            trace!(
                target: "room.engine",
                event = kind,
                "Engine event dropped, session no longer listening"
            );
            return false;
        }
        true
    }

    /// Whether the session attempt that owns this sink has ended.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Create a sink over a caller-owned channel, for driving engines in tests.
    #[cfg(any(test, feature = "test-utils"))]
    #[must_use]
    pub fn from_test_channel(sender: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self { sender }
    }
}

// ----------------------------------------------------------------------------
// Outbound capability
// ----------------------------------------------------------------------------

/// The peer-transport engine driven by a room session.
///
/// Apart from `join`, methods are awaited from the session actor, which is
/// also the only consumer of the [`EngineEventSink`]. An implementation must
/// never wait for one of its own callbacks to be processed before returning.
#[async_trait]
pub trait RtcEngine: Send + Sync {
    /// Perform the join handshake. The join response itself is delivered as
    /// [`EngineEvent::JoinResponse`] through `events` before this returns.
    async fn join(&self, request: JoinRequest, events: EngineEventSink) -> Result<(), EngineError>;

    /// Start a reconnection attempt and return.
    ///
    /// Progress is reported through the sink (`EngineReconnecting`,
    /// `SignalConnected`, `EngineReconnected`). Returning only after the
    /// reconnect finished would stall the session that reads those events.
    async fn reconnect(&self);

    async fn send_sync_state(&self, state: SyncState) -> Result<(), EngineError>;

    async fn update_track_settings(&self, settings: TrackSettings) -> Result<(), EngineError>;

    async fn update_subscription(&self, update: UpdateSubscription) -> Result<(), EngineError>;

    /// Publish a local track and return the server's confirmation.
    ///
    /// Must resolve from the signaling response alone, without waiting on a
    /// sink callback.
    async fn publish_track(&self, request: AddTrackRequest) -> Result<TrackInfo, EngineError>;

    async fn unpublish_track(&self, track_sid: &TrackSid) -> Result<(), EngineError>;

    async fn set_track_muted(&self, track_sid: &TrackSid, muted: bool) -> Result<(), EngineError>;

    /// Tell the server the client is leaving.
    async fn send_leave(&self) -> Result<(), EngineError>;

    /// Close transports for this connection.
    async fn close(&self, reason: DisconnectReason);

    /// Release engine-wide resources. Called once from `Room::release`.
    fn release(&self) {}
}

// ----------------------------------------------------------------------------
// Stream id resolution
// ----------------------------------------------------------------------------

/// Split a packed `participantSid|trackId` stream id.
///
/// Anything that is not exactly two segments is treated as a bare
/// participant sid with no track segment.
#[must_use]
pub fn unpack_stream_id(packed: &str) -> (&str, &str) {
    let mut parts = packed.split(STREAM_ID_DELIMITER);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(participant), Some(track), None) => (participant, track),
        _ => (packed, ""),
    }
}

/// Resolve the owning participant sid and track sid for an added track.
///
/// The track segment of the stream id wins when it carries the server's track
/// sid prefix; otherwise the transport track id is used.
#[must_use]
pub fn resolve_track_target(
    stream_id: &str,
    transport_track_id: &str,
) -> (ParticipantSid, TrackSid) {
    let (participant_sid, stream_track) = unpack_stream_id(stream_id);
    let track_sid = if stream_track.starts_with(TRACK_SID_PREFIX) {
        stream_track
    } else {
        transport_track_id
    };
    (ParticipantSid::new(participant_sid), TrackSid::new(track_sid))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_unpack_stream_id() {
        assert_eq!(unpack_stream_id("PA_1|TR_9"), ("PA_1", "TR_9"));
        assert_eq!(unpack_stream_id("PA_1"), ("PA_1", ""));
        assert_eq!(unpack_stream_id("a|b|c"), ("a|b|c", ""));
    }

    #[test]
    fn test_resolve_track_target_prefers_track_sid_segment() {
        let (participant, track) = resolve_track_target("P1|TR_9", "transport-id");
        assert_eq!(participant.as_str(), "P1");
        assert_eq!(track.as_str(), "TR_9");
    }

    #[test]
    fn test_resolve_track_target_falls_back_to_transport_id() {
        let (participant, track) = resolve_track_target("P1|camera", "TR_42");
        assert_eq!(participant.as_str(), "P1");
        assert_eq!(track.as_str(), "TR_42");

        let (participant, track) = resolve_track_target("P2", "TR_7");
        assert_eq!(participant.as_str(), "P2");
        assert_eq!(track.as_str(), "TR_7");
    }

    #[test]
    fn test_sink_reports_closed_session() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EngineEventSink::from_test_channel(tx);
        assert!(sink.emit(EngineEvent::EngineConnected));
        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.emit(EngineEvent::EngineConnected));
    }

    #[test]
    fn test_participant_info_deserializes_without_identity() {
        let info: ParticipantInfo =
            serde_json::from_str(r#"{"sid":"PA_1","state":"disconnected"}"#).unwrap();
        assert!(info.identity.is_empty());
        assert_eq!(info.state, ParticipantState::Disconnected);
        assert!(info.tracks.is_empty());
    }
}
