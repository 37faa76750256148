//! Identifier newtypes and small state enums shared across the session.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix the server uses for track session identifiers.
pub const TRACK_SID_PREFIX: &str = "TR_";

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the raw identifier.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// True when the server sent an empty identifier.
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Application-chosen identity of a participant. Stable for the
    /// participant's lifetime.
    ParticipantIdentity
);

string_id!(
    /// Server-assigned session identifier of a participant.
    ParticipantSid
);

string_id!(
    /// Server-assigned identifier of a published track.
    TrackSid
);

string_id!(
    /// Server-assigned identifier of the room.
    RoomSid
);

/// Connection state of a room session.
///
/// `Disconnected` is both the initial and the terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Join handshake in progress.
    Connecting,
    /// Joined and media transport established.
    Connected,
    /// Transport lost, reconnection in progress.
    Reconnecting,
    /// Not connected.
    #[default]
    Disconnected,
}

impl ConnectionState {
    /// Returns the state as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Disconnected => "disconnected",
        }
    }
}

/// Why a session was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// The application called `disconnect`.
    ClientInitiated,
    /// The join handshake failed.
    JoinFailure,
    /// The server closed the session.
    ServerShutdown,
    /// The participant was removed by the server.
    ParticipantRemoved,
    /// The room was deleted.
    RoomDeleted,
    /// Another session joined with the same identity.
    DuplicateIdentity,
    /// Reconnection attempts were exhausted.
    ReconnectFailed,
    /// Anything else reported by the engine.
    Unknown,
}

/// Link quality reported by the server for a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionQuality {
    Excellent,
    Good,
    Poor,
    Lost,
    #[default]
    Unknown,
}

/// Media kind of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Capture source of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackSource {
    Camera,
    Microphone,
    ScreenShare,
    ScreenShareAudio,
    #[default]
    Unknown,
}

/// Server-side forwarding state of a subscribed remote track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Active,
    Paused,
    #[default]
    Unknown,
}

/// Requested layer quality for a subscribed video track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoQuality {
    Low,
    Medium,
    #[default]
    High,
}

/// Participant lifecycle state as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantState {
    #[default]
    Joining,
    Joined,
    Active,
    Disconnected,
}

/// Capabilities granted to a participant by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantPermission {
    pub can_subscribe: bool,
    pub can_publish: bool,
    pub can_publish_data: bool,
    pub hidden: bool,
}

impl Default for ParticipantPermission {
    fn default() -> Self {
        Self {
            can_subscribe: true,
            can_publish: true,
            can_publish_data: true,
            hidden: false,
        }
    }
}

/// Encryption applied to published media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionType {
    #[default]
    None,
    Gcm,
    Custom,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_display_and_compare() {
        let sid = ParticipantSid::new("PA_1");
        assert_eq!(sid.to_string(), "PA_1");
        assert_eq!(sid, ParticipantSid::from("PA_1"));
        assert!(!sid.is_empty());
        assert!(TrackSid::new("").is_empty());
    }

    #[test]
    fn test_initial_connection_state_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::Reconnecting.as_str(), "reconnecting");
    }
}
