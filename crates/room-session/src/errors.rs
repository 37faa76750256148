//! Room session error types.
//!
//! `ConnectError` is surfaced to the caller of `Room::connect` and mirrored on
//! the event bus as `RoomEvent::FailedToConnect`. Everything that goes wrong
//! while handling an inbound signal is logged and contained instead.

use thiserror::Error;

/// Failure of a `connect` attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    /// The join response carried no local participant (server contract violation).
    #[error("server did not return a local participant")]
    MissingLocalParticipant,

    /// The transport engine failed the join handshake.
    #[error("transport error: {0}")]
    Transport(String),

    /// A newer `connect` call superseded this attempt.
    #[error("connection attempt cancelled")]
    Cancelled,

    /// The room was released and cannot be reused.
    #[error("room has been released")]
    Released,

    /// Internal coordination failure (actor mailbox gone).
    #[error("internal error: {0}")]
    Internal(String),
}

impl ConnectError {
    /// Whether issuing `connect` again may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConnectError::Transport(_) | ConnectError::Cancelled)
    }
}

/// Errors returned by room commands and participant operations.
#[derive(Debug, Error)]
pub enum RoomError {
    /// The room was released.
    #[error("room has been released")]
    Released,

    /// The command needs a live connection.
    #[error("room is not connected")]
    NotConnected,

    /// No participant with the given sid or identity.
    #[error("participant not found: {0}")]
    ParticipantNotFound(String),

    /// No publication with the given track sid.
    #[error("track not found: {0}")]
    TrackNotFound(String),

    /// The transport engine rejected the request.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Internal coordination failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RoomError {
    /// Whether retrying the same command may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            RoomError::Engine(e) => e.is_retryable(),
            RoomError::NotConnected => true,
            RoomError::Released
            | RoomError::ParticipantNotFound(_)
            | RoomError::TrackNotFound(_)
            | RoomError::Internal(_) => false,
        }
    }
}

/// Errors reported by the transport engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// Network-level failure.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The server refused the request.
    #[error("rejected by server: {0}")]
    Rejected(String),

    /// The engine has been closed.
    #[error("engine closed")]
    Closed,
}

impl EngineError {
    /// Whether the failure is transient.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Transport(_))
    }
}

impl From<EngineError> for ConnectError {
    fn from(err: EngineError) -> Self {
        ConnectError::Transport(err.to_string())
    }
}

/// Errors from the platform reachability monitor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetworkError {
    /// Unregister called without a registered callback.
    #[error("network callback not registered")]
    NotRegistered,

    /// The platform refused the registration.
    #[error("network monitor unavailable: {0}")]
    Unavailable(String),
}

impl NetworkError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, NetworkError::Unavailable(_))
    }
}

/// Errors from the event bus.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventBusError {
    /// The coordination context the poster belongs to has shut down.
    #[error("event context closed")]
    ContextClosed,
}

impl EventBusError {
    /// A closed context never reopens.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        false
    }
}
