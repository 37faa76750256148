//! Message types for the session actor.
//!
//! Application-side calls use a bounded `mpsc` mailbox with `oneshot` replies.
//! Transport and reachability callbacks arrive on separate unbounded inboxes
//! (see [`crate::engine::EngineEventSink`]) so a busy actor never blocks them.

use crate::errors::{ConnectError, RoomError};
use crate::types::{ParticipantSid, TrackSid};

use tokio::sync::oneshot;

/// Commands sent to the session actor.
#[derive(Debug)]
pub(crate) enum RoomCommand {
    /// Reset per-connection state and enter `Connecting`.
    Prepare { respond_to: oneshot::Sender<()> },

    /// The engine finished the join handshake. Replies with the outcome
    /// recorded from the join response.
    ConfirmJoin {
        respond_to: oneshot::Sender<Result<(), ConnectError>>,
    },

    /// The join handshake failed; tear the attempt down.
    JoinFailed {
        error: ConnectError,
        respond_to: oneshot::Sender<()>,
    },

    /// Leave the room (client initiated).
    Disconnect { respond_to: oneshot::Sender<()> },

    /// Record subscription intent for a remote track.
    SetTrackSubscribed {
        participant_sid: ParticipantSid,
        track_sid: TrackSid,
        subscribe: bool,
        respond_to: oneshot::Sender<Result<(), RoomError>>,
    },
}

/// A delayed attempt to attach a media track whose publication was not yet
/// known.
#[derive(Debug)]
pub(crate) struct TrackRetry {
    pub(crate) track: crate::engine::MediaTrack,
    pub(crate) participant_sid: ParticipantSid,
    pub(crate) track_sid: TrackSid,
    /// Attempts made so far, including the first.
    pub(crate) attempt: u32,
}
