//! Room Session library
//!
//! The session/control layer of a real-time conferencing client. A [`Room`]
//! keeps the logical view of one multi-party session on top of an external
//! peer-transport engine:
//!
//! - Connection lifecycle (`connect`, `disconnect`, `release`)
//! - Participant directory reconciliation from signaling updates
//! - Active-speaker aggregation (periodic snapshots and incremental deltas)
//! - Resume vs full reconnection, including sync-state replay
//! - An ordered, multi-subscriber event bus of room-level notifications
//!
//! # Architecture
//!
//! ```text
//! Room (application handle, cheap to clone)
//! ├── EventBus (ordered fan-out of RoomEvent)
//! ├── Directory (copy-on-write snapshot, readable without the actor)
//! ├── Observable room fields (sid, name, metadata, state, speakers)
//! └── RoomActor (one per connection attempt, owns all mutation)
//!     ├── command mailbox (connect/disconnect/subscription commands)
//!     ├── signal inbox (transport engine + reachability callbacks)
//!     └── CancellationToken (per-connection coordination context)
//! ```
//!
//! The transport engine, reachability monitor, audio routing and
//! end-to-end-encryption key provider are external collaborators expressed as
//! traits in [`engine`], [`platform`] and [`e2ee`].
//!
//! # Modules
//!
//! - `actors` - Session actor, its messages and the reconnection controller
//! - [`config`] - Connection configuration from environment
//! - [`directory`] - Participant directory snapshots
//! - [`errors`] - Error types
//! - [`events`] - Room events and the event bus
//! - [`participant`] - Local/remote participants and track publications
//! - [`speakers`] - Active-speaker aggregation

mod actors;
pub mod config;
pub mod directory;
pub mod e2ee;
pub mod engine;
pub mod errors;
pub mod events;
pub mod observability;
pub mod observable;
pub mod participant;
pub mod platform;
pub mod room;
pub mod speakers;
pub mod types;

pub use config::{ConnectOptions, RoomConfig, RoomOptions};
pub use errors::{ConnectError, RoomError};
pub use events::{EventStream, RoomEvent};
pub use participant::{LocalParticipant, Participant, RemoteParticipant, TrackPublication};
pub use room::{Room, RoomBuilder};
pub use types::{ConnectionState, DisconnectReason, ParticipantIdentity, ParticipantSid, TrackSid};
