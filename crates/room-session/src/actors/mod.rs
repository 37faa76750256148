//! Actor implementation for the room session.
//!
//! ```text
//! Room (application handle)
//! └── RoomActor (one per connection attempt)
//!     ├── owns connection state, room fields, directory writes
//!     ├── ReconnectController (reachability flag, sync state)
//!     └── track retry timers (child tokens of the connection context)
//! ```
//!
//! # Key Design Decisions
//!
//! - **One actor per `connect`**: a newer attempt cancels the older actor's
//!   token, which silences everything the older attempt would still post
//! - **Callbacks before commands**: transport callbacks are drained ahead of
//!   the mailbox so the join response is applied before the join is confirmed
//! - **Single writer**: readers use snapshots and observables, never the actor
//!
//! # Modules
//!
//! - [`room`] - `RoomActor` and its handle
//! - [`messages`] - Mailbox and retry message types
//! - [`reconnect`] - Reachability tracking and sync-state assembly

pub(crate) mod messages;
pub(crate) mod reconnect;
pub(crate) mod room;

pub(crate) use room::{RoomActor, RoomActorHandle};
