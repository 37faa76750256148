//! Observability for the room session.
//!
//! Structured logs use `tracing` with per-component targets (`room.session`,
//! `room.actor`, `room.directory`, `room.speakers`, `room.events`,
//! `room.reconnect`, `room.participant`). Participant identities and sids may
//! appear in logs; tokens never do.
//!
//! # Metrics
//!
//! Recorded through the `metrics` facade. The embedding application installs
//! the recorder; without one every call is a no-op.
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `room_events_posted_total` | Counter | `event` | Room events delivered to the bus |
//! | `room_state_transitions_total` | Counter | `state` | Connection state changes |
//! | `room_reconnects_total` | Counter | `kind` | Resume and full reconnects |
//! | `room_signals_dropped_total` | Counter | `signal` | Stale or unresolvable signaling references |
//! | `room_remote_participants` | Gauge | none | Remote participants in the directory |

pub mod metrics;

pub use metrics::{
    record_event_posted, record_reconnect, record_signal_dropped, record_state_transition,
    set_remote_participants,
};
