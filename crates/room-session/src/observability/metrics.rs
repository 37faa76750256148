//! Metrics definitions for the room session.
//!
//! All metrics follow Prometheus naming conventions:
//! - `room_` prefix
//! - `_total` suffix for counters
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `event`: bounded by the `RoomEvent` variants (~25 values)
//! - `state`: 4 values (connecting, connected, reconnecting, disconnected)
//! - `kind`: 2 values (resume, full)
//! - `signal`: bounded by inbound signal kinds (~20 values)

use metrics::{counter, gauge};

// ============================================================================
// Event Bus Metrics (Counters)
// ============================================================================

/// Record a room event handed to the bus.
///
/// Metric: `room_events_posted_total`
/// Labels: `event`
pub fn record_event_posted(event: &'static str) {
    counter!("room_events_posted_total", "event" => event).increment(1);
}

// ============================================================================
// Connection Metrics
// ============================================================================

/// Record entering a connection state.
///
/// Metric: `room_state_transitions_total`
/// Labels: `state`
pub fn record_state_transition(state: &'static str) {
    counter!("room_state_transitions_total", "state" => state).increment(1);
}

/// Record a completed reconnect.
///
/// Metric: `room_reconnects_total`
/// Labels: `kind` (resume, full)
pub fn record_reconnect(full: bool) {
    let kind = if full { "full" } else { "resume" };
    counter!("room_reconnects_total", "kind" => kind).increment(1);
}

/// Record a signaling reference that could not be resolved.
///
/// Metric: `room_signals_dropped_total`
/// Labels: `signal`
pub fn record_signal_dropped(signal: &'static str) {
    counter!("room_signals_dropped_total", "signal" => signal).increment(1);
}

// ============================================================================
// Directory Metrics (Gauges)
// ============================================================================

/// Set the number of remote participants in the directory.
///
/// Metric: `room_remote_participants`
/// Labels: none
pub fn set_remote_participants(count: usize) {
    // usize to f64 conversion is safe for realistic room sizes
    #[allow(clippy::cast_precision_loss)]
    gauge!("room_remote_participants").set(count as f64);
}
