//! Event stream and state verification helpers.
//!
//! The session applies callbacks asynchronously, so assertions wait (with a
//! timeout) instead of checking immediately.

use room_session::events::{EventStream, RoomEvent};
use std::time::Duration;

/// How long helpers wait before failing the test.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Next event on `stream`.
///
/// # Panics
///
/// Panics if nothing arrives within [`EVENT_TIMEOUT`] or the stream ended.
pub async fn next_event(stream: &mut EventStream) -> RoomEvent {
    tokio::time::timeout(EVENT_TIMEOUT, stream.recv())
        .await
        .expect("timed out waiting for room event")
        .expect("event stream closed")
}

/// Skip events until one of `kind` arrives and return it.
///
/// # Panics
///
/// Panics on timeout or when the stream ends first.
pub async fn expect_event(stream: &mut EventStream, kind: &str) -> RoomEvent {
    loop {
        let event = next_event(stream).await;
        if event.kind() == kind {
            return event;
        }
    }
}

/// Kinds of every event up to and including the first `kind`.
///
/// # Panics
///
/// Panics on timeout or when the stream ends first.
pub async fn kinds_until(stream: &mut EventStream, kind: &str) -> Vec<&'static str> {
    let mut kinds = Vec::new();
    loop {
        let event = next_event(stream).await;
        kinds.push(event.kind());
        if event.kind() == kind {
            return kinds;
        }
    }
}

/// Kinds of every event already queued on `stream`.
pub fn drain_kinds(stream: &mut EventStream) -> Vec<&'static str> {
    let mut kinds = Vec::new();
    while let Some(event) = stream.try_recv() {
        kinds.push(event.kind());
    }
    kinds
}

/// Wait until `condition` holds.
///
/// # Panics
///
/// Panics if it does not hold within [`EVENT_TIMEOUT`].
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {EVENT_TIMEOUT:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
