//! Mock transport engine for room session testing.
//!
//! Provides a scriptable `RtcEngine` that:
//! - Delivers a configured join response (and `EngineConnected`) during `join`
//! - Fails or hangs the join handshake on request
//! - Records every outbound call for later assertions
//! - Keeps the latest event sink so tests can inject callbacks
//!
//! # Example
//!
//! ```rust,ignore
//! use room_test_utils::*;
//!
//! let engine = MockEngine::builder()
//!     .join_response(join_response("RM_1", TestParticipant::new("me").build(), vec![]))
//!     .build();
//!
//! // ... connect a Room over `engine` ...
//! engine.emit(EngineEvent::SignalConnected { is_resume: true });
//! ```

use async_trait::async_trait;
use room_session::engine::{
    AddTrackRequest, EngineEvent, EngineEventSink, JoinRequest, JoinResponse, RtcEngine,
    SyncState, TrackInfo, TrackSettings, UpdateSubscription,
};
use room_session::errors::EngineError;
use room_session::types::{DisconnectReason, TrackSid};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A join handshake as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedJoin {
    pub url: String,
    pub auto_subscribe: bool,
    pub adaptive_stream: bool,
    pub dynacast: bool,
}

/// Every outbound call the session made.
#[derive(Debug, Clone, Default)]
pub struct EngineCalls {
    pub joins: Vec<RecordedJoin>,
    pub sync_states: Vec<SyncState>,
    pub track_settings: Vec<TrackSettings>,
    pub subscriptions: Vec<UpdateSubscription>,
    pub published: Vec<AddTrackRequest>,
    pub unpublished: Vec<TrackSid>,
    pub muted: Vec<(TrackSid, bool)>,
    pub leaves: usize,
    pub closes: Vec<DisconnectReason>,
    pub reconnects: usize,
    pub releases: usize,
}

/// Scriptable transport engine.
#[derive(Debug)]
pub struct MockEngine {
    join_response: Mutex<Option<JoinResponse>>,
    join_error: Mutex<Option<EngineError>>,
    emit_connected: bool,
    hang_next_join: AtomicBool,
    sink: Mutex<Option<EngineEventSink>>,
    calls: Mutex<EngineCalls>,
    next_track: AtomicUsize,
}

impl MockEngine {
    /// Create a new MockEngine builder.
    #[must_use]
    pub fn builder() -> MockEngineBuilder {
        MockEngineBuilder::default()
    }

    /// Snapshot of every call recorded so far.
    #[must_use]
    pub fn calls(&self) -> EngineCalls {
        self.calls.lock().unwrap().clone()
    }

    /// Replace the join response delivered by later joins.
    pub fn set_join_response(&self, response: JoinResponse) {
        *self.join_response.lock().unwrap() = Some(response);
    }

    /// Fail later joins with `error`.
    pub fn fail_joins(&self, error: EngineError) {
        *self.join_error.lock().unwrap() = Some(error);
    }

    /// Make the next join suspend until it is cancelled.
    pub fn hang_next_join(&self) {
        self.hang_next_join.store(true, Ordering::SeqCst);
    }

    /// Sink handed to the most recent join.
    #[must_use]
    pub fn sink(&self) -> Option<EngineEventSink> {
        self.sink.lock().unwrap().clone()
    }

    /// Deliver a callback to the most recent session attempt.
    ///
    /// # Panics
    ///
    /// Panics if no join has happened yet.
    pub fn emit(&self, event: EngineEvent) -> bool {
        self.sink()
            .expect("emit called before any join")
            .emit(event)
    }
}

#[async_trait]
impl RtcEngine for MockEngine {
    async fn join(&self, request: JoinRequest, events: EngineEventSink) -> Result<(), EngineError> {
        self.calls.lock().unwrap().joins.push(RecordedJoin {
            url: request.url.clone(),
            auto_subscribe: request.auto_subscribe,
            adaptive_stream: request.adaptive_stream,
            dynacast: request.dynacast,
        });
        *self.sink.lock().unwrap() = Some(events.clone());

        if self.hang_next_join.swap(false, Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        if let Some(error) = self.join_error.lock().unwrap().clone() {
            return Err(error);
        }

        let response = self.join_response.lock().unwrap().clone();
        if let Some(response) = response {
            events.emit(EngineEvent::JoinResponse(Box::new(response)));
        }
        events.emit(EngineEvent::SignalConnected { is_resume: false });
        if self.emit_connected {
            events.emit(EngineEvent::EngineConnected);
        }
        Ok(())
    }

    async fn reconnect(&self) {
        self.calls.lock().unwrap().reconnects += 1;
    }

    async fn send_sync_state(&self, state: SyncState) -> Result<(), EngineError> {
        self.calls.lock().unwrap().sync_states.push(state);
        Ok(())
    }

    async fn update_track_settings(&self, settings: TrackSettings) -> Result<(), EngineError> {
        self.calls.lock().unwrap().track_settings.push(settings);
        Ok(())
    }

    async fn update_subscription(&self, update: UpdateSubscription) -> Result<(), EngineError> {
        self.calls.lock().unwrap().subscriptions.push(update);
        Ok(())
    }

    async fn publish_track(&self, request: AddTrackRequest) -> Result<TrackInfo, EngineError> {
        let n = self.next_track.fetch_add(1, Ordering::SeqCst);
        let info = TrackInfo {
            sid: TrackSid::new(format!("TR_LOCAL_{n}")),
            name: request.name.clone(),
            kind: request.kind,
            source: request.source,
            muted: request.muted,
        };
        self.calls.lock().unwrap().published.push(request);
        Ok(info)
    }

    async fn unpublish_track(&self, track_sid: &TrackSid) -> Result<(), EngineError> {
        self.calls.lock().unwrap().unpublished.push(track_sid.clone());
        Ok(())
    }

    async fn set_track_muted(&self, track_sid: &TrackSid, muted: bool) -> Result<(), EngineError> {
        self.calls
            .lock()
            .unwrap()
            .muted
            .push((track_sid.clone(), muted));
        Ok(())
    }

    async fn send_leave(&self) -> Result<(), EngineError> {
        self.calls.lock().unwrap().leaves += 1;
        Ok(())
    }

    async fn close(&self, reason: DisconnectReason) {
        self.calls.lock().unwrap().closes.push(reason);
    }

    fn release(&self) {
        self.calls.lock().unwrap().releases += 1;
    }
}

/// Builder for MockEngine configuration.
#[derive(Debug)]
pub struct MockEngineBuilder {
    join_response: Option<JoinResponse>,
    join_error: Option<EngineError>,
    emit_connected: bool,
}

impl Default for MockEngineBuilder {
    fn default() -> Self {
        Self {
            join_response: None,
            join_error: None,
            emit_connected: true,
        }
    }
}

impl MockEngineBuilder {
    /// Deliver `response` from every join.
    #[must_use]
    pub fn join_response(mut self, response: JoinResponse) -> Self {
        self.join_response = Some(response);
        self
    }

    /// Fail every join with `error`.
    #[must_use]
    pub fn fail_join(mut self, error: EngineError) -> Self {
        self.join_error = Some(error);
        self
    }

    /// Leave the session in `Connecting` after the join.
    #[must_use]
    pub fn without_connected_event(mut self) -> Self {
        self.emit_connected = false;
        self
    }

    /// Build the MockEngine.
    #[must_use]
    pub fn build(self) -> Arc<MockEngine> {
        Arc::new(MockEngine {
            join_response: Mutex::new(self.join_response),
            join_error: Mutex::new(self.join_error),
            emit_connected: self.emit_connected,
            hang_next_join: AtomicBool::new(false),
            sink: Mutex::new(None),
            calls: Mutex::new(EngineCalls::default()),
            next_track: AtomicUsize::new(0),
        })
    }
}
