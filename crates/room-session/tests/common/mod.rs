//! Shared setup for room session integration tests.

#![allow(dead_code)]

use room_session::engine::JoinResponse;
use room_session::{ConnectOptions, EventStream, Room, RoomOptions};
use room_test_utils::*;
use std::sync::Arc;

/// A connected room and its collaborators.
pub struct Harness {
    pub room: Room,
    pub engine: Arc<MockEngine>,
    pub network: Arc<MockNetworkMonitor>,
    pub audio: Arc<RecordingAudioHandler>,
    pub events: EventStream,
}

/// Build a room over a mock engine that answers joins with `response`.
pub fn harness(response: JoinResponse, options: RoomOptions) -> Harness {
    init_test_tracing();
    let engine = MockEngine::builder().join_response(response).build();
    let network = MockNetworkMonitor::new();
    let audio = RecordingAudioHandler::new();
    let room = Room::builder(engine.clone())
        .network_monitor(network.clone())
        .audio_handler(audio.clone())
        .options(options)
        .build();
    let events = room.events();
    Harness {
        room,
        engine,
        network,
        audio,
        events,
    }
}

/// Connect a room whose join response lists `others` next to local `me`.
pub async fn connected(others: Vec<TestParticipant>, options: ConnectOptions) -> Harness {
    let response = join_response(
        "R1",
        TestParticipant::new("me").build(),
        others.iter().map(TestParticipant::build).collect(),
    );
    let mut harness = harness(response, RoomOptions::default());
    harness
        .room
        .connect(TEST_URL, test_token(), options)
        .await
        .expect("connect should succeed");
    expect_event(&mut harness.events, "connected").await;
    harness
}
