//! Inbound signaling tests.
//!
//! Verifies how a connected room applies transport callbacks:
//! - Participant reconciliation (sid fallback, local participant handling)
//! - Track arrival, stream id resolution and delayed metadata
//! - Active speakers, connection quality, stream state, permissions
//! - Room metadata and server-side mute

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{connected, harness, Harness};
use room_session::engine::{
    ConnectionQualityInfo, EngineEvent, SpeakerInfo, StreamStateInfo,
    SubscriptionPermissionUpdate,
};
use room_session::types::{ConnectionQuality, StreamState, TrackKind};
use room_session::{
    ConnectOptions, Participant, ParticipantIdentity, ParticipantSid, RoomError, RoomEvent,
    RoomOptions, TrackSid,
};
use room_test_utils::*;
use std::time::Duration;

fn identity(name: &str) -> ParticipantIdentity {
    ParticipantIdentity::new(name)
}

fn sid(name: &str) -> ParticipantSid {
    ParticipantSid::new(format!("PA_{name}"))
}

fn speaker(name: &str, level: f32, active: bool) -> SpeakerInfo {
    SpeakerInfo {
        sid: sid(name),
        level,
        active,
    }
}

fn identities(speakers: &[Participant]) -> Vec<ParticipantIdentity> {
    speakers.iter().filter_map(Participant::identity).collect()
}

// ============================================================================
// Participant reconciliation
// ============================================================================

#[tokio::test]
async fn test_new_participant_announced_and_known_one_updated() {
    let Harness {
        room,
        engine,
        mut events,
        ..
    } = connected(vec![TestParticipant::new("P1")], ConnectOptions::default()).await;

    engine.emit(EngineEvent::ParticipantUpdates(vec![
        TestParticipant::new("P1").with_metadata("presenter").build(),
        TestParticipant::new("P2").build(),
    ]));

    let kinds = kinds_until(&mut events, "participant_connected").await;
    assert_eq!(
        kinds,
        vec!["participant_metadata_changed", "participant_connected"]
    );
    assert_eq!(
        room.remote_participant(&identity("P1")).unwrap().metadata(),
        "presenter"
    );
    assert_eq!(room.remote_participants().len(), 2);
    assert!(room.participant_by_sid(&sid("P2")).is_some());
}

#[tokio::test]
async fn test_disconnect_without_identity_uses_sid_index() {
    let Harness {
        room,
        engine,
        mut events,
        ..
    } = connected(vec![TestParticipant::new("P1")], ConnectOptions::default()).await;

    engine.emit(EngineEvent::ParticipantUpdates(vec![TestParticipant::new("P1")
        .without_identity()
        .disconnected()
        .build()]));

    let event = expect_event(&mut events, "participant_disconnected").await;
    assert!(matches!(
        event,
        RoomEvent::ParticipantDisconnected { ref participant }
            if *participant.identity() == identity("P1")
    ));
    assert!(room.remote_participant(&identity("P1")).is_none());
    assert!(room.participant_by_sid(&sid("P1")).is_none());
}

#[tokio::test]
async fn test_local_participant_never_enters_directory() {
    let Harness { room, engine, .. } =
        connected(vec![TestParticipant::new("P1")], ConnectOptions::default()).await;

    engine.emit(EngineEvent::ParticipantUpdates(vec![
        TestParticipant::new("me").with_metadata("host").build(),
        TestParticipant::new("me")
            .with_metadata("host")
            .without_identity()
            .build(),
    ]));

    let local = room.local_participant();
    eventually(|| local.metadata() == "host").await;
    assert!(!room.remote_participants().contains(&identity("me")));
    assert_eq!(room.remote_participants().len(), 1);
}

// ============================================================================
// Track arrival
// ============================================================================

#[tokio::test]
async fn test_stream_id_resolves_participant_and_track() {
    let Harness {
        room,
        engine,
        mut events,
        ..
    } = connected(
        vec![TestParticipant::new("P1")
            .with_sid("P1")
            .with_track(video_track("TR_9"))],
        ConnectOptions::default(),
    )
    .await;

    engine.emit(EngineEvent::TrackAdded {
        track: media_track("transport-generated-id", TrackKind::Video),
        stream_id: "P1|TR_9".to_string(),
    });

    let event = expect_event(&mut events, "track_subscribed").await;
    assert!(matches!(
        event,
        RoomEvent::TrackSubscribed { ref participant, ref publication, .. }
            if *participant.identity() == identity("P1") && publication.sid == TrackSid::new("TR_9")
    ));
    let remote = room.remote_participant(&identity("P1")).unwrap();
    assert!(remote
        .track_publication(&TrackSid::new("TR_9"))
        .unwrap()
        .is_subscribed());
}

async fn room_with_fast_retries() -> Harness {
    let response = join_response(
        "R1",
        TestParticipant::new("me").build(),
        vec![TestParticipant::new("P1").build()],
    );
    let mut harness = harness(
        response,
        RoomOptions {
            track_retry_attempts: 3,
            track_retry_interval: Duration::from_millis(100),
            ..RoomOptions::default()
        },
    );
    harness
        .room
        .connect(TEST_URL, test_token(), ConnectOptions::default())
        .await
        .unwrap();
    expect_event(&mut harness.events, "connected").await;
    harness
}

#[tokio::test(start_paused = true)]
async fn test_track_attaches_once_metadata_arrives() {
    let Harness {
        room: _room,
        engine,
        mut events,
        ..
    } = room_with_fast_retries().await;

    engine.emit(EngineEvent::TrackAdded {
        track: media_track("m-9", TrackKind::Audio),
        stream_id: "PA_P1|TR_9".to_string(),
    });
    engine.emit(EngineEvent::ParticipantUpdates(vec![TestParticipant::new("P1")
        .with_track(audio_track("TR_9"))
        .build()]));

    let kinds = kinds_until(&mut events, "track_subscribed").await;
    assert_eq!(kinds, vec!["track_published", "track_subscribed"]);
}

#[tokio::test(start_paused = true)]
async fn test_track_without_metadata_fails_after_retries() {
    let Harness {
        room: _room,
        engine,
        mut events,
        ..
    } = room_with_fast_retries().await;

    engine.emit(EngineEvent::TrackAdded {
        track: media_track("m-9", TrackKind::Audio),
        stream_id: "PA_P1|TR_9".to_string(),
    });

    let event = next_event(&mut events).await;
    assert!(matches!(
        event,
        RoomEvent::TrackSubscriptionFailed { ref participant_sid, ref track_sid }
            if *participant_sid == sid("P1") && *track_sid == TrackSid::new("TR_9")
    ));
}

#[tokio::test(start_paused = true)]
async fn test_track_for_unknown_participant_is_dropped() {
    let Harness {
        room,
        engine,
        mut events,
        ..
    } = room_with_fast_retries().await;

    engine.emit(EngineEvent::TrackAdded {
        track: media_track("m-1", TrackKind::Audio),
        stream_id: "PA_ghost|TR_1".to_string(),
    });
    tokio::time::sleep(Duration::from_secs(1)).await;

    room.disconnect().await;
    assert_eq!(
        kinds_until(&mut events, "disconnected").await,
        vec!["participant_disconnected", "disconnected"]
    );
}

// ============================================================================
// Active speakers
// ============================================================================

#[tokio::test]
async fn test_speaker_snapshot_keeps_order_and_resets_others() {
    let Harness {
        room,
        engine,
        mut events,
        ..
    } = connected(
        vec![TestParticipant::new("P1"), TestParticipant::new("P2")],
        ConnectOptions::default(),
    )
    .await;

    engine.emit(EngineEvent::ActiveSpeakersSnapshot(vec![speaker("P1", 0.6, true)]));
    expect_event(&mut events, "active_speakers_changed").await;

    engine.emit(EngineEvent::ActiveSpeakersSnapshot(vec![
        speaker("P2", 0.9, true),
        speaker("ghost", 1.0, true),
        speaker("me", 0.2, true),
    ]));
    let event = expect_event(&mut events, "active_speakers_changed").await;
    let RoomEvent::ActiveSpeakersChanged { speakers } = event else {
        unreachable!("expect_event returned another kind");
    };
    assert_eq!(identities(&speakers), vec![identity("P2"), identity("me")]);
    assert_eq!(
        identities(&room.active_speakers()),
        vec![identity("P2"), identity("me")]
    );

    let p1 = room.remote_participant(&identity("P1")).unwrap();
    assert!(!p1.is_speaking());
    assert_eq!(p1.audio_level(), 0.0);

    // Same snapshot again still notifies.
    engine.emit(EngineEvent::ActiveSpeakersSnapshot(vec![speaker("P2", 0.9, true)]));
    expect_event(&mut events, "active_speakers_changed").await;
}

#[tokio::test]
async fn test_speaker_delta_sorted_by_level() {
    let Harness {
        room,
        engine,
        mut events,
        ..
    } = connected(
        vec![TestParticipant::new("P1"), TestParticipant::new("P2")],
        ConnectOptions::default(),
    )
    .await;

    engine.emit(EngineEvent::ActiveSpeakersDelta(vec![
        speaker("P1", 0.9, true),
        speaker("P2", 0.4, true),
    ]));
    expect_event(&mut events, "active_speakers_changed").await;
    assert_eq!(
        identities(&room.active_speakers()),
        vec![identity("P2"), identity("P1")]
    );

    engine.emit(EngineEvent::ActiveSpeakersDelta(vec![
        speaker("P2", 0.0, false),
        speaker("me", 0.5, true),
    ]));
    expect_event(&mut events, "active_speakers_changed").await;
    assert_eq!(
        identities(&room.active_speakers()),
        vec![identity("me"), identity("P1")]
    );
}

#[tokio::test]
async fn test_departed_speaker_leaves_active_set() {
    let Harness {
        room,
        engine,
        mut events,
        ..
    } = connected(vec![TestParticipant::new("P1")], ConnectOptions::default()).await;

    engine.emit(EngineEvent::ActiveSpeakersDelta(vec![speaker("P1", 0.7, true)]));
    expect_event(&mut events, "active_speakers_changed").await;

    engine.emit(EngineEvent::ParticipantUpdates(vec![TestParticipant::new("P1")
        .disconnected()
        .build()]));
    expect_event(&mut events, "participant_disconnected").await;
    assert!(room.active_speakers().is_empty());
}

// ============================================================================
// Quality, stream state and permissions
// ============================================================================

#[tokio::test]
async fn test_connection_quality_for_known_participants_only() {
    let Harness {
        room,
        engine,
        mut events,
        ..
    } = connected(vec![TestParticipant::new("P1")], ConnectOptions::default()).await;

    engine.emit(EngineEvent::ConnectionQuality(vec![
        ConnectionQualityInfo {
            participant_sid: sid("ghost"),
            quality: ConnectionQuality::Good,
        },
        ConnectionQualityInfo {
            participant_sid: sid("P1"),
            quality: ConnectionQuality::Poor,
        },
    ]));

    let event = next_event(&mut events).await;
    assert!(matches!(
        event,
        RoomEvent::ConnectionQualityChanged { quality: ConnectionQuality::Poor, .. }
    ));
    assert_eq!(
        room.remote_participant(&identity("P1")).unwrap().connection_quality(),
        ConnectionQuality::Poor
    );
}

#[tokio::test]
async fn test_stream_state_and_permission_updates() {
    let Harness {
        engine, mut events, ..
    } = connected(
        vec![TestParticipant::new("P1").with_track(video_track("TR_2"))],
        ConnectOptions::default(),
    )
    .await;

    engine.emit(EngineEvent::TrackAdded {
        track: media_track("m-2", TrackKind::Video),
        stream_id: "PA_P1|TR_2".to_string(),
    });
    engine.emit(EngineEvent::StreamStateUpdate(vec![StreamStateInfo {
        participant_sid: sid("P1"),
        track_sid: TrackSid::new("TR_2"),
        state: StreamState::Paused,
    }]));
    engine.emit(EngineEvent::SubscriptionPermission(SubscriptionPermissionUpdate {
        participant_sid: sid("P1"),
        track_sid: TrackSid::new("TR_2"),
        allowed: false,
    }));

    let kinds = kinds_until(&mut events, "track_subscription_permission_changed").await;
    assert_eq!(
        kinds,
        vec![
            "track_subscribed",
            "track_stream_state_changed",
            "track_unsubscribed",
            "track_subscription_permission_changed"
        ]
    );
}

#[tokio::test]
async fn test_set_track_subscribed_records_intent() {
    let Harness {
        room,
        engine,
        mut events,
        ..
    } = connected(
        vec![TestParticipant::new("P1").with_track(video_track("TR_2"))],
        ConnectOptions::default(),
    )
    .await;
    engine.emit(EngineEvent::TrackAdded {
        track: media_track("m-2", TrackKind::Video),
        stream_id: "PA_P1|TR_2".to_string(),
    });
    expect_event(&mut events, "track_subscribed").await;

    room.set_track_subscribed(&sid("P1"), &TrackSid::new("TR_2"), false)
        .await
        .unwrap();
    expect_event(&mut events, "track_unsubscribed").await;

    let subscriptions = engine.calls().subscriptions;
    assert_eq!(subscriptions.len(), 1);
    assert!(!subscriptions.first().unwrap().subscribe);

    assert!(matches!(
        room.set_track_subscribed(&sid("ghost"), &TrackSid::new("TR_2"), true).await,
        Err(RoomError::ParticipantNotFound(_))
    ));
    assert!(matches!(
        room.set_track_subscribed(&sid("P1"), &TrackSid::new("TR_404"), true).await,
        Err(RoomError::TrackNotFound(_))
    ));
}

// ============================================================================
// Room metadata and server mute
// ============================================================================

#[tokio::test]
async fn test_room_metadata_and_recording_changes() {
    let Harness {
        room,
        engine,
        mut events,
        ..
    } = connected(Vec::new(), ConnectOptions::default()).await;

    engine.emit(EngineEvent::RoomMetadataUpdate {
        sid: None,
        metadata: "agenda".to_string(),
        active_recording: true,
    });

    let event = next_event(&mut events).await;
    assert!(matches!(
        event,
        RoomEvent::RoomMetadataChanged { ref previous, ref metadata }
            if previous.is_empty() && metadata == "agenda"
    ));
    let event = next_event(&mut events).await;
    assert!(matches!(event, RoomEvent::RecordingStatusChanged { is_recording: true }));
    assert_eq!(room.metadata(), "agenda");
    assert!(room.is_recording());
}

#[tokio::test]
async fn test_server_mute_of_local_track() {
    let Harness {
        room,
        engine,
        mut events,
        ..
    } = connected(
        Vec::new(),
        ConnectOptions {
            publish_audio: true,
            ..ConnectOptions::default()
        },
    )
    .await;
    expect_event(&mut events, "local_track_published").await;

    let track_sid = room
        .local_participant()
        .track_publications()
        .first()
        .unwrap()
        .sid
        .clone();
    engine.emit(EngineEvent::RemoteMuteChanged {
        track_sid: track_sid.clone(),
        muted: true,
    });

    let event = expect_event(&mut events, "track_muted").await;
    assert!(
        matches!(event, RoomEvent::TrackMuted { ref participant, .. } if participant.is_local())
    );
    assert!(
        room.local_participant()
            .track_publication(&track_sid)
            .unwrap()
            .muted
    );
}
