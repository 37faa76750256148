//! Active-speaker aggregation.
//!
//! Two inputs: a periodic authoritative snapshot of everyone speaking, and
//! event-driven deltas for participants that started or stopped speaking.
//! Speaker entries whose sid does not resolve are skipped.

use crate::directory::ParticipantDirectory;
use crate::engine::SpeakerInfo;
use crate::observability::metrics;
use crate::participant::{LocalParticipant, Participant};
use crate::types::ParticipantSid;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Apply an authoritative snapshot.
///
/// Every reported participant is marked speaking with its level. Every other
/// known participant is reset to silent with level 0. Returns the resolved
/// speakers in the order received.
pub(crate) fn apply_snapshot(
    directory: &ParticipantDirectory,
    local: &Arc<LocalParticipant>,
    speakers: &[SpeakerInfo],
) -> Vec<Participant> {
    let mut seen: HashSet<ParticipantSid> = HashSet::with_capacity(speakers.len());
    let mut active = Vec::with_capacity(speakers.len());

    for speaker in speakers {
        let Some(participant) = directory.lookup_by_sid(local, &speaker.sid) else {
            skip_unresolved(&speaker.sid);
            continue;
        };
        participant.core().set_speaking(speaker.level, true);
        if seen.insert(speaker.sid.clone()) {
            active.push(participant);
        }
    }

    let everyone = std::iter::once(Participant::Local(Arc::clone(local))).chain(
        directory
            .snapshot()
            .participants()
            .map(|remote| Participant::Remote(Arc::clone(remote)))
            .collect::<Vec<_>>(),
    );
    for participant in everyone {
        let reported = participant.sid().is_some_and(|sid| seen.contains(&sid));
        if !reported {
            participant.core().set_speaking(0.0, false);
        }
    }

    active
}

/// Apply a delta on top of `current`.
///
/// Returns the new active set ordered by ascending audio level.
pub(crate) fn apply_delta(
    directory: &ParticipantDirectory,
    local: &Arc<LocalParticipant>,
    current: &[Participant],
    speakers: &[SpeakerInfo],
) -> Vec<Participant> {
    let mut active: HashMap<ParticipantSid, Participant> = current
        .iter()
        .filter_map(|participant| participant.sid().map(|sid| (sid, participant.clone())))
        .collect();

    for speaker in speakers {
        let Some(participant) = directory.lookup_by_sid(local, &speaker.sid) else {
            skip_unresolved(&speaker.sid);
            continue;
        };
        participant.core().set_speaking(speaker.level, speaker.active);
        if speaker.active {
            active.insert(speaker.sid.clone(), participant);
        } else {
            active.remove(&speaker.sid);
        }
    }

    let mut ordered: Vec<Participant> = active.into_values().collect();
    ordered.sort_by(|a, b| a.audio_level().total_cmp(&b.audio_level()));
    ordered
}

fn skip_unresolved(sid: &ParticipantSid) {
    debug!(
        target: "room.speakers",
        sid = %sid,
        "Skipping speaker update for unknown participant"
    );
    metrics::record_signal_dropped("speaker");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::engine::ParticipantInfo;
    use crate::participant::tests::{joined_local, RecordingListener};
    use crate::participant::ParticipantListener;
    use crate::types::{ParticipantIdentity, ParticipantState};

    struct Fixture {
        directory: ParticipantDirectory,
        local: Arc<LocalParticipant>,
    }

    fn fixture(remotes: &[&str]) -> Fixture {
        let listener: Arc<dyn ParticipantListener> = Arc::new(RecordingListener::default());
        let directory = ParticipantDirectory::new();
        for name in remotes {
            let info = ParticipantInfo {
                sid: ParticipantSid::new(format!("PA_{name}")),
                identity: ParticipantIdentity::new(*name),
                name: String::new(),
                metadata: String::new(),
                state: ParticipantState::Active,
                tracks: Vec::new(),
                permission: None,
            };
            directory.get_or_create(&info.identity, Some(&info), &listener);
        }
        let local = joined_local("me", "PA_me", listener);
        Fixture { directory, local }
    }

    fn speaker(name: &str, level: f32, active: bool) -> SpeakerInfo {
        SpeakerInfo {
            sid: ParticipantSid::new(format!("PA_{name}")),
            level,
            active,
        }
    }

    fn lookup(fixture: &Fixture, name: &str) -> Participant {
        fixture
            .directory
            .lookup_by_sid(&fixture.local, &ParticipantSid::new(format!("PA_{name}")))
            .unwrap()
    }

    #[test]
    fn test_snapshot_keeps_received_order_and_resolves_local() {
        let fixture = fixture(&["a", "b"]);
        let active = apply_snapshot(
            &fixture.directory,
            &fixture.local,
            &[
                speaker("b", 0.9, true),
                speaker("me", 0.2, true),
                speaker("ghost", 1.0, true),
            ],
        );

        let names: Vec<_> = active.iter().map(|p| p.identity().unwrap()).collect();
        assert_eq!(
            names,
            vec![ParticipantIdentity::new("b"), ParticipantIdentity::new("me")]
        );
        assert!(active.get(1).unwrap().is_local());
    }

    #[test]
    fn test_absent_participants_reset_after_consecutive_snapshots() {
        let fixture = fixture(&["a", "b"]);
        apply_snapshot(&fixture.directory, &fixture.local, &[speaker("a", 0.7, true)]);
        assert!(lookup(&fixture, "a").is_speaking());

        apply_snapshot(&fixture.directory, &fixture.local, &[speaker("b", 0.4, true)]);
        apply_snapshot(&fixture.directory, &fixture.local, &[speaker("b", 0.5, true)]);

        let a = lookup(&fixture, "a");
        assert!(!a.is_speaking());
        assert_eq!(a.audio_level(), 0.0);
        assert!(!fixture.local.is_speaking());
        assert!(lookup(&fixture, "b").is_speaking());
    }

    #[test]
    fn test_delta_result_is_sorted_ascending() {
        let fixture = fixture(&["a", "b", "c"]);
        let first = apply_delta(
            &fixture.directory,
            &fixture.local,
            &[],
            &[
                speaker("a", 0.8, true),
                speaker("b", 0.1, true),
                speaker("c", 0.5, true),
            ],
        );
        let levels: Vec<f32> = first.iter().map(Participant::audio_level).collect();
        assert!(levels.windows(2).all(|w| w.first() <= w.get(1)));
        assert_eq!(first.len(), 3);

        let second = apply_delta(
            &fixture.directory,
            &fixture.local,
            &first,
            &[
                speaker("c", 0.0, false),
                speaker("me", 0.3, true),
                speaker("ghost", 0.9, true),
            ],
        );
        let levels: Vec<f32> = second.iter().map(Participant::audio_level).collect();
        assert_eq!(levels, vec![0.1, 0.3, 0.8]);
        assert!(!lookup(&fixture, "c").is_speaking());
    }
}
