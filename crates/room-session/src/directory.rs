//! Participant directory.
//!
//! Remote participants keyed by identity, plus a secondary sid index. The
//! directory is copy-on-write: every mutation clones the current
//! [`Directory`], edits the clone and republishes it through a `watch`
//! channel. Readers hold an `Arc<Directory>` snapshot and never observe a
//! partially applied change.
//!
//! Only the session actor mutates the directory. Lookups may happen from any
//! task.

use crate::engine::ParticipantInfo;
use crate::observability::metrics;
use crate::participant::{LocalParticipant, Participant, ParticipantListener, RemoteParticipant};
use crate::types::{ParticipantIdentity, ParticipantSid};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Immutable snapshot of the remote participants.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    remote: HashMap<ParticipantIdentity, Arc<RemoteParticipant>>,
    sid_to_identity: HashMap<ParticipantSid, ParticipantIdentity>,
}

impl Directory {
    #[must_use]
    pub fn get(&self, identity: &ParticipantIdentity) -> Option<&Arc<RemoteParticipant>> {
        self.remote.get(identity)
    }

    #[must_use]
    pub fn get_by_sid(&self, sid: &ParticipantSid) -> Option<&Arc<RemoteParticipant>> {
        self.sid_to_identity
            .get(sid)
            .and_then(|identity| self.remote.get(identity))
    }

    #[must_use]
    pub fn identity_for_sid(&self, sid: &ParticipantSid) -> Option<&ParticipantIdentity> {
        self.sid_to_identity.get(sid)
    }

    #[must_use]
    pub fn contains(&self, identity: &ParticipantIdentity) -> bool {
        self.remote.contains_key(identity)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.remote.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remote.is_empty()
    }

    pub fn participants(&self) -> impl Iterator<Item = &Arc<RemoteParticipant>> {
        self.remote.values()
    }

    fn index_sid(&mut self, sid: ParticipantSid, identity: &ParticipantIdentity) {
        self.sid_to_identity.insert(sid, identity.clone());
    }

    fn remove(&mut self, identity: &ParticipantIdentity) -> Option<Arc<RemoteParticipant>> {
        let removed = self.remote.remove(identity)?;
        self.sid_to_identity.retain(|_, indexed| indexed != identity);
        Some(removed)
    }
}

/// Owner of the published directory snapshot.
#[derive(Debug)]
pub(crate) struct ParticipantDirectory {
    snapshot: watch::Sender<Arc<Directory>>,
    writer: Mutex<()>,
}

impl ParticipantDirectory {
    pub(crate) fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Directory::default()));
        Self {
            snapshot,
            writer: Mutex::new(()),
        }
    }

    /// Current snapshot.
    pub(crate) fn snapshot(&self) -> Arc<Directory> {
        Arc::clone(&self.snapshot.borrow())
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<Directory>> {
        self.snapshot.subscribe()
    }

    /// Apply `mutate` to a copy of the directory and republish it when it
    /// reports a change. Writers are serialized by `writer`.
    fn republish<R>(&self, mutate: impl FnOnce(&mut Directory) -> (bool, R)) -> R {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = Directory::clone(&self.snapshot.borrow());
        let (changed, value) = mutate(&mut next);
        if changed {
            metrics::set_remote_participants(next.len());
            self.snapshot.send_replace(Arc::new(next));
        }
        value
    }

    /// Return the participant for `identity`, creating and inserting it when
    /// missing. New participants are initialized from `info` before they
    /// become visible.
    ///
    /// The boolean is `true` when the participant was created by this call.
    pub(crate) fn get_or_create(
        &self,
        identity: &ParticipantIdentity,
        info: Option<&ParticipantInfo>,
        listener: &Arc<dyn ParticipantListener>,
    ) -> (Arc<RemoteParticipant>, bool) {
        if let Some(existing) = self.snapshot().get(identity) {
            return (Arc::clone(existing), false);
        }

        let participant = RemoteParticipant::new(
            identity.clone(),
            info.map(|info| info.sid.clone()),
            Arc::clone(listener),
        );
        if let Some(info) = info {
            participant.update_from_info(info);
        }

        let inserted = Arc::clone(&participant);
        self.republish(move |directory| {
            if let Some(existing) = directory.get(identity) {
                return (false, (Arc::clone(existing), false));
            }
            if let Some(sid) = inserted.sid() {
                directory.index_sid(sid, identity);
            }
            directory.remote.insert(identity.clone(), Arc::clone(&inserted));
            debug!(
                target: "room.directory",
                identity = %identity,
                "Remote participant added"
            );
            (true, (inserted, true))
        })
    }

    /// Make sure the sid index points at `identity`.
    pub(crate) fn index_sid(&self, sid: &ParticipantSid, identity: &ParticipantIdentity) {
        self.republish(|directory| {
            if !directory.contains(identity) {
                warn!(
                    target: "room.directory",
                    identity = %identity,
                    "Refusing to index sid for unknown participant"
                );
                return (false, ());
            }
            if directory.identity_for_sid(sid) == Some(identity) {
                return (false, ());
            }
            directory.index_sid(sid.clone(), identity);
            (true, ())
        });
    }

    /// Remove `identity` and its sid index entries.
    pub(crate) fn remove(&self, identity: &ParticipantIdentity) -> Option<Arc<RemoteParticipant>> {
        self.republish(|directory| {
            let removed = directory.remove(identity);
            (removed.is_some(), removed)
        })
    }

    /// Resolve a sid to a participant, checking the local participant first.
    pub(crate) fn lookup_by_sid(
        &self,
        local: &Arc<LocalParticipant>,
        sid: &ParticipantSid,
    ) -> Option<Participant> {
        if local.sid().as_ref() == Some(sid) {
            return Some(Participant::Local(Arc::clone(local)));
        }
        self.snapshot()
            .get_by_sid(sid)
            .map(|remote| Participant::Remote(Arc::clone(remote)))
    }

    /// Resolve an identity to a participant, checking the local participant
    /// first.
    pub(crate) fn lookup_by_identity(
        &self,
        local: &Arc<LocalParticipant>,
        identity: &ParticipantIdentity,
    ) -> Option<Participant> {
        if local.identity().as_ref() == Some(identity) {
            return Some(Participant::Local(Arc::clone(local)));
        }
        self.snapshot()
            .get(identity)
            .map(|remote| Participant::Remote(Arc::clone(remote)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::participant::tests::RecordingListener;
    use crate::types::ParticipantState;

    fn info(identity: &str, sid: &str) -> ParticipantInfo {
        ParticipantInfo {
            sid: ParticipantSid::new(sid),
            identity: ParticipantIdentity::new(identity),
            name: String::new(),
            metadata: String::new(),
            state: ParticipantState::Active,
            tracks: Vec::new(),
            permission: None,
        }
    }

    fn listener() -> Arc<dyn ParticipantListener> {
        Arc::new(RecordingListener::default())
    }

    #[test]
    fn test_get_or_create_is_upsert() {
        let directory = ParticipantDirectory::new();
        let listener = listener();
        let identity = ParticipantIdentity::new("P1");

        let p1 = info("P1", "PA_1");

        let (first, created) = directory.get_or_create(&identity, Some(&p1), &listener);
        assert!(created);
        let (second, created) = directory.get_or_create(&identity, Some(&p1), &listener);
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(directory.snapshot().len(), 1);
    }

    #[test]
    fn test_remove_clears_sid_index() {
        let directory = ParticipantDirectory::new();
        let listener = listener();
        let identity = ParticipantIdentity::new("P1");
        directory.get_or_create(&identity, Some(&info("P1", "PA_1")), &listener);

        assert!(directory
            .snapshot()
            .get_by_sid(&ParticipantSid::new("PA_1"))
            .is_some());
        assert!(directory.remove(&identity).is_some());
        assert!(directory.remove(&identity).is_none());

        let snapshot = directory.snapshot();
        assert!(snapshot.is_empty());
        assert!(snapshot
            .identity_for_sid(&ParticipantSid::new("PA_1"))
            .is_none());
    }

    #[test]
    fn test_old_snapshots_are_unaffected_by_mutation() {
        let directory = ParticipantDirectory::new();
        let listener = listener();
        let p1 = info("P1", "PA_1");
        directory.get_or_create(&p1.identity, Some(&p1), &listener);

        let before = directory.snapshot();
        let p2 = info("P2", "PA_2");
        directory.get_or_create(&p2.identity, Some(&p2), &listener);

        assert_eq!(before.len(), 1);
        assert_eq!(directory.snapshot().len(), 2);
    }

    #[test]
    fn test_index_sid_for_participant_created_without_info() {
        let directory = ParticipantDirectory::new();
        let listener = listener();
        let identity = ParticipantIdentity::new("P3");
        directory.get_or_create(&identity, None, &listener);
        assert!(directory
            .snapshot()
            .get_by_sid(&ParticipantSid::new("PA_3"))
            .is_none());

        directory.index_sid(&ParticipantSid::new("PA_3"), &identity);
        assert!(directory
            .snapshot()
            .get_by_sid(&ParticipantSid::new("PA_3"))
            .is_some());

        directory.index_sid(&ParticipantSid::new("PA_X"), &ParticipantIdentity::new("nobody"));
        assert!(directory
            .snapshot()
            .get_by_sid(&ParticipantSid::new("PA_X"))
            .is_none());
    }
}
