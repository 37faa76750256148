//! Mock platform collaborators.
//!
//! - `MockNetworkMonitor` - records registrations and lets tests inject
//!   reachability changes
//! - `RecordingAudioHandler` - counts start/stop calls
//! - `RecordingKeyProvider` - records the encryption toggle and SIF trailer

use room_session::e2ee::KeyProvider;
use room_session::errors::NetworkError;
use room_session::platform::{AudioHandler, NetworkEvent, NetworkEventSink, NetworkMonitor};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Reachability monitor driven by the test.
#[derive(Debug, Default)]
pub struct MockNetworkMonitor {
    sink: Mutex<Option<NetworkEventSink>>,
    registrations: AtomicUsize,
    unregistrations: AtomicUsize,
    fail_registration: AtomicBool,
}

impl MockNetworkMonitor {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make later registrations fail.
    pub fn fail_registrations(&self) {
        self.fail_registration.store(true, Ordering::SeqCst);
    }

    /// Deliver a reachability change. Returns `false` when nothing is
    /// registered or the session stopped listening.
    pub fn notify(&self, event: NetworkEvent) -> bool {
        match self.sink.lock().unwrap().as_ref() {
            Some(sink) => sink.notify(event),
            None => false,
        }
    }

    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.sink.lock().unwrap().is_some()
    }

    #[must_use]
    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn unregistrations(&self) -> usize {
        self.unregistrations.load(Ordering::SeqCst)
    }
}

impl NetworkMonitor for MockNetworkMonitor {
    fn register(&self, sink: NetworkEventSink) -> Result<(), NetworkError> {
        if self.fail_registration.load(Ordering::SeqCst) {
            return Err(NetworkError::Unavailable("mock refused".to_string()));
        }
        self.registrations.fetch_add(1, Ordering::SeqCst);
        *self.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    fn unregister(&self) -> Result<(), NetworkError> {
        if self.sink.lock().unwrap().take().is_none() {
            return Err(NetworkError::NotRegistered);
        }
        self.unregistrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Audio handler that counts lifecycle calls.
#[derive(Debug, Default)]
pub struct RecordingAudioHandler {
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl RecordingAudioHandler {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl AudioHandler for RecordingAudioHandler {
    fn start(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Key provider that records what the session told it.
#[derive(Debug, Default)]
pub struct RecordingKeyProvider {
    enabled: AtomicBool,
    toggles: AtomicUsize,
    trailer: Mutex<Option<Vec<u8>>>,
}

impl RecordingKeyProvider {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Number of enable/disable calls.
    #[must_use]
    pub fn toggles(&self) -> usize {
        self.toggles.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn sif_trailer(&self) -> Option<Vec<u8>> {
        self.trailer.lock().unwrap().clone()
    }
}

impl KeyProvider for RecordingKeyProvider {
    fn set_enabled(&self, enabled: bool) {
        self.toggles.fetch_add(1, Ordering::SeqCst);
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn set_sif_trailer(&self, trailer: &[u8]) {
        *self.trailer.lock().unwrap() = Some(trailer.to_vec());
    }
}
