//! End-to-end-encryption lifecycle hooks.
//!
//! Key management lives in the external [`KeyProvider`]; the session only
//! switches it on before the join handshake (inbound media may need keys
//! immediately), forwards the server's frame trailer, and switches it off on
//! teardown.

use crate::types::EncryptionType;

use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// External key management.
pub trait KeyProvider: Send + Sync {
    /// Enable or disable frame encryption.
    fn set_enabled(&self, enabled: bool);

    /// Trailer the server appends to unencrypted server-injected frames.
    fn set_sif_trailer(&self, trailer: &[u8]);
}

/// End-to-end-encryption configuration for a connection.
#[derive(Clone)]
pub struct E2eeOptions {
    pub key_provider: Arc<dyn KeyProvider>,
    pub encryption_type: EncryptionType,
}

impl fmt::Debug for E2eeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("E2eeOptions")
            .field("key_provider", &"[KeyProvider]")
            .field("encryption_type", &self.encryption_type)
            .finish()
    }
}

/// Per-connection encryption state.
pub(crate) struct E2eeManager {
    key_provider: Arc<dyn KeyProvider>,
    encryption_type: EncryptionType,
}

impl E2eeManager {
    /// Enable the key provider for a new connection.
    pub(crate) fn setup(options: &E2eeOptions) -> Self {
        info!(
            target: "room.e2ee",
            encryption_type = ?options.encryption_type,
            "End-to-end encryption enabled"
        );
        options.key_provider.set_enabled(true);
        Self {
            key_provider: Arc::clone(&options.key_provider),
            encryption_type: options.encryption_type,
        }
    }

    pub(crate) fn encryption_type(&self) -> EncryptionType {
        self.encryption_type
    }

    pub(crate) fn set_sif_trailer(&self, trailer: &[u8]) {
        debug!(target: "room.e2ee", len = trailer.len(), "Applying SIF trailer");
        self.key_provider.set_sif_trailer(trailer);
    }

    pub(crate) fn cleanup(self) {
        debug!(
            target: "room.e2ee",
            encryption_type = ?self.encryption_type(),
            "End-to-end encryption disabled"
        );
        self.key_provider.set_enabled(false);
    }
}
