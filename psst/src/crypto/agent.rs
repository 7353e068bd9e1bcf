//! Asynchronous front end to the session's keypair.
//!
//! RSA work is CPU-bound, so every operation runs on tokio's blocking pool
//! and is awaited; the caller's task is never blocked. Results arrive in the
//! order they are awaited, which keeps outgoing ciphertext in issue order.

use std::sync::Arc;

use psst_proto::wire::PublicKeyBlob;

use super::CryptoError;
use super::keys::{Keypair, PeerKey};

/// Owner of one session's keypair.
#[derive(Debug, Clone)]
pub struct KeyAgent {
    keypair: Arc<Keypair>,
}

impl KeyAgent {
    /// Generate a fresh keypair off the async runtime.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyGenerationFailed`] if generation fails, or
    /// [`CryptoError::WorkerFailed`] if the blocking task is lost.
    pub async fn generate() -> Result<Self, CryptoError> {
        let keypair = run_blocking(Keypair::generate).await?;
        tracing::debug!(fingerprint = %keypair.fingerprint(), "keypair generated");
        Ok(Self::from_keypair(keypair))
    }

    /// Wrap an existing keypair.
    #[must_use]
    pub fn from_keypair(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    /// Export this agent's public key for the partner.
    #[must_use]
    pub fn export_public_key(&self) -> PublicKeyBlob {
        self.keypair.export_public()
    }

    /// Short fingerprint of this agent's public key.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        self.keypair.fingerprint()
    }

    /// Seal text for the partner.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::EncryptionFailed`] on failure.
    pub async fn encrypt(&self, peer: &PeerKey, plaintext: &str) -> Result<Vec<u8>, CryptoError> {
        let peer = peer.clone();
        let plaintext = plaintext.to_string();
        run_blocking(move || super::seal(&peer, &plaintext)).await
    }

    /// Open ciphertext sealed for this agent's keypair.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::DecryptionFailed`] if the ciphertext was not
    /// produced for this key.
    pub async fn decrypt(&self, ciphertext: Vec<u8>) -> Result<String, CryptoError> {
        let keypair = Arc::clone(&self.keypair);
        run_blocking(move || super::open(&keypair, &ciphertext)).await
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, CryptoError>
where
    F: FnOnce() -> Result<T, CryptoError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CryptoError::WorkerFailed(e.to_string()))?
}
