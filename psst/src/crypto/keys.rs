//! RSA keypairs and exported public keys.
//!
//! A [`Keypair`] is generated once per session and never leaves the process.
//! Only its public half is exported, as a JWK [`PublicKeyBlob`]. The partner
//! imports that blob into a [`PeerKey`], which can encrypt but not decrypt.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use psst_proto::wire::{JWK_ALG_RSA_OAEP_256, JWK_KTY_RSA, PublicKeyBlob};
use rand_core::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroizing;

use super::CryptoError;

/// RSA modulus size in bits.
pub const MODULUS_BITS: usize = 2048;

/// RSA modulus size in bytes; every ciphertext block has this length.
pub const CIPHERTEXT_BLOCK: usize = MODULUS_BITS / 8;

/// Largest plaintext one RSA-OAEP/SHA-256 call accepts (`k - 2*hLen - 2`).
pub const MAX_PLAINTEXT_BLOCK: usize = CIPHERTEXT_BLOCK - 2 * 32 - 2;

/// Public exponent 65537.
const PUBLIC_EXPONENT: u32 = 0x0001_0001;

fn oaep() -> Oaep {
    Oaep::new::<Sha256>()
}

/// Hex of the first 8 modulus bytes, for display.
fn fingerprint_of(key: &RsaPublicKey) -> String {
    use std::fmt::Write;
    key.n()
        .to_bytes_be()
        .iter()
        .take(8)
        .fold(String::new(), |mut out, b| {
            let _ = write!(out, "{b:02x}");
            out
        })
}

/// This session's RSA-OAEP keypair.
#[derive(Clone)]
pub struct Keypair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl Keypair {
    /// Generate a fresh 2048-bit keypair with exponent 65537.
    ///
    /// This is CPU-heavy; async callers go through
    /// [`KeyAgent::generate`](super::agent::KeyAgent::generate).
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyGenerationFailed`] if key generation fails.
    pub fn generate() -> Result<Self, CryptoError> {
        let exponent = BigUint::from(PUBLIC_EXPONENT);
        let private = RsaPrivateKey::new_with_exp(&mut OsRng, MODULUS_BITS, &exponent)
            .map_err(|e| CryptoError::KeyGenerationFailed(e.to_string()))?;
        let public = private.to_public_key();
        Ok(Self { private, public })
    }

    /// Export the public half as a JWK blob.
    #[must_use]
    pub fn export_public(&self) -> PublicKeyBlob {
        export(&self.public)
    }

    /// The public half as an encryption key (what the partner will import).
    #[must_use]
    pub fn peer_key(&self) -> PeerKey {
        PeerKey(self.public.clone())
    }

    /// Short hex fingerprint of the public key.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        fingerprint_of(&self.public)
    }

    /// Decrypt one ciphertext block.
    pub(crate) fn decrypt_block(&self, block: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        self.private
            .decrypt(oaep(), block)
            .map(Zeroizing::new)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

/// The partner's imported public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerKey(RsaPublicKey);

impl PeerKey {
    /// Import a JWK blob received from the partner.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKey`] if the blob is not an
    /// RSA-OAEP-256 encryption key with a 2048-bit modulus.
    pub fn import(blob: &PublicKeyBlob) -> Result<Self, CryptoError> {
        if blob.kty != JWK_KTY_RSA {
            return Err(CryptoError::InvalidKey(format!(
                "unsupported key type {:?}",
                blob.kty
            )));
        }
        if blob.alg != JWK_ALG_RSA_OAEP_256 {
            return Err(CryptoError::InvalidKey(format!(
                "unsupported algorithm {:?}",
                blob.alg
            )));
        }
        if !blob.key_ops.is_empty() && !blob.key_ops.iter().any(|op| op == "encrypt") {
            return Err(CryptoError::InvalidKey(
                "key is not usable for encryption".to_string(),
            ));
        }

        let n = decode_param("n", &blob.n)?;
        let e = decode_param("e", &blob.e)?;
        let key = RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e))
            .map_err(|err| CryptoError::InvalidKey(err.to_string()))?;
        if key.size() != CIPHERTEXT_BLOCK {
            return Err(CryptoError::InvalidKey(format!(
                "modulus is {} bits, expected {MODULUS_BITS}",
                key.size() * 8
            )));
        }
        Ok(Self(key))
    }

    /// Export back to a JWK blob.
    #[must_use]
    pub fn export(&self) -> PublicKeyBlob {
        export(&self.0)
    }

    /// Short hex fingerprint of the key.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        fingerprint_of(&self.0)
    }

    /// Encrypt one block of at most [`MAX_PLAINTEXT_BLOCK`] bytes.
    ///
    /// OAEP padding is randomized: identical input gives different output.
    pub(crate) fn encrypt_block(&self, chunk: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.0
            .encrypt(&mut OsRng, oaep(), chunk)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
    }
}

fn export(key: &RsaPublicKey) -> PublicKeyBlob {
    PublicKeyBlob {
        kty: JWK_KTY_RSA.to_string(),
        alg: JWK_ALG_RSA_OAEP_256.to_string(),
        n: URL_SAFE_NO_PAD.encode(key.n().to_bytes_be()),
        e: URL_SAFE_NO_PAD.encode(key.e().to_bytes_be()),
        ext: true,
        key_ops: vec!["encrypt".to_string()],
    }
}

fn decode_param(name: &str, value: &str) -> Result<Vec<u8>, CryptoError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|e| CryptoError::InvalidKey(format!("bad base64url in {name}: {e}")))?;
    if bytes.is_empty() {
        return Err(CryptoError::InvalidKey(format!("empty key parameter {name}")));
    }
    Ok(bytes)
}
