//! Node key material and the hashes the trust authority signs.
//!
//! Keys are Ed25519. Secrets, public keys and signatures travel as standard
//! base64; hashes are SHA-256.

use base64::prelude::*;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::licensing::types::LicenseError;

pub type Hash256 = [u8; 32];

pub fn sha256(data: &[u8]) -> Hash256 {
    Sha256::digest(data).into()
}

/// Digest the authority signs when it issues a license.
///
/// Field order and encoding are fixed: strings are length-prefixed (u32 BE),
/// integers are big-endian.
pub fn node_identity_hash(
    txid: &str,
    voutid: i32,
    public_key: &str,
    period: i64,
    licversion: i32,
) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update((txid.len() as u32).to_be_bytes());
    hasher.update(txid.as_bytes());
    hasher.update(voutid.to_be_bytes());
    hasher.update((public_key.len() as u32).to_be_bytes());
    hasher.update(public_key.as_bytes());
    hasher.update(period.to_be_bytes());
    hasher.update(licversion.to_be_bytes());
    hasher.finalize().into()
}

/// The node's signing key, loaded from `Verify.Secret`.
pub struct NodeKey {
    signing: SigningKey,
}

impl NodeKey {
    pub fn from_secret(secret: &str) -> Result<Self, LicenseError> {
        if secret.trim().is_empty() {
            return Err(LicenseError::MissingField("Secret"));
        }
        let bytes = BASE64_STANDARD
            .decode(secret.trim())
            .map_err(|e| LicenseError::InvalidSecret(e.to_string()))?;
        let seed: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            LicenseError::InvalidSecret(format!("expected 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self::from_seed(seed))
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(&seed),
        }
    }

    /// Base64 seed, the form stored in config.
    pub fn secret(&self) -> String {
        BASE64_STANDARD.encode(self.signing.to_bytes())
    }

    pub fn public_key(&self) -> String {
        BASE64_STANDARD.encode(self.signing.verifying_key().to_bytes())
    }

    pub fn sign(&self, hash: &Hash256) -> String {
        BASE64_STANDARD.encode(self.signing.sign(hash).to_bytes())
    }
}

impl std::fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeKey")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

pub fn public_key_from_secret(secret: &str) -> Result<String, LicenseError> {
    NodeKey::from_secret(secret).map(|key| key.public_key())
}

/// Check a base64 signature over `hash`. Undecodable input is a failed check.
pub fn verify_signature(hash: &Hash256, signature: &str, public_key: &str) -> bool {
    let Ok(sig_bytes) = BASE64_STANDARD.decode(signature) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&sig_bytes) else {
        return false;
    };
    let Ok(key_bytes) = BASE64_STANDARD.decode(public_key) else {
        return false;
    };
    let Ok(key_bytes) = <[u8; 32]>::try_from(key_bytes.as_slice()) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    key.verify(hash, &signature).is_ok()
}
