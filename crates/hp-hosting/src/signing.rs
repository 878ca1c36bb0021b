//! Ed25519 request signing bound to a server identity

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hp_secrets::KeyStore;
use rand::RngCore;
use tracing::warn;
use zeroize::Zeroizing;

use crate::{HostingError, Result, ServerTarget};

pub const SIGNATURE_HEADER: &str = "x-signature";

const SEED_LEN: usize = 32;

/// A freshly generated server key pair
pub struct GeneratedKey {
    /// Raw 32-byte seed, the only form persisted in the key store
    pub secret: Zeroizing<Vec<u8>>,
    /// Base64 public key to record on the server entity
    pub public_key: String,
}

pub fn generate_signing_key() -> GeneratedKey {
    let mut seed = Zeroizing::new([0u8; SEED_LEN]);
    rand::thread_rng().fill_bytes(&mut seed[..]);

    let key = SigningKey::from_bytes(&seed);
    GeneratedKey {
        secret: Zeroizing::new(seed.to_vec()),
        public_key: STANDARD.encode(key.verifying_key().to_bytes()),
    }
}

/// Verify a base64 signature over `body` against a base64 public key
pub fn verify_signature(public_key: &str, body: &[u8], signature: &str) -> bool {
    let Some(key) = decode_public_key(public_key) else {
        return false;
    };
    let Ok(sig_bytes) = STANDARD.decode(signature) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(&sig_bytes) else {
        return false;
    };
    key.verify(body, &sig).is_ok()
}

fn decode_public_key(public_key: &str) -> Option<VerifyingKey> {
    let bytes = STANDARD.decode(public_key).ok()?;
    let bytes: [u8; 32] = bytes.as_slice().try_into().ok()?;
    VerifyingKey::from_bytes(&bytes).ok()
}

/// Signs request bodies with the key stored for the target server
#[derive(Clone)]
pub struct RequestSigner {
    keys: Arc<dyn KeyStore>,
}

impl RequestSigner {
    pub fn new(keys: Arc<dyn KeyStore>) -> Self {
        Self { keys }
    }

    pub async fn sign(&self, target: &ServerTarget, body: &[u8]) -> Result<String> {
        let key = self.load_key(target).await?;
        Ok(STANDARD.encode(key.sign(body).to_bytes()))
    }

    async fn load_key(&self, target: &ServerTarget) -> Result<SigningKey> {
        let bytes = self.keys.get(&target.server_id).await?;
        let seed = Zeroizing::new(<[u8; SEED_LEN]>::try_from(bytes.as_slice()).map_err(|_| {
            HostingError::Signing(format!("Key for server {} has wrong length", target.server_id))
        })?);
        let key = SigningKey::from_bytes(&seed);

        if STANDARD.encode(key.verifying_key().to_bytes()) != target.public_key {
            warn!(server_id = %target.server_id, "Signing key does not match recorded public key");
            return Err(HostingError::KeyMismatch(target.server_id.clone()));
        }

        Ok(key)
    }
}
