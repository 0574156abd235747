//! Produces Ed25519-signed envelopes around event payloads (spec §4.3).
//!
//! The private key is a development-only placeholder embedded in source;
//! spec §9 flags this explicitly, so production deployments must set
//! `CANARIA_SIGNING_KEY` (hex or base64 32-byte seed). The fallback path
//! logs a warning every time it is taken.

use base64::{engine::general_purpose::STANDARD, Engine};
use canaria_protocol::SignedEvent;
use ed25519_dalek::{Signer as _, SigningKey};
use serde::Serialize;

use crate::error::SignerError;

/// A fixed 32-byte development seed. Never used if `CANARIA_SIGNING_KEY`
/// is set in the environment.
const DEV_SEED: [u8; 32] = [
    0x43, 0x61, 0x6e, 0x61, 0x72, 0x69, 0x61, 0x2d, 0x64, 0x65, 0x76, 0x2d, 0x73, 0x65, 0x65, 0x64,
    0x2d, 0x70, 0x6c, 0x61, 0x63, 0x65, 0x68, 0x6f, 0x6c, 0x64, 0x65, 0x72, 0x2d, 0x30, 0x31, 0x00,
];

pub struct Signer {
    key: SigningKey,
}

impl Signer {
    /// Load the signing key from `CANARIA_SIGNING_KEY` (hex or base64
    /// 32-byte seed) when set, else fall back to the embedded dev seed.
    pub fn from_env() -> Result<Self, SignerError> {
        match std::env::var("CANARIA_SIGNING_KEY") {
            Ok(raw) => Self::from_seed_str(&raw),
            Err(_) => {
                tracing::warn!(
                    "CANARIA_SIGNING_KEY not set — using the embedded development signing key; \
                     do not run this in production"
                );
                Ok(Signer { key: SigningKey::from_bytes(&DEV_SEED) })
            }
        }
    }

    fn from_seed_str(raw: &str) -> Result<Self, SignerError> {
        let bytes = hex::decode(raw)
            .or_else(|_| STANDARD.decode(raw))
            .map_err(|_| SignerError::InvalidKey("not valid hex or base64".to_owned()))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| SignerError::InvalidKey("seed must be exactly 32 bytes".to_owned()))?;
        Ok(Signer { key: SigningKey::from_bytes(&seed) })
    }

    #[cfg(test)]
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Signer { key: SigningKey::from_bytes(&seed) }
    }

    /// Sign `value` — `payload` is the deterministic canonical JSON
    /// serialization, `signature` is base64(Ed25519(payload)), `timestamp`
    /// is milliseconds since epoch.
    pub fn sign<T: Serialize>(&self, value: &T) -> Result<SignedEvent, SignerError> {
        let payload = canaria_protocol::canonicalize(value)?;
        let signature = self.key.sign(payload.as_bytes());
        let timestamp = chrono::Utc::now().timestamp_millis().max(0) as u64;
        Ok(SignedEvent {
            payload,
            signature: STANDARD.encode(signature.to_bytes()),
            timestamp,
        })
    }

    pub fn verifying_key(&self) -> ed25519_dalek::VerifyingKey {
        self.key.verifying_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signature, Verifier};

    #[derive(Serialize)]
    struct Payload {
        a: u32,
        b: String,
    }

    #[test]
    fn sign_is_deterministic_for_identical_canonical_payload() {
        let signer = Signer::from_seed([7u8; 32]);
        let value = Payload { a: 1, b: "x".to_owned() };
        let s1 = signer.sign(&value).unwrap();
        let s2 = signer.sign(&value).unwrap();
        assert_eq!(s1.signature, s2.signature);
        assert_eq!(s1.payload, s2.payload);
    }

    #[test]
    fn one_bit_flip_in_payload_fails_verification() {
        let signer = Signer::from_seed([9u8; 32]);
        let value = Payload { a: 1, b: "x".to_owned() };
        let signed = signer.sign(&value).unwrap();

        let sig_bytes = STANDARD.decode(&signed.signature).unwrap();
        let signature = Signature::from_slice(&sig_bytes).unwrap();
        assert!(signer.verifying_key().verify(signed.payload.as_bytes(), &signature).is_ok());

        let mut flipped = signed.payload.into_bytes();
        flipped[0] ^= 0x01;
        assert!(signer.verifying_key().verify(&flipped, &signature).is_err());
    }
}
