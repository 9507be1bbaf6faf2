//! AES-256-GCM frame encryption.
//!
//! One ciphertext unit on the wire is `nonce(12) || tag(16) || payload`.
//! Nonces are freshly random per message.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::crypto::dh::SharedSecret;
use crate::crypto::FrameCipher;
use crate::error::{ProtocolError, Result};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// AEAD cipher bound to one negotiated session key.
pub struct AeadCipher {
    cipher: Aes256Gcm,
}

impl AeadCipher {
    /// Build a cipher from a derived shared secret.
    pub fn new(secret: &SharedSecret) -> Result<Self> {
        let cipher = Aes256Gcm::new_from_slice(secret.as_bytes())
            .map_err(|_| ProtocolError::EncryptionFailure)?;
        Ok(Self { cipher })
    }
}

impl FrameCipher for AeadCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        // aes-gcm appends the tag; the wire wants nonce || tag || payload
        let mut sealed = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| ProtocolError::EncryptionFailure)?;
        let tag = sealed.split_off(sealed.len() - TAG_LEN);

        let mut out = Vec::with_capacity(NONCE_LEN + TAG_LEN + sealed.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&tag);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn decrypt(&self, message: &[u8]) -> Result<Vec<u8>> {
        if message.len() < NONCE_LEN + TAG_LEN {
            return Err(ProtocolError::DecryptionFailure);
        }
        let (nonce_bytes, rest) = message.split_at(NONCE_LEN);
        let (tag, payload) = rest.split_at(TAG_LEN);

        let mut sealed = Vec::with_capacity(payload.len() + TAG_LEN);
        sealed.extend_from_slice(payload);
        sealed.extend_from_slice(tag);

        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), sealed.as_slice())
            .map_err(|_| ProtocolError::DecryptionFailure)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::crypto::dh::DhKeypair;

    fn session_pair() -> (AeadCipher, AeadCipher) {
        let alice = DhKeypair::generate();
        let bob = DhKeypair::generate();
        let a = AeadCipher::new(&alice.derive(&bob.public_material()).unwrap()).unwrap();
        let b = AeadCipher::new(&bob.derive(&alice.public_material()).unwrap()).unwrap();
        (a, b)
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let (alice, bob) = session_pair();
        let sealed = alice.encrypt(b"secret message").unwrap();
        assert_eq!(bob.decrypt(&sealed).unwrap(), b"secret message");
    }

    #[test]
    fn wire_unit_layout() {
        let (alice, _) = session_pair();
        let sealed = alice.encrypt(b"xyz").unwrap();
        assert_eq!(sealed.len(), NONCE_LEN + TAG_LEN + 3);
    }

    #[test]
    fn fresh_nonce_per_message() {
        let (alice, _) = session_pair();
        let first = alice.encrypt(b"same").unwrap();
        let second = alice.encrypt(b"same").unwrap();
        assert_ne!(first[..NONCE_LEN], second[..NONCE_LEN]);
        assert_ne!(first, second);
    }

    #[test]
    fn tampering_detected() {
        let (alice, bob) = session_pair();
        let mut sealed = alice.encrypt(b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(
            bob.decrypt(&sealed),
            Err(ProtocolError::DecryptionFailure)
        ));
    }

    #[test]
    fn truncated_input_rejected() {
        let (alice, bob) = session_pair();
        let sealed = alice.encrypt(b"payload").unwrap();
        assert!(bob.decrypt(&sealed[..10]).is_err());
    }

    #[test]
    fn wrong_key_rejected() {
        let (alice, _) = session_pair();
        let (_, other) = session_pair();
        let sealed = alice.encrypt(b"payload").unwrap();
        assert!(other.decrypt(&sealed).is_err());
    }
}
