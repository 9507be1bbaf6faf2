//! # Encryption Capability
//!
//! Frame encryption is a pluggable capability: every connection starts on
//! the pass-through [`PlainCipher`] and hot-swaps to the negotiated cipher
//! right after the key exchange.
//!
//! ## Components
//! - **FrameCipher**: encrypt/decrypt for one wire frame
//! - **DhKeypair**: finite-field Diffie-Hellman keys + HKDF expansion
//! - **AeadCipher**: AES-256-GCM with `nonce || tag || payload` units
//! - **KeyStore**: named keypairs, one per supported suite
//!
//! Suite names are opaque ASCII strings matched exactly during
//! negotiation; selection favors the rightmost mutually supported entry
//! in the offering side's list.

pub mod aead;
pub mod dh;

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::error::{ProtocolError, Result};

pub use aead::AeadCipher;
pub use dh::{DhKeypair, SharedSecret};

/// Suite names this build supports, in preference order.
pub const SUPPORTED_SUITES: &[&str] = &["dhaes"];

/// Symmetric frame encryption for the transport.
pub trait FrameCipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// Identity cipher used before encryption negotiation completes.
pub struct PlainCipher;

impl FrameCipher for PlainCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Ok(ciphertext.to_vec())
    }
}

/// The supported suite names as owned strings, for the handshake offer.
pub fn supported_suite_names() -> Vec<String> {
    SUPPORTED_SUITES.iter().map(|s| s.to_string()).collect()
}

/// Pick the rightmost entry of `offered` that `supported` also contains,
/// returning its index into `offered`.
pub fn select_suite(offered: &[String], supported: &[&str]) -> Option<usize> {
    offered
        .iter()
        .rposition(|name| supported.contains(&name.as_str()))
}

/// Build the concrete cipher for a negotiated suite from our keypair and
/// the peer's public material.
pub fn establish(
    suite: &str,
    keypair: &DhKeypair,
    peer_material: &[u8],
) -> Result<Box<dyn FrameCipher>> {
    match suite {
        "dhaes" => {
            let secret = keypair.derive(peer_material)?;
            Ok(Box::new(AeadCipher::new(&secret)?))
        }
        other => Err(ProtocolError::UnsupportedSuite(other.to_string())),
    }
}

/// Short, stable identifier for a public key: the first 8 bytes of its
/// SHA-256 digest, read big-endian.
pub fn fingerprint(material: &[u8]) -> u64 {
    let digest = Sha256::digest(material);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

/// The 16-hex-character display form of a fingerprint.
pub fn fingerprint_hex(material: &[u8]) -> String {
    format!("{:016x}", fingerprint(material))
}

/// Named keypairs, one per cipher suite.
#[derive(Default)]
pub struct KeyStore {
    keys: HashMap<String, DhKeypair>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a persisted keypair for `suite`. Unknown suite names fail with
    /// `UnsupportedSuite`.
    pub fn load_key(&mut self, suite: &str, key_bytes: &[u8]) -> Result<()> {
        if !SUPPORTED_SUITES.contains(&suite) {
            return Err(ProtocolError::UnsupportedSuite(suite.to_string()));
        }
        self.keys.insert(suite.to_string(), DhKeypair::load(key_bytes)?);
        Ok(())
    }

    /// Generate a fresh keypair for `suite`.
    pub fn generate_key(&mut self, suite: &str) -> Result<()> {
        if !SUPPORTED_SUITES.contains(&suite) {
            return Err(ProtocolError::UnsupportedSuite(suite.to_string()));
        }
        self.keys.insert(suite.to_string(), DhKeypair::generate());
        Ok(())
    }

    /// The keypair loaded for `suite`, if any.
    pub fn get(&self, suite: &str) -> Option<&DhKeypair> {
        self.keys.get(suite)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn plain_cipher_is_identity() {
        let cipher = PlainCipher;
        let sealed = cipher.encrypt(b"data").unwrap();
        assert_eq!(sealed, b"data");
        assert_eq!(cipher.decrypt(&sealed).unwrap(), b"data");
    }

    #[test]
    fn rightmost_mutual_suite_wins() {
        let offered = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(select_suite(&offered, &["a", "c"]), Some(2));
        assert_eq!(select_suite(&offered, &["a"]), Some(0));
        assert_eq!(select_suite(&offered, &["x"]), None);
        assert_eq!(select_suite(&[], &["a"]), None);
    }

    #[test]
    fn fingerprint_is_stable_and_short() {
        let material = b"public key material";
        assert_eq!(fingerprint(material), fingerprint(material));
        assert_ne!(fingerprint(material), fingerprint(b"other material"));
        assert_eq!(fingerprint_hex(material).len(), 16);
    }

    #[test]
    fn keystore_rejects_unknown_suites() {
        let mut store = KeyStore::new();
        assert!(matches!(
            store.generate_key("rot13"),
            Err(ProtocolError::UnsupportedSuite(_))
        ));
        store.generate_key("dhaes").unwrap();
        assert!(store.get("dhaes").is_some());
    }

    #[test]
    fn established_ciphers_interoperate() {
        let client = DhKeypair::generate();
        let server = DhKeypair::generate();

        let client_cipher =
            establish("dhaes", &client, &server.public_material()).unwrap();
        let server_cipher =
            establish("dhaes", &server, &client.public_material()).unwrap();

        let sealed = client_cipher.encrypt(b"hello").unwrap();
        assert_eq!(server_cipher.decrypt(&sealed).unwrap(), b"hello");
    }
}
