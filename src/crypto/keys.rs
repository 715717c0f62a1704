// ed25519 keypairs and their on-disk storage.
//
// A keypair lives in `<dir>/<id>_<name>keypair.key` as a JSON record of
// hex-encoded seed and public key. Nodes load an existing file or create
// a fresh pair on first use.

use std::fs;
use std::path::{Path, PathBuf};

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

pub const PUBLIC_KEY_BYTES: usize = 32;
pub const SIGNATURE_BYTES: usize = 64;

const KEYPAIR_FILE: &str = "{id}_{name}keypair.key";

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("malformed key material: {0}")]
    Malformed(&'static str),
}

#[derive(Serialize, Deserialize)]
struct StoredKeyPair {
    private: String,
    public: String,
}

pub struct KeyPair {
    signing: SigningKey,
}

pub fn keypair_file(dir: &Path, id: &str, name: &str) -> PathBuf {
    let file = KEYPAIR_FILE
        .replace("{id}", id)
        .replace("{name}", name);
    dir.join(file)
}

impl KeyPair {
    pub fn generate() -> Self {
        KeyPair {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Load the pair stored under `(id, name)` in `dir`, creating and
    /// persisting a new one when no file exists yet.
    pub fn load_or_create(dir: &Path, id: &str, name: &str) -> Result<Self, KeyError> {
        let file = keypair_file(dir, id, name);
        if file.exists() {
            let raw = fs::read(&file)?;
            let stored: StoredKeyPair = serde_json::from_slice(&raw)?;
            return Self::from_stored(&stored);
        }

        let pair = Self::generate();
        let stored = StoredKeyPair {
            private: hex::encode(pair.signing.to_bytes()),
            public: hex::encode(pair.public_key()),
        };
        fs::write(&file, serde_json::to_vec(&stored)?)?;
        Ok(pair)
    }

    fn from_stored(stored: &StoredKeyPair) -> Result<Self, KeyError> {
        let seed = hex::decode(&stored.private)
            .map_err(|_| KeyError::Malformed("private key is not hex"))?;
        let seed: [u8; 32] = seed
            .try_into()
            .map_err(|_| KeyError::Malformed("private key must be 32 bytes"))?;
        Ok(KeyPair {
            signing: SigningKey::from_bytes(&seed),
        })
    }

    pub fn public_key(&self) -> Vec<u8> {
        self.signing.verifying_key().to_bytes().to_vec()
    }

    pub fn sign(&self, content: &[u8]) -> Vec<u8> {
        self.signing.sign(content).to_bytes().to_vec()
    }
}

/// Detached signature check; any malformed input verifies as false.
pub fn verify(public_key: &[u8], content: &[u8], signature: &[u8]) -> bool {
    let pk: [u8; PUBLIC_KEY_BYTES] = match public_key.try_into() {
        Ok(pk) => pk,
        Err(_) => return false,
    };
    let vk = match VerifyingKey::from_bytes(&pk) {
        Ok(vk) => vk,
        Err(_) => return false,
    };
    let sig: [u8; SIGNATURE_BYTES] = match signature.try_into() {
        Ok(sig) => sig,
        Err(_) => return false,
    };
    vk.verify(content, &Signature::from_bytes(&sig)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sign_verify() {
        let pair = KeyPair::generate();
        let sig = pair.sign(b"payload");
        assert!(verify(&pair.public_key(), b"payload", &sig));
        assert!(!verify(&pair.public_key(), b"other", &sig));
    }

    #[test]
    fn test_verify_rejects_malformed() {
        let pair = KeyPair::generate();
        let sig = pair.sign(b"payload");
        assert!(!verify(&[0u8; 3], b"payload", &sig));
        assert!(!verify(&pair.public_key(), b"payload", &sig[..10]));
    }

    #[test]
    fn test_load_or_create_roundtrip() {
        let dir = tempdir().unwrap();
        let a = KeyPair::load_or_create(dir.path(), "3002", "0").unwrap();
        let b = KeyPair::load_or_create(dir.path(), "3002", "0").unwrap();
        assert_eq!(a.public_key(), b.public_key());

        let c = KeyPair::load_or_create(dir.path(), "3002", "1").unwrap();
        assert_ne!(a.public_key(), c.public_key());
    }

    #[test]
    fn test_keypair_file_name() {
        let f = keypair_file(Path::new("."), "3002", "7");
        assert!(f.ends_with("3002_7keypair.key"));
        let g = keypair_file(Path::new("."), "generator", "");
        assert!(g.ends_with("generator_keypair.key"));
    }
}
