// Data structures: transactions and the commands they carry.
//
// A transaction is an immutable record: inner data plus the SHA3-256 of
// its canonical JSON encoding (signature included). The inner data bytes
// are a command payload: one tag byte followed by the JSON body of the
// tagged command.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::crypto::hash::{hash_sha3_256, HASH_BYTES};
use crate::crypto::keys;

#[derive(Debug, thiserror::Error)]
pub enum TxError {
    #[error("timestamp is zero")]
    ZeroTimestamp,
    #[error("data is empty")]
    EmptyData,
    #[error("public key is empty")]
    EmptyPublicKey,
    #[error("empty command payload")]
    EmptyCommand,
    #[error("unknown command tag {0}")]
    UnknownCommand(u8),
    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxData {
    pub data: Vec<u8>,
    pub public_key: Vec<u8>,
    pub nonce: u64,
    pub signature: Vec<u8>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: [u8; HASH_BYTES],
    pub inner: TxData,
}

impl Transaction {
    /// Canonical digest: SHA3-256 over the JSON encoding of the inner
    /// data, signature included.
    pub fn compute_hash(inner: &TxData) -> Result<[u8; HASH_BYTES], serde_json::Error> {
        let enc = serde_json::to_vec(inner)?;
        Ok(hash_sha3_256(&enc))
    }

    /// Canonical encoding of the whole record (hash field included); this
    /// is what block bundles commit to.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Mempool key: base58 of the transaction hash.
    pub fn pool_key(&self) -> String {
        bs58::encode(self.hash).into_string()
    }

    pub fn contents_check(&self) -> Result<(), TxError> {
        if self.inner.timestamp == 0 {
            return Err(TxError::ZeroTimestamp);
        }
        if self.inner.data.is_empty() {
            return Err(TxError::EmptyData);
        }
        if self.inner.public_key.is_empty() {
            return Err(TxError::EmptyPublicKey);
        }
        Ok(())
    }

    /// Full well-formedness check: contents, digest, signature. Any
    /// validation failure yields `Ok(false)`; only codec trouble is an
    /// error.
    pub fn verify(&self) -> Result<bool, serde_json::Error> {
        if let Err(e) = self.contents_check() {
            warn!("transaction contents rejected: {e}");
            return Ok(false);
        }

        let hash = Self::compute_hash(&self.inner)?;
        if hash != self.hash {
            warn!("transaction hash is broken");
            return Ok(false);
        }

        Ok(keys::verify(
            &self.inner.public_key,
            &self.inner.data,
            &self.inner.signature,
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandKind {
    Airdrop = 1,
    Transfer = 2,
}

impl CommandKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Airdrop),
            2 => Some(Self::Transfer),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Airdrop => "airdrop command",
            Self::Transfer => "transfer command",
        }
    }
}

/// Credit drawn from the generator account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Airdrop {
    pub public_key: Vec<u8>,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub from: Vec<u8>,
    pub to: Vec<u8>,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Airdrop(Airdrop),
    Transfer(Transfer),
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Airdrop(_) => CommandKind::Airdrop,
            Command::Transfer(_) => CommandKind::Transfer,
        }
    }

    /// Tag byte followed by the JSON body.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let body = match self {
            Command::Airdrop(a) => serde_json::to_vec(a)?,
            Command::Transfer(t) => serde_json::to_vec(t)?,
        };
        let mut payload = Vec::with_capacity(body.len() + 1);
        payload.push(self.kind() as u8);
        payload.extend_from_slice(&body);
        Ok(payload)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, TxError> {
        let (tag, body) = payload.split_first().ok_or(TxError::EmptyCommand)?;
        match CommandKind::from_byte(*tag) {
            Some(CommandKind::Airdrop) => Ok(Command::Airdrop(serde_json::from_slice(body)?)),
            Some(CommandKind::Transfer) => Ok(Command::Transfer(serde_json::from_slice(body)?)),
            None => Err(TxError::UnknownCommand(*tag)),
        }
    }
}
