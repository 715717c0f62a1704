// A wallet is a persisted keypair plus the account info last reported by
// a proposer. The info is tracked optimistically on the sending side and
// corrected whenever an account_info message arrives.

use std::path::Path;

use crate::crypto::keys::{KeyError, KeyPair};
use crate::primitives::transaction::{Transaction, TxError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccountInfo {
    pub nonce: u64,
    pub balance: u64,
}

pub struct Wallet {
    pair: KeyPair,
    pub info: AccountInfo,
}

impl Wallet {
    /// Load or create the keypair stored under `(id, name)` in `dir`.
    pub fn new(dir: &Path, id: &str, name: &str) -> Result<Self, KeyError> {
        Ok(Wallet {
            pair: KeyPair::load_or_create(dir, id, name)?,
            info: AccountInfo::default(),
        })
    }

    pub fn public_key(&self) -> Vec<u8> {
        self.pair.public_key()
    }

    /// Sign the transaction's command bytes and seal its hash. The inner
    /// data must already pass the contents check.
    pub fn sign(&self, tx: &mut Transaction) -> Result<(), TxError> {
        tx.contents_check()?;
        tx.inner.signature = self.pair.sign(&tx.inner.data);
        tx.hash = Transaction::compute_hash(&tx.inner)?;
        Ok(())
    }

    /// Detached signature over arbitrary content (node-id proofs).
    pub fn quick_sign(&self, content: &[u8]) -> Vec<u8> {
        self.pair.sign(content)
    }
}
