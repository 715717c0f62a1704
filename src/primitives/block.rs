// Data structures: blocks and transaction bundles.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::crypto::hash::HASH_BYTES;
use crate::crypto::merkle::merkle_root;
use crate::primitives::transaction::Transaction;

/// Header triple shared by the chain cache and the wire protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub height: u64,
    pub difficulty: u8,
    pub previous_block_hash: Vec<u8>,
}

/// Ordered transaction sequence; canonical order is ascending nonce.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxBundle {
    pub transactions: Vec<Transaction>,
}

impl TxBundle {
    pub fn new(transactions: Vec<Transaction>) -> Self {
        TxBundle { transactions }
    }

    /// Bundle commitment: Merkle root over the canonical encoding of each
    /// whole transaction record (hash field included).
    pub fn hash_transactions(&self) -> Result<[u8; HASH_BYTES], serde_json::Error> {
        let mut encoded = Vec::with_capacity(self.transactions.len());
        for tx in &self.transactions {
            encoded.push(tx.canonical_bytes()?);
        }
        Ok(merkle_root(&encoded))
    }

    pub fn sort_transactions(&mut self) {
        // Vec::sort_by_key is stable
        self.transactions.sort_by_key(|tx| tx.inner.nonce);
    }

    /// Pool keys of every transaction in the bundle.
    pub fn tx_keys(&self) -> Vec<String> {
        self.transactions.iter().map(|tx| tx.pool_key()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub info: BlockInfo,
    pub timestamp: i64,
    pub bundle: TxBundle,
    pub hash: Vec<u8>,
    pub nonce: u64,
    pub state_hash: Vec<u8>,
}

impl Block {
    /// A fresh block with no proof of work yet: nonce and hash are zero
    /// until a worker fills them in.
    pub fn new(bundle: TxBundle, info: BlockInfo) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Block {
            info,
            timestamp,
            bundle,
            hash: vec![],
            nonce: 0,
            state_hash: vec![],
        }
    }
}
