// Persistent store: one sled database per node id with two trees.
//
//   blocks: hash -> block JSON, be(height, 8) -> hash,
//           "height" -> be(current height, 8), "latest" -> current hash
//   state:  public key -> account state JSON
//
// First open bootstraps the chain: the genesis block is mined on the
// spot and the generator account is seeded with the full supply.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::consensus::genesis::{self, GenesisError, GENESIS_BALANCE};
use crate::primitives::block::Block;

const DATABASE_FILE: &str = "_database.db";
const BLOCKS_TREE: &str = "blocks";
const STATE_TREE: &str = "state";
const LATEST_TAG: &[u8] = b"latest";
const HEIGHT_TAG: &[u8] = b"height";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage: {0}")]
    Sled(#[from] sled::Error),
    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("genesis: {0}")]
    Genesis(#[from] GenesisError),
    #[error("corrupt record: {0}")]
    Corrupt(&'static str),
}

/// Per-account nonce and balance. Balances never exceed the genesis
/// supply, so the sum over all accounts is conserved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub nonce: u64,
    pub balance: u64,
}

impl AccountState {
    pub fn subtract(&mut self, amount: u64) -> bool {
        if amount > self.balance {
            return false;
        }
        self.balance -= amount;
        true
    }

    pub fn add(&mut self, amount: u64) -> bool {
        if amount > GENESIS_BALANCE - self.balance {
            return false;
        }
        self.balance += amount;
        true
    }

    /// Compare-then-increment; the nonce only advances on a match.
    pub fn check_nonce(&mut self, nonce: u64) -> bool {
        debug!("checking nonce, received: {nonce} expected: {}", self.nonce);
        let ok = self.nonce == nonce;
        if ok {
            self.nonce += 1;
        }
        ok
    }
}

#[derive(Clone)]
pub struct ChainDb {
    _db: sled::Db,
    blocks: sled::Tree,
    state: sled::Tree,
}

pub fn database_file(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{id}{DATABASE_FILE}"))
}

impl ChainDb {
    /// Open the store for `id`, bootstrapping genesis on first creation.
    /// The generator keypair file lives next to the database in `dir`.
    pub fn open(dir: &Path, id: &str) -> Result<Self, StoreError> {
        let path = database_file(dir, id);
        let existed = path.exists();

        let db = sled::open(&path)?;
        let blocks = db.open_tree(BLOCKS_TREE)?;
        let state = db.open_tree(STATE_TREE)?;
        let store = ChainDb {
            _db: db,
            blocks,
            state,
        };

        if existed {
            info!("found existing database for id: {id}");
        } else {
            store.bootstrap(dir)?;
            info!("database for id: {id} is created");
        }
        Ok(store)
    }

    fn bootstrap(&self, dir: &Path) -> Result<(), StoreError> {
        let genesis = genesis::generate_genesis(dir)?;
        let encoded = serde_json::to_vec(&genesis.block)?;

        let height = 0u64.to_be_bytes();
        let mut batch = sled::Batch::default();
        batch.insert(genesis.hash.clone(), encoded);
        batch.insert(&height[..], genesis.hash.clone());
        batch.insert(HEIGHT_TAG, &height[..]);
        batch.insert(LATEST_TAG, genesis.hash.clone());
        self.blocks.apply_batch(batch)?;

        let seed = AccountState {
            nonce: 0,
            balance: GENESIS_BALANCE,
        };
        self.state
            .insert(genesis.public_key, serde_json::to_vec(&seed)?)?;
        Ok(())
    }

    pub fn get_height(&self) -> Result<u64, StoreError> {
        let raw = self
            .blocks
            .get(HEIGHT_TAG)?
            .ok_or(StoreError::Corrupt("height sentinel missing"))?;
        let be: [u8; 8] = raw
            .as_ref()
            .try_into()
            .map_err(|_| StoreError::Corrupt("height sentinel malformed"))?;
        Ok(u64::from_be_bytes(be))
    }

    pub fn get_latest(&self) -> Result<Vec<u8>, StoreError> {
        let raw = self
            .blocks
            .get(LATEST_TAG)?
            .ok_or(StoreError::Corrupt("latest sentinel missing"))?;
        Ok(raw.to_vec())
    }

    pub fn get_block_by_hash(&self, hash: &[u8]) -> Result<Option<Block>, StoreError> {
        match self.blocks.get(hash)? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn get_block_by_height(&self, height: u64) -> Result<Option<Block>, StoreError> {
        match self.blocks.get(height.to_be_bytes())? {
            Some(hash) => self.get_block_by_hash(&hash),
            None => Ok(None),
        }
    }

    /// Atomically writes the block record, the height index and both
    /// sentinels.
    pub fn put_block(&self, block: &Block) -> Result<(), StoreError> {
        let encoded = serde_json::to_vec(block)?;
        let height = block.info.height.to_be_bytes();

        let mut batch = sled::Batch::default();
        batch.insert(block.hash.clone(), encoded);
        batch.insert(&height[..], block.hash.clone());
        batch.insert(HEIGHT_TAG, &height[..]);
        batch.insert(LATEST_TAG, block.hash.clone());
        self.blocks.apply_batch(batch)?;
        Ok(())
    }

    pub fn get_account_state(&self, public_key: &[u8]) -> Result<Option<AccountState>, StoreError> {
        match self.state.get(public_key)? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn put_account_state(
        &self,
        public_key: &[u8],
        state: &AccountState,
    ) -> Result<(), StoreError> {
        self.state.insert(public_key, serde_json::to_vec(state)?)?;
        Ok(())
    }

    /// All `(public key, encoded state)` pairs in ascending key order.
    pub fn iter_states(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut out = Vec::new();
        for entry in self.state.iter() {
            let (k, v) = entry?;
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::genesis::generator_public_key;
    use tempfile::tempdir;

    #[test]
    fn test_bootstrap_layout() {
        let dir = tempdir().unwrap();
        let db = ChainDb::open(dir.path(), "3000").unwrap();

        assert_eq!(db.get_height().unwrap(), 0);
        let latest = db.get_latest().unwrap();
        let genesis = db.get_block_by_hash(&latest).unwrap().unwrap();
        assert_eq!(genesis.info.height, 0);
        assert_eq!(
            db.get_block_by_height(0).unwrap().unwrap().hash,
            genesis.hash
        );

        let generator = generator_public_key(dir.path()).unwrap();
        let state = db.get_account_state(&generator).unwrap().unwrap();
        assert_eq!(state.balance, GENESIS_BALANCE);
        assert_eq!(state.nonce, 0);
    }

    #[test]
    fn test_reopen_preserves_chain() {
        let dir = tempdir().unwrap();
        let latest = {
            let db = ChainDb::open(dir.path(), "3000").unwrap();
            db.get_latest().unwrap()
        };
        let db = ChainDb::open(dir.path(), "3000").unwrap();
        assert_eq!(db.get_latest().unwrap(), latest);
        assert_eq!(db.get_height().unwrap(), 0);
    }

    #[test]
    fn test_iter_states_is_key_ordered() {
        let dir = tempdir().unwrap();
        let db = ChainDb::open(dir.path(), "3000").unwrap();

        db.put_account_state(&[0xFF; 32], &AccountState::default())
            .unwrap();
        db.put_account_state(&[0x00; 32], &AccountState::default())
            .unwrap();

        let states = db.iter_states().unwrap();
        assert_eq!(states.len(), 3);
        let keys: Vec<&Vec<u8>> = states.iter().map(|(k, _)| k).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_account_arithmetic() {
        let mut acc = AccountState {
            nonce: 0,
            balance: 10,
        };
        assert!(acc.subtract(10));
        assert!(!acc.subtract(1));
        assert!(acc.add(GENESIS_BALANCE));
        assert!(!acc.add(1));
    }

    #[test]
    fn test_check_nonce_advances_on_match() {
        let mut acc = AccountState::default();
        assert!(!acc.check_nonce(3));
        assert_eq!(acc.nonce, 0);
        assert!(acc.check_nonce(0));
        assert_eq!(acc.nonce, 1);
    }
}
