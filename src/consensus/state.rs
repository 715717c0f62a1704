// Deterministic state transition: transaction execution against the
// account table, and the Merkle commitment over the table.
//
// Execution is destructive: account writes land in the store as soon as
// they happen, with no rollback. Callers decide whether a failure is
// benign (drop the transaction) or fatal (the state is suspect).

use tracing::info;

use crate::crypto::hash::HASH_BYTES;
use crate::crypto::merkle::merkle_root;
use crate::node::db::{AccountState, ChainDb, StoreError};
use crate::primitives::transaction::{Command, Transaction, TxError};

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("invalid transaction")]
    InvalidTransaction,
    #[error("command: {0}")]
    Command(#[from] TxError),
    #[error("transfer endpoints are the same account")]
    SameAccount,
    #[error("nonce is not expected")]
    NonceMismatch,
    #[error("balance underflow")]
    Underflow,
    #[error("balance overflow beyond the genesis supply")]
    Overflow,
    #[error("state hash does not match")]
    StateMismatch,
    #[error("storage: {0}")]
    Store(#[from] StoreError),
    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),
}

impl ExecutionError {
    /// Storage trouble poisons the process; everything else just
    /// disqualifies the one transaction being executed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExecutionError::Store(_) | ExecutionError::StateMismatch)
    }
}

/// Executes command transactions against the live account table. The
/// generator public key funds airdrops.
pub struct TxExecutor<'a> {
    db: &'a ChainDb,
    generator: &'a [u8],
}

impl<'a> TxExecutor<'a> {
    pub fn new(db: &'a ChainDb, generator: &'a [u8]) -> Self {
        TxExecutor { db, generator }
    }

    /// Re-verify, decode the command tag and dispatch.
    pub fn execute(&self, tx: &Transaction) -> Result<(), ExecutionError> {
        if !tx.verify()? {
            return Err(ExecutionError::InvalidTransaction);
        }

        match Command::decode(&tx.inner.data)? {
            Command::Airdrop(cmd) => {
                info!("airdropping {}...", cmd.amount);
                self.transfer_impl(
                    &cmd.public_key,
                    tx.inner.nonce,
                    self.generator,
                    &cmd.public_key,
                    cmd.amount,
                )
            }
            Command::Transfer(cmd) => {
                info!("transfering {}...", cmd.amount);
                self.transfer_impl(&cmd.from, tx.inner.nonce, &cmd.from, &cmd.to, cmd.amount)
            }
        }
    }

    /// Move `amount` from `from` to `to`. The author's endpoint carries
    /// the nonce check; writes are persisted per endpoint as they occur.
    fn transfer_impl(
        &self,
        caller: &[u8],
        nonce: u64,
        from: &[u8],
        to: &[u8],
        amount: u64,
    ) -> Result<(), ExecutionError> {
        if from == to {
            return Err(ExecutionError::SameAccount);
        }

        let mut from_state = self.db.get_account_state(from)?.unwrap_or_default();
        if caller == from && !from_state.check_nonce(nonce) {
            return Err(ExecutionError::NonceMismatch);
        }
        if !from_state.subtract(amount) {
            return Err(ExecutionError::Underflow);
        }
        self.db.put_account_state(from, &from_state)?;

        let mut to_state = self.db.get_account_state(to)?.unwrap_or_default();
        if caller == to && !to_state.check_nonce(nonce) {
            return Err(ExecutionError::NonceMismatch);
        }
        if !to_state.add(amount) {
            return Err(ExecutionError::Overflow);
        }
        self.db.put_account_state(to, &to_state)?;
        Ok(())
    }
}

/// Merkle commitment over the ordered account table: each entry hashes
/// as `key || value`, the sequence padded to the next power of two.
pub fn state_root(db: &ChainDb) -> Result<[u8; HASH_BYTES], ExecutionError> {
    let states = db.iter_states()?;
    let entries: Vec<Vec<u8>> = states
        .into_iter()
        .map(|(mut key, value)| {
            key.extend_from_slice(&value);
            key
        })
        .collect();
    Ok(merkle_root(&entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::genesis::{generator_public_key, GENESIS_BALANCE};
    use crate::crypto::hash::hash_sha3_256;
    use crate::primitives::transaction::{Airdrop, Transfer, TxData};
    use crate::wallet::keystore::Wallet;
    use std::path::Path;
    use tempfile::tempdir;

    fn open(dir: &Path) -> (ChainDb, Vec<u8>) {
        let db = ChainDb::open(dir, "3000").unwrap();
        let generator = generator_public_key(dir).unwrap();
        (db, generator)
    }

    fn signed_command_tx(wallet: &Wallet, cmd: &Command, nonce: u64) -> Transaction {
        let mut tx = Transaction {
            hash: [0u8; 32],
            inner: TxData {
                data: cmd.encode().unwrap(),
                public_key: wallet.public_key(),
                nonce,
                signature: vec![],
                timestamp: 1_700_000_000_000,
            },
        };
        wallet.sign(&mut tx).unwrap();
        tx
    }

    fn total_supply(db: &ChainDb) -> u64 {
        db.iter_states()
            .unwrap()
            .iter()
            .map(|(_, v)| {
                serde_json::from_slice::<AccountState>(v).unwrap().balance
            })
            .sum()
    }

    #[test]
    fn test_airdrop_moves_from_generator() {
        let dir = tempdir().unwrap();
        let (db, generator) = open(dir.path());
        let wallet = Wallet::new(dir.path(), "3002", "0").unwrap();

        let cmd = Command::Airdrop(Airdrop {
            public_key: wallet.public_key(),
            amount: 1,
        });
        let tx = signed_command_tx(&wallet, &cmd, 0);

        TxExecutor::new(&db, &generator).execute(&tx).unwrap();

        let recipient = db
            .get_account_state(&wallet.public_key())
            .unwrap()
            .unwrap();
        assert_eq!(recipient.balance, 1);
        assert_eq!(recipient.nonce, 1);
        let gen = db.get_account_state(&generator).unwrap().unwrap();
        assert_eq!(gen.balance, GENESIS_BALANCE - 1);
        assert_eq!(total_supply(&db), GENESIS_BALANCE);
    }

    #[test]
    fn test_airdrop_replay_rejected() {
        let dir = tempdir().unwrap();
        let (db, generator) = open(dir.path());
        let wallet = Wallet::new(dir.path(), "3002", "0").unwrap();

        let cmd = Command::Airdrop(Airdrop {
            public_key: wallet.public_key(),
            amount: 1,
        });
        let tx = signed_command_tx(&wallet, &cmd, 0);
        let executor = TxExecutor::new(&db, &generator);
        executor.execute(&tx).unwrap();

        let err = executor.execute(&tx).unwrap_err();
        assert!(matches!(err, ExecutionError::NonceMismatch));
        assert!(!err.is_fatal());

        // the recipient side stays at the post-first-execution values
        let recipient = db
            .get_account_state(&wallet.public_key())
            .unwrap()
            .unwrap();
        assert_eq!(recipient.balance, 1);
        assert_eq!(recipient.nonce, 1);
    }

    #[test]
    fn test_transfer_roundtrip_and_zero_amount() {
        let dir = tempdir().unwrap();
        let (db, generator) = open(dir.path());
        let alice = Wallet::new(dir.path(), "3002", "0").unwrap();
        let bob = Wallet::new(dir.path(), "3002", "1").unwrap();
        let executor = TxExecutor::new(&db, &generator);

        let fund = signed_command_tx(
            &alice,
            &Command::Airdrop(Airdrop {
                public_key: alice.public_key(),
                amount: 10,
            }),
            0,
        );
        executor.execute(&fund).unwrap();

        let pay = signed_command_tx(
            &alice,
            &Command::Transfer(Transfer {
                from: alice.public_key(),
                to: bob.public_key(),
                amount: 4,
            }),
            1,
        );
        executor.execute(&pay).unwrap();
        assert_eq!(
            db.get_account_state(&alice.public_key())
                .unwrap()
                .unwrap()
                .balance,
            6
        );
        assert_eq!(
            db.get_account_state(&bob.public_key())
                .unwrap()
                .unwrap()
                .balance,
            4
        );

        // zero-amount transfer succeeds and still burns a nonce
        let nop = signed_command_tx(
            &alice,
            &Command::Transfer(Transfer {
                from: alice.public_key(),
                to: bob.public_key(),
                amount: 0,
            }),
            2,
        );
        executor.execute(&nop).unwrap();
        let alice_state = db
            .get_account_state(&alice.public_key())
            .unwrap()
            .unwrap();
        assert_eq!(alice_state.balance, 6);
        assert_eq!(alice_state.nonce, 3);
    }

    #[test]
    fn test_self_transfer_rejected() {
        let dir = tempdir().unwrap();
        let (db, generator) = open(dir.path());
        let alice = Wallet::new(dir.path(), "3002", "0").unwrap();

        let tx = signed_command_tx(
            &alice,
            &Command::Transfer(Transfer {
                from: alice.public_key(),
                to: alice.public_key(),
                amount: 1,
            }),
            0,
        );
        let err = TxExecutor::new(&db, &generator).execute(&tx).unwrap_err();
        assert!(matches!(err, ExecutionError::SameAccount));
    }

    #[test]
    fn test_underflow_rejected() {
        let dir = tempdir().unwrap();
        let (db, generator) = open(dir.path());
        let alice = Wallet::new(dir.path(), "3002", "0").unwrap();
        let bob = Wallet::new(dir.path(), "3002", "1").unwrap();

        let tx = signed_command_tx(
            &alice,
            &Command::Transfer(Transfer {
                from: alice.public_key(),
                to: bob.public_key(),
                amount: 1,
            }),
            0,
        );
        let err = TxExecutor::new(&db, &generator).execute(&tx).unwrap_err();
        assert!(matches!(err, ExecutionError::Underflow));
    }

    #[test]
    fn test_tampered_transaction_rejected() {
        let dir = tempdir().unwrap();
        let (db, generator) = open(dir.path());
        let alice = Wallet::new(dir.path(), "3002", "0").unwrap();

        let mut tx = signed_command_tx(
            &alice,
            &Command::Airdrop(Airdrop {
                public_key: alice.public_key(),
                amount: 1,
            }),
            0,
        );
        tx.inner.nonce = 5;
        let err = TxExecutor::new(&db, &generator).execute(&tx).unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidTransaction));
    }

    #[test]
    fn test_state_root_single_entry_is_leaf_hash() {
        let dir = tempdir().unwrap();
        let (db, generator) = open(dir.path());

        // fresh store holds exactly the generator entry
        let states = db.iter_states().unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].0, generator);

        let mut leaf = states[0].0.clone();
        leaf.extend_from_slice(&states[0].1);
        assert_eq!(state_root(&db).unwrap(), hash_sha3_256(&leaf));
    }

    #[test]
    fn test_state_root_tracks_changes() {
        let dir = tempdir().unwrap();
        let (db, generator) = open(dir.path());
        let before = state_root(&db).unwrap();

        db.put_account_state(&[7u8; 32], &AccountState { nonce: 0, balance: 5 })
            .unwrap();
        let after = state_root(&db).unwrap();
        assert_ne!(before, after);
        let _ = generator;
    }
}
