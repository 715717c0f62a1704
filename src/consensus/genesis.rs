// Genesis: the deterministic first block mined on store creation.
//
// The generator keypair is loaded or created from disk by name; its
// single transaction carries 32 random bytes as payload, so every fresh
// store produces a distinct genesis while sharing the same structure.

use std::path::Path;

use crate::crypto::keys::KeyError;
use crate::primitives::block::{Block, BlockInfo, TxBundle};
use crate::primitives::transaction::{Transaction, TxData, TxError};
use crate::{consensus::pow, wallet::keystore::Wallet};

pub const GENESIS_DIFFICULTY: u8 = 10;
pub const GENERATOR_KEY: &str = "generator";
pub const GENESIS_BALANCE: u64 = 10_000_000_000_000_000_000;

#[derive(Debug, thiserror::Error)]
pub enum GenesisError {
    #[error("key: {0}")]
    Key(#[from] KeyError),
    #[error("transaction: {0}")]
    Tx(#[from] TxError),
    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("rng: {0}")]
    Rng(#[from] getrandom::Error),
}

pub struct Genesis {
    pub hash: Vec<u8>,
    pub block: Block,
    pub public_key: Vec<u8>,
}

fn generator_wallet(dir: &Path) -> Result<Wallet, KeyError> {
    Wallet::new(dir, GENERATOR_KEY, "")
}

pub fn generator_public_key(dir: &Path) -> Result<Vec<u8>, KeyError> {
    Ok(generator_wallet(dir)?.public_key())
}

fn mine_genesis_block(generator: &Wallet, info: BlockInfo) -> Result<Block, GenesisError> {
    let mut data = [0u8; 32];
    getrandom::getrandom(&mut data)?;

    let mut tx = Transaction {
        hash: [0u8; 32],
        inner: TxData {
            data: data.to_vec(),
            public_key: generator.public_key(),
            nonce: 0,
            signature: vec![],
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(1),
        },
    };
    generator.sign(&mut tx)?;

    Ok(pow::mine_block(TxBundle::new(vec![tx]), info)?)
}

pub fn generate_genesis(dir: &Path) -> Result<Genesis, GenesisError> {
    let generator = generator_wallet(dir)?;
    let block = mine_genesis_block(
        &generator,
        BlockInfo {
            height: 0,
            difficulty: GENESIS_DIFFICULTY,
            previous_block_hash: vec![],
        },
    )?;
    Ok(Genesis {
        hash: block.hash.clone(),
        public_key: generator.public_key(),
        block,
    })
}
