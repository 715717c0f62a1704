pub mod epoch;
pub mod executer;
pub mod miner;
pub mod node;
pub mod wallet;

use crate::consensus::chain::ChainError;
use crate::consensus::state::ExecutionError;
use crate::crypto::keys::KeyError;
use crate::net::protocol::CodecError;
use crate::node::db::StoreError;
use crate::primitives::transaction::TxError;

/// Top-level node failure; anything that reaches a handler's caller as
/// this type terminates the process.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("task: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("wire codec: {0}")]
    Codec(#[from] CodecError),
    #[error("chain: {0}")]
    Chain(#[from] ChainError),
    #[error("storage: {0}")]
    Store(#[from] StoreError),
    #[error("execution: {0}")]
    Execution(#[from] ExecutionError),
    #[error("key: {0}")]
    Key(#[from] KeyError),
    #[error("transaction: {0}")]
    Tx(#[from] TxError),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}
