// Wire protocol — every message is one framed byte blob on a short-lived
// TCP connection: a single kind byte followed by the JSON body. EOF
// delimits the message; a connection carries exactly one.

use std::io;
use std::time::Duration;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use crate::primitives::block::Block;
use crate::primitives::transaction::Transaction;

/// Incoming connections are read to EOF under this bound so a stalled
/// peer cannot pin a handler task forever.
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("empty message")]
    Empty,
    #[error("unknown message kind {0}")]
    UnknownKind(u8),
    #[error("codec: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeKind {
    Executer = 1,
    Miner = 2,
    Wallet = 3,
}

impl NodeKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Executer),
            2 => Some(Self::Miner),
            3 => Some(Self::Wallet),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Executer => "executer node",
            Self::Miner => "miner node",
            Self::Wallet => "wallet node",
        }
    }
}

impl Serialize for NodeKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for NodeKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let b = u8::deserialize(deserializer)?;
        NodeKind::from_byte(b)
            .ok_or_else(|| D::Error::custom(format!("unknown node kind {b}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeId {
    pub ip: String,
    pub kind: NodeKind,
}

impl NodeId {
    pub fn new(port: &str, kind: NodeKind) -> Self {
        NodeId {
            ip: format!("localhost:{port}"),
            kind,
        }
    }

    pub fn is_same_ip(&self, other: &NodeId) -> bool {
        self.ip == other.ip
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressMsg {
    pub from: NodeId,
    pub node_list: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferBlockMsg {
    pub from: NodeId,
    pub block: Block,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterBlockMsg {
    pub from: NodeId,
    pub block: Block,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptedBlockMsg {
    pub from: NodeId,
    pub block: Block,
    pub difficulty: u8,
}

/// Pure notification; carries no value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardMsg {
    pub from: NodeId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncBlockRequestMsg {
    pub from: NodeId,
    pub height: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncBlockResponseMsg {
    pub from: NodeId,
    pub is_latest: bool,
    pub block: Block,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockchainInfoMsg {
    pub from: NodeId,
    pub height: u64,
    pub difficulty: u8,
    pub previous_block_hash: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountMsg {
    pub from: NodeId,
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfoMsg {
    pub from: NodeId,
    pub public_key: Vec<u8>,
    pub balance: u64,
    pub nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxMsg {
    pub from: NodeId,
    pub transaction: Transaction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxPoolMsg {
    pub from: NodeId,
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinMsg {
    pub from: String,
    pub version: u8,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Address(AddressMsg),
    OfferBlock(OfferBlockMsg),
    RegisterBlock(RegisterBlockMsg),
    AcceptedBlock(AcceptedBlockMsg),
    Reward(RewardMsg),
    SyncBlockRequest(SyncBlockRequestMsg),
    SyncBlockResponse(SyncBlockResponseMsg),
    BlockchainInfo(BlockchainInfoMsg),
    Account(AccountMsg),
    AccountInfo(AccountInfoMsg),
    /// Reserved kind; accepted and ignored.
    Inv,
    Tx(TxMsg),
    TxPool(TxPoolMsg),
    Join(JoinMsg),
}

impl Message {
    pub fn kind(&self) -> u8 {
        match self {
            Message::Address(_) => 1,
            Message::OfferBlock(_) => 2,
            Message::RegisterBlock(_) => 3,
            Message::AcceptedBlock(_) => 4,
            Message::Reward(_) => 5,
            Message::SyncBlockRequest(_) => 6,
            Message::SyncBlockResponse(_) => 7,
            Message::BlockchainInfo(_) => 8,
            Message::Account(_) => 9,
            Message::AccountInfo(_) => 10,
            Message::Inv => 11,
            Message::Tx(_) => 12,
            Message::TxPool(_) => 13,
            Message::Join(_) => 14,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Message::Address(_) => "address message",
            Message::OfferBlock(_) => "offer block message",
            Message::RegisterBlock(_) => "register block message",
            Message::AcceptedBlock(_) => "accepted block message",
            Message::Reward(_) => "reward message",
            Message::SyncBlockRequest(_) => "sync block request",
            Message::SyncBlockResponse(_) => "sync block response",
            Message::BlockchainInfo(_) => "blockchain info message",
            Message::Account(_) => "account message",
            Message::AccountInfo(_) => "account info message",
            Message::Inv => "inv message",
            Message::Tx(_) => "tx message",
            Message::TxPool(_) => "tx pool message",
            Message::Join(_) => "join message",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let body = match self {
            Message::Address(m) => serde_json::to_vec(m)?,
            Message::OfferBlock(m) => serde_json::to_vec(m)?,
            Message::RegisterBlock(m) => serde_json::to_vec(m)?,
            Message::AcceptedBlock(m) => serde_json::to_vec(m)?,
            Message::Reward(m) => serde_json::to_vec(m)?,
            Message::SyncBlockRequest(m) => serde_json::to_vec(m)?,
            Message::SyncBlockResponse(m) => serde_json::to_vec(m)?,
            Message::BlockchainInfo(m) => serde_json::to_vec(m)?,
            Message::Account(m) => serde_json::to_vec(m)?,
            Message::AccountInfo(m) => serde_json::to_vec(m)?,
            Message::Inv => vec![],
            Message::Tx(m) => serde_json::to_vec(m)?,
            Message::TxPool(m) => serde_json::to_vec(m)?,
            Message::Join(m) => serde_json::to_vec(m)?,
        };
        let mut payload = Vec::with_capacity(body.len() + 1);
        payload.push(self.kind());
        payload.extend_from_slice(&body);
        Ok(payload)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, CodecError> {
        let (kind, body) = raw.split_first().ok_or(CodecError::Empty)?;
        Ok(match kind {
            1 => Message::Address(serde_json::from_slice(body)?),
            2 => Message::OfferBlock(serde_json::from_slice(body)?),
            3 => Message::RegisterBlock(serde_json::from_slice(body)?),
            4 => Message::AcceptedBlock(serde_json::from_slice(body)?),
            5 => Message::Reward(serde_json::from_slice(body)?),
            6 => Message::SyncBlockRequest(serde_json::from_slice(body)?),
            7 => Message::SyncBlockResponse(serde_json::from_slice(body)?),
            8 => Message::BlockchainInfo(serde_json::from_slice(body)?),
            9 => Message::Account(serde_json::from_slice(body)?),
            10 => Message::AccountInfo(serde_json::from_slice(body)?),
            11 => Message::Inv,
            12 => Message::Tx(serde_json::from_slice(body)?),
            13 => Message::TxPool(serde_json::from_slice(body)?),
            14 => Message::Join(serde_json::from_slice(body)?),
            other => return Err(CodecError::UnknownKind(*other)),
        })
    }
}

/// Read one EOF-delimited message blob off an accepted connection.
pub async fn read_frame(stream: &mut TcpStream) -> io::Result<Vec<u8>> {
    let mut raw = Vec::new();
    tokio::time::timeout(READ_TIMEOUT, stream.read_to_end(&mut raw))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "peer read timed out"))??;
    Ok(raw)
}
