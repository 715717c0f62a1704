// Worker (miner) node: stateless except for the expected next-block info
// and the proposer whose offer is being worked on. An offered block is
// mined to completion on a blocking thread and registered back to the
// offerer only, never broadcast.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::NetConfig;
use crate::consensus::pow::ProofOfWork;
use crate::net::protocol::{
    read_frame, AcceptedBlockMsg, BlockchainInfoMsg, Message, NodeId, NodeKind, OfferBlockMsg,
    RegisterBlockMsg,
};
use crate::nodes::node::Node;
use crate::nodes::NodeError;
use crate::primitives::block::{Block, BlockInfo};

pub struct MinerNode {
    node: Node,
    latest_info: Mutex<BlockInfo>,
    offerer: Mutex<Option<NodeId>>,
}

impl MinerNode {
    pub fn new(cfg: NetConfig) -> Arc<Self> {
        Arc::new(MinerNode {
            node: Node::new(cfg, NodeKind::Miner),
            latest_info: Mutex::new(BlockInfo::default()),
            offerer: Mutex::new(None),
        })
    }

    pub async fn run(self: Arc<Self>) -> Result<(), NodeError> {
        let listener = TcpListener::bind(self.node.cfg.listen_address()).await?;
        info!("miner node is listening at {}", self.node.id.ip);

        self.node.broadcast_join().await?;

        loop {
            let (mut stream, _) = listener.accept().await?;
            let node = self.clone();
            tokio::spawn(async move {
                let raw = match read_frame(&mut stream).await {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!("connection read failed: {e}");
                        return;
                    }
                };
                drop(stream);
                node.dispatch(&raw).await;
            });
        }
    }

    async fn dispatch(&self, raw: &[u8]) {
        let msg = match Message::decode(raw) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("dropping undecodable message: {e}");
                return;
            }
        };
        info!("received msg '{}'", msg.label());

        let result = match msg {
            Message::Address(m) => {
                self.node.handle_address(m);
                Ok(())
            }
            Message::BlockchainInfo(m) => {
                self.handle_blockchain_info(m).await;
                Ok(())
            }
            Message::OfferBlock(m) => self.handle_offer_block(m).await,
            Message::AcceptedBlock(m) => {
                self.handle_accepted_block(m).await;
                Ok(())
            }
            Message::Reward(_) => {
                info!("\n\n    this is the miner (^_^)    \n\n");
                Ok(())
            }
            _ => {
                info!("unexpected message, skipping...");
                Ok(())
            }
        };
        if let Err(e) = result {
            error!("fatal error while handling message: {e}");
            std::process::exit(1);
        }
    }

    async fn handle_offer_block(&self, msg: OfferBlockMsg) -> Result<(), NodeError> {
        if msg.from.kind != NodeKind::Executer {
            return Ok(());
        }

        {
            let mut offerer = self.offerer.lock().await;
            *offerer = Some(msg.from);
        }
        self.mine(msg.block).await
    }

    /// Run the nonce search off the async runtime, then register the
    /// completed block with the offerer.
    async fn mine(&self, mut block: Block) -> Result<(), NodeError> {
        let mined = tokio::task::spawn_blocking(
            move || -> Result<Block, serde_json::Error> {
                let (nonce, hash) = ProofOfWork::new(&block).run()?;
                block.nonce = nonce;
                block.hash = hash.to_vec();
                Ok(block)
            },
        )
        .await??;

        info!("broadcasting new block...");
        self.send_register_block(&mined).await
    }

    async fn handle_blockchain_info(&self, msg: BlockchainInfoMsg) {
        if msg.from.kind != NodeKind::Executer {
            return;
        }

        let mut latest = self.latest_info.lock().await;
        latest.height = msg.height + 1;
        latest.difficulty = msg.difficulty;
        latest.previous_block_hash = msg.previous_block_hash;
        info!(
            "received blockchain info\n next height: {}\n difficulty: {}\n latest: {}",
            latest.height,
            latest.difficulty,
            hex::encode(&latest.previous_block_hash)
        );
    }

    /// Difficulty comes from the message field, not the block header.
    async fn handle_accepted_block(&self, msg: AcceptedBlockMsg) {
        if msg.from.kind != NodeKind::Executer {
            return;
        }

        let mut latest = self.latest_info.lock().await;
        latest.height = msg.block.info.height + 1;
        latest.difficulty = msg.difficulty;
        latest.previous_block_hash = msg.block.info.previous_block_hash.clone();
        info!(
            "received accepted block\n next height: {}\n difficulty: {}\n latest: {}",
            latest.height,
            latest.difficulty,
            hex::encode(&latest.previous_block_hash)
        );
    }

    async fn send_register_block(&self, block: &Block) -> Result<(), NodeError> {
        let offerer = self.offerer.lock().await.clone();
        let Some(offerer) = offerer else {
            warn!("no known offerer for the mined block");
            return Ok(());
        };

        self.node
            .send(
                &offerer,
                &Message::RegisterBlock(RegisterBlockMsg {
                    from: self.node.id.clone(),
                    block: block.clone(),
                }),
            )
            .await
    }
}
