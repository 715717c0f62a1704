// Proposer (executer) node: owns the chain and the account store, admits
// transactions, proposes blocks, validates worker registrations and
// keeps in step with other proposers.
//
// One task per accepted connection; the chain mutex serializes every
// state-modifying handler, so within one proposer the chain advances
// monotonically. The pool mutex is independent and is never held while
// taking the chain mutex.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use crate::config::{NetConfig, EPOCH_RETRY_MS};
use crate::consensus::chain::Chain;
use crate::consensus::genesis;
use crate::consensus::pow;
use crate::consensus::state::{state_root, ExecutionError, TxExecutor};
use crate::crypto::hash::HASH_BYTES;
use crate::crypto::keys;
use crate::net::mempool::TxPool;
use crate::net::protocol::{
    read_frame, AcceptedBlockMsg, AccountInfoMsg, AccountMsg, AddressMsg, BlockchainInfoMsg,
    JoinMsg, Message, NodeId, NodeKind, OfferBlockMsg, RegisterBlockMsg, RewardMsg,
    SyncBlockRequestMsg, SyncBlockResponseMsg, TxMsg, TxPoolMsg,
};
use crate::node::db::AccountState;
use crate::nodes::epoch::{self, Epoch};
use crate::nodes::node::Node;
use crate::nodes::NodeError;
use crate::primitives::block::{Block, TxBundle};
use crate::primitives::transaction::Transaction;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// The bundle commitment and wall-clock of the most recent offer; a
/// registration must match it to be considered.
struct OfferState {
    time_ms: i64,
    bundle_root: Option<[u8; HASH_BYTES]>,
}

pub struct ExecuterNode {
    node: Node,
    chain: Mutex<Chain>,
    pool: TxPool,
    epoch: Epoch,
    syncing: AtomicBool,
    offer: Mutex<OfferState>,
    generator: Vec<u8>,
}

impl ExecuterNode {
    pub fn new(cfg: NetConfig) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<bool>), NodeError> {
        Self::new_at(Path::new("."), cfg)
    }

    /// Open (or bootstrap) the chain for this port under `dir`.
    pub fn new_at(
        dir: &Path,
        cfg: NetConfig,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<bool>), NodeError> {
        let chain = Chain::open(dir, &cfg.port)?;
        let generator = genesis::generator_public_key(dir)?;
        let (epoch, rx) = Epoch::channel();

        let node = Arc::new(ExecuterNode {
            node: Node::new(cfg, NodeKind::Executer),
            chain: Mutex::new(chain),
            pool: TxPool::new(),
            epoch,
            syncing: AtomicBool::new(false),
            offer: Mutex::new(OfferState {
                time_ms: now_ms(),
                bundle_root: None,
            }),
            generator,
        });
        Ok((node, rx))
    }

    pub async fn run(
        self: Arc<Self>,
        rx: mpsc::UnboundedReceiver<bool>,
    ) -> Result<(), NodeError> {
        let listener = TcpListener::bind(self.node.cfg.listen_address()).await?;
        info!("executer node is listening at {}", self.node.id.ip);

        self.node.broadcast_join().await?;

        let round_node = self.clone();
        epoch::spawn(rx, move || {
            let node = round_node.clone();
            async move {
                if let Err(e) = node.execution_round().await {
                    error!("execution round failed: {e}");
                    std::process::exit(1);
                }
            }
        });

        if self.node.is_rendezvous() {
            self.retry();
        }

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
            Message::Join(m) => self.handle_join(m).await,
            Message::Account(m) => self.handle_account(m).await,
            Message::RegisterBlock(m) => self.handle_register_block(m).await,
            Message::Tx(m) => self.handle_transaction(m).await,
            Message::TxPool(m) => {
                self.handle_tx_pool(m);
                Ok(())
            }
            Message::Address(m) => {
                self.node.handle_address(m);
                Ok(())
            }
            Message::BlockchainInfo(m) => self.handle_blockchain_info(m).await,
            Message::SyncBlockRequest(m) => self.handle_sync_block_request(m).await,
            Message::SyncBlockResponse(m) => self.handle_sync_block_response(m).await,
            Message::AcceptedBlock(m) => self.handle_accepted_block(m).await,
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

    async fn handle_join(&self, msg: JoinMsg) -> Result<(), NodeError> {
        if self.node.peers.contains_ip(&msg.from) {
            return Ok(());
        }

        let newcomer = NodeId {
            ip: msg.from,
            kind: msg.kind,
        };
        self.node.peers.append([newcomer.clone()]);
        info!(
            "found new peer at {} : {}",
            newcomer.ip,
            newcomer.kind.label()
        );

        self.send_known_peers(&newcomer).await?;
        if matches!(msg.kind, NodeKind::Executer | NodeKind::Miner) {
            self.send_blockchain_info(&newcomer).await?;
        }
        if msg.kind == NodeKind::Executer {
            self.send_tx_pool(&newcomer).await?;
        }
        Ok(())
    }

    /// Balance queries prove control of the sender id by signing its
    /// encoded node id.
    async fn handle_account(&self, msg: AccountMsg) -> Result<(), NodeError> {
        let content = serde_json::to_vec(&msg.from)?;
        if !keys::verify(&msg.public_key, &content, &msg.signature) {
            warn!("received signature in msg is invalid");
            return Ok(());
        }

        let state = {
            let chain = self.chain.lock().await;
            chain.get_account_state_safe(&msg.public_key)?
        };
        self.send_account_info(&msg.from, &state, msg.public_key)
            .await
    }

    /// A worker returns the offered block with its proof of work. Under
    /// the chain lock: the bundle must match the standing offer, the
    /// difficulty must be current, and the block must verify. Acceptance
    /// retargets the difficulty, rewards the worker, kicks the next
    /// epoch and fans the block out.
    async fn handle_register_block(&self, msg: RegisterBlockMsg) -> Result<(), NodeError> {
        if msg.from.kind != NodeKind::Miner {
            return Ok(());
        }

        let mut chain = self.chain.lock().await;

        let bundle_root = msg.block.bundle.hash_transactions()?;
        let offered_time = {
            let offer = self.offer.lock().await;
            match offer.bundle_root {
                Some(root) if root == bundle_root => offer.time_ms,
                _ => {
                    warn!("received block's transactions are not expected");
                    return Ok(());
                }
            }
        };

        if msg.block.info.difficulty != chain.info.difficulty {
            warn!(
                "received block's difficulty {} is invalid, expected: {}",
                msg.block.info.difficulty, chain.info.difficulty
            );
            return Ok(());
        }

        if !chain.verify_block(&msg.block)? {
            warn!("received block is invalid");
            return Ok(());
        }
        chain.put_block_with_check(&msg.block)?;

        chain.info.difficulty =
            pow::retarget(chain.info.difficulty, now_ms() - offered_time);

        // reward only the worker that registered first
        self.send_reward(&msg.from).await?;

        self.epoch.signal();

        self.broadcast_accepted_block(&msg.block, chain.info.difficulty)
            .await
    }

    /// Admission: verify, fan out to the other proposers when the
    /// transaction is new to us, then pool it (wallet submissions may
    /// overwrite).
    async fn handle_transaction(&self, msg: TxMsg) -> Result<(), NodeError> {
        if !matches!(msg.from.kind, NodeKind::Wallet | NodeKind::Executer) {
            return Ok(());
        }

        match msg.transaction.verify() {
            Ok(true) => {}
            Ok(false) => {
                warn!("received transaction is invalid");
                return Ok(());
            }
            Err(e) => {
                warn!("transaction verification failed: {e}");
                return Ok(());
            }
        }

        if !self.pool.contains(&msg.transaction.pool_key()) {
            let targets: Vec<NodeId> = self
                .node
                .peers
                .snapshot()
                .into_iter()
                .filter(|p| {
                    p.kind == NodeKind::Executer
                        && !self.node.is_self(p)
                        && p.ip != msg.from.ip
                })
                .collect();
            for target in targets {
                self.send_transaction(&target, &msg.transaction).await?;
            }
        }

        if msg.from.kind == NodeKind::Wallet {
            self.pool.append_or_overwrite(&msg.transaction);
        } else {
            self.pool.append(&msg.transaction);
        }

        info!(
            "received transaction, current pool size: {}",
            self.pool.len()
        );
        Ok(())
    }

    fn handle_tx_pool(&self, msg: TxPoolMsg) {
        for tx in &msg.transactions {
            self.pool.append(tx);
        }
    }

    /// A peer announcing a higher chain puts us into syncing and starts
    /// the block download from them.
    async fn handle_blockchain_info(&self, msg: BlockchainInfoMsg) -> Result<(), NodeError> {
        if msg.from.kind != NodeKind::Executer {
            return Ok(());
        }

        info!(
            "received blockchain info\n next height: {}\n difficulty: {}\n latest: {}",
            msg.height,
            msg.difficulty,
            hex::encode(&msg.previous_block_hash)
        );

        let own_height = self.chain.lock().await.info.height;
        if msg.height > own_height {
            self.syncing.store(true, Ordering::SeqCst);
            self.start_download(&msg.from, own_height).await?;
        }
        Ok(())
    }

    async fn start_download(&self, to: &NodeId, own_height: u64) -> Result<(), NodeError> {
        // genesis is wanted as-is; past that, the next block
        let mut height = own_height;
        if height != 0 {
            height += 1;
        }
        info!("start downloading blocks from {height}...");
        self.send_sync_block_request(to, height).await
    }

    /// Serve one historic block; requests above our tip are ignored.
    async fn handle_sync_block_request(
        &self,
        msg: SyncBlockRequestMsg,
    ) -> Result<(), NodeError> {
        if msg.from.kind != NodeKind::Executer {
            return Ok(());
        }

        let (block, is_latest) = {
            let chain = self.chain.lock().await;
            info!(
                "node's height: {}, requested height: {}",
                chain.info.height, msg.height
            );
            if msg.height > chain.info.height {
                // higher forks or just spam
                info!("requested higher blocks, skipping...");
                return Ok(());
            }

            match chain.db().get_block_by_height(msg.height)? {
                Some(block) => {
                    let is_latest = chain.info.height == block.info.height;
                    (block, is_latest)
                }
                None => {
                    warn!("block at height {} is missing", msg.height);
                    return Ok(());
                }
            }
        };

        self.node
            .send(
                &msg.from,
                &Message::SyncBlockResponse(SyncBlockResponseMsg {
                    from: self.node.id.clone(),
                    is_latest,
                    block,
                }),
            )
            .await
    }

    async fn handle_sync_block_response(
        &self,
        msg: SyncBlockResponseMsg,
    ) -> Result<(), NodeError> {
        if msg.from.kind != NodeKind::Executer {
            return Ok(());
        }

        let next = {
            let mut chain = self.chain.lock().await;
            info!(
                "node's height: {}, received height: {}",
                chain.info.height, msg.block.info.height
            );

            if msg.block.info.height == 0 {
                chain.overwrite_genesis(msg.block.clone())?;
            } else if chain.info.height + 1 != msg.block.info.height {
                info!("received unexpected block, skipping...");
                return Ok(());
            } else {
                self.sync_block_impl(&mut chain, &msg.block)?;
            }

            if msg.is_latest {
                self.syncing.store(false, Ordering::SeqCst);
                info!("syncing is done...");
                return Ok(());
            }
            chain.info.height + 1
        };

        self.send_sync_block_request(&msg.from, next).await
    }

    /// A block accepted by another proposer: execute, append, and purge
    /// its transactions from the pool.
    async fn handle_accepted_block(&self, msg: AcceptedBlockMsg) -> Result<(), NodeError> {
        if msg.from.kind != NodeKind::Executer {
            return Ok(());
        }
        if msg.from.ip == self.node.id.ip {
            return Ok(());
        }

        info!("received new accepted block");
        info!("including {} tx", msg.block.bundle.transactions.len());

        {
            let mut chain = self.chain.lock().await;
            self.sync_block_impl(&mut chain, &msg.block)?;
        }

        self.pool.batch_remove(&msg.block.bundle.tx_keys());
        Ok(())
    }

    /// Verify, execute the bundle against live state, append, and check
    /// the state root. Execution failure or a root mismatch is fatal: the
    /// state is suspect and there is no rollback.
    fn sync_block_impl(&self, chain: &mut Chain, block: &Block) -> Result<(), NodeError> {
        if !chain.verify_block(block)? {
            warn!("received block is invalid");
            return Ok(());
        }

        let executor = TxExecutor::new(chain.db(), &self.generator);
        for tx in &block.bundle.transactions {
            executor.execute(tx)?;
        }

        chain.put_block_with_check(block)?;

        let root = state_root(chain.db())?;
        if root[..] != block.state_hash[..] {
            return Err(ExecutionError::StateMismatch.into());
        }
        Ok(())
    }

    /// One proposal round: pick candidates, execute them speculatively
    /// against live state, and offer the block to the workers. The
    /// transactions leave the pool at offer time.
    async fn execution_round(&self) -> Result<(), NodeError> {
        if self.syncing.load(Ordering::SeqCst) {
            return Ok(());
        }

        let mut chain = self.chain.lock().await;
        info!("epoch {}: next: {}", chain.info.height, chain.info.height + 1);
        chain.check_health()?;

        if self.pool.is_empty() {
            info!("no transactions to execute");
            if self.node.is_rendezvous() {
                self.retry();
            }
            return Ok(());
        }

        let candidates = self.pool.get_transaction_for_block();
        let mut executed: Vec<Transaction> = Vec::with_capacity(candidates.len());
        {
            let executor = TxExecutor::new(chain.db(), &self.generator);
            for tx in candidates {
                match executor.execute(&tx) {
                    Ok(()) => executed.push(tx),
                    Err(e) if e.is_fatal() => return Err(e.into()),
                    Err(e) => {
                        warn!("dropping failed transaction {}: {e}", tx.pool_key());
                        self.pool.batch_remove(&[tx.pool_key()]);
                    }
                }
            }
        }
        if executed.is_empty() {
            if self.node.is_rendezvous() {
                self.retry();
            }
            return Ok(());
        }

        let mut block = Block::new(TxBundle::new(executed), chain.info.clone());
        // this is the next block
        block.info.height += 1;

        self.pool.batch_remove(&block.bundle.tx_keys());

        block.state_hash = state_root(chain.db())?.to_vec();

        info!(
            "block at height {} is created, broadcasting offer...",
            block.info.height
        );
        info!("including {} tx", block.bundle.transactions.len());
        self.broadcast_offer_block(&block).await
    }

    /// Re-arm the proposal timer; only the rendezvous idles this way.
    fn retry(&self) {
        let epoch = self.epoch.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(EPOCH_RETRY_MS)).await;
            epoch.signal();
        });
    }

    async fn broadcast_offer_block(&self, block: &Block) -> Result<(), NodeError> {
        self.node
            .broadcast(&Message::OfferBlock(OfferBlockMsg {
                from: self.node.id.clone(),
                block: block.clone(),
            }))
            .await?;

        let root = block.bundle.hash_transactions()?;
        let mut offer = self.offer.lock().await;
        offer.bundle_root = Some(root);
        offer.time_ms = now_ms();
        Ok(())
    }

    async fn broadcast_accepted_block(
        &self,
        block: &Block,
        difficulty: u8,
    ) -> Result<(), NodeError> {
        self.node
            .broadcast(&Message::AcceptedBlock(AcceptedBlockMsg {
                from: self.node.id.clone(),
                block: block.clone(),
                difficulty,
            }))
            .await
    }

    async fn send_known_peers(&self, to: &NodeId) -> Result<(), NodeError> {
        self.node
            .send(
                to,
                &Message::Address(AddressMsg {
                    from: self.node.id.clone(),
                    node_list: self.node.peers.snapshot(),
                }),
            )
            .await
    }

    async fn send_blockchain_info(&self, to: &NodeId) -> Result<(), NodeError> {
        let info = self.chain.lock().await.info.clone();
        self.node
            .send(
                to,
                &Message::BlockchainInfo(BlockchainInfoMsg {
                    from: self.node.id.clone(),
                    height: info.height,
                    difficulty: info.difficulty,
                    previous_block_hash: info.previous_block_hash,
                }),
            )
            .await
    }

    async fn send_tx_pool(&self, to: &NodeId) -> Result<(), NodeError> {
        self.node
            .send(
                to,
                &Message::TxPool(TxPoolMsg {
                    from: self.node.id.clone(),
                    transactions: self.pool.get_all(),
                }),
            )
            .await
    }

    async fn send_account_info(
        &self,
        to: &NodeId,
        state: &AccountState,
        public_key: Vec<u8>,
    ) -> Result<(), NodeError> {
        self.node
            .send(
                to,
                &Message::AccountInfo(AccountInfoMsg {
                    from: self.node.id.clone(),
                    public_key,
                    balance: state.balance,
                    nonce: state.nonce,
                }),
            )
            .await
    }

    async fn send_transaction(&self, to: &NodeId, tx: &Transaction) -> Result<(), NodeError> {
        self.node
            .send(
                to,
                &Message::Tx(TxMsg {
                    from: self.node.id.clone(),
                    transaction: tx.clone(),
                }),
            )
            .await
    }

    async fn send_sync_block_request(&self, to: &NodeId, height: u64) -> Result<(), NodeError> {
        self.node
            .send(
                to,
                &Message::SyncBlockRequest(SyncBlockRequestMsg {
                    from: self.node.id.clone(),
                    height,
                }),
            )
            .await
    }

    async fn send_reward(&self, to: &NodeId) -> Result<(), NodeError> {
        self.node
            .send(
                to,
                &Message::Reward(RewardMsg {
                    from: self.node.id.clone(),
                }),
            )
            .await
    }
}
