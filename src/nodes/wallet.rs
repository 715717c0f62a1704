// Wallet node: a fixed set of keypairs that periodically airdrop
// themselves one unit each and track the balances proposers report back.
//
// Nonces are advanced optimistically at send time; account_info replies
// overwrite them with the proposer's view.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::{NetConfig, NUM_WALLET_ACCOUNTS, WALLET_TICK_MS};
use crate::net::protocol::{
    read_frame, AccountInfoMsg, AccountMsg, Message, NodeKind, TxMsg,
};
use crate::nodes::node::Node;
use crate::nodes::NodeError;
use crate::primitives::transaction::{Airdrop, Command, Transaction, TxData};
use crate::wallet::keystore::Wallet;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub struct WalletNode {
    node: Node,
    accounts: Mutex<HashMap<String, Wallet>>,
}

impl WalletNode {
    pub fn new(cfg: NetConfig) -> Result<Arc<Self>, NodeError> {
        Self::new_at(Path::new("."), cfg)
    }

    /// Load or create the keypairs named `(port, 0..N)` under `dir`.
    pub fn new_at(dir: &Path, cfg: NetConfig) -> Result<Arc<Self>, NodeError> {
        let mut accounts = HashMap::new();
        for i in 0..NUM_WALLET_ACCOUNTS {
            let wallet = Wallet::new(dir, &cfg.port, &i.to_string())?;
            let key = bs58::encode(wallet.public_key()).into_string();
            accounts.insert(key, wallet);
        }

        Ok(Arc::new(WalletNode {
            node: Node::new(cfg, NodeKind::Wallet),
            accounts: Mutex::new(accounts),
        }))
    }

    pub async fn run(self: Arc<Self>) -> Result<(), NodeError> {
        let listener = TcpListener::bind(self.node.cfg.listen_address()).await?;
        info!("wallet node is listening at {}", self.node.id.ip);

        self.node.broadcast_join().await?;

        if let Some(peer) = self.node.peers.first() {
            self.send_accounts(&peer).await?;
        }

        let ticker = self.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(WALLET_TICK_MS));
            loop {
                interval.tick().await;
                if let Err(e) = ticker.send_airdrop_transactions().await {
                    error!("airdrop tick failed: {e}");
                    std::process::exit(1);
                }
            }
        });

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
                node.dispatch(&raw);
            });
        }
    }

    fn dispatch(&self, raw: &[u8]) {
        let msg = match Message::decode(raw) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("dropping undecodable message: {e}");
                return;
            }
        };
        info!("received msg '{}'", msg.label());

        match msg {
            Message::Address(m) => self.node.handle_address(m),
            Message::AccountInfo(m) => self.handle_account_info(m),
            _ => info!("unexpected message, skipping..."),
        }
    }

    fn handle_account_info(&self, msg: AccountInfoMsg) {
        let key = bs58::encode(&msg.public_key).into_string();
        info!(
            "account {} balance: {}, nonce: {}",
            key, msg.balance, msg.nonce
        );

        let mut accounts = self.accounts.lock().expect("accounts mutex poisoned");
        match accounts.get_mut(&key) {
            Some(wallet) => {
                wallet.info.nonce = msg.nonce;
                wallet.info.balance = msg.balance;
            }
            None => warn!("account info for unknown key {key}"),
        }
    }

    /// One tick: with more than one known peer, airdrop one unit to each
    /// account through the first peer, bumping local nonces.
    async fn send_airdrop_transactions(&self) -> Result<(), NodeError> {
        if self.node.peers.len() <= 1 {
            return Ok(());
        }
        let Some(peer) = self.node.peers.first() else {
            return Ok(());
        };

        let transactions = {
            let mut accounts = self.accounts.lock().expect("accounts mutex poisoned");
            let mut out = Vec::with_capacity(accounts.len());
            for wallet in accounts.values_mut() {
                let cmd = Command::Airdrop(Airdrop {
                    public_key: wallet.public_key(),
                    amount: 1,
                });
                let mut tx = Transaction {
                    hash: [0u8; 32],
                    inner: TxData {
                        data: cmd.encode()?,
                        public_key: wallet.public_key(),
                        nonce: wallet.info.nonce,
                        signature: vec![],
                        timestamp: now_ms(),
                    },
                };
                wallet.sign(&mut tx)?;
                wallet.info.nonce += 1;
                out.push(tx);
            }
            out
        };

        for tx in transactions {
            info!("sending airdrop transaction to {}", peer.ip);
            self.node
                .send(
                    &peer,
                    &Message::Tx(TxMsg {
                        from: self.node.id.clone(),
                        transaction: tx,
                    }),
                )
                .await?;
        }
        Ok(())
    }

    /// Introduce every account to a proposer so it reports balances back.
    async fn send_accounts(&self, to: &crate::net::protocol::NodeId) -> Result<(), NodeError> {
        let content = serde_json::to_vec(&self.node.id)?;
        let messages = {
            let accounts = self.accounts.lock().expect("accounts mutex poisoned");
            accounts
                .values()
                .map(|wallet| AccountMsg {
                    from: self.node.id.clone(),
                    public_key: wallet.public_key(),
                    signature: wallet.quick_sign(&content),
                })
                .collect::<Vec<_>>()
        };

        for msg in messages {
            self.node.send(to, &Message::Account(msg)).await?;
        }
        Ok(())
    }
}
