// Role-independent node plumbing: identity, the peer registry, and the
// one-message-per-connection send path.
//
// Sending dials the peer, writes the encoded message and closes; replies
// arrive as fresh connections. A peer that cannot be dialed is removed
// from the registry and the send is a no-op.

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::config::{NetConfig, PROTOCOL_VERSION};
use crate::net::peers::KnownPeers;
use crate::net::protocol::{AddressMsg, JoinMsg, Message, NodeId, NodeKind};
use crate::nodes::NodeError;

pub struct Node {
    pub id: NodeId,
    pub version: u8,
    pub cfg: NetConfig,
    pub peers: KnownPeers,
}

impl Node {
    pub fn new(cfg: NetConfig, kind: NodeKind) -> Self {
        let id = NodeId::new(&cfg.port, kind);
        let peers = KnownPeers::new();
        peers.append([cfg.default_peer()]);
        Node {
            id,
            version: PROTOCOL_VERSION,
            cfg,
            peers,
        }
    }

    pub fn is_self(&self, id: &NodeId) -> bool {
        id.ip == self.id.ip
    }

    pub fn is_rendezvous(&self) -> bool {
        self.cfg.is_rendezvous(&self.id.ip)
    }

    /// Dial `to` and ship one message. Dial failure drops the peer from
    /// the registry and is not an error; a failed write is.
    pub async fn send(&self, to: &NodeId, msg: &Message) -> Result<(), NodeError> {
        let payload = msg.encode()?;
        let mut stream = match TcpStream::connect(&to.ip).await {
            Ok(stream) => stream,
            Err(_) => {
                warn!("{} is not available", to.ip);
                self.peers.remove_by_ip(&to.ip);
                return Ok(());
            }
        };
        stream.write_all(&payload).await?;
        stream.shutdown().await?;
        Ok(())
    }

    /// Ship one message to every known peer except ourselves.
    pub async fn broadcast(&self, msg: &Message) -> Result<(), NodeError> {
        for peer in self.node_targets() {
            self.send(&peer, msg).await?;
        }
        Ok(())
    }

    fn node_targets(&self) -> Vec<NodeId> {
        self.peers
            .snapshot()
            .into_iter()
            .filter(|p| !self.is_self(p))
            .collect()
    }

    /// Announce ourselves; the rendezvous just listens.
    pub async fn broadcast_join(&self) -> Result<(), NodeError> {
        if self.is_rendezvous() {
            info!("listening rendezvous point...");
            return Ok(());
        }

        info!("broadcasting join...");
        self.broadcast(&Message::Join(JoinMsg {
            from: self.id.ip.clone(),
            version: self.version,
            kind: self.id.kind,
        }))
        .await
    }

    /// Gossiped address lists: wallets are ignored as senders, and only
    /// proposer/worker entries that are neither us nor the rendezvous
    /// are appended.
    pub fn handle_address(&self, msg: AddressMsg) {
        if msg.from.kind == NodeKind::Wallet {
            return;
        }

        let found: Vec<NodeId> = msg
            .node_list
            .into_iter()
            .filter(|p| {
                !self.cfg.is_rendezvous(&p.ip)
                    && !self.is_self(p)
                    && matches!(p.kind, NodeKind::Executer | NodeKind::Miner)
            })
            .collect();
        info!("received {} peer", found.len());
        self.peers.append(found);
    }
}
