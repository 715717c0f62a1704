// Process constants and the per-node network configuration record. The
// record is built once by the CLI and handed down; nothing reads these
// constants from anywhere else at runtime.

use crate::net::protocol::{NodeId, NodeKind};

/// Well-known bootstrap proposer; also the initial block producer.
pub const RENDEZVOUS: &str = "localhost:3000";

pub const PROTOCOL_VERSION: u8 = 1;

pub const DEFAULT_EXECUTER_PORT: &str = "3000";
pub const DEFAULT_MINER_PORT: &str = "3001";
pub const DEFAULT_WALLET_PORT: &str = "3002";

/// Rendezvous re-proposal delay while the pool is empty.
pub const EPOCH_RETRY_MS: u64 = 10_000;

/// Wallet airdrop cadence.
pub const WALLET_TICK_MS: u64 = 1_000;

pub const NUM_WALLET_ACCOUNTS: usize = 10;

#[derive(Debug, Clone)]
pub struct NetConfig {
    pub port: String,
    pub rendezvous: String,
}

impl NetConfig {
    pub fn new(port: impl Into<String>) -> Self {
        NetConfig {
            port: port.into(),
            rendezvous: RENDEZVOUS.to_string(),
        }
    }

    pub fn listen_address(&self) -> String {
        format!("localhost:{}", self.port)
    }

    pub fn is_rendezvous(&self, ip: &str) -> bool {
        ip == self.rendezvous
    }

    /// The bootstrap peer every node starts with.
    pub fn default_peer(&self) -> NodeId {
        NodeId {
            ip: self.rendezvous.clone(),
            kind: NodeKind::Executer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_address() {
        let cfg = NetConfig::new("3003");
        assert_eq!(cfg.listen_address(), "localhost:3003");
        assert!(!cfg.is_rendezvous(&cfg.listen_address()));
        assert!(cfg.is_rendezvous(RENDEZVOUS));
    }

    #[test]
    fn test_default_peer_is_rendezvous_executer() {
        let cfg = NetConfig::new("3005");
        let peer = cfg.default_peer();
        assert_eq!(peer.ip, RENDEZVOUS);
        assert_eq!(peer.kind, NodeKind::Executer);
    }
}
