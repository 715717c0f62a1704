use clap::{Parser, Subcommand};
use tracing::error;

use minichain::config::{
    NetConfig, DEFAULT_EXECUTER_PORT, DEFAULT_MINER_PORT, DEFAULT_WALLET_PORT,
};
use minichain::nodes::executer::ExecuterNode;
use minichain::nodes::miner::MinerNode;
use minichain::nodes::wallet::WalletNode;
use minichain::nodes::NodeError;

#[derive(Parser)]
#[command(name = "minichaind", about = "Educational proof-of-work blockchain node")]
struct Cli {
    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand)]
enum Role {
    /// Start a proposer node: owns the chain, admits transactions and
    /// offers blocks to workers.
    Executer {
        #[arg(short, long, default_value = DEFAULT_EXECUTER_PORT)]
        port: String,
    },
    /// Start a worker node: searches proof-of-work nonces for offered
    /// blocks.
    Miner {
        #[arg(short, long, default_value = DEFAULT_MINER_PORT)]
        port: String,
    },
    /// Start a wallet node: holds keypairs and emits periodic airdrops.
    Wallet {
        #[arg(short, long, default_value = DEFAULT_WALLET_PORT)]
        port: String,
    },
}

async fn run_executer(port: String) -> Result<(), NodeError> {
    let (node, epoch_rx) = ExecuterNode::new(NetConfig::new(port))?;
    node.run(epoch_rx).await
}

async fn run_miner(port: String) -> Result<(), NodeError> {
    MinerNode::new(NetConfig::new(port)).run().await
}

async fn run_wallet(port: String) -> Result<(), NodeError> {
    WalletNode::new(NetConfig::new(port))?.run().await
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_target(false).init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // missing or unknown role prints usage and exits 1
            let _ = e.print();
            std::process::exit(1);
        }
    };

    let result = match cli.role {
        Role::Executer { port } => run_executer(port).await,
        Role::Miner { port } => run_miner(port).await,
        Role::Wallet { port } => run_wallet(port).await,
    };

    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
}
