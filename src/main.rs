use anyhow::Context;
use consensus_node::blockchain::Blockchain;
use consensus_node::config::NodeConfig;
use consensus_node::network::Node;
use consensus_node::server;
use consensus_node::utxo::UtxoSet;
use consensus_node::NodeError;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    let config_path = std::env::var_os("NODE_CONFIG").map(PathBuf::from);
    let config = NodeConfig::load(config_path.as_deref()).context("loading configuration")?;
    info!(node_id = %config.node_id, address = %config.listen_address(), "starting node");

    let path = config.ledger_path();
    let blockchain = match Blockchain::open(&path, config.difficulty_bits) {
        Ok(chain) => chain,
        // A mining node may start a fresh chain rewarding itself; any other node needs a ledger.
        Err(NodeError::LedgerMissing(missing)) => match &config.mining_address {
            Some(reward) => Blockchain::create(&path, reward, config.difficulty_bits)?,
            None => anyhow::bail!("no ledger at {} and no mining address to create one", missing),
        },
        Err(e) => return Err(e).with_context(|| format!("opening ledger at {}", path.display())),
    };

    let utxo = Arc::new(UtxoSet::new(Arc::new(blockchain))?);
    utxo.reindex()?;

    let node = Arc::new(Node::new(
        config.listen_address(),
        config.bootstrap_address.clone(),
        config.mining_address.clone(),
        utxo,
    )?);

    server::start_server(node, config.timeouts()).await?;
    Ok(())
}
