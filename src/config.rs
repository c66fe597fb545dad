//! Node configuration: defaults, then an optional TOML file, then `NODE_*` environment variables

use crate::constants::*;
use crate::error::{NodeError, Result};
use crate::server::Timeouts;
use config::{Config, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variables are `NODE_` followed by the upper-cased field name, except
/// `node_id` which is read from `NODE_ID`.
const ENV_PREFIX: &str = "NODE_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Port-like node identifier; also names the ledger directory
    pub node_id: String,
    pub listen_host: String,
    pub bootstrap_address: String,
    /// Rewards go here when set; a node without one never mines
    pub mining_address: Option<String>,
    pub data_dir: PathBuf,
    pub difficulty_bits: u32,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "3000".to_string(),
            listen_host: "localhost".to_string(),
            bootstrap_address: BOOTSTRAP_ADDRESS.to_string(),
            mining_address: None,
            data_dir: PathBuf::from("."),
            difficulty_bits: TARGET_BITS,
            connect_timeout_ms: 5_000,
            read_timeout_ms: 30_000,
        }
    }
}

impl NodeConfig {
    /// Load from the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_from(path, std::env::vars())
    }

    /// Load with an explicit set of environment variables
    pub fn load_from(path: Option<&Path>, env: impl IntoIterator<Item = (String, String)>) -> Result<Self> {
        let defaults = NodeConfig::default();
        let mut builder = Config::builder()
            .set_default("node_id", defaults.node_id)
            .and_then(|b| b.set_default("listen_host", defaults.listen_host))
            .and_then(|b| b.set_default("bootstrap_address", defaults.bootstrap_address))
            .and_then(|b| b.set_default("data_dir", defaults.data_dir.display().to_string()))
            .and_then(|b| b.set_default("difficulty_bits", defaults.difficulty_bits as i64))
            .and_then(|b| b.set_default("connect_timeout_ms", defaults.connect_timeout_ms as i64))
            .and_then(|b| b.set_default("read_timeout_ms", defaults.read_timeout_ms as i64))
            .map_err(config_error)?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }

        // Env overrides are applied by hand so NODE_ID maps onto node_id.
        for (key, value) in env {
            let field = match key.strip_prefix(ENV_PREFIX) {
                Some("ID") => "node_id".to_string(),
                Some(rest) => rest.to_lowercase(),
                None => continue,
            };
            if value.is_empty() || !Self::is_field(&field) {
                continue;
            }
            builder = builder.set_override(field, value).map_err(config_error)?;
        }

        let config: NodeConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(config_error)?;
        config.validate()?;
        Ok(config)
    }

    fn is_field(name: &str) -> bool {
        matches!(
            name,
            "node_id"
                | "listen_host"
                | "bootstrap_address"
                | "mining_address"
                | "data_dir"
                | "difficulty_bits"
                | "connect_timeout_ms"
                | "read_timeout_ms"
        )
    }

    fn validate(&self) -> Result<()> {
        if self.node_id.is_empty() {
            return Err(NodeError::Config("node_id must not be empty".to_string()));
        }
        if self.difficulty_bits == 0 || self.difficulty_bits > 255 {
            return Err(NodeError::Config(format!(
                "difficulty_bits {} out of range 1..=255",
                self.difficulty_bits
            )));
        }
        if let Some(address) = &self.mining_address {
            if !crate::wallet::validate_address(address) {
                return Err(NodeError::InvalidAddress(address.clone()));
            }
        }
        Ok(())
    }

    /// `{listen_host}:{node_id}`
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.listen_host, self.node_id)
    }

    /// `{data_dir}/blockchain_{node_id}.db`
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join(format!("blockchain_{}.db", self.node_id))
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect: Duration::from_millis(self.connect_timeout_ms),
            read: Duration::from_millis(self.read_timeout_ms),
        }
    }
}

fn config_error(e: config::ConfigError) -> NodeError {
    NodeError::Config(e.to_string())
}
