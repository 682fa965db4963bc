use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use crate::network::TransactionConfig;

/// Discovery configuration
///
/// Loaded from an optional TOML file; every field has a default so an empty
/// file is valid. Command line flags override what the file says.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverConfig {
    // STUN server supporting CHANGE-REQUEST, eg: stun.example.org:3478
    // the default port 3478 is appended when missing
    #[serde(default = "default_server")]
    pub server: String,

    // log every probe
    #[serde(default)]
    pub verbose: bool,

    // initial retransmission timeout of a transaction
    #[serde(default = "default_rto_ms")]
    pub rto_ms: u64,

    // retransmissions before a transaction times out
    #[serde(default = "default_max_retransmits")]
    pub max_retransmits: u32,
}

fn default_server() -> String {
    "stun.ekiga.net:3478".to_string()
}

fn default_rto_ms() -> u64 {
    500
}

fn default_max_retransmits() -> u32 {
    6
}

impl Default for DiscoverConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            verbose: false,
            rto_ms: default_rto_ms(),
            max_retransmits: default_max_retransmits(),
        }
    }
}

impl DiscoverConfig {
    pub fn transaction_config(&self) -> TransactionConfig {
        TransactionConfig {
            rto: Duration::from_millis(self.rto_ms),
            max_retransmits: self.max_retransmits,
        }
    }
}

pub fn load(path: &str) -> anyhow::Result<DiscoverConfig> {
    let content = fs::read_to_string(path)?;
    let config: DiscoverConfig = toml::from_str(&content)?;
    Ok(config)
}
