use crate::confidence::DEFAULT_THRESHOLD;
use anyhow::Context;
use bitcoin::Network;
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};
use url::Url;

/// Engine settings as callers load them from a TOML file.
///
/// The engine itself never reads files or the environment; hosts
/// deserialize this once and hand the pieces to the builder.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Settings {
    pub network: Network,
    #[serde(default)]
    pub explorer: Option<Explorer>,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_settle_delay_secs")]
    pub settle_delay_secs: u64,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct Explorer {
    pub endpoint: Url,
}

impl Settings {
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            network: Network::Testnet,
            explorer: None,
            confidence_threshold: default_confidence_threshold(),
            settle_delay_secs: default_settle_delay_secs(),
        }
    }
}

fn default_confidence_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

fn default_settle_delay_secs() -> u64 {
    10
}
