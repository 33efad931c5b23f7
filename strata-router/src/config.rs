//! Router node configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use strata_types::{CoreError, CoreResult};

/// Configuration for a router node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Environment name, printed in logs and the startup banner.
    pub env_name: String,
    /// Advertised port. The core ships only the loopback transport;
    /// network listeners are adapters outside it.
    pub port: u16,
    /// Housekeeping sweep period in seconds; `None` disables the
    /// sweep. Expiry stays correct either way — reads enforce it
    /// lazily.
    pub housekeep_secs: Option<u64>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            env_name: "DEV".to_string(),
            port: 9113,
            housekeep_secs: Some(60),
        }
    }
}

impl RouterConfig {
    /// Loads configuration from a JSON file.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Argument(format!("cannot read config {}: {e}", path.display())))?;
        serde_json::from_str(&text).map_err(Into::into)
    }
}
