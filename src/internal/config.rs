use serde::{Deserialize, Serialize};
use std::{env, fs, net::SocketAddr, path::Path, path::PathBuf, time::Duration};

use crate::internal::manager::DEFAULT_OBJECT_PREFIX;

const DEFAULT_CONFIG_PATH: &str = "config/ifwarden.json";
const DEFAULT_INVENTORY_PATH: &str = "config/devices.json";
const DEFAULT_LISTEN: ([u8; 4], u16) = ([127, 0, 0, 1], 7780);

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub listen_addr: SocketAddr,
    pub recheck_interval_ms: u64,
    pub event_queue: usize,
    pub inventory_path: PathBuf,
    pub object_prefix: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(DEFAULT_LISTEN),
            recheck_interval_ms: 1000,
            event_queue: 64,
            inventory_path: PathBuf::from(DEFAULT_INVENTORY_PATH),
            object_prefix: DEFAULT_OBJECT_PREFIX.to_string(),
        }
    }
}

impl ManagerConfig {
    pub fn recheck_interval(&self) -> Duration {
        Duration::from_millis(self.recheck_interval_ms.max(1))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

// Load the daemon configuration, falling back to defaults when the file is
// missing or broken, then apply environment overrides.
pub fn load_config() -> ManagerConfig {
    let path = env::var("IFWARDEN_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut config = match read_config(Path::new(&path)) {
        Ok(config) => config,
        Err(ConfigError::Io(e)) => {
            tracing::debug!("no config at {} ({}), using defaults", path, e);
            ManagerConfig::default()
        }
        Err(e) => {
            tracing::warn!("ignoring {}: {}", path, e);
            ManagerConfig::default()
        }
    };
    apply_overrides(&mut config, |key| env::var(key).ok());
    config
}

pub fn read_config(path: &Path) -> Result<ManagerConfig, ConfigError> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

// Apply `IFWARDEN_LISTEN` and `IFWARDEN_INVENTORY` style overrides looked up
// through `var`.
pub fn apply_overrides<F>(config: &mut ManagerConfig, var: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(listen) = var("IFWARDEN_LISTEN") {
        match listen.parse() {
            Ok(addr) => config.listen_addr = addr,
            Err(e) => tracing::warn!("ignoring IFWARDEN_LISTEN={}: {}", listen, e),
        }
    }
    if let Some(inventory) = var("IFWARDEN_INVENTORY") {
        config.inventory_path = PathBuf::from(inventory);
    }
}
