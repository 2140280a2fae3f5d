use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::internal::fsm::{
    engine::{WorkerId, WorkerKind},
    memory::InMemoryEngine,
};

const DEFAULT_ENTRIES: &[(&str, WorkerKind, u32)] = &[("lo", WorkerKind::Netdev, 1)];

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct WorkerEntry {
    pub name: String,
    pub kind: WorkerKind,
    pub ifindex: u32,
    #[serde(default)]
    pub security_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("Failed to read device inventory: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid device inventory JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn load_inventory(path: &Path) -> Vec<WorkerEntry> {
    match read_inventory(path) {
        Ok(entries) if !entries.is_empty() => entries,
        Ok(_) => default_inventory(),
        Err(e) => {
            tracing::debug!("using default inventory, {}: {}", path.display(), e);
            default_inventory()
        }
    }
}

pub fn read_inventory(path: &Path) -> Result<Vec<WorkerEntry>, InventoryError> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

pub fn default_inventory() -> Vec<WorkerEntry> {
    DEFAULT_ENTRIES
        .iter()
        .map(|(name, kind, ifindex)| WorkerEntry {
            name: (*name).to_string(),
            kind: *kind,
            ifindex: *ifindex,
            security_id: None,
        })
        .collect()
}

// Create one engine worker per entry, in file order.
pub fn populate(engine: &mut InMemoryEngine, entries: &[WorkerEntry]) -> Vec<WorkerId> {
    entries
        .iter()
        .map(|entry| {
            engine.add_worker(
                &entry.name,
                entry.kind,
                entry.ifindex,
                entry.security_id.as_deref(),
            )
        })
        .collect()
}
