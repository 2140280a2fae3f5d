use crate::internal::fsm::engine::{PolicyId, WorkerId, WorkerInfo, WorkerKind};
use crate::internal::objects::ObjectError;
use crate::internal::tree::node::NodeId;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ManagedDevice {
    pub worker: WorkerId,
    pub name: String,
    pub kind: WorkerKind,
    pub ifindex: u32,
    pub user_controlled: bool,
    pub dead: bool,
    pub security_id: Option<String>,
    pub active_policy: Option<PolicyId>,
    #[serde(skip)]
    pub selected_config: Option<NodeId>,
    pub object_path: String,
}

impl ManagedDevice {
    fn new(worker: WorkerId, info: &WorkerInfo, object_path: String) -> Self {
        Self {
            worker,
            name: info.name.clone(),
            kind: info.kind,
            ifindex: info.ifindex,
            // Modem credentials are always user supplied.
            user_controlled: info.kind == WorkerKind::Modem,
            dead: info.dead,
            security_id: info.security_id.clone(),
            active_policy: None,
            selected_config: None,
            object_path,
        }
    }

    // Pick up engine-side changes to liveness and security id.
    pub fn sync(&mut self, info: &WorkerInfo) {
        self.dead = info.dead;
        self.security_id = info.security_id.clone();
    }
}

// Interfaces and modems, each kept in registration order.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    netdevs: Vec<ManagedDevice>,
    modems: Vec<ManagedDevice>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Returns false when the worker is already registered.
    pub fn register(&mut self, worker: WorkerId, info: &WorkerInfo, object_path: String) -> bool {
        if self.get(worker).is_some() {
            return false;
        }

        let device = ManagedDevice::new(worker, info, object_path);
        match info.kind {
            WorkerKind::Netdev => self.netdevs.push(device),
            WorkerKind::Modem => self.modems.push(device),
        }
        true
    }

    pub fn remove(&mut self, worker: WorkerId) -> Result<ManagedDevice, DeviceError> {
        if let Some(pos) = self.netdevs.iter().position(|d| d.worker == worker) {
            return Ok(self.netdevs.remove(pos));
        }
        if let Some(pos) = self.modems.iter().position(|d| d.worker == worker) {
            return Ok(self.modems.remove(pos));
        }
        Err(DeviceError::NotKnown(worker.to_string()))
    }

    pub fn get(&self, worker: WorkerId) -> Option<&ManagedDevice> {
        self.iter().find(|d| d.worker == worker)
    }

    pub fn get_mut(&mut self, worker: WorkerId) -> Option<&mut ManagedDevice> {
        self.netdevs
            .iter_mut()
            .chain(self.modems.iter_mut())
            .find(|d| d.worker == worker)
    }

    pub fn netdevs(&self) -> &[ManagedDevice] {
        &self.netdevs
    }

    pub fn modems(&self) -> &[ManagedDevice] {
        &self.modems
    }

    pub fn iter(&self) -> impl Iterator<Item = &ManagedDevice> {
        self.netdevs.iter().chain(self.modems.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ManagedDevice> {
        self.netdevs.iter_mut().chain(self.modems.iter_mut())
    }

    // The device whose selected configuration is rooted at `node`, if any.
    pub fn owner_of_config(&self, node: NodeId) -> Option<&ManagedDevice> {
        self.iter().find(|d| d.selected_config == Some(node))
    }

    pub fn len(&self) -> usize {
        self.netdevs.len() + self.modems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("No such device: {0}")]
    NotKnown(String),
    #[error(transparent)]
    Exposure(#[from] ObjectError),
}
