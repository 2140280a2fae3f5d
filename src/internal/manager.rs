use crate::internal::{
    device::registry::{DeviceError, DeviceRegistry, ManagedDevice},
    exec::scheduler::{self, ApplyError, PassReport, Scheduler},
    fsm::engine::{Engine, PolicyId, WorkerId, WorkerKind},
    mem::store::{SecretStore, SecretValue},
    objects::{ObjectRef, ObjectTable},
    policy::policy::{ManagedPolicy, PolicyError, PolicyRegistry},
};

pub const DEFAULT_OBJECT_PREFIX: &str = "/org/ifwarden/Manager";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotplugEvent {
    Added(WorkerId),
    Removed(WorkerId),
    Down(WorkerId),
}

// All manager state. Owned by exactly one control loop.
pub struct Manager<E: Engine> {
    engine: E,
    devices: DeviceRegistry,
    policies: PolicyRegistry,
    secrets: SecretStore,
    scheduler: Scheduler,
    objects: ObjectTable,
    prefix: String,
}

impl<E: Engine> Manager<E> {
    pub fn new(engine: E) -> Self {
        Self::with_prefix(engine, DEFAULT_OBJECT_PREFIX)
    }

    pub fn with_prefix(engine: E, prefix: &str) -> Self {
        let prefix = prefix.trim_end_matches('/').to_string();
        let mut objects = ObjectTable::new();
        // The table is empty, so the root path is always free.
        let _ = objects.expose(&prefix, ObjectRef::Manager);

        Self {
            engine,
            devices: DeviceRegistry::new(),
            policies: PolicyRegistry::new(),
            secrets: SecretStore::new(),
            scheduler: Scheduler::new(),
            objects,
            prefix,
        }
    }

    // Revoke every exposed object and hand the engine back.
    pub fn shutdown(mut self) -> E {
        for path in self.objects.paths() {
            self.objects.revoke(&path);
        }
        tracing::info!(
            "manager shut down with {} devices and {} policies",
            self.devices.len(),
            self.policies.len()
        );
        self.engine
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    pub fn policies(&self) -> &PolicyRegistry {
        &self.policies
    }

    pub fn secrets(&self) -> &SecretStore {
        &self.secrets
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn objects(&self) -> &ObjectTable {
        &self.objects
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    // Start managing `worker`. Returns `Ok(false)` if it already is managed.
    pub fn register_device(&mut self, worker: WorkerId) -> Result<bool, DeviceError> {
        if self.devices.get(worker).is_some() {
            return Ok(false);
        }

        let info = self
            .engine
            .worker_info(worker)
            .ok_or_else(|| DeviceError::NotKnown(worker.to_string()))?;
        // Modems rarely carry a usable ifindex, so they are keyed by worker.
        let (path, object) = match info.kind {
            WorkerKind::Netdev => (
                format!("{}/Interface/{}", self.prefix, info.ifindex),
                ObjectRef::Interface(worker),
            ),
            WorkerKind::Modem => (
                format!("{}/Modem/{}", self.prefix, worker.0),
                ObjectRef::Modem(worker),
            ),
        };

        self.objects.expose(&path, object).map_err(|e| {
            tracing::error!("{}: cannot register: {}", info.name, e);
            DeviceError::from(e)
        })?;
        self.devices.register(worker, &info, path.clone());
        tracing::info!("{}: registered {:?} device at {}", info.name, info.kind, path);
        Ok(true)
    }

    // Stop managing `worker`: drop the wrapper, revoke its object, then let
    // the engine destroy the worker.
    pub fn unregister_device(&mut self, worker: WorkerId) -> Result<(), DeviceError> {
        let device = self.devices.remove(worker).map_err(|e| {
            tracing::error!("{}: cannot unregister; device not known", worker);
            e
        })?;
        self.objects.revoke(&device.object_path);
        self.engine.destroy_worker(worker);
        tracing::info!("{}: unregistered", device.name);
        Ok(())
    }

    pub fn lookup_device(&self, worker: WorkerId) -> Option<&ManagedDevice> {
        self.devices.get(worker)
    }

    pub fn set_user_controlled(&mut self, worker: WorkerId, enabled: bool) -> Result<(), DeviceError> {
        let device = self
            .devices
            .get_mut(worker)
            .ok_or_else(|| DeviceError::NotKnown(worker.to_string()))?;
        device.user_controlled = enabled;
        Ok(())
    }

    pub fn schedule_recheck(&mut self, worker: WorkerId) {
        self.scheduler.schedule_recheck(worker);
    }

    pub fn schedule_down(&mut self, worker: WorkerId) {
        self.scheduler.schedule_down(worker);
    }

    pub fn recheck_do(&mut self) -> PassReport {
        self.scheduler.run_recheck(
            &mut self.engine,
            &mut self.devices,
            &self.policies,
            &self.secrets,
        )
    }

    pub fn down_do(&mut self) -> Vec<WorkerId> {
        self.scheduler.run_down()
    }

    pub fn apply_policy(&mut self, policy: PolicyId, worker: WorkerId) -> Result<(), ApplyError> {
        let managed = self
            .policies
            .get(policy)
            .ok_or(ApplyError::PolicyNotKnown(policy))?;
        scheduler::apply_policy(
            &mut self.engine,
            &mut self.devices,
            &self.secrets,
            managed,
            worker,
        )
    }

    pub fn create_policy(&mut self, name: &str) -> Result<String, PolicyError> {
        self.create_scoped_policy(name, None)
    }

    pub fn create_scoped_policy(
        &mut self,
        name: &str,
        device: Option<WorkerId>,
    ) -> Result<String, PolicyError> {
        let created = self
            .policies
            .create(&mut self.engine, name, device, &self.prefix)?;
        let path = created.object_path.clone();
        if let Err(e) = self.objects.expose(&path, ObjectRef::Policy(created.policy)) {
            tracing::error!("policy {} created but not exposed: {}", created.name, e);
        }
        Ok(path)
    }

    pub fn lookup_policy(&self, policy: PolicyId) -> Option<&ManagedPolicy> {
        self.policies.get(policy)
    }

    pub fn device_path_by_name(&mut self, ifname: &str) -> Result<String, DeviceError> {
        if let Err(e) = self.engine.refresh_state() {
            tracing::warn!("state refresh failed: {}", e);
        }
        scheduler::sync_devices(&self.engine, &mut self.devices);

        self.engine
            .worker_by_name(WorkerKind::Netdev, ifname)
            .and_then(|worker| self.devices.get(worker))
            .map(|device| format!("{}/Interface/{}", self.prefix, device.ifindex))
            .ok_or_else(|| DeviceError::NotKnown(ifname.to_string()))
    }

    // Store a credential and recheck idle modems that use it. Returns the
    // number of devices scheduled.
    pub fn add_secret(&mut self, security_id: &str, path: &str, value: &str) -> usize {
        self.secrets.add(security_id, path, value);

        let mut scheduled = 0;
        for modem in self.devices.modems() {
            tracing::trace!("{}: security-id={:?}", modem.name, modem.security_id);
            if modem.security_id.as_deref() == Some(security_id)
                && !self.engine.is_running(modem.worker)
            {
                tracing::debug!("{}: secret for {} updated, rechecking", modem.name, path);
                self.scheduler.schedule_recheck(modem.worker);
                scheduled += 1;
            }
        }
        scheduled
    }

    pub fn clear_secrets(&mut self, security_id: Option<&str>, path: Option<&str>) -> usize {
        self.secrets.clear(security_id, path)
    }

    pub fn get_secret(&self, security_id: &str, path: &str) -> Option<&SecretValue> {
        self.secrets.get(security_id, path)
    }

    pub fn handle_hotplug(&mut self, event: HotplugEvent) {
        match event {
            HotplugEvent::Added(worker) => match self.register_device(worker) {
                Ok(_) => self.schedule_recheck(worker),
                Err(e) => tracing::warn!("ignoring hotplug of {}: {}", worker, e),
            },
            HotplugEvent::Removed(worker) => {
                if let Some(device) = self.devices.get_mut(worker) {
                    device.dead = true;
                }
                // Already logged by unregister_device.
                let _ = self.unregister_device(worker);
            }
            HotplugEvent::Down(worker) => self.schedule_down(worker),
        }
    }
}
