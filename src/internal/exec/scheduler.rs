use crate::internal::{
    device::registry::DeviceRegistry,
    fsm::engine::{Engine, EngineError, PolicyId, WorkerId},
    mem::store::SecretStore,
    policy::policy::{ManagedPolicy, PolicyRegistry},
    prompt::resolver::PromptResolver,
};

// Upper bound on the applicable policies requested per device.
pub const MAX_POLICIES: usize = 20;

// Insertion-ordered set of workers waiting for a pass.
#[derive(Debug, Default, Clone)]
pub struct PendingSet {
    entries: Vec<WorkerId>,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    // Returns false if the worker was already queued.
    pub fn insert(&mut self, worker: WorkerId) -> bool {
        if self.entries.contains(&worker) {
            return false;
        }
        self.entries.push(worker);
        true
    }

    pub fn contains(&self, worker: WorkerId) -> bool {
        self.entries.contains(&worker)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkerId> {
        self.entries.iter()
    }

    pub fn take(&mut self) -> Vec<WorkerId> {
        std::mem::take(&mut self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub evaluated: Vec<WorkerId>,
    pub applied: Vec<(WorkerId, PolicyId)>,
    pub skipped_dead: Vec<WorkerId>,
    pub no_policy: Vec<WorkerId>,
    pub failed: Vec<WorkerId>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("Device {0} is not registered")]
    DeviceNotKnown(WorkerId),
    #[error("Policy {0:?} is not tracked locally")]
    PolicyNotKnown(PolicyId),
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

#[derive(Debug, Default)]
pub struct Scheduler {
    recheck: PendingSet,
    down: PendingSet,
    last_policy_epoch: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule_recheck(&mut self, worker: WorkerId) -> bool {
        self.recheck.insert(worker)
    }

    pub fn schedule_down(&mut self, worker: WorkerId) -> bool {
        self.down.insert(worker)
    }

    pub fn recheck_pending(&self) -> &PendingSet {
        &self.recheck
    }

    pub fn down_pending(&self) -> &PendingSet {
        &self.down
    }

    pub fn last_policy_epoch(&self) -> u64 {
        self.last_policy_epoch
    }

    pub fn run_recheck<E: Engine + ?Sized>(
        &mut self,
        engine: &mut E,
        devices: &mut DeviceRegistry,
        policies: &PolicyRegistry,
        secrets: &SecretStore,
    ) -> PassReport {
        let mut report = PassReport::default();

        let epoch = engine.policy_epoch();
        if epoch != self.last_policy_epoch {
            tracing::debug!(
                "policy epoch moved {} -> {}, rechecking enabled devices",
                self.last_policy_epoch,
                epoch
            );
            for device in devices.netdevs().iter().filter(|d| d.user_controlled) {
                self.recheck.insert(device.worker);
            }
            for device in devices.modems() {
                self.recheck.insert(device.worker);
            }
            self.last_policy_epoch = epoch;
        }

        if self.recheck.is_empty() {
            return report;
        }

        if let Err(e) = engine.refresh_state() {
            tracing::warn!("state refresh failed, rechecking with stale state: {}", e);
        }
        sync_devices(engine, devices);

        for worker in self.recheck.take() {
            self.recheck_device(engine, devices, policies, secrets, worker, &mut report);
        }
        report
    }

    fn recheck_device<E: Engine + ?Sized>(
        &self,
        engine: &mut E,
        devices: &mut DeviceRegistry,
        policies: &PolicyRegistry,
        secrets: &SecretStore,
        worker: WorkerId,
        report: &mut PassReport,
    ) {
        let Some(device) = devices.get(worker) else {
            tracing::debug!("{}: no longer registered, dropping recheck", worker);
            return;
        };
        if device.dead {
            tracing::debug!("{}: device went away, not rechecking", device.name);
            report.skipped_dead.push(worker);
            return;
        }

        tracing::trace!("recheck({})", device.name);
        report.evaluated.push(worker);

        let candidates = engine.applicable_policies(worker, MAX_POLICIES);
        // The engine orders candidates by priority; the last one wins.
        let Some(&winner) = candidates.last() else {
            tracing::trace!("{}: no applicable policies", device.name);
            report.no_policy.push(worker);
            return;
        };

        let Some(policy) = policies.get(winner) else {
            tracing::error!("{}: applicable policy {:?} is not tracked", device.name, winner);
            report.failed.push(worker);
            return;
        };

        match apply_policy(engine, devices, secrets, policy, worker) {
            Ok(()) => report.applied.push((worker, winner)),
            Err(e) => {
                tracing::warn!("{}: applying policy {} failed: {}", worker, policy.name, e);
                report.failed.push(worker);
            }
        }
    }

    // Drain the teardown set. Bringing a device down has no defined
    // semantics yet, so entries are only dequeued.
    pub fn run_down(&mut self) -> Vec<WorkerId> {
        if self.down.is_empty() {
            return Vec::new();
        }
        let drained = self.down.take();
        for worker in &drained {
            tracing::debug!("{}: teardown requested, nothing to do", worker);
        }
        drained
    }
}

// Re-read liveness and security ids after an engine refresh. Workers the
// engine no longer knows are treated as dead.
pub fn sync_devices<E: Engine + ?Sized>(engine: &E, devices: &mut DeviceRegistry) {
    for device in devices.iter_mut() {
        match engine.worker_info(device.worker) {
            Some(info) => device.sync(&info),
            None => device.dead = true,
        }
    }
}

// Render the policy's configuration for the device, remember it as the
// selected configuration, then run the transition with the prompt resolver
// wired in.
pub fn apply_policy<E: Engine + ?Sized>(
    engine: &mut E,
    devices: &mut DeviceRegistry,
    secrets: &SecretStore,
    policy: &ManagedPolicy,
    worker: WorkerId,
) -> Result<(), ApplyError> {
    if devices.get(worker).is_none() {
        tracing::error!("{}: cannot apply policy {}, device not registered", worker, policy.name);
        return Err(ApplyError::DeviceNotKnown(worker));
    }

    // A failed render may have freed the old document, so never keep its handle.
    let rendered = engine.render_config(worker, policy.policy);
    if let Some(device) = devices.get_mut(worker) {
        device.selected_config = rendered.as_ref().ok().copied();
    }
    rendered?;

    {
        let mut resolver = PromptResolver::new(devices, secrets);
        engine.apply_policy(worker, policy.policy, &mut resolver)?;
    }

    if let Some(device) = devices.get_mut(worker) {
        tracing::info!("{}: applied policy {}", device.name, policy.name);
        device.active_policy = Some(policy.policy);
    }
    Ok(())
}
