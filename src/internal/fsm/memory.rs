use crate::internal::fsm::engine::{
    Engine, EngineError, PolicyId, Prompt, PromptHandler, PromptKind, WorkerId, WorkerInfo,
    WorkerKind,
};
use crate::internal::tree::node::{ConfigTree, NodeId};
use std::collections::{BTreeMap, HashMap, HashSet};

// Every engine call the manager makes, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    RefreshState,
    ApplicablePolicies(WorkerId),
    CreatePolicy(String),
    RenderConfig(WorkerId, PolicyId),
    ApplyPolicy(WorkerId, PolicyId),
    DestroyWorker(WorkerId),
}

#[derive(Debug, Clone)]
struct WorkerRecord {
    info: WorkerInfo,
    running: bool,
    active: Option<PolicyId>,
    config: Option<NodeId>,
}

#[derive(Debug, Clone)]
struct PolicyRecord {
    id: PolicyId,
    name: String,
    scope: Option<String>,
    secrets: Vec<(String, PromptKind)>,
}

// Self-contained engine. Policies apply to every worker unless scoped to a
// worker name; matches are returned in creation order.
#[derive(Debug, Default)]
pub struct InMemoryEngine {
    workers: BTreeMap<WorkerId, WorkerRecord>,
    policies: Vec<PolicyRecord>,
    overrides: HashMap<WorkerId, Vec<PolicyId>>,
    failing: HashSet<WorkerId>,
    next_worker: u32,
    next_policy: u32,
    epoch: u64,
    tree: ConfigTree,
    calls: Vec<EngineCall>,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_worker(
        &mut self,
        name: &str,
        kind: WorkerKind,
        ifindex: u32,
        security_id: Option<&str>,
    ) -> WorkerId {
        let id = WorkerId(self.next_worker);
        self.next_worker += 1;
        self.workers.insert(
            id,
            WorkerRecord {
                info: WorkerInfo {
                    name: name.to_string(),
                    kind,
                    ifindex,
                    security_id: security_id.map(str::to_string),
                    dead: false,
                },
                running: false,
                active: None,
                config: None,
            },
        );
        id
    }

    pub fn mark_dead(&mut self, worker: WorkerId) {
        if let Some(record) = self.workers.get_mut(&worker) {
            record.info.dead = true;
        }
    }

    pub fn set_running(&mut self, worker: WorkerId, running: bool) {
        if let Some(record) = self.workers.get_mut(&worker) {
            record.running = running;
        }
    }

    pub fn set_security_id(&mut self, worker: WorkerId, security_id: Option<&str>) {
        if let Some(record) = self.workers.get_mut(&worker) {
            record.info.security_id = security_id.map(str::to_string);
        }
    }

    pub fn scope_policy(&mut self, policy: PolicyId, worker_name: &str) {
        if let Some(record) = self.policies.iter_mut().find(|p| p.id == policy) {
            record.scope = Some(worker_name.to_string());
            self.epoch += 1;
        }
    }

    // Declare a value the policy's configuration needs at `path` (relative to
    // the rendered root) that will be requested through the prompt handler.
    pub fn require_secret(&mut self, policy: PolicyId, path: &str, kind: PromptKind) {
        if let Some(record) = self.policies.iter_mut().find(|p| p.id == policy) {
            record.secrets.push((path.to_string(), kind));
        }
    }

    // Pin the matcher result for one worker, bypassing scope matching.
    pub fn set_applicable(&mut self, worker: WorkerId, policies: Vec<PolicyId>) {
        self.overrides.insert(worker, policies);
    }

    // Make every following transition on `worker` fail.
    pub fn fail_transitions(&mut self, worker: WorkerId) {
        self.failing.insert(worker);
    }

    pub fn bump_epoch(&mut self) {
        self.epoch += 1;
    }

    pub fn active_policy(&self, worker: WorkerId) -> Option<PolicyId> {
        self.workers.get(&worker).and_then(|r| r.active)
    }

    pub fn config_root(&self, worker: WorkerId) -> Option<NodeId> {
        self.workers.get(&worker).and_then(|r| r.config)
    }

    pub fn has_worker(&self, worker: WorkerId) -> bool {
        self.workers.contains_key(&worker)
    }

    pub fn workers(&self) -> Vec<WorkerId> {
        self.workers.keys().copied().collect()
    }

    pub fn tree(&self) -> &ConfigTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut ConfigTree {
        &mut self.tree
    }

    pub fn calls(&self) -> &[EngineCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    fn record(&mut self, worker: WorkerId) -> Result<&mut WorkerRecord, EngineError> {
        self.workers
            .get_mut(&worker)
            .ok_or(EngineError::UnknownWorker(worker))
    }

    fn policy(&self, policy: PolicyId) -> Result<&PolicyRecord, EngineError> {
        self.policies
            .iter()
            .find(|p| p.id == policy)
            .ok_or(EngineError::UnknownPolicy(policy))
    }
}

impl Engine for InMemoryEngine {
    fn refresh_state(&mut self) -> Result<(), EngineError> {
        self.calls.push(EngineCall::RefreshState);
        Ok(())
    }

    fn policy_epoch(&self) -> u64 {
        self.epoch
    }

    fn worker_info(&self, worker: WorkerId) -> Option<WorkerInfo> {
        self.workers.get(&worker).map(|r| r.info.clone())
    }

    fn worker_by_name(&self, kind: WorkerKind, name: &str) -> Option<WorkerId> {
        self.workers
            .iter()
            .find(|(_, r)| r.info.kind == kind && r.info.name == name)
            .map(|(id, _)| *id)
    }

    fn is_running(&self, worker: WorkerId) -> bool {
        self.workers.get(&worker).map_or(false, |r| r.running)
    }

    fn applicable_policies(&mut self, worker: WorkerId, max: usize) -> Vec<PolicyId> {
        self.calls.push(EngineCall::ApplicablePolicies(worker));

        if let Some(pinned) = self.overrides.get(&worker) {
            return pinned.iter().copied().take(max).collect();
        }

        let Some(record) = self.workers.get(&worker) else {
            return Vec::new();
        };
        self.policies
            .iter()
            .filter(|p| match &p.scope {
                Some(scope) => *scope == record.info.name,
                None => true,
            })
            .map(|p| p.id)
            .take(max)
            .collect()
    }

    fn create_policy(&mut self, name: &str) -> Result<PolicyId, EngineError> {
        self.calls.push(EngineCall::CreatePolicy(name.to_string()));
        if self.policy_by_name(name).is_some() {
            return Err(EngineError::PolicyExists(name.to_string()));
        }

        let id = PolicyId(self.next_policy);
        self.next_policy += 1;
        self.policies.push(PolicyRecord {
            id,
            name: name.to_string(),
            scope: None,
            secrets: Vec::new(),
        });
        self.epoch += 1;
        Ok(id)
    }

    fn policy_by_name(&self, name: &str) -> Option<PolicyId> {
        self.policies.iter().find(|p| p.name == name).map(|p| p.id)
    }

    fn render_config(&mut self, worker: WorkerId, policy: PolicyId) -> Result<NodeId, EngineError> {
        self.calls.push(EngineCall::RenderConfig(worker, policy));
        let secrets = self.policy(policy)?.secrets.clone();
        let record = self.record(worker)?;
        let info = record.info.clone();
        if let Some(previous) = record.config.take() {
            self.tree
                .remove_subtree(previous)
                .map_err(|e| EngineError::Transition(e.to_string()))?;
        }

        let root_name = match info.kind {
            WorkerKind::Netdev => "interface",
            WorkerKind::Modem => "modem",
        };
        let root = self.tree.add_root(root_name);
        let name = self
            .tree
            .add_child(root, "name")
            .map_err(|e| EngineError::Transition(e.to_string()))?;
        self.tree
            .set_cdata(name, &info.name)
            .map_err(|e| EngineError::Transition(e.to_string()))?;
        for (path, _) in &secrets {
            self.tree
                .ensure_path(root, path)
                .map_err(|e| EngineError::Transition(e.to_string()))?;
        }

        self.record(worker)?.config = Some(root);
        Ok(root)
    }

    fn apply_policy(
        &mut self,
        worker: WorkerId,
        policy: PolicyId,
        prompt: &mut dyn PromptHandler,
    ) -> Result<(), EngineError> {
        self.calls.push(EngineCall::ApplyPolicy(worker, policy));
        let secrets = self.policy(policy)?.secrets.clone();
        let record = self.record(worker)?;
        if record.info.dead {
            return Err(EngineError::Transition(format!(
                "{} has gone away",
                record.info.name
            )));
        }
        let name = record.info.name.clone();
        let rendered = record.config;
        let root = match rendered {
            Some(root) => root,
            None => self.render_config(worker, policy)?,
        };
        if self.failing.contains(&worker) {
            return Err(EngineError::Transition(format!(
                "{}: transition rejected",
                name
            )));
        }

        self.record(worker)?.running = true;
        for (path, kind) in secrets {
            let node = self
                .tree
                .ensure_path(root, &path)
                .map_err(|e| EngineError::Transition(e.to_string()))?;
            if self.tree.cdata(node).is_some() {
                continue;
            }
            let request = Prompt {
                kind,
                string: path.clone(),
                id: format!("{}:{}", name, path),
            };
            if let Err(source) = prompt.prompt(&request, &mut self.tree, node) {
                self.record(worker)?.running = false;
                return Err(EngineError::Prompt { path, source });
            }
        }

        let record = self.record(worker)?;
        record.running = false;
        record.active = Some(policy);
        Ok(())
    }

    fn destroy_worker(&mut self, worker: WorkerId) {
        self.calls.push(EngineCall::DestroyWorker(worker));
        if let Some(root) = self.workers.remove(&worker).and_then(|r| r.config) {
            let _ = self.tree.remove_subtree(root);
        }
        self.overrides.remove(&worker);
    }
}
