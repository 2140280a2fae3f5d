// Boundary to the policy engine that owns workers, policies and the
// configuration transitions. The manager only decides what to apply and
// delegates the work through this trait.

use crate::internal::prompt::resolver::PromptError;
use crate::internal::tree::node::{ConfigTree, NodeId};
use serde::{Deserialize, Serialize};
use std::fmt;

// Identity of an engine-owned worker (one interface or modem).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(pub u32);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PolicyId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerKind {
    Netdev,
    Modem,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub name: String,
    pub kind: WorkerKind,
    pub ifindex: u32,
    pub security_id: Option<String>,
    pub dead: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptKind {
    Password,
    User,
    Pin,
}

// Descriptor the engine attaches to a value request. Informational only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub kind: PromptKind,
    pub string: String,
    pub id: String,
}

// Capability the engine calls when a transition needs a value that is not
// present in the configuration document.
pub trait PromptHandler {
    fn prompt(
        &mut self,
        prompt: &Prompt,
        tree: &mut ConfigTree,
        node: NodeId,
    ) -> Result<(), PromptError>;
}

pub trait Engine: Send {
    fn refresh_state(&mut self) -> Result<(), EngineError>;

    // Monotonic counter advanced whenever the policy set changes.
    fn policy_epoch(&self) -> u64;

    fn worker_info(&self, worker: WorkerId) -> Option<WorkerInfo>;

    fn worker_by_name(&self, kind: WorkerKind, name: &str) -> Option<WorkerId>;

    // True while a transition is executing for this worker.
    fn is_running(&self, worker: WorkerId) -> bool;

    // Up to `max` applicable policies, in the engine's own priority order.
    fn applicable_policies(&mut self, worker: WorkerId, max: usize) -> Vec<PolicyId>;

    fn create_policy(&mut self, name: &str) -> Result<PolicyId, EngineError>;

    fn policy_by_name(&self, name: &str) -> Option<PolicyId>;

    // Render the policy's configuration for `worker`; returns the root of
    // the selected configuration subtree.
    fn render_config(&mut self, worker: WorkerId, policy: PolicyId) -> Result<NodeId, EngineError>;

    // Run the transition that brings `worker` to `policy`. Re-applying the
    // active policy must be harmless.
    fn apply_policy(
        &mut self,
        worker: WorkerId,
        policy: PolicyId,
        prompt: &mut dyn PromptHandler,
    ) -> Result<(), EngineError>;

    fn destroy_worker(&mut self, worker: WorkerId);
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Unknown worker: {0}")]
    UnknownWorker(WorkerId),
    #[error("Unknown policy: {0:?}")]
    UnknownPolicy(PolicyId),
    #[error("Policy {0} already exists")]
    PolicyExists(String),
    #[error("Prompt for {path} failed: {source}")]
    Prompt {
        path: String,
        #[source]
        source: PromptError,
    },
    #[error("Transition failed: {0}")]
    Transition(String),
}
