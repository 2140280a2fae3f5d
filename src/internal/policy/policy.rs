use crate::internal::fsm::engine::{Engine, EngineError, PolicyId, WorkerId};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ManagedPolicy {
    pub policy: PolicyId,
    pub name: String,
    // Set when the policy only concerns one device.
    pub device: Option<WorkerId>,
    pub object_path: String,
}

#[derive(Debug, Default)]
pub struct PolicyRegistry {
    policies: Vec<ManagedPolicy>,
    counter: u64,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Create an engine policy and track it. An empty name picks the next
    // free `policyN`; the counter never goes backwards.
    pub fn create<E: Engine + ?Sized>(
        &mut self,
        engine: &mut E,
        name: &str,
        device: Option<WorkerId>,
        path_prefix: &str,
    ) -> Result<&ManagedPolicy, PolicyError> {
        let name = if name.is_empty() {
            self.next_free_name(engine)
        } else if name.contains('/') {
            // Names become a single object path element.
            return Err(PolicyError::InvalidName(name.to_string()));
        } else {
            name.to_string()
        };

        if self.is_taken(engine, &name) {
            return Err(PolicyError::Exists(name));
        }

        let policy = engine.create_policy(&name).map_err(|e| match e {
            EngineError::PolicyExists(name) => PolicyError::Exists(name),
            other => PolicyError::Engine(other),
        })?;

        tracing::info!("created policy {} ({:?})", name, policy);
        let object_path = format!("{}/Policy/{}", path_prefix, name);
        self.policies.push(ManagedPolicy {
            policy,
            name,
            device,
            object_path,
        });
        let created = self.policies.len() - 1;
        Ok(&self.policies[created])
    }

    fn next_free_name<E: Engine + ?Sized>(&mut self, engine: &E) -> String {
        loop {
            let candidate = format!("policy{}", self.counter);
            self.counter += 1;
            if !self.is_taken(engine, &candidate) {
                return candidate;
            }
        }
    }

    fn is_taken<E: Engine + ?Sized>(&self, engine: &E, name: &str) -> bool {
        self.by_name(name).is_some() || engine.policy_by_name(name).is_some()
    }

    pub fn get(&self, policy: PolicyId) -> Option<&ManagedPolicy> {
        self.policies.iter().find(|p| p.policy == policy)
    }

    pub fn by_name(&self, name: &str) -> Option<&ManagedPolicy> {
        self.policies.iter().find(|p| p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ManagedPolicy> {
        self.policies.iter()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("Policy \"{0}\" already exists")]
    Exists(String),
    #[error("Invalid policy name \"{0}\"")]
    InvalidName(String),
    #[error("Engine refused policy: {0}")]
    Engine(EngineError),
}
