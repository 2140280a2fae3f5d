use crate::internal::fsm::engine::{PolicyId, WorkerId};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "class", content = "id", rename_all = "lowercase")]
pub enum ObjectRef {
    Manager,
    Interface(WorkerId),
    Modem(WorkerId),
    Policy(PolicyId),
}

#[derive(Debug, Default)]
pub struct ObjectTable {
    objects: BTreeMap<String, ObjectRef>,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self::default()
    }

    // An occupied path is never taken over; the caller must revoke first.
    pub fn expose(&mut self, path: &str, object: ObjectRef) -> Result<(), ObjectError> {
        if let Some(existing) = self.objects.get(path) {
            tracing::warn!("cannot expose {:?} at {}: held by {:?}", object, path, existing);
            return Err(ObjectError::PathInUse(path.to_string()));
        }
        tracing::debug!("exposing {} as {:?}", path, object);
        self.objects.insert(path.to_string(), object);
        Ok(())
    }

    pub fn revoke(&mut self, path: &str) -> Option<ObjectRef> {
        let removed = self.objects.remove(path);
        if removed.is_some() {
            tracing::debug!("revoked {}", path);
        }
        removed
    }

    pub fn get(&self, path: &str) -> Option<ObjectRef> {
        self.objects.get(path).copied()
    }

    pub fn paths(&self) -> Vec<String> {
        self.objects.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ObjectError {
    #[error("Object path {0} is already in use")]
    PathInUse(String),
}
