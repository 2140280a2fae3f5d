// Answers value requests the engine raises while applying a policy.
//
// The node needing a value sits somewhere below the configuration rendered
// for one of our devices. Walking up the parent chain finds that device and
// yields the node's path relative to it, e.g. `/modem/auth/pin`. The pair
// (device security id, path) is then looked up in the secret store.

use crate::internal::device::registry::{DeviceRegistry, ManagedDevice};
use crate::internal::fsm::engine::{Prompt, PromptHandler};
use crate::internal::mem::store::SecretStore;
use crate::internal::tree::node::{ConfigTree, NodeId, TreeError};

pub struct PromptResolver<'a> {
    devices: &'a DeviceRegistry,
    secrets: &'a SecretStore,
}

impl<'a> PromptResolver<'a> {
    pub fn new(devices: &'a DeviceRegistry, secrets: &'a SecretStore) -> Self {
        Self { devices, secrets }
    }

    // Find the device owning `node` and the node's path from that device's
    // configuration root (root name included).
    pub fn identify_owner(
        &self,
        tree: &ConfigTree,
        node: NodeId,
    ) -> Option<(&'a ManagedDevice, String)> {
        let mut names = Vec::new();
        let mut current = Some(node);

        while let Some(id) = current {
            names.push(tree.name(id)?);
            if let Some(device) = self.devices.owner_of_config(id) {
                let path = names.iter().rev().fold(String::new(), |mut acc, name| {
                    acc.push('/');
                    acc.push_str(name);
                    acc
                });
                return Some((device, path));
            }
            current = tree.parent(id);
        }
        None
    }

    pub fn resolve(&self, tree: &mut ConfigTree, node: NodeId) -> Result<(), PromptError> {
        let (device, path) = self
            .identify_owner(tree, node)
            .ok_or(PromptError::DeviceNotIdentified)?;

        let security_id = device.security_id.as_deref().ok_or_else(|| {
            tracing::error!(
                "{}: no security id set, cannot handle prompt for \"{}\"",
                device.name,
                path
            );
            PromptError::NoSecurityId(device.name.clone())
        })?;

        let Some(value) = self.secrets.get(security_id, &path) else {
            // Needs an out-of-band answer; a later addSecret reschedules the device.
            tracing::info!(
                "{}: prompting for id={} path={}",
                device.name,
                security_id,
                path
            );
            return Err(PromptError::SecretUnavailable {
                device: device.name.clone(),
                security_id: security_id.to_string(),
                path,
            });
        };

        tree.set_cdata(node, value.expose())?;
        Ok(())
    }
}

impl PromptHandler for PromptResolver<'_> {
    fn prompt(
        &mut self,
        prompt: &Prompt,
        tree: &mut ConfigTree,
        node: NodeId,
    ) -> Result<(), PromptError> {
        tracing::trace!(
            "prompt: type={:?} string={} id={}",
            prompt.kind,
            prompt.string,
            prompt.id
        );
        let result = self.resolve(tree, node);
        if let Err(PromptError::DeviceNotIdentified) = result {
            tracing::error!("prompt {}: unable to identify device owning this config", prompt.id);
        }
        result
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("Unable to identify device owning this configuration")]
    DeviceNotIdentified,
    #[error("{0}: no security id set")]
    NoSecurityId(String),
    #[error("{device}: no secret for {security_id} at {path}")]
    SecretUnavailable {
        device: String,
        security_id: String,
        path: String,
    },
    #[error(transparent)]
    Tree(#[from] TreeError),
}
