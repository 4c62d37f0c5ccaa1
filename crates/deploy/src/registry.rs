//! Resource registry: logical component name to deployed address.

use alloy_core::primitives::{Address, B256};
use serde::{Deserialize, Serialize};

use crate::error::{DeployError, Result};

/// Confirmation status of a deployed resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ConfirmationStatus {
    /// The creation transaction landed in a block.
    Confirmed { tx_hash: B256, block_number: u64 },
}

/// A component that has been created on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedResource {
    /// Logical name of the component.
    pub name: String,
    /// Address of the created contract.
    pub address: Address,
    /// How the creation was confirmed.
    pub status: ConfirmationStatus,
}

/// Insertion-ordered map of deployed components.
///
/// A name is written at most once. The registry is owned by a single run and
/// filled sequentially.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRegistry {
    resources: Vec<DeployedResource>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a deployed resource. Fails if the name is already taken.
    pub fn put(&mut self, resource: DeployedResource) -> Result<()> {
        if self.contains(&resource.name) {
            return Err(DeployError::DuplicateName {
                name: resource.name,
            });
        }
        self.resources.push(resource);
        Ok(())
    }

    /// Look up a deployed resource by name.
    pub fn get(&self, name: &str) -> Result<&DeployedResource> {
        self.resources
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| DeployError::UnresolvedDependency {
                name: name.to_string(),
            })
    }

    /// Address of a deployed resource.
    pub fn address(&self, name: &str) -> Result<Address> {
        self.get(name).map(|r| r.address)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resources.iter().any(|r| r.name == name)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Resources in the order they were produced.
    pub fn iter(&self) -> impl Iterator<Item = &DeployedResource> {
        self.resources.iter()
    }
}

impl IntoIterator for ResourceRegistry {
    type Item = DeployedResource;
    type IntoIter = std::vec::IntoIter<DeployedResource>;

    fn into_iter(self) -> Self::IntoIter {
        self.resources.into_iter()
    }
}
