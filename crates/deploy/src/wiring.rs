//! Ownership and binding assignments in the naming tree.
//!
//! Every assignment is submitted as the orchestrator's identity and the ledger
//! enforces authority: the sender must own the parent node (subnode
//! assignment) or the node itself (bindings). Ancestors therefore have to be
//! assigned to the orchestrator before their descendants are touched.

use std::time::Duration;

use alloy_core::primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{DeployError, Result},
    ledger::{CallRequest, InterfaceId, Ledger, LedgerCall, LedgerRequest},
    namehash::{NodeId, join_path, label_hash, path_hash, subnode},
    propagation::{confirm, ensure_not_cancelled},
};

/// Kind of assignment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum AssignmentRole {
    Ownership,
    Resolver,
    Interface,
    Controller,
}

/// An assignment confirmed on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub role: AssignmentRole,
    /// Naming path the assignment applies to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeId>,
    /// Contract the assignment was issued against.
    pub target: Address,
    /// Identifier assigned (owner, resolver, implementer or controller).
    pub assigned: Address,
    pub tx_hash: B256,
    pub block_number: u64,
}

/// Issues assignments against one naming registry.
#[derive(Debug)]
pub struct NamingWiring<'a, L> {
    ledger: &'a L,
    registry: Address,
    confirmation_timeout: Duration,
    cancel: CancellationToken,
    precheck_authority: bool,
}

impl<'a, L: Ledger> NamingWiring<'a, L> {
    pub fn new(
        ledger: &'a L,
        registry: Address,
        confirmation_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            ledger,
            registry,
            confirmation_timeout,
            cancel,
            precheck_authority: false,
        }
    }

    /// Read ownership before submitting and fail fast if the orchestrator lacks authority.
    pub fn precheck_authority(mut self, enabled: bool) -> Self {
        self.precheck_authority = enabled;
        self
    }

    pub fn registry(&self) -> Address {
        self.registry
    }

    /// Make `owner` the owner of `label` under `parent`.
    pub async fn assign_subnode(
        &self,
        parent: &str,
        label: &str,
        owner: Address,
    ) -> Result<AssignmentRecord> {
        let parent_node = path_hash(parent);
        let path = join_path(parent, label);
        self.ensure_authority("setSubnodeOwner", parent_node).await?;

        let call = LedgerCall::SetSubnodeOwner {
            node: parent_node,
            label: label_hash(label),
            owner,
        };
        let record = self
            .execute(self.registry, call, AssignmentRole::Ownership, Some(path), owner)
            .await?;
        Ok(record)
    }

    /// Point `path` at `resolver`.
    pub async fn bind_resolver(&self, path: &str, resolver: Address) -> Result<AssignmentRecord> {
        let node = path_hash(path);
        self.ensure_authority("setResolver", node).await?;

        let call = LedgerCall::SetResolver { node, resolver };
        self.execute(
            self.registry,
            call,
            AssignmentRole::Resolver,
            Some(path.to_string()),
            resolver,
        )
        .await
    }

    /// Register `implementer` for `interface_id` of `path` on a resolver contract.
    pub async fn bind_interface(
        &self,
        resolver: Address,
        path: &str,
        interface_id: InterfaceId,
        implementer: Address,
    ) -> Result<AssignmentRecord> {
        let node = path_hash(path);
        self.ensure_authority("setInterface", node).await?;

        let call = LedgerCall::SetInterface {
            node,
            interface_id,
            implementer,
        };
        self.execute(
            resolver,
            call,
            AssignmentRole::Interface,
            Some(path.to_string()),
            implementer,
        )
        .await
    }

    /// Authorize `controller` on a registrar-like resource.
    pub async fn authorize_controller(
        &self,
        resource: Address,
        controller: Address,
    ) -> Result<AssignmentRecord> {
        let call = LedgerCall::AddController { controller };
        self.execute(resource, call, AssignmentRole::Controller, None, controller)
            .await
    }

    async fn ensure_authority(&self, operation: &str, node: NodeId) -> Result<()> {
        if !self.precheck_authority {
            return Ok(());
        }

        let owner = self.ledger.owner(self.registry, node).await?;
        if owner != self.ledger.deployer() {
            tracing::warn!(operation, node = %node, owner = %owner, "Orchestrator does not own node");
            return Err(DeployError::not_owner(operation, self.registry, node, owner));
        }
        Ok(())
    }

    async fn execute(
        &self,
        target: Address,
        call: LedgerCall,
        role: AssignmentRole,
        path: Option<String>,
        assigned: Address,
    ) -> Result<AssignmentRecord> {
        let operation = call.to_string();
        let rejected = |reason: String| DeployError::AssignmentRejected {
            operation: call.name().to_string(),
            target,
            reason,
        };

        tracing::debug!(%role, target = %target, call = %operation, "Submitting assignment");
        ensure_not_cancelled(&self.cancel, &operation)?;

        let handle = match self
            .ledger
            .submit(LedgerRequest::Call(CallRequest { to: target, call }))
            .await
        {
            Ok(handle) => handle,
            Err(DeployError::Ledger(e)) => return Err(rejected(format!("{e:#}"))),
            Err(e) => return Err(e),
        };

        let receipt = confirm(
            self.ledger,
            handle,
            self.confirmation_timeout,
            &self.cancel,
            &operation,
        )
        .await?;

        if !receipt.success {
            return Err(rejected(
                receipt
                    .revert_reason
                    .unwrap_or_else(|| "reverted".to_string()),
            ));
        }

        tracing::info!(
            %role,
            path = path.as_deref().unwrap_or("-"),
            assigned = %assigned,
            tx_hash = %receipt.tx_hash,
            "Assignment confirmed"
        );

        Ok(AssignmentRecord {
            role,
            node: call_node(&call),
            path,
            target,
            assigned,
            tx_hash: receipt.tx_hash,
            block_number: receipt.block_number,
        })
    }
}

/// The node an assignment ends up affecting.
fn call_node(call: &LedgerCall) -> Option<NodeId> {
    match *call {
        LedgerCall::SetSubnodeOwner { node, label, .. } => Some(subnode(node, label)),
        LedgerCall::SetResolver { node, .. } | LedgerCall::SetInterface { node, .. } => Some(node),
        LedgerCall::AddController { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ledger::{CreateRequest, SimulatedLedger},
        namehash::ROOT_NODE,
    };

    const TIMEOUT: Duration = Duration::from_secs(5);

    async fn deploy(ledger: &SimulatedLedger, name: &str) -> Address {
        let handle = ledger
            .submit(LedgerRequest::Create(CreateRequest {
                name: name.to_string(),
                contract: name.to_string(),
                args: vec![],
                libraries: vec![],
            }))
            .await
            .unwrap();
        ledger
            .await_confirmation(handle)
            .await
            .unwrap()
            .contract_address
            .unwrap()
    }

    #[tokio::test]
    async fn test_assign_then_bind_resolver() {
        let ledger = SimulatedLedger::default();
        let registry = deploy(&ledger, "ENSRegistry").await;
        let resolver = deploy(&ledger, "PublicResolver").await;
        let wiring = NamingWiring::new(&ledger, registry, TIMEOUT, CancellationToken::new());

        let ownership = wiring
            .assign_subnode("", "example", ledger.deployer())
            .await
            .unwrap();
        assert_eq!(ownership.role, AssignmentRole::Ownership);
        assert_eq!(ownership.node, Some(path_hash("example")));
        assert_eq!(ownership.path.as_deref(), Some("example"));

        let binding = wiring.bind_resolver("example", resolver).await.unwrap();
        assert_eq!(binding.role, AssignmentRole::Resolver);
        assert_eq!(
            ledger.resolver(registry, path_hash("example")).await,
            Some(resolver)
        );
    }

    #[tokio::test]
    async fn test_assign_under_foreign_parent_is_rejected_without_state_change() {
        let ledger = SimulatedLedger::default();
        let registry = deploy(&ledger, "ENSRegistry").await;
        let stranger = Address::repeat_byte(0x42);
        let wiring = NamingWiring::new(&ledger, registry, TIMEOUT, CancellationToken::new());

        wiring.assign_subnode("", "btc", stranger).await.unwrap();

        let err = wiring
            .assign_subnode("btc", "alice", ledger.deployer())
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::AssignmentRejected { .. }));
        assert_eq!(
            ledger.current_owner(registry, path_hash("alice.btc")).await,
            Address::ZERO
        );
        assert_eq!(ledger.current_owner(registry, path_hash("btc")).await, stranger);
    }

    #[tokio::test]
    async fn test_precheck_fails_before_submitting() {
        let ledger = SimulatedLedger::default();
        let registry = deploy(&ledger, "ENSRegistry").await;
        let wiring = NamingWiring::new(&ledger, registry, TIMEOUT, CancellationToken::new())
            .precheck_authority(true);

        let err = wiring
            .bind_resolver("unowned", Address::repeat_byte(1))
            .await
            .unwrap_err();
        match err {
            DeployError::AssignmentRejected { operation, reason, .. } => {
                assert_eq!(operation, "setResolver");
                assert!(reason.contains("not the owner"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_authorize_controller_requires_contract_ownership() {
        let ledger = SimulatedLedger::default();
        let registry = deploy(&ledger, "ENSRegistry").await;
        let registrar = deploy(&ledger, "BaseRegistrarImplementation").await;
        let controller = Address::repeat_byte(0xcc);
        let wiring = NamingWiring::new(&ledger, registry, TIMEOUT, CancellationToken::new());

        let record = wiring
            .authorize_controller(registrar, controller)
            .await
            .unwrap();
        assert_eq!(record.role, AssignmentRole::Controller);
        assert_eq!(record.node, None);
        assert_eq!(ledger.controllers(registrar).await, [controller]);

        let err = wiring
            .authorize_controller(Address::repeat_byte(0xee), controller)
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::AssignmentRejected { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_wiring_submits_nothing() {
        let ledger = SimulatedLedger::default();
        let registry = deploy(&ledger, "ENSRegistry").await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let wiring = NamingWiring::new(&ledger, registry, TIMEOUT, cancel);

        let err = wiring
            .assign_subnode("", "btc", ledger.deployer())
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::Cancelled { tx_hash: None, .. }));
        assert_eq!(
            ledger.current_owner(registry, path_hash("btc")).await,
            Address::ZERO
        );
    }

    #[test]
    fn test_subnode_assignment_affects_child_node() {
        let call = LedgerCall::SetSubnodeOwner {
            node: path_hash("btc"),
            label: label_hash("alice"),
            owner: Address::ZERO,
        };
        assert_eq!(call_node(&call), Some(path_hash("alice.btc")));
    }

    #[tokio::test]
    async fn test_root_is_owned_by_registry_creator() {
        let ledger = SimulatedLedger::default();
        let registry = deploy(&ledger, "ENSRegistry").await;
        let wiring = NamingWiring::new(&ledger, registry, TIMEOUT, CancellationToken::new())
            .precheck_authority(true);

        assert_eq!(
            ledger.current_owner(registry, ROOT_NODE).await,
            ledger.deployer()
        );
        wiring
            .assign_subnode("", "reverse", ledger.deployer())
            .await
            .unwrap();
    }
}
