//! In-memory ledger with naming-registry semantics.
//!
//! Contracts get deterministic `CREATE` addresses derived from the deployer
//! and a nonce. Calls are executed at submission time and enforce the same
//! access control as the on-chain contracts:
//! - `setSubnodeOwner` / `setResolver`: the sender must own the parent node
//!   (resp. the node) in the target registry. The root is owned by the
//!   registry's creator.
//! - `setInterface`: the sender must own the node in the registry the resolver
//!   was constructed with.
//! - `addController`: the sender must have created the target contract.
//!
//! A reverted call leaves no trace besides its receipt.

use std::collections::{HashMap, HashSet};

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, B256, keccak256},
};
use tokio::sync::Mutex;

use super::{
    CallRequest, CreateRequest, InterfaceId, Ledger, LedgerCall, LedgerRequest, PendingHandle,
    Receipt,
};
use crate::{
    error::Result,
    namehash::{NodeId, ROOT_NODE, subnode},
};

#[derive(Debug, Clone)]
struct SimulatedContract {
    contract: String,
    creator: Address,
    /// Constructor arguments as submitted.
    args: Vec<DynSolValue>,
    /// First address constructor argument (the registry a resolver points at).
    linked_registry: Option<Address>,
}

/// A pending owner write that reads do not observe yet.
#[derive(Debug, Clone, Copy)]
struct StaleOwner {
    previous: Address,
    remaining_reads: u32,
}

#[derive(Debug, Default)]
struct State {
    nonce: u64,
    block_number: u64,
    contracts: HashMap<Address, SimulatedContract>,
    owners: HashMap<(Address, NodeId), Address>,
    resolvers: HashMap<(Address, NodeId), Address>,
    interfaces: HashMap<(Address, NodeId, InterfaceId), Address>,
    controllers: HashMap<Address, Vec<Address>>,
    receipts: HashMap<B256, Receipt>,
    stale_owners: HashMap<(Address, NodeId), StaleOwner>,
    submissions: u64,
}

impl State {
    fn owner_of(&self, registry: Address, node: NodeId) -> Address {
        if let Some(owner) = self.owners.get(&(registry, node)) {
            return *owner;
        }
        match (node == ROOT_NODE, self.contracts.get(&registry)) {
            (true, Some(contract)) => contract.creator,
            _ => Address::ZERO,
        }
    }

    fn next_tx_hash(&mut self) -> B256 {
        self.submissions += 1;
        keccak256(self.submissions.to_be_bytes())
    }

    fn execute_call(&mut self, sender: Address, request: CallRequest) -> Result<(), String> {
        let CallRequest { to, call } = request;
        if !self.contracts.contains_key(&to) {
            return Err(format!("no contract deployed at {to}"));
        }

        match call {
            LedgerCall::SetSubnodeOwner { node, label, owner } => {
                self.require_owner(sender, to, node)?;
                self.owners.insert((to, subnode(node, label)), owner);
                Ok(())
            }
            LedgerCall::SetResolver { node, resolver } => {
                self.require_owner(sender, to, node)?;
                self.resolvers.insert((to, node), resolver);
                Ok(())
            }
            LedgerCall::SetInterface {
                node,
                interface_id,
                implementer,
            } => {
                let registry = self
                    .contracts
                    .get(&to)
                    .and_then(|c| c.linked_registry)
                    .ok_or_else(|| format!("{to} is not bound to a naming registry"))?;
                self.require_owner(sender, registry, node)?;
                self.interfaces
                    .insert((to, node, interface_id), implementer);
                Ok(())
            }
            LedgerCall::AddController { controller } => {
                let creator = self.contracts.get(&to).map(|c| c.creator);
                if creator != Some(sender) {
                    return Err(format!("{sender} is not the owner of {to}"));
                }
                self.controllers.entry(to).or_default().push(controller);
                Ok(())
            }
        }
    }

    fn require_owner(&self, sender: Address, registry: Address, node: NodeId) -> Result<(), String> {
        let owner = self.owner_of(registry, node);
        if owner == sender {
            Ok(())
        } else {
            Err(format!("sender {sender} does not own node {node} (owner is {owner})"))
        }
    }
}

#[derive(Debug, Default)]
struct Faults {
    failing_contracts: HashSet<String>,
    rejected_submissions: HashSet<String>,
    stall_confirmations: bool,
    failing_reads: bool,
    propagation_lag: u32,
}

/// In-memory [`Ledger`].
#[derive(Debug)]
pub struct SimulatedLedger {
    deployer: Address,
    state: Mutex<State>,
    faults: Mutex<Faults>,
}

impl SimulatedLedger {
    /// Anvil's first default account.
    pub const DEFAULT_DEPLOYER: Address =
        alloy_core::primitives::address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

    pub fn new(deployer: Address) -> Self {
        Self {
            deployer,
            state: Mutex::new(State::default()),
            faults: Mutex::new(Faults::default()),
        }
    }

    /// Creations of the given logical component revert.
    pub async fn fail_deployment_of(&self, name: impl Into<String>) {
        self.faults.lock().await.failing_contracts.insert(name.into());
    }

    /// Submissions of the given logical component are refused outright.
    pub async fn reject_submission_of(&self, name: impl Into<String>) {
        self.faults
            .lock()
            .await
            .rejected_submissions
            .insert(name.into());
    }

    /// Confirmations never arrive.
    pub async fn stall_confirmations(&self) {
        self.faults.lock().await.stall_confirmations = true;
    }

    /// Owner reads fail, as with an unreachable node.
    pub async fn fail_reads(&self) {
        self.faults.lock().await.failing_reads = true;
    }

    /// Owner writes only become visible to reads after `reads` stale reads.
    pub async fn set_propagation_lag(&self, reads: u32) {
        self.faults.lock().await.propagation_lag = reads;
    }

    /// Current owner of `node` in `registry`, ignoring propagation lag.
    pub async fn current_owner(&self, registry: Address, node: NodeId) -> Address {
        self.state.lock().await.owner_of(registry, node)
    }

    pub async fn resolver(&self, registry: Address, node: NodeId) -> Option<Address> {
        self.state.lock().await.resolvers.get(&(registry, node)).copied()
    }

    pub async fn interface(
        &self,
        resolver: Address,
        node: NodeId,
        interface_id: InterfaceId,
    ) -> Option<Address> {
        self.state
            .lock()
            .await
            .interfaces
            .get(&(resolver, node, interface_id))
            .copied()
    }

    pub async fn controllers(&self, registrar: Address) -> Vec<Address> {
        self.state
            .lock()
            .await
            .controllers
            .get(&registrar)
            .cloned()
            .unwrap_or_default()
    }

    /// Name of the contract deployed at `address`, if any.
    pub async fn contract_at(&self, address: Address) -> Option<String> {
        self.state
            .lock()
            .await
            .contracts
            .get(&address)
            .map(|c| c.contract.clone())
    }

    /// Constructor arguments the contract at `address` was created with.
    pub async fn constructor_args(&self, address: Address) -> Option<Vec<DynSolValue>> {
        self.state
            .lock()
            .await
            .contracts
            .get(&address)
            .map(|c| c.args.clone())
    }

    pub async fn contract_count(&self) -> usize {
        self.state.lock().await.contracts.len()
    }

    fn create(&self, state: &mut State, request: &CreateRequest, fail: bool) -> Receipt {
        let tx_hash = state.next_tx_hash();
        state.block_number += 1;

        if fail {
            return Receipt {
                tx_hash,
                block_number: state.block_number,
                success: false,
                contract_address: None,
                revert_reason: Some(format!("constructor of {} reverted", request.contract)),
            };
        }

        let address = self.deployer.create(state.nonce);
        state.nonce += 1;
        state.contracts.insert(
            address,
            SimulatedContract {
                contract: request.contract.clone(),
                creator: self.deployer,
                args: request.args.clone(),
                linked_registry: request.args.iter().find_map(|arg| arg.as_address()),
            },
        );

        Receipt {
            tx_hash,
            block_number: state.block_number,
            success: true,
            contract_address: Some(address),
            revert_reason: None,
        }
    }
}

impl Default for SimulatedLedger {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DEPLOYER)
    }
}

impl Ledger for SimulatedLedger {
    fn deployer(&self) -> Address {
        self.deployer
    }

    async fn submit(&self, request: LedgerRequest) -> Result<PendingHandle> {
        let faults = self.faults.lock().await;
        let mut state = self.state.lock().await;

        let receipt = match &request {
            LedgerRequest::Create(create) => {
                if faults.rejected_submissions.contains(&create.name) {
                    return Err(anyhow::anyhow!(
                        "submission of {} refused by the node",
                        create.name
                    )
                    .into());
                }
                let fail = faults.failing_contracts.contains(&create.name);
                self.create(&mut state, create, fail)
            }
            LedgerRequest::Call(call) => {
                let previous = match call.call {
                    LedgerCall::SetSubnodeOwner { node, label, .. } => {
                        let child = subnode(node, label);
                        Some(((call.to, child), state.owner_of(call.to, child)))
                    }
                    _ => None,
                };

                let tx_hash = state.next_tx_hash();
                state.block_number += 1;
                let outcome = state.execute_call(self.deployer, *call);

                if let (Ok(()), Some((key, previous))) = (&outcome, previous) {
                    if faults.propagation_lag > 0 {
                        state.stale_owners.insert(
                            key,
                            StaleOwner {
                                previous,
                                remaining_reads: faults.propagation_lag,
                            },
                        );
                    }
                }

                Receipt {
                    tx_hash,
                    block_number: state.block_number,
                    success: outcome.is_ok(),
                    contract_address: None,
                    revert_reason: outcome.err(),
                }
            }
        };

        tracing::trace!(tx_hash = %receipt.tx_hash, success = receipt.success, "Simulated operation executed");

        let handle = PendingHandle {
            tx_hash: receipt.tx_hash,
        };
        state.receipts.insert(receipt.tx_hash, receipt);
        Ok(handle)
    }

    async fn await_confirmation(&self, handle: PendingHandle) -> Result<Receipt> {
        if self.faults.lock().await.stall_confirmations {
            std::future::pending::<()>().await;
        }

        self.state
            .lock()
            .await
            .receipts
            .get(&handle.tx_hash)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown transaction {}", handle.tx_hash).into())
    }

    async fn owner(&self, registry: Address, node: NodeId) -> Result<Address> {
        if self.faults.lock().await.failing_reads {
            return Err(anyhow::anyhow!("owner read unavailable").into());
        }

        let mut state = self.state.lock().await;

        if let Some(stale) = state.stale_owners.get_mut(&(registry, node)) {
            if stale.remaining_reads > 0 {
                stale.remaining_reads -= 1;
                return Ok(stale.previous);
            }
            state.stale_owners.remove(&(registry, node));
        }

        Ok(state.owner_of(registry, node))
    }
}
