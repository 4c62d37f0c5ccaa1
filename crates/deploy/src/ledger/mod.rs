//! The ledger capability the orchestrator is driven against.
//!
//! The orchestrator never talks to a node directly: it builds [`LedgerRequest`]s,
//! hands them to a [`Ledger`], and waits for the resulting [`Receipt`]. Two
//! implementations are provided:
//! - [`RpcLedger`]: JSON-RPC against an Ethereum-compatible node.
//! - [`SimulatedLedger`]: in-memory naming-registry semantics, used for dry runs
//!   and tests.

mod rpc;
mod simulated;

use std::future::Future;

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, B256, FixedBytes, keccak256},
};
use derive_more::Display;
use serde::{Deserialize, Serialize};

pub use rpc::RpcLedger;
pub use simulated::SimulatedLedger;

use crate::{error::Result, namehash::NodeId};

/// Four-byte interface identifier (ERC-165).
pub type InterfaceId = FixedBytes<4>;

/// A contract creation.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateRequest {
    /// Logical component name, for logs and error messages.
    pub name: String,
    /// Contract artifact to instantiate.
    pub contract: String,
    /// Constructor arguments, already resolved.
    pub args: Vec<DynSolValue>,
    /// Library name to deployed library address.
    pub libraries: Vec<(String, Address)>,
}

/// State-mutating calls issued while wiring the naming tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum LedgerCall {
    #[display("setSubnodeOwner({node}, {label}, {owner})")]
    SetSubnodeOwner {
        node: NodeId,
        label: B256,
        owner: Address,
    },
    #[display("setResolver({node}, {resolver})")]
    SetResolver { node: NodeId, resolver: Address },
    #[display("setInterface({node}, {interface_id}, {implementer})")]
    SetInterface {
        node: NodeId,
        interface_id: InterfaceId,
        implementer: Address,
    },
    #[display("addController({controller})")]
    AddController { controller: Address },
}

impl LedgerCall {
    /// Solidity signature of the called function.
    pub fn signature(&self) -> &'static str {
        match self {
            Self::SetSubnodeOwner { .. } => "setSubnodeOwner(bytes32,bytes32,address)",
            Self::SetResolver { .. } => "setResolver(bytes32,address)",
            Self::SetInterface { .. } => "setInterface(bytes32,bytes4,address)",
            Self::AddController { .. } => "addController(address)",
        }
    }

    /// Short name of the called function.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetSubnodeOwner { .. } => "setSubnodeOwner",
            Self::SetResolver { .. } => "setResolver",
            Self::SetInterface { .. } => "setInterface",
            Self::AddController { .. } => "addController",
        }
    }

    fn params(&self) -> Vec<DynSolValue> {
        match *self {
            Self::SetSubnodeOwner { node, label, owner } => vec![
                DynSolValue::FixedBytes(node, 32),
                DynSolValue::FixedBytes(label, 32),
                DynSolValue::Address(owner),
            ],
            Self::SetResolver { node, resolver } => vec![
                DynSolValue::FixedBytes(node, 32),
                DynSolValue::Address(resolver),
            ],
            Self::SetInterface {
                node,
                interface_id,
                implementer,
            } => vec![
                DynSolValue::FixedBytes(node, 32),
                DynSolValue::FixedBytes(B256::right_padding_from(interface_id.as_slice()), 4),
                DynSolValue::Address(implementer),
            ],
            Self::AddController { controller } => vec![DynSolValue::Address(controller)],
        }
    }

    /// ABI-encoded call data (selector followed by the parameters).
    pub fn abi_encode(&self) -> Vec<u8> {
        encode_call(self.signature(), self.params())
    }
}

/// Encode a call to `signature` with the given parameters.
pub(crate) fn encode_call(signature: &str, params: Vec<DynSolValue>) -> Vec<u8> {
    let mut data = keccak256(signature.as_bytes())[..4].to_vec();
    data.extend(DynSolValue::Tuple(params).abi_encode_params());
    data
}

/// A state-mutating call against a deployed contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallRequest {
    pub to: Address,
    pub call: LedgerCall,
}

/// Anything that can be submitted to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerRequest {
    Create(CreateRequest),
    Call(CallRequest),
}

/// Handle on a submitted, not yet confirmed, operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{tx_hash}")]
pub struct PendingHandle {
    pub tx_hash: B256,
}

/// Outcome of a confirmed operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: B256,
    pub block_number: u64,
    /// Whether the operation executed successfully. `false` means it reverted.
    pub success: bool,
    /// Address of the created contract, for creations.
    pub contract_address: Option<Address>,
    /// Revert reason, when the ledger reports one.
    pub revert_reason: Option<String>,
}

/// Submission and confirmation capability of a ledger.
///
/// Submitting is not idempotent: every accepted [`LedgerRequest::Create`]
/// creates a new contract, so callers must not retry blindly.
pub trait Ledger: Send + Sync {
    /// Identity that signs every submitted operation.
    fn deployer(&self) -> Address;

    /// Submit a request, returning as soon as the ledger accepted it.
    fn submit(&self, request: LedgerRequest) -> impl Future<Output = Result<PendingHandle>> + Send;

    /// Wait until the operation behind `handle` is confirmed (or reverted).
    ///
    /// This may wait forever; callers bound it with their own timeout.
    fn await_confirmation(
        &self,
        handle: PendingHandle,
    ) -> impl Future<Output = Result<Receipt>> + Send;

    /// Read the current owner of `node` in the naming registry at `registry`.
    fn owner(
        &self,
        registry: Address,
        node: NodeId,
    ) -> impl Future<Output = Result<Address>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namehash::{ROOT_NODE, label_hash};

    #[test]
    fn test_selectors_match_known_values() {
        let call = LedgerCall::SetSubnodeOwner {
            node: ROOT_NODE,
            label: label_hash("btc"),
            owner: Address::ZERO,
        };
        assert_eq!(hex::encode(&call.abi_encode()[..4]), "06ab5923");

        let call = LedgerCall::SetResolver {
            node: ROOT_NODE,
            resolver: Address::ZERO,
        };
        assert_eq!(hex::encode(&call.abi_encode()[..4]), "1896f70a");
    }

    #[test]
    fn test_call_data_is_word_aligned() {
        let call = LedgerCall::SetInterface {
            node: ROOT_NODE,
            interface_id: InterfaceId::from([0x01, 0x8f, 0xac, 0x06]),
            implementer: Address::repeat_byte(0xaa),
        };
        let data = call.abi_encode();

        assert_eq!(data.len(), 4 + 3 * 32);
        // bytes4 is left-aligned in its word.
        assert_eq!(&data[4 + 32..4 + 36], &[0x01, 0x8f, 0xac, 0x06]);
        assert_eq!(&data[4 + 76..], Address::repeat_byte(0xaa).as_slice());
    }

    #[test]
    fn test_add_controller_encoding() {
        let call = LedgerCall::AddController {
            controller: Address::repeat_byte(0x11),
        };
        let data = call.abi_encode();
        assert_eq!(hex::encode(&data[..4]), "a7fc7a07");
        assert_eq!(data.len(), 36);
    }
}
