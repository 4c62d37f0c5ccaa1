//! Error taxonomy for a deployment run.
//!
//! Every variant is fatal to the run: the orchestrator never retries a
//! state-mutating ledger operation.

use std::time::Duration;

use alloy_core::primitives::{Address, B256};
use thiserror::Error;

/// Errors raised while planning, deploying or wiring components.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DeployError {
    /// A component name was recorded twice in the resource registry.
    #[error("component `{name}` is already present in the resource registry")]
    DuplicateName { name: String },

    /// A dependency was looked up before it was deployed.
    #[error("dependency `{name}` has not been deployed yet")]
    UnresolvedDependency { name: String },

    /// A descriptor references a component that the plan never defines.
    #[error("component `{component}` depends on `{dependency}`, which is not part of the plan")]
    UnknownDependency {
        component: String,
        dependency: String,
    },

    /// The dependency graph contains a cycle.
    #[error("dependency cycle between components: {}", members.join(", "))]
    DependencyCycle { members: Vec<String> },

    /// The plan itself is malformed (duplicate descriptors, bad wiring references...).
    #[error("invalid deployment plan: {reason}")]
    InvalidPlan { reason: String },

    /// The creation operation was rejected or reverted by the ledger.
    #[error("deployment of `{name}` failed: {reason}")]
    DeploymentFailed { name: String, reason: String },

    /// No confirmation was observed within the configured bound.
    ///
    /// `tx_hash` is set when the operation was already submitted, so its
    /// outcome can still be looked up on the ledger.
    #[error(
        "no confirmation for {operation} after {timeout:?}{}{}",
        pending_suffix(.tx_hash),
        read_error_suffix(.last_error)
    )]
    ConfirmationTimeout {
        operation: String,
        timeout: Duration,
        tx_hash: Option<B256>,
        /// Last failed read while polling, if any.
        last_error: Option<String>,
    },

    /// The ledger refused an assignment because the sender lacks authority.
    #[error("assignment `{operation}` rejected on {target}: {reason}")]
    AssignmentRejected {
        operation: String,
        target: Address,
        reason: String,
    },

    /// The run was cancelled before submitting, or while waiting on the ledger.
    #[error("run cancelled while waiting for {operation}{}", pending_suffix(.tx_hash))]
    Cancelled {
        operation: String,
        tx_hash: Option<B256>,
    },

    /// A compiled contract artifact could not be loaded or linked.
    #[error("artifact `{contract}`: {reason}")]
    Artifact { contract: String, reason: String },

    /// The underlying transport failed.
    #[error("ledger transport error: {0:#}")]
    Ledger(#[from] anyhow::Error),
}

impl DeployError {
    /// Builds an [`DeployError::AssignmentRejected`] for an authority failure on `node`.
    pub(crate) fn not_owner(operation: &str, target: Address, node: B256, owner: Address) -> Self {
        Self::AssignmentRejected {
            operation: operation.to_string(),
            target,
            reason: format!("sender is not the owner of node {node} (owner is {owner})"),
        }
    }

    /// Hash of a submitted operation whose outcome is unknown.
    pub fn pending_tx(&self) -> Option<B256> {
        match self {
            Self::ConfirmationTimeout { tx_hash, .. } | Self::Cancelled { tx_hash, .. } => *tx_hash,
            _ => None,
        }
    }
}

fn pending_suffix(tx_hash: &Option<B256>) -> String {
    tx_hash
        .map(|hash| format!(", transaction {hash} may still land"))
        .unwrap_or_default()
}

fn read_error_suffix(last_error: &Option<String>) -> String {
    last_error
        .as_ref()
        .map(|error| format!(" (last read error: {error})"))
        .unwrap_or_default()
}

/// Result alias used across the crate.
pub type Result<T, E = DeployError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_members() {
        let err = DeployError::DependencyCycle {
            members: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "dependency cycle between components: a, b");
    }

    #[test]
    fn test_timeout_message_names_pending_transaction_and_read_error() {
        let hash = B256::repeat_byte(0xab);
        let err = DeployError::ConfirmationTimeout {
            operation: "creation of ENSRegistry".to_string(),
            timeout: Duration::from_secs(1),
            tx_hash: Some(hash),
            last_error: Some("connection refused".to_string()),
        };

        assert_eq!(err.pending_tx(), Some(hash));
        let message = err.to_string();
        assert!(message.contains(&hash.to_string()));
        assert!(message.contains("last read error: connection refused"));
    }

    #[test]
    fn test_cancel_before_submission_has_no_pending_transaction() {
        let err = DeployError::Cancelled {
            operation: "creation of ENSRegistry".to_string(),
            tx_hash: None,
        };
        assert_eq!(err.pending_tx(), None);
        assert_eq!(err.to_string(), "run cancelled while waiting for creation of ENSRegistry");
    }

    #[test]
    fn test_transport_errors_convert_from_anyhow() {
        let err: DeployError = anyhow::anyhow!("connection refused").into();
        assert!(matches!(err, DeployError::Ledger(_)));
        assert!(err.to_string().contains("connection refused"));
    }
}
