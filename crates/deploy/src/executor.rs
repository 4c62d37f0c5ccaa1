//! Deployment of a single component.

use std::time::Duration;

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, U256},
};
use tokio_util::sync::CancellationToken;

use crate::{
    descriptor::{ComponentDescriptor, ConstructorArg},
    error::{DeployError, Result},
    ledger::{CreateRequest, Ledger, LedgerRequest},
    namehash::path_hash,
    propagation::{confirm, ensure_not_cancelled},
    registry::{ConfirmationStatus, DeployedResource, ResourceRegistry},
};

/// Creates components on the ledger and records them in the registry.
///
/// A creation is never retried: resubmitting after a transient failure may
/// leave a second contract on the ledger.
#[derive(Debug)]
pub struct DeploymentExecutor<'a, L> {
    ledger: &'a L,
    confirmation_timeout: Duration,
    cancel: CancellationToken,
}

impl<'a, L: Ledger> DeploymentExecutor<'a, L> {
    pub fn new(ledger: &'a L, confirmation_timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            ledger,
            confirmation_timeout,
            cancel,
        }
    }

    /// Deploy `descriptor`, resolving its dependencies from `registry`, and
    /// record the result there.
    pub async fn deploy(
        &self,
        descriptor: &ComponentDescriptor,
        registry: &mut ResourceRegistry,
    ) -> Result<Address> {
        let name = descriptor.name.as_str();
        if registry.contains(name) {
            return Err(DeployError::DuplicateName {
                name: name.to_string(),
            });
        }

        let request = CreateRequest {
            name: name.to_string(),
            contract: descriptor.contract_name().to_string(),
            args: resolve_args(&descriptor.args, registry, self.ledger.deployer())?,
            libraries: descriptor
                .libraries
                .iter()
                .map(|link| -> Result<(String, Address)> {
                    Ok((link.library.clone(), registry.address(&link.component)?))
                })
                .collect::<Result<_>>()?,
        };

        tracing::info!(
            component = name,
            contract = %request.contract,
            dependencies = ?descriptor.dependencies(),
            "Deploying component"
        );

        let failed = |reason: String| DeployError::DeploymentFailed {
            name: name.to_string(),
            reason,
        };

        let operation = format!("creation of {name}");
        ensure_not_cancelled(&self.cancel, &operation)?;

        let handle = match self.ledger.submit(LedgerRequest::Create(request)).await {
            Ok(handle) => handle,
            Err(DeployError::Ledger(e)) => return Err(failed(format!("{e:#}"))),
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
            return Err(failed(
                receipt
                    .revert_reason
                    .unwrap_or_else(|| "creation reverted".to_string()),
            ));
        }

        let address = receipt
            .contract_address
            .ok_or_else(|| failed("receipt carries no contract address".to_string()))?;

        registry.put(DeployedResource {
            name: name.to_string(),
            address,
            status: ConfirmationStatus::Confirmed {
                tx_hash: receipt.tx_hash,
                block_number: receipt.block_number,
            },
        })?;

        tracing::info!(component = name, address = %address, tx_hash = %receipt.tx_hash, "Component deployed");
        Ok(address)
    }
}

/// Turn declared constructor arguments into ABI values.
pub fn resolve_args(
    args: &[ConstructorArg],
    registry: &ResourceRegistry,
    deployer: Address,
) -> Result<Vec<DynSolValue>> {
    args.iter()
        .map(|arg| -> Result<DynSolValue> {
            Ok(match arg {
                ConstructorArg::Uint(value) => DynSolValue::Uint(*value, 256),
                ConstructorArg::Address(address) => DynSolValue::Address(*address),
                ConstructorArg::Node(path) => DynSolValue::FixedBytes(path_hash(path), 32),
                ConstructorArg::Deployer => DynSolValue::Address(deployer),
                ConstructorArg::Component(name) => DynSolValue::Address(registry.address(name)?),
            })
        })
        .collect()
}

/// Human-readable form of a declared argument, for plan listings.
pub fn describe_arg(arg: &ConstructorArg) -> String {
    match arg {
        ConstructorArg::Uint(value) if *value <= U256::from(u64::MAX) => value.to_string(),
        ConstructorArg::Uint(value) => format!("{value:#x}"),
        ConstructorArg::Address(address) => address.to_string(),
        ConstructorArg::Node(path) => format!("node({path})"),
        ConstructorArg::Deployer => "deployer".to_string(),
        ConstructorArg::Component(name) => format!("@{name}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::SimulatedLedger;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_deploy_records_resource() {
        let ledger = SimulatedLedger::default();
        let executor = DeploymentExecutor::new(&ledger, TIMEOUT, CancellationToken::new());
        let mut registry = ResourceRegistry::new();

        let address = executor
            .deploy(&ComponentDescriptor::new("ENSRegistry"), &mut registry)
            .await
            .unwrap();

        assert_eq!(registry.address("ENSRegistry").unwrap(), address);
        assert_eq!(ledger.contract_at(address).await.as_deref(), Some("ENSRegistry"));
    }

    #[tokio::test]
    async fn test_dependency_address_is_passed_to_constructor() {
        let ledger = SimulatedLedger::default();
        let executor = DeploymentExecutor::new(&ledger, TIMEOUT, CancellationToken::new());
        let mut registry = ResourceRegistry::new();

        let ens = executor
            .deploy(&ComponentDescriptor::new("ENSRegistry"), &mut registry)
            .await
            .unwrap();
        let args = resolve_args(
            &[ConstructorArg::Component("ENSRegistry".to_string())],
            &registry,
            ledger.deployer(),
        )
        .unwrap();

        assert_eq!(args, [DynSolValue::Address(ens)]);
    }

    #[tokio::test]
    async fn test_unresolved_dependency_submits_nothing() {
        let ledger = SimulatedLedger::default();
        let executor = DeploymentExecutor::new(&ledger, TIMEOUT, CancellationToken::new());
        let mut registry = ResourceRegistry::new();

        let err = executor
            .deploy(
                &ComponentDescriptor::new("PublicResolver").depends_on("ENSRegistry"),
                &mut registry,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::UnresolvedDependency { .. }));
        assert_eq!(ledger.contract_count().await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_name_submits_nothing() {
        let ledger = SimulatedLedger::default();
        let executor = DeploymentExecutor::new(&ledger, TIMEOUT, CancellationToken::new());
        let mut registry = ResourceRegistry::new();
        let descriptor = ComponentDescriptor::new("ENSRegistry");

        let first = executor.deploy(&descriptor, &mut registry).await.unwrap();
        let err = executor.deploy(&descriptor, &mut registry).await.unwrap_err();

        assert!(matches!(err, DeployError::DuplicateName { .. }));
        assert_eq!(ledger.contract_count().await, 1);
        assert_eq!(registry.address("ENSRegistry").unwrap(), first);
    }

    #[tokio::test]
    async fn test_reverted_creation_is_deployment_failure() {
        let ledger = SimulatedLedger::default();
        ledger.fail_deployment_of("StablePriceOracle").await;
        let executor = DeploymentExecutor::new(&ledger, TIMEOUT, CancellationToken::new());
        let mut registry = ResourceRegistry::new();

        let err = executor
            .deploy(&ComponentDescriptor::new("StablePriceOracle"), &mut registry)
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::DeploymentFailed { name, .. } if name == "StablePriceOracle"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_refused_submission_is_deployment_failure() {
        let ledger = SimulatedLedger::default();
        ledger.reject_submission_of("ENSRegistry").await;
        let executor = DeploymentExecutor::new(&ledger, TIMEOUT, CancellationToken::new());
        let mut registry = ResourceRegistry::new();

        let err = executor
            .deploy(&ComponentDescriptor::new("ENSRegistry"), &mut registry)
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::DeploymentFailed { reason, .. } if reason.contains("refused")));
    }

    #[tokio::test]
    async fn test_stalled_confirmation_times_out() {
        let ledger = SimulatedLedger::default();
        ledger.stall_confirmations().await;
        let executor =
            DeploymentExecutor::new(&ledger, Duration::from_millis(20), CancellationToken::new());
        let mut registry = ResourceRegistry::new();

        let err = executor
            .deploy(&ComponentDescriptor::new("ENSRegistry"), &mut registry)
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::ConfirmationTimeout { .. }));
        assert!(err.pending_tx().is_some());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_executor_submits_nothing() {
        let ledger = SimulatedLedger::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let executor = DeploymentExecutor::new(&ledger, TIMEOUT, cancel);
        let mut registry = ResourceRegistry::new();

        let err = executor
            .deploy(&ComponentDescriptor::new("ENSRegistry"), &mut registry)
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::Cancelled { tx_hash: None, .. }));
        assert_eq!(ledger.contract_count().await, 0);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_constructor_receives_resolved_args() {
        let ledger = SimulatedLedger::default();
        let executor = DeploymentExecutor::new(&ledger, TIMEOUT, CancellationToken::new());
        let mut registry = ResourceRegistry::new();

        let ens = executor
            .deploy(&ComponentDescriptor::new("ENSRegistry"), &mut registry)
            .await
            .unwrap();
        let resolver = executor
            .deploy(
                &ComponentDescriptor::new("PublicResolver")
                    .depends_on("ENSRegistry")
                    .uint(7),
                &mut registry,
            )
            .await
            .unwrap();

        assert_eq!(
            ledger.constructor_args(resolver).await.unwrap(),
            [
                DynSolValue::Address(ens),
                DynSolValue::Uint(U256::from(7), 256)
            ]
        );
    }

    #[test]
    fn test_describe_arg() {
        assert_eq!(describe_arg(&ConstructorArg::Uint(U256::from(60))), "60");
        assert_eq!(describe_arg(&ConstructorArg::Node("btc".to_string())), "node(btc)");
        assert_eq!(
            describe_arg(&ConstructorArg::Component("ENSRegistry".to_string())),
            "@ENSRegistry"
        );
    }
}
