//! Drives a full run: every component, then every wiring step, in order.

use alloy_core::primitives::{Address, B256};
use derive_more::Display;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{DeployError, Result},
    executor::DeploymentExecutor,
    ledger::Ledger,
    namehash::path_hash,
    plan::{OrchestrationPlan, Principal, WiringStep},
    propagation::{ConfirmationConfig, Expectation, PropagationConfig, PropagationPolicy},
    registry::{DeployedResource, ResourceRegistry},
    wiring::{AssignmentRecord, NamingWiring},
};

/// Where a run currently is. Indices are zero-based positions in the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunState {
    #[display("idle")]
    Idle,
    #[display("deploying component #{_0}")]
    Deploying(usize),
    #[display("wiring step #{_0}")]
    Wiring(usize),
    #[display("complete")]
    Complete,
    #[display("failed")]
    Failed,
}

/// Everything a run produced, in production order.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub state: RunState,
    pub resources: Vec<DeployedResource>,
    pub assignments: Vec<AssignmentRecord>,
}

/// A run stopped on its first error.
#[derive(Debug, Error)]
#[error("run failed while {failed_step} ({})", .last_completed.as_deref().unwrap_or("nothing completed"))]
pub struct RunFailure {
    #[source]
    pub error: DeployError,
    /// State the run was in when it failed.
    pub failed_step: RunState,
    /// Description of the last step that completed.
    pub last_completed: Option<String>,
    /// Transaction submitted by the failed step whose outcome is unknown.
    pub pending: Option<B256>,
    /// Partial progress. `state` is always [`RunState::Failed`].
    pub report: RunReport,
}

/// Tunables of a run.
#[derive(Debug, Clone, Default)]
pub struct RunSettings {
    pub confirmation: ConfirmationConfig,
    pub propagation: PropagationConfig,
    pub precheck_authority: bool,
}

/// Runs an [`OrchestrationPlan`] against a ledger.
///
/// The run is strictly sequential and stops on the first error. Nothing is
/// rolled back: the failure carries everything confirmed so far.
#[derive(Debug)]
pub struct Orchestrator<L> {
    ledger: L,
    plan: OrchestrationPlan,
    settings: RunSettings,
    registry: ResourceRegistry,
    cancel: CancellationToken,
}

impl<L: Ledger> Orchestrator<L> {
    pub fn new(ledger: L, plan: OrchestrationPlan) -> Self {
        Self {
            ledger,
            plan,
            settings: RunSettings::default(),
            registry: ResourceRegistry::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Start from resources recorded by an earlier run.
    pub fn with_registry(mut self, registry: ResourceRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn plan(&self) -> &OrchestrationPlan {
        &self.plan
    }

    /// Execute the plan.
    pub async fn run(&self) -> std::result::Result<RunReport, Box<RunFailure>> {
        let mut run = Run {
            state: RunState::Idle,
            registry: self.registry.clone(),
            assignments: Vec::new(),
            last_completed: None,
        };

        tracing::info!(
            components = self.plan.deployment().len(),
            wiring_steps = self.plan.wiring().len(),
            deployer = %self.ledger.deployer(),
            "Starting orchestration run"
        );

        let executor = DeploymentExecutor::new(
            &self.ledger,
            self.settings.confirmation.timeout(),
            self.cancel.clone(),
        );

        for (index, descriptor) in self.plan.deployment().components().iter().enumerate() {
            run.advance(RunState::Deploying(index));
            let deployed = executor.deploy(descriptor, &mut run.registry).await;
            if let Err(error) = deployed {
                return Err(run.fail(error));
            }
            run.last_completed = Some(format!("deployed {}", descriptor.name));
        }

        if let Some(registry_name) = self.plan.naming_registry() {
            let resolved = run.registry.address(registry_name);
            let naming_registry = match resolved {
                Ok(address) => address,
                Err(error) => return Err(run.fail(error)),
            };

            let wiring = NamingWiring::new(
                &self.ledger,
                naming_registry,
                self.settings.confirmation.timeout(),
                self.cancel.clone(),
            )
            .precheck_authority(self.settings.precheck_authority);
            let policy = PropagationPolicy::new(self.settings.propagation.clone(), self.cancel.clone());

            for (index, step) in self.plan.wiring().iter().enumerate() {
                run.advance(RunState::Wiring(index));
                let applied = self.apply(step, &wiring, &policy, &run.registry).await;
                match applied {
                    Ok(Some(record)) => run.assignments.push(record),
                    Ok(None) => {}
                    Err(error) => return Err(run.fail(error)),
                }
                run.last_completed = Some(step.to_string());
            }
        }

        run.advance(RunState::Complete);
        tracing::info!(
            resources = run.registry.len(),
            assignments = run.assignments.len(),
            "Orchestration run complete"
        );
        Ok(run.report())
    }

    async fn apply(
        &self,
        step: &WiringStep,
        wiring: &NamingWiring<'_, L>,
        policy: &PropagationPolicy,
        registry: &ResourceRegistry,
    ) -> Result<Option<AssignmentRecord>> {
        let record = match step {
            WiringStep::AssignSubnode {
                parent,
                label,
                owner,
            } => {
                let owner = self.principal(owner, registry)?;
                wiring.assign_subnode(parent, label, owner).await?
            }
            WiringStep::AwaitPropagation { path, owner } => {
                let expectation = Expectation::Owner {
                    registry: wiring.registry(),
                    node: path_hash(path),
                    owner: self.principal(owner, registry)?,
                };
                policy.await_propagation(&self.ledger, &expectation).await?;
                return Ok(None);
            }
            WiringStep::BindResolver { path, resolver } => {
                let resolver = self.principal(resolver, registry)?;
                wiring.bind_resolver(path, resolver).await?
            }
            WiringStep::BindInterface {
                resolver,
                path,
                interface_id,
                implementer,
            } => {
                let resolver = self.principal(resolver, registry)?;
                let implementer = self.principal(implementer, registry)?;
                wiring
                    .bind_interface(resolver, path, *interface_id, implementer)
                    .await?
            }
            WiringStep::AuthorizeController {
                resource,
                controller,
            } => {
                let resource = self.principal(resource, registry)?;
                let controller = self.principal(controller, registry)?;
                wiring.authorize_controller(resource, controller).await?
            }
        };
        Ok(Some(record))
    }

    fn principal(&self, principal: &Principal, registry: &ResourceRegistry) -> Result<Address> {
        match principal {
            Principal::Deployer => Ok(self.ledger.deployer()),
            Principal::Component(name) => registry.address(name),
            Principal::Address(address) => Ok(*address),
        }
    }
}

/// Mutable progress of a single run.
struct Run {
    state: RunState,
    registry: ResourceRegistry,
    assignments: Vec<AssignmentRecord>,
    last_completed: Option<String>,
}

impl Run {
    fn advance(&mut self, state: RunState) {
        tracing::debug!(from = %self.state, to = %state, "Run state transition");
        self.state = state;
    }

    fn fail(self, error: DeployError) -> Box<RunFailure> {
        let pending = error.pending_tx();
        tracing::error!(
            error = %error,
            step = %self.state,
            last_completed = self.last_completed.as_deref().unwrap_or("-"),
            pending_tx = ?pending,
            resources = self.registry.len(),
            "Orchestration run failed"
        );

        let failed_step = self.state;
        Box::new(RunFailure {
            error,
            failed_step,
            last_completed: self.last_completed,
            pending,
            report: RunReport {
                state: RunState::Failed,
                resources: self.registry.into_iter().collect(),
                assignments: self.assignments,
            },
        })
    }

    fn report(self) -> RunReport {
        RunReport {
            state: self.state,
            resources: self.registry.into_iter().collect(),
            assignments: self.assignments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{descriptor::ComponentDescriptor, ledger::SimulatedLedger};

    fn plan(wiring: Vec<WiringStep>) -> OrchestrationPlan {
        OrchestrationPlan::new(
            vec![
                ComponentDescriptor::new("Registry").contract("ENSRegistry"),
                ComponentDescriptor::new("Resolver")
                    .contract("PublicResolver")
                    .depends_on("Registry"),
            ],
            Some("Registry".to_string()),
            wiring,
        )
        .unwrap()
    }

    #[test]
    fn test_run_state_display() {
        assert_eq!(RunState::Deploying(2).to_string(), "deploying component #2");
        assert_eq!(RunState::Complete.to_string(), "complete");
    }

    #[tokio::test]
    async fn test_run_without_wiring_completes() {
        let orchestrator = Orchestrator::new(SimulatedLedger::default(), plan(vec![]));

        let report = orchestrator.run().await.unwrap();

        assert_eq!(report.state, RunState::Complete);
        let names: Vec<_> = report.resources.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["Registry", "Resolver"]);
        assert!(report.assignments.is_empty());
    }

    #[tokio::test]
    async fn test_failure_reports_step_and_last_completed() {
        let ledger = SimulatedLedger::default();
        ledger.fail_deployment_of("Resolver").await;
        let orchestrator = Orchestrator::new(ledger, plan(vec![]));

        let failure = orchestrator.run().await.unwrap_err();

        assert_eq!(failure.failed_step, RunState::Deploying(1));
        assert_eq!(failure.last_completed.as_deref(), Some("deployed Registry"));
        assert_eq!(failure.report.state, RunState::Failed);
        assert_eq!(failure.report.resources.len(), 1);
        assert!(matches!(failure.error, DeployError::DeploymentFailed { .. }));
        assert_eq!(failure.pending, None);
    }

    #[tokio::test]
    async fn test_stalled_confirmation_reports_pending_transaction() {
        let ledger = SimulatedLedger::default();
        ledger.stall_confirmations().await;
        let orchestrator = Orchestrator::new(ledger, plan(vec![])).settings(RunSettings {
            confirmation: ConfirmationConfig {
                timeout_secs: 0,
                ..ConfirmationConfig::default()
            },
            ..RunSettings::default()
        });

        let failure = orchestrator.run().await.unwrap_err();

        assert!(matches!(failure.error, DeployError::ConfirmationTimeout { .. }));
        assert_eq!(failure.failed_step, RunState::Deploying(0));
        assert!(failure.pending.is_some());
        assert_eq!(failure.pending, failure.error.pending_tx());
        assert!(failure.report.resources.is_empty());
    }

    #[tokio::test]
    async fn test_await_propagation_step_records_nothing() {
        let orchestrator = Orchestrator::new(
            SimulatedLedger::default(),
            plan(vec![
                WiringStep::AssignSubnode {
                    parent: String::new(),
                    label: "example".to_string(),
                    owner: Principal::Deployer,
                },
                WiringStep::AwaitPropagation {
                    path: "example".to_string(),
                    owner: Principal::Deployer,
                },
            ]),
        );

        let report = orchestrator.run().await.unwrap();
        assert_eq!(report.assignments.len(), 1);
    }
}
