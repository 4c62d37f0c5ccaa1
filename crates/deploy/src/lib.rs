//! ensforge-deploy - Deployment orchestration for ENS-style naming systems.
//!
//! This crate deploys a set of interdependent contracts in dependency order,
//! then wires them into a hierarchical naming tree (ownership, resolver,
//! interface and controller assignments), waiting on the ledger wherever a
//! later step depends on an earlier one being observable.

pub mod artifacts;
pub use artifacts::{ArtifactStore, ContractArtifact};

mod config;
pub use config::{
    CONFIG_FILENAME, CONTROLLER_INTERFACE_ID, DEFAULT_RPC_URL, DEFAULT_TLD, DeploymentConfig,
    NetworkConfig, PricingConfig,
};

mod descriptor;
pub use descriptor::{ComponentDescriptor, ConstructorArg, DeploymentPlan, LibraryLink};

mod error;
pub use error::{DeployError, Result};

mod executor;
pub use executor::{DeploymentExecutor, describe_arg, resolve_args};

pub mod ledger;
pub use ledger::{Ledger, RpcLedger, SimulatedLedger};

pub mod namehash;

mod orchestrator;
pub use orchestrator::{Orchestrator, RunFailure, RunReport, RunSettings, RunState};

mod plan;
pub use plan::{OrchestrationPlan, Principal, WiringStep};

mod propagation;
pub use propagation::{
    ConfirmationConfig, DEFAULT_FIXED_DELAY_MS, Expectation, PropagationConfig, PropagationMode,
    PropagationPolicy,
};

mod registry;
pub use registry::{ConfirmationStatus, DeployedResource, ResourceRegistry};

pub mod rpc;

mod wiring;
pub use wiring::{AssignmentRecord, AssignmentRole, NamingWiring};
