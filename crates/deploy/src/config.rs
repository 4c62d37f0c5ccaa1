//! Deployment configuration, stored as `Ensforge.toml`.

use std::path::{Path, PathBuf};

use alloy_core::primitives::{Address, U256};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    descriptor::{ComponentDescriptor, ConstructorArg},
    error::Result as DeployResult,
    ledger::{InterfaceId, SimulatedLedger},
    orchestrator::RunSettings,
    plan::{OrchestrationPlan, Principal, WiringStep},
    propagation::{ConfirmationConfig, PropagationConfig},
};

/// Default name of the configuration file.
pub const CONFIG_FILENAME: &str = "Ensforge.toml";

/// Default JSON-RPC endpoint (a local Anvil or Hardhat node).
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";

/// Default top-level domain of the ENS preset.
pub const DEFAULT_TLD: &str = "btc";

/// Interface id under which the registrar controller is published on the TLD.
pub const CONTROLLER_INTERFACE_ID: InterfaceId = InterfaceId::new([0x01, 0x8f, 0xac, 0x06]);

/// Node connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub rpc_url: Url,
    /// Expected chain ID. Checked against the node before a run when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    /// Account operations are sent from. The node must hold its key.
    #[serde(default = "default_deployer")]
    pub deployer: Address,
}

fn default_deployer() -> Address {
    SimulatedLedger::DEFAULT_DEPLOYER
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            rpc_url: Url::parse(DEFAULT_RPC_URL).expect("default RPC URL is valid"),
            chain_id: None,
            deployer: SimulatedLedger::DEFAULT_DEPLOYER,
        }
    }
}

/// Constructor parameters of the ENS preset's price oracle and controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Oracle rent prices, in wei per second, by name length bucket.
    pub rent_prices: Vec<U256>,
    /// Minimum age of a registration commitment, in seconds.
    pub min_commitment_age_secs: u64,
    /// Maximum age of a registration commitment, in seconds.
    pub max_commitment_age_secs: u64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            rent_prices: vec![
                U256::from(317_097_919_837_u64),
                U256::from(5_000_000_000_000_000_000_u64),
                U256::from(475_646_879_756_u64),
            ],
            min_commitment_age_secs: 60,
            max_commitment_age_secs: 86_400,
        }
    }
}

/// Everything needed to run a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Directory holding the compiled contract artifacts.
    pub artifacts_dir: PathBuf,
    /// Read node ownership before each assignment and fail without submitting
    /// when the deployer lacks authority.
    #[serde(default)]
    pub precheck_authority: bool,
    /// Component acting as the naming registry for the wiring steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub naming_registry: Option<String>,

    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub confirmation: ConfirmationConfig,
    #[serde(default)]
    pub propagation: PropagationConfig,

    /// Components to deploy. Listing order only matters between components
    /// that do not depend on each other.
    #[serde(default)]
    pub components: Vec<ComponentDescriptor>,
    /// Naming assignments, applied in order after every component is deployed.
    #[serde(default)]
    pub wiring: Vec<WiringStep>,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: PathBuf::from("artifacts"),
            precheck_authority: false,
            naming_registry: None,
            network: NetworkConfig::default(),
            confirmation: ConfirmationConfig::default(),
            propagation: PropagationConfig::default(),
            components: Vec::new(),
            wiring: Vec::new(),
        }
    }
}

impl DeploymentConfig {
    /// The ENS deployment: registry, pricing, resolvers and registrars for
    /// `tld`, plus the reverse registrar under `addr.reverse`.
    pub fn ens_preset(tld: &str, pricing: &PricingConfig) -> Self {
        let oracle = pricing
            .rent_prices
            .iter()
            .fold(ComponentDescriptor::new("StablePriceOracle"), |d, price| {
                d.arg(ConstructorArg::Uint(*price))
            });

        let components = vec![
            ComponentDescriptor::new("ENSRegistry"),
            oracle,
            ComponentDescriptor::new("PublicResolver").depends_on("ENSRegistry"),
            ComponentDescriptor::new("BaseRegistrarImplementation")
                .depends_on("ENSRegistry")
                .arg(ConstructorArg::Node(tld.to_string())),
            ComponentDescriptor::new("StringUtils"),
            ComponentDescriptor::new("ETHRegistrarController")
                .depends_on("BaseRegistrarImplementation")
                .depends_on("StablePriceOracle")
                .uint(pricing.min_commitment_age_secs)
                .uint(pricing.max_commitment_age_secs)
                .link("StringUtils", "StringUtils"),
            ComponentDescriptor::new("DefaultReverseResolver").depends_on("ENSRegistry"),
            ComponentDescriptor::new("ReverseRegistrar")
                .depends_on("ENSRegistry")
                .depends_on("DefaultReverseResolver"),
        ];

        let wiring = vec![
            WiringStep::AssignSubnode {
                parent: String::new(),
                label: tld.to_string(),
                owner: Principal::Deployer,
            },
            WiringStep::AwaitPropagation {
                path: tld.to_string(),
                owner: Principal::Deployer,
            },
            WiringStep::BindResolver {
                path: tld.to_string(),
                resolver: Principal::component("PublicResolver"),
            },
            WiringStep::BindInterface {
                resolver: Principal::component("PublicResolver"),
                path: tld.to_string(),
                interface_id: CONTROLLER_INTERFACE_ID,
                implementer: Principal::component("ETHRegistrarController"),
            },
            WiringStep::AssignSubnode {
                parent: String::new(),
                label: tld.to_string(),
                owner: Principal::component("BaseRegistrarImplementation"),
            },
            WiringStep::AuthorizeController {
                resource: Principal::component("BaseRegistrarImplementation"),
                controller: Principal::component("ETHRegistrarController"),
            },
            WiringStep::AssignSubnode {
                parent: String::new(),
                label: "reverse".to_string(),
                owner: Principal::Deployer,
            },
            WiringStep::AwaitPropagation {
                path: "reverse".to_string(),
                owner: Principal::Deployer,
            },
            WiringStep::AssignSubnode {
                parent: "reverse".to_string(),
                label: "addr".to_string(),
                owner: Principal::component("ReverseRegistrar"),
            },
        ];

        Self {
            naming_registry: Some("ENSRegistry".to_string()),
            components,
            wiring,
            ..Self::default()
        }
    }

    /// Validate the components and wiring into an executable plan.
    pub fn plan(&self) -> DeployResult<OrchestrationPlan> {
        OrchestrationPlan::new(
            self.components.clone(),
            self.naming_registry.clone(),
            self.wiring.clone(),
        )
    }

    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            confirmation: self.confirmation.clone(),
            propagation: self.propagation.clone(),
            precheck_authority: self.precheck_authority,
        }
    }

    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize deployment config to TOML")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// The configuration file `path` designates: `path` itself, or
    /// `Ensforge.toml` inside it when it is a directory.
    pub fn config_path(path: &Path) -> PathBuf {
        if path.is_dir() {
            path.join(CONFIG_FILENAME)
        } else {
            path.to_path_buf()
        }
    }

    /// Load the configuration from a TOML file, or from `Ensforge.toml` in a directory.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Err(anyhow::anyhow!(
                "Configuration file or directory not found: {}",
                path.display()
            ));
        }

        let config_path = Self::config_path(path);

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config from {}", config_path.display()))?;
        let config: Self =
            toml::from_str(&content).context("Failed to parse config file as TOML")?;
        tracing::info!(path = %config_path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Save the configuration as `Ensforge.toml` in `dir`.
    pub fn save_config(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        let config_path = dir.join(CONFIG_FILENAME);
        self.save_to_file(&config_path)?;
        Ok(config_path)
    }
}
