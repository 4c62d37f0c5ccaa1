//! The full orchestration: components to deploy, then naming assignments.

use std::{fmt, str::FromStr};

use alloy_core::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::{
    descriptor::{ComponentDescriptor, DeploymentPlan},
    error::{DeployError, Result},
    ledger::InterfaceId,
};

/// An identity referenced by a wiring step.
///
/// Written as `deployer`, `@ComponentName` or a literal `0x` address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Principal {
    Deployer,
    Component(String),
    Address(Address),
}

impl Principal {
    pub fn component(name: impl Into<String>) -> Self {
        Self::Component(name.into())
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deployer => f.write_str("deployer"),
            Self::Component(name) => write!(f, "@{name}"),
            Self::Address(address) => write!(f, "{address}"),
        }
    }
}

impl FromStr for Principal {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "deployer" => Ok(Self::Deployer),
            _ if s.starts_with('@') && s.len() > 1 => Ok(Self::Component(s[1..].to_string())),
            _ if s.starts_with("0x") => s
                .parse()
                .map(Self::Address)
                .map_err(|e| format!("invalid address `{s}`: {e}")),
            _ => Err(format!(
                "invalid principal `{s}`: expected `deployer`, `@Component` or a 0x address"
            )),
        }
    }
}

impl TryFrom<String> for Principal {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Principal> for String {
    fn from(principal: Principal) -> Self {
        principal.to_string()
    }
}

/// One step of the wiring phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum WiringStep {
    /// Give `label` under `parent` to `owner`.
    AssignSubnode {
        #[serde(default)]
        parent: String,
        label: String,
        owner: Principal,
    },
    /// Wait until `path` is observably owned by `owner`.
    AwaitPropagation { path: String, owner: Principal },
    /// Point `path` at a resolver.
    BindResolver { path: String, resolver: Principal },
    /// Register an interface implementer for `path` on a resolver.
    BindInterface {
        resolver: Principal,
        path: String,
        interface_id: InterfaceId,
        implementer: Principal,
    },
    /// Authorize a controller on a registrar.
    AuthorizeController {
        resource: Principal,
        controller: Principal,
    },
}

impl WiringStep {
    /// Every principal the step refers to.
    pub fn principals(&self) -> Vec<&Principal> {
        match self {
            Self::AssignSubnode { owner, .. } | Self::AwaitPropagation { owner, .. } => vec![owner],
            Self::BindResolver { resolver, .. } => vec![resolver],
            Self::BindInterface {
                resolver,
                implementer,
                ..
            } => vec![resolver, implementer],
            Self::AuthorizeController {
                resource,
                controller,
            } => vec![resource, controller],
        }
    }
}

impl fmt::Display for WiringStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AssignSubnode {
                parent,
                label,
                owner,
            } => {
                let parent = if parent.is_empty() { "<root>" } else { parent };
                write!(f, "assign {label} under {parent} to {owner}")
            }
            Self::AwaitPropagation { path, owner } => {
                write!(f, "await ownership of {path} by {owner}")
            }
            Self::BindResolver { path, resolver } => write!(f, "bind resolver of {path} to {resolver}"),
            Self::BindInterface {
                resolver,
                path,
                interface_id,
                implementer,
            } => write!(
                f,
                "bind interface {interface_id} of {path} on {resolver} to {implementer}"
            ),
            Self::AuthorizeController {
                resource,
                controller,
            } => write!(f, "authorize {controller} as controller of {resource}"),
        }
    }
}

/// Validated orchestration: a sorted deployment plan plus wiring steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestrationPlan {
    deployment: DeploymentPlan,
    naming_registry: Option<String>,
    wiring: Vec<WiringStep>,
}

impl OrchestrationPlan {
    /// Sort the components and check that every wiring reference resolves.
    ///
    /// `naming_registry` names the component that holds node ownership; it is
    /// required as soon as there are wiring steps.
    pub fn new(
        components: Vec<ComponentDescriptor>,
        naming_registry: Option<String>,
        wiring: Vec<WiringStep>,
    ) -> Result<Self> {
        let deployment = DeploymentPlan::resolve(components)?;

        match &naming_registry {
            Some(name) if !deployment.contains(name) => {
                return Err(DeployError::InvalidPlan {
                    reason: format!("naming registry `{name}` is not a component of the plan"),
                });
            }
            None if !wiring.is_empty() => {
                return Err(DeployError::InvalidPlan {
                    reason: "wiring steps require a naming registry".to_string(),
                });
            }
            _ => {}
        }

        for step in &wiring {
            for principal in step.principals() {
                if let Principal::Component(name) = principal {
                    if !deployment.contains(name) {
                        return Err(DeployError::InvalidPlan {
                            reason: format!("step `{step}` references unknown component `{name}`"),
                        });
                    }
                }
            }
        }

        Ok(Self {
            deployment,
            naming_registry,
            wiring,
        })
    }

    pub fn deployment(&self) -> &DeploymentPlan {
        &self.deployment
    }

    pub fn naming_registry(&self) -> Option<&str> {
        self.naming_registry.as_deref()
    }

    pub fn wiring(&self) -> &[WiringStep] {
        &self.wiring
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_principal_parsing() {
        assert_eq!("deployer".parse::<Principal>().unwrap(), Principal::Deployer);
        assert_eq!(
            "@ReverseRegistrar".parse::<Principal>().unwrap(),
            Principal::component("ReverseRegistrar")
        );
        assert_eq!(
            "0x0000000000000000000000000000000000000001"
                .parse::<Principal>()
                .unwrap(),
            Principal::Address(Address::with_last_byte(1))
        );
        assert!("@".parse::<Principal>().is_err());
        assert!("owner".parse::<Principal>().is_err());
    }

    #[test]
    fn test_wiring_step_toml_shape() {
        #[derive(Debug, Serialize, Deserialize)]
        struct Steps {
            wiring: Vec<WiringStep>,
        }

        let parsed: Steps = toml::from_str(
            r#"
            [[wiring]]
            step = "assign_subnode"
            label = "btc"
            owner = "deployer"

            [[wiring]]
            step = "bind_interface"
            resolver = "@PublicResolver"
            path = "btc"
            interface_id = "0x018fac06"
            implementer = "@ETHRegistrarController"
            "#,
        )
        .unwrap();

        assert_eq!(
            parsed.wiring[0],
            WiringStep::AssignSubnode {
                parent: String::new(),
                label: "btc".to_string(),
                owner: Principal::Deployer,
            }
        );
        assert!(matches!(
            &parsed.wiring[1],
            WiringStep::BindInterface { interface_id, .. } if *interface_id == InterfaceId::from([0x01, 0x8f, 0xac, 0x06])
        ));
    }

    #[test]
    fn test_unknown_component_in_wiring_is_rejected() {
        let err = OrchestrationPlan::new(
            vec![ComponentDescriptor::new("Registry")],
            Some("Registry".to_string()),
            vec![WiringStep::BindResolver {
                path: "example".to_string(),
                resolver: Principal::component("Resolver"),
            }],
        )
        .unwrap_err();

        assert!(matches!(err, DeployError::InvalidPlan { reason } if reason.contains("Resolver")));
    }

    #[test]
    fn test_wiring_without_registry_is_rejected() {
        let err = OrchestrationPlan::new(
            vec![ComponentDescriptor::new("Registry")],
            None,
            vec![WiringStep::AwaitPropagation {
                path: "example".to_string(),
                owner: Principal::Deployer,
            }],
        )
        .unwrap_err();

        assert!(matches!(err, DeployError::InvalidPlan { .. }));
    }

    #[test]
    fn test_step_display() {
        let step = WiringStep::AssignSubnode {
            parent: String::new(),
            label: "reverse".to_string(),
            owner: Principal::Deployer,
        };
        assert_eq!(step.to_string(), "assign reverse under <root> to deployer");
    }
}
