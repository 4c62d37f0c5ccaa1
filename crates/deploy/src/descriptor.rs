//! Component descriptors and the dependency order they imply.

use std::collections::HashSet;

use alloy_core::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::error::{DeployError, Result};

/// A constructor argument, resolved to a concrete value right before deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ConstructorArg {
    /// A literal unsigned integer (prices, durations...).
    Uint(U256),
    /// A literal address.
    Address(Address),
    /// The node of a naming path, e.g. `"btc"`.
    Node(String),
    /// The signing identity of the run.
    Deployer,
    /// The address of another component of the plan.
    Component(String),
}

/// A library that must be linked into the contract bytecode before creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryLink {
    /// Library name as it appears in the artifact link references.
    pub library: String,
    /// Component of the plan that provides the library.
    pub component: String,
}

/// Static description of one component to deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    /// Logical name, unique within a plan.
    pub name: String,
    /// Name of the compiled contract artifact. Defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<String>,
    /// Constructor arguments, in ABI order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<ConstructorArg>,
    /// Libraries to link.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub libraries: Vec<LibraryLink>,
}

impl ComponentDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contract: None,
            args: Vec::new(),
            libraries: Vec::new(),
        }
    }

    /// Use a contract artifact whose name differs from the logical name.
    pub fn contract(mut self, contract: impl Into<String>) -> Self {
        self.contract = Some(contract.into());
        self
    }

    pub fn arg(mut self, arg: ConstructorArg) -> Self {
        self.args.push(arg);
        self
    }

    pub fn uint(self, value: u64) -> Self {
        self.arg(ConstructorArg::Uint(U256::from(value)))
    }

    pub fn depends_on(self, component: impl Into<String>) -> Self {
        self.arg(ConstructorArg::Component(component.into()))
    }

    pub fn link(mut self, library: impl Into<String>, component: impl Into<String>) -> Self {
        self.libraries.push(LibraryLink {
            library: library.into(),
            component: component.into(),
        });
        self
    }

    pub fn contract_name(&self) -> &str {
        self.contract.as_deref().unwrap_or(&self.name)
    }

    /// Components this descriptor needs resolved before it can be deployed,
    /// in declaration order, without repeats.
    pub fn dependencies(&self) -> Vec<&str> {
        let from_args = self.args.iter().filter_map(|arg| match arg {
            ConstructorArg::Component(name) => Some(name.as_str()),
            _ => None,
        });
        let from_links = self.libraries.iter().map(|l| l.component.as_str());

        let mut seen = HashSet::new();
        from_args
            .chain(from_links)
            .filter(|name| seen.insert(*name))
            .collect()
    }
}

/// Descriptors sorted so that every component comes after its dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentPlan {
    order: Vec<ComponentDescriptor>,
}

impl DeploymentPlan {
    /// Validate the descriptors and sort them topologically.
    ///
    /// Among components that are ready at the same time, declaration order wins,
    /// so a hand-ordered list that is already valid is kept as-is.
    pub fn resolve(descriptors: Vec<ComponentDescriptor>) -> Result<Self> {
        let mut names = HashSet::new();
        for descriptor in &descriptors {
            if !names.insert(descriptor.name.as_str()) {
                return Err(DeployError::InvalidPlan {
                    reason: format!("component `{}` is declared twice", descriptor.name),
                });
            }
        }

        for descriptor in &descriptors {
            if let Some(dependency) = descriptor
                .dependencies()
                .into_iter()
                .find(|dep| !names.contains(dep))
            {
                return Err(DeployError::UnknownDependency {
                    component: descriptor.name.clone(),
                    dependency: dependency.to_string(),
                });
            }
        }

        let mut pending: Vec<Option<ComponentDescriptor>> =
            descriptors.into_iter().map(Some).collect();
        let mut placed: HashSet<String> = HashSet::new();
        let mut order = Vec::with_capacity(pending.len());

        while order.len() < pending.len() {
            let next = pending.iter().position(|slot| {
                slot.as_ref().is_some_and(|d| {
                    d.dependencies()
                        .iter()
                        .all(|dep| placed.contains(*dep))
                })
            });

            let Some(index) = next else {
                let members = pending
                    .iter()
                    .flatten()
                    .map(|d| d.name.clone())
                    .collect();
                return Err(DeployError::DependencyCycle { members });
            };

            if let Some(descriptor) = pending[index].take() {
                placed.insert(descriptor.name.clone());
                order.push(descriptor);
            }
        }

        Ok(Self { order })
    }

    pub fn components(&self) -> &[ComponentDescriptor] {
        &self.order
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|d| d.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.order.iter().any(|d| d.name == name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(plan: &DeploymentPlan, name: &str) -> usize {
        plan.names().position(|n| n == name).unwrap()
    }

    #[test]
    fn test_dependencies_deduplicate_and_include_links() {
        let descriptor = ComponentDescriptor::new("Controller")
            .depends_on("Base")
            .depends_on("Price")
            .depends_on("Base")
            .link("StringUtils", "StringUtils");

        assert_eq!(descriptor.dependencies(), ["Base", "Price", "StringUtils"]);
    }

    #[test]
    fn test_valid_order_is_preserved() {
        let plan = DeploymentPlan::resolve(vec![
            ComponentDescriptor::new("Registry"),
            ComponentDescriptor::new("PriceOracle").uint(1).uint(2).uint(3),
            ComponentDescriptor::new("Resolver").depends_on("Registry"),
        ])
        .unwrap();

        let names: Vec<_> = plan.names().collect();
        assert_eq!(names, ["Registry", "PriceOracle", "Resolver"]);
    }

    #[test]
    fn test_out_of_order_declarations_are_sorted() {
        let plan = DeploymentPlan::resolve(vec![
            ComponentDescriptor::new("Controller")
                .depends_on("Base")
                .link("StringUtils", "StringUtils"),
            ComponentDescriptor::new("Base").depends_on("Registry"),
            ComponentDescriptor::new("StringUtils"),
            ComponentDescriptor::new("Registry"),
        ])
        .unwrap();

        for descriptor in plan.components() {
            for dep in descriptor.dependencies() {
                assert!(
                    position(&plan, dep) < position(&plan, &descriptor.name),
                    "{dep} must come before {}",
                    descriptor.name
                );
            }
        }
    }

    #[test]
    fn test_cycle_is_rejected() {
        let err = DeploymentPlan::resolve(vec![
            ComponentDescriptor::new("Standalone"),
            ComponentDescriptor::new("A").depends_on("B"),
            ComponentDescriptor::new("B").depends_on("A"),
        ])
        .unwrap_err();

        match err {
            DeployError::DependencyCycle { members } => assert_eq!(members, ["A", "B"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_dependency_is_rejected() {
        let err = DeploymentPlan::resolve(vec![
            ComponentDescriptor::new("Resolver").depends_on("Registry"),
        ])
        .unwrap_err();

        assert!(matches!(
            err,
            DeployError::UnknownDependency { component, dependency }
                if component == "Resolver" && dependency == "Registry"
        ));
    }

    #[test]
    fn test_duplicate_descriptor_is_rejected() {
        let err = DeploymentPlan::resolve(vec![
            ComponentDescriptor::new("Registry"),
            ComponentDescriptor::new("Registry"),
        ])
        .unwrap_err();

        assert!(matches!(err, DeployError::InvalidPlan { .. }));
    }

    #[test]
    fn test_descriptor_toml_shape() {
        let descriptor = ComponentDescriptor::new("BaseRegistrarImplementation")
            .depends_on("ENSRegistry")
            .arg(ConstructorArg::Node("btc".to_string()));

        let toml = toml::to_string(&descriptor).unwrap();
        let parsed: ComponentDescriptor = toml::from_str(&toml).unwrap();
        assert_eq!(parsed, descriptor);
        assert_eq!(parsed.contract_name(), "BaseRegistrarImplementation");
    }
}
