//! Compiled contract artifacts (Hardhat format) and library linking.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use alloy_core::primitives::{Address, Bytes};
use anyhow::Context;
use serde::Deserialize;

use crate::error::{DeployError, Result};

const ADDRESS_LEN: usize = 20;

/// Byte range of a library placeholder inside the creation bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LinkReference {
    pub start: usize,
    pub length: usize,
}

/// The parts of a Hardhat artifact needed to create a contract.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractArtifact {
    pub contract_name: String,
    /// Hex creation bytecode. May contain `__$...$__` library placeholders.
    pub bytecode: String,
    /// Source file -> library name -> placeholder positions.
    #[serde(default)]
    pub link_references: BTreeMap<String, BTreeMap<String, Vec<LinkReference>>>,
}

impl ContractArtifact {
    /// Names of the libraries this artifact must be linked against.
    pub fn required_libraries(&self) -> Vec<&str> {
        self.link_references
            .values()
            .flat_map(|libs| libs.keys().map(String::as_str))
            .collect()
    }

    /// Patch every library placeholder and decode the bytecode.
    pub fn link(&self, libraries: &[(String, Address)]) -> Result<Bytes> {
        let hex_code = self.bytecode.trim_start_matches("0x");
        let mut code = hex_code.as_bytes().to_vec();

        for (library, references) in self.link_references.values().flatten() {
            let address = libraries
                .iter()
                .find(|(name, _)| name == library)
                .map(|(_, address)| *address)
                .ok_or_else(|| self.error(format!("library `{library}` is not linked")))?;
            let address_hex = hex::encode(address);

            for reference in references {
                let start = reference.start * 2;
                let end = start + reference.length * 2;
                if reference.length != ADDRESS_LEN || end > code.len() {
                    return Err(self.error(format!(
                        "invalid link reference for `{library}` at byte {}",
                        reference.start
                    )));
                }
                code[start..end].copy_from_slice(address_hex.as_bytes());
            }
        }

        hex::decode(&code)
            .map(Bytes::from)
            .map_err(|e| self.error(format!("bytecode is not valid hex: {e}")))
    }

    fn error(&self, reason: String) -> DeployError {
        DeployError::Artifact {
            contract: self.contract_name.clone(),
            reason,
        }
    }
}

/// Directory of compiled artifacts.
///
/// Both a flat directory (`<dir>/<Contract>.json`) and the Hardhat layout
/// (`<dir>/contracts/<File>.sol/<Contract>.json`) are searched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load the artifact of `contract`.
    pub fn load(&self, contract: &str) -> Result<ContractArtifact> {
        let path = find_file(&self.root, &format!("{contract}.json"))
            .with_context(|| format!("Failed to search artifacts in {}", self.root.display()))?
            .ok_or_else(|| DeployError::Artifact {
                contract: contract.to_string(),
                reason: format!("no artifact found under {}", self.root.display()),
            })?;

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read artifact {}", path.display()))?;
        let artifact: ContractArtifact = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse artifact {}", path.display()))?;

        tracing::debug!(contract, path = %path.display(), "Artifact loaded");
        Ok(artifact)
    }
}

/// Depth-first search for a file name, in lexical order.
fn find_file(dir: &Path, file_name: &str) -> anyhow::Result<Option<PathBuf>> {
    let candidate = dir.join(file_name);
    if candidate.is_file() {
        return Ok(Some(candidate));
    }

    let mut entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            if let Some(found) = find_file(&path, file_name)? {
                return Ok(Some(found));
            }
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    const PLACEHOLDER: &str = "__$0123456789abcdef0123456789abcdef01$__";

    fn linked_artifact() -> ContractArtifact {
        ContractArtifact {
            contract_name: "ETHRegistrarController".to_string(),
            bytecode: format!("0x6001{PLACEHOLDER}6002"),
            link_references: BTreeMap::from([(
                "contracts/StringUtils.sol".to_string(),
                BTreeMap::from([(
                    "StringUtils".to_string(),
                    vec![LinkReference {
                        start: 2,
                        length: 20,
                    }],
                )]),
            )]),
        }
    }

    #[test]
    fn test_link_patches_placeholder() {
        let artifact = linked_artifact();
        let library = Address::repeat_byte(0xab);

        let code = artifact
            .link(&[("StringUtils".to_string(), library)])
            .unwrap();

        assert_eq!(code.len(), 2 + 20 + 2);
        assert_eq!(&code[..2], &[0x60, 0x01]);
        assert_eq!(&code[2..22], library.as_slice());
        assert_eq!(&code[22..], &[0x60, 0x02]);
    }

    #[test]
    fn test_link_fails_on_missing_library() {
        let err = linked_artifact().link(&[]).unwrap_err();
        assert!(matches!(err, DeployError::Artifact { reason, .. } if reason.contains("StringUtils")));
    }

    #[test]
    fn test_required_libraries() {
        assert_eq!(linked_artifact().required_libraries(), ["StringUtils"]);
    }

    #[test]
    fn test_store_finds_nested_hardhat_layout() {
        let temp_dir = TempDir::new("ensforge-artifacts").expect("Failed to create temp dir");
        let nested = temp_dir.path().join("contracts/registry/ENSRegistry.sol");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(
            nested.join("ENSRegistry.json"),
            r#"{"contractName":"ENSRegistry","abi":[],"bytecode":"0x6080","linkReferences":{}}"#,
        )
        .unwrap();

        let store = ArtifactStore::new(temp_dir.path());
        let artifact = store.load("ENSRegistry").unwrap();

        assert_eq!(artifact.contract_name, "ENSRegistry");
        assert_eq!(&artifact.link(&[]).unwrap()[..], &[0x60, 0x80]);
    }

    #[test]
    fn test_store_reports_missing_artifact() {
        let temp_dir = TempDir::new("ensforge-artifacts").expect("Failed to create temp dir");
        let err = ArtifactStore::new(temp_dir.path()).load("Missing").unwrap_err();
        assert!(matches!(err, DeployError::Artifact { contract, .. } if contract == "Missing"));
    }
}
