//! Canonical node identifiers for the hierarchical naming tree.
//!
//! A node is derived from a dot-delimited path by hashing every label and
//! folding it into its parent node, starting from the zero hash at the root:
//!
//! ```text
//! node("")        = 0x00..00
//! node("a.tld")   = keccak256(node("tld") ++ keccak256("a"))
//! ```

use alloy_core::primitives::{B256, keccak256};

/// Identifier of a position in the naming tree.
pub type NodeId = B256;

/// The root of the naming tree.
pub const ROOT_NODE: NodeId = B256::ZERO;

/// Separator between labels in a naming path.
pub const LABEL_DELIMITER: char = '.';

/// Hash a single label.
pub fn label_hash(label: &str) -> B256 {
    keccak256(label.as_bytes())
}

/// Node of the child of `parent` whose label hashes to `label`.
pub fn subnode(parent: NodeId, label: B256) -> NodeId {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(parent.as_slice());
    buf[32..].copy_from_slice(label.as_slice());
    keccak256(buf)
}

/// Combine a parent node with one of its child labels.
pub fn child_node(parent: NodeId, label: &str) -> NodeId {
    subnode(parent, label_hash(label))
}

/// Compute the node for a full naming path. The empty path is the root.
pub fn path_hash(path: &str) -> NodeId {
    if path.is_empty() {
        return ROOT_NODE;
    }

    path.rsplit(LABEL_DELIMITER)
        .fold(ROOT_NODE, |node, label| child_node(node, label))
}

/// Join a label under a parent path (`join_path("reverse", "addr") == "addr.reverse"`).
pub fn join_path(parent: &str, label: &str) -> String {
    if parent.is_empty() {
        label.to_string()
    } else {
        format!("{label}{LABEL_DELIMITER}{parent}")
    }
}
