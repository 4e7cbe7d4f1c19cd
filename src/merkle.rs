use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// SHA-256 hex digest of a text, the hash used for both file leaves and
/// internal pair hashes.
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn hash_pair(left: &str, right: &str) -> String {
    sha256_hex(&format!("{left}{right}"))
}

/// Content-addressed summary of the project tree. A leaf carries one file's
/// hash; an internal node hashes the concatenation of its children's hashes
/// and always has both children (an odd node pairs with itself).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MerkleNode {
    Leaf {
        hash: String,
        file_path: String,
    },
    Internal {
        hash: String,
        left: Box<MerkleNode>,
        right: Box<MerkleNode>,
    },
}

impl MerkleNode {
    pub fn hash(&self) -> &str {
        match self {
            MerkleNode::Leaf { hash, .. } => hash,
            MerkleNode::Internal { hash, .. } => hash,
        }
    }

    /// Build the tree over a path→hash mapping. Leaves enter in ascending
    /// path order (the map is already sorted), so a given mapping always
    /// yields the same root. Empty input has no tree.
    pub fn build(file_hashes: &BTreeMap<String, String>) -> Option<MerkleNode> {
        let mut level: Vec<MerkleNode> = file_hashes
            .iter()
            .map(|(path, hash)| MerkleNode::Leaf {
                hash: hash.clone(),
                file_path: path.clone(),
            })
            .collect();

        if level.is_empty() {
            return None;
        }

        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(2));
            let mut nodes = level.into_iter();
            while let Some(left) = nodes.next() {
                // Odd level: the last node pairs with itself.
                let right = nodes.next().unwrap_or_else(|| left.clone());
                let hash = hash_pair(left.hash(), right.hash());
                next.push(MerkleNode::Internal {
                    hash,
                    left: Box::new(left),
                    right: Box::new(right),
                });
            }
            level = next;
        }

        level.pop()
    }

    /// Recover the path→hash mapping from the leaves.
    pub fn leaves(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves(&self, out: &mut BTreeMap<String, String>) {
        match self {
            MerkleNode::Leaf { hash, file_path } => {
                out.insert(file_path.clone(), hash.clone());
            }
            MerkleNode::Internal { left, right, .. } => {
                left.collect_leaves(out);
                right.collect_leaves(out);
            }
        }
    }

    pub fn to_doc(&self) -> NodeDoc {
        match self {
            MerkleNode::Leaf { hash, file_path } => NodeDoc {
                hash: hash.clone(),
                file_path: Some(file_path.clone()),
                is_leaf: true,
                left: None,
                right: None,
            },
            MerkleNode::Internal { hash, left, right } => NodeDoc {
                hash: hash.clone(),
                file_path: None,
                is_leaf: false,
                left: Some(Box::new(left.to_doc())),
                right: Some(Box::new(right.to_doc())),
            },
        }
    }

    pub fn from_doc(doc: &NodeDoc) -> Result<MerkleNode> {
        if doc.is_leaf {
            let Some(file_path) = doc.file_path.clone() else {
                bail!("leaf node missing file_path");
            };
            return Ok(MerkleNode::Leaf {
                hash: doc.hash.clone(),
                file_path,
            });
        }
        match (&doc.left, &doc.right) {
            (Some(left), Some(right)) => Ok(MerkleNode::Internal {
                hash: doc.hash.clone(),
                left: Box::new(MerkleNode::from_doc(left)?),
                right: Box::new(MerkleNode::from_doc(right)?),
            }),
            _ => bail!("internal node missing a child"),
        }
    }
}

/// On-disk shape of one node: an `is_leaf` discriminator plus the fields of
/// whichever variant applies (the other side serializes as null).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDoc {
    pub hash: String,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub is_leaf: bool,
    #[serde(default)]
    pub left: Option<Box<NodeDoc>>,
    #[serde(default)]
    pub right: Option<Box<NodeDoc>>,
}
