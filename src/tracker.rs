use anyhow::{Context, Result};
use chrono::Utc;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::config::INDEX_DIR_NAME;
use crate::merkle::{sha256_hex, MerkleNode, NodeDoc};
use crate::scanner;

/// Durable pass metadata stored at `<project>/.code_index/metadata.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexMetadata {
    pub last_index_time: Option<String>,
    pub total_files_indexed: usize,
    pub merkle_root_hash: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MerkleTreeFile {
    root_hash: Option<String>,
    tree: Option<NodeDoc>,
    timestamp: String,
}

/// How the current tree differs from the last persisted pass. The fresh
/// hash mapping and tree ride along so a pass hashes the project once.
#[derive(Debug, Default)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: Vec<String>,
    pub current_hashes: BTreeMap<String, String>,
    pub prior_hashes: BTreeMap<String, String>,
    pub tree: Option<MerkleNode>,
}

pub fn index_dir(project_root: &Path) -> Result<PathBuf> {
    let dir = project_root.join(INDEX_DIR_NAME);
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create index dir {}", dir.display()))?;
    Ok(dir)
}

fn metadata_file(project_root: &Path) -> Result<PathBuf> {
    Ok(index_dir(project_root)?.join("metadata.json"))
}

fn merkle_file(project_root: &Path) -> Result<PathBuf> {
    Ok(index_dir(project_root)?.join("merkle_tree.json"))
}

/// Replace `path` atomically so a crash mid-write never corrupts the prior
/// persisted state.
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents)
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

pub fn load_metadata(project_root: &Path) -> IndexMetadata {
    let Ok(path) = metadata_file(project_root) else {
        return IndexMetadata::default();
    };
    fs::read_to_string(&path)
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or_default()
}

pub fn save_metadata(project_root: &Path, metadata: &IndexMetadata) -> Result<()> {
    let path = metadata_file(project_root)?;
    let text = serde_json::to_string_pretty(metadata)?;
    write_atomic(&path, &text)
}

pub fn load_merkle_tree(project_root: &Path) -> Option<MerkleNode> {
    let path = merkle_file(project_root).ok()?;
    let text = fs::read_to_string(&path).ok()?;
    let file: MerkleTreeFile = match serde_json::from_str(&text) {
        Ok(f) => f,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable merkle tree; treating as absent");
            return None;
        }
    };
    let doc = file.tree?;
    match MerkleNode::from_doc(&doc) {
        Ok(tree) => Some(tree),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "malformed merkle tree; treating as absent");
            None
        }
    }
}

pub fn save_merkle_tree(project_root: &Path, tree: Option<&MerkleNode>) -> Result<()> {
    let path = merkle_file(project_root)?;
    let file = MerkleTreeFile {
        root_hash: tree.map(|t| t.hash().to_string()),
        tree: tree.map(MerkleNode::to_doc),
        timestamp: Utc::now().to_rfc3339(),
    };
    let text = serde_json::to_string_pretty(&file)?;
    write_atomic(&path, &text)
}

/// Root hash of the persisted tree, read without rebuilding anything.
pub fn stored_root_hash(project_root: &Path) -> Option<String> {
    let path = merkle_file(project_root).ok()?;
    let text = fs::read_to_string(&path).ok()?;
    serde_json::from_str::<MerkleTreeFile>(&text)
        .ok()
        .and_then(|f| f.root_hash)
}

/// SHA-256 over the file's decoded UTF-8 text. Unreadable or non-UTF-8
/// files hash to the empty string with a warning; the pass keeps going.
pub fn hash_file(abs_path: &Path) -> String {
    let bytes = match fs::read(abs_path) {
        Ok(b) => b,
        Err(e) => {
            warn!(path = %abs_path.display(), error = %e, "failed to read file for hashing");
            return String::new();
        }
    };
    match String::from_utf8(bytes) {
        Ok(text) => sha256_hex(&text),
        Err(e) => {
            warn!(path = %abs_path.display(), error = %e, "file is not valid UTF-8; skipping hash");
            String::new()
        }
    }
}

/// Scan and hash every indexable file. Hashing dominates, so the sweep runs
/// file-parallel.
pub fn collect_file_hashes(project_root: &Path) -> Result<BTreeMap<String, String>> {
    let files = scanner::scan_project(project_root)?;
    let pairs: Vec<(String, String)> = files
        .par_iter()
        .map(|f| (f.rel_path.clone(), hash_file(&f.abs_path)))
        .collect();
    Ok(pairs.into_iter().collect())
}

/// Classify the project tree against the persisted Merkle tree.
///
/// Fast path: equal root hashes mean nothing moved, so everything is
/// `unchanged` and nothing is re-read from the prior tree. Detection never
/// writes; the pipeline persists the fresh tree after the store is
/// reconciled, so a failed pass is re-detected and retried next time.
pub fn detect_changes(project_root: &Path) -> Result<ChangeSet> {
    let current = collect_file_hashes(project_root)?;

    let prior_root = stored_root_hash(project_root);
    let tree = MerkleNode::build(&current);
    let new_root = tree.as_ref().map(|t| t.hash().to_string());

    if prior_root.is_some() && new_root.is_some() && prior_root == new_root {
        return Ok(ChangeSet {
            unchanged: current.keys().cloned().collect(),
            current_hashes: current,
            tree,
            ..Default::default()
        });
    }

    let prior = load_merkle_tree(project_root)
        .map(|t| t.leaves())
        .unwrap_or_default();

    let mut changes = ChangeSet {
        current_hashes: current,
        prior_hashes: prior,
        tree,
        ..Default::default()
    };

    for (path, hash) in &changes.current_hashes {
        match changes.prior_hashes.get(path) {
            None => changes.added.push(path.clone()),
            Some(old) if old != hash => changes.modified.push(path.clone()),
            Some(_) => changes.unchanged.push(path.clone()),
        }
    }
    for path in changes.prior_hashes.keys() {
        if !changes.current_hashes.contains_key(path) {
            changes.deleted.push(path.clone());
        }
    }

    Ok(changes)
}
