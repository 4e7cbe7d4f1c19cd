use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{debug, info, warn};

use crate::chunker;
use crate::config::Config;
use crate::embeddings::EmbeddingProvider;
use crate::extractor::{self, CodeBlock};
use crate::merkle::MerkleNode;
use crate::store::{QueryResult, VectorStore};
use crate::tracker;

/// Vector-collection name for a project:
/// `<basename>-<first 8 hex of md5(absolute path)>`. Stable across runs;
/// same-named projects at different paths get distinct collections.
pub fn collection_name(project_root: &Path) -> String {
    let resolved = project_root
        .canonicalize()
        .unwrap_or_else(|_| project_root.to_path_buf());
    let digest = format!("{:x}", md5::compute(resolved.to_string_lossy().as_bytes()));
    let basename = resolved
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string());
    format!("{}-{}", basename, &digest[..8])
}

/// One lock per project root. Full and incremental passes take it for their
/// whole duration, so the scheduler's two workers can never interleave
/// writes against the same project.
fn project_lock(project_root: &Path) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    let registry = LOCKS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut map = registry.lock().unwrap_or_else(|e| e.into_inner());
    map.entry(project_root.to_path_buf()).or_default().clone()
}

#[derive(Debug, Default, Clone)]
pub struct PassSummary {
    pub files_processed: usize,
    pub blocks_indexed: usize,
    pub chunks_skipped: usize,
    pub files_deleted: usize,
}

/// Orchestrates detection → extraction → chunking → embedding → store
/// reconciliation, and keeps the on-disk metadata and Merkle tree current.
pub struct IndexPipeline {
    config: Config,
    store: VectorStore,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl IndexPipeline {
    pub fn new(config: Config, store: VectorStore, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            config,
            store,
            embedder,
        }
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Reprocess every indexable file as if newly added. No deletion step:
    /// equal ids overwrite, and stale records only exist for paths that no
    /// longer scan, which the next incremental pass removes.
    pub fn full_index(&self, project_root: &Path) -> Result<PassSummary> {
        let lock = project_lock(project_root);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let current = tracker::collect_file_hashes(project_root)?;
        let all_files: Vec<String> = current.keys().cloned().collect();
        info!(project = %project_root.display(), files = all_files.len(), "starting full index");

        let collection = collection_name(project_root);
        let summary = self.process_files(project_root, &collection, &all_files, false)?;

        let tree = MerkleNode::build(&current);
        tracker::save_merkle_tree(project_root, tree.as_ref())?;
        self.save_pass_metadata(project_root, current.len(), tree.as_ref())?;

        info!(
            files = summary.files_processed,
            blocks = summary.blocks_indexed,
            "full index finished"
        );
        Ok(summary)
    }

    /// Process only what changed since the last persisted tree.
    ///
    /// Deletions reconcile (and persist) first so a rename never surfaces
    /// stale records at its new path. The fresh tree is saved only after the
    /// store accepted the upserts: a crash or store failure leaves the old
    /// tree in place and the same files re-detect as modified next pass.
    pub fn incremental_index(&self, project_root: &Path) -> Result<PassSummary> {
        let lock = project_lock(project_root);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let changes = tracker::detect_changes(project_root)?;
        info!(
            added = changes.added.len(),
            modified = changes.modified.len(),
            deleted = changes.deleted.len(),
            unchanged = changes.unchanged.len(),
            "change detection finished"
        );

        let collection = collection_name(project_root);

        if !changes.deleted.is_empty() {
            let mut pruned = changes.prior_hashes.clone();
            for rel in &changes.deleted {
                self.store.delete_by_file(&collection, rel)?;
                pruned.remove(rel);
            }
            let tree = MerkleNode::build(&pruned);
            tracker::save_merkle_tree(project_root, tree.as_ref())?;
        }

        let mut to_process = changes.added.clone();
        to_process.extend(changes.modified.iter().cloned());
        to_process.sort();

        let mut summary = if to_process.is_empty() {
            PassSummary::default()
        } else {
            let summary = self.process_files(project_root, &collection, &to_process, true)?;
            tracker::save_merkle_tree(project_root, changes.tree.as_ref())?;
            summary
        };
        summary.files_deleted = changes.deleted.len();

        self.save_pass_metadata(
            project_root,
            changes.current_hashes.len(),
            changes.tree.as_ref(),
        )?;

        info!(
            files = summary.files_processed,
            blocks = summary.blocks_indexed,
            deleted = summary.files_deleted,
            "incremental index finished"
        );
        Ok(summary)
    }

    /// Extract, chunk, embed and upsert the given files. When
    /// `delete_first` is set, each file's old records are dropped right
    /// before its blocks are re-extracted, so an aborted pass leaves the
    /// collection consistent with the files processed so far.
    fn process_files(
        &self,
        project_root: &Path,
        collection: &str,
        rel_paths: &[String],
        delete_first: bool,
    ) -> Result<PassSummary> {
        let mut pairs: Vec<(String, CodeBlock)> = Vec::new();
        for rel in rel_paths {
            if delete_first {
                self.store.delete_by_file(collection, rel)?;
            }
            let abs = project_root.join(rel);
            let blocks = extractor::extract_blocks(rel, &abs);
            debug!(file = rel.as_str(), blocks = blocks.len(), "extracted blocks");
            for block in &blocks {
                pairs.extend(chunker::chunk_block(block, &self.config.chunking));
            }
        }

        let mut valid_blocks = Vec::new();
        let mut embeddings = Vec::new();
        let mut chunks_skipped = 0usize;
        for (text, block) in pairs {
            match self.embedder.embed(&text) {
                Ok(vector) => {
                    embeddings.push(vector);
                    valid_blocks.push(block);
                }
                Err(e) => {
                    warn!(block = block.id.as_str(), error = %e, "embedding failed; skipping chunk");
                    chunks_skipped += 1;
                }
            }
        }

        if !valid_blocks.is_empty() {
            self.store
                .upsert_blocks(collection, &valid_blocks, &embeddings)
                .context("vector store rejected upsert")?;
        }

        Ok(PassSummary {
            files_processed: rel_paths.len(),
            blocks_indexed: valid_blocks.len(),
            chunks_skipped,
            files_deleted: 0,
        })
    }

    fn save_pass_metadata(
        &self,
        project_root: &Path,
        total_files: usize,
        tree: Option<&MerkleNode>,
    ) -> Result<()> {
        let mut metadata = tracker::load_metadata(project_root);
        metadata.last_index_time = Some(Utc::now().to_rfc3339());
        metadata.total_files_indexed = total_files;
        metadata.merkle_root_hash = tree.map(|t| t.hash().to_string());
        tracker::save_metadata(project_root, &metadata)
    }

    /// Current index state for the `status` tool: persisted metadata plus a
    /// live hash sweep of the tree as it is right now.
    pub fn status(&self, project_root: &Path) -> Result<serde_json::Value> {
        let metadata = tracker::load_metadata(project_root);
        let file_hashes = tracker::collect_file_hashes(project_root)?;
        let index_path = tracker::index_dir(project_root)?;
        Ok(json!({
            "last_index_time": metadata.last_index_time,
            "total_files": file_hashes.len(),
            "file_hashes": file_hashes,
            "path": index_path.to_string_lossy(),
        }))
    }

    /// Embed the query text and return the store's nearest-neighbor
    /// response verbatim.
    pub fn query(&self, project_root: &Path, text: &str, top_k: usize) -> Result<QueryResult> {
        let embedding = self.embedder.embed(text)?;
        let collection = collection_name(project_root);
        Ok(self
            .store
            .query_by_embedding(&collection, &embedding, top_k))
    }
}
