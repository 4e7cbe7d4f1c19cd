use anyhow::Result;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use semdex::config::Config;
use semdex::embeddings::EmbeddingProvider;
use semdex::indexer::{collection_name, IndexPipeline};
use semdex::store::VectorStore;
use semdex::tracker;

/// Deterministic local embedder: same text → same vector, no network.
/// Counts calls so tests can assert that no-op passes embed nothing.
struct HashEmbedder {
    calls: AtomicUsize,
}

impl HashEmbedder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut vector = vec![0.0f32; 8];
        for (i, byte) in text.bytes().enumerate() {
            vector[i % 8] += byte as f32;
        }
        Ok(vector)
    }
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn pipeline_with(
    store_dir: &Path,
    embedder: Arc<HashEmbedder>,
) -> IndexPipeline {
    IndexPipeline::new(
        Config::default(),
        VectorStore::new(store_dir.to_path_buf()),
        embedder,
    )
}

#[test]
fn lifecycle_from_fresh_index_through_noop() {
    let project = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    let embedder = HashEmbedder::new();
    let pipeline = pipeline_with(store_dir.path(), Arc::clone(&embedder));
    let collection = collection_name(project.path());

    // Fresh project: one Python function, one Go function.
    write(project.path(), "a.py", "def foo(x):\n    return x\n");
    write(project.path(), "b.go", "func Bar() {}\n");

    let summary = pipeline.full_index(project.path()).unwrap();
    assert_eq!(summary.files_processed, 2);

    let metadata = tracker::load_metadata(project.path());
    assert_eq!(metadata.total_files_indexed, 2);
    assert!(metadata.last_index_time.is_some());
    assert!(metadata.merkle_root_hash.is_some());

    assert_eq!(
        pipeline.store().record_ids(&collection),
        vec!["a.py:foo:1:0", "b.go:Bar:1:0"]
    );

    // Add a TypeScript file: only the new file is processed.
    write(project.path(), "c.ts", "function baz(a,b){}\n");
    let changes = tracker::detect_changes(project.path()).unwrap();
    assert_eq!(changes.added, vec!["c.ts"]);
    assert!(changes.modified.is_empty());
    assert!(changes.deleted.is_empty());
    assert_eq!(changes.unchanged, vec!["a.py", "b.go"]);

    let calls_before = embedder.call_count();
    pipeline.incremental_index(project.path()).unwrap();
    assert_eq!(embedder.call_count() - calls_before, 1);
    assert_eq!(
        pipeline.store().record_ids(&collection),
        vec!["a.py:foo:1:0", "b.go:Bar:1:0", "c.ts:baz:1:0"]
    );

    // Modify foo's arity: same block id, refreshed signature, no duplicates.
    write(project.path(), "a.py", "def foo(x, y):\n    return x\n");
    let changes = tracker::detect_changes(project.path()).unwrap();
    assert_eq!(changes.modified, vec!["a.py"]);

    pipeline.incremental_index(project.path()).unwrap();
    let ids = pipeline.store().record_ids(&collection);
    assert_eq!(
        ids.iter().filter(|id| id.starts_with("a.py:")).count(),
        1
    );
    let record = pipeline.store().get_by_id(&collection, "a.py:foo:1:0").unwrap();
    assert_eq!(record.metadata["signature"], serde_json::json!("foo(x, y)"));

    // Delete the Go file: its records disappear and the root hash moves.
    let root_before_delete = tracker::stored_root_hash(project.path()).unwrap();
    fs::remove_file(project.path().join("b.go")).unwrap();
    let changes = tracker::detect_changes(project.path()).unwrap();
    assert_eq!(changes.deleted, vec!["b.go"]);

    pipeline.incremental_index(project.path()).unwrap();
    let ids = pipeline.store().record_ids(&collection);
    assert!(ids.iter().all(|id| !id.starts_with("b.go:")));
    let root_after_delete = tracker::stored_root_hash(project.path()).unwrap();
    assert_ne!(root_before_delete, root_after_delete);

    // No-op pass: nothing embeds and the Merkle file is not rewritten.
    let merkle_path = project.path().join(".code_index/merkle_tree.json");
    let merkle_before = fs::read_to_string(&merkle_path).unwrap();
    let calls_before = embedder.call_count();

    let summary = pipeline.incremental_index(project.path()).unwrap();
    assert_eq!(summary.files_processed, 0);
    assert_eq!(summary.files_deleted, 0);
    assert_eq!(embedder.call_count(), calls_before);
    assert_eq!(fs::read_to_string(&merkle_path).unwrap(), merkle_before);
}

#[test]
fn reindexing_an_unchanged_tree_is_idempotent() {
    let project = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    let embedder = HashEmbedder::new();
    let pipeline = pipeline_with(store_dir.path(), Arc::clone(&embedder));
    let collection = collection_name(project.path());

    write(project.path(), "a.py", "def alpha():\n    pass\n\ndef beta():\n    pass\n");

    pipeline.full_index(project.path()).unwrap();
    let first_ids = pipeline.store().record_ids(&collection);
    let first_meta = tracker::load_metadata(project.path());

    // A second full pass overwrites records in place: same ids, same counts.
    pipeline.full_index(project.path()).unwrap();
    assert_eq!(pipeline.store().record_ids(&collection), first_ids);
    let second_meta = tracker::load_metadata(project.path());
    assert_eq!(second_meta.total_files_indexed, first_meta.total_files_indexed);
    assert_eq!(second_meta.merkle_root_hash, first_meta.merkle_root_hash);
}

#[test]
fn removed_function_leaves_no_stale_record() {
    let project = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    let embedder = HashEmbedder::new();
    let pipeline = pipeline_with(store_dir.path(), Arc::clone(&embedder));
    let collection = collection_name(project.path());

    write(
        project.path(),
        "util.py",
        "def keep(a):\n    return a\n\ndef drop(b):\n    return b\n",
    );
    pipeline.full_index(project.path()).unwrap();
    assert_eq!(
        pipeline.store().record_ids(&collection),
        vec!["util.py:drop:4:0", "util.py:keep:1:0"]
    );

    // Rewrite the file without `drop`: the old record must not survive the
    // delete-before-upsert reconciliation.
    write(project.path(), "util.py", "def keep(a):\n    return a\n");
    pipeline.incremental_index(project.path()).unwrap();

    assert_eq!(
        pipeline.store().record_ids(&collection),
        vec!["util.py:keep:1:0"]
    );
}

#[test]
fn rename_moves_records_to_the_new_path() {
    let project = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    let embedder = HashEmbedder::new();
    let pipeline = pipeline_with(store_dir.path(), Arc::clone(&embedder));
    let collection = collection_name(project.path());

    write(project.path(), "old.py", "def handler(evt):\n    return evt\n");
    pipeline.full_index(project.path()).unwrap();

    fs::rename(project.path().join("old.py"), project.path().join("new.py")).unwrap();
    pipeline.incremental_index(project.path()).unwrap();

    assert_eq!(
        pipeline.store().record_ids(&collection),
        vec!["new.py:handler:1:0"]
    );
}

#[test]
fn queries_rank_the_matching_block_first() {
    let project = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    let embedder = HashEmbedder::new();
    let pipeline = pipeline_with(store_dir.path(), Arc::clone(&embedder));

    write(project.path(), "math.py", "def add(a, b):\n    return a + b\n");
    pipeline.full_index(project.path()).unwrap();

    let result = pipeline.query(project.path(), "add two numbers", 5).unwrap();
    assert_eq!(result.ids, vec!["math.py:add:1:0"]);
    assert_eq!(result.ids.len(), result.distances.len());
    assert_eq!(result.ids.len(), result.documents.len());
    assert_eq!(result.ids.len(), result.metadatas.len());
}

/// Embedder that refuses specific texts, for the per-chunk failure policy.
struct FlakyEmbedder {
    poison: &'static str,
}

impl EmbeddingProvider for FlakyEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.contains(self.poison) {
            anyhow::bail!("simulated provider outage");
        }
        Ok(vec![1.0, 0.0])
    }
}

#[test]
fn embedding_failures_skip_the_chunk_but_finish_the_pass() {
    let project = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    let pipeline = IndexPipeline::new(
        Config::default(),
        VectorStore::new(store_dir.path().to_path_buf()),
        Arc::new(FlakyEmbedder { poison: "Name: cursed" }),
    );
    let collection = collection_name(project.path());

    write(
        project.path(),
        "jobs.py",
        "def cursed():\n    pass\n\ndef blessed():\n    pass\n",
    );

    let summary = pipeline.full_index(project.path()).unwrap();
    assert_eq!(summary.files_processed, 1);
    assert_eq!(summary.blocks_indexed, 1);
    assert_eq!(summary.chunks_skipped, 1);

    // The failed chunk is absent, the healthy one landed, and the pass still
    // recorded the tree so the file is not retried forever.
    assert_eq!(
        pipeline.store().record_ids(&collection),
        vec!["jobs.py:blessed:4:0"]
    );
    assert!(tracker::stored_root_hash(project.path()).is_some());
}
