use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::extractor::CodeBlock;

/// Stored documents keep at most this many characters of block source.
const MAX_DOCUMENT_CHARS: usize = 10_000;

/// One stored record: embedding plus sanitized metadata plus document text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub metadata: Map<String, Value>,
    pub document: String,
}

/// On-disk shape of one collection. Flat JSON keyed by record id — no
/// external database, same storage strategy as the index metadata.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CollectionFile {
    records: BTreeMap<String, VectorRecord>,
}

impl CollectionFile {
    fn load(path: &Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str::<Self>(&text) {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "collection schema changed or corrupted; starting empty");
                Self::default()
            }
        }
    }
}

/// Nearest-neighbor response, field-for-field what the query tool returns.
#[derive(Debug, Default, Serialize)]
pub struct QueryResult {
    pub ids: Vec<String>,
    pub documents: Vec<String>,
    pub metadatas: Vec<Map<String, Value>>,
    pub distances: Vec<f32>,
}

/// Flat-file vector collections, one JSON file per collection under the
/// persist dir (default `~/.semdex`). Writes are serialized by the
/// per-project pass lock; reads work on a point-in-time snapshot.
pub struct VectorStore {
    persist_dir: PathBuf,
}

impl VectorStore {
    pub fn new(persist_dir: PathBuf) -> Self {
        Self { persist_dir }
    }

    fn collection_path(&self, collection: &str) -> PathBuf {
        self.persist_dir.join(format!("{collection}.json"))
    }

    fn save(&self, collection: &str, file: &CollectionFile) -> Result<()> {
        fs::create_dir_all(&self.persist_dir)
            .with_context(|| format!("Failed to create store dir {}", self.persist_dir.display()))?;
        let path = self.collection_path(collection);
        let tmp = path.with_extension("json.tmp");
        let text = serde_json::to_string(file)?;
        fs::write(&tmp, text)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    /// Insert or overwrite one record per block; equal ids replace in place,
    /// which is what makes re-indexing an unchanged file idempotent.
    pub fn upsert_blocks(
        &self,
        collection: &str,
        blocks: &[CodeBlock],
        embeddings: &[Vec<f32>],
    ) -> Result<()> {
        let mut file = CollectionFile::load(&self.collection_path(collection));
        let now = Utc::now().to_rfc3339();

        for (block, embedding) in blocks.iter().zip(embeddings.iter()) {
            let mut metadata = Map::new();
            metadata.insert("type".into(), sanitize_value(Value::from(block.block_type.clone())));
            metadata.insert("name".into(), sanitize_value(Value::from(block.name.clone())));
            metadata.insert("file_path".into(), sanitize_value(Value::from(block.file_path.clone())));
            metadata.insert("line_number".into(), sanitize_value(Value::from(block.line_number)));
            metadata.insert("signature".into(), sanitize_value(Value::from(block.signature.clone())));
            metadata.insert("last_updated".into(), Value::from(now.clone()));

            let document: String = block.code.chars().take(MAX_DOCUMENT_CHARS).collect();

            file.records.insert(
                block.id.clone(),
                VectorRecord {
                    id: block.id.clone(),
                    embedding: embedding.clone(),
                    metadata,
                    document,
                },
            );
        }

        self.save(collection, &file)
    }

    /// Delete every record whose metadata `file_path` equals the given path.
    /// Unknown collections and unmatched paths are clean no-ops.
    pub fn delete_by_file(&self, collection: &str, file_path: &str) -> Result<()> {
        let path = self.collection_path(collection);
        if !path.exists() {
            return Ok(());
        }
        let mut file = CollectionFile::load(&path);
        let before = file.records.len();
        file.records.retain(|_, record| {
            record.metadata.get("file_path").and_then(Value::as_str) != Some(file_path)
        });
        if file.records.len() == before {
            return Ok(());
        }
        self.save(collection, &file)
    }

    /// Brute-force cosine nearest neighbors. Read failures degrade to an
    /// empty result; callers treat the store as best-effort for queries.
    pub fn query_by_embedding(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> QueryResult {
        let file = CollectionFile::load(&self.collection_path(collection));

        let mut scored: Vec<(f32, &VectorRecord)> = file
            .records
            .values()
            .map(|record| (cosine_distance(embedding, &record.embedding), record))
            .collect();
        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
        scored.truncate(top_k);

        let mut result = QueryResult::default();
        for (distance, record) in scored {
            result.ids.push(record.id.clone());
            result.documents.push(record.document.clone());
            result.metadatas.push(record.metadata.clone());
            result.distances.push(distance);
        }
        result
    }

    pub fn get_by_id(&self, collection: &str, id: &str) -> Option<VectorRecord> {
        CollectionFile::load(&self.collection_path(collection))
            .records
            .get(id)
            .cloned()
    }

    /// All record ids for a collection, in id order. Test and tooling aid.
    pub fn record_ids(&self, collection: &str) -> Vec<String> {
        CollectionFile::load(&self.collection_path(collection))
            .records
            .keys()
            .cloned()
            .collect()
    }
}

/// Metadata values must be scalar; lists and maps are JSON-encoded into a
/// string so no information is dropped (reads receive the encoded form).
fn sanitize_value(value: Value) -> Value {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => value,
        other => Value::String(other.to_string()),
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
