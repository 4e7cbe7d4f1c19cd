use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the per-project directory holding metadata and the Merkle tree.
pub const INDEX_DIR_NAME: &str = ".code_index";

/// Connection settings for the OpenAI-compatible embeddings endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    /// Per-request timeout; an expired call fails that chunk, never the pass.
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Controls when and how oversize block texts are split before embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Texts up to this many characters are embedded whole.
    pub max_length: usize,
    /// Target characters per chunk once a text is split.
    pub chunk_size: usize,
    /// Characters of the previous chunk repeated at the start of the next.
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_length: 8_000,
            chunk_size: 4_000,
            chunk_overlap: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    /// Directory holding vector collection files. Defaults to `~/.semdex`.
    pub store_dir: Option<PathBuf>,
    /// Seconds between periodic incremental passes.
    pub index_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            store_dir: None,
            index_interval_secs: 300,
        }
    }
}

impl Config {
    pub fn store_dir(&self) -> PathBuf {
        match &self.store_dir {
            Some(dir) => dir.clone(),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".semdex"),
        }
    }
}

/// Load `.semdex.json` from the project root when present, then let the
/// environment override the networked and chunking settings.
pub fn load_config(project_root: &Path) -> Config {
    let primary = project_root.join(".semdex.json");

    let mut cfg = std::fs::read_to_string(&primary)
        .ok()
        .and_then(|text| serde_json::from_str::<Config>(&text).ok())
        .unwrap_or_default();

    apply_env_overrides(&mut cfg);
    cfg
}

fn apply_env_overrides(cfg: &mut Config) {
    if let Some(key) = env_string("OPENAI_API_KEY") {
        cfg.embedding.api_key = key;
    }
    if let Some(url) = env_string("OPENAI_BASE_URL") {
        cfg.embedding.base_url = url;
    }
    if let Some(model) = env_string("OPENAI_MODEL_NAME") {
        cfg.embedding.model = model;
    }
    if let Some(n) = env_usize("MAX_LENGTH") {
        cfg.chunking.max_length = n;
    }
    if let Some(n) = env_usize("CHUNK_SIZE") {
        cfg.chunking.chunk_size = n;
    }
    if let Some(n) = env_usize("CHUNK_OVERLAP") {
        cfg.chunking.chunk_overlap = n;
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_usize(name: &str) -> Option<usize> {
    env_string(name).and_then(|s| s.parse().ok())
}
