use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    /// Connection pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root directory for the raw/clean object tree.
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    512
}
fn default_overlap() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Candidates fetched per modality before merging.
    #[serde(default = "default_top_k")]
    pub top_k: i64,
    /// Final result count returned after rank fusion.
    #[serde(default = "default_rerank_top_k")]
    pub rerank_top_k: i64,
    /// Weight of the lexical score; the vector score gets `1 - weight`.
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f64,
    /// Per-modality sub-query deadline.
    #[serde(default = "default_subquery_timeout_secs")]
    pub subquery_timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            rerank_top_k: default_rerank_top_k(),
            lexical_weight: default_lexical_weight(),
            subquery_timeout_secs: default_subquery_timeout_secs(),
        }
    }
}

fn default_top_k() -> i64 {
    50
}
fn default_rerank_top_k() -> i64 {
    10
}
fn default_lexical_weight() -> f64 {
    0.5
}
fn default_subquery_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Base URL of the inference service (e.g. `http://127.0.0.1:8080`).
    /// The client posts to `{base_url}/v1/embeddings`.
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Batches in flight at once; results are reassembled in input order.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_model() -> String {
    "main".to_string()
}
fn default_batch_size() -> usize {
    10
}
fn default_max_parallel() -> usize {
    4
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.overlap must be < chunking.chunk_size");
    }

    if config.retrieval.rerank_top_k < 1 {
        anyhow::bail!("retrieval.rerank_top_k must be >= 1");
    }
    if config.retrieval.top_k < config.retrieval.rerank_top_k {
        anyhow::bail!("retrieval.top_k must be >= retrieval.rerank_top_k");
    }
    if !(0.0..=1.0).contains(&config.retrieval.lexical_weight) {
        anyhow::bail!("retrieval.lexical_weight must be in [0.0, 1.0]");
    }

    if config.db.max_connections == 0 {
        anyhow::bail!("db.max_connections must be > 0");
    }

    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.max_parallel == 0 {
        anyhow::bail!("embedding.max_parallel must be > 0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    #[test]
    fn defaults_applied() {
        let f = write_config(
            r#"
            [db]
            path = "/tmp/shelf.sqlite"
            [storage]
            root = "/tmp/shelf-objects"
            [embedding]
            base_url = "http://127.0.0.1:8080"
            dims = 1024
            [server]
            bind = "127.0.0.1:8081"
            "#,
        );
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.db.max_connections, 5);
        assert_eq!(cfg.chunking.chunk_size, 512);
        assert_eq!(cfg.chunking.overlap, 64);
        assert_eq!(cfg.embedding.batch_size, 10);
        assert_eq!(cfg.retrieval.top_k, 50);
        assert_eq!(cfg.retrieval.rerank_top_k, 10);
        assert!((cfg.retrieval.lexical_weight - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let f = write_config(
            r#"
            [db]
            path = "/tmp/shelf.sqlite"
            [storage]
            root = "/tmp/shelf-objects"
            [chunking]
            chunk_size = 100
            overlap = 100
            [embedding]
            base_url = "http://127.0.0.1:8080"
            dims = 8
            [server]
            bind = "127.0.0.1:8081"
            "#,
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn weight_out_of_range_rejected() {
        let f = write_config(
            r#"
            [db]
            path = "/tmp/shelf.sqlite"
            [storage]
            root = "/tmp/shelf-objects"
            [retrieval]
            lexical_weight = 1.5
            [embedding]
            base_url = "http://127.0.0.1:8080"
            dims = 8
            [server]
            bind = "127.0.0.1:8081"
            "#,
        );
        assert!(load_config(f.path()).is_err());
    }
}
