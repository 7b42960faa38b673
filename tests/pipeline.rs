//! End-to-end pipeline tests: ingest documents through the real SQLite
//! schema and object store, with a stub embedder standing in for the
//! inference service.

use async_trait::async_trait;
use sqlx::Row;
use std::path::Path;
use std::sync::Arc;

use docshelf::config::{
    ChunkingConfig, Config, DbConfig, EmbeddingConfig, RetrievalConfig, ServerConfig,
    StorageConfig,
};
use docshelf::db;
use docshelf::docs;
use docshelf::embed::{EmbedError, Embedder};
use docshelf::ingest::{IngestRequest, IngestionPipeline};
use docshelf::migrate;
use docshelf::models::DocumentStatus;
use docshelf::parse::{Capabilities, FormatParser};
use docshelf::search::{HybridSearchEngine, SearchFilters};
use docshelf::store::FsObjectStore;

const DIMS: usize = 4;

/// Deterministic embedder: a crude bag-of-letters projection, good enough
/// to make related texts point in similar directions.
struct StubEmbedder;

#[async_trait]
impl Embedder for StubEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = [0.0f32; DIMS];
                for (i, b) in t.bytes().enumerate() {
                    v[i % DIMS] += (b % 17) as f32;
                }
                v.to_vec()
            })
            .collect())
    }
    fn dims(&self) -> usize {
        DIMS
    }
}

/// Always fails, as an unreachable inference service would.
struct BrokenEmbedder;

#[async_trait]
impl Embedder for BrokenEmbedder {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Err(EmbedError::Upstream {
            status: 503,
            body: "service unavailable".to_string(),
        })
    }
    fn dims(&self) -> usize {
        DIMS
    }
}

fn test_config(root: &Path) -> Config {
    Config {
        db: DbConfig {
            path: root.join("shelf.sqlite"),
            max_connections: 5,
        },
        storage: StorageConfig {
            root: root.join("objects"),
        },
        chunking: ChunkingConfig {
            chunk_size: 64,
            overlap: 8,
        },
        retrieval: RetrievalConfig::default(),
        embedding: EmbeddingConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            model: "main".to_string(),
            dims: DIMS,
            batch_size: 10,
            max_parallel: 2,
            timeout_secs: 5,
        },
        server: ServerConfig {
            bind: "127.0.0.1:0".to_string(),
        },
    }
}

async fn setup(
    root: &Path,
    embedder: Arc<dyn Embedder>,
) -> (sqlx::SqlitePool, IngestionPipeline, HybridSearchEngine) {
    let cfg = test_config(root);
    let pool = db::connect(&cfg.db).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let store = Arc::new(FsObjectStore::new(cfg.storage.root.clone()));
    let parser = Arc::new(FormatParser::new(Capabilities { ocr: false }));

    let pipeline = IngestionPipeline::new(
        pool.clone(),
        store,
        embedder.clone(),
        parser,
        cfg.chunking.clone(),
    );
    let engine = HybridSearchEngine::new(pool.clone(), embedder, cfg.retrieval.clone());
    (pool, pipeline, engine)
}

fn text_request(doc_id: &str, owner: &str, filename: &str, body: &str) -> IngestRequest {
    IngestRequest {
        doc_id: doc_id.to_string(),
        owner: owner.to_string(),
        filename: filename.to_string(),
        content_type: "text/plain".to_string(),
        bytes: body.as_bytes().to_vec(),
    }
}

#[tokio::test]
async fn ingest_reaches_ready_with_matching_counts() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, pipeline, _) = setup(dir.path(), Arc::new(StubEmbedder)).await;

    let body = "The first paragraph talks about deployment.\n\n\
                The second paragraph covers rollback procedures in detail.\n\n\
                A third paragraph describes monitoring and alerting for the fleet.";
    let outcome = pipeline
        .ingest(text_request("doc-1", "acme", "runbook.txt", body))
        .await;

    assert_eq!(outcome.status, DocumentStatus::Ready);
    assert!(outcome.chunks > 1);
    assert!(outcome.error_message.is_none());

    let chunk_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE doc_id = ?")
        .bind("doc-1")
        .fetch_one(&pool)
        .await
        .unwrap();
    let embedding_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM embeddings WHERE doc_id = ?")
            .bind("doc-1")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(chunk_count as usize, outcome.chunks);
    assert_eq!(chunk_count, embedding_count);

    // Positions are contiguous from 0.
    let positions: Vec<i64> =
        sqlx::query_scalar("SELECT position FROM chunks WHERE doc_id = ? ORDER BY position")
            .bind("doc-1")
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(positions, (0..chunk_count).collect::<Vec<_>>());

    // Document row is terminal.
    let row = sqlx::query("SELECT status, progress, raw_path, clean_path FROM documents WHERE id = ?")
        .bind("doc-1")
        .fetch_one(&pool)
        .await
        .unwrap();
    let status: String = row.get("status");
    let progress: i64 = row.get("progress");
    assert_eq!(status, "ready");
    assert_eq!(progress, 100);

    // Raw and clean objects land on disk under the configured root.
    let raw_path: String = row.get("raw_path");
    let clean_path: String = row.get("clean_path");
    assert_eq!(raw_path, "raw/acme/doc-1/runbook.txt");
    assert_eq!(clean_path, "clean/acme/doc-1/content.md");
    assert!(dir.path().join("objects").join(&raw_path).exists());
    assert!(dir.path().join("objects").join(&clean_path).exists());
}

#[tokio::test]
async fn embedding_failure_rolls_back_and_records_failed() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, pipeline, _) = setup(dir.path(), Arc::new(BrokenEmbedder)).await;

    let outcome = pipeline
        .ingest(text_request(
            "doc-x",
            "acme",
            "notes.txt",
            "Some text that would have been chunked and embedded.",
        ))
        .await;

    assert_eq!(outcome.status, DocumentStatus::Failed);
    assert_eq!(outcome.chunks, 0);
    let message = outcome.error_message.expect("failure must carry a message");
    assert!(message.contains("embedding"), "message was: {}", message);

    // The aborted transaction left nothing behind.
    let chunk_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE doc_id = ?")
        .bind("doc-x")
        .fetch_one(&pool)
        .await
        .unwrap();
    let embedding_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM embeddings WHERE doc_id = ?")
            .bind("doc-x")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(chunk_count, 0);
    assert_eq!(embedding_count, 0);

    // But the attempt itself is recorded as failed.
    let status: String = sqlx::query_scalar("SELECT status FROM documents WHERE id = ?")
        .bind("doc-x")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status, "failed");
}

#[tokio::test]
async fn retrying_a_ready_doc_id_does_not_demote_it() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, pipeline, _) = setup(dir.path(), Arc::new(StubEmbedder)).await;

    let outcome = pipeline
        .ingest(text_request(
            "doc-1",
            "acme",
            "guide.txt",
            "A document that successfully reaches the ready state.",
        ))
        .await;
    assert_eq!(outcome.status, DocumentStatus::Ready);
    let committed = outcome.chunks;

    // Ids are attempt-unique: reusing one collides on the primary key and
    // the second attempt fails, but the first document must stay intact.
    let retry = pipeline
        .ingest(text_request(
            "doc-1",
            "acme",
            "guide.txt",
            "A second attempt reusing the same id.",
        ))
        .await;
    assert_eq!(retry.status, DocumentStatus::Failed);

    let status: String = sqlx::query_scalar("SELECT status FROM documents WHERE id = ?")
        .bind("doc-1")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status, "ready");

    let chunk_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE doc_id = ?")
        .bind("doc-1")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(chunk_count as usize, committed);
}

#[tokio::test]
async fn unsupported_format_fails_without_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, pipeline, _) = setup(dir.path(), Arc::new(StubEmbedder)).await;

    let outcome = pipeline
        .ingest(IngestRequest {
            doc_id: "doc-bin".to_string(),
            owner: "acme".to_string(),
            filename: "blob.xyz".to_string(),
            content_type: "application/octet-stream".to_string(),
            bytes: vec![0xff, 0xfe, 0x00, 0x01],
        })
        .await;

    assert_eq!(outcome.status, DocumentStatus::Failed);
    assert!(outcome
        .error_message
        .as_deref()
        .unwrap_or("")
        .contains("unsupported format"));

    let chunk_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE doc_id = ?")
        .bind("doc-bin")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(chunk_count, 0);
}

#[tokio::test]
async fn search_finds_ingested_text_and_respects_owner_scope() {
    let dir = tempfile::tempdir().unwrap();
    let (_pool, pipeline, engine) = setup(dir.path(), Arc::new(StubEmbedder)).await;

    let outcome = pipeline
        .ingest(text_request(
            "doc-a",
            "acme",
            "deploy.txt",
            "Deployment checklist: verify the migration, then restart the workers.",
        ))
        .await;
    assert_eq!(outcome.status, DocumentStatus::Ready);

    let outcome = pipeline
        .ingest(text_request(
            "doc-b",
            "acme",
            "lunch.txt",
            "The cafeteria menu rotates weekly and includes soup.",
        ))
        .await;
    assert_eq!(outcome.status, DocumentStatus::Ready);

    let hits = engine
        .search("deployment checklist", "acme", Some(5), &SearchFilters::default())
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].doc_id, "doc-a");
    assert_eq!(hits[0].source(), "deploy.txt");

    // Another tenant sees nothing.
    let hits = engine
        .search("deployment checklist", "rival", Some(5), &SearchFilters::default())
        .await
        .unwrap();
    assert!(hits.is_empty());

    // Empty queries return no results rather than erroring.
    let hits = engine
        .search("   ", "acme", Some(5), &SearchFilters::default())
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn search_filters_restrict_to_doc_ids() {
    let dir = tempfile::tempdir().unwrap();
    let (_pool, pipeline, engine) = setup(dir.path(), Arc::new(StubEmbedder)).await;

    for (id, text) in [
        ("doc-1", "Kubernetes deployment guide for the platform team."),
        ("doc-2", "Deployment of the billing service is automated."),
    ] {
        let outcome = pipeline
            .ingest(text_request(id, "acme", &format!("{}.txt", id), text))
            .await;
        assert_eq!(outcome.status, DocumentStatus::Ready);
    }

    let filters = SearchFilters {
        doc_ids: Some(vec!["doc-2".to_string()]),
    };
    let hits = engine
        .search("deployment", "acme", Some(10), &filters)
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.doc_id == "doc-2"));
}

#[tokio::test]
async fn request_top_k_widens_a_narrow_candidate_pool() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, pipeline, _) = setup(dir.path(), Arc::new(StubEmbedder)).await;

    // Four paragraphs, each its own chunk, each matching the query term.
    let body = "Deployment step one prepares the artifact.\n\n\
                Deployment step two uploads the artifact.\n\n\
                Deployment step three swaps the traffic.\n\n\
                Deployment step four cleans old releases.";
    let outcome = pipeline
        .ingest(text_request("doc-1", "acme", "steps.txt", body))
        .await;
    assert_eq!(outcome.status, DocumentStatus::Ready);
    assert!(outcome.chunks >= 4);

    // Configured candidate pool of 2 would starve a top_k=4 request if the
    // request could not widen it.
    let narrow = RetrievalConfig {
        top_k: 2,
        rerank_top_k: 1,
        lexical_weight: 1.0,
        subquery_timeout_secs: 10,
    };
    let engine = HybridSearchEngine::new(pool.clone(), Arc::new(StubEmbedder), narrow);
    let hits = engine
        .search("deployment", "acme", Some(4), &SearchFilters::default())
        .await
        .unwrap();

    let lexical_hits = hits.iter().filter(|h| h.lexical_score > 0.0).count();
    assert!(
        lexical_hits >= 3,
        "expected the lexical pool to widen past 2, got {}",
        lexical_hits
    );
}

#[tokio::test]
async fn ingest_url_uses_title_and_stores_url_as_raw_path() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, pipeline, _) = setup(dir.path(), Arc::new(StubEmbedder)).await;

    let html = "<html><head><title>Operations Handbook</title></head>\
                <body><article><h1>Operations Handbook</h1>\
                <p>On-call rotations change every Monday morning.</p>\
                </article></body></html>";
    let outcome = pipeline
        .ingest_url("https://wiki.example.com/ops", html.as_bytes(), "text/html", "acme")
        .await;

    assert_eq!(outcome.status, DocumentStatus::Ready);
    assert_eq!(outcome.filename, "Operations Handbook");
    assert!(outcome.chunks > 0);

    let raw_path: String = sqlx::query_scalar("SELECT raw_path FROM documents WHERE id = ?")
        .bind(&outcome.doc_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(raw_path, "https://wiki.example.com/ops");
}

#[tokio::test]
async fn listing_and_status_report_chunk_counts() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, pipeline, _) = setup(dir.path(), Arc::new(StubEmbedder)).await;

    let outcome = pipeline
        .ingest(text_request(
            "doc-1",
            "acme",
            "a.txt",
            "Enough text to produce at least one chunk of output.",
        ))
        .await;
    assert_eq!(outcome.status, DocumentStatus::Ready);

    let summary = docs::document_status(&pool, "doc-1", "acme")
        .await
        .unwrap()
        .expect("document should exist");
    assert_eq!(summary.status, DocumentStatus::Ready);
    assert_eq!(summary.chunks as usize, outcome.chunks);

    // Wrong owner cannot see the document.
    assert!(docs::document_status(&pool, "doc-1", "rival")
        .await
        .unwrap()
        .is_none());

    let list = docs::list_documents(&pool, "acme", 10, 0).await.unwrap();
    assert_eq!(list.total, 1);
    assert_eq!(list.documents[0].doc_id, "doc-1");

    // `all` lists every tenant.
    let list = docs::list_documents(&pool, "all", 10, 0).await.unwrap();
    assert_eq!(list.total, 1);
}
