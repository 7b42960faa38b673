//! Ingestion pipeline: parse, store, chunk, embed, persist.
//!
//! A document moves through `processing → ready` or `processing → failed`,
//! both terminal. All database writes for one attempt happen in a single
//! transaction, so a failure anywhere (parse, storage, embedding, SQL)
//! leaves no partial chunks or embeddings behind; the attempt is then
//! recorded as a `failed` document row on a fresh connection.
//!
//! [`IngestionPipeline::ingest`] never returns an error to the caller.
//! Failures surface as the outcome's `failed` status plus a human-readable
//! message, which is also what the HTTP and CLI surfaces report.

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

use crate::chunk::chunk_document;
use crate::config::ChunkingConfig;
use crate::embed::{vec_to_blob, Embedder};
use crate::models::{ChunkDraft, DocumentStatus};
use crate::parse::{FormatParser, ParsedDocument};
use crate::store::{clean_key, raw_key, ObjectStore};

/// One ingestion attempt. `doc_id` must be unique per attempt; a retry of
/// a failed document mints a fresh id.
pub struct IngestRequest {
    pub doc_id: String,
    pub owner: String,
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// What the caller learns about an attempt. `error_message` is set iff
/// `status` is `Failed`.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub doc_id: String,
    pub filename: String,
    pub status: DocumentStatus,
    pub chunks: usize,
    pub error_message: Option<String>,
}

pub struct IngestionPipeline {
    pool: SqlitePool,
    store: Arc<dyn ObjectStore>,
    embedder: Arc<dyn Embedder>,
    parser: Arc<FormatParser>,
    chunking: ChunkingConfig,
}

impl IngestionPipeline {
    pub fn new(
        pool: SqlitePool,
        store: Arc<dyn ObjectStore>,
        embedder: Arc<dyn Embedder>,
        parser: Arc<FormatParser>,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            pool,
            store,
            embedder,
            parser,
            chunking,
        }
    }

    /// Run one ingestion attempt to its terminal status.
    pub async fn ingest(&self, request: IngestRequest) -> IngestOutcome {
        match self.run(&request).await {
            Ok(chunks) => IngestOutcome {
                doc_id: request.doc_id,
                filename: request.filename,
                status: DocumentStatus::Ready,
                chunks,
                error_message: None,
            },
            Err(err) => {
                let message = format!("{:#}", err);
                tracing::warn!(doc_id = %request.doc_id, error = %message, "ingestion failed");
                self.mark_failed(&request.doc_id, &request.owner, &request.filename, &request.content_type, &message)
                    .await;
                IngestOutcome {
                    doc_id: request.doc_id,
                    filename: request.filename,
                    status: DocumentStatus::Failed,
                    chunks: 0,
                    error_message: Some(message),
                }
            }
        }
    }

    /// Ingest pre-fetched HTML by URL. No raw object is stored; `raw_path`
    /// records the URL itself, and the filename comes from the page title.
    pub async fn ingest_url(
        &self,
        url: &str,
        html: &[u8],
        content_type: &str,
        owner: &str,
    ) -> IngestOutcome {
        let doc_id = Uuid::new_v4().to_string();
        let parsed = match self.parser.parse(html, content_type, url) {
            Ok(parsed) => parsed,
            Err(err) => {
                let message = format!("{:#}", anyhow!(err));
                tracing::warn!(url, error = %message, "url ingestion failed");
                self.mark_failed(&doc_id, owner, url, content_type, &message)
                    .await;
                return IngestOutcome {
                    doc_id,
                    filename: url.to_string(),
                    status: DocumentStatus::Failed,
                    chunks: 0,
                    error_message: Some(message),
                };
            }
        };

        let filename = parsed
            .metadata
            .get("title")
            .and_then(|v| v.as_str())
            .filter(|t| !t.is_empty())
            .unwrap_or(url)
            .to_string();

        match self
            .persist(&doc_id, owner, &filename, content_type, url, &parsed)
            .await
        {
            Ok(chunks) => IngestOutcome {
                doc_id,
                filename,
                status: DocumentStatus::Ready,
                chunks,
                error_message: None,
            },
            Err(err) => {
                let message = format!("{:#}", err);
                tracing::warn!(url, error = %message, "url ingestion failed");
                self.mark_failed(&doc_id, owner, &filename, content_type, &message)
                    .await;
                IngestOutcome {
                    doc_id,
                    filename,
                    status: DocumentStatus::Failed,
                    chunks: 0,
                    error_message: Some(message),
                }
            }
        }
    }

    async fn run(&self, request: &IngestRequest) -> Result<usize> {
        let parsed = self
            .parser
            .parse(&request.bytes, &request.content_type, &request.filename)
            .context("parse failed")?;

        let raw = raw_key(&request.owner, &request.doc_id, &request.filename);
        self.store
            .put(&raw, &request.bytes, &request.content_type)
            .await
            .context("failed to store raw object")?;

        self.persist(
            &request.doc_id,
            &request.owner,
            &request.filename,
            &request.content_type,
            &raw,
            &parsed,
        )
        .await
    }

    /// Store the normalized text, then write document, chunks, FTS rows and
    /// embeddings in one transaction.
    async fn persist(
        &self,
        doc_id: &str,
        owner: &str,
        filename: &str,
        content_type: &str,
        raw_path: &str,
        parsed: &ParsedDocument,
    ) -> Result<usize> {
        let clean = clean_key(owner, doc_id);
        self.store
            .put(&clean, parsed.text.as_bytes(), "text/markdown")
            .await
            .context("failed to store normalized text")?;

        let doc_metadata = Value::Object(parsed.metadata.clone());
        let drafts = chunk_document(&parsed.text, &doc_metadata, &self.chunking);

        let texts: Vec<String> = drafts.iter().map(|d| d.text.clone()).collect();
        let now = chrono::Utc::now().timestamp();

        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;

        sqlx::query(
            r#"
            INSERT INTO documents
                (id, owner, filename, content_type, raw_path, clean_path,
                 status, progress, error_message, metadata_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, NULL, ?, ?, ?)
            "#,
        )
        .bind(doc_id)
        .bind(owner)
        .bind(filename)
        .bind(content_type)
        .bind(raw_path)
        .bind(&clean)
        .bind(DocumentStatus::Processing.as_str())
        .bind(doc_metadata.to_string())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("failed to insert document")?;

        let chunk_ids = insert_chunks(&mut tx, doc_id, owner, &drafts, now).await?;

        // Embedding happens inside the transaction window on purpose: a
        // failure rolls everything back, including the chunk rows.
        let vectors = self
            .embedder
            .embed(&texts)
            .await
            .context("embedding failed")?;
        if vectors.len() != texts.len() {
            anyhow::bail!(
                "embedding count mismatch: {} texts, {} vectors",
                texts.len(),
                vectors.len()
            );
        }

        for (chunk_id, vector) in chunk_ids.iter().zip(vectors.iter()) {
            sqlx::query(
                r#"
                INSERT INTO embeddings (id, chunk_id, doc_id, owner, vector, dims, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(chunk_id)
            .bind(doc_id)
            .bind(owner)
            .bind(vec_to_blob(vector))
            .bind(vector.len() as i64)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("failed to insert embedding")?;
        }

        sqlx::query(
            "UPDATE documents SET status = ?, progress = 100, updated_at = ? WHERE id = ?",
        )
        .bind(DocumentStatus::Ready.as_str())
        .bind(chrono::Utc::now().timestamp())
        .bind(doc_id)
        .execute(&mut *tx)
        .await
        .context("failed to mark document ready")?;

        tx.commit().await.context("failed to commit")?;

        Ok(chunk_ids.len())
    }

    /// Best-effort terminal `failed` record, written outside the aborted
    /// transaction. Never demotes a row that already reached a terminal
    /// status: a duplicate-id retry that collides with a `ready` document
    /// must not flip the healthy document to `failed`.
    async fn mark_failed(
        &self,
        doc_id: &str,
        owner: &str,
        filename: &str,
        content_type: &str,
        message: &str,
    ) {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO documents
                (id, owner, filename, content_type, raw_path, clean_path,
                 status, progress, error_message, metadata_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, '', '', ?, 0, ?, '{}', ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                error_message = excluded.error_message,
                updated_at = excluded.updated_at
            WHERE documents.status = ?
            "#,
        )
        .bind(doc_id)
        .bind(owner)
        .bind(filename)
        .bind(content_type)
        .bind(DocumentStatus::Failed.as_str())
        .bind(message)
        .bind(now)
        .bind(now)
        .bind(DocumentStatus::Processing.as_str())
        .execute(&self.pool)
        .await;

        if let Err(err) = result {
            tracing::error!(doc_id, error = %err, "failed to record failed document");
        }
    }
}

async fn insert_chunks(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    doc_id: &str,
    owner: &str,
    drafts: &[ChunkDraft],
    now: i64,
) -> Result<Vec<String>> {
    let mut chunk_ids = Vec::with_capacity(drafts.len());
    for draft in drafts {
        let chunk_id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO chunks (id, doc_id, owner, text, position, metadata_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chunk_id)
        .bind(doc_id)
        .bind(owner)
        .bind(&draft.text)
        .bind(draft.position)
        .bind(draft.metadata.to_string())
        .bind(now)
        .execute(&mut **tx)
        .await
        .context("failed to insert chunk")?;

        sqlx::query(
            "INSERT INTO chunks_fts (chunk_id, doc_id, owner, text) VALUES (?, ?, ?, ?)",
        )
        .bind(&chunk_id)
        .bind(doc_id)
        .bind(owner)
        .bind(&draft.text)
        .execute(&mut **tx)
        .await
        .context("failed to insert fts row")?;

        chunk_ids.push(chunk_id);
    }
    Ok(chunk_ids)
}
