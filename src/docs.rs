//! Document listing and status lookup.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::models::DocumentStatus;

/// One row of a document listing, with its chunk count.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub doc_id: String,
    pub owner: String,
    pub filename: String,
    pub content_type: String,
    pub status: DocumentStatus,
    pub progress: i64,
    pub error_message: Option<String>,
    pub chunks: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentList {
    pub documents: Vec<DocumentSummary>,
    pub total: i64,
}

/// List documents for `owner`, newest first. The owner `all` lists every
/// tenant's documents.
pub async fn list_documents(
    pool: &SqlitePool,
    owner: &str,
    limit: i64,
    offset: i64,
) -> Result<DocumentList> {
    let all = owner == "all";

    let total: i64 = if all {
        sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(pool)
            .await?
    } else {
        sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE owner = ?")
            .bind(owner)
            .fetch_one(pool)
            .await?
    };

    let sql = format!(
        r#"
        SELECT d.id, d.owner, d.filename, d.content_type, d.status, d.progress,
               d.error_message, d.created_at, d.updated_at,
               (SELECT COUNT(*) FROM chunks c WHERE c.doc_id = d.id) AS chunks
        FROM documents d
        {}
        ORDER BY d.created_at DESC
        LIMIT ? OFFSET ?
        "#,
        if all { "" } else { "WHERE d.owner = ?" }
    );

    let mut q = sqlx::query(&sql);
    if !all {
        q = q.bind(owner);
    }
    let rows = q.bind(limit).bind(offset).fetch_all(pool).await?;

    let documents = rows.into_iter().map(|row| row_to_summary(&row)).collect();
    Ok(DocumentList { documents, total })
}

/// Status lookup for one document, scoped to its owner.
pub async fn document_status(
    pool: &SqlitePool,
    doc_id: &str,
    owner: &str,
) -> Result<Option<DocumentSummary>> {
    let row = sqlx::query(
        r#"
        SELECT d.id, d.owner, d.filename, d.content_type, d.status, d.progress,
               d.error_message, d.created_at, d.updated_at,
               (SELECT COUNT(*) FROM chunks c WHERE c.doc_id = d.id) AS chunks
        FROM documents d
        WHERE d.id = ? AND d.owner = ?
        "#,
    )
    .bind(doc_id)
    .bind(owner)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| row_to_summary(&row)))
}

fn row_to_summary(row: &sqlx::sqlite::SqliteRow) -> DocumentSummary {
    let status: String = row.get("status");
    DocumentSummary {
        doc_id: row.get("id"),
        owner: row.get("owner"),
        filename: row.get("filename"),
        content_type: row.get("content_type"),
        status: DocumentStatus::parse(&status).unwrap_or(DocumentStatus::Failed),
        progress: row.get("progress"),
        error_message: row.get("error_message"),
        chunks: row.get("chunks"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
