//! Hybrid search: concurrent lexical (FTS5) and vector (cosine) sub-queries
//! merged by weighted rank fusion.
//!
//! The query is embedded once; only that step can fail the request. The two
//! sub-queries then run concurrently, each bounded by a timeout, and either
//! one degrades to an empty contribution on failure so a broken modality
//! never takes retrieval down with it. Results found by both modalities
//! combine their scores; results found by one keep a zero for the other.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RetrievalConfig;
use crate::embed::{blob_to_vec, cosine_similarity, embed_query, Embedder};
use crate::models::SearchHit;

/// Optional restrictions applied to both sub-queries.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub doc_ids: Option<Vec<String>>,
}

/// A candidate from one modality, before fusion.
#[derive(Debug, Clone)]
struct Candidate {
    chunk_id: String,
    doc_id: String,
    text: String,
    metadata: Value,
    score: f64,
}

pub struct HybridSearchEngine {
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
    cfg: RetrievalConfig,
}

impl HybridSearchEngine {
    pub fn new(pool: SqlitePool, embedder: Arc<dyn Embedder>, cfg: RetrievalConfig) -> Self {
        Self {
            pool,
            embedder,
            cfg,
        }
    }

    /// Run a hybrid query scoped to `owner`.
    ///
    /// `top_k` overrides the configured final result count when given, and
    /// also widens the per-modality candidate pool when it exceeds the
    /// configured `top_k`, so a large request is never starved by a small
    /// candidate limit.
    pub async fn search(
        &self,
        query: &str,
        owner: &str,
        top_k: Option<i64>,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let keep = top_k.unwrap_or(self.cfg.rerank_top_k).max(1) as usize;
        let candidates = self.cfg.top_k.max(keep as i64);

        // The query embedding is the one step that fails the request.
        let query_vector = embed_query(self.embedder.as_ref(), query)
            .await
            .context("failed to embed query")?;

        let deadline = Duration::from_secs(self.cfg.subquery_timeout_secs);
        let (lexical, vector) = tokio::join!(
            tokio::time::timeout(deadline, self.lexical_search(query, owner, candidates, filters)),
            tokio::time::timeout(
                deadline,
                self.vector_search(&query_vector, owner, candidates, filters)
            ),
        );

        let lexical = match lexical {
            Ok(Ok(hits)) => hits,
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "lexical sub-query failed; continuing without it");
                Vec::new()
            }
            Err(_) => {
                tracing::warn!("lexical sub-query timed out; continuing without it");
                Vec::new()
            }
        };
        let vector = match vector {
            Ok(Ok(hits)) => hits,
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "vector sub-query failed; continuing without it");
                Vec::new()
            }
            Err(_) => {
                tracing::warn!("vector sub-query timed out; continuing without it");
                Vec::new()
            }
        };

        Ok(merge_hits(lexical, vector, self.cfg.lexical_weight, keep))
    }

    async fn lexical_search(
        &self,
        query: &str,
        owner: &str,
        limit: i64,
        filters: &SearchFilters,
    ) -> Result<Vec<Candidate>> {
        let Some(match_query) = fts_match_query(query) else {
            return Ok(Vec::new());
        };

        let mut sql = String::from(
            r#"
            SELECT chunks_fts.chunk_id, chunks_fts.doc_id, c.text, c.metadata_json, rank
            FROM chunks_fts
            JOIN chunks c ON c.id = chunks_fts.chunk_id
            WHERE chunks_fts MATCH ? AND chunks_fts.owner = ?
            "#,
        );
        if let Some(doc_ids) = &filters.doc_ids {
            if doc_ids.is_empty() {
                return Ok(Vec::new());
            }
            let placeholders = vec!["?"; doc_ids.len()].join(", ");
            sql.push_str(&format!(" AND chunks_fts.doc_id IN ({})", placeholders));
        }
        sql.push_str(" ORDER BY rank LIMIT ?");

        let mut q = sqlx::query(&sql).bind(&match_query).bind(owner);
        if let Some(doc_ids) = &filters.doc_ids {
            for id in doc_ids {
                q = q.bind(id);
            }
        }
        let rows = q.bind(limit).fetch_all(&self.pool).await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let rank: f64 = row.get("rank");
            out.push(Candidate {
                chunk_id: row.get("chunk_id"),
                doc_id: row.get("doc_id"),
                text: row.get("text"),
                metadata: parse_metadata(row.get("metadata_json")),
                // bm25 rank is lower-is-better; negate so higher is better.
                score: -rank,
            });
        }
        Ok(out)
    }

    async fn vector_search(
        &self,
        query_vector: &[f32],
        owner: &str,
        limit: i64,
        filters: &SearchFilters,
    ) -> Result<Vec<Candidate>> {
        let mut sql = String::from(
            r#"
            SELECT e.chunk_id, e.doc_id, e.vector, c.text, c.metadata_json
            FROM embeddings e
            JOIN chunks c ON c.id = e.chunk_id
            WHERE e.owner = ?
            "#,
        );
        if let Some(doc_ids) = &filters.doc_ids {
            if doc_ids.is_empty() {
                return Ok(Vec::new());
            }
            let placeholders = vec!["?"; doc_ids.len()].join(", ");
            sql.push_str(&format!(" AND e.doc_id IN ({})", placeholders));
        }

        let mut q = sqlx::query(&sql).bind(owner);
        if let Some(doc_ids) = &filters.doc_ids {
            for id in doc_ids {
                q = q.bind(id);
            }
        }
        let rows = q.fetch_all(&self.pool).await?;

        let mut scored: Vec<Candidate> = rows
            .into_iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("vector");
                let vector = blob_to_vec(&blob);
                Candidate {
                    chunk_id: row.get("chunk_id"),
                    doc_id: row.get("doc_id"),
                    text: row.get("text"),
                    metadata: parse_metadata(row.get("metadata_json")),
                    score: cosine_similarity(query_vector, &vector) as f64,
                }
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit.max(0) as usize);
        Ok(scored)
    }
}

fn parse_metadata(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::Null)
}

/// Build an FTS5 MATCH expression from free text. Each whitespace token is
/// quoted so user punctuation cannot become FTS syntax. Returns `None` for
/// queries with no tokens.
fn fts_match_query(query: &str) -> Option<String> {
    let tokens: Vec<String> = query
        .split_whitespace()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" "))
    }
}

/// Fuse the two candidate lists by chunk id.
///
/// Lexical candidates are inserted first, so ties in the combined score
/// keep lexical ordering (the sort is stable). A chunk seen by only one
/// modality contributes zero for the other.
fn merge_hits(
    lexical: Vec<Candidate>,
    vector: Vec<Candidate>,
    lexical_weight: f64,
    keep: usize,
) -> Vec<SearchHit> {
    let vector_weight = 1.0 - lexical_weight;

    let mut hits: Vec<SearchHit> = Vec::with_capacity(lexical.len() + vector.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for c in lexical {
        index.insert(c.chunk_id.clone(), hits.len());
        hits.push(SearchHit {
            chunk_id: c.chunk_id,
            doc_id: c.doc_id,
            text: c.text,
            metadata: c.metadata,
            lexical_score: c.score,
            vector_score: 0.0,
            score: 0.0,
        });
    }

    for c in vector {
        if let Some(&i) = index.get(&c.chunk_id) {
            hits[i].vector_score = c.score;
        } else {
            index.insert(c.chunk_id.clone(), hits.len());
            hits.push(SearchHit {
                chunk_id: c.chunk_id,
                doc_id: c.doc_id,
                text: c.text,
                metadata: c.metadata,
                lexical_score: 0.0,
                vector_score: c.score,
                score: 0.0,
            });
        }
    }

    for hit in &mut hits {
        hit.score = lexical_weight * hit.lexical_score + vector_weight * hit.vector_score;
    }

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(keep);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(chunk_id: &str, score: f64) -> Candidate {
        Candidate {
            chunk_id: chunk_id.to_string(),
            doc_id: "d1".to_string(),
            text: format!("text for {}", chunk_id),
            metadata: serde_json::json!({}),
            score,
        }
    }

    #[test]
    fn match_query_quotes_tokens() {
        assert_eq!(
            fts_match_query("hello world").as_deref(),
            Some("\"hello\" \"world\"")
        );
        assert_eq!(
            fts_match_query("c++ \"quoted\"").as_deref(),
            Some("\"c++\" \"\"\"quoted\"\"\"")
        );
        assert_eq!(fts_match_query("   "), None);
    }

    #[test]
    fn merge_combines_weighted_scores() {
        // Lexical-only 0.8 at weight 0.5 gives 0.4; vector-only 0.9 gives
        // 0.45, so the vector-only chunk ranks first.
        let lexical = vec![candidate("a", 0.8)];
        let vector = vec![candidate("b", 0.9)];
        let hits = merge_hits(lexical, vector, 0.5, 10);

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, "b");
        assert!((hits[0].score - 0.45).abs() < 1e-9);
        assert_eq!(hits[1].chunk_id, "a");
        assert!((hits[1].score - 0.4).abs() < 1e-9);
    }

    #[test]
    fn merge_sums_both_modalities_for_shared_chunks() {
        let lexical = vec![candidate("a", 0.6), candidate("b", 0.2)];
        let vector = vec![candidate("a", 0.4)];
        let hits = merge_hits(lexical, vector, 0.5, 10);

        assert_eq!(hits[0].chunk_id, "a");
        assert!((hits[0].score - 0.5).abs() < 1e-9);
        assert!((hits[0].lexical_score - 0.6).abs() < 1e-9);
        assert!((hits[0].vector_score - 0.4).abs() < 1e-9);
    }

    #[test]
    fn merge_ties_keep_lexical_order() {
        let lexical = vec![candidate("first", 0.5), candidate("second", 0.5)];
        let hits = merge_hits(lexical, Vec::new(), 1.0, 10);
        assert_eq!(hits[0].chunk_id, "first");
        assert_eq!(hits[1].chunk_id, "second");
    }

    #[test]
    fn merge_truncates_to_keep() {
        let lexical = vec![
            candidate("a", 0.9),
            candidate("b", 0.8),
            candidate("c", 0.7),
        ];
        let hits = merge_hits(lexical, Vec::new(), 1.0, 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, "a");
        assert_eq!(hits[1].chunk_id, "b");
    }

    #[test]
    fn merge_sorts_descending() {
        let lexical = vec![candidate("low", 0.1), candidate("high", 0.9)];
        let hits = merge_hits(lexical, Vec::new(), 1.0, 10);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        assert_eq!(hits[0].chunk_id, "high");
    }
}
