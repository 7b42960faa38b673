//! Core data types flowing through the ingestion and retrieval pipeline.

use serde::Serialize;
use serde_json::Value;

/// Document processing state. Transitions are monotonic:
/// `Processing → Ready` or `Processing → Failed`, both terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Processing,
    Ready,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Processing => "processing",
            DocumentStatus::Ready => "ready",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(DocumentStatus::Processing),
            "ready" => Some(DocumentStatus::Ready),
            "failed" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chunk produced by the splitter, before it is assigned an id and
/// persisted. Positions are contiguous from 0 within one document.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDraft {
    pub text: String,
    pub position: i64,
    pub metadata: Value,
}

/// A merged search result with both modality scores and the combined score.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk_id: String,
    pub doc_id: String,
    pub text: String,
    pub metadata: Value,
    pub lexical_score: f64,
    pub vector_score: f64,
    pub score: f64,
}

impl SearchHit {
    /// Human-readable origin of the chunk, taken from the inherited
    /// document metadata.
    pub fn source(&self) -> &str {
        self.metadata
            .get("source")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown")
    }
}
