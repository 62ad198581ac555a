//! Core data models shared by the ingestion, retrieval, and forecasting
//! pipelines.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::extract::DocumentFormat;

/// A document held by the [`crate::store::DocumentStore`], keyed by its
/// logical filename.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub filename: String,
    pub format: DocumentFormat,
    pub size_bytes: u64,
    pub uploaded_at: DateTime<Utc>,
}

/// A bounded span of a document's text: the unit of retrieval.
///
/// Chunks are derived artifacts: they live only inside the index generation
/// that produced them and are identified by `(source, index)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Filename of the source document.
    pub source: String,
    /// Ordinal position within the source document, contiguous from 0.
    pub index: u32,
    pub text: String,
}

impl Chunk {
    /// Ordering key used for deterministic tie-breaking in search results.
    pub fn id(&self) -> (&str, u32) {
        (&self.source, self.index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One turn of the caller-owned conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

/// Source attribution attached to a generated answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub source: String,
    pub excerpt: String,
}

/// Lifecycle record of a single tracked issue, as supplied by the tracker
/// proxy. Only the fields the prediction engine consumes are modelled here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueRecord {
    pub id: u64,
    pub subject: String,
    pub status: String,
    pub created_on: NaiveDate,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    pub updated_on: NaiveDate,
    /// Resolution date, when the tracker records one separately from the
    /// last update.
    #[serde(default)]
    pub closed_on: Option<NaiveDate>,
}
