pub mod elastic;
pub mod memory;

pub use elastic::ElasticIndex;
pub use memory::MemoryIndex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{ClassificationResult, Email};

#[derive(Debug, Error, Clone)]
pub enum IndexError {
    #[error("Index request failed: {0}")]
    Http(String),

    #[error("Unexpected index response: {0}")]
    BadResponse(String),
}

impl From<reqwest::Error> for IndexError {
    fn from(err: reqwest::Error) -> Self {
        IndexError::Http(err.to_string())
    }
}

/// Optional exact filters layered on top of the free-text query.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub folder: Option<String>,
    pub account_id: Option<String>,
    /// Raw index value; includes "Uncategorized" for never-classified docs.
    pub category: Option<String>,
    /// Inclusive date range bounds.
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    /// Inclusive lower confidence bound.
    pub min_confidence: Option<f64>,
    /// Exclusive upper confidence bound; only matches classified documents.
    pub below_confidence: Option<f64>,
    pub has_thread: Option<bool>,
    pub has_summary: Option<bool>,
    pub limit: Option<usize>,
}

/// Projection of `Email` records into a searchable store. Implementations
/// must make `upsert` idempotent on the document id and degrade to empty
/// results instead of erroring when the store is unreachable.
#[async_trait]
pub trait EmailIndex: Send + Sync {
    /// Connectivity flag consulted by every operation and by the health check.
    fn is_connected(&self) -> bool;

    /// Creates the index with its field mapping if absent. Safe every boot.
    async fn ensure_index(&self) -> Result<(), IndexError>;

    async fn upsert(&self, email: &Email) -> Result<(), IndexError>;

    /// Partial update of category, confidence and reasoning.
    async fn update_classification(
        &self,
        id: &str,
        result: &ClassificationResult,
    ) -> Result<(), IndexError>;

    /// Partial update of the summary field.
    async fn update_summary(&self, id: &str, summary: &str) -> Result<(), IndexError>;

    async fn get(&self, id: &str) -> Result<Option<Email>, IndexError>;

    /// Free-text query over subject/body plus exact filters, sorted by date
    /// descending.
    async fn search(&self, query: &str, filters: &SearchFilters)
        -> Result<Vec<Email>, IndexError>;
}
