//! Feedback Store
//!
//! Append-only correction log (JSON lines) plus aggregate statistics
//! recomputed from the full log on each call.

use log::warn;
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::models::{Category, Email, FeedbackRecord, FeedbackStats};

#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Feedback log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Feedback record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

pub struct FeedbackStore {
    path: PathBuf,
}

impl FeedbackStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Appends one correction. The corrected category must belong to the
    /// closed enumeration; anything else is rejected before touching the log.
    pub async fn record(
        &self,
        email_id: &str,
        original_category: &str,
        corrected_category: &str,
        email: &Email,
    ) -> Result<FeedbackRecord, FeedbackError> {
        let corrected = Category::parse(corrected_category)
            .ok_or_else(|| FeedbackError::UnknownCategory(corrected_category.to_string()))?;

        let record = FeedbackRecord::new(
            email_id,
            original_category,
            corrected,
            &email.subject,
            &email.body,
        );
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(record)
    }

    /// Recomputes totals and per-correction counts from the full log. A log
    /// that does not exist yet yields empty stats.
    pub async fn stats(&self) -> Result<FeedbackStats, FeedbackError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(FeedbackStats::default())
            }
            Err(e) => return Err(e.into()),
        };

        let mut stats = FeedbackStats::default();
        for line in contents.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<FeedbackRecord>(line) {
                Ok(record) => {
                    stats.total += 1;
                    *stats.corrections.entry(record.correction_key()).or_insert(0) += 1;
                }
                Err(e) => warn!("Skipping corrupt feedback record: {}", e),
            }
        }
        Ok(stats)
    }
}
