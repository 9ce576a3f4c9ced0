//! Service facade consumed by the external API layer: search, point lookup,
//! reply suggestion, feedback and health. Degraded subsystems surface as
//! empty/default results here, never as panics; only feedback I/O failures
//! are caller-visible.

use async_trait::async_trait;
use log::{error, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::classify::ClassificationPipeline;
use crate::feedback::{FeedbackError, FeedbackStore};
use crate::imap::{AccountState, StateRegistry};
use crate::index::{EmailIndex, SearchFilters};
use crate::models::{Email, FeedbackStats, UNCATEGORIZED};

/// Fixed sentinel returned when the reply suggester cannot produce a draft.
pub const REPLY_UNAVAILABLE: &str = "Reply suggestions are currently unavailable.";

#[derive(Debug, Error)]
pub enum SuggestError {
    #[error("Reply suggester failed: {0}")]
    Unavailable(String),
}

/// Black-box collaborator that drafts replies from retrieved reference
/// texts. Consumed through this seam only; its internals are out of scope.
#[async_trait]
pub trait ReplySuggester: Send + Sync {
    async fn suggest(&self, body: &str, product_hint: Option<&str>)
        -> Result<String, SuggestError>;
}

/// Wired in when no suggester is deployed; every call yields the sentinel.
pub struct NoopSuggester;

#[async_trait]
impl ReplySuggester for NoopSuggester {
    async fn suggest(
        &self,
        _body: &str,
        _product_hint: Option<&str>,
    ) -> Result<String, SuggestError> {
        Err(SuggestError::Unavailable(
            "no reply suggester configured".to_string(),
        ))
    }
}

/// Per-subsystem connectivity reported by the health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Initialized,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub index: Health,
    pub classifier: Health,
    pub accounts: HashMap<String, Health>,
}

pub struct MailService {
    index: Arc<dyn EmailIndex>,
    classifier: Arc<ClassificationPipeline>,
    feedback: Arc<FeedbackStore>,
    suggester: Arc<dyn ReplySuggester>,
    account_states: StateRegistry,
}

impl MailService {
    pub fn new(
        index: Arc<dyn EmailIndex>,
        classifier: Arc<ClassificationPipeline>,
        feedback: Arc<FeedbackStore>,
        suggester: Arc<dyn ReplySuggester>,
        account_states: StateRegistry,
    ) -> Self {
        Self {
            index,
            classifier,
            feedback,
            suggester,
            account_states,
        }
    }

    pub async fn search_emails(&self, query: &str, filters: &SearchFilters) -> Vec<Email> {
        match self.index.search(query, filters).await {
            Ok(emails) => emails,
            Err(e) => {
                error!("Search failed: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn get_email(&self, id: &str) -> Option<Email> {
        match self.index.get(id).await {
            Ok(email) => email,
            Err(e) => {
                error!("Lookup of {} failed: {}", id, e);
                None
            }
        }
    }

    /// Delegates to the reply suggester; any failure collapses into the
    /// fixed unavailable sentinel.
    pub async fn suggest_reply(&self, body: &str, product_hint: Option<&str>) -> String {
        match self.suggester.suggest(body, product_hint).await {
            Ok(draft) => draft,
            Err(e) => {
                warn!("Reply suggestion unavailable: {}", e);
                REPLY_UNAVAILABLE.to_string()
            }
        }
    }

    /// Records a category correction against the stored document. The
    /// subject/body snapshot comes from the index; a document that is no
    /// longer retrievable is recorded with an empty snapshot.
    pub async fn record_feedback(
        &self,
        email_id: &str,
        corrected_category: &str,
    ) -> Result<(), FeedbackError> {
        let stored = self.get_email(email_id).await;
        let (original, snapshot) = match &stored {
            Some(email) => (
                email
                    .ai_category
                    .map(|c| c.as_str().to_string())
                    .unwrap_or_else(|| UNCATEGORIZED.to_string()),
                email.clone(),
            ),
            None => (
                UNCATEGORIZED.to_string(),
                Email {
                    id: email_id.to_string(),
                    account_id: String::new(),
                    message_id: String::new(),
                    subject: String::new(),
                    from: String::new(),
                    to: String::new(),
                    date: chrono::Utc::now(),
                    body: String::new(),
                    folder: String::new(),
                    thread_id: None,
                    ai_category: None,
                    ai_confidence: None,
                    ai_reasoning: None,
                    summary: None,
                },
            ),
        };
        self.feedback
            .record(email_id, &original, corrected_category, &snapshot)
            .await?;
        Ok(())
    }

    pub async fn feedback_stats(&self) -> Result<FeedbackStats, FeedbackError> {
        self.feedback.stats().await
    }

    pub async fn health(&self) -> HealthReport {
        let index = if self.index.is_connected() {
            Health::Connected
        } else {
            Health::Disconnected
        };
        let classifier = if self.classifier.is_reachable() {
            Health::Connected
        } else {
            Health::Initialized
        };
        let accounts = self
            .account_states
            .read()
            .await
            .iter()
            .map(|(id, state)| {
                let health = match state {
                    AccountState::Authenticated
                    | AccountState::Backfilling
                    | AccountState::Watching => Health::Connected,
                    AccountState::Connecting | AccountState::Reconnecting => Health::Initialized,
                    AccountState::Disconnected | AccountState::Failed => Health::Disconnected,
                };
                (id.clone(), health)
            })
            .collect();
        HealthReport {
            index,
            classifier,
            accounts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{ClassifyError, CompletionProvider};
    use crate::index::MemoryIndex;
    use crate::models::Category;
    use crate::throttle::RateWindow;
    use chrono::Utc;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::sync::RwLock;

    struct FailingProvider;

    #[async_trait]
    impl CompletionProvider for FailingProvider {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String, ClassifyError> {
            Err(ClassifyError::Http("down".into()))
        }
    }

    fn service(index: Arc<MemoryIndex>, feedback_path: std::path::PathBuf) -> MailService {
        let classifier = Arc::new(ClassificationPipeline::new(
            Arc::new(FailingProvider),
            Arc::new(RateWindow::new(1000, Duration::from_secs(60))),
        ));
        MailService::new(
            index,
            classifier,
            Arc::new(FeedbackStore::new(feedback_path)),
            Arc::new(NoopSuggester),
            Arc::new(RwLock::new(HashMap::new())),
        )
    }

    fn email(id: &str, category: Option<Category>) -> Email {
        Email {
            id: id.into(),
            account_id: "account1".into(),
            message_id: format!("<{}@x>", id),
            subject: "subject".into(),
            from: "f@x".into(),
            to: "t@x".into(),
            date: Utc::now(),
            body: "body".into(),
            folder: "INBOX".into(),
            thread_id: None,
            ai_category: category,
            ai_confidence: category.map(|_| 0.8),
            ai_reasoning: None,
            summary: None,
        }
    }

    #[tokio::test]
    async fn suggest_reply_returns_sentinel_on_failure() {
        let dir = tempdir().unwrap();
        let svc = service(Arc::new(MemoryIndex::new()), dir.path().join("fb.jsonl"));
        let draft = svc.suggest_reply("some body", Some("widget")).await;
        assert_eq!(draft, REPLY_UNAVAILABLE);
    }

    #[tokio::test]
    async fn feedback_uses_stored_category_as_original() {
        let dir = tempdir().unwrap();
        let index = Arc::new(MemoryIndex::new());
        index
            .upsert(&email("a-1-x", Some(Category::Spam)))
            .await
            .unwrap();
        let svc = service(index, dir.path().join("fb.jsonl"));

        svc.record_feedback("a-1-x", "Interested").await.unwrap();
        let stats = svc.feedback_stats().await.unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.corrections["Spam -> Interested"], 1);
    }

    #[tokio::test]
    async fn invalid_feedback_category_is_an_error() {
        let dir = tempdir().unwrap();
        let svc = service(Arc::new(MemoryIndex::new()), dir.path().join("fb.jsonl"));
        assert!(svc.record_feedback("a-1-x", "Junk").await.is_err());
    }

    #[tokio::test]
    async fn health_reflects_subsystem_flags() {
        let dir = tempdir().unwrap();
        let index = Arc::new(MemoryIndex::new());
        let svc = service(index.clone(), dir.path().join("fb.jsonl"));

        let report = svc.health().await;
        assert_eq!(report.index, Health::Connected);
        assert_eq!(report.classifier, Health::Initialized);

        index.set_disconnected(true);
        let report = svc.health().await;
        assert_eq!(report.index, Health::Disconnected);
    }

    #[tokio::test]
    async fn degraded_search_returns_empty() {
        let dir = tempdir().unwrap();
        let index = Arc::new(MemoryIndex::new());
        index.set_disconnected(true);
        let svc = service(index, dir.path().join("fb.jsonl"));
        let hits = svc.search_emails("anything", &SearchFilters::default()).await;
        assert!(hits.is_empty());
    }
}
