//! In-memory `EmailIndex` used by the test suites and for running the
//! pipeline without a search store attached.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use crate::index::{EmailIndex, IndexError, SearchFilters};
use crate::models::{ClassificationResult, Email, UNCATEGORIZED};

#[derive(Default)]
pub struct MemoryIndex {
    docs: RwLock<HashMap<String, Email>>,
    disconnected: AtomicBool,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an unreachable store; operations degrade to no-ops the same
    /// way the REST-backed projector does.
    pub fn set_disconnected(&self, disconnected: bool) {
        self.disconnected.store(disconnected, Ordering::Release);
    }

    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }
}

fn category_value(email: &Email) -> String {
    email
        .ai_category
        .map(|c| c.as_str().to_string())
        .unwrap_or_else(|| UNCATEGORIZED.to_string())
}

fn matches(email: &Email, query: &str, filters: &SearchFilters) -> bool {
    let q = query.trim().to_lowercase();
    if !q.is_empty()
        && !email.subject.to_lowercase().contains(&q)
        && !email.body.to_lowercase().contains(&q)
    {
        return false;
    }
    if let Some(folder) = &filters.folder {
        if &email.folder != folder {
            return false;
        }
    }
    if let Some(account_id) = &filters.account_id {
        if &email.account_id != account_id {
            return false;
        }
    }
    if let Some(category) = &filters.category {
        if &category_value(email) != category {
            return false;
        }
    }
    if let Some(from) = filters.date_from {
        if email.date < from {
            return false;
        }
    }
    if let Some(to) = filters.date_to {
        if email.date > to {
            return false;
        }
    }
    if let Some(min) = filters.min_confidence {
        match email.ai_confidence {
            Some(c) if f64::from(c) >= min => {}
            _ => return false,
        }
    }
    if let Some(below) = filters.below_confidence {
        match email.ai_confidence {
            Some(c) if f64::from(c) < below => {}
            _ => return false,
        }
    }
    if let Some(has_thread) = filters.has_thread {
        if email.thread_id.is_some() != has_thread {
            return false;
        }
    }
    if let Some(has_summary) = filters.has_summary {
        let present = email.summary.as_deref().map_or(false, |s| !s.trim().is_empty());
        if present != has_summary {
            return false;
        }
    }
    true
}

#[async_trait]
impl EmailIndex for MemoryIndex {
    fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::Acquire)
    }

    async fn ensure_index(&self) -> Result<(), IndexError> {
        Ok(())
    }

    async fn upsert(&self, email: &Email) -> Result<(), IndexError> {
        if !self.is_connected() {
            return Ok(());
        }
        self.docs
            .write()
            .await
            .insert(email.id.clone(), email.clone());
        Ok(())
    }

    async fn update_classification(
        &self,
        id: &str,
        result: &ClassificationResult,
    ) -> Result<(), IndexError> {
        if !self.is_connected() {
            return Ok(());
        }
        if let Some(email) = self.docs.write().await.get_mut(id) {
            email.apply_classification(result);
        }
        Ok(())
    }

    async fn update_summary(&self, id: &str, summary: &str) -> Result<(), IndexError> {
        if !self.is_connected() {
            return Ok(());
        }
        if let Some(email) = self.docs.write().await.get_mut(id) {
            email.summary = Some(summary.to_string());
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Email>, IndexError> {
        if !self.is_connected() {
            return Ok(None);
        }
        Ok(self.docs.read().await.get(id).cloned())
    }

    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<Email>, IndexError> {
        if !self.is_connected() {
            return Ok(Vec::new());
        }
        let docs = self.docs.read().await;
        let mut hits: Vec<Email> = docs
            .values()
            .filter(|e| matches(e, query, filters))
            .cloned()
            .collect();
        hits.sort_by(|a, b| b.date.cmp(&a.date));
        if let Some(limit) = filters.limit {
            hits.truncate(limit);
        }
        Ok(hits)
    }
}
