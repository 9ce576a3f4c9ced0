// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Scheduled Reconciliation
//!
//! Three independently timed jobs that re-scan the index for items the live
//! pipeline missed: never classified, classified with low confidence, or
//! missing a summary. At most one job of any kind runs at a time; the busy
//! flag is an atomic acquired with compare_exchange and released by a drop
//! guard, so a panicking job cannot wedge the scheduler.

use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

use crate::classify::ClassificationPipeline;
use crate::index::{EmailIndex, SearchFilters};
use crate::models::{Email, UNCATEGORIZED};

const UNCATEGORIZED_EVERY: Duration = Duration::from_secs(30 * 60);
const LOW_CONFIDENCE_EVERY: Duration = Duration::from_secs(60 * 60);
const SUMMARY_EVERY: Duration = Duration::from_secs(120 * 60);

const UNCATEGORIZED_BATCH: usize = 50;
const LOW_CONFIDENCE_BATCH: usize = 30;
const SUMMARY_BATCH: usize = 50;

const LOW_CONFIDENCE_THRESHOLD: f64 = 0.5;

/// What a single job invocation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Another reconciliation job held the busy flag.
    Skipped,
    Completed { processed: usize },
}

struct BusyGuard(Arc<AtomicBool>);

impl BusyGuard {
    fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag.clone()))
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Reconciler {
    index: Arc<dyn EmailIndex>,
    classifier: Arc<ClassificationPipeline>,
    busy: Arc<AtomicBool>,
    /// Delay between items within one job run.
    pacing: Duration,
}

impl Reconciler {
    pub fn new(index: Arc<dyn EmailIndex>, classifier: Arc<ClassificationPipeline>) -> Self {
        Self {
            index,
            classifier,
            busy: Arc::new(AtomicBool::new(false)),
            pacing: Duration::from_secs(1),
        }
    }

    #[cfg(test)]
    fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    async fn fetch_page(&self, filters: SearchFilters) -> Vec<Email> {
        match self.index.search("", &filters).await {
            Ok(emails) => emails,
            Err(e) => {
                error!("Reconciliation scan failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Reclassifies documents that were never classified at all.
    pub async fn run_uncategorized(&self) -> JobOutcome {
        let _guard = match BusyGuard::try_acquire(&self.busy) {
            Some(guard) => guard,
            None => {
                info!("Reconciliation busy; skipping uncategorized scan");
                return JobOutcome::Skipped;
            }
        };

        let emails = self
            .fetch_page(SearchFilters {
                category: Some(UNCATEGORIZED.to_string()),
                limit: Some(UNCATEGORIZED_BATCH),
                ..Default::default()
            })
            .await;
        info!("Uncategorized scan: {} candidates", emails.len());

        let mut processed = 0;
        for email in &emails {
            let result = self.classifier.classify(email).await;
            match self.index.update_classification(&email.id, &result).await {
                Ok(()) => processed += 1,
                Err(e) => warn!("Reclassification update failed for {}: {}", email.id, e),
            }
            sleep(self.pacing).await;
        }
        JobOutcome::Completed { processed }
    }

    /// Reclassifies documents whose confidence came out below 0.5. The
    /// predicate lives in the index query, so a weak document is picked up
    /// no matter how deep it sits in the date ordering.
    pub async fn run_low_confidence(&self) -> JobOutcome {
        let _guard = match BusyGuard::try_acquire(&self.busy) {
            Some(guard) => guard,
            None => {
                info!("Reconciliation busy; skipping low-confidence scan");
                return JobOutcome::Skipped;
            }
        };

        let candidates = self
            .fetch_page(SearchFilters {
                below_confidence: Some(LOW_CONFIDENCE_THRESHOLD),
                limit: Some(LOW_CONFIDENCE_BATCH),
                ..Default::default()
            })
            .await;
        info!("Low-confidence scan: {} candidates", candidates.len());

        let mut processed = 0;
        for email in &candidates {
            let result = self.classifier.classify(email).await;
            match self.index.update_classification(&email.id, &result).await {
                Ok(()) => processed += 1,
                Err(e) => warn!("Reclassification update failed for {}: {}", email.id, e),
            }
            sleep(self.pacing).await;
        }
        JobOutcome::Completed { processed }
    }

    /// Generates summaries for documents that have none.
    pub async fn run_missing_summaries(&self) -> JobOutcome {
        let _guard = match BusyGuard::try_acquire(&self.busy) {
            Some(guard) => guard,
            None => {
                info!("Reconciliation busy; skipping summary scan");
                return JobOutcome::Skipped;
            }
        };

        let candidates = self
            .fetch_page(SearchFilters {
                has_summary: Some(false),
                limit: Some(SUMMARY_BATCH),
                ..Default::default()
            })
            .await;
        info!("Summary scan: {} candidates", candidates.len());

        let mut processed = 0;
        for email in &candidates {
            let summary = self.classifier.summarize(email).await;
            match self.index.update_summary(&email.id, &summary).await {
                Ok(()) => processed += 1,
                Err(e) => warn!("Summary update failed for {}: {}", email.id, e),
            }
            sleep(self.pacing).await;
        }
        JobOutcome::Completed { processed }
    }

    /// Spawns the three timers. Each waits out its full period before the
    /// first run; the live pipeline covers freshly ingested messages.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        self.clone()
            .spawn_job("uncategorized", UNCATEGORIZED_EVERY, shutdown.clone(), |r| {
                Box::pin(async move { r.run_uncategorized().await })
            });
        self.clone()
            .spawn_job("low-confidence", LOW_CONFIDENCE_EVERY, shutdown.clone(), |r| {
                Box::pin(async move { r.run_low_confidence().await })
            });
        self.spawn_job("summaries", SUMMARY_EVERY, shutdown, |r| {
            Box::pin(async move { r.run_missing_summaries().await })
        });
    }

    fn spawn_job<F>(
        self: Arc<Self>,
        name: &'static str,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
        job: F,
    ) where
        F: Fn(
                Arc<Reconciler>,
            ) -> std::pin::Pin<Box<dyn std::future::Future<Output = JobOutcome> + Send>>
            + Send
            + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // interval fires immediately; skip that first tick.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!("Reconciliation job {} shutting down", name);
                        break;
                    }
                    _ = ticker.tick() => {
                        let outcome = job(self.clone()).await;
                        info!("Reconciliation job {} finished: {:?}", name, outcome);
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{ClassifyError, CompletionProvider};
    use crate::index::MemoryIndex;
    use crate::models::Category;
    use crate::throttle::RateWindow;
    use async_trait::async_trait;
    use chrono::Utc;

    struct FixedProvider(String);

    #[async_trait]
    impl CompletionProvider for FixedProvider {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String, ClassifyError> {
            Ok(self.0.clone())
        }
    }

    fn classifier() -> Arc<ClassificationPipeline> {
        Arc::new(ClassificationPipeline::new(
            Arc::new(FixedProvider(
                r#"{"category": "Not Interested", "confidence": 0.9, "reasoning": []}"#.into(),
            )),
            Arc::new(RateWindow::new(100_000, Duration::from_secs(60))),
        ))
    }

    fn email(id: &str, category: Option<Category>, confidence: Option<f32>) -> Email {
        Email {
            id: id.into(),
            account_id: "account1".into(),
            message_id: format!("<{}@x>", id),
            subject: "s".into(),
            from: "f@x".into(),
            to: "t@x".into(),
            date: Utc::now(),
            body: "b".into(),
            folder: "INBOX".into(),
            thread_id: None,
            ai_category: category,
            ai_confidence: confidence,
            ai_reasoning: None,
            summary: None,
        }
    }

    fn reconciler(index: Arc<MemoryIndex>) -> Reconciler {
        Reconciler::new(index, classifier()).with_pacing(Duration::ZERO)
    }

    #[tokio::test]
    async fn busy_flag_makes_overlapping_jobs_exit_immediately() {
        let index = Arc::new(MemoryIndex::new());
        index
            .upsert(&email("a-1-x", None, None))
            .await
            .unwrap();
        let r = reconciler(index.clone());

        r.busy.store(true, Ordering::Release);
        assert_eq!(r.run_uncategorized().await, JobOutcome::Skipped);
        assert_eq!(r.run_low_confidence().await, JobOutcome::Skipped);
        assert_eq!(r.run_missing_summaries().await, JobOutcome::Skipped);
        // Nothing was touched.
        assert_eq!(index.get("a-1-x").await.unwrap().unwrap().ai_category, None);

        r.busy.store(false, Ordering::Release);
        assert_eq!(
            r.run_uncategorized().await,
            JobOutcome::Completed { processed: 1 }
        );
    }

    #[tokio::test]
    async fn busy_flag_clears_after_each_run() {
        let index = Arc::new(MemoryIndex::new());
        let r = reconciler(index);
        assert_eq!(r.run_uncategorized().await, JobOutcome::Completed { processed: 0 });
        assert!(!r.busy.load(Ordering::Acquire));
        assert_eq!(r.run_low_confidence().await, JobOutcome::Completed { processed: 0 });
        assert!(!r.busy.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn uncategorized_job_respects_the_batch_cap() {
        let index = Arc::new(MemoryIndex::new());
        for n in 0..60 {
            index
                .upsert(&email(&format!("a-{}-x", n), None, None))
                .await
                .unwrap();
        }
        let r = reconciler(index.clone());
        let outcome = r.run_uncategorized().await;
        assert_eq!(outcome, JobOutcome::Completed { processed: 50 });
    }

    #[tokio::test]
    async fn low_confidence_job_targets_only_weak_classifications() {
        let index = Arc::new(MemoryIndex::new());
        index
            .upsert(&email("weak", Some(Category::Spam), Some(0.2)))
            .await
            .unwrap();
        index
            .upsert(&email("strong", Some(Category::Interested), Some(0.9)))
            .await
            .unwrap();
        index.upsert(&email("unclassified", None, None)).await.unwrap();

        let r = reconciler(index.clone());
        let outcome = r.run_low_confidence().await;
        assert_eq!(outcome, JobOutcome::Completed { processed: 1 });

        let weak = index.get("weak").await.unwrap().unwrap();
        assert_eq!(weak.ai_category, Some(Category::NotInterested));
        let strong = index.get("strong").await.unwrap().unwrap();
        assert_eq!(strong.ai_confidence, Some(0.9));
    }

    #[tokio::test]
    async fn low_confidence_job_reaches_weak_documents_behind_newer_ones() {
        let index = Arc::new(MemoryIndex::new());
        // One old weak document buried behind a crowd of newer strong ones.
        let mut weak = email("weak-old", Some(Category::Spam), Some(0.1));
        weak.date = Utc::now() - chrono::Duration::days(90);
        index.upsert(&weak).await.unwrap();
        for n in 0..40 {
            index
                .upsert(&email(
                    &format!("strong-{}", n),
                    Some(Category::Interested),
                    Some(0.9),
                ))
                .await
                .unwrap();
        }

        let r = reconciler(index.clone());
        let outcome = r.run_low_confidence().await;
        assert_eq!(outcome, JobOutcome::Completed { processed: 1 });

        let weak = index.get("weak-old").await.unwrap().unwrap();
        assert_eq!(weak.ai_category, Some(Category::NotInterested));
        assert_eq!(weak.ai_confidence, Some(0.9));
    }

    #[tokio::test]
    async fn summary_job_fills_only_missing_summaries() {
        let index = Arc::new(MemoryIndex::new());
        let mut with_summary = email("done", Some(Category::Interested), Some(0.8));
        with_summary.summary = Some("already summarized".into());
        index.upsert(&with_summary).await.unwrap();
        index
            .upsert(&email("todo", Some(Category::Spam), Some(0.7)))
            .await
            .unwrap();

        let r = reconciler(index.clone());
        let outcome = r.run_missing_summaries().await;
        assert_eq!(outcome, JobOutcome::Completed { processed: 1 });

        let done = index.get("done").await.unwrap().unwrap();
        assert_eq!(done.summary.as_deref(), Some("already summarized"));
        let todo = index.get("todo").await.unwrap().unwrap();
        assert!(todo.summary.is_some());
    }
}
