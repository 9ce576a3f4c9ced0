//! Ingestion pipeline wiring: initial index write, classification, index
//! update, then notification. Every stage degrades on failure; a message
//! never takes ingestion down.

use log::warn;
use std::sync::Arc;

use crate::classify::ClassificationPipeline;
use crate::index::EmailIndex;
use crate::models::Email;
use crate::notify::Notifier;

pub struct IngestPipeline {
    index: Arc<dyn EmailIndex>,
    classifier: Arc<ClassificationPipeline>,
    notifier: Arc<Notifier>,
}

impl IngestPipeline {
    pub fn new(
        index: Arc<dyn EmailIndex>,
        classifier: Arc<ClassificationPipeline>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            index,
            classifier,
            notifier,
        }
    }

    pub fn classifier(&self) -> &Arc<ClassificationPipeline> {
        &self.classifier
    }

    /// Runs one normalized email through the full flow. The initial upsert
    /// makes the raw message searchable even if classification fails later.
    pub async fn process(&self, mut email: Email) {
        if let Err(e) = self.index.upsert(&email).await {
            warn!("Initial index write failed for {}: {}", email.id, e);
        }

        let result = self.classifier.classify(&email).await;
        email.apply_classification(&result);

        if let Err(e) = self.index.update_classification(&email.id, &result).await {
            warn!("Classification update failed for {}: {}", email.id, e);
        }

        self.notifier.notify_classified(&email);
    }
}
