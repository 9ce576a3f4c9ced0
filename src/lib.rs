//! Library core for MailTriage: multi-account mailbox ingestion, AI
//! classification, search-index projection and scheduled reconciliation.

pub mod classify;
pub mod config;
pub mod feedback;
pub mod imap;
pub mod index;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod reconcile;
pub mod service;
pub mod throttle;

// Re-export key types for convenience.
pub mod prelude {
    // Config
    pub use crate::config::{AccountConfig, Settings};

    // Ingestion
    pub use crate::imap::{AccountManager, AccountState, ImapError, StateRegistry};
    pub use crate::models::{Category, ClassificationResult, Email, Intent, Sentiment};
    pub use crate::pipeline::IngestPipeline;

    // Classification and indexing
    pub use crate::classify::{ClassificationPipeline, CompletionProvider};
    pub use crate::index::{ElasticIndex, EmailIndex, SearchFilters};

    // Service surface
    pub use crate::reconcile::Reconciler;
    pub use crate::service::{Health, HealthReport, MailService};

    // Common libs
    pub use log::{debug, error, info, trace, warn};
    pub use std::sync::Arc;
    pub use thiserror::Error;
    pub use uuid::Uuid;
}
