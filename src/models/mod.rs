pub mod email;
pub mod feedback;

pub use email::{Category, ClassificationResult, Email, Intent, Sentiment, UNCATEGORIZED};
pub use feedback::{FeedbackRecord, FeedbackStats};
