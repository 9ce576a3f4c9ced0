use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::Category;

/// Maximum number of body characters retained in the audit snapshot.
pub const BODY_SNIPPET_CHARS: usize = 500;

/// One user correction of a model-assigned category. Append-only; never
/// mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: Uuid,
    pub email_id: String,
    /// Category the model had assigned; the raw index string is kept so
    /// "Uncategorized" corrections are representable.
    pub original_category: String,
    pub corrected_category: Category,
    pub timestamp: DateTime<Utc>,
    pub subject: String,
    pub body_snippet: String,
}

impl FeedbackRecord {
    pub fn new(
        email_id: &str,
        original_category: &str,
        corrected_category: Category,
        subject: &str,
        body: &str,
    ) -> Self {
        let snippet: String = body.chars().take(BODY_SNIPPET_CHARS).collect();
        Self {
            id: Uuid::new_v4(),
            email_id: email_id.to_string(),
            original_category: original_category.to_string(),
            corrected_category,
            timestamp: Utc::now(),
            subject: subject.to_string(),
            body_snippet: snippet,
        }
    }

    /// Aggregation key of the form "Original -> Corrected".
    pub fn correction_key(&self) -> String {
        format!("{} -> {}", self.original_category, self.corrected_category)
    }
}

/// Aggregate view over the full feedback log, recomputed on demand.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackStats {
    pub total: usize,
    pub corrections: HashMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_snippet_is_truncated_to_500_chars() {
        let body = "x".repeat(2000);
        let record =
            FeedbackRecord::new("id1", "Spam", Category::Interested, "subject", &body);
        assert_eq!(record.body_snippet.chars().count(), BODY_SNIPPET_CHARS);
    }

    #[test]
    fn correction_key_uses_display_names() {
        let record = FeedbackRecord::new(
            "id1",
            "Uncategorized",
            Category::MeetingBooked,
            "s",
            "b",
        );
        assert_eq!(record.correction_key(), "Uncategorized -> Meeting Booked");
    }
}
