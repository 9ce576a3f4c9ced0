use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Index value used for documents that have not been classified yet.
pub const UNCATEGORIZED: &str = "Uncategorized";

/// The closed set of categories a message can be classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Interested,
    #[serde(rename = "Meeting Booked")]
    MeetingBooked,
    #[serde(rename = "Not Interested")]
    NotInterested,
    Spam,
    #[serde(rename = "Out of Office")]
    OutOfOffice,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Interested,
        Category::MeetingBooked,
        Category::NotInterested,
        Category::Spam,
        Category::OutOfOffice,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Interested => "Interested",
            Category::MeetingBooked => "Meeting Booked",
            Category::NotInterested => "Not Interested",
            Category::Spam => "Spam",
            Category::OutOfOffice => "Out of Office",
        }
    }

    /// Parses an index/model string into a category, rejecting anything
    /// outside the closed enumeration.
    pub fn parse(s: &str) -> Option<Category> {
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sentiment signal produced by the second classifier prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
    Automated,
}

impl Sentiment {
    pub const ALL: [Sentiment; 4] = [
        Sentiment::Positive,
        Sentiment::Neutral,
        Sentiment::Negative,
        Sentiment::Automated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "Positive",
            Sentiment::Neutral => "Neutral",
            Sentiment::Negative => "Negative",
            Sentiment::Automated => "Automated",
        }
    }

    pub fn parse(s: &str) -> Option<Sentiment> {
        Sentiment::ALL
            .iter()
            .copied()
            .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

/// Intent signal produced by the third classifier prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Intent {
    Inquiry,
    Confirmation,
    Rejection,
    Informational,
    Automated,
}

impl Intent {
    pub const ALL: [Intent; 5] = [
        Intent::Inquiry,
        Intent::Confirmation,
        Intent::Rejection,
        Intent::Informational,
        Intent::Automated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Inquiry => "Inquiry",
            Intent::Confirmation => "Confirmation",
            Intent::Rejection => "Rejection",
            Intent::Informational => "Informational",
            Intent::Automated => "Automated",
        }
    }

    pub fn parse(s: &str) -> Option<Intent> {
        Intent::ALL
            .iter()
            .copied()
            .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

/// One classification attempt. Never persisted standalone; folded into the
/// owning `Email`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: Category,
    pub confidence: f32,
    pub reasoning: Vec<String>,
}

mod category_field {
    use super::{Category, UNCATEGORIZED};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<Category>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(c) => s.serialize_str(c.as_str()),
            None => s.serialize_str(UNCATEGORIZED),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Category>, D::Error> {
        let raw = Option::<String>::deserialize(d)?;
        Ok(raw.as_deref().and_then(Category::parse))
    }
}

/// Canonical record for one ingested message. Created by the normalizer,
/// mutated in place by classification and summary generation.
///
/// The id is content-derived (account + uid + message id) so repeated
/// ingestion of the same message upserts the same document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Email {
    pub id: String,
    pub account_id: String,
    pub message_id: String,
    pub subject: String,
    pub from: String,
    pub to: String,
    pub date: DateTime<Utc>,
    pub body: String,
    pub folder: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, with = "category_field")]
    pub ai_category: Option<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_reasoning: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl Email {
    /// Derives the immutable document id from account id, mailbox uid and
    /// the RFC822 Message-ID header.
    pub fn derive_id(account_id: &str, uid: u32, message_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(message_id.as_bytes());
        let digest = hasher.finalize();
        let short: String = digest[..6].iter().map(|b| format!("{:02x}", b)).collect();
        format!("{}-{}-{}", account_id, uid, short)
    }

    /// Folds one classification attempt into the record.
    pub fn apply_classification(&mut self, result: &ClassificationResult) {
        self.ai_category = Some(result.category);
        self.ai_confidence = Some(result.confidence.clamp(0.0, 1.0));
        self.ai_reasoning = Some(result.reasoning.clone());
    }
}
