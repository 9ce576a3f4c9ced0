//! Multi-signal fusion.
//!
//! Combines the independent sentiment and intent signals into the primary
//! categorization as cumulative confidence adjustments, each clamped so the
//! result stays within [0, 1].

use crate::models::{Category, ClassificationResult, Intent, Sentiment};

pub const REASON_POSITIVE_INTEREST: &str = "Positive sentiment reinforces interest";
pub const REASON_NEGATIVE_DISINTEREST: &str = "Negative sentiment confirms disinterest";
pub const REASON_AUTOMATED_OOO: &str = "Automated tone matches out-of-office reply";
pub const REASON_CONFIRMED_MEETING: &str = "Confirmation intent supports booked meeting";
pub const REASON_REJECTION_DISINTEREST: &str = "Rejection intent confirms disinterest";
pub const REASON_SPAM_CONFIRMED: &str = "Sentiment and intent signals confirm spam";

/// One auxiliary classifier output with its own confidence.
#[derive(Debug, Clone, Copy)]
pub struct Signal<T> {
    pub value: T,
    pub confidence: f32,
}

fn boost(result: &mut ClassificationResult, amount: f32, reason: &str) {
    result.confidence = (result.confidence + amount).clamp(0.0, 1.0);
    result.reasoning.push(reason.to_string());
}

/// Applies the fusion table to the primary classification. Missing signals
/// (failed auxiliary calls) simply contribute nothing.
pub fn fuse(
    mut result: ClassificationResult,
    sentiment: Option<Signal<Sentiment>>,
    intent: Option<Signal<Intent>>,
) -> ClassificationResult {
    if let Some(s) = sentiment {
        match (s.value, result.category) {
            (Sentiment::Positive, Category::Interested) => {
                boost(&mut result, 0.10, REASON_POSITIVE_INTEREST)
            }
            (Sentiment::Negative, Category::NotInterested) => {
                boost(&mut result, 0.10, REASON_NEGATIVE_DISINTEREST)
            }
            (Sentiment::Automated, Category::OutOfOffice) => {
                boost(&mut result, 0.15, REASON_AUTOMATED_OOO)
            }
            _ => {}
        }
    }

    if let Some(i) = intent {
        match (i.value, result.category) {
            (Intent::Confirmation, Category::MeetingBooked) => {
                boost(&mut result, 0.10, REASON_CONFIRMED_MEETING)
            }
            (Intent::Rejection, Category::NotInterested) => {
                boost(&mut result, 0.10, REASON_REJECTION_DISINTEREST)
            }
            _ => {}
        }
    }

    if result.category == Category::Spam {
        if let (Some(s), Some(i)) = (sentiment, intent) {
            if s.value == Sentiment::Negative
                && s.confidence > 0.8
                && i.value == Intent::Informational
                && i.confidence > 0.7
            {
                boost(&mut result, 0.15, REASON_SPAM_CONFIRMED);
            }
        }
    }

    result
}
