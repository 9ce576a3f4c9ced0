// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Classification Pipeline
//!
//! Fans one message out to three model prompts (category, sentiment, intent)
//! and fuses the signals into a single categorization. Every model response
//! is treated as hostile input: JSON is carved out between the first `{` and
//! the last `}`, and values outside the closed enumerations fall back to a
//! safe default rather than erroring.

pub mod fusion;
pub mod provider;

pub use provider::{ClassifyError, CompletionProvider, OpenAiProvider};

use log::warn;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::models::{Category, ClassificationResult, Email, Intent, Sentiment};
use crate::throttle::{with_retry, RateWindow};
use fusion::Signal;

pub const INVALID_RESPONSE_REASON: &str = "Invalid AI response format";
const FALLBACK_CONFIDENCE: f32 = 0.3;
const OUTAGE_CONFIDENCE: f32 = 0.15;
const SUMMARY_MAX_CHARS: usize = 100;
const BODY_PROMPT_CHARS: usize = 1500;

const CATEGORY_SYSTEM: &str = "You classify sales-outreach emails. Respond with a single JSON \
object: {\"category\": string, \"confidence\": number between 0 and 1, \"reasoning\": array of \
short strings}. The category must be exactly one of: Interested, Meeting Booked, Not Interested, \
Spam, Out of Office.";

const SENTIMENT_SYSTEM: &str = "You judge the sentiment of an email. Respond with a single JSON \
object: {\"sentiment\": string, \"confidence\": number between 0 and 1}. The sentiment must be \
exactly one of: Positive, Neutral, Negative, Automated.";

const INTENT_SYSTEM: &str = "You judge the intent of an email. Respond with a single JSON \
object: {\"intent\": string, \"confidence\": number between 0 and 1}. The intent must be exactly \
one of: Inquiry, Confirmation, Rejection, Informational, Automated.";

const SUMMARY_SYSTEM: &str = "Summarize the email in one sentence of at most 100 characters. \
Respond with the sentence only, no quotes.";

fn email_prompt(email: &Email) -> String {
    let body: String = email.body.chars().take(BODY_PROMPT_CHARS).collect();
    format!(
        "Subject: {}\nFrom: {}\nBody:\n{}",
        email.subject, email.from, body
    )
}

/// Carves the JSON object out of a chatty model response.
fn extract_json(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&raw[start..=end])
}

#[derive(Debug, Deserialize)]
struct CategoryResponse {
    category: String,
    confidence: f32,
    #[serde(default)]
    reasoning: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SentimentResponse {
    sentiment: String,
    confidence: f32,
}

#[derive(Debug, Deserialize)]
struct IntentResponse {
    intent: String,
    confidence: f32,
}

fn invalid_format_fallback() -> ClassificationResult {
    ClassificationResult {
        category: Category::Spam,
        confidence: FALLBACK_CONFIDENCE,
        reasoning: vec![INVALID_RESPONSE_REASON.to_string()],
    }
}

fn parse_category(raw: &str) -> ClassificationResult {
    let parsed = extract_json(raw)
        .and_then(|json| serde_json::from_str::<CategoryResponse>(json).ok());
    match parsed {
        Some(r) => match Category::parse(&r.category) {
            Some(category) => ClassificationResult {
                category,
                confidence: r.confidence.clamp(0.0, 1.0),
                reasoning: r.reasoning,
            },
            None => invalid_format_fallback(),
        },
        None => invalid_format_fallback(),
    }
}

fn parse_sentiment(raw: &str) -> Option<Signal<Sentiment>> {
    let r = extract_json(raw)
        .and_then(|json| serde_json::from_str::<SentimentResponse>(json).ok())?;
    Some(Signal {
        value: Sentiment::parse(&r.sentiment)?,
        confidence: r.confidence.clamp(0.0, 1.0),
    })
}

fn parse_intent(raw: &str) -> Option<Signal<Intent>> {
    let r =
        extract_json(raw).and_then(|json| serde_json::from_str::<IntentResponse>(json).ok())?;
    Some(Signal {
        value: Intent::parse(&r.intent)?,
        confidence: r.confidence.clamp(0.0, 1.0),
    })
}

/// Local summary used when the model is unavailable: subject and body joined,
/// cut to 100 characters at the last whole word, ellipsis appended.
pub fn local_summary(subject: &str, body: &str) -> String {
    let combined = format!("{} {}", subject.trim(), body.trim());
    let combined = combined.trim();
    format!("{}...", truncate_at_word(combined, SUMMARY_MAX_CHARS))
}

fn truncate_at_word(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.trim_end().to_string();
    }
    let prefix: String = text.chars().take(max_chars).collect();
    match prefix.rfind(' ') {
        Some(pos) => prefix[..pos].trim_end().to_string(),
        None => prefix,
    }
}

pub struct ClassificationPipeline {
    provider: Arc<dyn CompletionProvider>,
    window: Arc<RateWindow>,
    /// Flips true after the first successful model call; read by health.
    reachable: AtomicBool,
}

impl ClassificationPipeline {
    pub fn new(provider: Arc<dyn CompletionProvider>, window: Arc<RateWindow>) -> Self {
        Self {
            provider,
            window,
            reachable: AtomicBool::new(false),
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::Relaxed)
    }

    /// One throttled, retried model call. The window slot is claimed inside
    /// the retry loop so every attempt counts against the quota.
    async fn call(&self, label: &str, system: &str, user: &str) -> Result<String, ClassifyError> {
        let result = with_retry(label, || async {
            self.window.acquire().await;
            self.provider.complete(system, user).await
        })
        .await;
        if result.is_ok() {
            self.reachable.store(true, Ordering::Relaxed);
        }
        result
    }

    /// Classifies one email. Never fails: transport outages and junk
    /// responses both collapse into a low-confidence Spam fallback, which is
    /// terminal per message (reconciliation may try again later).
    pub async fn classify(&self, email: &Email) -> ClassificationResult {
        let user = email_prompt(email);

        let base = match self.call("category", CATEGORY_SYSTEM, &user).await {
            Ok(raw) => parse_category(&raw),
            Err(e) => {
                warn!("Category call failed for {}: {}", email.id, e);
                return ClassificationResult {
                    category: Category::Spam,
                    confidence: OUTAGE_CONFIDENCE,
                    reasoning: vec![format!("Classification service unavailable: {}", e)],
                };
            }
        };

        let sentiment = match self.call("sentiment", SENTIMENT_SYSTEM, &user).await {
            Ok(raw) => parse_sentiment(&raw),
            Err(e) => {
                warn!("Sentiment call failed for {}: {}", email.id, e);
                None
            }
        };

        let intent = match self.call("intent", INTENT_SYSTEM, &user).await {
            Ok(raw) => parse_intent(&raw),
            Err(e) => {
                warn!("Intent call failed for {}: {}", email.id, e);
                None
            }
        };

        fusion::fuse(base, sentiment, intent)
    }

    /// Produces a one-sentence summary, falling back to a local truncation
    /// when the model cannot be reached. Model output that ignores the
    /// length instruction is cut at a word boundary.
    pub async fn summarize(&self, email: &Email) -> String {
        match self.call("summary", SUMMARY_SYSTEM, &email_prompt(email)).await {
            Ok(raw) => {
                let summary = raw.trim().trim_matches('"').trim().to_string();
                if summary.is_empty() {
                    local_summary(&email.subject, &email.body)
                } else if summary.chars().count() > SUMMARY_MAX_CHARS {
                    format!("{}...", truncate_at_word(&summary, SUMMARY_MAX_CHARS))
                } else {
                    summary
                }
            }
            Err(e) => {
                warn!("Summary call failed for {}: {}", email.id, e);
                local_summary(&email.subject, &email.body)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::sync::Mutex;

    /// Provider that replays a scripted sequence of responses.
    struct ScriptedProvider {
        responses: Mutex<VecDeque<Result<String, ClassifyError>>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<Result<String, ClassifyError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
            }
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String, ClassifyError> {
            self.responses
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Err(ClassifyError::Http("script exhausted".into())))
        }
    }

    fn pipeline(responses: Vec<Result<String, ClassifyError>>) -> ClassificationPipeline {
        ClassificationPipeline::new(
            Arc::new(ScriptedProvider::new(responses)),
            Arc::new(RateWindow::new(1000, Duration::from_secs(60))),
        )
    }

    fn email() -> Email {
        Email {
            id: "account1-1-abc".into(),
            account_id: "account1".into(),
            message_id: "<m@x>".into(),
            subject: "Meeting".into(),
            from: "alice@example.com".into(),
            to: "bob@example.com".into(),
            date: Utc::now(),
            body: "Hello world, let's meet tomorrow at noon to discuss the proposal in detail"
                .into(),
            folder: "INBOX".into(),
            thread_id: None,
            ai_category: None,
            ai_confidence: None,
            ai_reasoning: None,
            summary: None,
        }
    }

    #[test]
    fn extract_json_finds_braced_object() {
        assert_eq!(extract_json("noise {\"a\":1} trailing"), Some("{\"a\":1}"));
        assert_eq!(extract_json("no braces at all"), None);
        assert_eq!(extract_json("} inverted {"), None);
    }

    #[tokio::test]
    async fn malformed_response_falls_back_to_spam() {
        let p = pipeline(vec![
            Ok("I cannot answer in JSON, sorry".into()),
            Ok(r#"{"sentiment": "Neutral", "confidence": 0.5}"#.into()),
            Ok(r#"{"intent": "Inquiry", "confidence": 0.5}"#.into()),
        ]);
        let result = p.classify(&email()).await;
        assert_eq!(result.category, Category::Spam);
        assert!((result.confidence - 0.3).abs() < 1e-6);
        assert_eq!(result.reasoning, vec![INVALID_RESPONSE_REASON.to_string()]);
    }

    #[tokio::test]
    async fn out_of_enumeration_category_falls_back() {
        let p = pipeline(vec![
            Ok(r#"{"category": "Newsletter", "confidence": 0.9, "reasoning": []}"#.into()),
            Ok(r#"{"sentiment": "Neutral", "confidence": 0.5}"#.into()),
            Ok(r#"{"intent": "Inquiry", "confidence": 0.5}"#.into()),
        ]);
        let result = p.classify(&email()).await;
        assert_eq!(result.category, Category::Spam);
        assert!((result.confidence - 0.3).abs() < 1e-6);
    }

    #[tokio::test]
    async fn service_outage_returns_low_confidence_spam() {
        let p = pipeline(vec![Err(ClassifyError::Http("connection refused".into()))]);
        let result = p.classify(&email()).await;
        assert_eq!(result.category, Category::Spam);
        assert!(result.confidence >= 0.1 && result.confidence <= 0.2);
        assert!(result.reasoning[0].contains("unavailable"));
        assert!(!p.is_reachable());
    }

    #[tokio::test]
    async fn fuses_signals_on_the_happy_path() {
        let p = pipeline(vec![
            Ok(r#"{"category": "Interested", "confidence": 0.7, "reasoning": ["wants a demo"]}"#
                .into()),
            Ok(r#"{"sentiment": "Positive", "confidence": 0.9}"#.into()),
            Ok(r#"{"intent": "Inquiry", "confidence": 0.8}"#.into()),
        ]);
        let result = p.classify(&email()).await;
        assert_eq!(result.category, Category::Interested);
        assert!((result.confidence - 0.8).abs() < 1e-6);
        assert!(result
            .reasoning
            .contains(&fusion::REASON_POSITIVE_INTEREST.to_string()));
        assert!(p.is_reachable());
    }

    #[tokio::test]
    async fn failed_auxiliary_calls_leave_base_untouched() {
        let p = pipeline(vec![
            Ok(r#"{"category": "Interested", "confidence": 0.7, "reasoning": []}"#.into()),
            Err(ClassifyError::Http("boom".into())),
            Err(ClassifyError::Http("boom".into())),
        ]);
        let result = p.classify(&email()).await;
        assert_eq!(result.category, Category::Interested);
        assert!((result.confidence - 0.7).abs() < 1e-6);
    }

    #[tokio::test]
    async fn summarize_falls_back_locally_on_outage() {
        let p = pipeline(vec![Err(ClassifyError::Http("down".into()))]);
        let summary = p.summarize(&email()).await;
        assert!(summary.ends_with("..."));
        let text = summary.trim_end_matches("...");
        assert!(text.chars().count() <= 100);
        assert!(text.starts_with("Meeting Hello world"));
        // Must end on a whole word.
        assert!(!text.ends_with(' '));
    }

    #[test]
    fn local_summary_truncates_long_bodies_at_word_boundary() {
        let body = "word ".repeat(60);
        let summary = local_summary("Subject line", &body);
        assert!(summary.ends_with("..."));
        let text = summary.trim_end_matches("...");
        assert!(text.chars().count() <= 100);
        assert!(text.ends_with("word"));
    }

    #[tokio::test]
    async fn summarize_uses_model_output_when_available() {
        let p = pipeline(vec![Ok("\"Prospect wants a demo next week.\"".into())]);
        let summary = p.summarize(&email()).await;
        assert_eq!(summary, "Prospect wants a demo next week.");
    }

    #[tokio::test]
    async fn summarize_cuts_overlong_model_output_at_a_word_boundary() {
        let verbose = "word ".repeat(50);
        let p = pipeline(vec![Ok(verbose)]);
        let summary = p.summarize(&email()).await;
        assert!(summary.ends_with("..."));
        let text = summary.trim_end_matches("...");
        assert!(text.chars().count() <= 100);
        assert!(text.ends_with("word"));
    }

    /// Counts upstream calls and rate-limits the first `fail_first` of them.
    struct CountingProvider {
        calls: std::sync::atomic::AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl CompletionProvider for CountingProvider {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String, ClassifyError> {
            let n = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if n < self.fail_first {
                Err(ClassifyError::RateLimited {
                    message: "quota".into(),
                    retry_after: None,
                })
            } else {
                Ok(r#"{"category": "Spam", "confidence": 0.9, "reasoning": []}"#.into())
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn every_retry_attempt_consumes_a_window_slot() {
        let provider = Arc::new(CountingProvider {
            calls: std::sync::atomic::AtomicU32::new(0),
            fail_first: 2,
        });
        let p = ClassificationPipeline::new(
            provider.clone(),
            Arc::new(RateWindow::new(1, std::time::Duration::from_secs(60))),
        );

        let start = tokio::time::Instant::now();
        let raw = p.call("category", CATEGORY_SYSTEM, "prompt").await;
        assert!(raw.is_ok());
        assert_eq!(provider.calls.load(std::sync::atomic::Ordering::SeqCst), 3);
        // With one slot per minute, the second and third attempts each had to
        // wait for a window reset.
        assert!(start.elapsed() >= std::time::Duration::from_secs(110));
    }
}
