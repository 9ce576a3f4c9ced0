// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Notification Dispatcher
//!
//! Fires best-effort alerts when a message is classified Interested: one to
//! a chat webhook, one to a generic webhook, each on its own task. Delivery
//! failures are logged and dropped; the retry policy is pluggable but
//! defaults to none.

use log::{debug, warn};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::sleep;

use crate::config::NotifyConfig;
use crate::models::{Category, Email};

/// How a single webhook delivery is retried. `None` keeps the historical
/// fire-and-forget behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    None,
    Fixed { attempts: u32, delay: Duration },
}

pub struct Notifier {
    client: Client,
    slack_webhook_url: Option<String>,
    webhook_url: Option<String>,
    retry: RetryPolicy,
}

fn slack_payload(email: &Email) -> Value {
    let confidence = email.ai_confidence.unwrap_or(0.0);
    json!({
        "text": format!(
            "New interested lead: \"{}\" from {} ({:.0}% confidence)",
            email.subject,
            email.from,
            confidence * 100.0
        )
    })
}

fn webhook_payload(email: &Email) -> Value {
    json!({
        "event": "email.interested",
        "email": {
            "id": email.id,
            "accountId": email.account_id,
            "subject": email.subject,
            "from": email.from,
            "aiConfidence": email.ai_confidence,
        }
    })
}

async fn deliver(client: Client, url: String, payload: Value, retry: RetryPolicy, label: &str) {
    let attempts = match retry {
        RetryPolicy::None => 1,
        RetryPolicy::Fixed { attempts, .. } => attempts.max(1),
    };
    for attempt in 1..=attempts {
        match client.post(&url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("{} alert delivered", label);
                return;
            }
            Ok(response) => {
                warn!(
                    "{} alert attempt {}/{} rejected: {}",
                    label,
                    attempt,
                    attempts,
                    response.status()
                );
            }
            Err(e) => {
                warn!("{} alert attempt {}/{} failed: {}", label, attempt, attempts, e);
            }
        }
        if let RetryPolicy::Fixed { delay, .. } = retry {
            if attempt < attempts {
                sleep(delay).await;
            }
        }
    }
}

impl Notifier {
    pub fn new(config: &NotifyConfig) -> Self {
        Self {
            client: Client::new(),
            slack_webhook_url: config.slack_webhook_url.clone(),
            webhook_url: config.webhook_url.clone(),
            retry: RetryPolicy::None,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Dispatches alerts for a freshly classified email. Only Interested
    /// messages produce any traffic; each target is independent.
    pub fn notify_classified(&self, email: &Email) {
        if email.ai_category != Some(Category::Interested) {
            return;
        }
        if let Some(url) = &self.slack_webhook_url {
            tokio::spawn(deliver(
                self.client.clone(),
                url.clone(),
                slack_payload(email),
                self.retry,
                "slack",
            ));
        }
        if let Some(url) = &self.webhook_url {
            tokio::spawn(deliver(
                self.client.clone(),
                url.clone(),
                webhook_payload(email),
                self.retry,
                "webhook",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn interested_email() -> Email {
        Email {
            id: "account1-1-abc".into(),
            account_id: "account1".into(),
            message_id: "<m@x>".into(),
            subject: "Very interested in a demo".into(),
            from: "alice@example.com".into(),
            to: "sales@example.com".into(),
            date: Utc::now(),
            body: "please call".into(),
            folder: "INBOX".into(),
            thread_id: None,
            ai_category: Some(Category::Interested),
            ai_confidence: Some(0.85),
            ai_reasoning: None,
            summary: None,
        }
    }

    #[test]
    fn slack_payload_carries_confidence_percent() {
        let payload = slack_payload(&interested_email());
        let text = payload["text"].as_str().unwrap();
        assert!(text.contains("Very interested in a demo"));
        assert!(text.contains("85%"));
    }

    #[test]
    fn webhook_payload_identifies_the_document() {
        let payload = webhook_payload(&interested_email());
        assert_eq!(payload["event"], "email.interested");
        assert_eq!(payload["email"]["id"], "account1-1-abc");
        assert_eq!(payload["email"]["accountId"], "account1");
    }

    #[tokio::test]
    async fn non_interested_emails_produce_no_tasks() {
        let notifier = Notifier::new(&NotifyConfig {
            slack_webhook_url: Some("http://127.0.0.1:1/slack".into()),
            webhook_url: Some("http://127.0.0.1:1/hook".into()),
        });
        let mut email = interested_email();
        email.ai_category = Some(Category::Spam);
        // Must not panic or block; nothing observable is sent.
        notifier.notify_classified(&email);
    }
}
