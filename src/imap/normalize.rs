use chrono::{DateTime, Utc};
use log::warn;
use mailparse::{dateparse, parse_mail, MailHeaderMap, ParsedMail};

use crate::config::AccountConfig;
use crate::imap::client::RawMessage;
use crate::imap::error::ImapError;
use crate::models::Email;

/// Finds the first `text/*` part in the MIME tree, depth first.
fn find_text_part(part: &ParsedMail) -> Result<Option<String>, ImapError> {
    let content_type = &part.ctype.mimetype;
    if content_type.starts_with("text/") {
        return Ok(Some(part.get_body()?));
    }
    for subpart in &part.subparts {
        if let Some(text) = find_text_part(subpart)? {
            return Ok(Some(text));
        }
    }
    Ok(None)
}

/// Thread identity comes from the root of the References chain, falling back
/// to In-Reply-To for clients that omit References.
fn extract_thread_id(parsed: &ParsedMail) -> Option<String> {
    if let Some(references) = parsed.headers.get_first_value("References") {
        if let Some(first) = references.split_whitespace().next() {
            return Some(first.to_string());
        }
    }
    parsed
        .headers
        .get_first_value("In-Reply-To")
        .map(|v| v.trim().to_string())
}

/// Turns one raw mailbox message into the canonical `Email` record.
///
/// Defaults are applied for anything missing: empty subject/body, the IMAP
/// internal date (or now) for a missing Date header. Address headers are kept
/// as the comma-joined display strings the sender wrote.
pub fn normalize(account: &AccountConfig, raw: &RawMessage) -> Result<Email, ImapError> {
    let parsed = parse_mail(&raw.body)?;

    let subject = parsed.headers.get_first_value("Subject").unwrap_or_default();
    let from = parsed.headers.get_first_value("From").unwrap_or_default();
    let to = parsed.headers.get_first_value("To").unwrap_or_default();
    let message_id = parsed
        .headers
        .get_first_value("Message-ID")
        .unwrap_or_default();

    let date: DateTime<Utc> = parsed
        .headers
        .get_first_value("Date")
        .and_then(|v| dateparse(&v).ok())
        .and_then(|epoch| DateTime::from_timestamp(epoch, 0))
        .or(raw.internal_date)
        .unwrap_or_else(Utc::now);

    let body = match find_text_part(&parsed) {
        Ok(Some(text)) => text,
        Ok(None) => String::new(),
        Err(e) => {
            warn!(
                "Failed to decode body of uid {} on {}: {}",
                raw.uid, account.id, e
            );
            String::new()
        }
    };

    Ok(Email {
        id: Email::derive_id(&account.id, raw.uid, &message_id),
        account_id: account.id.clone(),
        message_id,
        subject,
        from,
        to,
        date,
        body,
        folder: account.folder.clone(),
        thread_id: extract_thread_id(&parsed),
        ai_category: None,
        ai_confidence: None,
        ai_reasoning: None,
        summary: None,
    })
}
