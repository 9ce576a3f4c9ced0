use config::{Environment, File};
use log::warn;
use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;

/// Highest account slot probed in the environment (`ACCOUNT1_*` .. `ACCOUNT10_*`).
pub const MAX_ACCOUNT_SLOTS: usize = 10;

/// One configured mailbox. Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub folder: String,
    pub tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Base URL of the search index REST API.
    pub url: String,
    /// Index name holding email documents.
    pub index: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// Chat-completions endpoint (OpenAI-compatible).
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    pub slack_webhook_url: Option<String>,
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub log: LogConfig,
    pub index: IndexConfig,
    pub ai: AiConfig,
    /// Webhook targets; both optional, absent section disables alerts.
    #[serde(default)]
    pub notify: NotifyConfig,
    /// Path of the append-only feedback log.
    pub feedback_log: String,
    /// Mailbox poll interval in seconds while watching.
    pub poll_interval_secs: u64,
    /// Accounts are assembled from numbered env slots, not from the file.
    #[serde(skip)]
    pub accounts: Vec<AccountConfig>,
}

impl Settings {
    pub fn new(config_path: Option<&str>) -> Result<Self, SettingsError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("index.url", "http://localhost:9200")?
            .set_default("index.index", "emails")?
            .set_default("ai.api_url", "https://api.openai.com/v1/chat/completions")?
            .set_default("ai.api_key", "")?
            .set_default("ai.model", "gpt-4o-mini")?
            .set_default("ai.max_tokens", 500)?
            .set_default("feedback_log", "feedback.jsonl")?
            .set_default("poll_interval_secs", 60)?;

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path));
        }

        // Double underscore nests, single underscore stays in the key:
        // `MAILTRIAGE_INDEX__URL` overrides `index.url`,
        // `MAILTRIAGE_FEEDBACK_LOG` overrides `feedback_log`.
        builder = builder.add_source(
            Environment::with_prefix("MAILTRIAGE")
                .separator("__")
                .try_parsing(true)
                .ignore_empty(true),
        );

        // Direct environment variables for the settings operators touch most.
        let env_vars = [
            ("ELASTICSEARCH_URL", "index.url"),
            ("ELASTICSEARCH_INDEX", "index.index"),
            ("AI_API_URL", "ai.api_url"),
            ("AI_API_KEY", "ai.api_key"),
            ("AI_MODEL", "ai.model"),
            ("SLACK_WEBHOOK_URL", "notify.slack_webhook_url"),
            ("WEBHOOK_URL", "notify.webhook_url"),
            ("FEEDBACK_LOG", "feedback_log"),
            ("POLL_INTERVAL_SECS", "poll_interval_secs"),
        ];
        for (env_var, key) in &env_vars {
            if let Ok(value) = env::var(env_var) {
                if *env_var == "POLL_INTERVAL_SECS" {
                    if let Ok(secs) = value.parse::<u64>() {
                        builder = builder.set_override(*key, secs)?;
                    } else {
                        warn!("Invalid integer value in {}: {}", env_var, value);
                    }
                } else {
                    builder = builder.set_override(*key, value)?;
                }
            }
        }

        let mut settings: Settings = builder.build()?.try_deserialize()?;
        settings.accounts = load_accounts_from_env();
        Ok(settings)
    }
}

/// Assembles account configs from `ACCOUNT{n}_HOST/PORT/USER/PASS/FOLDER/TLS`.
/// A slot missing host, user or pass is disabled and skipped.
pub fn load_accounts_from_env() -> Vec<AccountConfig> {
    let mut accounts = Vec::new();
    for n in 1..=MAX_ACCOUNT_SLOTS {
        let var = |suffix: &str| env::var(format!("ACCOUNT{}_{}", n, suffix)).ok();

        let (host, user, pass) = match (var("HOST"), var("USER"), var("PASS")) {
            (Some(h), Some(u), Some(p)) => (h, u, p),
            _ => continue,
        };

        let port = var("PORT")
            .and_then(|v| match v.parse::<u16>() {
                Ok(p) => Some(p),
                Err(_) => {
                    warn!("Invalid port for account slot {}: {}", n, v);
                    None
                }
            })
            .unwrap_or(993);
        let folder = var("FOLDER").unwrap_or_else(|| "INBOX".to_string());
        let tls = var("TLS")
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(true);

        accounts.push(AccountConfig {
            id: format!("account{}", n),
            host,
            port,
            user,
            pass,
            folder,
            tls,
        });
    }
    accounts
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log: LogConfig {
                level: "info".to_string(),
            },
            index: IndexConfig {
                url: "http://localhost:9200".to_string(),
                index: "emails".to_string(),
            },
            ai: AiConfig {
                api_url: "https://api.openai.com/v1/chat/completions".to_string(),
                api_key: String::new(),
                model: "gpt-4o-mini".to_string(),
                max_tokens: 500,
            },
            notify: NotifyConfig {
                slack_webhook_url: None,
                webhook_url: None,
            },
            feedback_log: "feedback.jsonl".to_string(),
            poll_interval_secs: 60,
            accounts: Vec::new(),
        }
    }
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to load or parse configuration: {0}")]
    LoadError(#[from] config::ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_env_vars_reach_multi_word_keys() {
        env::set_var("MAILTRIAGE_FEEDBACK_LOG", "corrections.jsonl");
        env::set_var("MAILTRIAGE_POLL_INTERVAL_SECS", "120");
        env::set_var("MAILTRIAGE_INDEX__URL", "http://search.internal:9200");

        let settings = Settings::new(None).unwrap();
        assert_eq!(settings.feedback_log, "corrections.jsonl");
        assert_eq!(settings.poll_interval_secs, 120);
        assert_eq!(settings.index.url, "http://search.internal:9200");

        env::remove_var("MAILTRIAGE_FEEDBACK_LOG");
        env::remove_var("MAILTRIAGE_POLL_INTERVAL_SECS");
        env::remove_var("MAILTRIAGE_INDEX__URL");
    }

    #[test]
    fn incomplete_account_slots_are_skipped() {
        // Slot 9 gets a host but no credentials.
        env::set_var("ACCOUNT9_HOST", "imap.example.com");
        let accounts = load_accounts_from_env();
        assert!(accounts.iter().all(|a| a.id != "account9"));
        env::remove_var("ACCOUNT9_HOST");
    }

    #[test]
    fn complete_account_slot_gets_defaults() {
        env::set_var("ACCOUNT8_HOST", "imap.example.com");
        env::set_var("ACCOUNT8_USER", "user@example.com");
        env::set_var("ACCOUNT8_PASS", "secret");
        let accounts = load_accounts_from_env();
        let acct = accounts
            .iter()
            .find(|a| a.id == "account8")
            .expect("slot 8 should load");
        assert_eq!(acct.port, 993);
        assert_eq!(acct.folder, "INBOX");
        assert!(acct.tls);
        env::remove_var("ACCOUNT8_HOST");
        env::remove_var("ACCOUNT8_USER");
        env::remove_var("ACCOUNT8_PASS");
    }
}
