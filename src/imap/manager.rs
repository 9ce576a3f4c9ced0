// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Account Connection Manager
//!
//! Owns one long-lived IMAP connection per configured account: initial
//! 30-day backfill, then fixed-interval polling for the last day's messages.
//! Re-emitting duplicates is fine; document ids are content-derived and the
//! index upsert is idempotent.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use log::{error, info, warn};
use tokio::sync::{watch, RwLock};

use crate::config::AccountConfig;
use crate::imap::client::MailSession;
use crate::imap::error::ImapError;
use crate::imap::normalize::normalize;
use crate::pipeline::IngestPipeline;

const BACKFILL_DAYS: i64 = 30;
const WATCH_WINDOW_DAYS: i64 = 1;

/// Connection lifecycle for one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountState {
    Disconnected,
    Connecting,
    Authenticated,
    Backfilling,
    Watching,
    Reconnecting,
    Failed,
}

impl fmt::Display for AccountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccountState::Disconnected => "disconnected",
            AccountState::Connecting => "connecting",
            AccountState::Authenticated => "authenticated",
            AccountState::Backfilling => "backfilling",
            AccountState::Watching => "watching",
            AccountState::Reconnecting => "reconnecting",
            AccountState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Shared registry of per-account states, consulted by the health check.
pub type StateRegistry = Arc<RwLock<HashMap<String, AccountState>>>;

pub struct AccountManager {
    config: AccountConfig,
    pipeline: Arc<IngestPipeline>,
    poll_interval: Duration,
    states: StateRegistry,
}

impl AccountManager {
    pub fn new(
        config: AccountConfig,
        pipeline: Arc<IngestPipeline>,
        poll_interval: Duration,
        states: StateRegistry,
    ) -> Self {
        Self {
            config,
            pipeline,
            poll_interval,
            states,
        }
    }

    async fn set_state(&self, state: AccountState) {
        info!("Account {} -> {}", self.config.id, state);
        self.states
            .write()
            .await
            .insert(self.config.id.clone(), state);
    }

    /// Connects, selects the configured folder and returns the ready session.
    async fn open_session(&self) -> Result<MailSession, ImapError> {
        self.set_state(AccountState::Connecting).await;
        let mut session = MailSession::connect(&self.config).await?;
        self.set_state(AccountState::Authenticated).await;
        session.select_folder(&self.config.folder).await?;
        Ok(session)
    }

    /// Searches messages since `days_back` days ago and streams each through
    /// the normalizer into the pipeline. Parse failures drop the message.
    async fn ingest_window(
        &self,
        session: &mut MailSession,
        days_back: i64,
    ) -> Result<usize, ImapError> {
        let since = (Utc::now() - ChronoDuration::days(days_back)).date_naive();
        let uids = session.search_since(since).await?;
        if uids.is_empty() {
            return Ok(0);
        }
        let raw_messages = session.fetch_messages(&uids).await?;
        let mut emitted = 0usize;
        for raw in &raw_messages {
            match normalize(&self.config, raw) {
                Ok(email) => {
                    self.pipeline.process(email).await;
                    emitted += 1;
                }
                Err(e) => {
                    warn!(
                        "Dropping unparseable message uid {} on {}: {}",
                        raw.uid, self.config.id, e
                    );
                }
            }
        }
        Ok(emitted)
    }

    /// Runs the full lifecycle for this account until shutdown or terminal
    /// failure. Failures are logged and park the account in `Failed` for this
    /// boot attempt; they never take the process down.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut session = match self.open_session().await {
            Ok(session) => session,
            Err(e) => {
                error!("Account {} failed to connect: {}", self.config.id, e);
                self.set_state(AccountState::Failed).await;
                return;
            }
        };

        self.set_state(AccountState::Backfilling).await;
        match self.ingest_window(&mut session, BACKFILL_DAYS).await {
            Ok(count) => info!(
                "Backfill complete for {}: {} messages emitted",
                self.config.id, count
            ),
            Err(e) => {
                error!("Backfill failed for {}: {}", self.config.id, e);
                self.set_state(AccountState::Failed).await;
                return;
            }
        }

        self.set_state(AccountState::Watching).await;
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; the backfill already covered it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Account {} shutting down", self.config.id);
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.ingest_window(&mut session, WATCH_WINDOW_DAYS).await {
                        warn!("Poll failed for {}: {}", self.config.id, e);
                        self.set_state(AccountState::Reconnecting).await;
                        match self.open_session().await {
                            Ok(fresh) => {
                                session = fresh;
                                self.set_state(AccountState::Watching).await;
                            }
                            Err(re) => {
                                error!(
                                    "Reconnect failed for {}: {}; giving up for this boot",
                                    self.config.id, re
                                );
                                self.set_state(AccountState::Failed).await;
                                return;
                            }
                        }
                    }
                }
            }
        }

        if let Err(e) = session.logout().await {
            warn!("Logout failed for {}: {}", self.config.id, e);
        }
        self.set_state(AccountState::Disconnected).await;
    }
}
