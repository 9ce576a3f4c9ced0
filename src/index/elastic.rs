// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Elasticsearch-backed `EmailIndex`.
//!
//! Connectivity is probed with bounded retries at startup only; afterwards a
//! connected flag gates every operation so an unreachable store degrades the
//! projector to no-ops instead of failing ingestion.

use async_trait::async_trait;
use log::{debug, error, info, warn};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::sleep;

use crate::config::IndexConfig;
use crate::index::{EmailIndex, IndexError, SearchFilters};
use crate::models::{ClassificationResult, Email};

const CONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_SEARCH_SIZE: usize = 100;

pub struct ElasticIndex {
    client: Client,
    base_url: String,
    index: String,
    connected: AtomicBool,
}

fn index_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "id":           { "type": "keyword" },
                "messageId":    { "type": "keyword" },
                "subject":      { "type": "text" },
                "body":         { "type": "text" },
                "from":         { "type": "text" },
                "to":           { "type": "text" },
                "date":         { "type": "date" },
                "folder":       { "type": "keyword" },
                "accountId":    { "type": "keyword" },
                "aiCategory":   { "type": "keyword" },
                "aiConfidence": { "type": "float" },
                "aiReasoning":  { "type": "text" },
                "threadId":     { "type": "keyword" },
                "summary":      { "type": "text" }
            }
        }
    })
}

impl ElasticIndex {
    pub fn new(config: &IndexConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.url.trim_end_matches('/').to_string(),
            index: config.index.clone(),
            connected: AtomicBool::new(false),
        }
    }

    /// Probes the store with exponential backoff, then creates the index
    /// mapping. The projector is returned either way; a failed probe leaves
    /// it disconnected and every operation becomes a no-op.
    pub async fn connect(config: &IndexConfig) -> Self {
        let projector = Self::new(config);
        for attempt in 0..CONNECT_ATTEMPTS {
            match projector.probe().await {
                Ok(()) => {
                    projector.connected.store(true, Ordering::Release);
                    info!("Search index reachable at {}", projector.base_url);
                    if let Err(e) = projector.ensure_index().await {
                        error!("Failed to ensure index mapping: {}", e);
                    }
                    return projector;
                }
                Err(e) if attempt + 1 < CONNECT_ATTEMPTS => {
                    let backoff = Duration::from_secs(2u64.saturating_pow(attempt));
                    warn!(
                        "Search index probe {}/{} failed ({}); retrying in {:?}",
                        attempt + 1,
                        CONNECT_ATTEMPTS,
                        e,
                        backoff
                    );
                    sleep(backoff).await;
                }
                Err(e) => warn!(
                    "Search index probe {}/{} failed ({})",
                    attempt + 1,
                    CONNECT_ATTEMPTS,
                    e
                ),
            }
        }
        error!(
            "Search index unreachable after {} attempts; index operations degrade to no-ops",
            CONNECT_ATTEMPTS
        );
        projector
    }

    async fn probe(&self) -> Result<(), IndexError> {
        let response = self.client.get(&self.base_url).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(IndexError::BadResponse(format!(
                "probe returned {}",
                response.status()
            )))
        }
    }

    fn doc_url(&self, id: &str) -> String {
        format!("{}/{}/_doc/{}", self.base_url, self.index, id)
    }

    async fn partial_update(&self, id: &str, doc: Value) -> Result<(), IndexError> {
        if !self.is_connected() {
            return Ok(());
        }
        let url = format!("{}/{}/_update/{}", self.base_url, self.index, id);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "doc": doc }))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(IndexError::BadResponse(format!(
                "update of {} returned {}",
                id,
                response.status()
            )))
        }
    }
}

fn build_query(query: &str, filters: &SearchFilters) -> Value {
    let mut must = Vec::new();
    let mut filter = Vec::new();
    let mut must_not = Vec::new();

    if !query.trim().is_empty() {
        must.push(json!({
            "multi_match": { "query": query, "fields": ["subject", "body"] }
        }));
    }
    if let Some(folder) = &filters.folder {
        filter.push(json!({ "term": { "folder": folder } }));
    }
    if let Some(account_id) = &filters.account_id {
        filter.push(json!({ "term": { "accountId": account_id } }));
    }
    if let Some(category) = &filters.category {
        filter.push(json!({ "term": { "aiCategory": category } }));
    }
    if filters.date_from.is_some() || filters.date_to.is_some() {
        let mut range = serde_json::Map::new();
        if let Some(from) = filters.date_from {
            range.insert("gte".into(), json!(from.to_rfc3339()));
        }
        if let Some(to) = filters.date_to {
            range.insert("lte".into(), json!(to.to_rfc3339()));
        }
        filter.push(json!({ "range": { "date": Value::Object(range) } }));
    }
    if let Some(min) = filters.min_confidence {
        filter.push(json!({ "range": { "aiConfidence": { "gte": min } } }));
    }
    if let Some(below) = filters.below_confidence {
        filter.push(json!({ "range": { "aiConfidence": { "lt": below } } }));
    }
    match filters.has_thread {
        Some(true) => filter.push(json!({ "exists": { "field": "threadId" } })),
        Some(false) => must_not.push(json!({ "exists": { "field": "threadId" } })),
        None => {}
    }
    match filters.has_summary {
        Some(true) => filter.push(json!({ "exists": { "field": "summary" } })),
        Some(false) => must_not.push(json!({ "exists": { "field": "summary" } })),
        None => {}
    }

    json!({
        "query": {
            "bool": { "must": must, "filter": filter, "must_not": must_not }
        },
        "sort": [ { "date": { "order": "desc" } } ],
        "size": filters.limit.unwrap_or(DEFAULT_SEARCH_SIZE)
    })
}

#[async_trait]
impl EmailIndex for ElasticIndex {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn ensure_index(&self) -> Result<(), IndexError> {
        if !self.is_connected() {
            return Ok(());
        }
        let url = format!("{}/{}", self.base_url, self.index);
        let head = self.client.head(&url).send().await?;
        if head.status().is_success() {
            debug!("Index {} already exists", self.index);
            return Ok(());
        }

        let response = self.client.put(&url).json(&index_mapping()).send().await?;
        let status = response.status();
        if status.is_success() {
            info!("Created index {} with field mapping", self.index);
            return Ok(());
        }
        // A concurrent boot may have won the race.
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST && body.contains("resource_already_exists") {
            debug!("Index {} created concurrently", self.index);
            return Ok(());
        }
        Err(IndexError::BadResponse(format!(
            "index creation returned {}: {}",
            status, body
        )))
    }

    async fn upsert(&self, email: &Email) -> Result<(), IndexError> {
        if !self.is_connected() {
            return Ok(());
        }
        // refresh=true keeps the reconciliation scans read-after-write.
        let response = self
            .client
            .put(self.doc_url(&email.id))
            .query(&[("refresh", "true")])
            .json(email)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(IndexError::BadResponse(format!(
                "upsert of {} returned {}",
                email.id,
                response.status()
            )))
        }
    }

    async fn update_classification(
        &self,
        id: &str,
        result: &ClassificationResult,
    ) -> Result<(), IndexError> {
        self.partial_update(
            id,
            json!({
                "aiCategory": result.category.as_str(),
                "aiConfidence": result.confidence.clamp(0.0, 1.0),
                "aiReasoning": result.reasoning,
            }),
        )
        .await
    }

    async fn update_summary(&self, id: &str, summary: &str) -> Result<(), IndexError> {
        self.partial_update(id, json!({ "summary": summary })).await
    }

    async fn get(&self, id: &str) -> Result<Option<Email>, IndexError> {
        if !self.is_connected() {
            return Ok(None);
        }
        let response = self.client.get(self.doc_url(id)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(IndexError::BadResponse(format!(
                "get of {} returned {}",
                id,
                response.status()
            )));
        }
        let body: Value = response.json().await?;
        match serde_json::from_value::<Email>(body["_source"].clone()) {
            Ok(email) => Ok(Some(email)),
            Err(e) => Err(IndexError::BadResponse(format!(
                "document {} failed to decode: {}",
                id, e
            ))),
        }
    }

    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<Email>, IndexError> {
        if !self.is_connected() {
            return Ok(Vec::new());
        }
        let url = format!("{}/{}/_search", self.base_url, self.index);
        let body = build_query(query, filters);
        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(IndexError::BadResponse(format!(
                "search returned {}",
                response.status()
            )));
        }
        let payload: Value = response.json().await?;
        let hits = payload["hits"]["hits"].as_array().cloned().unwrap_or_default();
        let mut emails = Vec::with_capacity(hits.len());
        for hit in hits {
            match serde_json::from_value::<Email>(hit["_source"].clone()) {
                Ok(email) => emails.push(email),
                Err(e) => warn!("Skipping undecodable search hit: {}", e),
            }
        }
        Ok(emails)
    }
}
