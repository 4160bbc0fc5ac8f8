//! Elasticsearch bulk sink - one scripted `_bulk` call per flush
//!
//! Each touched article becomes two NDJSON lines: an update action header
//! and a painless script that adds the summed deltas server-side. The
//! increment happens inside Elasticsearch, so concurrent writers (including
//! the next flush cycle) never race on a client-side read-modify-write.
//!
//! The call uses `refresh=true`: updated counters are visible to the next
//! search immediately, trading a little write latency for read freshness on
//! the article listing pages.

use super::types::AggregatedUpdate;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

#[derive(Debug)]
pub enum SinkError {
    Http(reqwest::Error),
    Serialization(serde_json::Error),
    /// Non-2xx response from the bulk endpoint
    Rejected(String),
}

impl From<reqwest::Error> for SinkError {
    fn from(err: reqwest::Error) -> Self {
        SinkError::Http(err)
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        SinkError::Serialization(err)
    }
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Http(e) => write!(f, "Bulk request failed: {}", e),
            SinkError::Serialization(e) => write!(f, "Serialization error: {}", e),
            SinkError::Rejected(msg) => write!(f, "Bulk request rejected: {}", msg),
        }
    }
}

impl std::error::Error for SinkError {}

/// Sink for aggregated counter updates
///
/// One call applies every article in the update; the consumer loop treats
/// the whole batch as applied-or-dropped (see the error design: a failed
/// flush is logged and discarded, never retried).
#[async_trait]
pub trait CounterSink: Send + Sync {
    async fn apply_bulk(&self, update: &AggregatedUpdate) -> Result<(), SinkError>;
}

/// Build the NDJSON `_bulk` body for an aggregated update
///
/// Two lines per article:
/// 1. `{"update": {"_index": <index>, "_id": <article_id>}}`
/// 2. `{"script": {"source": "ctx._source.<f> += params.<f>;...",
///    "lang": "painless", "params": {<f>: <net delta>, ...}}}`
///
/// The bulk endpoint requires the trailing newline.
pub fn build_bulk_body(index: &str, update: &AggregatedUpdate) -> Result<String, SinkError> {
    let mut body = String::new();

    for (article_id, fields) in update {
        let action = json!({
            "update": {
                "_index": index,
                "_id": article_id,
            }
        });
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');

        let script_parts: Vec<String> = fields
            .keys()
            .map(|field| format!("ctx._source.{} += params.{}", field, field))
            .collect();
        let params: serde_json::Map<String, serde_json::Value> = fields
            .iter()
            .map(|(field, delta)| (field.as_str().to_string(), json!(*delta)))
            .collect();

        let doc = json!({
            "script": {
                "source": script_parts.join(";"),
                "lang": "painless",
                "params": params,
            }
        });
        body.push_str(&serde_json::to_string(&doc)?);
        body.push('\n');
    }

    Ok(body)
}

/// Reqwest-backed [`CounterSink`] targeting the `_bulk` endpoint
pub struct EsBulkSink {
    client: reqwest::Client,
    bulk_url: String,
    index: String,
}

impl EsBulkSink {
    pub fn new(es_url: &str, index: &str) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            bulk_url: format!("{}/_bulk?refresh=true", es_url.trim_end_matches('/')),
            index: index.to_string(),
        })
    }
}

#[async_trait]
impl CounterSink for EsBulkSink {
    async fn apply_bulk(&self, update: &AggregatedUpdate) -> Result<(), SinkError> {
        if update.is_empty() {
            return Ok(());
        }

        let body = build_bulk_body(&self.index, update)?;

        let response = self
            .client
            .post(&self.bulk_url)
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected(format!("{}: {}", status, detail)));
        }

        // Item-level failures (e.g. a deleted article) don't fail the call;
        // surface them in the log and move on.
        if let Ok(result) = response.json::<serde_json::Value>().await {
            if result.get("errors").and_then(|v| v.as_bool()) == Some(true) {
                log::warn!("⚠️  Bulk update reported item-level errors: {}", result);
            }
        }

        Ok(())
    }
}
