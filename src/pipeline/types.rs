//! Core data structures for the counter pipeline
//!
//! Wire contract (queue payload, JSON):
//! `{"article_id": "<id>", "field": "views|likes|comments", "delta": <int>}`

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Article counter touched by a delta event
///
/// Closed set on purpose: the field name ends up inside the painless update
/// script, so anything not in this list must fail decoding instead of being
/// spliced into a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterField {
    Views,
    Likes,
    Comments,
}

impl CounterField {
    pub fn as_str(&self) -> &'static str {
        match self {
            CounterField::Views => "views",
            CounterField::Likes => "likes",
            CounterField::Comments => "comments",
        }
    }
}

impl std::fmt::Display for CounterField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One counter delta emitted by a write path (view, like, comment, ...)
///
/// Immutable once constructed. Acknowledged to the queue on receipt,
/// regardless of what later happens to the batch it joins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterEvent {
    pub article_id: String,
    pub field: CounterField,
    pub delta: i64,
}

/// Net deltas per article, per field, for one flush cycle
///
/// Inner map is ordered so the generated update script is deterministic.
pub type AggregatedUpdate = HashMap<String, BTreeMap<CounterField, i64>>;

/// Malformed queue payload
///
/// Wraps the serde error; the consumer loop turns this into a
/// reject-without-requeue (poison messages are never retried).
#[derive(Debug)]
pub struct DecodeError(serde_json::Error);

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Malformed counter event: {}", self.0)
    }
}

impl std::error::Error for DecodeError {}

/// Decode a raw queue payload into a [`CounterEvent`]
///
/// Never panics; any non-conforming shape (bad JSON, unknown field name,
/// wrong types) comes back as [`DecodeError`].
pub fn decode(payload: &[u8]) -> Result<CounterEvent, DecodeError> {
    serde_json::from_slice(payload).map_err(DecodeError)
}
