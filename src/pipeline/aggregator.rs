//! Batch aggregation - collapse many small deltas into minimal index writes
//!
//! One pass over the batch, summing deltas per (article, field). A thousand
//! view events for the same article become a single `views += 1000` entry,
//! which is the whole throughput win over writing once per event.

use super::types::{AggregatedUpdate, CounterEvent};

/// Sum a batch into net per-article, per-field deltas
///
/// Addition is commutative and associative, so arrival order within the
/// batch never affects the result. Entries are created on first touch; a
/// net-zero sum (e.g. like followed by un-like) is kept and applied as a
/// `+= 0`, matching the per-event behavior it replaces.
pub fn aggregate(batch: &[CounterEvent]) -> AggregatedUpdate {
    let mut update = AggregatedUpdate::new();

    for event in batch {
        *update
            .entry(event.article_id.clone())
            .or_default()
            .entry(event.field)
            .or_insert(0) += event.delta;
    }

    update
}
