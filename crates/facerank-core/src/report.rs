//! JSON renderings of pipeline output for the daemon and CLI.

use crate::ranking::Ranking;
use crate::types::GalleryEntry;
use serde_json::{json, Value};

/// `{query, results: [{entry_id, similarity}], failed: [{entry_id, error}], scanned, unusable}`
pub fn ranking_report(query: &str, ranking: &Ranking) -> Value {
    let failed: Vec<Value> = ranking
        .failures
        .iter()
        .map(|f| json!({ "entry_id": f.entry_id, "error": f.error.to_string() }))
        .collect();
    json!({
        "query": query,
        "results": ranking.results,
        "failed": failed,
        "scanned": ranking.scanned,
        "unusable": ranking.unusable,
    })
}

/// `[{entry_id, usable}]` in scan order.
pub fn gallery_report(entries: &[GalleryEntry]) -> Value {
    entries
        .iter()
        .map(|e| json!({ "entry_id": e.id(), "usable": e.usable }))
        .collect()
}
