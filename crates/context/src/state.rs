//! Per-session keyed state shared by every tool in a turn, and its
//! snapshot round-trip.
//!
//! Context loss is never fatal for the current turn: encode failures are
//! logged and produce an empty snapshot, restore failures are logged and
//! produce a fresh state.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::analysis::{GapAnalysis, TrendAnalysis};
use crate::table::{TableArtifact, TableData};

/// One recent conversation turn supplied to prompts.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
}

/// Reserved key inside `dataset_data` for semantic search hit tables.
const SEMANTIC_SEARCH_KEY: &str = "semantic_search";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ContextState
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The per-session keyed container of analytical artifacts.
///
/// Constructed fresh per request, restored from the session snapshot,
/// mutated by context-write tools, and encoded back on success.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextState {
    pub user_id: String,
    /// Named table artifacts (full or metadata-only).
    pub dataset_data: BTreeMap<String, TableData>,
    /// Semantic-search hit tables, encoded under `dataset_data.semantic_search`.
    pub search_results: BTreeMap<String, TableData>,
    /// Clustered variants of tables, carrying a `__cluster_id__` column.
    pub clustering: BTreeMap<String, TableData>,
    pub gap_analysis: BTreeMap<String, GapAnalysis>,
    pub trend_analysis: BTreeMap<String, TrendAnalysis>,
    pub conversation_history: Vec<HistoryEntry>,
    /// Unknown snapshot keys, preserved opaquely across the round-trip.
    pub extras: BTreeMap<String, Value>,
}

impl ContextState {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    /// Replace the recent history attached to this turn.
    pub fn attach_history(&mut self, history: &[HistoryEntry]) {
        self.conversation_history = history.to_vec();
    }

    // ── Artifact accessors used by tools ──────────────────────────

    pub fn insert_dataset(&mut self, name: &str, table: TableArtifact) {
        self.dataset_data
            .insert(name.to_string(), TableData::Table(table));
    }

    /// The full table for a dataset, if it has not degraded to metadata.
    pub fn dataset_table(&self, name: &str) -> Option<&TableArtifact> {
        self.dataset_data.get(name).and_then(TableData::as_full)
    }

    pub fn has_dataset(&self, name: &str) -> bool {
        self.dataset_data.contains_key(name)
    }

    pub fn insert_search_results(&mut self, name: &str, table: TableArtifact) {
        self.search_results
            .insert(name.to_string(), TableData::Table(table));
    }

    pub fn insert_clustering(&mut self, name: &str, table: TableArtifact) {
        self.clustering
            .insert(name.to_string(), TableData::Table(table));
    }

    pub fn clustering_table(&self, name: &str) -> Option<&TableArtifact> {
        self.clustering.get(name).and_then(TableData::as_full)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Snapshot encoding
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Produce the canonical snapshot encoding. Tables above `threshold`
    /// rows degrade to metadata-only descriptors.
    pub fn encode(&self, threshold: usize) -> dq_domain::Result<Value> {
        let mut dataset_data = Map::new();
        for (name, data) in &self.dataset_data {
            dataset_data.insert(name.clone(), encode_table(data, threshold)?);
        }
        if !self.search_results.is_empty() {
            let mut search = Map::new();
            for (name, data) in &self.search_results {
                search.insert(name.clone(), encode_table(data, threshold)?);
            }
            dataset_data.insert(SEMANTIC_SEARCH_KEY.to_string(), Value::Object(search));
        }

        let mut clustering = Map::new();
        for (name, data) in &self.clustering {
            clustering.insert(name.clone(), encode_table(data, threshold)?);
        }

        let mut root = Map::new();
        root.insert("user_id".into(), json!(self.user_id));
        root.insert("dataset_data".into(), Value::Object(dataset_data));
        root.insert("clustering".into(), Value::Object(clustering));
        root.insert(
            "gap_analysis".into(),
            serde_json::to_value(&self.gap_analysis)?,
        );
        root.insert(
            "trend_analysis".into(),
            serde_json::to_value(&self.trend_analysis)?,
        );
        root.insert(
            "conversation_history".into(),
            serde_json::to_value(&self.conversation_history)?,
        );
        for (key, value) in &self.extras {
            root.insert(key.clone(), value.clone());
        }
        Ok(Value::Object(root))
    }

    /// Encode, degrading to an empty snapshot on failure.
    pub fn encode_or_empty(&self, threshold: usize) -> Value {
        match self.encode(threshold) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "context snapshot encoding failed; writing empty snapshot");
                json!({ "user_id": self.user_id })
            }
        }
    }

    /// Reconstruct a state from a snapshot. Malformed snapshots yield a
    /// fresh state with a warning; malformed individual entries are
    /// skipped the same way.
    pub fn restore(user_id: impl Into<String>, snapshot: &Value) -> Self {
        let user_id = user_id.into();
        let Some(root) = snapshot.as_object() else {
            tracing::warn!("session snapshot is not an object; starting fresh");
            return Self::new(user_id);
        };

        let mut state = Self::new(user_id);

        for (key, value) in root {
            match key.as_str() {
                "user_id" => {
                    if let Some(uid) = value.as_str() {
                        if !uid.is_empty() {
                            state.user_id = uid.to_string();
                        }
                    }
                }
                "dataset_data" => {
                    let Some(entries) = value.as_object() else {
                        tracing::warn!("snapshot dataset_data is not an object; skipping");
                        continue;
                    };
                    for (name, raw) in entries {
                        if name == SEMANTIC_SEARCH_KEY {
                            let Some(search) = raw.as_object() else {
                                continue;
                            };
                            for (search_name, search_raw) in search {
                                match decode_table(search_raw) {
                                    Some(data) => {
                                        state.search_results.insert(search_name.clone(), data);
                                    }
                                    None => warn_skipped("semantic_search", search_name),
                                }
                            }
                            continue;
                        }
                        match decode_table(raw) {
                            Some(data) => {
                                state.dataset_data.insert(name.clone(), data);
                            }
                            None => warn_skipped("dataset_data", name),
                        }
                    }
                }
                "clustering" => {
                    let Some(entries) = value.as_object() else {
                        continue;
                    };
                    for (name, raw) in entries {
                        match decode_table(raw) {
                            Some(data) => {
                                state.clustering.insert(name.clone(), data);
                            }
                            None => warn_skipped("clustering", name),
                        }
                    }
                }
                "gap_analysis" => {
                    match serde_json::from_value::<BTreeMap<String, GapAnalysis>>(value.clone()) {
                        Ok(m) => state.gap_analysis = m,
                        Err(e) => tracing::warn!(error = %e, "snapshot gap_analysis unreadable; skipping"),
                    }
                }
                "trend_analysis" => {
                    match serde_json::from_value::<BTreeMap<String, TrendAnalysis>>(value.clone()) {
                        Ok(m) => state.trend_analysis = m,
                        Err(e) => tracing::warn!(error = %e, "snapshot trend_analysis unreadable; skipping"),
                    }
                }
                "conversation_history" => {
                    match serde_json::from_value::<Vec<HistoryEntry>>(value.clone()) {
                        Ok(h) => state.conversation_history = h,
                        Err(e) => tracing::warn!(error = %e, "snapshot history unreadable; skipping"),
                    }
                }
                _ => {
                    // Unknown keys round-trip untouched.
                    state.extras.insert(key.clone(), value.clone());
                }
            }
        }

        state
    }
}

fn encode_table(data: &TableData, threshold: usize) -> dq_domain::Result<Value> {
    let bounded = match data {
        TableData::Table(t) => TableData::bounded(t.clone(), threshold),
        TableData::TableMeta(m) => TableData::TableMeta(m.clone()),
    };
    Ok(serde_json::to_value(&bounded)?)
}

fn decode_table(raw: &Value) -> Option<TableData> {
    serde_json::from_value(raw.clone()).ok()
}

fn warn_skipped(section: &str, name: &str) {
    tracing::warn!(section, name, "unreadable snapshot table entry; skipping");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Cell, Dtype};
    use chrono::{TimeZone, Utc};

    fn table(rows: usize) -> TableArtifact {
        TableArtifact::new(
            vec!["id".into(), "text".into(), "at".into()],
            (0..rows)
                .map(|i| {
                    vec![
                        Cell::Int(i as i64),
                        Cell::Str(format!("row {i}")),
                        Cell::Datetime(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, i as u32 % 60).unwrap()),
                    ]
                })
                .collect(),
        )
    }

    fn populated() -> ContextState {
        let mut state = ContextState::new("u-42");
        state.insert_dataset("reviews", table(4));
        state.insert_search_results("pricing", table(2));
        state.insert_clustering(
            "reviews",
            table(4).with_column(
                "__cluster_id__",
                Dtype::Int,
                vec![Cell::Int(0), Cell::Int(0), Cell::Int(1), Cell::Int(-1)],
            ),
        );
        state.gap_analysis.insert(
            "reviews".into(),
            GapAnalysis {
                total_rows: 4,
                cluster_count: 2,
                avg_cluster_size: 1.5,
                underrepresented: vec![],
                outlier_rate: 0.25,
                top3_concentration: 1.0,
            },
        );
        state.conversation_history = vec![HistoryEntry {
            role: "user".into(),
            content: "what are my gaps?".into(),
        }];
        state
    }

    #[test]
    fn snapshot_round_trip_is_lossless_under_threshold() {
        let state = populated();
        let snapshot = state.encode(1000).unwrap();
        let restored = ContextState::restore("u-42", &snapshot);
        assert_eq!(restored, state);
        // And a second encode is byte-identical.
        assert_eq!(restored.encode(1000).unwrap(), snapshot);
    }

    #[test]
    fn large_tables_degrade_to_metadata() {
        let mut state = ContextState::new("u-1");
        state.insert_dataset("big", table(12));
        let snapshot = state.encode(10).unwrap();
        let entry = &snapshot["dataset_data"]["big"];
        assert_eq!(entry["kind"], "table_meta");
        assert_eq!(entry["row_count"], 12);
        assert_eq!(entry["sample"].as_array().unwrap().len(), 5);
        assert!(entry.get("rows").is_none());

        let restored = ContextState::restore("u-1", &snapshot);
        assert!(restored.dataset_table("big").is_none());
        assert_eq!(restored.dataset_data["big"].row_count(), 12);
    }

    #[test]
    fn threshold_boundary_is_inclusive() {
        let mut state = ContextState::new("u-1");
        state.insert_dataset("exact", table(10));
        let snapshot = state.encode(10).unwrap();
        assert_eq!(snapshot["dataset_data"]["exact"]["kind"], "table");

        state.insert_dataset("over", table(11));
        let snapshot = state.encode(10).unwrap();
        assert_eq!(snapshot["dataset_data"]["over"]["kind"], "table_meta");
    }

    #[test]
    fn unknown_snapshot_keys_are_preserved() {
        let snapshot = json!({
            "user_id": "u-9",
            "dataset_data": {},
            "legacy_flags": { "beta": true },
        });
        let state = ContextState::restore("u-9", &snapshot);
        assert_eq!(state.extras["legacy_flags"], json!({ "beta": true }));
        let re = state.encode(100).unwrap();
        assert_eq!(re["legacy_flags"], json!({ "beta": true }));
    }

    #[test]
    fn malformed_snapshot_yields_fresh_state() {
        let state = ContextState::restore("u-5", &json!("not an object"));
        assert_eq!(state.user_id, "u-5");
        assert!(state.dataset_data.is_empty());
        assert!(state.conversation_history.is_empty());
    }

    #[test]
    fn malformed_entry_is_skipped_not_fatal() {
        let snapshot = json!({
            "user_id": "u-5",
            "dataset_data": {
                "good": { "kind": "table", "columns": ["a"], "dtypes": ["int"], "rows": [[1]] },
                "bad": { "kind": "unknown" },
            },
        });
        let state = ContextState::restore("u-5", &snapshot);
        assert!(state.has_dataset("good"));
        assert!(!state.has_dataset("bad"));
    }

    #[test]
    fn attach_history_replaces() {
        let mut state = populated();
        let history = vec![
            HistoryEntry { role: "user".into(), content: "a".into() },
            HistoryEntry { role: "assistant".into(), content: "b".into() },
        ];
        state.attach_history(&history);
        assert_eq!(state.conversation_history, history);
    }

    #[test]
    fn semantic_search_nests_under_dataset_data() {
        let state = populated();
        let snapshot = state.encode(1000).unwrap();
        assert_eq!(
            snapshot["dataset_data"]["semantic_search"]["pricing"]["kind"],
            "table"
        );
    }
}
