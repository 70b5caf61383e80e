use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workflow runtime
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Row count above which tables are snapshot as metadata-only.
    #[serde(default = "d_1000")]
    pub large_table_threshold: usize,
    /// Number of prior messages supplied to the classifier and the
    /// complex pipeline.
    #[serde(default = "d_10")]
    pub history_window: usize,
    /// Per-turn wall clock budget in seconds.
    #[serde(default = "d_300")]
    pub workflow_timeout_s: u64,
    /// Per-agent-step wall clock budget in seconds.
    #[serde(default = "d_120")]
    pub step_timeout_s: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            large_table_threshold: 1000,
            history_window: 10,
            workflow_timeout_s: 300,
            step_timeout_s: 120,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_1000() -> usize {
    1000
}
fn d_10() -> usize {
    10
}
fn d_300() -> u64 {
    300
}
fn d_120() -> u64 {
    120
}
