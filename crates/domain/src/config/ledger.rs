use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM call ledger
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Ledger rows older than this many days may be purged.
    #[serde(default = "d_90")]
    pub retention_days: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self { retention_days: 90 }
    }
}

fn d_90() -> u32 {
    90
}
