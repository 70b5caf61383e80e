//! Conversation context store: per-session shared state for one turn, and
//! the size-bounded snapshot encoding that carries analytical artifacts
//! across turns.

mod analysis;
mod state;
mod table;

pub use analysis::{ClusterGap, GapAnalysis, MetricTrend, TrendAnalysis, TrendGrouping, TrendPoint};
pub use state::{ContextState, HistoryEntry};
pub use table::{Cell, Dtype, TableArtifact, TableData, TableMeta, SAMPLE_ROWS};
