//! Analytical summaries stored in the context: cluster gap reports and
//! temporal trend fits.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Gap analysis
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One underrepresented cluster (size below half the average).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterGap {
    pub cluster_id: i64,
    pub size: usize,
    /// Fraction of all clustered rows in this cluster.
    pub share: f64,
}

/// Summary of cluster coverage for one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapAnalysis {
    pub total_rows: usize,
    /// Clusters excluding the noise label.
    pub cluster_count: usize,
    pub avg_cluster_size: f64,
    pub underrepresented: Vec<ClusterGap>,
    /// Fraction of rows labeled noise (`-1`).
    pub outlier_rate: f64,
    /// Combined share of the three largest clusters.
    pub top3_concentration: f64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trend analysis
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Time-bucket granularity, chosen from the data span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendGrouping {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl TrendGrouping {
    pub fn as_str(self) -> &'static str {
        match self {
            TrendGrouping::Day => "day",
            TrendGrouping::Week => "week",
            TrendGrouping::Month => "month",
            TrendGrouping::Quarter => "quarter",
            TrendGrouping::Year => "year",
        }
    }
}

/// One bucketed observation of a metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    /// Bucket label, e.g. `2025-03` for month grouping.
    pub bucket: String,
    pub value: f64,
}

/// Least-squares fit of one numeric column over time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricTrend {
    pub column: String,
    /// Slope per bucket of the fitted line.
    pub slope: f64,
    /// "increasing" | "decreasing" | "stable".
    pub direction: String,
    pub points: Vec<TrendPoint>,
}

/// Temporal trend summary for one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub time_column: String,
    pub grouping: TrendGrouping,
    pub span_days: i64,
    pub metrics: Vec<MetricTrend>,
}
