//! Tabular artifacts: the in-memory table model and its snapshot encoding.
//!
//! Tables encode as `{kind: "table", columns, dtypes, rows}` while they fit
//! the configured row budget, and degrade to `{kind: "table_meta", columns,
//! dtypes, row_count, sample}` above it. Date/time cells carry an explicit
//! type tag so decoding restores them losslessly.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};

/// Rows kept in a metadata-only descriptor's sample.
pub const SAMPLE_ROWS: usize = 5;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cells and dtypes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Column type of a table artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    Bool,
    Int,
    Float,
    Str,
    Datetime,
}

/// One table cell. Scalar values only; anything richer is coerced to its
/// string rendering at encode time.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Datetime(DateTime<Utc>),
}

impl Cell {
    pub fn dtype(&self) -> Option<Dtype> {
        match self {
            Cell::Null => None,
            Cell::Bool(_) => Some(Dtype::Bool),
            Cell::Int(_) => Some(Dtype::Int),
            Cell::Float(_) => Some(Dtype::Float),
            Cell::Str(_) => Some(Dtype::Str),
            Cell::Datetime(_) => Some(Dtype::Datetime),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(i) => Some(*i as f64),
            Cell::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Cell::Datetime(dt) => Some(*dt),
            _ => None,
        }
    }

    /// Render the cell for markdown summaries.
    pub fn display(&self) -> String {
        match self {
            Cell::Null => String::new(),
            Cell::Bool(b) => b.to_string(),
            Cell::Int(i) => i.to_string(),
            Cell::Float(f) => f.to_string(),
            Cell::Str(s) => s.clone(),
            Cell::Datetime(dt) => dt.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    /// Encode to snapshot JSON. Date/time values carry an explicit type
    /// tag; non-finite floats (not representable in JSON) are replaced by
    /// their string rendering with a `coerced` marker, logged, never thrown.
    pub fn to_json(&self) -> Value {
        match self {
            Cell::Null => Value::Null,
            Cell::Bool(b) => json!(b),
            Cell::Int(i) => json!(i),
            Cell::Float(f) => {
                if f.is_finite() {
                    json!(f)
                } else {
                    tracing::warn!(value = %f, "coercing non-finite float in snapshot");
                    json!({ "value": f.to_string(), "coerced": true })
                }
            }
            Cell::Str(s) => json!(s),
            Cell::Datetime(dt) => json!({
                "__type": "datetime",
                "value": dt.to_rfc3339_opts(SecondsFormat::Micros, true),
            }),
        }
    }

    /// Decode from snapshot JSON. Total: unrecognized shapes are coerced to
    /// string cells rather than rejected.
    pub fn from_json(v: &Value) -> Cell {
        match v {
            Value::Null => Cell::Null,
            Value::Bool(b) => Cell::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Cell::Int(i)
                } else {
                    Cell::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => Cell::Str(s.clone()),
            Value::Object(map) => {
                if map.get("__type").and_then(Value::as_str) == Some("datetime") {
                    if let Some(raw) = map.get("value").and_then(Value::as_str) {
                        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
                            return Cell::Datetime(dt.with_timezone(&Utc));
                        }
                    }
                }
                if map.get("coerced").and_then(Value::as_bool) == Some(true) {
                    if let Some(raw) = map.get("value").and_then(Value::as_str) {
                        return Cell::Str(raw.to_string());
                    }
                }
                Cell::Str(v.to_string())
            }
            Value::Array(_) => Cell::Str(v.to_string()),
        }
    }
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Cell {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = Value::deserialize(deserializer)?;
        Ok(Cell::from_json(&v))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Table artifact
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A full in-memory table: parallel `columns`/`dtypes`, row-major cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableArtifact {
    pub columns: Vec<String>,
    pub dtypes: Vec<Dtype>,
    pub rows: Vec<Vec<Cell>>,
}

impl TableArtifact {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        let dtypes = Self::infer_dtypes(columns.len(), &rows);
        Self {
            columns,
            dtypes,
            rows,
        }
    }

    pub fn empty(columns: Vec<String>, dtypes: Vec<Dtype>) -> Self {
        Self {
            columns,
            dtypes,
            rows: Vec::new(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// First non-null dtype per column; all-null columns default to `str`.
    pub fn infer_dtypes(width: usize, rows: &[Vec<Cell>]) -> Vec<Dtype> {
        (0..width)
            .map(|c| {
                rows.iter()
                    .filter_map(|r| r.get(c).and_then(Cell::dtype))
                    .next()
                    .unwrap_or(Dtype::Str)
            })
            .collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// All cells of one column, row order preserved.
    pub fn column(&self, name: &str) -> Option<Vec<&Cell>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }

    /// Columns whose dtype is numeric (int or float).
    pub fn numeric_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .zip(&self.dtypes)
            .filter(|(_, d)| matches!(d, Dtype::Int | Dtype::Float))
            .map(|(c, _)| c.as_str())
            .collect()
    }

    /// Columns whose dtype is datetime.
    pub fn datetime_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .zip(&self.dtypes)
            .filter(|(_, d)| matches!(d, Dtype::Datetime))
            .map(|(c, _)| c.as_str())
            .collect()
    }

    /// A copy of the table with one extra column appended.
    pub fn with_column(&self, name: &str, dtype: Dtype, cells: Vec<Cell>) -> TableArtifact {
        let mut columns = self.columns.clone();
        columns.push(name.to_string());
        let mut dtypes = self.dtypes.clone();
        dtypes.push(dtype);
        let rows = self
            .rows
            .iter()
            .zip(cells)
            .map(|(row, cell)| {
                let mut r = row.clone();
                r.push(cell);
                r
            })
            .collect();
        TableArtifact {
            columns,
            dtypes,
            rows,
        }
    }

    pub fn sample(&self, n: usize) -> Vec<Vec<Cell>> {
        self.rows.iter().take(n).cloned().collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Metadata-only descriptor and the stored union
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Descriptor kept when a table exceeds the row budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMeta {
    pub columns: Vec<String>,
    pub dtypes: Vec<Dtype>,
    pub row_count: usize,
    pub sample: Vec<Vec<Cell>>,
}

/// A stored tabular artifact: either the full table or its descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TableData {
    Table(TableArtifact),
    TableMeta(TableMeta),
}

impl TableData {
    /// Apply the row budget: tables above `threshold` rows degrade to a
    /// descriptor with a ≤5-row sample.
    pub fn bounded(table: TableArtifact, threshold: usize) -> TableData {
        if table.row_count() <= threshold {
            TableData::Table(table)
        } else {
            TableData::TableMeta(TableMeta {
                sample: table.sample(SAMPLE_ROWS),
                row_count: table.row_count(),
                columns: table.columns,
                dtypes: table.dtypes,
            })
        }
    }

    pub fn as_full(&self) -> Option<&TableArtifact> {
        match self {
            TableData::Table(t) => Some(t),
            TableData::TableMeta(_) => None,
        }
    }

    pub fn row_count(&self) -> usize {
        match self {
            TableData::Table(t) => t.row_count(),
            TableData::TableMeta(m) => m.row_count,
        }
    }

    pub fn columns(&self) -> &[String] {
        match self {
            TableData::Table(t) => &t.columns,
            TableData::TableMeta(m) => &m.columns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn small_table() -> TableArtifact {
        TableArtifact::new(
            vec!["id".into(), "score".into(), "seen_at".into()],
            vec![
                vec![
                    Cell::Int(1),
                    Cell::Float(0.5),
                    Cell::Datetime(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()),
                ],
                vec![
                    Cell::Int(2),
                    Cell::Float(0.9),
                    Cell::Datetime(Utc.with_ymd_and_hms(2025, 3, 2, 12, 0, 0).unwrap()),
                ],
            ],
        )
    }

    #[test]
    fn dtype_inference_skips_nulls() {
        let rows = vec![
            vec![Cell::Null, Cell::Str("a".into())],
            vec![Cell::Int(7), Cell::Str("b".into())],
        ];
        let dtypes = TableArtifact::infer_dtypes(2, &rows);
        assert_eq!(dtypes, vec![Dtype::Int, Dtype::Str]);
    }

    #[test]
    fn datetime_cells_round_trip_with_type_tag() {
        let dt = Utc.with_ymd_and_hms(2024, 11, 5, 8, 30, 0).unwrap();
        let encoded = Cell::Datetime(dt).to_json();
        assert_eq!(encoded["__type"], "datetime");
        let decoded = Cell::from_json(&encoded);
        assert_eq!(decoded, Cell::Datetime(dt));
    }

    #[test]
    fn non_finite_floats_are_coerced_not_thrown() {
        let encoded = Cell::Float(f64::NAN).to_json();
        assert_eq!(encoded["coerced"], true);
        let decoded = Cell::from_json(&encoded);
        assert_eq!(decoded, Cell::Str("NaN".into()));
    }

    #[test]
    fn table_at_threshold_stays_full() {
        let table = small_table();
        match TableData::bounded(table.clone(), 2) {
            TableData::Table(t) => assert_eq!(t, table),
            other => panic!("expected full table, got {other:?}"),
        }
    }

    #[test]
    fn table_over_threshold_degrades_to_meta() {
        let table = small_table();
        match TableData::bounded(table, 1) {
            TableData::TableMeta(m) => {
                assert_eq!(m.row_count, 2);
                assert_eq!(m.sample.len(), 2);
                assert_eq!(m.columns.len(), 3);
            }
            other => panic!("expected descriptor, got {other:?}"),
        }
    }

    #[test]
    fn with_column_appends() {
        let table = small_table();
        let extended = table.with_column(
            "__cluster_id__",
            Dtype::Int,
            vec![Cell::Int(0), Cell::Int(-1)],
        );
        assert_eq!(extended.columns.last().unwrap(), "__cluster_id__");
        assert_eq!(extended.rows[1].last().unwrap(), &Cell::Int(-1));
        // Source table is untouched.
        assert_eq!(table.columns.len(), 3);
    }

    #[test]
    fn numeric_and_datetime_column_detection() {
        let table = small_table();
        assert_eq!(table.numeric_columns(), vec!["id", "score"]);
        assert_eq!(table.datetime_columns(), vec!["seen_at"]);
    }
}
