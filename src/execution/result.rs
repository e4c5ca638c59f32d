//! Execution Result - result set returned by the warehouse executor

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// One row, keyed by column name
pub type Row = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Database type name, e.g. `INT8`, `TEXT`, `DATE`
    #[serde(rename = "type")]
    pub data_type: String,
}

/// Result set from one execution. `row_count` always equals `rows.len()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Row>,
    pub row_count: usize,
    pub execution_time_ms: u64,
    /// The row cap was hit while the cursor still had rows
    pub truncated: bool,
    pub error_message: Option<String>,
}

impl ExecutionResult {
    pub fn new(columns: Vec<ColumnInfo>, rows: Vec<Row>, execution_time_ms: u64, truncated: bool) -> Self {
        Self {
            columns,
            row_count: rows.len(),
            rows,
            execution_time_ms,
            truncated,
            error_message: None,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new(), 0, false)
    }

    pub fn column_names(&self) -> Vec<String> {
        if self.columns.is_empty() {
            return self
                .rows
                .first()
                .map(|r| r.keys().cloned().collect())
                .unwrap_or_default();
        }
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Export header plus rows as CSV. Nulls become empty fields.
    pub fn to_csv(&self) -> Result<String> {
        let headers = self.column_names();
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&headers)?;
        for row in &self.rows {
            let record: Vec<String> = headers
                .iter()
                .map(|h| match row.get(h) {
                    None | Some(serde_json::Value::Null) => String::new(),
                    Some(serde_json::Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                })
                .collect();
            writer.write_record(&record)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| crate::error::GuardError::Storage(format!("CSV flush failed: {}", e)))?;
        String::from_utf8(bytes)
            .map_err(|e| crate::error::GuardError::Storage(format!("CSV output not UTF-8: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> ExecutionResult {
        let mut row = Row::new();
        row.insert("department".to_string(), json!("Cardiology, East"));
        row.insert("revenue".to_string(), json!(1250.5));
        row.insert("visits".to_string(), serde_json::Value::Null);
        ExecutionResult::new(
            vec![
                ColumnInfo { name: "department".to_string(), data_type: "TEXT".to_string() },
                ColumnInfo { name: "revenue".to_string(), data_type: "FLOAT8".to_string() },
                ColumnInfo { name: "visits".to_string(), data_type: "INT8".to_string() },
            ],
            vec![row],
            12,
            false,
        )
    }

    #[test]
    fn test_row_count_matches_rows() {
        let result = sample();
        assert_eq!(result.row_count, result.rows.len());
    }

    #[test]
    fn test_to_csv() {
        let csv = sample().to_csv().unwrap();
        assert_eq!(csv, "department,revenue,visits\n\"Cardiology, East\",1250.5,\n");
    }

    #[test]
    fn test_column_type_serialized_as_type() {
        let json = serde_json::to_value(&sample().columns[0]).unwrap();
        assert_eq!(json, json!({ "name": "department", "type": "TEXT" }));
    }
}
