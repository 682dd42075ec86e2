use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single typed cell as returned by a data source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Text(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(value) => Some(*value as f64),
            Value::Float(value) if value.is_finite() => Some(*value),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            Value::Date(date) => date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc()),
            _ => None,
        }
    }

    /// Text used for selection labels and values.
    pub fn display(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(value) => Some(value.to_string()),
            Value::Integer(value) => Some(value.to_string()),
            Value::Float(value) => Some(value.to_string()),
            Value::Timestamp(ts) => Some(ts.to_rfc3339()),
            Value::Date(date) => Some(date.to_string()),
            Value::Text(text) => Some(text.clone()),
        }
    }
}

/// Ordered rows with named columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn with_rows(mut self, rows: Vec<Vec<Value>>) -> Self {
        self.rows = rows;
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|cells| cells.get(idx))
    }

    /// All cells of one column in row order.
    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = &Value>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(move |cells| cells.get(idx).unwrap_or(&Value::Null)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectOption {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SelectOptions {
    pub options: Vec<SelectOption>,
    pub default: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    #[serde(default)]
    pub inputs: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub changed: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateResponse {
    pub outputs: BTreeMap<String, serde_json::Value>,
    pub errors: BTreeMap<String, String>,
    pub skipped: Vec<String>,
    /// Prompts of the skipped bindings, without duplicates.
    #[serde(default)]
    pub prompts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEntry {
    pub label: String,
    pub state: String,
    pub latest: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_lookup_by_column_name() {
        let table = Table::new(vec!["site".into(), "value".into()]).with_rows(vec![
            vec![Value::Text("north".into()), Value::Float(1.5)],
            vec![Value::Text("south".into()), Value::Integer(2)],
        ]);

        assert_eq!(table.get(1, "site"), Some(&Value::Text("south".into())));
        assert_eq!(table.get(0, "missing"), None);
        let values: Vec<f64> = table
            .column("value")
            .expect("column")
            .filter_map(Value::as_f64)
            .collect();
        assert_eq!(values, vec![1.5, 2.0]);
    }

    #[test]
    fn non_finite_floats_are_not_plotted() {
        assert_eq!(Value::Float(f64::NAN).as_f64(), None);
        assert_eq!(Value::Null.display(), None);
    }
}
