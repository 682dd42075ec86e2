use crate::figures::Plotter;
use crate::models::{SelectOption, SelectOptions, Table};
use crate::queries::QueryError;
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;
use tracing::info;

/// A lookup query loaded once at startup. When `control` is set, the unique
/// values of `column` become that control's options.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceSpec {
    pub query: &'static str,
    pub control: Option<&'static str>,
    pub column: &'static str,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("loading reference table '{query}': {source}")]
    Query {
        query: String,
        #[source]
        source: QueryError,
    },
    #[error("reference table '{query}' has no column '{column}'")]
    MissingColumn { query: String, column: String },
}

/// Reference tables and the selection options derived from them. Read-only
/// after [`ReferenceData::load`].
#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    tables: BTreeMap<String, Table>,
    options: BTreeMap<String, SelectOptions>,
}

impl ReferenceData {
    /// Runs every bootstrap query once. Any failure aborts the whole load.
    pub async fn load(plotter: &Plotter, specs: &[ReferenceSpec]) -> Result<Self, BootstrapError> {
        let mut data = ReferenceData::default();
        for spec in specs {
            let table = plotter
                .fetch(spec.query, Vec::new())
                .await
                .map_err(|source| BootstrapError::Query {
                    query: spec.query.to_string(),
                    source,
                })?;
            info!(query = spec.query, rows = table.len(), "reference table loaded");

            if let Some(control) = spec.control {
                let options = options_from(&table, spec)?;
                data.options.insert(control.to_string(), options);
            }
            data.tables.insert(spec.query.to_string(), table);
        }
        Ok(data)
    }

    /// Options for a control; an unknown control has none.
    pub fn options(&self, control: &str) -> SelectOptions {
        self.options.get(control).cloned().unwrap_or_default()
    }

    pub fn table(&self, query: &str) -> Option<&Table> {
        self.tables.get(query)
    }
}

/// Unique non-null values in first-seen order; the first becomes the default.
fn options_from(table: &Table, spec: &ReferenceSpec) -> Result<SelectOptions, BootstrapError> {
    if table.is_empty() {
        return Ok(SelectOptions::default());
    }
    let cells = table.column(spec.column).ok_or_else(|| BootstrapError::MissingColumn {
        query: spec.query.to_string(),
        column: spec.column.to_string(),
    })?;

    let mut seen = HashSet::new();
    let mut options = Vec::new();
    for value in cells.filter_map(|cell| cell.display()) {
        if seen.insert(value.clone()) {
            options.push(SelectOption {
                label: value.clone(),
                value,
            });
        }
    }
    let default = options.first().map(|option| option.value.clone());
    Ok(SelectOptions { options, default })
}
