use crate::config::{ConnectionProfile, PoolSettings};
use crate::models::{Table, Value};
use crate::queries::{BoundQuery, ParamValue, QueryError};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};
use tracing::{debug, info};

/// Something that can run a bound, read-only query.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn fetch(&self, query: &BoundQuery) -> Result<Table, QueryError>;

    async fn close(&self) {}
}

/// Pooled Postgres connection for one database.
pub struct PgSource {
    pool: PgPool,
}

impl PgSource {
    #[tracing::instrument(level = "debug", skip(profile, settings), fields(db = %profile))]
    pub async fn connect(profile: &ConnectionProfile, settings: PoolSettings) -> Result<Self, QueryError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .test_before_acquire(true)
            .connect_with(profile.connect_options())
            .await
            .map_err(|err| QueryError::backend(&profile.database, err))?;
        info!(database = %profile.database, "connected {}", profile.redacted_url());
        Ok(Self { pool })
    }
}

#[async_trait]
impl DataSource for PgSource {
    async fn fetch(&self, query: &BoundQuery) -> Result<Table, QueryError> {
        let mut statement = sqlx::query(&*query.sql);
        for param in &query.params {
            statement = match param {
                ParamValue::Date(date) => statement.bind(*date),
                ParamValue::Timestamp(ts) => statement.bind(*ts),
                ParamValue::Text(text) => statement.bind(text.clone()),
                ParamValue::Integer(value) => statement.bind(*value),
            };
        }

        let rows = statement
            .fetch_all(&self.pool)
            .await
            .map_err(|err| QueryError::backend(query.name(), err))?;
        debug!(query = query.name(), rows = rows.len(), "query finished");

        let columns = match rows.first() {
            Some(row) => row.columns().iter().map(|col| col.name().to_string()).collect(),
            None => Vec::new(),
        };
        let mut table = Table::new(columns);
        for row in &rows {
            table.rows.push(decode_row(query.name(), row)?);
        }
        Ok(table)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn decode_row(name: &str, row: &PgRow) -> Result<Vec<Value>, QueryError> {
    let mut cells = Vec::with_capacity(row.len());
    for col in row.columns() {
        let idx = col.ordinal();
        let raw = row
            .try_get_raw(idx)
            .map_err(|err| QueryError::backend(name, err))?;
        if raw.is_null() {
            cells.push(Value::Null);
            continue;
        }

        let type_name = raw.type_info().name().to_ascii_uppercase();
        let cell = match type_name.as_str() {
            "BOOL" => row.try_get::<bool, _>(idx).map(Value::Bool),
            "INT2" => row.try_get::<i16, _>(idx).map(|v| Value::Integer(v.into())),
            "INT4" => row.try_get::<i32, _>(idx).map(|v| Value::Integer(v.into())),
            "INT8" => row.try_get::<i64, _>(idx).map(Value::Integer),
            "FLOAT4" => row.try_get::<f32, _>(idx).map(|v| Value::Float(v.into())),
            "FLOAT8" => row.try_get::<f64, _>(idx).map(Value::Float),
            "TIMESTAMPTZ" => row.try_get::<DateTime<Utc>, _>(idx).map(Value::Timestamp),
            "TIMESTAMP" => row
                .try_get::<NaiveDateTime, _>(idx)
                .map(|naive| Value::Timestamp(naive.and_utc())),
            "DATE" => row.try_get::<NaiveDate, _>(idx).map(Value::Date),
            // NUMERIC needs a decimal crate; queries cast to float8 instead.
            _ => row.try_get::<String, _>(idx).map(Value::Text),
        }
        .map_err(|err| QueryError::backend(name, format!("column {}: {err}", col.name())))?;
        cells.push(cell);
    }
    Ok(cells)
}

/// Data sources keyed by database name.
#[derive(Clone, Default)]
pub struct Sources {
    by_database: BTreeMap<String, Arc<dyn DataSource>>,
}

impl Sources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, database: impl Into<String>, source: Arc<dyn DataSource>) -> Self {
        self.by_database.insert(database.into(), source);
        self
    }

    pub async fn fetch(&self, query: &BoundQuery) -> Result<Table, QueryError> {
        let source = self
            .by_database
            .get(query.database())
            .ok_or_else(|| QueryError::NoSource(query.database().to_string()))?;
        source.fetch(query).await
    }

    pub async fn close(&self) {
        for (database, source) in &self.by_database {
            source.close().await;
            info!(database = %database, "connection pool closed");
        }
    }
}

/// In-memory source answering by query name. Used by tests and for running
/// the pages without a database.
#[derive(Default)]
pub struct FixtureSource {
    tables: Mutex<HashMap<String, Result<Table, String>>>,
    calls: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
}

impl FixtureSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, query: &str, table: Table) -> Self {
        self.set_table(query, table);
        self
    }

    pub fn with_failure(self, query: &str, message: &str) -> Self {
        self.lock_tables()
            .insert(query.to_string(), Err(message.to_string()));
        self
    }

    /// Replaces the rows a query returns, e.g. to simulate new data arriving.
    pub fn set_table(&self, query: &str, table: Table) {
        self.lock_tables().insert(query.to_string(), Ok(table));
    }

    pub fn calls(&self, query: &str) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.get(query).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    fn lock_tables(&self) -> std::sync::MutexGuard<'_, HashMap<String, Result<Table, String>>> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DataSource for FixtureSource {
    async fn fetch(&self, query: &BoundQuery) -> Result<Table, QueryError> {
        self.total.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(query.name().to_string()).or_default() += 1;
        }
        match self.lock_tables().get(query.name()) {
            Some(Ok(table)) => Ok(table.clone()),
            Some(Err(message)) => Err(QueryError::backend(query.name(), message)),
            None => Err(QueryError::backend(query.name(), "no fixture registered")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::QuerySpec;

    fn bound(name: &'static str, database: &'static str) -> BoundQuery {
        BoundQuery {
            spec: QuerySpec {
                name,
                database,
                params: &[],
            },
            sql: Arc::from("select 1"),
            params: Vec::new(),
        }
    }

    #[tokio::test]
    async fn sources_route_by_database() {
        let dcp = Arc::new(
            FixtureSource::new().with_table("projects_df", Table::new(vec!["Project".into()])),
        );
        let sources = Sources::new().with("dcp", dcp.clone());

        let table = sources.fetch(&bound("projects_df", "dcp")).await.expect("fetch");
        assert_eq!(table.columns, vec!["Project".to_string()]);
        assert_eq!(dcp.calls("projects_df"), 1);

        let err = sources.fetch(&bound("datasets_df", "borden")).await.unwrap_err();
        assert!(matches!(err, QueryError::NoSource(db) if db == "borden"));
    }

    #[tokio::test]
    async fn fixture_failures_surface_as_backend_errors() {
        let source = FixtureSource::new().with_failure("series", "connection reset");
        let err = source.fetch(&bound("series", "borden")).await.unwrap_err();
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(source.total_calls(), 1);
    }
}
