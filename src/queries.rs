//! Named, parameterized SQL queries.
//!
//! Query text lives in `<dir>/<name>.sql` and is read on every resolve, so an
//! edited file takes effect without a restart. Each query declares the kinds
//! of its positional parameters; the text is checked against that list when
//! resolved and the supplied values are checked when bound.

use chrono::{DateTime, NaiveDate, Utc};
use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::Arc,
};
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Date,
    Timestamp,
    Text,
    Integer,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Text(String),
    Integer(i64),
}

impl ParamValue {
    pub fn kind(&self) -> ParamKind {
        match self {
            ParamValue::Date(_) => ParamKind::Date,
            ParamValue::Timestamp(_) => ParamKind::Timestamp,
            ParamValue::Text(_) => ParamKind::Text,
            ParamValue::Integer(_) => ParamKind::Integer,
        }
    }
}

/// Declaration of one named query: which database it runs against and the
/// kinds of `$1..$n`.
#[derive(Debug, Clone, Copy)]
pub struct QuerySpec {
    pub name: &'static str,
    pub database: &'static str,
    pub params: &'static [ParamKind],
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("no query named '{0}' is declared")]
    Unknown(String),
    #[error("query file {path} could not be read: {source}")]
    MissingFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("query '{name}' declares {declared} parameters but its text uses {used}")]
    PlaceholderMismatch {
        name: String,
        declared: usize,
        used: usize,
    },
    #[error("query '{name}' parameter ${position} expects {expected:?}, got {actual:?}")]
    ParamMismatch {
        name: String,
        position: usize,
        expected: ParamKind,
        actual: Option<ParamKind>,
    },
    #[error("no data source for database '{0}'")]
    NoSource(String),
    #[error("query '{name}' failed: {message}")]
    Backend { name: String, message: String },
}

impl QueryError {
    pub fn backend(name: &str, err: impl std::fmt::Display) -> Self {
        QueryError::Backend {
            name: name.to_string(),
            message: err.to_string(),
        }
    }
}

/// Query text plus the values for its placeholders, ready to execute.
#[derive(Debug, Clone)]
pub struct BoundQuery {
    pub spec: QuerySpec,
    pub sql: Arc<str>,
    pub params: Vec<ParamValue>,
}

impl BoundQuery {
    pub fn name(&self) -> &'static str {
        self.spec.name
    }

    pub fn database(&self) -> &'static str {
        self.spec.database
    }
}

#[derive(Debug, Clone)]
pub struct QueryCatalog {
    dir: PathBuf,
    specs: BTreeMap<&'static str, QuerySpec>,
}

impl QueryCatalog {
    pub fn new(dir: impl Into<PathBuf>, specs: &[QuerySpec]) -> Self {
        Self {
            dir: dir.into(),
            specs: specs.iter().map(|spec| (spec.name, *spec)).collect(),
        }
    }

    pub fn spec(&self, name: &str) -> Result<QuerySpec, QueryError> {
        self.specs
            .get(name)
            .copied()
            .ok_or_else(|| QueryError::Unknown(name.to_string()))
    }

    /// Reads and checks the text of a named query.
    pub async fn resolve(&self, name: &str) -> Result<(QuerySpec, Arc<str>), QueryError> {
        let spec = self.spec(name)?;
        let path = self.dir.join(format!("{}.sql", spec.name));
        let text = fs::read_to_string(&path)
            .await
            .map_err(|source| QueryError::MissingFile { path, source })?;
        let text = text.trim();

        let used = highest_placeholder(text);
        if used != spec.params.len() {
            return Err(QueryError::PlaceholderMismatch {
                name: spec.name.to_string(),
                declared: spec.params.len(),
                used,
            });
        }

        Ok((spec, Arc::from(text)))
    }

    pub async fn bind(&self, name: &str, params: Vec<ParamValue>) -> Result<BoundQuery, QueryError> {
        let (spec, sql) = self.resolve(name).await?;
        check_params(&spec, &params)?;
        Ok(BoundQuery { spec, sql, params })
    }
}

fn check_params(spec: &QuerySpec, params: &[ParamValue]) -> Result<(), QueryError> {
    let longest = spec.params.len().max(params.len());
    for position in 0..longest {
        let actual = params.get(position).map(ParamValue::kind);
        match spec.params.get(position) {
            Some(expected) if actual == Some(*expected) => {}
            Some(expected) => {
                return Err(QueryError::ParamMismatch {
                    name: spec.name.to_string(),
                    position: position + 1,
                    expected: *expected,
                    actual,
                });
            }
            None => {
                return Err(QueryError::PlaceholderMismatch {
                    name: spec.name.to_string(),
                    declared: spec.params.len(),
                    used: params.len(),
                });
            }
        }
    }
    Ok(())
}

/// Highest `$n` placeholder outside string literals and comments.
fn highest_placeholder(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut highest = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'\'' {
                    i += 1;
                }
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    i += 1;
                }
                i += 1;
            }
            b'$' => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if end > start {
                    if let Ok(n) = sql[start..end].parse::<usize>() {
                        highest = highest.max(n);
                    }
                }
                i = end.max(i + 1);
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    highest
}

#[cfg(test)]
mod tests {
    use super::*;

    const RANGE: QuerySpec = QuerySpec {
        name: "range",
        database: "borden",
        params: &[ParamKind::Date, ParamKind::Date],
    };
    const PLAIN: QuerySpec = QuerySpec {
        name: "plain",
        database: "dcp",
        params: &[],
    };

    fn catalog_with(files: &[(&str, &str)]) -> (tempfile::TempDir, QueryCatalog) {
        let dir = tempfile::tempdir().expect("tempdir");
        for (name, text) in files {
            std::fs::write(dir.path().join(format!("{name}.sql")), text).expect("write sql");
        }
        let catalog = QueryCatalog::new(dir.path(), &[RANGE, PLAIN]);
        (dir, catalog)
    }

    #[test]
    fn placeholders_ignore_literals_and_comments() {
        assert_eq!(highest_placeholder("select 1"), 0);
        assert_eq!(highest_placeholder("select * from t where a >= $1 and a < $2"), 2);
        assert_eq!(highest_placeholder("select '$9' -- $7\n from t where a = $1"), 1);
        assert_eq!(highest_placeholder("select $10, $2"), 10);
        assert_eq!(highest_placeholder("/* filter on $3 */ select * from t where a = $1"), 1);
        assert_eq!(highest_placeholder("select /* $4\n $5 */ $2, $1 /* $6"), 2);
    }

    #[tokio::test]
    async fn bind_checks_kinds_in_order() {
        let (_dir, catalog) = catalog_with(&[("range", "select * from t where d between $1 and $2")]);
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();

        let bound = catalog
            .bind("range", vec![ParamValue::Date(start), ParamValue::Date(start)])
            .await
            .expect("bind");
        assert_eq!(bound.database(), "borden");
        assert_eq!(bound.params.len(), 2);

        let err = catalog
            .bind("range", vec![ParamValue::Date(start), ParamValue::Text("x".into())])
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::ParamMismatch { position: 2, .. }));

        let err = catalog.bind("range", vec![ParamValue::Date(start)]).await.unwrap_err();
        assert!(matches!(err, QueryError::ParamMismatch { actual: None, .. }));
    }

    #[tokio::test]
    async fn text_must_match_declared_parameters() {
        let (_dir, catalog) = catalog_with(&[("plain", "select * from t where a = $1")]);
        let err = catalog.resolve("plain").await.unwrap_err();
        assert!(matches!(
            err,
            QueryError::PlaceholderMismatch { declared: 0, used: 1, .. }
        ));
    }

    #[tokio::test]
    async fn missing_file_and_unknown_name_are_distinct() {
        let (_dir, catalog) = catalog_with(&[]);
        assert!(matches!(
            catalog.resolve("plain").await.unwrap_err(),
            QueryError::MissingFile { .. }
        ));
        assert!(matches!(
            catalog.resolve("nope").await.unwrap_err(),
            QueryError::Unknown(_)
        ));
    }
}
