//! Chart specifications built from query results.
//!
//! Figures are plain data: the page script draws them. Nothing is cached; every
//! build runs its query again.

use crate::models::{Table, Value};
use crate::queries::{ParamValue, QueryCatalog, QueryError};
use crate::selection::DateRange;
use crate::source::Sources;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum FigureError {
    #[error("no time series named '{0}'")]
    UnknownSeries(String),
    #[error("no profile plot for query '{0}'")]
    UnknownProfile(String),
    #[error("query '{query}' returned no column '{column}'")]
    MissingColumn { query: String, column: String },
    #[error(transparent)]
    Query(#[from] QueryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisKind {
    Time,
    Linear,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Axis {
    pub title: String,
    pub kind: AxisKind,
    pub range: Option<[String; 2]>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trace {
    pub name: String,
    pub x: Vec<Value>,
    pub y: Vec<Value>,
}

impl Trace {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Figure {
    pub title: String,
    pub x_axis: Axis,
    pub y_axis: Axis,
    pub traces: Vec<Trace>,
}

impl Figure {
    pub fn point_count(&self) -> usize {
        self.traces.first().map(Trace::len).unwrap_or(0)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// A time-series plot: `x_column` holds timestamps, each of `y_columns`
/// becomes one trace. The query takes `$1` start date and `$2` end date,
/// plus `$3` site when `by_site` is set.
#[derive(Debug, Clone, Copy)]
pub struct SeriesSpec {
    pub id: &'static str,
    pub title: &'static str,
    pub query: &'static str,
    pub x_column: &'static str,
    pub y_columns: &'static [&'static str],
    pub y_title: &'static str,
    pub by_site: bool,
}

/// A vertical profile: `level_column` is the y-axis (height, depth) and each
/// of `value_columns` is plotted against it.
#[derive(Debug, Clone, Copy)]
pub struct ProfileSpec {
    pub title: &'static str,
    pub query: &'static str,
    pub level_column: &'static str,
    pub level_title: &'static str,
    pub value_columns: &'static [&'static str],
    pub x_title: &'static str,
    pub by_site: bool,
}

/// Query catalog, data sources and the plots a deployment offers.
#[derive(Clone)]
pub struct Plotter {
    pub queries: QueryCatalog,
    pub sources: Sources,
    series: Vec<SeriesSpec>,
    profiles: Vec<ProfileSpec>,
}

impl Plotter {
    pub fn new(
        queries: QueryCatalog,
        sources: Sources,
        series: &[SeriesSpec],
        profiles: &[ProfileSpec],
    ) -> Self {
        Self {
            queries,
            sources,
            series: series.to_vec(),
            profiles: profiles.to_vec(),
        }
    }

    pub async fn fetch(&self, query: &str, params: Vec<ParamValue>) -> Result<Table, QueryError> {
        let bound = self.queries.bind(query, params).await?;
        self.sources.fetch(&bound).await
    }

    pub async fn build_time_series(
        &self,
        range: &DateRange,
        series_id: &str,
        site: Option<&str>,
    ) -> Result<Figure, FigureError> {
        let spec = self
            .series
            .iter()
            .find(|spec| spec.id == series_id)
            .ok_or_else(|| FigureError::UnknownSeries(series_id.to_string()))?;

        let mut params = vec![ParamValue::Date(range.start), ParamValue::Date(range.end)];
        if spec.by_site {
            params.push(ParamValue::Text(site.unwrap_or_default().to_string()));
        }
        let table = self.fetch(spec.query, params).await?;
        debug!(series = spec.id, rows = table.len(), "time series fetched");

        let (from, to) = range.span();
        let x_axis = Axis {
            title: "Time (UTC)".to_string(),
            kind: AxisKind::Time,
            range: Some([
                from.format("%Y-%m-%dT%H:%M:%S").to_string(),
                to.format("%Y-%m-%dT%H:%M:%S").to_string(),
            ]),
        };
        let y_axis = Axis {
            title: spec.y_title.to_string(),
            kind: AxisKind::Linear,
            range: None,
        };

        let x = column_values(&table, spec.query, spec.x_column, time_cell)?;
        let mut traces = Vec::with_capacity(spec.y_columns.len());
        for column in spec.y_columns {
            traces.push(Trace {
                name: column.to_string(),
                x: x.clone(),
                y: column_values(&table, spec.query, column, number_cell)?,
            });
        }

        Ok(Figure {
            title: spec.title.to_string(),
            x_axis,
            y_axis,
            traces,
        })
    }

    pub async fn build_profile(&self, query_name: &str, site: Option<&str>) -> Result<Figure, FigureError> {
        let spec = self
            .profiles
            .iter()
            .find(|spec| spec.query == query_name)
            .ok_or_else(|| FigureError::UnknownProfile(query_name.to_string()))?;

        let params = if spec.by_site {
            vec![ParamValue::Text(site.unwrap_or_default().to_string())]
        } else {
            Vec::new()
        };
        let table = self.fetch(spec.query, params).await?;
        debug!(query = spec.query, rows = table.len(), "profile fetched");

        let levels = column_values(&table, spec.query, spec.level_column, number_cell)?;
        let mut traces = Vec::with_capacity(spec.value_columns.len());
        for column in spec.value_columns {
            traces.push(Trace {
                name: column.to_string(),
                x: column_values(&table, spec.query, column, number_cell)?,
                y: levels.clone(),
            });
        }

        Ok(Figure {
            title: spec.title.to_string(),
            x_axis: Axis {
                title: spec.x_title.to_string(),
                kind: AxisKind::Linear,
                range: None,
            },
            y_axis: Axis {
                title: spec.level_title.to_string(),
                kind: AxisKind::Linear,
                range: None,
            },
            traces,
        })
    }
}

fn time_cell(value: &Value) -> Value {
    match value.as_timestamp() {
        Some(ts) => Value::Text(ts.format("%Y-%m-%dT%H:%M:%S").to_string()),
        None => value.clone(),
    }
}

fn number_cell(value: &Value) -> Value {
    value.as_f64().map(Value::Float).unwrap_or(Value::Null)
}

/// An empty result has no column metadata and plots as an empty trace.
fn column_values(
    table: &Table,
    query: &str,
    column: &str,
    map: fn(&Value) -> Value,
) -> Result<Vec<Value>, FigureError> {
    if table.is_empty() {
        return Ok(Vec::new());
    }
    let cells = table.column(column).ok_or_else(|| FigureError::MissingColumn {
        query: query.to_string(),
        column: column.to_string(),
    })?;
    Ok(cells.map(map).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::{ParamKind, QuerySpec};
    use crate::source::FixtureSource;
    use chrono::{Duration, NaiveDate};
    use std::sync::Arc;

    const HOURLY: QuerySpec = QuerySpec {
        name: "hourly_met",
        database: "borden",
        params: &[ParamKind::Date, ParamKind::Date],
    };
    const PROFILE: QuerySpec = QuerySpec {
        name: "tower_profile",
        database: "borden",
        params: &[],
    };
    const SERIES: SeriesSpec = SeriesSpec {
        id: "met",
        title: "Meteorology",
        query: "hourly_met",
        x_column: "ts",
        y_columns: &["temp", "rh"],
        y_title: "Value",
        by_site: false,
    };
    const TOWER: ProfileSpec = ProfileSpec {
        title: "Tower profile",
        query: "tower_profile",
        level_column: "height",
        level_title: "Height (m)",
        value_columns: &["temp"],
        x_title: "Temperature",
        by_site: false,
    };

    fn hourly_table(start: NaiveDate, hours: i64) -> Table {
        let origin = start.and_hms_opt(0, 0, 0).unwrap().and_utc();
        let rows = (0..hours)
            .map(|h| {
                vec![
                    Value::Timestamp(origin + Duration::hours(h)),
                    Value::Float(h as f64 / 10.0),
                    if h % 2 == 0 { Value::Integer(50) } else { Value::Null },
                ]
            })
            .collect();
        Table::new(vec!["ts".into(), "temp".into(), "rh".into()]).with_rows(rows)
    }

    fn plotter(source: Arc<FixtureSource>) -> (tempfile::TempDir, Plotter) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("hourly_met.sql"),
            "select ts, temp, rh from met where ts::date between $1 and $2 order by ts",
        )
        .unwrap();
        std::fs::write(dir.path().join("tower_profile.sql"), "select height, temp from tower").unwrap();
        let queries = QueryCatalog::new(dir.path(), &[HOURLY, PROFILE]);
        let sources = Sources::new().with("borden", source);
        (dir, Plotter::new(queries, sources, &[SERIES], &[TOWER]))
    }

    fn week() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 7).unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn one_point_per_row_over_the_requested_week() {
        let range = week();
        let source = Arc::new(FixtureSource::new().with_table("hourly_met", hourly_table(range.start, 168)));
        let (_dir, plotter) = plotter(source);

        let figure = plotter.build_time_series(&range, "met", None).await.expect("figure");
        assert_eq!(figure.point_count(), 168);
        assert_eq!(figure.traces.len(), 2);
        assert!(figure.traces.iter().all(|trace| trace.len() == 168));
        assert_eq!(
            figure.x_axis.range,
            Some(["2024-01-01T00:00:00".to_string(), "2024-01-07T23:59:59".to_string()])
        );
        assert_eq!(figure.traces[1].y[1], Value::Null);
    }

    #[tokio::test]
    async fn rebuilding_requeries_and_is_identical() {
        let range = week();
        let source = Arc::new(FixtureSource::new().with_table("hourly_met", hourly_table(range.start, 24)));
        let (_dir, plotter) = plotter(source.clone());

        let first = plotter.build_time_series(&range, "met", None).await.unwrap();
        let second = plotter.build_time_series(&range, "met", None).await.unwrap();
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        assert_eq!(source.calls("hourly_met"), 2);
    }

    #[tokio::test]
    async fn empty_result_is_an_empty_chart() {
        let source = Arc::new(FixtureSource::new().with_table("hourly_met", Table::default()));
        let (_dir, plotter) = plotter(source);

        let figure = plotter.build_time_series(&week(), "met", None).await.expect("empty chart");
        assert_eq!(figure.point_count(), 0);
        assert_eq!(figure.traces.len(), 2);
    }

    #[tokio::test]
    async fn query_failure_is_not_an_empty_chart() {
        let source = Arc::new(FixtureSource::new().with_failure("hourly_met", "server closed the connection"));
        let (_dir, plotter) = plotter(source);

        let err = plotter.build_time_series(&week(), "met", None).await.unwrap_err();
        assert!(matches!(err, FigureError::Query(QueryError::Backend { .. })));
    }

    #[tokio::test]
    async fn missing_value_column_is_reported() {
        let table = Table::new(vec!["ts".into(), "temp".into()])
            .with_rows(vec![vec![Value::Null, Value::Float(1.0)]]);
        let source = Arc::new(FixtureSource::new().with_table("hourly_met", table));
        let (_dir, plotter) = plotter(source);

        let err = plotter.build_time_series(&week(), "met", None).await.unwrap_err();
        assert!(matches!(err, FigureError::MissingColumn { column, .. } if column == "rh"));
    }

    #[tokio::test]
    async fn profile_plots_values_against_levels() {
        let table = Table::new(vec!["height".into(), "temp".into()]).with_rows(vec![
            vec![Value::Integer(2), Value::Float(-1.5)],
            vec![Value::Integer(10), Value::Float(-2.0)],
            vec![Value::Integer(40), Value::Float(-2.75)],
        ]);
        let source = Arc::new(FixtureSource::new().with_table("tower_profile", table));
        let (_dir, plotter) = plotter(source);

        let figure = plotter.build_profile("tower_profile", None).await.expect("profile");
        assert_eq!(figure.point_count(), 3);
        assert_eq!(figure.traces[0].y[2], Value::Float(40.0));
        assert_eq!(figure.y_axis.title, "Height (m)");
        assert!(matches!(
            plotter.build_profile("nope", None).await.unwrap_err(),
            FigureError::UnknownProfile(_)
        ));
    }
}
