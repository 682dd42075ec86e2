use crate::figures::Plotter;
use crate::models::StatusEntry;
use chrono::{DateTime, Duration, Utc};
use tracing::warn;

/// A table whose most recent row is watched. `query` returns one row whose
/// first column is the newest timestamp.
#[derive(Debug, Clone, Copy)]
pub struct StatusSpec {
    pub label: &'static str,
    pub query: &'static str,
    pub window: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    Empty,
    Unavailable,
}

impl Freshness {
    pub fn as_str(self) -> &'static str {
        match self {
            Freshness::Fresh => "fresh",
            Freshness::Stale => "stale",
            Freshness::Empty => "empty",
            Freshness::Unavailable => "unavailable",
        }
    }
}

pub fn assess(latest: Option<DateTime<Utc>>, now: DateTime<Utc>, window: Duration) -> Freshness {
    match latest {
        None => Freshness::Empty,
        Some(ts) if now - ts <= window => Freshness::Fresh,
        Some(_) => Freshness::Stale,
    }
}

/// Checks each watched table. A failing query marks only its own entry.
pub async fn check(plotter: &Plotter, specs: &[StatusSpec], now: DateTime<Utc>) -> Vec<StatusEntry> {
    let mut entries = Vec::with_capacity(specs.len());
    for spec in specs {
        let (state, latest) = match plotter.fetch(spec.query, Vec::new()).await {
            Ok(table) => {
                let latest = table
                    .rows
                    .first()
                    .and_then(|row| row.first())
                    .and_then(|cell| cell.as_timestamp());
                (assess(latest, now, spec.window), latest)
            }
            Err(err) => {
                warn!(query = spec.query, "status check failed: {err}");
                (Freshness::Unavailable, None)
            }
        };
        entries.push(StatusEntry {
            label: spec.label.to_string(),
            state: state.as_str().to_string(),
            latest: latest.map(|ts| ts.format("%Y-%m-%d %H:%M UTC").to_string()),
        });
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Table, Value};
    use crate::queries::{QueryCatalog, QuerySpec};
    use crate::source::{FixtureSource, Sources};
    use chrono::TimeZone;
    use std::sync::Arc;

    const LATEST: QuerySpec = QuerySpec {
        name: "met_latest",
        database: "borden",
        params: &[],
    };
    const FLUX_LATEST: QuerySpec = QuerySpec {
        name: "flux_latest",
        database: "borden",
        params: &[],
    };

    fn plotter(source: FixtureSource) -> (tempfile::TempDir, Plotter) {
        let dir = tempfile::tempdir().unwrap();
        for spec in [LATEST, FLUX_LATEST] {
            std::fs::write(
                dir.path().join(format!("{}.sql", spec.name)),
                "select max(ts) as latest from obs",
            )
            .unwrap();
        }
        let queries = QueryCatalog::new(dir.path(), &[LATEST, FLUX_LATEST]);
        let sources = Sources::new().with("borden", Arc::new(source));
        (dir, Plotter::new(queries, sources, &[], &[]))
    }

    fn latest(ts: DateTime<Utc>) -> Table {
        Table::new(vec!["latest".into()]).with_rows(vec![vec![Value::Timestamp(ts)]])
    }

    fn specs() -> [StatusSpec; 2] {
        [
            StatusSpec {
                label: "Met station",
                query: "met_latest",
                window: Duration::hours(2),
            },
            StatusSpec {
                label: "Flux tower",
                query: "flux_latest",
                window: Duration::hours(2),
            },
        ]
    }

    #[tokio::test]
    async fn failing_query_marks_only_its_entry() {
        let now = Utc.with_ymd_and_hms(2024, 1, 7, 12, 0, 0).unwrap();
        let source = FixtureSource::new()
            .with_failure("met_latest", "connection reset")
            .with_table("flux_latest", latest(now - Duration::minutes(15)));
        let (_dir, plotter) = plotter(source);

        let entries = check(&plotter, &specs(), now).await;
        assert_eq!(entries[0].label, "Met station");
        assert_eq!(entries[0].state, "unavailable");
        assert_eq!(entries[0].latest, None);
        assert_eq!(entries[1].state, "fresh");
        assert_eq!(entries[1].latest.as_deref(), Some("2024-01-07 11:45 UTC"));
    }

    #[tokio::test]
    async fn old_and_missing_rows_are_stale_and_empty() {
        let now = Utc.with_ymd_and_hms(2024, 1, 7, 12, 0, 0).unwrap();
        let source = FixtureSource::new()
            .with_table("met_latest", latest(now - Duration::hours(5)))
            .with_table("flux_latest", Table::new(vec!["latest".into()]));
        let (_dir, plotter) = plotter(source);

        let entries = check(&plotter, &specs(), now).await;
        assert_eq!(entries[0].state, "stale");
        assert_eq!(entries[0].latest.as_deref(), Some("2024-01-07 07:00 UTC"));
        assert_eq!(entries[1].state, "empty");
        assert_eq!(entries[1].latest, None);
    }

    #[test]
    fn freshness_against_window() {
        let now = Utc.with_ymd_and_hms(2024, 1, 7, 12, 0, 0).unwrap();
        let window = Duration::hours(2);

        assert_eq!(assess(None, now, window), Freshness::Empty);
        assert_eq!(assess(Some(now - Duration::minutes(30)), now, window), Freshness::Fresh);
        assert_eq!(assess(Some(now - window), now, window), Freshness::Fresh);
        assert_eq!(assess(Some(now - Duration::hours(3)), now, window), Freshness::Stale);
        assert_eq!(assess(Some(now + Duration::minutes(5)), now, window), Freshness::Fresh);
    }
}
