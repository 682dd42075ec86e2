use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("'{0}' is not a valid date (expected YYYY-MM-DD)")]
    InvalidDate(String),
    #[error("'{0}' is not a valid date and time (expected YYYY-MM-DD HH:MM)")]
    InvalidTimestamp(String),
}

/// Inclusive calendar-date bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// `Ok(None)` when either bound is missing or the bounds are reversed;
    /// those are incomplete selections, not errors.
    pub fn from_inputs(start: Option<&str>, end: Option<&str>) -> Result<Option<Self>, SelectionError> {
        let (Some(start), Some(end)) = (non_empty(start), non_empty(end)) else {
            return Ok(None);
        };
        let start = parse_date(start)?;
        let end = parse_date(end)?;
        Ok(Self::new(start, end))
    }

    /// First instant of `start` and last second of `end`, as the x-axis span.
    pub fn span(&self) -> (NaiveDateTime, NaiveDateTime) {
        (
            self.start.and_time(NaiveTime::MIN),
            self.end.and_time(NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN)),
        )
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

pub fn parse_date(value: &str) -> Result<NaiveDate, SelectionError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| SelectionError::InvalidDate(value.to_string()))
}

/// Combines a picked date and a `HH:MM` time into a UTC timestamp.
/// Missing input is `Ok(None)`; malformed input is an error.
pub fn combine_timestamp(
    date: Option<&str>,
    time: Option<&str>,
) -> Result<Option<DateTime<Utc>>, SelectionError> {
    let (Some(date), Some(time)) = (non_empty(date), non_empty(time)) else {
        return Ok(None);
    };
    let joined = format!("{} {}", date.trim(), time.trim());
    NaiveDateTime::parse_from_str(&joined, "%Y-%m-%d %H:%M")
        .map(|naive| Some(naive.and_utc()))
        .map_err(|_| SelectionError::InvalidTimestamp(joined))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_requires_both_bounds_in_order() {
        assert_eq!(DateRange::from_inputs(None, Some("2024-01-07")), Ok(None));
        assert_eq!(DateRange::from_inputs(Some(""), Some("2024-01-07")), Ok(None));
        assert_eq!(
            DateRange::from_inputs(Some("2024-01-08"), Some("2024-01-07")),
            Ok(None)
        );

        let range = DateRange::from_inputs(Some("2024-01-01"), Some("2024-01-07"))
            .expect("valid")
            .expect("complete");
        assert_eq!(range.days(), 7);
        let (from, to) = range.span();
        assert_eq!(from.to_string(), "2024-01-01 00:00:00");
        assert_eq!(to.to_string(), "2024-01-07 23:59:59");
    }

    #[test]
    fn malformed_date_is_an_error() {
        assert_eq!(
            DateRange::from_inputs(Some("2024-13-01"), Some("2024-12-31")),
            Err(SelectionError::InvalidDate("2024-13-01".into()))
        );
    }

    #[test]
    fn invalid_time_differs_from_missing_time() {
        assert_eq!(combine_timestamp(Some("2024-01-01"), None), Ok(None));
        assert_eq!(combine_timestamp(None, Some("12:00")), Ok(None));
        assert!(matches!(
            combine_timestamp(Some("2024-01-01"), Some("25:00")),
            Err(SelectionError::InvalidTimestamp(_))
        ));

        let ts = combine_timestamp(Some("2024-01-01"), Some("12:30"))
            .expect("valid")
            .expect("complete");
        assert_eq!(ts.to_string(), "2024-01-01 12:30:00 UTC");
    }
}
