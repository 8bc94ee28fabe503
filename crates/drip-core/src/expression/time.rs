//! Time expressions: when a delivery should fire.
//!
//! Either an absolute timestamp (`2025-01-01 09:00`) or an attribute path
//! piped through date arithmetic filters:
//!
//! ```text
//! entity.created_at | add: 3, days | subtract: 2, hours
//! ```

use chrono::{DateTime, Duration, Months, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

use crate::context::AttributeContext;
use crate::error::{EvaluationError, SyntaxError};
use crate::types::TimeUnit;

use super::path::AttributePath;

static FILTER_RE: OnceLock<Regex> = OnceLock::new();

fn filter_re() -> &'static Regex {
    FILTER_RE.get_or_init(|| {
        Regex::new(
            r#"^([A-Za-z_]\w*)\s*(?::\s*(-?\d+)\s*,\s*(['"]?)([A-Za-z]+)(['"]?)|\(\s*(-?\d+)\s*,\s*(['"]?)([A-Za-z]+)(['"]?)\s*\))$"#,
        )
        .unwrap()
    })
}

// ---------------------------------------------------------------------------
// Timestamp parsing
// ---------------------------------------------------------------------------

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d %B %Y", "%B %d, %Y"];

/// Permissive absolute timestamp parser. Naive values are read as UTC and
/// bare dates as midnight UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(text) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(t) = DateTime::parse_from_rfc2822(text) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(t) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S %z") {
        return Some(t.with_timezone(&Utc));
    }
    for fmt in NAIVE_DATETIME_FORMATS {
        if let Ok(t) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(t.and_utc());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(text, fmt) {
            return d.and_hms_opt(0, 0, 0).map(|t| t.and_utc());
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Add,
    Subtract,
}

/// One `add` / `subtract` step in a time expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Filter {
    pub op: FilterOp,
    pub amount: i64,
    pub unit: TimeUnit,
}

impl Filter {
    fn parse(text: &str) -> Result<Filter, SyntaxError> {
        let text = text.trim();
        let caps = filter_re()
            .captures(text)
            .ok_or_else(|| match text.split([':', '(']).next() {
                Some(name)
                    if !name.trim().is_empty() && !matches!(name.trim(), "add" | "subtract") =>
                {
                    SyntaxError::UnknownFilter(name.trim().to_string())
                }
                _ => SyntaxError::MalformedFilter(text.to_string()),
            })?;

        let op = match &caps[1] {
            "add" => FilterOp::Add,
            "subtract" => FilterOp::Subtract,
            other => return Err(SyntaxError::UnknownFilter(other.to_string())),
        };

        // Groups 2-5 hold the `name: n, unit` form, 6-9 the `name(n, unit)` form.
        let (amount, open, unit, close) = match caps.get(2) {
            Some(_) => (&caps[2], &caps[3], &caps[4], &caps[5]),
            None => (&caps[6], &caps[7], &caps[8], &caps[9]),
        };
        if open != close {
            return Err(SyntaxError::MalformedFilter(text.to_string()));
        }
        let amount = amount
            .parse::<i64>()
            .map_err(|_| SyntaxError::MalformedFilter(text.to_string()))?;
        let unit =
            TimeUnit::from_name(unit).ok_or_else(|| SyntaxError::UnknownUnit(unit.to_string()))?;

        Ok(Filter { op, amount, unit })
    }

    /// Apply to `t`. Seconds through weeks are fixed durations; months and
    /// years are calendar arithmetic clamped to the end of the month.
    pub fn apply(&self, t: DateTime<Utc>) -> Result<DateTime<Utc>, EvaluationError> {
        let amount = match self.op {
            FilterOp::Add => self.amount,
            FilterOp::Subtract => -self.amount,
        };
        let out_of_range = || EvaluationError::OutOfRange(format!("{t} {self}"));

        if self.unit.is_calendar() {
            let months = match self.unit {
                TimeUnit::Year => amount.checked_mul(12).ok_or_else(out_of_range)?,
                _ => amount,
            };
            let magnitude = u32::try_from(months.unsigned_abs()).map_err(|_| out_of_range())?;
            let shifted = if months >= 0 {
                t.checked_add_months(Months::new(magnitude))
            } else {
                t.checked_sub_months(Months::new(magnitude))
            };
            return shifted.ok_or_else(out_of_range);
        }

        let delta = match self.unit {
            TimeUnit::Second => Duration::try_seconds(amount),
            TimeUnit::Minute => Duration::try_minutes(amount),
            TimeUnit::Hour => Duration::try_hours(amount),
            TimeUnit::Day => Duration::try_days(amount),
            TimeUnit::Week => Duration::try_weeks(amount),
            TimeUnit::Month | TimeUnit::Year => None,
        }
        .ok_or_else(out_of_range)?;
        t.checked_add_signed(delta).ok_or_else(out_of_range)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.op {
            FilterOp::Add => "add",
            FilterOp::Subtract => "subtract",
        };
        write!(f, "{name}: {}, {}s", self.amount, self.unit)
    }
}

// ---------------------------------------------------------------------------
// TimeExpression
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum TimeExpression {
    /// Empty input: no override, the caller picks a default.
    Unset,
    Literal(DateTime<Utc>),
    Attribute {
        path: AttributePath,
        filters: Vec<Filter>,
    },
}

impl TimeExpression {
    pub fn parse(text: &str) -> Result<TimeExpression, SyntaxError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(TimeExpression::Unset);
        }
        if let Some(t) = parse_timestamp(text) {
            return Ok(TimeExpression::Literal(t));
        }

        let mut parts = text.split('|');
        let head = parts.next().unwrap_or_default().trim();
        let path = AttributePath::parse(head)
            .ok_or_else(|| SyntaxError::InvalidTimeExpression(text.to_string()))?;
        let filters = parts.map(Filter::parse).collect::<Result<Vec<_>, _>>()?;

        Ok(TimeExpression::Attribute { path, filters })
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, TimeExpression::Unset)
    }

    /// `Ok(None)` means no override.
    pub fn evaluate(
        &self,
        ctx: &dyn AttributeContext,
    ) -> Result<Option<DateTime<Utc>>, EvaluationError> {
        match self {
            TimeExpression::Unset => Ok(None),
            TimeExpression::Literal(t) => Ok(Some(*t)),
            TimeExpression::Attribute { path, filters } => {
                let value = path.resolve(ctx)?;
                let start = value.as_time().ok_or_else(|| EvaluationError::NotATimestamp {
                    path: path.to_string(),
                    found: value.type_name(),
                })?;
                filters
                    .iter()
                    .try_fold(start, |t, filter| filter.apply(t))
                    .map(Some)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ProbeContext, RecordContext, Scope};
    use chrono::TimeZone;
    use serde_json::json;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn eval_at(text: &str, created_at: &str) -> Result<Option<DateTime<Utc>>, EvaluationError> {
        let entity = RecordContext::from_json(&json!({ "created_at": created_at }));
        let scope = Scope::new().with_context("entity", &entity);
        TimeExpression::parse(text).unwrap().evaluate(&scope)
    }

    #[test]
    fn permissive_timestamp_formats() {
        let expected = utc(2025, 1, 2, 9, 30);
        for text in [
            "2025-01-02T09:30:00Z",
            "2025-01-02T10:30:00+01:00",
            "2025-01-02 09:30:00",
            "2025-01-02 09:30",
            "2025/01/02 09:30",
            "Thu, 02 Jan 2025 09:30:00 +0000",
        ] {
            assert_eq!(parse_timestamp(text), Some(expected), "{text}");
        }
        assert_eq!(parse_timestamp("2025-01-02"), Some(utc(2025, 1, 2, 0, 0)));
        assert_eq!(parse_timestamp("02 January 2025"), Some(utc(2025, 1, 2, 0, 0)));
        assert_eq!(parse_timestamp("tomorrow"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn empty_input_is_unset() {
        let expr = TimeExpression::parse("  ").unwrap();
        assert!(expr.is_unset());
        assert_eq!(expr.evaluate(&RecordContext::default()).unwrap(), None);
    }

    #[test]
    fn literal_is_returned_as_is() {
        let expr = TimeExpression::parse("2025-06-01 12:00").unwrap();
        assert_eq!(
            expr.evaluate(&RecordContext::default()).unwrap(),
            Some(utc(2025, 6, 1, 12, 0))
        );
    }

    #[test]
    fn add_three_days_is_exact() {
        let got = eval_at("entity.created_at | add: 3, days", "2024-02-27T08:15:00Z").unwrap();
        assert_eq!(got, Some(utc(2024, 3, 1, 8, 15)));
    }

    #[test]
    fn month_arithmetic_clamps_to_month_end() {
        let got = eval_at("entity.created_at | add: 1, month", "2024-01-31T00:00:00Z").unwrap();
        assert_eq!(got, Some(utc(2024, 2, 29, 0, 0)));
        let got = eval_at("entity.created_at | add: 1, year", "2024-02-29T00:00:00Z").unwrap();
        assert_eq!(got, Some(utc(2025, 2, 28, 0, 0)));
        let got =
            eval_at("entity.created_at | subtract: 2, months", "2024-05-31T00:00:00Z").unwrap();
        assert_eq!(got, Some(utc(2024, 3, 31, 0, 0)));
    }

    #[test]
    fn filters_apply_left_to_right() {
        let got = eval_at(
            "entity.created_at | add: 1, week | subtract(90, minutes) | add: 30, seconds",
            "2024-01-01T12:00:00Z",
        )
        .unwrap();
        assert_eq!(got, Some(utc(2024, 1, 8, 10, 30) + Duration::seconds(30)));
    }

    #[test]
    fn quoted_units_and_function_form() {
        let a = TimeExpression::parse("entity.t | add: 2, 'hours'").unwrap();
        let b = TimeExpression::parse(r#"entity.t | add(2, "hours")"#).unwrap();
        let c = TimeExpression::parse("entity.t|add:2,hour").unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn syntax_errors() {
        let cases = [
            ("not a date!", SyntaxError::InvalidTimeExpression("not a date!".into())),
            ("entity.t | upcase", SyntaxError::UnknownFilter("upcase".into())),
            ("entity.t | shift: 1, days", SyntaxError::UnknownFilter("shift".into())),
            ("entity.t | add: 1, fortnights", SyntaxError::UnknownUnit("fortnights".into())),
            ("entity.t | add: x, days", SyntaxError::MalformedFilter("add: x, days".into())),
            ("entity.t | add: 1, 'days", SyntaxError::MalformedFilter("add: 1, 'days".into())),
            ("entity.t |", SyntaxError::MalformedFilter("".into())),
        ];
        for (text, expected) in cases {
            assert_eq!(TimeExpression::parse(text).unwrap_err(), expected, "{text}");
        }
    }

    #[test]
    fn missing_and_non_timestamp_attributes() {
        let entity = RecordContext::from_json(&json!({ "name": "ada" }));
        let scope = Scope::new().with_context("entity", &entity);

        let err = TimeExpression::parse("entity.created_at | add: 1, day")
            .unwrap()
            .evaluate(&scope)
            .unwrap_err();
        assert_eq!(err, EvaluationError::MissingAttribute("entity.created_at".into()));

        let err = TimeExpression::parse("entity.name")
            .unwrap()
            .evaluate(&scope)
            .unwrap_err();
        assert_eq!(
            err,
            EvaluationError::NotATimestamp {
                path: "entity.name".into(),
                found: "a string"
            }
        );
    }

    #[test]
    fn overflow_is_out_of_range() {
        let got = eval_at(
            "entity.created_at | add: 9999999999, years",
            "2024-01-01T00:00:00Z",
        );
        assert!(matches!(got, Err(EvaluationError::OutOfRange(_))));
    }

    #[test]
    fn probe_context_yields_now() {
        let now = utc(2024, 6, 1, 0, 0);
        let probe = ProbeContext::at(now);
        let got = TimeExpression::parse("anything.at.all | add: 1, day")
            .unwrap()
            .evaluate(&probe)
            .unwrap();
        assert_eq!(got, Some(now + Duration::days(1)));
    }
}
