use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// DeliveryStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Scheduled,
    Delivered,
    Skipped,
    Error,
}

impl DeliveryStatus {
    pub fn all() -> &'static [DeliveryStatus] {
        &[
            DeliveryStatus::Scheduled,
            DeliveryStatus::Delivered,
            DeliveryStatus::Skipped,
            DeliveryStatus::Error,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Scheduled => "scheduled",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Skipped => "skipped",
            DeliveryStatus::Error => "error",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = crate::error::DripError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(DeliveryStatus::Scheduled),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "skipped" => Ok(DeliveryStatus::Skipped),
            "error" => Ok(DeliveryStatus::Error),
            _ => Err(crate::error::DripError::InvalidStatus(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// AuditAction / AuditReason
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Postpone,
    Retry,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuditAction::Postpone => "postpone",
            AuditAction::Retry => "retry",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditReason {
    NotProcessable,
    Error,
}

impl fmt::Display for AuditReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuditReason::NotProcessable => "not_processable",
            AuditReason::Error => "error",
        })
    }
}

// ---------------------------------------------------------------------------
// TimeUnit
// ---------------------------------------------------------------------------

/// Unit accepted by the `add` / `subtract` time filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl TimeUnit {
    /// Singular or plural unit name, case-insensitive.
    pub fn from_name(name: &str) -> Option<TimeUnit> {
        let lower = name.to_ascii_lowercase();
        let singular = lower.strip_suffix('s').unwrap_or(&lower);
        match singular {
            "second" => Some(TimeUnit::Second),
            "minute" => Some(TimeUnit::Minute),
            "hour" => Some(TimeUnit::Hour),
            "day" => Some(TimeUnit::Day),
            "week" => Some(TimeUnit::Week),
            "month" => Some(TimeUnit::Month),
            "year" => Some(TimeUnit::Year),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimeUnit::Second => "second",
            TimeUnit::Minute => "minute",
            TimeUnit::Hour => "hour",
            TimeUnit::Day => "day",
            TimeUnit::Week => "week",
            TimeUnit::Month => "month",
            TimeUnit::Year => "year",
        }
    }

    /// Months and years vary in length and need calendar arithmetic.
    pub fn is_calendar(self) -> bool {
        matches!(self, TimeUnit::Month | TimeUnit::Year)
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn status_roundtrips_through_str() {
        for status in DeliveryStatus::all() {
            assert_eq!(DeliveryStatus::from_str(status.as_str()).unwrap(), *status);
        }
        assert!(DeliveryStatus::from_str("sent").is_err());
    }

    #[test]
    fn time_unit_accepts_plural_and_case() {
        assert_eq!(TimeUnit::from_name("days"), Some(TimeUnit::Day));
        assert_eq!(TimeUnit::from_name("Month"), Some(TimeUnit::Month));
        assert_eq!(TimeUnit::from_name("YEARS"), Some(TimeUnit::Year));
        assert_eq!(TimeUnit::from_name("fortnight"), None);
        assert_eq!(TimeUnit::from_name(""), None);
    }
}
