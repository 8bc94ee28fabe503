//! Condition and time expressions.
//!
//! Both are parsed once into immutable structures and evaluated against any
//! number of [`AttributeContext`](crate::context::AttributeContext)s. The
//! `test_*` probes answer "would this expression work in principle" without
//! real data, and collapse every failure to `false`.

pub mod condition;
pub mod path;
pub mod time;

use chrono::Utc;

use crate::context::ProbeContext;
use crate::error::SyntaxError;

pub use condition::Condition;
pub use path::AttributePath;
pub use time::{parse_timestamp, TimeExpression};

pub fn parse_condition(text: &str) -> Result<Condition, SyntaxError> {
    Condition::parse(text)
}

pub fn parse_time_expression(text: &str) -> Result<TimeExpression, SyntaxError> {
    TimeExpression::parse(text)
}

/// Probe a condition against a context where every attribute exists.
///
/// Does not distinguish malformed text from an expression the probe cannot
/// satisfy: both are `false`.
pub fn test_conditions(text: &str) -> bool {
    let probe = ProbeContext::truthy();
    Condition::parse(text)
        .ok()
        .map(|c| c.evaluate(&probe).is_ok())
        .unwrap_or(false)
}

/// Probe a time expression against a context where every attribute is "now".
pub fn test_start_at(text: &str) -> bool {
    let probe = ProbeContext::at(Utc::now());
    match TimeExpression::parse(text) {
        Ok(expr) => expr.evaluate(&probe).is_ok(),
        Err(_) => false,
    }
}
