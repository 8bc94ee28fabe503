//! Boolean eligibility conditions.
//!
//! A condition is a sequence of leaf comparisons joined by `and` / `or`:
//!
//! ```text
//! entity.plan == 'pro' and entity.seats >= 5 or entity.vip
//! ```
//!
//! Leaves are combined strictly left to right with no operator precedence,
//! so the example reads as `((plan == 'pro') and (seats >= 5)) or vip`.

use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;

use crate::context::AttributeContext;
use crate::error::{EvaluationError, SyntaxError};
use crate::value::Value;

use super::path::AttributePath;

static TOKEN_RE: OnceLock<Regex> = OnceLock::new();
static NUMBER_RE: OnceLock<Regex> = OnceLock::new();
static STRING_RE: OnceLock<Regex> = OnceLock::new();
static OPERATOR_LIKE_RE: OnceLock<Regex> = OnceLock::new();

fn token_re() -> &'static Regex {
    TOKEN_RE.get_or_init(|| Regex::new(r#"(?:[^\s"']|"[^"]*"|'[^']*')+"#).unwrap())
}

fn number_re() -> &'static Regex {
    NUMBER_RE.get_or_init(|| Regex::new(r"^-?\d+(?:\.\d+)?$").unwrap())
}

fn string_re() -> &'static Regex {
    STRING_RE.get_or_init(|| Regex::new(r#"^(?:'([^']*)'|"([^"]*)")$"#).unwrap())
}

fn operator_like_re() -> &'static Regex {
    OPERATOR_LIKE_RE.get_or_init(|| Regex::new(r"^[=!<>~&|]+$").unwrap())
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Contains,
}

impl CompareOp {
    pub fn from_token(token: &str) -> Option<CompareOp> {
        match token {
            "==" => Some(CompareOp::Eq),
            "!=" | "<>" => Some(CompareOp::Ne),
            "<" => Some(CompareOp::Lt),
            ">" => Some(CompareOp::Gt),
            "<=" => Some(CompareOp::Le),
            ">=" => Some(CompareOp::Ge),
            "contains" => Some(CompareOp::Contains),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Gt => ">",
            CompareOp::Le => "<=",
            CompareOp::Ge => ">=",
            CompareOp::Contains => "contains",
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Contains => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    And,
    Or,
}

impl Combinator {
    pub fn from_token(token: &str) -> Option<Combinator> {
        match token {
            "and" => Some(Combinator::And),
            "or" => Some(Combinator::Or),
            _ => None,
        }
    }

    fn apply(self, left: bool, right: bool) -> bool {
        match self {
            Combinator::And => left && right,
            Combinator::Or => left || right,
        }
    }
}

// ---------------------------------------------------------------------------
// Operand / Leaf
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Value),
    Path(AttributePath),
}

impl Operand {
    fn parse(token: &str) -> Result<Operand, SyntaxError> {
        if let Some(caps) = string_re().captures(token) {
            let text = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            return Ok(Operand::Literal(Value::String(text.to_string())));
        }
        if number_re().is_match(token) {
            let n = token
                .parse::<f64>()
                .map_err(|_| SyntaxError::InvalidOperand(token.to_string()))?;
            return Ok(Operand::Literal(Value::Number(n)));
        }
        match token {
            "true" => return Ok(Operand::Literal(Value::Bool(true))),
            "false" => return Ok(Operand::Literal(Value::Bool(false))),
            "nil" | "null" => return Ok(Operand::Literal(Value::Null)),
            "and" | "or" | "contains" => {
                return Err(SyntaxError::InvalidOperand(token.to_string()))
            }
            _ => {}
        }
        AttributePath::parse(token)
            .map(Operand::Path)
            .ok_or_else(|| SyntaxError::InvalidOperand(token.to_string()))
    }

    fn resolve(&self, ctx: &dyn AttributeContext) -> Result<Value, EvaluationError> {
        match self {
            Operand::Literal(v) => Ok(v.clone()),
            Operand::Path(p) => p.resolve(ctx),
        }
    }

    fn describe(&self) -> String {
        match self {
            Operand::Literal(v) => format!("{v:?}"),
            Operand::Path(p) => p.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Leaf {
    /// A bare operand; must evaluate to a boolean.
    Operand(Operand),
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
}

impl Leaf {
    fn evaluate(&self, ctx: &dyn AttributeContext) -> Result<bool, EvaluationError> {
        match self {
            Leaf::Operand(operand) => match operand.resolve(ctx)? {
                Value::Bool(b) => Ok(b),
                Value::Any => Ok(true),
                other => Err(EvaluationError::NotBoolean {
                    operand: operand.describe(),
                    found: other.type_name(),
                }),
            },
            Leaf::Compare { left, op, right } => {
                let l = left.resolve(ctx)?;
                let r = right.resolve(ctx)?;
                compare(*op, &l, &r)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Comparison semantics
// ---------------------------------------------------------------------------

fn equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Time(t), other) | (other, Value::Time(t)) => other.as_time() == Some(*t),
        _ => left == right,
    }
}

fn ordering(op: CompareOp, left: &Value, right: &Value) -> Result<Ordering, EvaluationError> {
    let incomparable = || EvaluationError::Incomparable {
        op: op.as_str(),
        left: left.type_name(),
        right: right.type_name(),
    };
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.partial_cmp(b).ok_or_else(incomparable),
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        (Value::Time(_), _) | (_, Value::Time(_)) => match (left.as_time(), right.as_time()) {
            (Some(a), Some(b)) => Ok(a.cmp(&b)),
            _ => Err(incomparable()),
        },
        _ => Err(incomparable()),
    }
}

fn contains(left: &Value, right: &Value) -> Result<bool, EvaluationError> {
    match (left, right) {
        (Value::String(haystack), Value::String(needle)) => Ok(haystack.contains(needle.as_str())),
        (Value::List(items), needle) => Ok(items.iter().any(|item| equals(item, needle))),
        (Value::Map(map), Value::String(key)) => Ok(map.contains_key(key)),
        (Value::Null, _) => Ok(false),
        _ => Err(EvaluationError::Incomparable {
            op: CompareOp::Contains.as_str(),
            left: left.type_name(),
            right: right.type_name(),
        }),
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<bool, EvaluationError> {
    if matches!(left, Value::Any) || matches!(right, Value::Any) {
        return Ok(true);
    }
    match op {
        CompareOp::Eq => Ok(equals(left, right)),
        CompareOp::Ne => Ok(!equals(left, right)),
        CompareOp::Contains => contains(left, right),
        CompareOp::Lt | CompareOp::Gt | CompareOp::Le | CompareOp::Ge => {
            ordering(op, left, right).map(|o| op.accepts(o))
        }
    }
}

// ---------------------------------------------------------------------------
// Condition
// ---------------------------------------------------------------------------

/// A parsed condition. Immutable and reusable across contexts.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    first: Option<Leaf>,
    rest: Vec<(Combinator, Leaf)>,
}

impl Condition {
    /// The always-true condition produced by empty input.
    pub fn always() -> Self {
        Self {
            source: String::new(),
            first: None,
            rest: Vec::new(),
        }
    }

    pub fn parse(text: &str) -> Result<Condition, SyntaxError> {
        let tokens = tokenize(text)?;
        if tokens.is_empty() {
            return Ok(Condition::always());
        }

        let mut iter = tokens.into_iter().peekable();
        let first = parse_leaf(&mut iter)?;
        let mut rest = Vec::new();
        while let Some(token) = iter.next() {
            let combinator = Combinator::from_token(token)
                .ok_or_else(|| SyntaxError::UnknownCombinator(token.to_string()))?;
            if iter.peek().is_none() {
                return Err(SyntaxError::MissingOperand(token.to_string()));
            }
            rest.push((combinator, parse_leaf(&mut iter)?));
        }

        Ok(Condition {
            source: text.trim().to_string(),
            first: Some(first),
            rest,
        })
    }

    pub fn is_always(&self) -> bool {
        self.first.is_none()
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Evaluate every leaf, then fold the results left to right.
    pub fn evaluate(&self, ctx: &dyn AttributeContext) -> Result<bool, EvaluationError> {
        let Some(first) = &self.first else {
            return Ok(true);
        };
        let head = first.evaluate(ctx)?;
        let tail = self
            .rest
            .iter()
            .map(|(combinator, leaf)| leaf.evaluate(ctx).map(|r| (*combinator, r)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tail
            .into_iter()
            .fold(head, |acc, (combinator, r)| combinator.apply(acc, r)))
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Split into whitespace-separated tokens; quoted strings stay whole.
///
/// The token pattern covers every character except whitespace and quotes
/// that never close, so any non-blank gap is an unterminated string.
fn tokenize(text: &str) -> Result<Vec<&str>, SyntaxError> {
    let mut tokens = Vec::new();
    let mut covered = 0;
    for m in token_re().find_iter(text) {
        if !text[covered..m.start()].trim().is_empty() {
            return Err(SyntaxError::UnterminatedString(text[covered..].trim().to_string()));
        }
        tokens.push(m.as_str());
        covered = m.end();
    }
    if !text[covered..].trim().is_empty() {
        return Err(SyntaxError::UnterminatedString(text[covered..].trim().to_string()));
    }
    Ok(tokens)
}

fn parse_leaf<'a, I>(iter: &mut std::iter::Peekable<I>) -> Result<Leaf, SyntaxError>
where
    I: Iterator<Item = &'a str>,
{
    let Some(token) = iter.next() else {
        return Err(SyntaxError::MissingOperand(String::new()));
    };
    if operator_like_re().is_match(token) {
        return Err(SyntaxError::InvalidOperand(token.to_string()));
    }
    let left = Operand::parse(token)?;

    let next = match iter.peek() {
        Some(next) => *next,
        None => return Ok(Leaf::Operand(left)),
    };
    if let Some(op) = CompareOp::from_token(next) {
        iter.next();
        let right_token = iter
            .next()
            .ok_or_else(|| SyntaxError::MissingOperand(next.to_string()))?;
        let right = Operand::parse(right_token)?;
        return Ok(Leaf::Compare { left, op, right });
    }
    if operator_like_re().is_match(next) {
        return Err(SyntaxError::UnknownOperator(next.to_string()));
    }
    Ok(Leaf::Operand(left))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ProbeContext, RecordContext, Scope};
    use serde_json::json;

    fn eval(text: &str, attrs: serde_json::Value) -> Result<bool, EvaluationError> {
        let ctx = RecordContext::from_json(&attrs);
        Condition::parse(text).unwrap().evaluate(&ctx)
    }

    #[test]
    fn empty_input_is_always_true() {
        for text in ["", "   ", "\n\t"] {
            let cond = Condition::parse(text).unwrap();
            assert!(cond.is_always());
            assert!(cond.evaluate(&RecordContext::default()).unwrap());
        }
    }

    #[test]
    fn age_threshold_scenario() {
        assert!(eval("age >= 18", json!({ "age": 21 })).unwrap());
        assert!(!eval("age >= 18", json!({ "age": 10 })).unwrap());
        assert_eq!(
            eval("age >= 18", json!({})).unwrap_err(),
            EvaluationError::MissingAttribute("age".into())
        );
    }

    #[test]
    fn string_equality_and_boolean_literals() {
        let attrs = json!({ "plan": "pro", "active": true });
        assert!(eval("plan == 'pro' and active == true", attrs.clone()).unwrap());
        assert!(!eval(r#"plan == "free""#, attrs.clone()).unwrap());
        assert!(eval("plan != 'free'", attrs.clone()).unwrap());
        assert!(eval("plan <> 'free'", attrs).unwrap());
    }

    #[test]
    fn quoted_strings_may_contain_spaces_and_keywords() {
        let attrs = json!({ "title": "black and white" });
        assert!(eval("title == 'black and white'", attrs).unwrap());
    }

    #[test]
    fn combinators_fold_left_to_right() {
        // ((true or true) and false) == false; precedence parsing would say true.
        let attrs = json!({ "a": true, "b": true, "c": false });
        assert!(!eval("a or b and c", attrs.clone()).unwrap());
        // ((false and true) or true) == true
        assert!(eval("c and a or b", attrs).unwrap());
    }

    #[test]
    fn every_leaf_is_evaluated() {
        let err = eval("ok == false and missing == 1", json!({ "ok": true })).unwrap_err();
        assert_eq!(err, EvaluationError::MissingAttribute("missing".into()));
    }

    #[test]
    fn bare_operand_must_be_boolean() {
        assert!(eval("active", json!({ "active": true })).unwrap());
        let err = eval("name", json!({ "name": "ada" })).unwrap_err();
        assert!(matches!(err, EvaluationError::NotBoolean { found: "a string", .. }));
    }

    #[test]
    fn contains_on_strings_lists_and_maps() {
        let attrs = json!({
            "email": "ada@example.com",
            "tags": ["vip", "beta"],
            "flags": { "trial": true },
            "nothing": null,
        });
        assert!(eval("email contains '@example.com'", attrs.clone()).unwrap());
        assert!(eval("tags contains 'vip'", attrs.clone()).unwrap());
        assert!(!eval("tags contains 'churned'", attrs.clone()).unwrap());
        assert!(eval("flags contains 'trial'", attrs.clone()).unwrap());
        assert!(!eval("nothing contains 'x'", attrs.clone()).unwrap());
        assert!(eval("email contains 1", attrs).is_err());
    }

    #[test]
    fn ordering_across_types_is_an_error() {
        let err = eval("name > 3", json!({ "name": "ada" })).unwrap_err();
        assert_eq!(
            err,
            EvaluationError::Incomparable {
                op: ">",
                left: "a string",
                right: "a number"
            }
        );
        // Equality across types is simply false.
        assert!(!eval("name == 3", json!({ "name": "ada" })).unwrap());
    }

    #[test]
    fn timestamps_compare_with_date_strings() {
        let created = chrono::DateTime::parse_from_rfc3339("2024-05-01T00:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let entity = RecordContext::from_json(&json!({ "created_at": "2024-05-01T00:00:00Z" }));
        let scope = Scope::new()
            .with_context("entity", &entity)
            .with_value("now", created + chrono::Duration::days(10));

        let cond = Condition::parse("entity.created_at < now").unwrap();
        assert!(cond.evaluate(&scope).unwrap());
        let cond = Condition::parse("now >= '2024-05-11'").unwrap();
        assert!(cond.evaluate(&scope).unwrap());
    }

    #[test]
    fn nil_literal_matches_null_attributes() {
        assert!(eval("deleted_at == nil", json!({ "deleted_at": null })).unwrap());
        assert!(eval("deleted_at == null", json!({ "deleted_at": null })).unwrap());
    }

    #[test]
    fn probe_satisfies_any_comparison() {
        let probe = ProbeContext::truthy();
        for text in ["a.b >= 18", "x contains 'y'", "flag", "a == 1 or b.c < 'z'"] {
            assert!(Condition::parse(text).unwrap().evaluate(&probe).unwrap(), "{text}");
        }
    }

    #[test]
    fn syntax_errors() {
        let cases = [
            ("a == 1 xor b == 2", SyntaxError::UnknownCombinator("xor".into())),
            ("a == 1 && b == 2", SyntaxError::UnknownCombinator("&&".into())),
            ("a =~ 'x'", SyntaxError::UnknownOperator("=~".into())),
            ("a === 1", SyntaxError::UnknownOperator("===".into())),
            ("a == 1 and", SyntaxError::MissingOperand("and".into())),
            ("a ==", SyntaxError::MissingOperand("==".into())),
            ("== 1", SyntaxError::InvalidOperand("==".into())),
            ("a == foo(1)", SyntaxError::InvalidOperand("foo(1)".into())),
            ("a == 'open", SyntaxError::UnterminatedString("'open".into())),
            ("and == 1", SyntaxError::InvalidOperand("and".into())),
        ];
        for (text, expected) in cases {
            assert_eq!(Condition::parse(text).unwrap_err(), expected, "{text}");
        }
    }
}
