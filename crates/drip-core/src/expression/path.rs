use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

use crate::context::{AttributeContext, Resolved};
use crate::error::EvaluationError;
use crate::value::Value;

static PATH_RE: OnceLock<Regex> = OnceLock::new();
static SEGMENT_RE: OnceLock<Regex> = OnceLock::new();

fn path_re() -> &'static Regex {
    PATH_RE.get_or_init(|| {
        Regex::new(
            r#"^[A-Za-z_][A-Za-z0-9_-]*\??(?:\.[A-Za-z_][A-Za-z0-9_-]*\??|\[\d+\]|\['[^']*'\]|\["[^"]*"\])*$"#,
        )
        .unwrap()
    })
}

fn segment_re() -> &'static Regex {
    SEGMENT_RE.get_or_init(|| {
        Regex::new(r#"\.?([A-Za-z_][A-Za-z0-9_-]*\??)|\[(\d+)\]|\['([^']*)'\]|\["([^"]*)"\]"#).unwrap()
    })
}

/// A dotted / bracketed attribute reference such as `entity.tags[0]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributePath {
    source: String,
    segments: Vec<String>,
}

impl AttributePath {
    /// Returns `None` when `text` does not match the path signature.
    pub fn parse(text: &str) -> Option<AttributePath> {
        if !path_re().is_match(text) {
            return None;
        }
        let segments = segment_re()
            .captures_iter(text)
            .filter_map(|caps| {
                (1..=4)
                    .find_map(|i| caps.get(i))
                    .map(|m| m.as_str().to_string())
            })
            .collect();
        Some(AttributePath {
            source: text.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Walk the path through `ctx`, one segment at a time.
    pub fn resolve(&self, ctx: &dyn AttributeContext) -> Result<Value, EvaluationError> {
        enum Cursor<'a> {
            Context(&'a dyn AttributeContext),
            Value(Value),
        }

        let missing = || EvaluationError::MissingAttribute(self.source.clone());
        let mut cursor = Cursor::Context(ctx);
        for segment in &self.segments {
            cursor = match cursor {
                Cursor::Context(c) => {
                    if !c.has(segment) {
                        return Err(missing());
                    }
                    match c.resolve(segment).ok_or_else(missing)? {
                        Resolved::Value(v) => Cursor::Value(v),
                        Resolved::Nested(inner) => Cursor::Context(inner),
                    }
                }
                Cursor::Value(Value::Any) => Cursor::Value(Value::Any),
                Cursor::Value(v) => Cursor::Value(v.child(segment).cloned().ok_or_else(missing)?),
            };
        }
        match cursor {
            Cursor::Value(v) => Ok(v),
            Cursor::Context(c) => c
                .to_value()
                .ok_or_else(|| EvaluationError::NotAValue(self.source.clone())),
        }
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ProbeContext, RecordContext, Scope};
    use serde_json::json;

    #[test]
    fn parses_dotted_and_bracketed_segments() {
        let p = AttributePath::parse("entity.tags[0]").unwrap();
        assert_eq!(p.segments(), &["entity", "tags", "0"]);

        let p = AttributePath::parse(r#"entity["first name"].initial"#).unwrap();
        assert_eq!(p.segments(), &["entity", "first name", "initial"]);

        let p = AttributePath::parse("entity.active?").unwrap();
        assert_eq!(p.segments(), &["entity", "active?"]);
    }

    #[test]
    fn rejects_non_paths() {
        for text in ["", "1abc", "a..b", "a.", "a b", "a(1)", "a[x]", "'str'", "a|b"] {
            assert!(AttributePath::parse(text).is_none(), "{text:?} should not parse");
        }
    }

    #[test]
    fn resolves_through_nested_contexts_and_values() {
        let entity = RecordContext::from_json(&json!({
            "account": { "plan": "pro" },
            "tags": ["vip", "beta"],
        }));
        let scope = Scope::new().with_context("entity", &entity);

        let plan = AttributePath::parse("entity.account.plan").unwrap();
        assert_eq!(plan.resolve(&scope).unwrap(), Value::String("pro".into()));

        let tag = AttributePath::parse("entity.tags[1]").unwrap();
        assert_eq!(tag.resolve(&scope).unwrap(), Value::String("beta".into()));
    }

    #[test]
    fn missing_segments_are_reported_with_full_path() {
        let entity = RecordContext::from_json(&json!({ "account": {} }));
        let scope = Scope::new().with_context("entity", &entity);

        let err = AttributePath::parse("entity.account.plan")
            .unwrap()
            .resolve(&scope)
            .unwrap_err();
        assert_eq!(
            err,
            EvaluationError::MissingAttribute("entity.account.plan".into())
        );

        let err = AttributePath::parse("user.plan").unwrap().resolve(&scope).unwrap_err();
        assert_eq!(err, EvaluationError::MissingAttribute("user.plan".into()));
    }

    #[test]
    fn context_without_value_is_not_a_value() {
        let inner = Scope::new();
        let scope = Scope::new().with_context("entity", &inner);
        let err = AttributePath::parse("entity").unwrap().resolve(&scope).unwrap_err();
        assert_eq!(err, EvaluationError::NotAValue("entity".into()));
    }

    #[test]
    fn probe_resolves_any_depth_to_stand_in() {
        let probe = ProbeContext::truthy();
        let p = AttributePath::parse("a.b[3].c").unwrap();
        assert_eq!(p.resolve(&probe).unwrap(), Value::Any);
    }
}
