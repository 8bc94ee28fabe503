//! Attribute contexts: the lookup surface expressions are evaluated against.
//!
//! Expressions never see the underlying data model. They ask a context
//! whether a name exists and what it resolves to; a resolution may be a plain
//! [`Value`] or another context, which is how chained access such as
//! `entity.account.plan` is resolved lazily, one segment at a time.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::value::Value;

// ---------------------------------------------------------------------------
// AttributeContext
// ---------------------------------------------------------------------------

/// Result of resolving one name against a context.
pub enum Resolved<'a> {
    Value(Value),
    Nested(&'a dyn AttributeContext),
}

pub trait AttributeContext {
    /// Whether `name` is defined. Unknown names answer `false`, never panic.
    fn has(&self, name: &str) -> bool;

    /// Resolve `name`, or `None` when it is not defined.
    fn resolve(&self, name: &str) -> Option<Resolved<'_>>;

    /// The value of this context itself, when a path ends on it.
    fn to_value(&self) -> Option<Value> {
        None
    }
}

// ---------------------------------------------------------------------------
// RecordContext
// ---------------------------------------------------------------------------

/// Context backed by a recipient's JSON attribute document.
#[derive(Debug, Clone, Default)]
pub struct RecordContext {
    attributes: serde_json::Map<String, serde_json::Value>,
}

impl RecordContext {
    pub fn new(attributes: serde_json::Map<String, serde_json::Value>) -> Self {
        Self { attributes }
    }

    /// Build from any JSON value; non-objects yield an empty context.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Object(map) => Self::new(map.clone()),
            _ => Self::default(),
        }
    }
}

impl AttributeContext for RecordContext {
    fn has(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    fn resolve(&self, name: &str) -> Option<Resolved<'_>> {
        self.attributes
            .get(name)
            .map(|v| Resolved::Value(Value::from(v)))
    }

    fn to_value(&self) -> Option<Value> {
        Some(Value::from(serde_json::Value::Object(self.attributes.clone())))
    }
}

// ---------------------------------------------------------------------------
// ProbeContext
// ---------------------------------------------------------------------------

/// Synthetic context used to validate expressions without real data.
///
/// Every name exists, every segment resolves back to the probe itself, and a
/// path ending on the probe yields its stand-in value.
#[derive(Debug, Clone)]
pub struct ProbeContext {
    stand_in: Value,
}

impl ProbeContext {
    /// Answers every lookup with [`Value::Any`].
    pub fn truthy() -> Self {
        Self {
            stand_in: Value::Any,
        }
    }

    /// Answers every lookup with the given instant.
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            stand_in: Value::Time(now),
        }
    }
}

impl AttributeContext for ProbeContext {
    fn has(&self, _name: &str) -> bool {
        true
    }

    fn resolve(&self, _name: &str) -> Option<Resolved<'_>> {
        Some(Resolved::Nested(self))
    }

    fn to_value(&self) -> Option<Value> {
        Some(self.stand_in.clone())
    }
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

enum Binding<'a> {
    Value(Value),
    Context(&'a dyn AttributeContext),
}

/// Named top-level bindings, e.g. `entity` → the recipient, `now` → a time.
#[derive(Default)]
pub struct Scope<'a> {
    bindings: BTreeMap<String, Binding<'a>>,
}

impl<'a> Scope<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.bindings
            .insert(name.into(), Binding::Value(value.into()));
        self
    }

    pub fn with_context(mut self, name: impl Into<String>, ctx: &'a dyn AttributeContext) -> Self {
        self.bindings.insert(name.into(), Binding::Context(ctx));
        self
    }
}

impl AttributeContext for Scope<'_> {
    fn has(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    fn resolve(&self, name: &str) -> Option<Resolved<'_>> {
        match self.bindings.get(name)? {
            Binding::Value(v) => Some(Resolved::Value(v.clone())),
            Binding::Context(ctx) => Some(Resolved::Nested(*ctx)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_context_reports_absence() {
        let ctx = RecordContext::from_json(&json!({ "age": 21 }));
        assert!(ctx.has("age"));
        assert!(!ctx.has("name"));
        assert!(ctx.resolve("name").is_none());
        match ctx.resolve("age") {
            Some(Resolved::Value(Value::Number(n))) => assert_eq!(n, 21.0),
            _ => panic!("expected a number"),
        }
    }

    #[test]
    fn non_object_json_is_empty() {
        let ctx = RecordContext::from_json(&json!([1, 2, 3]));
        assert!(!ctx.has("0"));
    }

    #[test]
    fn probe_answers_everything() {
        let probe = ProbeContext::truthy();
        assert!(probe.has("anything"));
        assert!(matches!(probe.resolve("x"), Some(Resolved::Nested(_))));
        assert_eq!(probe.to_value(), Some(Value::Any));
    }

    #[test]
    fn scope_exposes_nested_contexts() {
        let entity = RecordContext::from_json(&json!({ "plan": "pro" }));
        let scope = Scope::new()
            .with_context("entity", &entity)
            .with_value("limit", 5i64);
        assert!(scope.has("entity"));
        assert!(!scope.has("plan"));
        match scope.resolve("entity") {
            Some(Resolved::Nested(inner)) => assert!(inner.has("plan")),
            _ => panic!("expected nested context"),
        }
        assert!(matches!(
            scope.resolve("limit"),
            Some(Resolved::Value(Value::Number(_)))
        ));
    }
}
