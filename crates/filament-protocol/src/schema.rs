//! The schema/validation contract consumed by the dispatcher.
//!
//! filament does not ship a validation library. Each resource declares an
//! optional request schema and a response schema through this boundary, and
//! the dispatcher calls [`Schema::validate`] on inbound payloads and
//! handler results. Applications plug in whatever validator they like.
//!
//! Validation is a *synchronous* contract. The dispatcher never awaits a
//! validation result; the trait signature makes an async validator
//! unrepresentable rather than a runtime error.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// Why a value failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaIssues {
    /// One entry per violation, human-readable.
    pub issues: Vec<String>,
}

impl SchemaIssues {
    pub fn new(issue: impl Into<String>) -> Self {
        Self {
            issues: vec![issue.into()],
        }
    }
}

impl fmt::Display for SchemaIssues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.issues.join("; "))
    }
}

/// Validates a JSON value, returning the (possibly coerced) value on
/// success.
///
/// Returning an owned `Value` lets a validator normalize its input —
/// defaulting missing fields, stripping unknown ones — and the dispatcher
/// always forwards the validated value, never the raw one.
pub trait Schema: Send + Sync {
    fn validate(&self, value: &Value) -> Result<Value, SchemaIssues>;
}

/// The schemas one resource declares.
///
/// `request` is only present for settable resources (and for `get`
/// refinement payloads); `response` is mandatory — every resource produces
/// values of some declared shape.
#[derive(Clone)]
pub struct ResourceSchemas {
    pub request: Option<Arc<dyn Schema>>,
    pub response: Arc<dyn Schema>,
}

impl ResourceSchemas {
    pub fn new(response: impl Schema + 'static) -> Self {
        Self {
            request: None,
            response: Arc::new(response),
        }
    }

    pub fn with_request(mut self, request: impl Schema + 'static) -> Self {
        self.request = Some(Arc::new(request));
        self
    }
}

/// Resource pattern → declared schemas, the map the dispatcher consults.
pub type SchemaMap = HashMap<String, ResourceSchemas>;

/// A schema that accepts anything unchanged. Useful for untyped resources
/// and as a stand-in wherever a test doesn't care about validation.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnySchema;

impl Schema for AnySchema {
    fn validate(&self, value: &Value) -> Result<Value, SchemaIssues> {
        Ok(value.clone())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    /// Rejects everything — lets tests exercise the failure paths.
    struct RejectAll;

    impl Schema for RejectAll {
        fn validate(&self, _value: &Value) -> Result<Value, SchemaIssues> {
            Err(SchemaIssues::new("rejected"))
        }
    }

    #[test]
    fn test_any_schema_passes_value_through() {
        let value = json!({ "a": 1 });
        assert_eq!(AnySchema.validate(&value).unwrap(), value);
    }

    #[test]
    fn test_schema_issues_display_joins_entries() {
        let issues = SchemaIssues {
            issues: vec!["a".into(), "b".into()],
        };
        assert_eq!(issues.to_string(), "a; b");
    }

    #[test]
    fn test_resource_schemas_with_request_sets_both() {
        let schemas = ResourceSchemas::new(AnySchema).with_request(RejectAll);
        assert!(schemas.request.is_some());
        assert!(schemas.response.validate(&json!(1)).is_ok());
        assert!(
            schemas
                .request
                .unwrap()
                .validate(&json!(1))
                .is_err()
        );
    }
}
