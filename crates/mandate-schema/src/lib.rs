//! Mandate schema gate.
//!
//! Abilities and policies declare JSON Schemas for their input parameters
//! and for each phase's success/failure payloads. [`Schema`] wraps a
//! compiled validator: a payload that does not match comes back as a
//! structured violation list, which the runtime converts into a
//! result-schema fault. That fault marks a defective implementation and is
//! never confused with a phase that legitimately failed.
//!
//! Definitions also use [`Schema::property_names`] at construction time to
//! check parameter mappings against the declared parameters on both sides,
//! so a mapping naming an unknown parameter is rejected before the
//! definition ever runs.
#![deny(unsafe_code)]

use std::fmt;

use serde_json::Value;
use thiserror::Error;

/// Errors from compiling a schema document.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("invalid schema document: {message}")]
    Compile { message: String },
}

/// A single violation found while validating a value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaViolation {
    /// Location of the offending value, `$` for the root.
    pub path: String,
    pub detail: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.detail)
    }
}

/// Render a violation list as a single line, for error messages and logs.
pub fn describe_violations(violations: &[SchemaViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A compiled JSON Schema plus the document it was compiled from.
///
/// Not `Clone`; definitions share schemas behind `Arc`.
pub struct Schema {
    document: Value,
    validator: jsonschema::Validator,
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("document", &self.document)
            .finish()
    }
}

impl Schema {
    /// Compile a schema document.
    pub fn compile(document: Value) -> Result<Self, SchemaError> {
        let validator = jsonschema::options()
            .should_validate_formats(true)
            .build(&document)
            .map_err(|e| SchemaError::Compile {
                message: e.to_string(),
            })?;

        Ok(Self {
            document,
            validator,
        })
    }

    /// The raw schema document.
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Validate a value, collecting every violation.
    pub fn validate(&self, value: &Value) -> Result<(), Vec<SchemaViolation>> {
        let violations: Vec<SchemaViolation> = self
            .validator
            .iter_errors(value)
            .map(|error| {
                let path = error.instance_path.to_string();
                SchemaViolation {
                    path: if path.is_empty() {
                        "$".to_string()
                    } else {
                        format!("${path}")
                    },
                    detail: error.to_string(),
                }
            })
            .collect();

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    pub fn is_valid(&self, value: &Value) -> bool {
        self.validator.is_valid(value)
    }

    /// Top-level property names of an object schema; empty when the schema
    /// declares no `properties`.
    pub fn property_names(&self) -> Vec<&str> {
        self.document
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| props.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.document
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| props.contains_key(name))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spend_schema() -> Schema {
        Schema::compile(json!({
            "type": "object",
            "properties": {
                "amount": { "type": "number" },
                "recipient": { "type": "string" }
            },
            "required": ["amount"]
        }))
        .unwrap()
    }

    #[test]
    fn compile_rejects_malformed_document() {
        let err = Schema::compile(json!({ "type": 12 })).unwrap_err();
        assert!(matches!(err, SchemaError::Compile { .. }));
    }

    #[test]
    fn validate_accepts_matching_value() {
        let schema = spend_schema();
        assert!(schema.validate(&json!({ "amount": 5 })).is_ok());
        assert!(schema.is_valid(&json!({ "amount": 5, "recipient": "0xabc" })));
    }

    #[test]
    fn validate_reports_missing_required_field_at_root() {
        let schema = spend_schema();
        let violations = schema.validate(&json!({ "recipient": "0xabc" })).unwrap_err();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "$");
    }

    #[test]
    fn validate_reports_nested_path() {
        let schema = Schema::compile(json!({
            "type": "object",
            "properties": {
                "limits": {
                    "type": "object",
                    "properties": { "daily": { "type": "integer" } }
                }
            }
        }))
        .unwrap();

        let violations = schema
            .validate(&json!({ "limits": { "daily": "not a number" } }))
            .unwrap_err();
        assert_eq!(violations[0].path, "$/limits/daily");
    }

    #[test]
    fn validate_collects_every_violation() {
        let schema = Schema::compile(json!({
            "type": "object",
            "properties": {
                "a": { "type": "integer" },
                "b": { "type": "integer" }
            }
        }))
        .unwrap();

        let violations = schema
            .validate(&json!({ "a": "x", "b": "y" }))
            .unwrap_err();
        assert_eq!(violations.len(), 2);
    }

    #[test]
    fn null_fails_an_object_schema() {
        // A phase that declares a result schema but produces no payload is
        // validated as JSON null, which an object schema rejects.
        let schema = spend_schema();
        assert!(schema.validate(&Value::Null).is_err());
    }

    #[test]
    fn property_names_reflect_declared_parameters() {
        let schema = spend_schema();
        let mut names = schema.property_names();
        names.sort_unstable();
        assert_eq!(names, vec!["amount", "recipient"]);
        assert!(schema.has_property("amount"));
        assert!(!schema.has_property("limit"));
    }

    #[test]
    fn property_names_empty_without_properties() {
        let schema = Schema::compile(json!({ "type": "string" })).unwrap();
        assert!(schema.property_names().is_empty());
    }

    #[test]
    fn describe_violations_joins_entries() {
        let schema = spend_schema();
        let violations = schema.validate(&json!({})).unwrap_err();
        let described = describe_violations(&violations);
        assert!(described.starts_with("$: "));
    }
}
