//! Declarative JSON payload schemas.
//!
//! Every command, event and entity state is described by a [`PayloadSchema`].
//! Command payloads are checked against their schema before a handler runs;
//! the other schemas are exposed for discovery.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// JSON value kinds a field may be constrained to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Null,
    Boolean,
    /// A number without a fractional part.
    Integer,
    Number,
    String,
    Array,
    Object,
    /// Accepts any value.
    Any,
}

impl FieldType {
    fn matches(self, value: &Value) -> bool {
        match self {
            FieldType::Null => value.is_null(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Number => value.is_number(),
            FieldType::String => value.is_string(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
            FieldType::Any => true,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Null => "null",
            FieldType::Boolean => "boolean",
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::String => "string",
            FieldType::Array => "array",
            FieldType::Object => "object",
            FieldType::Any => "any",
        };
        f.write_str(name)
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One declared field of an object schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldContract {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Box<PayloadSchema>>,
}

/// Shape of a JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayloadSchema {
    root: FieldType,
    fields: Vec<FieldContract>,
    allow_extra_fields: bool,
}

impl Default for PayloadSchema {
    fn default() -> Self {
        Self::object()
    }
}

impl PayloadSchema {
    /// An object schema with no declared fields that rejects unknown ones.
    pub fn object() -> Self {
        Self {
            root: FieldType::Object,
            fields: Vec::new(),
            allow_extra_fields: false,
        }
    }

    /// A schema accepting any payload.
    pub fn any() -> Self {
        Self {
            root: FieldType::Any,
            fields: Vec::new(),
            allow_extra_fields: true,
        }
    }

    pub fn require(self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.field(name, field_type, true, None)
    }

    pub fn optional(self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.field(name, field_type, false, None)
    }

    /// Declares a nested object field validated against its own schema.
    pub fn nested(self, name: impl Into<String>, schema: PayloadSchema, required: bool) -> Self {
        self.field(name, FieldType::Object, required, Some(Box::new(schema)))
    }

    pub fn allow_extra_fields(mut self, allow: bool) -> Self {
        self.allow_extra_fields = allow;
        self
    }

    fn field(
        mut self,
        name: impl Into<String>,
        field_type: FieldType,
        required: bool,
        fields: Option<Box<PayloadSchema>>,
    ) -> Self {
        self.fields.push(FieldContract {
            name: name.into(),
            field_type,
            required,
            fields,
        });
        self
    }

    pub fn fields(&self) -> &[FieldContract] {
        &self.fields
    }

    /// Validates `payload`, reporting every violation rather than the first.
    pub fn validate(&self, payload: &Value) -> Result<(), ValidationError> {
        let mut violations = Vec::new();
        self.collect_violations("", payload, &mut violations);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { violations })
        }
    }

    fn collect_violations(&self, prefix: &str, payload: &Value, out: &mut Vec<FieldViolation>) {
        if !self.root.matches(payload) {
            out.push(FieldViolation::new(
                prefix,
                format!("expected {}, got {}", self.root, kind_of(payload)),
            ));
            return;
        }
        let Some(object) = payload.as_object() else {
            return;
        };

        let mut declared = HashSet::with_capacity(self.fields.len());
        for contract in &self.fields {
            declared.insert(contract.name.as_str());
            let path = join_path(prefix, &contract.name);
            match object.get(&contract.name) {
                None if contract.required => {
                    out.push(FieldViolation::new(&path, "required field is missing"));
                }
                None => {}
                Some(Value::Null) if !contract.required && contract.field_type != FieldType::Null => {}
                Some(value) if !contract.field_type.matches(value) => {
                    out.push(FieldViolation::new(
                        &path,
                        format!("expected {}, got {}", contract.field_type, kind_of(value)),
                    ));
                }
                Some(value) => {
                    if let Some(nested) = &contract.fields {
                        nested.collect_violations(&path, value, out);
                    }
                }
            }
        }

        if !self.allow_extra_fields {
            let mut extra: Vec<&String> = object
                .keys()
                .filter(|key| !declared.contains(key.as_str()))
                .collect();
            extra.sort();
            for key in extra {
                out.push(FieldViolation::new(
                    &join_path(prefix, key),
                    "unknown field",
                ));
            }
        }
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

/// A single field-level problem. An empty path refers to the payload root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub path: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// A payload was rejected before reaching its handler.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("Invalid payload: {}", render(.violations))]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

fn render(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    /// Wraps a typed decoding failure that slipped past the schema.
    pub fn from_decode(error: &serde_json::Error) -> Self {
        Self {
            violations: vec![FieldViolation::new("", error.to_string())],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn amount_schema() -> PayloadSchema {
        PayloadSchema::object().require("amount", FieldType::Integer)
    }

    #[test]
    fn accepts_matching_payload() {
        assert!(amount_schema().validate(&json!({ "amount": 5 })).is_ok());
    }

    #[test]
    fn wrong_type_is_reported_with_its_path() {
        let err = amount_schema().validate(&json!({ "amount": "x" })).unwrap_err();
        assert_eq!(
            err.violations,
            vec![FieldViolation::new("amount", "expected integer, got string")]
        );
    }

    #[test]
    fn every_violation_is_collected() {
        let schema = PayloadSchema::object()
            .require("owner", FieldType::String)
            .require("amount", FieldType::Integer)
            .optional("memo", FieldType::String);

        let err = schema
            .validate(&json!({ "amount": 1.5, "memo": 3, "colour": "red" }))
            .unwrap_err();

        let paths: Vec<&str> = err.violations.iter().map(|v| v.path.as_str()).collect();
        assert_eq!(paths, vec!["owner", "amount", "memo", "colour"]);
    }

    #[test]
    fn optional_fields_accept_absence_and_null() {
        let schema = PayloadSchema::object().optional("memo", FieldType::String);
        assert!(schema.validate(&json!({})).is_ok());
        assert!(schema.validate(&json!({ "memo": null })).is_ok());
    }

    #[test]
    fn extra_fields_allowed_when_opted_in() {
        let schema = amount_schema().allow_extra_fields(true);
        assert!(schema.validate(&json!({ "amount": 1, "note": "hi" })).is_ok());
    }

    #[test]
    fn root_type_mismatch_is_a_single_root_violation() {
        let err = amount_schema().validate(&json!([1, 2])).unwrap_err();
        assert_eq!(err.violations.len(), 1);
        assert_eq!(err.violations[0].path, "");
        assert_eq!(err.to_string(), "Invalid payload: expected object, got array");
    }

    #[test]
    fn nested_paths_are_dotted() {
        let schema = PayloadSchema::object().nested(
            "address",
            PayloadSchema::object().require("city", FieldType::String),
            true,
        );
        let err = schema
            .validate(&json!({ "address": { "city": 7 } }))
            .unwrap_err();
        assert_eq!(err.violations[0].path, "address.city");
    }

    #[test]
    fn any_schema_accepts_everything() {
        assert!(PayloadSchema::any().validate(&json!("free text")).is_ok());
        assert!(PayloadSchema::any().validate(&Value::Null).is_ok());
    }

    #[test]
    fn schema_serializes_for_discovery() {
        let value = serde_json::to_value(amount_schema()).unwrap();
        assert_eq!(value["fields"][0]["type"], "integer");
        assert_eq!(value["root"], "object");
    }
}
