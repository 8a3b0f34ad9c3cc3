//! Canonical JSON Schema for plan documents.
//!
//! This schema is the structural contract (Layer 1 of validation) and is a
//! publishable interface in its own right: external tools can fetch
//! `plan_schema()` and lint candidate plans without going through the
//! validator. The schema is closed-world — `additionalProperties: false`
//! everywhere — so an unexpected field from the model becomes a diagnosable
//! error instead of silent data loss.

use jsonschema::error::ValidationErrorKind;
use jsonschema::{Draft, JSONSchema};
use once_cell::sync::Lazy;
use serde_json::{json, Value as JsonValue};

use crate::validator::{ErrorCode, ValidationIssue};

static PLAN_SCHEMA: Lazy<JsonValue> = Lazy::new(|| {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "TypedPlan",
        "type": "object",
        "additionalProperties": false,
        "required": ["procedure", "steps"],
        "properties": {
            "procedure": {
                "type": "object",
                "additionalProperties": false,
                "required": ["name", "description"],
                "properties": {
                    "name": { "type": "string", "minLength": 1 },
                    "description": { "type": "string" },
                    "slug": { "type": "string" },
                    "tags": { "type": "array", "items": { "type": "string" } }
                }
            },
            "parameters": {
                "type": "array",
                "items": { "$ref": "#/definitions/parameter" }
            },
            "steps": {
                "type": "array",
                "minItems": 1,
                "items": { "$ref": "#/definitions/step" }
            },
            "on_error": { "enum": ["fail", "skip", "continue"] }
        },
        "definitions": {
            "parameter": {
                "type": "object",
                "additionalProperties": false,
                "required": ["name", "type"],
                "properties": {
                    "name": { "type": "string", "minLength": 1 },
                    "type": {
                        "enum": ["string", "integer", "boolean", "array", "object", "number"]
                    },
                    "description": { "type": "string" },
                    "required": { "type": "boolean" },
                    "default": {}
                }
            },
            "step": {
                "type": "object",
                "additionalProperties": false,
                "required": ["name", "tool"],
                "properties": {
                    "name": { "type": "string", "minLength": 1 },
                    "tool": { "type": "string", "minLength": 1 },
                    "args": { "type": "object" },
                    "description": { "type": "string" },
                    "depends_on": { "type": "array", "items": { "type": "string" } },
                    "on_error": { "enum": ["fail", "skip", "continue"] },
                    "condition": { "type": "string" },
                    "foreach": { "type": "string" },
                    "branches": {
                        "type": "object",
                        "additionalProperties": {
                            "type": "array",
                            "items": { "$ref": "#/definitions/step" }
                        }
                    }
                }
            }
        }
    })
});

static COMPILED: Lazy<JSONSchema> = Lazy::new(|| {
    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&PLAN_SCHEMA)
        .expect("plan schema compiles")
});

/// The schema document itself, for external consumers.
pub fn plan_schema() -> &'static JsonValue {
    &PLAN_SCHEMA
}

/// Validate a raw plan document against the structural schema.
pub fn validate_structure(doc: &JsonValue) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    if let Err(errors) = COMPILED.validate(doc) {
        for error in errors {
            let code = match error.kind {
                ValidationErrorKind::Type { .. } => ErrorCode::InvalidFieldType,
                _ => ErrorCode::SchemaError,
            };
            issues.push(ValidationIssue {
                code,
                path: pointer_to_breadcrumb(&error.instance_path.to_string()),
                message: error.to_string(),
            });
        }
    }
    issues
}

/// Convert a JSON pointer (`/steps/0/name`) into the breadcrumb form used in
/// validation issues (`steps[0].name`).
fn pointer_to_breadcrumb(pointer: &str) -> String {
    let mut out = String::new();
    for raw in pointer.split('/').skip(1) {
        let segment = raw.replace("~1", "/").replace("~0", "~");
        if !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()) {
            out.push_str(&format!("[{}]", segment));
        } else {
            if !out.is_empty() {
                out.push('.');
            }
            out.push_str(&segment);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal_plan() -> JsonValue {
        json!({
            "procedure": { "name": "Demo", "description": "d" },
            "steps": [{ "name": "a", "tool": "noop" }]
        })
    }

    #[test]
    fn minimal_plan_passes() {
        assert!(validate_structure(&minimal_plan()).is_empty());
    }

    #[test]
    fn missing_procedure_description_is_reported() {
        let doc = json!({
            "procedure": { "name": "Demo" },
            "steps": [{ "name": "a", "tool": "noop" }]
        });
        let issues = validate_structure(&doc);
        assert!(!issues.is_empty());
        assert!(issues.iter().any(|i| i.path == "procedure"));
    }

    #[test]
    fn empty_steps_array_is_reported() {
        let doc = json!({
            "procedure": { "name": "Demo", "description": "d" },
            "steps": []
        });
        assert!(!validate_structure(&doc).is_empty());
    }

    #[test]
    fn additive_fields_are_rejected_not_ignored() {
        let mut doc = minimal_plan();
        doc["steps"][0]["surprise"] = json!(true);
        let issues = validate_structure(&doc);
        assert!(issues.iter().any(|i| i.path.starts_with("steps[0]")));
    }

    #[test]
    fn bad_on_error_value_is_reported() {
        let mut doc = minimal_plan();
        doc["on_error"] = json!("explode");
        let issues = validate_structure(&doc);
        assert!(issues.iter().any(|i| i.path == "on_error"));
    }

    #[test]
    fn wrong_field_type_maps_to_invalid_field_type() {
        let mut doc = minimal_plan();
        doc["steps"][0]["name"] = json!(42);
        let issues = validate_structure(&doc);
        assert!(issues
            .iter()
            .any(|i| i.code == ErrorCode::InvalidFieldType && i.path == "steps[0].name"));
    }

    #[test]
    fn nested_branch_violations_carry_paths() {
        let mut doc = minimal_plan();
        doc["steps"][0]["branches"] = json!({ "each": [{ "name": "inner" }] });
        let issues = validate_structure(&doc);
        assert!(issues
            .iter()
            .any(|i| i.path.starts_with("steps[0].branches.each[0]")));
    }
}
