//! Typed Plan intermediate representation.
//!
//! A `TypedPlan` is the parsed form of an LLM-proposed workflow plan. Parsing
//! happens once, at the IR boundary: every argument value is classified into
//! the three-way `ArgValue` union (literal / reference / template) so that
//! downstream passes match exhaustively instead of re-inspecting JSON shapes.
//!
//! The IR is transient. It is created from one LLM response, validated,
//! compiled, and discarded; nothing here is persisted.

pub mod schema;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Declared type vocabulary for procedure parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Boolean,
    Array,
    Object,
    Number,
}

impl ParamType {
    /// The execution engine's name for this type.
    pub fn engine_name(self) -> &'static str {
        match self {
            ParamType::String => "str",
            ParamType::Integer => "int",
            ParamType::Boolean => "bool",
            ParamType::Array => "list",
            ParamType::Object => "dict",
            ParamType::Number => "float",
        }
    }

    /// Whether a JSON literal carries this type.
    pub fn matches(self, value: &JsonValue) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
            ParamType::Number => value.is_number(),
        }
    }
}

/// Per-step (or plan-level) error policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OnErrorPolicy {
    #[default]
    Fail,
    Skip,
    Continue,
}

impl OnErrorPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            OnErrorPolicy::Fail => "fail",
            OnErrorPolicy::Skip => "skip",
            OnErrorPolicy::Continue => "continue",
        }
    }
}

// ============================================================================
// Argument value micro-language
// ============================================================================

/// One argument value: a plain literal, a reference to an earlier step or a
/// declared parameter, or an opaque template expression the execution engine
/// interprets later.
///
/// The wrapper forms are single-key objects: `{"ref": "steps.search.data"}`
/// and `{"template": "{{ steps.search | length }}"}`. Any other object is a
/// literal, including objects that happen to contain a `ref` key alongside
/// other keys.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Literal(JsonValue),
    Reference(String),
    Template(String),
}

impl ArgValue {
    /// Classify a raw JSON value. This is the only place wrapper shapes are
    /// inspected.
    pub fn from_json(value: JsonValue) -> Self {
        if let JsonValue::Object(map) = &value {
            if map.len() == 1 {
                if let Some(JsonValue::String(path)) = map.get("ref") {
                    return ArgValue::Reference(path.clone());
                }
                if let Some(JsonValue::String(expr)) = map.get("template") {
                    return ArgValue::Template(expr.clone());
                }
            }
        }
        ArgValue::Literal(value)
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            ArgValue::Literal(value) => value.clone(),
            ArgValue::Reference(path) => serde_json::json!({ "ref": path }),
            ArgValue::Template(expr) => serde_json::json!({ "template": expr }),
        }
    }

    /// Collect every `steps.*` / `params.*` mention reachable from this value:
    /// explicit reference wrappers (including wrappers nested inside literal
    /// arrays and objects) and mentions embedded in template expressions.
    pub fn collect_refs(&self, out: &mut Vec<RefMention>) {
        match self {
            ArgValue::Reference(path) => out.push(RefMention {
                path: path.clone(),
                templated: false,
            }),
            ArgValue::Template(expr) => scan_expression(expr, out),
            ArgValue::Literal(value) => collect_json_refs(value, out),
        }
    }
}

impl Serialize for ArgValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ArgValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = JsonValue::deserialize(deserializer)?;
        Ok(ArgValue::from_json(value))
    }
}

/// A single reference mention found while scanning a plan.
#[derive(Debug, Clone, PartialEq)]
pub struct RefMention {
    /// Dot-separated path, e.g. `steps.search.data` or `params.query`.
    pub path: String,
    /// True when the mention was embedded in a template expression string
    /// rather than an explicit `{"ref": ...}` wrapper.
    pub templated: bool,
}

static EXPR_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:steps|params)\.[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*")
        .expect("expression reference pattern compiles")
});

/// Scan an opaque expression string (template, condition, foreach) for
/// embedded `steps.*` / `params.*` mentions.
pub fn scan_expression(expr: &str, out: &mut Vec<RefMention>) {
    for found in EXPR_REF.find_iter(expr) {
        out.push(RefMention {
            path: found.as_str().to_string(),
            templated: true,
        });
    }
}

fn collect_json_refs(value: &JsonValue, out: &mut Vec<RefMention>) {
    match value {
        JsonValue::Array(items) => {
            for item in items {
                collect_json_refs(item, out);
            }
        }
        JsonValue::Object(_) => match ArgValue::from_json(value.clone()) {
            ArgValue::Reference(path) => out.push(RefMention {
                path,
                templated: false,
            }),
            ArgValue::Template(expr) => scan_expression(&expr, out),
            ArgValue::Literal(JsonValue::Object(map)) => {
                for nested in map.values() {
                    collect_json_refs(nested, out);
                }
            }
            ArgValue::Literal(_) => {}
        },
        _ => {}
    }
}

/// Split a reference path into `(namespace, name, field)` on the first two
/// dots. A single-segment path yields `(segment, None, None)`, which marks a
/// malformed reference for the caller to reject.
pub fn parse_ref(path: &str) -> (&str, Option<&str>, Option<&str>) {
    let mut parts = path.splitn(3, '.');
    let namespace = parts.next().unwrap_or("");
    (namespace, parts.next(), parts.next())
}

// ============================================================================
// Plan document
// ============================================================================

/// Procedure metadata block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcedureMeta {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// A declared procedure parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<JsonValue>,
}

/// One step of a plan. Branches make the type recursive: conditionals and
/// loops carry named sequences of nested steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanStep {
    pub name: String,
    pub tool: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub args: IndexMap<String, ArgValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<OnErrorPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreach: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub branches: IndexMap<String, Vec<PlanStep>>,
}

/// Root of the typed plan IR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypedPlan {
    pub procedure: ProcedureMeta,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<PlanParameter>,
    pub steps: Vec<PlanStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<OnErrorPolicy>,
}

impl TypedPlan {
    /// Parse a raw plan document. Unknown fields anywhere in the document are
    /// rejected, not ignored; the structural layer of the validator reports
    /// them with precise paths before this is attempted.
    pub fn from_document(doc: &JsonValue) -> Result<Self, serde_json::Error> {
        serde_json::from_value(doc.clone())
    }

    pub fn to_document(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn arg_value_classifies_reference_wrapper() {
        let value = ArgValue::from_json(json!({ "ref": "steps.search" }));
        assert_eq!(value, ArgValue::Reference("steps.search".to_string()));
    }

    #[test]
    fn arg_value_classifies_template_wrapper() {
        let value = ArgValue::from_json(json!({ "template": "{{ steps.search | length }}" }));
        assert_eq!(
            value,
            ArgValue::Template("{{ steps.search | length }}".to_string())
        );
    }

    #[test]
    fn multi_key_object_is_a_literal() {
        let raw = json!({ "ref": "steps.search", "extra": 1 });
        let value = ArgValue::from_json(raw.clone());
        assert_eq!(value, ArgValue::Literal(raw));
    }

    #[test]
    fn ref_wrapper_with_non_string_value_is_a_literal() {
        let raw = json!({ "ref": 42 });
        assert_eq!(ArgValue::from_json(raw.clone()), ArgValue::Literal(raw));
    }

    #[test]
    fn parse_ref_splits_on_first_two_dots() {
        assert_eq!(parse_ref("steps.search"), ("steps", Some("search"), None));
        assert_eq!(
            parse_ref("steps.search.data.items"),
            ("steps", Some("search"), Some("data.items"))
        );
        assert_eq!(parse_ref("params.query"), ("params", Some("query"), None));
        assert_eq!(parse_ref("loneword"), ("loneword", None, None));
    }

    #[test]
    fn collect_refs_finds_wrappers_nested_in_literals() {
        let value = ArgValue::from_json(json!({
            "filters": [{ "ref": "params.region" }],
            "meta": { "source": { "ref": "steps.search.source" } }
        }));
        let mut mentions = Vec::new();
        value.collect_refs(&mut mentions);
        let paths: Vec<&str> = mentions.iter().map(|m| m.path.as_str()).collect();
        assert!(paths.contains(&"params.region"));
        assert!(paths.contains(&"steps.search.source"));
    }

    #[test]
    fn scan_expression_finds_embedded_mentions() {
        let mut mentions = Vec::new();
        scan_expression("Found {{ steps.search | length }} for {{ params.query }}", &mut mentions);
        assert_eq!(mentions.len(), 2);
        assert!(mentions.iter().all(|m| m.templated));
        assert_eq!(mentions[0].path, "steps.search");
        assert_eq!(mentions[1].path, "params.query");
    }

    #[test]
    fn plan_round_trips_through_json() {
        let doc = json!({
            "procedure": { "name": "Demo", "description": "A demo" },
            "parameters": [
                { "name": "query", "type": "string", "description": "Search query", "required": true }
            ],
            "steps": [
                { "name": "search", "tool": "search_notices", "args": { "query": { "ref": "params.query" } } }
            ]
        });
        let plan = TypedPlan::from_document(&doc).unwrap();
        assert_eq!(plan.procedure.name, "Demo");
        assert_eq!(plan.parameters[0].param_type, ParamType::String);
        assert_eq!(
            plan.steps[0].args.get("query"),
            Some(&ArgValue::Reference("params.query".to_string()))
        );
        assert_eq!(plan.to_document(), doc);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let doc = json!({
            "procedure": { "name": "Demo", "description": "d" },
            "steps": [{ "name": "a", "tool": "t", "surprise": true }]
        });
        assert!(TypedPlan::from_document(&doc).is_err());
    }
}
