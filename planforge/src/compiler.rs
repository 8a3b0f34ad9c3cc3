//! Deterministic lowering of validated plans into executable procedures.
//!
//! `compile` is a pure function and is defined only over plans that already
//! validated. It never fails and never consults anything beyond its
//! arguments, so identical inputs always produce byte-identical output.
//! Numeric policy overages are corrected silently here via the profile's
//! clamp table; qualitative policy violations were already rejected by the
//! validator.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};

use crate::contracts::ContractPack;
use crate::plan::{ArgValue, OnErrorPolicy, PlanStep, TypedPlan};

/// The lowering target handed to callers for persistence or execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledProcedure {
    pub name: String,
    pub slug: String,
    pub description: String,
    pub version: String,
    pub parameters: Vec<CompiledParameter>,
    pub steps: Vec<CompiledStep>,
    pub on_error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledParameter {
    pub name: String,
    /// Execution engine type name (str, int, bool, list, dict, float).
    #[serde(rename = "type")]
    pub param_type: String,
    pub description: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledStep {
    pub name: String,
    pub function: String,
    pub params: IndexMap<String, JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foreach: Option<String>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub branches: IndexMap<String, Vec<CompiledStep>>,
}

/// Lower a validated plan under a contract pack. The pack supplies the clamp
/// table and the per-tool metadata the clamp selectors match against.
pub fn compile(plan: &TypedPlan, pack: &ContractPack) -> CompiledProcedure {
    let slug = match &plan.procedure.slug {
        Some(slug) => slug.clone(),
        None => slugify(&plan.procedure.name),
    };
    CompiledProcedure {
        name: plan.procedure.name.clone(),
        slug,
        description: plan.procedure.description.clone(),
        version: "1.0".to_string(),
        parameters: plan
            .parameters
            .iter()
            .map(|param| CompiledParameter {
                name: param.name.clone(),
                param_type: param.param_type.engine_name().to_string(),
                description: param.description.clone(),
                required: param.required,
                default: param.default.clone(),
            })
            .collect(),
        steps: plan
            .steps
            .iter()
            .map(|step| compile_step(step, pack))
            .collect(),
        on_error: plan.on_error.unwrap_or_default().as_str().to_string(),
        tags: plan.procedure.tags.clone(),
    }
}

fn compile_step(step: &PlanStep, pack: &ContractPack) -> CompiledStep {
    let mut params: IndexMap<String, JsonValue> = step
        .args
        .iter()
        .map(|(name, value)| (name.clone(), lower_arg(value)))
        .collect();
    apply_clamps(&step.tool, &mut params, pack);
    CompiledStep {
        name: step.name.clone(),
        function: step.tool.clone(),
        params,
        description: step.description.clone(),
        depends_on: step.depends_on.clone(),
        on_error: step.on_error.map(|p| p.as_str().to_string()),
        condition: step.condition.clone(),
        foreach: step.foreach.clone(),
        branches: step
            .branches
            .iter()
            .map(|(branch, steps)| {
                (
                    branch.clone(),
                    steps.iter().map(|s| compile_step(s, pack)).collect(),
                )
            })
            .collect(),
    }
}

/// Lower one argument value: references become `{{ path }}` template strings,
/// templates pass through as their bare expression, literals pass through
/// untouched apart from resolving wrappers nested inside them.
fn lower_arg(value: &ArgValue) -> JsonValue {
    match value {
        ArgValue::Reference(path) => json!(format!("{{{{ {path} }}}}")),
        ArgValue::Template(expr) => json!(expr),
        ArgValue::Literal(literal) => lower_json(literal),
    }
}

fn lower_json(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(lower_json).collect()),
        JsonValue::Object(_) => {
            let classified = ArgValue::from_json(value.clone());
            match classified {
                ArgValue::Literal(JsonValue::Object(map)) => JsonValue::Object(
                    map.iter()
                        .map(|(k, v)| (k.clone(), lower_json(v)))
                        .collect(),
                ),
                other => lower_arg(&other),
            }
        }
        other => other.clone(),
    }
}

/// Cap numeric arguments against the profile's clamp table. Only numeric
/// literals are touched; references and templates resolve at runtime and
/// cannot be clamped here. Values at or below a ceiling are never raised.
fn apply_clamps(tool: &str, params: &mut IndexMap<String, JsonValue>, pack: &ContractPack) {
    let Some(contract) = pack.get(tool) else {
        return;
    };
    for rule in pack.profile.clamp_rules() {
        if !rule.selector.matches(contract) {
            continue;
        }
        if let Some(value) = params.get_mut(&rule.arg) {
            if let Some(n) = value.as_u64() {
                if n > rule.ceiling {
                    *value = json!(rule.ceiling);
                }
            } else if let Some(f) = value.as_f64() {
                if f > rule.ceiling as f64 {
                    *value = json!(rule.ceiling);
                }
            }
        }
    }
}

/// Derive a slug from a display name: lowercase, runs of non-alphanumerics
/// collapse to single underscores, edge underscores trimmed, `p_` prefixed
/// when the result would start with a digit.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.chars() {
        if c.is_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    if slug.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        format!("p_{slug}")
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::profiles::GenerationProfiles;
    use crate::contracts::{ContractPack, StaticToolRegistry, ToolContract};
    use crate::plan::ParamType;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn pack() -> ContractPack {
        let registry = StaticToolRegistry::new(vec![
            ToolContract::new("search_notices", "Search contract notices", "search")
                .with_arg("query", ParamType::String, "Search query", true)
                .with_arg("limit", ParamType::Integer, "Max results", false),
            ToolContract::new("generate_text", "Summarize with an LLM", "llm")
                .with_arg("prompt", ParamType::String, "Prompt", true)
                .with_arg("max_tokens", ParamType::Integer, "Token budget", false)
                .with_requires_llm(),
        ]);
        ContractPack::build(&registry, GenerationProfiles::workflow_standard())
    }

    fn plan(doc: serde_json::Value) -> TypedPlan {
        TypedPlan::from_document(&doc).unwrap()
    }

    #[test]
    fn slugify_laws() {
        assert_eq!(slugify("My Amazing! Procedure #1"), "my_amazing_procedure_1");
        assert_eq!(slugify("123 Numbers First"), "p_123_numbers_first");
        assert_eq!(slugify("already_fine"), "already_fine");
        assert_eq!(slugify("  edge -- runs  "), "edge_runs");
    }

    #[test]
    fn explicit_slug_is_used_verbatim() {
        let plan = plan(json!({
            "procedure": { "name": "Anything", "description": "d", "slug": "kept_as_is" },
            "steps": [{ "name": "a", "tool": "search_notices", "args": { "query": "x" } }]
        }));
        assert_eq!(compile(&plan, &pack()).slug, "kept_as_is");
    }

    #[test]
    fn references_lower_to_template_strings() {
        let plan = plan(json!({
            "procedure": { "name": "p", "description": "d" },
            "parameters": [{ "name": "query", "type": "string" }],
            "steps": [
                { "name": "search", "tool": "search_notices",
                  "args": { "query": { "ref": "params.query" } } },
                { "name": "sum", "tool": "generate_text",
                  "args": { "prompt": { "ref": "steps.search.data" },
                            "max_tokens": { "template": "{{ params.query | length }}" } } }
            ]
        }));
        let compiled = compile(&plan, &pack());
        assert_eq!(compiled.steps[0].params["query"], json!("{{ params.query }}"));
        assert_eq!(compiled.steps[1].params["prompt"], json!("{{ steps.search.data }}"));
        assert_eq!(
            compiled.steps[1].params["max_tokens"],
            json!("{{ params.query | length }}")
        );
    }

    #[test]
    fn nested_wrappers_inside_literals_are_resolved() {
        let plan = plan(json!({
            "procedure": { "name": "p", "description": "d" },
            "parameters": [{ "name": "region", "type": "string" }],
            "steps": [{ "name": "a", "tool": "search_notices",
                        "args": { "query": "x",
                                  "limit": 5,
                                  "filters": { "region": { "ref": "params.region" },
                                               "nested": [{ "ref": "params.region" }] } } }]
        }));
        let compiled = compile(&plan, &pack());
        assert_eq!(
            compiled.steps[0].params["filters"],
            json!({ "region": "{{ params.region }}", "nested": ["{{ params.region }}"] })
        );
    }

    #[test]
    fn vocabulary_bridge_renames_tool_and_args() {
        let plan = plan(json!({
            "procedure": { "name": "p", "description": "d" },
            "steps": [{ "name": "a", "tool": "search_notices", "args": { "query": "x" } }]
        }));
        let value = serde_json::to_value(compile(&plan, &pack())).unwrap();
        assert_eq!(value["steps"][0]["function"], "search_notices");
        assert!(value["steps"][0].get("tool").is_none());
        assert!(value["steps"][0]["params"].is_object());
    }

    #[test]
    fn parameter_types_map_to_engine_vocabulary() {
        let plan = plan(json!({
            "procedure": { "name": "p", "description": "d" },
            "parameters": [
                { "name": "a", "type": "string" },
                { "name": "b", "type": "integer" },
                { "name": "c", "type": "array" },
                { "name": "d", "type": "object" },
                { "name": "e", "type": "number" },
                { "name": "f", "type": "boolean" }
            ],
            "steps": [{ "name": "s", "tool": "search_notices", "args": { "query": "x" } }]
        }));
        let types: Vec<String> = compile(&plan, &pack())
            .parameters
            .into_iter()
            .map(|p| p.param_type)
            .collect();
        assert_eq!(types, vec!["str", "int", "list", "dict", "float", "bool"]);
    }

    #[test]
    fn clamp_law_search_limit() {
        let plan = plan(json!({
            "procedure": { "name": "p", "description": "d" },
            "steps": [{ "name": "a", "tool": "search_notices",
                        "args": { "query": "x", "limit": 500 } }]
        }));
        let compiled = compile(&plan, &pack());
        // workflow_standard caps search limit at 100
        assert_eq!(compiled.steps[0].params["limit"], json!(100));

        let under = plan_under_limit();
        let compiled = compile(&under, &pack());
        assert_eq!(compiled.steps[0].params["limit"], json!(10));
    }

    fn plan_under_limit() -> TypedPlan {
        TypedPlan::from_document(&json!({
            "procedure": { "name": "p", "description": "d" },
            "steps": [{ "name": "a", "tool": "search_notices",
                        "args": { "query": "x", "limit": 10 } }]
        }))
        .unwrap()
    }

    #[test]
    fn float_literals_do_not_escape_the_ceiling() {
        let plan = plan(json!({
            "procedure": { "name": "p", "description": "d" },
            "steps": [
                { "name": "a", "tool": "search_notices",
                  "args": { "query": "x", "limit": 500.0 } },
                { "name": "b", "tool": "search_notices",
                  "args": { "query": "x", "limit": 50.0 } }
            ]
        }));
        let compiled = compile(&plan, &pack());
        assert_eq!(compiled.steps[0].params["limit"], json!(100));
        assert_eq!(compiled.steps[1].params["limit"], json!(50.0));
    }

    #[test]
    fn llm_token_budget_is_clamped() {
        let plan = plan(json!({
            "procedure": { "name": "p", "description": "d" },
            "steps": [{ "name": "a", "tool": "generate_text",
                        "args": { "prompt": "x", "max_tokens": 999999 } }]
        }));
        let compiled = compile(&plan, &pack());
        assert_eq!(compiled.steps[0].params["max_tokens"], json!(4000));
    }

    #[test]
    fn branches_compile_recursively_with_clamps() {
        let plan = plan(json!({
            "procedure": { "name": "p", "description": "d" },
            "steps": [
                { "name": "search", "tool": "search_notices", "args": { "query": "x" } },
                { "name": "fan", "tool": "generate_text",
                  "args": { "prompt": "x" },
                  "foreach": "steps.search.data",
                  "branches": { "each": [
                      { "name": "inner", "tool": "search_notices",
                        "args": { "query": { "ref": "steps.search.data" }, "limit": 500 } }
                  ] } }
            ]
        }));
        let compiled = compile(&plan, &pack());
        let inner = &compiled.steps[1].branches["each"][0];
        assert_eq!(inner.function, "search_notices");
        assert_eq!(inner.params["limit"], json!(100));
        assert_eq!(inner.params["query"], json!("{{ steps.search.data }}"));
    }

    #[test]
    fn plan_level_on_error_defaults_to_fail() {
        let plan = plan(json!({
            "procedure": { "name": "p", "description": "d" },
            "steps": [{ "name": "a", "tool": "search_notices", "args": { "query": "x" } }]
        }));
        assert_eq!(compile(&plan, &pack()).on_error, "fail");
    }

    #[test]
    fn compile_is_deterministic() {
        let doc = json!({
            "procedure": { "name": "Demo Plan", "description": "d", "tags": ["a", "b"] },
            "parameters": [{ "name": "q", "type": "string", "required": true }],
            "steps": [
                { "name": "search", "tool": "search_notices",
                  "args": { "query": { "ref": "params.q" }, "limit": 200 },
                  "on_error": "skip" },
                { "name": "sum", "tool": "generate_text",
                  "args": { "prompt": { "template": "{{ steps.search }}" } } }
            ],
            "on_error": "continue"
        });
        let plan = TypedPlan::from_document(&doc).unwrap();
        let first = serde_json::to_string(&compile(&plan, &pack())).unwrap();
        let second = serde_json::to_string(&compile(&plan, &pack())).unwrap();
        assert_eq!(first, second);
    }
}
