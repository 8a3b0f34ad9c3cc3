//! Four-layer static analysis of typed plans.
//!
//! `validate` is a pure function over `(plan, pack)`. The layers run
//! independently and accumulate errors rather than short-circuiting, so a
//! repair prompt can name every problem at once. Layers 2-4 recurse into
//! nested branches, threading a breadcrumb path accumulator so each issue
//! points at the exact step that produced it.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;

use crate::contracts::ContractPack;
use crate::plan::{
    parse_ref, scan_expression, ArgValue, PlanStep, RefMention, TypedPlan,
};

/// Machine-readable classification of a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    SchemaError,
    InvalidFieldType,
    UnknownFunction,
    MissingRequiredParam,
    InvalidParamType,
    InvalidStepReference,
    InvalidParamReference,
    CircularDependency,
    ToolBlockedByProfile,
    MissingSideEffectConfirmation,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorCode::SchemaError => "SCHEMA_ERROR",
            ErrorCode::InvalidFieldType => "INVALID_FIELD_TYPE",
            ErrorCode::UnknownFunction => "UNKNOWN_FUNCTION",
            ErrorCode::MissingRequiredParam => "MISSING_REQUIRED_PARAM",
            ErrorCode::InvalidParamType => "INVALID_PARAM_TYPE",
            ErrorCode::InvalidStepReference => "INVALID_STEP_REFERENCE",
            ErrorCode::InvalidParamReference => "INVALID_PARAM_REFERENCE",
            ErrorCode::CircularDependency => "CIRCULAR_DEPENDENCY",
            ErrorCode::ToolBlockedByProfile => "TOOL_BLOCKED_BY_PROFILE",
            ErrorCode::MissingSideEffectConfirmation => "MISSING_SIDE_EFFECT_CONFIRMATION",
        };
        f.write_str(label)
    }
}

/// One validation finding, located by breadcrumb path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: ErrorCode,
    /// Breadcrumb into the plan document, e.g.
    /// `steps[1].branches.each[0].args.prompt`.
    pub path: String,
    pub message: String,
}

/// The accumulated outcome of all four layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn from_errors(errors: Vec<ValidationIssue>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// One line per issue, for embedding into a repair prompt.
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(|issue| format!("- [{}] at {}: {}", issue.code, issue.path, issue.message))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Validate a parsed plan against a contract pack, running all four layers.
/// Serde does not enforce the structural invariants (non-empty `steps`,
/// non-empty step names and tool names), so layer 1 re-checks the plan's
/// document form even for plans built in code rather than parsed.
pub fn validate(plan: &TypedPlan, pack: &ContractPack) -> ValidationReport {
    let mut errors = crate::plan::schema::validate_structure(&plan.to_document());
    check_arguments(plan, pack, &mut errors);
    check_references(plan, &mut errors);
    check_policy(plan, pack, &mut errors);
    ValidationReport::from_errors(errors)
}

/// Validate a raw plan document end to end: structural schema first, then
/// parse, then the semantic layers. Returns the parsed plan when one could
/// be built, even if semantic layers rejected it, so callers can still show
/// the plan next to its errors.
pub fn validate_document(
    doc: &JsonValue,
    pack: &ContractPack,
) -> (Option<TypedPlan>, ValidationReport) {
    let structural = crate::plan::schema::validate_structure(doc);
    if !structural.is_empty() {
        return (None, ValidationReport::from_errors(structural));
    }
    match TypedPlan::from_document(doc) {
        Ok(plan) => {
            let report = validate(&plan, pack);
            (Some(plan), report)
        }
        Err(err) => {
            let report = ValidationReport::from_errors(vec![ValidationIssue {
                code: ErrorCode::SchemaError,
                path: String::new(),
                message: format!("plan document does not parse: {err}"),
            }]);
            (None, report)
        }
    }
}

// ============================================================================
// Layer 2: tool resolution and argument checking
// ============================================================================

fn check_arguments(plan: &TypedPlan, pack: &ContractPack, errors: &mut Vec<ValidationIssue>) {
    for (i, step) in plan.steps.iter().enumerate() {
        check_step_arguments(step, &format!("steps[{i}]"), pack, errors);
    }
}

fn check_step_arguments(
    step: &PlanStep,
    path: &str,
    pack: &ContractPack,
    errors: &mut Vec<ValidationIssue>,
) {
    match pack.get(&step.tool) {
        None => errors.push(ValidationIssue {
            code: ErrorCode::UnknownFunction,
            path: format!("{path}.tool"),
            message: format!("tool '{}' is not available in this profile", step.tool),
        }),
        Some(contract) => {
            for required in &contract.input_schema.required {
                // A Reference or Template satisfies presence without
                // type-checking; the runtime value is unknown until execution.
                if !step.args.contains_key(required) {
                    errors.push(ValidationIssue {
                        code: ErrorCode::MissingRequiredParam,
                        path: format!("{path}.args.{required}"),
                        message: format!(
                            "tool '{}' requires argument '{}'",
                            step.tool, required
                        ),
                    });
                }
            }
            for (name, value) in &step.args {
                if let Some(spec) = contract.input_schema.properties.get(name) {
                    if let ArgValue::Literal(literal) = value {
                        if !spec.param_type.matches(literal) {
                            errors.push(ValidationIssue {
                                code: ErrorCode::InvalidParamType,
                                path: format!("{path}.args.{name}"),
                                message: format!(
                                    "argument '{}' of tool '{}' expects {}, got {}",
                                    name,
                                    step.tool,
                                    spec.param_type.engine_name(),
                                    json_type_name(literal)
                                ),
                            });
                        }
                    }
                }
            }
        }
    }
    recurse_branches(step, path, errors, &mut |nested, nested_path, errs| {
        check_step_arguments(nested, nested_path, pack, errs)
    });
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "str",
        JsonValue::Array(_) => "list",
        JsonValue::Object(_) => "dict",
    }
}

// ============================================================================
// Layer 3: reference graph
// ============================================================================

fn check_references(plan: &TypedPlan, errors: &mut Vec<ValidationIssue>) {
    let step_index: HashMap<&str, usize> = plan
        .steps
        .iter()
        .enumerate()
        .map(|(i, step)| (step.name.as_str(), i))
        .collect();
    let params: Vec<&str> = plan.parameters.iter().map(|p| p.name.as_str()).collect();

    for (i, step) in plan.steps.iter().enumerate() {
        check_step_references(step, &format!("steps[{i}]"), i, &step_index, &params, errors);
    }
}

fn check_step_references(
    step: &PlanStep,
    path: &str,
    position: usize,
    step_index: &HashMap<&str, usize>,
    params: &[&str],
    errors: &mut Vec<ValidationIssue>,
) {
    for (name, value) in &step.args {
        let mut mentions = Vec::new();
        value.collect_refs(&mut mentions);
        for mention in mentions {
            check_mention(
                &mention,
                &format!("{path}.args.{name}"),
                &step.name,
                position,
                step_index,
                params,
                errors,
            );
        }
    }

    for (field, expr) in [("condition", &step.condition), ("foreach", &step.foreach)] {
        if let Some(expr) = expr {
            let mut mentions = Vec::new();
            scan_expression(expr, &mut mentions);
            for mention in mentions {
                check_mention(
                    &mention,
                    &format!("{path}.{field}"),
                    &step.name,
                    position,
                    step_index,
                    params,
                    errors,
                );
            }
        }
    }

    for dep in &step.depends_on {
        if dep == &step.name {
            errors.push(ValidationIssue {
                code: ErrorCode::CircularDependency,
                path: format!("{path}.depends_on"),
                message: format!("step '{}' depends on itself", step.name),
            });
        } else if !step_index.get(dep.as_str()).is_some_and(|&j| j < position) {
            errors.push(ValidationIssue {
                code: ErrorCode::InvalidStepReference,
                path: format!("{path}.depends_on"),
                message: format!(
                    "dependency '{}' does not name an earlier step",
                    dep
                ),
            });
        }
    }

    // Branch steps see the same top-level horizon as their parent.
    recurse_branches(step, path, errors, &mut |nested, nested_path, errs| {
        check_step_references(nested, nested_path, position, step_index, params, errs)
    });
}

fn check_mention(
    mention: &RefMention,
    path: &str,
    current_step: &str,
    position: usize,
    step_index: &HashMap<&str, usize>,
    params: &[&str],
    errors: &mut Vec<ValidationIssue>,
) {
    let (namespace, name, _field) = parse_ref(&mention.path);
    match (namespace, name) {
        ("steps", Some(target)) => {
            if target == current_step {
                errors.push(ValidationIssue {
                    code: ErrorCode::CircularDependency,
                    path: path.to_string(),
                    message: format!("step '{current_step}' references itself"),
                });
            } else if !step_index.get(target).is_some_and(|&j| j < position) {
                errors.push(ValidationIssue {
                    code: ErrorCode::InvalidStepReference,
                    path: path.to_string(),
                    message: format!(
                        "'{}' does not name an earlier step",
                        mention.path
                    ),
                });
            }
        }
        ("params", Some(param)) => {
            if !params.contains(&param) {
                errors.push(ValidationIssue {
                    code: ErrorCode::InvalidParamReference,
                    path: path.to_string(),
                    message: format!(
                        "'{}' does not name a declared parameter",
                        mention.path
                    ),
                });
            }
        }
        // Single-segment or foreign-namespace paths only reach here via an
        // explicit wrapper; templated mentions already match the two known
        // namespaces by construction.
        _ => errors.push(ValidationIssue {
            code: ErrorCode::InvalidStepReference,
            path: path.to_string(),
            message: format!("malformed reference path '{}'", mention.path),
        }),
    }
}

// ============================================================================
// Layer 4: side-effect policy
// ============================================================================

fn check_policy(plan: &TypedPlan, pack: &ContractPack, errors: &mut Vec<ValidationIssue>) {
    for (i, step) in plan.steps.iter().enumerate() {
        check_step_policy(step, &format!("steps[{i}]"), pack, errors);
    }
}

fn check_step_policy(
    step: &PlanStep,
    path: &str,
    pack: &ContractPack,
    errors: &mut Vec<ValidationIssue>,
) {
    let profile = &pack.profile;
    if profile.blocks_tool(&step.tool) {
        errors.push(ValidationIssue {
            code: ErrorCode::ToolBlockedByProfile,
            path: format!("{path}.tool"),
            message: format!(
                "tool '{}' is blocked by profile '{}'",
                step.tool, profile.name
            ),
        });
    }
    if let Some(contract) = pack.get(&step.tool) {
        if contract.side_effects {
            if !profile.allow_side_effects {
                errors.push(ValidationIssue {
                    code: ErrorCode::ToolBlockedByProfile,
                    path: format!("{path}.tool"),
                    message: format!(
                        "profile '{}' does not allow side-effecting tools",
                        profile.name
                    ),
                });
            } else if profile.require_side_effect_confirmation
                && !has_confirmation(step)
            {
                errors.push(ValidationIssue {
                    code: ErrorCode::MissingSideEffectConfirmation,
                    path: format!("{path}.args.confirm_side_effects"),
                    message: format!(
                        "side-effecting tool '{}' requires a literal confirm_side_effects: true",
                        step.tool
                    ),
                });
            }
        }
    }
    recurse_branches(step, path, errors, &mut |nested, nested_path, errs| {
        check_step_policy(nested, nested_path, pack, errs)
    });
}

fn has_confirmation(step: &PlanStep) -> bool {
    matches!(
        step.args.get("confirm_side_effects"),
        Some(ArgValue::Literal(JsonValue::Bool(true)))
    )
}

// ============================================================================
// Shared recursion
// ============================================================================

fn recurse_branches(
    step: &PlanStep,
    path: &str,
    errors: &mut Vec<ValidationIssue>,
    visit: &mut dyn FnMut(&PlanStep, &str, &mut Vec<ValidationIssue>),
) {
    for (branch, steps) in &step.branches {
        for (j, nested) in steps.iter().enumerate() {
            visit(nested, &format!("{path}.branches.{branch}[{j}]"), errors);
        }
    }
}
