//! Generation orchestrator: the propose/validate/repair loop.
//!
//! One call to `generate_procedure` owns a whole generation request: resolve
//! the profile's contract pack, prompt the model, parse its output
//! permissively, validate, and either compile on success or feed the
//! accumulated errors back as a repair prompt until the attempt budget runs
//! out. The loop is strictly sequential per request; concurrency lives above
//! it, one task per request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

use crate::compiler::{compile, CompiledProcedure};
use crate::contracts::profiles::GenerationProfiles;
use crate::contracts::{PackCache, ToolRegistry};
use crate::error::GenerationError;
use crate::extract::extract_json_object;
use crate::llm::{truncate, ChatMessage, LlmClient};
use crate::validator::{validate_document, ValidationIssue};

/// Tuning knobs for the generation loop.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Profile used when a request names none.
    pub default_profile: String,
    /// Attempt ceiling per request, repair attempts included.
    pub max_attempts: u32,
    /// Deadline applied to each individual LLM call.
    pub llm_timeout: Duration,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            default_profile: "workflow_standard".to_string(),
            max_attempts: 3,
            llm_timeout: Duration::from_secs(60),
        }
    }
}

/// Per-request options beyond the instruction text.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Profile name; falls back to the configured default.
    pub profile: Option<String>,
    /// Refine mode: the current procedure definition, shown to the model as
    /// the artifact to modify.
    pub current_procedure: Option<String>,
    /// Refine mode: the current plan document, when the caller still has it.
    pub current_plan: Option<JsonValue>,
}

/// Timing and provenance of the winning LLM call.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationDiagnostics {
    pub model: String,
    pub latency_ms: u64,
    pub prompt_hash: String,
    pub response_hash: String,
}

/// The outcome of one generation request. Success always carries a complete
/// compiled artifact; failure always carries an itemized explanation.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub procedure: Option<CompiledProcedure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_json: Option<JsonValue>,
    pub profile_used: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<GenerationDiagnostics>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_errors: Option<Vec<ValidationIssue>>,
}

impl GenerationResult {
    fn failure(
        profile: &str,
        attempts: u32,
        error: String,
        validation_errors: Option<Vec<ValidationIssue>>,
    ) -> Self {
        Self {
            success: false,
            procedure: None,
            plan_json: None,
            profile_used: profile.to_string(),
            diagnostics: None,
            attempts,
            error: Some(error),
            validation_errors,
        }
    }
}

const PLAN_FORMAT_GUIDE: &str = r#"You design workflow procedures as JSON plans.

Respond with a single JSON object and nothing else. The object has this shape:

{
  "procedure": { "name": "...", "description": "..." },
  "parameters": [ { "name": "...", "type": "string|integer|boolean|array|object|number", "description": "...", "required": true } ],
  "steps": [ { "name": "...", "tool": "...", "args": { ... } } ]
}

Rules:
- Use only the tools listed below; never invent tool names.
- To pass the output of an earlier step as an argument, use {"ref": "steps.<step_name>"} or {"ref": "steps.<step_name>.<field>"}.
- To pass a declared parameter, use {"ref": "params.<param_name>"}.
- For computed strings use {"template": "..."} with {{ steps.x }} / {{ params.y }} placeholders.
- Steps may only reference steps that appear earlier in the list.
- Fill every required argument of every tool you call.
- Do not add fields beyond the ones shown above.

Available tools:
"#;

/// Drives plan generation end to end. Cheap to share behind an `Arc`; the
/// only interior state is the per-profile pack cache.
pub struct ProcedureGenerator {
    registry: Arc<dyn ToolRegistry>,
    llm: Option<Arc<dyn LlmClient>>,
    packs: PackCache,
    config: GeneratorConfig,
}

impl ProcedureGenerator {
    pub fn new(registry: Arc<dyn ToolRegistry>, llm: Option<Arc<dyn LlmClient>>) -> Self {
        Self::with_config(registry, llm, GeneratorConfig::default())
    }

    pub fn with_config(
        registry: Arc<dyn ToolRegistry>,
        llm: Option<Arc<dyn LlmClient>>,
        config: GeneratorConfig,
    ) -> Self {
        Self {
            registry,
            llm,
            packs: PackCache::new(),
            config,
        }
    }

    /// Generate (or refine) a procedure from a natural-language instruction.
    ///
    /// Never returns `Err`: every failure mode is rendered into a
    /// `GenerationResult` with `success: false`.
    pub async fn generate_procedure(
        &self,
        instruction: &str,
        options: GenerateOptions,
    ) -> GenerationResult {
        let profile_name = options
            .profile
            .clone()
            .unwrap_or_else(|| self.config.default_profile.clone());

        let profile = match GenerationProfiles::resolve(&profile_name) {
            Some(profile) => profile,
            None => {
                return GenerationResult::failure(
                    &profile_name,
                    0,
                    GenerationError::UnknownProfile(profile_name.clone()).to_string(),
                    None,
                )
            }
        };
        let llm = match &self.llm {
            Some(llm) => Arc::clone(llm),
            None => {
                return GenerationResult::failure(
                    &profile_name,
                    0,
                    GenerationError::LlmUnavailable.to_string(),
                    None,
                )
            }
        };

        let pack = self.packs.get_or_build(self.registry.as_ref(), &profile);
        let system = build_system_prompt(&pack.to_prompt_json());
        let user = build_user_prompt(instruction, &options);

        let mut messages = vec![ChatMessage::system(system), ChatMessage::user(user)];
        let mut last_error = String::new();
        let mut last_validation: Option<Vec<ValidationIssue>> = None;

        for attempt in 1..=self.config.max_attempts {
            log::info!(
                "generation attempt {}/{} (profile: {})",
                attempt,
                self.config.max_attempts,
                profile_name
            );
            maybe_show_prompts(&messages);

            let started = Instant::now();
            let call = tokio::time::timeout(self.config.llm_timeout, llm.complete(&messages));
            let response = match call.await {
                Err(_) => {
                    last_error = crate::error::LlmError::Timeout.to_string();
                    log::warn!("attempt {attempt}: LLM call timed out");
                    continue;
                }
                Ok(Err(err)) => {
                    last_error = GenerationError::LlmCall(err).to_string();
                    log::warn!("attempt {attempt}: {last_error}");
                    continue;
                }
                Ok(Ok(text)) => text,
            };
            let latency_ms = started.elapsed().as_millis() as u64;

            let Some(doc) = extract_json_object(&response) else {
                last_error = "LLM response contained no JSON object".to_string();
                // the terminal result must describe the final attempt, not
                // findings left over from an earlier one
                last_validation = None;
                log::warn!("attempt {attempt}: response was not parseable as a plan");
                push_repair(
                    &mut messages,
                    &response,
                    "Your previous response was not a valid JSON object. Respond with exactly one JSON object in the required plan format, with no surrounding prose or markdown.",
                );
                continue;
            };

            let (parsed, report) = validate_document(&doc, &pack);
            match parsed {
                Some(plan) if report.valid => {
                    let procedure = compile(&plan, &pack);
                    log::info!(
                        "plan '{}' validated and compiled on attempt {attempt}",
                        procedure.slug
                    );
                    return GenerationResult {
                        success: true,
                        procedure: Some(procedure),
                        plan_json: Some(plan.to_document()),
                        profile_used: profile_name,
                        diagnostics: Some(GenerationDiagnostics {
                            model: llm.model_label(),
                            latency_ms,
                            prompt_hash: sha256_hex(&render_messages(&messages)),
                            response_hash: sha256_hex(&response),
                        }),
                        attempts: attempt,
                        error: None,
                        validation_errors: None,
                    };
                }
                _ => {
                    log::warn!(
                        "attempt {attempt}: plan rejected with {} error(s)",
                        report.errors.len()
                    );
                    last_error = format!(
                        "plan failed validation with {} error(s)",
                        report.errors.len()
                    );
                    let repair = format!(
                        "Your previous plan failed validation:\n{}\n\nProduce a corrected plan as a single JSON object. Fix every listed error and change nothing else.",
                        report.summary()
                    );
                    last_validation = Some(report.errors);
                    push_repair(&mut messages, &response, &repair);
                }
            }
        }

        GenerationResult::failure(
            &profile_name,
            self.config.max_attempts,
            last_error,
            last_validation,
        )
    }
}

fn build_system_prompt(tools: &JsonValue) -> String {
    let rendered = serde_json::to_string_pretty(tools).unwrap_or_else(|_| tools.to_string());
    format!("{PLAN_FORMAT_GUIDE}{rendered}")
}

fn build_user_prompt(instruction: &str, options: &GenerateOptions) -> String {
    let mut prompt = String::new();
    if let Some(current) = &options.current_procedure {
        prompt.push_str("Current procedure definition:\n");
        prompt.push_str(current);
        prompt.push_str("\n\n");
    }
    if let Some(plan) = &options.current_plan {
        prompt.push_str("Current plan:\n");
        prompt.push_str(&plan.to_string());
        prompt.push_str("\n\n");
    }
    if options.current_procedure.is_some() || options.current_plan.is_some() {
        prompt.push_str("Modify the above according to this instruction:\n");
    }
    prompt.push_str(instruction);
    prompt
}

/// Append the model's failed output and a correction request so the next
/// attempt sees its own mistake in context.
fn push_repair(messages: &mut Vec<ChatMessage>, response: &str, repair: &str) {
    messages.push(ChatMessage::assistant(truncate(response, 4000)));
    messages.push(ChatMessage::user(repair.to_string()));
}

fn render_messages(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("[{}] {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

fn maybe_show_prompts(messages: &[ChatMessage]) {
    if std::env::var("PLANFORGE_SHOW_PROMPTS").is_ok() {
        eprintln!("=== generation prompt ===");
        for message in messages {
            eprintln!("--- {} ---\n{}", message.role, message.content);
        }
        eprintln!("=== end prompt ===");
    }
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}
