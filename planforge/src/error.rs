//! Error types for the generation pipeline.
//!
//! Validation findings are not errors in this sense: they are data
//! (`validator::ValidationIssue`) that flows back into the repair loop. The
//! enums here cover the genuinely fallible edges: the LLM transport and the
//! orchestrator's own preconditions.

use thiserror::Error;

/// Failures of a single LLM call.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("no API key configured for the LLM endpoint")]
    MissingApiKey,

    #[error("LLM call timed out")]
    Timeout,

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("LLM API returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("malformed LLM response: {0}")]
    MalformedResponse(String),
}

/// Failures of a generation request as a whole.
///
/// These never escape `ProcedureGenerator::generate_procedure`; they are
/// rendered into the `error` field of a failed `GenerationResult`.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("no LLM client is configured")]
    LlmUnavailable,

    #[error("unknown generation profile '{0}'")]
    UnknownProfile(String),

    #[error("LLM call failed: {0}")]
    LlmCall(#[from] LlmError),
}
