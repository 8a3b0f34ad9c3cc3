//! Governed LLM procedure generation.
//!
//! `planforge` turns a natural-language instruction into a validated,
//! compiled workflow procedure through a bounded propose/validate/repair
//! loop:
//!
//! 1. A [`contracts::ContractPack`] snapshots the injected tool registry for
//!    a named [`contracts::profiles::GenerationProfile`], deciding which
//!    tools the model is shown at all.
//! 2. The model's raw text is parsed permissively ([`extract`]) into a
//!    [`plan::TypedPlan`], the strict intermediate representation.
//! 3. The four-layer [`validator`] checks structure, tool arguments, the
//!    reference graph, and side-effect policy, accumulating located errors.
//! 4. The [`compiler`] deterministically lowers a valid plan into a
//!    [`compiler::CompiledProcedure`], applying the profile's numeric clamps.
//! 5. The [`orchestrator::ProcedureGenerator`] drives the loop, feeding
//!    validation errors back to the model until success or attempt
//!    exhaustion.
//!
//! Nothing in this crate persists state or executes procedures; the compiled
//! artifact is handed to the caller.

pub mod compiler;
pub mod contracts;
pub mod error;
pub mod extract;
pub mod llm;
pub mod orchestrator;
pub mod plan;
pub mod validator;

pub use compiler::{compile, CompiledProcedure};
pub use contracts::profiles::{GenerationProfile, GenerationProfiles};
pub use contracts::{ContractPack, StaticToolRegistry, ToolContract, ToolRegistry};
pub use error::{GenerationError, LlmError};
pub use llm::{ChatMessage, LlmClient, OpenAiClient, OpenAiConfig, StubLlmClient};
pub use orchestrator::{
    GenerateOptions, GenerationResult, GeneratorConfig, ProcedureGenerator,
};
pub use plan::schema::plan_schema;
pub use plan::{ArgValue, TypedPlan};
pub use validator::{validate, ErrorCode, ValidationIssue, ValidationReport};
