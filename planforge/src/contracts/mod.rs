//! Tool contracts and profile-scoped contract packs.
//!
//! The core never talks to a live tool registry directly: it snapshots an
//! injected, read-only `ToolRegistry` into an immutable `ContractPack` per
//! profile. The pack is both what the LLM is shown (via `to_prompt_json`) and
//! what the validator resolves tool names against, so a tool filtered out
//! here is invisible to both equally.

pub mod profiles;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use crate::plan::ParamType;
use profiles::GenerationProfile;

/// The exposure context this subsystem cares about.
pub const PROCEDURE_CONTEXT: &str = "procedure";

/// Declared type and description of one tool argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParamSpec {
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub description: String,
}

/// JSON-Schema subset describing a tool's input arguments.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolInputSchema {
    #[serde(default)]
    pub properties: IndexMap<String, ToolParamSpec>,
    #[serde(default)]
    pub required: Vec<String>,
}

/// Immutable description of one tool exposed by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolContract {
    pub name: String,
    pub description: String,
    /// Free-form category name ("search", "llm", "flow", "notify", …). New
    /// categories can appear without code changes here.
    pub category: String,
    #[serde(default)]
    pub input_schema: ToolInputSchema,
    #[serde(default)]
    pub side_effects: bool,
    /// Payload/exposure profile tag from the registry, passed through as-is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_profile: Option<String>,
    #[serde(default)]
    pub requires_llm: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    pub version: String,
    /// Context name → visible flag ("procedure", "agent", …).
    #[serde(default)]
    pub exposure: HashMap<String, bool>,
}

impl ToolContract {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            category: category.into(),
            input_schema: ToolInputSchema::default(),
            side_effects: false,
            payload_profile: None,
            requires_llm: false,
            tags: Vec::new(),
            version: "1.0".to_string(),
            exposure: HashMap::from([(PROCEDURE_CONTEXT.to_string(), true)]),
        }
    }

    pub fn with_arg(
        mut self,
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        let name = name.into();
        if required {
            self.input_schema.required.push(name.clone());
        }
        self.input_schema.properties.insert(
            name,
            ToolParamSpec {
                param_type,
                description: description.into(),
            },
        );
        self
    }

    pub fn with_side_effects(mut self) -> Self {
        self.side_effects = true;
        self
    }

    pub fn with_requires_llm(mut self) -> Self {
        self.requires_llm = true;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_exposure(mut self, context: impl Into<String>, visible: bool) -> Self {
        self.exposure.insert(context.into(), visible);
        self
    }

    pub fn exposed_in(&self, context: &str) -> bool {
        self.exposure.get(context).copied().unwrap_or(false)
    }
}

/// Read-only view of the live tool registry. The core only ever calls
/// `list_all` and works from the frozen snapshot it builds.
pub trait ToolRegistry: Send + Sync {
    fn list_all(&self) -> Vec<ToolContract>;
}

/// A fixed in-memory registry. Handy as the injection point for callers that
/// assemble their catalog up front, and for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticToolRegistry {
    tools: Vec<ToolContract>,
}

impl StaticToolRegistry {
    pub fn new(tools: Vec<ToolContract>) -> Self {
        Self { tools }
    }
}

impl ToolRegistry for StaticToolRegistry {
    fn list_all(&self) -> Vec<ToolContract> {
        self.tools.clone()
    }
}

/// The profile-scoped snapshot of the registry: exactly the tools the LLM is
/// offered and the validator resolves against. Immutable once built.
#[derive(Debug, Clone)]
pub struct ContractPack {
    pub profile: GenerationProfile,
    contracts: IndexMap<String, ToolContract>,
}

impl ContractPack {
    /// Snapshot the registry for a profile. A tool is kept when it is visible
    /// in the "procedure" context and its category is allowed. Blocked tools
    /// are deliberately *not* filtered here: they are rejected at validation
    /// time with a policy diagnostic instead of looking nonexistent.
    pub fn build(registry: &dyn ToolRegistry, profile: GenerationProfile) -> Self {
        let mut contracts = IndexMap::new();
        for contract in registry.list_all() {
            if !contract.exposed_in(PROCEDURE_CONTEXT) {
                continue;
            }
            if !profile.allows_category(&contract.category) {
                continue;
            }
            contracts.insert(contract.name.clone(), contract);
        }
        Self { profile, contracts }
    }

    pub fn get(&self, tool: &str) -> Option<&ToolContract> {
        self.contracts.get(tool)
    }

    pub fn contracts(&self) -> impl Iterator<Item = &ToolContract> {
        self.contracts.values()
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    /// Compact serialization for the LLM prompt: just enough to pick a tool
    /// and fill its arguments, keeping token usage bounded.
    pub fn to_prompt_json(&self) -> JsonValue {
        let tools: Vec<JsonValue> = self
            .contracts
            .values()
            .map(|contract| {
                let args: IndexMap<&str, JsonValue> = contract
                    .input_schema
                    .properties
                    .iter()
                    .map(|(name, spec)| {
                        // render through serde so the prompt cannot drift
                        // from the wire representation
                        (
                            name.as_str(),
                            serde_json::to_value(spec.param_type).unwrap_or_default(),
                        )
                    })
                    .collect();
                let mut entry = json!({
                    "name": contract.name,
                    "description": contract.description,
                    "category": contract.category,
                    "args": args,
                    "required": contract.input_schema.required,
                });
                if contract.side_effects {
                    entry["side_effects"] = json!(true);
                }
                entry
            })
            .collect();
        JsonValue::Array(tools)
    }
}

/// Build the profile-scoped pack for a registry. Thin alias over
/// `ContractPack::build` matching the operation name used by callers.
pub fn get_tool_contract_pack(
    registry: &dyn ToolRegistry,
    profile: &GenerationProfile,
) -> ContractPack {
    ContractPack::build(registry, profile.clone())
}

/// Read-through cache of packs keyed by profile name. Contracts are immutable
/// once built, and rebuilding on a racy first miss is idempotent, so a plain
/// `RwLock` map is all the synchronization needed.
#[derive(Default)]
pub struct PackCache {
    inner: RwLock<HashMap<String, Arc<ContractPack>>>,
}

impl PackCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build(
        &self,
        registry: &dyn ToolRegistry,
        profile: &GenerationProfile,
    ) -> Arc<ContractPack> {
        if let Ok(cache) = self.inner.read() {
            if let Some(pack) = cache.get(&profile.name) {
                return Arc::clone(pack);
            }
        }
        let pack = Arc::new(ContractPack::build(registry, profile.clone()));
        if let Ok(mut cache) = self.inner.write() {
            cache.insert(profile.name.clone(), Arc::clone(&pack));
        }
        pack
    }
}
