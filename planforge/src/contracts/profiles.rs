//! Generation profiles: named safety policies for plan generation.
//!
//! A profile decides two different things at two different times. At exposure
//! time its allowed categories filter which tools are put in front of the LLM
//! at all. At validation time its blocklist and side-effect rules reject
//! steps with a named reason — a blocked tool still "exists" in the pack, so
//! the diagnostic can say "blocked by policy" instead of "does not exist".
//! Its numeric ceilings are not policy *errors*: the compiler silently clamps
//! overages against the rule table below.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::ToolContract;

/// Selects which tools a clamp rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClampSelector {
    /// Tools whose contract category equals the given name.
    Category(String),
    /// Tools carrying the given free-form tag.
    Tag(String),
    /// Tools flagged as requiring an LLM.
    RequiresLlm,
}

impl ClampSelector {
    pub fn matches(&self, contract: &ToolContract) -> bool {
        match self {
            ClampSelector::Category(category) => contract.category == *category,
            ClampSelector::Tag(tag) => contract.tags.iter().any(|t| t == tag),
            ClampSelector::RequiresLlm => contract.requires_llm,
        }
    }
}

/// One entry of the compiler's clamp table: cap the named numeric argument at
/// `ceiling` for every tool the selector matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClampRule {
    pub selector: ClampSelector,
    pub arg: String,
    pub ceiling: u64,
}

/// A named safety policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationProfile {
    pub name: String,
    /// Tools rejected at validation time regardless of arguments.
    #[serde(default)]
    pub blocked_tools: HashSet<String>,
    /// Categories exposed to the LLM; `None` permits every category.
    #[serde(default)]
    pub allowed_categories: Option<HashSet<String>>,
    /// When false, any side-effecting tool is rejected outright.
    pub allow_side_effects: bool,
    /// When true, side-effecting steps must carry a literal
    /// `confirm_side_effects: true` argument.
    pub require_side_effect_confirmation: bool,
    /// Ceiling for the `limit` argument of search-category tools.
    pub max_search_limit: u64,
    /// Ceiling for the `max_tokens` argument of LLM-backed tools.
    pub max_llm_tokens: u64,
    /// Additional clamp rules beyond the two built-in ceilings.
    #[serde(default)]
    pub extra_clamp_rules: Vec<ClampRule>,
}

impl GenerationProfile {
    pub fn allows_category(&self, category: &str) -> bool {
        match &self.allowed_categories {
            None => true,
            Some(set) => set.contains(category),
        }
    }

    pub fn blocks_tool(&self, tool: &str) -> bool {
        self.blocked_tools.contains(tool)
    }

    /// The full clamp table for this profile, built-in ceilings first.
    pub fn clamp_rules(&self) -> Vec<ClampRule> {
        let mut rules = vec![
            ClampRule {
                selector: ClampSelector::Category("search".to_string()),
                arg: "limit".to_string(),
                ceiling: self.max_search_limit,
            },
            ClampRule {
                selector: ClampSelector::RequiresLlm,
                arg: "max_tokens".to_string(),
                ceiling: self.max_llm_tokens,
            },
        ];
        rules.extend(self.extra_clamp_rules.iter().cloned());
        rules
    }
}

fn category_set(categories: &[&str]) -> Option<HashSet<String>> {
    Some(categories.iter().map(|c| c.to_string()).collect())
}

/// Built-in profiles for common generation scenarios.
pub struct GenerationProfiles;

impl GenerationProfiles {
    /// Read-only generation: no side effects at all, and only the quiet
    /// categories are even shown to the model.
    pub fn safe_readonly() -> GenerationProfile {
        GenerationProfile {
            name: "safe_readonly".to_string(),
            blocked_tools: HashSet::new(),
            allowed_categories: category_set(&["search", "llm", "flow", "output"]),
            allow_side_effects: false,
            require_side_effect_confirmation: true,
            max_search_limit: 25,
            max_llm_tokens: 2000,
            extra_clamp_rules: Vec::new(),
        }
    }

    /// The default profile for workflow authoring: side effects permitted
    /// with per-call confirmation, minus a blocklist of raw escape hatches.
    pub fn workflow_standard() -> GenerationProfile {
        GenerationProfile {
            name: "workflow_standard".to_string(),
            blocked_tools: ["http_webhook", "update_record_metadata"]
                .iter()
                .map(|t| t.to_string())
                .collect(),
            allowed_categories: None,
            allow_side_effects: true,
            require_side_effect_confirmation: true,
            max_search_limit: 100,
            max_llm_tokens: 4000,
            extra_clamp_rules: Vec::new(),
        }
    }

    /// Everything exposed to the procedure context, no blocklist, no
    /// confirmation requirement. Agent-only tools stay hidden because the
    /// exposure map filter applies to every profile.
    pub fn admin_full() -> GenerationProfile {
        GenerationProfile {
            name: "admin_full".to_string(),
            blocked_tools: HashSet::new(),
            allowed_categories: None,
            allow_side_effects: true,
            require_side_effect_confirmation: false,
            max_search_limit: 500,
            max_llm_tokens: 16000,
            extra_clamp_rules: Vec::new(),
        }
    }

    pub fn resolve(name: &str) -> Option<GenerationProfile> {
        match name {
            "safe_readonly" => Some(Self::safe_readonly()),
            "workflow_standard" => Some(Self::workflow_standard()),
            "admin_full" => Some(Self::admin_full()),
            _ => None,
        }
    }
}
