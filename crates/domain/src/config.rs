//! Engine configuration.
//!
//! The core never reads the environment or config files itself; the
//! embedding application deserializes one [`AgentConfig`] and hands it
//! over. Every field carries a serde default so partial configs work.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level agent config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Upper bound on LLM/tool rounds within one user turn.
    #[serde(default = "d_40")]
    pub max_tool_iterations: usize,
    /// Per-call deadline for provider requests.
    #[serde(default = "d_120")]
    pub provider_timeout_secs: u64,
    /// Per-call deadline for tool execution.
    #[serde(default = "d_300")]
    pub tool_timeout_secs: u64,
    #[serde(default)]
    pub routing: RoutingConfig,
    /// Root for session logs, mission state, and workflow lookup.
    #[serde(default = "d_workspace")]
    pub workspace: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: d_40(),
            provider_timeout_secs: d_120(),
            tool_timeout_secs: d_300(),
            routing: RoutingConfig::default(),
            workspace: d_workspace(),
        }
    }
}

impl AgentConfig {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Routing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tiered model routing configuration.
///
/// `tiers` is ordered (BTreeMap) so the linear search over tier claims
/// is deterministic across runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_default_tier")]
    pub default_tier: String,
    #[serde(default)]
    pub tiers: BTreeMap<String, TierConfig>,
    #[serde(default)]
    pub enable_supervision: bool,
    #[serde(default)]
    pub supervisor_tier: Option<String>,
    /// When > 0, overrides every validation rule's minimum confidence.
    #[serde(default)]
    pub validation_confidence_threshold: f64,
    /// Tasks at or above this complexity get supervised.
    #[serde(default = "d_7")]
    pub min_task_complexity_for_supervision: u8,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_tier: d_default_tier(),
            tiers: BTreeMap::new(),
            enable_supervision: false,
            supervisor_tier: None,
            validation_confidence_threshold: 0.0,
            min_task_complexity_for_supervision: d_7(),
        }
    }
}

/// One named routing tier: a model, the task labels it claims, and its
/// pricing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    /// Key into the provider registry.
    pub model: String,
    /// Task-type labels this tier claims (matched case-insensitively).
    #[serde(default)]
    pub use_for: Vec<String>,
    #[serde(default)]
    pub cost_per_1m: ModelPricing,
}

impl TierConfig {
    /// Case-insensitive membership test against `use_for`.
    pub fn claims(&self, task_label: &str) -> bool {
        self.use_for
            .iter()
            .any(|t| t.eq_ignore_ascii_case(task_label))
    }
}

/// Pricing per million tokens for a specific model.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Dollars per 1 million input (prompt) tokens.
    pub input_per_1m: f64,
    /// Dollars per 1 million output (completion) tokens.
    pub output_per_1m: f64,
}

impl ModelPricing {
    /// Calculate estimated cost in USD for the given token counts.
    pub fn estimate_cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (input_tokens as f64 * self.input_per_1m + output_tokens as f64 * self.output_per_1m)
            / 1_000_000.0
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One configured LLM backend (data-driven: adding a backend = adding
/// config).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Model name this provider serves; also the registry key.
    pub model: String,
    pub kind: ProviderKind,
    pub base_url: String,
    /// Resolved by the embedding application; never read from env here.
    #[serde(default)]
    pub api_key: String,
    /// Force full `vendor/name` model ids on the wire (aggregator
    /// backends). Auto-detected from known aggregator hosts otherwise.
    #[serde(default)]
    pub keep_model_prefix: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenaiCompat,
    Anthropic,
}

// ── serde default helpers ──────────────────────────────────────────

fn d_40() -> usize {
    40
}
fn d_120() -> u64 {
    120
}
fn d_300() -> u64 {
    300
}
fn d_7() -> u8 {
    7
}
fn d_true() -> bool {
    true
}
fn d_default_tier() -> String {
    "balanced".into()
}
fn d_workspace() -> PathBuf {
    PathBuf::from(".")
}
