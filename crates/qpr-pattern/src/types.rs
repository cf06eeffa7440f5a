// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pattern document types (spec §3.1 "Pattern"/"Step", §6.2 file format).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Declared type of a pattern input (spec §6.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    /// UTF-8 string.
    String,
    /// 64-bit signed integer.
    Integer,
    /// Calendar date, `YYYY-MM-DD`.
    Date,
    /// UUID.
    Uuid,
    /// Boolean.
    Boolean,
    /// Decimal number.
    Decimal,
    /// One of a closed set of string values.
    Enum,
}

/// One declared input of a pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSpec {
    /// Input name, referenced as `{{inputs.<name>}}`.
    pub name: String,
    /// Declared type.
    #[serde(rename = "type")]
    pub input_type: InputType,
    /// Whether the caller must supply this input.
    #[serde(default)]
    pub required: bool,
    /// Default value used when absent and not required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// Allowed values, required when `input_type == Enum`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
}

/// One step of a pattern's DAG (spec §3.1 "Step").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Step name, unique within the pattern.
    pub name: String,
    /// Dotted capability identifier this step invokes.
    pub capability: String,
    /// Mapping of parameter name to template-or-literal value.
    pub args: BTreeMap<String, serde_json::Value>,
    /// Execution-state key the result is written under; defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_as: Option<String>,
    /// Template that must resolve to a boolean; false skips the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Static value substituted when the invocation fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<serde_json::Value>,
    /// Cache lifetime in seconds; absent or zero bypasses the cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    /// Parallel group tag; steps sharing a tag execute concurrently behind
    /// a barrier (spec §5).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_group: Option<String>,
    /// If true, a failure with no fallback is recorded and execution
    /// continues rather than halting the pattern.
    #[serde(default)]
    pub optional: bool,
}

impl Step {
    /// The execution-state key this step writes to.
    pub fn state_key(&self) -> &str {
        self.save_as.as_deref().unwrap_or(&self.name)
    }
}

/// Opaque UI hint block, passed through unmodified (spec §3.1 "Pattern").
pub type DisplayHints = serde_json::Value;

/// A declarative workflow document (spec §3.1 "Pattern").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    /// Globally unique pattern id.
    pub id: String,
    /// Semantic version of this document.
    pub version: String,
    /// Category label, used by the Capability Router's keyword matcher.
    #[serde(default)]
    pub category: Option<String>,
    /// Free-text tags, used by the Capability Router's keyword matcher.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Human-readable description, used by both router matchers.
    #[serde(default)]
    pub description: String,
    /// Declared inputs, in the order a caller should supply them.
    pub inputs: Vec<InputSpec>,
    /// Output name to template-reference mapping, resolved against final
    /// execution state at the end of a run.
    pub outputs: BTreeMap<String, String>,
    /// The step DAG, in declaration order.
    pub steps: Vec<Step>,
    /// Rights the invoking user must hold (spec §4.6 step 2).
    #[serde(default)]
    pub rights_required: Vec<String>,
    /// Opaque UI hints.
    #[serde(default)]
    pub display: Option<DisplayHints>,
    /// Per-step static fallback payloads, keyed by step name (an
    /// alternative to an inline `step.fallback`).
    #[serde(default)]
    pub fallbacks: BTreeMap<String, serde_json::Value>,
}

/// Maximum steps permitted in a single pattern (spec §9 size guardrail).
pub const MAX_STEPS_PER_PATTERN: usize = 100;
