use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The subset of an [`ExecutionPlan`] that lists required output files.
///
/// Drives `Skill::validate_outputs`: every path here must exist under
/// `outputs/` at verification time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct OutputContract {
    /// Filenames (relative to `outputs/`) that must exist for the job to
    /// pass verification.
    pub required_files: Vec<String>,
}

/// `packaging_rules.include` — globs selecting which files beyond the
/// required ones should be swept into the bundle. Informational for now;
/// `forge-artifacts` always walks the whole `outputs/` tree without
/// narrowing collection behavior.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct PackagingRules {
    /// Include globs, evaluated against paths relative to `outputs/`.
    pub include: Vec<String>,
}

/// Soft/hard timeout pair recorded in the plan for observability; the
/// authoritative values the executor enforces come from [`forge-config`]'s
/// `ForgeConfig`, not from this copy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Timeouts {
    /// Cooperative deadline for the completion wait loop.
    pub soft_seconds: u64,
    /// Outer kill deadline for the worker task.
    pub hard_seconds: u64,
}

/// Worker-level retry policy recorded in the plan for observability.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_attempts: u32,
    /// Backoff (seconds) before each retry, indexed by retry number.
    pub backoff_seconds: Vec<u64>,
}

/// The plan persisted as `job/execution-plan.json`: the contract the
/// executor builds the prompt from and validates outputs against.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ExecutionPlan {
    /// Schema version of this plan document.
    pub schema_version: u32,
    /// Code of the skill that produced this plan.
    pub selected_skill: String,
    /// The output contract `validate_outputs` enforces.
    pub output_contract: OutputContract,
    /// Packaging hints for the artifact manager.
    pub packaging_rules: PackagingRules,
    /// Timeouts recorded for observability.
    pub timeouts: Timeouts,
    /// Retry policy recorded for observability.
    pub retry_policy: RetryPolicy,
    /// Skill-specific hints (opaque to the executor, read by skill code and
    /// surfaced in the prompt).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub skill_hints: BTreeMap<String, serde_json::Value>,
}
