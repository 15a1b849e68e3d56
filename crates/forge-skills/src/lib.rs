// SPDX-License-Identifier: MIT OR Apache-2.0
//! The skill catalog and router.
//!
//! A skill is a task template that fixes a job's workspace layout, the
//! natural-language prompt sent to the coding agent, and the acceptance
//! contract the executor verifies outputs against.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod catalog;
mod router;
mod skills;

pub use catalog::SkillCatalog;
pub use router::{select, RouterOutcome};
pub use skills::{data_analysis::DataAnalysisSkill, general_default::GeneralDefaultSkill, ppt::PptSkill};

use forge_core::{ExecutionPlan, ForgeError, JobContext};
use std::path::Path;

/// A registered task template.
pub trait Skill: Send + Sync {
    /// Stable machine-readable identifier, e.g. `"data-analysis"`.
    fn code(&self) -> &'static str;
    /// Human-facing display name.
    fn name(&self) -> &'static str;
    /// Alternate names the router/CLI will also recognize.
    fn aliases(&self) -> &'static [&'static str];
    /// Skill implementation version.
    fn version(&self) -> &'static str;
    /// Execution-plan schema version this skill targets.
    fn schema_version(&self) -> u32;
    /// Human-readable description, surfaced via `GET /skills`.
    fn description(&self) -> &'static str;
    /// Broad task family (e.g. `"report"`, `"slides"`, `"generic"`).
    fn task_type(&self) -> &'static str;

    /// Scores how well this skill fits a requirement and set of input file
    /// paths, in `[0.0, 1.0]`.
    fn score(&self, requirement: &str, input_files: &[String]) -> f64;

    /// Builds the execution plan for a job using this skill. `soft_timeout`
    /// and `hard_timeout` are recorded for observability only — the
    /// authoritative values live in `ForgeConfig`.
    fn build_execution_plan(
        &self,
        ctx: &JobContext,
        soft_timeout_seconds: u64,
        hard_timeout_seconds: u64,
    ) -> ExecutionPlan;

    /// Builds the self-contained natural-language prompt sent to the coding
    /// agent, embedding the plan and pinning `inputs/`/`outputs/` paths.
    fn build_prompt(&self, ctx: &JobContext, plan: &ExecutionPlan) -> String;

    /// Confirms `outputs/` is non-empty and every `output_contract.required_files`
    /// entry exists under it.
    fn validate_outputs(&self, outputs_dir: &Path, plan: &ExecutionPlan) -> Result<(), ForgeError>;
}

/// Shared `validate_outputs` body: every concrete skill's output contract is
/// enforced the same way, only the contract contents differ.
pub(crate) fn validate_output_contract(
    outputs_dir: &Path,
    plan: &ExecutionPlan,
) -> Result<(), ForgeError> {
    let has_any_entry = std::fs::read_dir(outputs_dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false);
    if !has_any_entry {
        return Err(ForgeError::ValidationFailure(
            "outputs/ directory is empty".to_string(),
        ));
    }
    for required in &plan.output_contract.required_files {
        if !outputs_dir.join(required).is_file() {
            return Err(ForgeError::ValidationFailure(format!(
                "required output file missing: {required}"
            )));
        }
    }
    Ok(())
}

/// Shared prompt preamble embedding the plan JSON and pinning paths —
/// concrete skills append their own task-specific guidance.
pub(crate) fn prompt_preamble(ctx: &JobContext, plan: &ExecutionPlan) -> String {
    let plan_json = serde_json::to_string_pretty(plan).unwrap_or_default();
    format!(
        "You are working inside a fixed job workspace.\n\
         Read every file under `inputs/` for context; NEVER modify or delete anything under `inputs/`.\n\
         Write every deliverable under `outputs/`.\n\
         Requirement: {requirement}\n\
         Execution plan (authoritative contract for this job):\n```json\n{plan_json}\n```\n",
        requirement = ctx.requirement,
    )
}
