use crate::{prompt_preamble, validate_output_contract, Skill};
use forge_core::{ExecutionPlan, ForgeError, JobContext, OutputContract, PackagingRules, RetryPolicy, Timeouts};
use std::path::Path;

/// The always-usable floor skill: no specific output contract beyond "write
/// something to `outputs/`", chosen whenever no other skill scores above
/// the router's fallback threshold.
#[derive(Debug, Clone, Copy)]
pub struct GeneralDefaultSkill;

/// Constant floor score — always usable, never the best fit for anything
/// more specific.
const FLOOR_SCORE: f64 = 0.5;

impl Skill for GeneralDefaultSkill {
    fn code(&self) -> &'static str {
        "general-default"
    }

    fn name(&self) -> &'static str {
        "General Default"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["default", "general"]
    }

    fn version(&self) -> &'static str {
        "1.0.0"
    }

    fn schema_version(&self) -> u32 {
        1
    }

    fn description(&self) -> &'static str {
        "Fallback skill for requests that don't clearly match a specialized template."
    }

    fn task_type(&self) -> &'static str {
        "generic"
    }

    fn score(&self, _requirement: &str, _input_files: &[String]) -> f64 {
        FLOOR_SCORE
    }

    fn build_execution_plan(
        &self,
        _ctx: &JobContext,
        soft_timeout_seconds: u64,
        hard_timeout_seconds: u64,
    ) -> ExecutionPlan {
        ExecutionPlan {
            schema_version: self.schema_version(),
            selected_skill: self.code().to_string(),
            output_contract: OutputContract {
                required_files: Vec::new(),
            },
            packaging_rules: PackagingRules {
                include: vec!["**/*".to_string()],
            },
            timeouts: Timeouts {
                soft_seconds: soft_timeout_seconds,
                hard_seconds: hard_timeout_seconds,
            },
            retry_policy: RetryPolicy {
                max_attempts: 2,
                backoff_seconds: vec![30, 120],
            },
            skill_hints: Default::default(),
        }
    }

    fn build_prompt(&self, ctx: &JobContext, plan: &ExecutionPlan) -> String {
        format!(
            "{preamble}\nProduce whatever deliverable best satisfies the requirement above; \
             at minimum write one file under `outputs/` describing what you did and why.",
            preamble = prompt_preamble(ctx, plan)
        )
    }

    fn validate_outputs(&self, outputs_dir: &Path, plan: &ExecutionPlan) -> Result<(), ForgeError> {
        validate_output_contract(outputs_dir, plan)
    }
}
