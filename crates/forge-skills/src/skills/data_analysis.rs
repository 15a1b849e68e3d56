use crate::{prompt_preamble, validate_output_contract, Skill};
use forge_core::{ExecutionPlan, ForgeError, JobContext, OutputContract, PackagingRules, RetryPolicy, Timeouts};
use std::path::Path;

/// Extensions that strongly suggest a data-analysis job.
const DATA_EXTENSIONS: &[&str] = &["csv", "xlsx", "xls", "parquet", "json"];

/// Requirement keywords that nudge the score up, each worth
/// [`KEYWORD_INCREMENT`].
const KEYWORDS: &[&str] = &[
    "analyze",
    "analysis",
    "report",
    "dataset",
    "csv",
    "spreadsheet",
    "chart",
    "trend",
    "statistics",
    "data",
];

const BASE_SCORE: f64 = 0.15;
const KEYWORD_INCREMENT: f64 = 0.12;
const FILE_INCREMENT: f64 = 0.2;

/// Produces `outputs/report.md` from one or more CSV/XLSX inputs. The
/// analysis engine itself (the pandas-equivalent computation) is out of
/// core scope — this skill only owns plumbing: scoring, the plan, the
/// prompt, and the output contract.
#[derive(Debug, Clone, Copy)]
pub struct DataAnalysisSkill;

impl Skill for DataAnalysisSkill {
    fn code(&self) -> &'static str {
        "data-analysis"
    }

    fn name(&self) -> &'static str {
        "Data Analysis Report"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["data_analysis", "analysis"]
    }

    fn version(&self) -> &'static str {
        "1.0.0"
    }

    fn schema_version(&self) -> u32 {
        1
    }

    fn description(&self) -> &'static str {
        "Analyzes tabular input files and produces a Markdown report."
    }

    fn task_type(&self) -> &'static str {
        "report"
    }

    fn score(&self, requirement: &str, input_files: &[String]) -> f64 {
        let lower = requirement.to_lowercase();
        let keyword_hits = KEYWORDS.iter().filter(|kw| lower.contains(*kw)).count() as f64;
        let file_hits = input_files.iter().filter(|f| has_data_extension(*f)).count() as f64;
        (BASE_SCORE + keyword_hits * KEYWORD_INCREMENT + file_hits * FILE_INCREMENT).min(1.0)
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
                required_files: vec!["report.md".to_string()],
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
            "{preamble}\nThis is a data-analysis job. Load every tabular file under `inputs/` \
             (CSV/XLSX), compute the statistics and trends relevant to the requirement, and \
             write `outputs/report.md` summarizing your findings in Markdown, with any \
             supporting charts or tables saved alongside it under `outputs/`.",
            preamble = prompt_preamble(ctx, plan)
        )
    }

    fn validate_outputs(&self, outputs_dir: &Path, plan: &ExecutionPlan) -> Result<(), ForgeError> {
        validate_output_contract(outputs_dir, plan)
    }
}

fn has_data_extension(path: &String) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| DATA_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_csv_upload_with_no_keyword_stays_below_fallback_threshold() {
        let skill = DataAnalysisSkill;
        let score = skill.score("", &["inputs/data.csv".to_string()]);
        assert!((score - (BASE_SCORE + FILE_INCREMENT)).abs() < f64::EPSILON);
        assert!(score < 0.45);
    }

    #[test]
    fn keywords_accumulate_without_a_cap() {
        let skill = DataAnalysisSkill;
        let score = skill.score(
            "analyze analysis report dataset csv spreadsheet chart trend statistics data",
            &[],
        );
        assert!((score - (BASE_SCORE + 10.0 * KEYWORD_INCREMENT)).abs() < 1e-9);
    }

    #[test]
    fn extension_and_keywords_combine_and_clamp_to_one() {
        let skill = DataAnalysisSkill;
        let score = skill.score(
            "please analyze this dataset and write a report with charts and trend statistics",
            &["inputs/q3.xlsx".to_string()],
        );
        assert!(score <= 1.0);
        assert!(score > BASE_SCORE + FILE_INCREMENT);
    }

    #[test]
    fn each_matching_file_adds_its_own_increment() {
        let skill = DataAnalysisSkill;
        let score = skill.score(
            "",
            &["inputs/a.csv".to_string(), "inputs/b.parquet".to_string(), "inputs/c.json".to_string()],
        );
        assert!((score - (BASE_SCORE + 3.0 * FILE_INCREMENT)).abs() < f64::EPSILON);
    }

    #[test]
    fn unrelated_requirement_scores_base_only() {
        let skill = DataAnalysisSkill;
        assert!(
            (skill.score("say hello", &["inputs/photo.png".to_string()]) - BASE_SCORE).abs()
                < f64::EPSILON
        );
    }

    #[test]
    fn plan_requires_report_markdown() {
        let skill = DataAnalysisSkill;
        let ctx = JobContext::sample("build");
        let plan = skill.build_execution_plan(&ctx, 900, 1200);
        assert_eq!(plan.output_contract.required_files, vec!["report.md"]);
    }

    #[test]
    fn validate_outputs_fails_without_report() {
        let skill = DataAnalysisSkill;
        let ctx = JobContext::sample("build");
        let plan = skill.build_execution_plan(&ctx, 900, 1200);
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("other.txt"), b"x").unwrap();
        let err = skill.validate_outputs(tmp.path(), &plan).unwrap_err();
        assert!(matches!(err, ForgeError::ValidationFailure(_)));
        std::fs::write(tmp.path().join("report.md"), b"# Report").unwrap();
        assert!(skill.validate_outputs(tmp.path(), &plan).is_ok());
    }
}
