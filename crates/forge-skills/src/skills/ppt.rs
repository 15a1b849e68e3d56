use crate::{prompt_preamble, validate_output_contract, Skill};
use forge_core::{ExecutionPlan, ForgeError, JobContext, OutputContract, PackagingRules, RetryPolicy, Timeouts};
use std::path::Path;

/// Extensions for media a deck request commonly ships alongside: slide
/// templates as well as images that get dropped straight onto slides.
const MEDIA_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "svg", "pptx", "pdf"];

const BASE_SCORE: f64 = 0.1;
const KEYWORD_INCREMENT: f64 = 0.14;
const FILE_INCREMENT: f64 = 0.08;

/// Requirement keywords that nudge the score toward a slide deck.
const KEYWORDS: &[&str] = &[
    "slide",
    "slides",
    "deck",
    "presentation",
    "powerpoint",
    "pptx",
    "pitch",
];

/// Produces `outputs/slides.pptx`. Scores on media inputs (a `.pptx`
/// template to extend, or image assets to drop onto slides) and
/// deck/presentation language in the requirement.
#[derive(Debug, Clone, Copy)]
pub struct PptSkill;

impl Skill for PptSkill {
    fn code(&self) -> &'static str {
        "ppt"
    }

    fn name(&self) -> &'static str {
        "Slide Deck Builder"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["powerpoint", "slides"]
    }

    fn version(&self) -> &'static str {
        "1.0.0"
    }

    fn schema_version(&self) -> u32 {
        1
    }

    fn description(&self) -> &'static str {
        "Builds a PowerPoint slide deck from the requirement and any supplied template."
    }

    fn task_type(&self) -> &'static str {
        "presentation"
    }

    fn score(&self, requirement: &str, input_files: &[String]) -> f64 {
        let lower = requirement.to_lowercase();
        let keyword_hits = KEYWORDS.iter().filter(|kw| lower.contains(*kw)).count() as f64;
        let file_hits = input_files.iter().filter(|f| has_media_extension(*f)).count() as f64;
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
                required_files: vec!["slides.pptx".to_string()],
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
            "{preamble}\nThis is a slide-deck job. If a `.pptx` template is present under \
             `inputs/`, extend it; otherwise build a new deck from scratch. Write the final \
             deck to `outputs/slides.pptx`.",
            preamble = prompt_preamble(ctx, plan)
        )
    }

    fn validate_outputs(&self, outputs_dir: &Path, plan: &ExecutionPlan) -> Result<(), ForgeError> {
        validate_output_contract(outputs_dir, plan)
    }
}

fn has_media_extension(path: &String) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| MEDIA_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pptx_extension_alone_scores_base_plus_one_file() {
        let skill = PptSkill;
        let score = skill.score("", &["inputs/template.pptx".to_string()]);
        assert!((score - (BASE_SCORE + FILE_INCREMENT)).abs() < f64::EPSILON);
    }

    #[test]
    fn keywords_accumulate_without_a_cap() {
        let skill = PptSkill;
        let score = skill.score("slides deck presentation powerpoint pptx pitch", &[]);
        assert!((score - (BASE_SCORE + 7.0 * KEYWORD_INCREMENT)).abs() < 1e-9);
    }

    #[test]
    fn image_assets_without_keywords_route_to_ppt() {
        let skill = PptSkill;
        let score = skill.score(
            "make a deck",
            &[
                "inputs/a.png".to_string(),
                "inputs/b.png".to_string(),
                "inputs/c.png".to_string(),
                "inputs/d.png".to_string(),
                "inputs/e.png".to_string(),
            ],
        );
        assert!((score - (BASE_SCORE + KEYWORD_INCREMENT + 5.0 * FILE_INCREMENT)).abs() < 1e-9);
        assert!(score >= 0.45);
    }

    #[test]
    fn unrelated_requirement_scores_base_only() {
        let skill = PptSkill;
        assert!(
            (skill.score("say hello", &["inputs/data.csv".to_string()]) - BASE_SCORE).abs()
                < f64::EPSILON
        );
    }

    #[test]
    fn plan_requires_slides_pptx() {
        let skill = PptSkill;
        let ctx = JobContext::sample("build");
        let plan = skill.build_execution_plan(&ctx, 900, 1200);
        assert_eq!(plan.output_contract.required_files, vec!["slides.pptx"]);
    }

    #[test]
    fn validate_outputs_fails_without_slides() {
        let skill = PptSkill;
        let ctx = JobContext::sample("build");
        let plan = skill.build_execution_plan(&ctx, 900, 1200);
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("notes.txt"), b"x").unwrap();
        let err = skill.validate_outputs(tmp.path(), &plan).unwrap_err();
        assert!(matches!(err, ForgeError::ValidationFailure(_)));
        std::fs::write(tmp.path().join("slides.pptx"), b"PK").unwrap();
        assert!(skill.validate_outputs(tmp.path(), &plan).is_ok());
    }
}
