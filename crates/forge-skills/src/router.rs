use crate::{Skill, SkillCatalog};
use forge_core::ForgeError;
use std::sync::Arc;

/// Result of [`select`]: the chosen skill plus, if the router fell back to
/// `general-default`, the reason it did so.
pub struct RouterOutcome {
    /// The chosen skill.
    pub skill: Arc<dyn Skill>,
    /// Reason string when a fallback occurred (e.g. "max score 0.20 below
    /// threshold 0.45").
    pub fallback_reason: Option<String>,
}

/// Selects the best skill for a requirement and set of input file paths.
///
/// If `manual_code` is given, it bypasses scoring entirely — the named
/// skill is returned (or `NotFound` if it doesn't exist) with no fallback
/// reason. Otherwise every non-default skill is scored; the best one is
/// returned if its score meets `fallback_threshold`, else `general-default`
/// is returned with a reason. Ties are broken by catalog registration
/// order (catalog iteration order is stable, so the first maximum wins).
pub fn select(
    catalog: &SkillCatalog,
    requirement: &str,
    input_files: &[String],
    manual_code: Option<&str>,
    fallback_threshold: f64,
) -> Result<RouterOutcome, ForgeError> {
    if let Some(code) = manual_code {
        let skill = catalog
            .get(code)
            .ok_or_else(|| ForgeError::NotFound(format!("unknown skill: {code}")))?;
        return Ok(RouterOutcome {
            skill,
            fallback_reason: None,
        });
    }

    let candidates = catalog.non_default_skills();
    if candidates.is_empty() {
        let default = catalog
            .default_skill()
            .ok_or_else(|| ForgeError::Internal("no skills registered".to_string()))?;
        return Ok(RouterOutcome {
            skill: default,
            fallback_reason: Some("no skills registered".to_string()),
        });
    }

    let mut best: Option<(Arc<dyn Skill>, f64)> = None;
    for skill in candidates {
        let score = skill.score(requirement, input_files);
        match &best {
            Some((_, best_score)) if *best_score >= score => {}
            _ => best = Some((skill, score)),
        }
    }
    let (best_skill, best_score) = best.expect("candidates is non-empty");

    if best_score < fallback_threshold {
        let default = catalog
            .default_skill()
            .ok_or_else(|| ForgeError::Internal("no skills registered".to_string()))?;
        return Ok(RouterOutcome {
            skill: default,
            fallback_reason: Some(format!(
                "max score {best_score:.2} below threshold {fallback_threshold:.2}"
            )),
        });
    }

    Ok(RouterOutcome {
        skill: best_skill,
        fallback_reason: None,
    })
}
