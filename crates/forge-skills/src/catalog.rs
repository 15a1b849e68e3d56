use crate::Skill;
use std::sync::Arc;

/// Registry of skills, preserving registration order (the router's tie
/// break rule relies on this).
#[derive(Clone, Default)]
pub struct SkillCatalog {
    skills: Vec<Arc<dyn Skill>>,
}

impl SkillCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog pre-populated with the three built-in skills, in
    /// the order `general-default, data-analysis, ppt`.
    #[must_use]
    pub fn with_builtin_skills() -> Self {
        let mut catalog = Self::new();
        catalog.register(Arc::new(crate::GeneralDefaultSkill));
        catalog.register(Arc::new(crate::DataAnalysisSkill));
        catalog.register(Arc::new(crate::PptSkill));
        catalog
    }

    /// Registers a skill, appending it to the end of the registration
    /// order.
    pub fn register(&mut self, skill: Arc<dyn Skill>) {
        self.skills.push(skill);
    }

    /// Looks up a skill by its code or any of its aliases.
    #[must_use]
    pub fn get(&self, code: &str) -> Option<Arc<dyn Skill>> {
        self.skills
            .iter()
            .find(|s| s.code() == code || s.aliases().contains(&code))
            .cloned()
    }

    /// Lists all skills, optionally filtered to one `task_type`, in
    /// registration order.
    #[must_use]
    pub fn list(&self, task_type: Option<&str>) -> Vec<Arc<dyn Skill>> {
        self.skills
            .iter()
            .filter(|s| task_type.is_none_or(|t| s.task_type() == t))
            .cloned()
            .collect()
    }

    /// Every non-default skill, in registration order — the set the router
    /// scores when no manual override is given.
    #[must_use]
    pub fn non_default_skills(&self) -> Vec<Arc<dyn Skill>> {
        self.skills
            .iter()
            .filter(|s| s.code() != "general-default")
            .cloned()
            .collect()
    }

    /// The always-usable fallback skill, if registered.
    #[must_use]
    pub fn default_skill(&self) -> Option<Arc<dyn Skill>> {
        self.get("general-default")
    }

    /// Number of registered skills.
    #[must_use]
    pub fn len(&self) -> usize {
        self.skills.len()
    }

    /// `true` when no skills are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_has_three_skills_in_order() {
        let catalog = SkillCatalog::with_builtin_skills();
        let codes: Vec<&str> = catalog.list(None).iter().map(|s| s.code()).collect();
        assert_eq!(codes, ["general-default", "data-analysis", "ppt"]);
    }

    #[test]
    fn get_resolves_by_code() {
        let catalog = SkillCatalog::with_builtin_skills();
        assert!(catalog.get("ppt").is_some());
        assert!(catalog.get("nonexistent").is_none());
    }

    #[test]
    fn non_default_skills_excludes_general_default() {
        let catalog = SkillCatalog::with_builtin_skills();
        let codes: Vec<&str> = catalog
            .non_default_skills()
            .iter()
            .map(|s| s.code())
            .collect();
        assert_eq!(codes, ["data-analysis", "ppt"]);
    }
}
