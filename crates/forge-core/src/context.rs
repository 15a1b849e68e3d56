use crate::OutputContract;
use std::path::PathBuf;
use uuid::Uuid;

/// Everything a skill needs to score a requirement, build an execution plan,
/// build a prompt, and validate outputs — assembled once by the orchestrator
/// and threaded through skill methods and the executor.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// The owning job's id (or the literal `"sample"` for throwaway contexts
    /// built by `get_skill`'s sample-output-contract preview).
    pub job_id: String,
    /// Absolute path to the job's workspace root.
    pub workspace_root: PathBuf,
    /// Trimmed requirement text.
    pub requirement: String,
    /// Relative paths (e.g. `inputs/notes.txt`) of the job's input files.
    pub input_files: Vec<String>,
    /// Coding agent name the executor will ask the runtime to use.
    pub agent: String,
    /// Optional model provider id.
    pub model_provider_id: Option<String>,
    /// Optional model id.
    pub model_id: Option<String>,
    /// Caller-supplied output contract override, if any. When absent, the
    /// skill's own default (from `build_execution_plan`) applies.
    pub output_contract_override: Option<OutputContract>,
}

impl JobContext {
    /// Builds a throwaway context for a job id that doesn't back a real
    /// workspace — used by `Orchestrator::get_skill` to preview a skill's
    /// sample output contract.
    #[must_use]
    pub fn sample(agent: impl Into<String>) -> Self {
        Self {
            job_id: "sample".to_string(),
            workspace_root: PathBuf::new(),
            requirement: String::new(),
            input_files: Vec::new(),
            agent: agent.into(),
            model_provider_id: None,
            model_id: None,
            output_contract_override: None,
        }
    }

    /// Returns the job id as a [`Uuid`] when it is one (it isn't for
    /// [`JobContext::sample`] contexts).
    #[must_use]
    pub fn job_uuid(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.job_id).ok()
    }
}
