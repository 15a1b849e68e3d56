// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Orchestrator Service: job creation, lifecycle transitions, and
//! read-only queries. Holds no per-job execution state — that lives in
//! [`crate::Executor`], which a [`crate::WorkerPool`] drives per queued job.

use forge_agent_client::AgentClient;
use forge_core::{
    requirement_hash, ExecutionPlan, FileCategory, ForgeError, HashedFile, Job, JobContext,
    JobEvent, JobStatus, OutputContract,
};
use forge_repository::{JobRepository, NewJob, NewJobFile};
use forge_skills::SkillCatalog;
use forge_workspace::Workspace;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::worker::JobQueue;

/// One file supplied at job creation.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Original filename as supplied by the caller.
    pub filename: String,
    /// Raw file bytes.
    pub bytes: Vec<u8>,
    /// Best-effort MIME type, if known.
    pub mime: Option<String>,
}

/// Parameters accepted by [`OrchestratorService::create_job`].
#[derive(Debug, Clone)]
pub struct CreateJobRequest {
    /// Free-form natural-language requirement.
    pub requirement: String,
    /// Input files to attach to the job's workspace.
    pub files: Vec<UploadedFile>,
    /// Manual skill override, bypassing the router.
    pub skill_code: Option<String>,
    /// Coding agent name; falls back to the configured default.
    pub agent: Option<String>,
    /// Model provider id, paired with `model_id` or both absent.
    pub model_provider_id: Option<String>,
    /// Model id, paired with `model_provider_id` or both absent.
    pub model_id: Option<String>,
    /// Overrides the selected skill's default output contract.
    pub output_contract: Option<OutputContract>,
    /// Caller-supplied dedup key.
    pub idempotency_key: Option<String>,
    /// Tenant tag; falls back to the configured default.
    pub tenant: Option<String>,
    /// Creator tag; falls back to the configured default.
    pub created_by: Option<String>,
}

/// A skill's catalog entry as surfaced by `GET /skills`.
#[derive(Debug, Clone)]
pub struct SkillDescriptor {
    /// Stable machine-readable identifier.
    pub code: String,
    /// Human-facing display name.
    pub name: String,
    /// Alternate names the router also recognizes.
    pub aliases: Vec<String>,
    /// Skill implementation version.
    pub version: String,
    /// Execution-plan schema version this skill targets.
    pub schema_version: u32,
    /// Human-readable description.
    pub description: String,
    /// Broad task family.
    pub task_type: String,
    /// The output contract a job using this skill would get by default.
    pub sample_output_contract: OutputContract,
}

/// Fixed knobs the service needs beyond the repository/catalog/client
/// collaborators — copied out of `ForgeConfig` by the composition root so
/// this crate does not depend on `forge-config` directly.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Root directory under which per-job workspaces are created.
    pub data_root: PathBuf,
    /// Default coding agent name.
    pub default_agent: String,
    /// Minimum router score below which `general-default` is chosen.
    pub skill_fallback_threshold: f64,
    /// Maximum accepted size, in bytes, for a single uploaded input file.
    pub max_upload_file_size_bytes: u64,
    /// Cooperative deadline recorded in the execution plan for observability.
    pub job_soft_timeout_seconds: u64,
    /// Outer kill deadline recorded in the execution plan for observability.
    pub job_hard_timeout_seconds: u64,
    /// Default tenant tag.
    pub default_tenant_id: String,
    /// Default `created_by` tag.
    pub default_created_by: String,
}

/// The job lifecycle service.
pub struct OrchestratorService {
    repository: Arc<dyn JobRepository>,
    catalog: SkillCatalog,
    agent_client: Arc<AgentClient>,
    queue: Arc<dyn JobQueue>,
    settings: ServiceSettings,
}

impl OrchestratorService {
    /// Builds a service over its collaborators — the composition root's job.
    #[must_use]
    pub fn new(
        repository: Arc<dyn JobRepository>,
        catalog: SkillCatalog,
        agent_client: Arc<AgentClient>,
        queue: Arc<dyn JobQueue>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            repository,
            catalog,
            agent_client,
            queue,
            settings,
        }
    }

    /// Creates a job: validates the request, resolves idempotency, creates
    /// the workspace, stores inputs, routes to a skill, builds and persists
    /// the execution plan, and records the job. Returns the existing job
    /// untouched (no new workspace) when an idempotency hit is found.
    pub async fn create_job(&self, request: CreateJobRequest) -> Result<Job, ForgeError> {
        let requirement = request.requirement.trim().to_string();
        if requirement.is_empty() {
            return Err(ForgeError::InvalidArgument(
                "requirement must not be empty".to_string(),
            ));
        }
        if request.files.is_empty() {
            return Err(ForgeError::InvalidArgument(
                "at least one input file is required".to_string(),
            ));
        }
        if request.model_provider_id.is_some() != request.model_id.is_some() {
            return Err(ForgeError::InvalidArgument(
                "model_provider_id and model_id must both be present or both absent".to_string(),
            ));
        }

        let tenant = request
            .tenant
            .unwrap_or_else(|| self.settings.default_tenant_id.clone());
        let created_by = request
            .created_by
            .unwrap_or_else(|| self.settings.default_created_by.clone());

        let hashed: Vec<HashedFile<'_>> = request
            .files
            .iter()
            .map(|f| HashedFile {
                filename: f.filename.as_str(),
                content: f.bytes.as_slice(),
            })
            .collect();
        let req_hash = requirement_hash(&requirement, &hashed);

        if let Some(key) = &request.idempotency_key {
            if let Some(existing) = self
                .repository
                .get_job_by_idempotency(&tenant, key, &req_hash)
                .await?
            {
                return Ok(existing);
            }
        }

        let job_id = Uuid::new_v4();
        let workspace = Workspace::create(&self.settings.data_root, &job_id.to_string())
            .await
            .map_err(|e| ForgeError::Internal(e.to_string()))?;

        let mut stored_files = Vec::with_capacity(request.files.len());
        for file in &request.files {
            let stored = workspace
                .store_input_file(
                    &file.filename,
                    &file.bytes,
                    file.mime.clone(),
                    self.settings.max_upload_file_size_bytes,
                )
                .await
                .map_err(|e| ForgeError::InvalidArgument(e.to_string()))?;
            stored_files.push(stored);
        }

        let input_relative_paths: Vec<String> = stored_files
            .iter()
            .map(|f| f.relative_path.clone())
            .collect();

        let outcome = forge_skills::select(
            &self.catalog,
            &requirement,
            &input_relative_paths,
            request.skill_code.as_deref(),
            self.settings.skill_fallback_threshold,
        )?;

        let agent = request
            .agent
            .unwrap_or_else(|| self.settings.default_agent.clone());

        let ctx = JobContext {
            job_id: job_id.to_string(),
            workspace_root: workspace.root().to_path_buf(),
            requirement: requirement.clone(),
            input_files: input_relative_paths,
            agent: agent.clone(),
            model_provider_id: request.model_provider_id.clone(),
            model_id: request.model_id.clone(),
            output_contract_override: request.output_contract.clone(),
        };

        let mut plan: ExecutionPlan = outcome.skill.build_execution_plan(
            &ctx,
            self.settings.job_soft_timeout_seconds,
            self.settings.job_hard_timeout_seconds,
        );
        if let Some(override_contract) = request.output_contract {
            plan.output_contract = override_contract;
        }

        workspace
            .write_request_markdown(&requirement)
            .await
            .map_err(|e| ForgeError::Internal(e.to_string()))?;
        workspace
            .write_execution_plan(&plan)
            .await
            .map_err(|e| ForgeError::Internal(e.to_string()))?;

        let new_job = NewJob {
            tenant,
            created_by,
            requirement,
            selected_skill: outcome.skill.code().to_string(),
            agent,
            model_provider_id: request.model_provider_id,
            model_id: request.model_id,
            output_contract: plan.output_contract.clone(),
            idempotency_key: request.idempotency_key,
            requirement_hash: req_hash,
            input_files: stored_files
                .into_iter()
                .map(|f| NewJobFile {
                    relative_path: f.relative_path,
                    size_bytes: f.size,
                    sha256: f.sha256,
                    mime: f.mime,
                })
                .collect(),
        };

        let job = self.repository.create_job(new_job).await?;

        if let Some(reason) = outcome.fallback_reason {
            self.repository
                .add_event(
                    job.id,
                    forge_core::EventSource::Api,
                    "skill.router.fallback",
                    None,
                    Some(reason.clone()),
                    serde_json::json!({ "reason": reason }),
                )
                .await?;
        }

        Ok(job)
    }

    /// Enqueues a created (or previously failed) job for execution.
    pub async fn start_job(&self, job_id: Uuid) -> Result<Job, ForgeError> {
        let job = self
            .repository
            .get_job(job_id)
            .await?
            .ok_or_else(|| ForgeError::NotFound(format!("job {job_id}")))?;

        if !matches!(job.status, JobStatus::Created | JobStatus::Failed) {
            return Err(ForgeError::Conflict(format!(
                "job {job_id} cannot be started from status {}",
                job.status
            )));
        }

        self.agent_client
            .health()
            .await
            .map_err(|e| ForgeError::ServiceUnavailable(e.to_string()))?;

        self.repository
            .set_status(job_id, JobStatus::Queued, None, None, true)
            .await?;

        let task_id = self.queue.submit(job_id).await?;
        self.repository
            .add_event(
                job_id,
                forge_core::EventSource::Api,
                "job.enqueued",
                Some(JobStatus::Queued),
                None,
                serde_json::json!({ "task_id": task_id }),
            )
            .await?;

        self.repository
            .get_job(job_id)
            .await?
            .ok_or_else(|| ForgeError::NotFound(format!("job {job_id}")))
    }

    /// Aborts a job. Best-effort notifies the agent runtime if a session is
    /// bound; always marks the job `aborted` (write-once, idempotent).
    pub async fn abort_job(&self, job_id: Uuid) -> Result<Job, ForgeError> {
        let job = self
            .repository
            .get_job(job_id)
            .await?
            .ok_or_else(|| ForgeError::NotFound(format!("job {job_id}")))?;

        if let Some(session_id) = &job.session_id {
            let workspace = Workspace::at(self.settings.data_root.join(job_id.to_string()));
            let directory = workspace.root().to_string_lossy().to_string();
            let _ = self.agent_client.abort_session(&directory, session_id).await;
        }

        self.repository
            .set_status(job_id, JobStatus::Aborted, None, None, true)
            .await?;

        self.repository
            .get_job(job_id)
            .await?
            .ok_or_else(|| ForgeError::NotFound(format!("job {job_id}")))
    }

    /// Fetches a job by id.
    pub async fn get_job(&self, job_id: Uuid) -> Result<Job, ForgeError> {
        self.repository
            .get_job(job_id)
            .await?
            .ok_or_else(|| ForgeError::NotFound(format!("job {job_id}")))
    }

    /// Lists a job's event log after a resume cursor.
    pub async fn list_job_events(
        &self,
        job_id: Uuid,
        after_id: u64,
        limit: usize,
    ) -> Result<Vec<JobEvent>, ForgeError> {
        // Confirms the job exists before paging its events, so callers get a
        // clean `NotFound` instead of an empty list for a bad id.
        self.get_job(job_id).await?;
        Ok(self.repository.list_events(job_id, after_id, limit).await?)
    }

    /// Lists a job's output and bundle artifacts (excludes inputs and logs).
    pub async fn list_artifacts(&self, job_id: Uuid) -> Result<Vec<forge_core::JobFile>, ForgeError> {
        self.get_job(job_id).await?;
        let outputs = self
            .repository
            .list_job_files(job_id, Some(FileCategory::Output))
            .await?;
        let bundle = self
            .repository
            .list_job_files(job_id, Some(FileCategory::Bundle))
            .await?;
        Ok(outputs.into_iter().chain(bundle).collect())
    }

    /// Resolves the absolute path to a job's packaged bundle, if built.
    pub async fn get_bundle_path(&self, job_id: Uuid) -> Result<PathBuf, ForgeError> {
        let job = self.get_job(job_id).await?;
        let relative = job
            .result_bundle_path
            .ok_or_else(|| ForgeError::NotFound(format!("job {job_id} has no bundle yet")))?;
        Ok(self.settings.data_root.join(job_id.to_string()).join(relative))
    }

    /// Resolves the absolute path to one output or bundle artifact.
    pub async fn get_artifact_path(&self, job_id: Uuid, file_id: u64) -> Result<PathBuf, ForgeError> {
        self.get_job(job_id).await?;
        let file = self
            .repository
            .get_job_file(file_id)
            .await?
            .ok_or_else(|| ForgeError::NotFound(format!("job file {file_id}")))?;
        if file.job_id != job_id {
            return Err(ForgeError::NotFound(format!("job file {file_id}")));
        }
        if matches!(file.category, FileCategory::Input | FileCategory::Log) {
            return Err(ForgeError::InvalidArgument(
                "only output and bundle artifacts are downloadable".to_string(),
            ));
        }
        Ok(self
            .settings
            .data_root
            .join(job_id.to_string())
            .join(file.relative_path))
    }

    /// Lists every registered skill, optionally filtered to one task type.
    #[must_use]
    pub fn list_skills(&self, task_type: Option<&str>) -> Vec<SkillDescriptor> {
        self.catalog
            .list(task_type)
            .into_iter()
            .map(|skill| self.describe(skill.as_ref()))
            .collect()
    }

    /// Fetches one skill's descriptor, including a sample output contract.
    pub fn get_skill(&self, code: &str) -> Result<SkillDescriptor, ForgeError> {
        let skill = self
            .catalog
            .get(code)
            .ok_or_else(|| ForgeError::NotFound(format!("skill {code}")))?;
        Ok(self.describe(skill.as_ref()))
    }

    fn describe(&self, skill: &dyn forge_skills::Skill) -> SkillDescriptor {
        let sample_ctx = JobContext::sample(self.settings.default_agent.clone());
        let sample_plan = skill.build_execution_plan(
            &sample_ctx,
            self.settings.job_soft_timeout_seconds,
            self.settings.job_hard_timeout_seconds,
        );
        SkillDescriptor {
            code: skill.code().to_string(),
            name: skill.name().to_string(),
            aliases: skill.aliases().iter().map(|s| (*s).to_string()).collect(),
            version: skill.version().to_string(),
            schema_version: skill.schema_version(),
            description: skill.description().to_string(),
            task_type: skill.task_type().to_string(),
            sample_output_contract: sample_plan.output_contract,
        }
    }
}

