// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Job Executor: the state machine that drives one job from `running`
//! through to a terminal status by talking to the external coding-agent
//! runtime.
//!
//! An aborted job surfaces as `Err(ForgeError::Aborted)` from an inner
//! `Result`-returning call chain, propagated by `?` rather than unwound by a
//! panic. The one outer `run` entry point catches that variant and records
//! the terminal `aborted` status; every other error is recorded as `failed`.

use forge_agent_client::{AgentClient, ClientError, ModelSelector};
use forge_core::{EventSource, ExecutionPlan, FileCategory, ForgeError, Job, JobContext, JobFile, JobStatus};
use forge_event_bridge::SseEvent;
use forge_repository::JobRepository;
use forge_skills::SkillCatalog;
use forge_workspace::{sha256_file, Workspace};
use futures::StreamExt;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Timeouts and knobs the executor needs beyond its collaborators.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    /// Cooperative deadline for the completion wait loop.
    pub job_soft_timeout_seconds: u64,
    /// How long the executor waits in `waiting_approval` before giving up.
    pub permission_wait_timeout_seconds: u64,
    /// Read timeout applied to each open of the agent runtime's SSE feed.
    pub stream_read_timeout_seconds: u64,
    /// Redaction policy applied to freeform text before it reaches a
    /// `tracing` event (error messages, agent replies, permission previews).
    pub log_redaction_mode: forge_config::LogRedactionMode,
    /// Maximum characters of a payload preview kept in a log line.
    pub log_payload_preview_chars: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            job_soft_timeout_seconds: 900,
            permission_wait_timeout_seconds: 120,
            stream_read_timeout_seconds: 10,
            log_redaction_mode: forge_config::LogRedactionMode::default(),
            log_payload_preview_chars: 2000,
        }
    }
}

/// Drives one job's execution against the coding-agent runtime.
pub struct Executor {
    repository: Arc<dyn JobRepository>,
    catalog: SkillCatalog,
    agent_client: Arc<AgentClient>,
    data_root: PathBuf,
    config: ExecutorConfig,
}

impl Executor {
    /// Builds an executor over its collaborators.
    #[must_use]
    pub fn new(
        repository: Arc<dyn JobRepository>,
        catalog: SkillCatalog,
        agent_client: Arc<AgentClient>,
        data_root: PathBuf,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            repository,
            catalog,
            agent_client,
            data_root,
            config,
        }
    }

    /// Runs a job to completion (or to a recorded terminal failure/abort).
    /// Never returns `Err` for an abort — aborts are recorded and folded
    /// into `Ok(())` so the worker pool does not retry them. Other errors
    /// are recorded as `failed` and also returned, so the worker's retry
    /// policy can act on transient ones.
    pub async fn run(&self, job_id: Uuid) -> Result<(), ForgeError> {
        match self.run_inner(job_id).await {
            Ok(()) => Ok(()),
            Err(ForgeError::Aborted) => {
                self.set_status_traced(job_id, JobStatus::Aborted, None, None, true)
                    .await?;
                self.repository
                    .add_event(
                        job_id,
                        EventSource::Worker,
                        "job.aborted",
                        Some(JobStatus::Aborted),
                        None,
                        Value::Null,
                    )
                    .await?;
                Ok(())
            }
            Err(other) => {
                let message = other.to_string();
                tracing::error!(job_id = %job_id, error = %self.redact(&message), "job execution failed");
                self.set_status_traced(
                    job_id,
                    JobStatus::Failed,
                    Some("job_execution_failed".to_string()),
                    Some(message.clone()),
                    true,
                )
                .await?;
                self.repository
                    .add_event(
                        job_id,
                        EventSource::Worker,
                        "job.failed",
                        Some(JobStatus::Failed),
                        Some(message),
                        Value::Null,
                    )
                    .await?;
                Err(other)
            }
        }
    }

    /// Best-effort terminal marker used by the worker pool when a job's
    /// hard timeout elapses without the executor self-terminating.
    pub async fn force_timeout_failure(&self, job_id: Uuid) -> Result<(), ForgeError> {
        tracing::warn!(job_id = %job_id, "job hard timeout exceeded, forcing terminal failure");
        self.set_status_traced(
            job_id,
            JobStatus::Failed,
            Some("job_execution_timeout".to_string()),
            Some("hard timeout exceeded".to_string()),
            true,
        )
        .await?;
        self.repository
            .add_event(
                job_id,
                EventSource::Worker,
                "job.failed",
                Some(JobStatus::Failed),
                Some("hard timeout exceeded".to_string()),
                Value::Null,
            )
            .await?;
        Ok(())
    }

    async fn run_inner(&self, job_id: Uuid) -> Result<(), ForgeError> {
        tracing::info!(job_id = %job_id, "starting job execution");
        let job = self.fetch(job_id).await?;
        if job.status == JobStatus::Aborted {
            return Ok(());
        }

        let workspace = Workspace::at(self.data_root.join(job_id.to_string()));
        let directory = workspace.root().to_string_lossy().to_string();

        let skill = self
            .catalog
            .get(&job.selected_skill)
            .ok_or_else(|| ForgeError::Internal(format!("unknown skill: {}", job.selected_skill)))?;
        let plan = self.load_execution_plan(&workspace).await?;

        let changed = self
            .set_status_traced(job_id, JobStatus::Running, None, None, true)
            .await?;
        if !changed {
            return Err(ForgeError::Aborted);
        }

        let session_id = self
            .agent_client
            .create_session(&directory, &format!("job-{job_id}"))
            .await
            .map_err(|e| self.classify(e))?;
        tracing::debug!(job_id = %job_id, session_id = %session_id, "agent session created");
        self.repository.set_session_id(job_id, &session_id).await?;

        if self.fetch(job_id).await?.status == JobStatus::Aborted {
            let _ = self.agent_client.abort_session(&directory, &session_id).await;
            return Err(ForgeError::Aborted);
        }

        let input_files = self
            .repository
            .list_job_files(job_id, Some(FileCategory::Input))
            .await?;
        let ctx = JobContext {
            job_id: job_id.to_string(),
            workspace_root: workspace.root().to_path_buf(),
            requirement: job.requirement.clone(),
            input_files: input_files.iter().map(|f| f.relative_path.clone()).collect(),
            agent: job.agent.clone(),
            model_provider_id: job.model_provider_id.clone(),
            model_id: job.model_id.clone(),
            output_contract_override: None,
        };
        let prompt = skill.build_prompt(&ctx, &plan);
        let model = match (&job.model_provider_id, &job.model_id) {
            (Some(provider_id), Some(model_id)) => Some(ModelSelector {
                provider_id: provider_id.clone(),
                model_id: model_id.clone(),
            }),
            _ => None,
        };
        self.agent_client
            .prompt_async(&directory, &session_id, &prompt, &job.agent, model)
            .await
            .map_err(|e| self.classify(e))?;
        tracing::debug!(job_id = %job_id, agent = %job.agent, "prompt sent to agent runtime");
        self.repository
            .add_event(
                job_id,
                EventSource::Worker,
                "opencode.prompt_async.sent",
                None,
                None,
                Value::Null,
            )
            .await?;

        self.wait_for_completion(job_id, &directory, &session_id)
            .await?;

        match self.agent_client.get_last_message(&directory, &session_id, 1).await {
            Ok(messages) => {
                let content = messages
                    .into_iter()
                    .next()
                    .and_then(|m| m.content)
                    .unwrap_or_default();
                tracing::debug!(
                    job_id = %job_id,
                    preview = %self.redact(&content),
                    "fetched agent's last message"
                );
                if let Err(e) = workspace.write_last_message(&content).await {
                    self.log_soft_failure(job_id, "opencode.last_message.read.failed", &e.to_string())
                        .await?;
                }
            }
            Err(e) => {
                self.log_soft_failure(job_id, "opencode.last_message.read.failed", &e.to_string())
                    .await?;
            }
        }

        self.set_status_traced(job_id, JobStatus::Verifying, None, None, true)
            .await?;
        self.verify_input_integrity(&workspace, &input_files).await?;
        skill.validate_outputs(&workspace.outputs_dir(), &plan)?;

        self.set_status_traced(job_id, JobStatus::Packaging, None, None, true)
            .await?;
        self.package(job_id, &workspace, &session_id).await?;

        self.set_status_traced(job_id, JobStatus::Succeeded, None, None, true)
            .await?;
        Ok(())
    }

    /// Applies the configured redaction policy to freeform text before it
    /// is attached to a `tracing` event.
    fn redact(&self, text: &str) -> String {
        forge_config::redact::redact(
            self.config.log_redaction_mode,
            self.config.log_payload_preview_chars,
            text,
        )
    }

    async fn set_status_traced(
        &self,
        job_id: Uuid,
        status: JobStatus,
        error_code: Option<String>,
        error_message: Option<String>,
        emit_event: bool,
    ) -> Result<bool, ForgeError> {
        let changed = self
            .repository
            .set_status(job_id, status, error_code, error_message, emit_event)
            .await?;
        tracing::info!(job_id = %job_id, %status, changed, "job status transition");
        Ok(changed)
    }

    async fn fetch(&self, job_id: Uuid) -> Result<Job, ForgeError> {
        self.repository
            .get_job(job_id)
            .await?
            .ok_or_else(|| ForgeError::NotFound(format!("job {job_id}")))
    }

    async fn log_soft_failure(&self, job_id: Uuid, event_type: &str, message: &str) -> Result<(), ForgeError> {
        self.repository
            .add_event(
                job_id,
                EventSource::Worker,
                event_type,
                None,
                Some(message.to_string()),
                Value::Null,
            )
            .await?;
        Ok(())
    }

    async fn load_execution_plan(&self, workspace: &Workspace) -> Result<ExecutionPlan, ForgeError> {
        let path = workspace.job_dir().join("execution-plan.json");
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| ForgeError::Internal(format!("reading execution plan: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ForgeError::Internal(format!("parsing execution plan: {e}")))
    }

    fn classify(&self, err: ClientError) -> ForgeError {
        if err.is_transient() {
            ForgeError::TransientAgent(err.to_string())
        } else {
            ForgeError::Internal(err.to_string())
        }
    }

    /// Drives the completion wait loop: reopens the agent runtime's SSE feed
    /// as needed, relays `session.*`/`permission.*` events into the job's
    /// event log, runs the permission-handling pass whenever a
    /// `permission.*` event arrives, and syncs completion state (session
    /// status + pending-approval bookkeeping) at least every two seconds of
    /// wall time regardless of event traffic. Returns once the session goes
    /// idle, or an error once the soft timeout or permission-wait timeout
    /// elapses, or once an abort is observed.
    async fn wait_for_completion(
        &self,
        job_id: Uuid,
        directory: &str,
        session_id: &str,
    ) -> Result<(), ForgeError> {
        let deadline = Instant::now() + Duration::from_secs(self.config.job_soft_timeout_seconds);
        let mut approval_wait_started_at: Option<Instant> = None;
        let read_timeout = Duration::from_secs(self.config.stream_read_timeout_seconds);

        loop {
            tracing::debug!(job_id = %job_id, session_id = %session_id, "completion wait loop iteration");
            if Instant::now() >= deadline {
                tracing::warn!(job_id = %job_id, "soft timeout elapsed, aborting agent session");
                let _ = self.agent_client.abort_session(directory, session_id).await;
                return Err(ForgeError::Timeout("job execution soft timeout elapsed".to_string()));
            }
            self.ensure_not_aborted(job_id).await?;

            match self.agent_client.open_event_stream(directory, read_timeout).await {
                Ok(response) => {
                    let byte_stream = response
                        .bytes_stream()
                        .map(|chunk| chunk.map_err(|e| std::io::Error::other(e.to_string())));
                    let reader = tokio::io::BufReader::new(tokio_util::io::StreamReader::new(byte_stream));
                    let mut events =
                        Box::pin(forge_event_bridge::decode_lines(reader));

                    'stream: loop {
                        self.ensure_not_aborted(job_id).await?;
                        match tokio::time::timeout(Duration::from_secs(2), events.next()).await {
                            Ok(Some(Ok(event))) => {
                                self.relay_bridge_event(job_id, directory, session_id, &event)
                                    .await?;
                            }
                            Ok(Some(Err(_read_err))) => break 'stream,
                            Ok(None) => break 'stream,
                            Err(_elapsed) => {}
                        }
                        if self
                            .sync_completion_state(
                                job_id,
                                directory,
                                session_id,
                                &mut approval_wait_started_at,
                            )
                            .await?
                        {
                            return Ok(());
                        }
                        if Instant::now() >= deadline {
                            break 'stream;
                        }
                    }
                }
                Err(e) => {
                    self.log_soft_failure(job_id, "opencode.event.stream.disconnected", &e.to_string())
                        .await?;
                }
            }

            if self
                .sync_completion_state(job_id, directory, session_id, &mut approval_wait_started_at)
                .await?
            {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    async fn ensure_not_aborted(&self, job_id: Uuid) -> Result<(), ForgeError> {
        if self.fetch(job_id).await?.status == JobStatus::Aborted {
            Err(ForgeError::Aborted)
        } else {
            Ok(())
        }
    }

    async fn relay_bridge_event(
        &self,
        job_id: Uuid,
        directory: &str,
        session_id: &str,
        event: &SseEvent,
    ) -> Result<(), ForgeError> {
        let Some(name) = event.event.as_deref() else {
            return Ok(());
        };
        if name.starts_with("session.") || name.starts_with("permission.") {
            let payload = event.json().unwrap_or_else(|| Value::String(event.data.clone()));
            let message = extract_message(&payload);
            self.repository
                .add_event(job_id, EventSource::Opencode, name, None, message, payload)
                .await?;
        }
        if name.starts_with("permission.") {
            self.run_permission_pass(job_id, directory, session_id).await?;
        }
        Ok(())
    }

    /// `list_permissions(directory)`; for each request with a non-empty id:
    /// decide via the policy engine, reply, and record the decision.
    async fn run_permission_pass(
        &self,
        job_id: Uuid,
        directory: &str,
        session_id: &str,
    ) -> Result<(), ForgeError> {
        let workspace_root = self.data_root.join(job_id.to_string());
        let requests = self
            .agent_client
            .list_permissions(directory)
            .await
            .map_err(|e| self.classify(e))?;

        for request in requests {
            if request.id.is_empty() || request.session_id != session_id {
                continue;
            }
            let policy_request = forge_policy::PermissionRequest {
                id: request.id.clone(),
                permission: request.permission.clone(),
                patterns: request.patterns.clone(),
                metadata: forge_policy::PermissionMetadata {
                    command: request.metadata.command.clone(),
                },
            };
            let decision = forge_policy::decide(&policy_request, &workspace_root);
            let reply = decision.reply.as_str();
            tracing::info!(
                job_id = %job_id,
                request_id = %request.id,
                reply,
                permission = %self.redact(&request.permission),
                "permission decision"
            );
            self.agent_client
                .reply_permission(directory, &request.id, reply, decision.message.as_deref())
                .await
                .map_err(|e| self.classify(e))?;
            self.repository
                .add_permission_action(job_id, &request.id, reply, "policy")
                .await?;
            self.repository
                .add_event(
                    job_id,
                    EventSource::Worker,
                    "permission.replied",
                    None,
                    None,
                    serde_json::json!({ "request_id": request.id, "reply": reply }),
                )
                .await?;
        }
        Ok(())
    }

    /// Runs the permission-handling pass, then checks session status (idle
    /// means done) and pending-approval bookkeeping. Returns `Ok(true)` when
    /// the session has gone idle and execution should proceed past the wait
    /// loop.
    async fn sync_completion_state(
        &self,
        job_id: Uuid,
        directory: &str,
        session_id: &str,
        approval_wait_started_at: &mut Option<Instant>,
    ) -> Result<bool, ForgeError> {
        self.run_permission_pass(job_id, directory, session_id).await?;

        let status_map = self
            .agent_client
            .get_session_status(directory)
            .await
            .map_err(|e| self.classify(e))?;
        if let Some(entry) = status_map.get(session_id) {
            if entry.is_idle() {
                return Ok(true);
            }
            if entry.is_retry() {
                self.repository
                    .add_event(
                        job_id,
                        EventSource::Opencode,
                        "session.retry",
                        None,
                        None,
                        serde_json::to_value(entry).unwrap_or(Value::Null),
                    )
                    .await?;
            }
        }

        let permissions = self
            .agent_client
            .list_permissions(directory)
            .await
            .map_err(|e| self.classify(e))?;
        let waiting_on_approval = permissions.iter().any(|p| p.session_id == session_id);

        if waiting_on_approval {
            match approval_wait_started_at {
                Some(started_at) => {
                    if started_at.elapsed() > Duration::from_secs(self.config.permission_wait_timeout_seconds) {
                        return Err(ForgeError::Timeout("permission wait timeout elapsed".to_string()));
                    }
                }
                None => {
                    *approval_wait_started_at = Some(Instant::now());
                    self.set_status_traced(job_id, JobStatus::WaitingApproval, None, None, true)
                        .await?;
                }
            }
        } else {
            if approval_wait_started_at.take().is_some() {
                let job = self.fetch(job_id).await?;
                if job.status == JobStatus::WaitingApproval {
                    self.set_status_traced(job_id, JobStatus::Running, None, None, true)
                        .await?;
                }
            }
        }

        Ok(false)
    }

    async fn verify_input_integrity(
        &self,
        workspace: &Workspace,
        input_files: &[JobFile],
    ) -> Result<(), ForgeError> {
        for file in input_files {
            let absolute = workspace.root().join(&file.relative_path);
            let actual = sha256_file(&absolute).await.map_err(|_| {
                ForgeError::ValidationFailure(format!(
                    "input file modified unexpectedly: {}",
                    file.relative_path
                ))
            })?;
            if actual != file.sha256 {
                return Err(ForgeError::ValidationFailure(format!(
                    "input file modified unexpectedly: {}",
                    file.relative_path
                )));
            }
        }
        Ok(())
    }

    async fn package(&self, job_id: Uuid, workspace: &Workspace, session_id: &str) -> Result<(), ForgeError> {
        let generated_at = chrono::Utc::now();
        let (zip_path, manifest) = forge_artifacts::build_bundle(
            workspace.root(),
            &workspace.bundle_dir(),
            &job_id.to_string(),
            Some(session_id),
            generated_at,
        )
        .map_err(|e| ForgeError::Internal(e.to_string()))?;

        let relative_bundle = "bundle/result.zip".to_string();
        self.repository.set_result_bundle(job_id, &relative_bundle).await?;

        for entry in &manifest.files {
            let relative = format!("outputs/{}", entry.path);
            self.repository
                .upsert_job_file(
                    job_id,
                    FileCategory::Output,
                    &relative,
                    None,
                    entry.size_bytes,
                    &entry.sha256,
                )
                .await?;
        }

        let bundle_sha = sha256_file(&zip_path).await.map_err(|e| ForgeError::Internal(e.to_string()))?;
        let bundle_size = tokio::fs::metadata(&zip_path)
            .await
            .map_err(|e| ForgeError::Internal(e.to_string()))?
            .len();
        self.repository
            .upsert_job_file(
                job_id,
                FileCategory::Bundle,
                &relative_bundle,
                Some("application/zip".to_string()),
                bundle_size,
                &bundle_sha,
            )
            .await?;

        let last_message_path = workspace.logs_dir().join("opencode-last-message.md");
        if last_message_path.is_file() {
            let sha = sha256_file(&last_message_path)
                .await
                .map_err(|e| ForgeError::Internal(e.to_string()))?;
            let size = tokio::fs::metadata(&last_message_path)
                .await
                .map_err(|e| ForgeError::Internal(e.to_string()))?
                .len();
            self.repository
                .upsert_job_file(
                    job_id,
                    FileCategory::Log,
                    "logs/opencode-last-message.md",
                    Some("text/markdown".to_string()),
                    size,
                    &sha,
                )
                .await?;
        }

        Ok(())
    }
}

fn extract_message(payload: &Value) -> Option<String> {
    if let Some(s) = payload.get("message").and_then(Value::as_str) {
        return Some(s.to_string());
    }
    if let Some(s) = payload.get("type").and_then(Value::as_str) {
        return Some(s.to_string());
    }
    if let Value::String(s) = payload {
        return Some(s.clone());
    }
    None
}
