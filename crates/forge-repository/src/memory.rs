use crate::{JobRepository, NewJob, RepositoryError};
use async_trait::async_trait;
use chrono::Utc;
use forge_core::{EventSource, FileCategory, Job, JobEvent, JobFile, JobStatus, PermissionAction};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct State {
    jobs: HashMap<Uuid, Job>,
    files: HashMap<Uuid, Vec<JobFile>>,
    events: HashMap<Uuid, Vec<JobEvent>>,
    next_event_id: HashMap<Uuid, u64>,
    next_file_id: u64,
    files_by_id: HashMap<u64, (Uuid, usize)>,
    permission_actions: HashMap<Uuid, Vec<PermissionAction>>,
    next_permission_id: u64,
    idempotency: HashMap<(String, String, String), Uuid>,
}

/// In-memory, `tokio::sync::RwLock`-guarded implementation of
/// [`JobRepository`]. Holds the write lock for the full duration of any
/// operation that must be transactional, matching the "one method call =
/// one transaction scope" rule from the concurrency model.
#[derive(Clone, Default)]
pub struct InMemoryJobRepository {
    state: Arc<RwLock<State>>,
}

impl InMemoryJobRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn push_event(
    state: &mut State,
    job_id: Uuid,
    source: EventSource,
    event_type: &str,
    status: Option<JobStatus>,
    message: Option<String>,
    payload: Value,
) -> JobEvent {
    let id = state
        .next_event_id
        .entry(job_id)
        .and_modify(|n| *n += 1)
        .or_insert(1);
    let event = JobEvent {
        id: *id,
        job_id,
        source,
        event_type: event_type.to_string(),
        status,
        message,
        payload,
        created_at: Utc::now(),
    };
    state.events.entry(job_id).or_default().push(event.clone());
    event
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, RepositoryError> {
        Ok(self.state.read().await.jobs.get(&id).cloned())
    }

    async fn get_job_by_idempotency(
        &self,
        tenant: &str,
        key: &str,
        requirement_hash: &str,
    ) -> Result<Option<Job>, RepositoryError> {
        let state = self.state.read().await;
        let triple = (tenant.to_string(), key.to_string(), requirement_hash.to_string());
        Ok(state
            .idempotency
            .get(&triple)
            .and_then(|id| state.jobs.get(id))
            .cloned())
    }

    async fn create_job(&self, new_job: NewJob) -> Result<Job, RepositoryError> {
        let mut state = self.state.write().await;

        if let Some(key) = &new_job.idempotency_key {
            let triple = (
                new_job.tenant.clone(),
                key.clone(),
                new_job.requirement_hash.clone(),
            );
            if let Some(existing_id) = state.idempotency.get(&triple).copied() {
                // Race-safe: another writer beat us to it under the same lock
                // acquisition ordering; return the job that already exists.
                return Ok(state.jobs[&existing_id].clone());
            }
        }

        let job_id = Uuid::new_v4();
        let now = Utc::now();
        let job = Job {
            id: job_id,
            tenant: new_job.tenant.clone(),
            created_by: new_job.created_by,
            requirement: new_job.requirement,
            selected_skill: new_job.selected_skill.clone(),
            agent: new_job.agent,
            model_provider_id: new_job.model_provider_id,
            model_id: new_job.model_id,
            output_contract: new_job.output_contract,
            status: JobStatus::Created,
            session_id: None,
            result_bundle_path: None,
            error_code: None,
            error_message: None,
            idempotency_key: new_job.idempotency_key.clone(),
            requirement_hash: new_job.requirement_hash.clone(),
            created_at: now,
            updated_at: now,
        };
        state.jobs.insert(job_id, job.clone());

        let mut rows = Vec::with_capacity(new_job.input_files.len());
        for f in &new_job.input_files {
            state.next_file_id += 1;
            let id = state.next_file_id;
            let row = JobFile {
                id,
                job_id,
                category: FileCategory::Input,
                relative_path: f.relative_path.clone(),
                size_bytes: f.size_bytes,
                sha256: f.sha256.clone(),
                mime: f.mime.clone(),
                created_at: now,
            };
            rows.push(row);
        }
        let file_list = state.files.entry(job_id).or_default();
        for row in rows {
            file_list.push(row);
            let idx = file_list.len() - 1;
            state.files_by_id.insert(file_list[idx].id, (job_id, idx));
        }

        if let Some(key) = new_job.idempotency_key {
            let triple = (new_job.tenant, key, new_job.requirement_hash);
            state.idempotency.insert(triple, job_id);
        }

        push_event(
            &mut state,
            job_id,
            EventSource::Api,
            "job.created",
            None,
            None,
            crate::job_created_payload(&new_job.selected_skill),
        );

        Ok(job)
    }

    async fn add_event(
        &self,
        job_id: Uuid,
        source: EventSource,
        event_type: &str,
        status: Option<JobStatus>,
        message: Option<String>,
        payload: Value,
    ) -> Result<JobEvent, RepositoryError> {
        let mut state = self.state.write().await;
        if !state.jobs.contains_key(&job_id) {
            return Err(RepositoryError::JobNotFound(job_id));
        }
        Ok(push_event(
            &mut state, job_id, source, event_type, status, message, payload,
        ))
    }

    async fn list_events(
        &self,
        job_id: Uuid,
        after_id: u64,
        limit: usize,
    ) -> Result<Vec<JobEvent>, RepositoryError> {
        let state = self.state.read().await;
        let events = state.events.get(&job_id).cloned().unwrap_or_default();
        Ok(events
            .into_iter()
            .filter(|e| e.id > after_id)
            .take(limit)
            .collect())
    }

    async fn set_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        error_code: Option<String>,
        error_message: Option<String>,
        emit_event: bool,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or(RepositoryError::JobNotFound(job_id))?;

        if job.status == JobStatus::Aborted && status != JobStatus::Aborted {
            return Ok(false);
        }

        job.status = status;
        job.error_code = error_code;
        job.error_message = error_message;
        job.updated_at = Utc::now();

        if emit_event {
            push_event(
                &mut state,
                job_id,
                EventSource::Worker,
                "job.status.changed",
                Some(status),
                None,
                serde_json::json!({ "status": status }),
            );
        }
        Ok(true)
    }

    async fn set_session_id(&self, job_id: Uuid, session_id: &str) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        {
            let job = state
                .jobs
                .get_mut(&job_id)
                .ok_or(RepositoryError::JobNotFound(job_id))?;
            job.session_id = Some(session_id.to_string());
            job.updated_at = Utc::now();
        }
        push_event(
            &mut state,
            job_id,
            EventSource::Worker,
            "opencode.session.created",
            None,
            None,
            serde_json::json!({ "session_id": session_id }),
        );
        Ok(())
    }

    async fn add_permission_action(
        &self,
        job_id: Uuid,
        request_id: &str,
        action: &str,
        actor: &str,
    ) -> Result<PermissionAction, RepositoryError> {
        let mut state = self.state.write().await;
        if !state.jobs.contains_key(&job_id) {
            return Err(RepositoryError::JobNotFound(job_id));
        }
        state.next_permission_id += 1;
        let row = PermissionAction {
            id: state.next_permission_id,
            job_id,
            request_id: request_id.to_string(),
            action: action.to_string(),
            actor: actor.to_string(),
            created_at: Utc::now(),
        };
        state
            .permission_actions
            .entry(job_id)
            .or_default()
            .push(row.clone());
        Ok(row)
    }

    async fn set_result_bundle(&self, job_id: Uuid, path: &str) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or(RepositoryError::JobNotFound(job_id))?;
        job.result_bundle_path = Some(path.to_string());
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn upsert_job_file(
        &self,
        job_id: Uuid,
        category: FileCategory,
        relative_path: &str,
        mime: Option<String>,
        size_bytes: u64,
        sha256: &str,
    ) -> Result<JobFile, RepositoryError> {
        let mut state = self.state.write().await;
        if !state.jobs.contains_key(&job_id) {
            return Err(RepositoryError::JobNotFound(job_id));
        }
        let now = Utc::now();

        let existing_idx = state
            .files
            .get(&job_id)
            .and_then(|rows| {
                rows.iter()
                    .position(|r| r.category == category && r.relative_path == relative_path)
            });

        if let Some(idx) = existing_idx {
            let rows = state.files.get_mut(&job_id).expect("job present");
            let row = &mut rows[idx];
            row.size_bytes = size_bytes;
            row.sha256 = sha256.to_string();
            row.mime = mime;
            row.created_at = now;
            return Ok(row.clone());
        }

        state.next_file_id += 1;
        let id = state.next_file_id;
        let row = JobFile {
            id,
            job_id,
            category,
            relative_path: relative_path.to_string(),
            size_bytes,
            sha256: sha256.to_string(),
            mime,
            created_at: now,
        };
        let rows = state.files.entry(job_id).or_default();
        rows.push(row.clone());
        let idx = rows.len() - 1;
        state.files_by_id.insert(id, (job_id, idx));
        Ok(row)
    }

    async fn list_job_files(
        &self,
        job_id: Uuid,
        category: Option<FileCategory>,
    ) -> Result<Vec<JobFile>, RepositoryError> {
        let state = self.state.read().await;
        let rows = state.files.get(&job_id).cloned().unwrap_or_default();
        Ok(match category {
            Some(c) => rows.into_iter().filter(|r| r.category == c).collect(),
            None => rows,
        })
    }

    async fn get_job_file(&self, file_id: u64) -> Result<Option<JobFile>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .files_by_id
            .get(&file_id)
            .and_then(|(job_id, idx)| state.files.get(job_id).and_then(|rows| rows.get(*idx)))
            .cloned())
    }
}
