// SPDX-License-Identifier: MIT OR Apache-2.0
//! Reference implementation of the job repository contract.
//!
//! The distilled spec scopes "the relational persistence engine itself" out
//! of core — this crate implements the *contract* ([`JobRepository`]) as an
//! in-memory, lock-guarded store keyed the way the original ORM tables were
//! (`jobs`, `job_files`, `job_events`, `permission_actions`,
//! `idempotency_records`). A real deployment swaps this for a SQL-backed
//! implementation behind the same trait; the in-memory implementation here
//! is also the reference used by every integration test.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod memory;

pub use memory::InMemoryJobRepository;

use async_trait::async_trait;
use forge_core::{
    EventSource, FileCategory, ForgeError, Job, JobEvent, JobFile, JobStatus, OutputContract,
    PermissionAction,
};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Errors raised by a [`JobRepository`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// No row exists for the given job id.
    #[error("job not found: {0}")]
    JobNotFound(Uuid),
    /// No row exists for the given file id.
    #[error("job file not found: {0}")]
    FileNotFound(u64),
    /// Idempotency dedup would violate the one-triple-one-job invariant.
    #[error("idempotency conflict for tenant={tenant} key={key}")]
    IdempotencyConflict {
        /// Tenant tag.
        tenant: String,
        /// Caller-supplied idempotency key.
        key: String,
    },
}

impl From<RepositoryError> for ForgeError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::JobNotFound(id) => ForgeError::NotFound(format!("job {id}")),
            RepositoryError::FileNotFound(id) => ForgeError::NotFound(format!("job file {id}")),
            RepositoryError::IdempotencyConflict { tenant, key } => {
                ForgeError::Internal(format!("idempotency conflict for {tenant}/{key}"))
            }
        }
    }
}

/// Input bundle for [`JobRepository::create_job`].
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Tenant tag.
    pub tenant: String,
    /// Free-form creator tag.
    pub created_by: String,
    /// Trimmed requirement text.
    pub requirement: String,
    /// Skill code selected by the router.
    pub selected_skill: String,
    /// Coding agent name.
    pub agent: String,
    /// Optional model provider id.
    pub model_provider_id: Option<String>,
    /// Optional model id.
    pub model_id: Option<String>,
    /// Output contract copied from the execution plan.
    pub output_contract: OutputContract,
    /// Caller-supplied idempotency key, if any.
    pub idempotency_key: Option<String>,
    /// SHA-256 requirement hash (see `forge_core::requirement_hash`).
    pub requirement_hash: String,
    /// Input files to register alongside the job, already stored on disk.
    pub input_files: Vec<NewJobFile>,
}

/// One input file row to insert alongside [`NewJob`].
#[derive(Debug, Clone)]
pub struct NewJobFile {
    /// Path relative to the workspace root, e.g. `inputs/notes.txt`.
    pub relative_path: String,
    /// Size in bytes.
    pub size_bytes: u64,
    /// SHA-256 hex digest.
    pub sha256: String,
    /// Best-effort MIME type.
    pub mime: Option<String>,
}

/// Durable store of jobs, their files, their event log, permission actions,
/// and idempotency records.
///
/// Every method that mutates more than one logical row is transactional:
/// the in-memory implementation achieves this by holding a single write
/// lock across the whole operation; a SQL-backed implementation would use a
/// database transaction.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Fetches a job by id.
    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, RepositoryError>;

    /// Fetches a job by its idempotency triple.
    async fn get_job_by_idempotency(
        &self,
        tenant: &str,
        key: &str,
        requirement_hash: &str,
    ) -> Result<Option<Job>, RepositoryError>;

    /// Creates a job, its input file rows, and (if a key was given) its
    /// idempotency record, then appends a `job.created` event — all inside
    /// one transaction. Re-checks idempotency inside the transaction so
    /// concurrent duplicate creates race-safely converge on one job.
    async fn create_job(&self, new_job: NewJob) -> Result<Job, RepositoryError>;

    /// Appends one event, returning it with its assigned id.
    async fn add_event(
        &self,
        job_id: Uuid,
        source: EventSource,
        event_type: &str,
        status: Option<JobStatus>,
        message: Option<String>,
        payload: Value,
    ) -> Result<JobEvent, RepositoryError>;

    /// Lists events with id strictly greater than `after_id`, oldest first,
    /// capped at `limit`.
    async fn list_events(
        &self,
        job_id: Uuid,
        after_id: u64,
        limit: usize,
    ) -> Result<Vec<JobEvent>, RepositoryError>;

    /// Updates a job's status. Refuses to overwrite `Aborted` with anything
    /// except `Aborted`; returns `false` (without error) when refused —
    /// callers use this as the cooperative-abort signal. When `emit_event`
    /// is set and the transition is applied, appends `job.status.changed`.
    async fn set_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        error_code: Option<String>,
        error_message: Option<String>,
        emit_event: bool,
    ) -> Result<bool, RepositoryError>;

    /// Records the session id bound to a job and appends
    /// `opencode.session.created`.
    async fn set_session_id(&self, job_id: Uuid, session_id: &str) -> Result<(), RepositoryError>;

    /// Records one permission decision.
    async fn add_permission_action(
        &self,
        job_id: Uuid,
        request_id: &str,
        action: &str,
        actor: &str,
    ) -> Result<PermissionAction, RepositoryError>;

    /// Records the path to a job's packaged bundle.
    async fn set_result_bundle(&self, job_id: Uuid, path: &str) -> Result<(), RepositoryError>;

    /// Inserts or refreshes a `(job_id, category, relative_path)` row.
    async fn upsert_job_file(
        &self,
        job_id: Uuid,
        category: FileCategory,
        relative_path: &str,
        mime: Option<String>,
        size_bytes: u64,
        sha256: &str,
    ) -> Result<JobFile, RepositoryError>;

    /// Lists a job's files, optionally filtered to one category.
    async fn list_job_files(
        &self,
        job_id: Uuid,
        category: Option<FileCategory>,
    ) -> Result<Vec<JobFile>, RepositoryError>;

    /// Fetches a single file row by id.
    async fn get_job_file(&self, file_id: u64) -> Result<Option<JobFile>, RepositoryError>;
}

/// Builds the `{selected_skill}` payload used by the `job.created` event.
#[must_use]
pub fn job_created_payload(selected_skill: &str) -> Value {
    let mut map = BTreeMap::new();
    map.insert("selected_skill", selected_skill);
    serde_json::to_value(map).expect("string map always serializes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_core::OutputContract;

    fn sample_new_job(idempotency_key: Option<&str>) -> NewJob {
        NewJob {
            tenant: "default".to_string(),
            created_by: "system".to_string(),
            requirement: "help me".to_string(),
            selected_skill: "general-default".to_string(),
            agent: "build".to_string(),
            model_provider_id: None,
            model_id: None,
            output_contract: OutputContract::default(),
            idempotency_key: idempotency_key.map(str::to_string),
            requirement_hash: "deadbeef".to_string(),
            input_files: vec![NewJobFile {
                relative_path: "inputs/notes.txt".to_string(),
                size_bytes: 6,
                sha256: "abc123".to_string(),
                mime: None,
            }],
        }
    }

    #[tokio::test]
    async fn create_job_inserts_job_and_input_rows_and_created_event() {
        let repo = InMemoryJobRepository::new();
        let job = repo.create_job(sample_new_job(None)).await.unwrap();
        assert_eq!(job.status, JobStatus::Created);

        let files = repo.list_job_files(job.id, None).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "inputs/notes.txt");

        let events = repo.list_events(job.id, 0, 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "job.created");
        assert_eq!(events[0].id, 1);
    }

    #[tokio::test]
    async fn idempotent_create_returns_same_job() {
        let repo = InMemoryJobRepository::new();
        let first = repo.create_job(sample_new_job(Some("abc"))).await.unwrap();
        let second = repo.create_job(sample_new_job(Some("abc"))).await.unwrap();
        assert_eq!(first.id, second.id);

        let events = repo.list_events(first.id, 0, 100).await.unwrap();
        assert_eq!(
            events.iter().filter(|e| e.event_type == "job.created").count(),
            1
        );
    }

    #[tokio::test]
    async fn aborted_status_cannot_be_overwritten() {
        let repo = InMemoryJobRepository::new();
        let job = repo.create_job(sample_new_job(None)).await.unwrap();
        let changed = repo
            .set_status(job.id, JobStatus::Aborted, None, None, true)
            .await
            .unwrap();
        assert!(changed);

        let refused = repo
            .set_status(job.id, JobStatus::Running, None, None, true)
            .await
            .unwrap();
        assert!(!refused);

        let current = repo.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(current.status, JobStatus::Aborted);
    }

    #[tokio::test]
    async fn succeeded_to_aborted_transition_is_permitted() {
        let repo = InMemoryJobRepository::new();
        let job = repo.create_job(sample_new_job(None)).await.unwrap();
        repo.set_status(job.id, JobStatus::Succeeded, None, None, true)
            .await
            .unwrap();
        let changed = repo
            .set_status(job.id, JobStatus::Aborted, None, None, true)
            .await
            .unwrap();
        assert!(changed);
    }

    #[tokio::test]
    async fn event_ids_are_strictly_increasing_per_job() {
        let repo = InMemoryJobRepository::new();
        let job = repo.create_job(sample_new_job(None)).await.unwrap();
        for i in 0..5 {
            repo.add_event(
                job.id,
                EventSource::Worker,
                "probe",
                None,
                None,
                serde_json::json!({ "i": i }),
            )
            .await
            .unwrap();
        }
        let events = repo.list_events(job.id, 0, 100).await.unwrap();
        let ids: Vec<u64> = events.iter().map(|e| e.id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
        for pair in ids.windows(2) {
            assert!(pair[1] > pair[0]);
        }
    }

    #[tokio::test]
    async fn upsert_job_file_refreshes_in_place() {
        let repo = InMemoryJobRepository::new();
        let job = repo.create_job(sample_new_job(None)).await.unwrap();
        let first = repo
            .upsert_job_file(job.id, FileCategory::Output, "outputs/r.txt", None, 3, "a")
            .await
            .unwrap();
        let second = repo
            .upsert_job_file(job.id, FileCategory::Output, "outputs/r.txt", None, 5, "b")
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        let rows = repo
            .list_job_files(job.id, Some(FileCategory::Output))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sha256, "b");
        assert_eq!(rows[0].size_bytes, 5);
    }

    #[tokio::test]
    async fn list_events_after_id_resumes_correctly() {
        let repo = InMemoryJobRepository::new();
        let job = repo.create_job(sample_new_job(None)).await.unwrap();
        repo.add_event(job.id, EventSource::Worker, "a", None, None, Value::Null)
            .await
            .unwrap();
        repo.add_event(job.id, EventSource::Worker, "b", None, None, Value::Null)
            .await
            .unwrap();
        let all = repo.list_events(job.id, 0, 100).await.unwrap();
        let resumed = repo.list_events(job.id, all[0].id, 100).await.unwrap();
        assert_eq!(resumed.len(), all.len() - 1);
    }
}
