use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a [`Job`].
///
/// Transitions are monotonic: once a job reaches [`JobStatus::Aborted`], no
/// other status may overwrite it. Once it reaches [`JobStatus::Succeeded`] or
/// [`JobStatus::Failed`], only [`JobStatus::Aborted`] may overwrite it — see
/// the write-once guard in `forge-repository::set_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created but not yet enqueued.
    Created,
    /// Enqueued, waiting for a worker.
    Queued,
    /// A worker is actively driving the agent runtime.
    Running,
    /// The executor is blocked on a tool-use permission request.
    WaitingApproval,
    /// The agent session went idle; input integrity and output contract are
    /// being checked.
    Verifying,
    /// Outputs are being bundled into the deliverable archive.
    Packaging,
    /// Terminal: the job produced a valid bundle.
    Succeeded,
    /// Terminal: the job could not complete.
    Failed,
    /// Terminal: the job was cancelled. Write-once — cannot be overwritten.
    Aborted,
}

impl JobStatus {
    /// Returns `true` for any of the three terminal statuses.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Aborted)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::WaitingApproval => "waiting_approval",
            Self::Verifying => "verifying",
            Self::Packaging => "packaging",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Category of a physical file tracked under a job's workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCategory {
    /// A file supplied by the caller at job creation.
    Input,
    /// A file produced by the agent under `outputs/`.
    Output,
    /// The packaged deliverable (`bundle/result.zip`, `bundle/manifest.json`).
    Bundle,
    /// An auxiliary log artifact (e.g. the last agent message).
    Log,
}

impl std::fmt::Display for FileCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Input => "input",
            Self::Output => "output",
            Self::Bundle => "bundle",
            Self::Log => "log",
        };
        f.write_str(s)
    }
}

/// A job: one request to produce a deliverable from a requirement and a set
/// of input files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier.
    pub id: Uuid,
    /// Tenant tag (no multi-tenancy enforcement beyond this label).
    pub tenant: String,
    /// Who created the job (free-form, e.g. `"system"` or a user id).
    pub created_by: String,
    /// The trimmed requirement text supplied by the caller.
    pub requirement: String,
    /// Code of the skill selected to serve this job.
    pub selected_skill: String,
    /// Name of the coding agent the executor will ask the runtime to use.
    pub agent: String,
    /// Optional model provider id (paired with `model_id`, or both absent).
    pub model_provider_id: Option<String>,
    /// Optional model id (paired with `model_provider_id`, or both absent).
    pub model_id: Option<String>,
    /// The output contract the executor enforces at verification time.
    pub output_contract: OutputContractOwned,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Session id bound to this job by the external agent runtime, if any.
    pub session_id: Option<String>,
    /// Path to the packaged bundle, relative to the data root, once built.
    pub result_bundle_path: Option<String>,
    /// Machine-readable error code, set when `status == Failed`.
    pub error_code: Option<String>,
    /// Human-readable error message, set when `status == Failed`.
    pub error_message: Option<String>,
    /// Idempotency key supplied at creation, if any.
    pub idempotency_key: Option<String>,
    /// SHA-256 requirement hash used for idempotency dedup (see
    /// [`crate::requirement_hash`]).
    pub requirement_hash: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the most recent status mutation.
    pub updated_at: DateTime<Utc>,
}

/// Owned variant of [`crate::OutputContract`] stored on a [`Job`] row — the
/// execution plan's output contract is copied here so the repository does
/// not need to deserialize the whole plan JSON to answer "what files does
/// this job require".
pub type OutputContractOwned = crate::OutputContract;

/// Row describing one physical file under a job's workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFile {
    /// Synthetic row id (monotonic per repository instance).
    pub id: u64,
    /// Owning job.
    pub job_id: Uuid,
    /// `input | output | bundle | log`.
    pub category: FileCategory,
    /// Path relative to the job's workspace root, e.g. `inputs/notes.txt`.
    pub relative_path: String,
    /// Size in bytes at the time of (re-)insertion.
    pub size_bytes: u64,
    /// SHA-256 hex digest of the file content at the time of (re-)insertion.
    pub sha256: String,
    /// Best-effort MIME type, if known.
    pub mime: Option<String>,
    /// Insertion (or most recent refresh) timestamp.
    pub created_at: DateTime<Utc>,
}

/// Audit row recorded for every automated permission decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionAction {
    /// Synthetic row id.
    pub id: u64,
    /// Owning job.
    pub job_id: Uuid,
    /// Id of the permission request this decision answers.
    pub request_id: String,
    /// The reply that was sent back to the agent runtime.
    pub action: String,
    /// Who/what made the decision (always `"policy"` for the automated
    /// engine, reserved for future manual overrides).
    pub actor: String,
    /// When the decision was recorded.
    pub created_at: DateTime<Utc>,
}
