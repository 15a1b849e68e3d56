use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which component appended a [`JobEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// The HTTP API layer (e.g. on job creation).
    Api,
    /// The worker/executor.
    Worker,
    /// Relayed from the external coding-agent runtime's event stream.
    #[serde(rename = "opencode")]
    Opencode,
}

impl std::fmt::Display for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Api => "api",
            Self::Worker => "worker",
            Self::Opencode => "opencode",
        };
        f.write_str(s)
    }
}

/// One append-only entry in a job's event log.
///
/// `id` is assigned by the repository and is strictly increasing per job —
/// it is the sole ordering truth clients rely on when resuming an SSE stream
/// with an `after_id` cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    /// Monotonically increasing id, unique within the owning job.
    pub id: u64,
    /// Owning job.
    pub job_id: Uuid,
    /// Which component appended this event.
    pub source: EventSource,
    /// Event type, e.g. `"job.created"`, `"session.updated"`.
    pub event_type: String,
    /// Status snapshot, present for status-change events.
    pub status: Option<crate::JobStatus>,
    /// Human-readable message, best-effort extracted from the payload.
    pub message: Option<String>,
    /// Opaque structured payload.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// When the event was appended.
    pub created_at: DateTime<Utc>,
}
