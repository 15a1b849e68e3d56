/// Unified error taxonomy for the job orchestrator core.
///
/// The HTTP façade maps these to status codes; the executor maps the
/// terminal ones (`ValidationFailure`, `Timeout`, `Internal`) to
/// `JobStatus::Failed` with `error_code = "job_execution_failed"`.
#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    /// Caller-supplied input failed a precondition (empty requirement, empty
    /// file list, unpaired model fields, invalid JSON body).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Referenced a job, skill, or artifact that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Requested a state transition that isn't valid from the current
    /// status (e.g. `start_job` on an already-running job).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The agent runtime's health check failed.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// A transient network error reaching the agent runtime (connect/read
    /// timeout). Retried by the worker's outer loop; never user-visible.
    #[error("transient agent error: {0}")]
    TransientAgent(String),

    /// Cooperative cancellation observed at a checkpoint.
    #[error("aborted")]
    Aborted,

    /// Input-integrity or output-contract verification failed.
    #[error("validation failure: {0}")]
    ValidationFailure(String),

    /// A soft or permission-wait timeout elapsed.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Anything else — surfaced to the job as `status = failed`.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ForgeError {
    /// Stable machine-readable code, independent of the human message.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::TransientAgent(_) => "transient_agent_error",
            Self::Aborted => "aborted",
            Self::ValidationFailure(_) => "validation_failure",
            Self::Timeout(_) => "timeout",
            Self::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_strings() {
        assert_eq!(ForgeError::InvalidArgument("x".into()).code(), "invalid_argument");
        assert_eq!(ForgeError::NotFound("x".into()).code(), "not_found");
        assert_eq!(ForgeError::Conflict("x".into()).code(), "conflict");
        assert_eq!(
            ForgeError::ServiceUnavailable("x".into()).code(),
            "service_unavailable"
        );
        assert_eq!(ForgeError::Aborted.code(), "aborted");
        assert_eq!(
            ForgeError::ValidationFailure("x".into()).code(),
            "validation_failure"
        );
        assert_eq!(ForgeError::Timeout("x".into()).code(), "timeout");
        assert_eq!(ForgeError::Internal("x".into()).code(), "internal");
    }

    #[test]
    fn display_includes_message() {
        let err = ForgeError::ValidationFailure("input file modified unexpectedly: inputs/a.txt".into());
        assert!(err.to_string().contains("inputs/a.txt"));
    }
}
