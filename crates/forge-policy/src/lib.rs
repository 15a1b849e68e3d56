// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pure decision engine for the coding agent's tool-use permission requests.
//!
//! `decide` takes no I/O-bound dependencies — it is deterministic given a
//! [`PermissionRequest`] and a workspace root, which makes it trivial to
//! exhaustively unit test the security-relevant branches.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Dangerous command substrings that always reject, regardless of the
/// permission kind requested.
const DANGEROUS_TOKENS: &[&str] = &[
    "sudo ",
    "rm -rf /",
    "mkfs",
    "shutdown",
    "reboot",
    "curl ",
    "wget ",
    "scp ",
    "ssh ",
];

/// The decision a policy evaluation resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    /// Approve this one request, not future ones like it.
    Once,
    /// Approve this and all future matching requests for the session.
    Always,
    /// Deny the request.
    Reject,
}

impl Reply {
    /// The reply's wire string, used in the `PermissionAction` audit row
    /// and the `permission.replied` event payload.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Reply::Once => "once",
            Reply::Always => "always",
            Reply::Reject => "reject",
        }
    }
}

/// Result of evaluating a [`PermissionRequest`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Decision {
    /// What to reply to the runtime.
    pub reply: Reply,
    /// Human-readable reason, present whenever `reply` is [`Reply::Reject`].
    pub message: Option<String>,
}

impl Decision {
    fn once() -> Self {
        Self {
            reply: Reply::Once,
            message: None,
        }
    }

    fn reject(message: impl Into<String>) -> Self {
        Self {
            reply: Reply::Reject,
            message: Some(message.into()),
        }
    }
}

/// A tool-use permission request as surfaced by the agent runtime.
#[derive(Debug, Clone, Deserialize)]
pub struct PermissionRequest {
    /// Runtime-assigned request id.
    pub id: String,
    /// Permission kind, e.g. `"edit"`, `"shell.execute"`, `"file.write"`.
    pub permission: String,
    /// Patterns the request applies to — paths, globs, or opaque tokens.
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Additional metadata, notably `command` for shell requests.
    #[serde(default)]
    pub metadata: PermissionMetadata,
}

/// Free-form metadata attached to a permission request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PermissionMetadata {
    /// The shell command string, when `permission` is a shell-execution kind.
    pub command: Option<String>,
}

/// Evaluates a permission request against workspace confinement and a
/// small set of fixed safety rules.
///
/// Order of evaluation (first match wins):
/// 1. `metadata.command` contains a dangerous token → reject.
/// 2. Any pattern that "looks like a path" (contains `/` or starts with
///    `.`) resolves outside `workspace_root` → reject.
/// 3. `permission` contains `edit`, `write`, or `file` → once.
/// 4. `permission` contains `shell` → reject.
/// 5. Otherwise → once.
#[must_use]
pub fn decide(request: &PermissionRequest, workspace_root: &Path) -> Decision {
    let permission = request.permission.to_lowercase();
    let command = request
        .metadata
        .command
        .as_deref()
        .unwrap_or_default()
        .to_lowercase();

    if DANGEROUS_TOKENS.iter().any(|token| command.contains(token)) {
        return Decision::reject("rejected by security policy: dangerous command");
    }

    for pattern in &request.patterns {
        if looks_like_path(pattern) && !is_confined(pattern, workspace_root) {
            return Decision::reject("rejected by security policy: outside workspace");
        }
    }

    if permission.contains("edit") || permission.contains("write") || permission.contains("file") {
        return Decision::once();
    }

    if permission.contains("shell") {
        return Decision::reject("rejected by security policy: shell not whitelisted");
    }

    Decision::once()
}

fn looks_like_path(pattern: &str) -> bool {
    pattern.contains('/') || pattern.starts_with('.')
}

fn is_confined(pattern: &str, workspace_root: &Path) -> bool {
    let candidate = Path::new(pattern);
    let resolved = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        workspace_root.join(candidate)
    };
    let normalized = normalize(&resolved);
    let root = normalize(workspace_root);
    normalized == root || normalized.starts_with(&root)
}

/// Lexical normalization (no filesystem access): resolves `.`/`..`
/// components so a path like `a/../../etc` cannot spoof confinement.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(permission: &str, patterns: &[&str], command: Option<&str>) -> PermissionRequest {
        PermissionRequest {
            id: "p1".to_string(),
            permission: permission.to_string(),
            patterns: patterns.iter().map(|s| s.to_string()).collect(),
            metadata: PermissionMetadata {
                command: command.map(str::to_string),
            },
        }
    }

    #[test]
    fn dangerous_command_is_rejected_regardless_of_permission() {
        let req = request("shell.execute", &["outputs/a.txt"], Some("sudo rm -rf /"));
        let decision = decide(&req, Path::new("/data/jobs/job-1"));
        assert_eq!(decision.reply, Reply::Reject);
        assert_eq!(
            decision.message.as_deref(),
            Some("rejected by security policy: dangerous command")
        );
    }

    #[test]
    fn dangerous_token_match_is_case_insensitive() {
        let req = request("edit", &[], Some("SUDO something"));
        let decision = decide(&req, Path::new("/data/jobs/job-1"));
        assert_eq!(decision.reply, Reply::Reject);
    }

    #[test]
    fn path_outside_workspace_is_rejected() {
        let req = request("edit", &["/etc/passwd"], None);
        let decision = decide(&req, Path::new("/data/jobs/job-1"));
        assert_eq!(decision.reply, Reply::Reject);
        assert_eq!(
            decision.message.as_deref(),
            Some("rejected by security policy: outside workspace")
        );
    }

    #[test]
    fn relative_traversal_outside_workspace_is_rejected() {
        let req = request("edit", &["../../etc/passwd"], None);
        let decision = decide(&req, Path::new("/data/jobs/job-1"));
        assert_eq!(decision.reply, Reply::Reject);
    }

    #[test]
    fn relative_path_within_workspace_is_confined() {
        let req = request("edit", &["outputs/report.md"], None);
        let decision = decide(&req, Path::new("/data/jobs/job-1"));
        assert_eq!(decision.reply, Reply::Once);
    }

    #[test]
    fn edit_write_file_permissions_reply_once() {
        for permission in ["edit", "file.write", "write"] {
            let req = request(permission, &[], None);
            let decision = decide(&req, Path::new("/data/jobs/job-1"));
            assert_eq!(decision.reply, Reply::Once, "permission={permission}");
        }
    }

    #[test]
    fn shell_permission_not_in_dangerous_set_is_rejected_as_unwhitelisted() {
        let req = request("shell.execute", &[], Some("ls -la"));
        let decision = decide(&req, Path::new("/data/jobs/job-1"));
        assert_eq!(decision.reply, Reply::Reject);
        assert_eq!(
            decision.message.as_deref(),
            Some("rejected by security policy: shell not whitelisted")
        );
    }

    #[test]
    fn unrecognized_permission_kind_defaults_to_once() {
        let req = request("unknown.kind", &[], None);
        let decision = decide(&req, Path::new("/data/jobs/job-1"));
        assert_eq!(decision.reply, Reply::Once);
    }

    #[test]
    fn non_path_looking_pattern_is_not_confinement_checked() {
        let req = request("edit", &["report-summary"], None);
        let decision = decide(&req, Path::new("/data/jobs/job-1"));
        assert_eq!(decision.reply, Reply::Once);
    }
}
