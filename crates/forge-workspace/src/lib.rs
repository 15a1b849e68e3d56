// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-job workspace directory tree and content-addressed input storage.
//!
//! A workspace is the directory `data_root/<job_id>/{job,inputs,outputs,logs,bundle}`.
//! This crate owns its creation, the safe-name policy for stored input
//! files, and streaming SHA-256 hashing used both at ingest and at
//! verification time.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod sanitize;

pub use sanitize::{dedupe_filename, sanitize_filename};

use forge_core::ExecutionPlan;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

/// Chunk size used by [`sha256_file`] — keeps memory bounded for large
/// inputs while amortizing syscall overhead.
const HASH_CHUNK_BYTES: usize = 1024 * 1024;

/// Errors raised by workspace operations.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    /// Underlying filesystem operation failed.
    #[error("workspace io error at {path}: {source}")]
    Io {
        /// Path the failing operation targeted.
        path: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// `store_input_file` was given zero bytes.
    #[error("input file '{filename}' is empty")]
    EmptyFile {
        /// Original filename supplied by the caller.
        filename: String,
    },
    /// `store_input_file` exceeded the configured max size.
    #[error("input file '{filename}' is {size} bytes, exceeding the max of {max} bytes")]
    FileTooLarge {
        /// Original filename supplied by the caller.
        filename: String,
        /// Size of the rejected payload.
        size: u64,
        /// Configured maximum.
        max: u64,
    },
}

fn io_err(path: &Path, source: std::io::Error) -> WorkspaceError {
    WorkspaceError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// A created (or re-opened) job workspace directory tree.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

/// Metadata recorded for a file placed into a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Path relative to the workspace root, e.g. `inputs/notes.txt`.
    pub relative_path: String,
    /// Absolute path on disk.
    pub absolute_path: PathBuf,
    /// Size in bytes.
    pub size: u64,
    /// SHA-256 hex digest.
    pub sha256: String,
    /// Best-effort MIME type, if the caller supplied one.
    pub mime: Option<String>,
}

impl Workspace {
    /// Creates `data_root/<job_id>/{job,inputs,outputs,logs,bundle}`,
    /// returning a handle to the tree. Idempotent: safe to call again for a
    /// job whose directories already exist.
    pub async fn create(data_root: &Path, job_id: &str) -> Result<Self, WorkspaceError> {
        let root = data_root.join(job_id);
        for sub in ["job", "inputs", "outputs", "logs", "bundle"] {
            let dir = root.join(sub);
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| io_err(&dir, e))?;
        }
        Ok(Self { root })
    }

    /// Wraps an already-existing workspace root without creating anything
    /// (used by the executor when re-entering a job that was created
    /// earlier in the same process or a prior one).
    #[must_use]
    pub fn at(root: PathBuf) -> Self {
        Self { root }
    }

    /// Absolute path to the workspace root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path to the `inputs/` directory.
    #[must_use]
    pub fn inputs_dir(&self) -> PathBuf {
        self.root.join("inputs")
    }

    /// Absolute path to the `outputs/` directory.
    #[must_use]
    pub fn outputs_dir(&self) -> PathBuf {
        self.root.join("outputs")
    }

    /// Absolute path to the `logs/` directory.
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Absolute path to the `bundle/` directory.
    #[must_use]
    pub fn bundle_dir(&self) -> PathBuf {
        self.root.join("bundle")
    }

    /// Absolute path to the `job/` directory.
    #[must_use]
    pub fn job_dir(&self) -> PathBuf {
        self.root.join("job")
    }

    /// Stores an input file under `inputs/`, sanitizing `filename` and
    /// deduplicating against any existing file of the same sanitized name.
    ///
    /// Rejects empty payloads and payloads over `max_bytes`.
    pub async fn store_input_file(
        &self,
        filename: &str,
        bytes: &[u8],
        mime: Option<String>,
        max_bytes: u64,
    ) -> Result<StoredFile, WorkspaceError> {
        if bytes.is_empty() {
            return Err(WorkspaceError::EmptyFile {
                filename: filename.to_string(),
            });
        }
        let size = bytes.len() as u64;
        if size > max_bytes {
            return Err(WorkspaceError::FileTooLarge {
                filename: filename.to_string(),
                size,
                max: max_bytes,
            });
        }

        let inputs_dir = self.inputs_dir();
        let sanitized = sanitize_filename(filename);
        let unique_name = dedupe_filename(&inputs_dir, &sanitized);
        let absolute_path = inputs_dir.join(&unique_name);

        tokio::fs::write(&absolute_path, bytes)
            .await
            .map_err(|e| io_err(&absolute_path, e))?;

        let sha256 = hex_digest(&Sha256::digest(bytes));
        let relative_path = format!("inputs/{unique_name}");

        Ok(StoredFile {
            relative_path,
            absolute_path,
            size,
            sha256,
            mime,
        })
    }

    /// Writes the trimmed requirement to `job/request.md` with a trailing
    /// newline.
    pub async fn write_request_markdown(&self, requirement: &str) -> Result<(), WorkspaceError> {
        let path = self.job_dir().join("request.md");
        let mut content = requirement.trim().to_string();
        content.push('\n');
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| io_err(&path, e))
    }

    /// Writes the execution plan to `job/execution-plan.json` with 2-space
    /// indentation.
    pub async fn write_execution_plan(
        &self,
        plan: &ExecutionPlan,
    ) -> Result<(), WorkspaceError> {
        let path = self.job_dir().join("execution-plan.json");
        let json = serde_json::to_vec_pretty(plan).unwrap_or_default();
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| io_err(&path, e))
    }

    /// Writes the agent's last message to `logs/opencode-last-message.md`.
    pub async fn write_last_message(&self, content: &str) -> Result<(), WorkspaceError> {
        let path = self.logs_dir().join("opencode-last-message.md");
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| io_err(&path, e))
    }
}

/// Streams `path` in [`HASH_CHUNK_BYTES`]-sized chunks and returns its
/// SHA-256 hex digest, without loading the whole file into memory.
pub async fn sha256_file(path: &Path) -> Result<String, WorkspaceError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| io_err(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_BYTES];
    loop {
        let read = file.read(&mut buf).await.map_err(|e| io_err(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex_digest(&hasher.finalize()))
}

fn hex_digest(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(s, "{b:02x}").expect("writing to a String cannot fail");
    }
    s
}
