// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed configuration for the job orchestrator.
//!
//! [`ForgeConfig`] is loaded from an optional TOML file, overlaid with
//! `FORGE_`-prefixed environment variables, and validated for non-fatal
//! issues via [`ForgeConfig::validate`]. Precedence (lowest to highest):
//! file defaults < environment < programmatic override (callers may mutate
//! the struct after `load()` returns).
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod redact;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The explicitly requested configuration file does not exist.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// An environment variable overlay had an invalid value for its field.
    #[error("invalid environment override {var}={value}: {reason}")]
    InvalidEnvOverride {
        /// The `FORGE_*` environment variable name.
        var: String,
        /// The value that failed to parse.
        value: String,
        /// Why it failed.
        reason: String,
    },

    /// Semantic validation failed outright (used by callers building a
    /// stricter loader on top of this one; `validate()` itself returns
    /// warnings, not this error).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },

    /// Two configuration sources could not be merged because of
    /// conflicting constraints (e.g. a file and an env override disagree on
    /// a field typed as mutually exclusive).
    #[error("merge conflict: {reason}")]
    MergeConflict {
        /// Description of the conflict.
        reason: String,
    },
}

/// Advisory-level issues that do not prevent operation but deserve
/// attention, surfaced by [`ForgeConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// `job_soft_timeout_seconds` exceeds `job_hard_timeout_seconds` — the
    /// soft deadline can never fire before the hard kill.
    SoftTimeoutExceedsHardTimeout {
        /// Configured soft timeout.
        soft_seconds: u64,
        /// Configured hard timeout.
        hard_seconds: u64,
    },
    /// `skill_fallback_threshold` is outside `[0.0, 1.0]`.
    FallbackThresholdOutOfRange {
        /// The configured value.
        value: f64,
    },
    /// `data_root` could not be created at the configured path and a
    /// cwd-relative fallback is in effect.
    DataRootFellBack {
        /// The path that was requested but unusable.
        requested: String,
        /// The fallback path now in effect.
        fallback: String,
    },
    /// A recommended field was left at a suspiciously small value.
    SuspiciouslySmallTimeout {
        /// Field name.
        field: String,
        /// The configured value in seconds.
        secs: u64,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SoftTimeoutExceedsHardTimeout {
                soft_seconds,
                hard_seconds,
            } => write!(
                f,
                "job_soft_timeout_seconds ({soft_seconds}) exceeds job_hard_timeout_seconds ({hard_seconds})"
            ),
            Self::FallbackThresholdOutOfRange { value } => {
                write!(f, "skill_fallback_threshold {value} is outside [0.0, 1.0]")
            }
            Self::DataRootFellBack {
                requested,
                fallback,
            } => write!(
                f,
                "data_root '{requested}' could not be created; falling back to '{fallback}'"
            ),
            Self::SuspiciouslySmallTimeout { field, secs } => {
                write!(f, "{field} is suspiciously small: {secs}s")
            }
        }
    }
}

/// `off` leaves messages/payloads untouched; `default` redacts a fixed set
/// of sensitive substrings; `strict` additionally truncates previews.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LogRedactionMode {
    /// No redaction.
    Off,
    /// Redact known-sensitive substrings (the default).
    Default,
    /// Redact and aggressively truncate previews.
    Strict,
}

impl Default for LogRedactionMode {
    fn default() -> Self {
        Self::Default
    }
}

/// Top-level runtime configuration for the job orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ForgeConfig {
    /// Human-facing application name.
    pub app_name: String,
    /// Prefix under which all HTTP routes are mounted.
    pub api_prefix: String,
    /// Deployment environment tag (`dev`, `staging`, `prod`, ...).
    pub environment: String,
    /// Root directory under which per-job workspaces are created.
    pub data_root: PathBuf,
    /// How long a completed job's workspace is retained before a cleanup
    /// sweep may remove it (core does not implement the sweep itself).
    pub workspace_retention_hours: u64,
    /// Base URL of the external coding-agent runtime.
    pub opencode_base_url: String,
    /// Basic-auth username for the agent runtime.
    pub opencode_server_username: String,
    /// Basic-auth password for the agent runtime, if any.
    pub opencode_server_password: Option<String>,
    /// Per-call timeout for agent runtime HTTP requests.
    pub opencode_request_timeout_seconds: u64,
    /// Default coding agent name used when a job does not specify one.
    pub default_agent: String,
    /// Minimum router score below which `general-default` is chosen.
    pub skill_fallback_threshold: f64,
    /// Maximum accepted size, in bytes, for a single uploaded input file.
    pub max_upload_file_size_bytes: u64,
    /// How long the executor waits in `waiting_approval` before giving up.
    pub permission_wait_timeout_seconds: u64,
    /// Cooperative deadline for the executor's completion wait loop.
    pub job_soft_timeout_seconds: u64,
    /// Outer kill deadline for the worker task.
    pub job_hard_timeout_seconds: u64,
    /// Default tenant tag applied when a caller does not supply one.
    pub default_tenant_id: String,
    /// Default `created_by` tag applied when a caller does not supply one.
    pub default_created_by: String,
    /// Minimum `tracing` level.
    pub log_level: String,
    /// Directory log files are written under (owned by the logging
    /// transport, not this crate — recorded here for wiring).
    pub log_dir: PathBuf,
    /// Redaction policy applied to logged messages/payloads.
    pub log_redaction_mode: LogRedactionMode,
    /// Maximum characters of a payload preview kept in a log line.
    pub log_payload_preview_chars: usize,
    /// Byte size at which a log file is rotated.
    pub log_max_bytes: u64,
    /// Number of rotated log files retained.
    pub log_backup_count: u32,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            app_name: "Job Forge Orchestrator".to_string(),
            api_prefix: "/api/v1".to_string(),
            environment: "dev".to_string(),
            data_root: PathBuf::from("/data/opencode-jobs"),
            workspace_retention_hours: 72,
            opencode_base_url: "http://127.0.0.1:4096".to_string(),
            opencode_server_username: "opencode".to_string(),
            opencode_server_password: None,
            opencode_request_timeout_seconds: 30,
            default_agent: "build".to_string(),
            skill_fallback_threshold: 0.45,
            max_upload_file_size_bytes: 50 * 1024 * 1024,
            permission_wait_timeout_seconds: 120,
            job_soft_timeout_seconds: 900,
            job_hard_timeout_seconds: 1200,
            default_tenant_id: "default".to_string(),
            default_created_by: "system".to_string(),
            log_level: "info".to_string(),
            log_dir: PathBuf::from("./logs"),
            log_redaction_mode: LogRedactionMode::Default,
            log_payload_preview_chars: 2000,
            log_max_bytes: 10 * 1024 * 1024,
            log_backup_count: 5,
        }
    }
}

impl ForgeConfig {
    /// Loads configuration: starts from defaults, overlays an optional TOML
    /// file (if `file_path` is `Some`), then overlays `FORGE_`-prefixed
    /// environment variables read via `env_lookup`. Finally applies the
    /// permission-denied fallback for `data_root`.
    ///
    /// `env_lookup` is injected (rather than calling `std::env::var`
    /// directly) so tests can exercise overlay behavior deterministically
    /// without mutating the process environment.
    pub fn load(
        file_path: Option<&Path>,
        env_lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = match file_path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overlay(&env_lookup)?;
        config.apply_data_root_fallback();
        Ok(config)
    }

    fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            reason: e.to_string(),
        })
    }

    fn apply_env_overlay(
        &mut self,
        env_lookup: &impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        macro_rules! overlay_string {
            ($field:ident, $var:literal) => {
                if let Some(v) = env_lookup($var) {
                    self.$field = v;
                }
            };
        }
        macro_rules! overlay_parsed {
            ($field:ident, $var:literal) => {
                if let Some(v) = env_lookup($var) {
                    self.$field = v.parse().map_err(|e| ConfigError::InvalidEnvOverride {
                        var: $var.to_string(),
                        value: v.clone(),
                        reason: format!("{e}"),
                    })?;
                }
            };
        }

        overlay_string!(app_name, "FORGE_APP_NAME");
        overlay_string!(api_prefix, "FORGE_API_PREFIX");
        overlay_string!(environment, "FORGE_ENVIRONMENT");
        if let Some(v) = env_lookup("FORGE_DATA_ROOT") {
            self.data_root = PathBuf::from(v);
        }
        overlay_parsed!(workspace_retention_hours, "FORGE_WORKSPACE_RETENTION_HOURS");
        overlay_string!(opencode_base_url, "FORGE_OPENCODE_BASE_URL");
        overlay_string!(opencode_server_username, "FORGE_OPENCODE_SERVER_USERNAME");
        if let Some(v) = env_lookup("FORGE_OPENCODE_SERVER_PASSWORD") {
            self.opencode_server_password = Some(v);
        }
        overlay_parsed!(
            opencode_request_timeout_seconds,
            "FORGE_OPENCODE_REQUEST_TIMEOUT_SECONDS"
        );
        overlay_string!(default_agent, "FORGE_DEFAULT_AGENT");
        overlay_parsed!(skill_fallback_threshold, "FORGE_SKILL_FALLBACK_THRESHOLD");
        overlay_parsed!(
            max_upload_file_size_bytes,
            "FORGE_MAX_UPLOAD_FILE_SIZE_BYTES"
        );
        overlay_parsed!(
            permission_wait_timeout_seconds,
            "FORGE_PERMISSION_WAIT_TIMEOUT_SECONDS"
        );
        overlay_parsed!(job_soft_timeout_seconds, "FORGE_JOB_SOFT_TIMEOUT_SECONDS");
        overlay_parsed!(job_hard_timeout_seconds, "FORGE_JOB_HARD_TIMEOUT_SECONDS");
        overlay_string!(default_tenant_id, "FORGE_DEFAULT_TENANT_ID");
        overlay_string!(default_created_by, "FORGE_DEFAULT_CREATED_BY");
        overlay_string!(log_level, "FORGE_LOG_LEVEL");
        if let Some(v) = env_lookup("FORGE_LOG_DIR") {
            self.log_dir = PathBuf::from(v);
        }
        if let Some(v) = env_lookup("FORGE_LOG_REDACTION_MODE") {
            self.log_redaction_mode = match v.as_str() {
                "off" => LogRedactionMode::Off,
                "default" => LogRedactionMode::Default,
                "strict" => LogRedactionMode::Strict,
                other => {
                    return Err(ConfigError::InvalidEnvOverride {
                        var: "FORGE_LOG_REDACTION_MODE".to_string(),
                        value: other.to_string(),
                        reason: "expected one of off|default|strict".to_string(),
                    });
                }
            };
        }
        overlay_parsed!(log_payload_preview_chars, "FORGE_LOG_PAYLOAD_PREVIEW_CHARS");
        overlay_parsed!(log_max_bytes, "FORGE_LOG_MAX_BYTES");
        overlay_parsed!(log_backup_count, "FORGE_LOG_BACKUP_COUNT");

        Ok(())
    }

    /// If `data_root` cannot be created (permission denied or similar), fall
    /// back to `./data/opencode-jobs` under the process cwd. Ported from the
    /// Python original's `get_settings()` fallback.
    fn apply_data_root_fallback(&mut self) {
        if std::fs::create_dir_all(&self.data_root).is_err() {
            self.data_root = PathBuf::from("./data/opencode-jobs");
            let _ = std::fs::create_dir_all(&self.data_root);
        }
    }

    /// Runs non-fatal semantic checks, returning every issue found (does not
    /// short-circuit on the first one).
    #[must_use]
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.job_soft_timeout_seconds > self.job_hard_timeout_seconds {
            warnings.push(ConfigWarning::SoftTimeoutExceedsHardTimeout {
                soft_seconds: self.job_soft_timeout_seconds,
                hard_seconds: self.job_hard_timeout_seconds,
            });
        }
        if !(0.0..=1.0).contains(&self.skill_fallback_threshold) {
            warnings.push(ConfigWarning::FallbackThresholdOutOfRange {
                value: self.skill_fallback_threshold,
            });
        }
        if self.permission_wait_timeout_seconds < 5 {
            warnings.push(ConfigWarning::SuspiciouslySmallTimeout {
                field: "permission_wait_timeout_seconds".to_string(),
                secs: self.permission_wait_timeout_seconds,
            });
        }
        if self.opencode_request_timeout_seconds < 1 {
            warnings.push(ConfigWarning::SuspiciouslySmallTimeout {
                field: "opencode_request_timeout_seconds".to_string(),
                secs: self.opencode_request_timeout_seconds,
            });
        }
        warnings
    }
}
