// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared domain types for the job orchestrator.
//!
//! Every other `forge-*` crate depends on this one for the `Job` lifecycle
//! types, the execution-plan/output-contract shapes, the event taxonomy, and
//! the [`ForgeError`] error enum. Nothing here talks to the filesystem, a
//! database, or the network — nothing in this crate can fail to compile
//! without `std`, `serde`, and `chrono`.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod context;
mod error;
mod event;
mod hash;
mod job;
mod plan;

pub use context::JobContext;
pub use error::ForgeError;
pub use event::{EventSource, JobEvent};
pub use hash::{requirement_hash, HashedFile};
pub use job::{FileCategory, Job, JobFile, JobStatus, PermissionAction};
pub use plan::{ExecutionPlan, OutputContract, PackagingRules, RetryPolicy, Timeouts};
