// SPDX-License-Identifier: MIT OR Apache-2.0
//! Job lifecycle service, executor state machine, and worker pool.
//!
//! [`OrchestratorService`] is the single entry point callers (an HTTP
//! façade, a CLI, a test harness) use to create, start, query, and abort
//! jobs. [`Executor`] drives one job from `running` through to a terminal
//! status by talking to the external coding-agent runtime. [`worker`] wires
//! the two together behind a queue and a bounded pool of tokio tasks.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod executor;
mod service;
mod worker;

pub use executor::{Executor, ExecutorConfig};
pub use service::{
    CreateJobRequest, OrchestratorService, ServiceSettings, SkillDescriptor, UploadedFile,
};
pub use worker::{InProcessJobQueue, JobQueue, QueuedJob, WorkerPool, WorkerPoolConfig};
