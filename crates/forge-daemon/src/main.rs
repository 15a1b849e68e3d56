// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Composition root: loads configuration, builds every long-lived
//! collaborator in dependency order, spawns the worker pool, and serves the
//! HTTP façade.

use anyhow::Context;
use forge_agent_client::{AgentClient, AgentClientConfig};
use forge_config::ForgeConfig;
use forge_daemon::{build_app, AppState};
use forge_orchestrator::{
    Executor, ExecutorConfig, InProcessJobQueue, OrchestratorService, ServiceSettings, WorkerPool,
    WorkerPoolConfig,
};
use forge_repository::InMemoryJobRepository;
use forge_skills::SkillCatalog;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, clap::Parser)]
#[command(name = "forge-daemon", version, about = "Job orchestrator HTTP facade")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind the HTTP listener to.
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = <Args as clap::Parser>::parse();

    let config = ForgeConfig::load(args.config.as_deref(), |key| std::env::var(key).ok())
        .context("loading configuration")?;

    init_logging(&config);

    for warning in config.validate() {
        tracing::warn!(%warning, "configuration warning");
    }

    let repository = Arc::new(InMemoryJobRepository::new());
    let catalog = SkillCatalog::with_builtin_skills();

    let agent_client = Arc::new(
        AgentClient::new(AgentClientConfig {
            base_url: config.opencode_base_url.clone(),
            username: Some(config.opencode_server_username.clone()),
            password: config.opencode_server_password.clone(),
            request_timeout: Duration::from_secs(config.opencode_request_timeout_seconds),
        })
        .context("building agent runtime client")?,
    );

    let queue = Arc::new(InProcessJobQueue::default());

    let executor_config = ExecutorConfig {
        job_soft_timeout_seconds: config.job_soft_timeout_seconds,
        permission_wait_timeout_seconds: config.permission_wait_timeout_seconds,
        stream_read_timeout_seconds: 10,
        log_redaction_mode: config.log_redaction_mode,
        log_payload_preview_chars: config.log_payload_preview_chars,
    };
    let executor = Arc::new(Executor::new(
        Arc::clone(&repository),
        catalog.clone(),
        Arc::clone(&agent_client),
        config.data_root.clone(),
        executor_config,
    ));

    let worker_pool_config = WorkerPoolConfig {
        job_hard_timeout_seconds: config.job_hard_timeout_seconds,
        ..WorkerPoolConfig::default()
    };
    let worker_pool = Arc::new(WorkerPool::new(
        Arc::clone(&queue),
        Arc::clone(&executor),
        worker_pool_config,
    ));
    let worker_handles = Arc::clone(&worker_pool).spawn();

    let settings = ServiceSettings {
        data_root: config.data_root.clone(),
        default_agent: config.default_agent.clone(),
        skill_fallback_threshold: config.skill_fallback_threshold,
        max_upload_file_size_bytes: config.max_upload_file_size_bytes,
        job_soft_timeout_seconds: config.job_soft_timeout_seconds,
        job_hard_timeout_seconds: config.job_hard_timeout_seconds,
        default_tenant_id: config.default_tenant_id.clone(),
        default_created_by: config.default_created_by.clone(),
    };
    let service = Arc::new(OrchestratorService::new(
        repository as _,
        catalog,
        agent_client,
        queue as _,
        settings,
    ));

    let state = AppState {
        service,
        api_prefix: config.api_prefix.clone(),
    };
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("binding to {}", args.bind))?;
    tracing::info!(bind = %args.bind, app_name = %config.app_name, "forge-daemon listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    for handle in worker_handles {
        handle.abort();
    }

    Ok(())
}

fn init_logging(config: &ForgeConfig) {
    let filter = EnvFilter::try_new(format!(
        "{level},reqwest=warn,hyper=warn",
        level = config.log_level
    ))
    .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        signal.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
