// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Thin HTTP client for a running `forge-daemon` instance: submit a job,
//! tail its event log, and fetch the resulting bundle.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use forge_event_bridge::decode_lines;
use std::path::PathBuf;
use tokio_stream::StreamExt;
use tokio_util::io::StreamReader;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Exit code used for any error surfaced to the user.
const EXIT_RUNTIME_ERROR: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "forge", version, about = "Job forge orchestrator CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Base URL of the running `forge-daemon` instance.
    #[arg(long, global = true, default_value = "http://127.0.0.1:8080")]
    server: String,

    /// API prefix the daemon mounts its job/skill routes under.
    #[arg(long, global = true, default_value = "/api/v1")]
    api_prefix: String,

    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Submit a new job with a requirement and optional input files.
    Submit {
        /// The requirement text describing what the job should produce.
        requirement: String,

        /// Input files to attach (repeatable).
        #[arg(long = "file")]
        files: Vec<PathBuf>,

        /// Manually select a skill by code, bypassing automatic routing.
        #[arg(long)]
        skill: Option<String>,

        /// Coding agent name.
        #[arg(long)]
        agent: Option<String>,

        /// Idempotency key for safe retries of the same submission.
        #[arg(long)]
        idempotency_key: Option<String>,

        /// Start the job immediately after creating it.
        #[arg(long)]
        start: bool,
    },

    /// Start a previously created job.
    Start {
        /// Job id.
        job_id: Uuid,
    },

    /// Fetch a job's current state.
    Status {
        /// Job id.
        job_id: Uuid,
    },

    /// Abort a running job.
    Abort {
        /// Job id.
        job_id: Uuid,
    },

    /// Tail a job's event log until it reaches a terminal state.
    Events {
        /// Job id.
        job_id: Uuid,

        /// Resume from after this event id instead of the beginning.
        #[arg(long, default_value_t = 0)]
        after_id: u64,
    },

    /// Download a job's result bundle to a local path.
    Download {
        /// Job id.
        job_id: Uuid,

        /// Destination path for the downloaded zip.
        #[arg(long, default_value = "result.zip")]
        out: PathBuf,
    },

    /// List the registered skills.
    Skills {
        /// Filter by task type.
        #[arg(long)]
        task_type: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("forge_cli=debug")
    } else {
        EnvFilter::new("forge_cli=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let base = format!("{}{}", cli.server.trim_end_matches('/'), cli.api_prefix);
    let client = reqwest::Client::new();

    let result = match cli.command {
        Commands::Submit {
            requirement,
            files,
            skill,
            agent,
            idempotency_key,
            start,
        } => cmd_submit(&client, &base, requirement, files, skill, agent, idempotency_key, start).await,
        Commands::Start { job_id } => cmd_start(&client, &base, job_id).await,
        Commands::Status { job_id } => cmd_status(&client, &base, job_id).await,
        Commands::Abort { job_id } => cmd_abort(&client, &base, job_id).await,
        Commands::Events { job_id, after_id } => cmd_events(&client, &base, job_id, after_id).await,
        Commands::Download { job_id, out } => cmd_download(&client, &base, job_id, out).await,
        Commands::Skills { task_type } => cmd_skills(&client, &base, task_type).await,
    };

    if let Err(err) = result {
        eprintln!("error: {err:#}");
        std::process::exit(EXIT_RUNTIME_ERROR);
    }
}

#[allow(clippy::too_many_arguments)]
async fn cmd_submit(
    client: &reqwest::Client,
    base: &str,
    requirement: String,
    files: Vec<PathBuf>,
    skill: Option<String>,
    agent: Option<String>,
    idempotency_key: Option<String>,
    start: bool,
) -> Result<()> {
    let mut form = reqwest::multipart::Form::new().text("requirement", requirement);
    if let Some(skill) = skill {
        form = form.text("skill_code", skill);
    }
    if let Some(agent) = agent {
        form = form.text("agent", agent);
    }
    if let Some(key) = idempotency_key {
        form = form.text("idempotency_key", key);
    }
    for path in files {
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("read input file {}", path.display()))?;
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename);
        form = form.part("files", part);
    }

    let response = client
        .post(format!("{base}/jobs"))
        .multipart(form)
        .send()
        .await
        .context("submit job")?;
    let body = decode_or_fail(response).await?;
    println!("{}", serde_json::to_string_pretty(&body)?);

    if start {
        if let Some(job_id) = body.get("job_id").and_then(|v| v.as_str()) {
            let job_id: Uuid = job_id.parse().context("parse job_id from response")?;
            cmd_start(client, base, job_id).await?;
        }
    }
    Ok(())
}

async fn cmd_start(client: &reqwest::Client, base: &str, job_id: Uuid) -> Result<()> {
    let response = client
        .post(format!("{base}/jobs/{job_id}/start"))
        .send()
        .await
        .context("start job")?;
    let body = decode_or_fail(response).await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn cmd_status(client: &reqwest::Client, base: &str, job_id: Uuid) -> Result<()> {
    let response = client
        .get(format!("{base}/jobs/{job_id}"))
        .send()
        .await
        .context("fetch job status")?;
    let body = decode_or_fail(response).await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn cmd_abort(client: &reqwest::Client, base: &str, job_id: Uuid) -> Result<()> {
    let response = client
        .post(format!("{base}/jobs/{job_id}/abort"))
        .send()
        .await
        .context("abort job")?;
    let body = decode_or_fail(response).await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn cmd_events(client: &reqwest::Client, base: &str, job_id: Uuid, after_id: u64) -> Result<()> {
    let response = client
        .get(format!("{base}/jobs/{job_id}/events?after_id={after_id}"))
        .send()
        .await
        .context("open job event stream")?;
    if !response.status().is_success() {
        bail!("server returned {}", response.status());
    }

    let byte_stream = response
        .bytes_stream()
        .map(|chunk| chunk.map_err(|e| std::io::Error::other(e.to_string())));
    let reader = StreamReader::new(byte_stream);
    let mut events = Box::pin(decode_lines(tokio::io::BufReader::new(reader)));

    while let Some(frame) = events.next().await {
        let frame = frame.context("read event frame")?;
        if frame.data == "keep-alive" {
            continue;
        }
        match frame.json() {
            Some(value) => println!("{}", serde_json::to_string(&value)?),
            None => println!("{}", frame.data),
        }
    }
    Ok(())
}

async fn cmd_download(client: &reqwest::Client, base: &str, job_id: Uuid, out: PathBuf) -> Result<()> {
    let response = client
        .get(format!("{base}/jobs/{job_id}/download"))
        .send()
        .await
        .context("download bundle")?;
    if !response.status().is_success() {
        bail!("server returned {}", response.status());
    }
    let bytes = response.bytes().await.context("read bundle body")?;
    tokio::fs::write(&out, &bytes)
        .await
        .with_context(|| format!("write bundle to {}", out.display()))?;
    eprintln!("wrote {} ({} bytes)", out.display(), bytes.len());
    Ok(())
}

async fn cmd_skills(client: &reqwest::Client, base: &str, task_type: Option<String>) -> Result<()> {
    let mut request = client.get(format!("{base}/skills"));
    if let Some(task_type) = task_type {
        request = request.query(&[("task_type", task_type)]);
    }
    let response = request.send().await.context("list skills")?;
    let body = decode_or_fail(response).await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn decode_or_fail(response: reqwest::Response) -> Result<serde_json::Value> {
    let status = response.status();
    let body: serde_json::Value = response.json().await.context("decode response body")?;
    if !status.is_success() {
        bail!("server returned {status}: {body}");
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_submit_with_repeated_files() {
        let cli = Cli::parse_from([
            "forge",
            "submit",
            "analyze this",
            "--file",
            "a.csv",
            "--file",
            "b.csv",
            "--start",
        ]);
        match cli.command {
            Commands::Submit { requirement, files, start, .. } => {
                assert_eq!(requirement, "analyze this");
                assert_eq!(files.len(), 2);
                assert!(start);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn server_and_api_prefix_default() {
        let cli = Cli::parse_from(["forge", "status", "00000000-0000-0000-0000-000000000000"]);
        assert_eq!(cli.server, "http://127.0.0.1:8080");
        assert_eq!(cli.api_prefix, "/api/v1");
    }
}
