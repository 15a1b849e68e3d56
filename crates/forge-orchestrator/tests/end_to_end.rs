// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end scenarios driving the full create → start → execute path
//! against a simulated coding-agent runtime.

use forge_agent_client::{AgentClient, AgentClientConfig};
use forge_core::{FileCategory, JobStatus};
use forge_orchestrator::{
    CreateJobRequest, Executor, ExecutorConfig, InProcessJobQueue, OrchestratorService,
    ServiceSettings, UploadedFile,
};
use forge_repository::{InMemoryJobRepository, JobRepository};
use forge_skills::SkillCatalog;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    service: Arc<OrchestratorService>,
    executor: Arc<Executor>,
    repository: Arc<InMemoryJobRepository>,
    data_root: tempfile::TempDir,
    server: MockServer,
}

async fn build_harness(soft_timeout_seconds: u64) -> Harness {
    let server = MockServer::start().await;
    let data_root = tempfile::tempdir().expect("tempdir");

    let repository = Arc::new(InMemoryJobRepository::new());
    let catalog = SkillCatalog::with_builtin_skills();
    let agent_client = Arc::new(
        AgentClient::new(AgentClientConfig {
            base_url: server.uri(),
            ..AgentClientConfig::default()
        })
        .expect("build agent client"),
    );
    let queue = Arc::new(InProcessJobQueue::default());

    let executor = Arc::new(Executor::new(
        Arc::clone(&repository) as _,
        catalog.clone(),
        Arc::clone(&agent_client),
        data_root.path().to_path_buf(),
        ExecutorConfig {
            job_soft_timeout_seconds: soft_timeout_seconds,
            permission_wait_timeout_seconds: 5,
            stream_read_timeout_seconds: 2,
            ..ExecutorConfig::default()
        },
    ));

    let settings = ServiceSettings {
        data_root: data_root.path().to_path_buf(),
        default_agent: "build".to_string(),
        skill_fallback_threshold: 0.45,
        max_upload_file_size_bytes: 50 * 1024 * 1024,
        job_soft_timeout_seconds: soft_timeout_seconds,
        job_hard_timeout_seconds: soft_timeout_seconds + 300,
        default_tenant_id: "default".to_string(),
        default_created_by: "system".to_string(),
    };
    let service = Arc::new(OrchestratorService::new(
        Arc::clone(&repository) as _,
        catalog,
        agent_client,
        queue as _,
        settings,
    ));

    Harness {
        service,
        executor,
        repository,
        data_root,
        server,
    }
}

fn request_with_one_file(requirement: &str, filename: &str, content: &[u8]) -> CreateJobRequest {
    CreateJobRequest {
        requirement: requirement.to_string(),
        files: vec![UploadedFile {
            filename: filename.to_string(),
            bytes: content.to_vec(),
            mime: Some("text/plain".to_string()),
        }],
        skill_code: None,
        agent: None,
        model_provider_id: None,
        model_id: None,
        output_contract: None,
        idempotency_key: None,
        tenant: None,
        created_by: None,
    }
}

/// Mounts the minimal set of stubs needed to take a session from creation
/// to a reported-idle status with no pending permission requests.
async fn mount_idle_session(server: &MockServer, session_id: &str) {
    Mock::given(method("GET"))
        .and(path("/global/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/session"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": session_id})))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/session/{session_id}/prompt_async")))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/event"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(""),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/permission"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/session/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            session_id: {"type": "idle"}
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/session/{session_id}/message")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/session/{session_id}/abort")))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

fn write_simulated_output(data_root: &std::path::Path, job_id: Uuid, relative: &str, content: &[u8]) {
    let path = data_root.join(job_id.to_string()).join("outputs").join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

#[tokio::test]
async fn happy_path_general_default_produces_a_downloadable_bundle() {
    let harness = build_harness(60).await;
    mount_idle_session(&harness.server, "sess-1").await;

    let job = harness
        .service
        .create_job(request_with_one_file("help me", "notes.txt", b"hello\n"))
        .await
        .expect("create_job");
    assert_eq!(job.selected_skill, "general-default");

    let started = harness.service.start_job(job.id).await.expect("start_job");
    assert_eq!(started.status, JobStatus::Queued);

    write_simulated_output(harness.data_root.path(), job.id, "result.txt", b"done\n");

    harness.executor.run(job.id).await.expect("executor run");

    let finished = harness.service.get_job(job.id).await.unwrap();
    assert_eq!(finished.status, JobStatus::Succeeded);

    let artifacts = harness.service.list_artifacts(job.id).await.unwrap();
    assert_eq!(artifacts.len(), 2);
    assert!(artifacts
        .iter()
        .any(|f| f.category == FileCategory::Output && f.relative_path == "outputs/result.txt"));
    assert!(artifacts
        .iter()
        .any(|f| f.category == FileCategory::Bundle && f.relative_path == "bundle/result.zip"));

    let bundle_path = harness.service.get_bundle_path(job.id).await.unwrap();
    let file = std::fs::File::open(&bundle_path).unwrap();
    let mut archive = zip::ZipArchive::new(file).unwrap();
    let mut names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            "job/execution-plan.json".to_string(),
            "job/request.md".to_string(),
            "logs/opencode-last-message.md".to_string(),
            "manifest.json".to_string(),
            "result.txt".to_string(),
        ]
    );

    let mut manifest_entry = archive.by_name("manifest.json").unwrap();
    let mut manifest_bytes = Vec::new();
    manifest_entry.read_to_end(&mut manifest_bytes).unwrap();
    let manifest: serde_json::Value = serde_json::from_slice(&manifest_bytes).unwrap();
    let entry = manifest["files"]
        .as_array()
        .unwrap()
        .iter()
        .find(|f| f["path"] == "result.txt")
        .expect("result.txt entry present");
    assert_eq!(entry["size_bytes"], 5);
    assert_eq!(
        entry["sha256"],
        "d117fa006ba9208500b2930ce69cbde436c647afa917cb7396a9bc9111a46dd2",
        "sha256 of 'done\\n'"
    );
}

#[tokio::test]
async fn idempotent_create_returns_the_same_job_once() {
    let harness = build_harness(60).await;

    let mut request = request_with_one_file("help me", "notes.txt", b"hello\n");
    request.idempotency_key = Some("abc".to_string());
    let first = harness.service.create_job(request.clone()).await.unwrap();

    let second = harness.service.create_job(request).await.unwrap();
    assert_eq!(first.id, second.id);

    let events = harness.repository.list_events(first.id, 0, 100).await.unwrap();
    let created_events = events.iter().filter(|e| e.event_type == "job.created").count();
    assert_eq!(created_events, 1);

    let data_root_entries: Vec<_> = std::fs::read_dir(harness.data_root.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(data_root_entries.len(), 1, "exactly one workspace directory on disk");
}

#[tokio::test]
async fn abort_before_idle_stops_the_job_without_a_bundle() {
    let harness = build_harness(60).await;
    mount_idle_session(&harness.server, "sess-1").await;
    // Override the status endpoint so the session is never reported idle.
    Mock::given(method("GET"))
        .and(path("/session/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "sess-1": {"type": "working"}
        })))
        .mount(&harness.server)
        .await;

    let job = harness
        .service
        .create_job(request_with_one_file("help me", "notes.txt", b"hello\n"))
        .await
        .unwrap();
    harness.service.start_job(job.id).await.unwrap();

    // Abort the job after the executor has had a chance to create a session
    // (racing the wait loop, which is the scenario under test).
    let abort_service = Arc::clone(&harness.service);
    let job_id = job.id;
    let aborter = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        abort_service.abort_job(job_id).await.unwrap();
    });

    harness.executor.run(job.id).await.expect("executor run folds abort into Ok");
    aborter.await.unwrap();

    let finished = harness.service.get_job(job.id).await.unwrap();
    assert_eq!(finished.status, JobStatus::Aborted);

    let events = harness.repository.list_events(job.id, 0, 1000).await.unwrap();
    assert!(events.iter().any(|e| e.event_type == "job.aborted"));
    assert!(
        !events
            .iter()
            .any(|e| e.event_type == "job.status.changed"
                && e.status.is_some()
                && e.status != Some(JobStatus::Aborted)
                && e.id > events.iter().find(|x| x.event_type == "job.aborted").unwrap().id),
        "no non-aborted status change follows the abort"
    );
    assert!(harness.service.get_bundle_path(job.id).await.is_err());
}

#[tokio::test]
async fn dangerous_shell_command_is_rejected_by_the_permission_policy() {
    let harness = build_harness(60).await;
    let session_id = "sess-1";
    mount_idle_session(&harness.server, session_id).await;

    // Override /permission so the pending request is a dangerous shell
    // command the first time it is polled, then empty afterwards.
    harness.server.reset().await;
    Mock::given(method("GET"))
        .and(path("/global/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&harness.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/session"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": session_id})))
        .mount(&harness.server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/session/{session_id}/prompt_async")))
        .respond_with(ResponseTemplate::new(200))
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/event"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(""),
        )
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/permission"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
            "id": "p1",
            "permission": "shell.execute",
            "patterns": ["outputs/a.txt"],
            "metadata": {"command": "sudo rm -rf /"},
            "sessionID": session_id
        }])))
        .up_to_n_times(1)
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/permission"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&harness.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/permission/p1/reply"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/session/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            session_id: {"type": "idle"}
        })))
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/session/{session_id}/message")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&harness.server)
        .await;

    let job = harness
        .service
        .create_job(request_with_one_file("help me", "notes.txt", b"hello\n"))
        .await
        .unwrap();
    harness.service.start_job(job.id).await.unwrap();
    write_simulated_output(harness.data_root.path(), job.id, "result.txt", b"done\n");

    harness.executor.run(job.id).await.expect("executor run");

    let events = harness.repository.list_events(job.id, 0, 1000).await.unwrap();
    let replied = events
        .iter()
        .find(|e| e.event_type == "permission.replied")
        .expect("permission.replied event recorded");
    assert_eq!(replied.payload["request_id"], "p1");
    assert_eq!(replied.payload["reply"], "reject");
}

#[tokio::test]
async fn mutated_input_file_fails_verification_without_a_bundle() {
    let harness = build_harness(60).await;
    mount_idle_session(&harness.server, "sess-1").await;

    let job = harness
        .service
        .create_job(request_with_one_file("help me", "notes.txt", b"hello\n"))
        .await
        .unwrap();
    harness.service.start_job(job.id).await.unwrap();
    write_simulated_output(harness.data_root.path(), job.id, "result.txt", b"done\n");

    // Mutate the input file on disk after job creation, before the executor
    // verifies input integrity.
    let input_path = harness
        .data_root
        .path()
        .join(job.id.to_string())
        .join("inputs")
        .join("notes.txt");
    std::fs::write(&input_path, b"tampered\n").unwrap();

    let err = harness.executor.run(job.id).await.unwrap_err();
    assert!(err.to_string().contains("input file modified unexpectedly: inputs/notes.txt"));

    let finished = harness.service.get_job(job.id).await.unwrap();
    assert_eq!(finished.status, JobStatus::Failed);
    assert_eq!(finished.error_code.as_deref(), Some("job_execution_failed"));
    assert!(harness.service.get_bundle_path(job.id).await.is_err());
}

#[tokio::test]
async fn soft_timeout_aborts_the_session_and_fails_the_job() {
    let harness = build_harness(1).await;
    let session_id = "sess-1";
    Mock::given(method("GET"))
        .and(path("/global/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&harness.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/session"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": session_id})))
        .mount(&harness.server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/session/{session_id}/prompt_async")))
        .respond_with(ResponseTemplate::new(200))
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/event"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(""),
        )
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/permission"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&harness.server)
        .await;
    // The session never reports idle.
    Mock::given(method("GET"))
        .and(path("/session/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            session_id: {"type": "working"}
        })))
        .mount(&harness.server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/session/{session_id}/abort")))
        .respond_with(ResponseTemplate::new(200))
        .mount(&harness.server)
        .await;

    let job = harness
        .service
        .create_job(request_with_one_file("help me", "notes.txt", b"hello\n"))
        .await
        .unwrap();
    harness.service.start_job(job.id).await.unwrap();

    let err = harness.executor.run(job.id).await.unwrap_err();
    assert!(err.to_string().to_lowercase().contains("timeout"));

    let finished = harness.service.get_job(job.id).await.unwrap();
    assert_eq!(finished.status, JobStatus::Failed);

    let events = harness.repository.list_events(job.id, 0, 1000).await.unwrap();
    assert!(events.iter().any(|e| e.event_type == "job.failed"));

    let abort_requests = harness
        .server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == format!("/session/{session_id}/abort"))
        .count();
    assert!(abort_requests >= 1, "abort_session must have been called");
}
