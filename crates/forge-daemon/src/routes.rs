// SPDX-License-Identifier: MIT OR Apache-2.0
use crate::AppState;
use axum::body::Body;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use forge_core::{ForgeError, Job, JobEvent, JobStatus, OutputContract};
use forge_orchestrator::{CreateJobRequest, OrchestratorService, SkillDescriptor, UploadedFile};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Number of job events fetched per repository poll while streaming
/// `GET /jobs/{id}/events`.
const EVENT_BATCH_SIZE: usize = 200;
/// Consecutive empty polls, once the job is in a terminal state, before the
/// SSE stream closes on its own.
const EMPTY_POLLS_BEFORE_CLOSE: u32 = 2;

/// Uniform error envelope: `{"error": {"code": "...", "message": "..."}}`.
pub struct ApiError(ForgeError);

impl From<ForgeError> for ApiError {
    fn from(err: ForgeError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ForgeError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ForgeError::NotFound(_) => StatusCode::NOT_FOUND,
            ForgeError::Conflict(_) => StatusCode::CONFLICT,
            ForgeError::ServiceUnavailable(_) | ForgeError::TransientAgent(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ForgeError::Aborted => StatusCode::CONFLICT,
            ForgeError::ValidationFailure(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ForgeError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ForgeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({
            "error": { "code": self.0.code(), "message": self.0.to_string() }
        }));
        (status, body).into_response()
    }
}

/// `GET /health`, `GET /healthz`.
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// A job as rendered over the wire, including the computed download URL.
#[derive(Debug, Serialize)]
struct JobView {
    job_id: Uuid,
    tenant: String,
    created_by: String,
    requirement: String,
    selected_skill: String,
    agent: String,
    model_provider_id: Option<String>,
    model_id: Option<String>,
    output_contract: OutputContract,
    status: JobStatus,
    session_id: Option<String>,
    error_code: Option<String>,
    error_message: Option<String>,
    idempotency_key: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
    download_url: Option<String>,
}

impl JobView {
    fn from_job(job: Job, api_prefix: &str) -> Self {
        let download_url = job
            .result_bundle_path
            .as_ref()
            .map(|_| format!("{api_prefix}/jobs/{}/download", job.id));
        Self {
            job_id: job.id,
            tenant: job.tenant,
            created_by: job.created_by,
            requirement: job.requirement,
            selected_skill: job.selected_skill,
            agent: job.agent,
            model_provider_id: job.model_provider_id,
            model_id: job.model_id,
            output_contract: job.output_contract,
            status: job.status,
            session_id: job.session_id,
            error_code: job.error_code,
            error_message: job.error_message,
            idempotency_key: job.idempotency_key,
            created_at: job.created_at,
            updated_at: job.updated_at,
            download_url,
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateJobResponse {
    job_id: Uuid,
    status: JobStatus,
    selected_skill: String,
}

/// `POST /jobs` — multipart form: `requirement`, `files[]`, optional
/// `skill_code`, `agent`, `model_provider_id`, `model_id`,
/// `output_contract` (JSON text), `idempotency_key`.
pub async fn create_job(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut requirement: Option<String> = None;
    let mut files: Vec<UploadedFile> = Vec::new();
    let mut skill_code: Option<String> = None;
    let mut agent: Option<String> = None;
    let mut model_provider_id: Option<String> = None;
    let mut model_id: Option<String> = None;
    let mut output_contract_raw: Option<String> = None;
    let mut idempotency_key: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ForgeError::InvalidArgument(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "requirement" => {
                requirement = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ForgeError::InvalidArgument(e.to_string()))?,
                );
            }
            "skill_code" => {
                skill_code = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ForgeError::InvalidArgument(e.to_string()))?,
                )
                .filter(|s| !s.is_empty());
            }
            "agent" => {
                agent = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ForgeError::InvalidArgument(e.to_string()))?,
                )
                .filter(|s| !s.is_empty());
            }
            "model_provider_id" => {
                model_provider_id = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ForgeError::InvalidArgument(e.to_string()))?,
                )
                .filter(|s| !s.is_empty());
            }
            "model_id" => {
                model_id = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ForgeError::InvalidArgument(e.to_string()))?,
                )
                .filter(|s| !s.is_empty());
            }
            "output_contract" => {
                output_contract_raw = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ForgeError::InvalidArgument(e.to_string()))?,
                )
                .filter(|s| !s.is_empty());
            }
            "idempotency_key" => {
                idempotency_key = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ForgeError::InvalidArgument(e.to_string()))?,
                )
                .filter(|s| !s.is_empty());
            }
            "files" | "files[]" => {
                let filename = field.file_name().unwrap_or("upload.bin").to_string();
                let mime = field.content_type().map(ToString::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ForgeError::InvalidArgument(e.to_string()))?;
                files.push(UploadedFile {
                    filename,
                    bytes: bytes.to_vec(),
                    mime,
                });
            }
            _ => {
                // Unknown field: ignore.
            }
        }
    }

    let output_contract = match output_contract_raw {
        Some(raw) => Some(
            serde_json::from_str::<OutputContract>(&raw)
                .map_err(|e| ForgeError::InvalidArgument(format!("invalid output_contract JSON: {e}")))?,
        ),
        None => None,
    };

    if let Some(code) = &skill_code {
        if state.service.get_skill(code).is_err() {
            return Err(ForgeError::NotFound(format!("skill {code}")).into());
        }
    }

    let request = CreateJobRequest {
        requirement: requirement
            .ok_or_else(|| ForgeError::InvalidArgument("requirement is required".to_string()))?,
        files,
        skill_code,
        agent,
        model_provider_id,
        model_id,
        output_contract,
        idempotency_key,
        tenant: None,
        created_by: None,
    };

    let job = state.service.create_job(request).await?;
    let body = Json(CreateJobResponse {
        job_id: job.id,
        status: job.status,
        selected_skill: job.selected_skill,
    });
    Ok((StatusCode::CREATED, body).into_response())
}

/// `POST /jobs/{id}/start`.
pub async fn start_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let job = state.service.start_job(id).await?;
    Ok(Json(json!({ "job_id": job.id, "status": job.status })))
}

/// `GET /jobs/{id}`.
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobView>, ApiError> {
    let job = state.service.get_job(id).await?;
    Ok(Json(JobView::from_job(job, &state.api_prefix)))
}

/// `POST /jobs/{id}/abort`.
pub async fn abort_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobView>, ApiError> {
    let job = state.service.abort_job(id).await?;
    Ok(Json(JobView::from_job(job, &state.api_prefix)))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    after_id: u64,
}

/// `GET /jobs/{id}/events` — `text/event-stream`.
pub async fn job_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    // Confirm the job exists up front so an unknown id 404s instead of
    // opening a stream that would immediately close.
    state.service.get_job(id).await?;

    let stream = job_event_stream(Arc::clone(&state.service), id, query.after_id).map(Ok);
    Ok(Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(1))
            .text("keep-alive"),
    ))
}

struct StreamState {
    service: Arc<OrchestratorService>,
    job_id: Uuid,
    cursor: u64,
    empty_polls: u32,
    finished: bool,
}

fn job_event_stream(
    service: Arc<OrchestratorService>,
    job_id: Uuid,
    start_after: u64,
) -> impl Stream<Item = Event> {
    let initial = StreamState {
        service,
        job_id,
        cursor: start_after,
        empty_polls: 0,
        finished: false,
    };

    futures::stream::unfold(initial, |mut state| async move {
        if state.finished {
            return None;
        }

        let events = match state
            .service
            .list_job_events(state.job_id, state.cursor, EVENT_BATCH_SIZE)
            .await
        {
            Ok(events) => events,
            Err(_) => {
                state.finished = true;
                return None;
            }
        };

        if !events.is_empty() {
            state.empty_polls = 0;
            state.cursor = events.last().map(|e| e.id).unwrap_or(state.cursor);
            let batch: Vec<Event> = events.iter().map(to_sse_event).collect();
            return Some((batch, state));
        }

        let terminal = state
            .service
            .get_job(state.job_id)
            .await
            .map(|job| job.status.is_terminal())
            .unwrap_or(true);

        if terminal {
            state.empty_polls += 1;
            if state.empty_polls >= EMPTY_POLLS_BEFORE_CLOSE {
                state.finished = true;
                return None;
            }
        } else {
            state.empty_polls = 0;
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
        Some((Vec::new(), state))
    })
    .flat_map(futures::stream::iter)
}

fn to_sse_event(event: &JobEvent) -> Event {
    Event::default()
        .event(event.event_type.clone())
        .data(serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string()))
}

#[derive(Debug, Serialize)]
struct ArtifactView {
    id: u64,
    category: String,
    relative_path: String,
    size_bytes: u64,
    sha256: String,
    mime: Option<String>,
    download_url: String,
}

/// `GET /jobs/{id}/artifacts`.
pub async fn list_artifacts(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ArtifactView>>, ApiError> {
    let files = state.service.list_artifacts(id).await?;
    let prefix = &state.api_prefix;
    Ok(Json(
        files
            .into_iter()
            .map(|f| ArtifactView {
                download_url: format!("{prefix}/jobs/{id}/artifacts/{}/download", f.id),
                id: f.id,
                category: f.category.to_string(),
                relative_path: f.relative_path,
                size_bytes: f.size_bytes,
                sha256: f.sha256,
                mime: f.mime,
            })
            .collect(),
    ))
}

/// `GET /jobs/{id}/download`.
pub async fn download_bundle(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let path = state.service.get_bundle_path(id).await?;
    serve_file(&path, "result.zip", "application/zip").await
}

/// `GET /jobs/{id}/artifacts/{artifact_id}/download`.
pub async fn download_artifact(
    State(state): State<AppState>,
    Path((id, artifact_id)): Path<(Uuid, u64)>,
) -> Result<Response, ApiError> {
    let path = state.service.get_artifact_path(id, artifact_id).await?;
    let filename = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    serve_file(&path, &filename, "application/octet-stream").await
}

async fn serve_file(path: &std::path::Path, filename: &str, content_type: &str) -> Result<Response, ApiError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|_| ForgeError::NotFound(format!("file not found on disk: {}", path.display())))?;
    let mut response = Response::new(Body::from(bytes));
    let content_type = content_type
        .parse()
        .unwrap_or_else(|_| header::HeaderValue::from_static("application/octet-stream"));
    response.headers_mut().insert(header::CONTENT_TYPE, content_type);
    if let Ok(disposition) = format!("attachment; filename=\"{filename}\"").parse() {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, disposition);
    }
    Ok(response)
}

#[derive(Debug, Serialize)]
struct SkillView {
    code: String,
    name: String,
    aliases: Vec<String>,
    version: String,
    schema_version: u32,
    description: String,
    task_type: String,
    sample_output_contract: OutputContract,
}

impl From<SkillDescriptor> for SkillView {
    fn from(d: SkillDescriptor) -> Self {
        Self {
            code: d.code,
            name: d.name,
            aliases: d.aliases,
            version: d.version,
            schema_version: d.schema_version,
            description: d.description,
            task_type: d.task_type,
            sample_output_contract: d.sample_output_contract,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SkillsQuery {
    task_type: Option<String>,
}

/// `GET /skills`.
pub async fn list_skills(
    State(state): State<AppState>,
    Query(query): Query<SkillsQuery>,
) -> Json<Vec<SkillView>> {
    let skills = state.service.list_skills(query.task_type.as_deref());
    Json(skills.into_iter().map(SkillView::from).collect())
}

/// `GET /skills/{code}`.
pub async fn get_skill(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<SkillView>, ApiError> {
    let skill = state.service.get_skill(&code)?;
    Ok(Json(skill.into()))
}
