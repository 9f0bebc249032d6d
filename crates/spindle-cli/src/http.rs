//! HTTP front end.
//!
//! - POST   /jobs            - submit a job
//! - GET    /jobs/{job_id}   - poll its status
//! - DELETE /jobs/{job_id}   - cancel it if not leased yet
//! - POST   /tasks/add, /tasks/double, GET /tasks/{job_id} - demo shortcuts
//! - GET    /, /healthz      - liveness

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{error, info, warn};

use spindle_core::typed::PayloadCodec;
use spindle_core::{
    JobId, JobState, JobStatus, Priority, Runtime, SubmitError, SubmitRequest, Task,
};

use crate::tasks::{Add, SlowDouble};

/// Body of `POST /jobs`. `payload` is required; JSON `null` counts as missing.
#[derive(Debug, Deserialize)]
pub struct SubmitBody {
    pub task_type: String,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub priority: Option<u8>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: String,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub job_id: String,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusResponse {
    fn unknown(job_id: String) -> Self {
        Self {
            job_id,
            state: JobState::Unknown,
            result: None,
            error: None,
        }
    }

    fn from_status(job_id: String, status: JobStatus) -> Self {
        let result = status.result.map(|bytes| {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        });
        Self {
            job_id,
            state: status.state,
            result,
            error: status.error,
        }
    }
}

pub fn router(runtime: Arc<Runtime>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/jobs", post(submit_job))
        .route("/jobs/{job_id}", get(get_job).delete(cancel_job))
        .route("/tasks/add", post(submit_add))
        .route("/tasks/double", post(submit_double))
        .route("/tasks/{job_id}", get(get_job))
        .with_state(runtime)
}

async fn root() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn healthz() -> Json<Value> {
    Json(json!({"ok": true}))
}

/// Submit a job.
///
/// POST /jobs
async fn submit_job(
    State(runtime): State<Arc<Runtime>>,
    Json(body): Json<SubmitBody>,
) -> Response {
    let Some(payload) = body.payload else {
        info!(task_type = %body.task_type, "submission rejected: no payload");
        return error_response(StatusCode::BAD_REQUEST, "payload is required".to_string(), false);
    };
    let payload = match serde_json::to_vec(&payload) {
        Ok(bytes) => bytes,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string(), false),
    };
    let mut request = SubmitRequest::new(body.task_type.as_str(), payload);
    if let Some(p) = body.priority {
        request = request.with_priority(Priority(p));
    }
    submit(&runtime, request).await
}

/// POST /tasks/add
async fn submit_add(State(runtime): State<Arc<Runtime>>, Json(task): Json<Add>) -> Response {
    submit_typed(&runtime, &task).await
}

/// POST /tasks/double
async fn submit_double(
    State(runtime): State<Arc<Runtime>>,
    Json(task): Json<SlowDouble>,
) -> Response {
    submit_typed(&runtime, &task).await
}

async fn submit_typed<T: Task>(runtime: &Runtime, task: &T) -> Response {
    match SubmitRequest::typed(task) {
        Ok(request) => submit(runtime, request).await,
        Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string(), false),
    }
}

async fn submit(runtime: &Runtime, request: SubmitRequest) -> Response {
    match runtime.submit(request).await {
        Ok(job_id) => (
            StatusCode::ACCEPTED,
            Json(SubmitResponse {
                job_id: job_id.to_string(),
                status: "queued",
            }),
        )
            .into_response(),
        Err(e) => submit_error_response(e),
    }
}

fn submit_error_response(e: SubmitError) -> Response {
    match &e {
        SubmitError::EmptyTaskType | SubmitError::UnknownTaskType(_) | SubmitError::Codec(_) => {
            info!(error = %e, "submission rejected");
            error_response(StatusCode::BAD_REQUEST, e.to_string(), false)
        }
        SubmitError::Store(store) if store.is_retriable() => {
            warn!(error = %e, "store unavailable");
            error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string(), true)
        }
        SubmitError::Store(_) => {
            error!(error = %e, "submission failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), false)
        }
    }
}

fn error_response(status: StatusCode, message: String, retriable: bool) -> Response {
    (
        status,
        Json(json!({"error": message, "retriable": retriable})),
    )
        .into_response()
}

/// Poll a job. Never an HTTP error: anything we cannot answer is `unknown`.
///
/// GET /jobs/{job_id}
async fn get_job(
    State(runtime): State<Arc<Runtime>>,
    Path(raw_id): Path<String>,
) -> Json<StatusResponse> {
    let Ok(job_id) = raw_id.parse::<JobId>() else {
        return Json(StatusResponse::unknown(raw_id));
    };
    match runtime.status(job_id).await {
        Ok(status) => Json(StatusResponse::from_status(job_id.to_string(), status)),
        Err(e) => {
            warn!(%job_id, error = %e, "status lookup failed");
            Json(StatusResponse::unknown(job_id.to_string()))
        }
    }
}

/// Cancel a job, reporting the state afterwards.
///
/// DELETE /jobs/{job_id}
async fn cancel_job(
    State(runtime): State<Arc<Runtime>>,
    Path(raw_id): Path<String>,
) -> Response {
    let Ok(job_id) = raw_id.parse::<JobId>() else {
        return Json(StatusResponse::unknown(raw_id)).into_response();
    };
    match runtime.cancel(job_id).await {
        Ok(status) => Json(StatusResponse::from_status(job_id.to_string(), status)).into_response(),
        Err(e) if e.is_retriable() => {
            warn!(%job_id, error = %e, "cancel failed");
            error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string(), true)
        }
        Err(e) => {
            error!(%job_id, error = %e, "cancel failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), false)
        }
    }
}

/// Decode a succeeded demo result; handy for callers holding a typed task.
pub fn decode_result<T: Task>(status: &JobStatus) -> Option<T::Output> {
    status
        .result
        .as_deref()
        .and_then(|bytes| PayloadCodec::decode_output::<T>(bytes).ok())
}
