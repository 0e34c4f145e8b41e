use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use opentelemetry::Context;
use uuid::Uuid;

use crate::jobs::model::{ResultMessage, SmdJobRef};
use crate::jobs::result::JobResult;
use crate::jobs::JobService;
use crate::GatewayError;

pub mod models;

use models::{ErrorBody, InvijRequest, JobResponse, SmdRequest, SmdSearchQuery, StatusResponse};

#[derive(Clone)]
pub struct AppState {
    pub service: JobService,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/jobs/smd", post(submit_smd))
        .route("/jobs/smd/search", get(search_smd))
        .route("/jobs/invij", post(submit_invij))
        .route("/jobs/:id/status", get(job_status))
        .route("/jobs/:id/result", get(job_result))
        .route("/jobs/:id/result/messages", get(job_result_messages))
        .route("/jobs/:id/accept-disputed", post(accept_disputed))
        .route("/jobs/:id/accept-reviewed", post(accept_reviewed))
        .route("/jobs/:id/retry", post(retry_job))
        .route("/health", get(health))
        .with_state(state)
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn map_err(err: GatewayError) -> ApiError {
    let status = match &err {
        GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
        GatewayError::State(_) | GatewayError::RetryNotAllowed(_) => StatusCode::CONFLICT,
        GatewayError::Decode(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(%err, "request failed");
    }

    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
}

pub async fn submit_smd(
    State(state): State<AppState>,
    Json(body): Json<SmdRequest>,
) -> Result<Json<JobResponse>, ApiError> {
    let payload = serde_json::to_value(&body.input_json)
        .map_err(|err| map_err(GatewayError::from(err)))?;

    let job = state
        .service
        .create_validation_job(&Context::current(), &body.data_type, payload)
        .await
        .map_err(map_err)?;

    Ok(Json(JobResponse::from(&job)))
}

pub async fn submit_invij(
    State(state): State<AppState>,
    Json(body): Json<InvijRequest>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state
        .service
        .create_validation_job(&Context::current(), &body.data_type, body.input_json)
        .await
        .map_err(map_err)?;

    Ok(Json(JobResponse::from(&job)))
}

pub async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<StatusResponse>, ApiError> {
    let status = state.service.get_job_status(id).await.map_err(map_err)?;

    Ok(Json(StatusResponse { job_id: id, status }))
}

pub async fn job_result(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobResult>, ApiError> {
    let result = state
        .service
        .get_latest_job_result(id)
        .await
        .map_err(map_err)?;

    Ok(Json(result))
}

pub async fn job_result_messages(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ResultMessage>>, ApiError> {
    let messages = state
        .service
        .get_latest_job_result_messages(id)
        .await
        .map_err(map_err)?;

    Ok(Json(messages))
}

pub async fn accept_disputed(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state
        .service
        .accept_disputed(&Context::current(), id)
        .await
        .map_err(map_err)?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn accept_reviewed(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state
        .service
        .accept_reviewed(&Context::current(), id)
        .await
        .map_err(map_err)?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn retry_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state
        .service
        .retry_job(&Context::current(), id)
        .await
        .map_err(map_err)?;

    Ok(StatusCode::ACCEPTED)
}

pub async fn search_smd(
    State(state): State<AppState>,
    Query(query): Query<SmdSearchQuery>,
) -> Result<Json<Vec<SmdJobRef>>, ApiError> {
    let refs = state
        .service
        .get_smd_job_id(&query.file_name, &query.route)
        .await
        .map_err(map_err)?;

    Ok(Json(refs))
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
