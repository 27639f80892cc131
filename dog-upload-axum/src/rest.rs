use std::sync::Arc;

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use dog_upload::{
    ActiveUpload, CompletedUpload, InitiateOutcome, InitiateRequest, MoreUrlsRequest, MoreUrlsResponse,
    PartCompleteRequest, PartCompletion, SessionId, UploadCoordinator, UploadStatusReport,
};
use serde::Deserialize;

use crate::state::{Owner, UploadState};
use crate::UploadAxumError;

type ApiResult<T> = Result<T, UploadAxumError>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusQuery {
    #[serde(default)]
    include_urls: Option<bool>,
}

/// Routes of the upload protocol, to be nested under a prefix such as `/uploads`.
pub fn upload_router(coordinator: Arc<UploadCoordinator>) -> Router<()> {
    Router::new()
        .route("/initiate", post(initiate))
        .route("/active", get(active))
        .route("/{session_id}", delete(abort))
        .route("/{session_id}/status", get(status))
        .route("/{session_id}/sync", post(sync))
        .route("/{session_id}/urls", post(more_urls))
        .route("/{session_id}/parts/{part_number}/complete", post(part_complete))
        .route("/{session_id}/complete", post(complete))
        .with_state(UploadState::new(coordinator))
}

async fn initiate(
    State(state): State<UploadState>,
    Owner(owner): Owner,
    body: Result<Json<InitiateRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<InitiateOutcome>)> {
    let Json(request) = body?;
    let outcome = state.coordinator.initiate(&owner, request).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn active(State(state): State<UploadState>, Owner(owner): Owner) -> ApiResult<Json<Vec<ActiveUpload>>> {
    Ok(Json(state.coordinator.list_active(&owner).await?))
}

async fn status(
    State(state): State<UploadState>,
    Owner(owner): Owner,
    path: Result<Path<String>, PathRejection>,
    query: Result<Query<StatusQuery>, QueryRejection>,
) -> ApiResult<Json<UploadStatusReport>> {
    let Path(id) = path?;
    let Query(query) = query?;
    let include_urls = query.include_urls.unwrap_or(true);

    let report = state
        .coordinator
        .get_status(&owner, &SessionId::from_string(id), include_urls)
        .await?;
    Ok(Json(report))
}

async fn sync(
    State(state): State<UploadState>,
    Owner(owner): Owner,
    path: Result<Path<String>, PathRejection>,
) -> ApiResult<Json<UploadStatusReport>> {
    let Path(id) = path?;
    let report = state
        .coordinator
        .sync_with_store(&owner, &SessionId::from_string(id))
        .await?;
    Ok(Json(report))
}

async fn more_urls(
    State(state): State<UploadState>,
    Owner(owner): Owner,
    path: Result<Path<String>, PathRejection>,
    body: Result<Json<MoreUrlsRequest>, JsonRejection>,
) -> ApiResult<Json<MoreUrlsResponse>> {
    let Path(id) = path?;
    let Json(request) = body?;

    let presigned_urls = state
        .coordinator
        .get_more_urls(&owner, &SessionId::from_string(id), &request.part_numbers)
        .await?;
    Ok(Json(MoreUrlsResponse { presigned_urls }))
}

async fn part_complete(
    State(state): State<UploadState>,
    Owner(owner): Owner,
    path: Result<Path<(String, u32)>, PathRejection>,
    body: Result<Json<PartCompleteRequest>, JsonRejection>,
) -> ApiResult<Json<PartCompletion>> {
    let Path((id, part_number)) = path?;
    let Json(request) = body?;

    let completion = state
        .coordinator
        .mark_part_completed(&owner, &SessionId::from_string(id), part_number, &request.etag)
        .await?;
    Ok(Json(completion))
}

async fn complete(
    State(state): State<UploadState>,
    Owner(owner): Owner,
    path: Result<Path<String>, PathRejection>,
) -> ApiResult<Json<CompletedUpload>> {
    let Path(id) = path?;
    let completed = state
        .coordinator
        .complete_upload(&owner, &SessionId::from_string(id))
        .await?;
    Ok(Json(completed))
}

async fn abort(
    State(state): State<UploadState>,
    Owner(owner): Owner,
    path: Result<Path<String>, PathRejection>,
) -> ApiResult<StatusCode> {
    let Path(id) = path?;
    state
        .coordinator
        .abort_upload(&owner, &SessionId::from_string(id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
