//! The coordinator's wire surface.
//!
//! Routes follow the MicroProfile LRA coordinator contract: LRA ids are
//! URIs minted under the coordinator base, and API paths address them by
//! their uuid segment. Enlistment takes a JSON body carrying the
//! participant's callback URLs.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::Router;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;
use url::Url;

use crate::engine::{Coordinator, CoordinatorError};
use crate::headers::{LRA_CONTEXT_HEADER, LRA_RECOVERY_HEADER, recovery_uri};
use crate::types::{LraId, LraStatus, ParticipantId, ParticipantStatus};

pub fn app(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route("/lra/start", post(start_lra))
        .route("/lra/{id}/close", put(close_lra))
        .route("/lra/{id}/cancel", put(cancel_lra))
        .route("/lra/{id}/status", get(lra_status))
        .route("/lra/{id}/enlist", post(enlist))
        .route("/lra/{id}/recovery/{participant}", get(participant_status))
        .with_state(coordinator)
}

struct ApiError(CoordinatorError);

impl From<CoordinatorError> for ApiError {
    fn from(e: CoordinatorError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoordinatorError::NotFound(_) => StatusCode::NOT_FOUND,
            CoordinatorError::InvalidState { .. }
            | CoordinatorError::AlreadyTerminal(_)
            | CoordinatorError::ParentCycle(_) => StatusCode::CONFLICT,
            CoordinatorError::Storage(e) => {
                error!(error = %e, "state store failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartParams {
    /// Full URI of the parent LRA for nested starts.
    #[serde(default)]
    parent_lra: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartResponse {
    lra_id: LraId,
}

async fn start_lra(
    State(coordinator): State<Arc<Coordinator>>,
    Query(params): Query<StartParams>,
) -> Result<impl IntoResponse, ApiError> {
    let parent = params.parent_lra.map(LraId::from_uri);
    let id = coordinator.start(parent).await?;
    Ok((
        StatusCode::CREATED,
        [(LRA_CONTEXT_HEADER, id.as_str().to_string())],
        Json(StartResponse { lra_id: id }),
    ))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EndResponse {
    lra_id: LraId,
    status: LraStatus,
}

async fn close_lra(
    State(coordinator): State<Arc<Coordinator>>,
    Path(id): Path<String>,
) -> Result<Json<EndResponse>, ApiError> {
    let id = coordinator.id_from_segment(&id);
    let status = coordinator.close(&id).await?;
    Ok(Json(EndResponse { lra_id: id, status }))
}

async fn cancel_lra(
    State(coordinator): State<Arc<Coordinator>>,
    Path(id): Path<String>,
) -> Result<Json<EndResponse>, ApiError> {
    let id = coordinator.id_from_segment(&id);
    let status = coordinator.cancel(&id).await?;
    Ok(Json(EndResponse { lra_id: id, status }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    lra_id: LraId,
    status: LraStatus,
    participants: Vec<ParticipantView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ParticipantView {
    participant_id: ParticipantId,
    status: ParticipantStatus,
    attempts: u32,
}

async fn lra_status(
    State(coordinator): State<Arc<Coordinator>>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let id = coordinator.id_from_segment(&id);
    let record = coordinator.lookup(&id).await?;
    Ok(Json(StatusResponse {
        lra_id: record.id,
        status: record.status,
        participants: record
            .participants
            .iter()
            .map(|p| ParticipantView {
                participant_id: p.id,
                status: p.status,
                attempts: p.attempts,
            })
            .collect(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct EnlistBody {
    compensate_url: Url,
    complete_url: Url,
    #[serde(default)]
    after_url: Option<Url>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EnlistResponse {
    participant_id: ParticipantId,
    recovery_uri: String,
}

async fn enlist(
    State(coordinator): State<Arc<Coordinator>>,
    Path(id): Path<String>,
    Json(body): Json<EnlistBody>,
) -> Result<impl IntoResponse, ApiError> {
    let id = coordinator.id_from_segment(&id);
    let enlistment = coordinator
        .enlist(&id, body.compensate_url, body.complete_url, body.after_url)
        .await?;

    let recovery = recovery_uri(&id, enlistment.participant.id);
    Ok((
        [(LRA_RECOVERY_HEADER, recovery.clone())],
        Json(EnlistResponse {
            participant_id: enlistment.participant.id,
            recovery_uri: recovery,
        }),
    ))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecoveryView {
    lra_id: LraId,
    lra_status: LraStatus,
    participant_id: ParticipantId,
    status: ParticipantStatus,
    attempts: u32,
}

/// The out-of-band query surface a participant's recovery URI points at.
async fn participant_status(
    State(coordinator): State<Arc<Coordinator>>,
    Path((id, participant)): Path<(String, String)>,
) -> Result<Json<RecoveryView>, ApiError> {
    let id = coordinator.id_from_segment(&id);
    let record = coordinator.lookup(&id).await?;

    let found = ParticipantId::parse(&participant)
        .and_then(|pid| record.participant(pid))
        .ok_or_else(|| CoordinatorError::NotFound(id.clone()))?;

    Ok(Json(RecoveryView {
        lra_id: record.id.clone(),
        lra_status: record.status,
        participant_id: found.id,
        status: found.status,
        attempts: found.attempts,
    }))
}
