use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{delete, get, post},
};
use axum_valid::Valid;

use crate::{
    dto::matchmaking::{LeaveQueueResponse, MatchView, StartMatchRequest, StartMatchResponse},
    error::AppError,
    services::matchmaking_service,
    state::SharedState,
};

/// Routes handling matchmaking and match inspection.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/matches/start", post(start_match))
        .route("/matches/{id}", get(get_match))
        .route("/matchmaking/{user_id}", delete(leave_queue))
}

/// Queue a player and pair them with the closest waiting opponent.
#[utoipa::path(
    post,
    path = "/matches/start",
    tag = "matches",
    request_body = StartMatchRequest,
    responses(
        (status = 200, description = "Player matched or queued", body = StartMatchResponse),
        (status = 400, description = "Invalid rank or player id"),
        (status = 504, description = "Questions were not ready in time")
    )
)]
pub async fn start_match(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<StartMatchRequest>>,
) -> Result<Json<StartMatchResponse>, AppError> {
    let outcome =
        matchmaking_service::start_match(&state, &payload.user_id, &payload.rank.into()).await?;
    Ok(Json(outcome.into()))
}

/// Current scores of a match and the phase of its live session.
#[utoipa::path(
    get,
    path = "/matches/{id}",
    tag = "matches",
    params(("id" = String, Path, description = "Identifier of the match")),
    responses(
        (status = 200, description = "Match found", body = MatchView),
        (status = 404, description = "Unknown match")
    )
)]
pub async fn get_match(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<MatchView>, AppError> {
    let (record, session) = matchmaking_service::describe_match(&state, &id).await?;
    Ok(Json(MatchView::new(id, record, session)))
}

/// Remove a player from the waiting pool.
#[utoipa::path(
    delete,
    path = "/matchmaking/{user_id}",
    tag = "matches",
    params(("user_id" = String, Path, description = "Player leaving the queue")),
    responses((status = 200, description = "Queue left", body = LeaveQueueResponse))
)]
pub async fn leave_queue(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
) -> Result<Json<LeaveQueueResponse>, AppError> {
    let removed = matchmaking_service::leave_queue(&state, &user_id).await?;
    Ok(Json(LeaveQueueResponse { removed }))
}
