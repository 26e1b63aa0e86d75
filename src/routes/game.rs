use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::game::{
        CreateGameRequest, GameSummary, HostActionRequest, JoinGameRequest, JoinResponse,
        SubmitAnswerRequest,
    },
    error::{AppError, ErrorBody},
    services::session_service,
    state::SharedState,
};

/// Routes driving a game session from lobby to game over.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/games", post(create_game))
        .route("/games/{code}", get(get_game))
        .route("/games/{code}/players", post(join_game))
        .route("/games/{code}/players/{player_id}", delete(leave_game))
        .route("/games/{code}/players/{player_id}/ready", post(mark_ready))
        .route("/games/{code}/start", post(start_game))
        .route("/games/{code}/answers", post(submit_answer))
        .route("/games/{code}/reset", post(reset_game))
}

/// Open a new lobby. The caller becomes its host and is ready from the start.
#[utoipa::path(
    post,
    path = "/games",
    tag = "game",
    request_body = CreateGameRequest,
    responses(
        (status = 200, description = "Game created", body = JoinResponse),
        (status = 422, description = "Invalid host name", body = ErrorBody)
    )
)]
pub async fn create_game(
    State(state): State<SharedState>,
    Json(payload): Json<CreateGameRequest>,
) -> Result<Json<JoinResponse>, AppError> {
    payload.validate()?;
    Ok(Json(session_service::create_game(&state, payload)))
}

/// Fetch the current snapshot of a game.
#[utoipa::path(
    get,
    path = "/games/{code}",
    tag = "game",
    params(("code" = String, Path, description = "Join code of the game")),
    responses(
        (status = 200, description = "Game snapshot", body = GameSummary),
        (status = 404, description = "Unknown game", body = ErrorBody)
    )
)]
pub async fn get_game(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<GameSummary>, AppError> {
    Ok(Json(session_service::game_summary(&state, &code)?))
}

/// Join a lobby with its code.
#[utoipa::path(
    post,
    path = "/games/{code}/players",
    tag = "game",
    params(("code" = String, Path, description = "Join code of the game")),
    request_body = JoinGameRequest,
    responses(
        (status = 200, description = "Player joined", body = JoinResponse),
        (status = 404, description = "Unknown game", body = ErrorBody),
        (status = 409, description = "Game already running", body = ErrorBody),
        (status = 422, description = "Invalid player name", body = ErrorBody)
    )
)]
pub async fn join_game(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    Json(payload): Json<JoinGameRequest>,
) -> Result<Json<JoinResponse>, AppError> {
    payload.validate()?;
    Ok(Json(
        session_service::join_game(&state, &code, payload).await?,
    ))
}

/// Mark a player ready. The round starts once every player is ready.
#[utoipa::path(
    post,
    path = "/games/{code}/players/{player_id}/ready",
    tag = "game",
    params(
        ("code" = String, Path, description = "Join code of the game"),
        ("player_id" = Uuid, Path, description = "Identifier of the player")
    ),
    responses(
        (status = 200, description = "Player ready", body = GameSummary),
        (status = 404, description = "Unknown game or player", body = ErrorBody),
        (status = 409, description = "Game not in the lobby", body = ErrorBody)
    )
)]
pub async fn mark_ready(
    State(state): State<SharedState>,
    Path((code, player_id)): Path<(String, Uuid)>,
) -> Result<Json<GameSummary>, AppError> {
    Ok(Json(
        session_service::mark_ready(&state, &code, player_id).await?,
    ))
}

/// Leave a game. The game is discarded when its last player leaves.
#[utoipa::path(
    delete,
    path = "/games/{code}/players/{player_id}",
    tag = "game",
    params(
        ("code" = String, Path, description = "Join code of the game"),
        ("player_id" = Uuid, Path, description = "Identifier of the player")
    ),
    responses(
        (status = 204, description = "Player left"),
        (status = 404, description = "Unknown game or player", body = ErrorBody)
    )
)]
pub async fn leave_game(
    State(state): State<SharedState>,
    Path((code, player_id)): Path<(String, Uuid)>,
) -> Result<StatusCode, AppError> {
    session_service::leave_game(&state, &code, player_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Start the round on the host's behalf, or retry after a failed question fetch.
#[utoipa::path(
    post,
    path = "/games/{code}/start",
    tag = "game",
    params(("code" = String, Path, description = "Join code of the game")),
    request_body = HostActionRequest,
    responses(
        (status = 200, description = "Questions are being fetched", body = GameSummary),
        (status = 401, description = "Caller is not the host", body = ErrorBody),
        (status = 409, description = "Not enough ready players or round already running", body = ErrorBody)
    )
)]
pub async fn start_game(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    Json(payload): Json<HostActionRequest>,
) -> Result<Json<GameSummary>, AppError> {
    Ok(Json(
        session_service::start_game(&state, &code, payload).await?,
    ))
}

/// Answer the question currently open.
#[utoipa::path(
    post,
    path = "/games/{code}/answers",
    tag = "game",
    params(("code" = String, Path, description = "Join code of the game")),
    request_body = SubmitAnswerRequest,
    responses(
        (status = 200, description = "Answer scored", body = GameSummary),
        (status = 400, description = "Option out of range", body = ErrorBody),
        (status = 409, description = "Question closed or already answered", body = ErrorBody),
        (status = 422, description = "Invalid payload", body = ErrorBody)
    )
)]
pub async fn submit_answer(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    Json(payload): Json<SubmitAnswerRequest>,
) -> Result<Json<GameSummary>, AppError> {
    payload.validate()?;
    Ok(Json(
        session_service::submit_answer(&state, &code, payload).await?,
    ))
}

/// Return the game to a fresh lobby, keeping its code and players.
#[utoipa::path(
    post,
    path = "/games/{code}/reset",
    tag = "game",
    params(("code" = String, Path, description = "Join code of the game")),
    request_body = HostActionRequest,
    responses(
        (status = 200, description = "Game reset", body = GameSummary),
        (status = 401, description = "Caller is not the host", body = ErrorBody),
        (status = 404, description = "Unknown game or player", body = ErrorBody)
    )
)]
pub async fn reset_game(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    Json(payload): Json<HostActionRequest>,
) -> Result<Json<GameSummary>, AppError> {
    Ok(Json(
        session_service::reset_game(&state, &code, payload).await?,
    ))
}
