use axum::{
    Json, Router,
    extract::{Query, State},
    routing::post,
};
use validator::Validate;

use crate::{
    dto::question::{GenerateQuestionQuery, QuestionResponse},
    error::{AppError, ErrorBody},
    services::question_service,
    state::SharedState,
};

/// Question-fetch surface used by clients that drive their own rounds.
pub fn router() -> Router<SharedState> {
    Router::new().route("/api/generate-question", post(generate_question))
}

/// Return the next question buffered for `gameId`, generating a batch when the buffer is empty.
///
/// Batches are shared by every caller of the same `gameId`, so the persona
/// always comes from server configuration and any request body is ignored.
#[utoipa::path(
    post,
    path = "/api/generate-question",
    tag = "questions",
    params(GenerateQuestionQuery),
    responses(
        (status = 200, description = "Next question, answer included", body = QuestionResponse),
        (status = 422, description = "Missing or invalid game id", body = ErrorBody),
        (status = 502, description = "Generator failed or returned malformed output", body = ErrorBody)
    )
)]
pub async fn generate_question(
    State(state): State<SharedState>,
    Query(query): Query<GenerateQuestionQuery>,
) -> Result<Json<QuestionResponse>, AppError> {
    query.validate()?;
    Ok(Json(
        question_service::generate_question(&state, &query.game_id).await?,
    ))
}
