use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;

use crate::{
    error::{AppError, ErrorBody},
    services::sse_service,
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/games/{code}/events",
    tag = "sse",
    params(("code" = String, Path, description = "Join code of the game")),
    responses(
        (status = 200, description = "Game event stream", content_type = "text/event-stream", body = String),
        (status = 404, description = "Unknown game", body = ErrorBody)
    )
)]
/// Stream lifecycle notifications of one game.
pub async fn game_stream(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let (receiver, handshake) = sse_service::subscribe_game(&state, &code)?;
    info!(game = %code, "new SSE connection");
    Ok(sse_service::to_sse_stream(receiver, handshake, code))
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/games/{code}/events", get(game_stream))
}
