use tracing::debug;

use crate::{dto::question::QuestionResponse, error::ServiceError, state::SharedState};

/// Serve the next buffered question for `game_id`, generating a fresh batch when needed.
///
/// Questions are keyed by the caller's identifier; it does not have to name a live game.
pub async fn generate_question(
    state: &SharedState,
    game_id: &str,
) -> Result<QuestionResponse, ServiceError> {
    let question = state.supply().fetch_next(game_id).await?;
    debug!(game = %game_id, question = %question.id, "question served");
    Ok(question.into())
}
