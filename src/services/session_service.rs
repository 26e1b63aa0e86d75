//! Player-facing game operations. Each call turns a request into a bus event
//! for the game's orchestrator and answers with the resulting read model.

use tracing::info;
use uuid::Uuid;

use crate::{
    dto::game::{
        CreateGameRequest, GameSummary, HostActionRequest, JoinGameRequest, JoinResponse,
        SubmitAnswerRequest,
    },
    error::ServiceError,
    state::{GameHandle, SharedState, events::AnswerSubmission, events::GameEvent},
};

fn summarize(handle: &GameHandle) -> GameSummary {
    let orchestrator = handle.orchestrator();
    let limit = orchestrator.time_limit().as_secs();
    orchestrator.with_session(|session| GameSummary::new(session, limit))
}

/// Open a lobby; the caller is registered as its ready host.
pub fn create_game(state: &SharedState, payload: CreateGameRequest) -> JoinResponse {
    let handle = state.create_game(payload.host_name.trim().to_string());
    let game = summarize(&handle);
    JoinResponse {
        player_id: game.host_id,
        game,
    }
}

/// Current snapshot of a game.
pub fn game_summary(state: &SharedState, code: &str) -> Result<GameSummary, ServiceError> {
    let handle = state.game(code)?;
    Ok(summarize(&handle))
}

/// Register a new player in the lobby identified by `code`.
pub async fn join_game(
    state: &SharedState,
    code: &str,
    payload: JoinGameRequest,
) -> Result<JoinResponse, ServiceError> {
    let handle = state.game(code)?;
    let player_id = Uuid::new_v4();
    handle
        .publish(GameEvent::PlayerJoin {
            player_id,
            name: payload.name.trim().to_string(),
        })
        .await?;

    Ok(JoinResponse {
        player_id,
        game: summarize(&handle),
    })
}

/// Flag a player ready. The round starts on its own once every player is.
pub async fn mark_ready(
    state: &SharedState,
    code: &str,
    player_id: Uuid,
) -> Result<GameSummary, ServiceError> {
    let handle = state.game(code)?;
    handle.publish(GameEvent::PlayerReady { player_id }).await?;
    Ok(summarize(&handle))
}

/// Remove a player; the game is discarded once nobody is left.
pub async fn leave_game(
    state: &SharedState,
    code: &str,
    player_id: Uuid,
) -> Result<(), ServiceError> {
    let handle = state.game(code)?;
    handle.publish(GameEvent::PlayerLeave { player_id }).await?;

    if handle
        .orchestrator()
        .with_session(|session| session.players.is_empty())
    {
        info!(game = %code, "last player left");
        state.remove_game(code);
    }
    Ok(())
}

/// Host-issued start, also used to retry after a failed question fetch.
pub async fn start_game(
    state: &SharedState,
    code: &str,
    payload: HostActionRequest,
) -> Result<GameSummary, ServiceError> {
    let handle = state.game(code)?;
    handle
        .publish(GameEvent::GameStart {
            requested_by: Some(payload.player_id),
        })
        .await?;
    Ok(summarize(&handle))
}

/// Submit an answer to the question currently open.
pub async fn submit_answer(
    state: &SharedState,
    code: &str,
    payload: SubmitAnswerRequest,
) -> Result<GameSummary, ServiceError> {
    let handle = state.game(code)?;
    handle
        .publish(GameEvent::PlayerAnswer {
            player_id: payload.player_id,
            answer: AnswerSubmission {
                question_id: payload.question_id,
                selected_option: payload.selected_option,
                elapsed_secs: payload.elapsed_secs,
            },
        })
        .await?;
    Ok(summarize(&handle))
}

/// Return the session to a fresh lobby. Only the host may do this, or any
/// remaining player once the host has left.
pub async fn reset_game(
    state: &SharedState,
    code: &str,
    payload: HostActionRequest,
) -> Result<GameSummary, ServiceError> {
    let handle = state.game(code)?;
    let player_id = payload.player_id;
    handle.orchestrator().with_session(|session| {
        if !session.players.contains_key(&player_id) {
            return Err(ServiceError::UnknownPlayer(player_id));
        }
        if session.host_present() && session.host_id != player_id {
            return Err(ServiceError::Unauthorized(
                "only the host can reset the game".into(),
            ));
        }
        Ok(())
    })?;

    handle.publish(GameEvent::Reset).await?;
    Ok(summarize(&handle))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        dto::phase::VisibleGamePhase,
        questions::supply::tests::{StubGenerator, StubReply},
        state::tests::test_state,
    };

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    fn create(state: &SharedState) -> JoinResponse {
        create_game(
            state,
            CreateGameRequest {
                host_name: " Host ".into(),
            },
        )
    }

    async fn join(state: &SharedState, code: &str, name: &str) -> Uuid {
        join_game(state, code, JoinGameRequest { name: name.into() })
            .await
            .unwrap()
            .player_id
    }

    #[tokio::test(start_paused = true)]
    async fn ready_lobby_starts_and_scores_answers() {
        let generator = StubGenerator::new(StubReply::Batch).with_delay(Duration::from_millis(5));
        let state = test_state(&generator);
        let created = create(&state);
        let code = created.game.code.clone();
        assert_eq!(created.game.players[0].name, "Host");
        assert!(created.game.players[0].is_host);

        let guest = join(&state, &code, "Guest").await;
        let summary = mark_ready(&state, &code, guest).await.unwrap();
        assert_eq!(summary.pending_phase, Some(VisibleGamePhase::Active));

        settle().await;
        let summary = game_summary(&state, &code).unwrap();
        assert_eq!(summary.phase, VisibleGamePhase::Active);
        assert_eq!(summary.question_count, 5);
        let open = summary.current_question.unwrap();
        assert_eq!(open.index, 0);

        let correct = state
            .game(&code)
            .unwrap()
            .orchestrator()
            .with_session(|session| session.current_question().unwrap().correct_index);
        let summary = submit_answer(
            &state,
            &code,
            SubmitAnswerRequest {
                player_id: created.player_id,
                question_id: Some(open.id),
                selected_option: correct as i8,
                elapsed_secs: Some(0.0),
            },
        )
        .await
        .unwrap();

        assert_eq!(summary.current_question_index, 1);
        let host = summary
            .players
            .iter()
            .find(|player| player.id == created.player_id)
            .unwrap();
        assert_eq!(host.score, 1500);
    }

    #[tokio::test(start_paused = true)]
    async fn only_the_host_starts_or_resets() {
        let generator = StubGenerator::new(StubReply::Batch);
        let state = test_state(&generator);
        let created = create(&state);
        let code = created.game.code.clone();
        let guest = join(&state, &code, "Guest").await;

        let err = start_game(&state, &code, HostActionRequest { player_id: guest })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));

        let err = reset_game(&state, &code, HostActionRequest { player_id: guest })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));

        let stranger = Uuid::new_v4();
        let err = reset_game(&state, &code, HostActionRequest { player_id: stranger })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::UnknownPlayer(id) if id == stranger));

        let summary = reset_game(
            &state,
            &code,
            HostActionRequest {
                player_id: created.player_id,
            },
        )
        .await
        .unwrap();
        assert_eq!(summary.phase, VisibleGamePhase::Lobby);
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn guests_may_reset_once_the_host_left() {
        let generator = StubGenerator::new(StubReply::Batch);
        let state = test_state(&generator);
        let created = create(&state);
        let code = created.game.code.clone();
        let guest = join(&state, &code, "Guest").await;

        leave_game(&state, &code, created.player_id).await.unwrap();
        let summary = reset_game(&state, &code, HostActionRequest { player_id: guest })
            .await
            .unwrap();
        assert_eq!(summary.phase, VisibleGamePhase::Lobby);
        assert_eq!(summary.players.len(), 1);
    }

    #[tokio::test]
    async fn game_is_removed_when_everyone_leaves() {
        let generator = StubGenerator::new(StubReply::Batch);
        let state = test_state(&generator);
        let created = create(&state);
        let code = created.game.code.clone();
        let guest = join(&state, &code, "Guest").await;

        leave_game(&state, &code, created.player_id).await.unwrap();
        assert_eq!(state.game_count(), 1);
        let summary = game_summary(&state, &code).unwrap();
        assert_eq!(summary.players.len(), 1);

        leave_game(&state, &code, guest).await.unwrap();
        assert_eq!(state.game_count(), 0);
        assert!(matches!(
            game_summary(&state, &code),
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unknown_game_is_not_found() {
        let generator = StubGenerator::new(StubReply::Batch);
        let state = test_state(&generator);

        let err = join_game(
            &state,
            "NOPE00",
            JoinGameRequest {
                name: "Guest".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }
}
