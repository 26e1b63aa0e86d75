use serde::Serialize;
use tracing::warn;

use crate::{
    dto::{
        game::AnswerSummary,
        question::QuestionView,
        sse::{
            AnswerScoredEvent, FetchFailedEvent, GameOverEvent, GameResetEvent, GameStartEvent,
            PlayerJoinedEvent, PlayerLeftEvent, PlayerReadyEvent, QuestionStartedEvent,
            ServerEvent,
        },
    },
    state::{SseHub, events::GameEvent},
};

const EVENT_PLAYER_JOINED: &str = "player.joined";
const EVENT_PLAYER_READY: &str = "player.ready";
const EVENT_PLAYER_LEFT: &str = "player.left";
const EVENT_GAME_START: &str = "game.start";
const EVENT_QUESTION_STARTED: &str = "question.started";
const EVENT_ANSWER_SCORED: &str = "answer.scored";
const EVENT_GAME_OVER: &str = "game.over";
const EVENT_GAME_RESET: &str = "game.reset";
const EVENT_FETCH_FAILED: &str = "fetch.failed";

/// Mirror a delivered bus event onto the game's SSE stream.
///
/// Raw answers and internal reports are not forwarded; their outcome is
/// announced through the events the orchestrator derives from them.
pub fn forward_game_event(hub: &SseHub, game: &str, event: &GameEvent) {
    match event {
        GameEvent::PlayerJoin { player_id, name } => send(
            hub,
            EVENT_PLAYER_JOINED,
            &PlayerJoinedEvent {
                player_id: *player_id,
                name: name.clone(),
            },
        ),
        GameEvent::PlayerReady { player_id } => send(
            hub,
            EVENT_PLAYER_READY,
            &PlayerReadyEvent {
                player_id: *player_id,
            },
        ),
        GameEvent::PlayerLeave { player_id } => send(
            hub,
            EVENT_PLAYER_LEFT,
            &PlayerLeftEvent {
                player_id: *player_id,
            },
        ),
        GameEvent::GameStart { requested_by } => send(
            hub,
            EVENT_GAME_START,
            &GameStartEvent {
                requested_by: *requested_by,
            },
        ),
        GameEvent::QuestionStarted {
            index,
            question,
            time_limit,
        } => send(
            hub,
            EVENT_QUESTION_STARTED,
            &QuestionStartedEvent {
                question: QuestionView::new(*index, question, time_limit.as_secs()),
            },
        ),
        GameEvent::AnswerScored {
            player_id,
            answer,
            total_score,
        } => send(
            hub,
            EVENT_ANSWER_SCORED,
            &AnswerScoredEvent {
                player_id: *player_id,
                answer: AnswerSummary::from(answer),
                total_score: *total_score,
            },
        ),
        GameEvent::GameOver { standings } => send(
            hub,
            EVENT_GAME_OVER,
            &GameOverEvent {
                standings: standings.iter().map(Into::into).collect(),
            },
        ),
        GameEvent::Reset => send(
            hub,
            EVENT_GAME_RESET,
            &GameResetEvent {
                game: game.to_string(),
            },
        ),
        GameEvent::QuestionFetchFailed { kind, detail, .. } => send(
            hub,
            EVENT_FETCH_FAILED,
            &FetchFailedEvent {
                error: kind.to_string(),
                details: detail.clone(),
            },
        ),
        GameEvent::PlayerAnswer { .. }
        | GameEvent::QuestionsLoaded { .. }
        | GameEvent::DeadlineElapsed { .. } => {}
    }
}

fn send(hub: &SseHub, event: &str, payload: &impl Serialize) {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => hub.broadcast(event),
        Err(err) => warn!(event, error = %err, "failed to serialize SSE payload"),
    }
}
