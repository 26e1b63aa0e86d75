use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dto::{
    game::{AnswerSummary, StandingSummary},
    question::QuestionView,
};

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    /// Code of the game the stream belongs to.
    pub game: String,
    /// Human-readable message confirming the subscription.
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when a player joins the lobby.
pub struct PlayerJoinedEvent {
    pub player_id: Uuid,
    pub name: String,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when a player flags themselves ready.
pub struct PlayerReadyEvent {
    pub player_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when a player leaves the session.
pub struct PlayerLeftEvent {
    pub player_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when a round starts loading its questions.
pub struct GameStartEvent {
    /// `None` when the start was triggered by the ready quorum.
    pub requested_by: Option<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when a new question opens.
pub struct QuestionStartedEvent {
    pub question: QuestionView,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast for every scored answer, including timeouts.
pub struct AnswerScoredEvent {
    pub player_id: Uuid,
    pub answer: AnswerSummary,
    pub total_score: u32,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast once the last question closed.
pub struct GameOverEvent {
    pub standings: Vec<StandingSummary>,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the session returns to the lobby.
pub struct GameResetEvent {
    pub game: String,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the questions of a round could not be fetched.
pub struct FetchFailedEvent {
    /// `GenerationFailed` or `MalformedOutput`.
    pub error: String,
    pub details: String,
}
