use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::{
        format_system_time, phase::VisibleGamePhase, question::QuestionView,
        validation::validate_display_name,
    },
    state::{
        game::{GameSession, Player, PlayerAnswer, Standing},
        state_machine::GamePhase,
    },
};

/// Payload used to open a new lobby; the caller becomes its host.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateGameRequest {
    #[validate(custom(function = "validate_display_name"))]
    pub host_name: String,
}

/// Payload used to join an existing lobby.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct JoinGameRequest {
    #[validate(custom(function = "validate_display_name"))]
    pub name: String,
}

/// Body of host-only actions: start (or retry after a failed question fetch) and reset.
#[derive(Debug, Deserialize, ToSchema)]
pub struct HostActionRequest {
    pub player_id: Uuid,
}

/// Answer to the question currently open.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SubmitAnswerRequest {
    pub player_id: Uuid,
    /// Question being answered; when set, answers to a question that already closed are rejected.
    #[serde(default)]
    pub question_id: Option<String>,
    /// Option index, or -1 to give up on the question.
    #[validate(range(min = -1, max = 3))]
    pub selected_option: i8,
    /// Client-measured answer time. Measured by the server when omitted.
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub elapsed_secs: Option<f64>,
}

/// Returned when a player enters a session (creation or join).
#[derive(Debug, Serialize, ToSchema)]
pub struct JoinResponse {
    /// Identifier the player must send with later requests.
    pub player_id: Uuid,
    pub game: GameSummary,
}

/// Read model of a game session.
#[derive(Debug, Serialize, ToSchema)]
pub struct GameSummary {
    pub code: String,
    pub phase: VisibleGamePhase,
    /// Phase being entered while the round's questions are fetched.
    pub pending_phase: Option<VisibleGamePhase>,
    pub version: usize,
    pub host_id: Uuid,
    pub created_at: String,
    pub players: Vec<PlayerSummary>,
    pub current_question_index: usize,
    pub question_count: usize,
    /// Open question, without its answer. Only present while a round is active.
    pub current_question: Option<QuestionView>,
    /// Last question fetch failure, cleared by the next start.
    pub last_error: Option<String>,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
/// Public projection of a player exposed to REST/SSE clients.
pub struct PlayerSummary {
    pub id: Uuid,
    pub name: String,
    pub score: u32,
    pub ready: bool,
    pub is_host: bool,
    pub answers: Vec<AnswerSummary>,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct AnswerSummary {
    pub question_id: String,
    pub selected_option: i8,
    pub correct: bool,
    pub elapsed_secs: f64,
    pub points: u32,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct StandingSummary {
    pub player_id: Uuid,
    pub name: String,
    pub score: u32,
}

impl From<&PlayerAnswer> for AnswerSummary {
    fn from(answer: &PlayerAnswer) -> Self {
        Self {
            question_id: answer.question_id.clone(),
            selected_option: answer.selected_option,
            correct: answer.correct,
            elapsed_secs: answer.elapsed_secs,
            points: answer.points,
        }
    }
}

impl From<&Standing> for StandingSummary {
    fn from(standing: &Standing) -> Self {
        Self {
            player_id: standing.player_id,
            name: standing.name.clone(),
            score: standing.score,
        }
    }
}

impl PlayerSummary {
    fn new(player: &Player, host_id: Uuid) -> Self {
        Self {
            id: player.id,
            name: player.name.clone(),
            score: player.score,
            ready: player.ready,
            is_host: player.id == host_id,
            answers: player.answers.iter().map(Into::into).collect(),
        }
    }
}

impl GameSummary {
    /// Project `session`; `time_limit_secs` is reported alongside the open question.
    pub fn new(session: &GameSession, time_limit_secs: u64) -> Self {
        let snapshot = session.machine.snapshot();
        let current_question = match snapshot.phase {
            GamePhase::Active => session.current_question().map(|question| {
                QuestionView::new(session.current_question_index, question, time_limit_secs)
            }),
            GamePhase::Lobby | GamePhase::GameOver => None,
        };

        Self {
            code: session.code.clone(),
            phase: snapshot.phase.into(),
            pending_phase: snapshot.pending.map(Into::into),
            version: snapshot.version,
            host_id: session.host_id,
            created_at: format_system_time(session.created_at),
            players: session
                .players
                .values()
                .map(|player| PlayerSummary::new(player, session.host_id))
                .collect(),
            current_question_index: session.current_question_index,
            question_count: session.questions.len(),
            current_question,
            last_error: session.last_error.clone(),
        }
    }
}
