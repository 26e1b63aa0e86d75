use std::time::Duration;

use uuid::Uuid;

use crate::{
    questions::QuestionRecord,
    state::game::{PlayerAnswer, Standing},
};

/// Answer as submitted by a player.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerSubmission {
    /// Question the player believes is current; stale answers are rejected when set.
    pub question_id: Option<String>,
    /// Selected option (0..=3), or -1 to give up.
    pub selected_option: i8,
    /// Client-measured answer time; the server measures it when absent.
    pub elapsed_secs: Option<f64>,
}

/// Everything that can travel on a game's event bus.
///
/// Player actions are published by the service layer; the remaining variants are
/// published by the orchestrator, either directly from its background work or as
/// derived events while handling another one.
#[derive(Debug, Clone)]
pub enum GameEvent {
    /// A player joins the lobby.
    PlayerJoin {
        /// Identifier assigned to the new player.
        player_id: Uuid,
        /// Display name.
        name: String,
    },
    /// A lobby player declares themselves ready.
    PlayerReady {
        /// Player flagging readiness.
        player_id: Uuid,
    },
    /// Start the round. `requested_by` is `None` when triggered by the quorum.
    GameStart {
        /// Player who explicitly asked for the start.
        requested_by: Option<Uuid>,
    },
    /// A player answers the current question.
    PlayerAnswer {
        /// Answering player.
        player_id: Uuid,
        /// Submitted answer.
        answer: AnswerSubmission,
    },
    /// A player leaves the session.
    PlayerLeave {
        /// Departing player.
        player_id: Uuid,
    },
    /// Return to a fresh lobby.
    Reset,
    /// The questions of a round have been fetched.
    QuestionsLoaded {
        /// Round the fetch was started for.
        epoch: u64,
        /// Fetched questions, in play order.
        questions: Vec<QuestionRecord>,
    },
    /// Fetching the questions of a round failed.
    QuestionFetchFailed {
        /// Round the fetch was started for.
        epoch: u64,
        /// Stable error kind (`GenerationFailed`, `MalformedOutput`).
        kind: &'static str,
        /// Human-readable failure description.
        detail: String,
    },
    /// The answer window of a question closed.
    DeadlineElapsed {
        /// Round the timer was armed for.
        epoch: u64,
        /// Question the timer was armed for.
        question_index: usize,
    },
    /// A question is now open for answers.
    QuestionStarted {
        /// Position of the question in the round.
        index: usize,
        /// The question itself.
        question: QuestionRecord,
        /// Answer window.
        time_limit: Duration,
    },
    /// An answer (explicit or timed out) was scored.
    AnswerScored {
        /// Player credited.
        player_id: Uuid,
        /// Recorded answer.
        answer: PlayerAnswer,
        /// Player total after this answer.
        total_score: u32,
    },
    /// The last question closed.
    GameOver {
        /// Final scores, best first.
        standings: Vec<Standing>,
    },
}

impl GameEvent {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            GameEvent::PlayerJoin { .. } => "player_join",
            GameEvent::PlayerReady { .. } => "player_ready",
            GameEvent::GameStart { .. } => "game_start",
            GameEvent::PlayerAnswer { .. } => "player_answer",
            GameEvent::PlayerLeave { .. } => "player_leave",
            GameEvent::Reset => "reset",
            GameEvent::QuestionsLoaded { .. } => "questions_loaded",
            GameEvent::QuestionFetchFailed { .. } => "question_fetch_failed",
            GameEvent::DeadlineElapsed { .. } => "deadline_elapsed",
            GameEvent::QuestionStarted { .. } => "question_started",
            GameEvent::AnswerScored { .. } => "answer_scored",
            GameEvent::GameOver { .. } => "game_over",
        }
    }
}
