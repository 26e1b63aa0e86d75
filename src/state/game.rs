use std::{cmp::Reverse, time::Duration, time::SystemTime};

use indexmap::IndexMap;
use uuid::Uuid;

use crate::{
    questions::QuestionRecord,
    state::state_machine::{GamePhase, GameStateMachine},
};

/// Minimum number of players for a round to start.
pub const MIN_PLAYERS: usize = 2;
/// Base points awarded for any correct answer.
pub const BASE_POINTS: u32 = 1000;
/// Maximum speed bonus, awarded for an instant correct answer.
pub const MAX_SPEED_BONUS: f64 = 500.0;

/// One answer recorded against a question.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerAnswer {
    /// Identifier of the question the answer belongs to.
    pub question_id: String,
    /// Chosen option, or [`PlayerAnswer::TIMED_OUT`].
    pub selected_option: i8,
    /// Whether the selected option is the correct one.
    pub correct: bool,
    /// Seconds elapsed between question start and the answer, within `[0, limit]`.
    pub elapsed_secs: f64,
    /// Points credited for this answer.
    pub points: u32,
}

impl PlayerAnswer {
    /// Sentinel option recorded when the deadline passed without an answer.
    pub const TIMED_OUT: i8 = -1;
}

/// Participant tracked during a game session.
#[derive(Debug, Clone)]
pub struct Player {
    /// Identifier unique within the session.
    pub id: Uuid,
    /// Display name chosen on join.
    pub name: String,
    /// Cumulative score for the current round.
    pub score: u32,
    /// Whether the player asked for the round to start.
    pub ready: bool,
    /// Answers submitted during the current round, in question order.
    pub answers: Vec<PlayerAnswer>,
}

impl Player {
    fn new(id: Uuid, name: String, ready: bool) -> Self {
        Self {
            id,
            name,
            score: 0,
            ready,
            answers: Vec::new(),
        }
    }

    /// Whether an answer for `question_id` was already recorded.
    pub fn has_answered(&self, question_id: &str) -> bool {
        self.answers
            .iter()
            .any(|answer| answer.question_id == question_id)
    }
}

/// Final position of a player once the round is over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Standing {
    /// Player identifier.
    pub player_id: Uuid,
    /// Display name.
    pub name: String,
    /// Total points earned during the round.
    pub score: u32,
}

/// Authoritative record for one game, mutated only by its orchestrator.
#[derive(Debug, Clone)]
pub struct GameSession {
    /// Short join code, also used as the question cache key.
    pub code: String,
    /// Creator of the session. Never reassigned.
    pub host_id: Uuid,
    /// Players keyed by identifier, in join order.
    pub players: IndexMap<Uuid, Player>,
    /// Questions of the active round.
    pub questions: Vec<QuestionRecord>,
    /// Index of the question being played.
    pub current_question_index: usize,
    /// Lobby/Active/GameOver lifecycle.
    pub machine: GameStateMachine,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Description of the last failed question fetch, cleared on the next start.
    pub last_error: Option<String>,
}

impl GameSession {
    /// Create a lobby with the host registered and already ready.
    pub fn new(code: String, host_name: String) -> Self {
        let host_id = Uuid::new_v4();
        let mut players = IndexMap::new();
        players.insert(host_id, Player::new(host_id, host_name, true));

        Self {
            code,
            host_id,
            players,
            questions: Vec::new(),
            current_question_index: 0,
            machine: GameStateMachine::new(),
            created_at: SystemTime::now(),
            last_error: None,
        }
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> GamePhase {
        self.machine.phase()
    }

    /// Register a new, not yet ready player. Returns `false` when the id is taken.
    pub fn add_player(&mut self, id: Uuid, name: String) -> bool {
        if self.players.contains_key(&id) {
            return false;
        }
        self.players.insert(id, Player::new(id, name, false));
        true
    }

    /// Remove a player, keeping the join order of the others.
    pub fn remove_player(&mut self, id: Uuid) -> Option<Player> {
        self.players.shift_remove(&id)
    }

    /// Whether the host is still part of the session.
    pub fn host_present(&self) -> bool {
        self.players.contains_key(&self.host_id)
    }

    /// Whether every player is ready, there are enough of them, and the host is still here.
    pub fn quorum_reached(&self) -> bool {
        self.players.len() >= MIN_PLAYERS
            && self.host_present()
            && self.players.values().all(|player| player.ready)
    }

    /// Number of players flagged ready.
    pub fn ready_count(&self) -> usize {
        self.players.values().filter(|player| player.ready).count()
    }

    /// Question currently being played, if a round is loaded.
    pub fn current_question(&self) -> Option<&QuestionRecord> {
        self.questions.get(self.current_question_index)
    }

    /// Whether the current question is the last of the round.
    pub fn on_last_question(&self) -> bool {
        self.current_question_index + 1 >= self.questions.len()
    }

    /// Record an answer for the current question and credit its points.
    ///
    /// Returns `None` when no question is being played or the player is unknown.
    pub fn record_answer(
        &mut self,
        player_id: Uuid,
        selected_option: i8,
        elapsed: Duration,
        limit: Duration,
    ) -> Option<PlayerAnswer> {
        let question = self.questions.get(self.current_question_index)?;
        let player = self.players.get_mut(&player_id)?;

        let elapsed = elapsed.min(limit);
        let correct = question.is_correct(selected_option);
        let answer = PlayerAnswer {
            question_id: question.id.clone(),
            selected_option,
            correct,
            elapsed_secs: elapsed.as_secs_f64(),
            points: answer_points(correct, elapsed, limit),
        };

        player.score += answer.points;
        player.answers.push(answer.clone());
        Some(answer)
    }

    /// Players with no answer recorded for the current question.
    pub fn unanswered_players(&self) -> Vec<Uuid> {
        let Some(question) = self.current_question() else {
            return Vec::new();
        };
        self.players
            .values()
            .filter(|player| !player.has_answered(&question.id))
            .map(|player| player.id)
            .collect()
    }

    /// Scores sorted from best to worst, ties keeping join order.
    pub fn standings(&self) -> Vec<Standing> {
        let mut standings: Vec<Standing> = self
            .players
            .values()
            .map(|player| Standing {
                player_id: player.id,
                name: player.name.clone(),
                score: player.score,
            })
            .collect();
        standings.sort_by_key(|standing| Reverse(standing.score));
        standings
    }

    /// Clear the round: questions, index, scores and answers.
    pub fn reset_round(&mut self) {
        self.questions.clear();
        self.current_question_index = 0;
        for player in self.players.values_mut() {
            player.score = 0;
            player.answers.clear();
        }
    }

    /// Return to a fresh lobby: only the host stays ready.
    pub fn reset_lobby(&mut self) {
        self.reset_round();
        self.last_error = None;
        let host_id = self.host_id;
        for player in self.players.values_mut() {
            player.ready = player.id == host_id;
        }
    }
}

/// Points for one answer: nothing when incorrect, otherwise the base plus a linear speed bonus.
pub fn answer_points(correct: bool, elapsed: Duration, limit: Duration) -> u32 {
    if !correct {
        return 0;
    }
    if limit.is_zero() {
        return BASE_POINTS;
    }

    let ratio = elapsed.min(limit).as_secs_f64() / limit.as_secs_f64();
    let bonus = (MAX_SPEED_BONUS * (1.0 - ratio)).round().max(0.0);
    BASE_POINTS + bonus as u32
}
