use serde::Serialize;
use utoipa::ToSchema;

use crate::state::state_machine::GamePhase;

/// Publicly visible game phase exposed to clients (REST/SSE).
#[derive(Debug, Serialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VisibleGamePhase {
    /// Waiting for players to join and get ready.
    Lobby,
    /// Questions are being played.
    Active,
    /// Showing final scores.
    GameOver,
}

impl From<GamePhase> for VisibleGamePhase {
    fn from(value: GamePhase) -> Self {
        match value {
            GamePhase::Lobby => VisibleGamePhase::Lobby,
            GamePhase::Active => VisibleGamePhase::Active,
            GamePhase::GameOver => VisibleGamePhase::GameOver,
        }
    }
}
