use tracing::debug;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report liveness together with the number of registered games.
pub fn health_status(state: &SharedState) -> HealthResponse {
    let games = state.game_count();
    debug!(games, "health check");
    HealthResponse::ok(games)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        questions::supply::tests::{StubGenerator, StubReply},
        state::tests::test_state,
    };

    #[test]
    fn counts_registered_games() {
        let generator = StubGenerator::new(StubReply::Batch);
        let state = test_state(&generator);
        state.create_game("Host".into());
        state.create_game("Other".into());

        let health = health_status(&state);
        assert_eq!(health.status, "ok");
        assert_eq!(health.games, 2);
    }
}
