pub mod event_bus;
pub mod events;
pub mod game;
pub mod orchestrator;
mod sse;
pub mod state_machine;

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use rand::Rng;
use tracing::info;

use crate::{
    config::AppConfig,
    error::ServiceError,
    questions::QuestionSupply,
    services::sse_events::forward_game_event,
    state::{event_bus::EventBus, events::GameEvent, game::GameSession, orchestrator::Orchestrator},
};

pub use self::sse::SseHub;
pub use self::state_machine::{AbortError, ApplyError, Plan, PlanError, PlanId, Snapshot};

pub type SharedState = Arc<AppState>;

/// Length of a game code.
pub const CODE_LENGTH: usize = 6;
const CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Everything attached to one live game: its bus, orchestrator and SSE hub.
pub struct GameHandle {
    code: String,
    bus: Arc<EventBus>,
    orchestrator: Arc<Orchestrator>,
    sse: SseHub,
}

impl GameHandle {
    /// Wire a session to a fresh bus: the orchestrator subscribes first, the SSE bridge second,
    /// so clients only hear about events the orchestrator accepted.
    fn assemble(session: GameSession, supply: Arc<QuestionSupply>, config: &AppConfig) -> Self {
        let code = session.code.clone();
        let bus = Arc::new(EventBus::new(code.clone()));
        let orchestrator = Arc::new(Orchestrator::new(
            session,
            supply,
            Arc::downgrade(&bus),
            config.question_time_limit(),
        ));
        orchestrator.attach(&bus);

        let sse = SseHub::new(config.event_channel_capacity());
        let bridge = sse.clone();
        let bridge_code = code.clone();
        bus.subscribe(move |event, _| {
            forward_game_event(&bridge, &bridge_code, event);
            Ok(())
        });

        Self {
            code,
            bus,
            orchestrator,
            sse,
        }
    }

    /// Join code of the game.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Orchestrator owning the session.
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Broadcast hub of the game's SSE stream.
    pub fn sse(&self) -> &SseHub {
        &self.sse
    }

    /// Publish an event on the game's bus.
    pub async fn publish(&self, event: GameEvent) -> Result<(), ServiceError> {
        self.bus.publish(event).await
    }
}

/// Central application state: the game registry and the shared question supply.
pub struct AppState {
    games: DashMap<String, Arc<GameHandle>>,
    supply: Arc<QuestionSupply>,
    config: AppConfig,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    pub fn new(supply: Arc<QuestionSupply>, config: AppConfig) -> SharedState {
        Arc::new(Self {
            games: DashMap::new(),
            supply,
            config,
        })
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Question supply shared by every game.
    pub fn supply(&self) -> &QuestionSupply {
        &self.supply
    }

    /// Open a new lobby hosted by `host_name` under a fresh code.
    pub fn create_game(&self, host_name: String) -> Arc<GameHandle> {
        loop {
            let code = generate_code();
            let Entry::Vacant(slot) = self.games.entry(code.clone()) else {
                continue;
            };

            let session = GameSession::new(code.clone(), host_name);
            let handle = Arc::new(GameHandle::assemble(
                session,
                Arc::clone(&self.supply),
                &self.config,
            ));
            slot.insert(Arc::clone(&handle));
            info!(game = %code, "game created");
            return handle;
        }
    }

    /// Look up a live game by code.
    pub fn game(&self, code: &str) -> Result<Arc<GameHandle>, ServiceError> {
        self.games
            .get(code)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ServiceError::NotFound(format!("game `{code}` not found")))
    }

    /// Tear a game down: disconnect its bus, stop its work and forget its questions.
    pub fn remove_game(&self, code: &str) -> bool {
        let Some((_, handle)) = self.games.remove(code) else {
            return false;
        };

        handle.bus.disconnect();
        handle.orchestrator.teardown();
        self.supply.evict(code);
        info!(game = %code, "game removed");
        true
    }

    /// Number of registered games.
    pub fn game_count(&self) -> usize {
        self.games.len()
    }
}

fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| char::from(CODE_CHARSET[rng.random_range(0..CODE_CHARSET.len())]))
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use super::*;
    use crate::questions::supply::tests::{StubGenerator, StubReply, supply_with};

    pub(crate) fn test_state(generator: &StubGenerator) -> SharedState {
        AppState::new(Arc::new(supply_with(generator)), AppConfig::default())
    }

    #[test]
    fn codes_are_six_uppercase_alphanumerics() {
        for _ in 0..100 {
            let code = generate_code();
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(
                code.chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
            );
        }
    }

    #[test]
    fn games_use_the_configured_time_limit() {
        let generator = StubGenerator::new(StubReply::Batch);
        let config = AppConfig::default().with_question_time_limit(Duration::from_secs(12));
        let state = AppState::new(Arc::new(supply_with(&generator)), config);

        let handle = state.create_game("Host".into());
        assert_eq!(handle.orchestrator().time_limit(), Duration::from_secs(12));
        assert_eq!(state.game_count(), 1);
    }

    #[tokio::test]
    async fn remove_game_disconnects_everything() {
        let generator = StubGenerator::new(StubReply::Batch);
        let state = test_state(&generator);
        let handle = state.create_game("Host".into());
        let code = handle.code().to_string();

        assert_eq!(handle.bus.subscriber_count(), 2);
        state.supply().fetch_next(&code).await.unwrap();

        assert!(state.remove_game(&code));
        assert!(!state.remove_game(&code));
        assert!(handle.bus.is_closed());
        assert_eq!(state.supply().buffered(&code).await, 0);
        assert!(matches!(state.game(&code), Err(ServiceError::NotFound(_))));
        assert!(matches!(
            handle.publish(GameEvent::Reset).await,
            Err(ServiceError::GameClosed(_))
        ));
    }
}
