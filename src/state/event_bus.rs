//! Per-session publish/subscribe channel.
//!
//! Delivery is ordered and serialized: one publish at a time per bus, each event
//! handed to every subscriber in registration order. Handlers never publish
//! directly; they push derived events into the [`Outbox`], which the bus drains
//! after the current event reached everyone.

use std::{
    collections::VecDeque,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{error::ServiceError, state::events::GameEvent};

/// Callback invoked for every delivered event. Returning an error stops delivery of that event.
pub type EventHandler =
    Arc<dyn Fn(&GameEvent, &mut Outbox) -> Result<(), ServiceError> + Send + Sync>;

/// Token returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Events emitted by handlers while processing another event.
#[derive(Debug, Default)]
pub struct Outbox {
    events: VecDeque<GameEvent>,
}

impl Outbox {
    /// Queue an event for delivery once the current one is done.
    pub fn push(&mut self, event: GameEvent) {
        self.events.push_back(event);
    }
}

/// Event bus owned by one game session.
pub struct EventBus {
    game: String,
    subscribers: RwLock<Vec<(SubscriptionId, EventHandler)>>,
    next_id: AtomicU64,
    delivery_gate: Mutex<()>,
    closed: AtomicBool,
}

impl EventBus {
    /// Create an empty bus for the game identified by `game`.
    pub fn new(game: impl Into<String>) -> Self {
        Self {
            game: game.into(),
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
            delivery_gate: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    /// Register a handler; it receives events after every handler registered before it.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&GameEvent, &mut Outbox) -> Result<(), ServiceError> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Unknown or already removed ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }

    /// Number of registered handlers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether [`EventBus::disconnect`] was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Drop every handler and refuse further publishes.
    pub fn disconnect(&self) {
        self.closed.store(true, Ordering::Release);
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        debug!(game = %self.game, "event bus disconnected");
    }

    /// Deliver `event`, then every derived event, to all handlers.
    ///
    /// An error from a handler stops delivery of the event it was handling and
    /// discards whatever that event derived. The error is returned when it
    /// concerns `event` itself; failures on derived events are only logged.
    pub async fn publish(&self, event: GameEvent) -> Result<(), ServiceError> {
        if self.is_closed() {
            return Err(ServiceError::GameClosed(self.game.clone()));
        }
        let _gate = self.delivery_gate.lock().await;
        if self.is_closed() {
            return Err(ServiceError::GameClosed(self.game.clone()));
        }

        let mut pending = VecDeque::from([event]);
        let mut derived = false;
        while let Some(event) = pending.pop_front() {
            let mut outbox = Outbox::default();
            match self.deliver(&event, &mut outbox) {
                Ok(()) => pending.extend(outbox.events),
                Err(err) if !derived => return Err(err),
                Err(err) => {
                    warn!(
                        game = %self.game,
                        event = event.name(),
                        error = %err,
                        "derived event rejected"
                    );
                }
            }
            derived = true;
        }

        Ok(())
    }

    fn deliver(&self, event: &GameEvent, outbox: &mut Outbox) -> Result<(), ServiceError> {
        let handlers: Vec<EventHandler> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();

        for handler in handlers {
            handler(event, outbox)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;

    type Log = Arc<StdMutex<Vec<String>>>;

    fn recorder(
        log: &Log,
        label: &'static str,
    ) -> impl Fn(&GameEvent, &mut Outbox) -> Result<(), ServiceError> + Send + Sync + 'static {
        let log = log.clone();
        move |event: &GameEvent, _: &mut Outbox| {
            log.lock().unwrap().push(format!("{label}:{}", event.name()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn delivers_in_registration_order() {
        let bus = EventBus::new("ORDER1");
        let log: Log = Arc::default();
        bus.subscribe(recorder(&log, "first"));
        bus.subscribe(recorder(&log, "second"));

        bus.publish(GameEvent::Reset).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["first:reset", "second:reset"]);
    }

    #[tokio::test]
    async fn derived_events_follow_the_current_one() {
        let bus = EventBus::new("CHAIN1");
        let log: Log = Arc::default();
        bus.subscribe(|event, outbox| {
            if matches!(event, GameEvent::PlayerReady { .. }) {
                outbox.push(GameEvent::GameStart { requested_by: None });
            }
            Ok(())
        });
        bus.subscribe(recorder(&log, "observer"));

        bus.publish(GameEvent::PlayerReady {
            player_id: uuid::Uuid::new_v4(),
        })
        .await
        .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["observer:player_ready", "observer:game_start"]
        );
    }

    #[tokio::test]
    async fn handler_error_cancels_delivery() {
        let bus = EventBus::new("CANCEL");
        let log: Log = Arc::default();
        bus.subscribe(|_, outbox| {
            outbox.push(GameEvent::Reset);
            Err(ServiceError::InvalidInput("nope".into()))
        });
        bus.subscribe(recorder(&log, "late"));

        let err = bus
            .publish(GameEvent::PlayerLeave {
                player_id: uuid::Uuid::new_v4(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::InvalidInput(_)));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unsubscribed_handlers_stop_receiving() {
        let bus = EventBus::new("UNSUB1");
        let log: Log = Arc::default();
        let id = bus.subscribe(recorder(&log, "gone"));
        bus.subscribe(recorder(&log, "kept"));

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(GameEvent::Reset).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["kept:reset"]);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn disconnect_rejects_later_publishes() {
        let bus = EventBus::new("CLOSED");
        let log: Log = Arc::default();
        bus.subscribe(recorder(&log, "any"));

        bus.disconnect();

        assert_eq!(bus.subscriber_count(), 0);
        assert!(matches!(
            bus.publish(GameEvent::Reset).await,
            Err(ServiceError::GameClosed(code)) if code == "CLOSED"
        ));
        assert!(log.lock().unwrap().is_empty());
    }
}
