//! Per-game buffer of generated questions.
//!
//! Each game identifier owns its own slot guarded by an async mutex, so a
//! fetch for one game never waits on another. The slot lock is held across
//! the generator call: concurrent misses for the same game queue up behind a
//! single generation and are then served from the fresh batch.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use dashmap::DashMap;
use thiserror::Error;
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info, warn};

use super::{
    BATCH_SIZE, QuestionRecord,
    generator::{GenerationPrompt, GeneratorError, QuestionGenerator},
    validator::{ValidationError, parse_batch},
};

/// Default lifetime of a cached batch.
pub const DEFAULT_BATCH_TTL: Duration = Duration::from_secs(5 * 60);

/// Errors surfaced by [`QuestionSupply::fetch_next`].
#[derive(Debug, Error)]
pub enum SupplyError {
    /// The generator call itself failed; retrying may succeed.
    #[error("question generation failed: {0}")]
    GenerationFailed(#[source] GeneratorError),
    /// The generator answered but its output was rejected; only a new generation can help.
    #[error("generator returned malformed output: {0}")]
    MalformedOutput(#[from] ValidationError),
}

impl SupplyError {
    /// Stable error kind exposed to API clients.
    pub fn kind(&self) -> &'static str {
        match self {
            SupplyError::GenerationFailed(_) => "GenerationFailed",
            SupplyError::MalformedOutput(_) => "MalformedOutput",
        }
    }
}

/// Unserved questions from one generation, oldest first.
#[derive(Debug)]
struct QuestionBatch {
    queue: VecDeque<QuestionRecord>,
    created_at: Instant,
}

impl QuestionBatch {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.created_at) > ttl
    }

    fn has_live_questions(&self, now: Instant, ttl: Duration) -> bool {
        !self.queue.is_empty() && !self.is_expired(now, ttl)
    }
}

type BatchSlot = Arc<Mutex<Option<QuestionBatch>>>;

/// Question Supply Cache shared by every game.
pub struct QuestionSupply {
    generator: Arc<dyn QuestionGenerator>,
    prompt: GenerationPrompt,
    ttl: Duration,
    batches: DashMap<String, BatchSlot>,
}

impl QuestionSupply {
    /// Build a supply backed by `generator`, sending `prompt` on every cache miss.
    pub fn new(
        generator: Arc<dyn QuestionGenerator>,
        prompt: GenerationPrompt,
        ttl: Duration,
    ) -> Self {
        Self {
            generator,
            prompt,
            ttl,
            batches: DashMap::new(),
        }
    }

    /// Serve the next question for `game_id`, generating a fresh batch on a miss.
    ///
    /// Idle slots of every game are swept first. On a miss the first generated
    /// record is returned and the remaining ones are buffered in generation order.
    /// A failed fetch leaves nothing behind for `game_id`.
    pub async fn fetch_next(&self, game_id: &str) -> Result<QuestionRecord, SupplyError> {
        self.sweep();
        let slot = self.slot(game_id);
        let served = self.serve(game_id, &slot).await;
        if served.is_err() {
            self.release(game_id, &slot);
        }
        served
    }

    async fn serve(&self, game_id: &str, slot: &BatchSlot) -> Result<QuestionRecord, SupplyError> {
        let mut guard = slot.lock().await;

        if guard
            .as_ref()
            .is_some_and(|batch| batch.is_expired(Instant::now(), self.ttl))
        {
            debug!(game = %game_id, "question batch expired; discarding");
            guard.take();
        }

        if let Some(batch) = guard.as_mut()
            && let Some(record) = batch.queue.pop_front()
        {
            debug!(game = %game_id, remaining = batch.queue.len(), "serving buffered question");
            return Ok(record);
        }

        info!(game = %game_id, "generating question batch");
        let raw = self
            .generator
            .generate(self.prompt.clone())
            .await
            .map_err(|err| {
                warn!(game = %game_id, error = %err, "question generation failed");
                SupplyError::GenerationFailed(err)
            })?;

        let [first, rest @ ..] = parse_batch(&raw).map_err(|err| {
            warn!(game = %game_id, error = %err, "rejecting malformed question batch");
            SupplyError::MalformedOutput(err)
        })?;

        *guard = Some(QuestionBatch {
            queue: VecDeque::from(rest),
            created_at: Instant::now(),
        });
        debug!(game = %game_id, buffered = BATCH_SIZE - 1, "stored question batch");

        Ok(first)
    }

    /// Number of questions currently buffered for `game_id` (expired batches count as empty).
    pub async fn buffered(&self, game_id: &str) -> usize {
        let Some(slot) = self.batches.get(game_id).map(|entry| entry.value().clone()) else {
            return 0;
        };
        let guard = slot.lock().await;
        guard
            .as_ref()
            .filter(|batch| !batch.is_expired(Instant::now(), self.ttl))
            .map_or(0, |batch| batch.queue.len())
    }

    /// Drop the slot for `game_id` once its game is torn down.
    pub fn evict(&self, game_id: &str) {
        if self.batches.remove(game_id).is_some() {
            debug!(game = %game_id, "evicted question slot");
        }
    }

    fn slot(&self, game_id: &str) -> BatchSlot {
        self.batches
            .entry(game_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Drop every slot nobody is using that holds no live question.
    ///
    /// A slot cloned out of the map by a pending fetch has more than one owner
    /// and is kept, even before that fetch takes its lock.
    fn sweep(&self) {
        let now = Instant::now();
        let before = self.batches.len();
        self.batches.retain(|_, slot| {
            Arc::strong_count(slot) > 1
                || slot.try_lock().is_ok_and(|guard| {
                    guard
                        .as_ref()
                        .is_some_and(|batch| batch.has_live_questions(now, self.ttl))
                })
        });
        let swept = before.saturating_sub(self.batches.len());
        if swept > 0 {
            debug!(swept, "swept idle question slots");
        }
    }

    /// Forget the slot of a failed fetch unless another fetch is queued on it.
    fn release(&self, game_id: &str, slot: &BatchSlot) {
        // Owners at this point: the map and `slot`.
        let removed = self
            .batches
            .remove_if(game_id, |_, current| {
                Arc::ptr_eq(current, slot) && Arc::strong_count(current) == 2
            })
            .is_some();
        if removed {
            debug!(game = %game_id, "released question slot after failed fetch");
        }
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.batches.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::HashSet,
        sync::{
            Mutex as StdMutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use futures::{future::BoxFuture, future::join_all};
    use serde_json::Value;

    use super::*;
    use crate::questions::{generator::DEFAULT_SYSTEM_PROMPT, validator::tests::sample_question};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) enum StubReply {
        Batch,
        Garbage,
        Failure,
    }

    /// Generator double counting its calls; batches are numbered so records stay distinct.
    #[derive(Clone)]
    pub(crate) struct StubGenerator {
        calls: Arc<AtomicUsize>,
        reply: Arc<StdMutex<StubReply>>,
        delay: Duration,
    }

    impl StubGenerator {
        pub(crate) fn new(reply: StubReply) -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
                reply: Arc::new(StdMutex::new(reply)),
                delay: Duration::ZERO,
            }
        }

        pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub(crate) fn set_reply(&self, reply: StubReply) {
            *self.reply.lock().unwrap() = reply;
        }
    }

    impl QuestionGenerator for StubGenerator {
        fn generate(
            &self,
            _prompt: GenerationPrompt,
        ) -> BoxFuture<'static, Result<String, GeneratorError>> {
            let batch = self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = *self.reply.lock().unwrap();
            let delay = self.delay;
            Box::pin(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                match reply {
                    StubReply::Batch => Ok(Value::Array(
                        (0..BATCH_SIZE)
                            .map(|n| sample_question(batch * BATCH_SIZE + n))
                            .collect(),
                    )
                    .to_string()),
                    StubReply::Garbage => Ok("The questions are coming soon!".into()),
                    StubReply::Failure => Err(GeneratorError::Status {
                        status: 503,
                        body: "overloaded".into(),
                    }),
                }
            })
        }
    }

    pub(crate) fn supply_with(generator: &StubGenerator) -> QuestionSupply {
        QuestionSupply::new(
            Arc::new(generator.clone()),
            GenerationPrompt::batch(DEFAULT_SYSTEM_PROMPT),
            DEFAULT_BATCH_TTL,
        )
    }

    #[tokio::test]
    async fn serves_whole_batch_before_regenerating() {
        let generator = StubGenerator::new(StubReply::Batch);
        let supply = supply_with(&generator);

        let mut texts = Vec::new();
        for _ in 0..BATCH_SIZE {
            texts.push(supply.fetch_next("ABC123").await.unwrap().text);
        }
        assert_eq!(generator.calls(), 1);
        assert_eq!(
            texts,
            (0..BATCH_SIZE)
                .map(|n| format!("Question number {n}?"))
                .collect::<Vec<_>>()
        );
        assert_eq!(supply.buffered("ABC123").await, 0);

        let sixth = supply.fetch_next("ABC123").await.unwrap();
        assert_eq!(generator.calls(), 2);
        assert_eq!(sixth.text, format!("Question number {BATCH_SIZE}?"));
        assert_eq!(supply.buffered("ABC123").await, BATCH_SIZE - 1);
    }

    #[tokio::test]
    async fn games_do_not_share_batches() {
        let generator = StubGenerator::new(StubReply::Batch);
        let supply = supply_with(&generator);

        supply.fetch_next("GAME-A").await.unwrap();
        supply.fetch_next("GAME-B").await.unwrap();

        assert_eq!(generator.calls(), 2);
        assert_eq!(supply.buffered("GAME-A").await, BATCH_SIZE - 1);
        assert_eq!(supply.buffered("GAME-B").await, BATCH_SIZE - 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_batch_triggers_regeneration() {
        let generator = StubGenerator::new(StubReply::Batch);
        let supply = supply_with(&generator);

        supply.fetch_next("OLD").await.unwrap();
        tokio::time::advance(DEFAULT_BATCH_TTL - Duration::from_secs(1)).await;
        let second = supply.fetch_next("OLD").await.unwrap();
        assert_eq!(generator.calls(), 1);
        assert_eq!(second.text, "Question number 1?");

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(supply.buffered("OLD").await, 0);
        let fresh = supply.fetch_next("OLD").await.unwrap();
        assert_eq!(generator.calls(), 2);
        assert_eq!(fresh.text, format!("Question number {BATCH_SIZE}?"));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_share_one_generation() {
        let generator = StubGenerator::new(StubReply::Batch).with_delay(Duration::from_millis(50));
        let supply = Arc::new(supply_with(&generator));

        let fetches = (0..BATCH_SIZE).map(|_| {
            let supply = supply.clone();
            tokio::spawn(async move { supply.fetch_next("RACE").await })
        });
        let records: Vec<QuestionRecord> = join_all(fetches)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        assert_eq!(generator.calls(), 1);
        let ids: HashSet<_> = records.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids.len(), BATCH_SIZE);
        let texts: HashSet<_> = records.iter().map(|r| r.text.clone()).collect();
        let expected: HashSet<_> = (0..BATCH_SIZE)
            .map(|n| format!("Question number {n}?"))
            .collect();
        assert_eq!(texts, expected);
        assert_eq!(supply.buffered("RACE").await, 0);
    }

    #[tokio::test]
    async fn generator_failure_propagates_without_caching() {
        let generator = StubGenerator::new(StubReply::Failure);
        let supply = supply_with(&generator);

        let err = supply.fetch_next("DOWN").await.unwrap_err();
        assert_eq!(err.kind(), "GenerationFailed");
        assert_eq!(supply.buffered("DOWN").await, 0);

        generator.set_reply(StubReply::Batch);
        assert!(supply.fetch_next("DOWN").await.is_ok());
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn malformed_output_is_reported() {
        let generator = StubGenerator::new(StubReply::Garbage);
        let supply = supply_with(&generator);

        let err = supply.fetch_next("JUNK").await.unwrap_err();
        assert_eq!(err.kind(), "MalformedOutput");
        assert!(matches!(
            err,
            SupplyError::MalformedOutput(ValidationError::NoArrayFound { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_slots_are_reclaimed_on_fetch() {
        let generator = StubGenerator::new(StubReply::Batch);
        let supply = supply_with(&generator);

        for n in 0..50 {
            supply.fetch_next(&format!("LIVE-{n}")).await.unwrap();
        }
        generator.set_reply(StubReply::Failure);
        for n in 0..50 {
            supply.fetch_next(&format!("FAIL-{n}")).await.unwrap_err();
        }
        assert_eq!(supply.slot_count(), 50);

        tokio::time::advance(DEFAULT_BATCH_TTL * 10).await;
        generator.set_reply(StubReply::Batch);
        supply.fetch_next("FRESH").await.unwrap();

        assert_eq!(supply.slot_count(), 1);
        assert_eq!(supply.buffered("FRESH").await, BATCH_SIZE - 1);
        assert_eq!(supply.buffered("LIVE-0").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_fetch_keeps_its_slot_after_a_failure() {
        let generator =
            StubGenerator::new(StubReply::Failure).with_delay(Duration::from_millis(50));
        let supply = Arc::new(supply_with(&generator));

        let first = tokio::spawn({
            let supply = supply.clone();
            async move { supply.fetch_next("BUSY").await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        generator.set_reply(StubReply::Batch);
        let second = tokio::spawn({
            let supply = supply.clone();
            async move { supply.fetch_next("BUSY").await }
        });

        assert!(first.await.unwrap().is_err());
        assert!(second.await.unwrap().is_ok());
        assert_eq!(generator.calls(), 2);
        assert_eq!(supply.slot_count(), 1);
        assert_eq!(supply.buffered("BUSY").await, BATCH_SIZE - 1);
    }

    #[tokio::test]
    async fn evict_forgets_buffered_questions() {
        let generator = StubGenerator::new(StubReply::Batch);
        let supply = supply_with(&generator);

        supply.fetch_next("GONE").await.unwrap();
        supply.evict("GONE");
        assert_eq!(supply.buffered("GONE").await, 0);

        supply.fetch_next("GONE").await.unwrap();
        assert_eq!(generator.calls(), 2);
    }
}
