//! Drives one game session through Lobby → Active → GameOver.
//!
//! The orchestrator is a bus subscriber: every mutation of its [`GameSession`]
//! happens inside [`Orchestrator::handle`], which never awaits. Work that takes
//! time (fetching the round's questions, waiting for a question deadline) runs
//! in spawned tasks that report back by publishing on the bus. Each round gets
//! an epoch number so reports from superseded work are recognised and refused.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use tokio::{task::AbortHandle, time::Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::ServiceError,
    questions::{BATCH_SIZE, OPTION_COUNT, QuestionRecord, QuestionSupply, SupplyError},
    state::{
        PlanId,
        event_bus::{EventBus, Outbox, SubscriptionId},
        events::{AnswerSubmission, GameEvent},
        game::{GameSession, PlayerAnswer},
        state_machine::{GamePhase, PhaseEvent},
    },
};

/// Background work and timing attached to the current round.
#[derive(Debug, Default)]
struct RoundControl {
    epoch: u64,
    fetch: Option<AbortHandle>,
    deadline: Option<AbortHandle>,
    start_plan: Option<PlanId>,
    question_started_at: Option<Instant>,
}

impl RoundControl {
    /// Abort in-flight work and move to a new epoch.
    fn supersede(&mut self) -> u64 {
        self.epoch += 1;
        if let Some(fetch) = self.fetch.take() {
            fetch.abort();
        }
        self.cancel_deadline();
        self.start_plan = None;
        self.question_started_at = None;
        self.epoch
    }

    fn cancel_deadline(&mut self) {
        if let Some(deadline) = self.deadline.take() {
            deadline.abort();
        }
    }
}

struct Inner {
    session: GameSession,
    round: RoundControl,
}

/// Owner of a game session's state machine.
pub struct Orchestrator {
    code: String,
    inner: Mutex<Inner>,
    supply: Arc<QuestionSupply>,
    bus: Weak<EventBus>,
    time_limit: Duration,
}

impl Orchestrator {
    /// Take ownership of `session`. Background work reports through `bus`.
    pub fn new(
        session: GameSession,
        supply: Arc<QuestionSupply>,
        bus: Weak<EventBus>,
        time_limit: Duration,
    ) -> Self {
        Self {
            code: session.code.clone(),
            inner: Mutex::new(Inner {
                session,
                round: RoundControl::default(),
            }),
            supply,
            bus,
            time_limit,
        }
    }

    /// Register the orchestrator on `bus`.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> SubscriptionId {
        let orchestrator = Arc::clone(self);
        bus.subscribe(move |event, outbox| orchestrator.handle(event, outbox))
    }

    /// Answer window of every question.
    pub fn time_limit(&self) -> Duration {
        self.time_limit
    }

    /// Read the session under the orchestrator's lock.
    pub fn with_session<R>(&self, read: impl FnOnce(&GameSession) -> R) -> R {
        read(&self.lock().session)
    }

    /// Stop every background task. Called once the session is being discarded.
    pub fn teardown(&self) {
        let mut inner = self.lock();
        inner.round.supersede();
        inner.session.machine.discard_pending();
        debug!(game = %self.code, "orchestrator torn down");
    }

    /// Apply one bus event to the session, queuing whatever it derives.
    pub fn handle(&self, event: &GameEvent, outbox: &mut Outbox) -> Result<(), ServiceError> {
        let mut inner = self.lock();
        let inner = &mut *inner;
        match event {
            GameEvent::PlayerJoin { player_id, name } => {
                self.on_join(inner, *player_id, name, outbox)
            }
            GameEvent::PlayerReady { player_id } => self.on_ready(inner, *player_id, outbox),
            GameEvent::GameStart { requested_by } => self.on_start(inner, *requested_by),
            GameEvent::PlayerAnswer { player_id, answer } => {
                self.on_answer(inner, *player_id, answer, outbox)
            }
            GameEvent::PlayerLeave { player_id } => self.on_leave(inner, *player_id, outbox),
            GameEvent::Reset => self.on_reset(inner, outbox),
            GameEvent::QuestionsLoaded { epoch, questions } => {
                self.on_questions_loaded(inner, *epoch, questions, outbox)
            }
            GameEvent::QuestionFetchFailed {
                epoch,
                kind,
                detail,
            } => self.on_fetch_failed(inner, *epoch, kind, detail),
            GameEvent::DeadlineElapsed {
                epoch,
                question_index,
            } => self.on_deadline(inner, *epoch, *question_index, outbox),
            // Announcements emitted by this orchestrator.
            GameEvent::QuestionStarted { .. }
            | GameEvent::AnswerScored { .. }
            | GameEvent::GameOver { .. } => Ok(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_join(
        &self,
        inner: &mut Inner,
        player_id: Uuid,
        name: &str,
        outbox: &mut Outbox,
    ) -> Result<(), ServiceError> {
        let session = &mut inner.session;
        if session.phase() != GamePhase::Lobby || session.machine.has_pending() {
            return Err(ServiceError::InvalidTransition(
                "players can only join an idle lobby".into(),
            ));
        }
        if !session.add_player(player_id, name.to_string()) {
            return Err(ServiceError::InvalidInput(format!(
                "player {player_id} already joined"
            )));
        }

        info!(game = %self.code, %player_id, name, "player joined");
        self.check_quorum(inner, outbox);
        Ok(())
    }

    fn on_ready(
        &self,
        inner: &mut Inner,
        player_id: Uuid,
        outbox: &mut Outbox,
    ) -> Result<(), ServiceError> {
        let session = &mut inner.session;
        if session.phase() != GamePhase::Lobby {
            return Err(ServiceError::InvalidTransition(format!(
                "ready is only accepted in the lobby (phase {:?})",
                session.phase()
            )));
        }
        let player = session
            .players
            .get_mut(&player_id)
            .ok_or(ServiceError::UnknownPlayer(player_id))?;
        player.ready = true;

        info!(game = %self.code, %player_id, "player ready");
        self.check_quorum(inner, outbox);
        Ok(())
    }

    /// Announce a start once every lobby player is ready.
    fn check_quorum(&self, inner: &Inner, outbox: &mut Outbox) {
        let session = &inner.session;
        if session.phase() == GamePhase::Lobby
            && !session.machine.has_pending()
            && session.quorum_reached()
        {
            info!(game = %self.code, players = session.players.len(), "quorum reached");
            outbox.push(GameEvent::GameStart { requested_by: None });
        }
    }

    fn on_start(&self, inner: &mut Inner, requested_by: Option<Uuid>) -> Result<(), ServiceError> {
        let session = &mut inner.session;
        if let Some(player_id) = requested_by {
            if !session.players.contains_key(&player_id) {
                return Err(ServiceError::UnknownPlayer(player_id));
            }
            if player_id != session.host_id {
                return Err(ServiceError::Unauthorized(
                    "only the host can start the game".into(),
                ));
            }
        }
        if session.phase() == GamePhase::Lobby && !session.quorum_reached() {
            return Err(ServiceError::InsufficientPlayers {
                players: session.players.len(),
                ready: session.ready_count(),
            });
        }

        let plan = session.machine.plan(PhaseEvent::Start)?;
        session.reset_round();
        session.last_error = None;

        let epoch = inner.round.supersede();
        inner.round.start_plan = Some(plan.id);
        inner.round.fetch = Some(self.spawn_round_fetch(epoch));

        info!(game = %self.code, epoch, "fetching round questions");
        Ok(())
    }

    fn on_questions_loaded(
        &self,
        inner: &mut Inner,
        epoch: u64,
        questions: &[QuestionRecord],
        outbox: &mut Outbox,
    ) -> Result<(), ServiceError> {
        ensure_current(&inner.round, epoch)?;
        // The reporting task is the one publishing this event; release it without aborting.
        inner.round.fetch = None;

        let plan_id = inner
            .round
            .start_plan
            .take()
            .ok_or_else(|| ServiceError::InvalidTransition("no round is starting".into()))?;
        inner.session.machine.apply(plan_id)?;
        inner.session.questions = questions.to_vec();
        inner.session.current_question_index = 0;

        info!(game = %self.code, epoch, questions = questions.len(), "round started");
        self.open_question(inner, outbox)
    }

    fn on_fetch_failed(
        &self,
        inner: &mut Inner,
        epoch: u64,
        kind: &str,
        detail: &str,
    ) -> Result<(), ServiceError> {
        ensure_current(&inner.round, epoch)?;
        inner.round.fetch = None;

        if let Some(plan_id) = inner.round.start_plan.take() {
            inner.session.machine.abort(plan_id)?;
        }
        inner.session.last_error = Some(detail.to_string());

        warn!(game = %self.code, epoch, kind, error = detail, "round could not start");
        Ok(())
    }

    fn on_answer(
        &self,
        inner: &mut Inner,
        player_id: Uuid,
        answer: &AnswerSubmission,
        outbox: &mut Outbox,
    ) -> Result<(), ServiceError> {
        let session = &mut inner.session;
        if session.phase() != GamePhase::Active {
            return Err(ServiceError::InvalidTransition(format!(
                "answers are only accepted during a round (phase {:?})",
                session.phase()
            )));
        }
        let player = session
            .players
            .get(&player_id)
            .ok_or(ServiceError::UnknownPlayer(player_id))?;
        if !(PlayerAnswer::TIMED_OUT..OPTION_COUNT as i8).contains(&answer.selected_option) {
            return Err(ServiceError::InvalidInput(format!(
                "selected option {} is out of range",
                answer.selected_option
            )));
        }

        let current_id = session
            .current_question()
            .map(|question| question.id.clone())
            .ok_or_else(|| ServiceError::InvalidTransition("no question is open".into()))?;
        if let Some(question_id) = &answer.question_id
            && *question_id != current_id
        {
            return Err(ServiceError::InvalidTransition(format!(
                "question {question_id} is no longer open"
            )));
        }
        if player.has_answered(&current_id) {
            return Err(ServiceError::InvalidTransition(format!(
                "player {player_id} already answered question {current_id}"
            )));
        }

        let elapsed = match answer.elapsed_secs.filter(|secs| secs.is_finite()) {
            Some(secs) => Duration::from_secs_f64(secs.clamp(0.0, self.time_limit.as_secs_f64())),
            None => inner
                .round
                .question_started_at
                .map(|started| started.elapsed())
                .unwrap_or_default(),
        };

        let recorded = session
            .record_answer(player_id, answer.selected_option, elapsed, self.time_limit)
            .ok_or(ServiceError::UnknownPlayer(player_id))?;
        let total_score = session.players.get(&player_id).map_or(0, |p| p.score);
        debug!(
            game = %self.code,
            %player_id,
            correct = recorded.correct,
            points = recorded.points,
            "answer scored"
        );
        outbox.push(GameEvent::AnswerScored {
            player_id,
            answer: recorded,
            total_score,
        });

        self.advance(inner, outbox)
    }

    fn on_deadline(
        &self,
        inner: &mut Inner,
        epoch: u64,
        question_index: usize,
        outbox: &mut Outbox,
    ) -> Result<(), ServiceError> {
        ensure_current(&inner.round, epoch)?;
        let session = &mut inner.session;
        if session.phase() != GamePhase::Active || session.current_question_index != question_index
        {
            return Err(ServiceError::InvalidTransition(format!(
                "deadline of question {question_index} is stale"
            )));
        }
        // Same as the fetch: the timer task is the publisher.
        inner.round.deadline = None;

        for player_id in session.unanswered_players() {
            let Some(answer) = session.record_answer(
                player_id,
                PlayerAnswer::TIMED_OUT,
                self.time_limit,
                self.time_limit,
            ) else {
                continue;
            };
            let total_score = session.players.get(&player_id).map_or(0, |p| p.score);
            outbox.push(GameEvent::AnswerScored {
                player_id,
                answer,
                total_score,
            });
        }

        info!(game = %self.code, question_index, "question timed out");
        self.advance(inner, outbox)
    }

    fn on_leave(
        &self,
        inner: &mut Inner,
        player_id: Uuid,
        outbox: &mut Outbox,
    ) -> Result<(), ServiceError> {
        let session = &mut inner.session;
        session
            .remove_player(player_id)
            .ok_or(ServiceError::UnknownPlayer(player_id))?;

        if player_id == session.host_id {
            warn!(game = %self.code, %player_id, "host left; role is not reassigned");
        } else {
            info!(game = %self.code, %player_id, "player left");
        }

        if session.players.is_empty() {
            inner.round.supersede();
            inner.session.machine.discard_pending();
            return Ok(());
        }

        // A start still waiting for its questions needs the quorum that announced it.
        if session.phase() == GamePhase::Lobby
            && session.machine.has_pending()
            && !session.quorum_reached()
        {
            let epoch = inner.round.supersede();
            inner.session.machine.discard_pending();
            info!(game = %self.code, epoch, "quorum lost; pending start cancelled");
            return Ok(());
        }

        self.check_quorum(inner, outbox);
        Ok(())
    }

    fn on_reset(&self, inner: &mut Inner, outbox: &mut Outbox) -> Result<(), ServiceError> {
        let epoch = inner.round.supersede();
        let session = &mut inner.session;
        session.machine.discard_pending();
        session.machine.advance(PhaseEvent::Reset)?;
        session.reset_lobby();

        info!(game = %self.code, epoch, "game reset to lobby");
        self.check_quorum(inner, outbox);
        Ok(())
    }

    /// Close the current question and open the next one, or end the game.
    fn advance(&self, inner: &mut Inner, outbox: &mut Outbox) -> Result<(), ServiceError> {
        inner.round.cancel_deadline();
        let session = &mut inner.session;

        if session.on_last_question() {
            session.machine.advance(PhaseEvent::Finish)?;
            inner.round.question_started_at = None;

            let standings = session.standings();
            info!(game = %self.code, players = standings.len(), "game over");
            outbox.push(GameEvent::GameOver { standings });
            return Ok(());
        }

        session.current_question_index += 1;
        self.open_question(inner, outbox)
    }

    fn open_question(&self, inner: &mut Inner, outbox: &mut Outbox) -> Result<(), ServiceError> {
        let index = inner.session.current_question_index;
        let question = inner
            .session
            .current_question()
            .cloned()
            .ok_or_else(|| {
                ServiceError::InvalidTransition(format!("question {index} is missing"))
            })?;

        inner.round.cancel_deadline();
        inner.round.question_started_at = Some(Instant::now());
        inner.round.deadline = Some(self.spawn_deadline(inner.round.epoch, index));

        debug!(game = %self.code, index, question = %question.id, "question opened");
        outbox.push(GameEvent::QuestionStarted {
            index,
            question,
            time_limit: self.time_limit,
        });
        Ok(())
    }

    fn spawn_round_fetch(&self, epoch: u64) -> AbortHandle {
        let supply = Arc::clone(&self.supply);
        let bus = self.bus.clone();
        let code = self.code.clone();

        tokio::spawn(async move {
            let event = match fetch_round(&supply, &code).await {
                Ok(questions) => GameEvent::QuestionsLoaded { epoch, questions },
                Err(err) => GameEvent::QuestionFetchFailed {
                    epoch,
                    kind: err.kind(),
                    detail: err.to_string(),
                },
            };
            report(&bus, &code, event).await;
        })
        .abort_handle()
    }

    fn spawn_deadline(&self, epoch: u64, question_index: usize) -> AbortHandle {
        let bus = self.bus.clone();
        let code = self.code.clone();
        let limit = self.time_limit;

        tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            report(
                &bus,
                &code,
                GameEvent::DeadlineElapsed {
                    epoch,
                    question_index,
                },
            )
            .await;
        })
        .abort_handle()
    }
}

fn ensure_current(round: &RoundControl, epoch: u64) -> Result<(), ServiceError> {
    if round.epoch == epoch {
        Ok(())
    } else {
        Err(ServiceError::InvalidTransition(format!(
            "round {epoch} was superseded by round {}",
            round.epoch
        )))
    }
}

/// Fetch the questions of one round, one at a time.
async fn fetch_round(
    supply: &QuestionSupply,
    code: &str,
) -> Result<Vec<QuestionRecord>, SupplyError> {
    let mut questions = Vec::with_capacity(BATCH_SIZE);
    for _ in 0..BATCH_SIZE {
        questions.push(supply.fetch_next(code).await?);
    }
    Ok(questions)
}

/// Publish the outcome of background work, if the game still exists.
async fn report(bus: &Weak<EventBus>, code: &str, event: GameEvent) {
    let Some(bus) = bus.upgrade() else {
        debug!(game = %code, event = event.name(), "game gone; dropping report");
        return;
    };
    let name = event.name();
    if let Err(err) = bus.publish(event).await {
        warn!(game = %code, event = name, error = %err, "background report rejected");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::questions::supply::tests::{StubGenerator, StubReply, supply_with};

    const LIMIT: Duration = Duration::from_secs(30);

    struct Harness {
        bus: Arc<EventBus>,
        orchestrator: Arc<Orchestrator>,
        generator: StubGenerator,
        seen: Arc<StdMutex<Vec<GameEvent>>>,
        host: Uuid,
    }

    impl Harness {
        fn new(generator: StubGenerator) -> Self {
            let supply = Arc::new(supply_with(&generator));
            let session = GameSession::new("TEST01".into(), "Host".into());
            let host = session.host_id;
            let bus = Arc::new(EventBus::new("TEST01"));
            let orchestrator = Arc::new(Orchestrator::new(
                session,
                supply,
                Arc::downgrade(&bus),
                LIMIT,
            ));
            orchestrator.attach(&bus);

            let seen: Arc<StdMutex<Vec<GameEvent>>> = Arc::default();
            let log = seen.clone();
            bus.subscribe(move |event, _| {
                log.lock().unwrap().push(event.clone());
                Ok(())
            });

            Self {
                bus,
                orchestrator,
                generator,
                seen,
                host,
            }
        }

        async fn join(&self, name: &str) -> Uuid {
            let player_id = Uuid::new_v4();
            self.bus
                .publish(GameEvent::PlayerJoin {
                    player_id,
                    name: name.into(),
                })
                .await
                .unwrap();
            player_id
        }

        async fn ready(&self, player_id: Uuid) -> Result<(), ServiceError> {
            self.bus.publish(GameEvent::PlayerReady { player_id }).await
        }

        async fn answer(
            &self,
            player_id: Uuid,
            selected_option: i8,
            elapsed_secs: f64,
        ) -> Result<(), ServiceError> {
            self.bus
                .publish(GameEvent::PlayerAnswer {
                    player_id,
                    answer: AnswerSubmission {
                        question_id: None,
                        selected_option,
                        elapsed_secs: Some(elapsed_secs),
                    },
                })
                .await
        }

        /// Two players, both ready, questions loaded.
        async fn started(generator: StubGenerator) -> (Self, Uuid) {
            let harness = Self::new(generator);
            let guest = harness.join("Guest").await;
            harness.ready(guest).await.unwrap();
            settle().await;
            assert_eq!(harness.phase(), GamePhase::Active);
            (harness, guest)
        }

        fn phase(&self) -> GamePhase {
            self.orchestrator.with_session(GameSession::phase)
        }

        fn correct_option(&self) -> i8 {
            self.orchestrator.with_session(|session| {
                session.current_question().unwrap().correct_index as i8
            })
        }

        fn seen(&self) -> Vec<&'static str> {
            self.seen.lock().unwrap().iter().map(GameEvent::name).collect()
        }

        fn count(&self, name: &str) -> usize {
            self.seen().into_iter().filter(|seen| *seen == name).count()
        }
    }

    /// Let spawned tasks run; with a paused clock this only moves time by a millisecond.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn quorum_triggers_start_and_loads_a_round() {
        let harness = Harness::new(StubGenerator::new(StubReply::Batch));
        let guest = harness.join("Guest").await;
        assert_eq!(harness.count("game_start"), 0);

        harness.ready(guest).await.unwrap();
        assert_eq!(harness.count("game_start"), 1);
        let snapshot = harness.orchestrator.with_session(|s| s.machine.snapshot());
        assert_eq!(snapshot.pending, Some(GamePhase::Active));

        settle().await;

        assert_eq!(harness.phase(), GamePhase::Active);
        assert_eq!(harness.generator.calls(), 1);
        assert_eq!(
            harness.orchestrator.with_session(|s| s.questions.len()),
            BATCH_SIZE
        );
        assert_eq!(
            harness.seen(),
            vec![
                "player_join",
                "player_ready",
                "game_start",
                "questions_loaded",
                "question_started"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unready_joiner_suppresses_auto_start() {
        let harness = Harness::new(StubGenerator::new(StubReply::Batch));
        let first = harness.join("First").await;
        let second = harness.join("Second").await;

        harness.ready(first).await.unwrap();
        settle().await;
        assert_eq!(harness.count("game_start"), 0);
        assert_eq!(harness.phase(), GamePhase::Lobby);

        harness.ready(second).await.unwrap();
        settle().await;
        assert_eq!(harness.count("game_start"), 1);
        assert_eq!(harness.phase(), GamePhase::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn full_round_sums_points_per_player() {
        let (harness, guest) = Harness::started(StubGenerator::new(StubReply::Batch)).await;
        let host = harness.host;

        let plays = [
            (host, true, 0.0),
            (guest, true, 15.0),
            (host, false, 3.0),
            (guest, true, 30.0),
            (host, true, 0.0),
        ];
        for (player, correct, elapsed) in plays {
            let right = harness.correct_option();
            let option = if correct { right } else { (right + 1) % 4 };
            harness.answer(player, option, elapsed).await.unwrap();
        }

        assert_eq!(harness.phase(), GamePhase::GameOver);
        assert_eq!(harness.count("answer_scored"), 5);
        assert_eq!(harness.count("question_started"), 5);

        let events = harness.seen.lock().unwrap().clone();
        let Some(GameEvent::GameOver { standings }) = events.last() else {
            panic!("expected game over, got {:?}", events.last());
        };
        assert_eq!(standings[0].player_id, host);
        assert_eq!(standings[0].score, 3000);
        assert_eq!(standings[1].player_id, guest);
        assert_eq!(standings[1].score, 2250);
        drop(events);

        let before = harness.seen().len();
        tokio::time::sleep(LIMIT * 2).await;
        assert_eq!(harness.seen().len(), before);
        assert_eq!(harness.phase(), GamePhase::GameOver);
        harness.orchestrator.with_session(|session| {
            assert_eq!(session.players[&host].answers.len(), 3);
            assert_eq!(session.players[&guest].answers.len(), 2);
        });
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_times_out_silent_players() {
        let (harness, guest) = Harness::started(StubGenerator::new(StubReply::Batch)).await;

        tokio::time::sleep(LIMIT + Duration::from_millis(10)).await;

        assert_eq!(
            harness
                .orchestrator
                .with_session(|s| s.current_question_index),
            1
        );
        assert_eq!(harness.count("answer_scored"), 2);
        harness.orchestrator.with_session(|session| {
            for player_id in [harness.host, guest] {
                let answers = &session.players[&player_id].answers;
                assert_eq!(answers.len(), 1);
                assert_eq!(answers[0].selected_option, PlayerAnswer::TIMED_OUT);
                assert_eq!(answers[0].points, 0);
            }
        });
    }

    #[tokio::test(start_paused = true)]
    async fn answering_cancels_the_deadline() {
        let (harness, _guest) = Harness::started(StubGenerator::new(StubReply::Batch)).await;

        tokio::time::sleep(LIMIT - Duration::from_secs(1)).await;
        let right = harness.correct_option();
        harness.answer(harness.host, right, 29.0).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(
            harness
                .orchestrator
                .with_session(|s| s.current_question_index),
            1
        );
        assert_eq!(harness.count("answer_scored"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_discards_in_flight_fetch() {
        let generator =
            StubGenerator::new(StubReply::Batch).with_delay(Duration::from_secs(10));
        let harness = Harness::new(generator);
        let guest = harness.join("Guest").await;
        harness.ready(guest).await.unwrap();
        settle().await;
        assert!(harness.orchestrator.with_session(|s| s.machine.has_pending()));

        harness.bus.publish(GameEvent::Reset).await.unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;

        assert_eq!(harness.phase(), GamePhase::Lobby);
        assert_eq!(harness.count("questions_loaded"), 0);
        harness.orchestrator.with_session(|session| {
            assert!(!session.machine.has_pending());
            assert!(session.questions.is_empty());
            assert!(session.players[&harness.host].ready);
            assert!(!session.players[&guest].ready);
        });

        let stale = harness
            .bus
            .publish(GameEvent::QuestionsLoaded {
                epoch: 1,
                questions: Vec::new(),
            })
            .await;
        assert!(matches!(stale, Err(ServiceError::InvalidTransition(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_during_fetch_cancels_the_start() {
        let generator = StubGenerator::new(StubReply::Batch).with_delay(Duration::from_secs(5));
        let harness = Harness::new(generator);
        let guest = harness.join("Guest").await;
        harness.ready(guest).await.unwrap();
        settle().await;
        assert!(harness.orchestrator.with_session(|s| s.machine.has_pending()));

        harness
            .bus
            .publish(GameEvent::PlayerLeave { player_id: guest })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(harness.phase(), GamePhase::Lobby);
        assert_eq!(harness.count("questions_loaded"), 0);
        harness.orchestrator.with_session(|session| {
            assert!(!session.machine.has_pending());
            assert_eq!(session.players.len(), 1);
        });

        // The lobby can still start once a quorum forms again.
        let other = harness.join("Other").await;
        harness.ready(other).await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(harness.phase(), GamePhase::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn host_leaving_during_fetch_cancels_the_start() {
        let generator = StubGenerator::new(StubReply::Batch).with_delay(Duration::from_secs(5));
        let harness = Harness::new(generator);
        let first = harness.join("First").await;
        let second = harness.join("Second").await;
        harness.ready(first).await.unwrap();
        harness.ready(second).await.unwrap();
        settle().await;
        assert!(harness.orchestrator.with_session(|s| s.machine.has_pending()));

        harness
            .bus
            .publish(GameEvent::PlayerLeave {
                player_id: harness.host,
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(harness.phase(), GamePhase::Lobby);
        assert_eq!(harness.count("question_started"), 0);
        assert!(!harness.orchestrator.with_session(|s| s.machine.has_pending()));
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_failure_keeps_lobby_and_host_can_retry() {
        let harness = Harness::new(StubGenerator::new(StubReply::Failure));
        let guest = harness.join("Guest").await;
        harness.ready(guest).await.unwrap();
        settle().await;

        assert_eq!(harness.phase(), GamePhase::Lobby);
        assert_eq!(harness.count("question_fetch_failed"), 1);
        harness.orchestrator.with_session(|session| {
            assert!(!session.machine.has_pending());
            assert!(session.last_error.is_some());
        });

        harness.generator.set_reply(StubReply::Batch);
        harness
            .bus
            .publish(GameEvent::GameStart {
                requested_by: Some(harness.host),
            })
            .await
            .unwrap();
        settle().await;

        assert_eq!(harness.phase(), GamePhase::Active);
        assert!(harness.orchestrator.with_session(|s| s.last_error.is_none()));
    }

    #[tokio::test(start_paused = true)]
    async fn misuse_is_rejected_without_changes() {
        let harness = Harness::new(StubGenerator::new(StubReply::Batch));

        let err = harness.ready(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ServiceError::UnknownPlayer(_)));

        let err = harness
            .bus
            .publish(GameEvent::GameStart {
                requested_by: Some(harness.host),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::InsufficientPlayers {
                players: 1,
                ready: 1
            }
        ));

        let guest = harness.join("Guest").await;
        let err = harness
            .bus
            .publish(GameEvent::GameStart {
                requested_by: Some(guest),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));

        let err = harness.answer(guest, 0, 1.0).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidTransition(_)));

        assert_eq!(harness.seen(), vec!["player_join"]);
        assert_eq!(harness.phase(), GamePhase::Lobby);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_and_duplicate_answers_are_rejected() {
        let (harness, guest) = Harness::started(StubGenerator::new(StubReply::Batch)).await;
        let first_question = harness
            .orchestrator
            .with_session(|s| s.current_question().unwrap().id.clone());

        harness.answer(guest, 0, 1.0).await.unwrap();

        let stale = harness
            .bus
            .publish(GameEvent::PlayerAnswer {
                player_id: harness.host,
                answer: AnswerSubmission {
                    question_id: Some(first_question),
                    selected_option: 1,
                    elapsed_secs: None,
                },
            })
            .await;
        assert!(matches!(stale, Err(ServiceError::InvalidTransition(_))));

        let out_of_range = harness.answer(harness.host, 4, 1.0).await;
        assert!(matches!(out_of_range, Err(ServiceError::InvalidInput(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn last_player_leaving_stops_background_work() {
        let (harness, guest) = Harness::started(StubGenerator::new(StubReply::Batch)).await;

        harness
            .bus
            .publish(GameEvent::PlayerLeave { player_id: guest })
            .await
            .unwrap();
        harness
            .bus
            .publish(GameEvent::PlayerLeave {
                player_id: harness.host,
            })
            .await
            .unwrap();
        tokio::time::sleep(LIMIT * 2).await;

        assert!(harness.orchestrator.with_session(|s| s.players.is_empty()));
        assert_eq!(harness.count("answer_scored"), 0);
    }
}
