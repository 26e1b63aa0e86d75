use thiserror::Error;
use uuid::Uuid;

/// High-level phases a game session can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamePhase {
    /// Players join and mark themselves ready.
    Lobby,
    /// Questions are being played.
    Active,
    /// The last question was answered; final scores are shown.
    GameOver,
}

/// Phase-changing events that can be applied to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    /// Quorum reached (or host retry): enter active play once questions are loaded.
    Start,
    /// The last question has been answered or timed out.
    Finish,
    /// Return to a fresh lobby, from any phase.
    Reset,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the state machine was in when the invalid event was received.
    pub from: GamePhase,
    /// The event that cannot be applied from this phase.
    pub event: PhaseEvent,
}

/// Errors that can occur when planning a state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A transition is already pending and must be applied or aborted.
    AlreadyPending,
    /// The requested transition is not valid from the current phase.
    InvalidTransition(InvalidTransition),
}

/// Errors that can occur when applying a planned state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
}

/// Errors that can occur when aborting a planned state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
}

/// Unique identifier for a planned state transition.
pub type PlanId = Uuid;

/// A planned state machine transition that has been validated but not yet applied.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Unique identifier for this plan.
    pub id: PlanId,
    /// Phase the state machine will transition to.
    pub to: GamePhase,
    /// Version number after applying this transition.
    pub version_next: usize,
}

/// Snapshot of the current state machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    /// Current phase of the state machine.
    pub phase: GamePhase,
    /// Version number of the state machine (increments on each transition).
    pub version: usize,
    /// Pending transition phase, if a transition is planned but not yet applied.
    pub pending: Option<GamePhase>,
}

/// Lobby → Active → GameOver lifecycle of one session.
///
/// Starting a game needs asynchronous work (fetching the round's questions), so
/// `Start` is planned first and applied once the work succeeds, or aborted when
/// it fails. Immediate transitions go through [`GameStateMachine::advance`].
#[derive(Debug, Clone)]
pub struct GameStateMachine {
    phase: GamePhase,
    version: usize,
    pending: Option<Plan>,
}

impl Default for GameStateMachine {
    fn default() -> Self {
        Self {
            phase: GamePhase::Lobby,
            version: 0,
            pending: None,
        }
    }
}

impl GameStateMachine {
    /// Create a new state machine initialised in the lobby.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    /// Whether a planned transition is waiting to be applied or aborted.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Create a snapshot of the current state machine state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            phase: self.phase,
            version: self.version,
            pending: self.pending.as_ref().map(|plan| plan.to),
        }
    }

    /// Plan a transition by validating that the event can be applied from the current phase.
    /// Returns a Plan that can later be applied or aborted.
    pub fn plan(&mut self, event: PhaseEvent) -> Result<Plan, PlanError> {
        if self.pending.is_some() {
            return Err(PlanError::AlreadyPending);
        }

        let next = self
            .compute_transition(event)
            .map_err(PlanError::InvalidTransition)?;

        let plan = Plan {
            id: Uuid::new_v4(),
            to: next,
            version_next: self.version + 1,
        };

        self.pending = Some(plan.clone());

        Ok(plan)
    }

    /// Apply a planned transition, moving the state machine to the next phase.
    /// Returns the new phase after the transition.
    pub fn apply(&mut self, plan_id: PlanId) -> Result<GamePhase, ApplyError> {
        let plan = self.pending.take().ok_or(ApplyError::NoPending)?;

        if plan.id != plan_id {
            let expected_plan_id = plan.id;
            self.pending = Some(plan);
            return Err(ApplyError::IdMismatch {
                expected: expected_plan_id,
                got: plan_id,
            });
        }

        self.phase = plan.to;
        self.version = plan.version_next;

        Ok(self.phase)
    }

    /// Abort a planned transition without applying it, leaving the phase unchanged.
    pub fn abort(&mut self, plan_id: PlanId) -> Result<(), AbortError> {
        let plan = self.pending.as_ref().ok_or(AbortError::NoPending)?;

        if plan.id != plan_id {
            return Err(AbortError::IdMismatch {
                expected: plan.id,
                got: plan_id,
            });
        }

        self.pending = None;
        Ok(())
    }

    /// Drop whatever plan is pending, regardless of its id.
    pub fn discard_pending(&mut self) -> Option<Plan> {
        self.pending.take()
    }

    /// Plan and apply a transition in one step.
    pub fn advance(&mut self, event: PhaseEvent) -> Result<GamePhase, PlanError> {
        let plan = self.plan(event)?;
        self.pending = None;
        self.phase = plan.to;
        self.version = plan.version_next;
        Ok(self.phase)
    }

    /// Compute a transition from an event if the transition is valid.
    fn compute_transition(&self, event: PhaseEvent) -> Result<GamePhase, InvalidTransition> {
        let next = match (self.phase, event) {
            (GamePhase::Lobby, PhaseEvent::Start) => GamePhase::Active,
            (GamePhase::Active, PhaseEvent::Finish) => GamePhase::GameOver,
            (_, PhaseEvent::Reset) => GamePhase::Lobby,
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(sm: &mut GameStateMachine, event: PhaseEvent) -> GamePhase {
        let plan = sm.plan(event).unwrap();
        sm.apply(plan.id).unwrap()
    }

    #[test]
    fn initial_state_is_lobby() {
        let sm = GameStateMachine::new();
        assert_eq!(sm.phase(), GamePhase::Lobby);
        assert_eq!(sm.snapshot().version, 0);
    }

    #[test]
    fn full_round_and_reset() {
        let mut sm = GameStateMachine::new();

        assert_eq!(apply(&mut sm, PhaseEvent::Start), GamePhase::Active);
        assert_eq!(apply(&mut sm, PhaseEvent::Finish), GamePhase::GameOver);
        assert_eq!(apply(&mut sm, PhaseEvent::Reset), GamePhase::Lobby);
        assert_eq!(sm.snapshot().version, 3);
    }

    #[test]
    fn pending_start_is_visible_in_snapshot() {
        let mut sm = GameStateMachine::new();
        let plan = sm.plan(PhaseEvent::Start).unwrap();

        let snapshot = sm.snapshot();
        assert_eq!(snapshot.phase, GamePhase::Lobby);
        assert_eq!(snapshot.pending, Some(GamePhase::Active));
        assert_eq!(sm.plan(PhaseEvent::Start).unwrap_err(), PlanError::AlreadyPending);

        sm.apply(plan.id).unwrap();
        assert_eq!(sm.snapshot().pending, None);
    }

    #[test]
    fn invalid_transition_returns_error() {
        let mut sm = GameStateMachine::new();
        let err = sm.plan(PhaseEvent::Finish).unwrap_err();
        match err {
            PlanError::InvalidTransition(invalid) => {
                assert_eq!(invalid.from, GamePhase::Lobby);
                assert_eq!(invalid.event, PhaseEvent::Finish);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn start_is_rejected_outside_lobby() {
        let mut sm = GameStateMachine::new();
        sm.advance(PhaseEvent::Start).unwrap();
        assert!(matches!(
            sm.advance(PhaseEvent::Start),
            Err(PlanError::InvalidTransition(_))
        ));
    }

    #[test]
    fn abort_clears_pending() {
        let mut sm = GameStateMachine::new();
        let plan = sm.plan(PhaseEvent::Start).unwrap();
        sm.abort(plan.id).unwrap();
        assert!(sm.pending.is_none());
        assert_eq!(sm.phase(), GamePhase::Lobby);
    }

    #[test]
    fn apply_with_wrong_id_keeps_plan() {
        let mut sm = GameStateMachine::new();
        let plan = sm.plan(PhaseEvent::Start).unwrap();
        let err = sm.apply(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, ApplyError::IdMismatch { expected, .. } if expected == plan.id));
        assert!(sm.has_pending());
    }
}
