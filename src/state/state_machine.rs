use thiserror::Error;

/// High-level phases a match session can be in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchPhase {
    /// Session exists but the question set has not been loaded yet.
    Lobby,
    /// Questions are loaded and no round has been played.
    Ready,
    /// A countdown is running and answers are accepted for `question_id`.
    RoundOpen {
        /// Position of the question in play order.
        index: usize,
        question_id: String,
    },
    /// The round at `index` is over; waiting for `next-question`.
    RoundClosed {
        index: usize,
        question_id: String,
        resolution: RoundResolution,
    },
    /// Every question was played and the finalizer was triggered.
    Completed,
    /// Every connection left and the session was reclaimed before completion.
    Abandoned,
}

impl MatchPhase {
    /// Short label used in logs and read-only views.
    pub fn label(&self) -> &'static str {
        match self {
            MatchPhase::Lobby => "lobby",
            MatchPhase::Ready => "ready",
            MatchPhase::RoundOpen { .. } => "round_open",
            MatchPhase::RoundClosed { .. } => "round_closed",
            MatchPhase::Completed => "completed",
            MatchPhase::Abandoned => "abandoned",
        }
    }
}

/// Why a round stopped accepting answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundResolution {
    /// A player picked the right option first.
    CorrectAnswer {
        /// Player who answered correctly.
        player_id: String,
    },
    /// Both players answered and neither was right.
    AllAnswered,
    /// The countdown reached zero.
    Timeout,
}

/// Events that can be applied to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchEvent {
    /// The question cache was filled from the session store.
    QuestionsLoaded,
    /// Start the countdown for the question at `index`.
    OpenRound { index: usize, question_id: String },
    /// Stop accepting answers for the open round.
    CloseRound(RoundResolution),
    /// No question left; hand over to the finalizer.
    Complete,
    /// Tear the session down without finalizing.
    Abandon,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the state machine was in when the invalid event was received.
    pub from: MatchPhase,
    /// The event that cannot be applied from this phase.
    pub event: MatchEvent,
}

/// Per-match state machine. Rounds can only be closed while open, which is what guarantees a
/// round resolves exactly once.
#[derive(Debug, Clone)]
pub struct MatchStateMachine {
    phase: MatchPhase,
}

impl Default for MatchStateMachine {
    fn default() -> Self {
        Self {
            phase: MatchPhase::Lobby,
        }
    }
}

impl MatchStateMachine {
    /// Create a new state machine in the lobby.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> &MatchPhase {
        &self.phase
    }

    /// Apply `event`, returning the new phase. The phase is unchanged on error.
    pub fn transition(&mut self, event: MatchEvent) -> Result<MatchPhase, InvalidTransition> {
        self.phase = self.compute_transition(event)?;
        Ok(self.phase.clone())
    }

    fn compute_transition(&self, event: MatchEvent) -> Result<MatchPhase, InvalidTransition> {
        let next = match (&self.phase, event) {
            (MatchPhase::Lobby, MatchEvent::QuestionsLoaded) => MatchPhase::Ready,
            (
                MatchPhase::Ready | MatchPhase::RoundClosed { .. },
                MatchEvent::OpenRound { index, question_id },
            ) => MatchPhase::RoundOpen { index, question_id },
            (MatchPhase::RoundOpen { index, question_id }, MatchEvent::CloseRound(resolution)) => {
                MatchPhase::RoundClosed {
                    index: *index,
                    question_id: question_id.clone(),
                    resolution,
                }
            }
            (MatchPhase::Ready | MatchPhase::RoundClosed { .. }, MatchEvent::Complete) => {
                MatchPhase::Completed
            }
            (
                MatchPhase::Lobby
                | MatchPhase::Ready
                | MatchPhase::RoundOpen { .. }
                | MatchPhase::RoundClosed { .. },
                MatchEvent::Abandon,
            ) => MatchPhase::Abandoned,
            (from, event) => {
                return Err(InvalidTransition {
                    from: from.clone(),
                    event,
                });
            }
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(index: usize) -> MatchEvent {
        MatchEvent::OpenRound {
            index,
            question_id: format!("q{index}"),
        }
    }

    #[test]
    fn initial_state_is_lobby() {
        let sm = MatchStateMachine::new();
        assert_eq!(sm.phase(), &MatchPhase::Lobby);
    }

    #[test]
    fn full_happy_path_through_match() {
        let mut sm = MatchStateMachine::new();

        assert_eq!(sm.transition(MatchEvent::QuestionsLoaded).unwrap(), MatchPhase::Ready);
        assert_eq!(sm.transition(open(0)).unwrap().label(), "round_open");
        assert_eq!(
            sm.transition(MatchEvent::CloseRound(RoundResolution::CorrectAnswer {
                player_id: "alice".into()
            }))
            .unwrap(),
            MatchPhase::RoundClosed {
                index: 0,
                question_id: "q0".into(),
                resolution: RoundResolution::CorrectAnswer {
                    player_id: "alice".into()
                },
            }
        );
        sm.transition(open(1)).unwrap();
        sm.transition(MatchEvent::CloseRound(RoundResolution::Timeout))
            .unwrap();
        assert_eq!(sm.transition(MatchEvent::Complete).unwrap(), MatchPhase::Completed);
    }

    #[test]
    fn round_closes_exactly_once() {
        let mut sm = MatchStateMachine::new();
        sm.transition(MatchEvent::QuestionsLoaded).unwrap();
        sm.transition(open(0)).unwrap();
        sm.transition(MatchEvent::CloseRound(RoundResolution::AllAnswered))
            .unwrap();

        let err = sm
            .transition(MatchEvent::CloseRound(RoundResolution::Timeout))
            .unwrap_err();
        assert_eq!(err.from.label(), "round_closed");
        assert_eq!(
            sm.phase(),
            &MatchPhase::RoundClosed {
                index: 0,
                question_id: "q0".into(),
                resolution: RoundResolution::AllAnswered,
            }
        );
    }

    #[test]
    fn next_round_rejected_while_one_is_open() {
        let mut sm = MatchStateMachine::new();
        sm.transition(MatchEvent::QuestionsLoaded).unwrap();
        sm.transition(open(0)).unwrap();
        let err = sm.transition(open(1)).unwrap_err();
        assert_eq!(err.event, open(1));
    }

    #[test]
    fn terminal_phases_reject_everything() {
        let mut sm = MatchStateMachine::new();
        sm.transition(MatchEvent::Abandon).unwrap();
        assert!(sm.transition(MatchEvent::QuestionsLoaded).is_err());
        assert!(sm.transition(MatchEvent::Abandon).is_err());
        assert_eq!(sm.phase(), &MatchPhase::Abandoned);
    }
}
