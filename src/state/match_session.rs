//! One task per live match: owns the round state machine, the countdown and the room broadcast.
//!
//! Every command for a match goes through its task, so round transitions and answer handling
//! never interleave within this process. Cross-process races on the stored record are settled
//! by the session store revisions.

use std::{collections::HashMap, future, time::Duration};

use tokio::{
    sync::{broadcast, mpsc, oneshot},
    time::{Instant, Interval, MissedTickBehavior, interval_at, sleep_until},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::models::QuestionEntity,
    dto::ws::{AnswerBroadcast, PublicQuestion, RoomMessagePayload, ServerMessage},
    error::ServiceError,
    services::{
        leaderboard_service, records,
        round_service::{self, AnswerOutcome, AnswerSubmission},
    },
    state::{
        SharedState,
        state_machine::{MatchEvent, MatchPhase, MatchStateMachine, RoundResolution},
    },
};

const COMMAND_BUFFER: usize = 64;
const ROOM_BUFFER: usize = 64;
const TICK: Duration = Duration::from_secs(1);

/// Cloneable address of a running match session.
#[derive(Debug, Clone)]
pub struct MatchHandle {
    session_id: Uuid,
    commands: mpsc::Sender<SessionCommand>,
}

/// Successful `join-room` result.
#[derive(Debug)]
pub struct JoinAck {
    /// Room events from now on.
    pub room: broadcast::Receiver<ServerMessage>,
    pub question_count: usize,
    pub phase: &'static str,
}

/// Read-only view of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub phase: &'static str,
    /// Index of the open or last closed round.
    pub round_index: Option<usize>,
    pub question_count: usize,
    pub connections: usize,
}

#[derive(Debug)]
enum SessionCommand {
    Join {
        player_id: String,
        reply: oneshot::Sender<Result<JoinAck, ServiceError>>,
    },
    Leave {
        player_id: String,
    },
    ReadyCheck {
        reply: oneshot::Sender<Result<usize, ServiceError>>,
    },
    NextQuestion {
        reply: oneshot::Sender<Result<(), ServiceError>>,
    },
    Answer {
        submission: AnswerSubmission,
        reply: oneshot::Sender<Result<Option<AnswerOutcome>, ServiceError>>,
    },
    QuestionsAppended,
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

impl MatchHandle {
    /// Register a player connection and subscribe it to the room.
    pub async fn join(&self, player_id: &str) -> Result<JoinAck, ServiceError> {
        let player_id = player_id.to_owned();
        self.request(|reply| SessionCommand::Join { player_id, reply })
            .await?
    }

    /// Drop a player connection.
    pub async fn leave(&self, player_id: &str) {
        let _ = self
            .commands
            .send(SessionCommand::Leave {
                player_id: player_id.to_owned(),
            })
            .await;
    }

    /// Reload the question set from the session store, returning its size.
    pub async fn ready_check(&self) -> Result<usize, ServiceError> {
        self.request(|reply| SessionCommand::ReadyCheck { reply })
            .await?
    }

    /// Open the next round, or complete the match when no question is left.
    pub async fn next_question(&self) -> Result<(), ServiceError> {
        self.request(|reply| SessionCommand::NextQuestion { reply })
            .await?
    }

    /// Submit an answer to the open round. `None` means no round was open.
    pub async fn answer(
        &self,
        submission: AnswerSubmission,
    ) -> Result<Option<AnswerOutcome>, ServiceError> {
        self.request(|reply| SessionCommand::Answer { submission, reply })
            .await?
    }

    /// Tell the session that more questions were stored for its match.
    pub fn questions_appended(&self) {
        let _ = self.commands.try_send(SessionCommand::QuestionsAppended);
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, ServiceError> {
        self.request(|reply| SessionCommand::Snapshot { reply })
            .await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, ServiceError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| session_closed())?;
        rx.await.map_err(|_| session_closed())
    }
}

fn session_closed() -> ServiceError {
    ServiceError::InvalidState("match session closed".into())
}

/// Handle of the session of `match_id`, starting one if none is running.
pub fn ensure(state: &SharedState, match_id: &str) -> Result<MatchHandle, ServiceError> {
    if state.is_completed(match_id) {
        return Err(ServiceError::InvalidState(format!(
            "match `{match_id}` is already completed"
        )));
    }

    let handle = state
        .sessions()
        .entry(match_id.to_owned())
        .or_insert_with(|| spawn(state.clone(), match_id.to_owned()))
        .value()
        .clone();
    Ok(handle)
}

fn spawn(state: SharedState, match_id: String) -> MatchHandle {
    let (commands, receiver) = mpsc::channel(COMMAND_BUFFER);
    let (room, _) = broadcast::channel(ROOM_BUFFER);
    let handle = MatchHandle {
        session_id: Uuid::new_v4(),
        commands,
    };

    let config = state.config();
    let session = MatchSession {
        state,
        match_id,
        machine: MatchStateMachine::new(),
        players: Vec::new(),
        questions: Vec::new(),
        resume_at: 0,
        connections: HashMap::new(),
        room,
        countdown: None,
        round_duration: config.round_duration,
        idle_timeout: config.session_idle_timeout,
        idle_deadline: Some(Instant::now() + config.session_idle_timeout),
    };
    tokio::spawn(session.run(receiver, handle.session_id));
    handle
}

struct Countdown {
    remaining: u32,
    ticker: Interval,
}

struct MatchSession {
    state: SharedState,
    match_id: String,
    machine: MatchStateMachine,
    players: Vec<String>,
    /// Local copy of the stored questions, in play order.
    questions: Vec<QuestionEntity>,
    /// First question not yet settled on the stored record; play starts there.
    resume_at: usize,
    /// Open connections per player.
    connections: HashMap<String, usize>,
    room: broadcast::Sender<ServerMessage>,
    countdown: Option<Countdown>,
    round_duration: Duration,
    idle_timeout: Duration,
    /// Set while nobody is connected.
    idle_deadline: Option<Instant>,
}

impl MatchSession {
    async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>, session_id: Uuid) {
        info!(match_id = %self.match_id, "match session started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                () = next_tick(&mut self.countdown) => self.on_tick(),
                () = idle(self.idle_deadline) => {
                    info!(match_id = %self.match_id, "no player connected; abandoning match session");
                    if let Err(err) = self.machine.transition(MatchEvent::Abandon) {
                        debug!(match_id = %self.match_id, error = ?err, "abandon from terminal phase");
                    }
                    break;
                }
            }

            if matches!(self.machine.phase(), MatchPhase::Completed) {
                break;
            }
        }

        self.state
            .sessions()
            .remove_if(&self.match_id, |_, handle| handle.session_id == session_id);
        info!(match_id = %self.match_id, phase = self.machine.phase().label(), "match session stopped");
    }

    async fn handle(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Join { player_id, reply } => {
                let _ = reply.send(self.join(player_id).await);
            }
            SessionCommand::Leave { player_id } => self.leave(&player_id),
            SessionCommand::ReadyCheck { reply } => {
                let result = self.reload().await.map(|()| self.questions.len());
                let _ = reply.send(result);
            }
            SessionCommand::NextQuestion { reply } => {
                let _ = reply.send(self.advance().await);
            }
            SessionCommand::Answer { submission, reply } => {
                let _ = reply.send(self.answer(submission).await);
            }
            SessionCommand::QuestionsAppended => {
                if let Err(err) = self.reload().await {
                    warn!(match_id = %self.match_id, error = %err, "failed to reload questions");
                }
            }
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    async fn join(&mut self, player_id: String) -> Result<JoinAck, ServiceError> {
        if self.players.is_empty() {
            self.reload().await?;
        }
        if !self.players.contains(&player_id) {
            return Err(ServiceError::InvalidInput(format!(
                "player `{player_id}` does not take part in match `{}`",
                self.match_id
            )));
        }

        *self.connections.entry(player_id.clone()).or_default() += 1;
        self.idle_deadline = None;
        info!(match_id = %self.match_id, %player_id, "player joined the room");

        Ok(JoinAck {
            room: self.room.subscribe(),
            question_count: self.questions.len(),
            phase: self.machine.phase().label(),
        })
    }

    fn leave(&mut self, player_id: &str) {
        if let Some(count) = self.connections.get_mut(player_id) {
            *count -= 1;
            if *count == 0 {
                self.connections.remove(player_id);
            }
        }
        if self.connections.is_empty() {
            self.idle_deadline = Some(Instant::now() + self.idle_timeout);
        }
        info!(match_id = %self.match_id, %player_id, "player left the room");
    }

    /// Refresh players and questions from the session store.
    async fn reload(&mut self) -> Result<(), ServiceError> {
        let store = self.state.require_session_store().await?;
        let record = records::load_match(store.as_ref(), &self.match_id).await?;
        self.players = record.players;
        self.questions = record.questions;

        if matches!(self.machine.phase(), MatchPhase::Lobby) && !self.questions.is_empty() {
            self.machine.transition(MatchEvent::QuestionsLoaded)?;
        }
        if matches!(self.machine.phase(), MatchPhase::Ready) {
            // A session restarted after abandonment skips rounds that were already played.
            let players = self.players.len();
            self.resume_at = self
                .questions
                .iter()
                .position(|question| !round_service::is_settled(question, players))
                .unwrap_or(self.questions.len());
        }
        debug!(
            match_id = %self.match_id,
            questions = self.questions.len(),
            resume_at = self.resume_at,
            "question cache reloaded"
        );
        Ok(())
    }

    async fn advance(&mut self) -> Result<(), ServiceError> {
        let next_index = match self.machine.phase().clone() {
            MatchPhase::Lobby => {
                self.reload().await?;
                if matches!(self.machine.phase(), MatchPhase::Lobby) {
                    return Err(ServiceError::InvalidState(
                        "questions are not ready yet".into(),
                    ));
                }
                self.resume_at
            }
            MatchPhase::Ready => self.resume_at,
            MatchPhase::RoundClosed { index, .. } => index + 1,
            MatchPhase::RoundOpen { .. } => {
                return Err(ServiceError::InvalidState(
                    "the current round is still open".into(),
                ));
            }
            MatchPhase::Completed | MatchPhase::Abandoned => {
                return Err(ServiceError::InvalidState("the match is over".into()));
            }
        };

        if next_index >= self.questions.len() {
            // A slower source may have appended questions since the last reload.
            self.reload().await?;
        }

        match self.questions.get(next_index).cloned() {
            Some(question) => self.open_round(next_index, question),
            None => self.complete(),
        }
    }

    fn open_round(&mut self, index: usize, question: QuestionEntity) -> Result<(), ServiceError> {
        let question_id = question.id.clone().ok_or_else(|| {
            ServiceError::Internal(format!("question at position {index} has no id"))
        })?;
        self.machine.transition(MatchEvent::OpenRound {
            index,
            question_id: question_id.clone(),
        })?;

        let total = self.questions.len();
        self.broadcast(ServerMessage::Question(PublicQuestion::new(
            question_id,
            &question,
            index,
            total,
        )));

        let seconds = u32::try_from(self.round_duration.as_secs()).unwrap_or(u32::MAX);
        self.broadcast(ServerMessage::Timer(seconds));
        let mut ticker = interval_at(Instant::now() + TICK, TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.countdown = Some(Countdown {
            remaining: seconds,
            ticker,
        });

        info!(match_id = %self.match_id, index, "round opened");
        Ok(())
    }

    fn on_tick(&mut self) {
        let Some(countdown) = self.countdown.as_mut() else {
            return;
        };
        countdown.remaining = countdown.remaining.saturating_sub(1);
        let remaining = countdown.remaining;
        self.broadcast(ServerMessage::Timer(remaining));

        if remaining == 0 {
            match self.close_round(RoundResolution::Timeout) {
                Ok(()) => self.broadcast(ServerMessage::TimeOut),
                Err(err) => warn!(match_id = %self.match_id, error = %err, "failed to time out round"),
            }
        }
    }

    async fn answer(
        &mut self,
        submission: AnswerSubmission,
    ) -> Result<Option<AnswerOutcome>, ServiceError> {
        let MatchPhase::RoundOpen { question_id, .. } = self.machine.phase().clone() else {
            debug!(
                match_id = %self.match_id,
                player_id = %submission.player_id,
                "answer received while no round is open; ignoring"
            );
            return Ok(None);
        };

        let store = self.state.require_session_store().await?;
        let (questions, outcome) = round_service::submit_answer(
            store.as_ref(),
            &self.match_id,
            &question_id,
            &submission,
            self.round_duration,
        )
        .await?;
        self.questions = questions;

        match outcome {
            AnswerOutcome::Correct { xp } => {
                self.close_round(RoundResolution::CorrectAnswer {
                    player_id: submission.player_id.clone(),
                })?;
                self.broadcast(ServerMessage::Answered(AnswerBroadcast {
                    user_id: submission.player_id.clone(),
                    game_id: self.match_id.clone(),
                    option_num: submission.selected,
                    xp,
                }));
            }
            AnswerOutcome::Incorrect {
                all_answered: true,
                ..
            } => {
                self.close_round(RoundResolution::AllAnswered)?;
                let answer = self
                    .questions
                    .iter()
                    .find(|question| question.id.as_deref() == Some(question_id.as_str()))
                    .map(QuestionEntity::answer_text)
                    .unwrap_or_default();
                self.broadcast(ServerMessage::RoomMessage(RoomMessagePayload {
                    message: "Both players answered incorrectly".into(),
                    answer,
                }));
            }
            AnswerOutcome::Incorrect { .. } | AnswerOutcome::Duplicate => {}
        }

        Ok(Some(outcome))
    }

    fn close_round(&mut self, resolution: RoundResolution) -> Result<(), ServiceError> {
        self.countdown = None;
        self.machine.transition(MatchEvent::CloseRound(resolution))?;
        info!(match_id = %self.match_id, "round closed");
        Ok(())
    }

    fn complete(&mut self) -> Result<(), ServiceError> {
        self.machine.transition(MatchEvent::Complete)?;
        self.state.mark_completed(&self.match_id);
        self.broadcast(ServerMessage::QuizComplete);
        leaderboard_service::spawn_finalize(self.state.clone(), self.match_id.clone());
        info!(match_id = %self.match_id, "quiz complete");
        Ok(())
    }

    fn snapshot(&self) -> SessionSnapshot {
        let phase = self.machine.phase();
        let round_index = match phase {
            MatchPhase::RoundOpen { index, .. } | MatchPhase::RoundClosed { index, .. } => {
                Some(*index)
            }
            _ => None,
        };
        SessionSnapshot {
            phase: phase.label(),
            round_index,
            question_count: self.questions.len(),
            connections: self.connections.values().sum(),
        }
    }

    fn broadcast(&self, message: ServerMessage) {
        // No subscriber is not an error: players may reconnect later.
        let _ = self.room.send(message);
    }
}

async fn next_tick(countdown: &mut Option<Countdown>) {
    match countdown {
        Some(countdown) => {
            countdown.ticker.tick().await;
        }
        None => future::pending().await,
    }
}

async fn idle(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}
