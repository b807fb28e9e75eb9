use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use tracing::{debug, info, warn};

use crate::{
    dto::ws::{ClientMessage, ErrorPayload, JoinedPayload, ServerMessage},
    error::ServiceError,
    services::round_service::AnswerSubmission,
    state::{
        SharedState,
        match_session::{self, MatchHandle},
    },
};

const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Internal error type for room message handling.
///
/// Kept apart from `ServiceError` so a dead writer can end the connection immediately.
#[derive(Debug, Error)]
enum RoomError {
    /// Writer channel closed - connection should be terminated immediately.
    #[error("connection closed")]
    ConnectionClosed,
    #[error("message targets match `{got}` but this connection joined `{expected}`")]
    MismatchedGame { expected: String, got: String },
    #[error("message is signed by `{got}` but this connection joined as `{expected}`")]
    MismatchedPlayer { expected: String, got: String },
    #[error("already joined")]
    DuplicateJoin,
    #[error("{0}")]
    Service(#[from] ServiceError),
}

/// Identity of a connection once `join-room` succeeded.
struct Seat {
    player_id: String,
    match_id: String,
    handle: MatchHandle,
}

/// Handle the full lifecycle for an individual player WebSocket connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let initial_message = match tokio::time::timeout(JOIN_TIMEOUT, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(Message::Close(_)))) => {
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Ok(_))) => {
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Err(err))) => {
            warn!(error = %err, "websocket receive error");
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(None) | Err(_) => {
            warn!("websocket join timed out");
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let (seat, room, joined) = match join(&state, &initial_message).await {
        Ok(seat) => seat,
        Err(err) => {
            warn!(error = %err, "rejecting websocket connection");
            let _ = send_error(&outbound_tx, &err);
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    // Room events are buffered by the receiver, so the ack still reaches the writer first.
    if send_message_to_websocket(&outbound_tx, &joined).is_err() {
        seat.handle.leave(&seat.player_id).await;
        finalize(writer_task, outbound_tx).await;
        return;
    }
    let forwarder = tokio::spawn(forward_room(room, outbound_tx.clone(), seat.match_id.clone()));
    info!(match_id = %seat.match_id, player_id = %seat.player_id, "player connected");

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                debug!(match_id = %seat.match_id, payload = %text, "received room message");
                if let Err(err) = handle_message(&seat, &text).await {
                    if matches!(err, RoomError::ConnectionClosed) {
                        break;
                    }
                    warn!(match_id = %seat.match_id, player_id = %seat.player_id, error = %err, "room message rejected");
                    if send_error(&outbound_tx, &err).is_err() {
                        break;
                    }
                }
            }
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                info!(match_id = %seat.match_id, player_id = %seat.player_id, "player closed");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {}
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(match_id = %seat.match_id, error = %err, "websocket error");
                break;
            }
        }
    }

    forwarder.abort();
    seat.handle.leave(&seat.player_id).await;
    info!(match_id = %seat.match_id, player_id = %seat.player_id, "player disconnected");

    finalize(writer_task, outbound_tx).await;
}

/// Parse the first frame, which must be `join-room`, and register the player with the session.
async fn join(
    state: &SharedState,
    raw: &str,
) -> Result<(Seat, broadcast::Receiver<ServerMessage>, ServerMessage), RoomError> {
    let message = ClientMessage::from_json_str(raw).map_err(ServiceError::InvalidInput)?;
    let ClientMessage::JoinRoom(payload) = message else {
        return Err(ServiceError::InvalidInput("first message must be join-room".into()).into());
    };

    let store = state.require_session_store().await?;
    if store
        .load_match(&payload.game_id)
        .await
        .map_err(ServiceError::from)?
        .is_none()
    {
        return Err(ServiceError::MatchNotFound(payload.game_id).into());
    }

    // A session that just stopped for inactivity refuses commands; one retry starts a fresh one.
    let mut handle = match_session::ensure(state, &payload.game_id)?;
    let ack = match handle.join(&payload.user_id).await {
        Err(ServiceError::InvalidState(_)) if state.session(&payload.game_id).is_none() => {
            handle = match_session::ensure(state, &payload.game_id)?;
            handle.join(&payload.user_id).await?
        }
        other => other?,
    };

    let joined = ServerMessage::Joined(JoinedPayload {
        game_id: payload.game_id.clone(),
        user_id: payload.user_id.clone(),
        question_count: ack.question_count,
        phase: ack.phase.to_owned(),
    });
    let seat = Seat {
        player_id: payload.user_id,
        match_id: payload.game_id,
        handle,
    };
    Ok((seat, ack.room, joined))
}

async fn handle_message(seat: &Seat, raw: &str) -> Result<(), RoomError> {
    let message = ClientMessage::from_json_str(raw).map_err(ServiceError::InvalidInput)?;
    if message.game_id() != seat.match_id {
        return Err(RoomError::MismatchedGame {
            expected: seat.match_id.clone(),
            got: message.game_id().to_owned(),
        });
    }

    match message {
        ClientMessage::JoinRoom(_) => Err(RoomError::DuplicateJoin),
        ClientMessage::ReadyCheck(_) => {
            let count = seat.handle.ready_check().await?;
            debug!(match_id = %seat.match_id, count, "ready check");
            Ok(())
        }
        ClientMessage::NextQuestion(_) => Ok(seat.handle.next_question().await?),
        ClientMessage::Answered(payload) => {
            if payload.user_id != seat.player_id {
                return Err(RoomError::MismatchedPlayer {
                    expected: seat.player_id.clone(),
                    got: payload.user_id,
                });
            }
            let outcome = seat
                .handle
                .answer(AnswerSubmission {
                    player_id: payload.user_id,
                    selected: payload.option_num,
                    elapsed_seconds: payload.time,
                })
                .await?;
            debug!(match_id = %seat.match_id, ?outcome, "answer handled");
            Ok(())
        }
    }
}

/// Relay room events to this connection until the room closes or the writer goes away.
async fn forward_room(
    room: broadcast::Receiver<ServerMessage>,
    outbound_tx: mpsc::UnboundedSender<Message>,
    match_id: String,
) {
    let mut events = BroadcastStream::new(room);
    while let Some(event) = events.next().await {
        match event {
            Ok(message) => {
                if send_message_to_websocket(&outbound_tx, &message).is_err() {
                    return;
                }
            }
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(%match_id, skipped, "connection lagged behind room events");
            }
        }
    }
    debug!(%match_id, "room closed");
    let _ = outbound_tx.send(Message::Close(None));
}

fn send_error(tx: &mpsc::UnboundedSender<Message>, err: &RoomError) -> Result<(), RoomError> {
    send_message_to_websocket(
        tx,
        &ServerMessage::ErrorMessage(ErrorPayload {
            error: err.to_string(),
        }),
    )
}

/// Serialize a payload and push it onto the provided WebSocket sender.
///
/// Serialization failures are logged and swallowed; only a closed writer is an error.
fn send_message_to_websocket<T>(
    tx: &mpsc::UnboundedSender<Message>,
    value: &T,
) -> Result<(), RoomError>
where
    T: ?Sized + serde::Serialize + std::fmt::Debug,
{
    let payload = match serde_json::to_string(value) {
        Ok(p) => p,
        Err(err) => {
            warn!(error = %err, "failed to serialize message `{value:?}`");
            return Ok(());
        }
    };

    tx.send(Message::Text(payload.into()))
        .map_err(|_| RoomError::ConnectionClosed)
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::future::BoxFuture;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            models::MatchRecord,
            session_store::{MemorySessionStore, SessionStore},
        },
        services::ai_provider::{ChatProvider, ChatRequest, ProviderError},
        state::AppState,
    };

    struct Silent;

    impl ChatProvider for Silent {
        fn complete(
            &self,
            _request: ChatRequest,
        ) -> BoxFuture<'static, Result<String, ProviderError>> {
            Box::pin(async { Err(ProviderError::EmptyCompletion) })
        }
    }

    async fn state_with_match(match_id: &str) -> SharedState {
        let state = AppState::new(AppConfig::default(), Arc::new(Silent));
        let store = Arc::new(MemorySessionStore::new());
        store
            .create_match(match_id, MatchRecord::new("alice", "bob"))
            .await
            .unwrap();
        state.install_session_store(store as Arc<dyn SessionStore>).await;
        state
    }

    fn join_frame(user: &str, game: &str) -> String {
        format!(r#"{{"event":"join-room","data":{{"userId":"{user}","gameId":"{game}"}}}}"#)
    }

    #[tokio::test]
    async fn joining_an_unknown_match_is_rejected() {
        let state = state_with_match("quiz:1").await;

        let err = join(&state, &join_frame("alice", "quiz:404")).await.err().unwrap();
        assert!(matches!(
            err,
            RoomError::Service(ServiceError::MatchNotFound(ref id)) if id == "quiz:404"
        ));
        assert!(state.session("quiz:404").is_none());
    }

    #[tokio::test]
    async fn joining_a_stored_match_acknowledges_the_seat() {
        let state = state_with_match("quiz:1").await;

        let (seat, _room, joined) = join(&state, &join_frame("alice", "quiz:1")).await.unwrap();
        assert_eq!(seat.player_id, "alice");
        assert_eq!(seat.match_id, "quiz:1");
        let ServerMessage::Joined(payload) = joined else {
            panic!("expected a join acknowledgement");
        };
        assert_eq!(payload.question_count, 0);
        assert_eq!(payload.phase, "lobby");
    }

    #[tokio::test]
    async fn first_frame_must_be_a_join() {
        let state = state_with_match("quiz:1").await;

        let err = join(&state, r#"{"event":"next-question","data":{"gameId":"quiz:1"}}"#)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RoomError::Service(ServiceError::InvalidInput(_))));
    }
}
