use std::ops::ControlFlow;

use axum::extract::ws::{Message, WebSocket, close_code};
use futures::{SinkExt, StreamExt};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{Color, GameEntity, GameType, NewGame, TimeControl},
    dto::{
        game::MatchmakingParams,
        ws::{MatchmakingInbound, MatchmakingOutbound},
    },
    error::{HandshakeRejection, ServiceError},
    state::{
        SharedState,
        connection::ConnectionHandle,
        matchmaking::{Admission, QueueKey, WaitingEntry},
    },
};

const SEARCHING_MESSAGE: &str = "Searching for opponent...";
const CANCELLED_REASON: &str = "Cancelled";
const MALFORMED_REASON: &str = "Malformed message";

/// What happened to a connection admitted into matchmaking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Waiting in the queue for `key`.
    Queued { key: QueueKey },
    /// Paired straight away.
    Matched { game_id: Uuid, color: Color },
}

/// Handle the full lifecycle of a matchmaking WebSocket connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket, params: MatchmakingParams) {
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
    let connection = ConnectionHandle::new(outbound_tx);

    if let Err(rejection) = join_queue(&state, &params, connection.clone()).await {
        warn!(reason = %rejection, "matchmaking connection rejected");
        connection.close(rejection.close_code(), rejection.reason());
        finalize(writer_task, connection).await;
        return;
    }

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if handle_text(&state, &connection, text.as_str()).await.is_break() {
                    break;
                }
            }
            Ok(Message::Ping(payload)) => {
                let _ = connection.send(Message::Pong(payload));
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(_)) | Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(connection_id = %connection.id(), error = %err, "websocket error");
                break;
            }
        }
    }

    if state.matchmaking().cancel(connection.id()).await {
        info!(connection_id = %connection.id(), "left matchmaking queue");
    }
    finalize(writer_task, connection).await;
}

/// Decode and dispatch one inbound frame. Breaks when the connection is done:
/// after a cancel, or after a malformed frame closed it.
pub async fn handle_text(
    state: &SharedState,
    connection: &ConnectionHandle,
    text: &str,
) -> ControlFlow<()> {
    match MatchmakingInbound::from_json_str(text) {
        Ok(MatchmakingInbound::Cancel) => {
            cancel(state, connection).await;
            ControlFlow::Break(())
        }
        Ok(MatchmakingInbound::Unknown) => {
            warn!(connection_id = %connection.id(), "ignoring unknown matchmaking message type");
            ControlFlow::Continue(())
        }
        Err(err) => {
            warn!(
                connection_id = %connection.id(),
                error = %err,
                "malformed matchmaking message; closing"
            );
            connection.close(close_code::INVALID, MALFORMED_REASON);
            ControlFlow::Break(())
        }
    }
}

/// Resolve the queue key from the handshake, falling back to configured defaults.
pub fn resolve_queue_key(
    state: &SharedState,
    params: &MatchmakingParams,
) -> Result<QueueKey, ServiceError> {
    params.validate()?;
    let defaults = &state.config().matchmaking;

    let time_control = params
        .time_control()
        .unwrap_or(defaults.default_time_control.as_str())
        .to_owned();
    let game_type = match params.game_type() {
        Some(tag) => tag
            .parse::<GameType>()
            .map_err(|_| ServiceError::InvalidInput(format!("unknown game type `{tag}`")))?,
        None => defaults.default_game_type,
    };

    Ok(QueueKey::new(time_control, game_type))
}

/// Authenticate the connection, acknowledge it and try to pair it.
pub async fn join_queue(
    state: &SharedState,
    params: &MatchmakingParams,
    connection: ConnectionHandle,
) -> Result<JoinOutcome, HandshakeRejection> {
    let token = params
        .token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(HandshakeRejection::MissingToken)?;
    let identity = state.verifier().verify(token).await?;
    let key = resolve_queue_key(state, params)?;
    let store = state.require_game_store().await?;

    info!(
        queue = %key,
        user_id = %identity.id,
        connection_id = %connection.id(),
        "player searching"
    );
    if connection
        .send_json(&MatchmakingOutbound::Waiting {
            message: SEARCHING_MESSAGE.into(),
            time_control: key.time_control.clone(),
            game_type: key.game_type,
        })
        .is_err()
    {
        debug!(connection_id = %connection.id(), "connection closed before queueing");
    }

    let time_control = TimeControl::parse(&key.time_control);
    let game_type = key.game_type;
    let entry = WaitingEntry {
        connection: connection.clone(),
        identity,
    };
    let admission = state
        .matchmaking()
        .admit(&key, entry, move |white, black| async move {
            store
                .create_game(NewGame {
                    white: white.into(),
                    black: black.into(),
                    time_control,
                    game_type,
                })
                .await
                .map_err(ServiceError::from)
        })
        .await?;

    match admission {
        Admission::Queued => Ok(JoinOutcome::Queued { key }),
        Admission::Matched { game, opponent } => {
            notify_match(&game, &opponent.connection, Color::White);
            notify_match(&game, &connection, Color::Black);
            Ok(JoinOutcome::Matched {
                game_id: game.id,
                color: Color::Black,
            })
        }
    }
}

fn notify_match(game: &GameEntity, connection: &ConnectionHandle, color: Color) {
    let message = MatchmakingOutbound::GameFound {
        game_id: game.id,
        color,
        time_control: game.time_control.clone(),
        game_type: game.game_type,
        white_player: game.white.name.clone(),
        black_player: game.black.name.clone(),
        white_player_id: game.white.id.clone(),
        black_player_id: game.black.id.clone(),
    };
    if connection.send_json(&message).is_err() {
        warn!(
            game_id = %game.id,
            connection_id = %connection.id(),
            color = %color,
            "failed to deliver GAME_FOUND; connection closed"
        );
    }
}

/// Withdraw the connection from its queue and close it normally.
/// Returns `false` when it was no longer queued.
pub async fn cancel(state: &SharedState, connection: &ConnectionHandle) -> bool {
    let removed = state.matchmaking().cancel(connection.id()).await;
    info!(connection_id = %connection.id(), removed, "matchmaking cancelled");
    connection.close(close_code::NORMAL, CANCELLED_REASON);
    removed
}

/// Periodically ping queued connections and purge the dead ones.
pub async fn run_liveness_sweep(state: SharedState) {
    let mut ticker = interval(state.config().matchmaking.sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        state.matchmaking().sweep().await;
    }
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, connection: ConnectionHandle) {
    drop(connection);
    let _ = writer_task.await;
}
