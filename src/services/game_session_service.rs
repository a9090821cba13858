use std::{sync::Arc, time::SystemTime};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle, time::sleep};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    auth::Identity,
    dao::{
        game_store::GameStore,
        models::{Color, FinishedGameExport, GameEntity, GameResult, GameStatus},
    },
    dto::ws::{GameInbound, GameOutbound},
    error::{HandshakeRejection, ServiceError},
    state::{
        SharedState,
        connection::ConnectionHandle,
        ledger::MoveLedger,
        session::{Binding, LiveGame},
    },
};

const WAITING_MESSAGE: &str = "Waiting for opponent to connect...";
const DEFAULT_REPORTED_REASON: &str = "Checkmate";

/// A connection bound to a game as one color.
#[derive(Debug, Clone)]
pub struct GameSession {
    pub game_id: Uuid,
    pub color: Color,
    pub identity: Identity,
    connection: ConnectionHandle,
    live: Arc<LiveGame>,
}

/// How a game ended: winner (`None` for a draw), stored code and human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Termination {
    pub winner: Option<Color>,
    pub code: String,
    pub reason: String,
}

impl Termination {
    pub fn resignation(resigning: Color) -> Self {
        Self {
            winner: Some(resigning.opponent()),
            code: "RESIGNATION".into(),
            reason: format!("{} resigned", resigning.title()),
        }
    }

    pub fn timeout(flagged: Color) -> Self {
        Self {
            winner: Some(flagged.opponent()),
            code: "TIMEOUT".into(),
            reason: format!("{} ran out of time", flagged.title()),
        }
    }

    pub fn agreement() -> Self {
        Self {
            winner: None,
            code: "DRAW_AGREEMENT".into(),
            reason: "Draw by agreement".into(),
        }
    }

    /// Outcome reported by a client (checkmate, stalemate, ...). Anything other than
    /// `white` or `black` is a draw.
    pub fn reported(winner: Option<&str>, reason: Option<&str>) -> Self {
        let winner = winner.and_then(|w| w.parse::<Color>().ok());
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_REPORTED_REASON);
        Self {
            winner,
            code: reason.to_uppercase().replace(' ', "_"),
            reason: reason.to_owned(),
        }
    }

    fn winner_label(&self) -> &'static str {
        self.winner.map_or("draw", Color::as_str)
    }
}

/// Handle the full lifecycle of a game WebSocket connection.
pub async fn handle_socket(
    state: SharedState,
    socket: WebSocket,
    game_id: Uuid,
    token: Option<String>,
) {
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

    let session = match join_game(&state, game_id, token.as_deref(), connection.clone()).await {
        Ok(session) => session,
        Err(rejection) => {
            warn!(game_id = %game_id, reason = %rejection, "game connection rejected");
            connection.close(rejection.close_code(), rejection.reason());
            finalize(writer_task, connection).await;
            return;
        }
    };

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => handle_text(&state, &session, text.as_str()).await,
            Ok(Message::Ping(payload)) => {
                let _ = connection.send(Message::Pong(payload));
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(_)) | Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(game_id = %game_id, error = %err, "websocket error");
                break;
            }
        }
    }

    disconnect(&state, session).await;
    finalize(writer_task, connection).await;
}

/// Authenticate, bind the connection to its color and start the game once both
/// colors are present.
pub async fn join_game(
    state: &SharedState,
    game_id: Uuid,
    token: Option<&str>,
    connection: ConnectionHandle,
) -> Result<GameSession, HandshakeRejection> {
    let token = token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(HandshakeRejection::MissingToken)?;
    let identity = state.verifier().verify(token).await?;
    let store = state.require_game_store().await?;

    let bound = bind_participant(state, store.as_ref(), game_id, &identity, &connection).await;
    let (color, live) = match bound {
        Ok(bound) => bound,
        Err(rejection) => {
            state.games().release_gate(game_id);
            return Err(rejection);
        }
    };
    info!(
        game_id = %game_id,
        user_id = %identity.id,
        connection_id = %connection.id(),
        color = %color,
        "player joined game"
    );

    let session = GameSession {
        game_id,
        color,
        identity,
        connection,
        live,
    };

    if !session.live.both_colors_bound() {
        let _ = session.connection.send_json(&GameOutbound::WaitingForOpponent {
            message: WAITING_MESSAGE.into(),
        });
        return Ok(session);
    }

    if let Err(err) = start_game(state, store.as_ref(), &session.live).await {
        warn!(game_id = %game_id, error = %err, "failed to start game");
        let departure = state
            .games()
            .unbind(game_id, session.connection.id())
            .and_then(|unbound| unbound.departure);
        if let Some(departure) = departure {
            state.games().forget_departure(game_id, departure.generation);
        }
        return Err(err.into());
    }

    Ok(session)
}

/// Check the row and bind the connection inside the gate, so an abandon or
/// finalize cannot slip between the status check and the bind.
async fn bind_participant(
    state: &SharedState,
    store: &dyn GameStore,
    game_id: Uuid,
    identity: &Identity,
    connection: &ConnectionHandle,
) -> Result<(Color, Arc<LiveGame>), HandshakeRejection> {
    let _gate = state.games().lock_game(game_id).await;

    let game = store
        .find_game(game_id)
        .await
        .map_err(ServiceError::from)?
        .ok_or(HandshakeRejection::GameNotFound)?;
    if game.status.is_terminal() {
        return Err(HandshakeRejection::GameClosed);
    }
    let color = game
        .color_of(&identity.id)
        .ok_or(HandshakeRejection::NotParticipant)?;

    let live = state.games().bind(
        &game,
        Binding {
            connection: connection.clone(),
            identity: identity.clone(),
            color,
        },
    );
    Ok((color, live))
}

/// Move the row to `ACTIVE` (first time only) and announce the game to every binding.
async fn start_game(
    state: &SharedState,
    store: &dyn GameStore,
    live: &LiveGame,
) -> Result<(), ServiceError> {
    let game_id = live.id();
    let gate = state.games().lock_game(game_id).await;
    let mut game = store
        .find_game(game_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("game {game_id}")))?;
    if game.status.is_terminal() {
        return Err(ServiceError::InvalidState(format!(
            "game {game_id} already ended"
        )));
    }
    if game.status == GameStatus::Waiting {
        game.status = GameStatus::Active;
        game.started_at = Some(SystemTime::now());
        store.save_game(game.clone()).await?;
        info!(game_id = %game_id, "game started");
    }
    drop(gate);

    let ledger = live.ledger();
    live.broadcast(&GameOutbound::GameStart {
        game_id,
        white_player: game.white.name.clone(),
        black_player: game.black.name.clone(),
        white_player_id: game.white.id.clone(),
        black_player_id: game.black.id.clone(),
        time_control: game.time_control.clone(),
        game_type: game.game_type,
        status: game.status,
        fen: ledger
            .fen()
            .map(str::to_owned)
            .unwrap_or_else(|| game.current_fen.clone()),
        pgn: ledger.transcript(),
    });
    Ok(())
}

/// Decode and dispatch one inbound frame. Malformed frames are dropped.
pub async fn handle_text(state: &SharedState, session: &GameSession, text: &str) {
    let message = match GameInbound::from_json_str(text) {
        Ok(message) => message,
        Err(err) => {
            warn!(
                game_id = %session.game_id,
                color = %session.color,
                error = %err,
                "dropping malformed game message"
            );
            return;
        }
    };
    handle_message(state, session, message).await;
}

pub async fn handle_message(state: &SharedState, session: &GameSession, message: GameInbound) {
    let color = session.color;
    let live = &session.live;
    debug!(game_id = %session.game_id, color = %color, kind = message.kind(), "game message");

    let termination = match message {
        GameInbound::Move {
            san,
            fen,
            white_time_ms,
            black_time_ms,
        } => {
            if live.is_finished() {
                warn!(game_id = %session.game_id, color = %color, "move after game end; dropping");
                return;
            }
            live.record_move(color, &san, fen.as_deref(), white_time_ms, black_time_ms);
            if let Err(err) = persist_snapshot(state, live).await {
                warn!(game_id = %session.game_id, error = %err, "failed to persist move snapshot");
            }
            live.send_to(
                color.opponent(),
                &GameOutbound::Move {
                    player: color,
                    san,
                    fen,
                    white_time_ms,
                    black_time_ms,
                },
            );
            return;
        }
        GameInbound::OfferDraw => {
            live.broadcast(&GameOutbound::DrawOffer { from: color });
            return;
        }
        GameInbound::DeclineDraw => {
            live.broadcast(&GameOutbound::DrawDeclined { from: color });
            return;
        }
        GameInbound::TimeUpdate {
            white_time_ms,
            black_time_ms,
        } => {
            live.send_to(
                color.opponent(),
                &GameOutbound::TimeUpdate {
                    player: color,
                    white_time_ms,
                    black_time_ms,
                },
            );
            return;
        }
        GameInbound::Unknown => {
            warn!(game_id = %session.game_id, color = %color, "ignoring unknown game message type");
            return;
        }
        GameInbound::AcceptDraw => Termination::agreement(),
        GameInbound::Resign => Termination::resignation(color),
        GameInbound::Flag { player } => Termination::timeout(player.unwrap_or(color)),
        GameInbound::GameOver { winner, reason } => {
            Termination::reported(winner.as_deref(), reason.as_deref())
        }
    };

    if let Err(err) = finalize_game(state, session.game_id, termination).await {
        error!(game_id = %session.game_id, error = %err, "failed to finalize game");
    }
}

/// Save the current ledger as the recovery snapshot. Skipped once the game is closed.
async fn persist_snapshot(state: &SharedState, live: &LiveGame) -> Result<(), ServiceError> {
    let store = state.require_game_store().await?;
    let game_id = live.id();
    let _gate = state.games().lock_game(game_id).await;

    let Some(mut game) = store.find_game(game_id).await? else {
        return Err(ServiceError::NotFound(format!("game {game_id}")));
    };
    if game.is_closed() {
        return Ok(());
    }
    merge_ledger(&mut game, &live.ledger());
    game.last_move_at = Some(SystemTime::now());
    store.save_game(game).await?;
    Ok(())
}

fn merge_ledger(game: &mut GameEntity, ledger: &MoveLedger) {
    if !ledger.is_empty() {
        game.moves = ledger.plies().to_vec();
        game.pgn = ledger.transcript();
    }
    if let Some(fen) = ledger.fen() {
        game.current_fen = fen.to_owned();
    }
    let (white, black) = ledger.clocks();
    if let Some(ms) = white {
        game.white_time_remaining_ms = ms;
    }
    if let Some(ms) = black {
        game.black_time_remaining_ms = ms;
    }
}

/// Transition a game to `FINISHED` at most once.
///
/// The check of the saved flag and the save of the finished row both happen inside
/// the per-game gate. Only the caller that performs the transition submits the two
/// export records and broadcasts `GAME_OVER`; every other caller gets `Ok(None)`.
pub async fn finalize_game(
    state: &SharedState,
    game_id: Uuid,
    termination: Termination,
) -> Result<Option<GameEntity>, ServiceError> {
    let store = state.require_game_store().await?;
    let gate = state.games().lock_game(game_id).await;

    let Some(mut game) = store.find_game(game_id).await? else {
        return Err(ServiceError::NotFound(format!("game {game_id}")));
    };
    if game.is_closed() {
        debug!(game_id = %game_id, "game already finalized");
        return Ok(None);
    }

    let live = state.games().get(game_id);
    if let Some(live) = &live {
        merge_ledger(&mut game, &live.ledger());
    }

    let result = GameResult::from_winner(termination.winner);
    game.status = GameStatus::Finished;
    game.saved = true;
    game.winner = termination.winner;
    game.result = Some(result);
    game.termination_reason = Some(termination.code.clone());
    game.ended_at = Some(SystemTime::now());
    game.pgn = if game.pgn.is_empty() {
        result.pgn_tag().to_owned()
    } else {
        format!("{} {}", game.pgn, result.pgn_tag())
    };

    store.save_game(game.clone()).await?;
    if let Some(live) = &live {
        live.mark_finished();
    }
    drop(gate);

    info!(
        game_id = %game_id,
        winner = termination.winner_label(),
        reason = %termination.code,
        moves = game.moves.len(),
        "game finished"
    );

    let rating_delta = state.config().export.rating_delta;
    for color in [Color::White, Color::Black] {
        state
            .exports()
            .submit(FinishedGameExport::for_perspective(&game, color, rating_delta));
    }

    if let Some(live) = live {
        live.broadcast(&GameOutbound::GameOver {
            winner: termination.winner_label().to_owned(),
            reason: termination.reason,
        });
    }

    Ok(Some(game))
}

/// Remove the binding; notify whoever remains, or start the abandon timer when the
/// game has no connection left.
pub async fn disconnect(state: &SharedState, session: GameSession) {
    let game_id = session.game_id;
    let Some(unbound) = state.games().unbind(game_id, session.connection.id()) else {
        return;
    };
    info!(
        game_id = %game_id,
        user_id = %session.identity.id,
        color = %session.color,
        released = unbound.released,
        "player left game"
    );

    if session.live.is_finished() {
        return;
    }

    let Some(departure) = unbound.departure else {
        session.live.broadcast(&GameOutbound::OpponentDisconnected {
            message: format!("{} disconnected", session.color.title()),
        });
        return;
    };

    let state = state.clone();
    tokio::spawn(async move {
        sleep(state.config().session.abandon_grace).await;
        match abandon_if_idle(&state, game_id, departure.generation).await {
            Ok(true) => info!(game_id = %game_id, "game abandoned"),
            Ok(false) => {}
            Err(err) => warn!(game_id = %game_id, error = %err, "failed to mark game abandoned"),
        }
    });
}

/// Mark a game as `ABANDONED` when departure `generation` is still its latest one
/// and the game has been without connections for the whole grace period.
/// Returns whether the row changed.
pub async fn abandon_if_idle(
    state: &SharedState,
    game_id: Uuid,
    generation: u64,
) -> Result<bool, ServiceError> {
    let store = state.require_game_store().await?;
    let gate = state.games().lock_game(game_id).await;

    let grace = state.config().session.abandon_grace;
    let idle = !state.games().is_live(game_id)
        && state
            .games()
            .idle_for(game_id, generation)
            .is_some_and(|idle| idle >= grace);
    let changed = if !idle {
        false
    } else {
        let changed = match store.find_game(game_id).await? {
            Some(mut game) if !game.status.is_terminal() => {
                game.status = GameStatus::Abandoned;
                game.ended_at = Some(SystemTime::now());
                store.save_game(game).await?;
                true
            }
            _ => false,
        };
        state.games().forget_departure(game_id, generation);
        changed
    };

    drop(gate);
    state.games().release_gate(game_id);
    Ok(changed)
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, connection: ConnectionHandle) {
    drop(connection);
    let _ = writer_task.await;
}
