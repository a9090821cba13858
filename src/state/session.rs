use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use dashmap::DashMap;
use indexmap::IndexMap;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    auth::Identity,
    dao::models::{Color, GameEntity},
    state::{
        connection::{ConnectionHandle, ConnectionId},
        ledger::MoveLedger,
    },
};

/// A connection attached to a game as one of its colors.
#[derive(Debug, Clone)]
pub struct Binding {
    pub connection: ConnectionHandle,
    pub identity: Identity,
    pub color: Color,
}

/// In-memory state of a game with at least one bound connection.
#[derive(Debug)]
pub struct LiveGame {
    id: Uuid,
    bindings: Mutex<IndexMap<ConnectionId, Binding>>,
    ledger: Mutex<MoveLedger>,
    finished: AtomicBool,
}

impl LiveGame {
    fn new(game: &GameEntity) -> Self {
        Self {
            id: game.id,
            bindings: Mutex::new(IndexMap::new()),
            ledger: Mutex::new(MoveLedger::from_plies(game.moves.clone())),
            finished: AtomicBool::new(game.status.is_terminal()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether white and black each have at least one bound connection.
    pub fn both_colors_bound(&self) -> bool {
        let bindings = self.bindings.lock().unwrap_or_else(PoisonError::into_inner);
        let white = bindings.values().any(|b| b.color == Color::White);
        let black = bindings.values().any(|b| b.color == Color::Black);
        white && black
    }

    pub fn binding_count(&self) -> usize {
        self.bindings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn recipients(&self, color: Option<Color>) -> Vec<Binding> {
        self.bindings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|b| color.is_none_or(|c| b.color == c))
            .cloned()
            .collect()
    }

    /// Send `message` to every bound connection. Failed sends are logged.
    pub fn broadcast<T>(&self, message: &T)
    where
        T: ?Sized + serde::Serialize + std::fmt::Debug,
    {
        self.deliver(None, message);
    }

    /// Send `message` only to the connections playing `color`.
    pub fn send_to<T>(&self, color: Color, message: &T)
    where
        T: ?Sized + serde::Serialize + std::fmt::Debug,
    {
        self.deliver(Some(color), message);
    }

    fn deliver<T>(&self, color: Option<Color>, message: &T)
    where
        T: ?Sized + serde::Serialize + std::fmt::Debug,
    {
        for binding in self.recipients(color) {
            if binding.connection.send_json(message).is_err() {
                warn!(
                    game_id = %self.id,
                    connection_id = %binding.connection.id(),
                    color = %binding.color,
                    "failed to deliver game message; connection closed"
                );
            }
        }
    }

    /// Append a ply and return a copy of the updated ledger.
    pub fn record_move(
        &self,
        color: Color,
        san: &str,
        fen: Option<&str>,
        white_time_ms: Option<u64>,
        black_time_ms: Option<u64>,
    ) -> MoveLedger {
        let mut ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
        ledger.record(color, san, fen, white_time_ms, black_time_ms);
        ledger.clone()
    }

    pub fn ledger(&self) -> MoveLedger {
        self.ledger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

/// Moment an unfinished game lost its last connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Departure {
    /// Distinguishes this departure from earlier ones of the same game.
    pub generation: u64,
    pub left_at: Instant,
}

/// Result of removing a binding.
#[derive(Debug)]
pub struct Unbound {
    pub binding: Binding,
    /// The game had no binding left and was released from memory.
    pub released: bool,
    /// Set when the released game was still unfinished.
    pub departure: Option<Departure>,
}

/// Live games, their finalize gates and the departures of idle games, all keyed
/// by game id.
#[derive(Default)]
pub struct GameRegistry {
    games: DashMap<Uuid, Arc<LiveGame>>,
    gates: DashMap<Uuid, Arc<AsyncMutex<()>>>,
    departures: DashMap<Uuid, Departure>,
    generations: AtomicU64,
}

impl GameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `binding` to the live state of `game`, creating it (and seeding its
    /// ledger from the persisted plies) when this is the first connection. Any
    /// pending departure of the game is forgotten.
    pub fn bind(&self, game: &GameEntity, binding: Binding) -> Arc<LiveGame> {
        self.departures.remove(&game.id);
        let entry = self
            .games
            .entry(game.id)
            .or_insert_with(|| Arc::new(LiveGame::new(game)));
        entry
            .bindings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(binding.connection.id(), binding);
        entry.value().clone()
    }

    /// Detach a connection. The live state is dropped once its last binding leaves.
    pub fn unbind(&self, game_id: Uuid, connection_id: ConnectionId) -> Option<Unbound> {
        let live = self.games.get(&game_id).map(|g| g.value().clone())?;
        let binding = live
            .bindings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .shift_remove(&connection_id)?;

        let released = self
            .games
            .remove_if(&game_id, |_, g| g.binding_count() == 0)
            .is_some();
        let departure = (released && !live.is_finished()).then(|| {
            let departure = Departure {
                generation: self.generations.fetch_add(1, Ordering::Relaxed),
                left_at: Instant::now(),
            };
            self.departures.insert(game_id, departure);
            departure
        });
        if released {
            debug!(game_id = %game_id, "released live game state");
            self.release_gate(game_id);
        }

        Some(Unbound {
            binding,
            released,
            departure,
        })
    }

    /// How long the game has been without connections, provided `generation` is
    /// still its latest departure.
    pub fn idle_for(&self, game_id: Uuid, generation: u64) -> Option<Duration> {
        self.departures
            .get(&game_id)
            .filter(|d| d.generation == generation)
            .map(|d| d.left_at.elapsed())
    }

    /// Drop the departure of `game_id` if `generation` is still the latest one.
    pub fn forget_departure(&self, game_id: Uuid, generation: u64) {
        self.departures
            .remove_if(&game_id, |_, d| d.generation == generation);
    }

    pub fn get(&self, game_id: Uuid) -> Option<Arc<LiveGame>> {
        self.games.get(&game_id).map(|g| g.value().clone())
    }

    pub fn is_live(&self, game_id: Uuid) -> bool {
        self.games.contains_key(&game_id)
    }

    pub fn live_count(&self) -> usize {
        self.games.len()
    }

    /// Enter the critical section of `game_id`. The gate is created lazily.
    pub async fn lock_game(&self, game_id: Uuid) -> OwnedMutexGuard<()> {
        let gate = self.gates.entry(game_id).or_default().clone();
        gate.lock_owned().await
    }

    /// Drop the gate of a game that is no longer live and that nobody holds.
    pub fn release_gate(&self, game_id: Uuid) {
        if self.is_live(game_id) {
            return;
        }
        self.gates
            .remove_if(&game_id, |_, gate| Arc::strong_count(gate) == 1);
    }

    #[cfg(test)]
    fn gate_count(&self) -> usize {
        self.gates.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::extract::ws::Message;
    use tokio::sync::mpsc;

    use super::*;
    use crate::dao::models::{GameType, NewGame, PlayerEntity, PlyEntity, TimeControl};

    fn game() -> GameEntity {
        GameEntity::from_new(NewGame {
            white: PlayerEntity {
                id: "w".into(),
                name: "White".into(),
            },
            black: PlayerEntity {
                id: "b".into(),
                name: "Black".into(),
            },
            time_control: TimeControl::parse("3+2"),
            game_type: GameType::Standard,
        })
    }

    fn binding(color: Color) -> (Binding, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = match color {
            Color::White => "w",
            Color::Black => "b",
        };
        (
            Binding {
                connection: ConnectionHandle::new(tx),
                identity: Identity::new(id, id),
                color,
            },
            rx,
        )
    }

    #[test]
    fn send_to_reaches_only_that_color() {
        let registry = GameRegistry::new();
        let game = game();
        let (white, mut rx_white) = binding(Color::White);
        let (black, mut rx_black) = binding(Color::Black);

        registry.bind(&game, white);
        let live = registry.bind(&game, black);
        assert!(live.both_colors_bound());

        live.send_to(Color::Black, &serde_json::json!({"type": "MOVE"}));
        assert!(matches!(rx_black.try_recv(), Ok(Message::Text(_))));
        assert!(rx_white.try_recv().is_err());

        live.broadcast(&serde_json::json!({"type": "DRAW_OFFER"}));
        assert!(rx_white.try_recv().is_ok());
        assert!(rx_black.try_recv().is_ok());
    }

    #[test]
    fn last_unbind_releases_live_state() {
        let registry = GameRegistry::new();
        let game = game();
        let (white, _rx_white) = binding(Color::White);
        let (black, _rx_black) = binding(Color::Black);
        let white_id = white.connection.id();
        let black_id = black.connection.id();
        registry.bind(&game, white);
        registry.bind(&game, black);

        let first = registry.unbind(game.id, white_id).unwrap();
        assert!(!first.released);
        assert_eq!(first.binding.color, Color::White);
        assert!(registry.is_live(game.id));

        let second = registry.unbind(game.id, black_id).unwrap();
        assert!(second.released);
        assert!(!registry.is_live(game.id));
        assert!(registry.unbind(game.id, black_id).is_none());
    }

    #[test]
    fn rejoining_supersedes_the_previous_departure() {
        let registry = GameRegistry::new();
        let game = game();

        let (white, _rx) = binding(Color::White);
        let white_id = white.connection.id();
        registry.bind(&game, white);
        let first = registry
            .unbind(game.id, white_id)
            .unwrap()
            .departure
            .unwrap();
        assert!(registry.idle_for(game.id, first.generation).is_some());

        let (white, _rx) = binding(Color::White);
        let white_id = white.connection.id();
        registry.bind(&game, white);
        assert!(registry.idle_for(game.id, first.generation).is_none());

        let second = registry
            .unbind(game.id, white_id)
            .unwrap()
            .departure
            .unwrap();
        assert_ne!(first.generation, second.generation);
        assert!(registry.idle_for(game.id, first.generation).is_none());
        assert!(registry.idle_for(game.id, second.generation).is_some());

        registry.forget_departure(game.id, first.generation);
        assert!(registry.idle_for(game.id, second.generation).is_some());
        registry.forget_departure(game.id, second.generation);
        assert!(registry.idle_for(game.id, second.generation).is_none());
    }

    #[test]
    fn finished_games_leave_no_departure() {
        let registry = GameRegistry::new();
        let game = game();
        let (white, _rx) = binding(Color::White);
        let white_id = white.connection.id();

        registry.bind(&game, white).mark_finished();
        let unbound = registry.unbind(game.id, white_id).unwrap();

        assert!(unbound.released);
        assert!(unbound.departure.is_none());
    }

    #[test]
    fn ledger_is_seeded_from_persisted_moves() {
        let registry = GameRegistry::new();
        let mut game = game();
        game.moves.push(PlyEntity {
            color: Color::White,
            san: "e4".into(),
            fen: "after-e4".into(),
        });
        let (black, _rx) = binding(Color::Black);

        let live = registry.bind(&game, black);
        let ledger = live.record_move(Color::Black, "c5", Some("after-c5"), None, None);

        assert_eq!(ledger.transcript(), "1. e4 c5");
    }

    #[tokio::test]
    async fn gate_serializes_holders_and_is_released() {
        let registry = Arc::new(GameRegistry::new());
        let id = Uuid::new_v4();

        let guard = registry.lock_game(id).await;
        let contender = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let _guard = registry.lock_game(id).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
        registry.release_gate(id);
        assert_eq!(registry.gate_count(), 0);
    }
}
