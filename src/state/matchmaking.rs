use std::{collections::VecDeque, fmt, future::Future, sync::Arc};

use axum::extract::ws::close_code;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    auth::Identity,
    dao::models::{GameEntity, GameType},
    error::ServiceError,
    state::connection::{ConnectionHandle, ConnectionId},
};

/// Close reason sent to a waiting connection superseded by the same user.
pub const REPLACED_REASON: &str = "Replaced by a newer connection";

/// Pairing compatibility class: two waiters only match when both parts are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueKey {
    pub time_control: String,
    pub game_type: GameType,
}

impl QueueKey {
    pub fn new(time_control: impl Into<String>, game_type: GameType) -> Self {
        Self {
            time_control: time_control.into(),
            game_type,
        }
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.time_control, self.game_type)
    }
}

/// A connection searching for an opponent.
#[derive(Debug, Clone)]
pub struct WaitingEntry {
    pub connection: ConnectionHandle,
    pub identity: Identity,
}

/// Outcome of [`MatchmakingQueues::admit`].
#[derive(Debug)]
pub enum Admission {
    /// No opponent yet; the newcomer now waits at the tail.
    Queued,
    /// Paired with `opponent`, who plays white.
    Matched {
        game: GameEntity,
        opponent: WaitingEntry,
    },
}

type Queue = Arc<Mutex<VecDeque<WaitingEntry>>>;

/// FIFO waiting lists keyed by [`QueueKey`], each behind its own lock.
#[derive(Default)]
pub struct MatchmakingQueues {
    queues: DashMap<QueueKey, Queue>,
    /// Queued connections, used by cancel and the liveness sweep.
    tracked: DashMap<ConnectionId, (ConnectionHandle, QueueKey)>,
}

impl MatchmakingQueues {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, key: &QueueKey) -> Queue {
        self.queues.entry(key.clone()).or_default().clone()
    }

    /// Admit `entry` into the queue for `key`, pairing it with the longest-waiting
    /// live opponent of a different identity.
    ///
    /// The scan, the game creation and the queue mutation all happen while the queue
    /// lock is held. `create` receives `(white, black)`. When it fails the opponent is
    /// put back at the front and the newcomer is not queued.
    pub async fn admit<F, Fut>(
        &self,
        key: &QueueKey,
        entry: WaitingEntry,
        create: F,
    ) -> Result<Admission, ServiceError>
    where
        F: FnOnce(Identity, Identity) -> Fut,
        Fut: Future<Output = Result<GameEntity, ServiceError>>,
    {
        let queue = self.queue(key);
        let mut waiting = queue.lock().await;

        waiting.retain(|candidate| {
            if candidate.identity.id != entry.identity.id {
                return true;
            }
            debug!(
                queue = %key,
                user_id = %candidate.identity.id,
                connection_id = %candidate.connection.id(),
                "evicting stale waiting entry"
            );
            self.tracked.remove(&candidate.connection.id());
            candidate.connection.close(close_code::NORMAL, REPLACED_REASON);
            false
        });

        let mut opponent = None;
        while let Some(candidate) = waiting.pop_front() {
            if candidate.connection.is_open() {
                opponent = Some(candidate);
                break;
            }
            debug!(
                queue = %key,
                connection_id = %candidate.connection.id(),
                "dropping dead waiting entry"
            );
            self.tracked.remove(&candidate.connection.id());
        }

        let Some(opponent) = opponent else {
            self.tracked.insert(
                entry.connection.id(),
                (entry.connection.clone(), key.clone()),
            );
            waiting.push_back(entry);
            return Ok(Admission::Queued);
        };

        match create(opponent.identity.clone(), entry.identity.clone()).await {
            Ok(game) => {
                self.tracked.remove(&opponent.connection.id());
                info!(
                    queue = %key,
                    game_id = %game.id,
                    white = %opponent.identity.id,
                    black = %entry.identity.id,
                    "players paired"
                );
                Ok(Admission::Matched { game, opponent })
            }
            Err(err) => {
                waiting.push_front(opponent);
                Err(err)
            }
        }
    }

    /// Withdraw a waiting connection. Returns `false` when it was not queued, e.g. it
    /// was already cancelled or has been paired.
    pub async fn cancel(&self, connection_id: ConnectionId) -> bool {
        let Some(key) = self
            .tracked
            .get(&connection_id)
            .map(|tracked| tracked.value().1.clone())
        else {
            return false;
        };

        let queue = self.queue(&key);
        let mut waiting = queue.lock().await;
        let before = waiting.len();
        waiting.retain(|candidate| candidate.connection.id() != connection_id);
        let removed = waiting.len() != before;
        self.tracked.remove(&connection_id);
        removed
    }

    /// Ping every queued connection and purge those that are no longer open.
    /// Returns how many entries were purged.
    pub async fn sweep(&self) -> usize {
        let dead: Vec<(ConnectionId, QueueKey)> = self
            .tracked
            .iter()
            .filter_map(|tracked| {
                let (connection, key) = tracked.value();
                match connection.ping() {
                    Ok(()) => None,
                    Err(_) => Some((connection.id(), key.clone())),
                }
            })
            .collect();

        let mut purged = 0;
        for (connection_id, key) in dead {
            let queue = self.queue(&key);
            let mut waiting = queue.lock().await;
            let before = waiting.len();
            waiting.retain(|candidate| candidate.connection.id() != connection_id);
            purged += before - waiting.len();
            self.tracked.remove(&connection_id);
        }

        // Entries can also go stale between a match scan and tracking.
        let queues: Vec<Queue> = self.queues.iter().map(|q| q.value().clone()).collect();
        for queue in queues {
            let mut waiting = queue.lock().await;
            let before = waiting.len();
            waiting.retain(|candidate| candidate.connection.is_open());
            purged += before - waiting.len();
        }

        if purged > 0 {
            debug!(purged, "liveness sweep purged dead waiting entries");
        }
        purged
    }

    /// Number of connections waiting under `key`.
    pub async fn waiting_len(&self, key: &QueueKey) -> usize {
        let queue = self.queues.get(key).map(|q| q.value().clone());
        match queue {
            Some(queue) => queue.lock().await.len(),
            None => 0,
        }
    }

    /// Number of queued connections across every key.
    pub fn tracked_len(&self) -> usize {
        self.tracked.len()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use axum::extract::ws::Message;
    use tokio::sync::mpsc;

    use super::*;
    use crate::dao::models::{NewGame, PlayerEntity, TimeControl};

    fn connection() -> (ConnectionHandle, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(tx), rx)
    }

    fn waiting(id: &str) -> (WaitingEntry, mpsc::UnboundedReceiver<Message>) {
        let (connection, rx) = connection();
        (
            WaitingEntry {
                connection,
                identity: Identity::new(id, format!("player-{id}")),
            },
            rx,
        )
    }

    fn key() -> QueueKey {
        QueueKey::new("5+0", GameType::Standard)
    }

    async fn make_game(white: Identity, black: Identity) -> Result<GameEntity, ServiceError> {
        Ok(GameEntity::from_new(NewGame {
            white: PlayerEntity::from(white),
            black: PlayerEntity::from(black),
            time_control: TimeControl::parse("5+0"),
            game_type: GameType::Standard,
        }))
    }

    #[test]
    fn queue_key_renders_with_separator() {
        assert_eq!(key().to_string(), "5+0|STANDARD");
    }

    #[tokio::test]
    async fn first_arrival_plays_white() {
        let queues = MatchmakingQueues::new();
        let (a, _rx_a) = waiting("A");
        let (b, _rx_b) = waiting("B");

        assert!(matches!(
            queues.admit(&key(), a, make_game).await.unwrap(),
            Admission::Queued
        ));
        let Admission::Matched { game, opponent } =
            queues.admit(&key(), b, make_game).await.unwrap()
        else {
            panic!("expected a match");
        };

        assert_eq!(opponent.identity.id, "A");
        assert_eq!(game.white.id, "A");
        assert_eq!(game.black.id, "B");
        assert_eq!(queues.waiting_len(&key()).await, 0);
        assert_eq!(queues.tracked_len(), 0);
    }

    #[tokio::test]
    async fn same_identity_never_pairs_with_itself() {
        let queues = MatchmakingQueues::new();
        let (first_tab, mut rx_first) = waiting("A");
        let (second_tab, _rx_second) = waiting("A");

        queues.admit(&key(), first_tab, make_game).await.unwrap();
        let outcome = queues.admit(&key(), second_tab, make_game).await.unwrap();

        assert!(matches!(outcome, Admission::Queued));
        assert_eq!(queues.waiting_len(&key()).await, 1);
        match rx_first.try_recv().unwrap() {
            Message::Close(Some(frame)) => assert_eq!(frame.reason.as_str(), REPLACED_REASON),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn dead_entries_are_skipped_during_scan() {
        let queues = MatchmakingQueues::new();
        let (dead, rx_dead) = waiting("A");
        let (alive, _rx_alive) = waiting("B");
        let (newcomer, _rx_new) = waiting("C");

        queues.admit(&key(), dead, make_game).await.unwrap();
        drop(rx_dead);
        // B finds only a dead entry, so it waits instead of pairing.
        assert!(matches!(
            queues.admit(&key(), alive, make_game).await.unwrap(),
            Admission::Queued
        ));
        assert_eq!(queues.waiting_len(&key()).await, 1);

        let Admission::Matched { opponent, .. } =
            queues.admit(&key(), newcomer, make_game).await.unwrap()
        else {
            panic!("expected a match");
        };
        assert_eq!(opponent.identity.id, "B");
    }

    #[tokio::test]
    async fn failed_creation_requeues_opponent_at_front() {
        let queues = MatchmakingQueues::new();
        let (a, _rx_a) = waiting("A");
        let (b, _rx_b) = waiting("B");
        queues.admit(&key(), a, make_game).await.unwrap();

        let result = queues
            .admit(&key(), b, |_, _| async {
                Err::<GameEntity, _>(ServiceError::Degraded)
            })
            .await;

        assert!(matches!(result, Err(ServiceError::Degraded)));
        assert_eq!(queues.waiting_len(&key()).await, 1);
        let (c, _rx_c) = waiting("C");
        let Admission::Matched { opponent, .. } =
            queues.admit(&key(), c, make_game).await.unwrap()
        else {
            panic!("expected a match");
        };
        assert_eq!(opponent.identity.id, "A");
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let queues = MatchmakingQueues::new();
        let (a, _rx_a) = waiting("A");
        let id = a.connection.id();
        queues.admit(&key(), a, make_game).await.unwrap();

        assert!(queues.cancel(id).await);
        assert!(!queues.cancel(id).await);
        assert_eq!(queues.waiting_len(&key()).await, 0);
    }

    #[tokio::test]
    async fn cancel_after_match_has_no_effect() {
        let queues = MatchmakingQueues::new();
        let (a, _rx_a) = waiting("A");
        let (b, _rx_b) = waiting("B");
        let a_id = a.connection.id();
        queues.admit(&key(), a, make_game).await.unwrap();
        queues.admit(&key(), b, make_game).await.unwrap();

        assert!(!queues.cancel(a_id).await);
    }

    #[tokio::test]
    async fn sweep_purges_closed_connections() {
        let queues = MatchmakingQueues::new();
        let (a, rx_a) = waiting("A");
        let other_key = QueueKey::new("3+2", GameType::Voice);
        let (b, mut rx_b) = waiting("B");
        queues.admit(&key(), a, make_game).await.unwrap();
        queues.admit(&other_key, b, make_game).await.unwrap();

        drop(rx_a);
        assert_eq!(queues.sweep().await, 1);
        assert_eq!(queues.waiting_len(&key()).await, 0);
        assert_eq!(queues.waiting_len(&other_key).await, 1);
        assert!(matches!(rx_b.try_recv(), Ok(Message::Ping(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_arrivals_pair_each_waiter_once() {
        let queues = Arc::new(MatchmakingQueues::new());
        let created = Arc::new(AtomicUsize::new(0));
        let mut receivers = Vec::new();
        let mut tasks = Vec::new();

        for i in 0..8 {
            let (entry, rx) = waiting(&format!("user-{i}"));
            receivers.push(rx);
            let queues = queues.clone();
            let created = created.clone();
            tasks.push(tokio::spawn(async move {
                queues
                    .admit(&key(), entry, |white, black| {
                        created.fetch_add(1, Ordering::SeqCst);
                        async move {
                            tokio::time::sleep(Duration::from_millis(1)).await;
                            make_game(white, black).await
                        }
                    })
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(created.load(Ordering::SeqCst), 4);
        assert_eq!(queues.waiting_len(&key()).await, 0);
    }
}
