pub mod connection;
pub mod ledger;
pub mod matchmaking;
pub mod session;

use std::sync::Arc;

use tokio::sync::{RwLock, watch};

use crate::{
    auth::IdentityVerifier,
    config::AppConfig,
    dao::game_store::GameStore,
    error::ServiceError,
    services::export_worker::ExportQueue,
};

use self::{matchmaking::MatchmakingQueues, session::GameRegistry};

pub type SharedState = Arc<AppState>;

/// Central application state: the only owner of the queues, live games and
/// storage handle, injected into every route.
pub struct AppState {
    config: AppConfig,
    game_store: RwLock<Option<Arc<dyn GameStore>>>,
    degraded: watch::Sender<bool>,
    verifier: Arc<dyn IdentityVerifier>,
    exports: ExportQueue,
    matchmaking: MatchmakingQueues,
    games: GameRegistry,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(
        config: AppConfig,
        verifier: Arc<dyn IdentityVerifier>,
        exports: ExportQueue,
    ) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            config,
            game_store: RwLock::new(None),
            degraded: degraded_tx,
            verifier,
            exports,
            matchmaking: MatchmakingQueues::new(),
            games: GameRegistry::new(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Obtain a handle to the current game store, if one is installed.
    pub async fn game_store(&self) -> Option<Arc<dyn GameStore>> {
        let guard = self.game_store.read().await;
        guard.as_ref().cloned()
    }

    /// Current game store, or [`ServiceError::Degraded`] when none is installed.
    pub async fn require_game_store(&self) -> Result<Arc<dyn GameStore>, ServiceError> {
        self.game_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new game store implementation and leave degraded mode.
    pub async fn install_game_store(&self, store: Arc<dyn GameStore>) {
        {
            let mut guard = self.game_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub(crate) fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }

    pub fn verifier(&self) -> &dyn IdentityVerifier {
        self.verifier.as_ref()
    }

    pub fn exports(&self) -> &ExportQueue {
        &self.exports
    }

    pub fn matchmaking(&self) -> &MatchmakingQueues {
        &self.matchmaking
    }

    pub fn games(&self) -> &GameRegistry {
        &self.games
    }
}
