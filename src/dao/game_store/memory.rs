use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::{
    game_store::GameStore,
    models::{GameEntity, NewGame},
    storage::{StorageError, StorageResult},
};

/// Process-local store used when no database is configured, and by tests.
#[derive(Clone, Default)]
pub struct InMemoryGameStore {
    games: Arc<DashMap<Uuid, GameEntity>>,
}

impl InMemoryGameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored games.
    pub fn len(&self) -> usize {
        self.games.len()
    }

    /// Whether no game has been stored yet.
    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }

    fn insert(&self, game: GameEntity) -> StorageResult<GameEntity> {
        match self.games.entry(game.id) {
            Entry::Occupied(_) => Err(StorageError::Duplicate { id: game.id }),
            Entry::Vacant(slot) => {
                slot.insert(game.clone());
                Ok(game)
            }
        }
    }
}

impl GameStore for InMemoryGameStore {
    fn create_game(&self, game: NewGame) -> BoxFuture<'static, StorageResult<GameEntity>> {
        let result = self.insert(GameEntity::from_new(game));
        Box::pin(async move { result })
    }

    fn find_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameEntity>>> {
        let found = self.games.get(&id).map(|entry| entry.value().clone());
        Box::pin(async move { Ok(found) })
    }

    fn save_game(&self, game: GameEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.games.insert(game.id, game);
        Box::pin(async move { Ok(()) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async move { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async move { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::{GameStatus, GameType, PlayerEntity, TimeControl};

    fn new_game() -> NewGame {
        NewGame {
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
        }
    }

    #[tokio::test]
    async fn create_then_find_returns_the_record() {
        let store = InMemoryGameStore::new();
        let created = store.create_game(new_game()).await.unwrap();

        let found = store.find_game(created.id).await.unwrap().unwrap();
        assert_eq!(found, created);
        assert_eq!(found.status, GameStatus::Waiting);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn save_overwrites_existing_record() {
        let store = InMemoryGameStore::new();
        let mut game = store.create_game(new_game()).await.unwrap();
        game.status = GameStatus::Active;
        store.save_game(game.clone()).await.unwrap();

        let found = store.find_game(game.id).await.unwrap().unwrap();
        assert_eq!(found.status, GameStatus::Active);
    }

    #[tokio::test]
    async fn unknown_game_is_none() {
        let store = InMemoryGameStore::new();
        assert!(store.find_game(Uuid::new_v4()).await.unwrap().is_none());
    }
}
