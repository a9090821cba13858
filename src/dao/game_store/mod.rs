pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use crate::dao::models::{GameEntity, NewGame};
use crate::dao::storage::StorageResult;
use futures::future::BoxFuture;
use uuid::Uuid;

pub use memory::InMemoryGameStore;

/// Abstraction over the persistence layer for game records.
///
/// `save_game` is called from inside the per-game finalize gate, so backends are
/// expected to answer quickly.
pub trait GameStore: Send + Sync {
    fn create_game(&self, game: NewGame) -> BoxFuture<'static, StorageResult<GameEntity>>;
    fn find_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameEntity>>>;
    fn save_game(&self, game: GameEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
