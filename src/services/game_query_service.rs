use uuid::Uuid;

use crate::{dto::game::GameView, error::ServiceError, state::SharedState};

/// Load a persisted game as a read-only view.
pub async fn get_game(state: &SharedState, game_id: Uuid) -> Result<GameView, ServiceError> {
    let store = state.require_game_store().await?;
    let game = store
        .find_game(game_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("game {game_id}")))?;
    Ok(GameView::from(&game))
}
