use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use uuid::Uuid;

use crate::{dto::game::GameView, error::AppError, services::game_query_service, state::SharedState};

/// Read-only game routes.
pub fn router() -> Router<SharedState> {
    Router::new().route("/api/games/{game_id}", get(get_game))
}

/// Fetch the persisted state of a game.
#[utoipa::path(
    get,
    path = "/api/games/{game_id}",
    tag = "game",
    params(("game_id" = Uuid, Path, description = "Identifier of the game")),
    responses(
        (status = 200, description = "Game found", body = GameView),
        (status = 404, description = "Unknown game"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn get_game(
    State(state): State<SharedState>,
    Path(game_id): Path<Uuid>,
) -> Result<Json<GameView>, AppError> {
    let view = game_query_service::get_game(&state, game_id).await?;
    Ok(Json(view))
}
