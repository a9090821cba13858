use axum::{
    Router,
    extract::{Path, Query, State, WebSocketUpgrade},
    http::{HeaderMap, header::AUTHORIZATION},
    response::IntoResponse,
    routing::get,
};
use uuid::Uuid;

use crate::{
    dto::game::{GameConnectParams, MatchmakingParams},
    services::{game_session_service, matchmaking_service},
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/api/matchmaking",
    tag = "matchmaking",
    params(MatchmakingParams),
    responses((status = 101, description = "Switching protocols to WebSocket"))
)]
/// Upgrade the HTTP connection into a matchmaking WebSocket session.
pub async fn matchmaking_ws(
    State(state): State<SharedState>,
    Query(mut params): Query<MatchmakingParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    params.token = resolve_token(params.token.take(), &headers);
    ws.on_upgrade(move |socket| matchmaking_service::handle_socket(state, socket, params))
}

#[utoipa::path(
    get,
    path = "/api/game/{game_id}",
    tag = "game",
    params(
        ("game_id" = Uuid, Path, description = "Game returned in GAME_FOUND"),
        GameConnectParams
    ),
    responses((status = 101, description = "Switching protocols to WebSocket"))
)]
/// Upgrade the HTTP connection into a game WebSocket session.
pub async fn game_ws(
    State(state): State<SharedState>,
    Path(game_id): Path<Uuid>,
    Query(params): Query<GameConnectParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let token = resolve_token(params.token, &headers);
    ws.on_upgrade(move |socket| game_session_service::handle_socket(state, socket, game_id, token))
}

/// Query-string token, or the `Authorization: Bearer` header when absent.
fn resolve_token(query: Option<String>, headers: &HeaderMap) -> Option<String> {
    query.filter(|t| !t.trim().is_empty()).or_else(|| {
        headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| token.trim().to_owned())
            .filter(|token| !token.is_empty())
    })
}

/// Configure the WebSocket endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/api/matchmaking", get(matchmaking_ws))
        .route("/api/game/{game_id}", get(game_ws))
}
