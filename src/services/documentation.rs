use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI document for Chess Arena Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::game::get_game,
        crate::routes::websocket::matchmaking_ws,
        crate::routes::websocket::game_ws,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::game::GameView,
            crate::dto::ws::MatchmakingInbound,
            crate::dto::ws::MatchmakingOutbound,
            crate::dto::ws::GameInbound,
            crate::dto::ws::GameOutbound,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "matchmaking", description = "WebSocket queue for finding an opponent"),
        (name = "game", description = "Live game WebSocket and game lookup"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/healthcheck",
            "/api/games/{game_id}",
            "/api/matchmaking",
            "/api/game/{game_id}",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
