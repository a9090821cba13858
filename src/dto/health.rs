use serde::Serialize;
use utoipa::ToSchema;

/// Health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Games with at least one connected participant.
    pub live_games: usize,
    /// Connections currently tracked by matchmaking.
    pub waiting_connections: usize,
}

impl HealthResponse {
    /// Health response indicating the system is operational.
    pub fn ok(live_games: usize, waiting_connections: usize) -> Self {
        Self {
            status: "ok".to_string(),
            live_games,
            waiting_connections,
        }
    }

    /// Health response indicating the system runs without storage.
    pub fn degraded(live_games: usize, waiting_connections: usize) -> Self {
        Self {
            status: "degraded".to_string(),
            live_games,
            waiting_connections,
        }
    }
}
