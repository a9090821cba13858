use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report storage health together with live session counters.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.require_game_store().await {
        Ok(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "storage health check failed");
            }
        }
        Err(_) => warn!("storage unavailable (degraded mode)"),
    }

    let live_games = state.games().live_count();
    let waiting = state.matchmaking().tracked_len();
    if state.is_degraded() {
        HealthResponse::degraded(live_games, waiting)
    } else {
        HealthResponse::ok(live_games, waiting)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::harness;

    #[tokio::test]
    async fn reports_ok_with_store_installed() {
        let h = harness().await;
        let status = health_status(&h.state).await;
        assert_eq!(status.status, "ok");
        assert_eq!(status.live_games, 0);

        h.state.update_degraded(true);
        assert_eq!(health_status(&h.state).await.status, "degraded");
    }
}
