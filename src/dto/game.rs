use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::{
    dao::models::{Color, GameEntity, GameResult, GameStatus, GameType, PlayerEntity, PlyEntity},
    dto::{format_system_time, validation::validate_time_control},
};

const MAX_GAME_TYPE_LEN: usize = 32;

/// Query string accepted by the matchmaking WebSocket endpoint.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct MatchmakingParams {
    /// Bearer credential; the `Authorization` header is used when absent.
    #[serde(default)]
    pub token: Option<String>,
    /// "minutes+increment"; blank selects the configured default.
    #[serde(default)]
    pub time_control: Option<String>,
    /// `STANDARD` or `VOICE` (case-insensitive); blank selects the configured default.
    #[serde(default)]
    pub game_type: Option<String>,
}

impl MatchmakingParams {
    /// Requested time control, `None` when missing or blank.
    pub fn time_control(&self) -> Option<&str> {
        non_blank(self.time_control.as_deref())
    }

    /// Requested game type tag, `None` when missing or blank.
    pub fn game_type(&self) -> Option<&str> {
        non_blank(self.game_type.as_deref())
    }
}

impl Validate for MatchmakingParams {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if let Some(tc) = self.time_control() {
            if let Err(e) = validate_time_control(tc) {
                errors.add("time_control", e);
            }
        }

        if let Some(tag) = self.game_type() {
            if tag.len() > MAX_GAME_TYPE_LEN || tag.parse::<GameType>().is_err() {
                let mut err = validator::ValidationError::new("game_type");
                err.message = Some(format!("Unknown game type `{tag}`").into());
                errors.add("game_type", err);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Query string accepted by the game WebSocket endpoint.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct GameConnectParams {
    /// Bearer credential; the `Authorization` header is used when absent.
    #[serde(default)]
    pub token: Option<String>,
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Participant projection.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PlayerView {
    pub id: String,
    pub name: String,
}

impl From<&PlayerEntity> for PlayerView {
    fn from(value: &PlayerEntity) -> Self {
        Self {
            id: value.id.clone(),
            name: value.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PlyView {
    pub color: Color,
    pub san: String,
    pub fen: String,
}

impl From<&PlyEntity> for PlyView {
    fn from(value: &PlyEntity) -> Self {
        Self {
            color: value.color,
            san: value.san.clone(),
            fen: value.fen.clone(),
        }
    }
}

/// Read-only projection of a persisted game.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GameView {
    pub id: Uuid,
    pub white: PlayerView,
    pub black: PlayerView,
    pub time_control: String,
    pub game_type: GameType,
    pub status: GameStatus,
    pub current_fen: String,
    pub white_time_remaining_ms: u64,
    pub black_time_remaining_ms: u64,
    pub moves: Vec<PlyView>,
    pub pgn: String,
    pub result: Option<GameResult>,
    pub winner: Option<Color>,
    pub termination_reason: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
}

impl From<&GameEntity> for GameView {
    fn from(game: &GameEntity) -> Self {
        Self {
            id: game.id,
            white: (&game.white).into(),
            black: (&game.black).into(),
            time_control: game.time_control.clone(),
            game_type: game.game_type,
            status: game.status,
            current_fen: game.current_fen.clone(),
            white_time_remaining_ms: game.white_time_remaining_ms,
            black_time_remaining_ms: game.black_time_remaining_ms,
            moves: game.moves.iter().map(PlyView::from).collect(),
            pgn: game.pgn.clone(),
            result: game.result,
            winner: game.winner,
            termination_reason: game.termination_reason.clone(),
            created_at: format_system_time(game.created_at),
            started_at: game.started_at.map(format_system_time),
            ended_at: game.ended_at.map(format_system_time),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_params_fall_through_to_defaults() {
        let params = MatchmakingParams {
            token: None,
            time_control: Some("  ".into()),
            game_type: Some(String::new()),
        };
        assert!(params.validate().is_ok());
        assert_eq!(params.time_control(), None);
        assert_eq!(params.game_type(), None);
    }

    #[test]
    fn unknown_game_type_is_rejected() {
        let params = MatchmakingParams {
            game_type: Some("bughouse".into()),
            ..Default::default()
        };
        let errors = params.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("game_type"));
    }

    #[test]
    fn malformed_time_control_is_rejected() {
        let params = MatchmakingParams {
            time_control: Some("5+3+1".into()),
            game_type: Some("voice".into()),
            ..Default::default()
        };
        let errors = params.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("time_control"));
        assert!(!errors.field_errors().contains_key("game_type"));
    }
}
