use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dao::models::{Color, GameStatus, GameType};

#[derive(Debug, Deserialize, Serialize, ToSchema, PartialEq, Eq)]
/// Messages accepted from matchmaking WebSocket clients.
#[serde(tag = "type")]
pub enum MatchmakingInbound {
    /// Leave the queue and close the connection.
    #[serde(rename = "CANCEL")]
    Cancel,
    #[serde(other)]
    Unknown,
}

impl MatchmakingInbound {
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Deserialize, Serialize, ToSchema, PartialEq, Eq)]
/// Messages pushed to matchmaking WebSocket clients.
#[serde(tag = "type")]
pub enum MatchmakingOutbound {
    /// Acknowledges that the connection is searching for an opponent.
    #[serde(rename = "WAITING", rename_all = "camelCase")]
    Waiting {
        message: String,
        time_control: String,
        game_type: GameType,
    },
    /// A pairing was made; connect to the game endpoint with `game_id`.
    #[serde(rename = "GAME_FOUND", rename_all = "camelCase")]
    GameFound {
        game_id: Uuid,
        color: Color,
        time_control: String,
        game_type: GameType,
        white_player: String,
        black_player: String,
        white_player_id: String,
        black_player_id: String,
    },
}

#[derive(Debug, Deserialize, Serialize, ToSchema, PartialEq, Eq)]
/// Messages accepted from a participant bound to a game.
#[serde(tag = "type")]
pub enum GameInbound {
    /// A ply played by the sender, with the resulting position.
    #[serde(rename = "MOVE", rename_all = "camelCase")]
    Move {
        san: String,
        #[serde(default)]
        fen: Option<String>,
        #[serde(default)]
        white_time_ms: Option<u64>,
        #[serde(default)]
        black_time_ms: Option<u64>,
    },
    #[serde(rename = "OFFER_DRAW")]
    OfferDraw,
    #[serde(rename = "ACCEPT_DRAW")]
    AcceptDraw,
    #[serde(rename = "DECLINE_DRAW")]
    DeclineDraw,
    #[serde(rename = "RESIGN")]
    Resign,
    /// A clock reached zero; `player` is the flagged side (defaults to the sender).
    #[serde(rename = "FLAG")]
    Flag {
        #[serde(default)]
        player: Option<Color>,
    },
    /// Client-detected end of game (checkmate, stalemate, ...).
    #[serde(rename = "GAME_OVER")]
    GameOver {
        #[serde(default)]
        winner: Option<String>,
        #[serde(default)]
        reason: Option<String>,
    },
    /// Clock sync, relayed to the opponent untouched.
    #[serde(rename = "TIME_UPDATE", rename_all = "camelCase")]
    TimeUpdate {
        #[serde(default)]
        white_time_ms: Option<u64>,
        #[serde(default)]
        black_time_ms: Option<u64>,
    },
    #[serde(other)]
    Unknown,
}

impl GameInbound {
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Wire discriminator, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            GameInbound::Move { .. } => "MOVE",
            GameInbound::OfferDraw => "OFFER_DRAW",
            GameInbound::AcceptDraw => "ACCEPT_DRAW",
            GameInbound::DeclineDraw => "DECLINE_DRAW",
            GameInbound::Resign => "RESIGN",
            GameInbound::Flag { .. } => "FLAG",
            GameInbound::GameOver { .. } => "GAME_OVER",
            GameInbound::TimeUpdate { .. } => "TIME_UPDATE",
            GameInbound::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Deserialize, Serialize, ToSchema, PartialEq, Eq, Clone)]
/// Messages pushed to participants of a game.
#[serde(tag = "type")]
pub enum GameOutbound {
    #[serde(rename = "WAITING_FOR_OPPONENT")]
    WaitingForOpponent { message: String },
    /// Both sides are connected; also re-sent when a participant reconnects.
    #[serde(rename = "GAME_START", rename_all = "camelCase")]
    GameStart {
        game_id: Uuid,
        white_player: String,
        black_player: String,
        white_player_id: String,
        black_player_id: String,
        time_control: String,
        game_type: GameType,
        status: GameStatus,
        fen: String,
        pgn: String,
    },
    #[serde(rename = "MOVE", rename_all = "camelCase")]
    Move {
        player: Color,
        san: String,
        fen: Option<String>,
        white_time_ms: Option<u64>,
        black_time_ms: Option<u64>,
    },
    #[serde(rename = "DRAW_OFFER")]
    DrawOffer { from: Color },
    #[serde(rename = "DRAW_DECLINED")]
    DrawDeclined { from: Color },
    #[serde(rename = "TIME_UPDATE", rename_all = "camelCase")]
    TimeUpdate {
        player: Color,
        white_time_ms: Option<u64>,
        black_time_ms: Option<u64>,
    },
    /// `winner` is `white`, `black` or `draw`.
    #[serde(rename = "GAME_OVER")]
    GameOver { winner: String, reason: String },
    #[serde(rename = "OPPONENT_DISCONNECTED")]
    OpponentDisconnected { message: String },
}
