use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::MongoDaoError;
use crate::dao::models::{
    Color, GameEntity, GameResult, GameStatus, GameType, PlayerEntity, PlyEntity,
};

/// Shape of a game inside the `games` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoGameDocument {
    #[serde(rename = "_id")]
    id: String,
    white: PlayerEntity,
    black: PlayerEntity,
    time_control: String,
    game_type: GameType,
    status: GameStatus,
    #[serde(default)]
    saved: bool,
    current_fen: String,
    white_time_remaining_ms: i64,
    black_time_remaining_ms: i64,
    #[serde(default)]
    moves: Vec<PlyEntity>,
    #[serde(default)]
    pgn: String,
    result: Option<GameResult>,
    winner: Option<Color>,
    termination_reason: Option<String>,
    created_at: DateTime,
    started_at: Option<DateTime>,
    last_move_at: Option<DateTime>,
    ended_at: Option<DateTime>,
}

impl From<GameEntity> for MongoGameDocument {
    fn from(value: GameEntity) -> Self {
        Self {
            id: value.id.to_string(),
            white: value.white,
            black: value.black,
            time_control: value.time_control,
            game_type: value.game_type,
            status: value.status,
            saved: value.saved,
            current_fen: value.current_fen,
            white_time_remaining_ms: clamp_ms(value.white_time_remaining_ms),
            black_time_remaining_ms: clamp_ms(value.black_time_remaining_ms),
            moves: value.moves,
            pgn: value.pgn,
            result: value.result,
            winner: value.winner,
            termination_reason: value.termination_reason,
            created_at: DateTime::from_system_time(value.created_at),
            started_at: value.started_at.map(DateTime::from_system_time),
            last_move_at: value.last_move_at.map(DateTime::from_system_time),
            ended_at: value.ended_at.map(DateTime::from_system_time),
        }
    }
}

impl TryFrom<MongoGameDocument> for GameEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoGameDocument) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&value.id).map_err(|err| MongoDaoError::MalformedGame {
            id: value.id.clone(),
            reason: err.to_string(),
        })?;

        Ok(Self {
            id,
            white: value.white,
            black: value.black,
            time_control: value.time_control,
            game_type: value.game_type,
            status: value.status,
            saved: value.saved,
            current_fen: value.current_fen,
            white_time_remaining_ms: value.white_time_remaining_ms.max(0) as u64,
            black_time_remaining_ms: value.black_time_remaining_ms.max(0) as u64,
            moves: value.moves,
            pgn: value.pgn,
            result: value.result,
            winner: value.winner,
            termination_reason: value.termination_reason,
            created_at: value.created_at.to_system_time(),
            started_at: value.started_at.map(DateTime::to_system_time),
            last_move_at: value.last_move_at.map(DateTime::to_system_time),
            ended_at: value.ended_at.map(DateTime::to_system_time),
        })
    }
}

// BSON has no unsigned 64-bit integer.
fn clamp_ms(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub fn doc_id(id: Uuid) -> Document {
    doc! {"_id": id.to_string()}
}
