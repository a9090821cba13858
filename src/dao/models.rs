use std::{fmt, str::FromStr, time::SystemTime};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Standard chess starting position.
pub const STARTING_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";
/// Initial clock used when the time-control minutes cannot be parsed.
pub const FALLBACK_INITIAL_CLOCK_MS: u64 = 600_000;

/// Side of the board a participant plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
}

impl Color {
    /// The other side of the board.
    pub fn opponent(self) -> Self {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }

    /// Lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Color::White => "white",
            Color::Black => "black",
        }
    }

    /// Capitalised name used in human-readable reasons.
    pub fn title(self) -> &'static str {
        match self {
            Color::White => "White",
            Color::Black => "Black",
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Color {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "white" => Ok(Color::White),
            "black" => Ok(Color::Black),
            _ => Err(()),
        }
    }
}

/// Pairing variant; two waiters only match when they share the same type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameType {
    Standard,
    Voice,
}

impl GameType {
    /// Upper-case tag used on the wire and inside queue keys.
    pub fn as_str(self) -> &'static str {
        match self {
            GameType::Standard => "STANDARD",
            GameType::Voice => "VOICE",
        }
    }
}

impl fmt::Display for GameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GameType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STANDARD" => Ok(GameType::Standard),
            "VOICE" => Ok(GameType::Voice),
            _ => Err(()),
        }
    }
}

/// Lifecycle of a persisted game.
///
/// `Waiting -> Active -> Finished`, or `Waiting/Active -> Abandoned` when both
/// participants stay away past the abandon grace period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameStatus {
    Waiting,
    Active,
    Finished,
    Abandoned,
}

impl GameStatus {
    /// Whether no further transition is allowed.
    pub fn is_terminal(self) -> bool {
        matches!(self, GameStatus::Finished | GameStatus::Abandoned)
    }
}

/// Final outcome of a finished game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameResult {
    WhiteWin,
    BlackWin,
    Draw,
}

impl GameResult {
    /// Result for the given winner (`None` is a draw).
    pub fn from_winner(winner: Option<Color>) -> Self {
        match winner {
            Some(Color::White) => GameResult::WhiteWin,
            Some(Color::Black) => GameResult::BlackWin,
            None => GameResult::Draw,
        }
    }

    /// PGN result tag.
    pub fn pgn_tag(self) -> &'static str {
        match self {
            GameResult::WhiteWin => "1-0",
            GameResult::BlackWin => "0-1",
            GameResult::Draw => "1/2-1/2",
        }
    }
}

/// Parsed "minutes+increment" time control; the raw string is the queue-key component.
/// Increments are applied by the clients, which report both clocks with each move.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimeControl {
    raw: String,
    initial_ms: u64,
}

impl TimeControl {
    /// Parse a descriptor such as `"5+3"`. Never fails: unparseable minutes fall back
    /// to a ten minute clock.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim().to_owned();
        let initial_ms = raw
            .split('+')
            .next()
            .and_then(|minutes| minutes.trim().parse::<u64>().ok())
            .map(|minutes| minutes.saturating_mul(60_000))
            .unwrap_or(FALLBACK_INITIAL_CLOCK_MS);

        Self { raw, initial_ms }
    }

    /// Descriptor exactly as requested by the client.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Starting clock for each side, in milliseconds.
    pub fn initial_ms(&self) -> u64 {
        self.initial_ms
    }
}

/// Participant reference stored on a game.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerEntity {
    /// Stable user identifier.
    pub id: String,
    /// Display name shown to the opponent.
    pub name: String,
}

/// One recorded half-move.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlyEntity {
    /// Side that played the move.
    pub color: Color,
    /// Move notation as sent by the client (SAN).
    pub san: String,
    /// Board state after the move.
    pub fen: String,
}

/// Everything needed to create a freshly paired game.
#[derive(Debug, Clone)]
pub struct NewGame {
    pub white: PlayerEntity,
    pub black: PlayerEntity,
    pub time_control: TimeControl,
    pub game_type: GameType,
}

/// Persistent game record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameEntity {
    /// Primary key of the game.
    pub id: Uuid,
    pub white: PlayerEntity,
    pub black: PlayerEntity,
    /// Time-control descriptor ("minutes+increment").
    pub time_control: String,
    pub game_type: GameType,
    pub status: GameStatus,
    /// Set together with the transition to `Finished`; a set flag means the game
    /// has already been finalized and exported.
    pub saved: bool,
    /// Latest board state.
    pub current_fen: String,
    pub white_time_remaining_ms: u64,
    pub black_time_remaining_ms: u64,
    /// Recorded plies in play order.
    pub moves: Vec<PlyEntity>,
    /// Numbered move transcript; carries the result tag once finished.
    pub pgn: String,
    pub result: Option<GameResult>,
    pub winner: Option<Color>,
    pub termination_reason: Option<String>,
    pub created_at: SystemTime,
    pub started_at: Option<SystemTime>,
    pub last_move_at: Option<SystemTime>,
    pub ended_at: Option<SystemTime>,
}

impl GameEntity {
    /// Build the initial record for a fresh pairing, in `Waiting` status.
    pub fn from_new(new: NewGame) -> Self {
        let initial_ms = new.time_control.initial_ms();
        Self {
            id: Uuid::new_v4(),
            white: new.white,
            black: new.black,
            time_control: new.time_control.as_str().to_owned(),
            game_type: new.game_type,
            status: GameStatus::Waiting,
            saved: false,
            current_fen: STARTING_FEN.to_owned(),
            white_time_remaining_ms: initial_ms,
            black_time_remaining_ms: initial_ms,
            moves: Vec::new(),
            pgn: String::new(),
            result: None,
            winner: None,
            termination_reason: None,
            created_at: SystemTime::now(),
            started_at: None,
            last_move_at: None,
            ended_at: None,
        }
    }

    /// Color played by `user_id`, if they take part in this game.
    pub fn color_of(&self, user_id: &str) -> Option<Color> {
        if self.white.id == user_id {
            Some(Color::White)
        } else if self.black.id == user_id {
            Some(Color::Black)
        } else {
            None
        }
    }

    /// Participant playing `color`.
    pub fn player(&self, color: Color) -> &PlayerEntity {
        match color {
            Color::White => &self.white,
            Color::Black => &self.black,
        }
    }

    /// Whether the game can no longer be finalized.
    pub fn is_closed(&self) -> bool {
        self.saved || self.status.is_terminal()
    }
}

/// Outcome of a finished game as seen by one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PerspectiveResult {
    Win,
    Loss,
    Draw,
}

impl PerspectiveResult {
    /// Result for `perspective` given the winning side.
    pub fn for_color(perspective: Color, winner: Option<Color>) -> Self {
        match winner {
            None => PerspectiveResult::Draw,
            Some(color) if color == perspective => PerspectiveResult::Win,
            Some(_) => PerspectiveResult::Loss,
        }
    }
}

/// Record handed to the completed-game export collaborator, one per participant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FinishedGameExport {
    pub game_id: Uuid,
    /// Participant whose history this record belongs to.
    pub perspective_id: String,
    pub perspective_color: Color,
    pub opponent_id: String,
    pub opponent_name: String,
    pub result: PerspectiveResult,
    pub rating_change: i32,
    pub transcript: String,
    pub termination_reason: String,
    pub move_count: usize,
    pub white_time_remaining_ms: u64,
    pub black_time_remaining_ms: u64,
    pub time_control: String,
    pub game_type: GameType,
    /// Distinct per perspective so a replayed export does not double-record.
    pub idempotency_key: String,
}

impl FinishedGameExport {
    /// Build the export record of `game` framed from `perspective`'s side.
    pub fn for_perspective(game: &GameEntity, perspective: Color, rating_delta: i32) -> Self {
        let me = game.player(perspective);
        let opponent = game.player(perspective.opponent());
        let result = PerspectiveResult::for_color(perspective, game.winner);
        let rating_change = match result {
            PerspectiveResult::Win => rating_delta,
            PerspectiveResult::Loss => -rating_delta,
            PerspectiveResult::Draw => 0,
        };

        Self {
            game_id: game.id,
            perspective_id: me.id.clone(),
            perspective_color: perspective,
            opponent_id: opponent.id.clone(),
            opponent_name: opponent.name.clone(),
            result,
            rating_change,
            transcript: game.pgn.clone(),
            termination_reason: game.termination_reason.clone().unwrap_or_default(),
            move_count: game.moves.len(),
            white_time_remaining_ms: game.white_time_remaining_ms,
            black_time_remaining_ms: game.black_time_remaining_ms,
            time_control: game.time_control.clone(),
            game_type: game.game_type,
            idempotency_key: format!("{}:{}", game.id, perspective),
        }
    }
}
