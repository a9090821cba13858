use crate::dao::models::{Color, PlyEntity};

/// In-memory record of the plies played in a live game.
///
/// Rendered as a numbered transcript: `1. e4 e5 2. Nf3`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MoveLedger {
    plies: Vec<PlyEntity>,
    fen: Option<String>,
    white_time_ms: Option<u64>,
    black_time_ms: Option<u64>,
}

impl MoveLedger {
    /// Rebuild a ledger from persisted plies so a restarted session keeps its history.
    pub fn from_plies(plies: Vec<PlyEntity>) -> Self {
        let fen = plies.last().map(|ply| ply.fen.clone());
        Self {
            plies,
            fen,
            ..Self::default()
        }
    }

    /// Record a ply. A missing board state keeps the previous one. A blank move
    /// still updates the board state and clocks but adds nothing to the transcript.
    pub fn record(
        &mut self,
        color: Color,
        san: &str,
        fen: Option<&str>,
        white_time_ms: Option<u64>,
        black_time_ms: Option<u64>,
    ) {
        if let Some(fen) = fen.filter(|f| !f.trim().is_empty()) {
            self.fen = Some(fen.to_owned());
        }
        let san = san.trim();
        if !san.is_empty() {
            self.plies.push(PlyEntity {
                color,
                san: san.to_owned(),
                fen: self.fen.clone().unwrap_or_default(),
            });
        }
        if white_time_ms.is_some() {
            self.white_time_ms = white_time_ms;
        }
        if black_time_ms.is_some() {
            self.black_time_ms = black_time_ms;
        }
    }

    pub fn plies(&self) -> &[PlyEntity] {
        &self.plies
    }

    pub fn is_empty(&self) -> bool {
        self.plies.is_empty()
    }

    /// Latest board state, if any ply carried one.
    pub fn fen(&self) -> Option<&str> {
        self.fen.as_deref()
    }

    /// Last reported clocks as `(white, black)`.
    pub fn clocks(&self) -> (Option<u64>, Option<u64>) {
        (self.white_time_ms, self.black_time_ms)
    }

    /// Numbered move transcript.
    pub fn transcript(&self) -> String {
        let mut out = String::new();
        let mut move_number = 0;
        for ply in &self.plies {
            if !out.is_empty() {
                out.push(' ');
            }
            if ply.color == Color::White {
                move_number += 1;
                out.push_str(&format!("{move_number}. "));
            }
            out.push_str(&ply.san);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_numbers_white_moves() {
        let mut ledger = MoveLedger::default();
        ledger.record(Color::White, "e4", Some("f1"), None, None);
        ledger.record(Color::Black, "e5", Some("f2"), None, None);
        ledger.record(Color::White, "Nf3", Some("f3"), Some(58_000), None);

        assert_eq!(ledger.transcript(), "1. e4 e5 2. Nf3");
        assert_eq!(ledger.fen(), Some("f3"));
        assert_eq!(ledger.clocks(), (Some(58_000), None));
        assert_eq!(ledger.plies().len(), 3);
    }

    #[test]
    fn blank_move_updates_board_without_a_ply() {
        let mut ledger = MoveLedger::default();
        ledger.record(Color::White, "e4", Some("after-e4"), None, None);
        ledger.record(Color::Black, "  ", Some("after-blank"), None, Some(1_000));

        assert_eq!(ledger.transcript(), "1. e4");
        assert_eq!(ledger.plies().len(), 1);
        assert_eq!(ledger.fen(), Some("after-blank"));
        assert_eq!(ledger.clocks(), (None, Some(1_000)));
    }

    #[test]
    fn missing_fen_keeps_previous_board() {
        let mut ledger = MoveLedger::default();
        ledger.record(Color::White, "d4", Some("after-d4"), None, None);
        ledger.record(Color::Black, "d5", None, None, None);

        assert_eq!(ledger.plies()[1].fen, "after-d4");
        assert_eq!(ledger.fen(), Some("after-d4"));
    }

    #[test]
    fn rebuilt_ledger_continues_numbering() {
        let ledger = MoveLedger::from_plies(vec![
            PlyEntity {
                color: Color::White,
                san: "c4".into(),
                fen: "x".into(),
            },
            PlyEntity {
                color: Color::Black,
                san: "c5".into(),
                fen: "y".into(),
            },
        ]);
        let mut ledger = ledger;
        ledger.record(Color::White, "Nc3", Some("z"), None, None);

        assert_eq!(ledger.transcript(), "1. c4 c5 2. Nc3");
        assert_eq!(ledger.fen(), Some("z"));
    }
}
