//! Canonical board state and validated mutation.
//!
//! [`Position`] is an immutable value: applying a move produces a new value,
//! the old one is never touched. [`PositionStore`] owns the live position and
//! is the single place where moves are checked against full chess legality.

use std::fmt;
use std::str::FromStr;

use chess::{Board, ChessMove, Color, MoveGen, Piece, Rank, Square};
use thiserror::Error;
use tracing::debug;

pub mod fen;
pub use fen::{FenError, INITIAL_POSITION};

/// A move that fails the legality check. The position it was tried against is
/// carried along so hosts can report something useful.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal move {mv} in position {fen}")]
pub struct IllegalMoveError {
    pub mv: String,
    pub fen: String,
}

/// Full board state: piece placement, side to move, castling rights,
/// en-passant target and the two move counters.
///
/// The `chess` crate board does not carry the half-move clock or the
/// full-move number, so they are tracked here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    board: Board,
    halfmove_clock: u32,
    fullmove_number: u32,
}

impl Position {
    /// The standard starting position.
    pub fn initial() -> Self {
        Self {
            board: Board::default(),
            halfmove_clock: 0,
            fullmove_number: 1,
        }
    }

    pub fn from_fen(fen_str: &str) -> Result<Self, FenError> {
        let parts: Vec<&str> = fen_str.split_whitespace().collect();
        if parts.len() != 6 {
            return Err(FenError::new(fen_str, "must have 6 fields"));
        }
        let board = Board::from_str(fen_str).map_err(|e| FenError::new(fen_str, e.to_string()))?;
        let halfmove_clock = parts[4]
            .parse()
            .map_err(|_| FenError::new(fen_str, "invalid half-move clock"))?;
        let fullmove_number = parts[5]
            .parse()
            .map_err(|_| FenError::new(fen_str, "invalid full-move number"))?;
        Ok(Self {
            board,
            halfmove_clock,
            fullmove_number,
        })
    }

    pub fn as_fen(&self) -> String {
        format!(
            "{} {} {}",
            fen::board_fields(&self.board),
            self.halfmove_clock,
            self.fullmove_number
        )
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn side_to_move(&self) -> Color {
        self.board.side_to_move()
    }

    pub fn halfmove_clock(&self) -> u32 {
        self.halfmove_clock
    }

    pub fn fullmove_number(&self) -> u32 {
        self.fullmove_number
    }

    pub fn legal_moves(&self) -> Vec<ChessMove> {
        MoveGen::new_legal(&self.board).collect()
    }

    pub fn is_legal(&self, mv: ChessMove) -> bool {
        MoveGen::new_legal(&self.board).any(|m| m == mv)
    }

    /// Builds the candidate move for a drag from `from` to `to`. A pawn drop
    /// on the last rank promotes to a queen; there is no under-promotion UI.
    pub fn candidate_move(&self, from: Square, to: Square) -> ChessMove {
        let promotion = match (self.board.piece_on(from), self.board.color_on(from)) {
            (Some(Piece::Pawn), Some(Color::White)) if to.get_rank() == Rank::Eighth => {
                Some(Piece::Queen)
            }
            (Some(Piece::Pawn), Some(Color::Black)) if to.get_rank() == Rank::First => {
                Some(Piece::Queen)
            }
            _ => None,
        };
        ChessMove::new(from, to, promotion)
    }

    /// Applies a move, producing the derived position. `self` is untouched.
    pub fn apply(&self, mv: ChessMove) -> Result<Position, IllegalMoveError> {
        if !self.is_legal(mv) {
            return Err(IllegalMoveError {
                mv: fen::format_move(mv),
                fen: self.as_fen(),
            });
        }

        let moved_piece = self.board.piece_on(mv.get_source());
        // A pawn leaving its file always captures, covering en passant where
        // the target square is empty.
        let is_capture = self.board.piece_on(mv.get_dest()).is_some()
            || (moved_piece == Some(Piece::Pawn)
                && mv.get_source().get_file() != mv.get_dest().get_file());

        let halfmove_clock = if is_capture || moved_piece == Some(Piece::Pawn) {
            0
        } else {
            self.halfmove_clock + 1
        };
        let fullmove_number = match self.board.side_to_move() {
            Color::White => self.fullmove_number,
            Color::Black => self.fullmove_number + 1,
        };

        Ok(Position {
            board: self.board.make_move_new(mv),
            halfmove_clock,
            fullmove_number,
        })
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_fen())
    }
}

/// Owns the live position plus the moves that produced it.
pub struct PositionStore {
    start: Position,
    position: Position,
    history: Vec<ChessMove>,
}

impl PositionStore {
    pub fn new() -> Self {
        Self::from_position(Position::initial())
    }

    pub fn from_fen(fen_str: &str) -> Result<Self, FenError> {
        Ok(Self::from_position(Position::from_fen(fen_str)?))
    }

    fn from_position(start: Position) -> Self {
        Self {
            start,
            position: start,
            history: Vec::new(),
        }
    }

    pub fn current(&self) -> Position {
        self.position
    }

    /// Checks the move against full chess legality for the current position.
    /// On success the new position is stored and returned; on failure nothing
    /// is mutated.
    pub fn validate_and_apply(&mut self, mv: ChessMove) -> Result<Position, IllegalMoveError> {
        let next = self.position.apply(mv)?;
        debug!(mv = %fen::format_move(mv), fen = %next.as_fen(), "move applied");
        self.position = next;
        self.history.push(mv);
        Ok(next)
    }

    /// Restores the start position the store was created with.
    pub fn reset(&mut self) -> Position {
        self.position = self.start;
        self.history.clear();
        self.position
    }

    pub fn history(&self) -> &[ChessMove] {
        &self.history
    }
}

impl Default for PositionStore {
    fn default() -> Self {
        Self::new()
    }
}
