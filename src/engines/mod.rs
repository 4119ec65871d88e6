//! The move-generation/evaluation capability consumed by the turn coordinator.
//!
//! Engines speak FEN on the way in and coordinate notation on the way out, so
//! any provider that understands those encodings can sit behind the trait: the
//! built-in searcher, a UCI bridge, a remote service.

use thiserror::Error;

use crate::position::FenError;

pub mod engine_minmax;
pub use engine_minmax::MinMaxEngine;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("engine received an invalid position: {0}")]
    InvalidPosition(#[from] FenError),
    /// The side to move has no legal moves (mate or stalemate).
    #[error("no legal move available")]
    NoMoveAvailable,
    #[error("engine unavailable: {0}")]
    Unavailable(String),
}

/// A chess engine as seen by this crate: stateless per call, handed a full
/// position every time, never retaining game history.
pub trait ChessEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Computes the best move for the side to move. Potentially slow; the
    /// coordinator runs this off the UI thread.
    fn compute_move(&self, fen: &str) -> Result<String, EngineError>;

    /// Scores an arbitrary position. Positive favors White. The position does
    /// not have to be reachable from the starting position; analysis views
    /// feed constructed boards through here.
    fn evaluate(&self, fen: &str) -> Result<i32, EngineError>;
}
