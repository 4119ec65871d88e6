//! Play chess against an engine: the turn-taking core.
//!
//! Three pieces, leaf-first:
//!
//! - [`position`]: the canonical board state and the only validation path a
//!   move can take, human or engine.
//! - [`engines`]: the move-computation capability behind [`ChessEngine`],
//!   with a built-in negamax searcher.
//! - [`coordinator`]: the state machine between the board widget and the
//!   engine. It owns the position and the thinking flag, runs the engine off
//!   the UI thread and hands replies back on it.
//!
//! A host wires its board widget in through [`BoardView`], forwards drag-drop
//! events to [`TurnCoordinator::on_piece_drop`] and polls
//! [`TurnCoordinator::poll_engine`] from its event loop.

pub mod coordinator;
pub mod engines;
pub mod position;

#[cfg(target_arch = "wasm32")]
mod wasm;

pub use coordinator::{
    BoardView, DropOutcome, EngineStatus, TurnCoordinator, TurnError, TurnState,
};
pub use engines::{ChessEngine, EngineError, MinMaxEngine};
pub use position::{FenError, IllegalMoveError, Position, PositionStore, INITIAL_POSITION};

pub use chess::{ChessMove, Color, Piece, Square};
