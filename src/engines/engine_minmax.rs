//! Built-in negamax engine with alpha-beta pruning and a small
//! material-plus-placement evaluation. Strong enough to punish blunders and
//! find short mates, fast enough to answer a drag-drop without a spinner.

use chess::{Board, BoardStatus, ChessMove, Color, MoveGen, Piece, Square, ALL_SQUARES};
use rand::prelude::SliceRandom;

use super::{ChessEngine, EngineError};
use crate::position::{fen, Position};

const MIN_EVALUATION: i32 = i32::MIN + 1; // +1 is important because -MIN is not an i32 number
const LOSS: i32 = -10_000_000;
const DRAW: i32 = 0;

pub struct MinMaxEngine {
    depth: i32,
    randomize: bool,
}

impl MinMaxEngine {
    pub fn new(depth: i32) -> Self {
        Self {
            depth,
            randomize: false,
        }
    }

    /// Shuffles root moves so equal-scoring replies vary between games.
    pub fn randomized(depth: i32) -> Self {
        Self {
            depth,
            randomize: true,
        }
    }
}

impl Default for MinMaxEngine {
    fn default() -> Self {
        Self::new(3)
    }
}

impl ChessEngine for MinMaxEngine {
    fn name(&self) -> &str {
        "minmax"
    }

    fn compute_move(&self, fen_str: &str) -> Result<String, EngineError> {
        let position = Position::from_fen(fen_str)?;
        find_best_move(position.board(), self.depth, self.randomize)
            .map(fen::format_move)
            .ok_or(EngineError::NoMoveAvailable)
    }

    fn evaluate(&self, fen_str: &str) -> Result<i32, EngineError> {
        let position = Position::from_fen(fen_str)?;
        Ok(evaluate_board(position.board()))
    }
}

pub fn find_best_move(board: &Board, depth: i32, randomize: bool) -> Option<ChessMove> {
    let mut moves: Vec<ChessMove> = MoveGen::new_legal(board).collect();
    if randomize {
        moves.shuffle(&mut rand::thread_rng());
    }

    let mut best_move = None;
    let mut best_score = MIN_EVALUATION;
    for mv in moves {
        let new_board = board.make_move_new(mv);
        // Negamax for the opponent's position (invert the returned evaluation)
        let score = -negamax(&new_board, depth - 1, MIN_EVALUATION, -best_score);
        if score > best_score {
            best_score = score;
            best_move = Some(mv);
        }
    }
    best_move
}

fn negamax(board: &Board, depth: i32, mut alpha: i32, beta: i32) -> i32 {
    let moves = MoveGen::new_legal(board);
    if moves.len() == 0 {
        return match board.status() {
            BoardStatus::Checkmate => LOSS - depth, // closer loss is punished harder
            _ => DRAW,
        };
    }
    if depth <= 0 {
        return side_relative(evaluate_board(board), board.side_to_move());
    }

    let mut max_score = MIN_EVALUATION;
    for mv in moves {
        let new_board = board.make_move_new(mv);
        let score = -negamax(&new_board, depth - 1, -beta, -alpha);
        max_score = max_score.max(score);
        alpha = alpha.max(score);
        if alpha >= beta {
            break;
        }
    }
    max_score
}

fn side_relative(evaluation: i32, side_to_move: Color) -> i32 {
    match side_to_move {
        Color::White => evaluation,
        Color::Black => -evaluation,
    }
}

/// Material balance plus placement weights, from White's point of view.
pub fn evaluate_board(board: &Board) -> i32 {
    let mut score = 0;
    for square in ALL_SQUARES {
        if let (Some(piece), Some(color)) = (board.piece_on(square), board.color_on(square)) {
            let value = match piece {
                Piece::Pawn => 1,
                Piece::Knight => 3,
                Piece::Bishop => 3,
                Piece::Rook => 5,
                Piece::Queen => 9,
                Piece::King => 100,
            };
            let mut piece_score = value * 10;
            piece_score += piece_position_weight(piece, square, color);
            score += match color {
                Color::White => piece_score,
                Color::Black => -piece_score,
            };
        }
    }
    score
}

fn piece_position_weight(piece: Piece, square: Square, color: Color) -> i32 {
    let rank = square.get_rank().to_index() as i32;
    let file = square.get_file().to_index() as i32;
    match piece {
        Piece::Pawn => {
            let rank_value = match color {
                Color::White => rank,
                Color::Black => 7 - rank,
            };
            rank_value * score_distance_from_center(rank, file)
        }
        Piece::King => {
            // keep the king home and off the central files
            let rank_value = match color {
                Color::White => rank,
                Color::Black => 7 - rank,
            };
            -rank_value + distance_from_center_single(file)
        }
        Piece::Knight => -distance_from_center(rank, file),
        Piece::Bishop | Piece::Rook | Piece::Queen => score_distance_from_center(rank, file),
    }
}

fn distance_from_center_single(n: i32) -> i32 {
    match n {
        3 | 4 => 0,
        _ if n < 3 => 3 - n,
        _ => n - 4,
    }
}

fn distance_from_center(rank: i32, file: i32) -> i32 {
    distance_from_center_single(rank) + distance_from_center_single(file)
}

fn score_distance_from_center(rank: i32, file: i32) -> i32 {
    10 - distance_from_center(rank, file)
}
