use chess::{Board, ChessMove, Color, File, Piece, Rank, Square};
use thiserror::Error;

pub const INITIAL_POSITION: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid FEN `{fen}`: {reason}")]
pub struct FenError {
    pub fen: String,
    pub reason: String,
}

impl FenError {
    pub(crate) fn new(fen: &str, reason: impl Into<String>) -> Self {
        Self {
            fen: fen.to_string(),
            reason: reason.into(),
        }
    }
}

/// Parses a square like "e3".
pub fn parse_square(square: &str) -> Option<Square> {
    let bytes = square.as_bytes();
    if bytes.len() != 2 {
        return None;
    }
    let file = bytes[0].checked_sub(b'a')? as usize;
    let rank = bytes[1].checked_sub(b'1')? as usize;
    if file > 7 || rank > 7 {
        return None;
    }
    Some(Square::make_square(Rank::from_index(rank), File::from_index(file)))
}

/// Parses coordinate notation like "e2e4" or "e7e8q".
pub fn parse_move(notation: &str) -> Option<ChessMove> {
    let notation = notation.trim();
    if !notation.is_ascii() || notation.len() < 4 || notation.len() > 5 {
        return None;
    }
    let from = parse_square(&notation[0..2])?;
    let to = parse_square(&notation[2..4])?;
    let promotion = match notation.as_bytes().get(4) {
        None => None,
        Some(b'q') | Some(b'Q') => Some(Piece::Queen),
        Some(b'r') | Some(b'R') => Some(Piece::Rook),
        Some(b'b') | Some(b'B') => Some(Piece::Bishop),
        Some(b'n') | Some(b'N') => Some(Piece::Knight),
        Some(_) => return None,
    };
    Some(ChessMove::new(from, to, promotion))
}

/// Renders a move in coordinate notation.
pub fn format_move(mv: ChessMove) -> String {
    let mut notation = format!("{}{}", mv.get_source(), mv.get_dest());
    if let Some(piece) = mv.get_promotion() {
        notation.push(match piece {
            Piece::Rook => 'r',
            Piece::Bishop => 'b',
            Piece::Knight => 'n',
            _ => 'q',
        });
    }
    notation
}

/// Renders the first four FEN fields (placement, side to move, castling, en passant).
/// The move counters live on `Position`, not on the `chess` crate board.
pub(crate) fn board_fields(board: &Board) -> String {
    let mut fen = String::new();
    for rank in (0..8).rev() {
        let mut empty = 0;
        for file in 0..8 {
            let square = Square::make_square(Rank::from_index(rank), File::from_index(file));
            match (board.piece_on(square), board.color_on(square)) {
                (Some(piece), Some(color)) => {
                    if empty > 0 {
                        fen.push_str(&empty.to_string());
                        empty = 0;
                    }
                    fen.push(piece_char(piece, color));
                }
                _ => empty += 1,
            }
        }
        if empty > 0 {
            fen.push_str(&empty.to_string());
        }
        if rank > 0 {
            fen.push('/');
        }
    }

    fen.push(' ');
    fen.push(match board.side_to_move() {
        Color::White => 'w',
        Color::Black => 'b',
    });

    fen.push(' ');
    let mut rights = String::new();
    if board.castle_rights(Color::White).has_kingside() {
        rights.push('K');
    }
    if board.castle_rights(Color::White).has_queenside() {
        rights.push('Q');
    }
    if board.castle_rights(Color::Black).has_kingside() {
        rights.push('k');
    }
    if board.castle_rights(Color::Black).has_queenside() {
        rights.push('q');
    }
    if rights.is_empty() {
        rights.push('-');
    }
    fen.push_str(&rights);

    fen.push(' ');
    match board.en_passant() {
        Some(square) => fen.push_str(&en_passant_target(square).to_string()),
        None => fen.push('-'),
    }
    fen
}

// The chess crate reports the double-moved pawn's own square; FEN wants the
// square behind it. A square already on rank 3/6 passes through unchanged.
fn en_passant_target(square: Square) -> Square {
    match square.get_rank() {
        Rank::Fourth => Square::make_square(Rank::Third, square.get_file()),
        Rank::Fifth => Square::make_square(Rank::Sixth, square.get_file()),
        _ => square,
    }
}

fn piece_char(piece: Piece, color: Color) -> char {
    let c = match piece {
        Piece::Pawn => 'p',
        Piece::Knight => 'n',
        Piece::Bishop => 'b',
        Piece::Rook => 'r',
        Piece::Queen => 'q',
        Piece::King => 'k',
    };
    match color {
        Color::White => c.to_ascii_uppercase(),
        Color::Black => c,
    }
}
