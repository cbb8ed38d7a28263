//! Static evaluation behind the `Evaluator` seam. The search only sees an
//! opaque centipawn score; swapping in a network evaluator means
//! implementing the one-method trait.

use crate::board::Board;
use vesper_types::{Color, Eval, Piece, PieceType, Square};

pub trait Evaluator: Send + Sync {
    /// Score from the side to move's point of view.
    fn evaluate(&self, board: &Board) -> Eval;
}

const BISHOP_PAIR_BONUS: i32 = 30;
const ROOK_ON_OPEN_FILE_BONUS: i32 = 15;
const ROOK_ON_SEMI_OPEN_FILE_BONUS: i32 = 8;
const TEMPO: i32 = 12;

#[rustfmt::skip]
const PAWN_TABLE: [i32; 64] = [
      0,   0,   0,   0,   0,   0,   0,   0,
      5,  10,  10, -15, -15,  10,  10,   5,
      5,  -5, -10,   0,   0, -10,  -5,   5,
      0,   0,   5,  20,  20,   5,   0,   0,
      5,   5,  10,  25,  25,  10,   5,   5,
     10,  10,  20,  30,  30,  20,  10,  10,
     50,  50,  50,  50,  50,  50,  50,  50,
      0,   0,   0,   0,   0,   0,   0,   0,
];

#[rustfmt::skip]
const KNIGHT_TABLE: [i32; 64] = [
    -50, -30, -20, -20, -20, -20, -30, -50,
    -30, -10,   0,   5,   5,   0, -10, -30,
    -20,   5,  10,  15,  15,  10,   5, -20,
    -20,   0,  15,  20,  20,  15,   0, -20,
    -20,   5,  15,  20,  20,  15,   5, -20,
    -20,   0,  10,  15,  15,  10,   0, -20,
    -30, -10,   0,   0,   0,   0, -10, -30,
    -50, -30, -20, -20, -20, -20, -30, -50,
];

#[rustfmt::skip]
const BISHOP_TABLE: [i32; 64] = [
    -20, -10, -10, -10, -10, -10, -10, -20,
    -10,   5,   0,   0,   0,   0,   5, -10,
    -10,  10,  10,  10,  10,  10,  10, -10,
    -10,   0,  10,  10,  10,  10,   0, -10,
    -10,   5,   5,  10,  10,   5,   5, -10,
    -10,   0,   5,  10,  10,   5,   0, -10,
    -10,   0,   0,   0,   0,   0,   0, -10,
    -20, -10, -10, -10, -10, -10, -10, -20,
];

#[rustfmt::skip]
const ROOK_TABLE: [i32; 64] = [
      0,   0,   5,  10,  10,   5,   0,   0,
     -5,   0,   0,   0,   0,   0,   0,  -5,
     -5,   0,   0,   0,   0,   0,   0,  -5,
     -5,   0,   0,   0,   0,   0,   0,  -5,
     -5,   0,   0,   0,   0,   0,   0,  -5,
     -5,   0,   0,   0,   0,   0,   0,  -5,
      5,  10,  10,  10,  10,  10,  10,   5,
      0,   0,   0,   0,   0,   0,   0,   0,
];

#[rustfmt::skip]
const QUEEN_TABLE: [i32; 64] = [
    -20, -10, -10,  -5,  -5, -10, -10, -20,
    -10,   0,   5,   0,   0,   0,   0, -10,
    -10,   5,   5,   5,   5,   5,   0, -10,
      0,   0,   5,   5,   5,   5,   0,  -5,
     -5,   0,   5,   5,   5,   5,   0,  -5,
    -10,   0,   5,   5,   5,   5,   0, -10,
    -10,   0,   0,   0,   0,   0,   0, -10,
    -20, -10, -10,  -5,  -5, -10, -10, -20,
];

#[rustfmt::skip]
const KING_TABLE: [i32; 64] = [
     20,  30,  10,   0,   0,  10,  30,  20,
     20,  20,   0,   0,   0,   0,  20,  20,
    -10, -20, -20, -20, -20, -20, -20, -10,
    -20, -30, -30, -40, -40, -30, -30, -20,
    -30, -40, -40, -50, -50, -40, -40, -30,
    -30, -40, -40, -50, -50, -40, -40, -30,
    -30, -40, -40, -50, -50, -40, -40, -30,
    -30, -40, -40, -50, -50, -40, -40, -30,
];

#[rustfmt::skip]
const KING_ENDGAME_TABLE: [i32; 64] = [
    -50, -30, -30, -30, -30, -30, -30, -50,
    -30, -10,   0,   0,   0,   0, -10, -30,
    -30,   0,  10,  20,  20,  10,   0, -30,
    -30,   0,  20,  30,  30,  20,   0, -30,
    -30,   0,  20,  30,  30,  20,   0, -30,
    -30,   0,  10,  20,  20,  10,   0, -30,
    -30, -10,   0,   0,   0,   0, -10, -30,
    -50, -30, -30, -30, -30, -30, -30, -50,
];

fn table_for(ty: PieceType, endgame: bool) -> &'static [i32; 64] {
    match ty {
        PieceType::Pawn => &PAWN_TABLE,
        PieceType::Knight => &KNIGHT_TABLE,
        PieceType::Bishop => &BISHOP_TABLE,
        PieceType::Rook => &ROOK_TABLE,
        PieceType::Queen => &QUEEN_TABLE,
        PieceType::King if endgame => &KING_ENDGAME_TABLE,
        PieceType::King => &KING_TABLE,
    }
}

/// The tables are written from white's point of view; black indexes them
/// through the vertical mirror.
fn table_square(color: Color, sq: Square) -> usize {
    match color {
        Color::White => usize::from(sq),
        Color::Black => usize::from(sq.mirrored()),
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StandardEvaluator;

impl StandardEvaluator {
    fn side_score(&self, board: &Board, color: Color, endgame: bool) -> i32 {
        let mut score = 0;

        for ty in PieceType::ALL {
            let bb = board.piece_bb(color, ty);
            let table = table_for(ty, endgame);

            for sq in bb.iter_bit_indices() {
                if ty != PieceType::King {
                    score += ty.value();
                }
                score += table[table_square(color, sq)];
            }
        }

        if board.piece_bb(color, PieceType::Bishop).bit_count() >= 2 {
            score += BISHOP_PAIR_BONUS;
        }

        let own_pawns = board.piece_bb(color, PieceType::Pawn);
        let all_pawns = own_pawns | board.piece_bb(color.flipped(), PieceType::Pawn);
        for sq in board.piece_bb(color, PieceType::Rook).iter_bit_indices() {
            let file = vesper_bitboard::FILE_BITBOARDS[usize::from(sq.file())];
            if (file & all_pawns).is_empty() {
                score += ROOK_ON_OPEN_FILE_BONUS;
            } else if (file & own_pawns).is_empty() {
                score += ROOK_ON_SEMI_OPEN_FILE_BONUS;
            }
        }

        score
    }
}

impl Evaluator for StandardEvaluator {
    fn evaluate(&self, board: &Board) -> Eval {
        if board.is_draw_by_material() {
            return Eval::DRAW;
        }

        // Both kings head for the center once queens are off and little
        // material remains.
        let endgame = endgame_phase(board);

        let us = board.color;
        let score = self.side_score(board, us, endgame) - self.side_score(board, us.flipped(), endgame)
            + TEMPO;

        Eval::new(score).clamp_eval()
    }
}

fn endgame_phase(board: &Board) -> bool {
    let queens = board.piece_bb(Color::White, PieceType::Queen)
        | board.piece_bb(Color::Black, PieceType::Queen);
    let minors_and_rooks: u32 = Piece::ALL
        .iter()
        .filter(|p| !matches!(p.piece_type(), PieceType::Pawn | PieceType::King | PieceType::Queen))
        .map(|&p| board.bitboards[p].bit_count())
        .sum();

    queens.is_empty() || (queens.bit_count() <= 2 && minors_and_rooks <= 2)
}
