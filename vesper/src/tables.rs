//! Tables initialized once at startup: Zobrist keys, attack patterns and
//! the late-move-reduction grid. Key generation uses a fixed seed so that
//! experience files stay valid across runs.

use lazy_static::lazy_static;
use rand::{rngs::StdRng, Rng, SeedableRng};
use vesper_bitboard::BitBoard;
use vesper_types::{Color, Key, Square};

const ZOBRIST_SEED: u64 = 0x5eed_cafe_f00d_1234;

pub struct ZobristKeys {
    pub pieces: [[Key; 64]; 12],
    pub color: Key,
    pub castle: [Key; 16],
    pub en_passant: [Key; 8],
}

lazy_static! {
    pub static ref ZOBRIST: ZobristKeys = {
        let mut rng = StdRng::seed_from_u64(ZOBRIST_SEED);
        let mut pieces = [[0u64; 64]; 12];
        for piece in pieces.iter_mut() {
            for sq in piece.iter_mut() {
                *sq = rng.gen();
            }
        }

        let mut castle = [0u64; 16];
        for k in castle.iter_mut() {
            *k = rng.gen();
        }

        let mut en_passant = [0u64; 8];
        for k in en_passant.iter_mut() {
            *k = rng.gen();
        }

        ZobristKeys {
            pieces,
            color: rng.gen(),
            castle,
            en_passant,
        }
    };

    pub static ref KNIGHT_ATTACKS: [BitBoard; 64] = leaper_attacks(&[
        (1, 2), (2, 1), (2, -1), (1, -2), (-1, -2), (-2, -1), (-2, 1), (-1, 2),
    ]);

    pub static ref KING_ATTACKS: [BitBoard; 64] = leaper_attacks(&[
        (0, 1), (1, 1), (1, 0), (1, -1), (0, -1), (-1, -1), (-1, 0), (-1, 1),
    ]);

    /// Squares a pawn of the given color attacks *from* the indexed square.
    pub static ref PAWN_ATTACKS: [[BitBoard; 64]; 2] = {
        let white = leaper_attacks(&[(-1, 1), (1, 1)]);
        let black = leaper_attacks(&[(-1, -1), (1, -1)]);
        [white, black]
    };

    /// Reduction grid indexed by (depth, move count), both clamped to 63.
    pub static ref LMR_TABLE: [[u8; 64]; 64] = {
        let mut table = [[0u8; 64]; 64];
        for (d, row) in table.iter_mut().enumerate().skip(1) {
            for (mc, r) in row.iter_mut().enumerate().skip(1) {
                let reduction = 0.77 + (d as f64).ln() * (mc as f64).ln() / 2.36;
                *r = reduction.max(0.0) as u8;
            }
        }
        table
    };
}

fn leaper_attacks(deltas: &[(i8, i8)]) -> [BitBoard; 64] {
    let mut boards = [BitBoard::EMPTY; 64];
    for sq in Square::all() {
        let file = sq.file() as i8;
        let rank = sq.rank() as i8;
        for &(df, dr) in deltas {
            let (f, r) = (file + df, rank + dr);
            if (0..8).contains(&f) && (0..8).contains(&r) {
                boards[usize::from(sq)].set(Square::from_file_rank(
                    vesper_types::File::try_from(f as u8).unwrap(),
                    vesper_types::Rank::try_from(r as u8).unwrap(),
                ));
            }
        }
    }
    boards
}

const BISHOP_DIRS: [(i8, i8); 4] = [(1, 1), (1, -1), (-1, -1), (-1, 1)];
const ROOK_DIRS: [(i8, i8); 4] = [(0, 1), (1, 0), (0, -1), (-1, 0)];

fn slider_attacks(sq: Square, occupied: BitBoard, dirs: &[(i8, i8); 4]) -> BitBoard {
    let mut attacks = BitBoard::EMPTY;
    for &(df, dr) in dirs {
        let mut file = sq.file() as i8 + df;
        let mut rank = sq.rank() as i8 + dr;
        while (0..8).contains(&file) && (0..8).contains(&rank) {
            let target = Square::from_file_rank(
                vesper_types::File::try_from(file as u8).unwrap(),
                vesper_types::Rank::try_from(rank as u8).unwrap(),
            );
            attacks.set(target);
            if occupied.get(target) {
                break;
            }
            file += df;
            rank += dr;
        }
    }
    attacks
}

pub fn bishop_attacks(sq: Square, occupied: BitBoard) -> BitBoard {
    slider_attacks(sq, occupied, &BISHOP_DIRS)
}

pub fn rook_attacks(sq: Square, occupied: BitBoard) -> BitBoard {
    slider_attacks(sq, occupied, &ROOK_DIRS)
}

pub fn queen_attacks(sq: Square, occupied: BitBoard) -> BitBoard {
    bishop_attacks(sq, occupied) | rook_attacks(sq, occupied)
}

pub fn pawn_attacks(color: Color, sq: Square) -> BitBoard {
    PAWN_ATTACKS[usize::from(color)][usize::from(sq)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_types::Square;

    #[test]
    fn zobrist_keys_are_distinct() {
        // A spot check; real collisions would break the TT silently.
        let z = &*ZOBRIST;
        assert_ne!(z.pieces[0][0], z.pieces[0][1]);
        assert_ne!(z.pieces[0][0], z.color);
        assert_ne!(z.castle[1], z.castle[2]);
    }

    #[test]
    fn knight_attack_counts() {
        assert_eq!(KNIGHT_ATTACKS[usize::from(Square::A1)].bit_count(), 2);
        assert_eq!(KNIGHT_ATTACKS[usize::from(Square::E4)].bit_count(), 8);
        assert_eq!(KNIGHT_ATTACKS[usize::from(Square::H8)].bit_count(), 2);
    }

    #[test]
    fn rook_attacks_blocked_by_occupancy() {
        let mut occ = BitBoard::EMPTY;
        occ.set(Square::E6);
        let attacks = rook_attacks(Square::E4, occ);
        assert!(attacks.get(Square::E5));
        assert!(attacks.get(Square::E6)); // the blocker itself is attacked
        assert!(!attacks.get(Square::E7));
        assert!(attacks.get(Square::A4));
        assert!(attacks.get(Square::H4));
    }

    #[test]
    fn pawn_attack_direction() {
        let w = pawn_attacks(Color::White, Square::E4);
        assert!(w.get(Square::D5) && w.get(Square::F5));
        let b = pawn_attacks(Color::Black, Square::E4);
        assert!(b.get(Square::D3) && b.get(Square::F3));
    }

    #[test]
    fn lmr_grid_grows_with_depth_and_movecount() {
        assert!(LMR_TABLE[2][2] <= LMR_TABLE[20][2]);
        assert!(LMR_TABLE[20][2] <= LMR_TABLE[20][40]);
    }
}
