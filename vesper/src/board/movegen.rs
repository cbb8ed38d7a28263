use super::Board;
use crate::{
    chess_move::{Move, MoveFlag},
    tables::{bishop_attacks, pawn_attacks, queen_attacks, rook_attacks, KING_ATTACKS, KNIGHT_ATTACKS},
};
use smallvec::SmallVec;
use vesper_bitboard::{BETWEEN, RANK_BITBOARDS};
use vesper_types::{CastlePerm, Color, PieceType, Rank, Square};

pub type MoveList = SmallVec<[Move; 64]>;

impl Board {
    /// All pseudo-legal moves. Legality is settled by `make_move`.
    pub fn generate_all_moves(&self, list: &mut MoveList) {
        self.generate_pawn_moves(list, false);
        self.generate_piece_moves(list, false);
        self.generate_castling(list);
    }

    /// Captures, en passant and queen promotions only, for quiescence.
    pub fn generate_captures(&self, list: &mut MoveList) {
        self.generate_pawn_moves(list, true);
        self.generate_piece_moves(list, true);
    }

    fn generate_pawn_moves(&self, list: &mut MoveList, captures_only: bool) {
        let us = self.color;
        let them = us.flipped();
        let pawns = self.piece_bb(us, PieceType::Pawn);
        let enemies = self.bb_color[them];
        let empty = !self.bb_all;

        let (push_delta, promo_rank, double_rank) = match us {
            Color::White => (8i8, Rank::R8, Rank::R4),
            Color::Black => (-8i8, Rank::R1, Rank::R5),
        };

        let single_pushes = match us {
            Color::White => pawns.shifted_north() & empty,
            Color::Black => pawns.shifted_south() & empty,
        };

        if !captures_only {
            for to in single_pushes.iter_bit_indices() {
                let from = to.offset(-push_delta).unwrap();
                if to.rank() == promo_rank {
                    push_promotions(list, from, to, false);
                } else {
                    list.push(Move::new(from, to, MoveFlag::Quiet));
                }
            }

            let double_pushes = match us {
                Color::White => single_pushes.shifted_north() & empty,
                Color::Black => single_pushes.shifted_south() & empty,
            } & RANK_BITBOARDS[usize::from(double_rank)];
            for to in double_pushes.iter_bit_indices() {
                let from = to.offset(-2 * push_delta).unwrap();
                list.push(Move::new(from, to, MoveFlag::DoublePush));
            }
        } else {
            // Quiescence still wants queen promotions from quiet pushes.
            for to in single_pushes.iter_bit_indices() {
                if to.rank() == promo_rank {
                    let from = to.offset(-push_delta).unwrap();
                    list.push(Move::new(from, to, MoveFlag::PromoQueen));
                }
            }
        }

        for from in pawns.iter_bit_indices() {
            let attacks = pawn_attacks(us, from) & enemies;
            for to in attacks.iter_bit_indices() {
                if to.rank() == promo_rank {
                    push_promotions(list, from, to, true);
                } else {
                    list.push(Move::new(from, to, MoveFlag::Capture));
                }
            }
        }

        if let Some(ep) = self.en_passant {
            let candidates = pawn_attacks(them, ep) & pawns;
            for from in candidates.iter_bit_indices() {
                list.push(Move::new(from, ep, MoveFlag::EnPassant));
            }
        }
    }

    fn generate_piece_moves(&self, list: &mut MoveList, captures_only: bool) {
        let us = self.color;
        let enemies = self.bb_color[us.flipped()];
        let own = self.bb_color[us];

        let target_mask = if captures_only { enemies } else { !own };

        for ty in [
            PieceType::Knight,
            PieceType::Bishop,
            PieceType::Rook,
            PieceType::Queen,
            PieceType::King,
        ] {
            for from in self.piece_bb(us, ty).iter_bit_indices() {
                let attacks = match ty {
                    PieceType::Knight => KNIGHT_ATTACKS[usize::from(from)],
                    PieceType::Bishop => bishop_attacks(from, self.bb_all),
                    PieceType::Rook => rook_attacks(from, self.bb_all),
                    PieceType::Queen => queen_attacks(from, self.bb_all),
                    PieceType::King => KING_ATTACKS[usize::from(from)],
                    PieceType::Pawn => unreachable!(),
                };

                for to in (attacks & target_mask).iter_bit_indices() {
                    let flag = if enemies.get(to) { MoveFlag::Capture } else { MoveFlag::Quiet };
                    list.push(Move::new(from, to, flag));
                }
            }
        }
    }

    fn generate_castling(&self, list: &mut MoveList) {
        let us = self.color;
        let them = us.flipped();

        let (kingside, queenside, king_sq, rook_k, rook_q) = match us {
            Color::White => (
                CastlePerm::WhiteKingside,
                CastlePerm::WhiteQueenside,
                Square::E1,
                Square::H1,
                Square::A1,
            ),
            Color::Black => (
                CastlePerm::BlackKingside,
                CastlePerm::BlackQueenside,
                Square::E8,
                Square::H8,
                Square::A8,
            ),
        };

        // Castling out of or through check is handled here; castling *into*
        // check falls out of make_move's legality test.
        if self.castle_perms.get(kingside) {
            let path = BETWEEN[usize::from(king_sq)][usize::from(rook_k)];
            let f = king_sq.offset(1).unwrap();
            if (path & self.bb_all).is_empty()
                && !self.sq_attacked(king_sq, them)
                && !self.sq_attacked(f, them)
            {
                list.push(Move::new(king_sq, king_sq.offset(2).unwrap(), MoveFlag::KingCastle));
            }
        }

        if self.castle_perms.get(queenside) {
            let path = BETWEEN[usize::from(king_sq)][usize::from(rook_q)];
            let d = king_sq.offset(-1).unwrap();
            if (path & self.bb_all).is_empty()
                && !self.sq_attacked(king_sq, them)
                && !self.sq_attacked(d, them)
            {
                list.push(Move::new(king_sq, king_sq.offset(-2).unwrap(), MoveFlag::QueenCastle));
            }
        }
    }

    /// Looks up a pseudo-legal move from its long-algebraic notation.
    pub fn find_move(&self, text: &str) -> Option<Move> {
        let mut list = MoveList::new();
        self.generate_all_moves(&mut list);
        list.into_iter().find(|m| m.to_string() == text)
    }

    /// A cheap sanity check for moves resurrected from the transposition
    /// table or the experience file; collisions must never crash the search.
    pub fn is_pseudo_legal(&self, mv: Move) -> bool {
        if mv.is_none() || mv.is_null() {
            return false;
        }

        match self.pieces[mv.from()] {
            Some(piece) if piece.color() == self.color => (),
            _ => return false,
        }

        let mut list = MoveList::new();
        self.generate_all_moves(&mut list);
        list.contains(&mv)
    }

    /// True when the position has at least one legal move.
    pub fn has_legal_moves(&mut self) -> bool {
        let mut list = MoveList::new();
        self.generate_all_moves(&mut list);

        for mv in list {
            if self.make_move(mv) {
                self.take_move();
                return true;
            }
        }

        false
    }

    /// Does `mv` give check? Decided by making the move; callers are on
    /// cold paths (extensions, MCTS priors).
    pub fn gives_check(&mut self, mv: Move) -> bool {
        if !self.make_move(mv) {
            return false;
        }
        let check = self.in_check();
        self.take_move();
        check
    }
}

fn push_promotions(list: &mut MoveList, from: Square, to: Square, capture: bool) {
    let flags = if capture {
        [
            MoveFlag::PromoCaptureQueen,
            MoveFlag::PromoCaptureRook,
            MoveFlag::PromoCaptureBishop,
            MoveFlag::PromoCaptureKnight,
        ]
    } else {
        [
            MoveFlag::PromoQueen,
            MoveFlag::PromoRook,
            MoveFlag::PromoBishop,
            MoveFlag::PromoKnight,
        ]
    };

    for flag in flags {
        list.push(Move::new(from, to, flag));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FEN_STARTPOS;

    fn count_legal(board: &mut Board) -> usize {
        let mut list = MoveList::new();
        board.generate_all_moves(&mut list);
        list.into_iter()
            .filter(|&m| {
                let ok = board.make_move(m);
                if ok {
                    board.take_move();
                }
                ok
            })
            .count()
    }

    #[test]
    fn startpos_has_twenty_moves() {
        let mut board = Board::from_fen(FEN_STARTPOS).unwrap();
        assert_eq!(count_legal(&mut board), 20);
    }

    #[test]
    fn stalemate_position_has_no_moves() {
        let mut board = Board::from_fen("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1").unwrap();
        assert_eq!(count_legal(&mut board), 0);
        assert!(!board.in_check());
    }

    #[test]
    fn checkmate_position_has_no_moves() {
        // Back-rank mate.
        let mut board = Board::from_fen("R5k1/5ppp/8/8/8/8/5PPP/7K b - - 0 1").unwrap();
        assert_eq!(count_legal(&mut board), 0);
        assert!(board.in_check());
    }

    #[test]
    fn captures_are_a_subset_of_all_moves() {
        let board =
            Board::from_fen("r1bqkbnr/pppp1ppp/2n5/4p3/3P4/5N2/PPP1PPPP/RNBQKB1R w KQkq - 2 3").unwrap();

        let mut all = MoveList::new();
        board.generate_all_moves(&mut all);
        let mut captures = MoveList::new();
        board.generate_captures(&mut captures);

        for m in &captures {
            assert!(m.is_capture() || m.promoted() == Some(PieceType::Queen));
            assert!(all.contains(m), "{m} missing from all moves");
        }
    }

    #[test]
    fn finds_moves_by_notation() {
        let board = Board::from_fen(FEN_STARTPOS).unwrap();
        assert!(board.find_move("e2e4").is_some());
        assert!(board.find_move("e2e5").is_none());

        let mv = board.find_move("g1f3").unwrap();
        assert_eq!(mv.flag(), MoveFlag::Quiet);
    }

    #[test]
    fn pseudo_legality_filters_foreign_moves() {
        let board = Board::from_fen(FEN_STARTPOS).unwrap();
        let good = board.find_move("d2d4").unwrap();
        assert!(board.is_pseudo_legal(good));

        // A move whose source square holds a black piece.
        let bad = Move::new(Square::E7, Square::E5, MoveFlag::Quiet);
        assert!(!board.is_pseudo_legal(bad));
        assert!(!board.is_pseudo_legal(Move::NONE));
        assert!(!board.is_pseudo_legal(Move::NULL));
    }
}
