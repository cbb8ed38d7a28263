use super::{Board, Undo};
use crate::{
    chess_move::{Move, MoveFlag},
    tables::ZOBRIST,
};
use vesper_types::{CastlePerms, Color, Piece, PieceType, Square};

/// Castle permissions that survive a piece moving from or to the square.
#[rustfmt::skip]
const CASTLE_KEEP_MASKS: [u8; 64] = {
    let mut masks = [0x0F; 64];
    masks[0]  = 0x0D; // a1: white queenside gone
    masks[4]  = 0x0C; // e1: both white rights gone
    masks[7]  = 0x0E; // h1: white kingside gone
    masks[56] = 0x07; // a8
    masks[60] = 0x03; // e8
    masks[63] = 0x0B; // h8
    masks
};

impl Board {
    fn hash_piece(&mut self, piece: Piece, sq: Square) {
        let key = ZOBRIST.pieces[usize::from(piece)][usize::from(sq)];
        self.key ^= key;
        match piece.piece_type() {
            PieceType::Pawn => self.pawn_key ^= key,
            PieceType::Knight | PieceType::Bishop => {
                self.minor_key ^= key;
                self.nonpawn_key ^= key;
            }
            _ => self.nonpawn_key ^= key,
        }
    }

    fn add_piece(&mut self, piece: Piece, sq: Square) {
        self.put_piece(piece, sq);
        self.hash_piece(piece, sq);
    }

    fn clear_piece(&mut self, sq: Square) -> Piece {
        let piece = self.remove_piece(sq);
        self.hash_piece(piece, sq);
        piece
    }

    fn set_en_passant(&mut self, sq: Option<Square>) {
        if let Some(old) = self.en_passant {
            self.key ^= ZOBRIST.en_passant[usize::from(old.file())];
        }
        self.en_passant = sq;
        if let Some(new) = sq {
            self.key ^= ZOBRIST.en_passant[usize::from(new.file())];
        }
    }

    fn set_castle_perms(&mut self, perms: CastlePerms) {
        self.key ^= ZOBRIST.castle[self.castle_perms.as_u8() as usize];
        self.castle_perms = perms;
        self.key ^= ZOBRIST.castle[perms.as_u8() as usize];
    }

    /// Applies a pseudo-legal move. Returns `false` (and restores the
    /// previous state) when the move leaves the own king in check.
    pub fn make_move(&mut self, mv: Move) -> bool {
        debug_assert!(!mv.is_none() && !mv.is_null());

        let from = mv.from();
        let to = mv.to();
        let us = self.color;
        let them = us.flipped();

        let Some(piece) = self.pieces[from] else {
            return false;
        };
        debug_assert_eq!(piece.color(), us);

        let capture_sq = if mv.is_en_passant() {
            match us {
                Color::White => to.offset(-8).expect("en passant target on rank 6"),
                Color::Black => to.offset(8).expect("en passant target on rank 3"),
            }
        } else {
            to
        };
        let captured = if mv.is_capture() { self.pieces[capture_sq] } else { None };

        self.history.push(Undo {
            mv,
            captured,
            castle_perms: self.castle_perms,
            en_passant: self.en_passant,
            fifty_move: self.fifty_move,
            key: self.key,
            pawn_key: self.pawn_key,
            minor_key: self.minor_key,
            nonpawn_key: self.nonpawn_key,
        });

        if captured.is_some() {
            self.clear_piece(capture_sq);
        }

        self.clear_piece(from);
        match mv.promoted() {
            Some(promo) => self.add_piece(Piece::new(promo, us), to),
            None => self.add_piece(piece, to),
        }

        match mv.flag() {
            MoveFlag::KingCastle => {
                let (rook_from, rook_to) = match us {
                    Color::White => (Square::H1, Square::F1),
                    Color::Black => (Square::H8, Square::F8),
                };
                let rook = self.clear_piece(rook_from);
                self.add_piece(rook, rook_to);
            }
            MoveFlag::QueenCastle => {
                let (rook_from, rook_to) = match us {
                    Color::White => (Square::A1, Square::D1),
                    Color::Black => (Square::A8, Square::D8),
                };
                let rook = self.clear_piece(rook_from);
                self.add_piece(rook, rook_to);
            }
            _ => (),
        }

        let keep = CASTLE_KEEP_MASKS[usize::from(from)] & CASTLE_KEEP_MASKS[usize::from(to)];
        self.set_castle_perms(CastlePerms::from_u8(self.castle_perms.as_u8() & keep));

        if mv.is_double_push() {
            let ep = match us {
                Color::White => from.offset(8),
                Color::Black => from.offset(-8),
            };
            self.set_en_passant(ep);
        } else {
            self.set_en_passant(None);
        }

        if piece.piece_type() == PieceType::Pawn || captured.is_some() {
            self.fifty_move = 0;
        } else {
            self.fifty_move += 1;
        }

        self.color = them;
        self.key ^= ZOBRIST.color;
        self.ply += 1;

        if self.sq_attacked(self.king_square(us), them) {
            self.take_move();
            return false;
        }

        true
    }

    pub fn take_move(&mut self) {
        let undo = self.history.pop().expect("take_move without make_move");
        self.ply -= 1;
        self.color = self.color.flipped();
        let us = self.color;

        let mv = undo.mv;
        if !mv.is_null() {
            let from = mv.from();
            let to = mv.to();

            // Undo the board mutation without touching the keys; they are
            // restored wholesale from the undo record below.
            let moved = self.remove_piece(to);
            let original = if mv.is_promotion() {
                Piece::new(PieceType::Pawn, us)
            } else {
                moved
            };
            self.put_piece(original, from);

            if let Some(captured) = undo.captured {
                let capture_sq = if mv.is_en_passant() {
                    match us {
                        Color::White => to.offset(-8).unwrap(),
                        Color::Black => to.offset(8).unwrap(),
                    }
                } else {
                    to
                };
                self.put_piece(captured, capture_sq);
            }

            match mv.flag() {
                MoveFlag::KingCastle => {
                    let (rook_from, rook_to) = match us {
                        Color::White => (Square::H1, Square::F1),
                        Color::Black => (Square::H8, Square::F8),
                    };
                    let rook = self.remove_piece(rook_to);
                    self.put_piece(rook, rook_from);
                }
                MoveFlag::QueenCastle => {
                    let (rook_from, rook_to) = match us {
                        Color::White => (Square::A1, Square::D1),
                        Color::Black => (Square::A8, Square::D8),
                    };
                    let rook = self.remove_piece(rook_to);
                    self.put_piece(rook, rook_from);
                }
                _ => (),
            }
        }

        self.castle_perms = undo.castle_perms;
        self.en_passant = undo.en_passant;
        self.fifty_move = undo.fifty_move;
        self.key = undo.key;
        self.pawn_key = undo.pawn_key;
        self.minor_key = undo.minor_key;
        self.nonpawn_key = undo.nonpawn_key;
    }

    /// Passes the turn. Used by null-move pruning; never legal to call when
    /// in check.
    pub fn make_null_move(&mut self) {
        debug_assert!(!self.in_check());

        self.history.push(Undo {
            mv: Move::NULL,
            captured: None,
            castle_perms: self.castle_perms,
            en_passant: self.en_passant,
            fifty_move: self.fifty_move,
            key: self.key,
            pawn_key: self.pawn_key,
            minor_key: self.minor_key,
            nonpawn_key: self.nonpawn_key,
        });

        self.set_en_passant(None);
        self.fifty_move += 1;
        self.color = self.color.flipped();
        self.key ^= ZOBRIST.color;
        self.ply += 1;
    }

    pub fn take_null_move(&mut self) {
        debug_assert!(self.history.last().is_some_and(|u| u.mv.is_null()));
        self.take_move();
    }

    /// The move made immediately before the current position, if any.
    pub fn last_move(&self) -> Option<Move> {
        self.history.last().map(|u| u.mv).filter(|m| !m.is_null())
    }

    /// The piece captured by the most recent move.
    pub fn last_captured(&self) -> Option<Piece> {
        self.history.last().and_then(|u| u.captured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::movegen::MoveList;
    use crate::FEN_STARTPOS;

    fn make_find(board: &mut Board, text: &str) {
        let mv = board.find_move(text).unwrap_or_else(|| panic!("move {text} not found"));
        assert!(board.make_move(mv), "move {text} is illegal");
    }

    #[test]
    fn make_take_restores_everything() {
        let mut board = Board::from_fen(FEN_STARTPOS).unwrap();
        let fen = board.to_fen();
        let key = board.key;
        let pawn_key = board.pawn_key;

        let mut list = MoveList::new();
        board.generate_all_moves(&mut list);

        for mv in list {
            if !board.make_move(mv) {
                continue;
            }
            board.take_move();
            assert_eq!(board.to_fen(), fen, "after {mv}");
            assert_eq!(board.key, key, "after {mv}");
            assert_eq!(board.pawn_key, pawn_key, "after {mv}");
        }
    }

    #[test]
    fn en_passant_capture_removes_the_pawn() {
        let mut board = Board::from_fen("4k3/8/8/8/4p3/8/3P4/4K3 w - - 0 1").unwrap();
        make_find(&mut board, "d2d4");
        assert_eq!(board.en_passant, Some(Square::D3));
        make_find(&mut board, "e4d3");
        assert_eq!(board.pieces[Square::D4], None);
        assert_eq!(board.pieces[Square::D3].map(|p| p.piece_type()), Some(PieceType::Pawn));

        board.take_move();
        board.take_move();
        assert_eq!(board.to_fen(), "4k3/8/8/8/4p3/8/3P4/4K3 w - - 0 1");
    }

    #[test]
    fn castling_moves_the_rook_and_clears_rights() {
        let mut board = Board::from_fen("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1").unwrap();
        make_find(&mut board, "e1g1");
        assert_eq!(board.pieces[Square::G1].map(|p| p.piece_type()), Some(PieceType::King));
        assert_eq!(board.pieces[Square::F1].map(|p| p.piece_type()), Some(PieceType::Rook));
        assert!(!board.castle_perms.get(vesper_types::CastlePerm::WhiteKingside));
        assert!(!board.castle_perms.get(vesper_types::CastlePerm::WhiteQueenside));
        assert!(board.castle_perms.get(vesper_types::CastlePerm::BlackKingside));

        board.take_move();
        assert_eq!(board.to_fen(), "r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1");
    }

    #[test]
    fn illegal_move_is_rejected_and_state_kept() {
        // The e-file pawn is pinned against the king by the rook.
        let mut board = Board::from_fen("4k3/8/8/8/8/8/4P3/4K2r w - - 0 1").unwrap();
        let fen = board.to_fen();
        // A pawn push is fine here; moving the king next to the rook is not.
        let mv = board.find_move("e1f1").unwrap();
        assert!(!board.make_move(mv));
        assert_eq!(board.to_fen(), fen);
    }

    #[test]
    fn null_move_round_trip() {
        let mut board = Board::from_fen("4k3/8/8/3Pp3/8/8/8/4K3 w - e6 0 2").unwrap();
        let key = board.key;
        board.make_null_move();
        assert_ne!(board.key, key);
        assert_eq!(board.en_passant, None);
        board.take_null_move();
        assert_eq!(board.key, key);
        assert_eq!(board.en_passant, Some(Square::E6));
    }

    #[test]
    fn promotion_and_underpromotion() {
        let mut board = Board::from_fen("4k3/P7/8/8/8/8/8/4K3 w - - 0 1").unwrap();
        make_find(&mut board, "a7a8q");
        assert_eq!(board.pieces[Square::A8].map(|p| p.piece_type()), Some(PieceType::Queen));
        board.take_move();
        make_find(&mut board, "a7a8n");
        assert_eq!(board.pieces[Square::A8].map(|p| p.piece_type()), Some(PieceType::Knight));
        board.take_move();
        assert_eq!(board.pieces[Square::A7].map(|p| p.piece_type()), Some(PieceType::Pawn));
    }
}
