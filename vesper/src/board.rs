use crate::{
    chess_move::Move,
    tables::{bishop_attacks, pawn_attacks, rook_attacks, KING_ATTACKS, KNIGHT_ATTACKS, ZOBRIST},
};
use std::fmt::Display;
use thiserror::Error;
use vesper_bitboard::BitBoard;
use vesper_types::{CastlePerm, CastlePerms, Color, File, Key, Piece, PieceType, Rank, Square};

pub mod makemove;
pub mod movegen;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FenError {
    #[error("fen has {0} fields, expected at least 4")]
    MissingFields(usize),
    #[error("invalid piece placement `{0}`")]
    BadPlacement(String),
    #[error("invalid side to move `{0}`")]
    BadSideToMove(String),
    #[error("invalid castling rights `{0}`")]
    BadCastling(String),
    #[error("invalid en passant square `{0}`")]
    BadEnPassant(String),
    #[error("invalid counter `{0}`")]
    BadCounter(String),
}

/// State needed to take a move back, pushed on every make.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Undo {
    mv: Move,
    captured: Option<Piece>,
    castle_perms: CastlePerms,
    en_passant: Option<Square>,
    fifty_move: u32,
    key: Key,
    pawn_key: Key,
    minor_key: Key,
    nonpawn_key: Key,
}

/// Full game state: one exclusive copy per worker thread, seeded from the
/// driver's FEN plus move list before every search.
#[derive(Debug, Clone)]
pub struct Board {
    pub bitboards: [BitBoard; 12],
    pub bb_color: [BitBoard; 2],
    pub bb_all: BitBoard,
    pub pieces: [Option<Piece>; 64],
    pub color: Color,
    pub castle_perms: CastlePerms,
    pub en_passant: Option<Square>,
    pub fifty_move: u32,
    /// Search ply, reset to zero at the root of every search.
    pub ply: usize,
    pub key: Key,
    pub pawn_key: Key,
    pub minor_key: Key,
    pub nonpawn_key: Key,
    pub chess960: bool,
    history: Vec<Undo>,
}

impl Board {
    pub fn from_fen(fen: &str) -> Result<Self, FenError> {
        let fields: Vec<&str> = fen.split_ascii_whitespace().collect();
        if fields.len() < 4 {
            return Err(FenError::MissingFields(fields.len()));
        }

        let mut board = Self {
            bitboards: [BitBoard::EMPTY; 12],
            bb_color: [BitBoard::EMPTY; 2],
            bb_all: BitBoard::EMPTY,
            pieces: [None; 64],
            color: Color::White,
            castle_perms: CastlePerms::NONE,
            en_passant: None,
            fifty_move: 0,
            ply: 0,
            key: 0,
            pawn_key: 0,
            minor_key: 0,
            nonpawn_key: 0,
            chess960: false,
            history: Vec::with_capacity(256),
        };

        let mut rank = 7i8;
        let mut file = 0i8;
        for c in fields[0].chars() {
            match c {
                '/' => {
                    rank -= 1;
                    file = 0;
                }
                '1'..='8' => file += c as i8 - '0' as i8,
                _ => {
                    let piece = Piece::from_char(c)
                        .ok_or_else(|| FenError::BadPlacement(fields[0].to_owned()))?;
                    if !(0..8).contains(&file) || !(0..8).contains(&rank) {
                        return Err(FenError::BadPlacement(fields[0].to_owned()));
                    }
                    let sq = Square::from_file_rank(
                        File::try_from(file as u8).unwrap(),
                        Rank::try_from(rank as u8).unwrap(),
                    );
                    board.put_piece(piece, sq);
                    file += 1;
                }
            }
        }

        board.color = Color::from_char(
            fields[1]
                .chars()
                .next()
                .ok_or_else(|| FenError::BadSideToMove(fields[1].to_owned()))?,
        )
        .ok_or_else(|| FenError::BadSideToMove(fields[1].to_owned()))?;

        if fields[2] != "-" {
            for c in fields[2].chars() {
                let perm =
                    CastlePerm::from_char(c).ok_or_else(|| FenError::BadCastling(fields[2].to_owned()))?;
                board.castle_perms.set(perm);
            }
        }

        if fields[3] != "-" {
            let mut chars = fields[3].chars();
            let file = chars
                .next()
                .and_then(File::from_char)
                .ok_or_else(|| FenError::BadEnPassant(fields[3].to_owned()))?;
            let rank = chars
                .next()
                .and_then(Rank::from_char)
                .ok_or_else(|| FenError::BadEnPassant(fields[3].to_owned()))?;
            board.en_passant = Some(Square::from_file_rank(file, rank));
        }

        if let Some(half) = fields.get(4) {
            board.fifty_move = half.parse().map_err(|_| FenError::BadCounter(half.to_string()))?;
        }

        board.key = board.compute_key();
        board.pawn_key = board.compute_partial_key(|p| p.piece_type() == PieceType::Pawn);
        board.minor_key = board
            .compute_partial_key(|p| matches!(p.piece_type(), PieceType::Knight | PieceType::Bishop));
        board.nonpawn_key = board.compute_partial_key(|p| p.piece_type() != PieceType::Pawn);

        Ok(board)
    }

    pub fn to_fen(&self) -> String {
        let mut fen = String::new();

        for rank in (0..8).rev() {
            let mut empty = 0;
            for file in 0..8 {
                let sq = Square::from_file_rank(
                    File::try_from(file).unwrap(),
                    Rank::try_from(rank).unwrap(),
                );
                match self.pieces[sq] {
                    Some(piece) => {
                        if empty > 0 {
                            fen.push((b'0' + empty) as char);
                            empty = 0;
                        }
                        fen.push(piece.to_char());
                    }
                    None => empty += 1,
                }
            }
            if empty > 0 {
                fen.push((b'0' + empty) as char);
            }
            if rank > 0 {
                fen.push('/');
            }
        }

        fen.push(' ');
        fen.push(self.color.to_char());
        fen.push(' ');

        if self.castle_perms == CastlePerms::NONE {
            fen.push('-');
        } else {
            for perm in CastlePerm::ALL {
                if self.castle_perms.get(perm) {
                    fen.push(perm.to_char());
                }
            }
        }

        fen.push(' ');
        match self.en_passant {
            Some(sq) => fen.push_str(&sq.to_string()),
            None => fen.push('-'),
        }

        fen.push_str(&format!(" {} 1", self.fifty_move));
        fen
    }

    fn compute_key(&self) -> Key {
        let mut key = self.compute_partial_key(|_| true);
        if self.color == Color::Black {
            key ^= ZOBRIST.color;
        }
        key ^= ZOBRIST.castle[self.castle_perms.as_u8() as usize];
        if let Some(ep) = self.en_passant {
            key ^= ZOBRIST.en_passant[usize::from(ep.file())];
        }
        key
    }

    fn compute_partial_key(&self, include: impl Fn(Piece) -> bool) -> Key {
        let mut key = 0;
        for sq in Square::all() {
            if let Some(piece) = self.pieces[sq] {
                if include(piece) {
                    key ^= ZOBRIST.pieces[usize::from(piece)][usize::from(sq)];
                }
            }
        }
        key
    }

    pub(crate) fn put_piece(&mut self, piece: Piece, sq: Square) {
        debug_assert!(self.pieces[sq].is_none());
        self.pieces[sq] = Some(piece);
        self.bitboards[piece].set(sq);
        self.bb_color[piece.color()].set(sq);
        self.bb_all.set(sq);
    }

    pub(crate) fn remove_piece(&mut self, sq: Square) -> Piece {
        let piece = self.pieces[sq].take().expect("no piece to remove");
        self.bitboards[piece].clear(sq);
        self.bb_color[piece.color()].clear(sq);
        self.bb_all.clear(sq);
        piece
    }

    pub fn piece_bb(&self, color: Color, ty: PieceType) -> BitBoard {
        self.bitboards[Piece::new(ty, color)]
    }

    pub fn king_square(&self, color: Color) -> Square {
        self.piece_bb(color, PieceType::King)
            .first()
            .expect("a king is always on the board")
    }

    /// Is `sq` attacked by any piece of `by`?
    pub fn sq_attacked(&self, sq: Square, by: Color) -> bool {
        // A pawn of `by` attacks sq iff a pawn of the other color standing
        // on sq would attack it.
        if !(pawn_attacks(by.flipped(), sq) & self.piece_bb(by, PieceType::Pawn)).is_empty() {
            return true;
        }

        if !(KNIGHT_ATTACKS[usize::from(sq)] & self.piece_bb(by, PieceType::Knight)).is_empty() {
            return true;
        }

        if !(KING_ATTACKS[usize::from(sq)] & self.piece_bb(by, PieceType::King)).is_empty() {
            return true;
        }

        let diag = self.piece_bb(by, PieceType::Bishop) | self.piece_bb(by, PieceType::Queen);
        if !(bishop_attacks(sq, self.bb_all) & diag).is_empty() {
            return true;
        }

        let line = self.piece_bb(by, PieceType::Rook) | self.piece_bb(by, PieceType::Queen);
        !(rook_attacks(sq, self.bb_all) & line).is_empty()
    }

    pub fn in_check(&self) -> bool {
        self.sq_attacked(self.king_square(self.color), self.color.flipped())
    }

    /// Non-pawn, non-king piece count; null-move pruning requires material.
    pub fn big_piece_count(&self, color: Color) -> u32 {
        (self.bb_color[color]
            & !self.piece_bb(color, PieceType::Pawn)
            & !self.piece_bb(color, PieceType::King))
        .bit_count()
    }

    /// Material in WDL-model units: P + 3N + 3B + 5R + 9Q over both sides.
    pub fn wdl_material(&self) -> i32 {
        let mut material = 0;
        for piece in Piece::ALL {
            material += self.bitboards[piece].bit_count() as i32 * piece.piece_type().wdl_units();
        }
        material
    }

    /// One previous occurrence of the current key counts as a repetition;
    /// scoring it as a draw lets the search spot forced repetitions early.
    pub fn is_repetition(&self) -> bool {
        let lookback = (self.fifty_move as usize).min(self.history.len());
        self.history
            .iter()
            .rev()
            .take(lookback)
            .skip(1)
            .step_by(2)
            .any(|undo| undo.key == self.key)
    }

    pub fn is_draw_by_material(&self) -> bool {
        if !(self.piece_bb(Color::White, PieceType::Pawn)
            | self.piece_bb(Color::Black, PieceType::Pawn))
        .is_empty()
        {
            return false;
        }

        let majors = self.piece_bb(Color::White, PieceType::Rook)
            | self.piece_bb(Color::Black, PieceType::Rook)
            | self.piece_bb(Color::White, PieceType::Queen)
            | self.piece_bb(Color::Black, PieceType::Queen);
        if !majors.is_empty() {
            return false;
        }

        // Kings plus at most one minor piece each.
        let white_minors = self.big_piece_count(Color::White);
        let black_minors = self.big_piece_count(Color::Black);
        white_minors <= 1 && black_minors <= 1
    }

    pub fn halfmove_clock(&self) -> u32 {
        self.fifty_move
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// All attackers of both colors on `sq`, given an occupancy.
    pub fn attackers_to(&self, sq: Square, occupied: BitBoard) -> BitBoard {
        let mut attackers = BitBoard::EMPTY;

        attackers |= pawn_attacks(Color::Black, sq) & self.piece_bb(Color::White, PieceType::Pawn);
        attackers |= pawn_attacks(Color::White, sq) & self.piece_bb(Color::Black, PieceType::Pawn);
        attackers |= KNIGHT_ATTACKS[usize::from(sq)]
            & (self.piece_bb(Color::White, PieceType::Knight) | self.piece_bb(Color::Black, PieceType::Knight));
        attackers |= KING_ATTACKS[usize::from(sq)]
            & (self.piece_bb(Color::White, PieceType::King) | self.piece_bb(Color::Black, PieceType::King));

        let diag = self.piece_bb(Color::White, PieceType::Bishop)
            | self.piece_bb(Color::Black, PieceType::Bishop)
            | self.piece_bb(Color::White, PieceType::Queen)
            | self.piece_bb(Color::Black, PieceType::Queen);
        attackers |= bishop_attacks(sq, occupied) & diag;

        let line = self.piece_bb(Color::White, PieceType::Rook)
            | self.piece_bb(Color::Black, PieceType::Rook)
            | self.piece_bb(Color::White, PieceType::Queen)
            | self.piece_bb(Color::Black, PieceType::Queen);
        attackers |= rook_attacks(sq, occupied) & line;

        attackers
    }

    /// Static exchange evaluation: does the capture sequence starting with
    /// `mv` win at least `threshold` centipawns? Swap-list algorithm over
    /// `attackers_to` with x-ray refresh.
    pub fn see_ge(&self, mv: Move, threshold: i32) -> bool {
        if mv.is_castle() || mv.is_en_passant() {
            return threshold <= 0;
        }

        let from = mv.from();
        let to = mv.to();

        let captured_value = self.pieces[to].map_or(0, |p| p.value());
        let mut balance = captured_value - threshold;
        if balance < 0 {
            return false;
        }

        let moving = match self.pieces[from] {
            Some(p) => p,
            None => return false,
        };

        // If giving up the moving piece still keeps us above the threshold,
        // no recapture sequence can change the verdict.
        balance -= moving.value();
        if balance >= 0 {
            return true;
        }

        let mut occupied = self.bb_all;
        occupied.clear(from);
        occupied.set(to);

        let mut attackers = self.attackers_to(to, occupied) & occupied;
        let mut side = moving.color().flipped();
        let mut result = true;

        loop {
            let side_attackers = attackers & self.bb_color[side];
            if side_attackers.is_empty() {
                break;
            }

            // Pick the least valuable attacker.
            let mut chosen: Option<(Square, Piece)> = None;
            for ty in PieceType::ALL {
                let candidates = side_attackers & self.piece_bb(side, ty);
                if let Some(sq) = candidates.first() {
                    chosen = Some((sq, Piece::new(ty, side)));
                    break;
                }
            }
            let (att_sq, att_piece) = chosen.expect("non-empty attacker set");

            result = !result;
            balance = -balance - 1 - att_piece.value();
            if balance >= 0 {
                // A king capture into remaining attackers is illegal; flip back.
                if att_piece.piece_type() == PieceType::King
                    && !(attackers & self.bb_color[side.flipped()]).is_empty()
                {
                    result = !result;
                }
                break;
            }

            occupied.clear(att_sq);
            // Sliding x-rays may be revealed behind the removed attacker.
            attackers = self.attackers_to(to, occupied) & occupied;
            side = side.flipped();
        }

        result
    }

    /// Mirrors the position vertically and swaps colors. Debug helper for
    /// the `flip` UCI extension.
    #[must_use]
    pub fn flipped(&self) -> Self {
        let mut board = self.clone();
        board.bitboards = [BitBoard::EMPTY; 12];
        board.bb_color = [BitBoard::EMPTY; 2];
        board.bb_all = BitBoard::EMPTY;
        board.pieces = [None; 64];
        board.history.clear();

        for sq in Square::all() {
            if let Some(piece) = self.pieces[sq] {
                let flipped = Piece::new(piece.piece_type(), piece.color().flipped());
                board.put_piece(flipped, sq.mirrored());
            }
        }

        board.color = self.color.flipped();
        board.en_passant = self.en_passant.map(Square::mirrored);

        let mut perms = CastlePerms::NONE;
        if self.castle_perms.get(CastlePerm::WhiteKingside) {
            perms.set(CastlePerm::BlackKingside);
        }
        if self.castle_perms.get(CastlePerm::WhiteQueenside) {
            perms.set(CastlePerm::BlackQueenside);
        }
        if self.castle_perms.get(CastlePerm::BlackKingside) {
            perms.set(CastlePerm::WhiteKingside);
        }
        if self.castle_perms.get(CastlePerm::BlackQueenside) {
            perms.set(CastlePerm::WhiteQueenside);
        }
        board.castle_perms = perms;

        board.key = board.compute_key();
        board.pawn_key = board.compute_partial_key(|p| p.piece_type() == PieceType::Pawn);
        board.minor_key = board
            .compute_partial_key(|p| matches!(p.piece_type(), PieceType::Knight | PieceType::Bishop));
        board.nonpawn_key = board.compute_partial_key(|p| p.piece_type() != PieceType::Pawn);
        board
    }
}

impl Display for Board {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for rank in (0..8).rev() {
            write!(f, "{} ", rank + 1)?;
            for file in 0..8 {
                let sq = Square::from_file_rank(
                    File::try_from(file).unwrap(),
                    Rank::try_from(rank).unwrap(),
                );
                match self.pieces[sq] {
                    Some(piece) => write!(f, "{} ", piece.to_char())?,
                    None => write!(f, ". ")?,
                }
            }
            writeln!(f)?;
        }
        writeln!(f, "  a b c d e f g h")?;
        writeln!(f, "fen: {}", self.to_fen())?;
        write!(f, "key: {:016X}", self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FEN_STARTPOS;

    #[test]
    fn startpos_round_trip() {
        let board = Board::from_fen(FEN_STARTPOS).unwrap();
        assert_eq!(board.color, Color::White);
        assert_eq!(board.castle_perms, CastlePerms::ALL);
        assert_eq!(board.bb_all.bit_count(), 32);
        assert_eq!(board.king_square(Color::White), Square::E1);
        assert_eq!(board.king_square(Color::Black), Square::E8);
        assert!(board.to_fen().starts_with("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq -"));
    }

    #[test]
    fn rejects_garbage_fen() {
        assert!(Board::from_fen("not a fen").is_err());
        assert!(Board::from_fen("8/8/8/8 x - -").is_err());
    }

    #[test]
    fn attack_queries() {
        let board = Board::from_fen("4k3/8/8/3q4/8/8/8/4K3 w - - 0 1").unwrap();
        assert!(board.sq_attacked(Square::D1, Color::Black));
        assert!(board.sq_attacked(Square::H5, Color::Black));
        assert!(!board.sq_attacked(Square::C1, Color::Black));
        assert!(board.in_check() == false);

        let board = Board::from_fen("4k3/8/8/8/8/8/3q4/4K3 w - - 0 1").unwrap();
        assert!(board.in_check());
    }

    #[test]
    fn flip_is_an_involution() {
        let board = Board::from_fen("r3k2r/8/8/3Pp3/8/8/8/R3K2R w KQkq e6 0 1").unwrap();
        let twice = board.flipped().flipped();
        assert_eq!(twice.to_fen(), board.to_fen());
        assert_eq!(twice.key, board.key);
    }

    #[test]
    fn see_simple_exchanges() {
        // Pawn takes defended pawn: losing exchange for a rook but fine for a pawn.
        let board = Board::from_fen("4k3/8/3p4/4p3/3P4/8/8/4K3 w - - 0 1").unwrap();
        let mv = board.find_move("d4e5").unwrap();
        assert!(board.see_ge(mv, 0));

        // Queen takes a pawn defended by a pawn: loses material.
        let board = Board::from_fen("4k3/4p3/3p4/8/8/8/8/3QK3 w - - 0 1").unwrap();
        let mv = board.find_move("d1d6").unwrap();
        assert!(!board.see_ge(mv, 0));
        assert!(board.see_ge(mv, -900));
    }

    #[test]
    fn insufficient_material() {
        assert!(Board::from_fen("4k3/8/8/8/8/8/8/4K3 w - - 0 1").unwrap().is_draw_by_material());
        assert!(Board::from_fen("4k3/8/8/8/8/8/8/2B1K3 w - - 0 1").unwrap().is_draw_by_material());
        assert!(!Board::from_fen("4k3/8/8/8/8/8/4P3/4K3 w - - 0 1").unwrap().is_draw_by_material());
        assert!(!Board::from_fen("4k3/8/8/8/8/8/8/R3K3 w - - 0 1").unwrap().is_draw_by_material());
    }
}
