use std::fmt::{Debug, Display};
use vesper_types::{IntoPrimitive, PieceType, Square, TryFromPrimitive, UnsafeFromPrimitive};

/// Kind of a move, stored in the high nibble of the 16-bit encoding.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, TryFromPrimitive, IntoPrimitive, UnsafeFromPrimitive)]
#[repr(u8)]
pub enum MoveFlag {
    Quiet = 0,
    DoublePush = 1,
    KingCastle = 2,
    QueenCastle = 3,
    Capture = 4,
    EnPassant = 5,
    Null = 6,
    PromoKnight = 8,
    PromoBishop = 9,
    PromoRook = 10,
    PromoQueen = 11,
    PromoCaptureKnight = 12,
    PromoCaptureBishop = 13,
    PromoCaptureRook = 14,
    PromoCaptureQueen = 15,
}

/// A move packed into 16 bits: 6 bits from-square, 6 bits to-square, 4 bits
/// flag. The all-zero value is the no-move sentinel; the null move carries
/// its own flag so the two never collide.
#[derive(PartialEq, Eq, Clone, Copy, Hash, Default)]
pub struct Move(u16);

impl Move {
    pub const NONE: Self = Self(0);
    pub const NULL: Self = Self((MoveFlag::Null as u16) << 12);

    pub fn new(from: Square, to: Square, flag: MoveFlag) -> Self {
        Self(u8::from(from) as u16 | (u8::from(to) as u16) << 6 | (flag as u16) << 12)
    }

    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    pub fn from(self) -> Square {
        // Safety: the low 6 bits are always a valid square index.
        unsafe { Square::unchecked_transmute_from((self.0 & 0x3F) as u8) }
    }

    pub fn to(self) -> Square {
        // Safety: bits 6..12 are always a valid square index.
        unsafe { Square::unchecked_transmute_from((self.0 >> 6 & 0x3F) as u8) }
    }

    pub fn flag(self) -> MoveFlag {
        // The unused nibble value 7 can only appear in foreign encodings
        // (a corrupt table entry); it degrades to a quiet move and gets
        // filtered by the pseudo-legality check.
        MoveFlag::try_from_primitive((self.0 >> 12) as u8).unwrap_or(MoveFlag::Quiet)
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn is_null(self) -> bool {
        self == Self::NULL
    }

    pub fn is_capture(self) -> bool {
        self.0 & 0x4000 != 0 && !self.is_null()
    }

    pub fn is_promotion(self) -> bool {
        self.0 & 0x8000 != 0
    }

    pub fn is_en_passant(self) -> bool {
        self.flag() == MoveFlag::EnPassant
    }

    pub fn is_castle(self) -> bool {
        matches!(self.flag(), MoveFlag::KingCastle | MoveFlag::QueenCastle)
    }

    pub fn is_double_push(self) -> bool {
        self.flag() == MoveFlag::DoublePush
    }

    pub fn promoted(self) -> Option<PieceType> {
        match self.flag() {
            MoveFlag::PromoKnight | MoveFlag::PromoCaptureKnight => Some(PieceType::Knight),
            MoveFlag::PromoBishop | MoveFlag::PromoCaptureBishop => Some(PieceType::Bishop),
            MoveFlag::PromoRook | MoveFlag::PromoCaptureRook => Some(PieceType::Rook),
            MoveFlag::PromoQueen | MoveFlag::PromoCaptureQueen => Some(PieceType::Queen),
            _ => None,
        }
    }

    /// The 16-bit butterfly index (from, to), used by the history tables.
    pub fn from_to(self) -> usize {
        (self.0 & 0x0FFF) as usize
    }
}

impl Display for Move {
    /// Long-algebraic notation: `e2e4`, `e7e8q`, `0000` for the no-move.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_none() || self.is_null() {
            return write!(f, "0000");
        }

        write!(f, "{}{}", self.from(), self.to())?;

        if let Some(pt) = self.promoted() {
            write!(f, "{}", pt.to_char())?;
        }

        Ok(())
    }
}

impl Debug for Move {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Move({self}, {:?})", self.flag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode() {
        let m = Move::new(Square::E2, Square::E4, MoveFlag::DoublePush);
        assert_eq!(m.from(), Square::E2);
        assert_eq!(m.to(), Square::E4);
        assert_eq!(m.flag(), MoveFlag::DoublePush);
        assert!(!m.is_capture());
        assert_eq!(m.to_string(), "e2e4");
    }

    #[test]
    fn promotion_flags() {
        let m = Move::new(Square::E7, Square::E8, MoveFlag::PromoQueen);
        assert!(m.is_promotion());
        assert!(!m.is_capture());
        assert_eq!(m.promoted(), Some(PieceType::Queen));
        assert_eq!(m.to_string(), "e7e8q");

        let m = Move::new(Square::E7, Square::D8, MoveFlag::PromoCaptureRook);
        assert!(m.is_promotion());
        assert!(m.is_capture());
        assert_eq!(m.promoted(), Some(PieceType::Rook));
    }

    #[test]
    fn sentinels_are_distinct() {
        assert!(Move::NONE.is_none());
        assert!(!Move::NONE.is_null());
        assert!(Move::NULL.is_null());
        assert!(!Move::NULL.is_none());
        assert!(!Move::NULL.is_capture());
        assert_eq!(Move::NONE.to_string(), "0000");
    }
}
