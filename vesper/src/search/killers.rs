use crate::chess_move::Move;
use vesper_types::{Piece, Square, MAX_PLY};

/// Two quiet moves per ply that recently caused beta cutoffs.
#[derive(Clone)]
pub struct SearchKillers(Box<[[Move; 2]]>);

impl SearchKillers {
    pub fn slot1(&self, ply: usize) -> Move {
        self.0[ply][0]
    }

    pub fn slot2(&self, ply: usize) -> Move {
        self.0[ply][1]
    }

    pub fn store(&mut self, ply: usize, mv: Move) {
        if self.0[ply][0] != mv {
            self.0[ply][1] = self.0[ply][0];
            self.0[ply][0] = mv;
        }
    }

    pub fn clear(&mut self) {
        self.0.fill([Move::NONE; 2]);
    }
}

impl Default for SearchKillers {
    fn default() -> Self {
        Self(vec![[Move::NONE; 2]; MAX_PLY + 2].into_boxed_slice())
    }
}

/// Refutation of the opponent's last move, indexed by (piece, to-square).
#[derive(Clone)]
pub struct CounterMoves(Box<[[Move; 64]]>);

impl CounterMoves {
    pub fn get(&self, prev_piece: Piece, prev_to: Square) -> Move {
        self.0[usize::from(prev_piece)][prev_to]
    }

    pub fn store(&mut self, prev_piece: Piece, prev_to: Square, mv: Move) {
        self.0[usize::from(prev_piece)][prev_to] = mv;
    }

    pub fn clear(&mut self) {
        self.0.fill([Move::NONE; 64]);
    }
}

impl Default for CounterMoves {
    fn default() -> Self {
        Self(vec![[Move::NONE; 64]; 12].into_boxed_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chess_move::MoveFlag;

    #[test]
    fn killers_shift_and_dedupe() {
        let mut killers = SearchKillers::default();
        let a = Move::new(Square::E2, Square::E4, MoveFlag::Quiet);
        let b = Move::new(Square::D2, Square::D4, MoveFlag::Quiet);

        killers.store(3, a);
        assert_eq!(killers.slot1(3), a);
        assert_eq!(killers.slot2(3), Move::NONE);

        // Storing the same move again must not push it into both slots.
        killers.store(3, a);
        assert_eq!(killers.slot2(3), Move::NONE);

        killers.store(3, b);
        assert_eq!(killers.slot1(3), b);
        assert_eq!(killers.slot2(3), a);

        // Other plies are independent.
        assert_eq!(killers.slot1(4), Move::NONE);
    }

    #[test]
    fn countermove_round_trip() {
        let mut counters = CounterMoves::default();
        let refutation = Move::new(Square::G8, Square::F6, MoveFlag::Quiet);
        counters.store(Piece::WhitePawn, Square::E4, refutation);
        assert_eq!(counters.get(Piece::WhitePawn, Square::E4), refutation);
        assert_eq!(counters.get(Piece::BlackPawn, Square::E4), Move::NONE);
    }
}
