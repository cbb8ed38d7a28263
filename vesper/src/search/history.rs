//! Per-worker move-ordering statistics. Nothing here is shared: every
//! worker owns one set, cleared on `ucinewgame`.

use crate::chess_move::Move;
use vesper_types::{Color, Eval, Key, Piece, PieceType, Square};

pub const HISTORY_MAX: i32 = 16_384;
const CORRECTION_SIZE: usize = 16_384;
const CORRECTION_MAX: i32 = 8_192;
const PAWN_HISTORY_SIZE: usize = 512;

/// Gravity update: pulls the entry toward the bonus while decaying large
/// values, keeping everything inside +-max.
fn gravity(entry: &mut i32, bonus: i32, max: i32) {
    *entry += bonus - *entry * bonus.abs() / max;
}

/// Bonus applied on a beta cutoff, quadratic in depth.
pub fn stat_bonus(depth: i32) -> i32 {
    (depth * depth + 2 * depth - 2).clamp(0, HISTORY_MAX / 8)
}

pub fn stat_malus(depth: i32) -> i32 {
    -stat_bonus(depth + 1)
}

pub struct SearchHistory {
    /// Butterfly board indexed by side and the move's from-to bits.
    butterfly: Box<[[i32; 4096]; 2]>,
    /// Capture ordering indexed by the moving piece, target square and the
    /// captured piece type.
    capture: Box<[[[i32; 6]; 64]; 12]>,
    /// Continuation history: (previous piece, previous to) x (piece, to).
    continuation: Box<[[[i32; 64]; 12]; 768]>,
    /// Quiet stats bucketed by a reduced pawn-structure key.
    pawn: Box<[[[i32; 64]; 12]; PAWN_HISTORY_SIZE]>,
    correction: CorrectionHistory,
}

impl Default for SearchHistory {
    fn default() -> Self {
        Self {
            butterfly: vec![[0; 4096]; 2].into_boxed_slice().try_into().unwrap(),
            capture: vec![[[0; 6]; 64]; 12].into_boxed_slice().try_into().unwrap(),
            continuation: vec![[[0; 64]; 12]; 768].into_boxed_slice().try_into().unwrap(),
            pawn: vec![[[0; 64]; 12]; PAWN_HISTORY_SIZE].into_boxed_slice().try_into().unwrap(),
            correction: CorrectionHistory::default(),
        }
    }
}

impl SearchHistory {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn butterfly(&self, color: Color, mv: Move) -> i32 {
        self.butterfly[color][mv.from_to()]
    }

    pub fn update_butterfly(&mut self, color: Color, mv: Move, bonus: i32) {
        gravity(&mut self.butterfly[color][mv.from_to()], bonus, HISTORY_MAX);
    }

    pub fn capture(&self, piece: Piece, to: Square, captured: PieceType) -> i32 {
        self.capture[piece][to][captured]
    }

    pub fn update_capture(&mut self, piece: Piece, to: Square, captured: PieceType, bonus: i32) {
        gravity(&mut self.capture[piece][to][captured], bonus, HISTORY_MAX);
    }

    fn continuation_slot(prev: (Piece, Square)) -> usize {
        usize::from(prev.0) * 64 + usize::from(prev.1)
    }

    pub fn continuation(&self, prev: (Piece, Square), piece: Piece, to: Square) -> i32 {
        self.continuation[Self::continuation_slot(prev)][piece][to]
    }

    pub fn update_continuation(&mut self, prev: (Piece, Square), piece: Piece, to: Square, bonus: i32) {
        gravity(
            &mut self.continuation[Self::continuation_slot(prev)][piece][to],
            bonus,
            HISTORY_MAX,
        );
    }

    pub fn pawn_history(&self, pawn_key: Key, piece: Piece, to: Square) -> i32 {
        self.pawn[pawn_key as usize % PAWN_HISTORY_SIZE][piece][to]
    }

    pub fn update_pawn_history(&mut self, pawn_key: Key, piece: Piece, to: Square, bonus: i32) {
        gravity(
            &mut self.pawn[pawn_key as usize % PAWN_HISTORY_SIZE][piece][to],
            bonus,
            HISTORY_MAX,
        );
    }

    /// Combined quiet-move score used by the move picker.
    pub fn quiet_score(
        &self,
        color: Color,
        pawn_key: Key,
        prevs: &[Option<(Piece, Square)>],
        piece: Piece,
        mv: Move,
    ) -> i32 {
        let mut score = 2 * self.butterfly(color, mv);
        score += self.pawn_history(pawn_key, piece, mv.to());
        for prev in prevs.iter().flatten() {
            score += self.continuation(*prev, piece, mv.to());
        }
        score
    }

    pub fn correction(&self) -> &CorrectionHistory {
        &self.correction
    }

    pub fn correction_mut(&mut self) -> &mut CorrectionHistory {
        &mut self.correction
    }
}

/// Small static-eval corrections learned from the gap between search
/// results and the raw evaluation, bucketed by reduced Zobrist keys.
pub struct CorrectionHistory {
    pawn: Box<[[i32; CORRECTION_SIZE]; 2]>,
    minor: Box<[[i32; CORRECTION_SIZE]; 2]>,
    nonpawn: Box<[[i32; CORRECTION_SIZE]; 2]>,
}

impl Default for CorrectionHistory {
    fn default() -> Self {
        Self {
            pawn: vec![[0; CORRECTION_SIZE]; 2].into_boxed_slice().try_into().unwrap(),
            minor: vec![[0; CORRECTION_SIZE]; 2].into_boxed_slice().try_into().unwrap(),
            nonpawn: vec![[0; CORRECTION_SIZE]; 2].into_boxed_slice().try_into().unwrap(),
        }
    }
}

impl CorrectionHistory {
    fn slot(key: Key) -> usize {
        key as usize % CORRECTION_SIZE
    }

    /// Correction in centipawns to add onto the static evaluation.
    pub fn apply(&self, color: Color, pawn_key: Key, minor_key: Key, nonpawn_key: Key) -> i32 {
        let sum = self.pawn[color][Self::slot(pawn_key)]
            + self.minor[color][Self::slot(minor_key)]
            + self.nonpawn[color][Self::slot(nonpawn_key)];
        sum / 192
    }

    /// Feeds back the difference between the search result and the cached
    /// static eval, weighted by depth.
    pub fn update(
        &mut self,
        color: Color,
        pawn_key: Key,
        minor_key: Key,
        nonpawn_key: Key,
        diff: Eval,
        depth: i32,
    ) {
        let bonus = (diff.inner() * depth / 8).clamp(-CORRECTION_MAX / 4, CORRECTION_MAX / 4);
        gravity(&mut self.pawn[color][Self::slot(pawn_key)], bonus, CORRECTION_MAX);
        gravity(&mut self.minor[color][Self::slot(minor_key)], bonus, CORRECTION_MAX);
        gravity(&mut self.nonpawn[color][Self::slot(nonpawn_key)], bonus, CORRECTION_MAX);
    }
}
