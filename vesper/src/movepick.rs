//! Staged move ordering: TT move first, then winning captures, killers,
//! the countermove, history-sorted quiets and finally losing captures.
//! Moves are produced on demand so a beta cutoff skips all later work.

use crate::{
    board::{movegen::MoveList, Board},
    chess_move::Move,
    search::history::SearchHistory,
};
use vesper_types::{Color, Key, Piece, PieceType, Square};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    TtMove,
    CaptureInit,
    GoodCaptures,
    Killer1,
    Killer2,
    Counter,
    QuietInit,
    Quiets,
    BadCaptures,
    EvasionInit,
    Evasions,
    QsCaptureInit,
    QsCaptures,
    ProbCutInit,
    ProbCut,
    Done,
}

/// Everything the ordering heuristics need to score a move, captured by
/// value so the picker holds no borrow into the search context.
#[derive(Debug, Clone, Copy)]
pub struct OrderingContext {
    pub color: Color,
    pub pawn_key: Key,
    /// (piece, to) of the previous one and two plies, for continuation
    /// history.
    pub prevs: [Option<(Piece, Square)>; 2],
}

impl Default for OrderingContext {
    fn default() -> Self {
        Self {
            color: Color::White,
            pawn_key: 0,
            prevs: [None; 2],
        }
    }
}

pub struct MovePicker {
    stage: Stage,
    tt_move: Move,
    killers: [Move; 2],
    counter: Move,
    ctx: OrderingContext,
    scored: Vec<(i32, Move)>,
    bad_captures: Vec<(i32, Move)>,
    index: usize,
    see_threshold: i32,
    pub skip_quiets: bool,
}

impl MovePicker {
    pub fn new_main(tt_move: Move, killers: [Move; 2], counter: Move, ctx: OrderingContext, in_check: bool) -> Self {
        Self {
            stage: if in_check { Stage::EvasionInit } else { Stage::TtMove },
            tt_move,
            killers,
            counter,
            ctx,
            scored: Vec::new(),
            bad_captures: Vec::new(),
            index: 0,
            see_threshold: -90,
            skip_quiets: false,
        }
    }

    pub fn new_quiescence(tt_move: Move, ctx: OrderingContext, in_check: bool) -> Self {
        Self {
            stage: if in_check { Stage::EvasionInit } else { Stage::QsCaptureInit },
            tt_move,
            killers: [Move::NONE; 2],
            counter: Move::NONE,
            ctx,
            scored: Vec::new(),
            bad_captures: Vec::new(),
            index: 0,
            see_threshold: -90,
            skip_quiets: false,
        }
    }

    pub fn new_probcut(tt_move: Move, threshold: i32, ctx: OrderingContext) -> Self {
        Self {
            stage: Stage::ProbCutInit,
            tt_move,
            killers: [Move::NONE; 2],
            counter: Move::NONE,
            ctx,
            scored: Vec::new(),
            bad_captures: Vec::new(),
            index: 0,
            see_threshold: threshold,
            skip_quiets: true,
        }
    }

    fn capture_score(board: &Board, history: &SearchHistory, mv: Move) -> i32 {
        let victim = if mv.is_en_passant() {
            PieceType::Pawn
        } else {
            board.pieces[mv.to()].map_or(PieceType::Pawn, Piece::piece_type)
        };
        let attacker = board.pieces[mv.from()].expect("capture has a mover");

        16 * victim.value() - attacker.value() / 16
            + history.capture(attacker, mv.to(), victim) / 16
            + if mv.promoted() == Some(PieceType::Queen) { 2_000 } else { 0 }
    }

    fn score_captures(&mut self, board: &Board, history: &SearchHistory) {
        let mut list = MoveList::new();
        board.generate_captures(&mut list);

        self.scored = list
            .into_iter()
            .filter(|&m| m != self.tt_move)
            .map(|m| (Self::capture_score(board, history, m), m))
            .collect();
        self.scored.sort_unstable_by_key(|(s, _)| std::cmp::Reverse(*s));
        self.index = 0;
    }

    fn score_quiets(&mut self, board: &Board, history: &SearchHistory) {
        let mut list = MoveList::new();
        board.generate_all_moves(&mut list);

        // Queen promotions already came out of the capture stage; quiet
        // underpromotions are ordered here with everything else.
        self.scored = list
            .into_iter()
            .filter(|&m| {
                !m.is_capture()
                    && m.promoted() != Some(PieceType::Queen)
                    && m != self.tt_move
                    && m != self.killers[0]
                    && m != self.killers[1]
                    && m != self.counter
            })
            .map(|m| {
                let piece = board.pieces[m.from()].expect("move has a mover");
                let score =
                    history.quiet_score(self.ctx.color, self.ctx.pawn_key, &self.ctx.prevs, piece, m);
                (score, m)
            })
            .collect();
        self.scored.sort_unstable_by_key(|(s, _)| std::cmp::Reverse(*s));
        self.index = 0;
    }

    fn score_evasions(&mut self, board: &Board, history: &SearchHistory) {
        let mut list = MoveList::new();
        board.generate_all_moves(&mut list);

        self.scored = list
            .into_iter()
            .filter(|&m| m != self.tt_move)
            .map(|m| {
                let score = if m.is_capture() {
                    1_000_000 + Self::capture_score(board, history, m)
                } else {
                    let piece = board.pieces[m.from()].expect("move has a mover");
                    history.quiet_score(self.ctx.color, self.ctx.pawn_key, &self.ctx.prevs, piece, m)
                };
                (score, m)
            })
            .collect();
        self.scored.sort_unstable_by_key(|(s, _)| std::cmp::Reverse(*s));
        self.index = 0;
    }

    fn next_scored(&mut self) -> Option<Move> {
        let item = self.scored.get(self.index)?;
        self.index += 1;
        Some(item.1)
    }

    /// The next move to try, or `None` when the position is exhausted.
    pub fn next(&mut self, board: &Board, history: &SearchHistory) -> Option<Move> {
        loop {
            match self.stage {
                Stage::TtMove => {
                    self.stage = Stage::CaptureInit;
                    if !self.tt_move.is_none() && board.is_pseudo_legal(self.tt_move) {
                        return Some(self.tt_move);
                    }
                }

                Stage::CaptureInit => {
                    self.score_captures(board, history);
                    self.stage = Stage::GoodCaptures;
                }

                Stage::GoodCaptures => match self.next_scored() {
                    Some(mv) => {
                        if board.see_ge(mv, self.see_threshold) {
                            return Some(mv);
                        }
                        let score = self.scored[self.index - 1].0;
                        self.bad_captures.push((score, mv));
                    }
                    None => self.stage = Stage::Killer1,
                },

                Stage::Killer1 => {
                    self.stage = Stage::Killer2;
                    let mv = self.killers[0];
                    if self.try_quiet_special(board, mv) {
                        return Some(mv);
                    }
                }

                Stage::Killer2 => {
                    self.stage = Stage::Counter;
                    let mv = self.killers[1];
                    if self.try_quiet_special(board, mv) {
                        return Some(mv);
                    }
                }

                Stage::Counter => {
                    self.stage = Stage::QuietInit;
                    let mv = self.counter;
                    if mv != self.killers[0] && mv != self.killers[1] && self.try_quiet_special(board, mv) {
                        return Some(mv);
                    }
                }

                Stage::QuietInit => {
                    if self.skip_quiets {
                        self.stage = Stage::BadCaptures;
                        self.index = 0;
                        continue;
                    }
                    self.score_quiets(board, history);
                    self.stage = Stage::Quiets;
                }

                Stage::Quiets => {
                    if self.skip_quiets {
                        self.stage = Stage::BadCaptures;
                        self.index = 0;
                        continue;
                    }
                    match self.next_scored() {
                        Some(mv) => return Some(mv),
                        None => {
                            self.stage = Stage::BadCaptures;
                            self.index = 0;
                        }
                    }
                }

                Stage::BadCaptures => {
                    let item = self.bad_captures.get(self.index);
                    match item {
                        Some(&(_, mv)) => {
                            self.index += 1;
                            return Some(mv);
                        }
                        None => self.stage = Stage::Done,
                    }
                }

                Stage::EvasionInit => {
                    self.stage = Stage::Evasions;
                    if !self.tt_move.is_none() && board.is_pseudo_legal(self.tt_move) {
                        return Some(self.tt_move);
                    }
                }

                Stage::Evasions => {
                    if self.scored.is_empty() && self.index == 0 {
                        self.score_evasions(board, history);
                    }
                    match self.next_scored() {
                        Some(mv) => return Some(mv),
                        None => self.stage = Stage::Done,
                    }
                }

                Stage::QsCaptureInit => {
                    self.stage = Stage::QsCaptures;
                    if !self.tt_move.is_none()
                        && self.tt_move.is_capture()
                        && board.is_pseudo_legal(self.tt_move)
                    {
                        return Some(self.tt_move);
                    }
                }

                Stage::QsCaptures => {
                    if self.scored.is_empty() && self.index == 0 {
                        self.score_captures(board, history);
                    }
                    match self.next_scored() {
                        Some(mv) => return Some(mv),
                        None => self.stage = Stage::Done,
                    }
                }

                Stage::ProbCutInit => {
                    self.score_captures(board, history);
                    self.stage = Stage::ProbCut;
                }

                Stage::ProbCut => match self.next_scored() {
                    Some(mv) => {
                        if board.see_ge(mv, self.see_threshold) {
                            return Some(mv);
                        }
                    }
                    None => self.stage = Stage::Done,
                },

                Stage::Done => return None,
            }
        }
    }

    fn try_quiet_special(&self, board: &Board, mv: Move) -> bool {
        !mv.is_none()
            && !mv.is_capture()
            && mv != self.tt_move
            && board.is_pseudo_legal(mv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chess_move::MoveFlag;
    use crate::FEN_STARTPOS;

    fn drain(picker: &mut MovePicker, board: &Board, history: &SearchHistory) -> Vec<Move> {
        let mut moves = Vec::new();
        while let Some(mv) = picker.next(board, history) {
            moves.push(mv);
        }
        moves
    }

    #[test]
    fn yields_every_pseudo_legal_move_once() {
        // The second position has quiet promotions and promotion captures.
        for fen in [
            "r1bqkbnr/pppp1ppp/2n5/4p3/3P4/5N2/PPP1PPPP/RNBQKB1R w KQkq - 2 3",
            "1n2k3/P7/8/8/8/8/8/4K3 w - - 0 1",
        ] {
            let board = Board::from_fen(fen).unwrap();
            let history = SearchHistory::default();

            let mut list = MoveList::new();
            board.generate_all_moves(&mut list);

            let mut picker =
                MovePicker::new_main(Move::NONE, [Move::NONE; 2], Move::NONE, OrderingContext::default(), false);
            let produced = drain(&mut picker, &board, &history);

            assert_eq!(produced.len(), list.len(), "count mismatch for {fen}");
            for m in &list {
                assert!(produced.contains(m), "{m} missing from {fen}");
            }
            let mut dedup = produced.clone();
            dedup.sort_by_key(|m| m.raw());
            dedup.dedup();
            assert_eq!(dedup.len(), produced.len(), "duplicate moves for {fen}");
        }
    }

    #[test]
    fn tt_move_comes_first() {
        let board = Board::from_fen(FEN_STARTPOS).unwrap();
        let history = SearchHistory::default();
        let tt_move = board.find_move("d2d4").unwrap();

        let mut picker =
            MovePicker::new_main(tt_move, [Move::NONE; 2], Move::NONE, OrderingContext::default(), false);
        let produced = drain(&mut picker, &board, &history);
        assert_eq!(produced[0], tt_move);
        assert_eq!(produced.iter().filter(|&&m| m == tt_move).count(), 1);
    }

    #[test]
    fn illegal_tt_move_is_dropped() {
        let board = Board::from_fen(FEN_STARTPOS).unwrap();
        let history = SearchHistory::default();
        let bogus = Move::new(Square::A8, Square::A1, MoveFlag::Quiet);

        let mut picker =
            MovePicker::new_main(bogus, [Move::NONE; 2], Move::NONE, OrderingContext::default(), false);
        let produced = drain(&mut picker, &board, &history);
        assert!(!produced.contains(&bogus));
        assert_eq!(produced.len(), 20);
    }

    #[test]
    fn winning_capture_before_killer() {
        // White can win a queen with d4xe5? No - set up a hanging queen.
        let board = Board::from_fen("4k3/8/8/3q4/4P3/8/8/4K3 w - - 0 1").unwrap();
        let history = SearchHistory::default();
        let killer = board.find_move("e1f2").unwrap();
        let capture = board.find_move("e4d5").unwrap();

        let mut picker =
            MovePicker::new_main(Move::NONE, [killer, Move::NONE], Move::NONE, OrderingContext::default(), false);
        let produced = drain(&mut picker, &board, &history);

        let cap_pos = produced.iter().position(|&m| m == capture).unwrap();
        let killer_pos = produced.iter().position(|&m| m == killer).unwrap();
        assert!(cap_pos < killer_pos);
    }

    #[test]
    fn quiescence_generates_captures_only_when_not_in_check() {
        let board = Board::from_fen("4k3/8/8/3q4/4P3/8/8/4K3 w - - 0 1").unwrap();
        let history = SearchHistory::default();

        let mut picker = MovePicker::new_quiescence(Move::NONE, OrderingContext::default(), false);
        let produced = drain(&mut picker, &board, &history);
        assert!(produced.iter().all(|m| m.is_capture() || m.promoted().is_some()));
        assert!(!produced.is_empty());
    }

    #[test]
    fn probcut_yields_only_see_winning_captures() {
        let board = Board::from_fen("4k3/4p3/3p4/8/8/8/8/3QK3 w - - 0 1").unwrap();
        let history = SearchHistory::default();

        let mut picker = MovePicker::new_probcut(Move::NONE, 0, OrderingContext::default());
        let produced = drain(&mut picker, &board, &history);
        // Qxd6 loses the queen to the e7-pawn recapture; nothing should
        // survive the SEE gate.
        assert!(produced.is_empty(), "got {produced:?}");
    }
}
