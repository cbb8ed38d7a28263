//! Iterative-deepening principal-variation search. One `ABContext` per
//! worker thread; the transposition table, classifier and counters inside
//! it are the only shared state.

use crate::{
    board::{movegen::MoveList, Board},
    chess_move::Move,
    eval::Evaluator,
    hashtable::{value_from_tt, value_to_tt, TranspositionTable},
    movepick::{MovePicker, OrderingContext},
    shashin::ShashinManager,
    tables::LMR_TABLE,
    tb::TableBase,
    time_man::TimeMan,
};
use self::history::{stat_bonus, stat_malus, SearchHistory};
use self::killers::{CounterMoves, SearchKillers};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use vesper_types::{Bound, Eval, Piece, PieceType, Square, MAX_PLY};

pub mod history;
pub mod killers;

/// Iterative deepening never goes past this; the stack has a margin above.
pub const MAX_DEPTH: u32 = 120;

const QS_DEPTH_CHECKS: i32 = 0;
const QS_DEPTH_NO_CHECKS: i32 = -1;

/// Counters every worker feeds and the reporter reads.
#[derive(Debug, Default)]
pub struct SharedCounters {
    pub nodes: AtomicU64,
    pub tb_hits: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct RootMove {
    pub mv: Move,
    pub score: Eval,
    pub previous_score: Eval,
    pub sel_depth: u32,
    pub pv: Vec<Move>,
}

impl RootMove {
    fn new(mv: Move) -> Self {
        Self {
            mv,
            score: -Eval::INFINITE,
            previous_score: -Eval::INFINITE,
            sel_depth: 0,
            pv: vec![mv],
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct StackEntry {
    eval: Eval,
    moved: Option<(Piece, Square)>,
    current_move: Move,
    excluded: Move,
    null_moved: bool,
}

/// Everything one alpha-beta worker needs. Histories and killers are owned;
/// the rest is shared and read-mostly.
pub struct ABContext {
    pub time_man: TimeMan,
    pub tt: Arc<TranspositionTable>,
    pub shashin: Arc<ShashinManager>,
    pub evaluator: Arc<dyn Evaluator>,
    pub tablebase: Arc<dyn TableBase>,
    pub counters: Arc<SharedCounters>,
    pub history: SearchHistory,
    pub killers: SearchKillers,
    pub countermoves: CounterMoves,
    pub multipv: usize,
    pub searchmoves: Vec<Move>,
    pub is_main: bool,
    pub nodes: u64,
    pub sel_depth: u32,
    pub root_depth: u32,
    pub completed_depth: u32,
    pub best_move_changes: f64,
    pub root_moves: Vec<RootMove>,
    stack: Vec<StackEntry>,
}

impl ABContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        time_man: TimeMan,
        tt: Arc<TranspositionTable>,
        shashin: Arc<ShashinManager>,
        evaluator: Arc<dyn Evaluator>,
        tablebase: Arc<dyn TableBase>,
        counters: Arc<SharedCounters>,
        history: SearchHistory,
        killers: SearchKillers,
        countermoves: CounterMoves,
    ) -> Self {
        Self {
            time_man,
            tt,
            shashin,
            evaluator,
            tablebase,
            counters,
            history,
            killers,
            countermoves,
            multipv: 1,
            searchmoves: Vec::new(),
            is_main: false,
            nodes: 0,
            sel_depth: 0,
            root_depth: 0,
            completed_depth: 0,
            best_move_changes: 0.0,
            root_moves: Vec::new(),
            stack: vec![StackEntry::default(); MAX_PLY + 8],
        }
    }

    fn count_node(&mut self) {
        self.nodes += 1;
        self.counters.nodes.fetch_add(1, Ordering::Relaxed);
    }

    fn should_stop(&mut self) -> bool {
        let nodes = self.nodes;
        self.time_man.stop(nodes, true)
    }

    fn ordering_context(&self, board: &Board, ply: usize) -> OrderingContext {
        let prev1 = if ply >= 1 { self.stack[ply + 1].moved } else { None };
        let prev2 = if ply >= 2 { self.stack[ply].moved } else { None };
        OrderingContext {
            color: board.color,
            pawn_key: board.pawn_key,
            prevs: [prev1, prev2],
        }
    }

    fn stack_entry(&mut self, ply: usize) -> &mut StackEntry {
        // Index offset two so [ply - 2] lookups never underflow.
        &mut self.stack[ply + 2]
    }

    fn stack_at(&self, ply: usize) -> &StackEntry {
        &self.stack[ply + 2]
    }
}

/// Draw score with a one-centipawn dither keyed on the node count, so the
/// search does not walk blindly into threefold lines it cannot compare.
fn draw_value(nodes: u64) -> Eval {
    Eval::new(1 - (nodes & 2) as i32)
}

/// Fills `root_moves` with the legal moves at the root, honoring an
/// explicit `searchmoves` filter.
pub fn setup_root_moves(board: &mut Board, ctx: &mut ABContext) {
    ctx.root_moves.clear();

    let mut list = MoveList::new();
    board.generate_all_moves(&mut list);

    for mv in list {
        if !ctx.searchmoves.is_empty() && !ctx.searchmoves.contains(&mv) {
            continue;
        }
        if board.make_move(mv) {
            board.take_move();
            ctx.root_moves.push(RootMove::new(mv));
        }
    }
}

/// Outcome of one worker's iterative deepening, fed into the pool's vote.
#[derive(Debug, Clone)]
pub struct WorkerResult {
    pub best_move: Move,
    pub ponder_move: Move,
    pub score: Eval,
    pub completed_depth: u32,
    pub root_moves: Vec<RootMove>,
}

/// Iteration-end report hook; the pool wires this to UCI output on the
/// main worker and to nothing elsewhere.
pub type ReportFn<'a> = dyn FnMut(&Board, &ABContext) + 'a;

pub fn iterative_deepening(board: &mut Board, ctx: &mut ABContext, report: &mut ReportFn) -> WorkerResult {
    setup_root_moves(board, ctx);

    if ctx.root_moves.is_empty() {
        return WorkerResult {
            best_move: Move::NONE,
            ponder_move: Move::NONE,
            score: if board.in_check() { Eval::mated_in(0) } else { Eval::DRAW },
            completed_depth: 0,
            root_moves: Vec::new(),
        };
    }

    let max_depth = ctx.time_man.depth_limit().min(MAX_DEPTH);
    let multipv = ctx.multipv.min(ctx.root_moves.len());
    let mut last_best = ctx.root_moves[0].mv;
    let mut stability = 0u32;

    for depth in 1..=max_depth {
        ctx.root_depth = depth;
        ctx.best_move_changes /= 2.0;

        for pv_idx in 0..multipv {
            ctx.sel_depth = 0;

            // Aspiration window around the previous score; the first
            // iteration has nothing to aspire to and searches full-width.
            let previous = ctx.root_moves[pv_idx].previous_score;
            let aspirable =
                previous.is_valid() && previous.inner().abs() < Eval::MATE_IN_MAX_PLY.inner();

            let mut delta;
            let mut alpha;
            let mut beta;
            if aspirable {
                delta = Eval::new(18 + previous.inner() * previous.inner() / 10_000);
                alpha = (-Eval::INFINITE).max(previous - delta);
                beta = Eval::INFINITE.min(previous + delta);
            } else {
                delta = Eval::INFINITE;
                alpha = -Eval::INFINITE;
                beta = Eval::INFINITE;
            }

            loop {
                let score = search_root(board, ctx, alpha, beta, depth, pv_idx);

                if ctx.should_stop() {
                    break;
                }

                if score <= alpha {
                    beta = Eval::new((alpha.inner() + beta.inner()) / 2);
                    alpha = (-Eval::INFINITE).max(score - delta);
                } else if score >= beta {
                    beta = Eval::INFINITE.min(score + delta);
                } else {
                    break;
                }

                delta = Eval::new(delta.inner().saturating_mul(2));
            }

            // Keep [0..=pv_idx] sorted so weaker multipv lines never shadow
            // a stronger one.
            ctx.root_moves[..=pv_idx].sort_by(|a, b| b.score.cmp(&a.score));

            if ctx.should_stop() {
                break;
            }
        }

        if ctx.should_stop() {
            break;
        }

        ctx.completed_depth = depth;
        for rm in ctx.root_moves.iter_mut() {
            rm.previous_score = rm.score;
        }

        if ctx.root_moves[0].mv == last_best {
            stability = (stability + 1).min(10);
        } else {
            stability = 0;
            last_best = ctx.root_moves[0].mv;
        }

        if ctx.is_main {
            ctx.shashin
                .update(ctx.root_moves[0].score, board.wdl_material(), depth);
            report(board, ctx);

            if let Some(mate) = ctx.time_man.mate_limit() {
                let score = ctx.root_moves[0].score;
                if score.is_mate() && score > Eval::ZERO && score.mate_distance() <= 2 * mate as i32 {
                    ctx.time_man.force_stop();
                    break;
                }
            }

            if ctx.time_man.is_managed() {
                // Spend less once the choice has been stable for a while,
                // more when the best move keeps flapping or the score falls.
                let falling = (ctx.root_moves[0].previous_score.inner()
                    - ctx.root_moves[0].score.inner())
                .max(0) as f64;
                let factor = (1.0 - 0.05 * stability as f64 + 0.1 * ctx.best_move_changes
                    + falling / 600.0)
                    .clamp(0.4, 2.5);

                if ctx.time_man.past_optimum(factor) {
                    ctx.time_man.force_stop();
                    break;
                }
            }
        }
    }

    let best = ctx.root_moves[0].clone();
    let ponder_move = best.pv.get(1).copied().unwrap_or(Move::NONE);

    WorkerResult {
        best_move: best.mv,
        ponder_move,
        score: if best.score.is_valid() && best.score != -Eval::INFINITE {
            best.score
        } else {
            best.previous_score
        },
        completed_depth: ctx.completed_depth,
        root_moves: ctx.root_moves.clone(),
    }
}

/// Searches the root moves from `pv_idx` on with the given window.
fn search_root(
    board: &mut Board,
    ctx: &mut ABContext,
    mut alpha: Eval,
    beta: Eval,
    depth: u32,
    pv_idx: usize,
) -> Eval {
    let mut best_value = -Eval::INFINITE;

    for i in pv_idx..ctx.root_moves.len() {
        let mv = ctx.root_moves[i].mv;
        let entry = ctx.stack_entry(0);
        entry.current_move = mv;
        entry.excluded = Move::NONE;

        if !board.make_move(mv) {
            continue;
        }
        ctx.count_node();
        ctx.stack_entry(0).moved = board.pieces[mv.to()].map(|p| (p, mv.to()));

        let new_depth = depth as i32 - 1;
        let score = if i == pv_idx {
            -search(board, ctx, -beta, -alpha, new_depth, 1, false, true)
        } else {
            let zw = -search(board, ctx, -alpha - 1, -alpha, new_depth, 1, true, false);
            if zw > alpha {
                ctx.best_move_changes += 1.0;
                -search(board, ctx, -beta, -alpha, new_depth, 1, false, true)
            } else {
                zw
            }
        };

        board.take_move();

        if ctx.should_stop() {
            return Eval::ZERO;
        }

        if i == pv_idx || score > alpha {
            let pv = extract_pv(board, &ctx.tt, mv, depth as usize + 8);
            let sel_depth = ctx.sel_depth;
            let rm = &mut ctx.root_moves[i];
            rm.score = score;
            rm.sel_depth = sel_depth;
            rm.pv = pv;
        } else {
            // Refuted lines keep their order but never outrank searched
            // ones.
            ctx.root_moves[i].score = -Eval::INFINITE;
        }

        if score > best_value {
            best_value = score;
        }
        if score > alpha {
            alpha = score;
            if i != pv_idx {
                ctx.root_moves[pv_idx..=i].rotate_right(1);
            }
        }
        if alpha >= beta {
            break;
        }
    }

    best_value
}

/// Walks the transposition table to recover the principal variation,
/// guarding against cycles the way a threefold repetition would loop it.
pub fn extract_pv(board: &mut Board, tt: &TranspositionTable, first: Move, max_len: usize) -> Vec<Move> {
    let mut pv = vec![first];
    let mut made = 0;

    if !board.make_move(first) {
        return pv;
    }
    made += 1;

    let mut seen = std::collections::HashMap::new();
    while pv.len() < max_len {
        let (hit, data, _) = tt.probe(board.key);
        if !hit || data.mv.is_none() || !board.is_pseudo_legal(data.mv) {
            break;
        }

        let count = seen.entry(board.key).or_insert(0u32);
        *count += 1;
        if *count >= 3 {
            break;
        }

        if !board.make_move(data.mv) {
            break;
        }
        made += 1;
        pv.push(data.mv);
    }

    for _ in 0..made {
        board.take_move();
    }

    pv
}

#[allow(clippy::too_many_arguments)]
fn search(
    board: &mut Board,
    ctx: &mut ABContext,
    mut alpha: Eval,
    mut beta: Eval,
    depth: i32,
    ply: usize,
    cut_node: bool,
    is_pv: bool,
) -> Eval {
    if depth <= 0 {
        return quiescence(board, ctx, alpha, beta, ply, is_pv);
    }

    ctx.count_node();
    ctx.sel_depth = ctx.sel_depth.max(ply as u32);

    if ctx.should_stop() {
        return Eval::ZERO;
    }

    // (a) Draws. The dither keeps repeated positions from all scoring an
    // indistinguishable zero.
    if board.is_repetition() || board.halfmove_clock() >= 100 || board.is_draw_by_material() {
        return draw_value(ctx.nodes);
    }

    if ply >= MAX_PLY - 2 {
        return static_eval(board, ctx, ply);
    }

    // (b) Mate distance pruning.
    alpha = alpha.max(Eval::mated_in(ply));
    beta = beta.min(Eval::mate_in(ply + 1));
    if alpha >= beta {
        return alpha;
    }

    let excluded = ctx.stack_at(ply).excluded;
    let in_check = board.in_check();

    // (c) Transposition table. A singular verification must not see the
    // entry it is probing, so an excluded move blanks the hit.
    let (mut tt_hit, tt_data, _) = ctx.tt.probe(board.key);
    tt_hit &= excluded.is_none();
    let tt_value = if tt_hit { value_from_tt(tt_data.value, ply) } else { Eval::NONE };
    let tt_move = if tt_hit { tt_data.mv } else { Move::NONE };
    let tt_pv = is_pv || (tt_hit && tt_data.is_pv);

    if !is_pv
        && tt_hit
        && excluded.is_none()
        && tt_data.depth >= depth
        && tt_value.is_valid()
        && tt_data.bound.cuts(tt_value, beta)
        && board.halfmove_clock() < 90
    {
        return tt_value;
    }

    // (d) Tablebases.
    if board.bb_all.bit_count() <= ctx.tablebase.max_pieces() && excluded.is_none() {
        if let Some(verdict) = ctx.tablebase.probe_wdl(board) {
            ctx.counters.tb_hits.fetch_add(1, Ordering::Relaxed);
            return verdict.value(ply);
        }
    }

    let shashin = ctx.shashin.snapshot();

    // (e) Static evaluation, cached on the stack.
    let eval = if in_check {
        ctx.stack_entry(ply).eval = Eval::NONE;
        Eval::NONE
    } else {
        let raw = if tt_hit && tt_data.eval.is_valid() {
            tt_data.eval
        } else {
            ctx.evaluator.evaluate(board)
        };
        let corrected = raw
            + ctx
                .history
                .correction()
                .apply(board.color, board.pawn_key, board.minor_key, board.nonpawn_key);
        let corrected = corrected.clamp_eval();
        ctx.stack_entry(ply).eval = corrected;
        corrected
    };

    // (f) Improving: better static eval than two plies ago.
    let improving = !in_check
        && ply >= 2
        && ctx.stack_at(ply - 2).eval.is_valid()
        && eval > ctx.stack_at(ply - 2).eval;

    if !in_check && excluded.is_none() && shashin.early_pruning_parent {
        // (g) Razoring: drop into quiescence when even an optimistic margin
        // cannot reach alpha.
        if !is_pv && depth <= 3 && eval + 256 + 192 * depth < alpha {
            return quiescence(board, ctx, alpha, beta, ply, false);
        }

        // (h) Reverse futility: a comfortable static margin above beta.
        let futility_margin = Eval::new(80 * depth - if improving { 40 } else { 0 });
        if !is_pv
            && depth <= 9
            && !eval.is_terminal()
            && !beta.is_terminal()
            && eval - futility_margin >= beta
        {
            return eval;
        }

        // (i) Null move: hand over the turn; a still-failing-high search
        // means the position is good enough to cut.
        if !is_pv
            && shashin.use_null_move
            && !ctx.stack_at(ply - 1).null_moved
            && eval >= beta
            && board.big_piece_count(board.color) > 0
            && depth >= 3
            && !beta.is_terminal()
        {
            let r = 3 + depth / 3 + ((eval.inner() - beta.inner()) / 200).min(3);
            let null_depth = depth - r;

            ctx.stack_entry(ply).null_moved = true;
            ctx.stack_entry(ply).moved = None;
            board.make_null_move();
            let null_value = -search(board, ctx, -beta, -beta + 1, null_depth, ply + 1, !cut_node, false);
            board.take_null_move();
            ctx.stack_entry(ply).null_moved = false;

            if ctx.should_stop() {
                return Eval::ZERO;
            }

            if null_value >= beta {
                // Mate scores from a null search smell like zugzwang.
                let null_value = if null_value.is_terminal() { beta } else { null_value };

                if depth < 12 {
                    return null_value;
                }

                // Verification at reduced depth without the null move.
                let verified = search(board, ctx, beta - 1, beta, null_depth, ply, false, false);
                if verified >= beta {
                    return null_value;
                }
            }
        }

        // (j) ProbCut: a good capture that beats a raised beta at reduced
        // depth almost certainly beats beta at full depth.
        let probcut_beta = beta + 170 - if improving { 60 } else { 0 };
        if !is_pv && depth >= 5 && !beta.is_terminal() && !(tt_hit && tt_data.depth >= depth - 3 && tt_value < probcut_beta) {
            let mut picker = MovePicker::new_probcut(
                tt_move,
                probcut_beta.inner() - eval.inner(),
                ctx.ordering_context(board, ply),
            );
            let mut tried = 0;

            while let Some(mv) = picker.next(board, &ctx.history) {
                if tried >= 3 {
                    break;
                }
                if mv == excluded || !board.make_move(mv) {
                    continue;
                }
                tried += 1;
                ctx.stack_entry(ply).current_move = mv;
                ctx.stack_entry(ply).moved = board.pieces[mv.to()].map(|p| (p, mv.to()));

                // Confirm with quiescence before paying for the reduced search.
                let mut value = -quiescence(board, ctx, -probcut_beta, -probcut_beta + 1, ply + 1, false);
                if value >= probcut_beta && depth >= 6 {
                    value = -search(board, ctx, -probcut_beta, -probcut_beta + 1, depth - 4, ply + 1, !cut_node, false);
                }
                board.take_move();

                if ctx.should_stop() {
                    return Eval::ZERO;
                }

                if value >= probcut_beta {
                    let (_, _, writer) = ctx.tt.probe(board.key);
                    writer.save(
                        board.key,
                        value_to_tt(value, ply),
                        tt_pv,
                        Bound::Lower,
                        depth - 3,
                        mv,
                        ctx.stack_at(ply).eval,
                    );
                    return value;
                }
            }
        }
    }

    // (k) Internal iterative reduction: unexplored nodes are not worth the
    // full depth yet.
    let mut depth = depth;
    if !tt_hit && excluded.is_none() && ((is_pv && depth >= 7) || (cut_node && depth >= 4)) {
        depth -= 1;
    }

    // (l) The move loop.
    let counter = board
        .last_move()
        .and_then(|m| ctx.stack_at(ply - 1).moved.map(|(p, _)| (p, m.to())))
        .map(|(p, to)| ctx.countermoves.get(p, to))
        .unwrap_or(Move::NONE);

    let mut picker = MovePicker::new_main(
        tt_move,
        [ctx.killers.slot1(ply), ctx.killers.slot2(ply)],
        counter,
        ctx.ordering_context(board, ply),
        in_check,
    );

    let mut best_value = -Eval::INFINITE;
    let mut best_move = Move::NONE;
    let mut move_count = 0u32;
    let mut quiets_tried: Vec<Move> = Vec::new();
    let mut captures_tried: Vec<(Move, Piece, PieceType)> = Vec::new();

    while let Some(mv) = picker.next(board, &ctx.history) {
        if mv == excluded {
            continue;
        }

        let is_quiet = !mv.is_capture() && mv.promoted().is_none();
        let moved_piece = board.pieces[mv.from()];

        // Late-move pruning family, never when a mate is on the table.
        if !is_pv && !in_check && best_value > -Eval::MATE_IN_MAX_PLY && shashin.early_pruning_child {
            let lmp_limit = (3 + depth * depth) as u32 / if improving { 1 } else { 2 };
            if is_quiet && move_count >= lmp_limit {
                picker.skip_quiets = true;
                continue;
            }

            if is_quiet
                && depth <= 8
                && eval.is_valid()
                && eval + Eval::new(100 * depth + 150) <= alpha
            {
                picker.skip_quiets = true;
                continue;
            }

            let see_margin = if is_quiet { -65 * depth } else { -20 * depth * depth };
            if depth <= 8 && move_count >= 1 && !board.see_ge(mv, see_margin) {
                continue;
            }
        }

        // Singular extension probe for the table move.
        let mut extension = 0i32;
        if mv == tt_move
            && excluded.is_none()
            && ply > 0
            && depth >= 6
            && tt_hit
            && tt_value.is_valid()
            && !tt_value.is_terminal()
            && tt_data.bound != Bound::Upper
            && tt_data.depth >= depth - 3
        {
            let singular_beta = tt_value - depth;
            let singular_depth = (depth - 1) / 2;

            ctx.stack_entry(ply).excluded = mv;
            let value = search(board, ctx, singular_beta - 1, singular_beta, singular_depth, ply, cut_node, false);
            ctx.stack_entry(ply).excluded = Move::NONE;

            if value < singular_beta {
                extension = 1;
            } else if singular_beta >= beta {
                // Multi-cut: even without the table move this node fails high.
                return singular_beta;
            } else if tt_value >= beta {
                extension = -2;
            }
        }

        if !board.make_move(mv) {
            continue;
        }
        move_count += 1;
        ctx.count_node();

        let gave_check = board.in_check();
        if gave_check && extension == 0 && depth < 7 {
            extension = 1;
        }

        {
            let entry = ctx.stack_entry(ply);
            entry.current_move = mv;
            entry.moved = board.pieces[mv.to()].map(|p| (p, mv.to()));
        }

        let new_depth = depth - 1 + extension;

        // (Late-move) reductions from the precomputed grid, nudged by the
        // usual signals and by the position class.
        let mut score;
        if depth >= 2 && move_count > 1 + 2 * (ply == 0) as u32 && (is_quiet || !tt_pv) {
            let mut r = LMR_TABLE[depth.min(63) as usize][move_count.min(63) as usize] as i32;
            r -= tt_pv as i32;
            r -= improving as i32;
            r -= gave_check as i32;
            r += cut_node as i32;
            r += !is_pv as i32;
            if shashin.is_strategical {
                r += is_quiet as i32;
            }
            if shashin.is_tactical {
                r -= 1;
            }

            let reduced = (new_depth - r.max(0)).max(1);
            score = -search(board, ctx, -alpha - 1, -alpha, reduced, ply + 1, true, false);

            if score > alpha && reduced < new_depth {
                score = -search(board, ctx, -alpha - 1, -alpha, new_depth, ply + 1, !cut_node, false);
            }
        } else if !is_pv || move_count > 1 {
            score = -search(board, ctx, -alpha - 1, -alpha, new_depth, ply + 1, !cut_node, false);
        } else {
            score = alpha + 1; // force the PV search below
        }

        if is_pv && (move_count == 1 || score > alpha) {
            score = -search(board, ctx, -beta, -alpha, new_depth, ply + 1, false, true);
        }

        board.take_move();

        if ctx.should_stop() {
            return Eval::ZERO;
        }

        if score > best_value {
            best_value = score;
            best_move = mv;
        }

        if score > alpha {
            alpha = score;
        }

        if score >= beta {
            update_stats_on_cutoff(board, ctx, mv, &quiets_tried, &captures_tried, depth, ply);
            break;
        }

        if is_quiet {
            quiets_tried.push(mv);
        } else if let Some(piece) = moved_piece {
            let victim = if mv.is_en_passant() {
                PieceType::Pawn
            } else {
                board.pieces[mv.to()].map_or(PieceType::Pawn, Piece::piece_type)
            };
            captures_tried.push((mv, piece, victim));
        }
    }

    // (m) No moves at all: checkmate or stalemate, unless we were merely
    // excluding the singular candidate.
    if move_count == 0 {
        if excluded != Move::NONE {
            return alpha;
        }
        return if in_check { Eval::mated_in(ply) } else { draw_value(ctx.nodes) };
    }

    // (n) Store the result.
    if excluded.is_none() {
        let bound = if best_value >= beta {
            Bound::Lower
        } else if is_pv && !best_move.is_none() {
            Bound::Exact
        } else {
            Bound::Upper
        };
        let stored_move = if bound == Bound::Upper { tt_move } else { best_move };

        let (_, _, writer) = ctx.tt.probe(board.key);
        writer.save(
            board.key,
            value_to_tt(best_value, ply),
            tt_pv,
            bound,
            depth,
            stored_move,
            ctx.stack_at(ply).eval,
        );

        // Correction history: remember how far the static eval missed.
        let static_eval = ctx.stack_at(ply).eval;
        if !in_check
            && static_eval.is_valid()
            && !best_value.is_terminal()
            && (best_move.is_none() || !best_move.is_capture())
            && !(bound == Bound::Lower && best_value <= static_eval)
            && !(bound == Bound::Upper && best_value >= static_eval)
        {
            let diff = best_value - static_eval;
            let (color, pawn_key, minor_key, nonpawn_key) =
                (board.color, board.pawn_key, board.minor_key, board.nonpawn_key);
            ctx.history
                .correction_mut()
                .update(color, pawn_key, minor_key, nonpawn_key, diff, depth);
        }
    }

    best_value
}

fn update_stats_on_cutoff(
    board: &Board,
    ctx: &mut ABContext,
    best: Move,
    quiets_tried: &[Move],
    captures_tried: &[(Move, Piece, PieceType)],
    depth: i32,
    ply: usize,
) {
    let bonus = stat_bonus(depth);
    let malus = stat_malus(depth);
    let color = board.color;
    let prevs = [
        if ply >= 1 { ctx.stack_at(ply - 1).moved } else { None },
        if ply >= 2 { ctx.stack_at(ply - 2).moved } else { None },
    ];

    if !best.is_capture() && best.promoted().is_none() {
        ctx.killers.store(ply, best);

        if let Some((prev_piece, _)) = prevs[0] {
            if let Some(prev_move) = board.last_move() {
                ctx.countermoves.store(prev_piece, prev_move.to(), best);
            }
        }

        let piece = board.pieces[best.from()];
        ctx.history.update_butterfly(color, best, bonus);
        if let Some(piece) = piece {
            ctx.history.update_pawn_history(board.pawn_key, piece, best.to(), bonus);
            for prev in prevs.iter().flatten() {
                ctx.history.update_continuation(*prev, piece, best.to(), bonus);
            }
        }

        // Quiets that failed to cut get the malus.
        for &mv in quiets_tried {
            ctx.history.update_butterfly(color, mv, malus);
            if let Some(piece) = board.pieces[mv.from()] {
                ctx.history.update_pawn_history(board.pawn_key, piece, mv.to(), malus);
                for prev in prevs.iter().flatten() {
                    ctx.history.update_continuation(*prev, piece, mv.to(), malus);
                }
            }
        }
    } else if let Some(piece) = board.pieces[best.from()] {
        let victim = if best.is_en_passant() {
            PieceType::Pawn
        } else {
            board.pieces[best.to()].map_or(PieceType::Pawn, Piece::piece_type)
        };
        ctx.history.update_capture(piece, best.to(), victim, bonus);
    }

    for &(mv, piece, victim) in captures_tried {
        if mv != best {
            ctx.history.update_capture(piece, mv.to(), victim, malus);
        }
    }
}

fn static_eval(board: &Board, ctx: &mut ABContext, _ply: usize) -> Eval {
    if board.in_check() {
        Eval::DRAW
    } else {
        let raw = ctx.evaluator.evaluate(board);
        (raw + ctx
            .history
            .correction()
            .apply(board.color, board.pawn_key, board.minor_key, board.nonpawn_key))
        .clamp_eval()
    }
}

fn quiescence(board: &mut Board, ctx: &mut ABContext, mut alpha: Eval, beta: Eval, ply: usize, is_pv: bool) -> Eval {
    ctx.count_node();
    ctx.sel_depth = ctx.sel_depth.max(ply as u32);

    if ctx.should_stop() {
        return Eval::ZERO;
    }

    if board.is_repetition() || board.halfmove_clock() >= 100 || board.is_draw_by_material() {
        return draw_value(ctx.nodes);
    }

    if ply >= MAX_PLY - 2 {
        return static_eval(board, ctx, ply);
    }

    let in_check = board.in_check();
    let qs_depth = if in_check { QS_DEPTH_CHECKS } else { QS_DEPTH_NO_CHECKS };

    let (tt_hit, tt_data, _) = ctx.tt.probe(board.key);
    let tt_value = if tt_hit { value_from_tt(tt_data.value, ply) } else { Eval::NONE };
    let tt_move = if tt_hit { tt_data.mv } else { Move::NONE };

    if !is_pv && tt_hit && tt_data.depth >= qs_depth && tt_value.is_valid() && tt_data.bound.cuts(tt_value, beta) {
        return tt_value;
    }

    let mut best_value = -Eval::INFINITE;
    let eval;

    if in_check {
        eval = Eval::NONE;
        ctx.stack_entry(ply).eval = Eval::NONE;
    } else {
        let raw = if tt_hit && tt_data.eval.is_valid() {
            tt_data.eval
        } else {
            ctx.evaluator.evaluate(board)
        };
        eval = (raw
            + ctx
                .history
                .correction()
                .apply(board.color, board.pawn_key, board.minor_key, board.nonpawn_key))
        .clamp_eval();
        ctx.stack_entry(ply).eval = eval;

        // Stand pat.
        best_value = eval;
        if best_value >= beta {
            if !tt_hit {
                let (_, _, writer) = ctx.tt.probe(board.key);
                writer.save(
                    board.key,
                    value_to_tt(best_value, ply),
                    false,
                    Bound::Lower,
                    qs_depth,
                    Move::NONE,
                    eval,
                );
            }
            return best_value;
        }
        if best_value > alpha {
            alpha = best_value;
        }
    }

    let mut picker = MovePicker::new_quiescence(tt_move, ctx.ordering_context(board, ply), in_check);
    let mut best_move = Move::NONE;
    let mut move_count = 0;

    while let Some(mv) = picker.next(board, &ctx.history) {
        // Delta pruning: even winning this capture cannot lift alpha.
        if !in_check && eval.is_valid() {
            let victim_value = if mv.is_en_passant() {
                PieceType::Pawn.value()
            } else {
                board.pieces[mv.to()].map_or(0, |p| p.value())
            };
            if eval + victim_value + 200 <= alpha && mv.promoted().is_none() {
                continue;
            }

            if !board.see_ge(mv, 0) {
                continue;
            }
        }

        if !board.make_move(mv) {
            continue;
        }
        move_count += 1;

        {
            let entry = ctx.stack_entry(ply);
            entry.current_move = mv;
            entry.moved = board.pieces[mv.to()].map(|p| (p, mv.to()));
        }

        let score = -quiescence(board, ctx, -beta, -alpha, ply + 1, is_pv);
        board.take_move();

        if ctx.should_stop() {
            return Eval::ZERO;
        }

        if score > best_value {
            best_value = score;
            best_move = mv;
        }
        if score > alpha {
            alpha = score;
        }
        if score >= beta {
            break;
        }
    }

    if in_check && move_count == 0 {
        return Eval::mated_in(ply);
    }

    let bound = if best_value >= beta { Bound::Lower } else { Bound::Upper };
    let (_, _, writer) = ctx.tt.probe(board.key);
    writer.save(
        board.key,
        value_to_tt(best_value, ply),
        false,
        bound,
        qs_depth,
        best_move,
        ctx.stack_at(ply).eval,
    );

    best_value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        eval::StandardEvaluator,
        hashtable::TranspositionTable,
        shashin::{ShashinConfig, ShashinManager},
        tb::NoTableBase,
        time_man::Limits,
        FEN_STARTPOS,
    };

    fn test_ctx(depth: u32) -> ABContext {
        ABContext::new(
            Limits::new().depth(Some(depth)).start_now(),
            Arc::new(TranspositionTable::new(8)),
            Arc::new(ShashinManager::new(ShashinConfig::default())),
            Arc::new(StandardEvaluator),
            Arc::new(NoTableBase),
            Arc::new(SharedCounters::default()),
            SearchHistory::default(),
            SearchKillers::default(),
            CounterMoves::default(),
        )
    }

    fn run(fen: &str, depth: u32) -> WorkerResult {
        let mut board = Board::from_fen(fen).unwrap();
        let mut ctx = test_ctx(depth);
        ctx.is_main = true;
        iterative_deepening(&mut board, &mut ctx, &mut |_, _| {})
    }

    #[test]
    fn finds_mate_in_one() {
        let result = run("6k1/5ppp/8/8/8/8/5PPP/R6K w - - 0 1", 3);
        assert_eq!(result.best_move.to_string(), "a1a8");
        assert!(result.score.is_mate());
        assert_eq!(result.score.mate_distance(), 1);
    }

    #[test]
    fn stalemate_yields_no_move() {
        let result = run("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1", 4);
        assert!(result.best_move.is_none());
        assert_eq!(result.score, Eval::DRAW);
    }

    #[test]
    fn checkmated_root_reports_mate_score() {
        let result = run("R5k1/5ppp/8/8/8/8/5PPP/7K b - - 0 1", 4);
        assert!(result.best_move.is_none());
        assert_eq!(result.score, Eval::mated_in(0));
    }

    #[test]
    fn grabs_a_hanging_queen() {
        let result = run("4k3/8/8/3q4/4P3/8/8/4K3 w - - 0 1", 5);
        assert_eq!(result.best_move.to_string(), "e4d5");
    }

    #[test]
    fn repetition_lines_score_as_draw() {
        let mut board = Board::from_fen(FEN_STARTPOS).unwrap();
        for text in ["g1f3", "g8f6", "f3g1", "f6g8", "g1f3", "g8f6", "f3g1", "f6g8"] {
            let mv = board.find_move(text).unwrap();
            assert!(board.make_move(mv));
        }
        board.ply = 0;

        let mut ctx = test_ctx(8);
        ctx.is_main = true;
        let result = iterative_deepening(&mut board, &mut ctx, &mut |_, _| {});
        // Threefold is on the board; the engine must not report an edge.
        assert!(result.score.inner().abs() <= 30, "score {}", result.score);
    }

    #[test]
    fn zugzwang_does_not_lose_the_pawn() {
        // King and pawn vs king; null-move pruning must not wreck this.
        let result = run("8/8/8/3k4/8/3K4/3P4/8 w - - 0 1", 12);
        assert!(!result.best_move.is_none());
        assert!(result.score >= Eval::new(-50), "score {}", result.score);
    }

    #[test]
    fn respects_searchmoves_filter() {
        let mut board = Board::from_fen(FEN_STARTPOS).unwrap();
        let only = board.find_move("a2a3").unwrap();

        let mut ctx = test_ctx(4);
        ctx.searchmoves = vec![only];
        let result = iterative_deepening(&mut board, &mut ctx, &mut |_, _| {});
        assert_eq!(result.best_move, only);
    }

    #[test]
    fn multipv_reports_distinct_moves() {
        let mut board = Board::from_fen(FEN_STARTPOS).unwrap();
        let mut ctx = test_ctx(5);
        ctx.multipv = 3;
        let result = iterative_deepening(&mut board, &mut ctx, &mut |_, _| {});

        assert!(result.root_moves.len() >= 3);
        let top: Vec<Move> = result.root_moves[..3].iter().map(|rm| rm.mv).collect();
        assert_ne!(top[0], top[1]);
        assert_ne!(top[1], top[2]);
        // Sorted best first.
        assert!(result.root_moves[0].score >= result.root_moves[1].score);
    }

    #[test]
    fn stop_flag_unwinds_quickly() {
        let mut board = Board::from_fen(FEN_STARTPOS).unwrap();
        let mut ctx = test_ctx(64);
        ctx.time_man.force_stop();

        let start = std::time::Instant::now();
        let _ = iterative_deepening(&mut board, &mut ctx, &mut |_, _| {});
        assert!(start.elapsed() < std::time::Duration::from_secs(2));
    }

    #[test]
    fn node_limit_is_respected() {
        let mut board = Board::from_fen(FEN_STARTPOS).unwrap();
        let mut ctx = ABContext::new(
            Limits::new().nodes(Some(20_000)).start_now(),
            Arc::new(TranspositionTable::new(8)),
            Arc::new(ShashinManager::new(ShashinConfig::default())),
            Arc::new(StandardEvaluator),
            Arc::new(NoTableBase),
            Arc::new(SharedCounters::default()),
            SearchHistory::default(),
            SearchKillers::default(),
            CounterMoves::default(),
        );
        let _ = iterative_deepening(&mut board, &mut ctx, &mut |_, _| {});
        // The cooperative check runs every 1024 nodes; allow that much slack.
        assert!(ctx.nodes < 20_000 + 4096, "nodes {}", ctx.nodes);
    }

    #[test]
    fn pv_starts_with_best_move() {
        let result = run("6k1/5ppp/8/8/8/8/5PPP/R6K w - - 0 1", 4);
        assert_eq!(result.root_moves[0].pv[0], result.best_move);
    }
}
