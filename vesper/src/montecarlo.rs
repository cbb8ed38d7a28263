//! Monte-Carlo tree search over a process-global tree keyed by Zobrist.
//! Transpositions share nodes (the tree is really a DAG); selection uses
//! UCB with virtual loss, expansion computes priors from shallow minimax
//! probes, and backups blend the sampled reward with the subtree minimax.

use crate::{
    board::{movegen::MoveList, Board},
    chess_move::Move,
    eval::Evaluator,
    search::{SharedCounters, WorkerResult},
    time_man::TimeMan,
};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use vesper_types::{Eval, Key, MAX_PLY};

/// Scores outside this window are treated as decided and excluded from
/// alpha-beta rollouts.
const KNOWN_WIN: i32 = 10_000;

const REWARD_MATED: f64 = 0.0;
const REWARD_DRAW: f64 = 0.5;

/// Logistic scale: +-600cp maps to a 0.95/0.05 win expectation.
const REWARD_K: f64 = -0.004_907_398_298_61;
const REWARD_G: f64 = 203.773_963_137_095_64;

pub fn value_to_reward(v: Eval) -> f64 {
    let r = 1.0 / (1.0 + (REWARD_K * v.inner() as f64).exp());
    debug_assert!((0.0..=1.0).contains(&r));
    r
}

pub fn reward_to_value(r: f64) -> Eval {
    if r > 0.99 {
        return Eval::new(KNOWN_WIN);
    }
    if r < 0.01 {
        return Eval::new(-KNOWN_WIN);
    }
    Eval::new((REWARD_G * (r / (1.0 - r)).ln()) as i32)
}

#[derive(Debug, Clone, Copy)]
pub struct Edge {
    pub mv: Move,
    pub visits: f64,
    pub prior: f64,
    pub action_value: f64,
    pub mean_action_value: f64,
}

#[derive(Debug, Default)]
pub struct NodeData {
    pub visits: u64,
    pub tt_value: Eval,
    /// Rollout depth, grown each time this node is re-selected.
    pub deep: i32,
    pub edges: Vec<Edge>,
    pub expanded: bool,
}

/// One tree node. The lock guards the mutable statistics; key pairs make
/// hash collisions detectable.
pub struct MctsNode {
    pub key: Key,
    pub pawn_key: Key,
    pub data: Mutex<NodeData>,
}

#[derive(Default)]
struct TreeIndex {
    nodes: Vec<Arc<MctsNode>>,
    by_key: HashMap<Key, SmallVec<[u32; 2]>>,
}

/// Process-global tree. A single insert lock serializes creation; node
/// statistics use their own per-node locks.
#[derive(Default)]
pub struct MctsTree {
    index: Mutex<TreeIndex>,
    descents: AtomicU64,
}

impl MctsTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.index.lock().nodes.len()
    }

    pub fn descents(&self) -> u64 {
        self.descents.load(Ordering::Relaxed)
    }

    /// Drops every node; called on `ucinewgame` and pool clear.
    pub fn clear(&self) {
        let mut index = self.index.lock();
        index.nodes.clear();
        index.by_key.clear();
        self.descents.store(0, Ordering::Relaxed);
    }

    /// Finds the node for the position, optionally creating it. Lookup
    /// collides only on genuine transpositions because both keys match.
    pub fn get_node(&self, board: &Board, create: bool) -> Option<Arc<MctsNode>> {
        let mut index = self.index.lock();

        if let Some(ids) = index.by_key.get(&board.key) {
            for &id in ids {
                let node = &index.nodes[id as usize];
                if node.key == board.key && node.pawn_key == board.pawn_key {
                    return Some(Arc::clone(node));
                }
            }
        }

        if !create {
            return None;
        }

        let node = Arc::new(MctsNode {
            key: board.key,
            pawn_key: board.pawn_key,
            data: Mutex::new(NodeData {
                tt_value: Eval::NONE,
                deep: 1,
                ..NodeData::default()
            }),
        });

        let id = index.nodes.len() as u32;
        index.nodes.push(Arc::clone(&node));
        index.by_key.entry(board.key).or_default().push(id);
        Some(node)
    }
}

/// Exploration parameters, defaults after the classical tuning.
#[derive(Debug, Clone)]
pub struct MctsParams {
    pub max_descents: u64,
    pub backup_minimax: f64,
    pub prior_depth: i32,
    pub ucb_unexpanded: f64,
    pub exploration: f64,
    pub losses_avoidance: f64,
    pub log_term_factor: f64,
    pub use_father_visits: bool,
    pub multi_min_visits: f64,
    /// Cap on the deepening alpha-beta rollout probes.
    pub max_rollout_depth: i32,
    /// More than one MCTS worker shares the tree.
    pub multi: bool,
}

impl Default for MctsParams {
    fn default() -> Self {
        Self {
            max_descents: u64::MAX,
            backup_minimax: 1.0,
            prior_depth: 1,
            ucb_unexpanded: 1.0,
            exploration: 1.0,
            losses_avoidance: 1.0,
            log_term_factor: 0.0,
            use_father_visits: true,
            multi_min_visits: 5.0,
            max_rollout_depth: 3,
            multi: false,
        }
    }
}

/// Upper confidence bound for one edge out of a node with `father_visits`.
pub fn ucb(params: &MctsParams, father_visits: u64, edge: &Edge) -> f64 {
    debug_assert!(father_visits > 0);

    let visited_enough = if params.multi {
        edge.visits > params.multi_min_visits
    } else {
        edge.visits > 0.0
    };

    let mut result = if visited_enough {
        edge.mean_action_value
    } else {
        params.ucb_unexpanded
    };

    let c = if params.use_father_visits {
        params.exploration * (father_visits as f64).sqrt()
    } else {
        params.exploration
    };

    let losses = edge.visits - edge.action_value;
    let divisor = losses * params.losses_avoidance + edge.visits * (1.0 - params.losses_avoidance);
    result += c * edge.prior / (1.0 + divisor);

    result += params.log_term_factor * ((father_visits as f64).ln() / (1.0 + edge.visits)).sqrt();

    result
}

pub struct MctsContext {
    pub tree: Arc<MctsTree>,
    pub time_man: TimeMan,
    pub evaluator: Arc<dyn Evaluator>,
    pub counters: Arc<SharedCounters>,
    pub params: MctsParams,
    pub is_main: bool,
    pub nodes: u64,
    maximum_ply: usize,
    last_output: Duration,
}

impl MctsContext {
    pub fn new(
        tree: Arc<MctsTree>,
        time_man: TimeMan,
        evaluator: Arc<dyn Evaluator>,
        counters: Arc<SharedCounters>,
        params: MctsParams,
    ) -> Self {
        Self {
            tree,
            time_man,
            evaluator,
            counters,
            params,
            is_main: false,
            nodes: 0,
            maximum_ply: 0,
            last_output: Duration::ZERO,
        }
    }

    fn count_node(&mut self) {
        self.nodes += 1;
        self.counters.nodes.fetch_add(1, Ordering::Relaxed);
    }
}

/// Fixed-depth fail-soft negamax used for edge priors and AB rollouts.
/// No table, no pruning beyond the window; depth stays tiny.
pub fn minimax_value(
    board: &mut Board,
    evaluator: &dyn Evaluator,
    depth: i32,
    mut alpha: Eval,
    beta: Eval,
) -> Eval {
    if board.is_repetition() || board.halfmove_clock() >= 100 || board.is_draw_by_material() {
        return Eval::DRAW;
    }

    if depth <= 0 || board.ply >= MAX_PLY - 2 {
        return evaluator.evaluate(board);
    }

    let mut list = MoveList::new();
    board.generate_all_moves(&mut list);

    let mut best = -Eval::INFINITE;
    let mut any_legal = false;

    for mv in list {
        if !board.make_move(mv) {
            continue;
        }
        any_legal = true;
        let score = -minimax_value(board, evaluator, depth - 1, -beta, -alpha);
        board.take_move();

        best = best.max(score);
        alpha = alpha.max(score);
        if alpha >= beta {
            break;
        }
    }

    if !any_legal {
        return if board.in_check() { Eval::mated_in(board.ply) } else { Eval::DRAW };
    }

    best
}

/// Reward of a position with no tree below it: mate, stalemate and the
/// rule draws.
fn evaluate_terminal(board: &mut Board) -> Option<f64> {
    if board.is_repetition() || board.halfmove_clock() >= 100 || board.is_draw_by_material() {
        return Some(REWARD_DRAW);
    }
    if board.ply >= MAX_PLY - 4 {
        return Some(REWARD_DRAW);
    }
    if !board.has_legal_moves() {
        return Some(if board.in_check() { REWARD_MATED } else { REWARD_DRAW });
    }
    None
}

/// Expands a leaf: every legal move gets a prior from a shallow minimax
/// probe, sorted best first. Returns the rollout reward (the best prior).
fn expand(board: &mut Board, ctx: &mut MctsContext, node: &MctsNode) -> f64 {
    let mut list = MoveList::new();
    board.generate_all_moves(&mut list);

    let mut edges = Vec::with_capacity(list.len());
    let mut best_prior = REWARD_MATED;
    let mut best_value = -Eval::INFINITE;

    for mv in list {
        if !board.make_move(mv) {
            continue;
        }
        ctx.count_node();
        let value = -minimax_value(
            board,
            &*ctx.evaluator,
            ctx.params.prior_depth,
            -Eval::INFINITE,
            Eval::INFINITE,
        );
        board.take_move();

        let prior = value_to_reward(value);
        if prior > best_prior {
            best_prior = prior;
            best_value = value;
        }

        edges.push(Edge {
            mv,
            visits: 0.0,
            prior,
            action_value: 0.0,
            mean_action_value: 0.0,
        });
    }

    edges.sort_by(|a, b| b.prior.partial_cmp(&a.prior).unwrap_or(std::cmp::Ordering::Equal));

    let mut data = node.data.lock();
    if !data.expanded {
        data.edges = edges;
        data.expanded = true;
        data.tt_value = best_value;
    }
    data.visits = data.visits.max(1);

    best_prior
}

struct DescentStep {
    node: Arc<MctsNode>,
    edge_mv: Move,
}

/// One select-expand-rollout-backup pass from the root.
fn descend(board: &mut Board, ctx: &mut MctsContext, root: &Arc<MctsNode>) {
    ctx.tree.descents.fetch_add(1, Ordering::Relaxed);

    let mut path: Vec<DescentStep> = Vec::new();
    let mut current = Arc::clone(root);
    let mut ab_rollout = false;
    let mut ply = 0usize;

    // Selection with virtual loss.
    loop {
        if evaluate_terminal(board).is_some() {
            break;
        }

        let selected = {
            let mut data = current.data.lock();

            if !data.expanded || data.visits == 0 || data.edges.is_empty() {
                break;
            }

            // Interior nodes below the root are re-searched with a
            // deepening alpha-beta probe instead of walking further down.
            let in_window = data.tt_value.is_valid() && data.tt_value.inner().abs() < KNOWN_WIN;
            let multi_ok = !ctx.params.multi || data.edges.len() > 5;
            let deep_cap = ctx.params.max_rollout_depth.min((MAX_PLY - ply - 4) as i32);
            if ply > 0 && in_window && multi_ok && data.deep < deep_cap {
                data.deep += 1;
                ab_rollout = true;
                break;
            }

            let father_visits = data.visits.max(1);
            let mut best = 0usize;
            let mut best_ucb = f64::NEG_INFINITY;
            for (i, edge) in data.edges.iter().enumerate() {
                let u = ucb(&ctx.params, father_visits, edge);
                if u > best_ucb {
                    best_ucb = u;
                    best = i;
                }
            }

            data.visits += 1;
            let edge = &mut data.edges[best];
            // Virtual loss: the visit is counted before the result exists
            // so parallel descents spread over different branches.
            edge.visits += 1.0;
            edge.mean_action_value = edge.action_value / edge.visits;
            edge.mv
        };

        if !board.make_move(selected) {
            // A stale edge from a key collision. Abandon the descent,
            // rolling the board and every virtual loss back, including the
            // one just placed on the current node.
            let revert = |node: &MctsNode, mv: Move| {
                let mut data = node.data.lock();
                data.visits = data.visits.saturating_sub(1);
                if let Some(edge) = data.edges.iter_mut().find(|e| e.mv == mv) {
                    edge.visits = (edge.visits - 1.0).max(0.0);
                    if edge.visits > 0.0 {
                        edge.mean_action_value = edge.action_value / edge.visits;
                    }
                }
            };

            revert(&current, selected);
            for step in path.iter().rev() {
                board.take_move();
                revert(&step.node, step.edge_mv);
            }
            return;
        }
        ctx.count_node();
        ply += 1;
        ctx.maximum_ply = ctx.maximum_ply.max(ply);

        path.push(DescentStep {
            node: Arc::clone(&current),
            edge_mv: selected,
        });

        current = ctx
            .tree
            .get_node(board, true)
            .expect("create mode always returns a node");
    }

    // Leaf evaluation.
    let reward = if ab_rollout {
        let deep = current.data.lock().deep;
        let depth = deep.min((MAX_PLY - ply - 2) as i32).max(1);
        let mut value = minimax_value(board, &*ctx.evaluator, depth, -Eval::INFINITE, Eval::INFINITE);

        if value == Eval::ZERO {
            value = current.data.lock().tt_value;
        }
        if value.inner() >= KNOWN_WIN {
            value = Eval::new(KNOWN_WIN - deep - ply as i32);
        } else if value.inner() <= -KNOWN_WIN {
            value = Eval::new(-(KNOWN_WIN - deep - ply as i32));
        }

        current.data.lock().tt_value = value;
        value_to_reward(value)
    } else if let Some(terminal) = evaluate_terminal(board) {
        let mut data = current.data.lock();
        data.visits = data.visits.max(1);
        terminal
    } else {
        expand(board, ctx, &current)
    };

    backup(board, ctx, &path, reward, ab_rollout);
}

/// Walks the path back to the root, converting the virtual loss into a
/// real visit and blending each level with its subtree minimax.
fn backup(board: &mut Board, ctx: &mut MctsContext, path: &[DescentStep], mut reward: f64, mut ab_mode: bool) {
    for step in path.iter().rev() {
        board.take_move();
        reward = 1.0 - reward;

        let minimax = {
            let mut data = step.node.data.lock();
            let edge = data
                .edges
                .iter_mut()
                .find(|e| e.mv == step.edge_mv)
                .expect("edge chosen during descent");

            if ab_mode {
                edge.prior = reward;
                ab_mode = false;
            }

            // Convert the virtual loss into the real outcome.
            edge.visits -= 1.0;
            edge.visits += 1.0;
            edge.action_value += reward;
            edge.mean_action_value = edge.action_value / edge.visits;
            debug_assert!(edge.visits >= 1.0);
            debug_assert!((0.0..=1.0).contains(&edge.mean_action_value));

            data.edges
                .iter()
                .map(|e| e.mean_action_value)
                .fold(f64::NEG_INFINITY, f64::max)
        };

        reward = reward * (1.0 - ctx.params.backup_minimax) + minimax * ctx.params.backup_minimax;
    }
}

/// Output backoff: every 100ms in the first second, then progressively
/// rarer down to once a minute.
fn should_output(elapsed: Duration, since_last: Duration) -> bool {
    let e = elapsed.as_millis();
    let d = since_last.as_millis();

    if e < 1_100 {
        d >= 100
    } else if e < 11_000 {
        d >= 1_000
    } else if e < 61_000 {
        d >= 10_000
    } else if e < 6 * 60_000 {
        d >= 30_000
    } else {
        d >= 60_000
    }
}

/// Root edges ordered for final selection: robust-choice single-threaded,
/// raw prior when several workers share the tree.
fn ranked_root_edges(ctx: &MctsContext, root: &MctsNode) -> Vec<Edge> {
    let data = root.data.lock();
    let mut edges = data.edges.clone();

    if ctx.params.multi {
        edges.sort_by(|a, b| b.prior.partial_cmp(&a.prior).unwrap_or(std::cmp::Ordering::Equal));
    } else {
        let robust = |e: &Edge| 10.0 * e.visits + e.prior;
        edges.sort_by(|a, b| robust(b).partial_cmp(&robust(a)).unwrap_or(std::cmp::Ordering::Equal));
    }

    edges
}

/// Extracts the most-visited line below `mv` for the PV display.
fn tree_pv(board: &mut Board, ctx: &MctsContext, first: Move, max_len: usize) -> Vec<Move> {
    let mut pv = vec![first];
    let mut made = 0;

    if !board.make_move(first) {
        return pv;
    }
    made += 1;

    while pv.len() < max_len {
        let Some(node) = ctx.tree.get_node(board, false) else { break };
        let next = {
            let data = node.data.lock();
            data.edges
                .iter()
                .max_by(|a, b| a.visits.partial_cmp(&b.visits).unwrap_or(std::cmp::Ordering::Equal))
                .map(|e| e.mv)
        };

        let Some(next) = next else { break };
        if next.is_none() || !board.make_move(next) {
            break;
        }
        made += 1;
        pv.push(next);
    }

    for _ in 0..made {
        board.take_move();
    }
    pv
}

/// Root moves in UCI shape so the one reporting path serves both search
/// modes.
fn root_moves_snapshot(board: &mut Board, ctx: &MctsContext, root: &MctsNode) -> Vec<crate::search::RootMove> {
    let edges = ranked_root_edges(ctx, root);
    let mut out = Vec::with_capacity(edges.len());

    for (i, edge) in edges.iter().enumerate() {
        let score = reward_to_value(edge.mean_action_value);
        let pv = if i == 0 {
            tree_pv(board, ctx, edge.mv, 16)
        } else {
            vec![edge.mv]
        };

        out.push(crate::search::RootMove {
            mv: edge.mv,
            score,
            previous_score: score,
            sel_depth: ctx.maximum_ply as u32,
            pv,
        });
    }

    out
}

pub type MctsReportFn<'a> = dyn FnMut(&Board, &MctsContext, &[crate::search::RootMove]) + 'a;

/// Runs descents until the budget runs out, emitting the PV with backoff
/// from the main worker only.
pub fn mcts_search(board: &mut Board, ctx: &mut MctsContext, report: &mut MctsReportFn) -> WorkerResult {
    let Some(root) = ctx.tree.get_node(board, true) else {
        unreachable!("create mode always returns a node");
    };

    // First visit expands the root so there is always a move to return.
    if !root.data.lock().expanded {
        if evaluate_terminal(board).is_some() {
            return WorkerResult {
                best_move: Move::NONE,
                ponder_move: Move::NONE,
                score: if board.in_check() { Eval::mated_in(0) } else { Eval::DRAW },
                completed_depth: 0,
                root_moves: Vec::new(),
            };
        }
        expand(board, ctx, &root);
    }

    while ctx.tree.descents() < ctx.params.max_descents {
        // A descent costs hundreds of nodes, so a real clock check each
        // time is cheap enough.
        if ctx.time_man.stop(ctx.nodes, false) {
            break;
        }

        descend(board, ctx, &root);

        if ctx.is_main {
            let elapsed = ctx.time_man.elapsed();
            if should_output(elapsed, elapsed.saturating_sub(ctx.last_output)) {
                ctx.last_output = elapsed;
                let snapshot = root_moves_snapshot(board, ctx, &root);
                if !snapshot.is_empty() {
                    report(board, ctx, &snapshot);
                }
            }
        }
    }

    let root_moves = root_moves_snapshot(board, ctx, &root);
    if ctx.is_main && !root_moves.is_empty() {
        report(board, ctx, &root_moves);
    }

    match root_moves.first() {
        Some(best) => WorkerResult {
            best_move: best.mv,
            ponder_move: best.pv.get(1).copied().unwrap_or(Move::NONE),
            score: best.score,
            completed_depth: ctx.maximum_ply as u32,
            root_moves,
        },
        None => WorkerResult {
            best_move: Move::NONE,
            ponder_move: Move::NONE,
            score: if board.in_check() { Eval::mated_in(0) } else { Eval::DRAW },
            completed_depth: 0,
            root_moves: Vec::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{eval::StandardEvaluator, time_man::Limits, FEN_STARTPOS};

    fn test_ctx(tree: Arc<MctsTree>, nodes: u64) -> MctsContext {
        MctsContext::new(
            tree,
            Limits::new().nodes(Some(nodes)).start_now(),
            Arc::new(StandardEvaluator),
            Arc::new(SharedCounters::default()),
            MctsParams::default(),
        )
    }

    #[test]
    fn reward_round_trip_is_monotone() {
        assert!(value_to_reward(Eval::new(600)) > 0.94);
        assert!(value_to_reward(Eval::new(-600)) < 0.06);
        assert!((value_to_reward(Eval::ZERO) - 0.5).abs() < 1e-9);

        let mut last = -1.0;
        for v in (-800..=800).step_by(100) {
            let r = value_to_reward(Eval::new(v));
            assert!(r > last);
            last = r;
        }

        for v in [-400, -50, 0, 50, 400] {
            let back = reward_to_value(value_to_reward(Eval::new(v)));
            assert!((back.inner() - v).abs() <= 2, "{v} -> {back}");
        }
    }

    #[test]
    fn ucb_is_bounded_and_monotone_in_mean() {
        let params = MctsParams::default();
        let mk = |mean: f64, visits: f64| Edge {
            mv: Move::NONE,
            visits,
            prior: 0.6,
            action_value: mean * visits,
            mean_action_value: mean,
        };

        for father in [1u64, 10, 1000] {
            let bound = 1.0 + params.exploration * (father as f64).sqrt()
                + params.log_term_factor * (father as f64).ln().max(0.0).sqrt();
            for mean in [0.0, 0.3, 0.9] {
                let u = ucb(&params, father, &mk(mean, 5.0));
                assert!(u <= bound + 1e-9, "u {u} bound {bound}");
            }

            let low = ucb(&params, father, &mk(0.2, 5.0));
            let high = ucb(&params, father, &mk(0.8, 5.0));
            assert!(high > low);
        }
    }

    #[test]
    fn nodes_are_shared_across_transpositions() {
        let tree = MctsTree::new();
        let board = Board::from_fen(FEN_STARTPOS).unwrap();

        let a = tree.get_node(&board, true).unwrap();
        let b = tree.get_node(&board, true).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(tree.node_count(), 1);

        tree.clear();
        assert_eq!(tree.node_count(), 0);
    }

    #[test]
    fn backup_keeps_mean_consistent() {
        let tree = Arc::new(MctsTree::new());
        let mut board = Board::from_fen(FEN_STARTPOS).unwrap();
        let mut ctx = test_ctx(Arc::clone(&tree), 40_000);

        let root = tree.get_node(&board, true).unwrap();
        expand(&mut board, &mut ctx, &root);

        for _ in 0..200 {
            descend(&mut board, &mut ctx, &root);
        }

        let data = root.data.lock();
        for edge in &data.edges {
            if edge.visits > 0.0 {
                assert!((edge.mean_action_value - edge.action_value / edge.visits).abs() < 1e-9);
                assert!(edge.visits >= 1.0);
                assert!((0.0..=1.0).contains(&edge.mean_action_value));
            }
        }
        assert!(data.visits > 0);
    }

    #[test]
    fn finds_the_obvious_recapture() {
        let tree = Arc::new(MctsTree::new());
        let mut board = Board::from_fen("4k3/8/8/3q4/4P3/8/8/4K3 w - - 0 1").unwrap();
        let mut ctx = test_ctx(tree, 60_000);
        ctx.is_main = false;

        let result = mcts_search(&mut board, &mut ctx, &mut |_, _, _| {});
        assert_eq!(result.best_move.to_string(), "e4d5");
    }

    #[test]
    fn mate_position_returns_null_result() {
        let tree = Arc::new(MctsTree::new());
        let mut board = Board::from_fen("R5k1/5ppp/8/8/8/8/5PPP/7K b - - 0 1").unwrap();
        let mut ctx = test_ctx(tree, 1_000);

        let result = mcts_search(&mut board, &mut ctx, &mut |_, _, _| {});
        assert!(result.best_move.is_none());
        assert_eq!(result.score, Eval::mated_in(0));
    }

    #[test]
    fn output_backoff_schedule() {
        let ms = Duration::from_millis;
        assert!(should_output(ms(500), ms(150)));
        assert!(!should_output(ms(500), ms(50)));
        assert!(!should_output(ms(5_000), ms(500)));
        assert!(should_output(ms(5_000), ms(1_500)));
        assert!(!should_output(ms(30_000), ms(5_000)));
        assert!(should_output(ms(30_000), ms(15_000)));
    }
}
