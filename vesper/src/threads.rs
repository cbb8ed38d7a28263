//! Lazy-SMP worker pool: one main worker that reports and decides, plus
//! supporters that feed the shared transposition table. Control flows over
//! mpsc channels; cancellation is one shared atomic flag.

use crate::{
    board::Board,
    chess_move::Move,
    eval::Evaluator,
    experience::{ExperienceStore, LearningMove},
    hashtable::TranspositionTable,
    montecarlo::{mcts_search, MctsContext, MctsParams, MctsTree},
    search::{
        history::SearchHistory,
        iterative_deepening,
        killers::{CounterMoves, SearchKillers},
        ABContext, RootMove, SharedCounters, WorkerResult,
    },
    shashin::ShashinManager,
    tb::TableBase,
    time_man::TimeMan,
    uci::score_to_uci,
    wdl,
};
use parking_lot::{Condvar, Mutex};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc::{Receiver, Sender},
    Arc,
};
use std::thread::JoinHandle;
use vesper_types::Eval;
use vesper_uci as uci_proto;

/// Everything one `go` needs, cloned per worker.
#[derive(Clone)]
pub struct SearchJob {
    pub board: Board,
    pub time_man: TimeMan,
    pub multipv: usize,
    pub searchmoves: Vec<Move>,
    pub show_wdl: bool,
    pub use_mcts: bool,
    pub mcts_threads: usize,
    pub tt: Arc<TranspositionTable>,
    pub shashin: Arc<ShashinManager>,
    pub experience: Arc<ExperienceStore>,
    pub evaluator: Arc<dyn Evaluator>,
    pub tablebase: Arc<dyn TableBase>,
}

enum Message {
    Search(Box<SearchJob>, usize, Arc<Rendezvous>),
    Clear(Sender<()>),
    Quit,
}

/// Meeting point where workers deposit results; the main worker waits for
/// everyone before it announces the best move.
struct Rendezvous {
    results: Mutex<Vec<WorkerResult>>,
    all_done: Condvar,
    expected: usize,
    counters: Arc<SharedCounters>,
    searching: Arc<AtomicBool>,
}

impl Rendezvous {
    fn deposit(&self, result: WorkerResult) {
        let mut results = self.results.lock();
        results.push(result);
        if results.len() == self.expected {
            self.all_done.notify_all();
        }
    }

    fn wait_all(&self) -> Vec<WorkerResult> {
        let mut results = self.results.lock();
        while results.len() < self.expected {
            self.all_done.wait(&mut results);
        }
        results.clone()
    }
}

pub struct ThreadPool {
    workers: Vec<(JoinHandle<()>, Sender<Message>)>,
    tt: Arc<TranspositionTable>,
    mcts: Arc<MctsTree>,
    counters: Arc<SharedCounters>,
    searching: Arc<AtomicBool>,
    active_stop: Option<Arc<AtomicBool>>,
}

impl ThreadPool {
    pub fn new(threads: usize, tt: Arc<TranspositionTable>) -> Self {
        let mut pool = Self {
            workers: Vec::new(),
            tt,
            mcts: Arc::new(MctsTree::new()),
            counters: Arc::new(SharedCounters::default()),
            searching: Arc::new(AtomicBool::new(false)),
            active_stop: None,
        };
        pool.set(threads);
        pool
    }

    /// Resizes the pool. Blocks until any running search is done first.
    pub fn set(&mut self, threads: usize) {
        let threads = threads.clamp(1, 1024);
        self.wait_for_search_finished();
        self.shutdown_workers();

        let mcts = Arc::clone(&self.mcts);
        self.workers = (0..threads)
            .map(|_| {
                let mcts = Arc::clone(&mcts);
                let (tx, rx) = std::sync::mpsc::channel();
                let handle = std::thread::spawn(move || worker_loop(rx, mcts));
                (handle, tx)
            })
            .collect();
    }

    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    pub fn nodes_searched(&self) -> u64 {
        self.counters.nodes.load(Ordering::Relaxed)
    }

    pub fn tb_hits(&self) -> u64 {
        self.counters.tb_hits.load(Ordering::Relaxed)
    }

    pub fn counters(&self) -> Arc<SharedCounters> {
        Arc::clone(&self.counters)
    }

    pub fn mcts_tree(&self) -> Arc<MctsTree> {
        Arc::clone(&self.mcts)
    }

    pub fn is_searching(&self) -> bool {
        self.searching.load(Ordering::Acquire)
    }

    /// Kicks off a search on every worker and returns immediately; the
    /// main worker prints `bestmove` when it is done.
    pub fn start_thinking(&mut self, job: SearchJob) {
        self.wait_for_search_finished();

        self.counters.nodes.store(0, Ordering::Relaxed);
        self.counters.tb_hits.store(0, Ordering::Relaxed);
        self.tt.new_search();
        self.searching.store(true, Ordering::Release);
        self.active_stop = Some(job.time_man.raw_stop_flag());

        let rendezvous = Arc::new(Rendezvous {
            results: Mutex::new(Vec::new()),
            all_done: Condvar::new(),
            expected: self.workers.len(),
            counters: Arc::clone(&self.counters),
            searching: Arc::clone(&self.searching),
        });

        for (id, (_, tx)) in self.workers.iter().enumerate() {
            let _ = tx.send(Message::Search(Box::new(job.clone()), id, Arc::clone(&rendezvous)));
        }
    }

    /// Cooperative stop; workers notice within their node-check cadence.
    pub fn stop(&mut self) {
        if let Some(stop) = &self.active_stop {
            stop.store(true, Ordering::Relaxed);
        }
    }

    pub fn wait_for_search_finished(&self) {
        while self.is_searching() {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
    }

    /// Clears worker histories, the shared table and the MCTS tree. The
    /// table is zeroed in parallel chunks, one per worker.
    pub fn clear(&mut self) {
        self.wait_for_search_finished();

        let chunks = self.workers.len();
        let tt = Arc::clone(&self.tt);
        std::thread::scope(|scope| {
            for chunk in 0..chunks {
                let tt = Arc::clone(&tt);
                scope.spawn(move || tt.clear_range(chunk, chunks));
            }
        });
        self.tt.reset_generation();

        self.mcts.clear();

        let acks: Vec<Receiver<()>> = self
            .workers
            .iter()
            .map(|(_, tx)| {
                let (ack_tx, ack_rx) = std::sync::mpsc::channel();
                let _ = tx.send(Message::Clear(ack_tx));
                ack_rx
            })
            .collect();
        for ack in acks {
            let _ = ack.recv();
        }
    }

    /// Swaps in a fresh transposition table (the `Hash` option changed).
    pub fn set_tt(&mut self, tt: Arc<TranspositionTable>) {
        self.wait_for_search_finished();
        self.tt = tt;
    }

    fn shutdown_workers(&mut self) {
        for (handle, tx) in self.workers.drain(..) {
            let _ = tx.send(Message::Quit);
            let _ = handle.join();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if let Some(stop) = &self.active_stop {
            stop.store(true, Ordering::Relaxed);
        }
        self.wait_for_search_finished();
        self.shutdown_workers();
    }
}

fn worker_loop(rx: Receiver<Message>, mcts: Arc<MctsTree>) {
    // Histories persist across searches within a game; `ucinewgame`
    // resets them through the Clear message.
    let mut history = SearchHistory::default();
    let mut killers = SearchKillers::default();
    let mut countermoves = CounterMoves::default();

    loop {
        match rx.recv() {
            Ok(Message::Search(job, id, rendezvous)) => {
                run_search(
                    *job,
                    id,
                    &rendezvous,
                    Arc::clone(&mcts),
                    &mut history,
                    &mut killers,
                    &mut countermoves,
                );
            }
            Ok(Message::Clear(ack)) => {
                history.clear();
                killers.clear();
                countermoves.clear();
                let _ = ack.send(());
            }
            Ok(Message::Quit) | Err(_) => break,
        }
    }
}

fn run_search(
    job: SearchJob,
    id: usize,
    rendezvous: &Rendezvous,
    mcts: Arc<MctsTree>,
    history: &mut SearchHistory,
    killers: &mut SearchKillers,
    countermoves: &mut CounterMoves,
) {
    let is_main = id == 0;
    let mut board = job.board.clone();
    board.ply = 0;

    // The MCTS option fans out the first `MCTSThreads` workers onto the
    // shared tree; any remaining workers stay on alpha-beta and keep the
    // transposition table warm.
    let runs_mcts = job.use_mcts && id < job.mcts_threads.max(1);

    let result = if runs_mcts {
        let params = MctsParams {
            multi: job.mcts_threads > 1,
            max_descents: depth_as_descents(&job.time_man).unwrap_or(u64::MAX),
            ..MctsParams::default()
        };

        let mut ctx = MctsContext::new(
            mcts,
            job.time_man.clone(),
            Arc::clone(&job.evaluator),
            rendezvous.counters.clone(),
            params,
        );
        ctx.is_main = is_main;

        let show_wdl = job.show_wdl;
        let tt = Arc::clone(&job.tt);
        mcts_search(&mut board, &mut ctx, &mut |b, c, root_moves| {
            emit_mcts_info(b, c, root_moves, show_wdl, &tt);
        })
    } else {
        let mut ctx = ABContext::new(
            job.time_man.clone(),
            Arc::clone(&job.tt),
            Arc::clone(&job.shashin),
            Arc::clone(&job.evaluator),
            Arc::clone(&job.tablebase),
            rendezvous.counters.clone(),
            std::mem::take(history),
            std::mem::take(killers),
            std::mem::take(countermoves),
        );
        ctx.is_main = is_main;
        ctx.multipv = job.multipv;
        ctx.searchmoves = job.searchmoves.clone();

        let show_wdl = job.show_wdl;
        let result = iterative_deepening(&mut board, &mut ctx, &mut |b, c| {
            emit_ab_info(b, c, show_wdl);
        });

        // Supporters keep feeding the shared table until the stop flag
        // falls; the main worker decides when that is.
        if !is_main {
            let mut tm = ctx.time_man.clone();
            while !tm.stop(ctx.nodes, false) {
                let _ = iterative_deepening(&mut board, &mut ctx, &mut |_, _| {});
            }
        }

        *history = ctx.history;
        *killers = ctx.killers;
        *countermoves = ctx.countermoves;
        result
    };

    if is_main {
        finish_main(&board, &job, result, rendezvous);
    } else {
        rendezvous.deposit(result);
    }
}

/// `go depth N` in MCTS mode bounds the number of descents instead.
fn depth_as_descents(time_man: &TimeMan) -> Option<u64> {
    let depth = time_man.depth_limit();
    if depth == u32::MAX {
        None
    } else {
        Some(depth as u64 * 100_000)
    }
}

fn rendezvous_deposit_and_wait(rendezvous: &Rendezvous, result: WorkerResult) -> Vec<WorkerResult> {
    rendezvous.deposit(result);
    rendezvous.wait_all()
}

fn finish_main(board: &Board, job: &SearchJob, own: WorkerResult, rendezvous: &Rendezvous) {
    let mut tm = job.time_man.clone();
    wait_for_ponder(&mut tm);
    tm.force_stop();

    let all = rendezvous_deposit_and_wait(rendezvous, own.clone());

    // In MCTS mode the tree's robust-choice already is the decision;
    // alpha-beta results are combined by the weighted vote instead.
    let chosen = if job.use_mcts && !own.best_move.is_none() {
        own
    } else {
        vote_best(&all).unwrap_or(own)
    };

    // Self-learning: remember what this search concluded about the root.
    if job.experience.is_enabled()
        && !job.experience.is_read_only()
        && !chosen.best_move.is_none()
        && chosen.completed_depth > 0
    {
        let material = board.wdl_material();
        job.experience.add_new_learning(
            board.key,
            LearningMove {
                depth: chosen.completed_depth as i32,
                score: chosen.score,
                mv: chosen.best_move,
                performance: wdl::win_probability(chosen.score, material) as i32,
            },
        );
    }

    // A root with no legal moves still reports its mate or stalemate
    // score before the null bestmove.
    if chosen.best_move.is_none() {
        let info = uci_proto::Info {
            depth: Some(0),
            score: Some(score_to_uci(chosen.score)),
            ..uci_proto::Info::default()
        };
        println!("{}", uci_proto::EngineMessage::Info(info));
    }

    announce(&chosen);
    rendezvous.searching.store(false, Ordering::Release);
}

fn announce(result: &WorkerResult) {
    let ponder = if result.ponder_move.is_none() {
        None
    } else {
        Some(result.ponder_move.to_string())
    };

    println!(
        "{}",
        uci_proto::EngineMessage::Bestmove {
            mv: result.best_move.to_string(),
            ponder,
        }
    );
}

/// While pondering or in `go infinite`, the result is kept back until the
/// GUI converts the search with `ponderhit` or aborts it with `stop`.
fn wait_for_ponder(tm: &mut TimeMan) {
    let stop = tm.raw_stop_flag();
    while (tm.is_pondering() || tm.is_infinite()) && !stop.load(Ordering::Relaxed) {
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
}

/// Majority vote over worker results, weighted by score margin and depth.
/// A deeper disagreeing worker can overrule the main thread.
fn vote_best(results: &[WorkerResult]) -> Option<WorkerResult> {
    let candidates: Vec<&WorkerResult> = results.iter().filter(|r| !r.best_move.is_none()).collect();
    if candidates.is_empty() {
        return None;
    }

    let min_score = candidates.iter().map(|r| r.score.inner()).min().unwrap_or(0);

    let mut votes: Vec<(Move, i64)> = Vec::new();
    for r in &candidates {
        let weight = (r.score.inner() - min_score + 14) as i64 * r.completed_depth as i64;
        match votes.iter_mut().find(|(mv, _)| *mv == r.best_move) {
            Some((_, v)) => *v += weight,
            None => votes.push((r.best_move, weight)),
        }
    }

    let (winner, _) = votes.into_iter().max_by_key(|(_, v)| *v)?;
    candidates
        .into_iter()
        .filter(|r| r.best_move == winner)
        .max_by_key(|r| (r.completed_depth, r.score.inner()))
        .cloned()
}

fn emit_ab_info(board: &Board, ctx: &ABContext, show_wdl: bool) {
    let nodes = ctx.counters.nodes.load(Ordering::Relaxed);
    let tb_hits = ctx.counters.tb_hits.load(Ordering::Relaxed);
    let elapsed = ctx.time_man.elapsed();
    let millis = elapsed.as_millis() as u64;
    let nps = if millis > 0 { nodes * 1000 / millis } else { 0 };
    let material = board.wdl_material();

    for (i, rm) in ctx.root_moves.iter().take(ctx.multipv).enumerate() {
        let score = if rm.score.is_valid() && rm.score != -Eval::INFINITE {
            rm.score
        } else {
            rm.previous_score
        };
        if !score.is_valid() || score == -Eval::INFINITE {
            continue;
        }

        let info = uci_proto::Info {
            depth: Some(ctx.completed_depth),
            seldepth: Some(rm.sel_depth),
            multipv: Some(i as u32 + 1),
            score: Some(score_to_uci(score)),
            wdl: show_wdl.then(|| wdl::wdl(score, material)),
            nodes: Some(nodes),
            nps: Some(nps),
            hashfull: Some(ctx.tt.hashfull()),
            tbhits: Some(tb_hits),
            time: Some(millis),
            pv: rm.pv.iter().map(|m| m.to_string()).collect(),
            ..uci_proto::Info::default()
        };
        println!("{}", uci_proto::EngineMessage::Info(info));
    }
}

fn emit_mcts_info(
    board: &Board,
    ctx: &MctsContext,
    root_moves: &[RootMove],
    show_wdl: bool,
    tt: &TranspositionTable,
) {
    let Some(best) = root_moves.first() else { return };

    let nodes = ctx.counters.nodes.load(Ordering::Relaxed);
    let millis = ctx.time_man.elapsed().as_millis() as u64;
    let nps = if millis > 0 { nodes * 1000 / millis } else { 0 };
    let material = board.wdl_material();

    let info = uci_proto::Info {
        depth: Some(best.sel_depth.max(1)),
        seldepth: Some(best.sel_depth),
        multipv: Some(1),
        score: Some(score_to_uci(best.score)),
        wdl: show_wdl.then(|| wdl::wdl(best.score, material)),
        nodes: Some(nodes),
        nps: Some(nps),
        hashfull: Some(tt.hashfull()),
        tbhits: Some(0),
        time: Some(millis),
        pv: best.pv.iter().map(|m| m.to_string()).collect(),
        ..uci_proto::Info::default()
    };
    println!("{}", uci_proto::EngineMessage::Info(info));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::WorkerResult;
    use crate::chess_move::MoveFlag;
    use vesper_types::Square;

    fn result(mv: &str, score: i32, depth: u32) -> WorkerResult {
        let (f, t) = mv.split_at(2);
        let from: Square = Square::all().find(|s| s.to_string() == f).unwrap();
        let to: Square = Square::all().find(|s| s.to_string() == t).unwrap();
        WorkerResult {
            best_move: Move::new(from, to, MoveFlag::Quiet),
            ponder_move: Move::NONE,
            score: Eval::new(score),
            completed_depth: depth,
            root_moves: Vec::new(),
        }
    }

    #[test]
    fn vote_prefers_agreeing_majority() {
        let results = vec![
            result("e2e4", 20, 18),
            result("e2e4", 25, 17),
            result("d2d4", 30, 16),
        ];
        let winner = vote_best(&results).unwrap();
        assert_eq!(winner.best_move.to_string(), "e2e4");
    }

    #[test]
    fn vote_lets_a_much_deeper_outlier_win() {
        let results = vec![
            result("e2e4", 10, 5),
            result("d2d4", 500, 22),
        ];
        let winner = vote_best(&results).unwrap();
        assert_eq!(winner.best_move.to_string(), "d2d4");
    }

    #[test]
    fn vote_ignores_empty_results() {
        let mut no_move = result("e2e4", 0, 0);
        no_move.best_move = Move::NONE;
        assert!(vote_best(&[no_move]).is_none());
    }

    #[test]
    fn pool_sizes_and_resizes() {
        let tt = Arc::new(TranspositionTable::new(1));
        let mut pool = ThreadPool::new(2, tt);
        assert_eq!(pool.thread_count(), 2);
        pool.set(4);
        assert_eq!(pool.thread_count(), 4);
        pool.set(1);
        assert_eq!(pool.thread_count(), 1);
    }

    #[test]
    fn pool_runs_a_search_and_finishes() {
        use crate::{
            eval::StandardEvaluator,
            experience::{ExperienceStore, LearningMode},
            shashin::{ShashinConfig, ShashinManager},
            tb::NoTableBase,
            time_man::Limits,
        };

        let tt = Arc::new(TranspositionTable::new(8));
        let mut pool = ThreadPool::new(2, Arc::clone(&tt));

        let board = Board::from_fen("6k1/5ppp/8/8/8/8/5PPP/R6K w - - 0 1").unwrap();
        let job = SearchJob {
            board,
            time_man: Limits::new().depth(Some(4)).start_now(),
            multipv: 1,
            searchmoves: Vec::new(),
            show_wdl: false,
            use_mcts: false,
            mcts_threads: 1,
            tt,
            shashin: Arc::new(ShashinManager::new(ShashinConfig::default())),
            experience: Arc::new(ExperienceStore::new(LearningMode::Off, false, false, ".")),
            evaluator: Arc::new(StandardEvaluator),
            tablebase: Arc::new(NoTableBase),
        };

        pool.start_thinking(job);
        pool.wait_for_search_finished();
        assert!(pool.nodes_searched() > 0);
    }
}
