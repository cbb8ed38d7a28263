//! The `bench` command: a fixed suite of positions searched to a fixed
//! depth, reporting total nodes and speed. Numbers are comparable across
//! builds because the suite and depth never change.

use crate::{
    board::Board,
    eval::StandardEvaluator,
    experience::{ExperienceStore, LearningMode},
    hashtable::TranspositionTable,
    shashin::{ShashinConfig, ShashinManager},
    tb::NoTableBase,
    threads::{SearchJob, ThreadPool},
    time_man::Limits,
};
use std::sync::Arc;
use std::time::Instant;

const BENCH_DEPTH: u32 = 8;

const BENCH_FENS: &[&str] = &[
    "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
    "r1bqkbnr/pppp1ppp/2n5/4p3/4P3/5N2/PPPP1PPP/RNBQKB1R w KQkq - 2 3",
    "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
    "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1",
    "rnbq1k1r/pp1Pbppp/2p5/8/2B5/8/PPP1NnPP/RNBQK2R w KQ - 1 8",
    "r4rk1/1pp1qppp/p1np1n2/2b1p1B1/2B1P1b1/P1NP1N2/1PP1QPPP/R4RK1 w - - 0 10",
    "6k1/5ppp/8/8/8/8/5PPP/R6K w - - 0 1",
    "8/8/8/3k4/8/3K4/3P4/8 w - - 0 1",
];

pub fn run(pool: &mut ThreadPool, tt: &Arc<TranspositionTable>) {
    let start = Instant::now();
    let mut total_nodes = 0u64;

    for fen in BENCH_FENS {
        let Ok(board) = Board::from_fen(fen) else {
            eprintln!("info string bench fen rejected: {fen}");
            continue;
        };

        tt.clear();
        let job = SearchJob {
            board,
            time_man: Limits::new().depth(Some(BENCH_DEPTH)).start_now(),
            multipv: 1,
            searchmoves: Vec::new(),
            show_wdl: false,
            use_mcts: false,
            mcts_threads: 1,
            tt: Arc::clone(tt),
            shashin: Arc::new(ShashinManager::new(ShashinConfig::default())),
            experience: Arc::new(ExperienceStore::new(LearningMode::Off, false, false, ".")),
            evaluator: Arc::new(StandardEvaluator),
            tablebase: Arc::new(NoTableBase),
        };

        pool.start_thinking(job);
        pool.wait_for_search_finished();
        total_nodes += pool.nodes_searched();
    }

    let elapsed = start.elapsed();
    let millis = elapsed.as_millis().max(1) as u64;
    println!("info string bench: {total_nodes} nodes in {millis} ms, {} nps", total_nodes * 1000 / millis);
}
