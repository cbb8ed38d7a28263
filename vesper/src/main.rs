use clap::{Parser, Subcommand};
use vesper::{
    board::Board,
    eval::{Evaluator, StandardEvaluator},
    hashtable::TranspositionTable,
    perft,
    threads::{SearchJob, ThreadPool},
    time_man::Limits,
    uci::Engine,
    FEN_STARTPOS,
};
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "vesper", about = "UCI chess engine")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Default, Subcommand)]
enum Command {
    /// Starts the engine in UCI mode. (Default)
    #[default]
    Uci,

    /// Runs the builtin perft testsuite.
    Perft {
        /// Skip suite entries with this many or more expected leaf nodes.
        #[arg(long, short, default_value_t = 200_000)]
        skip: u64,
    },

    /// Runs a single fixed-depth search and prints the result.
    Search {
        /// Start position in FEN format.
        #[arg(long, short, default_value_t = FEN_STARTPOS.to_string())]
        startpos: String,

        /// Search depth.
        #[arg(long, short, default_value_t = 10)]
        depth: u32,

        /// Worker thread count.
        #[arg(long, short, default_value_t = 1)]
        threads: usize,
    },

    /// Runs the benchmark suite.
    Bench,
}

fn main() {
    let args = Args::parse();

    match args.command.unwrap_or_default() {
        Command::Uci => Engine::new().run(),
        Command::Perft { skip } => perft::run_suite(skip),
        Command::Search { startpos, depth, threads } => single_search(&startpos, depth, threads),
        Command::Bench => {
            let tt = Arc::new(TranspositionTable::new(16));
            let mut pool = ThreadPool::new(1, Arc::clone(&tt));
            vesper::bench::run(&mut pool, &tt);
        }
    }
}

fn single_search(fen: &str, depth: u32, threads: usize) {
    let board = match Board::from_fen(fen) {
        Ok(board) => board,
        Err(e) => {
            eprintln!("bad fen: {e}");
            std::process::exit(1);
        }
    };

    let tt = Arc::new(TranspositionTable::new(64));
    let mut pool = ThreadPool::new(threads, Arc::clone(&tt));

    let evaluator: Arc<dyn Evaluator> = Arc::new(StandardEvaluator);
    let job = SearchJob {
        board,
        time_man: Limits::new().depth(Some(depth)).start_now(),
        multipv: 1,
        searchmoves: Vec::new(),
        show_wdl: true,
        use_mcts: false,
        mcts_threads: 1,
        tt,
        shashin: Arc::new(vesper::shashin::ShashinManager::new(Default::default())),
        experience: Arc::new(vesper::experience::ExperienceStore::new(
            vesper::experience::LearningMode::Off,
            false,
            false,
            ".",
        )),
        evaluator,
        tablebase: Arc::new(vesper::tb::NoTableBase),
    };

    pool.start_thinking(job);
    pool.wait_for_search_finished();
}
