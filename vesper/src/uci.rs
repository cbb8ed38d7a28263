//! The UCI driver: owns the option table, the game state and the worker
//! pool, and routes every `go` through book, experience and search.

use crate::{
    bench,
    board::Board,
    book::{BookOracle, NoBook},
    chess_move::Move,
    eval::{Evaluator, StandardEvaluator},
    experience::{ExperienceStore, LearningMode},
    hashtable::TranspositionTable,
    perft,
    shashin::{ShashinConfig, ShashinManager},
    tb::{NoTableBase, TableBase},
    threads::{SearchJob, ThreadPool},
    time_man::{Limits, TimeMan},
    FEN_STARTPOS,
};
use std::io::BufRead;
use std::sync::Arc;
use vesper_types::Eval;
use vesper_uci::{
    EngineMessage, Go, GuiMessage, Id, Info, OptionDecl, OptionKind, Position, Score,
};

pub const ENGINE_NAME: &str = "Vesper 0.1";
pub const ENGINE_AUTHOR: &str = "the Vesper developers";

/// Converts an internal score to the UCI `cp`/`mate` form. Mate distances
/// are reported in full moves, negative when we are the one being mated.
pub fn score_to_uci(v: Eval) -> Score {
    if v.is_mate() {
        let plies = v.mate_distance();
        let moves = (plies + 1) / 2;
        Score::Mate(if v > Eval::ZERO { moves } else { -moves })
    } else {
        Score::Cp(v.inner())
    }
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub threads: usize,
    pub hash_mb: usize,
    pub multipv: usize,
    pub move_overhead: i64,
    pub slow_mover: i64,
    pub ponder: bool,
    pub chess960: bool,
    pub show_wdl: bool,
    pub learning: LearningMode,
    pub read_only_learning: bool,
    pub concurrent_experience: bool,
    pub mcts: bool,
    pub mcts_threads: usize,
    pub shashin: ShashinConfig,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            hash_mb: 16,
            multipv: 1,
            move_overhead: 10,
            slow_mover: 100,
            ponder: false,
            chess960: false,
            show_wdl: true,
            learning: LearningMode::Off,
            read_only_learning: false,
            concurrent_experience: false,
            mcts: false,
            mcts_threads: 1,
            shashin: ShashinConfig::default(),
        }
    }
}

pub struct Engine {
    options: EngineOptions,
    tt: Arc<TranspositionTable>,
    pool: ThreadPool,
    shashin: Arc<ShashinManager>,
    experience: Arc<ExperienceStore>,
    evaluator: Arc<dyn Evaluator>,
    tablebase: Arc<dyn TableBase>,
    book: Box<dyn BookOracle>,
    board: Board,
    game_ply: u32,
    active_tm: Option<TimeMan>,
}

impl Engine {
    pub fn new() -> Self {
        let options = EngineOptions::default();
        let tt = Arc::new(TranspositionTable::new(options.hash_mb));
        let pool = ThreadPool::new(options.threads, Arc::clone(&tt));

        Self {
            shashin: Arc::new(ShashinManager::new(options.shashin)),
            experience: Arc::new(ExperienceStore::new(
                options.learning,
                options.read_only_learning,
                options.concurrent_experience,
                ".",
            )),
            evaluator: Arc::new(StandardEvaluator),
            tablebase: Arc::new(NoTableBase),
            book: Box::new(NoBook),
            board: Board::from_fen(FEN_STARTPOS).expect("startpos is valid"),
            game_ply: 0,
            active_tm: None,
            options,
            tt,
            pool,
        }
    }

    /// Reads GUI commands from stdin until `quit`.
    pub fn run(&mut self) {
        let stdin = std::io::stdin();
        let mut input = String::new();

        loop {
            input.clear();
            let Ok(n) = stdin.lock().read_line(&mut input) else { break };
            if n == 0 {
                break;
            }
            if input.trim().is_empty() {
                continue;
            }

            let message = match GuiMessage::parse(&input) {
                Ok(message) => message,
                Err(e) => {
                    eprintln!("info string {e}");
                    continue;
                }
            };

            if !self.dispatch(message) {
                break;
            }
        }

        self.shutdown();
    }

    /// Handles one command; returns `false` on `quit`.
    pub fn dispatch(&mut self, message: GuiMessage) -> bool {
        match message {
            GuiMessage::Uci => self.cmd_uci(),
            GuiMessage::Debug(_) => (),
            GuiMessage::Isready => println!("{}", EngineMessage::Readyok),
            GuiMessage::Setoption { name, value } => self.cmd_setoption(&name, value.as_deref()),
            GuiMessage::Ucinewgame => {
                self.pool.clear();
                self.board = Board::from_fen(FEN_STARTPOS).expect("startpos is valid");
                self.game_ply = 0;
            }
            GuiMessage::Position { pos, moves } => self.cmd_position(pos, &moves),
            GuiMessage::Go(go) => self.cmd_go(go),
            GuiMessage::Stop => self.cmd_stop(),
            GuiMessage::Ponderhit => {
                if let Some(tm) = &self.active_tm {
                    tm.ponderhit();
                }
            }
            GuiMessage::Quit => return false,
            GuiMessage::Display => println!("{}", self.board),
            GuiMessage::Eval => {
                let eval = self.evaluator.evaluate(&self.board);
                println!("static evaluation: {} cp (side to move)", eval);
            }
            GuiMessage::Flip => self.board = self.board.flipped(),
            GuiMessage::Bench => bench::run(&mut self.pool, &self.tt),
            GuiMessage::Book => println!("info string {}", self.book.describe()),
            GuiMessage::Compiler => {
                println!("info string compiled with rustc, profile {}", if cfg!(debug_assertions) { "debug" } else { "release" });
            }
            GuiMessage::ExportNet => {
                println!("info string no embedded network to export");
            }
        }

        true
    }

    fn shutdown(&mut self) {
        self.cmd_stop();
        self.pool.wait_for_search_finished();
        if let Err(e) = self.experience.persist() {
            eprintln!("info string {e}");
        }
    }

    fn cmd_uci(&self) {
        println!("{}", EngineMessage::Id(Id::Name(ENGINE_NAME.to_owned())));
        println!("{}", EngineMessage::Id(Id::Author(ENGINE_AUTHOR.to_owned())));

        for decl in option_table(&self.options) {
            println!("{}", EngineMessage::Option(decl));
        }

        println!("{}", EngineMessage::Uciok);
    }

    fn cmd_setoption(&mut self, name: &str, value: Option<&str>) {
        fn parse_spin(value: Option<&str>, min: i64, max: i64) -> Option<i64> {
            value?.parse::<i64>().ok().filter(|v| (min..=max).contains(v))
        }

        fn parse_check(value: Option<&str>) -> Option<bool> {
            match value? {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            }
        }

        // Invalid values keep the previous setting.
        let mut rebuild_experience = false;
        let mut rebuild_shashin = false;

        match name {
            "Threads" => {
                if let Some(v) = parse_spin(value, 1, 1024) {
                    self.options.threads = v as usize;
                    self.pool.set(self.options.threads);
                }
            }
            "Hash" => {
                if let Some(v) = parse_spin(value, 1, 1 << 20) {
                    self.options.hash_mb = v as usize;
                    self.tt = Arc::new(TranspositionTable::new(self.options.hash_mb));
                    self.pool.set_tt(Arc::clone(&self.tt));
                }
            }
            "Clear Hash" => self.pool.clear(),
            "MultiPV" => {
                if let Some(v) = parse_spin(value, 1, 256) {
                    self.options.multipv = v as usize;
                }
            }
            "Move Overhead" => {
                if let Some(v) = parse_spin(value, 0, 5000) {
                    self.options.move_overhead = v;
                }
            }
            "Slow Mover" => {
                if let Some(v) = parse_spin(value, 10, 1000) {
                    self.options.slow_mover = v;
                }
            }
            "Ponder" => {
                if let Some(v) = parse_check(value) {
                    self.options.ponder = v;
                }
            }
            "UCI_Chess960" => {
                if let Some(v) = parse_check(value) {
                    self.options.chess960 = v;
                    self.board.chess960 = v;
                }
            }
            "UCI_ShowWDL" => {
                if let Some(v) = parse_check(value) {
                    self.options.show_wdl = v;
                }
            }
            "Persisted learning" => {
                if let Some(v) = value {
                    let mode = LearningMode::from_option(v);
                    if mode != self.options.learning {
                        self.options.learning = mode;
                        rebuild_experience = true;
                    }
                }
            }
            "Read only learning" => {
                if let Some(v) = parse_check(value) {
                    self.options.read_only_learning = v;
                    rebuild_experience = true;
                }
            }
            "Concurrent Experience" => {
                if let Some(v) = parse_check(value) {
                    self.options.concurrent_experience = v;
                    rebuild_experience = true;
                }
            }
            "MCTS" => {
                if let Some(v) = parse_check(value) {
                    self.options.mcts = v;
                }
            }
            "MCTSThreads" => {
                if let Some(v) = parse_spin(value, 1, 512) {
                    self.options.mcts_threads = v as usize;
                }
            }
            "High Tal" | "Middle Tal" | "Low Tal" | "Capablanca" | "High Petrosian"
            | "Middle Petrosian" | "Low Petrosian" => {
                if let Some(v) = parse_check(value) {
                    let s = &mut self.options.shashin;
                    match name {
                        "High Tal" => s.high_tal = v,
                        "Middle Tal" => s.middle_tal = v,
                        "Low Tal" => s.low_tal = v,
                        "Capablanca" => s.capablanca = v,
                        "High Petrosian" => s.high_petrosian = v,
                        "Middle Petrosian" => s.middle_petrosian = v,
                        _ => s.low_petrosian = v,
                    }
                    rebuild_shashin = true;
                }
            }
            _ => eprintln!("info string unknown option `{name}`"),
        }

        if rebuild_experience {
            self.pool.wait_for_search_finished();
            self.experience = Arc::new(ExperienceStore::new(
                self.options.learning,
                self.options.read_only_learning,
                self.options.concurrent_experience,
                ".",
            ));
            self.experience.init();
        }

        if rebuild_shashin {
            self.shashin = Arc::new(ShashinManager::new(self.options.shashin));
        }
    }

    fn cmd_position(&mut self, pos: Position, moves: &[String]) {
        let fen = match &pos {
            Position::Startpos => FEN_STARTPOS,
            Position::Fen(fen) => fen.as_str(),
        };

        let mut board = match Board::from_fen(fen) {
            Ok(board) => board,
            Err(e) => {
                eprintln!("info string bad fen: {e}");
                return;
            }
        };
        board.chess960 = self.options.chess960;

        for text in moves {
            match board.find_move(text) {
                Some(mv) if board.make_move(mv) => (),
                _ => {
                    eprintln!("info string illegal move `{text}` in position command");
                    break;
                }
            }
        }

        self.game_ply = moves.len() as u32;
        board.ply = 0;
        self.board = board;
    }

    fn cmd_go(&mut self, go: Go) {
        if let Some(depth) = go.perft {
            perft::divide(&mut self.board, depth as usize);
            return;
        }

        if self.pool.is_searching() {
            eprintln!("info string search already running");
            return;
        }

        // Book first, then experience; both bypass the search entirely.
        if !go.infinite && !go.ponder {
            if let Some(mv) = self.book.probe(&self.board) {
                println!("{}", EngineMessage::Bestmove { mv: mv.to_string(), ponder: None });
                return;
            }

            if let Some(mv) = self.experience_move(&go) {
                println!("{}", EngineMessage::Bestmove { mv: mv.to_string(), ponder: None });
                return;
            }
        }

        let searchmoves: Vec<Move> = go
            .searchmoves
            .iter()
            .filter_map(|text| self.board.find_move(text))
            .collect();

        let (time, inc) = match self.board.color {
            vesper_types::Color::White => (go.wtime, go.winc),
            vesper_types::Color::Black => (go.btime, go.binc),
        };

        let limits = Limits::new()
            .depth(go.depth)
            .nodes(go.nodes)
            .movetime(go.movetime)
            .mate(go.mate)
            .infinite(go.infinite)
            .ponder(go.ponder)
            .clock(time, inc, go.movestogo)
            .game_ply(self.game_ply)
            .overhead_ms(self.options.move_overhead)
            .slow_mover(self.options.slow_mover);

        let time_man = limits.start_now();
        self.active_tm = Some(time_man.clone());

        // The MCTS alternative serves the defensive and balanced classes;
        // an explicit option always wins.
        let snapshot = self.shashin.snapshot();
        let use_mcts =
            self.options.mcts || (snapshot.range.is_petrosian() && self.options.mcts_threads > 1);

        let job = SearchJob {
            board: self.board.clone(),
            time_man,
            multipv: self.options.multipv,
            searchmoves,
            show_wdl: self.options.show_wdl,
            use_mcts,
            mcts_threads: self.options.mcts_threads,
            tt: Arc::clone(&self.tt),
            shashin: Arc::clone(&self.shashin),
            experience: Arc::clone(&self.experience),
            evaluator: Arc::clone(&self.evaluator),
            tablebase: Arc::clone(&self.tablebase),
        };

        self.pool.start_thinking(job);
    }

    /// A stored experience move is played without searching when it was
    /// learned at least as deep as this `go` asks for.
    fn experience_move(&self, go: &Go) -> Option<Move> {
        if !self.experience.is_enabled() {
            return None;
        }

        let wanted_depth = go.depth.unwrap_or(8) as i32;
        let mut entries = self.experience.probe(self.board.key);
        entries.sort_by(|a, b| {
            (b.depth, b.performance, b.score.inner()).cmp(&(a.depth, a.performance, a.score.inner()))
        });

        entries
            .into_iter()
            .find(|e| e.depth >= wanted_depth && self.board.is_pseudo_legal(e.mv))
            .map(|e| e.mv)
    }

    fn cmd_stop(&mut self) {
        if let Some(tm) = &self.active_tm {
            tm.ponderhit(); // a stop also ends any ponder wait
        }
        self.pool.stop();
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

fn option_table(options: &EngineOptions) -> Vec<OptionDecl> {
    let combo = |default: &str, vars: &[&str]| OptionKind::Combo {
        default: default.to_owned(),
        vars: vars.iter().map(|v| (*v).to_owned()).collect(),
    };

    vec![
        OptionDecl {
            name: "Threads".into(),
            kind: OptionKind::Spin { default: options.threads as i64, min: 1, max: 1024 },
        },
        OptionDecl {
            name: "Hash".into(),
            kind: OptionKind::Spin { default: options.hash_mb as i64, min: 1, max: 1 << 20 },
        },
        OptionDecl { name: "Clear Hash".into(), kind: OptionKind::Button },
        OptionDecl {
            name: "MultiPV".into(),
            kind: OptionKind::Spin { default: options.multipv as i64, min: 1, max: 256 },
        },
        OptionDecl {
            name: "Move Overhead".into(),
            kind: OptionKind::Spin { default: options.move_overhead, min: 0, max: 5000 },
        },
        OptionDecl {
            name: "Slow Mover".into(),
            kind: OptionKind::Spin { default: options.slow_mover, min: 10, max: 1000 },
        },
        OptionDecl { name: "Ponder".into(), kind: OptionKind::Check { default: options.ponder } },
        OptionDecl {
            name: "UCI_Chess960".into(),
            kind: OptionKind::Check { default: options.chess960 },
        },
        OptionDecl {
            name: "UCI_ShowWDL".into(),
            kind: OptionKind::Check { default: options.show_wdl },
        },
        OptionDecl {
            name: "Persisted learning".into(),
            kind: combo("Off", &["Off", "Standard", "Self"]),
        },
        OptionDecl {
            name: "Read only learning".into(),
            kind: OptionKind::Check { default: options.read_only_learning },
        },
        OptionDecl {
            name: "Concurrent Experience".into(),
            kind: OptionKind::Check { default: options.concurrent_experience },
        },
        OptionDecl { name: "MCTS".into(), kind: OptionKind::Check { default: options.mcts } },
        OptionDecl {
            name: "MCTSThreads".into(),
            kind: OptionKind::Spin { default: options.mcts_threads as i64, min: 1, max: 512 },
        },
        OptionDecl { name: "High Tal".into(), kind: OptionKind::Check { default: options.shashin.high_tal } },
        OptionDecl { name: "Middle Tal".into(), kind: OptionKind::Check { default: options.shashin.middle_tal } },
        OptionDecl { name: "Low Tal".into(), kind: OptionKind::Check { default: options.shashin.low_tal } },
        OptionDecl { name: "Capablanca".into(), kind: OptionKind::Check { default: options.shashin.capablanca } },
        OptionDecl {
            name: "High Petrosian".into(),
            kind: OptionKind::Check { default: options.shashin.high_petrosian },
        },
        OptionDecl {
            name: "Middle Petrosian".into(),
            kind: OptionKind::Check { default: options.shashin.middle_petrosian },
        },
        OptionDecl {
            name: "Low Petrosian".into(),
            kind: OptionKind::Check { default: options.shashin.low_petrosian },
        },
    ]
}

/// `info string` convenience used by a few subsystems.
pub fn info_string(text: &str) {
    let info = Info {
        string: Some(text.to_owned()),
        ..Info::default()
    };
    println!("{}", EngineMessage::Info(info));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_conversion() {
        assert_eq!(score_to_uci(Eval::new(42)), Score::Cp(42));
        assert_eq!(score_to_uci(Eval::new(-180)), Score::Cp(-180));
        assert_eq!(score_to_uci(Eval::mate_in(1)), Score::Mate(1));
        assert_eq!(score_to_uci(Eval::mate_in(4)), Score::Mate(2));
        assert_eq!(score_to_uci(Eval::mated_in(3)), Score::Mate(-2));
    }

    #[test]
    fn option_table_covers_the_documented_set() {
        let decls = option_table(&EngineOptions::default());
        let names: Vec<&str> = decls.iter().map(|d| d.name.as_str()).collect();

        for expected in [
            "Threads",
            "Hash",
            "MultiPV",
            "Move Overhead",
            "Ponder",
            "UCI_Chess960",
            "UCI_ShowWDL",
            "Persisted learning",
            "MCTS",
            "MCTSThreads",
            "High Tal",
            "Low Petrosian",
        ] {
            assert!(names.contains(&expected), "{expected} missing");
        }
    }

    #[test]
    fn position_and_moves_are_applied() {
        let mut engine = Engine::new();
        engine.dispatch(GuiMessage::Position {
            pos: Position::Startpos,
            moves: vec!["e2e4".into(), "e7e5".into()],
        });
        assert!(engine.board.to_fen().starts_with("rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w"));
        assert_eq!(engine.game_ply, 2);
        assert_eq!(engine.board.ply, 0);
    }

    #[test]
    fn illegal_position_move_is_reported_not_fatal() {
        let mut engine = Engine::new();
        engine.dispatch(GuiMessage::Position {
            pos: Position::Startpos,
            moves: vec!["e2e5".into()],
        });
        // The already-applied prefix stays.
        assert!(engine.board.to_fen().starts_with("rnbqkbnr/pppppppp"));
    }

    #[test]
    fn invalid_option_value_keeps_previous() {
        let mut engine = Engine::new();
        engine.dispatch(GuiMessage::Setoption {
            name: "MultiPV".into(),
            value: Some("banana".into()),
        });
        assert_eq!(engine.options.multipv, 1);

        engine.dispatch(GuiMessage::Setoption {
            name: "MultiPV".into(),
            value: Some("4".into()),
        });
        assert_eq!(engine.options.multipv, 4);
    }

    #[test]
    fn go_depth_emits_bestmove() {
        let mut engine = Engine::new();
        engine.dispatch(GuiMessage::Position {
            pos: Position::Fen("6k1/5ppp/8/8/8/8/5PPP/R6K w - - 0 1".into()),
            moves: vec![],
        });
        engine.dispatch(GuiMessage::Go(Go { depth: Some(3), ..Go::default() }));
        engine.pool.wait_for_search_finished();
    }
}
