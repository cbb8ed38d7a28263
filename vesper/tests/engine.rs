//! End-to-end scenarios over the library surface: the positions a GUI
//! would set up and the verdicts the engine must reach.

use std::sync::Arc;
use vesper::{
    board::Board,
    eval::StandardEvaluator,
    hashtable::TranspositionTable,
    search::{
        history::SearchHistory,
        iterative_deepening,
        killers::{CounterMoves, SearchKillers},
        ABContext, SharedCounters,
    },
    shashin::{ShashinConfig, ShashinManager},
    tb::NoTableBase,
    time_man::Limits,
    FEN_STARTPOS,
};
use vesper_types::Eval;

fn context(limits: Limits) -> ABContext {
    let mut ctx = ABContext::new(
        limits.start_now(),
        Arc::new(TranspositionTable::new(16)),
        Arc::new(ShashinManager::new(ShashinConfig::default())),
        Arc::new(StandardEvaluator),
        Arc::new(NoTableBase),
        Arc::new(SharedCounters::default()),
        SearchHistory::default(),
        SearchKillers::default(),
        CounterMoves::default(),
    );
    ctx.is_main = true;
    ctx
}

#[test]
fn scenario_mate_in_one() {
    let mut board = Board::from_fen("6k1/5ppp/8/8/8/8/5PPP/R6K w - - 0 1").unwrap();
    let mut ctx = context(Limits::new().depth(Some(2)));
    let result = iterative_deepening(&mut board, &mut ctx, &mut |_, _| {});

    assert_eq!(result.best_move.to_string(), "a1a8");
    assert_eq!(result.score, Eval::mate_in(1));
}

#[test]
fn scenario_stalemate_bestmove_none() {
    let mut board = Board::from_fen("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1").unwrap();
    let mut ctx = context(Limits::new().depth(Some(4)));
    let result = iterative_deepening(&mut board, &mut ctx, &mut |_, _| {});

    // The driver prints this as `bestmove 0000` with a cp 0 score.
    assert!(result.best_move.is_none());
    assert_eq!(result.best_move.to_string(), "0000");
    assert_eq!(result.score, Eval::DRAW);
}

#[test]
fn scenario_threefold_shuffle_is_drawish() {
    let mut board = Board::from_fen(FEN_STARTPOS).unwrap();
    for text in ["g1f3", "g8f6", "f3g1", "f6g8", "g1f3", "g8f6", "f3g1", "f6g8"] {
        let mv = board.find_move(text).unwrap();
        assert!(board.make_move(mv));
    }
    board.ply = 0;

    let mut ctx = context(Limits::new().depth(Some(10)));
    let result = iterative_deepening(&mut board, &mut ctx, &mut |_, _| {});
    assert!(result.score.inner().abs() <= 30, "score {}", result.score);
}

#[test]
fn scenario_zugzwang_null_move_safety() {
    let mut board = Board::from_fen("8/8/8/3k4/8/3K4/3P4/8 w - - 0 1").unwrap();
    let mut ctx = context(Limits::new().depth(Some(12)));
    let result = iterative_deepening(&mut board, &mut ctx, &mut |_, _| {});

    // White must not walk into losing the pawn; any non-losing score and a
    // legal move will do.
    assert!(!result.best_move.is_none());
    assert!(result.score >= Eval::new(-50), "score {}", result.score);
}

#[test]
fn scenario_deeper_search_keeps_the_mate() {
    // A mate must survive growing depth and a reused transposition table.
    let mut board = Board::from_fen("6k1/5ppp/8/8/8/8/5PPP/R6K w - - 0 1").unwrap();
    let tt = Arc::new(TranspositionTable::new(16));

    for depth in [2, 4, 6] {
        let mut ctx = ABContext::new(
            Limits::new().depth(Some(depth)).start_now(),
            Arc::clone(&tt),
            Arc::new(ShashinManager::new(ShashinConfig::default())),
            Arc::new(StandardEvaluator),
            Arc::new(NoTableBase),
            Arc::new(SharedCounters::default()),
            SearchHistory::default(),
            SearchKillers::default(),
            CounterMoves::default(),
        );
        ctx.is_main = true;
        tt.new_search();

        let result = iterative_deepening(&mut board, &mut ctx, &mut |_, _| {});
        assert_eq!(result.best_move.to_string(), "a1a8", "depth {depth}");
        assert_eq!(result.score, Eval::mate_in(1), "depth {depth}");
    }
}

#[test]
fn scenario_pv_is_playable() {
    let mut board = Board::from_fen(FEN_STARTPOS).unwrap();
    let mut ctx = context(Limits::new().depth(Some(6)));
    let result = iterative_deepening(&mut board, &mut ctx, &mut |_, _| {});

    // Every PV move must be legal when played in order.
    let pv = &result.root_moves[0].pv;
    assert!(!pv.is_empty());
    let mut made = 0;
    for mv in pv {
        let found = board.find_move(&mv.to_string());
        assert!(found.is_some(), "pv move {mv} not legal");
        assert!(board.make_move(found.unwrap()));
        made += 1;
    }
    for _ in 0..made {
        board.take_move();
    }
}
