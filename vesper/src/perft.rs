use crate::board::{movegen::MoveList, Board};

/// Counts leaf positions reachable in exactly `depth` plies. The standard
/// movegen shakedown; results are compared against known-good counts.
pub fn perft(board: &mut Board, depth: usize) -> u64 {
    if depth == 0 {
        return 1;
    }

    let mut list = MoveList::new();
    board.generate_all_moves(&mut list);

    let mut sum = 0;
    for mv in list {
        if !board.make_move(mv) {
            continue;
        }
        sum += perft(board, depth - 1);
        board.take_move();
    }

    sum
}

/// Prints the per-move breakdown the way `go perft` traditionally does.
pub fn divide(board: &mut Board, depth: usize) {
    if depth == 0 {
        println!("total 1");
        return;
    }

    let mut list = MoveList::new();
    board.generate_all_moves(&mut list);

    let mut total = 0;
    for mv in list {
        if !board.make_move(mv) {
            continue;
        }
        let count = perft(board, depth - 1);
        board.take_move();
        println!("{mv}: {count}");
        total += count;
    }

    println!("total {total}");
}

/// Positions with well-known node counts, used by tests and the perft
/// subcommand.
pub const PERFT_SUITE: &[(&str, &[u64])] = &[
    (
        "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        &[20, 400, 8_902, 197_281],
    ),
    (
        // Kiwipete: castling, pins, en passant and promotions all at once.
        "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
        &[48, 2_039, 97_862],
    ),
    (
        "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1",
        &[14, 191, 2_812, 43_238],
    ),
    (
        "r3k2r/Pppp1ppp/1b3nbN/nP6/BBP1P3/q4N2/Pp1P2PP/R2Q1RK1 w kq - 0 1",
        &[6, 264, 9_467],
    ),
    (
        "rnbq1k1r/pp1Pbppp/2p5/8/2B5/8/PPP1NnPP/RNBQK2R w KQ - 1 8",
        &[44, 1_486, 62_379],
    ),
];

/// Runs the whole suite, panicking on the first mismatch.
pub fn run_suite(max_nodes: u64) {
    for (fen, expected) in PERFT_SUITE {
        println!("{fen}");
        let mut board = Board::from_fen(fen).expect("suite fens are valid");

        for (i, &want) in expected.iter().enumerate() {
            if want > max_nodes {
                println!(" - depth {} skipped", i + 1);
                continue;
            }
            let got = perft(&mut board, i + 1);
            println!(" - depth {}: expected {want}, got {got}", i + 1);
            assert_eq!(want, got, "perft mismatch on {fen} at depth {}", i + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startpos_shallow_counts() {
        let mut board = Board::from_fen(PERFT_SUITE[0].0).unwrap();
        assert_eq!(perft(&mut board, 1), 20);
        assert_eq!(perft(&mut board, 2), 400);
        assert_eq!(perft(&mut board, 3), 8_902);
    }

    #[test]
    fn kiwipete_counts() {
        let mut board = Board::from_fen(PERFT_SUITE[1].0).unwrap();
        assert_eq!(perft(&mut board, 1), 48);
        assert_eq!(perft(&mut board, 2), 2_039);
        assert_eq!(perft(&mut board, 3), 97_862);
    }

    #[test]
    fn endgame_counts() {
        let mut board = Board::from_fen(PERFT_SUITE[2].0).unwrap();
        assert_eq!(perft(&mut board, 1), 14);
        assert_eq!(perft(&mut board, 2), 191);
        assert_eq!(perft(&mut board, 3), 2_812);
    }

    #[test]
    fn promotion_heavy_counts() {
        let mut board = Board::from_fen(PERFT_SUITE[3].0).unwrap();
        assert_eq!(perft(&mut board, 1), 6);
        assert_eq!(perft(&mut board, 2), 264);
        assert_eq!(perft(&mut board, 3), 9_467);
    }

    #[test]
    fn talkchess_bug_position_counts() {
        let mut board = Board::from_fen(PERFT_SUITE[4].0).unwrap();
        assert_eq!(perft(&mut board, 1), 44);
        assert_eq!(perft(&mut board, 2), 1_486);
        assert_eq!(perft(&mut board, 3), 62_379);
    }
}
