//! Opening-book seam. Decoding CTG/Polyglot files is a separate concern;
//! the driver only ever asks "is there a book move here?".

use crate::{board::Board, chess_move::Move};

pub trait BookOracle: Send + Sync {
    /// A book move for the position, already checked for pseudo-legality.
    fn probe(&self, board: &Board) -> Option<Move>;

    /// Human-readable state for the `book` command.
    fn describe(&self) -> String {
        "no book loaded".to_owned()
    }
}

/// The default oracle: no book files configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBook;

impl BookOracle for NoBook {
    fn probe(&self, _board: &Board) -> Option<Move> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FEN_STARTPOS;

    #[test]
    fn no_book_never_suggests() {
        let board = Board::from_fen(FEN_STARTPOS).unwrap();
        assert_eq!(NoBook.probe(&board), None);
        assert!(!NoBook.describe().is_empty());
    }
}
