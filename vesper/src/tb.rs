//! Tablebase seam. The search asks for a WDL verdict on low-material
//! positions; whether that is answered by memory-mapped Syzygy files or
//! nothing at all is outside the core.

use crate::board::Board;
use vesper_types::Eval;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TbVerdict {
    Loss,
    Draw,
    Win,
}

impl TbVerdict {
    /// Score inside the tablebase window, distance-adjusted by the caller.
    pub fn value(self, ply: usize) -> Eval {
        match self {
            Self::Win => Eval::TB_WIN - ply as i32,
            Self::Draw => Eval::DRAW,
            Self::Loss => -Eval::TB_WIN + ply as i32,
        }
    }
}

pub trait TableBase: Send + Sync {
    /// Maximum piece count the backend covers; zero disables probing.
    fn max_pieces(&self) -> u32 {
        0
    }

    fn probe_wdl(&self, board: &Board) -> Option<TbVerdict>;
}

/// Default backend: no tablebases on disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTableBase;

impl TableBase for NoTableBase {
    fn probe_wdl(&self, _board: &Board) -> Option<TbVerdict> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_values_stay_in_the_tb_window() {
        for ply in [0, 10, 60] {
            let win = TbVerdict::Win.value(ply);
            let loss = TbVerdict::Loss.value(ply);
            assert!(win.is_tb() || win == Eval::TB_WIN);
            assert!(win > Eval::ZERO && loss < Eval::ZERO);
            assert_eq!(win, -loss);
        }
        assert_eq!(TbVerdict::Draw.value(5), Eval::DRAW);
    }
}
