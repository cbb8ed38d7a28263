//! Time budgeting. `Limits` collects everything the `go` command said,
//! `start_now` freezes it into a `TimeMan` handle that every worker clones;
//! the stop flag inside is the one cooperative cancellation point.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

// Plan at most this many moves ahead when dividing the clock.
const MOVE_HORIZON: u32 = 50;
// In trouble we may overshoot the optimum by this ratio...
const MAX_RATIO: f64 = 7.3;
// ...but never steal more than this share from future moves.
const STEAL_RATIO: f64 = 0.34;

#[derive(Debug, Clone)]
pub struct Limits {
    depth_limit: Option<u32>,
    node_limit: Option<u64>,
    movetime: Option<i64>,
    mate: Option<u32>,
    infinite: bool,
    ponder: bool,
    time: Option<i64>,
    inc: i64,
    movestogo: Option<u32>,
    game_ply: u32,
    overhead_ms: i64,
    slow_mover: i64,
}

impl Limits {
    pub fn new() -> Self {
        Self {
            depth_limit: None,
            node_limit: None,
            movetime: None,
            mate: None,
            infinite: false,
            ponder: false,
            time: None,
            inc: 0,
            movestogo: None,
            game_ply: 0,
            overhead_ms: 10,
            slow_mover: 100,
        }
    }

    pub fn depth(mut self, limit: Option<u32>) -> Self {
        self.depth_limit = limit;
        self
    }

    pub fn nodes(mut self, limit: Option<u64>) -> Self {
        self.node_limit = limit;
        self
    }

    pub fn movetime(mut self, limit: Option<i64>) -> Self {
        self.movetime = limit;
        self
    }

    pub fn mate(mut self, limit: Option<u32>) -> Self {
        self.mate = limit;
        self
    }

    pub fn infinite(mut self, infinite: bool) -> Self {
        self.infinite = infinite;
        self
    }

    pub fn ponder(mut self, ponder: bool) -> Self {
        self.ponder = ponder;
        self
    }

    pub fn clock(mut self, time: Option<i64>, inc: Option<i64>, movestogo: Option<u32>) -> Self {
        self.time = time;
        self.inc = inc.unwrap_or(0);
        self.movestogo = movestogo;
        self
    }

    pub fn game_ply(mut self, ply: u32) -> Self {
        self.game_ply = ply;
        self
    }

    pub fn overhead_ms(mut self, ms: i64) -> Self {
        self.overhead_ms = ms;
        self
    }

    pub fn slow_mover(mut self, percent: i64) -> Self {
        self.slow_mover = percent;
        self
    }

    /// Splits the remaining clock into an optimum and a maximum budget.
    fn compute_budget(&self) -> Option<(Duration, Duration)> {
        if let Some(movetime) = self.movetime {
            let fixed = Duration::from_millis(movetime.max(1) as u64);
            return Some((fixed, fixed));
        }

        let time = self.time?;
        let ply = self.game_ply as i32;

        let mut optimum = time;
        let mut maximum = time;
        let max_mtg = self.movestogo.map_or(MOVE_HORIZON, |mtg| mtg.min(MOVE_HORIZON));

        // Try every hypothetical moves-to-go and keep the stingiest split;
        // the largest horizon usually wins.
        for hyp_mtg in 1..=max_mtg {
            let hyp_time = (time + self.inc * (hyp_mtg as i64 - 1)
                - self.overhead_ms * (2 + hyp_mtg.min(40) as i64))
                .max(0);

            let t1 = 1 + remaining(hyp_time, hyp_mtg, ply, self.slow_mover, 1.0, 0.0);
            let t2 = 1 + remaining(hyp_time, hyp_mtg, ply, self.slow_mover, MAX_RATIO, STEAL_RATIO);

            optimum = optimum.min(t1);
            maximum = maximum.min(t2);
        }

        if self.ponder {
            optimum += optimum / 4;
        }

        Some((
            Duration::from_millis(optimum.max(1) as u64),
            Duration::from_millis(maximum.max(1) as u64),
        ))
    }

    pub fn start_now(&self) -> TimeMan {
        let budget = if self.infinite { None } else { self.compute_budget() };
        let (optimum, maximum) = budget.unzip();

        TimeMan {
            start_time: Instant::now(),
            optimum,
            maximum,
            node_limit: self.node_limit.unwrap_or(u64::MAX),
            depth_limit: self.depth_limit.unwrap_or(u32::MAX),
            mate_limit: self.mate,
            infinite: self.infinite,
            pondering: Arc::new(AtomicBool::new(self.ponder)),
            stop: Arc::new(AtomicBool::new(false)),
            cached_stop: false,
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::new()
    }
}

/// A skew-logistic weight for "how important is the move at this game ply",
/// fitted on how long real games stay undecided.
fn importance(ply: i32) -> f64 {
    const XSCALE: f64 = 6.85;
    const XSHIFT: f64 = 64.5;
    const SKEW: f64 = 0.171;

    (1.0 + ((ply as f64 - XSHIFT) / XSCALE).exp()).powf(-SKEW) + f64::MIN_POSITIVE
}

fn remaining(my_time: i64, movestogo: u32, ply: i32, slow_mover: i64, max_ratio: f64, steal_ratio: f64) -> i64 {
    let move_importance = importance(ply) * slow_mover as f64 / 100.0;
    let mut other_moves_importance = 0.0;

    for i in 1..movestogo as i32 {
        other_moves_importance += importance(ply + 2 * i);
    }

    let ratio1 = (max_ratio * move_importance) / (max_ratio * move_importance + other_moves_importance);
    let ratio2 = (move_importance + steal_ratio * other_moves_importance)
        / (move_importance + other_moves_importance);

    (my_time as f64 * ratio1.min(ratio2)) as i64
}

#[derive(Debug, Clone)]
pub struct TimeMan {
    start_time: Instant,
    optimum: Option<Duration>,
    maximum: Option<Duration>,
    node_limit: u64,
    depth_limit: u32,
    mate_limit: Option<u32>,
    infinite: bool,
    /// While pondering, budget checks are suspended until `ponderhit`.
    pondering: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    cached_stop: bool,
}

impl TimeMan {
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn depth_limit(&self) -> u32 {
        self.depth_limit
    }

    pub fn node_limit(&self) -> u64 {
        self.node_limit
    }

    pub fn mate_limit(&self) -> Option<u32> {
        self.mate_limit
    }

    pub fn optimum(&self) -> Option<Duration> {
        self.optimum
    }

    pub fn maximum(&self) -> Option<Duration> {
        self.maximum
    }

    pub fn is_managed(&self) -> bool {
        self.maximum.is_some()
    }

    /// `go infinite`: never announce before an explicit `stop`.
    pub fn is_infinite(&self) -> bool {
        self.infinite
    }

    pub fn raw_stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn ponderhit(&self) {
        self.pondering.store(false, Ordering::Relaxed);
    }

    pub fn is_pondering(&self) -> bool {
        self.pondering.load(Ordering::Relaxed)
    }

    /// Should the search unwind? Checked at node granularity; with
    /// `use_cached` the expensive clock read is skipped except every 1024
    /// nodes.
    pub fn stop(&mut self, nodes: u64, use_cached: bool) -> bool {
        if self.cached_stop {
            return true;
        }

        if use_cached && nodes.trailing_zeros() < 10 {
            return false;
        }

        let mut should_stop = self.stop.load(Ordering::Relaxed) || nodes >= self.node_limit;

        if !should_stop && !self.is_pondering() {
            if let Some(maximum) = self.maximum {
                should_stop = self.elapsed() >= maximum;
            }
        }

        self.cached_stop = should_stop;
        should_stop
    }

    /// Iteration-boundary check for the main worker: stop once the scaled
    /// optimum is spent. `factor` folds in best-move and score stability.
    pub fn past_optimum(&self, factor: f64) -> bool {
        if self.is_pondering() {
            return false;
        }

        match self.optimum {
            Some(optimum) => self.elapsed().as_secs_f64() >= optimum.as_secs_f64() * factor,
            None => false,
        }
    }

    pub fn force_stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.cached_stop = true;
    }
}
