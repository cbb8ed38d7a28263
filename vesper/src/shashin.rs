//! Position classification on the Petrosian (defensive) to Tal (attacking)
//! axis. The main worker refreshes the classification at iteration
//! boundaries; every worker reads the packed snapshot with one acquire
//! load and gates its pruning heuristics on it.

use crate::wdl;
use std::sync::atomic::{AtomicU64, Ordering};
use vesper_types::{Eval, TryFromPrimitive};

/// Thirteen ranges along the axis, in ascending win-probability order,
/// plus the chaos range used at exactly 50% with high variance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, TryFromPrimitive, vesper_types::IntoPrimitive)]
#[repr(u8)]
pub enum ShashinRange {
    HighPetrosian,
    MiddleHighPetrosian,
    MiddlePetrosian,
    MiddleLowPetrosian,
    LowPetrosian,
    CapablancaPetrosian,
    Capablanca,
    CapablancaTal,
    LowTal,
    MiddleLowTal,
    MiddleTal,
    MiddleHighTal,
    HighTal,
    TalCapablancaPetrosian,
}

const HIGH_PETROSIAN_MAX: u8 = 5;
const MIDDLE_HIGH_PETROSIAN_MAX: u8 = 10;
const MIDDLE_PETROSIAN_MAX: u8 = 15;
const MIDDLE_LOW_PETROSIAN_MAX: u8 = 20;
const LOW_PETROSIAN_MAX: u8 = 24;
const CAPABLANCA_PETROSIAN_MAX: u8 = 49;
const CAPABLANCA_MAX: u8 = 50;
const CAPABLANCA_TAL_MAX: u8 = 75;
const LOW_TAL_MAX: u8 = 79;
const MIDDLE_LOW_TAL_MAX: u8 = 84;
const MIDDLE_TAL_MAX: u8 = 89;
const MIDDLE_HIGH_TAL_MAX: u8 = 94;

/// Maps a win probability in percent to its range. The chaos flag routes
/// the exact 50% case to the unstable three-way range.
pub fn classify(win_probability: u8, chaos: bool) -> ShashinRange {
    debug_assert!(win_probability <= 100);

    match win_probability {
        p if p <= HIGH_PETROSIAN_MAX => ShashinRange::HighPetrosian,
        p if p <= MIDDLE_HIGH_PETROSIAN_MAX => ShashinRange::MiddleHighPetrosian,
        p if p <= MIDDLE_PETROSIAN_MAX => ShashinRange::MiddlePetrosian,
        p if p <= MIDDLE_LOW_PETROSIAN_MAX => ShashinRange::MiddleLowPetrosian,
        p if p <= LOW_PETROSIAN_MAX => ShashinRange::LowPetrosian,
        p if p <= CAPABLANCA_PETROSIAN_MAX => ShashinRange::CapablancaPetrosian,
        p if p <= CAPABLANCA_MAX => {
            if chaos {
                ShashinRange::TalCapablancaPetrosian
            } else {
                ShashinRange::Capablanca
            }
        }
        p if p <= CAPABLANCA_TAL_MAX => ShashinRange::CapablancaTal,
        p if p <= LOW_TAL_MAX => ShashinRange::LowTal,
        p if p <= MIDDLE_LOW_TAL_MAX => ShashinRange::MiddleLowTal,
        p if p <= MIDDLE_TAL_MAX => ShashinRange::MiddleTal,
        p if p <= MIDDLE_HIGH_TAL_MAX => ShashinRange::MiddleHighTal,
        _ => ShashinRange::HighTal,
    }
}

impl ShashinRange {
    pub fn is_petrosian(self) -> bool {
        matches!(
            self,
            Self::HighPetrosian
                | Self::MiddleHighPetrosian
                | Self::MiddlePetrosian
                | Self::MiddleLowPetrosian
                | Self::LowPetrosian
        )
    }

    pub fn is_tal(self) -> bool {
        matches!(
            self,
            Self::LowTal | Self::MiddleLowTal | Self::MiddleTal | Self::MiddleHighTal | Self::HighTal
        )
    }
}

/// Persona options seed the classifier before any search has run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ShashinConfig {
    pub high_tal: bool,
    pub middle_tal: bool,
    pub low_tal: bool,
    pub capablanca: bool,
    pub high_petrosian: bool,
    pub middle_petrosian: bool,
    pub low_petrosian: bool,
}

impl ShashinConfig {
    /// The range seeded by the persona switches; mixed selections land on
    /// the chaos range, none at all on Capablanca.
    pub fn seeded_range(&self) -> ShashinRange {
        let tal = self.high_tal || self.middle_tal || self.low_tal;
        let petrosian = self.high_petrosian || self.middle_petrosian || self.low_petrosian;

        match (tal, self.capablanca, petrosian) {
            (true, false, false) if self.high_tal => ShashinRange::HighTal,
            (true, false, false) if self.middle_tal => ShashinRange::MiddleTal,
            (true, false, false) => ShashinRange::LowTal,
            (false, false, true) if self.high_petrosian => ShashinRange::HighPetrosian,
            (false, false, true) if self.middle_petrosian => ShashinRange::MiddlePetrosian,
            (false, false, true) => ShashinRange::LowPetrosian,
            (false, true, false) | (false, false, false) => ShashinRange::Capablanca,
            _ => ShashinRange::TalCapablancaPetrosian,
        }
    }
}

/// Heuristic gates derived from the classification. Workers read these
/// instead of re-deriving range checks at every node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShashinState {
    pub range: ShashinRange,
    pub root_depth: u32,
    pub use_null_move: bool,
    pub early_pruning_parent: bool,
    pub early_pruning_child: bool,
    pub is_strategical: bool,
    pub is_tactical: bool,
}

impl ShashinState {
    fn from_range(range: ShashinRange, root_depth: u32) -> Self {
        // Defensive positions are zugzwang-prone, so the deep Petrosian
        // band gives up null-move pruning; chaotic positions keep every
        // heuristic honest by tightening nothing.
        let deep_petrosian = matches!(
            range,
            ShashinRange::HighPetrosian | ShashinRange::MiddleHighPetrosian | ShashinRange::MiddlePetrosian
        );

        Self {
            range,
            root_depth,
            use_null_move: !deep_petrosian,
            early_pruning_parent: range != ShashinRange::TalCapablancaPetrosian && !deep_petrosian,
            early_pruning_child: !matches!(range, ShashinRange::HighTal | ShashinRange::TalCapablancaPetrosian),
            is_strategical: matches!(
                range,
                ShashinRange::CapablancaPetrosian | ShashinRange::Capablanca | ShashinRange::CapablancaTal
            ),
            is_tactical: range.is_tal() || range == ShashinRange::TalCapablancaPetrosian,
        }
    }

    fn pack(self) -> u64 {
        u8::from(self.range) as u64
            | (self.root_depth as u64 & 0xFFFF) << 8
            | (self.use_null_move as u64) << 24
            | (self.early_pruning_parent as u64) << 25
            | (self.early_pruning_child as u64) << 26
            | (self.is_strategical as u64) << 27
            | (self.is_tactical as u64) << 28
    }

    fn unpack(raw: u64) -> Self {
        Self {
            range: ShashinRange::try_from_primitive(raw as u8).unwrap_or(ShashinRange::Capablanca),
            root_depth: (raw >> 8 & 0xFFFF) as u32,
            use_null_move: raw >> 24 & 1 != 0,
            early_pruning_parent: raw >> 25 & 1 != 0,
            early_pruning_child: raw >> 26 & 1 != 0,
            is_strategical: raw >> 27 & 1 != 0,
            is_tactical: raw >> 28 & 1 != 0,
        }
    }
}

/// Owned by the driver, shared read-only with all workers.
pub struct ShashinManager {
    config: ShashinConfig,
    state: AtomicU64,
}

impl ShashinManager {
    pub fn new(config: ShashinConfig) -> Self {
        let state = ShashinState::from_range(config.seeded_range(), 0);
        Self {
            config,
            state: AtomicU64::new(state.pack()),
        }
    }

    pub fn config(&self) -> ShashinConfig {
        self.config
    }

    pub fn snapshot(&self) -> ShashinState {
        ShashinState::unpack(self.state.load(Ordering::Acquire))
    }

    /// Reclassifies from a completed iteration's score. Writes only when
    /// the new information is deeper than what the snapshot was built from
    /// (or on the initial, depth-zero seed), and never mid-node.
    pub fn update(&self, value: Eval, material: i32, depth: u32) {
        let current = self.snapshot();
        if depth != 0 && depth <= current.root_depth {
            return;
        }

        let chaos = self.config.seeded_range() == ShashinRange::TalCapablancaPetrosian;
        let probability = wdl::win_probability(value, material);
        let state = ShashinState::from_range(classify(probability, chaos), depth);
        self.state.store(state.pack(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_probability_maps_to_exactly_one_range() {
        for p in 0..=100u8 {
            // No panic and a stable result is the coverage property.
            let range = classify(p, false);
            let again = classify(p, false);
            assert_eq!(range, again);
        }
    }

    #[test]
    fn axis_is_monotone_outside_the_chaos_point() {
        let mut last = classify(0, false);
        assert_eq!(last, ShashinRange::HighPetrosian);

        for p in 1..=100u8 {
            let range = classify(p, false);
            assert!(range >= last, "range regressed at {p}");
            last = range;
        }
        assert_eq!(classify(100, false), ShashinRange::HighTal);
    }

    #[test]
    fn fifty_percent_special_case() {
        assert_eq!(classify(50, false), ShashinRange::Capablanca);
        assert_eq!(classify(50, true), ShashinRange::TalCapablancaPetrosian);
        assert_eq!(classify(49, true), ShashinRange::CapablancaPetrosian);
        assert_eq!(classify(51, true), ShashinRange::CapablancaTal);
    }

    #[test]
    fn manager_only_deepens() {
        let manager = ShashinManager::new(ShashinConfig::default());
        assert_eq!(manager.snapshot().range, ShashinRange::Capablanca);

        // A strong score at depth 8 flips the class toward Tal.
        manager.update(Eval::new(600), 58, 8);
        let deep = manager.snapshot();
        assert!(deep.range.is_tal());

        // A shallower update must not overwrite it.
        manager.update(Eval::new(-600), 58, 4);
        assert_eq!(manager.snapshot().range, deep.range);

        // A deeper one may.
        manager.update(Eval::new(-600), 58, 12);
        assert!(manager.snapshot().range.is_petrosian());
    }

    #[test]
    fn defensive_positions_disable_null_move() {
        let manager = ShashinManager::new(ShashinConfig::default());
        manager.update(Eval::new(-2000), 58, 6);
        let state = manager.snapshot();
        assert!(state.range.is_petrosian());
        assert!(!state.use_null_move);

        let manager = ShashinManager::new(ShashinConfig::default());
        manager.update(Eval::ZERO, 58, 6);
        assert!(manager.snapshot().use_null_move);
    }

    #[test]
    fn persona_seeding() {
        let config = ShashinConfig { high_petrosian: true, ..Default::default() };
        assert_eq!(config.seeded_range(), ShashinRange::HighPetrosian);

        let config = ShashinConfig { high_tal: true, capablanca: true, ..Default::default() };
        assert_eq!(config.seeded_range(), ShashinRange::TalCapablancaPetrosian);

        assert_eq!(ShashinConfig::default().seeded_range(), ShashinRange::Capablanca);
    }
}
