//! Win/draw/loss model. A cubic in material produces the `(a, b)` logistic
//! parameters; the 8001x62 win-probability grid is filled once at startup
//! and indexed by clamped evaluation and material.

use lazy_static::lazy_static;
use vesper_types::Eval;

const VALUE_RANGE: i32 = 4000;
const MATERIAL_MIN: i32 = 17;
const MATERIAL_MAX: i32 = 78;
const MATERIAL_SPAN: usize = (MATERIAL_MAX - MATERIAL_MIN + 1) as usize;

const AS: [f64; 4] = [-13.500_301_98, 40.927_808_83, -36.827_535_45, 386.830_040_70];
const BS: [f64; 4] = [96.533_548_96, -165.790_583_88, 90.896_790_19, 49.295_618_89];

/// `a = p_a(material)`, `b = p_b(material)`, anchored at material 58.
fn win_rate_params(material: i32) -> (f64, f64) {
    let m = material.clamp(MATERIAL_MIN, MATERIAL_MAX) as f64 / 58.0;

    let a = ((AS[0] * m + AS[1]) * m + AS[2]) * m + AS[3];
    let b = ((BS[0] * m + BS[1]) * m + BS[2]) * m + BS[3];
    (a, b)
}

/// Win rate in per mille for the side to move.
fn win_rate(value: f64, a: f64, b: f64) -> f64 {
    0.5 + 1000.0 / (1.0 + ((a - value) / b).exp())
}

fn index(value: i32, material: i32) -> usize {
    debug_assert!((-VALUE_RANGE..=VALUE_RANGE).contains(&value));
    debug_assert!((MATERIAL_MIN..=MATERIAL_MAX).contains(&material));
    (value + VALUE_RANGE) as usize * MATERIAL_SPAN + (material - MATERIAL_MIN) as usize
}

lazy_static! {
    /// Win probability percent (win + draw/2) for every (value, material)
    /// pair in the fitted region.
    static ref WIN_PROBABILITIES: Vec<u8> = {
        let mut grid = vec![0u8; (2 * VALUE_RANGE as usize + 1) * MATERIAL_SPAN];
        for material in MATERIAL_MIN..=MATERIAL_MAX {
            let (a, b) = win_rate_params(material);
            for value in -VALUE_RANGE..=VALUE_RANGE {
                let w = win_rate(value as f64, a, b);
                let l = win_rate(-value as f64, a, b);
                let d = (1000.0 - w - l).max(0.0);
                let probability = ((w + d / 2.0) / 10.0).round();
                grid[index(value, material)] = probability as u8;
            }
        }
        grid
    };
}

/// Win probability in percent (0..=100) from the precomputed grid.
pub fn win_probability(value: Eval, material: i32) -> u8 {
    let value = value.inner().clamp(-VALUE_RANGE, VALUE_RANGE);
    let material = material.clamp(MATERIAL_MIN, MATERIAL_MAX);
    WIN_PROBABILITIES[index(value, material)]
}

/// Full (win, draw, loss) triple in per mille, as the UCI `wdl` field
/// reports it.
pub fn wdl(value: Eval, material: i32) -> (u32, u32, u32) {
    let (a, b) = win_rate_params(material);
    let v = value.inner().clamp(-VALUE_RANGE, VALUE_RANGE) as f64;

    let w = win_rate(v, a, b).clamp(0.0, 1000.0);
    let l = win_rate(-v, a, b).clamp(0.0, 1000.0);
    let d = (1000.0 - w - l).max(0.0);
    (w as u32, d as u32, l as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_position_is_near_fifty() {
        let p = win_probability(Eval::ZERO, 58);
        assert!((48..=52).contains(&p), "probability {p}");
    }

    #[test]
    fn monotone_in_value() {
        for material in [17, 30, 58, 78] {
            let mut last = 0;
            for value in (-4000..=4000).step_by(250) {
                let p = win_probability(Eval::new(value), material);
                assert!(p >= last, "value {value} material {material}");
                last = p;
            }
        }
    }

    #[test]
    fn extremes_saturate() {
        assert!(win_probability(Eval::new(4000), 58) >= 95);
        assert!(win_probability(Eval::new(-4000), 58) <= 5);
    }

    #[test]
    fn wdl_sums_to_a_thousand() {
        for value in [-2000, -300, 0, 300, 2000] {
            let (w, d, l) = wdl(Eval::new(value), 58);
            let sum = w + d + l;
            assert!((995..=1005).contains(&sum), "sum {sum} at value {value}");
        }
    }

    #[test]
    fn out_of_range_inputs_are_clamped() {
        assert_eq!(
            win_probability(Eval::new(30_000), 100),
            win_probability(Eval::new(4000), 78)
        );
        assert_eq!(
            win_probability(Eval::new(-30_000), 1),
            win_probability(Eval::new(-4000), 17)
        );
    }
}
