//! Distance-weighted infection probability.
//!
//! A candidate at distance `d` (1 = the message right before the trigger)
//! inside a window of `n` messages is infected with probability
//!
//! ```text
//! p(d) = c - (d / n)^4 * c
//! ```
//!
//! where `c` is the configured infection chance in percent. The quartic
//! fall-off keeps nearly the full chance for the closest neighbours and
//! drops to zero at the edge of the window.

use crate::dice::ROLL_MAX;

/// Infection probability in percent for a candidate at `distance`.
///
/// Returns `0.0` for an empty window. Distances past the window yield
/// negative values, which never infect.
pub fn infection_probability(distance: u32, window: u32, chance: u32) -> f64 {
    if window == 0 {
        return 0.0;
    }
    let c = f64::from(chance);
    let ratio = f64::from(distance) / f64::from(window);
    c.mul_add(-ratio.powi(4), c)
}

/// The highest roll that still infects for the given probability.
///
/// This is `floor(p)`, clamped to `[0, ROLL_MAX]`: a probability at or
/// below zero never infects and anything above 100 always does.
pub fn infection_threshold(probability: f64) -> u32 {
    let floored = probability.floor();
    if floored.is_nan() || floored <= 0.0 {
        0
    } else if floored >= f64::from(ROLL_MAX) {
        ROLL_MAX
    } else {
        // Safe: floored is an integer in (0, ROLL_MAX).
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let threshold = floored as u32;
        threshold
    }
}

/// Whether a percentile `roll` infects at the given `threshold`.
pub const fn roll_infects(roll: u32, threshold: u32) -> bool {
    roll <= threshold && threshold > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn nearest_neighbour_keeps_almost_full_chance() {
        // N = 5, c = 5: p(1) = 5 * (1 - 1/625)
        let p = infection_probability(1, 5, 5);
        assert!(close(p, 5.0 * (1.0 - 1.0 / 625.0)));
        assert_eq!(infection_threshold(p), 4);
    }

    #[test]
    fn edge_of_window_is_zero() {
        for window in 1..=20 {
            let p = infection_probability(window, window, 37);
            assert!(close(p, 0.0), "p(N) should be 0 for N={window}");
            assert_eq!(infection_threshold(p), 0);
        }
    }

    #[test]
    fn probability_is_non_increasing_with_distance() {
        for window in 1..=12_u32 {
            for chance in [0_u32, 1, 5, 50, 100] {
                let mut previous = f64::INFINITY;
                for distance in 1..=window {
                    let p = infection_probability(distance, window, chance);
                    assert!(p <= previous, "p rose at d={distance} N={window} c={chance}");
                    previous = p;
                }
            }
        }
    }

    #[test]
    fn scenario_roll_four_infects_roll_five_does_not() {
        let threshold = infection_threshold(infection_probability(1, 5, 5));
        assert!(roll_infects(1, threshold));
        assert!(roll_infects(4, threshold));
        assert!(!roll_infects(5, threshold));
        assert!(!roll_infects(100, threshold));
    }

    #[test]
    fn zero_threshold_never_infects() {
        assert!(!roll_infects(0, 0));
        assert!(!roll_infects(1, 0));
    }

    #[test]
    fn chance_above_hundred_is_clamped() {
        let threshold = infection_threshold(infection_probability(1, 100, 250));
        assert_eq!(threshold, ROLL_MAX);
        assert!(roll_infects(ROLL_MAX, threshold));
    }

    #[test]
    fn past_window_and_empty_window_never_infect() {
        assert_eq!(infection_threshold(infection_probability(6, 5, 100)), 0);
        assert_eq!(infection_threshold(infection_probability(1, 0, 100)), 0);
    }
}
