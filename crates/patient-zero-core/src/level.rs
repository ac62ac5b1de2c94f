//! Experience and level derivation.
//!
//! Experience and level are never stored independently of the infection
//! counters: both are recomputed from `(infected_count, infected_by_count)`
//! on every commit, so deriving twice from the same counters is a no-op.
//!
//! # Level Formula
//!
//! ```text
//! passive = infected_by_count * points
//! active  = infected_count * points
//! xp      = active + passive
//! level   = max(1, floor(sqrt(22/7 * passive + 2^(active / 65)) - 2))
//! ```
//!
//! Being infected grows the level roughly with the square root of passive
//! experience, while infecting others contributes through an exponential
//! term that only kicks in after a few dozen infections.

use patient_zero_types::UserRecord;

/// Tuning constant applied to passive experience.
const PASSIVE_WEIGHT: f64 = 22.0 / 7.0;

/// Divisor applied to active experience before exponentiation.
const ACTIVE_SCALE: f64 = 65.0;

/// Offset subtracted from the curve before flooring.
const LEVEL_OFFSET: f64 = 2.0;

/// Lowest level any participant can hold once stats exist.
pub const MIN_LEVEL: u32 = 1;

/// Experience and level derived from a pair of infection counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Total experience.
    pub experience: u32,
    /// Derived level.
    pub level: u32,
}

/// Derive experience and level from infection counters.
///
/// Pure and deterministic. Integer products saturate at `u32::MAX`.
pub fn derive_level(infected_count: u32, infected_by_count: u32, points: u32) -> Progress {
    let passive = infected_by_count.saturating_mul(points);
    let active = infected_count.saturating_mul(points);
    let experience = active.saturating_add(passive);

    let curve = PASSIVE_WEIGHT
        .mul_add(f64::from(passive), (f64::from(active) / ACTIVE_SCALE).exp2())
        .sqrt()
        - LEVEL_OFFSET;

    Progress {
        experience,
        level: floor_to_level(curve),
    }
}

/// Recompute a record's experience and level from its counters.
///
/// Returns `true` if the level went up.
pub fn apply_progress(record: &mut UserRecord, points: u32) -> bool {
    let progress = derive_level(record.infected_count, record.infected_by_count, points);
    let leveled_up = progress.level > record.level;
    record.experience = progress.experience;
    record.level = progress.level;
    leveled_up
}

/// Floor a curve value into a level, clamped to `[MIN_LEVEL, u32::MAX]`.
fn floor_to_level(curve: f64) -> u32 {
    let floored = curve.floor();
    if floored.is_nan() || floored < f64::from(MIN_LEVEL) {
        MIN_LEVEL
    } else if floored >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        // Safe: floored is an integer in [1, u32::MAX).
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let level = floored as u32;
        level
    }
}

#[cfg(test)]
mod tests {
    use patient_zero_types::ParticipantId;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    #[test]
    fn zero_counters_are_level_one() {
        assert_eq!(
            derive_level(0, 0, 5),
            Progress {
                experience: 0,
                level: 1
            }
        );
        assert_eq!(derive_level(0, 0, 0).level, 1);
    }

    #[test]
    fn ten_infections_at_five_points() {
        // active = 50: sqrt(2^(50/65)) - 2 = 1.305... - 2 < 1
        let progress = derive_level(10, 0, 5);
        assert_eq!(progress.experience, 50);
        assert_eq!(progress.level, 1);
    }

    #[test]
    fn passive_experience_grows_level() {
        // passive = 50: sqrt(22/7 * 50 + 1) - 2 = 12.58... - 2 -> 10
        let progress = derive_level(0, 10, 5);
        assert_eq!(progress.experience, 50);
        assert_eq!(progress.level, 10);
    }

    #[test]
    fn active_experience_eventually_dominates() {
        // active = 650: sqrt(2^10) - 2 = 30
        assert_eq!(derive_level(130, 0, 5).level, 30);
    }

    #[test]
    fn mixed_counters_sum_experience() {
        let progress = derive_level(3, 4, 5);
        assert_eq!(progress.experience, 35);
        // sqrt(22/7 * 20 + 2^(15/65)) - 2 = 8.01... - 2 -> 6
        assert_eq!(progress.level, 6);
    }

    #[test]
    fn derivation_is_idempotent() {
        let mut record = UserRecord::new(ParticipantId::new(1), "a");
        record.infected_count = 2;
        record.infected_by_count = 3;

        assert!(apply_progress(&mut record, 5));
        let first = record.clone();
        assert!(!apply_progress(&mut record, 5));
        assert_eq!(record, first);
    }

    #[test]
    fn saturates_instead_of_overflowing() {
        let progress = derive_level(u32::MAX, u32::MAX, u32::MAX);
        assert_eq!(progress.experience, u32::MAX);
        assert_eq!(progress.level, u32::MAX);
    }

    #[test]
    fn monotone_in_infected_count() {
        for infected_by in [0_u32, 1, 7, 40] {
            let mut previous = 0;
            for infected in 0..400_u32 {
                let level = derive_level(infected, infected_by, 5).level;
                assert!(
                    level >= previous,
                    "level dropped at infected={infected} infected_by={infected_by}"
                );
                previous = level;
            }
        }
    }

    #[test]
    fn monotone_in_infected_by_count() {
        for infected in [0_u32, 1, 25, 200] {
            let mut previous = 0;
            for infected_by in 0..400_u32 {
                let level = derive_level(infected, infected_by, 5).level;
                assert!(
                    level >= previous,
                    "level dropped at infected={infected} infected_by={infected_by}"
                );
                previous = level;
            }
        }
    }

    #[test]
    fn monotone_for_random_pairs() {
        let mut rng = SmallRng::seed_from_u64(0x5eed);
        for _ in 0..2_000 {
            let infected: u32 = rng.random_range(0..5_000);
            let infected_by: u32 = rng.random_range(0..5_000);
            let points: u32 = rng.random_range(0..20);
            let base = derive_level(infected, infected_by, points);
            let more_active = derive_level(infected.saturating_add(1), infected_by, points);
            let more_passive = derive_level(infected, infected_by.saturating_add(1), points);
            assert!(more_active.level >= base.level);
            assert!(more_passive.level >= base.level);
            assert!(more_active.experience >= base.experience);
            assert!(more_passive.experience >= base.experience);
        }
    }
}
