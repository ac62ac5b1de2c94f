//! Percentile dice for infection rolls.
//!
//! Each candidate gets one roll of a uniform integer in `[1, 100]`. The
//! roll is behind a trait so tests can script exact outcomes.

use std::collections::VecDeque;

use rand::Rng;

/// Lowest face of the percentile die.
pub const ROLL_MIN: u32 = 1;

/// Highest face of the percentile die.
pub const ROLL_MAX: u32 = 100;

/// A source of percentile rolls.
pub trait Dice: Send {
    /// Roll a uniform integer in `[ROLL_MIN, ROLL_MAX]`.
    fn roll_percent(&mut self) -> u32;
}

/// Dice backed by a [`rand`] generator.
#[derive(Debug, Clone)]
pub struct RandomDice<R> {
    rng: R,
}

impl<R: Rng + Send> RandomDice<R> {
    /// Wrap a random number generator.
    pub const fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: Rng + Send> Dice for RandomDice<R> {
    fn roll_percent(&mut self) -> u32 {
        self.rng.random_range(ROLL_MIN..=ROLL_MAX)
    }
}

/// Dice that replay a fixed sequence of rolls.
///
/// Once the script runs out every further roll is [`ROLL_MAX`], which
/// never infects unless the chance is a full 100%.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDice {
    rolls: VecDeque<u32>,
    consumed: usize,
}

impl ScriptedDice {
    /// Create dice that return `rolls` in order.
    pub fn new(rolls: impl IntoIterator<Item = u32>) -> Self {
        Self {
            rolls: rolls.into_iter().collect(),
            consumed: 0,
        }
    }

    /// Number of rolls taken so far.
    pub const fn consumed(&self) -> usize {
        self.consumed
    }
}

impl Dice for ScriptedDice {
    fn roll_percent(&mut self) -> u32 {
        self.consumed = self.consumed.saturating_add(1);
        self.rolls.pop_front().unwrap_or(ROLL_MAX)
    }
}
