use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

/// Synthetic trade result for the simulated trading mode
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedOutcome {
    pub success: bool,
    pub profit: Decimal,
}

/// Produces one synthetic outcome per strategy step
///
/// 60% of steps succeed with a profit in [0, 5); the rest lose up to 3.
/// Amounts have two decimal places.
pub struct Simulator {
    rng: StdRng,
    success_probability: f64,
}

impl Simulator {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic simulator for tests and reproducible paper runs
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            success_probability: 0.6,
        }
    }

    pub fn next_outcome(&mut self) -> SimulatedOutcome {
        let success = self.rng.gen_bool(self.success_probability);
        let cents: i64 = if success {
            self.rng.gen_range(0..500)
        } else {
            -self.rng.gen_range(0..300)
        };

        SimulatedOutcome {
            success,
            profit: Decimal::new(cents, 2),
        }
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}
