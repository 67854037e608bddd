use crate::network::types::probability::Probability;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Random packet loss.
///
/// Every decision consumes exactly one uniform draw from the policy's own
/// RNG, so a seeded policy produces a reproducible drop sequence.
#[derive(Debug)]
pub struct DropPolicy {
    probability: Probability,
    rng: StdRng,
}

impl DropPolicy {
    /// Creates a policy seeded from the operating system.
    pub fn new(probability: Probability) -> Self {
        Self::with_rng(probability, StdRng::from_os_rng())
    }

    /// Creates a policy with a fixed seed.
    pub fn seeded(probability: Probability, seed: u64) -> Self {
        Self::with_rng(probability, StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(probability: Probability, rng: StdRng) -> Self {
        Self { probability, rng }
    }

    pub fn probability(&self) -> Probability {
        self.probability
    }

    /// Returns `true` when the current packet should be discarded.
    pub fn should_drop(&mut self) -> bool {
        self.probability.roll(&mut self.rng)
    }
}
