//! Simulated collaborators for the dispatch engine.
//!
//! - [`SimulatedDirectory`] / [`SimulatedSender`]: seeded, reproducible
//!   stand-ins for a real directory and messaging API.
//! - [`StaticDirectory`] / [`ScriptedSender`]: fixed fixtures for tests.
//!
//! Simulated outcomes are derived from `(seed, recipient, attempt)` rather
//! than a shared random stream, so a run is reproducible regardless of how
//! workers interleave.

pub mod directory;
pub mod scripted;
pub mod sender;

pub use directory::{SimulatedDirectory, StaticDirectory};
pub use scripted::ScriptedSender;
pub use sender::SimulatedSender;

use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;

use fanout_core::RecipientId;

/// Knobs for the seeded simulation.
///
/// Rates are probabilities in `[0, 1]`; out-of-range values are clamped.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub seed: u64,
    pub recipients: usize,
    /// Share of recipients whose every send fails permanently.
    pub unreachable_rate: f64,
    /// Share of listed recipients that vanish before they can be fetched.
    pub missing_rate: f64,
    /// Per-attempt probability of a rate-limit response.
    pub rate_limit_rate: f64,
    /// Per-attempt probability of a transient failure.
    pub transient_rate: f64,
    /// Hint returned with simulated rate-limit responses.
    pub retry_after: Option<Duration>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            recipients: 100,
            unreachable_rate: 0.05,
            missing_rate: 0.01,
            rate_limit_rate: 0.02,
            transient_rate: 0.05,
            retry_after: Some(Duration::from_secs(2)),
        }
    }
}

impl SimulationConfig {
    pub fn new(seed: u64, recipients: usize) -> Self {
        Self {
            seed,
            recipients,
            ..Self::default()
        }
    }

    /// Every send succeeds and every recipient exists.
    pub fn reliable(seed: u64, recipients: usize) -> Self {
        Self {
            seed,
            recipients,
            unreachable_rate: 0.0,
            missing_rate: 0.0,
            rate_limit_rate: 0.0,
            transient_rate: 0.0,
            retry_after: None,
        }
    }
}

pub(crate) fn probability(rate: f64) -> f64 {
    if rate.is_finite() { rate.clamp(0.0, 1.0) } else { 0.0 }
}

/// Independent RNG for one decision about one recipient.
pub(crate) fn rng_for(seed: u64, id: &RecipientId, salt: u64) -> StdRng {
    // FNV-1a over the identifier keeps the mapping stable across platforms.
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in id.as_str().bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    StdRng::seed_from_u64(seed ^ hash ^ salt.wrapping_mul(0x9e37_79b9_7f4a_7c15))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn rng_is_stable_per_input() {
        let id = RecipientId::from("000000000000000042");
        let a: u32 = rng_for(7, &id, 1).gen_range(0..u32::MAX);
        let b: u32 = rng_for(7, &id, 1).gen_range(0..u32::MAX);
        let c: u32 = rng_for(7, &id, 2).gen_range(0..u32::MAX);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn probability_is_clamped() {
        assert_eq!(probability(-1.0), 0.0);
        assert_eq!(probability(2.0), 1.0);
        assert_eq!(probability(f64::NAN), 0.0);
    }
}
