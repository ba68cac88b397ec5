//! Engine settings: cut emission period, randomness, cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Tunables consumed by the engine. All randomness used for tie-breaks
/// and branch directions flows through [`DioSettings::random_next`],
/// so pinning the seed makes runs reproducible.
#[derive(Debug, Clone)]
pub struct DioSettings {
    /// Emit a branch proposal from a gcd conflict on every n-th
    /// `check()` call.
    pub cut_from_proof_period: u64,
    rand_state: u64,
    cancel: Arc<AtomicBool>,
}

impl Default for DioSettings {
    fn default() -> Self {
        Self::with_seed(1)
    }
}

impl DioSettings {
    pub fn with_seed(seed: u64) -> Self {
        Self {
            cut_from_proof_period: 4,
            rand_state: seed,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Next pseudo-random value (linear congruential step).
    pub fn random_next(&mut self) -> u64 {
        self.rand_state = self
            .rand_state
            .wrapping_mul(1103515245)
            .wrapping_add(12345);
        self.rand_state / 65536
    }

    /// Shared flag polled by every long-running loop; setting it makes
    /// the current `check()` collapse to `Undef`.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.cancel = flag;
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_stream() {
        let mut a = DioSettings::with_seed(42);
        let mut b = DioSettings::with_seed(42);
        let xs: Vec<u64> = (0..8).map(|_| a.random_next()).collect();
        let ys: Vec<u64> = (0..8).map(|_| b.random_next()).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn cancel_flag_is_shared() {
        let s = DioSettings::default();
        let flag = s.cancel_flag();
        assert!(!s.cancelled());
        flag.store(true, Ordering::Relaxed);
        assert!(s.cancelled());
    }
}
