//! Sampling and opt-out gating
//!
//! Runs before identity stamping so sampled-out events never advance
//! session activity. Sampling decisions are independent per event.

use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Decides, per event, whether it should be queued at all.
pub struct SamplingGate {
    sample_rate: AtomicU8,
    opt_out: AtomicBool,
}

impl SamplingGate {
    /// `sample_rate` is a percentage; values above 100 are clamped.
    pub fn new(sample_rate: u8, opt_out: bool) -> Self {
        Self {
            sample_rate: AtomicU8::new(sample_rate.min(100)),
            opt_out: AtomicBool::new(opt_out),
        }
    }

    /// False unconditionally when opted out, otherwise true with
    /// probability `sample_rate / 100`.
    pub fn should_enqueue(&self) -> bool {
        if self.opt_out.load(Ordering::Relaxed) {
            return false;
        }
        match self.sample_rate.load(Ordering::Relaxed) {
            rate if rate >= 100 => true,
            0 => false,
            rate => rand::thread_rng().gen_range(1..=100) <= rate,
        }
    }

    pub fn opt_out(&self) -> bool {
        self.opt_out.load(Ordering::Relaxed)
    }

    pub fn set_opt_out(&self, opt_out: bool) {
        self.opt_out.store(opt_out, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_rate_accepts_everything() {
        let gate = SamplingGate::new(100, false);
        assert!((0..1000).all(|_| gate.should_enqueue()));
    }

    #[test]
    fn test_zero_rate_accepts_nothing() {
        let gate = SamplingGate::new(0, false);
        assert!((0..1000).all(|_| !gate.should_enqueue()));
    }

    #[test]
    fn test_opt_out_wins_over_rate() {
        let gate = SamplingGate::new(100, true);
        assert!((0..1000).all(|_| !gate.should_enqueue()));

        gate.set_opt_out(false);
        assert!(gate.should_enqueue());
    }

    #[test]
    fn test_partial_rate_is_roughly_proportional() {
        let gate = SamplingGate::new(50, false);
        let accepted = (0..10_000).filter(|_| gate.should_enqueue()).count();
        // Loose bounds; the draw is independent per event
        assert!((3_500..6_500).contains(&accepted), "accepted {}", accepted);
    }

    #[test]
    fn test_rate_clamped_to_100() {
        let gate = SamplingGate::new(200, false);
        assert!(gate.should_enqueue());
    }
}
