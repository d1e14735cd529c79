//! Randomization utilities

use rand::Rng;
use std::time::Duration;

/// `base` plus up to a quarter of it again
pub fn jitter(base: Duration) -> Duration {
    let max = base.as_millis() as u64 / 4;
    if max == 0 {
        return base;
    }
    let extra = rand::thread_rng().gen_range(0..=max);
    base + Duration::from_millis(extra)
}
