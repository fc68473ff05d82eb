//! Backoff calculations shared by the WS reconnect path and the REST poller.
//!
//! Both schedules use a *deterministic* per-attempt jitter (a stable hash of
//! the attempt key) rather than a fresh random draw, so tests and replay can
//! reproduce the exact delay a given attempt produced.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

fn stable_unit_interval(seed: impl Hash) -> f64 {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    (hasher.finish() as f64) / (u64::MAX as f64)
}

/// WS reconnect delay: `min(30s, 1s * 2^(attempt-1))` plus a deterministic
/// jitter in `[0, 500ms)`. `attempt` is 1-based.
pub fn reconnect_delay_ms(attempt: u32) -> u64 {
    let exponent = attempt.saturating_sub(1).min(20);
    let raw = 1_000u64.saturating_mul(1u64 << exponent);
    let base = raw.min(30_000);
    let jitter = (stable_unit_interval(("ws-reconnect", attempt)) * 500.0) as u64;
    base + jitter
}

/// REST per-symbol backoff:
/// `min(300s, base * 2^min(6, failures)) * (1 + 0.1 * stableJitter(symbol, failures))`.
pub fn rest_backoff_ms(base_ms: u64, failures: u32, symbol: &str) -> u64 {
    let exponent = failures.min(6);
    let raw = base_ms.saturating_mul(1u64 << exponent);
    let capped = raw.min(300_000) as f64;
    let jitter_frac = stable_unit_interval((symbol, failures)) * 0.1;
    (capped * (1.0 + jitter_frac)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_delay_never_exceeds_bound() {
        for attempt in 1..200 {
            assert!(reconnect_delay_ms(attempt) <= 30_000 + 500);
        }
    }

    #[test]
    fn reconnect_delay_grows_then_caps() {
        assert!(reconnect_delay_ms(1) < reconnect_delay_ms(2));
        assert!(reconnect_delay_ms(2) < reconnect_delay_ms(3));
        // Deep into the schedule it should be pinned near the 30s cap.
        let late = reconnect_delay_ms(50);
        assert!(late >= 30_000 && late <= 30_500);
    }

    #[test]
    fn reconnect_delay_is_deterministic() {
        assert_eq!(reconnect_delay_ms(4), reconnect_delay_ms(4));
    }

    #[test]
    fn rest_backoff_never_exceeds_bound() {
        for failures in 0..50 {
            let delay = rest_backoff_ms(1_000, failures, "BTCUSDT");
            assert!(delay <= 330_000);
        }
    }

    #[test]
    fn rest_backoff_resets_conceptually_at_zero_failures() {
        assert_eq!(rest_backoff_ms(1_000, 0, "BTCUSDT") / 1_000, 1);
    }

    #[test]
    fn rest_backoff_varies_by_symbol_for_same_failure_count() {
        let a = rest_backoff_ms(1_000, 3, "BTCUSDT");
        let b = rest_backoff_ms(1_000, 3, "ETHUSDT");
        // Not a strict inequality requirement, but they shouldn't collide by
        // construction across enough symbols; spot check these two differ.
        assert_ne!(a, b);
    }
}
