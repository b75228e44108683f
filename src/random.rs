//! Shared random helpers: weighted selection, gaussian jitter, seeding.
//!
//! Every generative decision in the crate draws from a single `StdRng`
//! owned by the orchestrator and lent to the sub-engines, so a fixed seed
//! reproduces a whole performance.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::time::{SystemTime, UNIX_EPOCH};

/// Pick one item with probability proportional to its weight.
///
/// Non-positive weights never win. Returns `None` when `items` is empty or
/// no weight is positive.
pub fn weighted_choice<'a, T, R: Rng + ?Sized>(
    items: &'a [T],
    weights: &[f64],
    rng: &mut R,
) -> Option<&'a T> {
    let total: f64 = items
        .iter()
        .zip(weights)
        .map(|(_, &w)| w.max(0.0))
        .sum();
    if total <= 0.0 {
        return None;
    }
    let mut r = rng.gen::<f64>() * total;
    let mut last_positive = None;
    for (item, &w) in items.iter().zip(weights) {
        if w <= 0.0 {
            continue;
        }
        if r < w {
            return Some(item);
        }
        r -= w;
        last_positive = Some(item);
    }
    // Float rounding can leave r marginally above the final bucket.
    last_positive
}

/// Sample from N(0, sigma). A non-positive sigma yields exactly 0.
pub fn gaussian<R: Rng + ?Sized>(rng: &mut R, sigma: f64) -> f64 {
    if sigma <= 0.0 {
        return 0.0;
    }
    match Normal::new(0.0, sigma) {
        Ok(normal) => normal.sample(rng),
        Err(_) => 0.0,
    }
}

/// Bernoulli trial.
pub fn chance<R: Rng + ?Sized>(rng: &mut R, p: f64) -> bool {
    p > 0.0 && rng.gen::<f64>() < p
}

/// Deterministic generator for tests and reproducible sessions.
pub fn seeded(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Generator seeded from the wall clock.
pub fn from_wall_clock() -> StdRng {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x5eed);
    StdRng::seed_from_u64(nanos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weighted_choice_respects_zero_weights() {
        let mut rng = seeded(7);
        let items = ["never", "always"];
        for _ in 0..200 {
            assert_eq!(weighted_choice(&items, &[0.0, 1.0], &mut rng), Some(&"always"));
        }
    }

    #[test]
    fn test_weighted_choice_empty_and_degenerate() {
        let mut rng = seeded(7);
        let empty: [u8; 0] = [];
        assert!(weighted_choice(&empty, &[], &mut rng).is_none());
        assert!(weighted_choice(&[1, 2], &[0.0, -1.0], &mut rng).is_none());
    }

    #[test]
    fn test_weighted_choice_bias() {
        let mut rng = seeded(42);
        let items = [0, 1];
        let mut heavy = 0;
        for _ in 0..2000 {
            if *weighted_choice(&items, &[1.0, 3.0], &mut rng).unwrap() == 1 {
                heavy += 1;
            }
        }
        // Expect ~1500
        assert!(heavy > 1350 && heavy < 1650, "heavy={}", heavy);
    }

    #[test]
    fn test_gaussian_zero_sigma() {
        let mut rng = seeded(1);
        assert_eq!(gaussian(&mut rng, 0.0), 0.0);
        assert_eq!(gaussian(&mut rng, -1.0), 0.0);
    }

    #[test]
    fn test_seeded_is_reproducible() {
        let a: Vec<u32> = (0..5).map(|_| 0).scan(seeded(9), |r, _| Some(r.gen())).collect();
        let b: Vec<u32> = (0..5).map(|_| 0).scan(seeded(9), |r, _| Some(r.gen())).collect();
        assert_eq!(a, b);
    }
}
