//! Exponential backoff with multiplicative jitter.
//!
//! The delay for retry `n` is `min(max, base * 2^(n - 1))`, scaled by a uniform factor drawn
//! from `[1 - jitter, 1 + jitter]` and clamped back under `max`. Randomness is supplied by the
//! caller so a seeded RNG reproduces the same schedule.

// crates.io
use rand::Rng;
// self
use crate::_prelude::*;

/// Backoff schedule shared by every retry of a request.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
	/// Delay before the first retry.
	pub base: StdDuration,
	/// Upper bound for any single delay.
	pub max: StdDuration,
	/// Multiplicative jitter ratio, clamped to `[0, 1]`.
	pub jitter_ratio: f64,
}
impl BackoffPolicy {
	/// Creates a policy; the jitter ratio is clamped into `[0, 1]`.
	pub fn new(base: StdDuration, max: StdDuration, jitter_ratio: f64) -> Self {
		Self { base, max, jitter_ratio: clamp_ratio(jitter_ratio) }
	}

	/// Returns the delay to sleep before retry number `attempt` (1-based).
	pub fn delay<R>(&self, attempt: u32, rng: &mut R) -> StdDuration
	where
		R: Rng,
	{
		next_delay(attempt, self.base, self.max, self.jitter_ratio, rng)
	}

	/// Returns the un-jittered delay for retry number `attempt`.
	pub fn nominal_delay(&self, attempt: u32) -> StdDuration {
		exponential(attempt, self.base, self.max)
	}
}

/// Computes the jittered delay for retry number `attempt` (1-based).
///
/// `attempt == 0` yields [`StdDuration::ZERO`]. The result never exceeds `max_delay`.
pub fn next_delay<R>(
	attempt: u32,
	base: StdDuration,
	max_delay: StdDuration,
	jitter_ratio: f64,
	rng: &mut R,
) -> StdDuration
where
	R: Rng,
{
	let nominal = exponential(attempt, base, max_delay);
	let ratio = clamp_ratio(jitter_ratio);

	if nominal.is_zero() || ratio == 0. {
		return nominal;
	}

	let factor = rng.random_range((1. - ratio)..=(1. + ratio));

	nominal.mul_f64(factor).min(max_delay)
}

fn exponential(attempt: u32, base: StdDuration, max_delay: StdDuration) -> StdDuration {
	if attempt == 0 {
		return StdDuration::ZERO;
	}

	let multiplier = 2_u32.saturating_pow(attempt - 1);

	base.saturating_mul(multiplier).min(max_delay)
}

fn clamp_ratio(ratio: f64) -> f64 {
	if ratio.is_nan() { 0. } else { ratio.clamp(0., 1.) }
}
