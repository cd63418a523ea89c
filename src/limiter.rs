//! Per-client admission control for inbound requests.
//!
//! [`RateLimiter`] is process-wide shared state keyed by client identity: create it once at
//! service start and hand it to request handling (see [`middleware`] for the axum layer). Every
//! check-and-increment happens under a single lock, so concurrent requests for one key can never
//! push its count past the configured limit.

#[cfg(feature = "server")] pub mod middleware;
pub mod window;

pub use window::WindowStrategy;

// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::{
	_prelude::*,
	config::RateLimitConfig,
	error::ConfigError,
	limiter::window::WindowCounter,
	obs::{self, OpKind, OpOutcome, OpSpan, event},
};

/// Admission verdict for one request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Decision {
	/// Whether the request may proceed.
	pub allowed: bool,
	/// How long the client should wait before trying again; set only on denial.
	pub retry_after: Option<StdDuration>,
	/// Configured limit per window.
	pub limit: u32,
	/// Admissions left in the current window.
	pub remaining: u32,
	/// Time until the window frees capacity again.
	pub reset_after: StdDuration,
}
impl Decision {
	/// Converts a denial into [`RateLimitExceeded`] for callers that prefer `Result`.
	pub fn into_result(
		self,
		client_key: &str,
		window: StdDuration,
	) -> Result<Self, RateLimitExceeded> {
		if self.allowed {
			return Ok(self);
		}

		Err(RateLimitExceeded {
			client_key: client_key.into(),
			limit: self.limit,
			window,
			retry_after: self.retry_after.unwrap_or(window),
		})
	}
}

/// Denied admission, expressed as an error.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("Rate limit of {limit} per {window:?} hit by `{client_key}`; retry in {retry_after:?}.")]
pub struct RateLimitExceeded {
	/// Client identity the limit applies to.
	pub client_key: String,
	/// Configured limit per window.
	pub limit: u32,
	/// Window length.
	pub window: StdDuration,
	/// Wait before the next admission can succeed.
	pub retry_after: StdDuration,
}

/// Read-only view of one key's active window.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateWindow {
	/// Client identity.
	pub client_key: String,
	/// Start of the active window (oldest counted admission for sliding logs).
	pub window_start: Instant,
	/// Admissions counted in the active window.
	pub count: u32,
}

#[derive(Debug)]
struct LimiterState {
	windows: HashMap<String, WindowCounter>,
	last_sweep: Option<Instant>,
}

/// Shared per-client rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
	config: RateLimitConfig,
	state: Mutex<LimiterState>,
	rejected: AtomicU64,
}
impl RateLimiter {
	/// Creates a limiter after validating `config`.
	pub fn new(config: RateLimitConfig) -> Result<Self, ConfigError> {
		config.validate()?;

		Ok(Self {
			config,
			state: Mutex::new(LimiterState { windows: HashMap::new(), last_sweep: None }),
			rejected: AtomicU64::new(0),
		})
	}

	/// Active configuration.
	pub fn config(&self) -> &RateLimitConfig {
		&self.config
	}

	/// Checks and counts one request from `client_key` arriving at `now`.
	pub fn admit(&self, client_key: &str, now: Instant) -> Decision {
		OpSpan::new(OpKind::Admission, "admit").in_scope(|| self.decide(client_key, now))
	}

	fn decide(&self, client_key: &str, now: Instant) -> Decision {
		let window = self.config.window();
		let limit = self.config.limit;
		let admission = {
			let mut state = self.state.lock();

			self.sweep_if_due(&mut state, now);

			state
				.windows
				.entry(client_key.to_owned())
				.or_insert_with(|| WindowCounter::new(self.config.strategy, now))
				.admit(now, window, limit)
		};

		if admission.allowed {
			obs::record_op_outcome(OpKind::Admission, OpOutcome::Success);
		} else {
			self.rejected.fetch_add(1, Ordering::Relaxed);
			obs::record_op_outcome(OpKind::Admission, OpOutcome::Failure);
			event!(
				warn,
				client = client_key,
				limit,
				retry_after_ms = admission.retry_after.map_or(0, |d| d.as_millis() as u64),
				"Rate limit exceeded."
			);
		}

		Decision {
			allowed: admission.allowed,
			retry_after: admission.retry_after,
			limit,
			remaining: admission.remaining,
			reset_after: admission.reset_after,
		}
	}

	/// [`RateLimiter::admit`] at the current instant, returning denials as errors.
	pub fn check(&self, client_key: &str) -> Result<Decision, RateLimitExceeded> {
		self.admit(client_key, Instant::now()).into_result(client_key, self.config.window())
	}

	/// Drops entries untouched for the configured idle TTL; returns how many were evicted.
	pub fn evict_idle(&self, now: Instant) -> usize {
		let mut state = self.state.lock();

		self.sweep(&mut state, now)
	}

	/// Snapshot of the window active for `client_key`, if the key is tracked.
	pub fn window(&self, client_key: &str) -> Option<RateWindow> {
		self.window_at(client_key, Instant::now())
	}

	/// [`RateLimiter::window`] evaluated at `now`.
	pub fn window_at(&self, client_key: &str, now: Instant) -> Option<RateWindow> {
		let state = self.state.lock();
		let counter = state.windows.get(client_key)?;
		let (window_start, count) = counter.snapshot(now, self.config.window());

		Some(RateWindow { client_key: client_key.into(), window_start, count })
	}

	/// Number of denied admissions since creation.
	pub fn rejected_count(&self) -> u64 {
		self.rejected.load(Ordering::Relaxed)
	}

	/// Number of tracked client keys.
	pub fn len(&self) -> usize {
		self.state.lock().windows.len()
	}

	/// Returns `true` when no client key is tracked.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn sweep_if_due(&self, state: &mut LimiterState, now: Instant) {
		let due = state
			.last_sweep
			.is_none_or(|last| now.saturating_duration_since(last) >= self.config.idle_ttl());

		if due {
			self.sweep(state, now);
		}
	}

	fn sweep(&self, state: &mut LimiterState, now: Instant) -> usize {
		let ttl = self.config.idle_ttl();
		let window = self.config.window();
		let before = state.windows.len();

		state.windows.retain(|_, counter| !counter.is_idle(now, ttl, window));
		state.last_sweep = Some(now);

		let evicted = before - state.windows.len();

		if evicted > 0 {
			event!(debug, evicted, "Evicted idle rate-limit windows.");
		}

		evicted
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn limiter(limit: u32, strategy: WindowStrategy) -> RateLimiter {
		RateLimiter::new(
			RateLimitConfig::new(limit, StdDuration::from_secs(60))
				.with_strategy(strategy)
				.with_idle_ttl(StdDuration::from_secs(300)),
		)
		.expect("Limiter fixture should be valid.")
	}

	#[test]
	fn keys_are_limited_independently() {
		let limiter = limiter(1, WindowStrategy::SlidingLog);
		let now = Instant::now();

		assert!(limiter.admit("alice", now).allowed);
		assert!(!limiter.admit("alice", now).allowed);
		assert!(limiter.admit("bob", now).allowed);
		assert_eq!(limiter.rejected_count(), 1);
		assert_eq!(limiter.len(), 2);
	}

	#[test]
	fn denials_convert_into_errors() {
		let limiter = limiter(2, WindowStrategy::Fixed);
		let t0 = Instant::now();

		limiter.admit("10.0.0.1", t0);
		limiter.admit("10.0.0.1", t0 + StdDuration::from_secs(1));

		let err = limiter
			.admit("10.0.0.1", t0 + StdDuration::from_secs(2))
			.into_result("10.0.0.1", limiter.config().window())
			.expect_err("Third admission should be denied.");

		assert_eq!(err.retry_after, StdDuration::from_secs(58));
		assert_eq!(err.limit, 2);
		assert!(err.to_string().contains("10.0.0.1"));
	}

	#[test]
	fn idle_keys_are_evicted() {
		let limiter = limiter(5, WindowStrategy::SlidingLog);
		let t0 = Instant::now();

		limiter.admit("stale", t0);
		limiter.admit("active", t0 + StdDuration::from_secs(200));

		assert_eq!(limiter.evict_idle(t0 + StdDuration::from_secs(300)), 1);
		assert!(limiter.window_at("stale", t0 + StdDuration::from_secs(300)).is_none());

		let window = limiter
			.window_at("active", t0 + StdDuration::from_secs(210))
			.expect("Active key should still be tracked.");

		assert_eq!(window.count, 1);
		assert_eq!(window.window_start, t0 + StdDuration::from_secs(200));
	}

	#[test]
	fn admission_sweeps_opportunistically() {
		let limiter = limiter(5, WindowStrategy::Fixed);
		let t0 = Instant::now();

		limiter.admit("first", t0);

		assert_eq!(limiter.len(), 1);

		limiter.admit("second", t0 + StdDuration::from_secs(400));

		assert_eq!(limiter.len(), 1);
		assert!(limiter.window("second").is_some());
	}

	#[test]
	fn zero_length_windows_are_rejected() {
		let config = RateLimitConfig { window_ms: 0, ..Default::default() };

		assert!(RateLimiter::new(config).is_err());
	}
}
