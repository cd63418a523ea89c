//! Per-key window accounting.

// self
use crate::_prelude::*;

/// How admitted requests are counted against the limit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowStrategy {
	/// Counter reset once `window` has elapsed since the first admission of the window.
	Fixed,
	/// Timestamps of the admissions made within the trailing `window`.
	#[default]
	SlidingLog,
}

/// Outcome of one check-and-increment on a [`WindowCounter`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Admission {
	pub(crate) allowed: bool,
	pub(crate) remaining: u32,
	pub(crate) retry_after: Option<StdDuration>,
	pub(crate) reset_after: StdDuration,
}

#[derive(Debug)]
enum Ledger {
	Fixed { window_start: Instant, count: u32 },
	SlidingLog { admitted: VecDeque<Instant> },
}

/// Accounting state for one client key.
#[derive(Debug)]
pub(crate) struct WindowCounter {
	ledger: Ledger,
	last_seen: Instant,
}
impl WindowCounter {
	pub(crate) fn new(strategy: WindowStrategy, now: Instant) -> Self {
		let ledger = match strategy {
			WindowStrategy::Fixed => Ledger::Fixed { window_start: now, count: 0 },
			WindowStrategy::SlidingLog => Ledger::SlidingLog { admitted: VecDeque::new() },
		};

		Self { ledger, last_seen: now }
	}

	/// Checks `limit` within `window` and counts the request when it is admitted.
	pub(crate) fn admit(&mut self, now: Instant, window: StdDuration, limit: u32) -> Admission {
		self.last_seen = self.last_seen.max(now);

		match &mut self.ledger {
			Ledger::Fixed { window_start, count } => {
				if now.saturating_duration_since(*window_start) >= window {
					*window_start = now;
					*count = 0;
				}

				let elapsed = now.saturating_duration_since(*window_start);
				let reset_after = window.saturating_sub(elapsed);

				if *count < limit {
					*count += 1;

					Admission {
						allowed: true,
						remaining: limit - *count,
						retry_after: None,
						reset_after,
					}
				} else {
					Admission {
						allowed: false,
						remaining: 0,
						retry_after: Some(reset_after),
						reset_after,
					}
				}
			},
			Ledger::SlidingLog { admitted } => {
				prune(admitted, now, window);

				if (admitted.len() as u64) < u64::from(limit) {
					admitted.push_back(now);

					let remaining = limit - admitted.len() as u32;

					Admission {
						allowed: true,
						remaining,
						retry_after: None,
						reset_after: until_oldest_expires(admitted, now, window),
					}
				} else {
					let retry_after = until_oldest_expires(admitted, now, window);

					Admission {
						allowed: false,
						remaining: 0,
						retry_after: Some(retry_after),
						reset_after: retry_after,
					}
				}
			},
		}
	}

	/// Start and admitted count of the window active at `now`.
	pub(crate) fn snapshot(&self, now: Instant, window: StdDuration) -> (Instant, u32) {
		match &self.ledger {
			Ledger::Fixed { window_start, count } =>
				if now.saturating_duration_since(*window_start) >= window {
					(now, 0)
				} else {
					(*window_start, *count)
				},
			Ledger::SlidingLog { admitted } => {
				let active: Vec<&Instant> = admitted
					.iter()
					.filter(|at| now.saturating_duration_since(**at) < window)
					.collect();

				(active.first().map_or(now, |at| **at), active.len() as u32)
			},
		}
	}

	/// Untouched for `ttl` and holding no admission that still counts at `now`.
	pub(crate) fn is_idle(&self, now: Instant, ttl: StdDuration, window: StdDuration) -> bool {
		now.saturating_duration_since(self.last_seen) >= ttl && self.snapshot(now, window).1 == 0
	}
}

fn prune(admitted: &mut VecDeque<Instant>, now: Instant, window: StdDuration) {
	while admitted.front().is_some_and(|at| now.saturating_duration_since(*at) >= window) {
		admitted.pop_front();
	}
}

fn until_oldest_expires(
	admitted: &VecDeque<Instant>,
	now: Instant,
	window: StdDuration,
) -> StdDuration {
	admitted
		.front()
		.map_or(window, |oldest| window.saturating_sub(now.saturating_duration_since(*oldest)))
}
