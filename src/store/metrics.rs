// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::_prelude::*;

/// What happened to one caller that entered the refresh gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RefreshEvent {
	/// A refresh call was issued.
	Issued,
	/// The issued call rotated the session.
	Rotated,
	/// The issued call (or a missing refresh token) ended the session.
	Ended,
	/// The caller reused an outcome published by another caller.
	Joined,
}

/// Point-in-time view of the refresh counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RefreshCounts {
	/// Refresh calls issued to the refresher.
	pub attempts: u64,
	/// Refresh calls that rotated the session.
	pub successes: u64,
	/// Refreshes that ended the session.
	pub failures: u64,
	/// Callers that reused another caller's outcome instead of refreshing.
	pub coalesced: u64,
}

#[derive(Debug, Default)]
pub(crate) struct RefreshMetrics([AtomicU64; 4]);
impl RefreshMetrics {
	pub(crate) fn record(&self, event: RefreshEvent) {
		self.0[event as usize].fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn snapshot(&self) -> RefreshCounts {
		let [attempts, successes, failures, coalesced] =
			self.0.each_ref().map(|counter| counter.load(Ordering::Relaxed));

		RefreshCounts { attempts, successes, failures, coalesced }
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn events_land_in_their_own_counter() {
		let metrics = RefreshMetrics::default();

		metrics.record(RefreshEvent::Issued);
		metrics.record(RefreshEvent::Issued);
		metrics.record(RefreshEvent::Rotated);
		metrics.record(RefreshEvent::Joined);

		assert_eq!(
			metrics.snapshot(),
			RefreshCounts { attempts: 2, successes: 1, failures: 0, coalesced: 1 }
		);
	}
}
