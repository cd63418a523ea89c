//! Per-attempt request log with latency and retry aggregates.
//!
//! The executor records one [`RequestAttempt`] per HTTP attempt and marks the final attempt of
//! each logical request as `terminal`. [`MetricsRecorder::summary`] aggregates over terminal
//! attempts (one per logical request); latency percentiles use the nearest-rank rule and, when
//! configured, include retried attempts as well.

// self
use crate::{_prelude::*, config::MetricsConfig, http::Method};

/// Classification of a single attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
	/// 2xx response.
	Success,
	/// Transient failure (429, 5xx, connection failure, rejected credentials before refresh).
	RetryableFailure,
	/// Deterministic failure; retrying cannot change the result.
	FatalFailure,
}
impl AttemptOutcome {
	/// Returns a stable label suitable for metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			AttemptOutcome::Success => "success",
			AttemptOutcome::RetryableFailure => "retryable_failure",
			AttemptOutcome::FatalFailure => "fatal_failure",
		}
	}
}

/// Immutable record of one HTTP attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestAttempt {
	/// Identifier shared by every attempt of one logical request.
	pub request_id: u64,
	/// Method issued.
	pub method: Method,
	/// Path requested, relative to the base URL.
	pub path: String,
	/// 1-based attempt number within the logical request.
	pub attempt_number: u32,
	/// Wall-clock instant the attempt started.
	pub started_at: OffsetDateTime,
	/// Time spent waiting for the attempt to complete.
	pub duration: StdDuration,
	/// Attempt classification.
	pub outcome: AttemptOutcome,
	/// Status code, when a response was received.
	pub status_code: Option<u16>,
	/// Whether this attempt ended its logical request.
	pub terminal: bool,
}

/// Aggregate view over the recorded attempts.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MetricsSummary {
	/// Logical requests that reached a terminal attempt.
	pub count: usize,
	/// Every attempt recorded, retries included.
	pub attempts: usize,
	/// Fraction of logical requests that ended in success.
	pub success_rate: f64,
	/// Fraction of logical requests that needed more than one attempt.
	pub retry_rate: f64,
	/// Median latency.
	pub p50: StdDuration,
	/// 95th percentile latency.
	pub p95: StdDuration,
	/// 99th percentile latency.
	pub p99: StdDuration,
}

/// Thread-safe attempt log, optionally bounded to the most recent attempts.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
	log: Mutex<VecDeque<RequestAttempt>>,
	include_retries: bool,
	max_attempts: Option<usize>,
}
impl MetricsRecorder {
	/// Creates a recorder honoring the provided options.
	pub fn new(config: &MetricsConfig) -> Self {
		Self {
			log: Mutex::default(),
			include_retries: config.include_retries,
			max_attempts: config.max_attempts,
		}
	}

	/// Appends an attempt, evicting the oldest one when the log is full.
	pub fn record(&self, attempt: RequestAttempt) {
		let mut log = self.log.lock();

		log.push_back(attempt);

		if let Some(max) = self.max_attempts {
			while log.len() > max {
				log.pop_front();
			}
		}
	}

	/// Returns a copy of every retained attempt, in recording order.
	pub fn attempts(&self) -> Vec<RequestAttempt> {
		self.log.lock().iter().cloned().collect()
	}

	/// Returns the attempts recorded for one logical request.
	pub fn attempts_for(&self, request_id: u64) -> Vec<RequestAttempt> {
		self.log.lock().iter().filter(|attempt| attempt.request_id == request_id).cloned().collect()
	}

	/// Drops every recorded attempt.
	pub fn clear(&self) {
		self.log.lock().clear();
	}

	/// Aggregates the log.
	pub fn summary(&self) -> MetricsSummary {
		let log = self.log.lock();
		let terminal: Vec<&RequestAttempt> =
			log.iter().filter(|attempt| attempt.terminal).collect();
		let count = terminal.len();

		if count == 0 {
			return MetricsSummary { attempts: log.len(), ..Default::default() };
		}

		let successes =
			terminal.iter().filter(|attempt| attempt.outcome == AttemptOutcome::Success).count();
		let retried = terminal.iter().filter(|attempt| attempt.attempt_number > 1).count();
		let mut durations: Vec<StdDuration> = if self.include_retries {
			log.iter().map(|attempt| attempt.duration).collect()
		} else {
			terminal.iter().map(|attempt| attempt.duration).collect()
		};

		durations.sort_unstable();

		MetricsSummary {
			count,
			attempts: log.len(),
			success_rate: successes as f64 / count as f64,
			retry_rate: retried as f64 / count as f64,
			p50: nearest_rank(&durations, 50.),
			p95: nearest_rank(&durations, 95.),
			p99: nearest_rank(&durations, 99.),
		}
	}
}

/// Nearest-rank percentile over a sorted sample: the value at rank `ceil(p / 100 * n)`.
fn nearest_rank(sorted: &[StdDuration], percentile: f64) -> StdDuration {
	if sorted.is_empty() {
		return StdDuration::ZERO;
	}

	let rank = (percentile / 100. * sorted.len() as f64).ceil() as usize;
	let index = rank.clamp(1, sorted.len()) - 1;

	sorted[index]
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn attempt(
		request_id: u64,
		attempt_number: u32,
		millis: u64,
		outcome: AttemptOutcome,
		terminal: bool,
	) -> RequestAttempt {
		RequestAttempt {
			request_id,
			method: Method::Get,
			path: "/api/v1/users".into(),
			attempt_number,
			started_at: OffsetDateTime::now_utc(),
			duration: StdDuration::from_millis(millis),
			outcome,
			status_code: Some(200),
			terminal,
		}
	}

	#[test]
	fn percentiles_use_nearest_rank_over_terminal_attempts() {
		let recorder = MetricsRecorder::default();

		for (id, millis) in [10, 20, 30, 40, 100].into_iter().enumerate() {
			recorder.record(attempt(id as u64, 1, millis, AttemptOutcome::Success, true));
		}

		let summary = recorder.summary();

		assert_eq!(summary.count, 5);
		assert_eq!(summary.p50, StdDuration::from_millis(30));
		assert_eq!(summary.p95, StdDuration::from_millis(100));
		assert_eq!(summary.p99, StdDuration::from_millis(100));
		assert_eq!(summary.success_rate, 1.);
		assert_eq!(summary.retry_rate, 0.);
	}

	#[test]
	fn retries_are_excluded_from_latency_unless_configured() {
		let attempts = [
			attempt(1, 1, 900, AttemptOutcome::RetryableFailure, false),
			attempt(1, 2, 10, AttemptOutcome::Success, true),
			attempt(2, 1, 20, AttemptOutcome::FatalFailure, true),
		];
		let default = MetricsRecorder::default();
		let inclusive =
			MetricsRecorder::new(&MetricsConfig { include_retries: true, ..Default::default() });

		for entry in attempts {
			default.record(entry.clone());
			inclusive.record(entry);
		}

		let summary = default.summary();

		assert_eq!(summary.count, 2);
		assert_eq!(summary.attempts, 3);
		assert_eq!(summary.success_rate, 0.5);
		assert_eq!(summary.retry_rate, 0.5);
		assert_eq!(summary.p99, StdDuration::from_millis(20));
		assert_eq!(inclusive.summary().p99, StdDuration::from_millis(900));
		assert_eq!(default.attempts_for(1).len(), 2);
	}

	#[test]
	fn empty_log_summarizes_to_zero() {
		let recorder = MetricsRecorder::default();

		recorder.record(attempt(1, 1, 5, AttemptOutcome::RetryableFailure, false));

		let summary = recorder.summary();

		assert_eq!(summary.count, 0);
		assert_eq!(summary.attempts, 1);
		assert_eq!(summary.p50, StdDuration::ZERO);

		recorder.clear();

		assert!(recorder.attempts().is_empty());
	}

	#[test]
	fn bounded_logs_keep_the_most_recent_attempts() {
		let recorder = MetricsRecorder::new(&MetricsConfig::default().with_max_attempts(3));

		for id in 1..=5 {
			recorder.record(attempt(id, 1, id * 10, AttemptOutcome::Success, true));
		}

		let kept: Vec<u64> = recorder.attempts().iter().map(|attempt| attempt.request_id).collect();

		assert_eq!(kept, vec![3, 4, 5]);
		assert_eq!(recorder.summary().count, 3);
		assert_eq!(recorder.summary().p50, StdDuration::from_millis(40));
	}
}
