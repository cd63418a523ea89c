// self
use crate::{
	_prelude::*,
	obs::{OpKind, OpOutcome},
};

/// Records an operation outcome via the global metrics recorder (when enabled).
pub fn record_op_outcome(kind: OpKind, outcome: OpOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"api_resilience_operation_total",
			"op" => kind.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (kind, outcome);
	}
}

/// Records the latency of a single request attempt, labeled by its outcome.
pub fn record_attempt_latency(outcome: &'static str, elapsed: StdDuration) {
	#[cfg(feature = "metrics")]
	{
		metrics::histogram!("api_resilience_attempt_seconds", "outcome" => outcome)
			.record(elapsed.as_secs_f64());
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (outcome, elapsed);
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn recorders_noop_without_metrics() {
		record_op_outcome(OpKind::Admission, OpOutcome::Failure);
		record_attempt_latency("success", StdDuration::from_millis(5));
	}
}
