//! Optional observability helpers for client operations and admission decisions.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `api_resilience.op` with the `op` and
//!   `stage` fields, plus events for retries, refreshes, and rejected admissions.
//! - Enable `metrics` to increment the `api_resilience_operation_total` counter for every
//!   attempt/success/failure (labeled by `op` + `outcome`) and to record per-attempt latency
//!   in the `api_resilience_attempt_seconds` histogram.

mod metrics;
mod tracing;

pub use self::{metrics::*, tracing::*};

// self
use crate::_prelude::*;

/// Emits a tracing event when the `tracing` feature is enabled; expands to nothing otherwise.
macro_rules! event {
	($level:ident, $($arg:tt)+) => {
		#[cfg(feature = "tracing")]
		{
			::tracing::$level!(target: "api_resilience", $($arg)+);
		}
	};
}
pub(crate) use event;

/// Operations observed by the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
	/// API request issued through the executor.
	Request,
	/// Username/password login.
	Login,
	/// Refresh-token exchange.
	Refresh,
	/// Server-side admission decision.
	Admission,
}
impl OpKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpKind::Request => "request",
			OpKind::Login => "login",
			OpKind::Refresh => "refresh",
			OpKind::Admission => "admission",
		}
	}
}
impl Display for OpKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpOutcome {
	/// Entry to an operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl OpOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpOutcome::Attempt => "attempt",
			OpOutcome::Success => "success",
			OpOutcome::Failure => "failure",
		}
	}
}
impl Display for OpOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
