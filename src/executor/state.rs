//! States of the request retry loop and the classification of attempt results.

// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	error::{self, TransportError},
	executor::ApiResponse,
	http::HttpResponse,
	recorder::AttemptOutcome,
};

/// One step of the retry loop driven by [`crate::executor::Executor::execute`].
#[derive(Debug)]
pub enum ExecState {
	/// Issue attempt number `attempt` (1-based).
	Attempting {
		/// Attempt about to be issued.
		attempt: u32,
	},
	/// Sleep before the next attempt.
	Backoff {
		/// Time to wait.
		delay: StdDuration,
		/// Attempt issued once the delay elapses.
		next_attempt: u32,
	},
	/// Rotate the session after the service rejected `rejected`.
	Refreshing {
		/// Access token the service refused.
		rejected: TokenSecret,
		/// Status of the refusal (401 or 403).
		status: u16,
		/// Attempt issued once the session is rotated.
		next_attempt: u32,
	},
	/// Terminal success.
	Succeeded(ApiResponse),
	/// Terminal failure.
	Failed(Error),
}
impl ExecState {
	/// Stable label for logs.
	pub const fn label(&self) -> &'static str {
		match self {
			Self::Attempting { .. } => "attempting",
			Self::Backoff { .. } => "backoff",
			Self::Refreshing { .. } => "refreshing",
			Self::Succeeded(_) => "succeeded",
			Self::Failed(_) => "failed",
		}
	}
}

/// How the loop should react to one attempt's result.
#[derive(Debug)]
pub(crate) enum Verdict {
	Success(HttpResponse),
	/// Credentials refused while authentication was attached.
	Unauthorized { status: u16 },
	Retryable { status: Option<u16>, reason: String, retry_after: Option<StdDuration> },
	Fatal(HttpResponse),
}
impl Verdict {
	pub(crate) fn classify(
		result: Result<HttpResponse, TransportError>,
		auth_attached: bool,
	) -> Self {
		let response = match result {
			Ok(response) => response,
			Err(err) =>
				return Self::Retryable { status: None, reason: err.to_string(), retry_after: None },
		};

		let status = response.status;

		match status {
			_ if response.is_success() => Self::Success(response),
			401 | 403 if auth_attached => Self::Unauthorized { status },
			_ if error::is_retryable_status(status) => Self::Retryable {
				status: Some(status),
				reason: format!("HTTP {status}"),
				retry_after: response.retry_after(),
			},
			_ => Self::Fatal(response),
		}
	}

	/// Outcome recorded for the attempt, before the loop decides what follows.
	pub(crate) fn outcome(&self) -> AttemptOutcome {
		match self {
			Self::Success(_) => AttemptOutcome::Success,
			Self::Unauthorized { .. } | Self::Retryable { .. } => AttemptOutcome::RetryableFailure,
			Self::Fatal(_) => AttemptOutcome::FatalFailure,
		}
	}

	pub(crate) fn status(&self) -> Option<u16> {
		match self {
			Self::Success(response) | Self::Fatal(response) => Some(response.status),
			Self::Unauthorized { status } => Some(*status),
			Self::Retryable { status, .. } => *status,
		}
	}
}
