//! Crate-level error types shared by the executor, token store, client facade, and limiter.

// self
use crate::{_prelude::*, limiter::RateLimitExceeded};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
///
/// Request-level variants carry the number of attempts made and the last observed status so
/// failures are actionable without additional logging.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Response body could not be interpreted.
	#[error(transparent)]
	Response(#[from] ResponseError),
	/// Admission was denied by a [`crate::limiter::RateLimiter`].
	#[error(transparent)]
	RateLimited(#[from] RateLimitExceeded),

	/// Connection-level failure outside of the retry loop (login or refresh calls).
	#[error("Network failure after {attempts} attempt(s): {source}.")]
	Network {
		/// Attempts made before giving up.
		attempts: u32,
		/// Underlying transport failure.
		#[source]
		source: TransportError,
	},
	/// Non-retryable HTTP status (client errors other than 401/403/429).
	#[error("Request failed with HTTP {status} after {attempts} attempt(s).")]
	Http {
		/// HTTP status code returned by the service.
		status: u16,
		/// Attempts made before the failure.
		attempts: u32,
		/// Body preview returned alongside the status.
		body: String,
	},
	/// The session can no longer be used; callers must log in again.
	#[error("Authentication expired after {attempts} attempt(s): {reason}.")]
	AuthExpired {
		/// Why the session was abandoned.
		reason: String,
		/// Last observed HTTP status, when one was received.
		status: Option<u16>,
		/// Attempts made before the failure.
		attempts: u32,
	},
	/// Retry budget consumed on a retryable failure class.
	#[error(
		"Retries exhausted after {attempts} attempt(s) (last status: {}): {last_error}.",
		display_status(*last_status)
	)]
	RetriesExhausted {
		/// Attempts made, including the first one.
		attempts: u32,
		/// Last observed HTTP status, if the final attempt produced a response.
		last_status: Option<u16>,
		/// Description of the final failure.
		last_error: String,
	},
}
impl Error {
	/// Builds an [`Error::AuthExpired`] that was not tied to a specific HTTP exchange.
	pub fn auth_expired(reason: impl Into<String>) -> Self {
		Self::AuthExpired { reason: reason.into(), status: None, attempts: 0 }
	}

	/// Returns `true` for failure classes worth re-attempting.
	pub fn is_retryable(&self) -> bool {
		match self {
			Self::Network { .. } => true,
			Self::Http { status, .. } => is_retryable_status(*status),
			_ => false,
		}
	}

	/// Returns the last HTTP status associated with the failure, if any.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::Http { status, .. } => Some(*status),
			Self::AuthExpired { status, .. } => *status,
			Self::RetriesExhausted { last_status, .. } => *last_status,
			_ => None,
		}
	}

	/// Returns the number of attempts recorded with the failure, if any.
	pub fn attempts(&self) -> Option<u32> {
		match self {
			Self::Network { attempts, .. }
			| Self::Http { attempts, .. }
			| Self::AuthExpired { attempts, .. }
			| Self::RetriesExhausted { attempts, .. } => Some(*attempts),
			_ => None,
		}
	}
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Configuration document could not be parsed.
	#[error("Configuration is invalid at `{path}`: {message}.")]
	Parse {
		/// Path of the offending field.
		path: String,
		/// Parser message.
		message: String,
	},
	/// Base URL or request path could not be combined into a valid URL.
	#[error("URL `{url}` is invalid.")]
	InvalidUrl {
		/// Offending URL text.
		url: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Base URL does not use HTTP(S).
	#[error("Base URL must use http or https: {url}.")]
	UnsupportedScheme {
		/// Offending URL.
		url: String,
	},
	/// A numeric option is outside its accepted range.
	#[error("Option `{option}` is out of range: {reason}.")]
	OutOfRange {
		/// Option name.
		option: &'static str,
		/// Why the value was rejected.
		reason: &'static str,
	},
	/// Request body could not be encoded.
	#[error("Request body could not be encoded.")]
	Encode(#[from] serde_json::Error),
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Failures raised while interpreting a response body.
#[derive(Debug, ThisError)]
pub enum ResponseError {
	/// Body was not the expected JSON shape.
	#[error("Response body is malformed at `{}`.", source.path())]
	Parse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code of the response.
		status: u16,
	},
	/// Token endpoint response omitted `expires_in`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
	/// Token endpoint returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
	/// Token endpoint returned a non-positive duration.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
}

/// Transport-level failures (network, timeout, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// The attempt did not complete within its time budget.
	#[error("Request timed out after {elapsed:?}.")]
	Timeout {
		/// Time spent before the attempt was abandoned.
		elapsed: StdDuration,
	},
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the service.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the service.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		if e.is_timeout() {
			Self::Timeout { elapsed: StdDuration::ZERO }
		} else {
			Self::network(e)
		}
	}
}

/// Returns `true` for statuses worth retrying (429 and 5xx).
pub fn is_retryable_status(status: u16) -> bool {
	status == 429 || (500..600).contains(&status)
}

fn display_status(status: Option<u16>) -> String {
	status.map_or_else(|| "none".into(), |code| code.to_string())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn retryable_classification_matches_status_classes() {
		assert!(is_retryable_status(429));
		assert!(is_retryable_status(500));
		assert!(is_retryable_status(503));
		assert!(!is_retryable_status(400));
		assert!(!is_retryable_status(404));
		assert!(!is_retryable_status(401));
	}

	#[test]
	fn fatal_errors_report_status_and_attempts() {
		let err = Error::RetriesExhausted {
			attempts: 3,
			last_status: Some(503),
			last_error: "HTTP 503".into(),
		};

		assert_eq!(err.status(), Some(503));
		assert_eq!(err.attempts(), Some(3));
		assert!(err.to_string().contains("3 attempt(s)"));
		assert!(err.to_string().contains("503"));

		let err = Error::RetriesExhausted {
			attempts: 1,
			last_status: None,
			last_error: "connection reset".into(),
		};

		assert!(err.to_string().contains("last status: none"));
	}

	#[test]
	fn network_errors_are_retryable_but_client_errors_are_not() {
		let network = Error::Network {
			attempts: 1,
			source: TransportError::Timeout { elapsed: StdDuration::from_secs(1) },
		};
		let client = Error::Http { status: 400, attempts: 1, body: String::new() };

		assert!(network.is_retryable());
		assert!(!client.is_retryable());
		assert!(!Error::auth_expired("no session").is_retryable());
	}
}
