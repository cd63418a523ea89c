//! Client and limiter configuration with serde support and range validation.
//!
//! Durations are expressed in milliseconds on the wire (`*_ms` fields) so configuration
//! documents stay readable; the typed accessors return [`std::time::Duration`] values.

// self
use crate::{
	_prelude::*,
	backoff::BackoffPolicy,
	error::ConfigError,
	limiter::WindowStrategy,
};

/// Top-level client configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
	/// Base URL every request path is appended to.
	pub base_url: Url,
	/// Retry slots granted to each request on top of the first attempt.
	#[serde(default = "default_max_retries")]
	pub max_retries: u32,
	/// Backoff schedule applied between retries.
	#[serde(default)]
	pub backoff: BackoffConfig,
	/// Upper bound for a single attempt, in milliseconds.
	#[serde(default = "default_request_timeout_ms")]
	pub request_timeout_ms: u64,
	/// Tokens expiring within this many milliseconds are refreshed before use.
	#[serde(default = "default_refresh_skew_ms")]
	pub refresh_skew_ms: u64,
	/// Authentication endpoint paths.
	#[serde(default)]
	pub auth: AuthPaths,
	/// Metrics recorder options.
	#[serde(default)]
	pub metrics: MetricsConfig,
}
impl ClientConfig {
	/// Creates a configuration with default options for the provided base URL.
	pub fn new(base_url: Url) -> Self {
		Self {
			base_url,
			max_retries: default_max_retries(),
			backoff: BackoffConfig::default(),
			request_timeout_ms: default_request_timeout_ms(),
			refresh_skew_ms: default_refresh_skew_ms(),
			auth: AuthPaths::default(),
			metrics: MetricsConfig::default(),
		}
	}

	/// Parses a configuration from the base URL string.
	pub fn parse(base_url: &str) -> Result<Self, ConfigError> {
		let url = Url::parse(base_url)
			.map_err(|source| ConfigError::InvalidUrl { url: base_url.into(), source })?;

		Ok(Self::new(url))
	}

	/// Deserializes and validates a JSON configuration document.
	pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
		let de = &mut serde_json::Deserializer::from_str(raw);
		let config: Self = serde_path_to_error::deserialize(de).map_err(|err| {
			ConfigError::Parse { path: err.path().to_string(), message: err.inner().to_string() }
		})?;

		config.validate()?;

		Ok(config)
	}

	/// Overrides the retry budget.
	pub fn with_max_retries(mut self, max_retries: u32) -> Self {
		self.max_retries = max_retries;

		self
	}

	/// Overrides the backoff schedule.
	pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
		self.backoff = backoff;

		self
	}

	/// Overrides the per-attempt timeout.
	pub fn with_request_timeout(mut self, timeout: StdDuration) -> Self {
		self.request_timeout_ms = duration_to_ms(timeout);

		self
	}

	/// Overrides the refresh skew window.
	pub fn with_refresh_skew(mut self, skew: StdDuration) -> Self {
		self.refresh_skew_ms = duration_to_ms(skew);

		self
	}

	/// Overrides the authentication endpoint paths.
	pub fn with_auth_paths(mut self, auth: AuthPaths) -> Self {
		self.auth = auth;

		self
	}

	/// Overrides the metrics options.
	pub fn with_metrics(mut self, metrics: MetricsConfig) -> Self {
		self.metrics = metrics;

		self
	}

	/// Per-attempt timeout.
	pub fn request_timeout(&self) -> StdDuration {
		StdDuration::from_millis(self.request_timeout_ms)
	}

	/// Refresh skew window.
	pub fn refresh_skew(&self) -> StdDuration {
		StdDuration::from_millis(self.refresh_skew_ms)
	}

	/// Rejects values the executor cannot honor.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if !matches!(self.base_url.scheme(), "http" | "https") {
			return Err(ConfigError::UnsupportedScheme { url: self.base_url.to_string() });
		}
		if self.request_timeout_ms == 0 {
			return Err(ConfigError::OutOfRange {
				option: "request_timeout_ms",
				reason: "must be positive",
			});
		}
		if self.metrics.max_attempts == Some(0) {
			return Err(ConfigError::OutOfRange {
				option: "metrics.max_attempts",
				reason: "must be positive when set",
			});
		}

		self.backoff.validate()
	}
}

/// Backoff schedule options.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
	/// Delay before the first retry, in milliseconds.
	pub base_ms: u64,
	/// Upper bound for any single delay, in milliseconds.
	pub max_ms: u64,
	/// Multiplicative jitter ratio in `[0, 1]`.
	pub jitter_ratio: f64,
	/// Optional RNG seed; set it to make jitter reproducible.
	pub seed: Option<u64>,
}
impl BackoffConfig {
	/// Creates a jitter-free schedule with the given base and cap.
	pub fn fixed(base: StdDuration, max: StdDuration) -> Self {
		Self {
			base_ms: duration_to_ms(base),
			max_ms: duration_to_ms(max),
			jitter_ratio: 0.,
			seed: None,
		}
	}

	/// Overrides the jitter ratio.
	pub fn with_jitter_ratio(mut self, ratio: f64) -> Self {
		self.jitter_ratio = ratio;

		self
	}

	/// Seeds the jitter RNG.
	pub fn with_seed(mut self, seed: u64) -> Self {
		self.seed = Some(seed);

		self
	}

	/// Converts the options into a [`BackoffPolicy`].
	pub fn policy(&self) -> BackoffPolicy {
		BackoffPolicy::new(
			StdDuration::from_millis(self.base_ms),
			StdDuration::from_millis(self.max_ms),
			self.jitter_ratio,
		)
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if !(0. ..=1.).contains(&self.jitter_ratio) {
			return Err(ConfigError::OutOfRange {
				option: "backoff.jitter_ratio",
				reason: "must be within [0, 1]",
			});
		}
		if self.base_ms > self.max_ms {
			return Err(ConfigError::OutOfRange {
				option: "backoff.base_ms",
				reason: "must not exceed backoff.max_ms",
			});
		}

		Ok(())
	}
}
impl Default for BackoffConfig {
	fn default() -> Self {
		Self { base_ms: 250, max_ms: 5_000, jitter_ratio: 0.2, seed: None }
	}
}

/// Paths of the authentication endpoints, relative to the base URL.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthPaths {
	/// Form-encoded username/password login.
	pub login_path: String,
	/// Refresh-token exchange.
	pub refresh_path: String,
	/// Account registration.
	pub register_path: String,
}
impl Default for AuthPaths {
	fn default() -> Self {
		Self {
			login_path: "/api/v1/auth/login".into(),
			refresh_path: "/api/v1/auth/refresh".into(),
			register_path: "/api/v1/auth/register".into(),
		}
	}
}

/// Metrics recorder options.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
	/// Include retried (non-final) attempts in latency percentiles.
	pub include_retries: bool,
	/// Keep at most this many attempts; the oldest are dropped first. Unbounded when unset.
	pub max_attempts: Option<usize>,
}
impl MetricsConfig {
	/// Bounds the attempt log.
	pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
		self.max_attempts = Some(max_attempts);

		self
	}
}

/// Admission-control options for [`crate::limiter::RateLimiter`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
	/// Window length, in milliseconds.
	pub window_ms: u64,
	/// Requests admitted per client key within one window.
	pub limit: u32,
	/// Window accounting strategy.
	pub strategy: WindowStrategy,
	/// Entries untouched for this many milliseconds are evicted.
	pub idle_ttl_ms: u64,
}
impl RateLimitConfig {
	/// Creates a configuration admitting `limit` requests per `window`.
	///
	/// The idle TTL defaults to five minutes, stretched to the window when the window is longer.
	pub fn new(limit: u32, window: StdDuration) -> Self {
		let defaults = Self::default();
		let window_ms = duration_to_ms(window);

		Self { limit, window_ms, idle_ttl_ms: defaults.idle_ttl_ms.max(window_ms), ..defaults }
	}

	/// Overrides the window strategy.
	pub fn with_strategy(mut self, strategy: WindowStrategy) -> Self {
		self.strategy = strategy;

		self
	}

	/// Overrides the idle eviction period.
	pub fn with_idle_ttl(mut self, ttl: StdDuration) -> Self {
		self.idle_ttl_ms = duration_to_ms(ttl);

		self
	}

	/// Window length.
	pub fn window(&self) -> StdDuration {
		StdDuration::from_millis(self.window_ms)
	}

	/// Idle eviction period.
	pub fn idle_ttl(&self) -> StdDuration {
		StdDuration::from_millis(self.idle_ttl_ms)
	}

	/// Rejects windows the limiter cannot account for.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.window_ms == 0 {
			return Err(ConfigError::OutOfRange {
				option: "rate_limit.window_ms",
				reason: "must be positive",
			});
		}
		if self.idle_ttl_ms < self.window_ms {
			return Err(ConfigError::OutOfRange {
				option: "rate_limit.idle_ttl_ms",
				reason: "must be at least the window length",
			});
		}

		Ok(())
	}
}
impl Default for RateLimitConfig {
	fn default() -> Self {
		Self {
			window_ms: 60_000,
			limit: 100,
			strategy: WindowStrategy::default(),
			idle_ttl_ms: 300_000,
		}
	}
}

fn default_max_retries() -> u32 {
	3
}

fn default_request_timeout_ms() -> u64 {
	30_000
}

fn default_refresh_skew_ms() -> u64 {
	60_000
}

fn duration_to_ms(duration: StdDuration) -> u64 {
	u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
