//! Resilient request execution: token attachment, bounded attempts, retries with backoff, and
//! one credential refresh per request.
//!
//! [`Executor::execute`] drives the [`ExecState`] machine until it reaches a terminal state.
//! Every HTTP attempt is recorded in the [`MetricsRecorder`]; an attempt's record is published
//! once the loop knows whether another attempt follows, so the final attempt of each request is
//! the one flagged `terminal`.

pub mod state;

pub use state::ExecState;

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use rand::{SeedableRng, rngs::StdRng};
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	backoff::BackoffPolicy,
	config::ClientConfig,
	error::{ConfigError, ResponseError, TransportError},
	executor::state::Verdict,
	http::{HttpRequest, HttpTransport, Method, RequestBody},
	obs::{self, OpKind, OpSpan, event},
	recorder::{MetricsRecorder, RequestAttempt},
	store::TokenStore,
};

const BODY_PREVIEW_CHARS: usize = 512;

/// Description of one logical request.
#[derive(Clone, Debug)]
pub struct RequestSpec {
	/// Method to issue.
	pub method: Method,
	/// Path appended to the base URL.
	pub path: String,
	/// Query parameters appended to the URL.
	pub query: Vec<(String, String)>,
	/// Optional encoded body.
	pub body: Option<RequestBody>,
	/// Extra headers sent with every attempt.
	pub headers: Vec<(String, String)>,
	/// Attach the session's bearer token and refresh it when needed.
	pub auth_required: bool,
	/// Overrides the configured retry budget.
	pub max_retries: Option<u32>,
	/// Overrides the configured backoff schedule.
	pub backoff: Option<BackoffPolicy>,
	/// Instant after which no further attempt is started.
	pub deadline: Option<Instant>,
}
impl RequestSpec {
	/// Creates an authenticated request without body or query.
	pub fn new(method: Method, path: impl Into<String>) -> Self {
		Self {
			method,
			path: path.into(),
			query: Vec::new(),
			body: None,
			headers: Vec::new(),
			auth_required: true,
			max_retries: None,
			backoff: None,
			deadline: None,
		}
	}

	/// Appends a query parameter.
	pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.query.push((key.into(), value.into()));

		self
	}

	/// Sets an already-encoded body.
	pub fn with_body(mut self, body: RequestBody) -> Self {
		self.body = Some(body);

		self
	}

	/// Serializes `payload` as the JSON body.
	pub fn with_json<T>(self, payload: &T) -> Result<Self, ConfigError>
	where
		T: ?Sized + Serialize,
	{
		Ok(self.with_body(RequestBody::json(payload)?))
	}

	/// Adds a header to every attempt.
	pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.push((name.into(), value.into()));

		self
	}

	/// Sends the request without credentials.
	pub fn without_auth(mut self) -> Self {
		self.auth_required = false;

		self
	}

	/// Overrides the retry budget for this request.
	pub fn with_max_retries(mut self, max_retries: u32) -> Self {
		self.max_retries = Some(max_retries);

		self
	}

	/// Overrides the backoff schedule for this request.
	pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
		self.backoff = Some(backoff);

		self
	}

	/// Stops starting attempts after `deadline`.
	pub fn with_deadline(mut self, deadline: Instant) -> Self {
		self.deadline = Some(deadline);

		self
	}

	/// Bounds the whole request, retries included, to `budget` from now.
	pub fn with_time_budget(self, budget: StdDuration) -> Self {
		self.with_deadline(Instant::now() + budget)
	}
}

/// Successful response of a logical request.
#[derive(Clone, Debug)]
pub struct ApiResponse {
	/// HTTP status code.
	pub status: u16,
	/// Headers keyed by lowercase name.
	pub headers: BTreeMap<String, String>,
	/// Raw body bytes.
	pub body: Vec<u8>,
	/// Time from the first attempt to the final response, backoff included.
	pub elapsed: StdDuration,
	/// Attempts made, including the successful one.
	pub attempts: u32,
}
impl ApiResponse {
	/// Returns `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Returns the header value for `name`, case-insensitively.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
	}

	/// Decodes the body as JSON, reporting the path of the first mismatch.
	pub fn json<T>(&self) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let de = &mut serde_json::Deserializer::from_slice(&self.body);

		serde_path_to_error::deserialize(de)
			.map_err(|source| ResponseError::Parse { source, status: self.status }.into())
	}

	/// Body decoded as UTF-8, replacing invalid sequences.
	pub fn text(&self) -> String {
		String::from_utf8_lossy(&self.body).into_owned()
	}
}

/// Runs logical requests against one base URL with shared tokens and metrics.
pub struct Executor<T>
where
	T: ?Sized + HttpTransport,
{
	transport: Arc<T>,
	tokens: Arc<TokenStore>,
	recorder: Arc<MetricsRecorder>,
	base_url: Url,
	max_retries: u32,
	backoff: BackoffPolicy,
	request_timeout: StdDuration,
	refresh_skew: StdDuration,
	rng: Mutex<StdRng>,
	next_request_id: AtomicU64,
}
impl<T> Executor<T>
where
	T: ?Sized + HttpTransport,
{
	/// Creates an executor using the options of `config`.
	pub fn new(
		config: &ClientConfig,
		transport: Arc<T>,
		tokens: Arc<TokenStore>,
		recorder: Arc<MetricsRecorder>,
	) -> Self {
		let rng = match config.backoff.seed {
			Some(seed) => StdRng::seed_from_u64(seed),
			None => StdRng::from_os_rng(),
		};

		Self {
			transport,
			tokens,
			recorder,
			base_url: config.base_url.clone(),
			max_retries: config.max_retries,
			backoff: config.backoff.policy(),
			request_timeout: config.request_timeout(),
			refresh_skew: config.refresh_skew(),
			rng: Mutex::new(rng),
			next_request_id: AtomicU64::new(1),
		}
	}

	/// Session token store.
	pub fn tokens(&self) -> &Arc<TokenStore> {
		&self.tokens
	}

	/// Attempt recorder.
	pub fn recorder(&self) -> &Arc<MetricsRecorder> {
		&self.recorder
	}

	/// Joins `path` onto the base URL and appends `query`.
	pub fn resolve(&self, path: &str, query: &[(String, String)]) -> Result<Url, ConfigError> {
		join_url(&self.base_url, path, query)
	}

	/// Executes `spec` until it succeeds, fails fatally, or runs out of retries or time.
	pub async fn execute(&self, spec: RequestSpec) -> Result<ApiResponse> {
		OpSpan::new(OpKind::Request, "execute").observe(self.run(spec)).await
	}

	async fn run(&self, spec: RequestSpec) -> Result<ApiResponse> {
		let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
		let url = self.resolve(&spec.path, &spec.query)?;
		let max_retries = spec.max_retries.unwrap_or(self.max_retries);
		let backoff = spec.backoff.unwrap_or(self.backoff);
		let started = Instant::now();
		let mut retries_used = 0_u32;
		let mut refreshed = false;
		let mut pending: Option<RequestAttempt> = None;
		let mut state = ExecState::Attempting { attempt: 1 };

		loop {
			event!(trace, request_id, state = state.label(), "Retry loop step.");

			state = match state {
				ExecState::Attempting { attempt } => {
					let token = if spec.auth_required {
						match self.session_token().await {
							Ok(token) => Some(token),
							Err(err) => {
								state = ExecState::Failed(with_attempts(err, attempt - 1, None));

								continue;
							},
						}
					} else {
						None
					};
					let timeout = match spec.deadline {
						Some(deadline) => {
							let left = deadline.saturating_duration_since(Instant::now());

							if left.is_zero() {
								let err = deadline_exhausted(attempt - 1, &pending);

								state = ExecState::Failed(err);

								continue;
							}

							self.request_timeout.min(left)
						},
						None => self.request_timeout,
					};
					let mut headers = vec![("accept".to_owned(), "application/json".to_owned())];

					headers.extend(spec.headers.iter().cloned());

					if let Some(token) = &token {
						headers.push(("authorization".into(), token.bearer()));
					}

					let request = HttpRequest {
						method: spec.method,
						url: url.clone(),
						headers,
						body: spec.body.clone(),
						timeout,
					};

					self.publish(pending.take());
					event!(
						debug,
						request_id,
						attempt,
						method = %spec.method,
						path = %spec.path,
						"Issuing attempt."
					);

					let started_at = OffsetDateTime::now_utc();
					let clock = Instant::now();
					let sent = tokio::time::timeout(timeout, self.transport.send(request)).await;
					let result = sent.unwrap_or_else(|_| {
						Err(TransportError::Timeout { elapsed: clock.elapsed() })
					});
					let duration = clock.elapsed();
					let verdict = Verdict::classify(result, token.is_some());
					let outcome = verdict.outcome();

					obs::record_attempt_latency(outcome.as_str(), duration);

					pending = Some(RequestAttempt {
						request_id,
						method: spec.method,
						path: spec.path.clone(),
						attempt_number: attempt,
						started_at,
						duration,
						outcome,
						status_code: verdict.status(),
						terminal: false,
					});

					match verdict {
						Verdict::Success(response) => ExecState::Succeeded(ApiResponse {
							status: response.status,
							headers: response.headers,
							body: response.body,
							elapsed: started.elapsed(),
							attempts: attempt,
						}),
						Verdict::Fatal(response) => ExecState::Failed(Error::Http {
							status: response.status,
							attempts: attempt,
							body: response.body_preview(BODY_PREVIEW_CHARS),
						}),
						Verdict::Unauthorized { status } => match token {
							Some(rejected) if !refreshed => {
								refreshed = true;

								ExecState::Refreshing {
									rejected,
									status,
									next_attempt: attempt + 1,
								}
							},
							_ => ExecState::Failed(Error::AuthExpired {
								reason: "credentials were rejected after a refresh".into(),
								status: Some(status),
								attempts: attempt,
							}),
						},
						Verdict::Retryable { status, reason, retry_after } => {
							let exhausted = |reason: String| Error::RetriesExhausted {
								attempts: attempt,
								last_status: status,
								last_error: reason,
							};

							if retries_used >= max_retries {
								ExecState::Failed(exhausted(reason))
							} else {
								let retry = retries_used + 1;
								let delay = self.retry_delay(&backoff, retry, retry_after);
								let fits = spec
									.deadline
									.is_none_or(|deadline| Instant::now() + delay < deadline);

								if fits {
									retries_used += 1;
									event!(
										debug,
										request_id,
										attempt,
										delay_ms = delay.as_millis() as u64,
										%reason,
										"Retrying after backoff."
									);

									ExecState::Backoff { delay, next_attempt: attempt + 1 }
								} else {
									ExecState::Failed(exhausted(format!(
										"{reason}; deadline leaves no room for another attempt"
									)))
								}
							}
						},
					}
				},
				ExecState::Backoff { delay, next_attempt } => {
					tokio::time::sleep(delay).await;

					ExecState::Attempting { attempt: next_attempt }
				},
				ExecState::Refreshing { rejected, status, next_attempt } => {
					event!(debug, request_id, status, "Credentials rejected; refreshing session.");

					match self.tokens.force_refresh(&rejected).await {
						Ok(()) => ExecState::Attempting { attempt: next_attempt },
						Err(err) =>
							ExecState::Failed(with_attempts(err, next_attempt - 1, Some(status))),
					}
				},
				ExecState::Succeeded(response) => {
					self.publish_terminal(pending.take());

					return Ok(response);
				},
				ExecState::Failed(err) => {
					self.publish_terminal(pending.take());
					event!(warn, request_id, error = %err, "Request failed.");

					return Err(err);
				},
			};
		}
	}

	/// Refreshes the session if it is about to expire and returns the access token to attach.
	async fn session_token(&self) -> Result<TokenSecret> {
		self.tokens.refresh_if_needed(self.refresh_skew).await?;

		self.tokens
			.current()
			.map(|state| state.access_token)
			.ok_or_else(|| Error::auth_expired("no active session"))
	}

	/// Backoff delay for retry `retry`, raised to the server's hint but never past the cap.
	fn retry_delay(
		&self,
		backoff: &BackoffPolicy,
		retry: u32,
		retry_after: Option<StdDuration>,
	) -> StdDuration {
		let delay = {
			let mut rng = self.rng.lock();

			backoff.delay(retry, &mut *rng)
		};

		match retry_after {
			Some(hint) => delay.max(hint.min(backoff.max)),
			None => delay,
		}
	}

	fn publish(&self, attempt: Option<RequestAttempt>) {
		if let Some(attempt) = attempt {
			self.recorder.record(attempt);
		}
	}

	fn publish_terminal(&self, attempt: Option<RequestAttempt>) {
		self.publish(attempt.map(|attempt| RequestAttempt { terminal: true, ..attempt }));
	}
}
impl<T> Debug for Executor<T>
where
	T: ?Sized + HttpTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Executor")
			.field("base_url", &self.base_url.as_str())
			.field("max_retries", &self.max_retries)
			.field("backoff", &self.backoff)
			.field("request_timeout", &self.request_timeout)
			.field("refresh_skew", &self.refresh_skew)
			.finish_non_exhaustive()
	}
}

/// Joins `path` onto `base` with exactly one separating slash and appends `query`.
pub(crate) fn join_url(
	base: &Url,
	path: &str,
	query: &[(String, String)],
) -> Result<Url, ConfigError> {
	let joined =
		format!("{}/{}", base.as_str().trim_end_matches('/'), path.trim_start_matches('/'));
	let mut url =
		Url::parse(&joined).map_err(|source| ConfigError::InvalidUrl { url: joined, source })?;

	if !query.is_empty() {
		url.query_pairs_mut()
			.extend_pairs(query.iter().map(|(key, value)| (key.as_str(), value.as_str())));
	}

	Ok(url)
}

/// Stamps request context onto an [`Error::AuthExpired`] raised by the token store.
fn with_attempts(err: Error, attempts: u32, rejected_status: Option<u16>) -> Error {
	match err {
		Error::AuthExpired { reason, status, .. } =>
			Error::AuthExpired { reason, status: status.or(rejected_status), attempts },
		other => other,
	}
}

fn deadline_exhausted(attempts: u32, last: &Option<RequestAttempt>) -> Error {
	Error::RetriesExhausted {
		attempts,
		last_status: last.as_ref().and_then(|attempt| attempt.status_code),
		last_error: "request deadline elapsed".into(),
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		http::{HttpResponse, TransportFuture},
		store::{RefreshFuture, TokenRefresher},
	};

	struct Unreachable;
	impl HttpTransport for Unreachable {
		fn send(&self, _: HttpRequest) -> TransportFuture<'_> {
			Box::pin(async { Ok(HttpResponse::new(200, "{}")) })
		}
	}
	impl TokenRefresher for Unreachable {
		fn refresh<'a>(&'a self, _: &'a TokenSecret) -> RefreshFuture<'a> {
			Box::pin(async { Err(Error::auth_expired("refresh is not available")) })
		}
	}

	fn executor_for(base: &str) -> Executor<Unreachable> {
		let config = ClientConfig::parse(base).expect("Base URL fixture should parse.");

		Executor::new(
			&config,
			Arc::new(Unreachable),
			Arc::new(TokenStore::new(Arc::new(Unreachable))),
			Arc::new(MetricsRecorder::default()),
		)
	}

	#[test]
	fn paths_join_without_duplicate_slashes() {
		let executor = executor_for("http://localhost:8000/");
		let url = executor
			.resolve("/api/v1/users", &[("page".into(), "2".into()), ("q".into(), "a b".into())])
			.expect("Path should resolve.");

		assert_eq!(url.as_str(), "http://localhost:8000/api/v1/users?page=2&q=a+b");

		let nested = executor_for("http://localhost:8000/base");

		assert_eq!(
			nested.resolve("items", &[]).expect("Path should resolve.").as_str(),
			"http://localhost:8000/base/items"
		);
	}

	#[test]
	fn retry_after_raises_but_never_exceeds_the_cap() {
		let executor = executor_for("http://localhost:8000");
		let policy =
			BackoffPolicy::new(StdDuration::from_millis(100), StdDuration::from_secs(1), 0.);

		assert_eq!(executor.retry_delay(&policy, 1, None), StdDuration::from_millis(100));
		assert_eq!(
			executor.retry_delay(&policy, 1, Some(StdDuration::from_millis(500))),
			StdDuration::from_millis(500)
		);
		assert_eq!(
			executor.retry_delay(&policy, 1, Some(StdDuration::from_secs(30))),
			StdDuration::from_secs(1)
		);
	}

	#[tokio::test]
	async fn authenticated_requests_without_session_fail_before_any_attempt() {
		let executor = executor_for("http://localhost:8000");
		let err = executor
			.execute(RequestSpec::new(Method::Get, "/api/v1/users/me"))
			.await
			.expect_err("Missing session should fail.");

		assert!(matches!(err, Error::AuthExpired { attempts: 0, .. }));
		assert!(executor.recorder().attempts().is_empty());
	}

	#[test]
	fn json_bodies_decode_with_paths() {
		#[derive(Debug, Deserialize)]
		struct User {
			#[allow(dead_code)]
			id: u64,
		}

		let response = ApiResponse {
			status: 200,
			headers: BTreeMap::new(),
			body: br#"{"id":"seven"}"#.to_vec(),
			elapsed: StdDuration::ZERO,
			attempts: 1,
		};
		let err = response.json::<User>().expect_err("String id should not decode.");

		match err {
			Error::Response(ResponseError::Parse { source, status }) => {
				assert_eq!(status, 200);
				assert_eq!(source.path().to_string(), "id");
			},
			other => panic!("Unexpected error: {other:?}."),
		}
	}
}
