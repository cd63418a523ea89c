//! axum middleware enforcing a shared [`RateLimiter`].
//!
//! Clients are identified by the `x-api-key` header when present, otherwise by the peer IP
//! address (requires serving with `into_make_service_with_connect_info::<SocketAddr>()`), and
//! fall back to a single `anonymous` bucket when neither is known.

// std
use std::net::SocketAddr;
// crates.io
use axum::{
	Json, Router,
	extract::{ConnectInfo, Request, State},
	http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
	middleware::{self, Next},
	response::{IntoResponse, Response},
};
// self
use crate::{
	_prelude::*,
	limiter::{Decision, RateLimiter},
};

/// Header carrying an explicit client identity.
pub const API_KEY_HEADER: &str = "x-api-key";
/// Key shared by requests with no identifiable client.
pub const ANONYMOUS_KEY: &str = "anonymous";

const LIMIT_HEADER: &str = "x-ratelimit-limit";
const REMAINING_HEADER: &str = "x-ratelimit-remaining";
const RESET_HEADER: &str = "x-ratelimit-reset";

/// JSON body returned with `429 Too Many Requests`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitBody {
	/// Human-readable explanation.
	pub detail: String,
	/// Configured limit per window.
	pub limit: u32,
	/// Window length in whole seconds.
	pub period_seconds: u64,
}

/// Wraps every route of `router` with [`enforce_rate_limit`].
pub fn rate_limited<S>(router: Router<S>, limiter: Arc<RateLimiter>) -> Router<S>
where
	S: 'static + Clone + Send + Sync,
{
	router.layer(middleware::from_fn_with_state(limiter, enforce_rate_limit))
}

/// Admits or rejects `request` before it reaches the downstream handler.
pub async fn enforce_rate_limit(
	State(limiter): State<Arc<RateLimiter>>,
	request: Request,
	next: Next,
) -> Response {
	let key = client_key(&request);
	let decision = limiter.admit(&key, Instant::now());

	if !decision.allowed {
		return reject(&decision, limiter.config().window());
	}

	let mut response = next.run(request).await;

	insert_quota_headers(response.headers_mut(), &decision);

	response
}

/// Resolves the identity a request is counted against.
pub fn client_key(request: &Request) -> String {
	if let Some(key) = request
		.headers()
		.get(API_KEY_HEADER)
		.and_then(|value| value.to_str().ok())
		.map(str::trim)
		.filter(|value| !value.is_empty())
	{
		return key.to_owned();
	}

	request
		.extensions()
		.get::<ConnectInfo<SocketAddr>>()
		.map_or_else(|| ANONYMOUS_KEY.into(), |ConnectInfo(addr)| addr.ip().to_string())
}

fn reject(decision: &Decision, window: StdDuration) -> Response {
	let retry_after = ceil_secs(decision.retry_after.unwrap_or(window)).max(1);
	let body = RateLimitBody {
		detail: "Rate limit exceeded. Try again later.".into(),
		limit: decision.limit,
		period_seconds: ceil_secs(window),
	};
	let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
	let headers = response.headers_mut();

	headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
	insert_quota_headers(headers, decision);

	response
}

fn insert_quota_headers(headers: &mut HeaderMap, decision: &Decision) {
	let quota = [
		(LIMIT_HEADER, u64::from(decision.limit)),
		(REMAINING_HEADER, u64::from(decision.remaining)),
		(RESET_HEADER, ceil_secs(decision.reset_after)),
	];

	for (name, value) in quota {
		headers.insert(HeaderName::from_static(name), HeaderValue::from(value));
	}
}

fn ceil_secs(duration: StdDuration) -> u64 {
	duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}
