#![allow(dead_code)]

// std
use std::{
	collections::VecDeque,
	sync::{
		Arc,
		atomic::{AtomicU32, Ordering},
	},
	time::Duration,
};
// crates.io
use parking_lot::Mutex;
// self
use api_resilience::{
	Client,
	auth::{TokenGrant, TokenSecret},
	config::{BackoffConfig, ClientConfig},
	error::{Error, TransportError},
	http::{HttpRequest, HttpResponse, HttpTransport, Method, TransportFuture},
	store::{RefreshFuture, TokenRefresher},
};

pub const BASE_URL: &str = "http://api.test";
pub const LOGIN_PATH: &str = "/api/v1/auth/login";
pub const REFRESH_PATH: &str = "/api/v1/auth/refresh";

/// One scripted transport outcome.
pub enum Step {
	Respond(HttpResponse),
	Fail(TransportError),
	Stall(Duration, HttpResponse),
}

/// Transport that replays a fixed script and records every request it receives.
#[derive(Default)]
pub struct ScriptedTransport {
	script: Mutex<VecDeque<Step>>,
	requests: Mutex<Vec<HttpRequest>>,
}
impl ScriptedTransport {
	pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
		let script = Mutex::new(steps.into_iter().collect());

		Arc::new(Self { script, requests: Mutex::default() })
	}

	pub fn requests(&self) -> Vec<HttpRequest> {
		self.requests.lock().clone()
	}

	pub fn count(&self, method: Method, path: &str) -> usize {
		self.requests.lock().iter().filter(|r| r.method == method && r.url.path() == path).count()
	}
}
impl HttpTransport for ScriptedTransport {
	fn send(&self, request: HttpRequest) -> TransportFuture<'_> {
		self.requests.lock().push(request);

		let step = self.script.lock().pop_front();

		Box::pin(async move {
			match step {
				Some(Step::Respond(response)) => Ok(response),
				Some(Step::Fail(err)) => Err(err),
				Some(Step::Stall(delay, response)) => {
					tokio::time::sleep(delay).await;

					Ok(response)
				},
				None => Ok(HttpResponse::new(500, "script exhausted")),
			}
		})
	}
}

/// Refresher that counts calls and optionally stalls or fails.
pub struct CountingRefresher {
	pub calls: AtomicU32,
	pub stall: Duration,
	pub fail: bool,
}
impl CountingRefresher {
	pub fn new(stall: Duration, fail: bool) -> Arc<Self> {
		Arc::new(Self { calls: AtomicU32::new(0), stall, fail })
	}

	pub fn calls(&self) -> u32 {
		self.calls.load(Ordering::SeqCst)
	}
}
impl TokenRefresher for CountingRefresher {
	fn refresh<'a>(&'a self, _: &'a TokenSecret) -> RefreshFuture<'a> {
		Box::pin(async move {
			let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

			tokio::time::sleep(self.stall).await;

			if self.fail {
				let body = "invalid refresh token".into();

				return Err(Error::Http { status: 401, attempts: 1, body });
			}

			Ok(TokenGrant {
				access_token: format!("access-{call}"),
				refresh_token: Some(format!("refresh-{call}")),
				token_type: Some("bearer".into()),
				expires_in: Some(3_600),
			})
		})
	}
}

pub fn respond(status: u16, body: &str) -> Step {
	Step::Respond(HttpResponse::new(status, body).with_header("content-type", "application/json"))
}

pub fn grant_body(access: &str, refresh: &str, expires_in: i64) -> String {
	serde_json::json!({
		"access_token": access,
		"refresh_token": refresh,
		"token_type": "bearer",
		"expires_in": expires_in,
	})
	.to_string()
}

/// Configuration with a jitter-free, fast backoff schedule.
pub fn fast_config(base_url: &str, max_retries: u32) -> ClientConfig {
	ClientConfig::parse(base_url)
		.expect("Base URL fixture should parse.")
		.with_max_retries(max_retries)
		.with_backoff(BackoffConfig::fixed(Duration::from_millis(10), Duration::from_millis(50)))
}

pub fn scripted_client(
	config: ClientConfig,
	steps: impl IntoIterator<Item = Step>,
) -> (Arc<ScriptedTransport>, Client<ScriptedTransport>) {
	let transport = ScriptedTransport::new(steps);
	let client = Client::with_transport(config, transport.clone())
		.expect("Client fixture should build successfully.");

	(transport, client)
}
