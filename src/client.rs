//! Client facade: login, logout, and authenticated CRUD calls over the resilient executor.
//!
//! A [`Client`] owns one [`TokenStore`] and one [`MetricsRecorder`]. It is `Send + Sync`; share
//! it through an [`Arc`] when several tasks issue requests.

// self
#[cfg(feature = "reqwest")] use crate::http::ReqwestTransport;
use crate::{
	_prelude::*,
	auth::{TokenGrant, TokenSecret, TokenState},
	config::ClientConfig,
	error::{ResponseError, TransportError},
	executor::{self, ApiResponse, Executor, RequestSpec},
	http::{HttpRequest, HttpResponse, HttpTransport, Method, RequestBody},
	obs::{OpKind, OpSpan, event},
	recorder::{MetricsRecorder, MetricsSummary},
	store::{RefreshFuture, TokenRefresher, TokenStore},
};

/// Client specialized for the crate's default reqwest transport.
#[cfg(feature = "reqwest")]
pub type ReqwestApiClient = Client<ReqwestTransport>;

/// Authenticated API client with retries, single-flight refresh, and attempt metrics.
pub struct Client<T>
where
	T: ?Sized + HttpTransport,
{
	config: ClientConfig,
	executor: Executor<T>,
}
impl<T> Client<T>
where
	T: ?Sized + HttpTransport,
{
	/// Creates a client that reuses the caller-provided transport.
	pub fn with_transport(config: ClientConfig, transport: impl Into<Arc<T>>) -> Result<Self> {
		config.validate()?;

		let transport = transport.into();
		let refresher = EndpointRefresher {
			transport: transport.clone(),
			url: executor::join_url(&config.base_url, &config.auth.refresh_path, &[])?,
			timeout: config.request_timeout(),
		};
		let tokens = Arc::new(TokenStore::new(Arc::new(refresher)));
		let recorder = Arc::new(MetricsRecorder::new(&config.metrics));
		let executor = Executor::new(&config, transport, tokens, recorder);

		Ok(Self { config, executor })
	}

	/// Active configuration.
	pub fn config(&self) -> &ClientConfig {
		&self.config
	}

	/// Exchanges username and password for a session.
	///
	/// The login endpoint receives a single form-encoded POST; its grant seeds the token store.
	pub async fn login(&self, username: &str, password: &str) -> Result<TokenState> {
		OpSpan::new(OpKind::Login, "login")
			.observe(async move {
				let spec = RequestSpec::new(Method::Post, self.config.auth.login_path.as_str())
					.without_auth()
					.with_max_retries(0)
					.with_body(RequestBody::form([("username", username), ("password", password)]));
				let grant = self.executor.execute(spec).await?.json::<TokenGrant>()?;
				let state = self.executor.tokens().set_from_grant(grant)?;

				event!(info, expires_at = %state.expires_at, "Logged in.");

				Ok(state)
			})
			.await
	}

	/// Creates an account; sent once, without credentials.
	pub async fn register<B>(&self, payload: &B) -> Result<ApiResponse>
	where
		B: ?Sized + Serialize,
	{
		let spec = RequestSpec::new(Method::Post, self.config.auth.register_path.as_str())
			.without_auth()
			.with_max_retries(0)
			.with_json(payload)?;

		self.executor.execute(spec).await
	}

	/// Drops the session.
	pub fn logout(&self) {
		self.executor.tokens().clear();
		event!(info, "Logged out.");
	}

	/// Authenticated `GET`.
	pub async fn get(&self, path: &str) -> Result<ApiResponse> {
		self.send(RequestSpec::new(Method::Get, path)).await
	}

	/// Authenticated `GET` with query parameters.
	pub async fn get_with_query(&self, path: &str, query: &[(&str, &str)]) -> Result<ApiResponse> {
		let spec = query
			.iter()
			.fold(RequestSpec::new(Method::Get, path), |spec, (key, value)| {
				spec.with_query(*key, *value)
			});

		self.send(spec).await
	}

	/// Authenticated `POST` with a JSON body.
	pub async fn post<B>(&self, path: &str, payload: &B) -> Result<ApiResponse>
	where
		B: ?Sized + Serialize,
	{
		self.send(RequestSpec::new(Method::Post, path).with_json(payload)?).await
	}

	/// Authenticated `PUT` with a JSON body.
	pub async fn put<B>(&self, path: &str, payload: &B) -> Result<ApiResponse>
	where
		B: ?Sized + Serialize,
	{
		self.send(RequestSpec::new(Method::Put, path).with_json(payload)?).await
	}

	/// Authenticated `PATCH` with a JSON body.
	pub async fn patch<B>(&self, path: &str, payload: &B) -> Result<ApiResponse>
	where
		B: ?Sized + Serialize,
	{
		self.send(RequestSpec::new(Method::Patch, path).with_json(payload)?).await
	}

	/// Authenticated `DELETE`.
	pub async fn delete(&self, path: &str) -> Result<ApiResponse> {
		self.send(RequestSpec::new(Method::Delete, path)).await
	}

	/// Executes a fully specified request.
	pub async fn send(&self, spec: RequestSpec) -> Result<ApiResponse> {
		self.executor.execute(spec).await
	}

	/// Snapshot of the current session tokens.
	pub fn token(&self) -> Option<TokenState> {
		self.executor.tokens().current()
	}

	/// Session token store.
	pub fn tokens(&self) -> &Arc<TokenStore> {
		self.executor.tokens()
	}

	/// Aggregates of every attempt made so far.
	pub fn metrics_summary(&self) -> MetricsSummary {
		self.executor.recorder().summary()
	}

	/// Attempt recorder.
	pub fn recorder(&self) -> &Arc<MetricsRecorder> {
		self.executor.recorder()
	}
}
#[cfg(feature = "reqwest")]
impl Client<ReqwestTransport> {
	/// Creates a client backed by a reqwest transport bounded by the configured timeout.
	pub fn new(config: ClientConfig) -> Result<Self> {
		let client = ReqwestClient::builder()
			.timeout(config.request_timeout())
			.build()
			.map_err(crate::error::ConfigError::from)?;

		Self::with_transport(config, ReqwestTransport::with_client(client))
	}
}
impl<T> Debug for Client<T>
where
	T: ?Sized + HttpTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Client")
			.field("base_url", &self.config.base_url.as_str())
			.field("session", &self.token().is_some())
			.field("executor", &self.executor)
			.finish()
	}
}

/// Refreshes sessions with one POST carrying the refresh token as the `refresh_token` query
/// parameter.
pub struct EndpointRefresher<T>
where
	T: ?Sized + HttpTransport,
{
	transport: Arc<T>,
	url: Url,
	timeout: StdDuration,
}
impl<T> TokenRefresher for EndpointRefresher<T>
where
	T: ?Sized + HttpTransport,
{
	fn refresh<'a>(&'a self, refresh_token: &'a TokenSecret) -> RefreshFuture<'a> {
		Box::pin(async move {
			let mut url = self.url.clone();

			url.query_pairs_mut().append_pair("refresh_token", refresh_token.expose());

			let request = HttpRequest {
				method: Method::Post,
				url,
				headers: vec![("accept".into(), "application/json".into())],
				body: None,
				timeout: self.timeout,
			};
			let response =
				match tokio::time::timeout(self.timeout, self.transport.send(request)).await {
					Ok(Ok(response)) => response,
					Ok(Err(source)) => return Err(Error::Network { attempts: 1, source }),
					Err(_) =>
						return Err(Error::Network {
							attempts: 1,
							source: TransportError::Timeout { elapsed: self.timeout },
						}),
				};

			if !response.is_success() {
				return Err(Error::Http {
					status: response.status,
					attempts: 1,
					body: response.body_preview(256),
				});
			}

			decode_grant(&response)
		})
	}
}

fn decode_grant(response: &HttpResponse) -> Result<TokenGrant> {
	let de = &mut serde_json::Deserializer::from_slice(&response.body);

	serde_path_to_error::deserialize(de)
		.map_err(|source| ResponseError::Parse { source, status: response.status }.into())
}
