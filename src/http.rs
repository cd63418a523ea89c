//! Transport primitives for outbound API calls.
//!
//! [`HttpTransport`] is the crate's only dependency on an HTTP stack. The executor hands it a
//! fully-resolved [`HttpRequest`] (absolute URL, headers, encoded body, per-attempt timeout)
//! and expects either an [`HttpResponse`] for any status code or a [`TransportError`] for
//! connection-level failures. Status classification, retries, and token handling all happen
//! above this seam, so fakes only need to script responses.

// crates.io
#[cfg(feature = "reqwest")] use time::format_description::well_known::Rfc2822;
// self
use crate::{_prelude::*, error::TransportError};

/// Boxed future returned by [`HttpTransport::send`].
pub type TransportFuture<'a> =
	Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + 'a + Send>>;

/// Abstraction over HTTP stacks capable of executing a single request attempt.
///
/// Implementations must be `Send + Sync + 'static` so one transport can be shared by every
/// request issued through a [`crate::Client`], and the returned future must be `Send` so
/// callers can spawn requests on multi-threaded runtimes.
pub trait HttpTransport
where
	Self: 'static + Send + Sync,
{
	/// Executes one attempt. Any HTTP status is a successful transport outcome.
	fn send(&self, request: HttpRequest) -> TransportFuture<'_>;
}

/// HTTP methods issued by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
	/// `GET`
	Get,
	/// `POST`
	Post,
	/// `PUT`
	Put,
	/// `PATCH`
	Patch,
	/// `DELETE`
	Delete,
}
impl Method {
	/// Returns the canonical method token.
	pub const fn as_str(self) -> &'static str {
		match self {
			Method::Get => "GET",
			Method::Post => "POST",
			Method::Put => "PUT",
			Method::Patch => "PATCH",
			Method::Delete => "DELETE",
		}
	}
}
impl Display for Method {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Encoded request body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestBody {
	/// `application/json` payload.
	Json(Vec<u8>),
	/// `application/x-www-form-urlencoded` payload.
	Form(Vec<u8>),
}
impl RequestBody {
	/// Serializes `value` as JSON.
	pub fn json<T>(value: &T) -> Result<Self, serde_json::Error>
	where
		T: ?Sized + Serialize,
	{
		serde_json::to_vec(value).map(Self::Json)
	}

	/// Encodes key/value pairs as a URL-encoded form.
	pub fn form<'a, I>(pairs: I) -> Self
	where
		I: IntoIterator<Item = (&'a str, &'a str)>,
	{
		let mut serializer = url::form_urlencoded::Serializer::new(String::new());

		for (key, value) in pairs {
			serializer.append_pair(key, value);
		}

		Self::Form(serializer.finish().into_bytes())
	}

	/// Content type matching the encoding.
	pub const fn content_type(&self) -> &'static str {
		match self {
			Self::Json(_) => "application/json",
			Self::Form(_) => "application/x-www-form-urlencoded",
		}
	}

	/// Raw encoded bytes.
	pub fn bytes(&self) -> &[u8] {
		match self {
			Self::Json(bytes) | Self::Form(bytes) => bytes,
		}
	}
}

/// A single, fully-resolved request attempt.
#[derive(Clone, Debug)]
pub struct HttpRequest {
	/// Method to issue.
	pub method: Method,
	/// Absolute target URL.
	pub url: Url,
	/// Header pairs; names are sent as given.
	pub headers: Vec<(String, String)>,
	/// Optional encoded body.
	pub body: Option<RequestBody>,
	/// Upper bound for this attempt.
	pub timeout: StdDuration,
}
impl HttpRequest {
	/// Returns the first header value matching `name`, case-insensitively.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(key, _)| key.eq_ignore_ascii_case(name))
			.map(|(_, value)| value.as_str())
	}
}

/// Response captured from one attempt.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HttpResponse {
	/// HTTP status code.
	pub status: u16,
	/// Headers keyed by lowercase name.
	pub headers: BTreeMap<String, String>,
	/// Raw body bytes.
	pub body: Vec<u8>,
}
impl HttpResponse {
	/// Creates a response with the given status and body.
	pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
		Self { status, headers: BTreeMap::new(), body: body.into() }
	}

	/// Adds a header (name is normalized to lowercase).
	pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
		self.headers.insert(name.to_ascii_lowercase(), value.into());

		self
	}

	/// Returns `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Returns the header value for `name`, case-insensitively.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
	}

	/// Retry-After hint expressed in whole seconds, if present and numeric.
	pub fn retry_after(&self) -> Option<StdDuration> {
		self.header("retry-after")?.trim().parse::<u64>().ok().map(StdDuration::from_secs)
	}

	/// Lossy UTF-8 preview of the body, truncated to `limit` characters.
	pub fn body_preview(&self, limit: usize) -> String {
		String::from_utf8_lossy(&self.body).chars().take(limit).collect()
	}
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
#[cfg(feature = "reqwest")]
#[derive(Clone, Default)]
pub struct ReqwestTransport(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestTransport {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestTransport {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl HttpTransport for ReqwestTransport {
	fn send(&self, request: HttpRequest) -> TransportFuture<'_> {
		let client = self.0.clone();

		Box::pin(async move {
			let method = match request.method {
				Method::Get => reqwest::Method::GET,
				Method::Post => reqwest::Method::POST,
				Method::Put => reqwest::Method::PUT,
				Method::Patch => reqwest::Method::PATCH,
				Method::Delete => reqwest::Method::DELETE,
			};
			let mut builder = client.request(method, request.url).timeout(request.timeout);

			for (name, value) in &request.headers {
				builder = builder.header(name.as_str(), value.as_str());
			}
			if let Some(body) = request.body {
				builder = builder.header("content-type", body.content_type());
				builder = match body {
					RequestBody::Json(bytes) | RequestBody::Form(bytes) => builder.body(bytes),
				};
			}

			let response = builder.send().await?;
			let status = response.status().as_u16();
			let mut headers = BTreeMap::new();

			for (name, value) in response.headers() {
				if let Ok(value) = value.to_str() {
					headers.insert(name.as_str().to_ascii_lowercase(), value.to_owned());
				}
			}

			let date_hint = headers.get("retry-after").and_then(|raw| parse_http_date_delta(raw));

			if let Some(delta) = date_hint {
				headers.insert("retry-after".into(), delta.as_secs().to_string());
			}

			let body = response.bytes().await?.to_vec();

			Ok(HttpResponse { status, headers, body })
		})
	}
}

/// Normalizes an HTTP-date `Retry-After` value into a relative duration.
#[cfg(feature = "reqwest")]
fn parse_http_date_delta(raw: &str) -> Option<StdDuration> {
	let raw = raw.trim();

	if raw.parse::<u64>().is_ok() {
		return None;
	}

	let moment = OffsetDateTime::parse(raw, &Rfc2822).ok()?;
	let delta = moment - OffsetDateTime::now_utc();

	if delta.is_positive() { StdDuration::try_from(delta).ok() } else { Some(StdDuration::ZERO) }
}
