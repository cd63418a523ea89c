//! Token-endpoint grants and the immutable token state derived from them.

// self
use crate::{_prelude::*, auth::TokenSecret, error::ResponseError};

/// Body returned by the login and refresh endpoints.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenGrant {
	/// Newly issued access token.
	pub access_token: String,
	/// Refresh token, when the service issues one.
	#[serde(default)]
	pub refresh_token: Option<String>,
	/// Token type reported by the service (usually `bearer`).
	#[serde(default)]
	pub token_type: Option<String>,
	/// Lifetime of the access token in seconds.
	#[serde(default)]
	pub expires_in: Option<i64>,
}
impl Debug for TokenGrant {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenGrant")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("token_type", &self.token_type)
			.field("expires_in", &self.expires_in)
			.finish()
	}
}

/// Immutable snapshot of the session tokens.
///
/// `expires_at` is always `issued_at` plus the lifetime stated by the service; a grant that
/// does not state one is rejected rather than assigned a guessed expiry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenState {
	/// Access token secret; callers must avoid logging it.
	pub access_token: TokenSecret,
	/// Refresh token secret, if the service issued one.
	pub refresh_token: Option<TokenSecret>,
	/// Token type reported at issuance.
	pub token_type: String,
	/// Instant the grant was received.
	pub issued_at: OffsetDateTime,
	/// Instant the access token stops being valid.
	pub expires_at: OffsetDateTime,
}
impl TokenState {
	const DEFAULT_TOKEN_TYPE: &'static str = "bearer";

	/// Builds a state from explicit values and a server-stated lifetime.
	pub fn new(
		access_token: impl Into<TokenSecret>,
		refresh_token: Option<TokenSecret>,
		ttl: Duration,
		issued_at: OffsetDateTime,
	) -> Result<Self, ResponseError> {
		if !ttl.is_positive() {
			return Err(ResponseError::NonPositiveExpiresIn);
		}

		let expires_at = issued_at.checked_add(ttl).ok_or(ResponseError::ExpiresInOutOfRange)?;

		Ok(Self {
			access_token: access_token.into(),
			refresh_token,
			token_type: Self::DEFAULT_TOKEN_TYPE.into(),
			issued_at,
			expires_at,
		})
	}

	/// Derives a state from a token-endpoint grant received at `issued_at`.
	pub fn from_grant(grant: TokenGrant, issued_at: OffsetDateTime) -> Result<Self, ResponseError> {
		let expires_in = grant.expires_in.ok_or(ResponseError::MissingExpiresIn)?;

		if expires_in <= 0 {
			return Err(ResponseError::NonPositiveExpiresIn);
		}

		let mut state = Self::new(
			grant.access_token,
			grant.refresh_token.map(TokenSecret::new),
			Duration::seconds(expires_in),
			issued_at,
		)?;

		if let Some(token_type) = grant.token_type {
			state.token_type = token_type;
		}

		Ok(state)
	}

	/// Returns `true` if the token expires within `skew` of `instant`.
	pub fn needs_refresh(&self, skew: StdDuration, instant: OffsetDateTime) -> bool {
		match instant.checked_add(Duration::saturating_seconds_f64(skew.as_secs_f64())) {
			Some(horizon) => horizon >= self.expires_at,
			None => true,
		}
	}
}
impl Debug for TokenState {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenState")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("token_type", &self.token_type)
			.field("issued_at", &self.issued_at)
			.field("expires_at", &self.expires_at)
			.finish()
	}
}
