//! Bearer and refresh token material that never reaches logs.

// self
use crate::_prelude::*;

const REDACTED: &str = "<redacted>";

/// Token string whose `Debug` and `Display` output is redacted.
///
/// Read the raw value only through [`TokenSecret::expose`] or [`TokenSecret::bearer`], and
/// only to put it on the wire.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenSecret(String);
impl TokenSecret {
	/// Wraps a token string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Raw token value.
	pub fn expose(&self) -> &str {
		&self.0
	}

	/// `Authorization` header value for this token.
	pub fn bearer(&self) -> String {
		format!("Bearer {}", self.0)
	}

	/// Compares two tokens without short-circuiting on the first differing byte.
	pub fn matches(&self, other: &TokenSecret) -> bool {
		let (lhs, rhs) = (self.0.as_bytes(), other.0.as_bytes());

		lhs.len() == rhs.len() && lhs.iter().zip(rhs).fold(0, |acc, (a, b)| acc | (a ^ b)) == 0
	}
}
impl From<String> for TokenSecret {
	fn from(value: String) -> Self {
		Self(value)
	}
}
impl From<&str> for TokenSecret {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "TokenSecret({REDACTED})")
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(REDACTED)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn formatting_never_leaks_the_value() {
		let secret = TokenSecret::from("super-secret");

		assert_eq!(format!("{secret:?}"), "TokenSecret(<redacted>)");
		assert_eq!(format!("{secret}"), "<redacted>");
		assert_eq!(secret.bearer(), "Bearer super-secret");
		assert_eq!(serde_json::to_string(&secret).ok().as_deref(), Some("\"super-secret\""));
	}

	#[test]
	fn matching_compares_the_full_value() {
		let secret = TokenSecret::new("access-1");

		assert!(secret.matches(&TokenSecret::new("access-1")));
		assert!(!secret.matches(&TokenSecret::new("access-10")));
		assert!(!secret.matches(&TokenSecret::new("access-2")));
	}
}
