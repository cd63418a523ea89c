//! Session token store with single-flight refresh.
//!
//! The store holds at most one [`TokenState`]. Readers take cheap snapshots through
//! [`TokenStore::current`] and never wait on a refresh. Rotation goes through one async gate:
//! every write bumps the session epoch, so a caller that observed epoch `n`, queued on the gate,
//! and finds the epoch moved on knows another caller already rotated (or ended) the session and
//! reuses that outcome instead of issuing a second refresh call.

mod metrics;

pub use self::metrics::RefreshCounts;

// self
use self::metrics::{RefreshEvent, RefreshMetrics};
use crate::{
	_prelude::*,
	auth::{TokenGrant, TokenSecret, TokenState},
	error::ResponseError,
	obs::{OpKind, OpSpan, event},
};

/// Boxed future returned by [`TokenRefresher::refresh`].
pub type RefreshFuture<'a> = Pin<Box<dyn Future<Output = Result<TokenGrant>> + 'a + Send>>;

/// Exchanges a refresh token for a new grant.
pub trait TokenRefresher
where
	Self: 'static + Send + Sync,
{
	/// Performs exactly one refresh call.
	fn refresh<'a>(&'a self, refresh_token: &'a TokenSecret) -> RefreshFuture<'a>;
}

#[derive(Debug, Default)]
struct Session {
	token: Option<TokenState>,
	epoch: u64,
}

/// Outcome of the most recent failed refresh, shared with callers that queued behind it.
#[derive(Debug, Default)]
struct RefreshLedger {
	failure: Option<(u64, String)>,
}

/// Owner of the client's session tokens.
pub struct TokenStore {
	session: RwLock<Session>,
	gate: AsyncMutex<RefreshLedger>,
	refresher: Arc<dyn TokenRefresher>,
	metrics: RefreshMetrics,
}
impl TokenStore {
	/// Creates an empty store that refreshes through `refresher`.
	pub fn new(refresher: Arc<dyn TokenRefresher>) -> Self {
		Self {
			session: RwLock::default(),
			gate: AsyncMutex::new(RefreshLedger::default()),
			refresher,
			metrics: RefreshMetrics::default(),
		}
	}

	/// Returns a snapshot of the current token state.
	pub fn current(&self) -> Option<TokenState> {
		self.session.read().token.clone()
	}

	/// Returns a snapshot of the refresh counters.
	pub fn refresh_metrics(&self) -> RefreshCounts {
		self.metrics.snapshot()
	}

	/// Replaces the session with freshly issued credentials.
	pub fn set_from_login(
		&self,
		access_token: impl Into<TokenSecret>,
		refresh_token: Option<TokenSecret>,
		ttl: Duration,
	) -> Result<TokenState, ResponseError> {
		let state = TokenState::new(access_token, refresh_token, ttl, OffsetDateTime::now_utc())?;

		self.replace(Some(state.clone()));

		Ok(state)
	}

	/// Replaces the session with a decoded token-endpoint grant.
	pub fn set_from_grant(&self, grant: TokenGrant) -> Result<TokenState, ResponseError> {
		let state = TokenState::from_grant(grant, OffsetDateTime::now_utc())?;

		self.replace(Some(state.clone()));

		Ok(state)
	}

	/// Drops the session (logout).
	pub fn clear(&self) {
		self.replace(None);
	}

	/// Refreshes the session if the access token expires within `skew` from now.
	///
	/// Returns `true` when the session was rotated, either by this call or by a concurrent one
	/// it waited for.
	pub async fn refresh_if_needed(&self, skew: StdDuration) -> Result<bool> {
		self.refresh_if_needed_at(skew, OffsetDateTime::now_utc()).await
	}

	/// [`TokenStore::refresh_if_needed`] evaluated at an explicit instant.
	pub async fn refresh_if_needed_at(
		&self,
		skew: StdDuration,
		now: OffsetDateTime,
	) -> Result<bool> {
		let epoch = {
			let session = self.session.read();
			let token = session.token.as_ref().ok_or_else(no_session)?;

			if !token.needs_refresh(skew, now) {
				return Ok(false);
			}

			session.epoch
		};

		self.rotate(epoch).await?;

		Ok(true)
	}

	/// Refreshes after the service rejected `rejected`, unless it was already rotated.
	pub async fn force_refresh(&self, rejected: &TokenSecret) -> Result<()> {
		let epoch = {
			let session = self.session.read();
			let token = session.token.as_ref().ok_or_else(no_session)?;

			if !token.access_token.matches(rejected) {
				self.metrics.record(RefreshEvent::Joined);

				return Ok(());
			}

			session.epoch
		};

		self.rotate(epoch).await
	}

	/// Rotates the session observed at `observed`, or joins the rotation that superseded it.
	async fn rotate(&self, observed: u64) -> Result<()> {
		let mut ledger = self.gate.lock().await;
		let (epoch, refresh_token) = {
			let session = self.session.read();

			(session.epoch, session.token.as_ref().map(|token| token.refresh_token.clone()))
		};

		if epoch != observed {
			self.metrics.record(RefreshEvent::Joined);
			event!(debug, observed, epoch, "Joined a refresh completed by another caller.");

			return match (refresh_token, &ledger.failure) {
				(Some(_), _) => Ok(()),
				(None, Some((failed_at, reason))) if *failed_at == epoch =>
					Err(Error::auth_expired(reason.clone())),
				(None, _) => Err(no_session()),
			};
		}

		let refresh_token = match refresh_token {
			Some(Some(secret)) => secret,
			Some(None) =>
				return Err(self.fail(&mut ledger, observed, "no refresh token is available", None)),
			None => return Err(no_session()),
		};
		self.metrics.record(RefreshEvent::Issued);

		let state = OpSpan::new(OpKind::Refresh, "rotate")
			.observe(async {
				let grant = self.refresher.refresh(&refresh_token).await?;
				let mut state = TokenState::from_grant(grant, OffsetDateTime::now_utc())?;

				if state.refresh_token.is_none() {
					state.refresh_token = Some(refresh_token.clone());
				}

				Ok::<_, Error>(state)
			})
			.await;

		match state {
			Ok(state) => {
				let mut session = self.session.write();

				if session.epoch == observed {
					session.token = Some(state);
					session.epoch += 1;
				}

				drop(session);
				self.metrics.record(RefreshEvent::Rotated);
				event!(debug, "Session tokens rotated.");

				Ok(())
			},
			Err(err) => {
				let reason = format!("token refresh failed: {err}");

				Err(self.fail(&mut ledger, observed, reason, err.status()))
			},
		}
	}

	/// Ends the session observed at `observed` and shares the failure with queued callers.
	fn fail(
		&self,
		ledger: &mut RefreshLedger,
		observed: u64,
		reason: impl Into<String>,
		status: Option<u16>,
	) -> Error {
		let reason = reason.into();
		let mut session = self.session.write();

		if session.epoch == observed {
			session.token = None;
			session.epoch += 1;
			ledger.failure = Some((session.epoch, reason.clone()));
		}

		drop(session);
		self.metrics.record(RefreshEvent::Ended);
		event!(warn, %reason, "Session ended; a new login is required.");

		Error::AuthExpired { reason, status, attempts: 0 }
	}

	fn replace(&self, token: Option<TokenState>) {
		let mut session = self.session.write();

		session.token = token;
		session.epoch += 1;
	}
}
impl Debug for TokenStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let session = self.session.read();

		f.debug_struct("TokenStore")
			.field("token", &session.token)
			.field("epoch", &session.epoch)
			.field("refresh", &self.metrics.snapshot())
			.finish()
	}
}

fn no_session() -> Error {
	Error::auth_expired("no active session")
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicU32, Ordering};
	// self
	use super::*;

	#[derive(Default)]
	struct CountingRefresher {
		calls: AtomicU32,
		fail: bool,
	}
	impl TokenRefresher for CountingRefresher {
		fn refresh<'a>(&'a self, refresh_token: &'a TokenSecret) -> RefreshFuture<'a> {
			Box::pin(async move {
				let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

				if self.fail {
					return Err(Error::Http { status: 401, attempts: 1, body: String::new() });
				}

				assert_eq!(refresh_token.expose(), "refresh-0");

				Ok(TokenGrant {
					access_token: format!("access-{call}"),
					refresh_token: None,
					token_type: None,
					expires_in: Some(3_600),
				})
			})
		}
	}

	fn store(fail: bool) -> (Arc<CountingRefresher>, TokenStore) {
		let refresher = Arc::new(CountingRefresher { calls: AtomicU32::new(0), fail });

		(refresher.clone(), TokenStore::new(refresher))
	}

	#[tokio::test]
	async fn fresh_tokens_are_not_refreshed() {
		let (refresher, store) = store(false);

		store
			.set_from_login("access-0", Some("refresh-0".into()), Duration::hours(1))
			.expect("Login state should be accepted.");

		let rotated = store
			.refresh_if_needed(StdDuration::from_secs(60))
			.await
			.expect("Fresh session should not fail.");

		assert!(!rotated);
		assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn refresh_keeps_previous_refresh_token() {
		let (refresher, store) = store(false);

		store
			.set_from_login("access-0", Some("refresh-0".into()), Duration::seconds(30))
			.expect("Login state should be accepted.");

		let rotated = store
			.refresh_if_needed(StdDuration::from_secs(60))
			.await
			.expect("Refresh should succeed.");
		let state = store.current().expect("Session should survive a refresh.");

		assert!(rotated);
		assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
		assert_eq!(state.access_token.expose(), "access-1");
		assert_eq!(state.refresh_token.as_ref().map(TokenSecret::expose), Some("refresh-0"));
		assert_eq!(store.refresh_metrics().successes, 1);
	}

	#[tokio::test]
	async fn stale_rejections_reuse_the_rotated_token() {
		let (refresher, store) = store(false);

		store
			.set_from_login("access-0", Some("refresh-0".into()), Duration::hours(1))
			.expect("Login state should be accepted.");
		store.force_refresh(&"access-0".into()).await.expect("First forced refresh should pass.");
		store.force_refresh(&"access-0".into()).await.expect("Stale rejection should be absorbed.");

		assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
		assert_eq!(store.refresh_metrics().coalesced, 1);
	}

	#[tokio::test]
	async fn failed_refresh_clears_the_session() {
		let (_, store) = store(true);

		store
			.set_from_login("access-0", Some("refresh-0".into()), Duration::seconds(1))
			.expect("Login state should be accepted.");

		let err = store
			.refresh_if_needed(StdDuration::from_secs(60))
			.await
			.expect_err("Rejected refresh should end the session.");

		assert!(matches!(err, Error::AuthExpired { status: Some(401), .. }));
		assert!(store.current().is_none());
		assert_eq!(store.refresh_metrics().failures, 1);
	}

	#[tokio::test]
	async fn missing_session_or_refresh_token_is_auth_expired() {
		let (refresher, store) = store(false);

		assert!(matches!(
			store.refresh_if_needed(StdDuration::ZERO).await,
			Err(Error::AuthExpired { .. })
		));

		store
			.set_from_login("access-0", None, Duration::seconds(1))
			.expect("Login state should be accepted.");

		assert!(matches!(
			store.refresh_if_needed(StdDuration::from_secs(60)).await,
			Err(Error::AuthExpired { .. })
		));
		assert!(store.current().is_none());
		assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
	}
}
