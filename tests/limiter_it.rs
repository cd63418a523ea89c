// std
use std::{
	sync::{
		Arc, Barrier,
		atomic::{AtomicU32, Ordering},
	},
	thread,
	time::{Duration, Instant},
};
// self
use api_resilience::{
	config::RateLimitConfig,
	error::{ConfigError, Error},
	limiter::{RateLimiter, WindowStrategy},
};

const WINDOW: Duration = Duration::from_secs(60);

fn limiter(limit: u32, strategy: WindowStrategy) -> Arc<RateLimiter> {
	Arc::new(
		RateLimiter::new(RateLimitConfig::new(limit, WINDOW).with_strategy(strategy))
			.expect("Limiter configuration should be valid."),
	)
}

#[test]
fn concurrent_admissions_never_exceed_the_limit() {
	const THREADS: usize = 32;
	const PER_THREAD: usize = 8;
	const LIMIT: u32 = 50;

	for strategy in [WindowStrategy::Fixed, WindowStrategy::SlidingLog] {
		let limiter = limiter(LIMIT, strategy);
		let admitted = Arc::new(AtomicU32::new(0));
		let barrier = Arc::new(Barrier::new(THREADS));
		let now = Instant::now();
		let workers: Vec<_> = (0..THREADS)
			.map(|_| {
				let limiter = limiter.clone();
				let admitted = admitted.clone();
				let barrier = barrier.clone();

				thread::spawn(move || {
					barrier.wait();

					for _ in 0..PER_THREAD {
						if limiter.admit("shared-client", now).allowed {
							admitted.fetch_add(1, Ordering::SeqCst);
						}
					}
				})
			})
			.collect();

		for worker in workers {
			worker.join().expect("Admission worker should not panic.");
		}

		assert_eq!(admitted.load(Ordering::SeqCst), LIMIT, "{strategy:?}");
		assert_eq!(limiter.rejected_count(), (THREADS * PER_THREAD) as u64 - u64::from(LIMIT));
		assert_eq!(
			limiter.window_at("shared-client", now).map(|window| window.count),
			Some(LIMIT)
		);
	}
}

#[test]
fn third_request_in_a_minute_waits_58_seconds() {
	for strategy in [WindowStrategy::Fixed, WindowStrategy::SlidingLog] {
		let limiter = limiter(2, strategy);
		let t0 = Instant::now();
		let decisions: Vec<_> = [0, 1, 2]
			.into_iter()
			.map(|second| limiter.admit("203.0.113.9", t0 + Duration::from_secs(second)))
			.collect();

		assert!(decisions[0].allowed);
		assert!(decisions[1].allowed);
		assert!(!decisions[2].allowed);
		assert_eq!(decisions[2].retry_after, Some(Duration::from_secs(58)), "{strategy:?}");
		assert_eq!(decisions[2].remaining, 0);
		assert_eq!(decisions[2].limit, 2);
	}
}

#[test]
fn denials_surface_as_crate_errors() {
	let limiter = limiter(0, WindowStrategy::SlidingLog);
	let err: Error = limiter.check("blocked").expect_err("A zero limit denies everything.").into();

	assert!(matches!(err, Error::RateLimited(ref denied) if denied.retry_after == WINDOW));
	assert_eq!(limiter.rejected_count(), 1);
}

#[test]
fn idle_sweeps_never_reset_a_live_window() {
	for strategy in [WindowStrategy::Fixed, WindowStrategy::SlidingLog] {
		let limiter = RateLimiter::new(
			RateLimitConfig::new(2, WINDOW).with_strategy(strategy).with_idle_ttl(WINDOW),
		)
		.expect("Limiter configuration should be valid.");
		let t0 = Instant::now();
		let admitted = [0, 1, 2, 20, 40]
			.into_iter()
			.map(|second| limiter.admit("198.51.100.7", t0 + Duration::from_secs(second)))
			.filter(|decision| decision.allowed)
			.count();

		assert_eq!(admitted, 2, "{strategy:?}");
		assert_eq!(limiter.evict_idle(t0 + Duration::from_secs(59)), 0);
		assert_eq!(
			limiter.window_at("198.51.100.7", t0 + Duration::from_secs(59)).map(|w| w.count),
			Some(2)
		);
	}
}

#[test]
fn idle_ttls_shorter_than_the_window_are_refused() {
	for ttl in [Duration::ZERO, Duration::from_secs(10)] {
		let err = RateLimiter::new(RateLimitConfig::new(1, WINDOW).with_idle_ttl(ttl))
			.expect_err("An idle TTL shorter than the window must be refused.");

		assert!(matches!(err, ConfigError::OutOfRange { option: "rate_limit.idle_ttl_ms", .. }));
	}
}
