//! Serves a tiny API behind the per-client rate limiter. Try it with
//! `curl -i http://127.0.0.1:3000/api/v1/health` a few times in a row.

// std
use std::{net::SocketAddr, sync::Arc, time::Duration};
// crates.io
use axum::{Router, routing::get};
use color_eyre::Result;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
// self
use api_resilience::{
	config::RateLimitConfig,
	limiter::{RateLimiter, WindowStrategy, middleware},
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
		)
		.init();

	let limiter = Arc::new(RateLimiter::new(
		RateLimitConfig::new(5, Duration::from_secs(60)).with_strategy(WindowStrategy::SlidingLog),
	)?);
	let app = middleware::rate_limited(
		Router::new()
			.route("/api/v1/health", get(|| async { "ok" }))
			.route("/api/v1/items", get(|| async { "[]" })),
		limiter,
	);
	let listener = TcpListener::bind("127.0.0.1:3000").await?;

	println!("Listening on http://{}.", listener.local_addr()?);

	axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

	Ok(())
}
