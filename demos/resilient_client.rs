//! Logs in against a mock API, rides out a flaky endpoint with retries, and prints the
//! per-attempt metrics summary.

// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
use serde_json::json;
use tracing_subscriber::EnvFilter;
// self
use api_resilience::{Client, config::ClientConfig};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
		)
		.init();

	let server = MockServer::start_async().await;
	let login = server
		.mock_async(|when, then| {
			when.method(POST).path("/api/v1/auth/login");
			then.status(200).json_body(json!({
				"access_token": "demo-access",
				"refresh_token": "demo-refresh",
				"token_type": "bearer",
				"expires_in": 1_800,
			}));
		})
		.await;
	let flaky = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/v1/items").header("authorization", "Bearer demo-access");
			then.status(503).body("warming up");
		})
		.await;
	let client = Client::new(ClientConfig::parse(&server.base_url())?.with_max_retries(2))?;
	let session = client.login("demo", "demo-password").await?;

	println!("Logged in; token expires at {}.", session.expires_at);

	match client.get("/api/v1/items").await {
		Ok(response) => println!("Items: {}.", response.text()),
		Err(e) => println!("Request gave up: {e}."),
	}

	let summary = client.metrics_summary();

	println!(
		"Requests: {}, attempts: {}, success rate: {:.2}, retry rate: {:.2}, p95: {:?}.",
		summary.count, summary.attempts, summary.success_rate, summary.retry_rate, summary.p95
	);

	login.assert_async().await;
	flaky.assert_calls_async(3).await;

	Ok(())
}
