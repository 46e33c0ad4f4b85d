//! E2E-6 of `spec.md` §8: a controller whose `tcpSlaveAgentListener/` probe
//! keeps returning `404` never becomes ready, and `wait_for_ready` bails
//! out once its retry deadline is exhausted rather than looping forever.

use std::time::Duration;

use remoting_agent::endpoint::{EndpointResolver, EndpointResolverConfig};
use remoting_agent::retry::RetryConfig;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn wait_for_ready_times_out_on_persistent_404() {
	let mock = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/tcpSlaveAgentListener/"))
		.respond_with(ResponseTemplate::new(404))
		.mount(&mock)
		.await;

	let resolver = EndpointResolver::new(EndpointResolverConfig::default(), None).unwrap();
	let retry_cfg = RetryConfig {
		deadline: Duration::from_millis(800),
		factor: 2.0,
		increment: Duration::from_millis(100),
		max_delay: Duration::from_millis(200),
		cancel: CancellationToken::new(),
	};

	let url = mock.uri().parse().unwrap();
	let result = resolver.wait_for_ready(&url, &retry_cfg).await;
	assert!(result.is_err(), "persistent 404 must never resolve as ready");
}

#[tokio::test]
async fn wait_for_ready_succeeds_once_the_probe_turns_200() {
	let mock = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/tcpSlaveAgentListener/"))
		.respond_with(ResponseTemplate::new(200))
		.mount(&mock)
		.await;

	let resolver = EndpointResolver::new(EndpointResolverConfig::default(), None).unwrap();
	let retry_cfg = RetryConfig::with_deadline(Duration::from_secs(5));

	let url = mock.uri().parse().unwrap();
	assert!(resolver.wait_for_ready(&url, &retry_cfg).await.is_ok());
}
