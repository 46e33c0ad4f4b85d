//! Exponential backoff retry harness shared by endpoint resolution and the
//! wait-for-ready probe.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone)]
pub struct RetryConfig {
	pub deadline: Duration,
	pub factor: f64,
	pub increment: Duration,
	pub max_delay: Duration,
	pub cancel: CancellationToken,
}

impl Default for RetryConfig {
	fn default() -> Self {
		RetryConfig {
			deadline: Duration::from_secs(60),
			factor: 2.0,
			increment: Duration::from_secs(1),
			max_delay: Duration::from_secs(10),
			cancel: CancellationToken::new(),
		}
	}
}

impl RetryConfig {
	pub fn with_deadline(deadline: Duration) -> Self {
		RetryConfig {
			deadline,
			..Default::default()
		}
	}
}

/// Repeatedly invokes `supplier` until it succeeds, the deadline elapses, or
/// `cfg.cancel` is triggered. Returns `None` on deadline exhaustion or
/// cancellation, never panics on supplier failure.
pub async fn retry<T, F, Fut>(cfg: &RetryConfig, mut supplier: F, report: impl Fn(&str)) -> Option<T>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = anyhow::Result<T>>,
{
	let start = Instant::now();
	let mut delay = Duration::ZERO;

	loop {
		if cfg.cancel.is_cancelled() {
			return None;
		}

		match supplier().await {
			Ok(v) => return Some(v),
			Err(e) => report(&e.to_string()),
		}

		delay = std::cmp::min(
			cfg.max_delay,
			delay.mul_f64(cfg.factor).saturating_add(cfg.increment),
		);

		if start.elapsed() >= cfg.deadline {
			info!("bailing out after {:?}", start.elapsed());
			return None;
		}

		tokio::select! {
			_ = tokio::time::sleep(delay) => {},
			_ = cfg.cancel.cancelled() => return None,
		}
	}
}
