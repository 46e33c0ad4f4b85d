//! Structured logging setup.
//!
//! The agent core only ever emits single-line status updates and structured
//! `tracing` events (§7 of the design: "a single line of status describes
//! every phase"); this module wires those events to stdout, honoring
//! `RUST_LOG` the same way every other binary in the workspace does.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Output format for the log layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
	#[default]
	Text,
	Json,
}

#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
	pub format: LogFormat,
	/// Defaults to `info` plus whatever `RUST_LOG` narrows or widens.
	pub filter: Option<String>,
}

/// Installs a global `tracing` subscriber. Intended to be called exactly
/// once, early in `main`.
pub fn setup_logging(cfg: &LoggingConfig) -> anyhow::Result<()> {
	let filter = match &cfg.filter {
		Some(f) => EnvFilter::try_new(f)?,
		None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
	};

	let registry = tracing_subscriber::registry().with(filter);

	match cfg.format {
		LogFormat::Json => {
			let fmt = tracing_subscriber::fmt::layer()
				.json()
				.with_span_events(FmtSpan::CLOSE)
				.with_target(true);
			registry.with(fmt).try_init()
		},
		LogFormat::Text => {
			let fmt = tracing_subscriber::fmt::layer().with_target(true);
			registry.with(fmt).try_init()
		},
	}
	.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}
