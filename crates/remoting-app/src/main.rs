// Originally derived from https://github.com/istio/ztunnel (Apache 2.0 licensed)

use std::collections::HashSet;
use std::time::Duration;

use clap::Parser;
use remoting_agent::config::AgentConfig;
use remoting_agent::{ConnectOutcome, InboundTcpConnector};
use remoting_core::signal::Shutdown;
use remoting_core::telemetry::{LogFormat, LoggingConfig, setup_logging};
use remoting_core::version::BuildInfo;
use tracing::info;
use url::Url;

#[derive(Parser, Debug)]
#[command(about = "Agent-side connector for a controller/agent remoting subsystem", long_about = None)]
#[command(disable_version_flag = true)]
struct Args {
	/// Candidate controller URLs, probed in order until one resolves an
	/// endpoint.
	#[arg(short = 'u', long = "url", value_name = "url", required_unless_present = "version", num_args = 1..)]
	urls: Vec<Url>,

	/// This agent's name, sent to the controller on every handshake.
	#[arg(short, long, required_unless_present = "version")]
	name: String,

	/// Shared secret proving this agent's identity.
	#[arg(short, long, required_unless_present = "version")]
	secret: String,

	/// HTTP basic-auth credentials for the endpoint probe, `user:pass`.
	#[arg(long, value_name = "user:pass")]
	credentials: Option<String>,

	/// HTTP proxy basic-auth credentials, `user:pass`.
	#[arg(long = "proxy-credentials", value_name = "user:pass")]
	proxy_credentials: Option<String>,

	/// Overrides the host[:port] advertised by the controller.
	#[arg(long)]
	tunnel: Option<String>,

	/// Skip TLS certificate validation on the HTTPS endpoint probe.
	#[arg(long)]
	disable_https_cert_validation: bool,

	/// Restricts negotiation to this explicit, comma-separated protocol
	/// name list, overriding the controller's advertised set.
	#[arg(long = "protocols", value_delimiter = ',')]
	protocol_names_override: Option<Vec<String>>,

	/// Disables a protocol name even if the controller would otherwise
	/// accept it. May be repeated.
	#[arg(long = "disable-protocol", value_name = "name")]
	disabled_protocols: Vec<String>,

	/// Per-attempt socket/handshake timeout.
	#[arg(long, value_parser = humantime::parse_duration, default_value = "30m")]
	socket_timeout: Duration,

	/// Enable TCP keep-alive on the agent's socket.
	#[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
	keep_alive: bool,

	/// Additional hosts to never route through a proxy.
	#[arg(long = "no-proxy", value_delimiter = ',')]
	no_proxy: Vec<String>,

	/// Deadline for the retrying endpoint-resolution phase.
	#[arg(long, value_parser = humantime::parse_duration, default_value = "60s")]
	resolve_deadline: Duration,

	/// Emit structured logs as JSON instead of text.
	#[arg(long)]
	log_json: bool,

	/// Print version and exit.
	#[arg(short = 'V', long = "version")]
	version: bool,
}

fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	if args.version {
		let info = BuildInfo::current();
		println!("{} ({})", info.version, info.git_sha.unwrap_or("unknown"));
		return Ok(());
	}

	setup_logging(&LoggingConfig {
		format: if args.log_json { LogFormat::Json } else { LogFormat::Text },
		filter: None,
	})?;

	tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()?
		.block_on(run(args))
}

fn build_config(args: &Args) -> anyhow::Result<AgentConfig> {
	let credentials = args
		.credentials
		.as_deref()
		.map(parse_user_pass)
		.transpose()?;

	Ok(AgentConfig {
		candidates: args.urls.clone(),
		client_name: args.name.clone(),
		secret: args.secret.clone(),
		credentials,
		proxy_credentials: args.proxy_credentials.clone(),
		tunnel: args.tunnel.clone(),
		disable_https_cert_validation: args.disable_https_cert_validation,
		protocol_names_override: args.protocol_names_override.clone(),
		disabled_protocols: args.disabled_protocols.iter().cloned().collect::<HashSet<_>>(),
		socket_timeout: args.socket_timeout,
		keep_alive: args.keep_alive,
		no_proxy: args.no_proxy.clone(),
		resolve_deadline: args.resolve_deadline,
	})
}

fn parse_user_pass(raw: &str) -> anyhow::Result<(String, String)> {
	raw.split_once(':')
		.map(|(u, p)| (u.to_string(), p.to_string()))
		.ok_or_else(|| anyhow::anyhow!("expected credentials in `user:pass` form, got {raw:?}"))
}

async fn run(args: Args) -> anyhow::Result<()> {
	let config = build_config(&args)?;
	info!(config = %serde_json::to_string(&config)?, "starting with configuration");

	let mut connector = InboundTcpConnector::new(config)?;
	let cancel = connector.cancellation();
	let shutdown = Shutdown::new();
	let watcher = {
		let cancel = cancel.clone();
		tokio::spawn(async move {
			shutdown.wait().await;
			cancel.cancel();
		})
	};

	let result = match connector.connect().await {
		ConnectOutcome::Established(handle) => {
			info!(cookie = ?handle.cookie, "connection established; handing transport to the channel layer");
			// Multiplexing RPC frames over `handle.transport` is an external
			// collaborator's job, out of scope for this core; hold the
			// process open until asked to shut down.
			drop(handle.transport);
			cancel.cancelled().await;
			Ok(())
		},
		ConnectOutcome::NoServer(e) => Err(e.into()),
		ConnectOutcome::NoProtocols => Err(anyhow::anyhow!("no protocol was negotiable with the controller")),
		ConnectOutcome::Cancelled => Ok(()),
	};

	connector.close().await;
	watcher.abort();
	result
}
