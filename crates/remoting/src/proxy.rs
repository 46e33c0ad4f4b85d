//! Proxy resolution: combines a pluggable system proxy selector with the
//! `http_proxy`/`no_proxy`/`http.nonProxyHosts`-style environment
//! conventions into a single proxy address (or none) for a target host.

use std::net::SocketAddr;

use tracing::warn;

use crate::hostport::HostPort;

/// Stands in for a platform proxy selector (e.g. `java.net.ProxySelector`,
/// or a system keychain/PAC-file lookup). The agent core only ever needs a
/// direct/proxy answer for a single `http://host:port` target.
pub trait SystemProxySelector: Send + Sync {
	fn select(&self, host: &str, port: u16) -> ProxySelection;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxySelection {
	Direct,
	Proxy(SocketAddr),
}

/// A selector that never proposes a proxy; used when no platform
/// integration is wired up.
pub struct NoSystemProxy;

impl SystemProxySelector for NoSystemProxy {
	fn select(&self, _host: &str, _port: u16) -> ProxySelection {
		ProxySelection::Direct
	}
}

#[derive(Debug, Clone, Default)]
pub struct ProxyResolverConfig {
	/// Equivalent of the `http.nonProxyHosts` system property: entries with
	/// at most one leading or trailing `*` are wildcards.
	pub non_proxy_hosts: Vec<String>,
	/// Equivalent of the `http_proxy` environment variable.
	pub http_proxy: Option<SocketAddr>,
	/// Equivalent of the `no_proxy` environment variable: comma separated
	/// hosts, optionally dot-prefixed, optionally bare IPs.
	pub no_proxy: Vec<String>,
}

impl ProxyResolverConfig {
	/// Builds a config from the conventional environment variables.
	pub fn from_env() -> Self {
		let http_proxy = std::env::var("http_proxy")
			.ok()
			.and_then(|v| parse_proxy_env(&v));
		let no_proxy = std::env::var("no_proxy")
			.ok()
			.map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
			.unwrap_or_default();
		ProxyResolverConfig {
			non_proxy_hosts: Vec::new(),
			http_proxy,
			no_proxy,
		}
	}
}

fn parse_proxy_env(v: &str) -> Option<SocketAddr> {
	let v = v.trim();
	let v = v
		.strip_prefix("http://")
		.or_else(|| v.strip_prefix("https://"))
		.unwrap_or(v);
	let v = v.trim_end_matches('/');
	let hp = HostPort::parse(v, None, Some(80)).ok()?;
	resolve_socket_addr(&hp.host, hp.port)
}

fn resolve_socket_addr(host: &str, port: u16) -> Option<SocketAddr> {
	use std::net::ToSocketAddrs;
	(host, port).to_socket_addrs().ok()?.next()
}

pub struct ProxyResolver<S: SystemProxySelector = NoSystemProxy> {
	config: ProxyResolverConfig,
	system: S,
}

impl ProxyResolver<NoSystemProxy> {
	pub fn new(config: ProxyResolverConfig) -> Self {
		ProxyResolver {
			config,
			system: NoSystemProxy,
		}
	}
}

impl<S: SystemProxySelector> ProxyResolver<S> {
	pub fn with_system_selector(config: ProxyResolverConfig, system: S) -> Self {
		ProxyResolver { config, system }
	}

	/// Resolves the proxy to use for `host:port`, or `None` for a direct
	/// connection.
	pub fn resolve(&self, host: &str, port: u16) -> Option<SocketAddr> {
		match self.system.select(host, port) {
			ProxySelection::Proxy(addr) => return Some(addr),
			ProxySelection::Direct => {
				if matches_non_proxy_hosts(host, &self.config.non_proxy_hosts) {
					return None;
				}
			},
		}

		if let Some(proxy) = self.config.http_proxy
			&& !matches_no_proxy(host, &self.config.no_proxy)
		{
			return Some(proxy);
		}

		None
	}
}

/// `http.nonProxyHosts`-style matching: at most one leading or trailing `*`,
/// anchored at the opposite end. Multiple wildcards in a single entry are
/// unsupported and are logged, then skipped.
fn matches_non_proxy_hosts(host: &str, patterns: &[String]) -> bool {
	patterns.iter().any(|pattern| {
		let stars = pattern.matches('*').count();
		if stars == 0 {
			return pattern.eq_ignore_ascii_case(host);
		}
		if stars > 1 {
			warn!(pattern, "unsupported non-proxy host pattern with multiple wildcards");
			return false;
		}
		if let Some(suffix) = pattern.strip_prefix('*') {
			return host.to_ascii_lowercase().ends_with(&suffix.to_ascii_lowercase());
		}
		if let Some(prefix) = pattern.strip_suffix('*') {
			return host.to_ascii_lowercase().starts_with(&prefix.to_ascii_lowercase());
		}
		false
	})
}

/// `no_proxy`-style matching: exact match, or a "strip one subdomain label
/// at a time" walk up the host, up to 128 levels. IP addresses only match
/// verbatim since they have no subdomain structure.
fn matches_no_proxy(host: &str, entries: &[String]) -> bool {
	let normalized: Vec<String> = entries.iter().map(|e| normalize_no_proxy_entry(e)).collect();

	if host.parse::<std::net::IpAddr>().is_ok() {
		return normalized.iter().any(|e| e == host);
	}

	let mut candidate = host.to_ascii_lowercase();
	for _ in 0..128 {
		if normalized.iter().any(|e| e == &candidate) {
			return true;
		}
		match candidate.split_once('.') {
			Some((_, rest)) if !rest.is_empty() => candidate = rest.to_string(),
			_ => break,
		}
	}
	false
}

fn normalize_no_proxy_entry(entry: &str) -> String {
	entry.trim_start_matches('.').to_ascii_lowercase()
}
