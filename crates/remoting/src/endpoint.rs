//! Endpoint record and resolver: probes a list of candidate controller URLs
//! and turns the winning response into an immutable [`Endpoint`].

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use reqwest::header::HeaderMap;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{ResolutionError, UnreachableError};
use crate::hostport::HostPort;
use crate::proxy::ProxyResolver;
use crate::retry::{RetryConfig, retry};

const LISTENER_PATH: &str = "tcpSlaveAgentListener/";
const RESOLUTION_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const RESOLUTION_READ_TIMEOUT: Duration = Duration::from_secs(60);
const READY_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READY_READ_TIMEOUT: Duration = Duration::from_secs(5);
const PORT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Long-lived controller identity, a raw X.509 SubjectPublicKeyInfo DER
/// blob. Equality and the fingerprint used in logs both operate on the raw
/// bytes; we never need to do RSA math with it, only compare it against a
/// TLS peer certificate's public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceIdentity(Vec<u8>);

impl InstanceIdentity {
	pub fn from_der(der: Vec<u8>) -> Self {
		InstanceIdentity(der)
	}

	pub fn der(&self) -> &[u8] {
		&self.0
	}

	/// Short hex digest suitable for log lines ("remote identity
	/// confirmed", "Expecting identity <fp>").
	pub fn fingerprint(&self) -> String {
		let digest = Sha256::digest(&self.0);
		hex::encode(&digest[..8])
	}
}

#[derive(Debug, Clone)]
pub struct Endpoint {
	pub host: String,
	pub port: u16,
	pub instance_identity: Option<InstanceIdentity>,
	/// `None` means "all locally enabled protocols are acceptable".
	pub supported_protocols: Option<HashSet<String>>,
	pub service_url: Url,
	pub proxy_credentials: Option<String>,
}

impl PartialEq for Endpoint {
	fn eq(&self, other: &Self) -> bool {
		self.port == other.port
			&& self.instance_identity == other.instance_identity
			&& self.supported_protocols == other.supported_protocols
			&& hosts_equivalent(&self.host, &other.host)
	}
}

/// Two hosts are considered equal if they are textually equal, or if one is
/// the any/local address (`0.0.0.0`, `::`) and the other is loopback or
/// link-local -- this lets an endpoint advertised as `0.0.0.0` survive NAT
/// loopback without breaking the resolver's "is this still the same
/// endpoint" caching.
pub fn hosts_equivalent(a: &str, b: &str) -> bool {
	if a.eq_ignore_ascii_case(b) {
		return true;
	}
	let (Ok(a_ip), Ok(b_ip)) = (a.parse::<IpAddr>(), b.parse::<IpAddr>()) else {
		return false;
	};
	let any_vs_local = |x: &IpAddr, y: &IpAddr| x.is_unspecified() && (y.is_loopback() || is_link_local(y));
	any_vs_local(&a_ip, &b_ip) || any_vs_local(&b_ip, &a_ip)
}

fn is_link_local(ip: &IpAddr) -> bool {
	match ip {
		IpAddr::V4(v4) => v4.is_link_local(),
		IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
	}
}

#[derive(Debug, Clone, Default)]
pub struct EndpointResolverConfig {
	pub candidates: Vec<Url>,
	pub credentials: Option<(String, String)>,
	pub proxy_credentials: Option<String>,
	/// Overrides the host and/or port advertised by the controller.
	pub tunnel: Option<String>,
	pub disable_https_cert_validation: bool,
	/// Overrides the server-advertised protocol name list.
	pub protocol_names_override: Option<Vec<String>>,
	pub client_name: Option<String>,
}

pub struct EndpointResolver {
	config: EndpointResolverConfig,
	proxy: Option<ProxyResolver>,
	client: reqwest::Client,
	/// Index into `config.candidates` of the last winning URL, tried first
	/// on subsequent calls.
	preferred: Mutex<Option<usize>>,
}

impl EndpointResolver {
	pub fn new(config: EndpointResolverConfig, proxy: Option<ProxyResolver>) -> anyhow::Result<Self> {
		let client = reqwest::Client::builder()
			.danger_accept_invalid_certs(config.disable_https_cert_validation)
			.build()?;
		Ok(EndpointResolver {
			config,
			proxy,
			client,
			preferred: Mutex::new(None),
		})
	}

	fn candidate_order(&self) -> Vec<usize> {
		let n = self.config.candidates.len();
		let preferred = *self.preferred.lock().unwrap();
		let mut order: Vec<usize> = (0..n).collect();
		if let Some(p) = preferred
			&& let Some(pos) = order.iter().position(|&i| i == p)
		{
			order.remove(pos);
			order.insert(0, p);
		}
		order
	}

	/// Probes each candidate in preference order and returns the first
	/// successfully resolved [`Endpoint`].
	pub async fn resolve(&self) -> Result<Endpoint, ResolutionError> {
		let mut failures = Vec::new();
		for idx in self.candidate_order() {
			let url = &self.config.candidates[idx];
			info!(%url, "locating server among candidates");
			match self.probe_candidate(url).await {
				Ok(endpoint) => {
					*self.preferred.lock().unwrap() = Some(idx);
					info!(%url, host = %endpoint.host, port = endpoint.port, "agent discovery successful");
					return Ok(endpoint);
				},
				Err(e) => {
					warn!(%url, error = %e, "candidate failed");
					failures.push((url.to_string(), e));
				},
			}
		}
		Err(ResolutionError {
			candidate_failures: failures,
		})
	}

	async fn probe_candidate(&self, base: &Url) -> anyhow::Result<Endpoint> {
		let probe_url = base.join(LISTENER_PATH)?;
		let mut req = self.client.get(probe_url.clone()).timeout(RESOLUTION_READ_TIMEOUT);
		req = self.apply_connect_budget(req);
		req = self.apply_auth_headers(req);

		let resp = req.send().await?;
		if resp.status() != reqwest::StatusCode::OK {
			anyhow::bail!("probe of {probe_url} returned HTTP {}", resp.status());
		}
		let headers = resp.headers().clone();
		self.endpoint_from_headers(base, &headers).await
	}

	fn apply_connect_budget(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
		// reqwest does not expose a distinct connect-timeout per request; the
		// overall `timeout()` above already bounds resolution probes to the
		// connect+read budget.
		let _ = RESOLUTION_CONNECT_TIMEOUT;
		req
	}

	fn apply_auth_headers(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
		if let Some((user, pass)) = &self.config.credentials {
			req = req.basic_auth(user, Some(pass));
		}
		if let Some(proxy_creds) = &self.config.proxy_credentials {
			let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, proxy_creds);
			req = req.header("Proxy-Authorization", format!("Basic {encoded}"));
		}
		if let Some(name) = &self.config.client_name {
			req = req.header("X-Remoting-Client-Name", name.clone());
		}
		req
	}

	async fn endpoint_from_headers(&self, base: &Url, headers: &HeaderMap) -> anyhow::Result<Endpoint> {
		let port_str = header_either(headers, "X-Jenkins-JNLP-Port", "X-Hudson-JNLP-Port")
			.ok_or_else(|| anyhow::anyhow!("response did not advertise a JNLP port"))?;
		let port: i64 = port_str
			.parse()
			.map_err(|_| anyhow::anyhow!("advertised JNLP port {port_str:?} is not numeric"))?;
		if !(1..=65535).contains(&port) {
			anyhow::bail!("advertised JNLP port {port} is out of range");
		}
		let mut host = header_either(headers, "X-Jenkins-JNLP-Host", "X-Hudson-JNLP-Host")
			.map(str::to_string)
			.unwrap_or_else(|| base.host_str().unwrap_or_default().to_string());
		let mut port = port as u16;

		if let Some(min_version) = header_either(headers, "Remoting-Minimum-Version", "Remoting-Minimum-Version") {
			let current = remoting_core::version::BuildInfo::current();
			if current.is_older_than(min_version) {
				anyhow::bail!("local implementation version {} is older than required {min_version}", current.version);
			}
		}

		let supported_protocols = if let Some(names) = &self.config.protocol_names_override {
			Some(names.iter().cloned().collect())
		} else {
			header_either(headers, "X-Jenkins-Agent-Protocols", "X-Jenkins-Agent-Protocols")
				.map(|csv| csv.split(',').map(|s| s.trim().to_string()).collect())
		};

		let instance_identity = header_either(headers, "X-Instance-Identity", "X-Instance-Identity")
			.and_then(|b64| {
				use base64::Engine;
				base64::engine::general_purpose::STANDARD.decode(b64).ok()
			})
			.map(InstanceIdentity::from_der);

		if let Some(tunnel) = &self.config.tunnel {
			let hp = HostPort::parse(tunnel, Some(&host), Some(port))?;
			host = hp.host;
			port = hp.port;
		} else if let Some(proxy) = &self.proxy
			&& let Err(e) = check_port_reachable(&host, port, proxy, PORT_PROBE_TIMEOUT).await
		{
			return Err(UnreachableError::PortNotReachable(e).into());
		}

		Ok(Endpoint {
			host,
			port,
			instance_identity,
			supported_protocols,
			service_url: base.clone(),
			proxy_credentials: self.config.proxy_credentials.clone(),
		})
	}

	/// Polls `<url>/tcpSlaveAgentListener/` until it returns `200`, backing
	/// off exponentially between attempts.
	pub async fn wait_for_ready(&self, url: &Url, retry_cfg: &RetryConfig) -> Result<(), UnreachableError> {
		let probe_url = url.join(LISTENER_PATH).map_err(|e| UnreachableError::ConnectFailed(e.into()))?;
		let client = self.client.clone();
		let result = retry(
			retry_cfg,
			|| {
				let client = client.clone();
				let probe_url = probe_url.clone();
				async move {
					let resp = client
						.get(probe_url.clone())
						.timeout(READY_READ_TIMEOUT)
						.send()
						.await?;
					match resp.status() {
						reqwest::StatusCode::OK => Ok(()),
						reqwest::StatusCode::NOT_FOUND => {
							anyhow::bail!(
								"Controller isn't ready to talk to us on {probe_url}. Maybe TCP port for inbound agents is disabled?"
							)
						},
						other => anyhow::bail!("unexpected status {other} from {probe_url}"),
					}
				}
			},
			|msg| debug!("{msg}"),
		)
		.await;
		let _ = READY_CONNECT_TIMEOUT;
		result.ok_or(UnreachableError::WaitForReadyTimedOut)
	}
}

fn header_either<'a>(headers: &'a HeaderMap, primary: &str, fallback: &str) -> Option<&'a str> {
	headers
		.get(primary)
		.or_else(|| headers.get(fallback))
		.and_then(|v| v.to_str().ok())
}

/// Attempts a bounded TCP connect to confirm the advertised port is
/// reachable (through the resolved proxy, if any). Synchronous-looking
/// helper kept small since it is only ever awaited inline above.
async fn check_port_reachable(
	host: &str,
	port: u16,
	proxy: &ProxyResolver,
	timeout: Duration,
) -> Result<(), String> {
	let target = proxy.resolve(host, port);
	let addr_str = match target {
		Some(proxy_addr) => proxy_addr.to_string(),
		None => format!("{host}:{port}"),
	};
	let deadline = Instant::now() + timeout;
	match tokio::time::timeout_at(deadline.into(), tokio::net::TcpStream::connect(&addr_str)).await {
		Ok(Ok(_stream)) => Ok(()),
		Ok(Err(e)) => Err(format!("{addr_str}: {e}")),
		Err(_) => Err(format!("{addr_str}: timed out after {timeout:?}")),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hosts_equivalent_any_vs_loopback() {
		assert!(hosts_equivalent("0.0.0.0", "127.0.0.1"));
		assert!(hosts_equivalent("::", "::1"));
		assert!(!hosts_equivalent("10.0.0.1", "10.0.0.2"));
	}

	#[test]
	fn hosts_equivalent_exact_match() {
		assert!(hosts_equivalent("example.org", "EXAMPLE.ORG"));
	}

	#[test]
	fn instance_identity_fingerprint_is_stable() {
		let id = InstanceIdentity::from_der(vec![1, 2, 3, 4]);
		assert_eq!(id.fingerprint(), id.fingerprint());
	}
}
