//! Inbound TCP connector: orchestrates one connection attempt end to end
//! (`spec.md` §4.6) -- resolve an endpoint, pick a negotiable protocol,
//! open a socket (direct or through an HTTP CONNECT proxy tunnel),
//! run its handshake, and drive the resulting attempt through the
//! connection-state machine of `crate::state`.
//!
//! A connector is single-shot per `connect()` call (`spec.md` §1's
//! "no live reconfiguration"); `ConnectOutcome` realizes Open Question 3
//! of `spec.md` §9 as a typed sum type instead of a nullable future.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AgentConfig;
use crate::cookie::Cookie;
use crate::endpoint::{Endpoint, EndpointResolver, EndpointResolverConfig, InstanceIdentity};
use crate::error::{ProtocolRefusalError, RemotingError, Result, UnreachableError};
use crate::handshake::{OutboundHeaders, v1, v2, v3};
use crate::iohub::IoHub;
use crate::protocol::ack::AckFilter;
use crate::protocol::headers::HeadersFilter;
use crate::protocol::network::NetworkLayer;
use crate::protocol::stack::{Layer, ProtocolStack, StackHandler};
use crate::protocol::tls::{self, TlsEngineFilter};
use crate::protocol::{BoxedDuplex, LayerEvent};
use crate::protocols::{ProtocolHandler, default_listener_chain, negotiable};
use crate::proxy::{ProxyResolver, ProxyResolverConfig};
use crate::retry::{RetryConfig, retry};
use crate::state::{ChannelBuilder, ChannelHandle, ConnectionState, DispatchOutcome, remote_description_for};

/// Result of a `connect()` call. A source-level nullable channel future
/// collapses into this sum type so callers can match exhaustively rather
/// than guess what a `None` meant (`spec.md` §9, Open Question 3).
pub enum ConnectOutcome {
	Established(ChannelHandle),
	/// Endpoint resolution failed for every candidate, or the candidate's
	/// port was unreachable.
	NoServer(RemotingError),
	/// Every negotiable protocol was tried and refused, or none were
	/// negotiable to begin with.
	NoProtocols,
	/// The deadline was exhausted or the connector was asked to cancel.
	Cancelled,
}

pub struct InboundTcpConnector {
	config: AgentConfig,
	resolver: EndpointResolver,
	proxy: ProxyResolver,
	tls_config: Arc<rustls::ClientConfig>,
	cancel: CancellationToken,
	/// Carried across reconnect attempts within this process's lifetime
	/// (`spec.md` §6, "persisted state": the cookie is not written to
	/// disk by this core).
	cookie: Arc<Mutex<Option<Cookie>>>,
	hub: Option<IoHub>,
}

impl InboundTcpConnector {
	pub fn new(config: AgentConfig) -> anyhow::Result<Self> {
		let mut proxy_cfg = ProxyResolverConfig::from_env();
		proxy_cfg.no_proxy.extend(config.no_proxy.iter().cloned());

		let resolver_cfg = EndpointResolverConfig {
			candidates: config.candidates.clone(),
			credentials: config.credentials.clone(),
			proxy_credentials: config.proxy_credentials.clone(),
			tunnel: config.tunnel.clone(),
			disable_https_cert_validation: config.disable_https_cert_validation,
			protocol_names_override: config.protocol_names_override.clone(),
			client_name: Some(config.client_name.clone()),
		};
		let resolver = EndpointResolver::new(resolver_cfg, Some(ProxyResolver::new(proxy_cfg.clone())))?;

		Ok(InboundTcpConnector {
			config,
			resolver,
			proxy: ProxyResolver::new(proxy_cfg),
			tls_config: tls::client_config(),
			cancel: CancellationToken::new(),
			cookie: Arc::new(Mutex::new(None)),
			hub: None,
		})
	}

	/// A handle other tasks can use to cancel an in-flight `connect()`.
	pub fn cancellation(&self) -> CancellationToken {
		self.cancel.clone()
	}

	/// Runs one full connection attempt: resolve, negotiate, handshake.
	pub async fn connect(&mut self) -> ConnectOutcome {
		self.hub = Some(IoHub::new());

		let endpoint = match self.resolve_endpoint().await {
			Ok(endpoint) => endpoint,
			Err(RemotingError::Cancelled(msg)) => {
				info!("{msg}");
				return ConnectOutcome::Cancelled;
			},
			Err(e) => return ConnectOutcome::NoServer(e),
		};

		info!(
			host = %endpoint.host,
			port = endpoint.port,
			identity = endpoint.instance_identity.as_ref().map(|id| id.fingerprint()),
			service_url = %endpoint.service_url,
			"connecting using resolved endpoint"
		);

		let local_enabled = self.config.protocol_enablement().enabled_handlers();
		let server_advertised = endpoint.supported_protocols.as_ref();
		let candidates = negotiable(&local_enabled, server_advertised);
		info!(
			local = ?local_enabled.iter().map(|h| h.name()).collect::<Vec<_>>(),
			advertised = ?server_advertised,
			negotiable = ?candidates.iter().map(|h| h.name()).collect::<Vec<_>>(),
			"computed negotiable protocol set"
		);

		if candidates.is_empty() {
			let reason = if local_enabled.is_empty() {
				ProtocolRefusalError::NoneEnabled
			} else {
				ProtocolRefusalError::NoneAccepted
			};
			warn!("reconnect rejected: {reason}");
			return ConnectOutcome::NoProtocols;
		}

		if self.cancel.is_cancelled() {
			return ConnectOutcome::Cancelled;
		}

		for protocol in &candidates {
			match self.connect_one(&endpoint, *protocol).await {
				Ok(handle) => return ConnectOutcome::Established(handle),
				Err(e) => {
					warn!(protocol = protocol.name(), error = %e, "protocol failed to establish channel");
				},
			}
		}

		warn!("reconnect rejected: none accepted");
		ConnectOutcome::NoProtocols
	}

	/// Closes the I/O hub and any in-flight resources. `spec.md` §5:
	/// "A connector's close() closes every registered closeable".
	pub async fn close(&mut self) {
		self.cancel.cancel();
		if let Some(mut hub) = self.hub.take() {
			hub.close().await;
		}
	}

	async fn resolve_endpoint(&self) -> Result<Endpoint> {
		let retry_cfg = RetryConfig {
			deadline: self.config.resolve_deadline,
			cancel: self.cancel.clone(),
			..RetryConfig::default()
		};
		let last_err = std::cell::RefCell::new(None);

		let resolved = retry(
			&retry_cfg,
			|| async {
				match self.resolver.resolve().await {
					Ok(endpoint) => Ok(endpoint),
					Err(e) => {
						let msg = e.to_string();
						*last_err.borrow_mut() = Some(e);
						Err(anyhow::anyhow!(msg))
					},
				}
			},
			|msg| info!("{msg}"),
		)
		.await;

		match resolved {
			Some(endpoint) => Ok(endpoint),
			None if self.cancel.is_cancelled() => Err(RemotingError::Cancelled("endpoint resolution cancelled".to_string())),
			None => Err(last_err
				.into_inner()
				.map(RemotingError::from)
				.unwrap_or_else(|| RemotingError::Unreachable(UnreachableError::WaitForReadyTimedOut))),
		}
	}

	/// Opens the socket for one protocol attempt (direct, or via an HTTP
	/// CONNECT tunnel when the proxy resolver returns an address), then
	/// runs that protocol's handshake and drives the connection-state
	/// machine to `AFTER_CHANNEL`.
	async fn connect_one(&self, endpoint: &Endpoint, protocol: ProtocolHandler) -> Result<ChannelHandle> {
		let attempt = async {
			let socket = self.open_socket(endpoint).await?;
			let socket: BoxedDuplex = Box::new(socket);

			let peer_identity = Arc::new(Mutex::new(None));
			let listeners = default_listener_chain(endpoint, peer_identity.clone(), self.cookie.clone());
			let mut state = ConnectionState::new(remote_description_for(endpoint), listeners);

			let cookie = self.cookie.lock().unwrap().clone();
			let headers = OutboundHeaders {
				secret: self.config.secret.clone(),
				client_name: self.config.client_name.clone(),
				cookie: cookie.clone(),
			};

			match protocol {
				ProtocolHandler::V1 => self.run_v1(socket, headers, &mut state).await,
				ProtocolHandler::V2 => self.run_v2(socket, headers, &mut state).await,
				ProtocolHandler::V3 => self.run_v3(socket, headers, &mut state).await,
				ProtocolHandler::V4 { tls } => {
					self.run_v4(endpoint, protocol.name(), tls, None, socket, headers, peer_identity, &mut state)
						.await
				},
				ProtocolHandler::V4Proxy => {
					self.run_v4(
						endpoint,
						protocol.name(),
						true,
						Some(self.config.client_name.as_str()),
						socket,
						headers,
						peer_identity,
						&mut state,
					)
					.await
				},
			}
		};

		match tokio::time::timeout(self.config.socket_timeout, attempt).await {
			Ok(result) => result,
			Err(_) => Err(UnreachableError::ConnectFailed(anyhow::anyhow!("socket timeout elapsed during handshake")).into()),
		}
	}

	async fn open_socket(&self, endpoint: &Endpoint) -> Result<TcpStream> {
		let proxy_addr = self.proxy.resolve(&endpoint.host, endpoint.port);
		let stream = match proxy_addr {
			Some(proxy_addr) => {
				let mut stream = TcpStream::connect(proxy_addr)
					.await
					.map_err(|e| UnreachableError::ConnectFailed(e.into()))?;
				proxy_connect(&mut stream, &endpoint.host, endpoint.port, endpoint.proxy_credentials.as_deref())
					.await
					.map_err(|e| UnreachableError::ConnectFailed(e.into()))?;
				stream
			},
			None => TcpStream::connect((endpoint.host.as_str(), endpoint.port))
				.await
				.map_err(|e| UnreachableError::ConnectFailed(e.into()))?,
		};
		// `spec.md` §4.6 step 6a: "TCP-no-delay true, keep-alive per
		// config". `SockRef` tunes both options on the already-connected
		// socket without taking ownership of it, the way the rest of this
		// workspace reaches for `socket2` for socket-option tuning instead
		// of hand-rolling platform-specific `setsockopt` calls.
		let sock = socket2::SockRef::from(&stream);
		sock.set_nodelay(true).map_err(|e| UnreachableError::ConnectFailed(e.into()))?;
		sock.set_keepalive(self.config.keep_alive).map_err(|e| UnreachableError::ConnectFailed(e.into()))?;
		Ok(stream)
	}

	async fn run_v1(&self, mut socket: BoxedDuplex, headers: OutboundHeaders, state: &mut ConnectionState) -> Result<ChannelHandle> {
		let result = v1::connect(&mut socket, &headers).await?;
		self.drive_legacy_state(v1::NAME, state, result.properties, result.new_cookie, socket)
	}

	async fn run_v2(&self, mut socket: BoxedDuplex, headers: OutboundHeaders, state: &mut ConnectionState) -> Result<ChannelHandle> {
		let result = v2::connect(&mut socket, &headers).await?;
		self.drive_legacy_state(v2::NAME, state, result.properties, result.new_cookie, socket)
	}

	async fn run_v3(&self, socket: BoxedDuplex, headers: OutboundHeaders, state: &mut ConnectionState) -> Result<ChannelHandle> {
		let v3::V3Outcome { result, channel } = v3::connect(socket, &headers).await?;
		let transport: BoxedDuplex = Box::new(channel);
		self.drive_legacy_state(v3::NAME, state, result.properties, result.new_cookie, transport)
	}

	/// Drives `BEFORE_PROPERTIES` -> `AFTER_PROPERTIES` -> `BEFORE_CHANNEL`
	/// -> `AFTER_CHANNEL` for a legacy (v1-v3) handshake that has already
	/// completed: no TLS session exists, so the identity-verifier listener
	/// simply continues (`spec.md` §4.6, "no TLS session on this attempt").
	fn drive_legacy_state(
		&self,
		protocol_name: &str,
		state: &mut ConnectionState,
		properties: HashMap<String, String>,
		new_cookie: Option<Cookie>,
		transport: BoxedDuplex,
	) -> Result<ChannelHandle> {
		if state.fire_before_properties() == DispatchOutcome::Rejected {
			return Err(refusal(protocol_name, state.rejection.clone()));
		}
		if state.fire_after_properties(properties.clone()) == DispatchOutcome::Rejected {
			return Err(refusal(protocol_name, state.rejection.clone()));
		}

		state.fire_before_channel(ChannelBuilder { binary_mode: false });
		let cookie = new_cookie.or_else(|| properties.get("Cookie").cloned().map(Cookie::from_hex));
		state.fire_after_channel(ChannelHandle { cookie, transport });
		Ok(state.take_channel().expect("just set above"))
	}

	/// Drives the v4 layer pipeline (`spec.md` §4.8) and the connection-state
	/// transitions it feeds. The two I/O-bearing stages -- the pre-properties
	/// stack (network/ACK/TLS) and the connection-headers stack -- run on
	/// the connector's [`IoHub`] rather than inline on the caller's task,
	/// so a v4 attempt's non-blocking traffic really is "driven by" and
	/// "serialized by" the hub thread (`spec.md` §4.8/§4.9/§5), with the
	/// resulting stream handed back here through a one-shot channel
	/// (`IoHub::run`).
	#[allow(clippy::too_many_arguments)]
	async fn run_v4(
		&self,
		endpoint: &Endpoint,
		wire_name: &'static str,
		tls_enabled: bool,
		proxy_node_name: Option<&str>,
		stream: BoxedDuplex,
		headers: OutboundHeaders,
		peer_identity: Arc<Mutex<Option<InstanceIdentity>>>,
		state: &mut ConnectionState,
	) -> Result<ChannelHandle> {
		let hub = self.hub.as_ref().expect("connect() installs the hub before connect_one runs");

		let tls_config = self.tls_config.clone();
		let host = endpoint.host.clone();
		let proxy_node_name = proxy_node_name.map(str::to_string);
		let stream = hub
			.run(run_v4_pre_stack(wire_name, tls_enabled, proxy_node_name, stream, tls_config, host, peer_identity))
			.await
			.ok_or_else(hub_closed)??;

		if state.fire_before_properties() == DispatchOutcome::Rejected {
			return Err(refusal(wire_name, state.rejection.clone()));
		}

		let mut local_headers = HashMap::new();
		local_headers.insert("Secret-Key".to_string(), headers.secret.clone());
		local_headers.insert("Node-Name".to_string(), headers.client_name.clone());
		if let Some(cookie) = &headers.cookie {
			local_headers.insert("Cookie".to_string(), cookie.as_str().to_string());
		}

		let (stream, peer_properties) = hub.run(run_v4_headers_stack(wire_name, stream, local_headers)).await.ok_or_else(hub_closed)??;

		if state.fire_after_properties(peer_properties.clone()) == DispatchOutcome::Rejected {
			return Err(refusal(wire_name, state.rejection.clone()));
		}

		state.fire_before_channel(ChannelBuilder { binary_mode: false });
		let cookie = peer_properties.get("Cookie").cloned().map(Cookie::from_hex);
		state.fire_after_channel(ChannelHandle { cookie, transport: stream });
		Ok(state.take_channel().expect("just set above"))
	}
}

fn hub_closed() -> RemotingError {
	RemotingError::Internal("I/O hub closed before the v4 protocol stack completed".to_string())
}

/// Runs the network/ACK/(optional TLS) layers -- and, for `JNLP4-connect-
/// proxy`, the leading `Node-Name` header line -- on the hub thread
/// (`spec.md` §4.8 layers 1-4).
async fn run_v4_pre_stack(
	wire_name: &'static str,
	tls_enabled: bool,
	proxy_node_name: Option<String>,
	mut stream: BoxedDuplex,
	tls_config: Arc<rustls::ClientConfig>,
	host: String,
	peer_identity: Arc<Mutex<Option<InstanceIdentity>>>,
) -> Result<BoxedDuplex> {
	if let Some(node_name) = &proxy_node_name {
		crate::wire::write_protocol_marker(&mut stream, wire_name).await?;
		stream.write_all(format!("Node-Name: {node_name}\r\n\r\n").as_bytes()).await?;
		stream.flush().await?;
	}

	let mut pre_layers: Vec<Box<dyn Layer>> = vec![Box::new(NetworkLayer), Box::new(AckFilter)];
	if tls_enabled {
		pre_layers.push(Box::new(TlsEngineFilter::new(tls_config, &host)?));
	}
	let pre_stack = ProtocolStack::new(wire_name, pre_layers);
	let mut identity_handler = PeerIdentityHandler { sink: peer_identity };
	if proxy_node_name.is_some() {
		pre_stack.run_layers(stream, &mut identity_handler).await
	} else {
		pre_stack.run(wire_name, stream, &mut identity_handler).await
	}
}

/// Runs the connection-headers layer (`spec.md` §4.8 layer 5) on the hub
/// thread, returning the resulting stream and the peer's header map.
async fn run_v4_headers_stack(
	wire_name: &'static str,
	stream: BoxedDuplex,
	local_headers: HashMap<String, String>,
) -> Result<(BoxedDuplex, HashMap<String, String>)> {
	let headers_stack = ProtocolStack::new(wire_name, vec![Box::new(HeadersFilter::new(local_headers))]);
	let mut capture = HeadersCaptureHandler::default();
	let stream = headers_stack.run_layers(stream, &mut capture).await?;
	let peer_properties = capture
		.captured
		.ok_or_else(|| RemotingError::Internal("headers filter did not report its received headers".to_string()))?;
	Ok((stream, peer_properties))
}

fn refusal(protocol: &str, reason: Option<String>) -> RemotingError {
	ProtocolRefusalError::Refused {
		protocol: protocol.to_string(),
		reason: reason.unwrap_or_else(|| "no listeners interested in connection".to_string()),
	}
	.into()
}

/// Sends `CONNECT host:port HTTP/1.1` and waits for a `200` status line,
/// draining the proxy's response headers (`spec.md` §4.6, "Proxied socket
/// open"). Grounded on the teacher's HTTP CONNECT tunnel handshake
/// (`client/connect_tunnel.rs`), extended with optional
/// `Proxy-Authorization`.
async fn proxy_connect(stream: &mut TcpStream, host: &str, port: u16, proxy_credentials: Option<&str>) -> anyhow::Result<()> {
	let dest = format!("{host}:{port}");
	let mut request = format!("CONNECT {dest} HTTP/1.1\r\nHost: {host}\r\n");
	if let Some(creds) = proxy_credentials {
		use base64::Engine;
		let encoded = base64::engine::general_purpose::STANDARD.encode(creds);
		request.push_str(&format!("Proxy-Authorization: Basic {encoded}\r\n"));
	}
	request.push_str("\r\n");
	stream.write_all(request.as_bytes()).await?;

	let mut buf = [0u8; 8192];
	let mut pos = 0;
	loop {
		let n = stream.read(&mut buf[pos..]).await?;
		if n == 0 {
			anyhow::bail!("proxy CONNECT: unexpected EOF");
		}
		pos += n;
		let received = &buf[..pos];
		if received.starts_with(b"HTTP/1.1 200") || received.starts_with(b"HTTP/1.0 200") {
			if received.ends_with(b"\r\n\r\n") {
				return Ok(());
			}
			if pos == buf.len() {
				anyhow::bail!("proxy CONNECT: response headers too long");
			}
		} else if received.len() >= 12 {
			anyhow::bail!("proxy CONNECT failed: {}", String::from_utf8_lossy(&received[..received.len().min(64)]));
		}
	}
}

/// Captures the peer public key from a v4 TLS layer's `HandshakeCompleted`
/// event; does not touch the connection-state machine itself, so the
/// connector can fire `BEFORE_PROPERTIES` once regardless of whether TLS
/// ran at all (`spec.md` §4.7, `JNLP4-plaintext`).
struct PeerIdentityHandler {
	sink: Arc<Mutex<Option<InstanceIdentity>>>,
}

impl StackHandler for PeerIdentityHandler {
	fn on_event(&mut self, event: LayerEvent) {
		if let LayerEvent::HandshakeCompleted { peer_identity } = event
			&& let Some(identity) = peer_identity
		{
			*self.sink.lock().unwrap() = Some(identity);
		}
	}
}

#[derive(Default)]
struct HeadersCaptureHandler {
	captured: Option<HashMap<String, String>>,
}

impl StackHandler for HeadersCaptureHandler {
	fn on_event(&mut self, event: LayerEvent) {
		if let LayerEvent::HeadersReceived(map) = event {
			self.captured = Some(map);
		}
	}
}

#[cfg(test)]
mod tests {
	use tokio::io::{AsyncReadExt, AsyncWriteExt};
	use tokio::net::TcpListener;

	use super::*;

	/// E2E-3 of `spec.md` §8: a successful `CONNECT` exchange returns once
	/// the `200` status line and its terminating blank line have both been
	/// read, regardless of how the proxy splits the response across reads.
	#[tokio::test]
	async fn proxy_connect_succeeds_on_200() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let server = tokio::spawn(async move {
			let (mut sock, _) = listener.accept().await.unwrap();
			let mut buf = vec![0u8; 4096];
			let n = sock.read(&mut buf).await.unwrap();
			let request = String::from_utf8_lossy(&buf[..n]);
			assert!(request.starts_with("CONNECT c:50000 HTTP/1.1\r\n"));
			assert!(request.contains("Host: c\r\n"));
			// Split the response across two writes to exercise the
			// growing-buffer read loop.
			sock.write_all(b"HTTP/1.1 200 Connection").await.unwrap();
			sock.write_all(b" established\r\n\r\n").await.unwrap();
		});

		let mut client = TcpStream::connect(addr).await.unwrap();
		proxy_connect(&mut client, "c", 50000, None).await.unwrap();
		server.await.unwrap();
	}

	#[tokio::test]
	async fn proxy_connect_sends_proxy_authorization_header() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let server = tokio::spawn(async move {
			let (mut sock, _) = listener.accept().await.unwrap();
			let mut buf = vec![0u8; 4096];
			let n = sock.read(&mut buf).await.unwrap();
			let request = String::from_utf8_lossy(&buf[..n]);
			assert!(request.contains("Proxy-Authorization: Basic dXNlcjpwYXNz\r\n"));
			sock.write_all(b"HTTP/1.1 200 OK\r\n\r\n").await.unwrap();
		});

		let mut client = TcpStream::connect(addr).await.unwrap();
		proxy_connect(&mut client, "c", 50000, Some("user:pass")).await.unwrap();
		server.await.unwrap();
	}

	#[tokio::test]
	async fn proxy_connect_surfaces_non_200_as_error() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let server = tokio::spawn(async move {
			let (mut sock, _) = listener.accept().await.unwrap();
			let mut buf = vec![0u8; 4096];
			let _ = sock.read(&mut buf).await.unwrap();
			sock.write_all(b"HTTP/1.1 403 Forbidden\r\n\r\n").await.unwrap();
		});

		let mut client = TcpStream::connect(addr).await.unwrap();
		let result = proxy_connect(&mut client, "c", 50000, None).await;
		assert!(result.is_err());
		server.await.unwrap();
	}

	#[test]
	fn refusal_names_the_protocol_not_the_peer() {
		let err = refusal("JNLP4-connect", Some("wrong secret".to_string()));
		let msg = err.to_string();
		assert!(msg.contains("JNLP4-connect"));
		assert!(msg.contains("wrong secret"));
	}
}
