//! End-to-end `JNLP4-plaintext` happy path driven through the public
//! `InboundTcpConnector` API: resolve via a wiremock endpoint probe, then
//! run the full v4 layer stack (marker -> ACK -> headers, TLS omitted per
//! `spec.md` §4.7) against a loopback listener playing the controller.

use std::collections::HashSet;
use std::time::Duration;

use remoting_agent::config::AgentConfig;
use remoting_agent::protocol::ack::ACK_BYTES;
use remoting_agent::protocol::headers::{read_framed_headers, write_framed_headers};
use remoting_agent::protocols::ProtocolHandler;
use remoting_agent::wire;
use remoting_agent::{ConnectOutcome, InboundTcpConnector};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn disable_all_but(keep: ProtocolHandler) -> HashSet<String> {
	ProtocolHandler::preference_order()
		.iter()
		.map(|h| h.name().to_string())
		.filter(|name| name != keep.name())
		.collect()
}

#[tokio::test]
async fn v4_plaintext_happy_path_reaches_established() {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let agent_port = listener.local_addr().unwrap().port();

	let server = tokio::spawn(async move {
		let (mut socket, _) = listener.accept().await.unwrap();

		let marker = wire::read_utf(&mut socket).await.unwrap();
		assert_eq!(marker, "Protocol:JNLP4-plaintext");

		let mut their_ack = vec![0u8; ACK_BYTES.len()];
		socket.read_exact(&mut their_ack).await.unwrap();
		assert_eq!(their_ack, ACK_BYTES);
		socket.write_all(ACK_BYTES).await.unwrap();

		let client_headers = read_framed_headers(&mut socket).await.unwrap();
		assert_eq!(client_headers.get("Secret-Key"), Some(&"s3cr3t".to_string()));
		assert_eq!(client_headers.get("Node-Name"), Some(&"agent-1".to_string()));

		let mut reply = std::collections::HashMap::new();
		reply.insert("Cookie".to_string(), "freshcookie".to_string());
		write_framed_headers(&mut socket, &reply).await.unwrap();
	});

	let mock = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/tcpSlaveAgentListener/"))
		.respond_with(ResponseTemplate::new(200).insert_header("X-Jenkins-JNLP-Port", "1"))
		.mount(&mock)
		.await;

	let config = AgentConfig {
		candidates: vec![mock.uri().parse().unwrap()],
		client_name: "agent-1".to_string(),
		secret: "s3cr3t".to_string(),
		disabled_protocols: disable_all_but(ProtocolHandler::V4 { tls: false }),
		tunnel: Some(format!("127.0.0.1:{agent_port}")),
		socket_timeout: Duration::from_secs(5),
		resolve_deadline: Duration::from_secs(5),
		..Default::default()
	};

	let mut connector = InboundTcpConnector::new(config).unwrap();
	match connector.connect().await {
		ConnectOutcome::Established(handle) => {
			assert_eq!(handle.cookie.as_deref(), Some("freshcookie"));
		},
		ConnectOutcome::NoServer(e) => panic!("expected Established, got NoServer({e})"),
		ConnectOutcome::NoProtocols => panic!("expected Established, got NoProtocols"),
		ConnectOutcome::Cancelled => panic!("expected Established, got Cancelled"),
	}

	connector.close().await;
	server.await.unwrap();
}
