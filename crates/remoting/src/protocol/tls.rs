//! TLS engine filter (`spec.md` §4.8 layer 4). Wraps the byte stream in a
//! `rustls` client session and fires `HandshakeCompleted` once the
//! handshake finishes, carrying the peer's public key so the
//! connection-state listener can pin it against the endpoint's advertised
//! instance identity (`spec.md` §4.6 step 2, E2E-2).
//!
//! Grounded on the teacher's TLS client-config construction in
//! `control/mod.rs` (`RootCert::to_client_config`), adapted from an
//! externally-rooted trust store to pinned-public-key trust: the source's
//! "delegating trust manager" accepts any certificate at the TLS layer
//! and defers the actual accept/reject decision to the connection-state
//! listener, so a mismatch surfaces as a clean `REJECTED` attempt instead
//! of a raw handshake failure.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::TlsConnector;

use super::stack::{Layer, StackHandler};
use super::{BoxedDuplex, LayerEvent};
use crate::endpoint::InstanceIdentity;
use crate::error::{RemotingError, UnreachableError};

#[derive(Debug)]
struct AcceptAnyCertVerifier;

impl ServerCertVerifier for AcceptAnyCertVerifier {
	fn verify_server_cert(
		&self,
		_end_entity: &CertificateDer<'_>,
		_intermediates: &[CertificateDer<'_>],
		_server_name: &ServerName<'_>,
		_ocsp_response: &[u8],
		_now: UnixTime,
	) -> Result<ServerCertVerified, rustls::Error> {
		Ok(ServerCertVerified::assertion())
	}

	fn verify_tls12_signature(
		&self,
		_message: &[u8],
		_cert: &CertificateDer<'_>,
		_dss: &DigitallySignedStruct,
	) -> Result<HandshakeSignatureValid, rustls::Error> {
		Ok(HandshakeSignatureValid::assertion())
	}

	fn verify_tls13_signature(
		&self,
		_message: &[u8],
		_cert: &CertificateDer<'_>,
		_dss: &DigitallySignedStruct,
	) -> Result<HandshakeSignatureValid, rustls::Error> {
		Ok(HandshakeSignatureValid::assertion())
	}

	fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
		vec![
			SignatureScheme::RSA_PKCS1_SHA256,
			SignatureScheme::RSA_PKCS1_SHA384,
			SignatureScheme::RSA_PKCS1_SHA512,
			SignatureScheme::ECDSA_NISTP256_SHA256,
			SignatureScheme::ECDSA_NISTP384_SHA384,
			SignatureScheme::RSA_PSS_SHA256,
			SignatureScheme::RSA_PSS_SHA384,
			SignatureScheme::RSA_PSS_SHA512,
			SignatureScheme::ED25519,
		]
	}
}

/// Builds the `rustls::ClientConfig` shared by every v4-TLS attempt. A
/// fresh `TlsEngineFilter` is constructed per attempt, but the config
/// itself (and its ALPN advertisement) is stable across reconnects.
pub fn client_config() -> Arc<ClientConfig> {
	let mut cfg = ClientConfig::builder()
		.dangerous()
		.with_custom_certificate_verifier(Arc::new(AcceptAnyCertVerifier))
		.with_no_client_auth();
	cfg.alpn_protocols = vec![b"remoting4".to_vec()];
	Arc::new(cfg)
}

pub struct TlsEngineFilter {
	connector: TlsConnector,
	server_name: ServerName<'static>,
}

impl TlsEngineFilter {
	pub fn new(config: Arc<ClientConfig>, host: &str) -> Result<Self, RemotingError> {
		let server_name = ServerName::try_from(host.to_string())
			.map_err(|_| RemotingError::Internal(format!("{host:?} is not a valid TLS server name")))?;
		Ok(TlsEngineFilter {
			connector: TlsConnector::from(config),
			server_name,
		})
	}
}

fn extract_instance_identity(cert: &CertificateDer<'_>) -> Option<InstanceIdentity> {
	let (_, parsed) = x509_parser::parse_x509_certificate(cert.as_ref()).ok()?;
	Some(InstanceIdentity::from_der(parsed.public_key().raw.to_vec()))
}

#[async_trait::async_trait]
impl Layer for TlsEngineFilter {
	fn name(&self) -> &'static str {
		"TLS"
	}

	async fn apply(&mut self, stream: BoxedDuplex, handler: &mut dyn StackHandler) -> Result<BoxedDuplex, RemotingError> {
		let tls_stream = self
			.connector
			.connect(self.server_name.clone(), stream)
			.await
			.map_err(|e| RemotingError::Unreachable(UnreachableError::ConnectFailed(e.into())))?;

		let (_io, session) = tls_stream.get_ref();
		let peer_identity = session.peer_certificates().and_then(|certs| certs.first()).and_then(extract_instance_identity);
		handler.on_event(LayerEvent::HandshakeCompleted { peer_identity });

		Ok(Box::new(tls_stream))
	}
}
