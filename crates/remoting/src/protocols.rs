//! Protocol handler enumeration, negotiation, and the default listener
//! chain installed by the connector.
//!
//! `spec.md` §9 calls for a closed sum type rather than a handler class
//! hierarchy: `ProtocolHandler` carries exactly the five wire-compatible
//! variants of `spec.md` §4.7/§4.8, each immutable and `enabled`-gated by
//! configuration.

use std::collections::HashSet;

use crate::cookie::Cookie;
use crate::endpoint::{Endpoint, InstanceIdentity};
use crate::error::AuthenticationError;
use crate::state::{ConnectionState, Listener, ListenerAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolHandler {
	V1,
	V2,
	V3,
	V4 { tls: bool },
	V4Proxy,
}

impl ProtocolHandler {
	pub fn name(&self) -> &'static str {
		match self {
			ProtocolHandler::V1 => "JNLP-connect",
			ProtocolHandler::V2 => "JNLP2-connect",
			ProtocolHandler::V3 => "JNLP3-connect",
			ProtocolHandler::V4 { tls: true } => "JNLP4-connect",
			ProtocolHandler::V4 { tls: false } => "JNLP4-plaintext",
			ProtocolHandler::V4Proxy => "JNLP4-connect-proxy",
		}
	}

	/// Declared preference order of `spec.md` §4.6 step 6: v4 TLS first,
	/// then v4 plaintext, then v3, v2, v1; v4-proxy is appended last since
	/// it is only selected when a reverse proxy re-multiplexes the
	/// protocol name, not as a general fallback.
	pub fn preference_order() -> &'static [ProtocolHandler] {
		&[
			ProtocolHandler::V4 { tls: true },
			ProtocolHandler::V4 { tls: false },
			ProtocolHandler::V3,
			ProtocolHandler::V2,
			ProtocolHandler::V1,
			ProtocolHandler::V4Proxy,
		]
	}
}

/// Local enablement, driven by `org.jenkinsci.remoting.engine.<Class>.disabled`-
/// style configuration in the source; here a plain set of disabled names.
#[derive(Debug, Clone, Default)]
pub struct ProtocolEnablement {
	pub disabled: HashSet<String>,
}

impl ProtocolEnablement {
	pub fn is_enabled(&self, handler: ProtocolHandler) -> bool {
		!self.disabled.contains(handler.name())
	}

	pub fn enabled_handlers(&self) -> Vec<ProtocolHandler> {
		ProtocolHandler::preference_order()
			.iter()
			.copied()
			.filter(|h| self.is_enabled(*h))
			.collect()
	}
}

/// Computes the negotiable set: locally-enabled handlers intersected with
/// the server-advertised protocol names (`None` on the endpoint means
/// "all"), preserving declared preference order.
pub fn negotiable(local_enabled: &[ProtocolHandler], server_advertised: Option<&HashSet<String>>) -> Vec<ProtocolHandler> {
	local_enabled
		.iter()
		.copied()
		.filter(|h| server_advertised.is_none_or(|names| names.contains(h.name())))
		.collect()
}

/// The identity-verifying listener installed by the connector for every
/// attempt (`spec.md` §4.6, "Listener behavior installed by the
/// connector"). TLS peer-certificate checking for v4 is performed
/// upstream by the TLS layer's custom verifier; this listener only
/// inspects the already-validated public key the connector captured from
/// the TLS layer's `HandshakeCompleted` event (see
/// `connector::PeerIdentitySink`) and decides approve/reject. The
/// connection-state `stash` is reserved for listener-private state set
/// from `APPROVED` onward (`spec.md` §3) and is not used for this.
pub struct IdentityVerifier {
	expected: Option<InstanceIdentity>,
	peer_identity: std::sync::Arc<std::sync::Mutex<Option<InstanceIdentity>>>,
	cookie_sink: std::sync::Arc<std::sync::Mutex<Option<Cookie>>>,
}

impl IdentityVerifier {
	pub fn new(
		endpoint: &Endpoint,
		peer_identity: std::sync::Arc<std::sync::Mutex<Option<InstanceIdentity>>>,
		cookie_sink: std::sync::Arc<std::sync::Mutex<Option<Cookie>>>,
	) -> Self {
		IdentityVerifier {
			expected: endpoint.instance_identity.clone(),
			peer_identity,
			cookie_sink,
		}
	}
}

impl Listener for IdentityVerifier {
	fn before_properties(&mut self, _state: &ConnectionState) -> ListenerAction {
		let Some(expected) = &self.expected else {
			return ListenerAction::Continue;
		};
		let Some(peer) = self.peer_identity.lock().unwrap().clone() else {
			// No TLS session on this attempt (legacy or plaintext v4):
			// identity pinning does not apply.
			return ListenerAction::Continue;
		};
		if peer == *expected {
			tracing::info!("remote identity confirmed");
			ListenerAction::Continue
		} else {
			let err = AuthenticationError::IdentityMismatch {
				expected: expected.fingerprint(),
				actual: peer.fingerprint(),
			};
			ListenerAction::Reject(err.to_string())
		}
	}

	fn after_properties(&mut self, _state: &ConnectionState) -> ListenerAction {
		ListenerAction::Approve
	}

	fn before_channel(&mut self, state: &mut ConnectionState) {
		if let Some(builder) = state.channel_builder_mut() {
			builder.binary_mode = true;
		}
	}

	fn after_channel(&mut self, state: &ConnectionState) {
		if let Some(channel) = state.channel() {
			*self.cookie_sink.lock().unwrap() = channel.cookie.clone();
		}
	}
}

/// Builds the listener chain the connector installs on every attempt:
/// just the identity verifier today (`spec.md` §4.6 enumerates a single
/// listener; a JAR cache hook, if present, would be stitched in here too,
/// but the JAR cache itself is out of scope per `spec.md` §1).
pub fn default_listener_chain(
	endpoint: &Endpoint,
	peer_identity: std::sync::Arc<std::sync::Mutex<Option<InstanceIdentity>>>,
	cookie_sink: std::sync::Arc<std::sync::Mutex<Option<Cookie>>>,
) -> Vec<Box<dyn Listener>> {
	vec![Box::new(IdentityVerifier::new(endpoint, peer_identity, cookie_sink))]
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn negotiable_intersects_preserving_order() {
		let local = vec![ProtocolHandler::V4 { tls: true }, ProtocolHandler::V3, ProtocolHandler::V1];
		let advertised: HashSet<String> = ["JNLP-connect".to_string(), "JNLP3-connect".to_string()].into_iter().collect();
		let result = negotiable(&local, Some(&advertised));
		assert_eq!(result, vec![ProtocolHandler::V3, ProtocolHandler::V1]);
	}

	#[test]
	fn negotiable_none_advertised_means_all() {
		let local = vec![ProtocolHandler::V4 { tls: true }, ProtocolHandler::V1];
		let result = negotiable(&local, None);
		assert_eq!(result, local);
	}

	#[test]
	fn disabled_handlers_are_excluded() {
		let mut enablement = ProtocolEnablement::default();
		enablement.disabled.insert("JNLP-connect".to_string());
		assert!(!enablement.is_enabled(ProtocolHandler::V1));
		assert!(enablement.is_enabled(ProtocolHandler::V3));
	}

	fn endpoint_with_identity(identity: Option<InstanceIdentity>) -> Endpoint {
		Endpoint {
			host: "c".to_string(),
			port: 50000,
			instance_identity: identity,
			supported_protocols: None,
			service_url: "http://c:8080/".parse().unwrap(),
			proxy_credentials: None,
		}
	}

	/// E2E-2 of `spec.md` §8: a TLS session presenting a public key that
	/// does not match the endpoint's advertised `X-Instance-Identity`
	/// rejects the attempt in `before_properties`, with the listener
	/// reporting both fingerprints.
	#[test]
	fn identity_mismatch_rejects_before_properties() {
		let expected = InstanceIdentity::from_der(vec![1, 2, 3, 4]);
		let actual = InstanceIdentity::from_der(vec![9, 9, 9, 9]);
		let endpoint = endpoint_with_identity(Some(expected.clone()));
		let peer_identity = std::sync::Arc::new(std::sync::Mutex::new(Some(actual.clone())));
		let cookie_sink = std::sync::Arc::new(std::sync::Mutex::new(None));
		let listeners = default_listener_chain(&endpoint, peer_identity, cookie_sink);
		let mut state = ConnectionState::new(crate::state::remote_description_for(&endpoint), listeners);

		let outcome = state.fire_before_properties();
		assert_eq!(outcome, crate::state::DispatchOutcome::Rejected);
		assert!(state.is_rejected());
		let reason = state.rejection.clone().unwrap();
		assert!(reason.contains(&expected.fingerprint()));
		assert!(reason.contains(&actual.fingerprint()));
	}

	/// Matching identities (or no TLS session at all, i.e. a legacy or
	/// plaintext v4 attempt) continue past `before_properties` and
	/// approve once `after_properties` runs.
	#[test]
	fn matching_identity_is_approved() {
		let expected = InstanceIdentity::from_der(vec![5, 5, 5, 5]);
		let endpoint = endpoint_with_identity(Some(expected.clone()));
		let peer_identity = std::sync::Arc::new(std::sync::Mutex::new(Some(expected)));
		let cookie_sink = std::sync::Arc::new(std::sync::Mutex::new(None));
		let listeners = default_listener_chain(&endpoint, peer_identity, cookie_sink);
		let mut state = ConnectionState::new(crate::state::remote_description_for(&endpoint), listeners);

		assert_eq!(state.fire_before_properties(), crate::state::DispatchOutcome::Pending);
		assert_eq!(state.fire_after_properties(Default::default()), crate::state::DispatchOutcome::Approved);
	}
}
