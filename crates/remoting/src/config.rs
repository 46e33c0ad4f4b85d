//! Typed configuration assembled from CLI flags/environment, independent
//! of how it is parsed (`spec.md` §1 excludes CLI flag parsing from the
//! core; `remoting-app` is the only thing that owns a `clap::Parser`).

use std::collections::HashSet;
use std::time::Duration;

use url::Url;

use crate::protocols::ProtocolEnablement;

/// Default per `spec.md` §4.6 step 6a: 30 minutes.
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, serde::Serialize)]
pub struct AgentConfig {
	pub candidates: Vec<Url>,
	pub client_name: String,
	pub secret: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub credentials: Option<(String, String)>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub proxy_credentials: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tunnel: Option<String>,
	pub disable_https_cert_validation: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub protocol_names_override: Option<Vec<String>>,
	#[serde(skip)]
	pub disabled_protocols: HashSet<String>,
	#[serde(with = "humantime_serde_duration")]
	pub socket_timeout: Duration,
	pub keep_alive: bool,
	pub no_proxy: Vec<String>,
	/// Deadline for the retry harness wrapped around endpoint resolution
	/// (`spec.md` §4.6 step 3).
	#[serde(with = "humantime_serde_duration")]
	pub resolve_deadline: Duration,
}

impl Default for AgentConfig {
	fn default() -> Self {
		AgentConfig {
			candidates: Vec::new(),
			client_name: String::new(),
			secret: String::new(),
			credentials: None,
			proxy_credentials: None,
			tunnel: None,
			disable_https_cert_validation: false,
			protocol_names_override: None,
			disabled_protocols: HashSet::new(),
			socket_timeout: DEFAULT_SOCKET_TIMEOUT,
			keep_alive: true,
			no_proxy: Vec::new(),
			resolve_deadline: Duration::from_secs(60),
		}
	}
}

impl AgentConfig {
	pub fn protocol_enablement(&self) -> ProtocolEnablement {
		ProtocolEnablement {
			disabled: self.disabled_protocols.clone(),
		}
	}
}

/// Minimal `serde::with` module so `Duration` serializes as a
/// human-readable string in the config dump logged at startup, mirroring
/// `humantime`'s role elsewhere in the workspace dependency stack.
mod humantime_serde_duration {
	use std::time::Duration;

	use serde::Serializer;

	pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
		s.serialize_str(&humantime::format_duration(*d).to_string())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_socket_timeout_is_thirty_minutes() {
		assert_eq!(AgentConfig::default().socket_timeout, Duration::from_secs(1800));
	}
}
