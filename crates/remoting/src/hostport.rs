//! Parsing for `host:port` and bracketed-IPv6 `[::1]:port` address strings,
//! with optional per-component defaults (used both for tunnel overrides and
//! for the `no_proxy` host matching in [`crate::proxy`]).

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum InvalidAddress {
	#[error("unbalanced brackets in address {0:?}")]
	UnbalancedBrackets(String),
	#[error("missing ':' separating host and port in {0:?}")]
	MissingColon(String),
	#[error("port {0:?} is not numeric")]
	PortNotNumeric(String),
	#[error("port {0} is out of range [0, 65535]")]
	PortOutOfRange(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPort {
	pub host: String,
	pub port: u16,
}

impl HostPort {
	/// Parses `s`, falling back to `default_host`/`default_port` for any
	/// component left empty. A bare `[ipv6]` with no trailing `:port`
	/// also falls back to `default_port`.
	pub fn parse(
		s: &str,
		default_host: Option<&str>,
		default_port: Option<u16>,
	) -> Result<HostPort, InvalidAddress> {
		let s = s.trim();

		let (host_part, port_part) = if let Some(rest) = s.strip_prefix('[') {
			let close = rest
				.find(']')
				.ok_or_else(|| InvalidAddress::UnbalancedBrackets(s.to_string()))?;
			let host = &rest[..close];
			let tail = &rest[close + 1..];
			let port = match tail.strip_prefix(':') {
				Some(p) => p,
				None if tail.is_empty() => "",
				None => return Err(InvalidAddress::MissingColon(s.to_string())),
			};
			(host, port)
		} else {
			let idx = s
				.rfind(':')
				.ok_or_else(|| InvalidAddress::MissingColon(s.to_string()))?;
			(&s[..idx], &s[idx + 1..])
		};

		let host = if host_part.is_empty() {
			default_host
				.ok_or_else(|| InvalidAddress::MissingColon(s.to_string()))?
				.to_string()
		} else {
			host_part.to_string()
		};

		let port = if port_part.is_empty() {
			default_port.ok_or_else(|| InvalidAddress::PortNotNumeric(port_part.to_string()))?
		} else {
			let parsed: i64 = port_part
				.parse()
				.map_err(|_| InvalidAddress::PortNotNumeric(port_part.to_string()))?;
			if !(0..=65535).contains(&parsed) {
				return Err(InvalidAddress::PortOutOfRange(parsed));
			}
			parsed as u16
		};

		Ok(HostPort { host, port })
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_plain_host_port() {
		let hp = HostPort::parse("example.org:50000", None, None).unwrap();
		assert_eq!(hp.host, "example.org");
		assert_eq!(hp.port, 50000);
	}

	#[test]
	fn parses_bracketed_ipv6() {
		let hp = HostPort::parse("[::1]:50000", None, None).unwrap();
		assert_eq!(hp.host, "::1");
		assert_eq!(hp.port, 50000);
	}

	#[test]
	fn bracketed_ipv6_without_port_uses_default() {
		let hp = HostPort::parse("[::1]", None, Some(80)).unwrap();
		assert_eq!(hp.host, "::1");
		assert_eq!(hp.port, 80);
	}

	#[test]
	fn empty_host_falls_back_to_default() {
		let hp = HostPort::parse(":50000", Some("fallback"), None).unwrap();
		assert_eq!(hp.host, "fallback");
		assert_eq!(hp.port, 50000);
	}

	#[test]
	fn empty_port_falls_back_to_default() {
		let hp = HostPort::parse("example.org:", None, Some(443)).unwrap();
		assert_eq!(hp.host, "example.org");
		assert_eq!(hp.port, 443);
	}

	#[test]
	fn last_colon_wins_for_plain_hosts() {
		// Not bracketed, so this is an invalid-looking IPv6 literal rather
		// than a host with multiple colons; splitting on the *last* colon
		// keeps the parser well defined either way.
		let hp = HostPort::parse("a:b:50000", None, None).unwrap();
		assert_eq!(hp.host, "a:b");
		assert_eq!(hp.port, 50000);
	}

	#[test]
	fn rejects_unbalanced_brackets() {
		assert_eq!(
			HostPort::parse("[::1:50000", None, None),
			Err(InvalidAddress::UnbalancedBrackets("[::1:50000".to_string()))
		);
	}

	#[test]
	fn rejects_missing_colon() {
		assert_eq!(
			HostPort::parse("example.org", None, None),
			Err(InvalidAddress::MissingColon("example.org".to_string()))
		);
	}

	#[test]
	fn rejects_non_numeric_port() {
		assert!(matches!(
			HostPort::parse("example.org:abc", None, None),
			Err(InvalidAddress::PortNotNumeric(_))
		));
	}

	#[test]
	fn rejects_out_of_range_port() {
		assert_eq!(
			HostPort::parse("example.org:99999", None, None),
			Err(InvalidAddress::PortOutOfRange(99999))
		);
	}
}
