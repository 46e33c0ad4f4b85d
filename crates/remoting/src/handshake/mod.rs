//! Legacy handshake variants v1-v3 (`spec.md` §4.7). Each runs over a
//! plain `AsyncRead + AsyncWrite` socket on a dedicated task -- the
//! idiomatic-Tokio rendition of "a blocking dispatch thread per legacy
//! handshake" from an injected executor (`spec.md` §5).

pub mod v1;
pub mod v2;
pub mod v3;

use std::collections::HashMap;

use crate::cookie::Cookie;
use crate::error::Result;

/// Headers the connector sends on every legacy handshake attempt before
/// the protocol-specific exchange begins.
#[derive(Debug, Clone, Default)]
pub struct OutboundHeaders {
	pub secret: String,
	pub client_name: String,
	pub cookie: Option<Cookie>,
}

/// Result of a successful legacy handshake: the remote-provided property
/// map (v1 has none) and, for v3, the new cookie and channel ciphers to
/// wrap the subsequent byte stream in.
pub struct HandshakeResult {
	pub properties: HashMap<String, String>,
	pub new_cookie: Option<Cookie>,
}

pub(crate) type HandshakeOutcome = Result<HandshakeResult>;
