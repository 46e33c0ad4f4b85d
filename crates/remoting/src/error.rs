//! Error taxonomy for the agent connection core.
//!
//! These are *kinds*, not a single catch-all error type: each carries enough
//! context to produce the one-line status messages a caller is expected to
//! print, while keeping the underlying cause chain available to `tracing`.

use std::fmt;

/// Top level error kind returned anywhere along resolve -> negotiate ->
/// handshake.
#[derive(thiserror::Error, Debug)]
pub enum RemotingError {
	/// No candidate URL produced a valid endpoint. Carries the first
	/// candidate's failure as the visible cause; later candidates are
	/// recorded as suppressed context only (see [`ResolutionError`]).
	#[error("{0}")]
	Resolution(#[from] ResolutionError),

	/// The TCP/proxy connect failed, or the wait-for-ready probe never
	/// succeeded before its deadline.
	#[error("{0}")]
	Unreachable(#[from] UnreachableError),

	/// Every negotiable protocol was tried and refused.
	#[error("{0}")]
	ProtocolRefusal(#[from] ProtocolRefusalError),

	/// A v3 challenge mismatch, v4 wrong secret, or certificate mismatch.
	#[error("{0}")]
	AuthenticationFailure(#[from] AuthenticationError),

	/// The deadline was exhausted or the operation was cancelled.
	#[error("cancelled: {0}")]
	Cancelled(String),

	/// A bug: state machine misuse or invalid configuration.
	#[error("internal error: {0}")]
	Internal(String),
}

#[derive(Debug)]
pub struct ResolutionError {
	/// One entry per candidate URL, in probe order.
	pub candidate_failures: Vec<(String, anyhow::Error)>,
}

impl fmt::Display for ResolutionError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.candidate_failures.first() {
			Some((url, cause)) => {
				write!(f, "could not locate server among {} candidate(s); first failure for {url}: {cause}",
					self.candidate_failures.len())?;
				for (url, cause) in self.candidate_failures.iter().skip(1) {
					write!(f, " [suppressed: {url}: {cause}]")?;
				}
				Ok(())
			},
			None => write!(f, "no candidate URLs were provided"),
		}
	}
}

impl std::error::Error for ResolutionError {}

#[derive(thiserror::Error, Debug)]
pub enum UnreachableError {
	#[error("port not reachable: {0}")]
	PortNotReachable(String),
	#[error("connect failed: {0}")]
	ConnectFailed(#[source] anyhow::Error),
	#[error("wait-for-ready deadline exceeded")]
	WaitForReadyTimedOut,
	/// A socket dropped, reset, or otherwise failed mid-exchange, as
	/// opposed to never connecting at all.
	#[error("i/o error: {0}")]
	Io(#[from] std::io::Error),
}

/// Lets every layer and handshake function propagate a raw `io::Error`
/// with `?` directly into [`RemotingError`] (most call sites return this
/// type, not [`UnreachableError`]); `thiserror`'s `#[from]` only chains one
/// level; this completes the chain from `io::Error`.
impl From<std::io::Error> for RemotingError {
	fn from(e: std::io::Error) -> Self {
		RemotingError::Unreachable(UnreachableError::Io(e))
	}
}

#[derive(thiserror::Error, Debug)]
pub enum ProtocolRefusalError {
	#[error("{protocol}: {reason}")]
	Refused { protocol: String, reason: String },
	#[error("no protocols accepted by the controller")]
	NoneAccepted,
	#[error("no protocols enabled locally")]
	NoneEnabled,
}

#[derive(thiserror::Error, Debug)]
pub enum AuthenticationError {
	#[error("challenge response mismatch")]
	ChallengeMismatch,
	#[error("secret did not match")]
	SecretMismatch,
	#[error("certificate identity mismatch: expected fingerprint {expected}, got {actual}")]
	IdentityMismatch { expected: String, actual: String },
}

pub type Result<T> = std::result::Result<T, RemotingError>;
