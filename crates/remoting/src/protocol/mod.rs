//! The v4 layered protocol stack (`spec.md` §4.8): network bridge -> ACK
//! filter -> TLS engine filter -> connection-headers filter -> channel
//! application. Each layer transforms the duplex byte stream and may fire
//! exactly one upward event before application bytes flow.
//!
//! Layers are type-erased behind [`BoxedDuplex`] since each one changes
//! the concrete I/O type (a raw socket becomes a `TlsStream` once the TLS
//! layer runs); `ProtocolStack` threads a single trait object through the
//! configured layer sequence instead of composing generics, matching the
//! "compose by vector of layers" design note in `spec.md` §9.

pub mod ack;
pub mod headers;
pub mod network;
pub mod stack;
pub mod tls;

pub use stack::{Layer, ProtocolStack, StackHandler};

use tokio::io::{AsyncRead, AsyncWrite};

/// Anything that can play the role of "the stream below this layer":
/// a raw `TcpStream`, a `TlsStream<TcpStream>`, or (in tests) an in-memory
/// duplex pipe.
pub trait DuplexIo: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> DuplexIo for T {}

pub type BoxedDuplex = Box<dyn DuplexIo>;

/// Events a layer may raise upward, consumed by the composite
/// [`StackHandler`] that pumps the connection-state machine of §4.5.
#[derive(Debug, Clone)]
pub enum LayerEvent {
	HandshakeCompleted { peer_identity: Option<crate::endpoint::InstanceIdentity> },
	HeadersReceived(std::collections::HashMap<String, String>),
}
