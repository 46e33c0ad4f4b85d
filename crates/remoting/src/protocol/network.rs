//! Network layer: bridges the raw socket to the rest of the stack
//! (`spec.md` §4.8 layer 1). The source distinguishes a NIO path (hub
//! registers the `SocketChannel` directly) and a BIO path (a blocking
//! reader pumped on its own thread); both reduce, on top of Tokio, to
//! "the socket already is an `AsyncRead + AsyncWrite`", so this layer is
//! an identity transform that exists to keep the five-layer shape named
//! in the spec explicit in the stack's layer list and log lines. The
//! actual non-blocking multiplexing responsibility lives in
//! `crate::iohub`.

use super::stack::{Layer, StackHandler};
use super::BoxedDuplex;
use crate::error::RemotingError;

pub struct NetworkLayer;

#[async_trait::async_trait]
impl Layer for NetworkLayer {
	fn name(&self) -> &'static str {
		"network"
	}

	async fn apply(&mut self, stream: BoxedDuplex, _handler: &mut dyn StackHandler) -> Result<BoxedDuplex, RemotingError> {
		Ok(stream)
	}
}
