//! [`Layer`] trait and the [`ProtocolStack`] that threads a socket through
//! a configured sequence of them.

use crate::error::RemotingError;
use crate::wire::write_protocol_marker;

use super::{BoxedDuplex, LayerEvent};

/// Receives every event a stack's layers raise, in order. The connector
/// implements this to pump the connection-state machine of `spec.md`
/// §4.5 (`fire_before_properties` on `HandshakeCompleted`,
/// `fire_after_properties` on `HeadersReceived`), matching the "composite
/// `Handler`" described at the end of §4.8.
pub trait StackHandler: Send {
	fn on_event(&mut self, event: LayerEvent);
}

/// A single transform in the v4 pipeline. `apply` consumes the stream
/// produced by the previous layer and returns the stream the next layer
/// (or the application) should use.
#[async_trait::async_trait]
pub trait Layer: Send {
	fn name(&self) -> &'static str;

	async fn apply(&mut self, stream: BoxedDuplex, handler: &mut dyn StackHandler) -> Result<BoxedDuplex, RemotingError>;
}

/// One v4 connection attempt's layer sequence, named for logs. Built once
/// per attempt by the connector (`spec.md` §4.8, last paragraph).
pub struct ProtocolStack {
	name: String,
	layers: Vec<Box<dyn Layer>>,
}

impl ProtocolStack {
	pub fn new(name: impl Into<String>, layers: Vec<Box<dyn Layer>>) -> Self {
		ProtocolStack { name: name.into(), layers }
	}

	/// Writes the `Protocol:<NAME>` marker (common to every handshake
	/// variant, `spec.md` §4.7) and then runs each layer in order,
	/// returning the stream the channel application should take
	/// ownership of.
	pub async fn run(self, protocol_name: &str, mut stream: BoxedDuplex, handler: &mut dyn StackHandler) -> Result<BoxedDuplex, RemotingError> {
		write_protocol_marker(&mut stream, protocol_name).await?;
		self.run_layers(stream, handler).await
	}

	/// Like [`Self::run`] but without writing the protocol marker first.
	/// Used by the connector to split a v4 attempt into a
	/// pre-properties stage (network/ACK/TLS) and a headers stage, with
	/// the connection-state phase transitions driven in between rather
	/// than inferred from layer events (`spec.md` §4.8, last paragraph).
	pub async fn run_layers(mut self, mut stream: BoxedDuplex, handler: &mut dyn StackHandler) -> Result<BoxedDuplex, RemotingError> {
		for layer in &mut self.layers {
			tracing::debug!(stack = %self.name, layer = layer.name(), "running protocol-stack layer");
			stream = layer.apply(stream, handler).await?;
		}
		Ok(stream)
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;
	use std::sync::{Arc, Mutex};

	use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

	use super::super::ack::AckFilter;
	use super::super::headers::HeadersFilter;
	use super::*;

	struct RecordingHandler(Arc<Mutex<Vec<LayerEvent>>>);
	impl StackHandler for RecordingHandler {
		fn on_event(&mut self, event: LayerEvent) {
			self.0.lock().unwrap().push(event);
		}
	}

	#[tokio::test]
	async fn ack_then_headers_pipeline_round_trips() {
		let (client, mut server) = duplex(8192);
		let server_task = tokio::spawn(async move {
			let mut marker_len = [0u8; 2];
			server.read_exact(&mut marker_len).await.unwrap();
			let mut marker = vec![0u8; u16::from_be_bytes(marker_len) as usize];
			server.read_exact(&mut marker).await.unwrap();
			assert_eq!(marker, b"Protocol:JNLP4-plaintext");

			let mut ack = vec![0u8; crate::protocol::ack::ACK_BYTES.len()];
			server.read_exact(&mut ack).await.unwrap();
			server.write_all(crate::protocol::ack::ACK_BYTES).await.unwrap();

			let mut count_buf = [0u8; 2];
			server.read_exact(&mut count_buf).await.unwrap();
			for _ in 0..u16::from_be_bytes(count_buf) {
				let _k = crate::wire::read_utf(&mut server).await.unwrap();
				let _v = crate::wire::read_utf(&mut server).await.unwrap();
			}
			let mut reply = HashMap::new();
			reply.insert("Cookie".to_string(), "abc".to_string());
			crate::protocol::headers::write_framed_headers(&mut server, &reply).await.unwrap();
			server
		});

		let events = Arc::new(Mutex::new(Vec::new()));
		let mut handler = RecordingHandler(events.clone());
		let mut local_headers = HashMap::new();
		local_headers.insert("Client-Name".to_string(), "agent-1".to_string());
		let stack = ProtocolStack::new(
			"test-stack",
			vec![Box::new(AckFilter), Box::new(HeadersFilter::new(local_headers))],
		);
		let _stream = stack.run("JNLP4-plaintext", Box::new(client), &mut handler).await.unwrap();
		server_task.await.unwrap();

		let recorded = events.lock().unwrap();
		assert_eq!(recorded.len(), 1);
		match &recorded[0] {
			LayerEvent::HeadersReceived(map) => assert_eq!(map.get("Cookie"), Some(&"abc".to_string())),
			other => panic!("unexpected event {other:?}"),
		}
	}
}
