//! ACK filter: immediately after the protocol marker, both sides
//! exchange a fixed byte sequence; a mismatch is a refusal (`spec.md`
//! §4.8 layer 3).

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::stack::{Layer, StackHandler};
use super::BoxedDuplex;
use crate::error::{ProtocolRefusalError, RemotingError};

/// Fixed marker both sides must produce verbatim. Its exact bytes are not
/// meaningful beyond "both ends agree", so a short fixed token suffices.
pub const ACK_BYTES: &[u8] = b"JNLP4-ACK";

pub struct AckFilter;

#[async_trait::async_trait]
impl Layer for AckFilter {
	fn name(&self) -> &'static str {
		"ACK"
	}

	async fn apply(&mut self, mut stream: BoxedDuplex, _handler: &mut dyn StackHandler) -> Result<BoxedDuplex, RemotingError> {
		stream.write_all(ACK_BYTES).await?;
		stream.flush().await?;

		let mut peer_ack = vec![0u8; ACK_BYTES.len()];
		stream.read_exact(&mut peer_ack).await?;
		if peer_ack != ACK_BYTES {
			return Err(ProtocolRefusalError::Refused {
				protocol: "JNLP4".to_string(),
				reason: "ACK byte sequence mismatch".to_string(),
			}
			.into());
		}
		Ok(stream)
	}
}

#[cfg(test)]
mod tests {
	use tokio::io::duplex;

	use super::*;

	struct NoopHandler;
	impl StackHandler for NoopHandler {
		fn on_event(&mut self, _event: super::super::LayerEvent) {}
	}

	#[tokio::test]
	async fn matching_ack_succeeds() {
		let (client, mut server) = duplex(64);
		let client_task = tokio::spawn(async move {
			let mut filter = AckFilter;
			filter.apply(Box::new(client), &mut NoopHandler).await
		});
		let mut buf = vec![0u8; ACK_BYTES.len()];
		server.read_exact(&mut buf).await.unwrap();
		server.write_all(ACK_BYTES).await.unwrap();
		assert!(client_task.await.unwrap().is_ok());
	}

	#[tokio::test]
	async fn mismatched_ack_is_refused() {
		let (client, mut server) = duplex(64);
		let client_task = tokio::spawn(async move {
			let mut filter = AckFilter;
			filter.apply(Box::new(client), &mut NoopHandler).await
		});
		let mut buf = vec![0u8; ACK_BYTES.len()];
		server.read_exact(&mut buf).await.unwrap();
		server.write_all(b"not-the-ack-you-want").await.unwrap();
		assert!(client_task.await.unwrap().is_err());
	}
}
