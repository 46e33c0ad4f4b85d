//! Connection-headers filter: sends the local headers map as
//! length-prefixed key/value pairs and reads the peer's, firing
//! `ReceiveHeaders` upward (`spec.md` §4.8 layer 5). A peer-sent
//! `Refused` header terminates the stack with a `ConnectionRefusalException`
//! equivalent.

use std::collections::HashMap;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::stack::{Layer, StackHandler};
use super::{BoxedDuplex, LayerEvent};
use crate::error::{ProtocolRefusalError, RemotingError};
use crate::wire::{read_utf, write_utf};

pub async fn write_framed_headers<W: AsyncWrite + Unpin>(w: &mut W, headers: &HashMap<String, String>) -> std::io::Result<()> {
	let count: u16 = headers
		.len()
		.try_into()
		.map_err(|_| std::io::Error::other("too many connection headers for a u16 count prefix"))?;
	w.write_all(&count.to_be_bytes()).await?;
	for (k, v) in headers {
		write_utf(w, k).await?;
		write_utf(w, v).await?;
	}
	w.flush().await
}

pub async fn read_framed_headers<R: AsyncRead + Unpin>(r: &mut R) -> std::io::Result<HashMap<String, String>> {
	let mut count_buf = [0u8; 2];
	r.read_exact(&mut count_buf).await?;
	let count = u16::from_be_bytes(count_buf);
	let mut map = HashMap::with_capacity(count as usize);
	for _ in 0..count {
		let k = read_utf(r).await?;
		let v = read_utf(r).await?;
		map.insert(k, v);
	}
	Ok(map)
}

pub struct HeadersFilter {
	local_headers: HashMap<String, String>,
}

impl HeadersFilter {
	pub fn new(local_headers: HashMap<String, String>) -> Self {
		HeadersFilter { local_headers }
	}
}

#[async_trait::async_trait]
impl Layer for HeadersFilter {
	fn name(&self) -> &'static str {
		"headers"
	}

	async fn apply(&mut self, mut stream: BoxedDuplex, handler: &mut dyn StackHandler) -> Result<BoxedDuplex, RemotingError> {
		write_framed_headers(&mut stream, &self.local_headers).await?;
		let peer_headers = read_framed_headers(&mut stream).await?;
		if let Some(reason) = peer_headers.get("Refused") {
			return Err(ProtocolRefusalError::Refused {
				protocol: "JNLP4".to_string(),
				reason: reason.clone(),
			}
			.into());
		}
		handler.on_event(LayerEvent::HeadersReceived(peer_headers));
		Ok(stream)
	}
}

#[cfg(test)]
mod tests {
	use tokio::io::duplex;

	use super::*;

	#[tokio::test]
	async fn framed_headers_round_trip() {
		let mut headers = HashMap::new();
		headers.insert("Client-Name".to_string(), "agent-1".to_string());
		headers.insert("Cookie".to_string(), "feedface".to_string());
		let mut buf = Vec::new();
		write_framed_headers(&mut buf, &headers).await.unwrap();
		let mut cursor = std::io::Cursor::new(buf);
		let got = read_framed_headers(&mut cursor).await.unwrap();
		assert_eq!(got, headers);
	}

	struct NoopHandler;
	impl StackHandler for NoopHandler {
		fn on_event(&mut self, _event: LayerEvent) {}
	}

	#[tokio::test]
	async fn peer_refusal_header_surfaces_as_error() {
		let (client, mut server) = duplex(4096);
		let mut handler = NoopHandler;
		let mut filter = HeadersFilter::new(HashMap::new());
		let client_task = tokio::spawn(async move { filter.apply(Box::new(client), &mut handler).await });

		let _ours = read_framed_headers(&mut server).await.unwrap();
		let mut refusal = HashMap::new();
		refusal.insert("Refused".to_string(), "wrong secret".to_string());
		write_framed_headers(&mut server, &refusal).await.unwrap();

		assert!(client_task.await.unwrap().is_err());
	}
}
