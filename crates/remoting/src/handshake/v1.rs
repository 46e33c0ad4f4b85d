//! `JNLP-connect`: the original plain handshake. No properties are
//! exchanged; a `Welcome` line is the only signal of success.

use tokio::io::{AsyncRead, AsyncWrite};

use super::{HandshakeOutcome, HandshakeResult, OutboundHeaders};
use crate::wire::{read_line, welcome_or_refusal, write_protocol_marker, write_utf};

pub const NAME: &str = "JNLP-connect";

pub async fn connect<S: AsyncRead + AsyncWrite + Unpin>(socket: &mut S, headers: &OutboundHeaders) -> HandshakeOutcome {
	write_protocol_marker(socket, NAME).await?;
	write_utf(socket, &headers.secret).await?;
	write_utf(socket, &headers.client_name).await?;

	let line = read_line(socket).await?;
	welcome_or_refusal(NAME, line)?;

	Ok(HandshakeResult {
		properties: Default::default(),
		new_cookie: None,
	})
}

#[cfg(test)]
mod tests {
	use tokio::io::duplex;

	use super::*;

	#[tokio::test]
	async fn happy_path_reads_welcome() {
		let (mut client, mut server) = duplex(4096);
		let headers = OutboundHeaders {
			secret: "s".into(),
			client_name: "a".into(),
			cookie: None,
		};
		let client_task = tokio::spawn(async move { connect(&mut client, &headers).await });

		let marker = crate::wire::read_utf(&mut server).await.unwrap();
		assert_eq!(marker, "Protocol:JNLP-connect");
		let secret = crate::wire::read_utf(&mut server).await.unwrap();
		assert_eq!(secret, "s");
		let name = crate::wire::read_utf(&mut server).await.unwrap();
		assert_eq!(name, "a");
		crate::wire::write_line(&mut server, "Welcome").await.unwrap();

		let result = client_task.await.unwrap();
		assert!(result.is_ok());
	}

	#[tokio::test]
	async fn refusal_line_is_surfaced_as_error() {
		let (mut client, mut server) = duplex(4096);
		let headers = OutboundHeaders {
			secret: "bad".into(),
			client_name: "a".into(),
			cookie: None,
		};
		let client_task = tokio::spawn(async move { connect(&mut client, &headers).await });

		let _ = crate::wire::read_utf(&mut server).await.unwrap();
		let _ = crate::wire::read_utf(&mut server).await.unwrap();
		let _ = crate::wire::read_utf(&mut server).await.unwrap();
		crate::wire::write_line(&mut server, "secret mismatch").await.unwrap();

		let result = client_task.await.unwrap();
		assert!(result.is_err());
	}
}
