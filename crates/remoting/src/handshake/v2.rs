//! `JNLP2-connect`: headers serialized as a properties-file blob sent as a
//! single length-prefixed UTF string, followed by a `Welcome` line and a
//! `key: value\n` response header block.

use tokio::io::{AsyncRead, AsyncWrite};

use super::{HandshakeOutcome, HandshakeResult, OutboundHeaders};
use crate::wire::{read_header_block, read_line, welcome_or_refusal, write_protocol_marker, write_utf};

pub const NAME: &str = "JNLP2-connect";

/// `java.util.Properties`-style serialization: `key=value`, one per line,
/// no ordering guarantees relied upon by either side.
fn serialize_properties(headers: &OutboundHeaders) -> String {
	let mut out = String::new();
	out.push_str(&format!("Secret-Key={}\n", headers.secret));
	out.push_str(&format!("Node-Name={}\n", headers.client_name));
	if let Some(cookie) = &headers.cookie {
		out.push_str(&format!("Cookie={cookie}\n"));
	}
	out
}

pub async fn connect<S: AsyncRead + AsyncWrite + Unpin>(socket: &mut S, headers: &OutboundHeaders) -> HandshakeOutcome {
	write_protocol_marker(socket, NAME).await?;
	write_utf(socket, &serialize_properties(headers)).await?;

	let line = read_line(socket).await?;
	welcome_or_refusal(NAME, line)?;

	let properties = read_header_block(socket).await?;
	Ok(HandshakeResult {
		properties,
		new_cookie: None,
	})
}

#[cfg(test)]
mod tests {
	use tokio::io::duplex;

	use super::*;

	#[tokio::test]
	async fn happy_path_parses_response_headers() {
		let (mut client, mut server) = duplex(8192);
		let headers = OutboundHeaders {
			secret: "s".into(),
			client_name: "a".into(),
			cookie: Some(crate::cookie::Cookie::from_hex("feed")),
		};
		let client_task = tokio::spawn(async move { connect(&mut client, &headers).await });

		let _marker = crate::wire::read_utf(&mut server).await.unwrap();
		let blob = crate::wire::read_utf(&mut server).await.unwrap();
		assert!(blob.contains("Secret-Key=s"));
		assert!(blob.contains("Cookie=feed"));
		crate::wire::write_line(&mut server, "Welcome").await.unwrap();
		let mut resp = std::collections::HashMap::new();
		resp.insert("Cookie".to_string(), "newcookie".to_string());
		crate::wire::write_header_block(&mut server, &resp).await.unwrap();

		let result = client_task.await.unwrap().unwrap();
		assert_eq!(result.properties.get("Cookie"), Some(&"newcookie".to_string()));
	}
}
