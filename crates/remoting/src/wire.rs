//! Small wire-format helpers shared by the legacy (v1-v3) handshakes and
//! the v4 connection-headers filter: length-prefixed UTF-8 strings and
//! newline-terminated ASCII lines, matching the framing `spec.md` §4.7/§6
//! describes for the TCP agent-listener protocol.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolRefusalError, RemotingError};

/// Writes `s` as a 2-byte big-endian length prefix followed by its UTF-8
/// bytes (the historical `DataOutputStream.writeUTF` framing every
/// handshake variant's protocol marker and header strings use).
pub async fn write_utf<W: AsyncWrite + Unpin>(w: &mut W, s: &str) -> std::io::Result<()> {
	let bytes = s.as_bytes();
	let len: u16 = bytes
		.len()
		.try_into()
		.map_err(|_| std::io::Error::other("UTF string too long for a u16 length prefix"))?;
	w.write_all(&len.to_be_bytes()).await?;
	w.write_all(bytes).await?;
	w.flush().await
}

pub async fn read_utf<R: AsyncRead + Unpin>(r: &mut R) -> std::io::Result<String> {
	let mut len_buf = [0u8; 2];
	r.read_exact(&mut len_buf).await?;
	let len = u16::from_be_bytes(len_buf) as usize;
	let mut buf = vec![0u8; len];
	r.read_exact(&mut buf).await?;
	String::from_utf8(buf).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

pub async fn write_bytes_framed<W: AsyncWrite + Unpin>(w: &mut W, bytes: &[u8]) -> std::io::Result<()> {
	let len: u16 = bytes
		.len()
		.try_into()
		.map_err(|_| std::io::Error::other("framed byte block too long for a u16 length prefix"))?;
	w.write_all(&len.to_be_bytes()).await?;
	w.write_all(bytes).await?;
	w.flush().await
}

pub async fn read_bytes_framed<R: AsyncRead + Unpin>(r: &mut R) -> std::io::Result<Vec<u8>> {
	let mut len_buf = [0u8; 2];
	r.read_exact(&mut len_buf).await?;
	let len = u16::from_be_bytes(len_buf) as usize;
	let mut buf = vec![0u8; len];
	r.read_exact(&mut buf).await?;
	Ok(buf)
}

/// Reads one `\n`-terminated ASCII line, trimming the trailing newline and
/// any carriage return. Used for the `Welcome`/refusal response lines.
pub async fn read_line<R: AsyncRead + Unpin>(r: &mut R) -> std::io::Result<String> {
	let mut out = Vec::new();
	let mut byte = [0u8; 1];
	loop {
		r.read_exact(&mut byte).await?;
		if byte[0] == b'\n' {
			break;
		}
		out.push(byte[0]);
	}
	if out.last() == Some(&b'\r') {
		out.pop();
	}
	String::from_utf8(out).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

pub async fn write_line<W: AsyncWrite + Unpin>(w: &mut W, line: &str) -> std::io::Result<()> {
	w.write_all(line.as_bytes()).await?;
	w.write_all(b"\n").await?;
	w.flush().await
}

/// Sends the common `Protocol:<NAME>` marker every handshake variant
/// starts with (`spec.md` §4.7).
pub async fn write_protocol_marker<W: AsyncWrite + Unpin>(w: &mut W, name: &str) -> std::io::Result<()> {
	write_utf(w, &format!("Protocol:{name}")).await
}

/// Interprets a handshake response line: `"Welcome"` means success,
/// anything else is a refusal carrying that line as the reason.
pub fn welcome_or_refusal(protocol: &str, line: String) -> Result<(), RemotingError> {
	if line == "Welcome" {
		Ok(())
	} else {
		Err(ProtocolRefusalError::Refused {
			protocol: protocol.to_string(),
			reason: line,
		}
		.into())
	}
}

/// Parses a `key: value\n...\n\n`-framed property block (v2's response
/// headers; v4's connection-headers filter uses the framed variant
/// instead, see `crate::protocol::headers`).
pub async fn read_header_block<R: AsyncRead + Unpin>(r: &mut R) -> std::io::Result<std::collections::HashMap<String, String>> {
	let mut map = std::collections::HashMap::new();
	loop {
		let line = read_line(r).await?;
		if line.is_empty() {
			break;
		}
		if let Some((k, v)) = line.split_once(':') {
			map.insert(k.trim().to_string(), v.trim().to_string());
		}
	}
	Ok(map)
}

pub async fn write_header_block<W: AsyncWrite + Unpin>(w: &mut W, headers: &std::collections::HashMap<String, String>) -> std::io::Result<()> {
	for (k, v) in headers {
		write_line(w, &format!("{k}: {v}")).await?;
	}
	write_line(w, "").await
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;

	use super::*;

	#[tokio::test]
	async fn utf_string_roundtrips() {
		let mut buf = Vec::new();
		write_utf(&mut buf, "Protocol:JNLP4-connect").await.unwrap();
		let mut cursor = Cursor::new(buf);
		let got = read_utf(&mut cursor).await.unwrap();
		assert_eq!(got, "Protocol:JNLP4-connect");
	}

	#[tokio::test]
	async fn header_block_roundtrips() {
		let mut headers = std::collections::HashMap::new();
		headers.insert("Cookie".to_string(), "abc".to_string());
		let mut buf = Vec::new();
		write_header_block(&mut buf, &headers).await.unwrap();
		let mut cursor = Cursor::new(buf);
		let got = read_header_block(&mut cursor).await.unwrap();
		assert_eq!(got, headers);
	}

	#[tokio::test]
	async fn welcome_line_is_success() {
		assert!(welcome_or_refusal("JNLP-connect", "Welcome".to_string()).is_ok());
		assert!(welcome_or_refusal("JNLP-connect", "nope".to_string()).is_err());
	}
}
