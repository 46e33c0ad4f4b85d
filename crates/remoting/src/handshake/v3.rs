//! `JNLP3-connect`: mutual challenge-response handshake over a symmetric
//! stream cipher derived from `(client_name, secret)`, followed by a
//! fresh per-connection channel cipher for the application stream
//! (`spec.md` §4.7).
//!
//! Key size is 128 bits throughout, per the spec's portability note.

use std::pin::Pin;
use std::task::{Context, Poll};

use aes::Aes128;
use ctr::Ctr128BE;
use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

use super::{HandshakeResult, OutboundHeaders};
use crate::error::{AuthenticationError, RemotingError};
use crate::wire::{read_bytes_framed, read_utf, write_bytes_framed, write_protocol_marker, write_utf};

pub const NAME: &str = "JNLP3-connect";

type HmacSha256 = Hmac<Sha256>;

/// Derives the 128-bit handshake key and IV from `HMAC-SHA256(secret,
/// client_name)`, splitting the 32-byte digest into two 16-byte halves.
fn derive_handshake_material(client_name: &str, secret: &str) -> ([u8; 16], [u8; 16]) {
	let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
	mac.update(client_name.as_bytes());
	let digest = mac.finalize().into_bytes();
	let mut key = [0u8; 16];
	let mut iv = [0u8; 16];
	key.copy_from_slice(&digest[0..16]);
	iv.copy_from_slice(&digest[16..32]);
	(key, iv)
}

/// A single AES-128-CTR transform under `(key, iv)`. CTR encryption and
/// decryption are the same XOR-with-keystream operation, so one function
/// serves both directions; each call starts the keystream counter fresh,
/// which is sufficient here since handshake messages are independent,
/// one-shot blobs rather than a continuous stream (the channel cipher
/// below is the continuous case).
fn xor_with_keystream(key: &[u8; 16], iv: &[u8; 16], data: &[u8]) -> Vec<u8> {
	let mut cipher = Ctr128BE::<Aes128>::new(key.into(), iv.into());
	let mut buf = data.to_vec();
	cipher.apply_keystream(&mut buf);
	buf
}

fn sha256(data: &[u8]) -> Vec<u8> {
	Sha256::digest(data).to_vec()
}

/// Generates a fresh 32-byte random cookie, hex-encodes it, and encrypts
/// the hex text; regenerates up to 100 times if the ciphertext would
/// break the length-prefixed-but-still-line-oriented framing some
/// historical clients relied on (contains `\n`, or starts/ends with
/// whitespace). See `spec.md` §4.7 and E2E-4.
fn generate_framing_safe_cookie(key: &[u8; 16], iv: &[u8; 16]) -> Result<(String, Vec<u8>), RemotingError> {
	for _ in 0..100 {
		let mut raw = [0u8; 32];
		rand::rng().fill_bytes(&mut raw);
		let hex_cookie = hex::encode(raw);
		let ciphertext = xor_with_keystream(key, iv, hex_cookie.as_bytes());
		let breaks_framing = ciphertext.contains(&b'\n')
			|| ciphertext.first().is_some_and(|b| b.is_ascii_whitespace())
			|| ciphertext.last().is_some_and(|b| b.is_ascii_whitespace());
		if !breaks_framing {
			return Ok((hex_cookie, ciphertext));
		}
	}
	Err(AuthenticationError::ChallengeMismatch.into())
}

const CHALLENGE_LEN: usize = 16;

/// 128-bit key + IV for one direction of the post-handshake channel
/// stream cipher.
#[derive(Clone)]
struct ChannelKey {
	key: [u8; 16],
	iv: [u8; 16],
}

impl ChannelKey {
	fn random() -> Self {
		let mut bytes = [0u8; 32];
		rand::rng().fill_bytes(&mut bytes);
		let mut key = [0u8; 16];
		let mut iv = [0u8; 16];
		key.copy_from_slice(&bytes[0..16]);
		iv.copy_from_slice(&bytes[16..32]);
		ChannelKey { key, iv }
	}

	fn to_bytes(&self) -> [u8; 32] {
		let mut out = [0u8; 32];
		out[0..16].copy_from_slice(&self.key);
		out[16..32].copy_from_slice(&self.iv);
		out
	}

	fn from_bytes(bytes: &[u8]) -> Option<Self> {
		if bytes.len() != 32 {
			return None;
		}
		let mut key = [0u8; 16];
		let mut iv = [0u8; 16];
		key.copy_from_slice(&bytes[0..16]);
		iv.copy_from_slice(&bytes[16..32]);
		Some(ChannelKey { key, iv })
	}
}

/// Wraps a socket in a continuous AES-128-CTR transform: bytes written are
/// encrypted with an ever-advancing keystream, bytes read are decrypted
/// with a separate ever-advancing keystream, matching the channel-cipher
/// step of `spec.md` §4.7. Requires `S: Unpin` so the wrapper itself stays
/// `Unpin` without manual pin-projection.
pub struct CipherStream<S> {
	inner: S,
	write_cipher: Ctr128BE<Aes128>,
	read_cipher: Ctr128BE<Aes128>,
}

impl<S: Unpin> CipherStream<S> {
	fn new(inner: S, write_key: &ChannelKey, read_key: &ChannelKey) -> Self {
		CipherStream {
			inner,
			write_cipher: Ctr128BE::<Aes128>::new((&write_key.key).into(), (&write_key.iv).into()),
			read_cipher: Ctr128BE::<Aes128>::new((&read_key.key).into(), (&read_key.iv).into()),
		}
	}
}

impl<S: AsyncRead + Unpin> AsyncRead for CipherStream<S> {
	fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
		let this = self.get_mut();
		let before = buf.filled().len();
		match Pin::new(&mut this.inner).poll_read(cx, buf) {
			Poll::Ready(Ok(())) => {
				this.read_cipher.apply_keystream(&mut buf.filled_mut()[before..]);
				Poll::Ready(Ok(()))
			},
			other => other,
		}
	}
}

impl<S: AsyncWrite + Unpin> AsyncWrite for CipherStream<S> {
	fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, data: &[u8]) -> Poll<std::io::Result<usize>> {
		let this = self.get_mut();
		let mut encrypted = data.to_vec();
		this.write_cipher.apply_keystream(&mut encrypted);
		Pin::new(&mut this.inner).poll_write(cx, &encrypted)
	}

	fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
		Pin::new(&mut self.get_mut().inner).poll_flush(cx)
	}

	fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
		Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
	}
}

pub struct V3Outcome<S> {
	pub result: HandshakeResult,
	pub channel: CipherStream<S>,
}

/// Runs the client side of the v3 handshake described in `spec.md` §4.7,
/// returning the negotiated channel cipher stream on success.
pub async fn connect<S: AsyncRead + AsyncWrite + Unpin>(mut socket: S, headers: &OutboundHeaders) -> Result<V3Outcome<S>, RemotingError> {
	write_protocol_marker(&mut socket, NAME).await?;
	let (key, iv) = derive_handshake_material(&headers.client_name, &headers.secret);

	write_utf(&mut socket, &headers.client_name).await?;
	let mut our_challenge = [0u8; CHALLENGE_LEN];
	rand::rng().fill_bytes(&mut our_challenge);
	write_bytes_framed(&mut socket, &xor_with_keystream(&key, &iv, &our_challenge)).await?;
	let prior_cookie_plain = headers.cookie.as_deref().unwrap_or("").to_string();
	write_bytes_framed(&mut socket, &xor_with_keystream(&key, &iv, prior_cookie_plain.as_bytes())).await?;

	let negotiate = read_utf(&mut socket).await?;
	if negotiate != "Negotiate" {
		return Err(AuthenticationError::ChallengeMismatch.into());
	}
	let encrypted_hash = read_bytes_framed(&mut socket).await?;
	let expected_hash = sha256(&our_challenge);
	if xor_with_keystream(&key, &iv, &encrypted_hash) != expected_hash {
		return Err(AuthenticationError::ChallengeMismatch.into());
	}
	write_utf(&mut socket, "Welcome").await?;

	let their_challenge = read_bytes_framed(&mut socket).await?;
	let our_hash = sha256(&their_challenge);
	write_bytes_framed(&mut socket, &xor_with_keystream(&key, &iv, &our_hash)).await?;

	let welcome2 = read_utf(&mut socket).await?;
	if welcome2 != "Welcome" {
		return Err(AuthenticationError::ChallengeMismatch.into());
	}
	let encrypted_cookie = read_bytes_framed(&mut socket).await?;
	let new_cookie = String::from_utf8(xor_with_keystream(&key, &iv, &encrypted_cookie))
		.map_err(|_| RemotingError::Internal("v3 cookie was not valid UTF-8 after decryption".to_string()))?;

	let local_channel = ChannelKey::random();
	write_bytes_framed(&mut socket, &xor_with_keystream(&key, &iv, &local_channel.to_bytes())).await?;
	let remote_channel_enc = read_bytes_framed(&mut socket).await?;
	let remote_channel_bytes = xor_with_keystream(&key, &iv, &remote_channel_enc);
	let remote_channel = ChannelKey::from_bytes(&remote_channel_bytes)
		.ok_or_else(|| RemotingError::Internal("v3 peer channel key had unexpected length".to_string()))?;

	let channel = CipherStream::new(socket, &local_channel, &remote_channel);

	Ok(V3Outcome {
		result: HandshakeResult {
			properties: Default::default(),
			new_cookie: Some(crate::cookie::Cookie::from_hex(new_cookie)),
		},
		channel,
	})
}

/// Server-side half, used only by the loopback tests below to exercise
/// the full exchange without a real controller; a production controller
/// implements this independently and is out of scope (`spec.md` §1).
#[cfg(test)]
async fn serve<S: AsyncRead + AsyncWrite + Unpin>(mut socket: S, client_name: &str, secret: &str) -> std::io::Result<()> {
	let marker = read_utf(&mut socket).await?;
	assert_eq!(marker, "Protocol:JNLP3-connect");
	let (key, iv) = derive_handshake_material(client_name, secret);

	let got_name = read_utf(&mut socket).await?;
	assert_eq!(got_name, client_name);
	let enc_challenge = read_bytes_framed(&mut socket).await?;
	let challenge = xor_with_keystream(&key, &iv, &enc_challenge);
	let _prior_cookie_enc = read_bytes_framed(&mut socket).await?;

	write_utf(&mut socket, "Negotiate").await?;
	let hash = sha256(&challenge);
	write_bytes_framed(&mut socket, &xor_with_keystream(&key, &iv, &hash)).await?;

	let welcome = read_utf(&mut socket).await?;
	assert_eq!(welcome, "Welcome");

	let mut server_challenge = [0u8; CHALLENGE_LEN];
	rand::rng().fill_bytes(&mut server_challenge);
	write_bytes_framed(&mut socket, &server_challenge).await?;
	let enc_hash = read_bytes_framed(&mut socket).await?;
	let got_hash = xor_with_keystream(&key, &iv, &enc_hash);
	assert_eq!(got_hash, sha256(&server_challenge));

	write_utf(&mut socket, "Welcome").await?;
	let (_cookie_hex, cookie_ct) = generate_framing_safe_cookie(&key, &iv).expect("100 tries should find a safe cookie");
	write_bytes_framed(&mut socket, &cookie_ct).await?;

	let client_channel_enc = read_bytes_framed(&mut socket).await?;
	let client_channel = ChannelKey::from_bytes(&xor_with_keystream(&key, &iv, &client_channel_enc)).unwrap();
	let server_channel = ChannelKey::random();
	write_bytes_framed(&mut socket, &xor_with_keystream(&key, &iv, &server_channel.to_bytes())).await?;

	let mut server_side = CipherStream::new(socket, &server_channel, &client_channel);
	let mut probe = [0u8; 5];
	server_side.read_exact(&mut probe).await?;
	assert_eq!(&probe, b"hello");
	server_side.write_all(b"world").await?;
	server_side.flush().await?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use tokio::io::duplex;

	use super::*;

	#[tokio::test]
	async fn handshake_round_trip_yields_usable_channel() {
		let (client, server) = duplex(8192);
		let server_task = tokio::spawn(async move { serve(server, "agent-1", "s3cr3t").await });

		let headers = OutboundHeaders {
			secret: "s3cr3t".into(),
			client_name: "agent-1".into(),
			cookie: None,
		};
		let V3Outcome { result, mut channel } = connect(client, &headers).await.unwrap();
		assert_eq!(result.new_cookie.as_ref().map(|c| c.len()), Some(64));
		assert!(result.new_cookie.unwrap().chars().all(|c| c.is_ascii_hexdigit()));

		channel.write_all(b"hello").await.unwrap();
		channel.flush().await.unwrap();
		let mut reply = [0u8; 5];
		channel.read_exact(&mut reply).await.unwrap();
		assert_eq!(&reply, b"world");

		server_task.await.unwrap().unwrap();
	}

	#[test]
	fn cookie_regeneration_converges_within_a_hundred_tries() {
		let (key, iv) = derive_handshake_material("a", "s");
		let (hex_cookie, ciphertext) = generate_framing_safe_cookie(&key, &iv).unwrap();
		assert_eq!(hex_cookie.len(), 64);
		assert!(!ciphertext.contains(&b'\n'));
	}

	#[test]
	fn xor_with_keystream_is_involutive() {
		let (key, iv) = derive_handshake_material("a", "s");
		let plaintext = b"the quick brown fox";
		let ciphertext = xor_with_keystream(&key, &iv, plaintext);
		let round_tripped = xor_with_keystream(&key, &iv, &ciphertext);
		assert_eq!(round_tripped, plaintext);
	}
}
