//! 32-byte random cookie, hex-encoded, used to let a controller recognize a
//! reconnecting agent and evict its previous session.

use rand::RngCore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie(String);

impl Cookie {
	pub fn generate() -> Self {
		let mut bytes = [0u8; 32];
		rand::rng().fill_bytes(&mut bytes);
		Cookie(hex::encode(bytes))
	}

	pub fn from_hex(s: impl Into<String>) -> Self {
		Cookie(s.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl std::fmt::Display for Cookie {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}

impl std::ops::Deref for Cookie {
	type Target = str;

	fn deref(&self) -> &str {
		&self.0
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn generates_64_hex_chars() {
		let cookie = Cookie::generate();
		assert_eq!(cookie.as_str().len(), 64);
		assert!(cookie.as_str().chars().all(|c| c.is_ascii_hexdigit()));
	}

	#[test]
	fn generated_cookies_are_distinct() {
		assert_ne!(Cookie::generate(), Cookie::generate());
	}
}
