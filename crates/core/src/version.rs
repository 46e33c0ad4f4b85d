//! Build metadata, consumed when comparing against a controller's
//! advertised `Remoting-Minimum-Version` header.

use std::sync::LazyLock;

#[derive(Debug, Clone)]
pub struct BuildInfo {
	pub version: &'static str,
	pub git_sha: Option<&'static str>,
}

impl BuildInfo {
	pub fn current() -> &'static BuildInfo {
		static INFO: LazyLock<BuildInfo> = LazyLock::new(|| BuildInfo {
			version: env!("CARGO_PKG_VERSION"),
			git_sha: option_env!("VERGEN_GIT_SHA"),
		});
		&INFO
	}

	/// Parses `self.version` as a dotted numeric version and compares it to
	/// `other`, returning `true` if `self` is older than `other`. Unparsable
	/// components compare as equal, matching the permissive comparison the
	/// controller performs against whatever an agent reports.
	pub fn is_older_than(&self, other: &str) -> bool {
		parse_dotted(self.version) < parse_dotted(other)
	}
}

fn parse_dotted(v: &str) -> Vec<u64> {
	v.split('.').map(|p| p.parse().unwrap_or(0)).collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn compares_dotted_versions() {
		assert!(parse_dotted("4.10") < parse_dotted("4.11"));
		assert!(parse_dotted("4.2") < parse_dotted("4.10"));
		assert_eq!(parse_dotted("4.10"), parse_dotted("4.10"));
	}
}
