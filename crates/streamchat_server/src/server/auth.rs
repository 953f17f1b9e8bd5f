#![forbid(unsafe_code)]

use streamchat_domain::StreamerProfile;

/// Check a streamer's self-login key against the directory record.
pub fn verify_stream_key(profile: &StreamerProfile, provided: &str) -> bool {
	!profile.secret_key.is_empty() && constant_time_eq(profile.secret_key.as_bytes(), provided.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
	if a.len() != b.len() {
		return false;
	}

	let mut diff = 0u8;
	for (x, y) in a.iter().zip(b.iter()) {
		diff |= x ^ y;
	}

	diff == 0
}

#[cfg(test)]
mod tests {
	use super::*;

	fn profile(key: &str) -> StreamerProfile {
		StreamerProfile {
			canonical_name: "Alice".into(),
			secret_key: key.into(),
			description: None,
			viewer_password: None,
		}
	}

	#[test]
	fn accepts_exact_key_only() {
		let p = profile("s3cret");
		assert!(verify_stream_key(&p, "s3cret"));
		assert!(!verify_stream_key(&p, "s3cre"));
		assert!(!verify_stream_key(&p, "S3CRET"));
		assert!(!verify_stream_key(&p, ""));
	}

	#[test]
	fn empty_stored_key_never_matches() {
		assert!(!verify_stream_key(&profile(""), ""));
	}
}
