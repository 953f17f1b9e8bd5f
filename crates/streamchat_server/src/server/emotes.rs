#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use parking_lot::RwLock;
use streamchat_domain::EmoteCatalogEntry;

/// Emoji shortcode substitution and the emote-aware message length oracle.
///
/// Custom `:alias:` tokens are left in place; clients render them from the
/// catalog broadcast with `add emote` / `remove emote`.
#[derive(Debug, Default)]
pub struct EmoteRenderer {
	/// `:alias:` -> uri
	custom: RwLock<BTreeMap<String, String>>,
}

/// Catalog delta produced by [`EmoteRenderer::replace_catalog`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmoteDiff {
	/// `(key, uri)`
	pub added: Vec<(String, String)>,
	pub removed: Vec<String>,
}

impl EmoteDiff {
	pub fn is_empty(&self) -> bool {
		self.added.is_empty() && self.removed.is_empty()
	}
}

impl EmoteRenderer {
	pub fn new() -> Self {
		Self::default()
	}

	/// Replace emoji shortcodes (`:thumbsup:`) with their unicode form.
	pub fn substitute(&self, text: &str) -> String {
		replace_tokens(text, |token| emoji_for(token).map(str::to_string))
	}

	/// Length in chars where every emoji shortcode and custom emote counts as one.
	pub fn message_length(&self, text: &str) -> usize {
		let custom = self.custom.read();
		let collapsed = replace_tokens(text, |token| {
			if emoji_for(token).is_some() || custom.contains_key(&format!(":{token}:")) {
				Some("*".to_string())
			} else {
				None
			}
		});
		collapsed.chars().count()
	}

	/// Load the catalog without reporting a diff.
	pub fn seed_catalog(&self, entries: Vec<EmoteCatalogEntry>) {
		let mut custom = self.custom.write();
		*custom = entries.into_iter().map(|e| (e.key(), e.uri)).collect();
	}

	/// Swap in a fresh catalog and return what changed against the cached one.
	pub fn replace_catalog(&self, entries: Vec<EmoteCatalogEntry>) -> EmoteDiff {
		let fresh: BTreeMap<String, String> = entries.into_iter().map(|e| (e.key(), e.uri)).collect();

		let mut custom = self.custom.write();
		let added = fresh
			.iter()
			.filter(|(key, _)| !custom.contains_key(*key))
			.map(|(key, uri)| (key.clone(), uri.clone()))
			.collect();
		let removed = custom.keys().filter(|key| !fresh.contains_key(*key)).cloned().collect();

		*custom = fresh;
		EmoteDiff { added, removed }
	}

	pub fn catalog_len(&self) -> usize {
		self.custom.read().len()
	}
}

/// Walk `text` replacing `:word:` tokens for which `lookup` returns a value.
fn replace_tokens(text: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
	let mut out = String::with_capacity(text.len());
	let mut rest = text;

	while let Some(start) = rest.find(':') {
		out.push_str(&rest[..start]);
		let after = &rest[start + 1..];

		let replaced = after.find(':').and_then(|end| {
			let token = &after[..end];
			if is_token(token) {
				lookup(token).map(|r| (r, end))
			} else {
				None
			}
		});

		match replaced {
			Some((replacement, end)) => {
				out.push_str(&replacement);
				rest = &after[end + 1..];
			}
			None => {
				out.push(':');
				rest = after;
			}
		}
	}

	out.push_str(rest);
	out
}

fn is_token(s: &str) -> bool {
	!s.is_empty()
		&& s
			.chars()
			.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+'))
}

/// GitHub-style shortcode first, then the CLDR name in snake case (`:red_heart:`).
fn emoji_for(token: &str) -> Option<&'static str> {
	emojis::get_by_shortcode(token)
		.or_else(|| CLDR_NAMES.get(token).copied())
		.map(emojis::Emoji::as_str)
}

static CLDR_NAMES: LazyLock<HashMap<String, &'static emojis::Emoji>> = LazyLock::new(|| {
	emojis::iter()
		.map(|emoji| (emoji.name().to_lowercase().replace(' ', "_"), emoji))
		.collect()
});
