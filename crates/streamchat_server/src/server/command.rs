#![forbid(unsafe_code)]

/// Command family of a chat line, after alias resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
	Say,
	Action,
	Color,
	RenameSelf,
	Help,
	Users,
	Settings,
	Mute,
	Unmute,
	Mod,
	Demod,
	RenameOther,
	Description,
	Password,
	Unknown,
}

impl CommandKind {
	/// Metric label.
	pub const fn as_str(self) -> &'static str {
		match self {
			CommandKind::Say => "say",
			CommandKind::Action => "action",
			CommandKind::Color => "color",
			CommandKind::RenameSelf => "name",
			CommandKind::Help => "help",
			CommandKind::Users => "users",
			CommandKind::Settings => "settings",
			CommandKind::Mute => "mute",
			CommandKind::Unmute => "unmute",
			CommandKind::Mod => "mod",
			CommandKind::Demod => "demod",
			CommandKind::RenameOther => "rename",
			CommandKind::Description => "description",
			CommandKind::Password => "password",
			CommandKind::Unknown => "unknown",
		}
	}
}

/// A chat line split into its command token and the remainder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine<'a> {
	pub kind: CommandKind,
	/// The token as typed, e.g. `/me`. Empty for bare text.
	pub token: &'a str,
	pub rest: &'a str,
}

/// Split a trimmed, non-empty chat line. Bare text is an implicit `/say`.
pub fn parse_line(line: &str) -> ParsedLine<'_> {
	let line = line.trim();
	if !line.starts_with('/') {
		return ParsedLine {
			kind: CommandKind::Say,
			token: "",
			rest: line,
		};
	}

	let (token, rest) = line.split_once(' ').unwrap_or((line, ""));
	ParsedLine {
		kind: lookup(token),
		token,
		rest,
	}
}

fn lookup(token: &str) -> CommandKind {
	match token {
		"/say" => CommandKind::Say,
		"/me" | "/action" | "/describe" => CommandKind::Action,
		"/color" | "/setcolor" => CommandKind::Color,
		"/name" | "/nick" => CommandKind::RenameSelf,
		"/help" => CommandKind::Help,
		"/users" | "/userlist" | "/names" => CommandKind::Users,
		"/settings" => CommandKind::Settings,
		"/mute" | "/quiet" => CommandKind::Mute,
		"/unmute" | "/unquiet" => CommandKind::Unmute,
		"/mod" => CommandKind::Mod,
		"/demod" | "/unmod" => CommandKind::Demod,
		"/rename" => CommandKind::RenameOther,
		"/desc" | "/description" => CommandKind::Description,
		"/password" => CommandKind::Password,
		_ => CommandKind::Unknown,
	}
}

/// `/help` lines for a role.
pub fn help_lines(is_admin: bool, is_privileged: bool) -> Vec<&'static str> {
	let mut lines = vec![
		"The following commands are recognized:",
		"/help - show this message",
		"/users - show the currently chatting users",
		"/me <action> - perform an action",
		"/color <color> - set the color of your name in chat",
		"/name <new name> - change your name to a new one",
	];
	if is_admin {
		lines.extend([
			"/settings - display all stream settings",
			"/description <text> - set the stream description",
			"/password [<text>] - set or unset the stream password",
			"/mod <user> - grant moderator privileges to user",
			"/demod <user> - revoke moderator privileges to user",
		]);
	}
	if is_privileged {
		lines.extend([
			"/mute <user> - mute user",
			"/unmute <user> - unmute user",
			"/rename <user> <new name> - rename user",
		]);
	}
	lines
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bare_text_is_say() {
		let p = parse_line("  hello there ");
		assert_eq!(p.kind, CommandKind::Say);
		assert_eq!(p.token, "");
		assert_eq!(p.rest, "hello there");
	}

	#[test]
	fn splits_on_first_space() {
		let p = parse_line("/rename bob carol smith");
		assert_eq!(p.kind, CommandKind::RenameOther);
		assert_eq!(p.token, "/rename");
		assert_eq!(p.rest, "bob carol smith");

		let p = parse_line("/password");
		assert_eq!(p.kind, CommandKind::Password);
		assert_eq!(p.rest, "");
	}

	#[test]
	fn aliases_resolve() {
		for (token, kind) in [
			("/describe x", CommandKind::Action),
			("/setcolor red", CommandKind::Color),
			("/nick x", CommandKind::RenameSelf),
			("/names", CommandKind::Users),
			("/quiet x", CommandKind::Mute),
			("/unquiet x", CommandKind::Unmute),
			("/unmod x", CommandKind::Demod),
			("/desc x", CommandKind::Description),
		] {
			assert_eq!(parse_line(token).kind, kind, "{token}");
		}
	}

	#[test]
	fn tokens_are_case_sensitive() {
		let p = parse_line("/ME waves");
		assert_eq!(p.kind, CommandKind::Unknown);
		assert_eq!(p.token, "/ME");
	}

	#[test]
	fn help_depends_on_role() {
		assert_eq!(help_lines(false, false).len(), 6);
		assert_eq!(help_lines(false, true).len(), 9);
		assert_eq!(help_lines(true, true).len(), 14);
	}
}
