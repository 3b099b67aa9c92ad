//! IRC line codec.
//!
//! Parses raw protocol lines (with optional IRCv3 tags and prefix) into a
//! [`Message`] and serializes them back for the wire.

use std::collections::HashMap;
use std::fmt;

/// A single IRC protocol message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// IRCv3 message tags (empty if none).
    pub tags: HashMap<String, String>,
    /// Source prefix without the leading `:` (e.g. `nick!user@host`).
    pub prefix: Option<String>,
    /// Command or numeric, upper-cased.
    pub command: String,
    /// Parameters; the trailing parameter is the last element.
    pub params: Vec<String>,
}

impl Message {
    /// Build an untagged, prefix-less message.
    pub fn new(command: &str, params: Vec<String>) -> Self {
        Self {
            tags: HashMap::new(),
            prefix: None,
            command: command.to_string(),
            params,
        }
    }

    /// Parse one line. Returns `None` for empty or malformed input.
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);
        if rest.is_empty() {
            return None;
        }

        let mut tags = HashMap::new();
        if let Some(stripped) = rest.strip_prefix('@') {
            let (raw_tags, after) = stripped.split_once(' ')?;
            for tag in raw_tags.split(';').filter(|t| !t.is_empty()) {
                let (key, value) = tag.split_once('=').unwrap_or((tag, ""));
                tags.insert(key.to_string(), unescape_tag_value(value));
            }
            rest = after.trim_start_matches(' ');
        }

        let mut prefix = None;
        if let Some(stripped) = rest.strip_prefix(':') {
            let (p, after) = stripped.split_once(' ')?;
            prefix = Some(p.to_string());
            rest = after.trim_start_matches(' ');
        }

        let (command, mut rest) = rest.split_once(' ').unwrap_or((rest, ""));
        if command.is_empty() {
            return None;
        }

        let mut params = Vec::new();
        loop {
            rest = rest.trim_start_matches(' ');
            if rest.is_empty() {
                break;
            }
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            match rest.split_once(' ') {
                Some((param, after)) => {
                    params.push(param.to_string());
                    rest = after;
                }
                None => {
                    params.push(rest.to_string());
                    break;
                }
            }
        }

        Some(Self {
            tags,
            prefix,
            command: command.to_ascii_uppercase(),
            params,
        })
    }

    /// Nick part of the prefix (`nick` in `nick!user@host`).
    pub fn nick(&self) -> Option<&str> {
        self.prefix
            .as_deref()
            .and_then(|p| p.split('!').next())
            .filter(|n| !n.is_empty())
    }

    /// Parameter at `idx`, or an empty string.
    pub fn param(&self, idx: usize) -> &str {
        self.params.get(idx).map(|s| s.as_str()).unwrap_or("")
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.tags.is_empty() {
            let mut keys: Vec<&String> = self.tags.keys().collect();
            keys.sort();
            let rendered: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    let v = &self.tags[k];
                    if v.is_empty() {
                        k.clone()
                    } else {
                        format!("{k}={}", escape_tag_value(v))
                    }
                })
                .collect();
            write!(f, "@{} ", rendered.join(";"))?;
        }
        if let Some(ref prefix) = self.prefix {
            write!(f, ":{prefix} ")?;
        }
        f.write_str(&self.command)?;
        let last = self.params.len().saturating_sub(1);
        for (i, param) in self.params.iter().enumerate() {
            let needs_trailing =
                i == last && (param.is_empty() || param.contains(' ') || param.starts_with(':'));
            if needs_trailing {
                write!(f, " :{param}")?;
            } else {
                write!(f, " {param}")?;
            }
        }
        Ok(())
    }
}

fn unescape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn escape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            ';' => out.push_str("\\:"),
            ' ' => out.push_str("\\s"),
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_privmsg_with_prefix() {
        let msg = Message::parse(":Announcer!bot@tracker.test PRIVMSG #announce :New Torrent: foo\r\n")
            .unwrap();
        assert_eq!(msg.prefix.as_deref(), Some("Announcer!bot@tracker.test"));
        assert_eq!(msg.nick(), Some("Announcer"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#announce", "New Torrent: foo"]);
    }

    #[test]
    fn parse_numeric_without_trailing() {
        let msg = Message::parse(":irc.test 366 herald #announce :End of /NAMES list.").unwrap();
        assert_eq!(msg.command, "366");
        assert_eq!(msg.param(0), "herald");
        assert_eq!(msg.param(1), "#announce");
        assert_eq!(msg.param(5), "");
    }

    #[test]
    fn parse_tags() {
        let msg = Message::parse("@time=2024-01-01T00:00:00Z;label=a\\sb :n!u@h PRIVMSG #c :hi").unwrap();
        assert_eq!(msg.tags.get("time").map(String::as_str), Some("2024-01-01T00:00:00Z"));
        assert_eq!(msg.tags.get("label").map(String::as_str), Some("a b"));
    }

    #[test]
    fn parse_lowercase_command_and_no_params() {
        let msg = Message::parse("ping").unwrap();
        assert_eq!(msg.command, "PING");
        assert!(msg.params.is_empty());
        assert!(Message::parse("\r\n").is_none());
    }

    #[test]
    fn server_prefix_nick() {
        let msg = Message::parse(":irc.test NOTICE * :Looking up your hostname").unwrap();
        assert_eq!(msg.nick(), Some("irc.test"));
    }

    #[test]
    fn display_uses_trailing_only_when_needed() {
        let join = Message::new("JOIN", vec!["#announce".into(), "secret".into()]);
        assert_eq!(join.to_string(), "JOIN #announce secret");

        let msg = Message::new("PRIVMSG", vec!["NickServ".into(), "IDENTIFY hunter2".into()]);
        assert_eq!(msg.to_string(), "PRIVMSG NickServ :IDENTIFY hunter2");

        let empty = Message::new("QUIT", vec![String::new()]);
        assert_eq!(empty.to_string(), "QUIT :");
    }
}
