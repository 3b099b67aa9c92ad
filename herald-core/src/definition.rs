//! Indexer definitions.
//!
//! A definition names the channels and announcer bots a tracker uses on a
//! network, the ordered line rules that describe one announcement, and the
//! templates that turn the captured variables into release fields.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::extract::{Vars, extract_line};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexerDefinition {
    pub identifier: String,
    #[serde(default)]
    pub name: String,
    pub irc: IrcSettings,
    /// User-supplied variables (passkeys, API keys). Merged over captured
    /// variables when the release fields are assembled.
    #[serde(default)]
    pub settings: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IrcSettings {
    /// Network name this definition belongs to.
    #[serde(default)]
    pub network: String,
    /// Server host; matched case-insensitively against the network config.
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub announcers: Vec<String>,
    #[serde(default)]
    pub parse: ParseRules,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseRules {
    #[serde(default)]
    pub lines: Vec<LineRule>,
    #[serde(default, rename = "match")]
    pub template: MatchTemplate,
}

/// How a rule's pattern populates the variable set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionMode {
    /// Capture groups are assigned, in order, to these names.
    Positional(Vec<String>),
    /// Every match is scanned and named groups are stored under their own
    /// names; unnamed groups land in `raw`.
    NamedScan,
}

/// One line of an announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawLineRule", into = "RawLineRule")]
pub struct LineRule {
    pub pattern: String,
    pub mode: ExtractionMode,
    /// The line must match but contributes no variables.
    pub ignore: bool,
    /// Example lines the pattern is expected to match.
    pub tests: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct RawLineRule {
    pattern: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    vars: Vec<String>,
    #[serde(default)]
    ignore: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    test: Vec<String>,
}

impl From<RawLineRule> for LineRule {
    fn from(raw: RawLineRule) -> Self {
        let mode = if raw.vars.is_empty() {
            ExtractionMode::NamedScan
        } else {
            ExtractionMode::Positional(raw.vars)
        };
        Self {
            pattern: raw.pattern,
            mode,
            ignore: raw.ignore,
            tests: raw.test,
        }
    }
}

impl From<LineRule> for RawLineRule {
    fn from(rule: LineRule) -> Self {
        let vars = match rule.mode {
            ExtractionMode::Positional(vars) => vars,
            ExtractionMode::NamedScan => Vec::new(),
        };
        Self {
            pattern: rule.pattern,
            vars,
            ignore: rule.ignore,
            test: rule.tests,
        }
    }
}

impl LineRule {
    pub fn positional(pattern: &str, vars: &[&str]) -> Self {
        Self {
            pattern: pattern.to_string(),
            mode: ExtractionMode::Positional(vars.iter().map(|v| v.to_string()).collect()),
            ignore: false,
            tests: Vec::new(),
        }
    }

    pub fn named_scan(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            mode: ExtractionMode::NamedScan,
            ignore: false,
            tests: Vec::new(),
        }
    }

    pub fn ignored(mut self) -> Self {
        self.ignore = true;
        self
    }
}

/// Final-assembly templates, `{{ .var }}` placeholders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchTemplate {
    #[serde(default, rename = "torrenturl")]
    pub torrent_url: String,
    #[serde(default, rename = "torrentname")]
    pub torrent_name: String,
    #[serde(default, rename = "infourl")]
    pub info_url: String,
    /// Variables to query-escape before substitution.
    #[serde(default)]
    pub encode: Vec<String>,
}

impl IndexerDefinition {
    /// Lower-cased channel names.
    pub fn channel_names(&self) -> impl Iterator<Item = String> + '_ {
        self.irc.channels.iter().map(|c| c.to_lowercase())
    }

    /// Does this definition belong to the network with this name and server?
    pub fn matches_network(&self, name: &str, server: &str) -> bool {
        if !self.irc.server.is_empty() {
            return self.irc.server.eq_ignore_ascii_case(server);
        }
        !self.irc.network.is_empty() && self.irc.network == name
    }

    /// Run every rule's test lines through the extraction engine.
    ///
    /// Rules without test lines only have their pattern compiled.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();

        if self.irc.parse.lines.is_empty() {
            problems.push(format!("{}: no parse lines", self.identifier));
        }

        for (idx, rule) in self.irc.parse.lines.iter().enumerate() {
            if rule.tests.is_empty() {
                let mut vars = Vars::new();
                if let Err(e) = extract_line(&rule.pattern, &rule.mode, &mut vars, "", rule.ignore) {
                    problems.push(format!("{} line {}: {e}", self.identifier, idx + 1));
                }
                continue;
            }
            for test in &rule.tests {
                let mut vars = Vars::new();
                match extract_line(&rule.pattern, &rule.mode, &mut vars, test, rule.ignore) {
                    Ok(true) => {}
                    Ok(false) => problems.push(format!(
                        "{} line {}: test line does not match: {test}",
                        self.identifier,
                        idx + 1
                    )),
                    Err(e) => {
                        problems.push(format!("{} line {}: {e}", self.identifier, idx + 1));
                        break;
                    }
                }
            }
        }

        if problems.is_empty() { Ok(()) } else { Err(problems) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFINITION: &str = r##"
identifier = "example"
name = "Example Tracker"

[settings]
passkey = "abc123"

[irc]
network = "ExampleNet"
server = "irc.example.test"
channels = ["#Announce"]
announcers = ["Announcer"]

[[irc.parse.lines]]
pattern = "New Torrent Announcement:\\s*<([^>]*)>\\s*Name:'(.*)' uploaded by '([^']*)'"
vars = ["category", "torrentName", "uploader"]
test = ["New Torrent Announcement: <PC :: Iso>  Name:'debian live 10 6 0 amd64 standard iso' uploaded by 'Anonymous'"]

[[irc.parse.lines]]
pattern = 'https?://[^/]+/torrent/(?P<torrentId>\d+)'

[irc.parse.match]
torrenturl = "{{ .baseUrl }}dl/{{ .torrentId }}?key={{ .passkey }}"
encode = ["passkey"]
"##;

    fn parse() -> IndexerDefinition {
        toml::from_str(DEFINITION).unwrap()
    }

    #[test]
    fn test_deserialize_modes() {
        let def = parse();
        let lines = &def.irc.parse.lines;
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0].mode,
            ExtractionMode::Positional(vec![
                "category".into(),
                "torrentName".into(),
                "uploader".into()
            ])
        );
        assert_eq!(lines[1].mode, ExtractionMode::NamedScan);
        assert_eq!(def.irc.parse.template.encode, vec!["passkey"]);
        assert_eq!(def.settings.get("passkey").map(String::as_str), Some("abc123"));
    }

    #[test]
    fn test_channel_names_lowercased() {
        assert_eq!(parse().channel_names().collect::<Vec<_>>(), vec!["#announce"]);
    }

    #[test]
    fn test_matches_network_prefers_server() {
        let def = parse();
        assert!(def.matches_network("Other", "IRC.EXAMPLE.TEST"));
        assert!(!def.matches_network("ExampleNet", "irc.other.test"));

        let mut by_name = parse();
        by_name.irc.server.clear();
        assert!(by_name.matches_network("ExampleNet", "irc.other.test"));
    }

    #[test]
    fn test_validate_runs_test_lines() {
        assert!(parse().validate().is_ok());

        let mut broken = parse();
        broken.irc.parse.lines[0].tests = vec!["something else entirely".into()];
        broken.irc.parse.lines[1].pattern = "(unclosed".into();
        let problems = broken.validate().unwrap_err();
        assert_eq!(problems.len(), 2);
        assert!(problems[0].contains("does not match"));
        assert!(problems[1].contains("invalid pattern"));
    }
}
