//! Network and indexer configuration.
//!
//! A single TOML file holds `[[network]]` tables and `[[indexer]]`
//! definitions. Indexers are matched to networks by server host, falling
//! back to the network name.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use herald_sdk::client::{ConnectConfig, ReconnectConfig, SaslCredentials};
use serde::{Deserialize, Serialize};

use crate::definition::IndexerDefinition;
use crate::error::ConfigError;

/// Default plaintext IRC port.
pub const DEFAULT_PORT: u16 = 6667;

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_reconnect_delay() -> u64 {
    15
}

fn default_max_reconnect_delay() -> u64 {
    300
}

fn default_keepalive() -> u64 {
    240
}

fn default_connect_timeout() -> u64 {
    120
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMechanism {
    #[default]
    None,
    SaslPlain,
    Nickserv,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub mechanism: AuthMechanism,
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    /// Channel key (`JOIN #chan key`).
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// One IRC network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub server: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub tls: bool,
    /// Accept any server certificate.
    #[serde(default)]
    pub tls_skip_verify: bool,
    /// Server password (`PASS`).
    #[serde(default)]
    pub pass: Option<String>,
    pub nick: String,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Commands that make the tracker's bot invite us, e.g.
    /// `Bot invite mykey, /msg Other enter #chan`.
    #[serde(default)]
    pub invite_command: Option<String>,
    /// Set the bot user mode when the server advertises one.
    #[serde(default)]
    pub bot_mode: bool,
    /// Per-channel overrides and extra channels to join.
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_max_reconnect_delay")]
    pub max_reconnect_delay_secs: u64,
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl NetworkConfig {
    pub fn new(name: &str, server: &str, port: u16, nick: &str) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            server: server.to_string(),
            port,
            tls: false,
            tls_skip_verify: false,
            pass: None,
            nick: nick.to_string(),
            auth: AuthConfig::default(),
            invite_command: None,
            bot_mode: false,
            channels: Vec::new(),
            reconnect_delay_secs: default_reconnect_delay(),
            max_reconnect_delay_secs: default_max_reconnect_delay(),
            keepalive_secs: default_keepalive(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }

    pub fn server_addr(&self) -> String {
        if self.server.contains(':') && !self.server.starts_with('[') {
            format!("[{}]:{}", self.server, self.port)
        } else {
            format!("{}:{}", self.server, self.port)
        }
    }

    /// Trimmed invite command, if any.
    pub fn invite_command(&self) -> Option<&str> {
        self.invite_command
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    pub fn connect_config(&self) -> ConnectConfig {
        let sasl = match self.auth.mechanism {
            AuthMechanism::SaslPlain => Some(SaslCredentials {
                account: self.auth.account.clone(),
                password: self.auth.password.clone(),
            }),
            _ => None,
        };
        ConnectConfig {
            server_addr: self.server_addr(),
            nick: self.nick.clone(),
            user: self.nick.clone(),
            realname: self.nick.clone(),
            password: self.pass.clone().filter(|p| !p.is_empty()),
            tls: self.tls,
            tls_insecure: self.tls_skip_verify,
            sasl,
            keepalive: Duration::from_secs(self.keepalive_secs.max(1)),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs.max(1)),
        }
    }

    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_secs(self.reconnect_delay_secs),
            max_delay: Duration::from_secs(self.max_reconnect_delay_secs.max(self.reconnect_delay_secs)),
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: &str| -> Result<(), ConfigError> {
            Err(ConfigError::Validation(format!("network {:?}: {msg}", self.name)))
        };
        if self.name.trim().is_empty() {
            return Err(ConfigError::Validation("network without a name".into()));
        }
        if self.server.trim().is_empty() {
            return fail("server is required");
        }
        if self.nick.trim().is_empty() {
            return fail("nick is required");
        }
        match self.auth.mechanism {
            AuthMechanism::None => {}
            AuthMechanism::SaslPlain if self.auth.account.is_empty() || self.auth.password.is_empty() => {
                return fail("sasl-plain needs account and password");
            }
            AuthMechanism::Nickserv if self.auth.password.is_empty() => {
                return fail("nickserv needs a password");
            }
            _ => {}
        }
        Ok(())
    }
}

/// Top-level daemon configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub network: Vec<NetworkConfig>,
    #[serde(default)]
    pub indexer: Vec<IndexerDefinition>,
}

impl DaemonConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = std::collections::HashSet::new();
        for network in &self.network {
            network.validate()?;
            if !names.insert(network.name.to_lowercase()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate network name {:?}",
                    network.name
                )));
            }
        }
        for def in &self.indexer {
            if def.identifier.trim().is_empty() {
                return Err(ConfigError::Validation("indexer without an identifier".into()));
            }
        }
        Ok(())
    }

    /// Indexer definitions that belong to `network`.
    pub fn definitions_for(&self, network: &NetworkConfig) -> Vec<Arc<IndexerDefinition>> {
        self.indexer
            .iter()
            .filter(|def| def.matches_network(&network.name, &network.server))
            .cloned()
            .map(Arc::new)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r##"
[[network]]
name = "ExampleNet"
server = "irc.example.test"
port = 6697
tls = true
nick = "herald"
invite_command = "  Bot invite secret  "

[network.auth]
mechanism = "nickserv"
password = "hunter2"

[[network.channels]]
name = "#extra"
password = "key"

[[indexer]]
identifier = "example"

[indexer.irc]
server = "IRC.EXAMPLE.TEST"
channels = ["#announce"]
announcers = ["Bot"]

[[indexer.irc.parse.lines]]
pattern = '^(.*)$'
vars = ["torrentName"]

[[indexer]]
identifier = "other"

[indexer.irc]
network = "OtherNet"
channels = ["#other"]
"##;

    #[test]
    fn test_parse_defaults_and_overrides() {
        let config = DaemonConfig::from_toml(CONFIG).unwrap();
        let net = &config.network[0];
        assert!(net.enabled);
        assert_eq!(net.server_addr(), "irc.example.test:6697");
        assert_eq!(net.auth.mechanism, AuthMechanism::Nickserv);
        assert_eq!(net.invite_command(), Some("Bot invite secret"));
        assert_eq!(net.reconnect_delay_secs, 15);
        assert_eq!(net.keepalive_secs, 240);
        assert!(net.channels[0].enabled);

        let connect = net.connect_config();
        assert!(connect.tls);
        assert!(connect.sasl.is_none());
        assert_eq!(connect.connect_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_definitions_matched_by_server() {
        let config = DaemonConfig::from_toml(CONFIG).unwrap();
        let defs = config.definitions_for(&config.network[0]);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].identifier, "example");
    }

    #[test]
    fn test_validation_errors() {
        let missing_password = r#"
[[network]]
name = "a"
server = "irc.a.test"
nick = "n"
[network.auth]
mechanism = "sasl-plain"
account = "acct"
"#;
        assert!(matches!(
            DaemonConfig::from_toml(missing_password),
            Err(ConfigError::Validation(_))
        ));

        let duplicate = r#"
[[network]]
name = "a"
server = "irc.a.test"
nick = "n"
[[network]]
name = "A"
server = "irc.b.test"
nick = "n"
"#;
        assert!(matches!(DaemonConfig::from_toml(duplicate), Err(ConfigError::Validation(_))));
        assert!(matches!(DaemonConfig::from_toml("network = 5"), Err(ConfigError::Parse(_))));
    }
}
