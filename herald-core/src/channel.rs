//! Channel entity: configuration plus monitoring status.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

/// Snapshot of a channel's monitoring status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelStatus {
    pub monitoring: bool,
    pub monitoring_since: Option<DateTime<Utc>>,
    pub last_announce: Option<DateTime<Utc>>,
    /// Empty while healthy.
    pub error: String,
}

/// A channel on one network.
///
/// `monitoring` and `error` are mutually exclusive: entering one clears the
/// other.
#[derive(Debug)]
pub struct Channel {
    name: String,
    enabled: bool,
    password: Option<String>,
    /// Lower-cased announcer nicks.
    announcers: RwLock<HashSet<String>>,
    status: RwLock<ChannelStatus>,
}

impl Channel {
    pub fn new(name: &str, enabled: bool, password: Option<String>) -> Self {
        Self {
            name: name.to_lowercase(),
            enabled,
            password: password.filter(|p| !p.is_empty()),
            announcers: RwLock::new(HashSet::new()),
            status: RwLock::new(ChannelStatus::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn add_announcers<I, S>(&self, nicks: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut announcers = self.announcers.write();
        announcers.extend(nicks.into_iter().map(|n| n.as_ref().to_lowercase()));
    }

    pub fn is_announcer(&self, nick: &str) -> bool {
        self.announcers.read().contains(&nick.to_lowercase())
    }

    pub fn status(&self) -> ChannelStatus {
        self.status.read().clone()
    }

    pub fn is_monitoring(&self) -> bool {
        self.status.read().monitoring
    }

    pub fn error(&self) -> String {
        self.status.read().error.clone()
    }

    /// Joined and receiving announces. Clears any previous error.
    pub fn set_monitoring(&self) {
        let mut status = self.status.write();
        status.monitoring = true;
        status.monitoring_since = Some(Utc::now());
        status.error.clear();
    }

    /// Record a failure. Always clears monitoring.
    pub fn set_error(&self, reason: &str) {
        let mut status = self.status.write();
        status.monitoring = false;
        status.monitoring_since = None;
        status.error = reason.to_string();
    }

    pub fn clear_error(&self) {
        self.status.write().error.clear();
    }

    /// Left the channel or lost the connection.
    pub fn reset_monitoring(&self) {
        let mut status = self.status.write();
        status.monitoring = false;
        status.monitoring_since = None;
    }

    pub fn touch_announce(&self) {
        self.status.write().last_announce = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitoring_and_error_exclusive() {
        let channel = Channel::new("#Announce", true, None);
        assert_eq!(channel.name(), "#announce");

        channel.set_error("banned");
        assert!(!channel.is_monitoring());
        assert_eq!(channel.error(), "banned");

        channel.set_monitoring();
        let status = channel.status();
        assert!(status.monitoring);
        assert!(status.monitoring_since.is_some());
        assert!(status.error.is_empty());

        channel.set_error("kicked");
        let status = channel.status();
        assert!(!status.monitoring);
        assert!(status.monitoring_since.is_none());
    }

    #[test]
    fn test_announcers_case_insensitive() {
        let channel = Channel::new("#a", true, Some(String::new()));
        assert_eq!(channel.password(), None);
        channel.add_announcers(["Announce-Bot"]);
        assert!(channel.is_announcer("announce-bot"));
        assert!(channel.is_announcer("ANNOUNCE-BOT"));
        assert!(!channel.is_announcer("someone"));
    }
}
