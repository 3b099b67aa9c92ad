//! Health snapshots for observability.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::channel_state::ChannelState;
use crate::state::ConnectionState;

#[derive(Debug, Clone, Serialize)]
pub struct ChannelHealth {
    pub name: String,
    pub enabled: bool,
    pub state: ChannelState,
    pub monitoring: bool,
    pub monitoring_since: Option<DateTime<Utc>>,
    pub last_announce: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkHealth {
    pub name: String,
    pub enabled: bool,
    pub server: String,
    pub nick: String,
    pub connected: bool,
    pub connected_since: Option<DateTime<Utc>>,
    pub last_ping: Option<DateTime<Utc>>,
    pub state: ConnectionState,
    pub healthy: bool,
    pub connection_errors: Vec<String>,
    pub channels: Vec<ChannelHealth>,
}

/// A network is healthy when it is enabled, connected and monitoring every
/// enabled channel.
pub fn is_healthy(enabled: bool, connected: bool, channels: &[ChannelHealth]) -> bool {
    enabled && connected && channels.iter().filter(|c| c.enabled).all(|c| c.monitoring)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(enabled: bool, monitoring: bool) -> ChannelHealth {
        ChannelHealth {
            name: "#a".into(),
            enabled,
            state: if monitoring { ChannelState::Monitoring } else { ChannelState::Idle },
            monitoring,
            monitoring_since: None,
            last_announce: None,
            error: String::new(),
        }
    }

    #[test]
    fn test_disabled_channels_do_not_count() {
        assert!(is_healthy(true, true, &[channel(true, true), channel(false, false)]));
        assert!(!is_healthy(true, true, &[channel(true, false)]));
        assert!(!is_healthy(true, false, &[]));
        assert!(!is_healthy(false, true, &[]));
        assert!(is_healthy(true, true, &[]));
    }

    #[test]
    fn test_serializes_states_in_snake_case() {
        let json = serde_json::to_value(channel(true, true)).unwrap();
        assert_eq!(json["state"], "monitoring");
        assert!(json.get("error").is_none());
    }
}
