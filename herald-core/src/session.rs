//! Per-network session state shared by the dispatcher and both state
//! machines.
//!
//! Channels and their state machines live in concurrent maps keyed by the
//! lower-cased channel name; each entry carries its own lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use herald_sdk::client::{ClientHandle, Command};
use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::channel::Channel;
use crate::channel_state::ChannelStateMachine;
use crate::config::NetworkConfig;
use crate::error::SessionError;
use crate::event::SessionEvent;

/// Shared slot for the live client handle. Empty while disconnected.
#[derive(Debug, Clone, Default)]
pub struct Outbound {
    client: Arc<RwLock<Option<ClientHandle>>>,
}

impl Outbound {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, client: ClientHandle) {
        *self.client.write() = Some(client);
    }

    pub fn detach(&self) {
        *self.client.write() = None;
    }

    pub fn is_attached(&self) -> bool {
        self.client.read().is_some()
    }

    pub async fn send(&self, cmd: Command) -> Result<(), SessionError> {
        // Clone out so the lock is not held across the await.
        let client = self.client.read().clone();
        let Some(client) = client else {
            return Err(SessionError::NotConnected);
        };
        client
            .send(cmd)
            .await
            .map_err(|e| SessionError::Send(e.to_string()))
    }
}

/// Connection bookkeeping, reset on every disconnect.
#[derive(Debug, Clone, Default)]
pub struct SessionStatus {
    pub connected: bool,
    pub connected_since: Option<DateTime<Utc>>,
    pub last_ping: Option<DateTime<Utc>>,
    pub current_nick: String,
    pub sasl_authenticated: bool,
    pub authenticated: bool,
    /// User mode the server advertises for bots (ISUPPORT `BOT=`).
    pub bot_mode_char: Option<char>,
    /// Kept across reconnects until the next successful registration.
    pub connection_errors: Vec<String>,
}

pub struct Session {
    name: String,
    config: RwLock<NetworkConfig>,
    channels: DashMap<String, Arc<Channel>>,
    machines: DashMap<String, Arc<ChannelStateMachine>>,
    outbound: Outbound,
    events: mpsc::Sender<SessionEvent>,
    status: RwLock<SessionStatus>,
}

impl Session {
    pub fn new(config: NetworkConfig, events: mpsc::Sender<SessionEvent>) -> Self {
        Self {
            name: config.name.clone(),
            config: RwLock::new(config),
            channels: DashMap::new(),
            machines: DashMap::new(),
            outbound: Outbound::new(),
            events,
            status: RwLock::new(SessionStatus::default()),
        }
    }

    /// Snapshot of the current settings.
    pub fn config(&self) -> NetworkConfig {
        self.config.read().clone()
    }

    /// Swap in new settings. Connection parameters take effect on the next
    /// connect; the name never changes.
    pub fn set_config(&self, config: NetworkConfig) {
        *self.config.write() = config;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }

    /// Sender for feedback events into this network's dispatch loop.
    pub fn events(&self) -> mpsc::Sender<SessionEvent> {
        self.events.clone()
    }

    /// Register a channel and create its state machine.
    pub fn add_channel(&self, channel: Arc<Channel>) -> Arc<ChannelStateMachine> {
        let name = channel.name().to_string();
        let machine = Arc::new(ChannelStateMachine::new(
            channel.clone(),
            self.outbound.clone(),
            self.config.read().invite_command().map(|c| c.to_string()),
            self.events.clone(),
        ));
        self.channels.insert(name.clone(), channel);
        self.machines.insert(name, machine.clone());
        machine
    }

    /// Forget a channel and its state machine.
    pub fn remove_channel(&self, name: &str) -> Option<Arc<Channel>> {
        let name = name.to_lowercase();
        self.machines.remove(&name);
        self.channels.remove(&name).map(|(_, c)| c)
    }

    pub fn channel(&self, name: &str) -> Option<Arc<Channel>> {
        self.channels.get(&name.to_lowercase()).map(|c| c.value().clone())
    }

    pub fn machine(&self, name: &str) -> Option<Arc<ChannelStateMachine>> {
        self.machines.get(&name.to_lowercase()).map(|m| m.value().clone())
    }

    /// All channels, sorted by name.
    pub fn channels(&self) -> Vec<Arc<Channel>> {
        let mut channels: Vec<Arc<Channel>> = self.channels.iter().map(|c| c.value().clone()).collect();
        channels.sort_by(|a, b| a.name().cmp(b.name()));
        channels
    }

    pub fn machines(&self) -> Vec<Arc<ChannelStateMachine>> {
        self.machines.iter().map(|m| m.value().clone()).collect()
    }

    pub fn has_enabled_channels(&self) -> bool {
        self.channels.iter().any(|c| c.enabled())
    }

    pub fn status(&self) -> SessionStatus {
        self.status.read().clone()
    }

    /// Our nick as the server knows it, or the configured one before
    /// registration.
    pub fn current_nick(&self) -> String {
        let status = self.status.read();
        if status.current_nick.is_empty() {
            self.config.read().nick.clone()
        } else {
            status.current_nick.clone()
        }
    }

    pub fn is_own_nick(&self, nick: &str) -> bool {
        self.current_nick().eq_ignore_ascii_case(nick)
    }

    pub fn set_nick(&self, nick: &str) {
        self.status.write().current_nick = nick.to_string();
    }

    pub fn mark_registered(&self, nick: &str) {
        let mut status = self.status.write();
        status.connected = true;
        status.connected_since = Some(Utc::now());
        status.current_nick = nick.to_string();
        status.connection_errors.clear();
    }

    pub fn mark_ping(&self) {
        self.status.write().last_ping = Some(Utc::now());
    }

    pub fn set_sasl_authenticated(&self) {
        self.status.write().sasl_authenticated = true;
    }

    pub fn set_authenticated(&self) {
        self.status.write().authenticated = true;
    }

    pub fn set_bot_mode_char(&self, mode: char) {
        self.status.write().bot_mode_char = Some(mode);
    }

    pub fn add_connection_error(&self, reason: &str) {
        let mut status = self.status.write();
        if !status.connection_errors.iter().any(|e| e == reason) {
            status.connection_errors.push(reason.to_string());
        }
    }

    /// Forget the connection: bookkeeping is cleared in one step and every
    /// channel stops monitoring.
    pub fn reset(&self) {
        {
            let mut status = self.status.write();
            let errors = std::mem::take(&mut status.connection_errors);
            *status = SessionStatus {
                connection_errors: errors,
                ..Default::default()
            };
        }
        for machine in self.machines() {
            machine.reset();
        }
    }

    /// `PRIVMSG NickServ :IDENTIFY <password>`.
    pub async fn identify(&self) -> Result<(), SessionError> {
        tracing::debug!(network = %self.name(), "identifying with NickServ");
        let text = format!("IDENTIFY {}", self.config.read().auth.password);
        self.outbound
            .send(Command::Privmsg {
                target: "NickServ".to_string(),
                text,
            })
            .await
    }

    /// `PRIVMSG NickServ :IDENTIFY <account> <password>`, for services that
    /// want both.
    pub async fn identify_with_account(&self) -> Result<(), SessionError> {
        tracing::debug!(network = %self.name(), "identifying with NickServ using account");
        let text = {
            let config = self.config.read();
            format!("IDENTIFY {} {}", config.auth.account, config.auth.password)
        };
        self.outbound
            .send(Command::Privmsg {
                target: "NickServ".to_string(),
                text,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        let (tx, _rx) = mpsc::channel(8);
        Session::new(NetworkConfig::new("TestNet", "irc.test", 6667, "herald"), tx)
    }

    #[test]
    fn test_current_nick_falls_back_to_config() {
        let session = session();
        assert_eq!(session.current_nick(), "herald");
        session.set_nick("herald_");
        assert!(session.is_own_nick("HERALD_"));
        assert!(!session.is_own_nick("herald"));
    }

    #[test]
    fn test_reset_keeps_errors() {
        let session = session();
        session.add_connection_error("ping timeout");
        session.add_connection_error("ping timeout");
        session.mark_ping();
        session.set_bot_mode_char('B');

        session.reset();
        let status = session.status();
        assert!(status.last_ping.is_none());
        assert!(status.bot_mode_char.is_none());
        assert_eq!(status.connection_errors, vec!["ping timeout"]);

        session.mark_registered("herald");
        assert!(session.status().connection_errors.is_empty());
    }

    #[test]
    fn test_config_swap_and_channel_removal() {
        let session = session();
        session.add_channel(Arc::new(Channel::new("#Announce", true, None)));
        assert!(session.machine("#announce").is_some());

        let mut config = session.config();
        config.nick = "crier".into();
        session.set_config(config);
        assert_eq!(session.current_nick(), "crier");
        assert_eq!(session.name(), "TestNet");

        assert!(session.remove_channel("#ANNOUNCE").is_some());
        assert!(session.channel("#announce").is_none());
        assert!(session.machine("#announce").is_none());
        assert!(session.remove_channel("#announce").is_none());
    }

    #[tokio::test]
    async fn test_outbound_requires_client() {
        let outbound = Outbound::new();
        assert_eq!(
            outbound.send(Command::Raw("PING x".into())).await,
            Err(SessionError::NotConnected)
        );

        let (tx, mut rx) = mpsc::channel(4);
        outbound.attach(ClientHandle::new(tx));
        outbound.send(Command::Raw("PING x".into())).await.unwrap();
        assert_eq!(rx.recv().await, Some(Command::Raw("PING x".into())));

        drop(rx);
        assert!(matches!(
            outbound.send(Command::Raw("PING y".into())).await,
            Err(SessionError::Send(_))
        ));
    }
}
