//! Connection state machine for one network.
//!
//! Every transition is checked against a fixed table. Entry actions for the
//! new state run on a spawned task so a handler never blocks on network I/O
//! while holding the state lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use herald_sdk::client::Command;
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::AuthMechanism;
use crate::error::TransitionError;
use crate::event::SessionEvent;
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Authenticating,
    Authenticated,
    JoiningChannels,
    FullyOperational,
    PartiallyOperational,
    Error,
}

impl ConnectionState {
    pub fn can_transition_to(self, to: ConnectionState) -> bool {
        use ConnectionState::*;
        match self {
            Disconnected => matches!(to, Connecting | Connected),
            Connecting => matches!(to, Connected | Disconnected | Error),
            Connected => matches!(
                to,
                Authenticating | Authenticated | PartiallyOperational | Disconnected | Error
            ),
            Authenticating => matches!(
                to,
                Authenticated | PartiallyOperational | Disconnected | Error
            ),
            Authenticated => matches!(
                to,
                JoiningChannels | FullyOperational | PartiallyOperational | Disconnected | Error
            ),
            JoiningChannels => matches!(
                to,
                FullyOperational | PartiallyOperational | Disconnected | Error
            ),
            FullyOperational => matches!(to, PartiallyOperational | Disconnected | Error),
            PartiallyOperational => matches!(to, FullyOperational | Disconnected | Error),
            Error => matches!(to, Disconnected | Connecting),
        }
    }
}

/// Aggregate channel health into a connection state.
///
/// `None` means some channels are still joining and the state should stay
/// as it is.
pub fn aggregate_channels(enabled: usize, monitoring: usize, errored: usize) -> Option<ConnectionState> {
    if enabled == 0 || monitoring >= enabled {
        return Some(ConnectionState::FullyOperational);
    }
    if enabled.saturating_sub(monitoring + errored) > 0 {
        return None;
    }
    if monitoring == 0 {
        Some(ConnectionState::Error)
    } else {
        Some(ConnectionState::PartiallyOperational)
    }
}

pub struct ConnectionStateMachine {
    state: Mutex<ConnectionState>,
    session: Arc<Session>,
    awaiting_bot_mode: AtomicBool,
}

impl ConnectionStateMachine {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            session,
            awaiting_bot_mode: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Move to `to` if the table allows it, then start its entry action.
    /// A rejected transition is logged and leaves the state unchanged.
    pub fn transition(&self, to: ConnectionState) -> Result<(), TransitionError> {
        let from = {
            let mut state = self.state.lock();
            let from = *state;
            if !from.can_transition_to(to) {
                tracing::error!(network = %self.session.name(), ?from, ?to, "invalid state transition");
                return Err(TransitionError { from, to });
            }
            *state = to;
            from
        };
        tracing::debug!(network = %self.session.name(), ?from, ?to, "connection state changed");
        self.spawn_entry_action(to);
        Ok(())
    }

    fn spawn_entry_action(&self, state: ConnectionState) {
        if !matches!(
            state,
            ConnectionState::Authenticating
                | ConnectionState::JoiningChannels
                | ConnectionState::FullyOperational
                | ConnectionState::PartiallyOperational
        ) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(network = %self.session.name(), ?state, "no runtime, skipping entry action");
            return;
        };
        let session = self.session.clone();
        runtime.spawn(async move { run_entry_action(session, state).await });
    }

    pub fn on_connecting(&self) -> Result<(), TransitionError> {
        self.transition(ConnectionState::Connecting)
    }

    /// Registration is complete. Sets the bot mode first when asked to and
    /// the server supports it, then authenticates.
    pub fn on_connected(&self) {
        if self.transition(ConnectionState::Connected).is_err() {
            return;
        }
        let config = self.session.config();
        if config.bot_mode {
            match self.session.status().bot_mode_char {
                Some(mode) => {
                    self.awaiting_bot_mode.store(true, Ordering::SeqCst);
                    let session = self.session.clone();
                    let nick = session.current_nick();
                    tracing::info!(network = %session.name(), %nick, %mode, "setting bot mode");
                    tokio::spawn(async move {
                        let cmd = Command::Mode {
                            target: nick,
                            flags: format!("+{mode}"),
                            arg: None,
                        };
                        if let Err(e) = session.outbound().send(cmd).await {
                            tracing::warn!(network = %session.name(), error = %e, "could not set bot mode");
                        }
                    });
                    return;
                }
                None => {
                    tracing::debug!(network = %config.name, "server does not advertise a bot mode");
                }
            }
        }
        self.begin_authentication();
    }

    pub fn is_awaiting_bot_mode(&self) -> bool {
        self.awaiting_bot_mode.load(Ordering::SeqCst)
    }

    pub fn on_bot_mode_acknowledged(&self) {
        if self.awaiting_bot_mode.swap(false, Ordering::SeqCst) {
            tracing::info!(network = %self.session.name(), "bot mode set");
            self.begin_authentication();
        }
    }

    fn begin_authentication(&self) {
        if self.session.status().sasl_authenticated {
            self.on_authenticated();
            return;
        }
        match self.session.config().auth.mechanism {
            AuthMechanism::None => self.on_authenticated(),
            AuthMechanism::Nickserv => {
                let _ = self.transition(ConnectionState::Authenticating);
            }
            AuthMechanism::SaslPlain => self.on_error("SASL authentication did not complete"),
        }
    }

    /// Only acts while connecting or authenticating.
    pub fn on_authenticated(&self) {
        let current = self.state();
        if !matches!(current, ConnectionState::Connected | ConnectionState::Authenticating) {
            tracing::trace!(network = %self.session.name(), state = ?current, "ignoring authentication");
            return;
        }
        if self.transition(ConnectionState::Authenticated).is_err() {
            return;
        }
        self.session.set_authenticated();
        tracing::info!(network = %self.session.name(), "authenticated");

        let next = if self.session.has_enabled_channels() {
            ConnectionState::JoiningChannels
        } else {
            ConnectionState::FullyOperational
        };
        let _ = self.transition(next);
    }

    pub fn on_channel_joined(&self, channel: &str) {
        tracing::debug!(network = %self.session.name(), %channel, "channel joined");
        self.update_operational_state();
    }

    pub fn on_channel_error(&self, channel: &str, reason: &str) {
        tracing::warn!(network = %self.session.name(), %channel, %reason, "channel error");
        self.update_operational_state();
    }

    pub fn on_error(&self, reason: &str) {
        tracing::error!(network = %self.session.name(), %reason, "connection error");
        self.session.add_connection_error(reason);
        let _ = self.transition(ConnectionState::Error);
    }

    /// Forget the connection. Bookkeeping and channels are reset even when
    /// already disconnected.
    pub fn on_disconnected(&self, reason: &str) {
        if self.state() != ConnectionState::Disconnected {
            tracing::info!(network = %self.session.name(), %reason, "disconnected");
            let _ = self.transition(ConnectionState::Disconnected);
        }
        self.awaiting_bot_mode.store(false, Ordering::SeqCst);
        self.session.reset();
    }

    /// Recompute the aggregate state from the enabled channels.
    pub fn update_operational_state(&self) {
        let current = self.state();
        if !matches!(
            current,
            ConnectionState::Authenticated
                | ConnectionState::JoiningChannels
                | ConnectionState::FullyOperational
                | ConnectionState::PartiallyOperational
        ) {
            return;
        }

        let (mut enabled, mut monitoring, mut errored) = (0, 0, 0);
        for channel in self.session.channels().iter().filter(|c| c.enabled()) {
            enabled += 1;
            let status = channel.status();
            if status.monitoring && status.error.is_empty() {
                monitoring += 1;
            } else if !status.error.is_empty() {
                errored += 1;
            }
        }

        match aggregate_channels(enabled, monitoring, errored) {
            None => {
                tracing::debug!(network = %self.session.name(), enabled, monitoring, errored, "channels still joining");
            }
            Some(next) if next != current => {
                if next == ConnectionState::Error {
                    self.session.add_connection_error("all channels failed");
                }
                let _ = self.transition(next);
            }
            Some(_) => {}
        }
    }
}

async fn run_entry_action(session: Arc<Session>, state: ConnectionState) {
    match state {
        ConnectionState::Authenticating => {
            if let Err(e) = session.identify().await {
                let reason = format!("NickServ identify failed: {e}");
                if session.events().send(SessionEvent::AuthFailed { reason }).await.is_err() {
                    tracing::debug!(network = %session.name(), "session gone, dropping auth failure");
                }
            }
        }
        ConnectionState::JoiningChannels => {
            for machine in session.machines() {
                if machine.channel().enabled() {
                    machine.start();
                }
            }
        }
        ConnectionState::FullyOperational | ConnectionState::PartiallyOperational => {
            tracing::info!(network = %session.name(), ?state, "network operational");
        }
        _ => {}
    }
}
