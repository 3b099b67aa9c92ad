//! Per-channel join workflow.
//!
//! ```text
//! Idle ──start──▶ AwaitingInvite ──invite──▶ Joining ──joined──▶ Monitoring
//!   ▲               │                          │                    │
//!   │               └──────────error───────────┴────────────────────┤
//!   └───────────────────────────parted──────────────────────────────┘
//! ```
//!
//! `Error` is not terminal; a later `start()` tries again.

use std::sync::Arc;
use std::time::Duration;

use herald_sdk::client::Command;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::channel::Channel;
use crate::error::SessionError;
use crate::event::SessionEvent;
use crate::session::Outbound;

/// Delay after each invite message, to stay under tracker flood limits.
pub const INVITE_PACING: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Idle,
    AwaitingInvite,
    Joining,
    Monitoring,
    Error,
}

/// One message of an invite command: `PRIVMSG <target> :<message>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteCommand {
    pub target: String,
    pub message: String,
}

/// Parse an invite command setting.
///
/// Several commands may be separated by `,`. A leading `/msg` is accepted
/// and dropped. Each command is split on its first space.
pub fn parse_invite_commands(raw: &str) -> Result<Vec<InviteCommand>, SessionError> {
    let mut commands = Vec::new();
    for part in raw.split(',') {
        let mut part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some(rest) = strip_prefix_ignore_case(part, "/msg ") {
            part = rest.trim_start();
        }
        let Some((target, message)) = part.split_once(' ') else {
            return Err(SessionError::InvalidInviteCommand(part.to_string()));
        };
        let message = message.trim();
        if target.is_empty() || message.is_empty() {
            return Err(SessionError::InvalidInviteCommand(part.to_string()));
        }
        commands.push(InviteCommand {
            target: target.to_string(),
            message: message.to_string(),
        });
    }
    if commands.is_empty() {
        return Err(SessionError::InvalidInviteCommand(raw.to_string()));
    }
    Ok(commands)
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

pub struct ChannelStateMachine {
    state: Mutex<ChannelState>,
    channel: Arc<Channel>,
    outbound: Outbound,
    invite_command: Option<String>,
    events: mpsc::Sender<SessionEvent>,
    pacing: Duration,
}

impl ChannelStateMachine {
    pub fn new(
        channel: Arc<Channel>,
        outbound: Outbound,
        invite_command: Option<String>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            state: Mutex::new(ChannelState::Idle),
            channel,
            outbound,
            invite_command,
            events,
            pacing: INVITE_PACING,
        }
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    pub fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    /// Begin joining. Does nothing while a join is in flight or the channel
    /// is already monitored.
    pub fn start(&self) {
        let next = {
            let mut state = self.state.lock();
            if matches!(
                *state,
                ChannelState::AwaitingInvite | ChannelState::Joining | ChannelState::Monitoring
            ) {
                tracing::trace!(channel = %self.channel.name(), state = ?*state, "channel already started");
                return;
            }
            if !self.channel.enabled() {
                tracing::debug!(channel = %self.channel.name(), "channel disabled, not joining");
                return;
            }
            let next = if self.invite_command.is_some() {
                ChannelState::AwaitingInvite
            } else {
                ChannelState::Joining
            };
            tracing::debug!(channel = %self.channel.name(), from = ?*state, to = ?next, "channel state changed");
            *state = next;
            next
        };

        match next {
            ChannelState::AwaitingInvite => self.spawn_invite(),
            _ => self.spawn_join(),
        }
    }

    /// An invite for this channel arrived. Returns whether it was acted on.
    pub fn on_invite(&self, by: &str) -> bool {
        {
            let mut state = self.state.lock();
            if *state != ChannelState::AwaitingInvite {
                tracing::debug!(channel = %self.channel.name(), %by, state = ?*state, "ignoring unexpected invite");
                return false;
            }
            *state = ChannelState::Joining;
        }
        tracing::info!(channel = %self.channel.name(), %by, "invited, joining");
        self.spawn_join();
        true
    }

    pub fn on_join_success(&self) {
        *self.state.lock() = ChannelState::Monitoring;
        self.channel.set_monitoring();
        tracing::info!(channel = %self.channel.name(), "monitoring channel");
    }

    pub fn on_parted(&self) {
        let mut state = self.state.lock();
        if *state != ChannelState::Monitoring {
            return;
        }
        *state = ChannelState::Idle;
        self.channel.reset_monitoring();
        tracing::info!(channel = %self.channel.name(), "left channel");
    }

    pub fn on_error(&self, reason: &str) {
        *self.state.lock() = ChannelState::Error;
        self.channel.set_error(reason);
        tracing::warn!(channel = %self.channel.name(), %reason, "channel failed");
    }

    /// Back to `Idle` after a disconnect. The last error stays on the channel
    /// until the next successful join.
    pub fn reset(&self) {
        *self.state.lock() = ChannelState::Idle;
        self.channel.reset_monitoring();
    }

    fn spawn_join(&self) {
        let outbound = self.outbound.clone();
        let events = self.events.clone();
        let channel = self.channel.name().to_string();
        let key = self.channel.password().map(str::to_string);
        tokio::spawn(async move {
            tracing::debug!(%channel, "joining");
            let cmd = Command::Join {
                channel: channel.clone(),
                key,
            };
            if let Err(e) = outbound.send(cmd).await {
                report_failure(&events, channel, format!("join failed: {e}")).await;
            }
        });
    }

    fn spawn_invite(&self) {
        let outbound = self.outbound.clone();
        let events = self.events.clone();
        let channel = self.channel.name().to_string();
        let raw = self.invite_command.clone().unwrap_or_default();
        let pacing = self.pacing;
        tokio::spawn(async move {
            let commands = match parse_invite_commands(&raw) {
                Ok(commands) => commands,
                Err(e) => {
                    report_failure(&events, channel, e.to_string()).await;
                    return;
                }
            };
            for invite in commands {
                tracing::debug!(%channel, target = %invite.target, "sending invite command");
                let cmd = Command::Privmsg {
                    target: invite.target,
                    text: invite.message,
                };
                if let Err(e) = outbound.send(cmd).await {
                    report_failure(&events, channel, format!("invite command failed: {e}")).await;
                    return;
                }
                tokio::time::sleep(pacing).await;
            }
        });
    }
}

async fn report_failure(events: &mpsc::Sender<SessionEvent>, channel: String, reason: String) {
    if events
        .send(SessionEvent::ChannelFailed { channel, reason })
        .await
        .is_err()
    {
        tracing::debug!("session gone, dropping channel failure");
    }
}
