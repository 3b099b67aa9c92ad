//! Events consumed by a network's dispatch loop.
//!
//! Wire events and feedback from state-machine entry actions share one
//! queue so a network never processes two events at once.

use herald_sdk::event::Event;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Registration finished and the MOTD is done.
    Connect,
    Registered { nick: String },
    ISupport { tokens: Vec<String> },
    SaslSuccess { account: String },
    /// End of NAMES: our join of `channel` is confirmed.
    Joined { channel: String },
    Part { channel: String, nick: String },
    Kick { channel: String, nick: String, by: String, reason: String },
    Invite { channel: String, by: String },
    Mode { target: String, mode: String, arg: Option<String>, set_by: String },
    Message { from: String, target: String, text: String },
    Notice { from: Option<String>, target: String, text: String },
    NickChange { old_nick: String, new_nick: String },
    JoinFailed { channel: String, reason: String },
    NoSuchNick { nick: String },
    Ping,
    Disconnected { reason: String },

    /// A channel's join workflow failed outside the dispatch loop.
    ChannelFailed { channel: String, reason: String },
    /// Authentication was rejected.
    AuthFailed { reason: String },
}

impl SessionEvent {
    /// Translate a wire event. Events the session does not act on map to `None`.
    pub fn from_wire(event: Event) -> Option<Self> {
        let translated = match event {
            Event::Connected => return None,
            Event::Registered { nick } => SessionEvent::Registered { nick },
            Event::ISupport { tokens } => SessionEvent::ISupport { tokens },
            Event::Ready => SessionEvent::Connect,
            Event::Authenticated { account } => SessionEvent::SaslSuccess { account },
            Event::AuthFailed { reason } => SessionEvent::AuthFailed { reason },
            // Membership is confirmed by end of NAMES instead.
            Event::Joined { .. } => return None,
            Event::NamesEnd { channel } => SessionEvent::Joined { channel },
            Event::Parted { channel, nick } => SessionEvent::Part { channel, nick },
            Event::Kicked { channel, nick, by, reason } => SessionEvent::Kick { channel, nick, by, reason },
            Event::Invited { channel, by } => SessionEvent::Invite { channel, by },
            Event::ModeChanged { target, mode, arg, set_by } => SessionEvent::Mode { target, mode, arg, set_by },
            Event::Message { from, target, text } => SessionEvent::Message { from, target, text },
            Event::Notice { from, target, text } => SessionEvent::Notice { from, target, text },
            Event::NickChanged { old_nick, new_nick } => SessionEvent::NickChange { old_nick, new_nick },
            Event::NoSuchNick { nick } => SessionEvent::NoSuchNick { nick },
            Event::JoinFailed { channel, reason } => SessionEvent::JoinFailed { channel, reason },
            Event::Ping | Event::Pong => SessionEvent::Ping,
            Event::Disconnected { reason } => SessionEvent::Disconnected { reason },
        };
        Some(translated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_end_is_join_confirmation() {
        assert_eq!(
            SessionEvent::from_wire(Event::NamesEnd { channel: "#a".into() }),
            Some(SessionEvent::Joined { channel: "#a".into() })
        );
        assert_eq!(
            SessionEvent::from_wire(Event::Joined { channel: "#a".into(), nick: "herald".into() }),
            None
        );
    }

    #[test]
    fn test_ready_is_connect() {
        assert_eq!(SessionEvent::from_wire(Event::Ready), Some(SessionEvent::Connect));
        assert_eq!(SessionEvent::from_wire(Event::Connected), None);
        assert_eq!(SessionEvent::from_wire(Event::Pong), Some(SessionEvent::Ping));
    }
}
