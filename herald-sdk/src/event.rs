//! Events emitted by the IRC client for the session layer to consume.

/// Events that the SDK emits to the consumer (announce session, tools, tests).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// TCP (and TLS) established; registration is starting.
    Connected,

    /// IRC registration complete (001). `nick` is our confirmed nick.
    Registered {
        nick: String,
    },

    /// RPL_ISUPPORT (005) tokens, e.g. `BOT=B`, `CHANTYPES=#`.
    ISupport {
        tokens: Vec<String>,
    },

    /// End of MOTD (376) or no MOTD (422). The server is ready for commands.
    Ready,

    /// SASL authentication result.
    Authenticated {
        account: String,
    },
    AuthFailed {
        reason: String,
    },

    /// Someone (possibly us) joined a channel.
    Joined {
        channel: String,
        nick: String,
    },

    /// End of NAMES list (366); our JOIN is complete.
    NamesEnd {
        channel: String,
    },

    /// Someone (possibly us) left a channel.
    Parted {
        channel: String,
        nick: String,
    },

    /// Someone (possibly us) was kicked from a channel.
    Kicked {
        channel: String,
        nick: String,
        by: String,
        reason: String,
    },

    /// We were invited to a channel.
    Invited {
        channel: String,
        by: String,
    },

    /// Channel or user mode changed.
    ModeChanged {
        target: String,
        mode: String,
        arg: Option<String>,
        set_by: String,
    },

    /// A PRIVMSG to a channel or to us.
    Message {
        from: String,
        target: String,
        text: String,
    },

    /// A NOTICE. `from` is `None` for server notices.
    Notice {
        from: Option<String>,
        target: String,
        text: String,
    },

    /// A user changed nick.
    NickChanged {
        old_nick: String,
        new_nick: String,
    },

    /// ERR_NOSUCHNICK (401), typically an invite bot that is not online.
    NoSuchNick {
        nick: String,
    },

    /// A JOIN was refused (403, 405, 471, 473, 474, 475, 477).
    JoinFailed {
        channel: String,
        reason: String,
    },

    /// Server PING answered.
    Ping,

    /// Server answered our keepalive PING.
    Pong,

    /// Connection was closed.
    Disconnected {
        reason: String,
    },
}
