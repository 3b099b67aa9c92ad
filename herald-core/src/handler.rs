//! Session dispatcher: one per network.
//!
//! Owns the wire connection, both state machines, and the announce queues of
//! the network's channels. Wire events and state-machine feedback are
//! consumed by a single loop, so handlers for one network never run
//! concurrently.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use herald_sdk::client::{self, ClientHandle, Command};
use herald_sdk::event::Event;
use herald_sdk::format::strip_formatting;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::announce::AnnounceSink;
use crate::channel::Channel;
use crate::channel_state::{ChannelState, parse_invite_commands};
use crate::config::{AuthMechanism, NetworkConfig};
use crate::definition::IndexerDefinition;
use crate::error::SessionError;
use crate::event::SessionEvent;
use crate::health::{ChannelHealth, NetworkHealth, is_healthy};
use crate::queue::AnnounceQueue;
use crate::session::Session;
use crate::state::{ConnectionState, ConnectionStateMachine};

/// Pending events per network.
pub const EVENT_QUEUE_CAPACITY: usize = 1024;
/// How long to wait for the server to close the link after `QUIT`.
pub const QUIT_GRACE: Duration = Duration::from_secs(5);
/// Pause between stop and start on restart.
pub const RESTART_COOLDOWN: Duration = Duration::from_secs(5);
/// NickServ "nick is protected" notices tolerated before giving up.
const MAX_IDENTIFY_ATTEMPTS: u32 = 3;

const QUIT_MESSAGE: &str = "herald shutting down";

const NICKSERV_IDENTIFIED: &[&str] = &[
    "you are now identified",
    "password accepted",
    "you are now logged in",
    "you're now logged in as",
    "you are now recognized",
];
const NICKSERV_BAD_CREDENTIALS: &[&str] = &["invalid account credentials", "password incorrect"];
const NICKSERV_NO_ACCOUNT: &[&str] = &["account does not exist", "isn't registered"];
const NICKSERV_PROTECTED: &[&str] = &["registered and protected"];
const NICKSERV_WANTS_ACCOUNT: &[&str] = &["invalid parameters", "help identify"];

fn contains_any(text: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|p| text.contains(p))
}

/// Whether a mode string such as `+iB-x` adds `flag`.
fn mode_added(modes: &str, flag: char) -> bool {
    let mut adding = true;
    for c in modes.chars() {
        match c {
            '+' => adding = true,
            '-' => adding = false,
            c if c == flag => return adding,
            _ => {}
        }
    }
    false
}

/// The network's channels: every indexer channel with the network's
/// overrides applied, then the extra channels the network lists.
fn planned_channels(config: &NetworkConfig, definitions: &[Arc<IndexerDefinition>]) -> Vec<Channel> {
    let mut planned = Vec::new();
    let mut seen = HashSet::new();
    for name in definitions.iter().flat_map(|d| d.channel_names()) {
        if !seen.insert(name.clone()) {
            continue;
        }
        let overrides = config.channels.iter().find(|c| c.name.eq_ignore_ascii_case(&name));
        let channel = Channel::new(
            &name,
            overrides.is_none_or(|c| c.enabled),
            overrides.and_then(|c| c.password.clone()),
        );
        for def in definitions.iter().filter(|d| d.channel_names().any(|n| n == name)) {
            channel.add_announcers(&def.irc.announcers);
        }
        planned.push(channel);
    }
    for extra in &config.channels {
        if seen.insert(extra.name.to_lowercase()) {
            planned.push(Channel::new(&extra.name, extra.enabled, extra.password.clone()));
        }
    }
    planned
}

fn enabled_channels(session: &Session) -> HashSet<String> {
    session
        .channels()
        .iter()
        .filter(|c| c.enabled())
        .map(|c| c.name().to_string())
        .collect()
}

enum Outcome {
    Stopped,
    Disconnected { registered: bool },
}

pub struct Handler {
    session: Arc<Session>,
    connection: ConnectionStateMachine,
    definitions: Vec<Arc<IndexerDefinition>>,
    /// Definition that parses each channel's announces.
    channel_definitions: HashMap<String, Arc<IndexerDefinition>>,
    /// Lower-cased announcer nicks across every definition on the network.
    valid_announcers: HashSet<String>,
    /// Lower-cased names of enabled channels.
    valid_channels: RwLock<HashSet<String>>,
    /// Lower-cased invite-command targets.
    invite_targets: HashSet<String>,
    queues: DashMap<String, AnnounceQueue>,
    sink: Arc<dyn AnnounceSink>,
    events_rx: tokio::sync::Mutex<mpsc::Receiver<SessionEvent>>,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    identify_attempts: AtomicU32,
    account_identify_sent: AtomicBool,
}

impl Handler {
    pub fn new(
        config: NetworkConfig,
        definitions: Vec<Arc<IndexerDefinition>>,
        sink: Arc<dyn AnnounceSink>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let invite_targets = match config.invite_command().map(parse_invite_commands) {
            Some(Ok(commands)) => commands.into_iter().map(|c| c.target.to_lowercase()).collect(),
            Some(Err(e)) => {
                tracing::warn!(network = %config.name, error = %e, "invite command will fail");
                HashSet::new()
            }
            None => HashSet::new(),
        };
        let session = Arc::new(Session::new(config, events_tx));
        let config = session.config();
        for channel in planned_channels(&config, &definitions) {
            session.add_channel(Arc::new(channel));
        }

        let mut channel_definitions: HashMap<String, Arc<IndexerDefinition>> = HashMap::new();
        let mut valid_announcers = HashSet::new();
        for def in &definitions {
            for name in def.channel_names() {
                if let Some(existing) = channel_definitions.get(&name) {
                    tracing::warn!(
                        network = %config.name,
                        channel = %name,
                        indexer = %def.identifier,
                        using = %existing.identifier,
                        "channel already parsed by another indexer"
                    );
                } else {
                    channel_definitions.insert(name, def.clone());
                }
            }
            valid_announcers.extend(def.irc.announcers.iter().map(|a| a.to_lowercase()));
        }
        let valid_channels = RwLock::new(enabled_channels(&session));

        let (stop_tx, _) = watch::channel(false);
        Self {
            connection: ConnectionStateMachine::new(session.clone()),
            session,
            definitions,
            channel_definitions,
            valid_announcers,
            valid_channels,
            invite_targets,
            queues: DashMap::new(),
            sink,
            events_rx: tokio::sync::Mutex::new(events_rx),
            stop_tx,
            task: Mutex::new(None),
            identify_attempts: AtomicU32::new(0),
            account_identify_sent: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        self.session.name()
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn connection(&self) -> &ConnectionStateMachine {
        &self.connection
    }

    /// Use an already connected client instead of dialing.
    pub fn attach_client(&self, client: ClientHandle) {
        self.session.outbound().attach(client);
    }

    /// Create the announce queue of every channel an indexer parses.
    pub fn open_queues(&self) {
        for (name, def) in &self.channel_definitions {
            if self.queues.contains_key(name) {
                continue;
            }
            let queue = AnnounceQueue::spawn(self.name(), name, def.clone(), self.sink.clone());
            self.queues.insert(name.clone(), queue);
        }
    }

    async fn close_queues(&self) {
        let names: Vec<String> = self.queues.iter().map(|q| q.key().clone()).collect();
        for name in names {
            if let Some((_, queue)) = self.queues.remove(&name) {
                queue.close().await;
            }
        }
    }

    /// Open the queues and spawn the connection loop. Does nothing while the
    /// loop is already running.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            tracing::debug!(network = %self.name(), "network already running");
            return;
        }
        self.stop_tx.send_replace(false);
        self.identify_attempts.store(0, Ordering::SeqCst);
        self.account_identify_sent.store(false, Ordering::SeqCst);
        self.open_queues();

        let handler = self.clone();
        let stop_rx = self.stop_tx.subscribe();
        *task = Some(tokio::spawn(async move { handler.run(stop_rx).await }));
        tracing::info!(network = %self.name(), "network started");
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Ask the loop to quit without waiting for it.
    fn request_stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Quit, wait for the connection loop and close every queue.
    pub async fn stop(&self) {
        self.request_stop();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(network = %self.name(), error = %e, "connection loop ended abnormally");
            }
        }
        self.session.outbound().detach();
        self.connection.on_disconnected("stopped");
        self.close_queues().await;
        tracing::info!(network = %self.name(), "network stopped");
    }

    pub async fn restart(self: &Arc<Self>) {
        self.stop().await;
        tokio::time::sleep(RESTART_COOLDOWN).await;
        self.start();
    }

    async fn run(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) {
        let reconnect = self.session.config().reconnect_config();
        let mut delay = reconnect.initial_delay;
        let mut events = self.events_rx.lock().await;
        // Feedback left over from a previous run.
        while events.try_recv().is_ok() {}

        while !*stop_rx.borrow() {
            let _ = self.connection.on_connecting();
            let connect = self.session.config().connect_config();
            tracing::info!(network = %self.name(), server = %connect.server_addr, tls = connect.tls, "connecting");

            let dialed = tokio::select! {
                result = client::establish_connection(&connect) => result,
                _ = stop_rx.changed() => break,
            };
            match dialed {
                Ok(conn) => {
                    let (client, wire_events) = client::connect_with_stream(conn, connect);
                    self.session.outbound().attach(client);
                    let forwarder = tokio::spawn(forward_wire_events(wire_events, self.session.events()));

                    let outcome = self.process_events(&mut events, &mut stop_rx).await;
                    forwarder.abort();
                    self.session.outbound().detach();
                    match outcome {
                        Outcome::Stopped => break,
                        Outcome::Disconnected { registered: true } => delay = reconnect.initial_delay,
                        Outcome::Disconnected { registered: false } => {}
                    }
                }
                Err(e) => {
                    tracing::warn!(network = %self.name(), error = %e, "connection failed");
                    self.connection.on_error(&format!("connection failed: {e}"));
                }
            }

            tracing::info!(network = %self.name(), delay_secs = delay.as_secs(), "reconnecting");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop_rx.changed() => break,
            }
            delay = reconnect.next_delay(delay);
        }

        self.session.outbound().detach();
        self.connection.on_disconnected("stopped");
        self.close_queues().await;
        tracing::debug!(network = %self.name(), "connection loop finished");
    }

    async fn process_events(
        &self,
        events: &mut mpsc::Receiver<SessionEvent>,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> Outcome {
        let mut registered = false;
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        return Outcome::Disconnected { registered };
                    };
                    registered |= matches!(event, SessionEvent::Registered { .. });
                    let done = matches!(event, SessionEvent::Disconnected { .. });
                    self.dispatch(event).await;
                    if done {
                        return if *stop_rx.borrow() {
                            Outcome::Stopped
                        } else {
                            Outcome::Disconnected { registered }
                        };
                    }
                }
                _ = stop_rx.changed() => {
                    self.quit(events).await;
                    return Outcome::Stopped;
                }
            }
        }
    }

    /// Send `QUIT` and keep dispatching until the server closes the link or
    /// the grace period runs out.
    async fn quit(&self, events: &mut mpsc::Receiver<SessionEvent>) {
        if let Err(e) = self.session.outbound().send(Command::Quit(Some(QUIT_MESSAGE.to_string()))).await {
            tracing::debug!(network = %self.name(), error = %e, "could not send QUIT");
            return;
        }
        let grace = tokio::time::sleep(QUIT_GRACE);
        tokio::pin!(grace);
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { return };
                    let done = matches!(event, SessionEvent::Disconnected { .. });
                    self.dispatch(event).await;
                    if done {
                        return;
                    }
                }
                _ = &mut grace => {
                    tracing::debug!(network = %self.name(), "server kept the link open after QUIT");
                    return;
                }
            }
        }
    }

    /// Dispatch every event already waiting, without blocking. Returns how
    /// many were handled. Does nothing while the connection loop owns the
    /// queue.
    pub async fn process_pending_events(&self) -> usize {
        let Ok(mut events) = self.events_rx.try_lock() else {
            return 0;
        };
        let mut handled = 0;
        while let Ok(event) = events.try_recv() {
            self.dispatch(event).await;
            handled += 1;
        }
        handled
    }

    pub async fn dispatch(&self, event: SessionEvent) {
        tracing::trace!(network = %self.name(), ?event, "dispatching");
        match event {
            SessionEvent::Registered { nick } => {
                tracing::info!(network = %self.name(), %nick, "registered");
                self.session.mark_registered(&nick);
            }
            SessionEvent::ISupport { tokens } => {
                for token in &tokens {
                    if let Some(mode) = token.strip_prefix("BOT=").and_then(|v| v.chars().next()) {
                        self.session.set_bot_mode_char(mode);
                    }
                }
            }
            SessionEvent::SaslSuccess { account } => {
                tracing::info!(network = %self.name(), %account, "SASL authentication succeeded");
                self.session.set_sasl_authenticated();
            }
            SessionEvent::Connect => self.connection.on_connected(),
            SessionEvent::Joined { channel } => self.on_joined(&channel).await,
            SessionEvent::Part { channel, nick } => {
                if self.session.is_own_nick(&nick) {
                    if let Some(machine) = self.session.machine(&channel) {
                        machine.on_parted();
                        self.connection.update_operational_state();
                    }
                }
            }
            SessionEvent::Kick { channel, nick, by, reason } => {
                if self.session.is_own_nick(&nick) {
                    self.fail_channel(&channel, &format!("kicked by {by}: {reason}"));
                }
            }
            SessionEvent::Invite { channel, by } => match self.session.machine(&channel) {
                Some(machine) => {
                    machine.on_invite(&by);
                }
                None => tracing::debug!(network = %self.name(), %channel, %by, "ignoring invite to unknown channel"),
            },
            SessionEvent::Mode { target, mode, .. } => {
                if self.session.is_own_nick(&target) {
                    self.on_user_mode(&mode);
                }
            }
            SessionEvent::Message { from, target, text } => self.on_message(&from, &target, &text).await,
            SessionEvent::Notice { from, text, .. } => {
                if from.is_some_and(|f| f.eq_ignore_ascii_case("NickServ")) {
                    self.on_nickserv(&text).await;
                }
            }
            SessionEvent::NickChange { old_nick, new_nick } => {
                if self.session.is_own_nick(&old_nick) {
                    tracing::info!(network = %self.name(), %old_nick, %new_nick, "nick changed");
                    self.session.set_nick(&new_nick);
                }
            }
            SessionEvent::JoinFailed { channel, reason } | SessionEvent::ChannelFailed { channel, reason } => {
                self.fail_channel(&channel, &reason);
            }
            SessionEvent::NoSuchNick { nick } => self.on_no_such_nick(&nick),
            SessionEvent::Ping => self.session.mark_ping(),
            SessionEvent::Disconnected { reason } => self.connection.on_disconnected(&reason),
            SessionEvent::AuthFailed { reason } => self.fail_authentication(&reason),
        }
    }

    async fn on_joined(&self, channel: &str) {
        let name = channel.to_lowercase();
        let machine = self
            .session
            .machine(&name)
            .filter(|_| self.valid_channels.read().contains(&name));
        match machine {
            Some(machine) => {
                machine.on_join_success();
                self.connection.on_channel_joined(&name);
            }
            None => {
                tracing::info!(network = %self.name(), channel = %name, "parting unexpected channel");
                let cmd = Command::Part {
                    channel: channel.to_string(),
                    reason: None,
                };
                if let Err(e) = self.session.outbound().send(cmd).await {
                    tracing::warn!(network = %self.name(), channel = %name, error = %e, "could not part");
                }
            }
        }
    }

    fn fail_channel(&self, channel: &str, reason: &str) {
        match self.session.machine(channel) {
            Some(machine) => {
                machine.on_error(reason);
                self.connection.on_channel_error(channel, reason);
            }
            None => tracing::debug!(network = %self.name(), %channel, %reason, "failure on unknown channel"),
        }
    }

    fn on_user_mode(&self, mode: &str) {
        if self.connection.is_awaiting_bot_mode() {
            if let Some(bot) = self.session.status().bot_mode_char {
                if mode_added(mode, bot) {
                    self.connection.on_bot_mode_acknowledged();
                }
            }
            return;
        }
        if mode_added(mode, 'r') {
            self.connection.on_authenticated();
        }
    }

    async fn on_message(&self, from: &str, target: &str, text: &str) {
        let name = target.to_lowercase();
        if !self.valid_channels.read().contains(&name) {
            tracing::trace!(network = %self.name(), %target, "message outside announce channels");
            return;
        }
        if !self.valid_announcers.contains(&from.to_lowercase()) {
            tracing::trace!(network = %self.name(), channel = %name, %from, "not an announcer");
            return;
        }
        let Some(channel) = self.session.channel(&name) else {
            return;
        };
        if !channel.is_announcer(from) {
            tracing::trace!(network = %self.name(), channel = %name, %from, "announcer of another channel");
            return;
        }
        if !channel.is_monitoring() {
            tracing::debug!(network = %self.name(), channel = %name, "announce before join confirmed, dropping");
            return;
        }
        let Some(sender) = self.queues.get(&name).map(|q| q.sender()) else {
            tracing::debug!(network = %self.name(), channel = %name, "no parser for channel");
            return;
        };

        let line = strip_formatting(text);
        tracing::debug!(network = %self.name(), channel = %name, %from, %line, "announce line");
        if sender.send(line).await.is_err() {
            tracing::warn!(network = %self.name(), channel = %name, "announce queue closed");
            return;
        }
        channel.touch_announce();
    }

    async fn on_nickserv(&self, text: &str) {
        let lower = text.to_lowercase();
        let config = self.session.config();

        if contains_any(&lower, NICKSERV_BAD_CREDENTIALS) {
            self.fail_authentication("NickServ rejected the credentials");
        } else if contains_any(&lower, NICKSERV_NO_ACCOUNT) && self.session.is_own_nick(&config.nick) {
            self.fail_authentication("NickServ account does not exist");
        } else if contains_any(&lower, NICKSERV_PROTECTED) {
            if self.connection.state() != ConnectionState::Authenticating {
                return;
            }
            let attempts = self.identify_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempts >= MAX_IDENTIFY_ATTEMPTS {
                self.fail_authentication("nick is protected and identify keeps failing");
            } else if let Err(e) = self.session.identify().await {
                tracing::warn!(network = %self.name(), error = %e, "could not identify");
            }
        } else if contains_any(&lower, NICKSERV_IDENTIFIED) {
            self.connection.on_authenticated();
        } else if contains_any(&lower, NICKSERV_WANTS_ACCOUNT) {
            if config.auth.mechanism != AuthMechanism::Nickserv || config.auth.account.is_empty() {
                return;
            }
            if !self.account_identify_sent.swap(true, Ordering::SeqCst) {
                if let Err(e) = self.session.identify_with_account().await {
                    tracing::warn!(network = %self.name(), error = %e, "could not identify");
                }
            }
        }
    }

    fn on_no_such_nick(&self, nick: &str) {
        if !self.invite_targets.contains(&nick.to_lowercase()) {
            return;
        }
        let reason = format!("invite bot {nick} is not present");
        for machine in self.session.machines() {
            if machine.state() == ChannelState::AwaitingInvite {
                machine.on_error(&reason);
                self.connection.on_channel_error(machine.channel().name(), &reason);
            }
        }
    }

    /// Record the failure and stop the network. Retrying bad credentials
    /// only gets the account locked.
    fn fail_authentication(&self, reason: &str) {
        self.connection.on_error(reason);
        self.request_stop();
    }

    /// Settings in `config` and `definitions` that only a new connection
    /// can apply. Empty when the change can go to the live connection.
    pub fn restart_reasons(
        &self,
        config: &NetworkConfig,
        definitions: &[Arc<IndexerDefinition>],
    ) -> Vec<&'static str> {
        let current = self.session.config();
        let mut reasons = Vec::new();
        if current.server != config.server {
            reasons.push("server");
        }
        if current.port != config.port {
            reasons.push("port");
        }
        if current.tls != config.tls || current.tls_skip_verify != config.tls_skip_verify {
            reasons.push("tls");
        }
        if current.pass != config.pass {
            reasons.push("pass");
        }
        if current.invite_command != config.invite_command {
            reasons.push("invite command");
        }
        if current.auth.mechanism != config.auth.mechanism {
            reasons.push("auth mechanism");
        } else if config.auth.mechanism == AuthMechanism::SaslPlain && current.auth != config.auth {
            // SASL only happens during registration.
            reasons.push("sasl credentials");
        }
        if self.definitions.as_slice() != definitions {
            reasons.push("indexers");
        }
        reasons
    }

    /// Apply settings that fit the live connection: nick, NickServ
    /// credentials and the channel list. Timers and the bot mode apply on
    /// the next connect.
    pub async fn reconfigure(&self, config: NetworkConfig) {
        let previous = self.session.config();
        if previous == config {
            return;
        }
        self.session.set_config(config.clone());
        let connected = self.session.status().connected;

        if connected && previous.nick != config.nick {
            tracing::info!(network = %self.name(), nick = %config.nick, "changing nick");
            let cmd = Command::Raw(format!("NICK {}", config.nick));
            if let Err(e) = self.session.outbound().send(cmd).await {
                tracing::warn!(network = %self.name(), error = %e, "could not change nick");
            }
        }

        self.sync_channels(&config).await;

        if connected && previous.auth != config.auth && config.auth.mechanism == AuthMechanism::Nickserv {
            tracing::info!(network = %self.name(), "NickServ credentials changed, identifying again");
            self.identify_attempts.store(0, Ordering::SeqCst);
            self.account_identify_sent.store(false, Ordering::SeqCst);
            if let Err(e) = self.session.identify().await {
                tracing::warn!(network = %self.name(), error = %e, "could not identify");
            }
        }

        self.connection.update_operational_state();
        tracing::info!(network = %self.name(), "settings updated");
    }

    /// Part channels that are gone or whose settings changed, then add and
    /// join the new ones.
    async fn sync_channels(&self, config: &NetworkConfig) {
        let planned = planned_channels(config, &self.definitions);
        let wanted: HashSet<String> = planned.iter().map(|c| c.name().to_string()).collect();
        for channel in self.session.channels() {
            if !wanted.contains(channel.name()) {
                self.drop_channel(&channel).await;
            }
        }

        let mut added = Vec::new();
        for channel in planned {
            if let Some(existing) = self.session.channel(channel.name()) {
                if existing.enabled() == channel.enabled() && existing.password() == channel.password() {
                    continue;
                }
                self.drop_channel(&existing).await;
            }
            tracing::info!(network = %self.name(), channel = %channel.name(), enabled = channel.enabled(), "channel added");
            let enabled = channel.enabled();
            let machine = self.session.add_channel(Arc::new(channel));
            if enabled {
                added.push(machine);
            }
        }
        *self.valid_channels.write() = enabled_channels(&self.session);

        let joining = matches!(
            self.connection.state(),
            ConnectionState::JoiningChannels
                | ConnectionState::FullyOperational
                | ConnectionState::PartiallyOperational
        );
        if joining {
            for machine in added {
                machine.start();
            }
        }
    }

    async fn drop_channel(&self, channel: &Channel) {
        let name = channel.name().to_string();
        let joined = channel.is_monitoring()
            || self
                .session
                .machine(&name)
                .is_some_and(|m| m.state() == ChannelState::Joining);
        self.session.remove_channel(&name);
        self.valid_channels.write().remove(&name);
        tracing::info!(network = %self.name(), channel = %name, "channel removed");
        if joined {
            let cmd = Command::Part {
                channel: name.clone(),
                reason: None,
            };
            if let Err(e) = self.session.outbound().send(cmd).await {
                tracing::warn!(network = %self.name(), channel = %name, error = %e, "could not part");
            }
        }
    }

    /// Send a message to a channel or nick over the live connection.
    pub async fn send_message(&self, target: &str, text: &str) -> Result<(), SessionError> {
        if text.contains(['\r', '\n']) {
            return Err(SessionError::Send("message contains a line break".to_string()));
        }
        tracing::debug!(network = %self.name(), %target, "sending message");
        let cmd = Command::Privmsg {
            target: target.to_string(),
            text: text.to_string(),
        };
        self.session.outbound().send(cmd).await.inspect_err(|e| {
            tracing::warn!(network = %self.name(), %target, error = %e, "could not send message");
        })
    }

    pub fn health(&self) -> NetworkHealth {
        let config = self.session.config();
        let status = self.session.status();
        let channels: Vec<ChannelHealth> = self
            .session
            .channels()
            .iter()
            .map(|channel| {
                let s = channel.status();
                ChannelHealth {
                    name: channel.name().to_string(),
                    enabled: channel.enabled(),
                    state: self
                        .session
                        .machine(channel.name())
                        .map_or(ChannelState::Idle, |m| m.state()),
                    monitoring: s.monitoring,
                    monitoring_since: s.monitoring_since,
                    last_announce: s.last_announce,
                    error: s.error,
                }
            })
            .collect();
        NetworkHealth {
            name: config.name.clone(),
            enabled: config.enabled,
            server: config.server_addr(),
            nick: self.session.current_nick(),
            connected: status.connected,
            connected_since: status.connected_since,
            last_ping: status.last_ping,
            state: self.connection.state(),
            healthy: is_healthy(config.enabled, status.connected, &channels),
            connection_errors: status.connection_errors,
            channels,
        }
    }
}

async fn forward_wire_events(mut wire: mpsc::Receiver<Event>, events: mpsc::Sender<SessionEvent>) {
    while let Some(event) = wire.recv().await {
        if let Some(event) = SessionEvent::from_wire(event) {
            if events.send(event).await.is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_added() {
        assert!(mode_added("+r", 'r'));
        assert!(mode_added("+iBr", 'B'));
        assert!(!mode_added("-r", 'r'));
        assert!(!mode_added("+i-r", 'r'));
        assert!(mode_added("-x+r", 'r'));
        assert!(!mode_added("+i", 'r'));
    }
}
