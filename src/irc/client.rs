//! One IRC client: a single (user, server) connection driving the socket
//! engine, dispatching server commands, and feeding the bridge.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chanlink_proto::{casemap, framing, Message, ModeChange, ServerCaps};
use chanlink_proto::isupport::ModeClass;
use chanlink_proto::mode::parse_mode_changes;
use rustls::RootCertStore;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::net::socket::{ConnectError, SocketEvent, SocketHandler};
use crate::net::timer::TimerQueue;
use crate::net::tls;

use super::channel::{Channel, MembershipPhase};
use super::events::{ClientEvent, ClientUpdate, NickErrorKind};

/// Interval between outbound health pings.
const PING_INTERVAL: Duration = Duration::from_secs(60);
const PING_TIMER: &str = "ping_server";

/// Requests from the bridge to a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientCommand {
    /// Join a channel, queued until welcome when necessary.
    Join {
        channel: String,
        key: Option<String>,
    },
    /// Leave a channel.
    Part { channel: String, reason: String },
    /// Group message to a joined channel.
    ChannelMessage { channel: String, body: String },
    /// Private message to a nick.
    PrivateMessage { nick: String, body: String },
    /// Request a nickname change.
    Nick { nick: String },
    /// Change a channel topic.
    Topic { channel: String, topic: String },
    /// Send a raw command line, as typed at the server-level target.
    SendRaw { line: String },
    /// Quit the server and end the client.
    Quit { reason: String },
}

#[derive(Clone, Copy, Debug)]
enum TimerEvent {
    PingServer,
}

/// Per-server connection settings handed down from configuration.
#[derive(Clone)]
pub struct IrcSettings {
    /// (port, tls) candidates in trial order.
    pub ladder: Vec<(u16, bool)>,
    /// Pinned certificate fingerprint.
    pub fingerprint: Option<String>,
    /// Abort on invalid certificates without a matching pin.
    pub verify_cert: bool,
    /// Optional source address.
    pub bind_address: Option<IpAddr>,
    /// Process-wide certificate store.
    pub trust_store: Arc<RootCertStore>,
}

/// A client connected (or connecting) to one IRC server on behalf of one
/// component-side user.
pub struct IrcClient {
    owner: String,
    hostname: String,
    username: String,
    current_nick: String,
    welcomed: bool,
    motd: String,
    caps: ServerCaps,
    channels: HashMap<String, Channel>,
    dummy: Channel,
    pending_joins: Vec<(String, Option<String>)>,
    private_peers: HashSet<String>,
    conn: SocketHandler,
    timers: TimerQueue<TimerEvent>,
    settings: IrcSettings,
    close_reason: Option<String>,
    events: mpsc::Sender<ClientUpdate>,
    rx: mpsc::Receiver<ClientCommand>,
}

impl IrcClient {
    /// Create a client for `owner` toward `hostname`, starting as `nick`.
    pub fn new(
        owner: impl Into<String>,
        hostname: impl Into<String>,
        nick: impl Into<String>,
        settings: IrcSettings,
        events: mpsc::Sender<ClientUpdate>,
        rx: mpsc::Receiver<ClientCommand>,
    ) -> Self {
        let nick = nick.into();
        IrcClient {
            owner: owner.into(),
            hostname: hostname.into(),
            username: nick.clone(),
            current_nick: nick,
            welcomed: false,
            motd: String::new(),
            caps: ServerCaps::default(),
            channels: HashMap::new(),
            dummy: Channel::dummy(),
            pending_joins: Vec::new(),
            private_peers: HashSet::new(),
            conn: SocketHandler::new(settings.bind_address),
            timers: TimerQueue::new(),
            settings,
            close_reason: None,
            events,
            rx,
        }
    }

    /// Access to the socket handler, for tests tightening timeouts.
    pub fn socket_mut(&mut self) -> &mut SocketHandler {
        &mut self.conn
    }

    /// The per-client dummy channel carrying server-level traffic.
    pub fn dummy_channel(&self) -> &Channel {
        &self.dummy
    }

    /// True when a private conversation with `nick` is active.
    pub fn has_private_peer(&self, nick: &str) -> bool {
        self.private_peers.contains(&casemap::fold(nick))
    }

    /// Run the client to completion: walk the port ladder, then serve the
    /// session until it ends.
    pub async fn run(mut self) {
        let mut ladder: VecDeque<(u16, bool)> = self.settings.ladder.clone().into();
        let mut last_failure = String::from("no connection candidates configured");

        // Joins requested before any connection exists must survive into the
        // pending list.
        if let Some(reason) = self.drain_queued_commands().await {
            self.emit(ClientEvent::Disconnected {
                reason,
                channels: Vec::new(),
            })
            .await;
            return;
        }

        loop {
            let Some((port, use_tls)) = ladder.pop_front() else {
                let _ = self.drain_queued_commands().await;
                let pending = self.pending_channel_names();
                self.emit(ClientEvent::ConnectionFailed {
                    reason: last_failure,
                    pending_channels: pending,
                })
                .await;
                return;
            };

            info!(server = %self.hostname, port, tls = use_tls, "connecting");
            let tls_config = use_tls.then(|| {
                tls::client_config(
                    self.settings.trust_store.clone(),
                    self.settings.fingerprint.as_deref(),
                    self.settings.verify_cert,
                )
            });
            match self.conn.connect(&self.hostname, port, use_tls, tls_config).await {
                Ok(()) => {}
                Err(ConnectError::Resolution(reason)) => {
                    // No endpoints; later ladder entries cannot do better.
                    let pending = self.pending_channel_names();
                    self.emit(ClientEvent::ConnectionFailed {
                        reason,
                        pending_channels: pending,
                    })
                    .await;
                    return;
                }
                Err(e) => {
                    warn!(server = %self.hostname, port, error = %e, "connection attempt failed");
                    last_failure = e.to_string();
                    continue;
                }
            }

            self.on_connected();
            self.timers
                .add_event(Instant::now() + PING_INTERVAL, PING_TIMER, TimerEvent::PingServer);

            let reason = self.session_loop().await;
            self.conn.close();
            self.timers.clear();

            // A TLS failure before welcome consumes this ladder entry and
            // moves on; anything else ends the client.
            if !self.welcomed && reason.starts_with("TLS error") {
                warn!(server = %self.hostname, %reason, "TLS failed, advancing port ladder");
                last_failure = reason;
                continue;
            }

            let channels = self.joined_channel_names();
            self.emit(ClientEvent::Disconnected { reason, channels }).await;
            return;
        }
    }

    /// Process whatever commands are already queued, without blocking.
    async fn drain_queued_commands(&mut self) -> Option<String> {
        while let Ok(cmd) = self.rx.try_recv() {
            if let Some(reason) = self.handle_command(cmd).await {
                return Some(reason);
            }
        }
        None
    }

    async fn session_loop(&mut self) -> String {
        loop {
            let deadline = self.timers.next_deadline();
            let wake = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(60));

            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => {
                        if let Some(reason) = self.handle_command(cmd).await {
                            return reason;
                        }
                    }
                    None => {
                        self.send(Message::new("QUIT", vec!["Gateway shutdown".to_owned()]));
                        return "gateway shutdown".to_owned();
                    }
                },
                _ = tokio::time::sleep_until(wake), if deadline.is_some() => {
                    for event in self.timers.pop_due(Instant::now()) {
                        self.handle_timer(event);
                    }
                },
                event = self.conn.drive() => match event {
                    SocketEvent::Progress { .. } => {
                        if let Some(reason) = self.parse_in_buffer().await {
                            return reason;
                        }
                        if let Some(reason) = self.close_reason.take() {
                            return reason;
                        }
                    }
                    SocketEvent::Closed { reason } => {
                        return self.close_reason.take().unwrap_or(reason);
                    }
                },
            }
        }
    }

    fn handle_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::PingServer => {
                self.send(Message::new("PING", vec![self.hostname.clone()]));
                self.timers
                    .add_event(Instant::now() + PING_INTERVAL, PING_TIMER, TimerEvent::PingServer);
            }
        }
    }

    async fn handle_command(&mut self, cmd: ClientCommand) -> Option<String> {
        match cmd {
            ClientCommand::Join { channel, key } => {
                if !self.welcomed {
                    self.pending_joins.push((channel, key));
                } else {
                    self.send_join(&channel, key.as_deref());
                }
            }
            ClientCommand::Part { channel, reason } => {
                if let Some(chan) = self.channels.get_mut(&casemap::fold(&channel)) {
                    if chan.is_joined() {
                        chan.phase = MembershipPhase::Parting;
                    }
                    self.send(Message::new("PART", vec![channel, reason]));
                }
            }
            ClientCommand::ChannelMessage { channel, body } => {
                let joined = self
                    .channels
                    .get(&casemap::fold(&channel))
                    .map(Channel::is_joined)
                    .unwrap_or(false);
                if !joined {
                    debug!(server = %self.hostname, channel, "dropping message to unjoined channel");
                    return None;
                }
                self.send_privmsg(&channel, &body);
            }
            ClientCommand::PrivateMessage { nick, body } => {
                self.private_peers.insert(casemap::fold(&nick));
                self.send_privmsg(&nick, &body);
            }
            ClientCommand::Nick { nick } => {
                self.send(Message::new("NICK", vec![nick]));
            }
            ClientCommand::Topic { channel, topic } => {
                self.send(Message::new("TOPIC", vec![channel, topic]));
            }
            ClientCommand::SendRaw { line } => match line.parse::<Message>() {
                Ok(msg) => self.send(msg),
                Err(e) => warn!(server = %self.hostname, error = %e, "dropping raw line"),
            },
            ClientCommand::Quit { reason } => {
                self.send(Message::new("QUIT", vec![reason]));
                return Some("quit".to_owned());
            }
        }
        None
    }

    fn on_connected(&mut self) {
        self.welcomed = false;
        self.send(Message::new(
            "USER",
            vec![
                self.username.clone(),
                "0".to_owned(),
                "*".to_owned(),
                self.username.clone(),
            ],
        ));
        self.send(Message::new("NICK", vec![self.current_nick.clone()]));
    }

    async fn parse_in_buffer(&mut self) -> Option<String> {
        loop {
            match framing::next_line(self.conn.in_buf_mut()) {
                Ok(Some(line)) => {
                    debug!(server = %self.hostname, line = %line, "received");
                    match line.parse::<Message>() {
                        Ok(msg) => {
                            if let Some(reason) = self.dispatch(msg).await {
                                return Some(reason);
                            }
                        }
                        Err(e) => {
                            warn!(server = %self.hostname, error = %e, "dropping malformed line")
                        }
                    }
                }
                Ok(None) => return None,
                Err(e) => {
                    warn!(server = %self.hostname, error = %e, "dropping unframeable input")
                }
            }
        }
    }

    async fn dispatch(&mut self, msg: Message) -> Option<String> {
        match msg.command.as_str() {
            "PING" => self.send(Message::new("PONG", vec![msg.arg(0).to_owned()])),
            "PONG" => {}
            "001" | "RPL_WELCOME" => self.on_welcome(&msg).await,
            "005" => self.on_isupport(&msg),
            "375" | "RPL_MOTDSTART" => self.motd.clear(),
            "372" | "RPL_MOTD" => {
                self.motd.push_str(msg.arg(1));
                self.motd.push('\n');
            }
            "376" | "RPL_MOTDEND" => {
                let text = std::mem::take(&mut self.motd);
                self.emit(ClientEvent::Motd { text }).await;
            }
            "332" => self.on_topic_reply(&msg),
            "353" => self.on_names(&msg).await,
            "366" => self.on_end_of_names(&msg).await,
            "432" => self.on_nick_error(NickErrorKind::Erroneous, &msg).await,
            "433" => self.on_nick_conflict(&msg).await,
            "438" => self.on_nick_error(NickErrorKind::ChangeTooFast, &msg).await,
            "JOIN" => self.on_join(&msg).await,
            "PART" => self.on_part(&msg).await,
            "QUIT" => self.on_quit(&msg).await,
            "NICK" => self.on_nick(&msg).await,
            "KICK" => self.on_kick(&msg).await,
            "MODE" => self.on_mode(&msg).await,
            "TOPIC" => self.on_topic_change(&msg).await,
            "PRIVMSG" => self.on_privmsg(&msg).await,
            "NOTICE" => self.forward_server_message(&msg).await,
            "ERROR" => return Some(format!("server error: {}", msg.arg(0))),
            _ => self.forward_server_message(&msg).await,
        }
        None
    }

    async fn on_welcome(&mut self, msg: &Message) {
        self.current_nick = msg.arg(0).to_owned();
        self.welcomed = true;
        info!(server = %self.hostname, nick = %self.current_nick, "welcomed");
        self.emit(ClientEvent::Welcomed {
            nick: self.current_nick.clone(),
        })
        .await;
        for (channel, key) in std::mem::take(&mut self.pending_joins) {
            self.send_join(&channel, key.as_deref());
        }
    }

    fn on_isupport(&mut self, msg: &Message) {
        for token in msg.args.iter().skip(1) {
            if !token.contains(' ') {
                self.caps.apply_token(token);
            }
        }
    }

    fn on_topic_reply(&mut self, msg: &Message) {
        let name = msg.arg(1).to_owned();
        let topic = msg.arg(2).to_owned();
        let chan = self.channel_entry(&name);
        chan.topic = topic;
        if chan.phase == MembershipPhase::NamesPending {
            chan.phase = MembershipPhase::TopicPending;
        }
    }

    async fn on_names(&mut self, msg: &Message) {
        // 353 args: <me> <symbol> <channel> :<prefixed nicks>
        let name = msg.arg(msg.args.len().saturating_sub(2)).to_owned();
        let names = msg.arg(msg.args.len().saturating_sub(1)).to_owned();
        let own = self.current_nick.clone();

        let chan = self.channel_entry(&name);
        if chan.phase == MembershipPhase::Joining {
            chan.phase = MembershipPhase::NamesPending;
        }

        let mut joins = Vec::new();
        for token in names.split(' ').filter(|t| !t.is_empty()) {
            let (modes, nick) = self.caps.strip_name_prefixes(token);
            let chan = self.channel_entry(&name);
            chan.add_user(nick, modes.clone());
            if !casemap::eq(nick, &own) {
                joins.push((nick.to_owned(), modes));
            }
        }
        for (nick, modes) in joins {
            self.emit(ClientEvent::UserJoined {
                channel: name.clone(),
                nick,
                modes,
            })
            .await;
        }
    }

    async fn on_end_of_names(&mut self, msg: &Message) {
        let name = msg.arg(1).to_owned();
        let chan = self.channel_entry(&name);
        let already_joined = chan.is_joined();
        chan.phase = MembershipPhase::Joined;
        let topic = chan.topic.clone();
        if already_joined {
            // A later NAMES refresh; the join was already surfaced.
            return;
        }
        self.emit(ClientEvent::SelfJoined {
            channel: name.clone(),
            nick: self.current_nick.clone(),
        })
        .await;
        self.emit(ClientEvent::TopicChanged {
            channel: name,
            topic,
            set_by: None,
        })
        .await;
    }

    async fn on_join(&mut self, msg: &Message) {
        let Some(nick) = msg.source_nick().map(str::to_owned) else {
            return;
        };
        let name = msg.arg(0).to_owned();
        if casemap::eq(&nick, &self.current_nick) {
            let chan = self.channel_entry(&name);
            chan.phase = MembershipPhase::Joining;
            chan.add_user(&nick, Default::default());
        } else {
            self.channel_entry(&name).add_user(&nick, Default::default());
            self.emit(ClientEvent::UserJoined {
                channel: name,
                nick,
                modes: Default::default(),
            })
            .await;
        }
    }

    async fn on_part(&mut self, msg: &Message) {
        let Some(nick) = msg.source_nick().map(str::to_owned) else {
            return;
        };
        let name = msg.arg(0).to_owned();
        let reason = msg.arg(1).to_owned();
        let folded = casemap::fold(&name);
        let Some(chan) = self.channels.get_mut(&folded) else {
            return;
        };
        if chan.remove_user(&nick).is_none() {
            return;
        }
        let is_self = casemap::eq(&nick, &self.current_nick);
        if is_self {
            self.channels.remove(&folded);
        }
        self.emit(ClientEvent::UserParted {
            channel: name,
            nick,
            reason,
            is_self,
        })
        .await;
    }

    async fn on_quit(&mut self, msg: &Message) {
        let Some(nick) = msg.source_nick().map(str::to_owned) else {
            return;
        };
        let reason = msg.arg(0).to_owned();
        let mut affected = Vec::new();
        for chan in self.channels.values_mut() {
            if chan.remove_user(&nick).is_some() {
                affected.push(chan.name.clone());
            }
        }
        for channel in affected {
            self.emit(ClientEvent::UserParted {
                channel,
                nick: nick.clone(),
                reason: reason.clone(),
                is_self: false,
            })
            .await;
        }
    }

    async fn on_nick(&mut self, msg: &Message) {
        let Some(old) = msg.source_nick().map(str::to_owned) else {
            return;
        };
        let new = msg.arg(0).to_owned();
        let is_self = casemap::eq(&old, &self.current_nick);
        if is_self {
            self.current_nick = new.clone();
        }
        let mut affected = Vec::new();
        for chan in self.channels.values_mut() {
            if chan.rename_user(&old, &new) {
                let modes = chan
                    .find_user(&new)
                    .map(|u| u.modes.clone())
                    .unwrap_or_default();
                affected.push((chan.name.clone(), modes));
            }
        }
        for (channel, modes) in affected {
            self.emit(ClientEvent::NickChanged {
                channel,
                old: old.clone(),
                new: new.clone(),
                modes,
                is_self,
            })
            .await;
        }
    }

    async fn on_kick(&mut self, msg: &Message) {
        let by = msg.source_nick().unwrap_or("").to_owned();
        let name = msg.arg(0).to_owned();
        let target = msg.arg(1).to_owned();
        let reason = msg.arg(2).to_owned();
        let folded = casemap::fold(&name);
        let Some(chan) = self.channels.get_mut(&folded) else {
            return;
        };
        chan.remove_user(&target);
        let is_self = casemap::eq(&target, &self.current_nick);
        if is_self {
            self.channels.remove(&folded);
        }
        self.emit(ClientEvent::UserKicked {
            channel: name,
            nick: target,
            by,
            reason,
            is_self,
        })
        .await;
    }

    async fn on_mode(&mut self, msg: &Message) {
        let target = msg.arg(0).to_owned();
        if !self.caps.is_channel_name(&target) {
            // A mode on our own user; surface it as server information.
            self.emit(ClientEvent::ServerMessage {
                from: self.hostname.clone(),
                body: format!("MODE {}", msg.args.join(" ")),
            })
            .await;
            return;
        }

        let set_by = msg.source_nick().unwrap_or("").to_owned();
        let rest: Vec<String> = msg.args.get(2..).unwrap_or(&[]).to_vec();
        let changes = parse_mode_changes(&self.caps, msg.arg(1), &rest);
        let mut channel_level = false;

        for change in &changes {
            self.apply_mode_change(&target, change, &set_by, &mut channel_level)
                .await;
        }
        if channel_level {
            let summary = msg.args.get(1..).unwrap_or(&[]).join(" ");
            self.emit(ClientEvent::ChannelModeChanged {
                channel: target,
                summary,
                set_by,
            })
            .await;
        }
    }

    async fn apply_mode_change(
        &mut self,
        channel: &str,
        change: &ModeChange,
        set_by: &str,
        channel_level: &mut bool,
    ) {
        match change.class {
            ModeClass::Prefix => {
                let Some(nick) = change.arg.as_deref() else {
                    return;
                };
                let folded = casemap::fold(channel);
                let Some(chan) = self.channels.get_mut(&folded) else {
                    return;
                };
                let Some(user) = chan.find_user_mut(nick) else {
                    return;
                };
                if change.add {
                    user.modes.insert(change.mode);
                } else {
                    user.modes.remove(&change.mode);
                }
                let modes = user.modes.clone();
                let nick = user.nick.clone();
                self.emit(ClientEvent::UserModeChanged {
                    channel: channel.to_owned(),
                    nick,
                    modes,
                    set_by: set_by.to_owned(),
                })
                .await;
            }
            // List modes (bans etc.) are not tracked.
            ModeClass::ListA => *channel_level = true,
            ModeClass::ArgB | ModeClass::ArgWhenSetC | ModeClass::FlagD => {
                if let Some(chan) = self.channels.get_mut(&casemap::fold(channel)) {
                    if change.add {
                        chan.modes.insert(change.mode);
                    } else {
                        chan.modes.remove(&change.mode);
                    }
                }
                *channel_level = true;
            }
        }
    }

    async fn on_topic_change(&mut self, msg: &Message) {
        let set_by = msg.source_nick().map(str::to_owned);
        let name = msg.arg(0).to_owned();
        let topic = msg.arg(1).to_owned();
        let chan = self.channel_entry(&name);
        chan.topic = topic.clone();
        if chan.is_joined() {
            self.emit(ClientEvent::TopicChanged {
                channel: name,
                topic,
                set_by,
            })
            .await;
        }
    }

    async fn on_privmsg(&mut self, msg: &Message) {
        let Some(nick) = msg.source_nick().map(str::to_owned) else {
            return;
        };
        let target = msg.arg(0).to_owned();
        let body = msg.arg(1).to_owned();
        if self.caps.is_channel_name(&target) {
            self.emit(ClientEvent::ChannelMessage {
                channel: target,
                nick,
                body,
            })
            .await;
        } else {
            self.private_peers.insert(casemap::fold(&nick));
            self.emit(ClientEvent::PrivateMessage { nick, body }).await;
        }
    }

    async fn forward_server_message(&mut self, msg: &Message) {
        let from = msg
            .prefix
            .clone()
            .unwrap_or_else(|| self.hostname.clone());
        let body = msg.args.last().cloned().unwrap_or_default();
        if body.is_empty() {
            return;
        }
        self.emit(ClientEvent::ServerMessage { from, body }).await;
    }

    async fn on_nick_conflict(&mut self, msg: &Message) {
        if !self.welcomed {
            // Mangle and retry during registration.
            self.current_nick.push('_');
            let nick = self.current_nick.clone();
            info!(server = %self.hostname, %nick, "nickname in use, retrying mangled");
            self.send(Message::new("NICK", vec![nick]));
        } else {
            self.on_nick_error(NickErrorKind::Conflict, msg).await;
        }
    }

    async fn on_nick_error(&mut self, kind: NickErrorKind, msg: &Message) {
        let requested = msg.arg(1).to_owned();
        let text = msg.args.last().cloned().unwrap_or_default();
        let channels = self.joined_channel_names();
        self.emit(ClientEvent::NickError {
            kind,
            requested,
            text,
            channels,
        })
        .await;
    }

    fn send_join(&mut self, channel: &str, key: Option<&str>) {
        self.channel_entry(channel);
        let mut args = vec![channel.to_owned()];
        if let Some(key) = key {
            args.push(key.to_owned());
        }
        self.send(Message::new("JOIN", args));
    }

    fn send_privmsg(&mut self, target: &str, body: &str) {
        // "PRIVMSG <target> :" plus body must stay within the wire limit.
        let overhead = "PRIVMSG ".len() + target.len() + " :".len();
        let max = chanlink_proto::message::MAX_BODY_LEN.saturating_sub(overhead).max(1);
        for chunk in chunk_body(body, max) {
            self.send(Message::new("PRIVMSG", vec![target.to_owned(), chunk]));
        }
    }

    fn send(&mut self, msg: Message) {
        match msg.to_line() {
            Ok(line) => {
                debug!(server = %self.hostname, line = %line.trim_end(), "sending");
                if let Err(e) = self.conn.send_data(line.as_bytes()) {
                    self.close_reason = Some(format!("TLS error: {e}"));
                    self.conn.close();
                }
            }
            Err(e) => {
                warn!(server = %self.hostname, error = %e, "dropping overlong outbound message")
            }
        }
    }

    fn channel_entry(&mut self, name: &str) -> &mut Channel {
        self.channels
            .entry(casemap::fold(name))
            .or_insert_with(|| Channel::new(name))
    }

    fn joined_channel_names(&self) -> Vec<String> {
        self.channels
            .values()
            .filter(|c| c.is_joined())
            .map(|c| c.name.clone())
            .collect()
    }

    fn pending_channel_names(&self) -> Vec<String> {
        self.pending_joins.iter().map(|(c, _)| c.clone()).collect()
    }

    async fn emit(&mut self, event: ClientEvent) {
        let update = ClientUpdate {
            owner: self.owner.clone(),
            server: self.hostname.clone(),
            event,
        };
        if self.events.send(update).await.is_err() {
            debug!(server = %self.hostname, "bridge receiver gone");
        }
    }
}

/// Split a message body at char boundaries so each piece fits `max` bytes.
fn chunk_body(body: &str, max: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = body;
    while rest.len() > max {
        let mut cut = max;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        out.push(rest[..cut].to_owned());
        rest = &rest[cut..];
    }
    out.push(rest.to_owned());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunking_respects_char_boundaries() {
        let body = "héllo wörld";
        let chunks = chunk_body(body, 4);
        assert!(chunks.iter().all(|c| c.len() <= 4));
        assert_eq!(chunks.concat(), body);
    }

    #[test]
    fn short_bodies_stay_whole() {
        assert_eq!(chunk_body("hello", 400), vec!["hello".to_owned()]);
    }
}
