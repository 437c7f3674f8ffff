//! The bridge: owns the (user, server) -> client map and translates between
//! component stanzas and IRC commands in both directions.

pub mod iid;

use std::collections::{BTreeSet, HashMap};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::component::jid::Jid;
use crate::component::stanza::{MucUser, Stanza, StanzaKind};
use crate::config::Config;
use crate::irc::{
    ClientCommand, ClientEvent, ClientUpdate, IrcClient, IrcSettings, NickErrorKind,
};
use crate::net::tls;

use self::iid::Iid;

/// Key of one IRC client: (owner bare JID, server host).
pub type ClientKey = (String, String);

struct ClientHandle {
    tx: mpsc::Sender<ClientCommand>,
    nick: String,
}

/// The router between the component stream and the IRC clients.
pub struct Bridge {
    config: Config,
    domain: String,
    clients: HashMap<ClientKey, ClientHandle>,
    updates_tx: mpsc::Sender<ClientUpdate>,
    updates_rx: mpsc::Receiver<ClientUpdate>,
    to_component: mpsc::Sender<Stanza>,
    from_component: mpsc::Receiver<Stanza>,
}

impl Bridge {
    /// Build a bridge around the component stanza channels.
    pub fn new(
        config: Config,
        from_component: mpsc::Receiver<Stanza>,
        to_component: mpsc::Sender<Stanza>,
    ) -> Self {
        let (updates_tx, updates_rx) = mpsc::channel(256);
        let domain = config.component.hostname.clone();
        Bridge {
            config,
            domain,
            clients: HashMap::new(),
            updates_tx,
            updates_rx,
            to_component,
            from_component,
        }
    }

    /// Serve until the component stream goes away, then shut clients down.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                stanza = self.from_component.recv() => match stanza {
                    Some(stanza) => self.handle_stanza(stanza).await,
                    None => break,
                },
                Some(update) = self.updates_rx.recv() => {
                    self.handle_update(update).await;
                }
            }
        }
        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        info!(clients = self.clients.len(), "shutting down bridge");
        for (_, handle) in self.clients.drain() {
            let _ = handle
                .tx
                .send(ClientCommand::Quit {
                    reason: "Gateway shutdown".to_owned(),
                })
                .await;
        }
    }

    // ------------------------------------------------------------------
    // Component -> IRC
    // ------------------------------------------------------------------

    async fn handle_stanza(&mut self, stanza: Stanza) {
        let Some(from) = stanza.from.clone() else {
            warn!("dropping stanza without 'from'");
            return;
        };
        let owner = Jid::parse(&from).bare();
        let Some(to) = stanza.to.clone() else {
            warn!(%owner, "dropping stanza without 'to'");
            return;
        };
        let to_jid = Jid::parse(&to);
        let iid = Iid::parse(&to_jid.local);

        match stanza.kind {
            Some(StanzaKind::Presence) => {
                self.handle_presence(&owner, &to_jid, &iid, &stanza).await
            }
            Some(StanzaKind::Message) => self.handle_message(&owner, &to_jid, &iid, &stanza).await,
            Some(StanzaKind::Iq) => {
                // No iq forms are implemented; answer politely.
                let mut reply = Stanza::presence_error(
                    &to,
                    &from,
                    "cancel",
                    "service-unavailable",
                    "",
                );
                reply.kind = Some(StanzaKind::Iq);
                reply.id = stanza.id.clone();
                self.send(reply).await;
            }
            None => {}
        }
    }

    async fn handle_presence(&mut self, owner: &str, to: &Jid, iid: &Iid, stanza: &Stanza) {
        if iid.server.is_empty() {
            self.send(Stanza::presence_error(
                &to.bare(),
                owner,
                "modify",
                "jid-malformed",
                "missing IRC server in target",
            ))
            .await;
            return;
        }

        match stanza.typ.as_deref() {
            None => {
                let nick = to.resource.clone();
                if nick.is_empty() {
                    self.send(Stanza::presence_error(
                        &to.bare(),
                        owner,
                        "modify",
                        "jid-malformed",
                        "a nickname resource is required",
                    ))
                    .await;
                    return;
                }

                let handle = self.get_or_start(owner, &iid.server, &nick);
                if !handle.nick.is_empty() && handle.nick != nick {
                    let _ = handle.tx.send(ClientCommand::Nick { nick: nick.clone() }).await;
                }
                match &iid.local {
                    Some(channel) => {
                        let _ = handle
                            .tx
                            .send(ClientCommand::Join {
                                channel: channel.clone(),
                                key: stanza.muc_password.clone(),
                            })
                            .await;
                    }
                    None => {
                        // Joining the server target: the dummy channel is
                        // always there, so answer the self-presence now.
                        let muc = MucUser {
                            affiliation: Some("none".to_owned()),
                            role: Some("participant".to_owned()),
                            status_codes: vec![110],
                            ..Default::default()
                        };
                        let from = format!("{}@{}/{}", iid.server, self.domain, nick);
                        self.send(Stanza::muc_presence(&from, owner, muc)).await;
                    }
                }
            }
            Some("unavailable") => {
                let key = (owner.to_owned(), iid.server.clone());
                let Some(handle) = self.clients.get(&key) else {
                    return;
                };
                let reason = stanza.status.clone().unwrap_or_default();
                match &iid.local {
                    Some(channel) => {
                        let _ = handle
                            .tx
                            .send(ClientCommand::Part {
                                channel: channel.clone(),
                                reason,
                            })
                            .await;
                    }
                    None => {
                        let _ = handle.tx.send(ClientCommand::Quit { reason }).await;
                    }
                }
            }
            Some(other) => debug!(typ = other, "ignoring presence type"),
        }
    }

    async fn handle_message(&mut self, owner: &str, to: &Jid, iid: &Iid, stanza: &Stanza) {
        let key = (owner.to_owned(), iid.server.clone());
        let typ = stanza.typ.as_deref().unwrap_or("normal");

        match typ {
            "groupchat" => {
                let Some(handle) = self.clients.get(&key) else {
                    self.send(Stanza::presence_error(
                        &to.bare(),
                        owner,
                        "cancel",
                        "remote-server-not-found",
                        &format!("not connected to {}", iid.server),
                    ))
                    .await;
                    return;
                };
                match &iid.local {
                    Some(channel) => {
                        if let Some(body) = &stanza.body {
                            for line in body.split('\n').filter(|l| !l.is_empty()) {
                                let _ = handle
                                    .tx
                                    .send(ClientCommand::ChannelMessage {
                                        channel: channel.clone(),
                                        body: line.to_owned(),
                                    })
                                    .await;
                            }
                        }
                        if let Some(subject) = &stanza.subject {
                            let _ = handle
                                .tx
                                .send(ClientCommand::Topic {
                                    channel: channel.clone(),
                                    topic: subject.clone(),
                                })
                                .await;
                        }
                    }
                    None => {
                        // Messages at the server target are raw commands.
                        if let Some(body) = &stanza.body {
                            let _ = handle
                                .tx
                                .send(ClientCommand::SendRaw { line: body.clone() })
                                .await;
                        }
                    }
                }
            }
            "chat" | "normal" => {
                let Some(handle) = self.clients.get(&key) else {
                    debug!(owner, server = %iid.server, "dropping chat for unknown client");
                    return;
                };
                let Some(body) = stanza.body.clone() else {
                    return;
                };
                // Either nick%server, or a room participant addressed as
                // #chan%server/Nick.
                let nick = match (&iid.local, to.resource.as_str()) {
                    (Some(local), "") => local.clone(),
                    (_, resource) if !resource.is_empty() => resource.to_owned(),
                    _ => {
                        let _ = handle.tx.send(ClientCommand::SendRaw { line: body }).await;
                        return;
                    }
                };
                let _ = handle
                    .tx
                    .send(ClientCommand::PrivateMessage { nick, body })
                    .await;
            }
            "error" => {
                debug!(owner, "error stanza from client, ignoring");
            }
            other => debug!(typ = other, "ignoring message type"),
        }
    }

    fn get_or_start(&mut self, owner: &str, server: &str, nick: &str) -> &mut ClientHandle {
        let key = (owner.to_owned(), server.to_owned());
        if !self.clients.contains_key(&key) {
            let block = self.config.server(server);
            let settings = IrcSettings {
                ladder: block.ladder(),
                fingerprint: block.fingerprint.clone(),
                verify_cert: block.verify_cert,
                bind_address: self.config.bind_address,
                trust_store: tls::trust_store(self.config.ca_file.as_deref()),
            };
            let (tx, rx) = mpsc::channel(64);
            let client = IrcClient::new(owner, server, nick, settings, self.updates_tx.clone(), rx);
            tokio::spawn(client.run());
            info!(owner, server, nick, "starting IRC client");
            self.clients.insert(
                key.clone(),
                ClientHandle {
                    tx,
                    nick: nick.to_owned(),
                },
            );
        }
        self.clients.get_mut(&key).expect("just inserted")
    }

    // ------------------------------------------------------------------
    // IRC -> component
    // ------------------------------------------------------------------

    async fn handle_update(&mut self, update: ClientUpdate) {
        let ClientUpdate {
            owner,
            server,
            event,
        } = update;
        let key = (owner.clone(), server.clone());

        match event {
            ClientEvent::Welcomed { nick } => {
                if let Some(handle) = self.clients.get_mut(&key) {
                    handle.nick = nick;
                }
            }
            ClientEvent::UserJoined {
                channel,
                nick,
                modes,
            } => {
                let (affiliation, role) = muc_roles(&modes);
                let muc = MucUser {
                    affiliation: Some(affiliation.to_owned()),
                    role: Some(role.to_owned()),
                    ..Default::default()
                };
                let from = self.member_jid(&server, &channel, &nick);
                self.send(Stanza::muc_presence(&from, &owner, muc)).await;
            }
            ClientEvent::SelfJoined { channel, nick } => {
                let muc = MucUser {
                    affiliation: Some("none".to_owned()),
                    role: Some("participant".to_owned()),
                    status_codes: vec![110],
                    ..Default::default()
                };
                let from = self.member_jid(&server, &channel, &nick);
                self.send(Stanza::muc_presence(&from, &owner, muc)).await;
            }
            ClientEvent::TopicChanged {
                channel,
                topic,
                set_by,
            } => {
                let from = match set_by {
                    Some(nick) => self.member_jid(&server, &channel, &nick),
                    None => self.room_jid(&server, &channel),
                };
                self.send(Stanza::subject(&from, &owner, &topic)).await;
            }
            ClientEvent::ChannelMessage {
                channel,
                nick,
                body,
            } => {
                let from = self.member_jid(&server, &channel, &nick);
                self.send(Stanza::groupchat(&from, &owner, &body)).await;
            }
            ClientEvent::PrivateMessage { nick, body } => {
                let from = format!("{}%{}@{}", nick, server, self.domain);
                self.send(Stanza::chat(&from, &owner, &body)).await;
            }
            ClientEvent::UserParted {
                channel,
                nick,
                reason,
                is_self,
            } => {
                let muc = MucUser {
                    affiliation: Some("none".to_owned()),
                    role: Some("none".to_owned()),
                    status_codes: if is_self { vec![110] } else { Vec::new() },
                    ..Default::default()
                };
                let from = self.member_jid(&server, &channel, &nick);
                let status = (!reason.is_empty()).then_some(reason);
                self.send(Stanza::muc_unavailable(&from, &owner, status.as_deref(), muc))
                    .await;
            }
            ClientEvent::UserKicked {
                channel,
                nick,
                by,
                reason,
                is_self,
            } => {
                let mut codes = vec![307];
                if is_self {
                    codes.push(110);
                }
                let muc = MucUser {
                    affiliation: Some("none".to_owned()),
                    role: Some("none".to_owned()),
                    status_codes: codes,
                    actor: (!by.is_empty()).then_some(by),
                    reason: (!reason.is_empty()).then_some(reason),
                    ..Default::default()
                };
                let from = self.member_jid(&server, &channel, &nick);
                self.send(Stanza::muc_unavailable(&from, &owner, None, muc))
                    .await;
            }
            ClientEvent::NickChanged {
                channel,
                old,
                new,
                modes,
                is_self,
            } => {
                if is_self {
                    if let Some(handle) = self.clients.get_mut(&key) {
                        handle.nick = new.clone();
                    }
                }
                let mut codes = vec![303];
                if is_self {
                    codes.push(110);
                }
                let muc = MucUser {
                    status_codes: codes,
                    item_nick: Some(new.clone()),
                    ..Default::default()
                };
                let from = self.member_jid(&server, &channel, &old);
                self.send(Stanza::muc_unavailable(&from, &owner, None, muc))
                    .await;

                let (affiliation, role) = muc_roles(&modes);
                let mut muc = MucUser {
                    affiliation: Some(affiliation.to_owned()),
                    role: Some(role.to_owned()),
                    ..Default::default()
                };
                if is_self {
                    muc.status_codes.push(110);
                }
                let from = self.member_jid(&server, &channel, &new);
                self.send(Stanza::muc_presence(&from, &owner, muc)).await;
            }
            ClientEvent::UserModeChanged {
                channel,
                nick,
                modes,
                set_by: _,
            } => {
                let (affiliation, role) = muc_roles(&modes);
                let muc = MucUser {
                    affiliation: Some(affiliation.to_owned()),
                    role: Some(role.to_owned()),
                    ..Default::default()
                };
                let from = self.member_jid(&server, &channel, &nick);
                self.send(Stanza::muc_presence(&from, &owner, muc)).await;
            }
            ClientEvent::ChannelModeChanged {
                channel,
                summary,
                set_by,
            } => {
                let from = if set_by.is_empty() {
                    self.room_jid(&server, &channel)
                } else {
                    self.member_jid(&server, &channel, &set_by)
                };
                let body = format!("Mode {} [{}]", channel, summary);
                self.send(Stanza::groupchat(&from, &owner, &body)).await;
            }
            ClientEvent::ServerMessage { from: _, body } => {
                let from = self.server_jid(&server);
                self.send(Stanza::chat(&from, &owner, &body)).await;
            }
            ClientEvent::Motd { text } => {
                if !text.is_empty() {
                    let from = self.server_jid(&server);
                    self.send(Stanza::chat(&from, &owner, &text)).await;
                }
            }
            ClientEvent::NickError {
                kind,
                requested,
                text,
                channels,
            } => {
                let (typ, condition) = match kind {
                    NickErrorKind::Conflict => ("cancel", "conflict"),
                    NickErrorKind::Erroneous => ("modify", "not-acceptable"),
                    NickErrorKind::ChangeTooFast => ("wait", "resource-constraint"),
                };
                if channels.is_empty() {
                    let from = self.server_jid(&server);
                    self.send(Stanza::presence_error(&from, &owner, typ, condition, &text))
                        .await;
                } else {
                    for channel in channels {
                        let from =
                            format!("{}/{}", self.room_jid(&server, &channel), requested);
                        self.send(Stanza::presence_error(&from, &owner, typ, condition, &text))
                            .await;
                    }
                }
            }
            ClientEvent::ConnectionFailed {
                reason,
                pending_channels,
            } => {
                warn!(owner, server, %reason, "IRC connection failed");
                if pending_channels.is_empty() {
                    let from = self.server_jid(&server);
                    self.send(Stanza::presence_error(
                        &from,
                        &owner,
                        "cancel",
                        "remote-server-not-found",
                        &reason,
                    ))
                    .await;
                } else {
                    for channel in pending_channels {
                        let from = self.room_jid(&server, &channel);
                        self.send(Stanza::presence_error(
                            &from,
                            &owner,
                            "cancel",
                            "remote-server-not-found",
                            &reason,
                        ))
                        .await;
                    }
                }
                self.clients.remove(&key);
            }
            ClientEvent::Disconnected { reason, channels } => {
                info!(owner, server, %reason, "IRC client disconnected");
                let nick = self
                    .clients
                    .get(&key)
                    .map(|h| h.nick.clone())
                    .unwrap_or_default();
                for channel in channels {
                    let muc = MucUser {
                        affiliation: Some("none".to_owned()),
                        role: Some("none".to_owned()),
                        status_codes: vec![110],
                        ..Default::default()
                    };
                    let from = self.member_jid(&server, &channel, &nick);
                    let status = (!reason.is_empty()).then_some(reason.as_str());
                    self.send(Stanza::muc_unavailable(&from, &owner, status, muc))
                        .await;
                }
                self.clients.remove(&key);
            }
        }
    }

    fn room_jid(&self, server: &str, channel: &str) -> String {
        format!("{}%{}@{}", channel, server, self.domain)
    }

    fn member_jid(&self, server: &str, channel: &str, nick: &str) -> String {
        format!("{}/{}", self.room_jid(server, channel), nick)
    }

    fn server_jid(&self, server: &str) -> String {
        format!("{}@{}", server, self.domain)
    }

    async fn send(&mut self, stanza: Stanza) {
        if self.to_component.send(stanza).await.is_err() {
            debug!("component sink gone");
        }
    }
}

/// Map IRC membership modes onto MUC affiliation and role.
fn muc_roles(modes: &BTreeSet<char>) -> (&'static str, &'static str) {
    if modes.contains(&'o') || modes.contains(&'q') || modes.contains(&'a') {
        ("admin", "moderator")
    } else if modes.contains(&'h') {
        ("member", "moderator")
    } else if modes.contains(&'v') {
        ("member", "participant")
    } else {
        ("none", "participant")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_sets_map_to_muc_roles() {
        let ops: BTreeSet<char> = ['o'].into_iter().collect();
        assert_eq!(muc_roles(&ops), ("admin", "moderator"));

        let voice: BTreeSet<char> = ['v'].into_iter().collect();
        assert_eq!(muc_roles(&voice), ("member", "participant"));

        let both: BTreeSet<char> = ['o', 'v'].into_iter().collect();
        assert_eq!(muc_roles(&both), ("admin", "moderator"));

        assert_eq!(muc_roles(&BTreeSet::new()), ("none", "participant"));
    }
}
