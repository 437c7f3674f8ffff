//! Integration test common infrastructure.
//!
//! Provides a scripted IRC server endpoint and a harness for driving an
//! [`IrcClient`] task over localhost.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chanlink_proto::Message;
use chanlinkd::irc::{ClientCommand, ClientEvent, ClientUpdate, IrcClient, IrcSettings};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Bind a fresh localhost listener.
pub async fn bind() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// The server side of one scripted IRC connection.
pub struct ServerConn {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl ServerConn {
    /// Accept the next connection on `listener`.
    pub async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = timeout(STEP_TIMEOUT, listener.accept())
            .await
            .expect("timed out waiting for connection")
            .unwrap();
        let (read, writer) = stream.into_split();
        ServerConn {
            reader: BufReader::new(read),
            writer,
        }
    }

    /// Read one line (CRLF stripped).
    pub async fn read_line(&mut self) -> String {
        let mut line = String::new();
        let n = timeout(STEP_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for line")
            .unwrap();
        assert!(n > 0, "client closed the connection");
        line.trim_end_matches(['\r', '\n']).to_owned()
    }

    /// Read lines until one parses with the given command; returns it.
    pub async fn expect_cmd(&mut self, cmd: &str) -> Message {
        loop {
            let line = self.read_line().await;
            if let Ok(msg) = line.parse::<Message>() {
                if msg.command == cmd {
                    return msg;
                }
            }
        }
    }

    /// Send one line, appending CRLF.
    pub async fn send_line(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .unwrap();
    }

    /// Consume USER and NICK, reply with 001; returns the accepted nick.
    pub async fn register(&mut self) -> String {
        self.expect_cmd("USER").await;
        let nick_msg = self.expect_cmd("NICK").await;
        let nick = nick_msg.arg(0).to_owned();
        self.send_line(&format!(":irc.test 001 {nick} :Welcome to TestNet"))
            .await;
        nick
    }

    /// Script a full join: JOIN echo, names, end-of-names.
    ///
    /// `names` is the 353 payload, e.g. `"@bob +carol alice"`.
    pub async fn complete_join(&mut self, nick: &str, channel: &str, names: &str) {
        self.expect_cmd("JOIN").await;
        self.send_line(&format!(":{nick}!u@h JOIN {channel}")).await;
        self.send_line(&format!(":irc.test 353 {nick} = {channel} :{names}"))
            .await;
        self.send_line(&format!(
            ":irc.test 366 {nick} {channel} :End of /NAMES list"
        ))
        .await;
    }
}

/// A driven client plus its command and event endpoints.
pub struct TestClient {
    pub cmds: mpsc::Sender<ClientCommand>,
    pub updates: mpsc::Receiver<ClientUpdate>,
    pub task: JoinHandle<()>,
}

impl TestClient {
    /// Spawn a client for `alice@example.org` against the given plaintext
    /// ladder on localhost.
    pub fn spawn(ladder: Vec<(u16, bool)>) -> Self {
        Self::spawn_as("alice", ladder)
    }

    /// Spawn with commands already queued before the client starts.
    pub fn spawn_with_pending(ladder: Vec<(u16, bool)>, pending: Vec<ClientCommand>) -> Self {
        Self::build("alice", ladder, pending)
    }

    /// Spawn with a chosen starting nick.
    pub fn spawn_as(nick: &str, ladder: Vec<(u16, bool)>) -> Self {
        Self::build(nick, ladder, Vec::new())
    }

    fn build(nick: &str, ladder: Vec<(u16, bool)>, pending: Vec<ClientCommand>) -> Self {
        let settings = IrcSettings {
            ladder,
            fingerprint: None,
            verify_cert: true,
            bind_address: None,
            trust_store: Arc::new(rustls::RootCertStore::empty()),
        };
        let (cmds, rx) = mpsc::channel(16);
        for cmd in pending {
            cmds.try_send(cmd).expect("pre-queued command fits the channel");
        }
        let (updates_tx, updates) = mpsc::channel(64);
        let client = IrcClient::new(
            "alice@example.org",
            "127.0.0.1",
            nick,
            settings,
            updates_tx,
            rx,
        );
        let task = tokio::spawn(client.run());
        TestClient {
            cmds,
            updates,
            task,
        }
    }

    /// Next event from the client, with a timeout.
    pub async fn next_event(&mut self) -> ClientEvent {
        timeout(STEP_TIMEOUT, self.updates.recv())
            .await
            .expect("timed out waiting for client event")
            .expect("client event channel closed")
            .event
    }

    /// Skip events until `pred` matches; returns the match.
    pub async fn event_matching(
        &mut self,
        mut pred: impl FnMut(&ClientEvent) -> bool,
    ) -> ClientEvent {
        loop {
            let event = self.next_event().await;
            if pred(&event) {
                return event;
            }
        }
    }
}
