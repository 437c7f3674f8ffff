//! Buffered non-blocking TCP/TLS connection handler.
//!
//! One handler owns one outbound connection: the connect cascade over
//! resolved endpoints, the inbound byte buffer, the outbound chunk queue
//! with scatter-gather writes and partial-send handling, and the TLS engine
//! interposed between the wire and the parser when requested.

use std::collections::VecDeque;
use std::io::{self, IoSlice};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use rustls::ClientConfig;
use thiserror::Error;
use tokio::io::Interest;
use tokio::net::{TcpSocket, TcpStream};
use tracing::{debug, info, warn};

use super::endpoint::Endpoint;
use super::resolver::Resolver;
use super::tls::{TlsError, TlsSession};

/// Bytes read from the wire per readiness wakeup.
pub const READ_CHUNK: usize = 4096;
/// Maximum chunks per scatter-gather send.
pub const MAX_WRITE_CHUNKS: usize = 8;
/// Per-endpoint connect timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection requested yet.
    Idle,
    /// Waiting on hostname resolution.
    Resolving,
    /// Trying the endpoint at this cursor.
    Connecting(usize),
    /// TCP established, TLS not yet negotiated.
    Established,
    /// TLS records are being exchanged.
    TlsHandshaking,
    /// Fully usable.
    Ready,
    /// Shutting down.
    Closing,
    /// Closed; buffers are empty.
    Closed,
}

/// Why a connect cascade gave up.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The hostname produced no endpoints.
    #[error("{0}")]
    Resolution(String),
    /// Every endpoint failed; carries the last failure text.
    #[error("{0}")]
    Exhausted(String),
    /// TLS session setup failed before any bytes moved.
    #[error("TLS setup failed: {0}")]
    Tls(String),
}

/// Outcome of one readiness-driven step.
#[derive(Debug)]
pub enum SocketEvent {
    /// I/O progressed; new plaintext (if any) is in the in-buffer.
    Progress {
        /// The TLS handshake completed during this step.
        tls_activated: bool,
        /// Raw bytes read from the wire.
        received: usize,
    },
    /// The connection is gone. An empty reason means the peer closed
    /// cleanly.
    Closed {
        /// Failure text, or empty for a clean close.
        reason: String,
    },
}

/// Ordered outbound chunk queue with partial-send handling.
#[derive(Debug, Default)]
pub struct OutQueue {
    chunks: VecDeque<Bytes>,
    len: usize,
}

impl OutQueue {
    /// Append a chunk at the tail. Empty chunks are dropped.
    pub fn push(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        self.len += chunk.len();
        self.chunks.push_back(chunk);
    }

    /// Drop `n` sent bytes off the head; a partially sent head chunk is
    /// spliced at the send boundary.
    pub fn consume(&mut self, mut n: usize) {
        while n > 0 {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            if n >= front.len() {
                n -= front.len();
                self.len -= front.len();
                self.chunks.pop_front();
            } else {
                front.advance(n);
                self.len -= n;
                n = 0;
            }
        }
    }

    /// Chunks from the head, for scatter-gather assembly.
    pub fn iter_chunks(&self) -> impl Iterator<Item = &Bytes> {
        self.chunks.iter()
    }

    /// Total buffered bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.len = 0;
    }
}

/// One buffered outbound TCP/TLS connection.
pub struct SocketHandler {
    state: ConnectionState,
    host: String,
    use_tls: bool,
    resolver: Resolver,
    stream: Option<TcpStream>,
    in_buf: BytesMut,
    out: OutQueue,
    pre_buf: Vec<u8>,
    tls: Option<TlsSession>,
    bind_addr: Option<IpAddr>,
    connect_timeout: Duration,
}

impl SocketHandler {
    /// Create an idle handler, optionally bound to a source address.
    pub fn new(bind_addr: Option<IpAddr>) -> Self {
        SocketHandler {
            state: ConnectionState::Idle,
            host: String::new(),
            use_tls: false,
            resolver: Resolver::new(),
            stream: None,
            in_buf: BytesMut::new(),
            out: OutQueue::default(),
            pre_buf: Vec::new(),
            tls: None,
            bind_addr,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    /// Override the per-endpoint connect timeout.
    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = timeout;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// True while a stream is open.
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// The inbound byte buffer, for the protocol layer's parser.
    pub fn in_buf_mut(&mut self) -> &mut BytesMut {
        &mut self.in_buf
    }

    /// Bytes currently queued for sending.
    pub fn queued_bytes(&self) -> usize {
        self.out.len()
    }

    /// Drive the connect cascade to completion.
    ///
    /// Resolution happens once and is cached across retries. Endpoints are
    /// tried in resolver order with a fresh socket each; the first success
    /// wins. With `tls` set, the TLS engine is started immediately so its
    /// first flight is queued before the caller's first write.
    pub async fn connect(
        &mut self,
        host: &str,
        port: u16,
        tls: bool,
        tls_config: Option<Arc<ClientConfig>>,
    ) -> Result<(), ConnectError> {
        self.reset_io();
        self.host = host.to_owned();
        self.use_tls = tls;
        self.state = ConnectionState::Resolving;

        let endpoints = match self.resolver.resolve(host, port, tls).await {
            Ok(eps) => eps,
            Err(e) => {
                self.close();
                return Err(ConnectError::Resolution(e.0));
            }
        };

        let mut last_err = format!("no addresses found for {host}");
        for (cursor, ep) in endpoints.iter().enumerate() {
            self.state = ConnectionState::Connecting(cursor);
            debug!(endpoint = %ep, "trying endpoint");
            match self.try_endpoint(ep).await {
                Ok(stream) => {
                    self.stream = Some(stream);
                    self.state = ConnectionState::Established;
                    info!(host = %self.host, endpoint = %ep, "connection established");
                    if tls {
                        let config = tls_config.clone().ok_or_else(|| {
                            self.close();
                            ConnectError::Tls("missing TLS configuration".to_owned())
                        })?;
                        let mut session =
                            TlsSession::new(config, &self.host).map_err(|e| {
                                self.close();
                                ConnectError::Tls(e.to_string())
                            })?;
                        self.out.push(Bytes::from(session.take_outgoing()));
                        self.tls = Some(session);
                        self.state = ConnectionState::TlsHandshaking;
                    } else {
                        self.state = ConnectionState::Ready;
                    }
                    return Ok(());
                }
                Err(e) => {
                    debug!(endpoint = %ep, error = %e, "connection attempt failed");
                    last_err = e;
                }
            }
        }

        self.close();
        Err(ConnectError::Exhausted(last_err))
    }

    async fn try_endpoint(&self, ep: &Endpoint) -> Result<TcpStream, String> {
        let socket = match ep.addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(|e| e.to_string())?;

        if let Some(ip) = self.bind_addr {
            // A source address only applies within its own family.
            if ip.is_ipv4() == ep.addr.is_ipv4() {
                match socket.bind(SocketAddr::new(ip, 0)) {
                    Ok(()) => debug!(bind = %ip, "socket bound to source address"),
                    Err(e) => warn!(bind = %ip, error = %e, "failed to bind source address"),
                }
            }
        }
        if let Err(e) = socket.set_keepalive(true) {
            warn!(error = %e, "failed to enable TCP keepalive");
        }

        match tokio::time::timeout(self.connect_timeout, socket.connect(ep.addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("connection timed out".to_owned()),
        }
    }

    /// Queue data for sending.
    ///
    /// With TLS configured but not yet active the data is held in the
    /// pre-buffer and flushed on activation.
    pub fn send_data(&mut self, data: &[u8]) -> Result<(), TlsError> {
        match &mut self.tls {
            Some(tls) if tls.is_active() => {
                tls.send_plain(data)?;
                self.out.push(Bytes::from(tls.take_outgoing()));
            }
            Some(_) => self.pre_buf.extend_from_slice(data),
            None if self.use_tls => self.pre_buf.extend_from_slice(data),
            None => self.out.push(Bytes::copy_from_slice(data)),
        }
        Ok(())
    }

    /// Wait for readiness and perform one non-blocking I/O step.
    ///
    /// Write interest is only registered while the outbound queue is
    /// non-empty. Cancel-safe: may be raced inside `select!`.
    pub async fn drive(&mut self) -> SocketEvent {
        if self.stream.is_none() {
            return SocketEvent::Closed {
                reason: "not connected".to_owned(),
            };
        }

        let mut interest = Interest::READABLE;
        if !self.out.is_empty() {
            interest = interest | Interest::WRITABLE;
        }

        let ready = {
            let stream = self.stream.as_ref().expect("checked above");
            match stream.ready(interest).await {
                Ok(r) => r,
                Err(e) => return self.fail(e.to_string()),
            }
        };

        let mut tls_activated = false;
        let mut received = 0usize;

        if ready.is_readable() {
            let mut buf = [0u8; READ_CHUNK];
            let res = self.stream.as_ref().expect("checked above").try_read(&mut buf);
            match res {
                Ok(0) => return self.fail(String::new()),
                Ok(n) => {
                    received = n;
                    match self.ingest(&buf[..n]) {
                        Ok((activated, peer_closed)) => {
                            if activated {
                                tls_activated = true;
                                if let Err(e) = self.on_tls_activated() {
                                    return self.fail(format!("TLS error: {e}"));
                                }
                            }
                            if peer_closed {
                                return self.fail(String::new());
                            }
                        }
                        Err(e) => return self.fail(format!("TLS error: {e}")),
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return self.fail(e.to_string()),
            }
        }

        if ready.is_writable() && !self.out.is_empty() {
            if let Err(e) = self.flush_once() {
                return self.fail(e);
            }
        }

        SocketEvent::Progress {
            tls_activated,
            received,
        }
    }

    fn ingest(&mut self, data: &[u8]) -> Result<(bool, bool), TlsError> {
        match &mut self.tls {
            Some(tls) => {
                let (activated, peer_closed) = tls.feed_incoming(data, &mut self.in_buf)?;
                self.out.push(Bytes::from(tls.take_outgoing()));
                if activated {
                    self.state = ConnectionState::Ready;
                }
                Ok((activated, peer_closed))
            }
            None => {
                self.in_buf.extend_from_slice(data);
                Ok((false, false))
            }
        }
    }

    fn on_tls_activated(&mut self) -> Result<(), TlsError> {
        let pre = std::mem::take(&mut self.pre_buf);
        if let Some(tls) = &mut self.tls {
            if !pre.is_empty() {
                tls.send_plain(&pre)?;
            }
            self.out.push(Bytes::from(tls.take_outgoing()));
        }
        Ok(())
    }

    /// One scatter-gather send of up to [`MAX_WRITE_CHUNKS`] chunks.
    fn flush_once(&mut self) -> Result<(), String> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| "not connected".to_owned())?;
        let slices: Vec<IoSlice<'_>> = self
            .out
            .iter_chunks()
            .take(MAX_WRITE_CHUNKS)
            .map(|c| IoSlice::new(c))
            .collect();
        let written = match stream.try_write_vectored(&slices) {
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) => return Err(e.to_string()),
        };
        drop(slices);
        self.out.consume(written);
        Ok(())
    }

    fn fail(&mut self, reason: String) -> SocketEvent {
        self.close();
        SocketEvent::Closed { reason }
    }

    fn reset_io(&mut self) {
        self.stream = None;
        self.tls = None;
        self.in_buf.clear();
        self.out.clear();
        self.pre_buf.clear();
    }

    /// Tear the connection down. Idempotent; buffers end up empty and the
    /// state is `Closed`. The cached resolution survives for ladder retries.
    pub fn close(&mut self) {
        self.state = ConnectionState::Closing;
        self.reset_io();
        self.state = ConnectionState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn out_queue_partial_send_splices_head() {
        let mut q = OutQueue::default();
        q.push(Bytes::from_static(b"AAA"));
        q.push(Bytes::from_static(b"BBBB"));
        q.push(Bytes::from_static(b"CC"));
        assert_eq!(q.len(), 9);

        // A send that reports 5 bytes leaves ["BB", "CC"].
        q.consume(5);
        let rest: Vec<&[u8]> = q.iter_chunks().map(|c| c.as_ref()).collect();
        assert_eq!(rest, vec![&b"BB"[..], &b"CC"[..]]);
        assert_eq!(q.len(), 4);

        q.consume(4);
        assert!(q.is_empty());
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn out_queue_ignores_empty_chunks() {
        let mut q = OutQueue::default();
        q.push(Bytes::new());
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn plain_connect_exchange_and_peer_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = sock.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"PING one\r\n");
            sock.write_all(b"PONG one\r\n").await.unwrap();
            // Drop closes the connection.
        });

        let mut handler = SocketHandler::new(None);
        handler.connect("127.0.0.1", port, false, None).await.unwrap();
        assert_eq!(handler.state(), ConnectionState::Ready);

        handler.send_data(b"PING one\r\n").unwrap();
        let mut got_pong = false;
        loop {
            match handler.drive().await {
                SocketEvent::Progress { .. } => {
                    if handler.in_buf_mut().as_ref() == b"PONG one\r\n" {
                        got_pong = true;
                        handler.in_buf_mut().clear();
                    }
                }
                SocketEvent::Closed { reason } => {
                    assert_eq!(reason, "");
                    break;
                }
            }
        }
        assert!(got_pong);
        assert_eq!(handler.state(), ConnectionState::Closed);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn refused_endpoint_exhausts_cascade() {
        // Grab a port with no listener behind it.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut handler = SocketHandler::new(None);
        let err = handler.connect("127.0.0.1", port, false, None).await;
        assert!(matches!(err, Err(ConnectError::Exhausted(_))));
        assert_eq!(handler.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let mut handler = SocketHandler::new(None);
        handler.send_data(b"queued before close").unwrap();
        handler.close();
        handler.close();
        assert_eq!(handler.state(), ConnectionState::Closed);
        assert_eq!(handler.queued_bytes(), 0);
        assert!(handler.in_buf_mut().is_empty());
    }
}
