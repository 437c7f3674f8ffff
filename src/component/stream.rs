//! The component stream: connect, authenticate, exchange stanzas.
//!
//! Speaks the component-accept protocol: open the stream toward the served
//! domain, answer the server's stream id with the SHA-1 handshake digest,
//! then pass complete top-level elements in both directions.

use bytes::BytesMut;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use sha1::{Digest, Sha1};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use super::stanza::Stanza;

const NS_COMPONENT: &str = "jabber:component:accept";
const NS_STREAMS: &str = "http://etherx.jabber.org/streams";

/// Incomplete markup larger than this kills the stream.
const MAX_ELEMENT_BUFFER: usize = 1024 * 1024;

/// Component stream failures.
#[derive(Debug, Error)]
pub enum ComponentError {
    /// Transport failure.
    #[error("component I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The server rejected the handshake digest.
    #[error("component handshake refused: {0}")]
    HandshakeRefused(String),
    /// The server closed the stream.
    #[error("component stream closed by server")]
    Closed,
    /// Unrecoverable markup or stream-level error.
    #[error("component protocol error: {0}")]
    Protocol(String),
}

/// SHA-1 hex digest of stream id + shared secret, lowercase.
pub fn handshake_digest(stream_id: &str, secret: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(stream_id.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// An authenticated component connection.
pub struct ComponentStream {
    stream: TcpStream,
    buf: BytesMut,
}

impl ComponentStream {
    /// Connect to the XMPP server and authenticate as `domain`.
    pub async fn connect(
        host: &str,
        port: u16,
        domain: &str,
        secret: &str,
    ) -> Result<Self, ComponentError> {
        let stream = TcpStream::connect((host, port)).await?;
        let mut this = ComponentStream {
            stream,
            buf: BytesMut::new(),
        };

        let header = format!(
            "<?xml version='1.0'?><stream:stream xmlns='{NS_COMPONENT}' \
             xmlns:stream='{NS_STREAMS}' to='{}'>",
            escape(domain)
        );
        this.stream.write_all(header.as_bytes()).await?;

        let server_header = this.read_element().await?;
        if !server_header.contains("<stream:stream") {
            return Err(ComponentError::Protocol(format!(
                "expected stream header, got: {server_header}"
            )));
        }
        let stream_id = header_attr(&server_header, "id").unwrap_or_default();
        debug!(%stream_id, "component stream opened");

        let digest = handshake_digest(&stream_id, secret);
        this.stream
            .write_all(format!("<handshake>{digest}</handshake>").as_bytes())
            .await?;

        let reply = this.read_element().await?;
        if !reply.starts_with("<handshake") {
            return Err(ComponentError::HandshakeRefused(reply));
        }
        info!(domain, "component authenticated");
        Ok(this)
    }

    /// Receive the next stanza. Unparseable stanzas are dropped.
    pub async fn recv(&mut self) -> Result<Stanza, ComponentError> {
        loop {
            let elem = self.read_element().await?;
            if elem.starts_with("</stream:stream") {
                return Err(ComponentError::Closed);
            }
            if elem.contains("<stream:error") {
                return Err(ComponentError::Protocol(elem));
            }
            if elem.starts_with("<stream:") {
                continue;
            }
            match Stanza::parse(&elem) {
                Ok(stanza) => return Ok(stanza),
                Err(e) => warn!(error = %e, "dropping unparseable stanza"),
            }
        }
    }

    /// Send one stanza.
    pub async fn send(&mut self, stanza: &Stanza) -> Result<(), ComponentError> {
        self.stream.write_all(stanza.to_xml().as_bytes()).await?;
        Ok(())
    }

    /// Close the stream politely.
    pub async fn close(&mut self) -> Result<(), ComponentError> {
        self.stream.write_all(b"</stream:stream>").await?;
        Ok(())
    }

    async fn read_element(&mut self) -> Result<String, ComponentError> {
        loop {
            if let Some((elem, consumed)) = extract_element(&self.buf)? {
                let _ = self.buf.split_to(consumed);
                return Ok(elem);
            }
            if self.buf.len() > MAX_ELEMENT_BUFFER {
                return Err(ComponentError::Protocol(
                    "element buffer limit exceeded".to_owned(),
                ));
            }
            let mut chunk = [0u8; 8192];
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(ComponentError::Closed);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn is_stream_root(e: &BytesStart<'_>) -> bool {
    e.name().as_ref() == b"stream:stream"
}

/// Extract one complete top-level element from `buf`.
///
/// The stream header is returned as soon as its open tag is complete; other
/// elements only once fully closed. `None` means more bytes are needed.
fn extract_element(buf: &[u8]) -> Result<Option<(String, usize)>, ComponentError> {
    let Some(start) = buf.iter().position(|b| !b.is_ascii_whitespace()) else {
        return Ok(None);
    };
    let slice = &buf[start..];
    if slice.starts_with(b"</stream:stream>") {
        let len = b"</stream:stream>".len();
        return Ok(Some(("</stream:stream>".to_owned(), start + len)));
    }

    let mut reader = Reader::from_reader(slice);
    reader.config_mut().check_end_names = false;

    let mut depth = 0u32;
    let mut elem_start = 0usize;

    loop {
        let pos = reader.buffer_position() as usize;
        match reader.read_event() {
            Ok(Event::Decl(_)) | Ok(Event::PI(_)) | Ok(Event::Comment(_))
            | Ok(Event::DocType(_)) => continue,
            Ok(Event::Start(e)) => {
                if depth == 0 {
                    if is_stream_root(&e) {
                        let end = reader.buffer_position() as usize;
                        return Ok(Some((lossy(&slice[..end]), start + end)));
                    }
                    elem_start = pos;
                }
                depth += 1;
            }
            Ok(Event::Empty(_)) => {
                if depth == 0 {
                    let end = reader.buffer_position() as usize;
                    return Ok(Some((lossy(&slice[pos..end]), start + end)));
                }
            }
            Ok(Event::Text(_)) | Ok(Event::CData(_)) => {}
            Ok(Event::End(_)) => {
                if depth == 0 {
                    // Stray close (e.g. prefixed stream close); surface it.
                    let end = reader.buffer_position() as usize;
                    return Ok(Some((lossy(&slice[..end]), start + end)));
                }
                depth -= 1;
                if depth == 0 {
                    let end = reader.buffer_position() as usize;
                    return Ok(Some((lossy(&slice[elem_start..end]), start + end)));
                }
            }
            Ok(Event::Eof) => return Ok(None),
            // A partial tag at the end of the buffer; wait for more bytes.
            Err(quick_xml::Error::Syntax(_)) => return Ok(None),
            Err(e) => return Err(ComponentError::Protocol(e.to_string())),
        }
    }
}

fn header_attr(header: &str, key: &str) -> Option<String> {
    let mut reader = Reader::from_str(header);
    reader.config_mut().check_end_names = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return e
                    .attributes()
                    .flatten()
                    .find(|a| a.key.as_ref() == key.as_bytes())
                    .map(|a| String::from_utf8_lossy(&a.value).into_owned());
            }
            Ok(Event::Eof) => return None,
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_matches_known_sha1_vector() {
        // sha1("abc")
        assert_eq!(
            handshake_digest("a", "bc"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(
            handshake_digest("", ""),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
    }

    #[test]
    fn extract_complete_element() {
        let buf = b"<message to='a@b'><body>hi</body></message><presence/>";
        let (elem, used) = extract_element(buf).unwrap().unwrap();
        assert!(elem.starts_with("<message"));
        assert!(elem.ends_with("</message>"));

        let (elem2, used2) = extract_element(&buf[used..]).unwrap().unwrap();
        assert_eq!(elem2, "<presence/>");
        assert_eq!(used + used2, buf.len());
    }

    #[test]
    fn extract_waits_for_partial_element() {
        assert!(extract_element(b"<message><bo").unwrap().is_none());
        assert!(extract_element(b"<messa").unwrap().is_none());
        assert!(extract_element(b"   ").unwrap().is_none());
    }

    #[test]
    fn extract_stream_header_immediately() {
        let buf = b"<?xml version='1.0'?><stream:stream id='42' from='gw'><presence/>";
        let (elem, used) = extract_element(buf).unwrap().unwrap();
        assert!(elem.contains("<stream:stream"));
        assert_eq!(header_attr(&elem, "id").as_deref(), Some("42"));
        let (next, _) = extract_element(&buf[used..]).unwrap().unwrap();
        assert_eq!(next, "<presence/>");
    }

    #[test]
    fn extract_stream_close() {
        let (elem, used) = extract_element(b" </stream:stream>").unwrap().unwrap();
        assert_eq!(elem, "</stream:stream>");
        assert_eq!(used, 17);
    }

    #[tokio::test]
    async fn connect_performs_handshake() {
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = sock.read(&mut buf).await.unwrap();
            let header = String::from_utf8_lossy(&buf[..n]).into_owned();
            assert!(header.contains("jabber:component:accept"));
            assert!(header.contains("to='gw.example.org'"));

            sock.write_all(
                b"<stream:stream xmlns:stream='http://etherx.jabber.org/streams' \
                  from='gw.example.org' id='1234'>",
            )
            .await
            .unwrap();

            let n = sock.read(&mut buf).await.unwrap();
            let handshake = String::from_utf8_lossy(&buf[..n]).into_owned();
            let expected = handshake_digest("1234", "sekrit");
            assert_eq!(handshake, format!("<handshake>{expected}</handshake>"));

            sock.write_all(b"<handshake/>").await.unwrap();
            sock.write_all(b"<presence from='u@d/r' to='#c%s@gw.example.org/n'/>")
                .await
                .unwrap();
        });

        let mut cs = ComponentStream::connect("127.0.0.1", port, "gw.example.org", "sekrit")
            .await
            .unwrap();
        let stanza = cs.recv().await.unwrap();
        assert_eq!(stanza.from.as_deref(), Some("u@d/r"));
        server.await.unwrap();
    }
}
