//! CRLF line framing over a byte buffer.
//!
//! The socket layer appends raw bytes at the tail of a [`BytesMut`]; the
//! client pulls complete lines off the head with [`next_line`]. Bytes that do
//! not yet form a complete line stay in the buffer.

use bytes::BytesMut;

use crate::error::ProtocolError;

/// Maximum wire line length in bytes, including the CRLF terminator.
pub const MAX_LINE_LEN: usize = 512;

/// Extract the next complete line from `buf`, stripping the terminator.
///
/// Returns `Ok(None)` when no full line is buffered yet. Lines longer than
/// [`MAX_LINE_LEN`] are consumed and rejected with
/// [`ProtocolError::MessageTooLong`] so the connection can keep going.
/// Invalid UTF-8 is substituted rather than treated as an error.
pub fn next_line(buf: &mut BytesMut) -> Result<Option<String>, ProtocolError> {
    let Some(pos) = buf.iter().position(|&b| b == b'\n') else {
        // No terminator yet; an over-long partial line is already hopeless.
        if buf.len() > MAX_LINE_LEN {
            let actual = buf.len();
            buf.clear();
            return Err(ProtocolError::MessageTooLong {
                actual,
                limit: MAX_LINE_LEN,
            });
        }
        return Ok(None);
    };

    let raw = buf.split_to(pos + 1);
    if raw.len() > MAX_LINE_LEN {
        return Err(ProtocolError::MessageTooLong {
            actual: raw.len(),
            limit: MAX_LINE_LEN,
        });
    }

    let mut end = raw.len() - 1;
    if end > 0 && raw[end - 1] == b'\r' {
        end -= 1;
    }
    if end == 0 {
        return Err(ProtocolError::EmptyMessage);
    }
    Ok(Some(String::from_utf8_lossy(&raw[..end]).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_line_is_extracted() {
        let mut buf = BytesMut::from(&b"PING :token\r\nPA"[..]);
        assert_eq!(next_line(&mut buf).unwrap().as_deref(), Some("PING :token"));
        assert_eq!(&buf[..], b"PA");
    }

    #[test]
    fn partial_line_stays_buffered() {
        let mut buf = BytesMut::from(&b"PRIVMSG #chan :hel"[..]);
        assert_eq!(next_line(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 18);
    }

    #[test]
    fn bare_lf_is_accepted() {
        let mut buf = BytesMut::from(&b"NOTICE x :hi\n"[..]);
        assert_eq!(next_line(&mut buf).unwrap().as_deref(), Some("NOTICE x :hi"));
    }

    #[test]
    fn overlong_line_is_rejected_but_consumed() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[b'a'; 600]);
        buf.extend_from_slice(b"\r\nPING x\r\n");
        assert!(matches!(
            next_line(&mut buf),
            Err(ProtocolError::MessageTooLong { actual: 602, .. })
        ));
        // The connection keeps parsing after the bad line.
        assert_eq!(next_line(&mut buf).unwrap().as_deref(), Some("PING x"));
    }

    #[test]
    fn invalid_utf8_is_substituted() {
        let mut buf = BytesMut::from(&b"PRIVMSG #c :caf\xe9\r\n"[..]);
        let line = next_line(&mut buf).unwrap().unwrap();
        assert!(line.starts_with("PRIVMSG #c :caf"));
        assert!(line.contains('\u{fffd}'));
    }

    #[test]
    fn empty_line_is_an_error() {
        let mut buf = BytesMut::from(&b"\r\n"[..]);
        assert!(matches!(
            next_line(&mut buf),
            Err(ProtocolError::EmptyMessage)
        ));
        assert!(buf.is_empty());
    }
}
