//! TLS trust: the process-wide certificate store, fingerprint pinning, and
//! the sans-IO client session driven by the socket handler.
//!
//! The store is loaded once per process. Search order: the configured
//! `ca_file` if set, otherwise a fixed list of common system bundle
//! locations; the first file that opens is used and certificates inside it
//! that fail to decode are skipped silently.

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use bytes::BytesMut;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::WebPkiSupportedAlgorithms;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::ParsedCertificate;
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

/// System CA bundle locations tried in order when `ca_file` is unset.
pub const DEFAULT_CA_BUNDLE_PATHS: &[&str] = &[
    "/etc/ssl/certs/ca-bundle.crt",
    "/etc/pki/tls/certs/ca-bundle.crt",
    "/etc/ssl/certs/ca-certificates.crt",
    "/etc/ca-certificates/extracted/tls-ca-bundle.pem",
];

static STORE: OnceLock<Arc<RootCertStore>> = OnceLock::new();

/// The process-wide certificate store, loaded on first use.
pub fn trust_store(ca_file: Option<&Path>) -> Arc<RootCertStore> {
    STORE
        .get_or_init(|| {
            let paths: Vec<PathBuf> = match ca_file {
                Some(p) => vec![p.to_path_buf()],
                None => DEFAULT_CA_BUNDLE_PATHS.iter().map(PathBuf::from).collect(),
            };
            Arc::new(load_store(&paths))
        })
        .clone()
}

/// Load a certificate store from the first readable bundle in `paths`.
pub fn load_store(paths: &[PathBuf]) -> RootCertStore {
    for path in paths {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "CA bundle not usable");
                continue;
            }
        };
        let mut reader = BufReader::new(file);
        let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
            .filter_map(Result::ok)
            .collect();
        let mut store = RootCertStore::empty();
        let (added, ignored) = store.add_parsable_certificates(certs);
        debug!(path = %path.display(), added, ignored, "loaded CA bundle");
        return store;
    }
    warn!("no CA bundle could be loaded; TLS validation will fail unless a fingerprint is pinned");
    RootCertStore::empty()
}

/// SHA-256 fingerprint of a certificate, colon-separated uppercase hex.
pub fn fingerprint(cert: &CertificateDer<'_>) -> String {
    let digest = Sha256::digest(cert.as_ref());
    digest
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

fn normalize_fingerprint(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_hexdigit())
        .collect::<String>()
        .to_uppercase()
}

/// Certificate verifier: standard chain validation with hostname match,
/// overridable by a pinned leaf fingerprint, with a per-handler abort policy
/// for everything else.
#[derive(Debug)]
pub struct PinnedVerifier {
    inner: Option<Arc<WebPkiServerVerifier>>,
    pin: Option<String>,
    abort_on_invalid: bool,
    algs: WebPkiSupportedAlgorithms,
}

impl PinnedVerifier {
    /// Build a verifier over `store` with an optional normalized pin.
    pub fn new(store: Arc<RootCertStore>, pin: Option<&str>, abort_on_invalid: bool) -> Self {
        // An empty store cannot back a webpki verifier; chain validation then
        // always fails and the pin/policy path decides.
        let inner = if store.is_empty() {
            None
        } else {
            WebPkiServerVerifier::builder(store).build().ok()
        };
        PinnedVerifier {
            inner,
            pin: pin.map(normalize_fingerprint),
            abort_on_invalid,
            algs: rustls::crypto::ring::default_provider().signature_verification_algorithms,
        }
    }

    fn pin_matches(&self, end_entity: &CertificateDer<'_>, server_name: &ServerName<'_>) -> bool {
        let Some(expected) = &self.pin else {
            return false;
        };
        let actual = normalize_fingerprint(&fingerprint(end_entity));
        if &actual != expected {
            return false;
        }
        // The pin only holds together with the purported hostname.
        match ParsedCertificate::try_from(end_entity) {
            Ok(parsed) => rustls::client::verify_server_name(&parsed, server_name).is_ok(),
            Err(_) => false,
        }
    }
}

impl ServerCertVerifier for PinnedVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let chain_result = match &self.inner {
            Some(verifier) => verifier
                .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
                .map(|_| ()),
            None => Err(rustls::Error::General("empty certificate store".into())),
        };

        match chain_result {
            Ok(()) => Ok(ServerCertVerified::assertion()),
            Err(err) => {
                warn!(server = ?server_name, error = %err, "TLS certificate check failed");
                if self.pin_matches(end_entity, server_name) {
                    info!(server = ?server_name, "certificate accepted by pinned fingerprint");
                    return Ok(ServerCertVerified::assertion());
                }
                if !self.abort_on_invalid {
                    warn!(server = ?server_name, "continuing despite invalid certificate");
                    return Ok(ServerCertVerified::assertion());
                }
                Err(err)
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algs)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algs)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algs.supported_schemes()
    }
}

/// Build a client configuration around a [`PinnedVerifier`].
pub fn client_config(
    store: Arc<RootCertStore>,
    pin: Option<&str>,
    abort_on_invalid: bool,
) -> Arc<ClientConfig> {
    let verifier = Arc::new(PinnedVerifier::new(store, pin, abort_on_invalid));
    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();
    Arc::new(config)
}

/// TLS session errors.
#[derive(Debug, Error)]
pub enum TlsError {
    /// Protocol-level failure from the TLS engine.
    #[error("{0}")]
    Protocol(#[from] rustls::Error),
    /// The hostname is not a valid SNI name.
    #[error("invalid server name: {0}")]
    Name(String),
}

/// A client TLS engine interposed between the socket and the line parser.
///
/// Encrypted bytes from the peer go in through [`TlsSession::feed_incoming`],
/// decrypted plaintext comes out into the caller's in-buffer, and
/// [`TlsSession::take_outgoing`] yields the encrypted bytes to put on the
/// wire.
pub struct TlsSession {
    conn: ClientConnection,
}

impl TlsSession {
    /// Start a session toward `hostname` (also used for SNI).
    pub fn new(config: Arc<ClientConfig>, hostname: &str) -> Result<Self, TlsError> {
        let name = ServerName::try_from(hostname.to_owned())
            .map_err(|e| TlsError::Name(e.to_string()))?;
        let conn = ClientConnection::new(config, name)?;
        Ok(TlsSession { conn })
    }

    /// True once the handshake has completed.
    pub fn is_active(&self) -> bool {
        !self.conn.is_handshaking()
    }

    /// Feed encrypted bytes from the peer; decrypted plaintext is appended
    /// to `plain`.
    ///
    /// Returns `(activated, peer_closed)`: whether this call completed the
    /// handshake, and whether the peer sent a TLS close.
    pub fn feed_incoming(
        &mut self,
        mut data: &[u8],
        plain: &mut BytesMut,
    ) -> Result<(bool, bool), TlsError> {
        let was_active = self.is_active();
        let mut peer_closed = false;

        while !data.is_empty() {
            let n = self
                .conn
                .read_tls(&mut data)
                .map_err(|e| TlsError::Protocol(rustls::Error::General(e.to_string())))?;
            if n == 0 {
                break;
            }
            let state = self.conn.process_new_packets()?;

            let mut remaining = state.plaintext_bytes_to_read();
            let mut chunk = [0u8; 4096];
            while remaining > 0 {
                let n = self
                    .conn
                    .reader()
                    .read(&mut chunk)
                    .map_err(|e| TlsError::Protocol(rustls::Error::General(e.to_string())))?;
                if n == 0 {
                    break;
                }
                plain.extend_from_slice(&chunk[..n]);
                remaining = remaining.saturating_sub(n);
            }

            if state.peer_has_closed() {
                peer_closed = true;
                break;
            }
        }

        Ok((!was_active && self.is_active(), peer_closed))
    }

    /// Encrypt plaintext for the peer. Only valid once active.
    pub fn send_plain(&mut self, data: &[u8]) -> Result<(), TlsError> {
        self.conn
            .writer()
            .write_all(data)
            .map_err(|e| TlsError::Protocol(rustls::Error::General(e.to_string())))?;
        Ok(())
    }

    /// Drain pending encrypted output (handshake records included).
    pub fn take_outgoing(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while self.conn.wants_write() {
            if self.conn.write_tls(&mut out).is_err() {
                break;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn fingerprint_normalization_strips_separators() {
        assert_eq!(normalize_fingerprint("ab:cd ef-01"), "ABCDEF01");
        assert_eq!(normalize_fingerprint("ABCDEF01"), "ABCDEF01");
    }

    #[test]
    fn fingerprint_format_is_colon_separated_sha256() {
        let cert = CertificateDer::from(vec![1u8, 2, 3]);
        let fp = fingerprint(&cert);
        // 32 bytes -> 64 hex digits + 31 colons
        assert_eq!(fp.len(), 95);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() || c == ':'));
        assert_eq!(fp, fp.to_uppercase());
    }

    #[test]
    fn store_search_order_first_readable_wins() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.pem");
        let garbage = dir.path().join("garbage.pem");
        let mut f = File::create(&garbage).unwrap();
        f.write_all(b"not a pem at all").unwrap();

        // The first path that opens is used even when nothing inside decodes.
        let store = load_store(&[missing.clone(), garbage.clone()]);
        assert!(store.is_empty());

        // No readable path at all also yields an empty store.
        let store = load_store(&[missing]);
        assert!(store.is_empty());
    }

    #[test]
    fn fingerprint_pin_overrides_failed_chain_validation() {
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = rcgen::CertificateParams::new(vec!["pin.test".to_owned()])
            .unwrap()
            .self_signed(&key)
            .unwrap();
        let der = cert.der().clone();
        let pin = fingerprint(&der);
        let store = Arc::new(RootCertStore::empty());
        let name = ServerName::try_from("pin.test".to_owned()).unwrap();

        // Chain validation cannot succeed, but the pin plus matching
        // hostname lets the session proceed.
        let verifier = PinnedVerifier::new(store.clone(), Some(&pin), true);
        assert!(verifier
            .verify_server_cert(&der, &[], &name, &[], UnixTime::now())
            .is_ok());

        // A hostname mismatch defeats the pin.
        let other = ServerName::try_from("other.test".to_owned()).unwrap();
        assert!(verifier
            .verify_server_cert(&der, &[], &other, &[], UnixTime::now())
            .is_err());

        // A wrong pin aborts under the abort policy.
        let verifier = PinnedVerifier::new(store.clone(), Some("AB:CD"), true);
        assert!(verifier
            .verify_server_cert(&der, &[], &name, &[], UnixTime::now())
            .is_err());

        // Without the abort policy the session continues unauthenticated.
        let verifier = PinnedVerifier::new(store, None, false);
        assert!(verifier
            .verify_server_cert(&der, &[], &name, &[], UnixTime::now())
            .is_ok());
    }

    #[test]
    fn generated_ca_bundle_loads() {
        let dir = tempfile::tempdir().unwrap();
        let ca_path = dir.path().join("ca.pem");
        let key = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(vec!["ca.test".to_owned()]).unwrap();
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let cert = params.self_signed(&key).unwrap();
        std::fs::write(&ca_path, cert.pem()).unwrap();

        let store = load_store(&[ca_path]);
        assert_eq!(store.len(), 1);
    }
}
