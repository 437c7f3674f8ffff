//! Configuration loading.
//!
//! TOML configuration with one `[component]` block for the XMPP side and a
//! `[servers."host"]` table per IRC server (ports, TLS ports, optional
//! certificate fingerprint pin).

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Daemon configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// XMPP component connection.
    pub component: ComponentConfig,
    /// CA bundle path; system locations are searched when unset.
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
    /// Optional source address for outbound IRC connections.
    #[serde(default)]
    pub bind_address: Option<IpAddr>,
    /// Per-server blocks, keyed by IRC server hostname.
    #[serde(default)]
    pub servers: HashMap<String, ServerBlock>,
}

/// XMPP component stream settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ComponentConfig {
    /// XMPP server host to connect to.
    #[serde(default = "default_component_host")]
    pub host: String,
    /// XMPP component port.
    #[serde(default = "default_component_port")]
    pub port: u16,
    /// Shared component secret.
    pub secret: String,
    /// The JID domain this component serves.
    pub hostname: String,
}

/// Connection settings for one IRC server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerBlock {
    /// Plaintext ports, tried after the TLS ports.
    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,
    /// TLS ports, tried first.
    #[serde(default = "default_tls_ports")]
    pub tls_ports: Vec<u16>,
    /// Pinned certificate fingerprint (SHA-256 hex).
    #[serde(default)]
    pub fingerprint: Option<String>,
    /// Abort the session when certificate validation fails and no pin
    /// matches. Disabling this continues unauthenticated with a warning.
    #[serde(default = "default_true")]
    pub verify_cert: bool,
}

impl Default for ServerBlock {
    fn default() -> Self {
        ServerBlock {
            ports: default_ports(),
            tls_ports: default_tls_ports(),
            fingerprint: None,
            verify_cert: true,
        }
    }
}

impl ServerBlock {
    /// The connection ladder: (port, tls) candidates in trial order.
    pub fn ladder(&self) -> Vec<(u16, bool)> {
        let mut out: Vec<(u16, bool)> = self.tls_ports.iter().map(|&p| (p, true)).collect();
        out.extend(self.ports.iter().map(|&p| (p, false)));
        out
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Settings for `host`, falling back to defaults for unknown servers.
    pub fn server(&self, host: &str) -> ServerBlock {
        self.servers.get(host).cloned().unwrap_or_default()
    }
}

fn default_component_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_component_port() -> u16 {
    5347
}

fn default_ports() -> Vec<u16> {
    vec![6667]
}

fn default_tls_ports() -> Vec<u16> {
    vec![6697, 6670]
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config: Config = toml::from_str(
            r#"
            [component]
            secret = "hunter2"
            hostname = "irc.gateway.example"
            "#,
        )
        .unwrap();
        assert_eq!(config.component.host, "127.0.0.1");
        assert_eq!(config.component.port, 5347);
        assert!(config.ca_file.is_none());

        let block = config.server("irc.example.net");
        assert_eq!(
            block.ladder(),
            vec![(6697, true), (6670, true), (6667, false)]
        );
    }

    #[test]
    fn server_block_overrides() {
        let config: Config = toml::from_str(
            r#"
            bind_address = "192.0.2.10"

            [component]
            secret = "s"
            hostname = "h"

            [servers."irc.example.net"]
            ports = [6660]
            tls_ports = []
            fingerprint = "AB:CD"
            verify_cert = false
            "#,
        )
        .unwrap();
        let block = config.server("irc.example.net");
        assert_eq!(block.ladder(), vec![(6660, false)]);
        assert_eq!(block.fingerprint.as_deref(), Some("AB:CD"));
        assert!(!block.verify_cert);
        assert_eq!(
            config.bind_address,
            Some("192.0.2.10".parse::<IpAddr>().unwrap())
        );
    }
}
