//! Configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use tacrelay_cot::{DEFAULT_HARD_CAP, DEFAULT_SOFT_CAP};

/// Transport the relay serves on. Closed set; there is no string selector
/// that could hold an invalid value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Transport {
    /// Raw TCP
    Plain,
    /// TLS over TCP
    Tls(TlsSettings),
}

/// TLS protocol versions the configuration surface accepts.
///
/// 1.0 and 1.1 exist here for compatibility with legacy peers' configs, but
/// rustls implements neither; they clamp to 1.2 at startup with a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TlsVersion {
    #[serde(rename = "1.0")]
    V1_0,
    #[serde(rename = "1.1")]
    V1_1,
    #[serde(rename = "1.2")]
    V1_2,
    #[serde(rename = "1.3")]
    V1_3,
}

/// TLS material and policy, supplied by the operator's certificate subsystem.
/// Opaque to the relay beyond loading it at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsSettings {
    /// PEM certificate chain presented to clients
    pub cert_file: PathBuf,

    /// PEM private key for the chain
    pub key_file: PathBuf,

    /// PEM CA bundle for verifying client certificates. Presence enables
    /// mutual TLS.
    pub client_ca_file: Option<PathBuf>,

    /// Request a client certificate but accept any, including self-signed.
    /// Deliberate compatibility mode for field deployments without a shared
    /// CA; never the default.
    #[serde(default)]
    pub allow_unverified_clients: bool,

    #[serde(default = "TlsSettings::default_min_version")]
    pub min_version: TlsVersion,

    #[serde(default = "TlsSettings::default_max_version")]
    pub max_version: TlsVersion,
}

impl TlsSettings {
    fn default_min_version() -> TlsVersion {
        TlsVersion::V1_2
    }

    fn default_max_version() -> TlsVersion {
        TlsVersion::V1_3
    }
}

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Path this configuration was loaded from
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Address to bind the stream listener on
    pub bind_host: String,

    /// Stream (TCP or TLS) port
    pub tcp_port: u16,

    /// Optional UDP ingest port: one datagram = one CoT message, no framing
    pub udp_port: Option<u16>,

    /// Maximum concurrently connected stream clients; further connections
    /// are refused at accept time
    pub max_clients: usize,

    /// Seconds a connection may stay silent before forced disconnect
    pub idle_timeout_secs: u64,

    /// Capacity of each client's outbound queue. A client this far behind
    /// the broadcast stream is evicted.
    pub outbound_queue_depth: usize,

    /// Framer buffer warning threshold (bytes)
    pub framer_soft_cap: usize,

    /// Framer buffer clearing threshold (bytes)
    pub framer_hard_cap: usize,

    /// Transport for the stream listener. Kept last: TOML emits tables after
    /// scalar values.
    pub transport: Transport,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            config_path: Self::default_config_path(),
            bind_host: "0.0.0.0".to_string(),
            tcp_port: 8087,
            udp_port: None,
            transport: Transport::Plain,
            max_clients: 64,
            idle_timeout_secs: 300,
            outbound_queue_depth: 64,
            framer_soft_cap: DEFAULT_SOFT_CAP,
            framer_hard_cap: DEFAULT_HARD_CAP,
        }
    }
}

impl RelayConfig {
    /// Load configuration from the default path, or create the default file
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_config_path())
    }

    /// Load configuration from `config_path`, writing a default file there
    /// if none exists
    pub fn load_from(config_path: PathBuf) -> Result<Self> {
        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .context("Failed to read config file")?;

            let mut config: RelayConfig = toml::from_str(&contents)
                .context("Failed to parse config file")?;

            config.config_path = config_path;
            Ok(config)
        } else {
            let config = Self {
                config_path,
                ..Self::default()
            };
            config.save().context("Failed to save default config")?;
            Ok(config)
        }
    }

    /// Save configuration to its file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        std::fs::write(&self.config_path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }

    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tacrelay")
            .join("config.toml")
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.tcp_port)
    }

    pub fn udp_bind_addr(&self) -> Option<String> {
        self.udp_port
            .map(|port| format!("{}:{}", self.bind_host, port))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_writes_default_file_on_first_run() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = RelayConfig::load_from(path.clone()).unwrap();
        assert!(path.exists());
        assert_eq!(config.tcp_port, 8087);
        assert!(matches!(config.transport, Transport::Plain));

        // Second load round-trips the written file
        let reloaded = RelayConfig::load_from(path).unwrap();
        assert_eq!(reloaded.max_clients, config.max_clients);
    }

    #[test]
    fn test_tls_transport_parses_from_toml() {
        let toml_str = r#"
            bind_host = "127.0.0.1"
            tcp_port = 8089
            max_clients = 8
            idle_timeout_secs = 60
            outbound_queue_depth = 32
            framer_soft_cap = 65536
            framer_hard_cap = 262144

            [transport]
            kind = "tls"
            cert_file = "/etc/tacrelay/server.pem"
            key_file = "/etc/tacrelay/server.key"
            client_ca_file = "/etc/tacrelay/clients-ca.pem"
            min_version = "1.1"
            max_version = "1.3"
        "#;
        let config: RelayConfig = toml::from_str(toml_str).unwrap();
        let Transport::Tls(tls) = &config.transport else {
            panic!("expected tls transport");
        };
        assert_eq!(tls.min_version, TlsVersion::V1_1);
        assert!(!tls.allow_unverified_clients);
        assert!(tls.client_ca_file.is_some());
    }

    #[test]
    fn test_plain_transport_parses_from_toml() {
        let toml_str = r#"
            bind_host = "0.0.0.0"
            tcp_port = 8087
            max_clients = 64
            idle_timeout_secs = 300
            outbound_queue_depth = 64
            framer_soft_cap = 524288
            framer_hard_cap = 2097152

            [transport]
            kind = "plain"
        "#;
        let config: RelayConfig = toml::from_str(toml_str).unwrap();
        assert!(matches!(config.transport, Transport::Plain));
        assert_eq!(config.idle_timeout(), Duration::from_secs(300));
    }
}
