//! Session configuration
//!
//! Loaded from an optional TOML file. Every field has a default, so the
//! session runs without any file present.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_DATAGRAM_PORT, DEFAULT_RELIABLE_PORT};
use crate::error::ConfigError;

/// Network settings for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Local address both sockets bind to
    pub bind_address: IpAddr,
    /// TCP port the host listens on and the client dials
    pub reliable_port: u16,
    /// Local UDP port for voice
    pub datagram_port: u16,
    /// Peer's UDP port, when it differs from ours
    pub peer_datagram_port: Option<u16>,
    /// Client gives up connecting after this many seconds
    pub connect_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            reliable_port: DEFAULT_RELIABLE_PORT,
            datagram_port: DEFAULT_DATAGRAM_PORT,
            peer_datagram_port: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl SessionConfig {
    /// Read a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Read the per-user config file if there is one, otherwise use defaults
    pub fn load_or_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading config from {}", path.display());
                Self::load(path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// `config.toml` in the platform config directory
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "secure-comms").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn reliable_bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.reliable_port)
    }

    pub fn datagram_bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.datagram_port)
    }

    /// Where voice for `peer` is sent: its IP, the peer datagram port
    pub fn datagram_target(&self, peer: SocketAddr) -> SocketAddr {
        SocketAddr::new(peer.ip(), self.peer_datagram_port.unwrap_or(self.datagram_port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.reliable_port, 5000);
        assert_eq!(config.datagram_port, 5005);
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SessionConfig::parse("reliable_port = 6000\n").unwrap();
        assert_eq!(config.reliable_port, 6000);
        assert_eq!(config.datagram_port, DEFAULT_DATAGRAM_PORT);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            SessionConfig::parse("reliable_port = \"high\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bind_address = \"127.0.0.1\"").unwrap();
        writeln!(file, "peer_datagram_port = 7007").unwrap();

        let config = SessionConfig::load(file.path()).unwrap();
        let peer: SocketAddr = "10.0.0.2:5000".parse().unwrap();
        assert_eq!(config.datagram_target(peer), "10.0.0.2:7007".parse().unwrap());
        assert_eq!(config.datagram_bind_addr(), "127.0.0.1:5005".parse().unwrap());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            SessionConfig::load("/nonexistent/secure-comms.toml"),
            Err(ConfigError::Read { .. })
        ));
    }
}
