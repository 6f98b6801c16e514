//! Error types for the secure comms session

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

use crate::session::SessionState;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Setup error: {0}")]
    Setup(#[from] SetupError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio backend errors. Never cross the `AudioDevice` boundary.
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Connection establishment failures. Reported once, then the session is failed.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Failed to bind {proto} port {port}: {source}")]
    BindFailed {
        proto: &'static str,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to accept peer: {0}")]
    AcceptFailed(#[source] std::io::Error),

    #[error("Connection to {addr} failed: {source}")]
    ConnectionFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection to {addr} timed out after {after:?}")]
    Timeout { addr: SocketAddr, after: Duration },

    #[error("Session closed during setup")]
    Cancelled,
}

/// Errors returned by the session API to its caller
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Shared key must not be empty")]
    EmptyKey,

    #[error("Session already started (state: {0})")]
    AlreadyStarted(SessionState),

    #[error("Invalid peer address: {0}")]
    InvalidPeer(String),

    #[error("Session is not connected")]
    NotConnected,

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Message too long: {len} bytes (max {max})")]
    MessageTooLong { len: usize, max: usize },

    #[error("No tokio runtime available")]
    NoRuntime,

    #[error("Text write failed: {0}")]
    Transport(#[source] std::io::Error),
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
