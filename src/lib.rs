//! # Secure Comms
//!
//! Peer-to-peer text chat and full-duplex voice between exactly two endpoints.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────────────────────┐                 ┌───────────────────────────────┐
//! │             HOST              │                 │            CLIENT             │
//! │                               │   TCP (text)    │                               │
//! │  listen + accept one peer  ◄──┼─────────────────┼──  connect (5s timeout)       │
//! │        │                      │                 │        │                      │
//! │        ▼                      │                 │        ▼                      │
//! │  ┌───────────────────────┐    │                 │  ┌───────────────────────┐    │
//! │  │ reliable receive loop │ ◄──┼── obfuscated ───┼──│ send_text             │    │
//! │  └───────────────────────┘    │   length-framed │  └───────────────────────┘    │
//! │                               │                 │                               │
//! │  ┌───────────────────────┐    │   UDP (voice)   │  ┌───────────────────────┐    │
//! │  │ mic transmit loop     │ ───┼── raw PCM ─────►┼─►│ datagram receive loop │    │
//! │  │ (gated by mic toggle) │    │   frames        │  │ -> playback           │    │
//! │  └───────────────────────┘    │                 │  └───────────────────────┘    │
//! │         ▲         │           │                 │         │                     │
//! │  ┌──────┴─────────▼───────┐   │                 │  ┌──────▼─────────────────┐   │
//! │  │ AudioDevice (cpal)     │   │                 │  │ AudioDevice (cpal)     │   │
//! │  │ Mobile/DesktopAudio    │   │                 │  │ Mobile/DesktopAudio    │   │
//! │  └────────────────────────┘   │                 │  └────────────────────────┘   │
//! └───────────────────────────────┘                 └───────────────────────────────┘
//! ```
//!
//! Every loop reports to a [`status::StatusSink`] supplied by the embedding
//! application. Nothing in the session blocks the caller's thread.

pub mod audio;
pub mod cipher;
pub mod config;
pub mod error;
pub mod network;
pub mod session;
pub mod status;

pub use error::{Error, Result};
pub use session::{Role, Session, SessionState};
pub use status::{StatusEvent, StatusSink};

/// Application-wide constants
pub mod constants {
    /// Capture and playback sample rate
    pub const SAMPLE_RATE: u32 = 16_000;

    /// Mono PCM on the wire
    pub const CHANNELS: u16 = 1;

    /// Samples per audio frame. Both peers must agree since it is also the datagram size.
    pub const FRAME_SAMPLES: usize = 1024;

    /// Bytes per audio frame (i16 little-endian)
    pub const FRAME_BYTES: usize = FRAME_SAMPLES * 2;

    /// Largest text message accepted on the reliable channel, after obfuscation
    pub const MAX_TEXT_BYTES: usize = 1024;

    /// Receive buffer for one datagram
    pub const MAX_DATAGRAM_BYTES: usize = 4096;

    /// Default TCP port for the text channel
    pub const DEFAULT_RELIABLE_PORT: u16 = 5000;

    /// Default UDP port for voice
    pub const DEFAULT_DATAGRAM_PORT: u16 = 5005;

    /// Default client connect timeout in seconds
    pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

    /// How long a single capture read waits before reporting "no data"
    pub const CAPTURE_POLL_MS: u64 = 100;

    /// Playback ring buffer capacity (in frames)
    pub const PLAYBACK_QUEUE_FRAMES: usize = 32;
}
