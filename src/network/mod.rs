//! Network subsystem: reliable text channel and voice datagrams

pub mod tcp;
pub mod udp;

pub use tcp::{accept_one, connect, listen, split_text_channel, TextReader, TextWriter};
pub use udp::bind_datagram;
