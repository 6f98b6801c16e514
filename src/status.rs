//! Status events pushed to the embedding application
//!
//! The session never calls into the UI directly. It publishes
//! [`StatusEvent`]s to a [`StatusSink`], which must return quickly and must
//! not call back into the session: sinks are invoked from the network tasks
//! while the session state lock is held.

use std::net::SocketAddr;
use tokio::sync::mpsc;

/// Where a text message came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
}

/// Which audio path an amplitude reading belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelSource {
    Mic,
    Speaker,
}

/// One status update from a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// Host is waiting for its peer on `addr`
    Listening { addr: SocketAddr },
    /// The reliable channel is up
    Connected { peer: SocketAddr },
    /// A text message, already de-obfuscated
    Message { origin: Origin, text: String },
    /// Amplitude of the last frame sent or played
    Level { source: LevelSource, amplitude: u32 },
    /// Connection setup failed; the session is finished
    Error { reason: String },
    /// The session was closed locally
    Disconnected,
}

impl std::fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusEvent::Listening { addr } => write!(f, "Waiting for peer on {}", addr),
            StatusEvent::Connected { peer } => write!(f, "Connected to {}", peer),
            StatusEvent::Message { origin: Origin::Local, text } => write!(f, "Me: {}", text),
            StatusEvent::Message { origin: Origin::Remote, text } => write!(f, "Peer: {}", text),
            StatusEvent::Level { source, amplitude } => write!(f, "{:?} level {}", source, amplitude),
            StatusEvent::Error { reason } => write!(f, "Error: {}", reason),
            StatusEvent::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// Receiver of session status
pub trait StatusSink: Send + Sync {
    fn publish(&self, event: StatusEvent);
}

impl<F> StatusSink for F
where
    F: Fn(StatusEvent) + Send + Sync,
{
    fn publish(&self, event: StatusEvent) {
        self(event)
    }
}

/// Hands events to another thread through an unbounded channel
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<StatusEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StatusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl StatusSink for ChannelSink {
    fn publish(&self, event: StatusEvent) {
        // Receiver gone means nobody is watching any more.
        let _ = self.tx.send(event);
    }
}

/// Writes every event to the log
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn publish(&self, event: StatusEvent) {
        match &event {
            StatusEvent::Error { .. } => tracing::error!("{}", event),
            StatusEvent::Level { .. } => tracing::trace!("{}", event),
            _ => tracing::info!("{}", event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_channel_sink_hand_off() {
        let (sink, mut rx) = ChannelSink::new();
        sink.publish(StatusEvent::Disconnected);
        assert_eq!(rx.try_recv().unwrap(), StatusEvent::Disconnected);
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.publish(StatusEvent::Disconnected);
    }

    #[test]
    fn test_closure_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_by_sink = seen.clone();
        let sink = move |event: StatusEvent| seen_by_sink.lock().push(event);

        sink.publish(StatusEvent::Error { reason: "boom".into() });
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_display() {
        let event = StatusEvent::Message {
            origin: Origin::Remote,
            text: "hello".into(),
        };
        assert_eq!(event.to_string(), "Peer: hello");
    }
}
