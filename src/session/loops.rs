//! The three data loops of a connected session
//!
//! | loop              | ends on                          | errors          |
//! |-------------------|----------------------------------|-----------------|
//! | reliable receive  | cancel, EOF, any read error      | end the loop    |
//! | datagram receive  | cancel                           | swallowed       |
//! | mic transmit      | cancel                           | swallowed       |
//!
//! The reliable loop ending is how a vanished peer is noticed; there is no
//! heartbeat. Loops hold a `Weak<Session>` and stop once it is gone.

use bytes::Bytes;
use futures_util::StreamExt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::Session;
use crate::audio::{amplitude, AudioDevice, AudioFrame};
use crate::cipher::CipherKey;
use crate::constants::MAX_DATAGRAM_BYTES;
use crate::network::TextReader;
use crate::status::{LevelSource, Origin, StatusEvent};

/// Pause after a capture read that produced nothing, so an absent device does not spin
const EMPTY_READ_BACKOFF: Duration = Duration::from_millis(20);

/// Decode inbound text until the channel closes
pub(super) async fn reliable_receive(
    session: Weak<Session>,
    cancel: CancellationToken,
    key: CipherKey,
    mut reader: TextReader,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = reader.next() => next,
        };

        match next {
            Some(Ok(payload)) => match std::str::from_utf8(&payload) {
                Ok(hidden) => {
                    let Some(session) = session.upgrade() else {
                        break;
                    };
                    session.report(StatusEvent::Message {
                        origin: Origin::Remote,
                        text: key.apply(hidden),
                    });
                }
                Err(e) => tracing::warn!("Dropping text frame that is not UTF-8: {}", e),
            },
            Some(Err(e)) => {
                tracing::info!("Text channel failed: {}", e);
                break;
            }
            None => {
                tracing::info!("Peer closed the text channel");
                break;
            }
        }
    }

    tracing::debug!("Reliable receive loop finished");
}

/// Play every datagram that arrives. Bad datagrams never end the loop.
pub(super) async fn datagram_receive(
    session: Weak<Session>,
    cancel: CancellationToken,
    audio: Arc<dyn AudioDevice>,
    socket: Arc<UdpSocket>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];

    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => received,
        };

        match received {
            Ok((len, from)) => {
                let frame = AudioFrame::from_bytes(Bytes::copy_from_slice(&buf[..len]));
                audio.write_frame(&frame);

                let loudness = amplitude(frame.as_bytes());
                tracing::trace!(bytes = len, %from, loudness, "Voice datagram");
                let Some(session) = session.upgrade() else {
                    break;
                };
                session.report(StatusEvent::Level {
                    source: LevelSource::Speaker,
                    amplitude: loudness,
                });
            }
            Err(e) => tracing::trace!("Datagram receive error ignored: {}", e),
        }
    }

    tracing::debug!("Datagram receive loop finished");
}

/// Capture and send frames while the mic is enabled
pub(super) async fn mic_transmit(
    session: Weak<Session>,
    cancel: CancellationToken,
    audio: Arc<dyn AudioDevice>,
    socket: Arc<UdpSocket>,
    mut mic: watch::Receiver<bool>,
) {
    loop {
        let enabled = tokio::select! {
            _ = cancel.cancelled() => break,
            enabled = mic.wait_for(|on| *on) => enabled.is_ok(),
        };
        if !enabled || !session.upgrade().is_some_and(|s| s.is_connected()) {
            break;
        }

        let audio = Arc::clone(&audio);
        let captured = tokio::select! {
            _ = cancel.cancelled() => break,
            captured = tokio::task::spawn_blocking(move || audio.read_frame()) => captured,
        };

        let frame = match captured {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Capture task failed: {}", e);
                None
            }
        };
        let Some(frame) = frame else {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(EMPTY_READ_BACKOFF) => {}
            }
            continue;
        };

        let target = match session.upgrade() {
            Some(session) => session.datagram_target(),
            None => break,
        };
        let Some(target) = target else {
            continue;
        };

        match socket.send_to(frame.as_bytes(), target).await {
            Ok(sent) => {
                let loudness = amplitude(frame.as_bytes());
                tracing::trace!(bytes = sent, %target, loudness, "Voice frame sent");
                let Some(session) = session.upgrade() else {
                    break;
                };
                session.report(StatusEvent::Level {
                    source: LevelSource::Mic,
                    amplitude: loudness,
                });
            }
            Err(e) => tracing::trace!("Datagram send error ignored: {}", e),
        }
    }

    tracing::debug!("Mic transmit loop finished");
}
