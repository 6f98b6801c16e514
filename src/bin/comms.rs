//! Terminal shell for a secure comms session
//!
//! ```text
//! comms host <key>
//! comms join <host-ip[:port]> <key>
//! ```
//!
//! Lines typed on stdin are sent as text. `/mic on`, `/mic off` and `/quit`
//! control the session.

use anyhow::{bail, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use secure_comms::{
    audio::platform_device,
    config::SessionConfig,
    status::{ChannelSink, StatusEvent},
    Session,
};

enum Command {
    Host { key: String },
    Join { peer: String, key: String },
}

fn parse_args() -> Result<Command> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [mode, key] if mode == "host" => Ok(Command::Host { key: key.clone() }),
        [mode, peer, key] if mode == "join" => Ok(Command::Join {
            peer: peer.clone(),
            key: key.clone(),
        }),
        _ => bail!("usage: comms host <key> | comms join <host-ip[:port]> <key>"),
    }
}

/// Load config and wire a session to the platform audio device
fn build_session(sink: ChannelSink) -> secure_comms::Result<Arc<Session>> {
    let config = SessionConfig::load_or_default()?;
    tracing::info!(
        "Reliable port {}, datagram port {}",
        config.reliable_port,
        config.datagram_port
    );
    Ok(Session::new(config, platform_device(), Arc::new(sink))?)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let command = parse_args()?;

    let (sink, mut events) = ChannelSink::new();
    let session = build_session(sink)?;

    let audio_ready = match &command {
        Command::Host { key } => session.start_host(key)?,
        Command::Join { peer, key } => session.start_client(peer, key)?,
    };
    if !audio_ready {
        println!("Audio device unavailable: text only.");
    }

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                StatusEvent::Level { .. } => {}
                other => println!("{}", other),
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = session.finished() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };

        match line.trim() {
            "" => {}
            "/quit" => break,
            "/mic on" => session.set_mic_enabled(true),
            "/mic off" => session.set_mic_enabled(false),
            text => {
                if let Err(e) = session.send_text(text).await {
                    tracing::warn!("Message not sent: {}", e);
                }
            }
        }
    }

    session.disconnect();
    Ok(())
}
