//! Reliable text channel
//!
//! Each text message travels as one frame with a 2-byte big-endian length
//! prefix, so one send is always one receive. Frames above
//! [`MAX_TEXT_BYTES`] are refused on both ends.

use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use crate::constants::MAX_TEXT_BYTES;
use crate::error::SetupError;

/// Inbound half of the text channel
pub type TextReader = FramedRead<OwnedReadHalf, LengthDelimitedCodec>;

/// Outbound half of the text channel
pub type TextWriter = FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>;

/// Codec shared by both ends of the text channel
pub fn text_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(2)
        .max_frame_length(MAX_TEXT_BYTES)
        .new_codec()
}

/// Bind and listen for exactly one peer. Must be called from within a tokio runtime.
pub fn listen(addr: SocketAddr) -> Result<TcpListener, SetupError> {
    let bind_failed = |source: std::io::Error| SetupError::BindFailed {
        proto: "TCP",
        port: addr.port(),
        source,
    };

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(bind_failed)?;
    socket.set_reuse_address(true).map_err(bind_failed)?;
    socket.set_nonblocking(true).map_err(bind_failed)?;
    socket.bind(&addr.into()).map_err(bind_failed)?;
    socket.listen(1).map_err(bind_failed)?;

    TcpListener::from_std(socket.into()).map_err(bind_failed)
}

/// Wait for the single inbound connection
pub async fn accept_one(listener: &TcpListener) -> Result<(TcpStream, SocketAddr), SetupError> {
    let (stream, peer) = listener.accept().await.map_err(SetupError::AcceptFailed)?;
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!("set_nodelay failed: {}", e);
    }
    Ok((stream, peer))
}

/// Connect to the host, giving up after `timeout`
pub async fn connect(addr: SocketAddr, timeout: Duration) -> Result<TcpStream, SetupError> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| SetupError::Timeout {
            addr,
            after: timeout,
        })?
        .map_err(|source| SetupError::ConnectionFailed { addr, source })?;

    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!("set_nodelay failed: {}", e);
    }
    Ok(stream)
}

/// Split a connected stream into framed reader and writer halves
pub fn split_text_channel(stream: TcpStream) -> (TextReader, TextWriter) {
    let (read_half, write_half) = stream.into_split();
    (
        FramedRead::new(read_half, text_codec()),
        FramedWrite::new(write_half, text_codec()),
    )
}
