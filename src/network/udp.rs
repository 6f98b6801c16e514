//! Datagram socket for voice frames

use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use tokio::net::UdpSocket;

use crate::constants::FRAME_BYTES;
use crate::error::SetupError;

/// Kernel receive buffer, sized for a burst of frames
const RECV_BUFFER_BYTES: usize = FRAME_BYTES * 64;

/// Bind the voice socket. Must be called from within a tokio runtime.
pub fn bind_datagram(addr: SocketAddr) -> Result<UdpSocket, SetupError> {
    let bind_failed = |source: std::io::Error| SetupError::BindFailed {
        proto: "UDP",
        port: addr.port(),
        source,
    };

    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(bind_failed)?;

    if let Err(e) = socket.set_recv_buffer_size(RECV_BUFFER_BYTES) {
        tracing::debug!("Could not enlarge UDP receive buffer: {}", e);
    }

    socket.set_nonblocking(true).map_err(bind_failed)?;
    socket.bind(&addr.into()).map_err(bind_failed)?;

    let socket = UdpSocket::from_std(socket.into()).map_err(bind_failed)?;
    tracing::debug!("Datagram socket bound on {:?}", socket.local_addr().ok());
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_ephemeral_and_exchange() {
        let a = bind_datagram("127.0.0.1:0".parse().unwrap()).unwrap();
        let b = bind_datagram("127.0.0.1:0".parse().unwrap()).unwrap();

        a.send_to(b"pcm", b.local_addr().unwrap()).await.unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"pcm");
        assert_eq!(from, a.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_bind_conflict_reports_port() {
        let a = bind_datagram("127.0.0.1:0".parse().unwrap()).unwrap();
        let taken = a.local_addr().unwrap();
        match bind_datagram(taken) {
            Err(SetupError::BindFailed { proto, port, .. }) => {
                assert_eq!(proto, "UDP");
                assert_eq!(port, taken.port());
            }
            other => panic!("expected bind failure, got {:?}", other.map(|_| ())),
        }
    }
}
