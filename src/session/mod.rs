//! Peer-to-peer session
//!
//! A [`Session`] owns the two sockets, the audio device and the lifecycle
//! state of one host/client pairing. Setup and the three data loops run as
//! tokio tasks; the API methods only touch synchronized fields and never
//! block the caller on network or audio I/O.
//!
//! Cancellation is cooperative: `disconnect` (or a setup failure) flips the
//! state, cancels the session token exactly once and releases the sockets
//! and the audio device. Every loop selects on that token, so blocked reads
//! and the host's pending `accept` are abandoned promptly.
//!
//! Running loops and a pending accept hold only a `Weak<Session>`; dropping
//! the last handle tears the session down like `disconnect` does.

mod loops;
pub mod state;

pub use state::{Role, SessionState};

use bytes::Bytes;
use futures_util::SinkExt;
use parking_lot::Mutex;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::runtime::Handle;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::audio::AudioDevice;
use crate::cipher::CipherKey;
use crate::config::SessionConfig;
use crate::constants::MAX_TEXT_BYTES;
use crate::error::{SessionError, SetupError};
use crate::network::{self, TextWriter};
use crate::status::{Origin, StatusEvent, StatusSink};

/// What the setup task has to do
#[derive(Debug, Clone, Copy)]
enum Plan {
    Host,
    Client(SocketAddr),
}

impl Plan {
    fn role(self) -> Role {
        match self {
            Plan::Host => Role::Host,
            Plan::Client(_) => Role::Client,
        }
    }
}

/// Setup left to do once the local sockets are bound
enum Pending {
    Accept(TcpListener),
    Connect { peer: SocketAddr, timeout: Duration },
}

impl Pending {
    async fn finish(self) -> Result<(TcpStream, SocketAddr), SetupError> {
        match self {
            Pending::Accept(listener) => network::accept_one(&listener).await,
            Pending::Connect { peer, timeout } => {
                let stream = network::connect(peer, timeout).await?;
                Ok((stream, peer))
            }
        }
    }
}

/// Fields read by more than one task, guarded together
struct Link {
    state: SessionState,
    role: Option<Role>,
    key: Option<CipherKey>,
    peer: Option<SocketAddr>,
    local_reliable: Option<SocketAddr>,
    local_datagram: Option<SocketAddr>,
}

/// One host/client pairing
pub struct Session {
    id: Uuid,
    config: SessionConfig,
    runtime: Handle,
    audio: Arc<dyn AudioDevice>,
    sink: Arc<dyn StatusSink>,
    link: Mutex<Link>,
    mic: watch::Sender<bool>,
    cancel: CancellationToken,
    writer: Arc<AsyncMutex<Option<TextWriter>>>,
    datagram: Mutex<Option<Arc<UdpSocket>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    /// Create an idle session. Must be called from within a tokio runtime.
    pub fn new(
        config: SessionConfig,
        audio: Arc<dyn AudioDevice>,
        sink: Arc<dyn StatusSink>,
    ) -> Result<Arc<Self>, SessionError> {
        let runtime = Handle::try_current().map_err(|_| SessionError::NoRuntime)?;
        let (mic, _) = watch::channel(false);

        Ok(Arc::new(Self {
            id: Uuid::new_v4(),
            config,
            runtime,
            audio,
            sink,
            link: Mutex::new(Link {
                state: SessionState::Idle,
                role: None,
                key: None,
                peer: None,
                local_reliable: None,
                local_datagram: None,
            }),
            mic,
            cancel: CancellationToken::new(),
            writer: Arc::new(AsyncMutex::new(None)),
            datagram: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }))
    }

    /// Listen for one peer on the configured reliable port.
    ///
    /// Returns whether the audio device opened. Connection progress is
    /// reported through the status sink.
    pub fn start_host(self: &Arc<Self>, key: &str) -> Result<bool, SessionError> {
        self.start(Plan::Host, key)
    }

    /// Connect to `peer` (`ip` or `ip:port`; the configured reliable port is
    /// used when omitted).
    ///
    /// Returns whether the audio device opened. Connection progress is
    /// reported through the status sink.
    pub fn start_client(self: &Arc<Self>, peer: &str, key: &str) -> Result<bool, SessionError> {
        let peer = parse_peer(peer, self.config.reliable_port)?;
        self.start(Plan::Client(peer), key)
    }

    fn start(self: &Arc<Self>, plan: Plan, key: &str) -> Result<bool, SessionError> {
        let key = CipherKey::new(key).ok_or(SessionError::EmptyKey)?;

        {
            let mut link = self.link.lock();
            if link.state != SessionState::Idle || link.role.is_some() {
                return Err(SessionError::AlreadyStarted(link.state.clone()));
            }
            link.role = Some(plan.role());
            link.key = Some(key);
            if let Plan::Client(peer) = plan {
                link.peer = Some(peer);
            }
        }

        let audio_ready = self.audio.open();
        if !audio_ready {
            tracing::warn!(session = %self.id, "Audio unavailable; voice will be silent");
        }

        let span = tracing::info_span!("session", id = %self.id, role = %plan.role());
        let session = Arc::clone(self);
        let handle = self
            .runtime
            .spawn(async move { session.establish(plan).await }.instrument(span));
        self.tasks.lock().push(handle);

        Ok(audio_ready)
    }

    /// Connection setup task
    async fn establish(self: Arc<Self>, plan: Plan) {
        let pending = match self.prepare(plan) {
            Ok(pending) => pending,
            Err(e) => return self.fail(e),
        };

        // Only a weak handle while waiting on the peer: dropping the last
        // `Arc<Session>` must still end a host that nobody connects to.
        let cancel = self.cancel.clone();
        let session = Arc::downgrade(&self);
        drop(self);

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return,
            outcome = pending.finish() => outcome,
        };

        let Some(session) = session.upgrade() else {
            return;
        };
        match outcome {
            Ok((stream, peer)) => session.on_connected(stream, peer).await,
            Err(e) => session.fail(e),
        }
    }

    /// Bind the local sockets and move to Listening/Connecting
    fn prepare(&self, plan: Plan) -> Result<Pending, SetupError> {
        if self.link.lock().state.is_terminal() {
            return Err(SetupError::Cancelled);
        }

        // Voice socket first, before any traffic with the peer.
        let socket = network::bind_datagram(self.config.datagram_bind_addr())?;
        {
            // Stored under the state lock: once closed, teardown has run
            // and the socket is dropped here instead.
            let mut link = self.link.lock();
            if link.state.is_terminal() {
                return Err(SetupError::Cancelled);
            }
            link.local_datagram = socket.local_addr().ok();
            *self.datagram.lock() = Some(Arc::new(socket));
        }

        match plan {
            Plan::Host => {
                let listener = network::listen(self.config.reliable_bind_addr())?;
                let addr = listener.local_addr().map_err(|source| SetupError::BindFailed {
                    proto: "TCP",
                    port: self.config.reliable_port,
                    source,
                })?;

                {
                    let mut link = self.link.lock();
                    if !link.state.can_transition_to(&SessionState::Listening) {
                        return Err(SetupError::Cancelled);
                    }
                    link.state = SessionState::Listening;
                    link.local_reliable = Some(addr);
                    self.sink.publish(StatusEvent::Listening { addr });
                }
                tracing::info!("Listening for peer on {}", addr);

                Ok(Pending::Accept(listener))
            }
            Plan::Client(peer) => {
                {
                    let mut link = self.link.lock();
                    if !link.state.can_transition_to(&SessionState::Connecting) {
                        return Err(SetupError::Cancelled);
                    }
                    link.state = SessionState::Connecting;
                }
                tracing::info!("Connecting to {}", peer);

                Ok(Pending::Connect {
                    peer,
                    timeout: self.config.connect_timeout(),
                })
            }
        }
    }

    async fn on_connected(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let local = stream.local_addr().ok();
        let (reader, writer) = network::split_text_channel(stream);

        // Writer goes in first so send_text works as soon as Connected is visible.
        *self.writer.lock().await = Some(writer);

        let connected = {
            let mut link = self.link.lock();
            let allowed = link.state.can_transition_to(&SessionState::Connected);
            if allowed {
                link.state = SessionState::Connected;
                link.peer = Some(peer);
                if local.is_some() {
                    link.local_reliable = local;
                }
                self.sink.publish(StatusEvent::Connected { peer });
            }
            allowed
        };

        if !connected {
            tracing::debug!("Session closed while connecting; dropping link to {}", peer);
            self.writer.lock().await.take();
            return;
        }
        tracing::info!("Connected to {}", peer);

        let span = tracing::Span::current();
        let weak = Arc::downgrade(&self);
        let mut handles = Vec::with_capacity(3);

        if let Some(key) = self.cipher_key() {
            handles.push(self.runtime.spawn(
                loops::reliable_receive(weak.clone(), self.cancel.clone(), key, reader)
                    .instrument(span.clone()),
            ));
        }

        let socket = self.datagram.lock().clone();
        if let Some(socket) = socket {
            handles.push(self.runtime.spawn(
                loops::datagram_receive(
                    weak.clone(),
                    self.cancel.clone(),
                    Arc::clone(&self.audio),
                    Arc::clone(&socket),
                )
                .instrument(span.clone()),
            ));
            handles.push(self.runtime.spawn(
                loops::mic_transmit(
                    weak,
                    self.cancel.clone(),
                    Arc::clone(&self.audio),
                    socket,
                    self.mic.subscribe(),
                )
                .instrument(span),
            ));
        }

        self.tasks.lock().extend(handles);
    }

    /// Record a setup failure and release everything
    fn fail(&self, error: SetupError) {
        let reason = error.to_string();
        {
            let mut link = self.link.lock();
            if link.state.is_terminal() {
                tracing::debug!("Setup ended after close: {}", reason);
                drop(link);
                self.datagram.lock().take();
                return;
            }
            link.state = SessionState::Failed(reason.clone());
            self.sink.publish(StatusEvent::Error {
                reason: reason.clone(),
            });
        }
        tracing::warn!("Session setup failed: {}", reason);
        self.teardown();
    }

    /// Send one text message to the peer.
    ///
    /// A failed write returns [`SessionError::Transport`]; nothing is retried
    /// and the message is not echoed locally.
    pub async fn send_text(&self, message: &str) -> Result<(), SessionError> {
        if message.is_empty() {
            return Err(SessionError::EmptyMessage);
        }

        let key = {
            let link = self.link.lock();
            if link.state != SessionState::Connected {
                return Err(SessionError::NotConnected);
            }
            link.key.clone().ok_or(SessionError::NotConnected)?
        };

        let payload = key.apply(message);
        if payload.len() > MAX_TEXT_BYTES {
            return Err(SessionError::MessageTooLong {
                len: payload.len(),
                max: MAX_TEXT_BYTES,
            });
        }

        {
            let mut writer = self.writer.lock().await;
            let writer = writer.as_mut().ok_or(SessionError::NotConnected)?;

            let sent = tokio::select! {
                _ = self.cancel.cancelled() => return Err(SessionError::NotConnected),
                sent = writer.send(Bytes::from(payload)) => sent,
            };
            sent.map_err(|e| {
                tracing::debug!(session = %self.id, "Text write failed: {}", e);
                SessionError::Transport(e)
            })?;
        }

        self.report(StatusEvent::Message {
            origin: Origin::Local,
            text: message.to_string(),
        });
        Ok(())
    }

    /// Turn the microphone path on or off. Repeating a value is a no-op.
    pub fn set_mic_enabled(&self, enabled: bool) {
        if enabled && self.link.lock().state.is_terminal() {
            return;
        }

        let changed = self.mic.send_if_modified(|current| {
            if *current == enabled {
                false
            } else {
                *current = enabled;
                true
            }
        });

        if changed {
            tracing::info!(session = %self.id, "Microphone {}", if enabled { "on" } else { "off" });
        }
    }

    /// Close the session. Safe to call repeatedly and from any thread.
    pub fn disconnect(&self) {
        let was_live = {
            let mut link = self.link.lock();
            if link.state.is_terminal() {
                false
            } else {
                link.state = SessionState::Closed;
                self.sink.publish(StatusEvent::Disconnected);
                true
            }
        };

        if was_live {
            tracing::info!(session = %self.id, "Session closed");
        } else {
            tracing::debug!(session = %self.id, "Disconnect on finished session");
        }

        self.teardown();
    }

    /// Stop every loop and release sockets and audio
    fn teardown(&self) {
        self.mic.send_replace(false);
        self.cancel.cancel();

        self.datagram.lock().take();

        let writer = Arc::clone(&self.writer);
        self.runtime.spawn(async move {
            writer.lock().await.take();
        });

        // Joining the audio thread can take a moment; keep it off the caller.
        let audio = Arc::clone(&self.audio);
        self.runtime.spawn_blocking(move || audio.close());
    }

    /// Publish an event only while connected.
    ///
    /// Checked under the state lock so nothing is published once
    /// `disconnect` has returned.
    fn report(&self, event: StatusEvent) -> bool {
        let link = self.link.lock();
        if link.state != SessionState::Connected {
            return false;
        }
        self.sink.publish(event);
        true
    }

    /// Resolves once the session has been closed or has failed
    pub async fn finished(&self) {
        self.cancel.cancelled().await
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.link.lock().state.clone()
    }

    pub fn role(&self) -> Option<Role> {
        self.link.lock().role
    }

    /// Peer's reliable endpoint: supplied by the caller (client) or taken from the accepted connection (host)
    pub fn peer_address(&self) -> Option<SocketAddr> {
        self.link.lock().peer
    }

    pub fn local_reliable_address(&self) -> Option<SocketAddr> {
        self.link.lock().local_reliable
    }

    pub fn local_datagram_address(&self) -> Option<SocketAddr> {
        self.link.lock().local_datagram
    }

    pub fn mic_enabled(&self) -> bool {
        *self.mic.borrow()
    }

    fn is_connected(&self) -> bool {
        self.link.lock().state == SessionState::Connected
    }

    fn cipher_key(&self) -> Option<CipherKey> {
        self.link.lock().key.clone()
    }

    /// Where mic frames go, once the peer is known
    fn datagram_target(&self) -> Option<SocketAddr> {
        self.link
            .lock()
            .peer
            .map(|peer| self.config.datagram_target(peer))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Parse `ip:port`, or a bare IP with `default_port`
fn parse_peer(peer: &str, default_port: u16) -> Result<SocketAddr, SessionError> {
    let peer = peer.trim();
    if let Ok(addr) = peer.parse::<SocketAddr>() {
        return Ok(addr);
    }
    peer.parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, default_port))
        .map_err(|_| SessionError::InvalidPeer(peer.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioFrame, Backend};
    use crate::status::ChannelSink;

    struct NoAudio;

    impl AudioDevice for NoAudio {
        fn backend(&self) -> Backend {
            Backend::Desktop
        }
        fn open(&self) -> bool {
            false
        }
        fn read_frame(&self) -> Option<AudioFrame> {
            None
        }
        fn write_frame(&self, _frame: &AudioFrame) {}
        fn close(&self) {}
    }

    fn idle_session() -> Arc<Session> {
        let (sink, _rx) = ChannelSink::new();
        Session::new(SessionConfig::default(), Arc::new(NoAudio), Arc::new(sink)).unwrap()
    }

    #[test]
    fn test_parse_peer() {
        assert_eq!(parse_peer("10.0.0.2", 5000).unwrap(), "10.0.0.2:5000".parse().unwrap());
        assert_eq!(parse_peer(" 10.0.0.2:6000 ", 5000).unwrap(), "10.0.0.2:6000".parse().unwrap());
        assert_eq!(parse_peer("::1", 5000).unwrap(), "[::1]:5000".parse().unwrap());
        assert!(matches!(parse_peer("not-an-ip", 5000), Err(SessionError::InvalidPeer(_))));
    }

    #[test]
    fn test_new_requires_runtime() {
        let (sink, _rx) = ChannelSink::new();
        let result = Session::new(SessionConfig::default(), Arc::new(NoAudio), Arc::new(sink));
        assert!(matches!(result, Err(SessionError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let session = idle_session();
        assert!(matches!(session.start_host(""), Err(SessionError::EmptyKey)));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.role().is_none());
    }

    #[tokio::test]
    async fn test_send_before_connect() {
        let session = idle_session();
        assert!(matches!(session.send_text("hi").await, Err(SessionError::NotConnected)));
        assert!(matches!(session.send_text("").await, Err(SessionError::EmptyMessage)));
    }

    #[tokio::test]
    async fn test_mic_toggle_is_idempotent() {
        let session = idle_session();
        session.set_mic_enabled(true);
        session.set_mic_enabled(true);
        assert!(session.mic_enabled());
        session.set_mic_enabled(false);
        assert!(!session.mic_enabled());
    }

    #[tokio::test]
    async fn test_disconnect_idle_session() {
        let session = idle_session();
        session.set_mic_enabled(true);
        session.disconnect();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.mic_enabled());

        session.disconnect();
        assert_eq!(session.state(), SessionState::Closed);

        session.set_mic_enabled(true);
        assert!(!session.mic_enabled());
        assert!(matches!(
            session.start_host("key"),
            Err(SessionError::AlreadyStarted(SessionState::Closed))
        ));
    }

    #[tokio::test]
    async fn test_setup_after_disconnect_binds_nothing() {
        let session = idle_session();
        session.disconnect();

        assert!(matches!(session.prepare(Plan::Host), Err(SetupError::Cancelled)));
        assert!(session.datagram.lock().is_none());
        assert!(session.local_datagram_address().is_none());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_late_setup_failure_releases_datagram_socket() {
        let session = idle_session();
        let socket = network::bind_datagram("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = socket.local_addr().unwrap();

        session.disconnect();
        *session.datagram.lock() = Some(Arc::new(socket));
        session.fail(SetupError::Cancelled);

        assert!(session.datagram.lock().is_none());
        assert_eq!(session.state(), SessionState::Closed);
        std::net::UdpSocket::bind(addr).unwrap();
    }
}
