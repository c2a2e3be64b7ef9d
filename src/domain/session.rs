//! Per-connection session state.
//!
//! A [`Session`] owns both halves of one client transport plus its
//! lifecycle state. The registry and the broadcast engine only ever hold
//! `Arc<Session>` back-references; releasing the transport is the job of
//! the worker driving the session (see [`crate::server::SessionWorker`]).
//!
//! # Lifecycle
//!
//! ```text
//! Connecting ──activate──▶ Active ──begin_closing──▶ Closing ──close──▶ Closed
//!      │                                                                 ▲
//!      └───────────────────────────── close ─────────────────────────────┘
//! ```
//!
//! Every transition is a single atomic compare-and-swap, so racing
//! callers observe exactly one winner.

use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::io::{BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, watch};

use super::SessionId;
use crate::config::RelayConfig;
use crate::error::{RelayError, SessionError};

type BoxedReader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;
type BoxedWriter = BufWriter<Box<dyn AsyncWrite + Send + Unpin>>;

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Accepted, waiting for the display-name line.
    Connecting = 0,
    /// Registered and eligible for delivery.
    Active = 1,
    /// Being removed; departure announcement pending or in flight.
    Closing = 2,
    /// Transport released. Terminal.
    Closed = 3,
}

impl SessionState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Active,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// One connected client.
pub struct Session {
    id: SessionId,
    peer: String,
    connected_at: DateTime<Utc>,
    display_name: OnceLock<String>,
    state: AtomicU8,
    reader: Mutex<Option<BoxedReader>>,
    writer: Mutex<Option<BoxedWriter>>,
    shutdown: watch::Sender<bool>,
    write_timeout: Duration,
    max_line_bytes: usize,
}

impl Session {
    /// Wraps an already established transport split into read and write
    /// halves. The session starts in [`SessionState::Connecting`].
    #[must_use]
    pub fn new<R, W>(reader: R, writer: W, peer: impl Into<String>, config: &RelayConfig) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);
        let (shutdown, _) = watch::channel(false);
        Self {
            id: SessionId::next(),
            peer: peer.into(),
            connected_at: Utc::now(),
            display_name: OnceLock::new(),
            state: AtomicU8::new(SessionState::Connecting as u8),
            reader: Mutex::new(Some(BufReader::new(reader))),
            writer: Mutex::new(Some(BufWriter::new(writer))),
            shutdown,
            write_timeout: config.write_timeout,
            max_line_bytes: config.max_line_bytes,
        }
    }

    /// Wraps an accepted TCP connection.
    #[must_use]
    pub fn from_tcp(stream: TcpStream, config: &RelayConfig) -> Self {
        let peer = stream
            .peer_addr()
            .map_or_else(|_| "unknown".to_string(), |addr| addr.to_string());
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer, peer, config)
    }

    /// Process-unique identifier.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Remote address label, for logs.
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Time the connection was accepted.
    #[must_use]
    pub const fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Display name, or `""` before the handshake completed.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.display_name.get().map_or("", String::as_str)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns `true` while the session may receive messages.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Records the display name and moves `Connecting → Active`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Handshake`] if the name is empty after
    /// trimming, if a name was already recorded, or if the session is no
    /// longer `Connecting`.
    pub fn activate(&self, name: &str) -> Result<(), RelayError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RelayError::Handshake("empty display name".into()));
        }
        if self.display_name.set(name.to_string()).is_err() {
            return Err(RelayError::Handshake("display name already set".into()));
        }
        self.transition(SessionState::Connecting, SessionState::Active)
            .then_some(())
            .ok_or_else(|| RelayError::Handshake("session closed during handshake".into()))
    }

    /// Moves `Active → Closing`.
    ///
    /// Returns `true` only for the one caller that performed the
    /// transition; that caller is responsible for removing the session
    /// from the registry and announcing the departure.
    pub fn begin_closing(&self) -> bool {
        self.transition(SessionState::Active, SessionState::Closing)
    }

    /// Wakes any pending [`Session::read_line`] with
    /// [`SessionError::SessionClosed`] without releasing the transport.
    pub fn request_close(&self) {
        self.shutdown.send_replace(true);
    }

    /// Returns `true` once closure was requested or performed.
    #[must_use]
    pub fn is_close_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Releases the transport. Idempotent: only the first call from any
    /// task does work, later calls return immediately.
    pub async fn close(&self) {
        let previous =
            SessionState::from_u8(self.state.swap(SessionState::Closed as u8, Ordering::AcqRel));
        if previous == SessionState::Closed {
            return;
        }
        self.request_close();

        if let Some(mut writer) = self.writer.lock().await.take() {
            // Best effort: the peer may already be gone.
            let _ = tokio::time::timeout(self.write_timeout, writer.shutdown()).await;
        }
        drop(self.reader.lock().await.take());

        tracing::debug!(session_id = %self.id, peer = %self.peer, "transport released");
    }

    /// Writes one line followed by `\n` and flushes.
    ///
    /// The whole operation, including waiting for a concurrent writer to
    /// finish, is bounded by the configured write timeout.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidMessage`] if `text` contains `\n`.
    /// - [`SessionError::SessionClosed`] if the transport was released.
    /// - [`SessionError::WriteTimeout`] if the peer did not drain in time.
    /// - [`SessionError::Io`] for any transport failure.
    pub async fn send_line(&self, text: &str) -> Result<(), SessionError> {
        if text.contains('\n') {
            return Err(SessionError::InvalidMessage);
        }
        if self.state() == SessionState::Closed {
            return Err(SessionError::SessionClosed);
        }

        let write = async {
            let mut guard = self.writer.lock().await;
            let writer = guard.as_mut().ok_or(SessionError::SessionClosed)?;
            writer.write_all(text.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
            Ok::<(), SessionError>(())
        };

        match tokio::time::timeout(self.write_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::WriteTimeout(self.write_timeout)),
        }
    }

    /// Blocks until one line arrives, the peer closes, or the session is
    /// closed locally. The terminator (`\n` or `\r\n`) is stripped.
    ///
    /// A final unterminated line before end of stream is returned as-is;
    /// the following call reports [`SessionError::EndOfStream`].
    ///
    /// # Errors
    ///
    /// - [`SessionError::EndOfStream`] when the peer closed.
    /// - [`SessionError::SessionClosed`] when closed locally.
    /// - [`SessionError::LineTooLong`] past the configured limit.
    /// - [`SessionError::InvalidUtf8`] for non UTF-8 input.
    /// - [`SessionError::Io`] for any transport failure.
    pub async fn read_line(&self) -> Result<String, SessionError> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            return Err(SessionError::SessionClosed);
        }

        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(SessionError::SessionClosed)?;

        let limit = self.max_line_bytes;
        // Room for the line itself plus a `\r\n` terminator.
        let window = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(2);
        let mut buf = Vec::new();
        let mut limited = (&mut *reader).take(window);

        let read = tokio::select! {
            read = limited.read_until(b'\n', &mut buf) => read,
            _ = shutdown.wait_for(|closed| *closed) => return Err(SessionError::SessionClosed),
        };

        let n = read?;
        if n == 0 {
            return Err(SessionError::EndOfStream);
        }

        let terminated = buf.last() == Some(&b'\n');
        if terminated {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        if buf.len() > limit || (!terminated && u64::try_from(n).ok() == Some(window)) {
            return Err(SessionError::LineTooLong { limit });
        }

        String::from_utf8(buf).map_err(|_| SessionError::InvalidUtf8)
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("display_name", &self.display_name())
            .field("state", &self.state())
            .field("connected_at", &self.connected_at)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::io;
    use std::sync::Arc;

    use super::test_support::{active_pair, session_pair, test_config};
    use super::*;

    #[tokio::test]
    async fn read_line_strips_terminators() {
        let config = test_config();
        let mock = tokio_test::io::Builder::new()
            .read(b"alice\r\n")
            .read(b"hello there\n")
            .build();
        let session = Session::new(mock, tokio::io::sink(), "mock", &config);

        assert_eq!(session.read_line().await.ok().as_deref(), Some("alice"));
        assert_eq!(session.read_line().await.ok().as_deref(), Some("hello there"));
        assert!(matches!(
            session.read_line().await,
            Err(SessionError::EndOfStream)
        ));
    }

    #[tokio::test]
    async fn read_line_returns_unterminated_tail() {
        let config = test_config();
        let mock = tokio_test::io::Builder::new().read(b"bye").build();
        let session = Session::new(mock, tokio::io::sink(), "mock", &config);

        assert_eq!(session.read_line().await.ok().as_deref(), Some("bye"));
        assert!(matches!(
            session.read_line().await,
            Err(SessionError::EndOfStream)
        ));
    }

    #[tokio::test]
    async fn read_line_rejects_invalid_utf8() {
        let config = test_config();
        let mock = tokio_test::io::Builder::new().read(b"\xff\xfe\n").build();
        let session = Session::new(mock, tokio::io::sink(), "mock", &config);

        assert!(matches!(
            session.read_line().await,
            Err(SessionError::InvalidUtf8)
        ));
    }

    #[tokio::test]
    async fn read_line_surfaces_io_errors() {
        let config = test_config();
        let mock = tokio_test::io::Builder::new()
            .read_error(io::Error::from(io::ErrorKind::ConnectionReset))
            .build();
        let session = Session::new(mock, tokio::io::sink(), "mock", &config);

        let Err(SessionError::Io(err)) = session.read_line().await else {
            panic!("expected io error");
        };
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[tokio::test]
    async fn read_line_enforces_limit() {
        let mut config = test_config();
        config.max_line_bytes = 4;
        let (session, mut client) = session_pair(&config);

        client.send("abcd").await;
        assert_eq!(session.read_line().await.ok().as_deref(), Some("abcd"));

        client.send("abcdefghij").await;
        assert!(matches!(
            session.read_line().await,
            Err(SessionError::LineTooLong { limit: 4 })
        ));
    }

    #[tokio::test]
    async fn send_line_appends_newline() {
        let config = test_config();
        let (session, mut client) = active_pair(&config, "alice");

        assert!(session.send_line("hello").await.is_ok());
        assert_eq!(client.recv().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn send_line_rejects_embedded_newline() {
        let config = test_config();
        let (session, _client) = active_pair(&config, "alice");

        assert!(matches!(
            session.send_line("two\nlines").await,
            Err(SessionError::InvalidMessage)
        ));
    }

    #[tokio::test]
    async fn send_line_fails_when_peer_is_gone() {
        let config = test_config();
        let (session, client) = active_pair(&config, "alice");
        drop(client);

        let result = session.send_line("anyone?").await;
        assert!(result.is_err());
        assert!(result.err().is_some_and(|e| e.is_disconnect()));
    }

    #[tokio::test]
    async fn send_line_times_out_on_stalled_peer() {
        let config = test_config();
        // Tiny pipe that nobody drains.
        let (_client, server) = tokio::io::duplex(8);
        let (server_read, server_write) = tokio::io::split(server);
        let session = Session::new(server_read, server_write, "stalled", &config);

        let result = session.send_line(&"x".repeat(64)).await;
        assert!(matches!(result, Err(SessionError::WriteTimeout(_))));
    }

    #[test]
    fn state_machine_is_one_directional() {
        let config = test_config();
        let session = Session::new(tokio::io::empty(), tokio::io::sink(), "t", &config);
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(!session.begin_closing());

        assert!(session.activate("  carol ").is_ok());
        assert_eq!(session.display_name(), "carol");
        assert!(session.is_active());
        assert!(session.activate("again").is_err());

        assert!(session.begin_closing());
        assert!(!session.begin_closing());
        assert_eq!(session.state(), SessionState::Closing);
    }

    #[test]
    fn activate_rejects_blank_name() {
        let config = test_config();
        let session = Session::new(tokio::io::empty(), tokio::io::sink(), "t", &config);
        assert!(matches!(
            session.activate("   "),
            Err(RelayError::Handshake(_))
        ));
        assert_eq!(session.state(), SessionState::Connecting);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_wakes_reader() {
        let config = test_config();
        let (session, mut client) = active_pair(&config, "alice");

        let reader = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.read_line().await })
        };
        tokio::task::yield_now().await;

        session.close().await;
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);

        let Ok(result) = reader.await else {
            panic!("reader task panicked");
        };
        assert!(matches!(result, Err(SessionError::SessionClosed)));

        // The client sees EOF after the writer shut down.
        assert_eq!(client.recv().await, None);
        assert!(matches!(
            session.send_line("late").await,
            Err(SessionError::SessionClosed)
        ));
        assert!(!session.begin_closing());
    }

    #[tokio::test]
    async fn request_close_interrupts_read_without_releasing() {
        let config = test_config();
        let (session, mut client) = active_pair(&config, "alice");

        session.request_close();
        assert!(session.is_close_requested());
        assert!(matches!(
            session.read_line().await,
            Err(SessionError::SessionClosed)
        ));

        // Writer still usable until the owner closes.
        assert!(session.send_line("still here").await.is_ok());
        assert_eq!(client.recv().await.as_deref(), Some("still here"));
    }
}
