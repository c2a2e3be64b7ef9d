//! Per-connection worker.
//!
//! A [`SessionWorker`] drives one [`Session`] through its whole life:
//! read the display name, register and announce, relay lines until the
//! client leaves or fails, then unregister, announce and release the
//! transport. It is the only code that ever calls [`Session::close`].

use std::sync::Arc;

use tracing::Instrument;

use crate::config::RelayConfig;
use crate::domain::{OutboundMessage, Session};
use crate::error::{RelayError, SessionError};
use crate::service::BroadcastEngine;

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The handshake failed; the session was never registered.
    Rejected,
    /// The client sent the disconnect command.
    Exited,
    /// The client closed the connection or the transport failed.
    Disconnected,
    /// A write to the client failed and the broadcast engine evicted it.
    Evicted,
}

/// Runs the lifecycle of one accepted connection.
#[derive(Debug)]
pub struct SessionWorker {
    session: Arc<Session>,
    engine: BroadcastEngine,
    config: Arc<RelayConfig>,
}

impl SessionWorker {
    /// Creates a worker for a freshly accepted, `Connecting` session.
    #[must_use]
    pub fn new(session: Arc<Session>, engine: BroadcastEngine, config: Arc<RelayConfig>) -> Self {
        Self {
            session,
            engine,
            config,
        }
    }

    /// Drives the session to `Closed` and reports how it ended.
    pub async fn run(self) -> SessionOutcome {
        let span = tracing::info_span!(
            "session",
            session_id = %self.session.id(),
            peer = %self.session.peer()
        );
        async move {
            if let Err(err) = self.register().await {
                match err {
                    RelayError::DuplicateId(_) => tracing::error!(error = %err, "admission failed"),
                    _ => tracing::debug!(error = %err, "handshake rejected"),
                }
                self.session.close().await;
                return SessionOutcome::Rejected;
            }

            let outcome = self.relay().await;
            self.depart(outcome).await;
            outcome
        }
        .instrument(span)
        .await
    }

    /// `Connecting → Active`, then admission: registry, welcome, join.
    async fn register(&self) -> Result<(), RelayError> {
        let line = tokio::time::timeout(self.config.handshake_timeout, self.session.read_line())
            .await
            .map_err(|_| RelayError::Handshake("timed out waiting for display name".into()))?
            .map_err(|err| RelayError::Handshake(err.to_string()))?;
        self.session.activate(&line)?;

        self.engine.registry().add(Arc::clone(&self.session)).await?;
        tracing::info!(name = self.session.display_name(), "client joined");

        self.engine.welcome(&self.session).await;
        // The welcome write may already have evicted us.
        if self.session.is_active() {
            self.engine.announce_join(&self.session).await;
        }
        Ok(())
    }

    /// Relays lines until the session stops being readable.
    async fn relay(&self) -> SessionOutcome {
        let id = self.session.id();
        loop {
            let line = match self.session.read_line().await {
                Ok(line) => line,
                Err(SessionError::SessionClosed) => return SessionOutcome::Evicted,
                Err(err) if err.is_disconnect() => {
                    tracing::debug!(error = %err, "client disconnected");
                    return SessionOutcome::Disconnected;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "dropping misbehaving client");
                    return SessionOutcome::Disconnected;
                }
            };

            if line.trim() == self.config.exit_command {
                return SessionOutcome::Exited;
            }

            tracing::trace!(bytes = line.len(), "relaying line");
            let report = self
                .engine
                .broadcast(OutboundMessage::from_session(id, line), Some(id))
                .await;
            if !report.evicted.is_empty() {
                tracing::debug!(evicted = report.evicted.len(), "peers evicted during relay");
            }
        }
    }

    /// `Active → Closing → Closed`. Whoever wins `begin_closing` (this
    /// worker, or the engine on a failed write) does the remove and the
    /// announcement, so both happen exactly once.
    async fn depart(&self, outcome: SessionOutcome) {
        if self.session.begin_closing() {
            self.engine.registry().remove(self.session.id()).await;
            self.engine.announce_leave(&self.session).await;
        }
        self.session.close().await;

        let duration = chrono::Utc::now() - self.session.connected_at();
        tracing::info!(
            name = self.session.display_name(),
            ?outcome,
            duration_secs = duration.num_seconds(),
            "client left"
        );
    }
}
