//! TCP acceptor.
//!
//! [`Listener`] binds once and hands every accepted connection to its own
//! [`SessionWorker`] task, returning to `accept` immediately. Only a
//! failure of the listening socket itself ends the loop.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

use super::SessionWorker;
use crate::config::RelayConfig;
use crate::domain::{Session, SessionRegistry};
use crate::error::RelayError;
use crate::service::BroadcastEngine;

/// Accept loop for the relay.
#[derive(Debug)]
pub struct Listener {
    listener: TcpListener,
    engine: BroadcastEngine,
    config: Arc<RelayConfig>,
}

impl Listener {
    /// Binds the configured address.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Bind`] if the address cannot be bound.
    pub async fn bind(
        config: RelayConfig,
        registry: Arc<SessionRegistry>,
    ) -> Result<Self, RelayError> {
        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| RelayError::Bind { addr, source })?;
        Ok(Self {
            listener,
            engine: BroadcastEngine::new(registry),
            config: Arc::new(config),
        })
    }

    /// Address actually bound (resolves port `0`).
    ///
    /// # Errors
    ///
    /// Returns the OS error if the socket address cannot be queried.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections forever.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Accept`] if the listening socket fails.
    pub async fn run(self) -> Result<(), RelayError> {
        self.run_until(std::future::pending()).await
    }

    /// Accepts connections until `shutdown` resolves.
    ///
    /// The listening socket is released on return. Sessions already
    /// running keep going until their clients leave.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Accept`] if the listening socket fails.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), RelayError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        tracing::info!(addr = ?self.listener.local_addr().ok(), "waiting for clients");

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("shutdown requested, no longer accepting");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.spawn_session(stream, addr),
                    Err(err) if is_transient(&err) => {
                        tracing::warn!(error = %err, "failed to accept connection");
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "listener failed");
                        return Err(RelayError::Accept(err));
                    }
                },
            }
        }
    }

    fn spawn_session(&self, stream: TcpStream, addr: SocketAddr) {
        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!(peer = %addr, error = %err, "could not set TCP_NODELAY");
        }
        let session = Arc::new(Session::from_tcp(stream, &self.config));
        tracing::info!(session_id = %session.id(), peer = %addr, "client connected");

        let worker = SessionWorker::new(session, self.engine.clone(), Arc::clone(&self.config));
        tokio::spawn(worker.run());
    }
}

/// Errors that concern a single pending connection, not the socket.
fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}
