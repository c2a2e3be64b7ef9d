//! Fan-out of chat lines to registered sessions.
//!
//! [`BroadcastEngine`] never iterates the live registry: every delivery
//! round works on a [`SessionRegistry::snapshot`] and writes to each
//! recipient concurrently, each write bounded by the session's write
//! timeout. A failed write is treated as that recipient disconnecting:
//! it is evicted and its departure is announced in a follow-up round.
//! Nothing is ever reported back to the sender.

use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::future::join_all;

use crate::domain::{OutboundMessage, Session, SessionId, SessionRegistry};
use crate::error::SessionError;

/// Outcome of one [`BroadcastEngine::broadcast`] call, including any
/// follow-up departure announcements it triggered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Number of successful line deliveries.
    pub delivered: usize,
    /// Sessions evicted because a write to them failed.
    pub evicted: Vec<SessionId>,
}

/// Delivers messages to the sessions in a [`SessionRegistry`].
#[derive(Debug, Clone)]
pub struct BroadcastEngine {
    registry: Arc<SessionRegistry>,
}

impl BroadcastEngine {
    /// Creates an engine over the given registry.
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Returns the registry this engine delivers to.
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Sends `message` to every active session except `exclude`
    /// (`None` reaches everyone).
    ///
    /// Never fails: recipients whose write fails are evicted, and their
    /// departure is announced to whoever is left before this returns.
    pub async fn broadcast(
        &self,
        message: OutboundMessage,
        exclude: Option<SessionId>,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut rounds = VecDeque::from([(message, exclude)]);

        while let Some((message, exclude)) = rounds.pop_front() {
            if message.text.contains('\n') {
                tracing::warn!(sender = ?message.sender, "dropping multi-line message");
                continue;
            }

            let recipients: Vec<_> = self
                .registry
                .snapshot()
                .await
                .into_iter()
                .filter(|session| Some(session.id()) != exclude)
                .collect();

            let text = message.text.as_str();
            let results = join_all(
                recipients
                    .iter()
                    .map(|session| async move { (session, session.send_line(text).await) }),
            )
            .await;

            for (session, result) in results {
                match result {
                    Ok(()) => report.delivered += 1,
                    Err(err) => {
                        if let Some(departure) = self.evict(session, &err).await {
                            report.evicted.push(session.id());
                            rounds.push_back((departure, Some(session.id())));
                        }
                    }
                }
            }
        }

        report
    }

    /// Sends `message` to exactly one session.
    ///
    /// Returns `false` if the target is no longer registered and active,
    /// or if the write failed (in which case the target is evicted and
    /// its departure announced).
    pub async fn unicast(&self, message: OutboundMessage, target: SessionId) -> bool {
        let Some(session) = self.registry.get(target).await else {
            tracing::trace!(session_id = %target, "unicast target already gone");
            return false;
        };
        if !session.is_active() {
            return false;
        }

        match session.send_line(&message.text).await {
            Ok(()) => true,
            Err(err) => {
                if let Some(departure) = self.evict(&session, &err).await {
                    self.broadcast(departure, Some(target)).await;
                }
                false
            }
        }
    }

    /// Welcomes a freshly admitted session with the current member count.
    pub async fn welcome(&self, session: &Session) -> bool {
        let connected = self.registry.size().await;
        self.unicast(
            OutboundMessage::welcome(session.display_name(), connected),
            session.id(),
        )
        .await
    }

    /// Tells everyone else that `session` joined.
    pub async fn announce_join(&self, session: &Session) -> BroadcastReport {
        self.broadcast(
            OutboundMessage::joined(session.display_name()),
            Some(session.id()),
        )
        .await
    }

    /// Tells everyone else that `session` left.
    pub async fn announce_leave(&self, session: &Session) -> BroadcastReport {
        self.broadcast(
            OutboundMessage::left(session.display_name()),
            Some(session.id()),
        )
        .await
    }

    /// Handles a failed write to `session`.
    ///
    /// If this call wins the `Active → Closing` transition the session is
    /// unregistered, its worker is woken to release the transport, and
    /// the departure line to announce is returned.
    async fn evict(&self, session: &Session, err: &SessionError) -> Option<OutboundMessage> {
        if !session.begin_closing() {
            return None;
        }
        tracing::warn!(
            session_id = %session.id(),
            peer = %session.peer(),
            name = session.display_name(),
            error = %err,
            "write failed, evicting session"
        );
        self.registry.remove(session.id()).await;
        session.request_close();
        Some(OutboundMessage::left(session.display_name()))
    }
}
