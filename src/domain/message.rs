//! Outbound chat lines and the server's own wording.

use super::SessionId;

/// A single line to deliver to one or more sessions.
///
/// Built per broadcast/unicast call and dropped once delivered. `sender`
/// is `None` for server-originated system messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Originating session, or `None` for system messages.
    pub sender: Option<SessionId>,
    /// Line content without terminator.
    pub text: String,
}

impl OutboundMessage {
    /// A line relayed on behalf of a client.
    #[must_use]
    pub fn from_session(sender: SessionId, text: impl Into<String>) -> Self {
        Self {
            sender: Some(sender),
            text: text.into(),
        }
    }

    /// A server-originated line.
    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            sender: None,
            text: text.into(),
        }
    }

    /// Welcome unicast sent to a freshly admitted session.
    #[must_use]
    pub fn welcome(name: &str, connected: usize) -> Self {
        Self::system(format!(
            "Welcome to this Chat Room, {name}! Users connected: {connected}"
        ))
    }

    /// Join announcement for the other sessions.
    #[must_use]
    pub fn joined(name: &str) -> Self {
        Self::system(format!("SERVER: {name} has entered the chat!"))
    }

    /// Departure announcement for the remaining sessions.
    #[must_use]
    pub fn left(name: &str) -> Self {
        Self::system(format!("SERVER: {name} has left the chat!"))
    }

    /// Returns `true` for server-originated messages.
    #[must_use]
    pub const fn is_system(&self) -> bool {
        self.sender.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn welcome_reports_count() {
        let msg = OutboundMessage::welcome("bob", 2);
        assert!(msg.is_system());
        assert!(msg.text.contains("Users connected: 2"));
        assert!(msg.text.contains("bob"));
    }

    #[test]
    fn announcements_name_the_session() {
        assert_eq!(
            OutboundMessage::joined("alice").text,
            "SERVER: alice has entered the chat!"
        );
        assert_eq!(
            OutboundMessage::left("bob").text,
            "SERVER: bob has left the chat!"
        );
    }

    #[test]
    fn client_lines_keep_sender() {
        let id = SessionId::from_raw(3);
        let msg = OutboundMessage::from_session(id, "hi");
        assert_eq!(msg.sender, Some(id));
        assert!(!msg.is_system());
    }
}
