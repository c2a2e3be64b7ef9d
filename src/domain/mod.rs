//! Domain layer: session identity, per-connection state, and the
//! registry of live sessions.
//!
//! Nothing in here spawns tasks; concurrency is driven by the
//! [`crate::server`] layer.

pub mod message;
pub mod registry;
pub mod session;
pub mod session_id;

pub use message::OutboundMessage;
pub use registry::SessionRegistry;
pub use session::{Session, SessionState};
pub use session_id::SessionId;
