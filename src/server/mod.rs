//! Server layer: the accept loop and the per-connection workers.
//!
//! One tokio task runs the [`Listener`]; each accepted connection gets
//! its own task running a [`SessionWorker`].

pub mod listener;
pub mod worker;

pub use listener::Listener;
pub use worker::{SessionOutcome, SessionWorker};
