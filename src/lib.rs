//! # line-relay
//!
//! A line-oriented multi-client chat relay over TCP.
//!
//! Clients connect, send their display name as the first line, and from
//! then on every line they send is relayed to all other connected
//! clients. The server announces joins and departures and evicts any
//! client whose socket stops accepting writes.
//!
//! ## Architecture
//!
//! ```text
//! TCP clients
//!     │
//!     ├── Listener (server/)          one accept loop
//!     ├── SessionWorker (server/)     one task per connection
//!     │
//!     ├── BroadcastEngine (service/)  snapshot fan-out, eviction
//!     │
//!     ├── SessionRegistry (domain/)   id → Session, lock scoped to mutation
//!     └── Session (domain/)           transport halves + lifecycle state
//! ```
//!
//! ## Wire protocol
//!
//! UTF-8 text, one message per `\n`-terminated line. The first line a
//! client sends is its display name; a line equal to the configured exit
//! command (default `/exit`) ends the session, as does closing the socket.

pub mod config;
pub mod domain;
pub mod error;
pub mod server;
pub mod service;
