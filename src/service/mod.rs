//! Service layer: message delivery.
//!
//! [`BroadcastEngine`] fans lines out over a registry snapshot and turns
//! write failures into evictions.

pub mod broadcast;

pub use broadcast::{BroadcastEngine, BroadcastReport};
