//! Protocol logic running on top of the managers
//!
//! - `handshake`: the one-shot hello exchange
//! - `handler`: the per-peer receive loop
//! - `broadcast`: outbound fan-out with failure reconciliation

pub mod broadcast;
pub mod handler;
pub mod handshake;

pub use broadcast::{BroadcastOutcome, Broadcaster};
pub use handler::{ConnectionHandler, HandlerExit};
