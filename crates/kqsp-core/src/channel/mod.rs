//! Channel Module
//!
//! Event plumbing between the mesh and the presentation layer:
//! - `events`: the `MeshEvent` type
//! - `sink`: the bounded channel carrying those events

pub mod events;
pub mod sink;

pub use events::MeshEvent;
pub use sink::{create_event_channel, EventReceiver, EventSender, EventSink, EventStream};

pub use crate::config::ChannelConfig;
