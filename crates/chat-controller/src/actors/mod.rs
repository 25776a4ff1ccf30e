//! Actor model implementation.
//!
//! The chat controller uses an actor hierarchy:
//!
//! ```text
//! ChatControllerActor (singleton per instance)
//! ├── supervises N RoomActors
//! │   └── RoomActor (one per active room)
//! │       └── owns the room's subscriber set and fanout order
//! └── CallActor (singleton call signaling coordinator)
//!
//! ConnectionActor (one per WebSocket) is spawned by the transport layer
//! and cancelled through a child of the controller's token.
//! ```
//!
//! Actors communicate only through messages; state is never shared.
//! Cancellation propagates parent to child via `CancellationToken`.

pub mod call;
pub mod connection;
pub mod controller;
pub mod messages;
pub mod metrics;
pub mod room;

pub use call::{CallActor, CallHandle, CallState};
pub use connection::{ConnectionActor, ConnectionHandle};
pub use controller::{ChatControllerActor, ControllerHandle};
pub use messages::{CallMessage, ConnectionMessage, ControllerMessage, ControllerStats, RoomMessage};
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor};
pub use room::{RoomActor, RoomHandle};
