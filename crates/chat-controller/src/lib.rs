//! Chat Controller Service Library
//!
//! Core functionality for the Parley chat controller - a stateful
//! WebSocket server responsible for:
//!
//! - Room message fanout with persist-then-deliver semantics
//! - Per-user mute filtering at delivery time
//! - One-to-one call signaling (ring, accept, reject, hangup, timeout)
//! - Keeping the search index converging toward the message store
//!
//! # Architecture
//!
//! The controller uses an actor model hierarchy:
//!
//! ```text
//! ChatControllerActor (singleton per instance)
//! ├── supervises N RoomActors
//! │   └── RoomActor (one per active room)
//! │       └── owns the subscriber set, serializes fanout
//! └── CallActor (singleton signaling coordinator)
//!
//! ConnectionActor (one per WebSocket connection)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Persist before deliver**: a message is durably stored before any
//!   subscriber sees it; a store failure aborts the send entirely
//! - **One actor per room**: room delivery order equals persistence order
//!   because a single task serializes both
//! - **Bounded connection queues**: a slow client is disconnected, never
//!   allowed to stall a room
//! - **Best-effort search indexing**: the synchronizer's persisted cursor
//!   makes backfill resumable and re-indexing idempotent
//!
//! # Modules
//!
//! - [`actors`] - Actor model implementation
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with wire-level error codes
//! - [`registry`] - Live connection registry (multi-device users)
//! - [`mute`] - Per-user, per-room delivery suppression
//! - [`store`] - Durable message store (Postgres)
//! - [`search`] - Search index client and synchronizer
//! - [`transport`] - WebSocket server and wire protocol
//! - [`observability`] - Health endpoints

pub mod actors;
pub mod config;
pub mod errors;
pub mod mute;
pub mod observability;
pub mod registry;
pub mod search;
pub mod store;
pub mod transport;
