//! Mute registry - per-user, per-room delivery suppression.
//!
//! A mute is a delivery-time filter, not a membership change: a muted user
//! stays subscribed, history still accumulates, and unmuting resumes live
//! delivery immediately. Mutes are symmetric for the sender's own devices:
//! a user who muted a room does not receive echoes of their own messages
//! there either.
//!
//! State is in-memory only and applies per instance.

use common::types::{RoomId, UserId};
use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// Registry of (user, room) mute pairs.
#[derive(Debug, Default)]
pub struct MuteRegistry {
    muted: RwLock<HashSet<(UserId, RoomId)>>,
}

impl MuteRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mute a room for a user. Idempotent.
    pub fn mute(&self, user_id: UserId, room_id: RoomId) {
        let mut muted = self.muted.write().unwrap_or_else(PoisonError::into_inner);
        if muted.insert((user_id, room_id)) {
            debug!(
                target: "chat.mute",
                user_id = %user_id,
                room_id = %room_id,
                "Room muted"
            );
        }
    }

    /// Unmute a room for a user. Idempotent.
    pub fn unmute(&self, user_id: UserId, room_id: RoomId) {
        let mut muted = self.muted.write().unwrap_or_else(PoisonError::into_inner);
        if muted.remove(&(user_id, room_id)) {
            debug!(
                target: "chat.mute",
                user_id = %user_id,
                room_id = %room_id,
                "Room unmuted"
            );
        }
    }

    /// Whether delivery to this user for this room is suppressed.
    #[must_use]
    pub fn is_muted(&self, user_id: UserId, room_id: RoomId) -> bool {
        let muted = self.muted.read().unwrap_or_else(PoisonError::into_inner);
        muted.contains(&(user_id, room_id))
    }

    /// Number of active mute pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        let muted = self.muted.read().unwrap_or_else(PoisonError::into_inner);
        muted.len()
    }

    /// Whether no mutes are active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
