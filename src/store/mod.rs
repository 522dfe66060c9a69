//! Room row store - rows keyed by room id, conditional updates, change feed

mod local;
mod manager;

pub use local::LocalStore;
pub use manager::{RoomStore, FEED_CAPACITY};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// One lobby room as persisted by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    /// Opaque lookup key, provisioned out of band
    pub room_id: String,

    /// Joined usernames in join order, no duplicates
    pub members: Vec<String>,

    /// Member allowed to start the game
    pub host: Option<String>,

    /// Set once the host starts the game
    pub started: bool,
}

impl Room {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            members: Vec::new(),
            host: None,
            started: false,
        }
    }

    pub fn is_member(&self, username: &str) -> bool {
        self.members.iter().any(|m| m == username)
    }

    pub fn is_host(&self, username: &str) -> bool {
        !username.is_empty() && self.host.as_deref() == Some(username)
    }

    /// Whether `username` may start the game right now
    pub fn can_start(&self, username: &str) -> bool {
        self.is_host(username) && self.members.len() > 1 && !self.started
    }

    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            room_id: self.room_id.clone(),
            member_count: self.members.len(),
            host: self.host.clone(),
            started: self.started,
        }
    }
}

/// Columns a conditional update may touch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomPatch {
    pub members: Option<Vec<String>>,
    pub started: Option<bool>,
}

impl RoomPatch {
    pub fn members(members: Vec<String>) -> Self {
        Self {
            members: Some(members),
            started: None,
        }
    }
}

/// Short room description for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub room_id: String,
    pub member_count: usize,
    pub host: Option<String>,
    pub started: bool,
}

/// Store-level failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Room '{0}' not found")]
    NotFound(String),

    #[error("Room '{0}' already exists")]
    AlreadyExists(String),

    #[error("Room '{}' was modified concurrently", .current.room_id)]
    Conflict { current: Room },

    #[error("Permission denied: {0}")]
    Denied(String),

    #[error("Invalid write: {0}")]
    Invalid(String),

    #[error("{0}")]
    Transport(String),
}

/// Live row updates for a single room.
///
/// Each subscription is independent: dropping it or handing it back through
/// [`RoomBackend::unsubscribe`] ends only this feed.
pub struct Subscription {
    id: Uuid,
    room_id: String,
    receiver: mpsc::Receiver<Room>,

    /// Task feeding `receiver`, for in-process stores
    forwarder: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(room_id: impl Into<String>, receiver: mpsc::Receiver<Room>) -> Self {
        Self {
            id: Uuid::new_v4(),
            room_id: room_id.into(),
            receiver,
            forwarder: None,
        }
    }

    /// Tie a forwarding task to this subscription; it is aborted on drop
    pub fn with_forwarder(mut self, forwarder: JoinHandle<()>) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Wait for the next post-change row; `None` once the feed is gone
    pub async fn recv(&mut self) -> Option<Room> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

/// Operations the lobby flows need from a row store.
///
/// Implemented by [`LocalStore`] (in process) and by the socket client.
#[async_trait]
pub trait RoomBackend: Send + Sync {
    /// Point read by room id
    async fn get_room(&self, room_id: &str) -> Result<Room, StoreError>;

    /// Apply `patch`, optionally only if `members` still equals `expected_members`.
    /// Returns the row after the write.
    async fn update_room(
        &self,
        room_id: &str,
        patch: RoomPatch,
        expected_members: Option<Vec<String>>,
    ) -> Result<Room, StoreError>;

    /// Drop `username` from the room; resets `started` when nobody is left
    async fn remove_member(&self, room_id: &str, username: &str) -> Result<Room, StoreError>;

    /// Set `started`, only on behalf of the host of a room with more than one member
    async fn start_game(&self, room_id: &str, username: &str) -> Result<Room, StoreError>;

    /// Start receiving post-change rows for one room
    async fn subscribe(&self, room_id: &str) -> Result<Subscription, StoreError>;

    /// End `subscription`; other subscriptions to the same room keep running
    async fn unsubscribe(&self, subscription: Subscription) -> Result<(), StoreError>;
}
