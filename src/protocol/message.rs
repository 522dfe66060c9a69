//! Message types for the lobby protocol

use crate::store::{Room, RoomPatch, RoomSummary, StoreError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Echoed back in the matching [`ServerMessage::Reply`]
    pub request_id: u64,
    pub request: Request,
}

/// Requests a client can make of the room store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    /// Handshake with protocol version and optional access key
    Hello {
        protocol_version: u32,
        api_key: Option<String>,
    },

    /// Point read of one room
    GetRoom { room_id: String },

    /// Conditional update; with `expected_members` this is a compare-and-swap
    UpdateRoom {
        room_id: String,
        patch: RoomPatch,
        expected_members: Option<Vec<String>>,
    },

    /// Remove a member, resetting `started` if the room empties
    RemoveMember { room_id: String, username: String },

    /// Host-only start
    StartGame { room_id: String, username: String },

    /// Provision an empty room (service key)
    CreateRoom { room_id: String },

    /// Summaries of all rooms
    ListRooms,

    /// Receive [`ServerMessage::Changed`] for a room
    Subscribe { room_id: String },

    /// Stop receiving changes for a room
    Unsubscribe { room_id: String },
}

impl Request {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Request::Hello { .. } => "Hello",
            Request::GetRoom { .. } => "GetRoom",
            Request::UpdateRoom { .. } => "UpdateRoom",
            Request::RemoveMember { .. } => "RemoveMember",
            Request::StartGame { .. } => "StartGame",
            Request::CreateRoom { .. } => "CreateRoom",
            Request::ListRooms => "ListRooms",
            Request::Subscribe { .. } => "Subscribe",
            Request::Unsubscribe { .. } => "Unsubscribe",
        }
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Sent once when a connection is accepted
    Welcome {
        session_id: Uuid,
        protocol_version: u32,
    },

    /// Answer to one request
    Reply { request_id: u64, outcome: Outcome },

    /// Post-change row for a subscribed room
    Changed { room: Room, timestamp: i64 },

    /// Message that could not be tied to a request
    Error { message: String },
}

/// Result of a request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Outcome {
    Ack,
    Row(Room),
    Rooms(Vec<RoomSummary>),
    NotFound { room_id: String },
    AlreadyExists { room_id: String },
    Conflict { current: Room },
    Denied { reason: String },
    Invalid { reason: String },
    Failed { message: String },
}

impl Outcome {
    /// Expect a row back, mapping every other outcome to a store error
    pub fn into_room(self) -> Result<Room, StoreError> {
        match self {
            Outcome::Row(room) => Ok(room),
            other => Err(other.into_error()),
        }
    }

    /// Expect a bare acknowledgment
    pub fn into_ack(self) -> Result<(), StoreError> {
        match self {
            Outcome::Ack => Ok(()),
            other => Err(other.into_error()),
        }
    }

    /// The store error this outcome stands for
    pub fn into_error(self) -> StoreError {
        match self {
            Outcome::NotFound { room_id } => StoreError::NotFound(room_id),
            Outcome::AlreadyExists { room_id } => StoreError::AlreadyExists(room_id),
            Outcome::Conflict { current } => StoreError::Conflict { current },
            Outcome::Denied { reason } => StoreError::Denied(reason),
            Outcome::Invalid { reason } => StoreError::Invalid(reason),
            Outcome::Failed { message } => StoreError::Transport(message),
            Outcome::Ack | Outcome::Row(_) | Outcome::Rooms(_) => {
                StoreError::Transport("unexpected reply from server".to_string())
            }
        }
    }
}

impl From<StoreError> for Outcome {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(room_id) => Outcome::NotFound { room_id },
            StoreError::AlreadyExists(room_id) => Outcome::AlreadyExists { room_id },
            StoreError::Conflict { current } => Outcome::Conflict { current },
            StoreError::Denied(reason) => Outcome::Denied { reason },
            StoreError::Invalid(reason) => Outcome::Invalid { reason },
            StoreError::Transport(message) => Outcome::Failed { message },
        }
    }
}

impl From<Result<Room, StoreError>> for Outcome {
    fn from(result: Result<Room, StoreError>) -> Self {
        match result {
            Ok(room) => Outcome::Row(room),
            Err(err) => err.into(),
        }
    }
}
