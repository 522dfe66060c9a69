//! Landing flow - decides whether a username may enter a room

use super::identity::IdentityStore;
use crate::store::{Room, RoomBackend, StoreError};
use thiserror::Error;

/// Why entry into a room was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntryError {
    #[error("Enter both a username and a room code")]
    MissingFields,

    #[error("Room not found")]
    RoomNotFound,

    #[error("Game already started")]
    AlreadyStarted,

    #[error("{0}")]
    Store(String),
}

/// Trimmed, non-blank entry fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRequest {
    pub username: String,
    pub room_id: String,
}

/// Both fields must be non-blank once trimmed
pub fn validate_entry(username: &str, room_code: &str) -> Result<EntryRequest, EntryError> {
    let username = username.trim();
    let room_id = room_code.trim();
    if username.is_empty() || room_id.is_empty() {
        return Err(EntryError::MissingFields);
    }
    Ok(EntryRequest {
        username: username.to_string(),
        room_id: room_id.to_string(),
    })
}

/// Started rooms only readmit their members
pub fn check_entry(room: &Room, username: &str) -> Result<(), EntryError> {
    if room.started && !room.is_member(username) {
        return Err(EntryError::AlreadyStarted);
    }
    Ok(())
}

/// Validate, remember the username, look the room up and apply the entry rule.
/// One request per attempt.
pub async fn enter<B>(
    backend: &B,
    identity: &IdentityStore,
    username: &str,
    room_code: &str,
) -> Result<EntryRequest, EntryError>
where
    B: RoomBackend + ?Sized,
{
    let request = validate_entry(username, room_code)?;

    // Remembered even when entry fails, so a retry is prefilled
    if let Err(e) = identity.save(&request.username) {
        tracing::warn!("Could not remember username: {:#}", e);
    }

    let room = backend
        .get_room(&request.room_id)
        .await
        .map_err(|e| match e {
            StoreError::NotFound(_) => EntryError::RoomNotFound,
            other => EntryError::Store(other.to_string()),
        })?;

    check_entry(&room, &request.username)?;

    tracing::info!("{} may enter {}", request.username, request.room_id);
    Ok(request)
}
