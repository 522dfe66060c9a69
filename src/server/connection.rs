//! Client connection handling and socket framing

use crate::protocol::{
    check_frame_length, deserialize, frame_message, serialize, ClientMessage, Outcome,
    ServerMessage, PROTOCOL_VERSION,
};
use anyhow::Result;
use serde::Serialize;
use std::collections::HashSet;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// What a connection is allowed to do after its handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// No successful `Hello` yet
    Pending,
    /// Room reads and membership writes
    Anon,
    /// Everything, including provisioning rooms
    Service,
}

/// Represents a connected client
pub struct ClientConnection {
    /// Unique client identifier
    id: Uuid,

    /// Channel to send messages to this client
    sender: mpsc::Sender<ServerMessage>,

    /// Dropped along with this entry, which stops the connection handler
    _evict: oneshot::Sender<()>,

    pub access: Access,

    /// Rooms whose changes are pushed to this client
    pub subscriptions: HashSet<String>,
}

impl ClientConnection {
    /// Create a new client connection
    pub fn new(sender: mpsc::Sender<ServerMessage>, evict: oneshot::Sender<()>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            _evict: evict,
            access: Access::Pending,
            subscriptions: HashSet::new(),
        }
    }

    /// Get client ID
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_subscribed(&self, room_id: &str) -> bool {
        self.subscriptions.contains(room_id)
    }

    /// Handle for queueing messages once the server state lock is released
    pub fn sender(&self) -> mpsc::Sender<ServerMessage> {
        self.sender.clone()
    }
}

/// Read a length-prefixed message from a stream
pub async fn read_message<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_bytes = [0u8; 4];

    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_bytes);
    check_frame_length(len)?;

    let mut buffer = vec![0u8; len as usize];
    reader.read_exact(&mut buffer).await?;

    Ok(Some(buffer))
}

/// Write a length-prefixed message to a stream
pub async fn write_message<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let framed = frame_message(payload);
    writer.write_all(&framed).await?;
    writer.flush().await?;
    Ok(())
}

/// Task to write queued messages to the socket. Used by both ends.
pub async fn writer_task<T: Serialize>(mut writer: OwnedWriteHalf, mut receiver: mpsc::Receiver<T>) {
    while let Some(msg) = receiver.recv().await {
        match serialize(&msg) {
            Ok(payload) => {
                if let Err(e) = write_message(&mut writer, &payload).await {
                    tracing::error!("Failed to write message: {}", e);
                    break;
                }
            }
            Err(e) => {
                tracing::error!("Failed to serialize message: {}", e);
            }
        }
    }

    tracing::debug!("Writer task finished");
}

/// Parse a client message from bytes
pub fn parse_client_message(bytes: &[u8]) -> Result<ClientMessage> {
    deserialize(bytes)
}

/// Create a welcome message for a new client
pub fn create_welcome_message(session_id: Uuid) -> ServerMessage {
    ServerMessage::Welcome {
        session_id,
        protocol_version: PROTOCOL_VERSION,
    }
}

/// Create an error message
pub fn create_error_message(message: String) -> ServerMessage {
    ServerMessage::Error { message }
}

/// Wrap an outcome as the reply to `request_id`
pub fn create_reply(request_id: u64, outcome: impl Into<Outcome>) -> ServerMessage {
    ServerMessage::Reply {
        request_id,
        outcome: outcome.into(),
    }
}
