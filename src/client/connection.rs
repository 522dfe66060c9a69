//! Socket client for the room store

use crate::protocol::{
    deserialize, ClientMessage, Outcome, Request, ServerMessage, PROTOCOL_VERSION,
};
use crate::server::connection::{read_message, writer_task};
use crate::store::{Room, RoomBackend, RoomPatch, RoomSummary, StoreError, Subscription};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::unix::OwnedReadHalf;
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Outcome>>>>;
/// Subscriber senders per room; one connection may watch a room more than once
type Feeds = Arc<Mutex<HashMap<String, Vec<(Uuid, mpsc::Sender<Room>)>>>>;

/// Connection to a running `lobby-server`
pub struct RoomClient {
    session_id: Uuid,
    outgoing: mpsc::Sender<ClientMessage>,
    pending: Pending,
    feeds: Feeds,
    next_request_id: AtomicU64,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
}

impl RoomClient {
    /// Connect and complete the handshake within `timeout`
    pub async fn connect(
        socket_path: &Path,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        tokio::time::timeout(timeout, Self::connect_inner(socket_path, api_key))
            .await
            .map_err(|_| anyhow!("Timed out connecting to {}", socket_path.display()))?
    }

    async fn connect_inner(socket_path: &Path, api_key: Option<String>) -> Result<Self> {
        let stream = UnixStream::connect(socket_path)
            .await
            .with_context(|| format!("Failed to connect to {}", socket_path.display()))?;
        let (mut reader, writer) = stream.into_split();

        let session_id = match read_message(&mut reader).await? {
            Some(bytes) => match deserialize::<ServerMessage>(&bytes)? {
                ServerMessage::Welcome {
                    session_id,
                    protocol_version,
                } => {
                    crate::protocol::check_version_compatibility(
                        PROTOCOL_VERSION,
                        protocol_version,
                    )?;
                    session_id
                }
                other => bail!("Expected Welcome, got {:?}", other),
            },
            None => bail!("Server closed the connection during handshake"),
        };

        let (outgoing, rx) = mpsc::channel::<ClientMessage>(64);
        let pending: Pending = Arc::default();
        let feeds: Feeds = Arc::default();

        let writer_handle = tokio::spawn(writer_task(writer, rx));
        let reader_handle = tokio::spawn(reader_task(
            reader,
            Arc::clone(&pending),
            Arc::clone(&feeds),
        ));

        let client = Self {
            session_id,
            outgoing,
            pending,
            feeds,
            next_request_id: AtomicU64::new(1),
            reader_handle,
            writer_handle,
        };

        client
            .request(Request::Hello {
                protocol_version: PROTOCOL_VERSION,
                api_key,
            })
            .await?
            .into_ack()
            .context("Handshake rejected")?;

        tracing::info!("Connected to session {}", session_id);
        Ok(client)
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Provision an empty room (needs the service key)
    pub async fn create_room(&self, room_id: &str) -> Result<Room, StoreError> {
        self.request(Request::CreateRoom {
            room_id: room_id.to_string(),
        })
        .await?
        .into_room()
    }

    pub async fn list_rooms(&self) -> Result<Vec<RoomSummary>, StoreError> {
        match self.request(Request::ListRooms).await? {
            Outcome::Rooms(rooms) => Ok(rooms),
            other => Err(other.into_error()),
        }
    }

    /// Send one request and wait for its reply
    async fn request(&self, request: Request) -> Result<Outcome, StoreError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending)?.insert(request_id, tx);

        if self
            .outgoing
            .send(ClientMessage {
                request_id,
                request,
            })
            .await
            .is_err()
        {
            lock(&self.pending)?.remove(&request_id);
            return Err(closed());
        }

        rx.await.map_err(|_| closed())
    }
}

impl Drop for RoomClient {
    fn drop(&mut self) {
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}

#[async_trait]
impl RoomBackend for RoomClient {
    async fn get_room(&self, room_id: &str) -> Result<Room, StoreError> {
        self.request(Request::GetRoom {
            room_id: room_id.to_string(),
        })
        .await?
        .into_room()
    }

    async fn update_room(
        &self,
        room_id: &str,
        patch: RoomPatch,
        expected_members: Option<Vec<String>>,
    ) -> Result<Room, StoreError> {
        self.request(Request::UpdateRoom {
            room_id: room_id.to_string(),
            patch,
            expected_members,
        })
        .await?
        .into_room()
    }

    async fn remove_member(&self, room_id: &str, username: &str) -> Result<Room, StoreError> {
        self.request(Request::RemoveMember {
            room_id: room_id.to_string(),
            username: username.to_string(),
        })
        .await?
        .into_room()
    }

    async fn start_game(&self, room_id: &str, username: &str) -> Result<Room, StoreError> {
        self.request(Request::StartGame {
            room_id: room_id.to_string(),
            username: username.to_string(),
        })
        .await?
        .into_room()
    }

    async fn subscribe(&self, room_id: &str) -> Result<Subscription, StoreError> {
        let (tx, rx) = mpsc::channel(crate::store::FEED_CAPACITY);
        let subscription = Subscription::new(room_id, rx);
        lock(&self.feeds)?
            .entry(room_id.to_string())
            .or_default()
            .push((subscription.id(), tx));

        let acked = self
            .request(Request::Subscribe {
                room_id: room_id.to_string(),
            })
            .await
            .and_then(Outcome::into_ack);

        if let Err(e) = acked {
            remove_feed(&self.feeds, room_id, subscription.id())?;
            return Err(e);
        }
        Ok(subscription)
    }

    async fn unsubscribe(&self, subscription: Subscription) -> Result<(), StoreError> {
        let room_id = subscription.room_id().to_string();
        let remaining = remove_feed(&self.feeds, &room_id, subscription.id())?;
        drop(subscription);

        // The server tracks rooms per connection, not per subscription
        if remaining > 0 {
            return Ok(());
        }
        self.request(Request::Unsubscribe { room_id })
            .await?
            .into_ack()
    }
}

/// Forget one subscriber; returns how many are left for the room
fn remove_feed(feeds: &Feeds, room_id: &str, id: Uuid) -> Result<usize, StoreError> {
    let mut feeds = lock(feeds)?;
    let remaining = match feeds.get_mut(room_id) {
        Some(senders) => {
            senders.retain(|(sub, _)| *sub != id);
            senders.len()
        }
        None => 0,
    };
    if remaining == 0 {
        feeds.remove(room_id);
    }
    Ok(remaining)
}

/// Dispatch replies to waiting requests and pushes to subscriptions
async fn reader_task(mut reader: OwnedReadHalf, pending: Pending, feeds: Feeds) {
    loop {
        let bytes = match read_message(&mut reader).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => break,
            Err(e) => {
                tracing::error!("Connection error: {}", e);
                break;
            }
        };

        match deserialize::<ServerMessage>(&bytes) {
            Ok(ServerMessage::Reply {
                request_id,
                outcome,
            }) => {
                let waiter = pending.lock().ok().and_then(|mut p| p.remove(&request_id));
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(outcome);
                    }
                    None => tracing::warn!("Reply for unknown request {}", request_id),
                }
            }
            Ok(ServerMessage::Changed { room, timestamp }) => {
                tracing::debug!("Room {} changed at {}", room.room_id, timestamp);
                // Dropped subscriptions are pruned here
                let senders: Vec<_> = match feeds.lock() {
                    Ok(mut feeds) => match feeds.get_mut(&room.room_id) {
                        Some(senders) => {
                            senders.retain(|(_, tx)| !tx.is_closed());
                            senders.iter().map(|(_, tx)| tx.clone()).collect()
                        }
                        None => Vec::new(),
                    },
                    Err(_) => Vec::new(),
                };
                for feed in senders {
                    if feed.send(room.clone()).await.is_err() {
                        tracing::debug!("Subscriber went away");
                    }
                }
            }
            Ok(ServerMessage::Error { message }) => {
                tracing::error!("Server error: {}", message);
            }
            Ok(ServerMessage::Welcome { .. }) => {}
            Err(e) => {
                tracing::error!("Failed to deserialize: {}", e);
            }
        }
    }

    // Wake anything still waiting; their senders drop here
    if let Ok(mut pending) = pending.lock() {
        pending.clear();
    }
    if let Ok(mut feeds) = feeds.lock() {
        feeds.clear();
    }
    tracing::debug!("Reader task finished");
}

fn lock<T>(m: &Mutex<T>) -> Result<std::sync::MutexGuard<'_, T>, StoreError> {
    m.lock()
        .map_err(|_| StoreError::Transport("client state poisoned".to_string()))
}

fn closed() -> StoreError {
    StoreError::Transport("connection to server closed".to_string())
}
