//! Shared, lock-guarded handle to a [`RoomStore`]

use super::{Room, RoomBackend, RoomPatch, RoomStore, RoomSummary, StoreError, Subscription};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};

/// Cloneable handle the server and in-process callers share
#[derive(Clone, Default)]
pub struct LocalStore {
    inner: Arc<Mutex<RoomStore>>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_room(&self, room_id: &str) -> Result<Room, StoreError> {
        self.inner.lock().await.create_room(room_id)
    }

    pub async fn list_rooms(&self) -> Vec<RoomSummary> {
        self.inner.lock().await.list_rooms()
    }

    /// Every accepted write, across all rooms
    pub async fn feed(&self) -> broadcast::Receiver<Room> {
        self.inner.lock().await.feed()
    }

    /// Live change-feed receivers, server routing included
    pub async fn watcher_count(&self) -> usize {
        self.inner.lock().await.watcher_count()
    }
}

#[async_trait]
impl RoomBackend for LocalStore {
    async fn get_room(&self, room_id: &str) -> Result<Room, StoreError> {
        self.inner.lock().await.get_room(room_id)
    }

    async fn update_room(
        &self,
        room_id: &str,
        patch: RoomPatch,
        expected_members: Option<Vec<String>>,
    ) -> Result<Room, StoreError> {
        self.inner
            .lock()
            .await
            .update_room(room_id, patch, expected_members.as_deref())
    }

    async fn remove_member(&self, room_id: &str, username: &str) -> Result<Room, StoreError> {
        self.inner.lock().await.remove_member(room_id, username)
    }

    async fn start_game(&self, room_id: &str, username: &str) -> Result<Room, StoreError> {
        self.inner.lock().await.start_game(room_id, username)
    }

    async fn subscribe(&self, room_id: &str) -> Result<Subscription, StoreError> {
        let mut feed = {
            let store = self.inner.lock().await;
            store.get_room(room_id)?;
            store.feed()
        };

        let (tx, rx) = mpsc::channel(super::FEED_CAPACITY);
        let watched = room_id.to_string();
        let handle = tokio::spawn(async move {
            loop {
                match feed.recv().await {
                    Ok(room) if room.room_id == watched => {
                        if tx.send(room).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Feed for {} skipped {} rows", watched, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription::new(room_id, rx).with_forwarder(handle))
    }

    async fn unsubscribe(&self, subscription: Subscription) -> Result<(), StoreError> {
        tracing::debug!("Unsubscribed {} from {}", subscription.id(), subscription.room_id());
        drop(subscription);
        Ok(())
    }
}
