//! Room view state - membership reconciliation, host gating, live updates

use crate::store::{Room, RoomBackend, RoomPatch, StoreError};

/// Make sure `username` is in the room exactly once.
///
/// Reads the row and appends with a compare-and-swap on the list it read. A
/// lost race hands back the current row, which becomes the next read, up to
/// `attempts` writes. Returns `None` when the user was already a member.
pub async fn join_room<B>(
    backend: &B,
    room_id: &str,
    username: &str,
    attempts: u32,
) -> Result<Option<Room>, StoreError>
where
    B: RoomBackend + ?Sized,
{
    let mut current = backend.get_room(room_id).await?;

    for attempt in 1..=attempts.max(1) {
        if current.is_member(username) {
            return Ok(None);
        }

        let mut next = current.members.clone();
        next.push(username.to_string());

        match backend
            .update_room(room_id, RoomPatch::members(next), Some(current.members))
            .await
        {
            Ok(room) => return Ok(Some(room)),
            Err(StoreError::Conflict { current: latest }) => {
                tracing::debug!("Join of {} lost race {} on {}", username, attempt, room_id);
                current = latest;
            }
            Err(e) => return Err(e),
        }
    }

    if current.is_member(username) {
        return Ok(None);
    }
    Err(StoreError::Conflict { current })
}

/// Local picture of one room, as seen by `identity`
#[derive(Debug, Clone)]
pub struct RoomView {
    room_id: String,
    identity: String,
    room: Option<Room>,
    error: Option<String>,
    loading: bool,
    starting: bool,
    leaving: bool,
}

impl RoomView {
    pub fn new(room_id: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            identity: identity.into(),
            room: None,
            error: None,
            loading: true,
            starting: false,
            leaving: false,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn room(&self) -> Option<&Room> {
        self.room.as_ref()
    }

    pub fn members(&self) -> &[String] {
        self.room.as_ref().map(|r| r.members.as_slice()).unwrap_or(&[])
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_starting(&self) -> bool {
        self.starting
    }

    pub fn is_leaving(&self) -> bool {
        self.leaving
    }

    pub fn started(&self) -> bool {
        self.room.as_ref().is_some_and(|r| r.started)
    }

    pub fn is_host(&self) -> bool {
        self.room.as_ref().is_some_and(|r| r.is_host(&self.identity))
    }

    /// Start control enabled: host, more than one member, not started, idle
    pub fn can_start(&self) -> bool {
        !self.starting && self.room.as_ref().is_some_and(|r| r.can_start(&self.identity))
    }

    /// First read of the row. Failures surface as the raw message.
    pub async fn load<B>(&mut self, backend: &B)
    where
        B: RoomBackend + ?Sized,
    {
        self.loading = true;
        self.error = None;
        match backend.get_room(&self.room_id).await {
            Ok(room) => self.room = Some(room),
            Err(e) => self.error = Some(e.to_string()),
        }
        self.loading = false;
    }

    /// Add ourselves to the room. Failures are logged and otherwise ignored;
    /// the next push or reload corrects the view.
    pub async fn join<B>(&mut self, backend: &B, attempts: u32)
    where
        B: RoomBackend + ?Sized,
    {
        if self.identity.is_empty() {
            return;
        }
        match join_room(backend, &self.room_id, &self.identity, attempts).await {
            Ok(Some(room)) => {
                self.apply_change(room);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Join of {} failed: {}", self.room_id, e),
        }
    }

    /// Replace local state with a pushed row. Rows for other rooms are ignored.
    pub fn apply_change(&mut self, room: Room) -> bool {
        if room.room_id != self.room_id {
            return false;
        }
        self.room = Some(room);
        self.error = None;
        self.loading = false;
        true
    }

    /// Host-only start; no-op unless [`Self::can_start`]
    pub async fn start<B>(&mut self, backend: &B)
    where
        B: RoomBackend + ?Sized,
    {
        if !self.can_start() {
            return;
        }
        self.starting = true;
        match backend.start_game(&self.room_id, &self.identity).await {
            Ok(room) => {
                self.apply_change(room);
            }
            Err(e) => tracing::warn!("Start of {} failed: {}", self.room_id, e),
        }
        self.starting = false;
    }

    /// Best-effort leave; the caller navigates away whatever happens
    pub async fn leave<B>(&mut self, backend: &B)
    where
        B: RoomBackend + ?Sized,
    {
        self.leaving = true;
        if self.identity.is_empty() {
            return;
        }
        if let Err(e) = backend.remove_member(&self.room_id, &self.identity).await {
            tracing::warn!("Leave of {} failed: {}", self.room_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalStore;

    async fn store_with_room(room_id: &str) -> LocalStore {
        let store = LocalStore::new();
        store.create_room(room_id).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_join_appends_once() {
        let store = store_with_room("R1").await;

        let first = join_room(&store, "R1", "alice", 3).await.unwrap();
        assert_eq!(first.unwrap().members, vec!["alice"]);

        let again = join_room(&store, "R1", "alice", 3).await.unwrap();
        assert!(again.is_none());
        assert_eq!(store.get_room("R1").await.unwrap().members, vec!["alice"]);
    }

    #[tokio::test]
    async fn test_join_missing_room_is_not_found() {
        let store = LocalStore::new();
        assert!(matches!(
            join_room(&store, "R2", "alice", 3).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_view_join_failure_is_swallowed() {
        let store = LocalStore::new();
        let mut view = RoomView::new("R2", "alice");
        view.load(&store).await;
        view.join(&store, 3).await;

        assert!(view.room().is_none());
        assert_eq!(view.error(), Some("Room 'R2' not found"));
    }

    #[tokio::test]
    async fn test_start_gating_follows_host_and_headcount() {
        let store = store_with_room("R1").await;
        let mut alice = RoomView::new("R1", "alice");
        let mut bob = RoomView::new("R1", "bob");

        alice.load(&store).await;
        alice.join(&store, 3).await;
        assert!(alice.is_host());
        assert!(!alice.can_start(), "a lone host cannot start");

        bob.load(&store).await;
        bob.join(&store, 3).await;
        alice.apply_change(store.get_room("R1").await.unwrap());

        assert!(alice.can_start());
        assert!(!bob.can_start());
        assert!(!bob.is_host());
    }

    #[tokio::test]
    async fn test_non_host_start_does_nothing() {
        let store = store_with_room("R1").await;
        join_room(&store, "R1", "alice", 3).await.unwrap();
        join_room(&store, "R1", "bob", 3).await.unwrap();

        let mut bob = RoomView::new("R1", "bob");
        bob.load(&store).await;
        bob.start(&store).await;

        assert!(!store.get_room("R1").await.unwrap().started);
    }

    #[tokio::test]
    async fn test_apply_change_ignores_other_rooms() {
        let mut view = RoomView::new("R1", "alice");
        assert!(!view.apply_change(Room::new("R9")));
        assert!(view.room().is_none());
        assert!(view.apply_change(Room::new("R1")));
    }

    #[tokio::test]
    async fn test_leave_on_missing_room_still_marks_leaving() {
        let store = LocalStore::new();
        let mut view = RoomView::new("gone", "alice");
        view.leave(&store).await;
        assert!(view.is_leaving());
    }
}
