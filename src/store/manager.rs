//! Room store - owns every room row and publishes accepted writes

use super::{Room, RoomPatch, RoomSummary, StoreError};
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;
use tokio::sync::broadcast;

/// Rows buffered per change-feed receiver before it lags
pub const FEED_CAPACITY: usize = 256;

static ROOM_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap());

type Result<T> = std::result::Result<T, StoreError>;

/// In-memory row store. Every method is a single atomic step; callers
/// serialize access (the server keeps it behind a lock).
pub struct RoomStore {
    /// All rows by room id
    rooms: BTreeMap<String, Room>,

    /// Post-change rows for every accepted write
    feed: broadcast::Sender<Room>,
}

impl RoomStore {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            rooms: BTreeMap::new(),
            feed,
        }
    }

    /// Receive every accepted write, across all rooms
    pub fn feed(&self) -> broadcast::Receiver<Room> {
        self.feed.subscribe()
    }

    /// Receivers currently attached to the feed
    pub fn watcher_count(&self) -> usize {
        self.feed.receiver_count()
    }

    /// Provision an empty room
    pub fn create_room(&mut self, room_id: &str) -> Result<Room> {
        if !ROOM_ID_RE.is_match(room_id) {
            return Err(StoreError::Invalid(format!(
                "room id '{}' must be 1-64 letters, digits, '-' or '_'",
                room_id
            )));
        }
        if self.rooms.contains_key(room_id) {
            return Err(StoreError::AlreadyExists(room_id.to_string()));
        }

        tracing::info!("Provisioned room {}", room_id);
        Ok(self.commit(Room::new(room_id)))
    }

    pub fn get_room(&self, room_id: &str) -> Result<Room> {
        self.rooms
            .get(room_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(room_id.to_string()))
    }

    pub fn list_rooms(&self) -> Vec<RoomSummary> {
        self.rooms.values().map(Room::summary).collect()
    }

    /// Conditional update. With `expected_members`, the write only lands if
    /// the stored member list is still exactly that list.
    pub fn update_room(
        &mut self,
        room_id: &str,
        patch: RoomPatch,
        expected_members: Option<&[String]>,
    ) -> Result<Room> {
        let current = self.get_room(room_id)?;

        if let Some(expected) = expected_members {
            if current.members != expected {
                tracing::debug!("Update on {} lost a race", room_id);
                return Err(StoreError::Conflict { current });
            }
        }

        let mut next = current.clone();
        if let Some(members) = patch.members {
            validate_members(&members)?;
            next.members = members;
        }
        if let Some(started) = patch.started {
            if started && !current.started {
                return Err(StoreError::Denied(
                    "games are started through the host's start request".to_string(),
                ));
            }
            if !started && current.started && !next.members.is_empty() {
                return Err(StoreError::Denied(
                    "a started game only resets once the room is empty".to_string(),
                ));
            }
            next.started = started;
        }

        Ok(self.commit(next))
    }

    /// Remove a member. Leaving a room you are not in is a no-op.
    pub fn remove_member(&mut self, room_id: &str, username: &str) -> Result<Room> {
        let current = self.get_room(room_id)?;
        if !current.is_member(username) {
            return Ok(current);
        }

        let mut next = current;
        next.members.retain(|m| m != username);
        Ok(self.commit(next))
    }

    /// Start the game on behalf of `username`
    pub fn start_game(&mut self, room_id: &str, username: &str) -> Result<Room> {
        let current = self.get_room(room_id)?;
        if !current.is_host(username) {
            return Err(StoreError::Denied(format!(
                "only the host can start room '{}'",
                room_id
            )));
        }
        if current.started {
            return Ok(current);
        }
        if current.members.len() < 2 {
            return Err(StoreError::Denied(
                "at least two players are needed to start".to_string(),
            ));
        }

        let mut next = current;
        next.started = true;
        tracing::info!("Room {} started by {}", room_id, username);
        Ok(self.commit(next))
    }

    /// Restore row invariants, store the row and publish it
    fn commit(&mut self, mut room: Room) -> Room {
        if room.members.is_empty() {
            room.started = false;
            room.host = None;
        } else if !room
            .host
            .as_deref()
            .is_some_and(|host| room.is_member(host))
        {
            room.host = room.members.first().cloned();
        }

        self.rooms.insert(room.room_id.clone(), room.clone());
        // No receivers is fine: nobody is watching yet
        let _ = self.feed.send(room.clone());
        room
    }
}

impl Default for RoomStore {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_members(members: &[String]) -> Result<()> {
    let mut seen = HashSet::new();
    for member in members {
        if member.trim().is_empty() {
            return Err(StoreError::Invalid("usernames cannot be blank".to_string()));
        }
        if !seen.insert(member.as_str()) {
            return Err(StoreError::Invalid(format!(
                "'{}' is already in the room",
                member
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn store_with(room_id: &str, members: &[&str]) -> RoomStore {
        let mut store = RoomStore::new();
        store.create_room(room_id).unwrap();
        if !members.is_empty() {
            store
                .update_room(room_id, RoomPatch::members(names(members)), None)
                .unwrap();
        }
        store
    }

    #[test]
    fn test_create_rejects_duplicates_and_bad_ids() {
        let mut store = RoomStore::new();
        store.create_room("R1").unwrap();

        assert_eq!(
            store.create_room("R1"),
            Err(StoreError::AlreadyExists("R1".to_string()))
        );
        assert!(matches!(
            store.create_room("has space"),
            Err(StoreError::Invalid(_))
        ));
        assert!(matches!(store.create_room(""), Err(StoreError::Invalid(_))));
    }

    #[test]
    fn test_missing_room_is_typed_not_found() {
        let store = RoomStore::new();
        assert_eq!(
            store.get_room("R2"),
            Err(StoreError::NotFound("R2".to_string()))
        );
    }

    #[test]
    fn test_first_member_becomes_host() {
        let store = store_with("R1", &["alice", "bob"]);
        let room = store.get_room("R1").unwrap();
        assert_eq!(room.host.as_deref(), Some("alice"));
    }

    #[test]
    fn test_duplicate_members_rejected() {
        let mut store = store_with("R1", &["alice"]);
        let result = store.update_room("R1", RoomPatch::members(names(&["alice", "alice"])), None);
        assert!(matches!(result, Err(StoreError::Invalid(_))));
        assert_eq!(store.get_room("R1").unwrap().members, names(&["alice"]));
    }

    #[test]
    fn test_stale_expected_members_conflict() {
        let mut store = store_with("R1", &["alice"]);

        let stale: Vec<String> = Vec::new();
        let result = store.update_room("R1", RoomPatch::members(names(&["bob"])), Some(stale.as_slice()));
        match result {
            Err(StoreError::Conflict { current }) => {
                assert_eq!(current.members, names(&["alice"]))
            }
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_update_cannot_start_game() {
        let mut store = store_with("R1", &["alice", "bob"]);
        let patch = RoomPatch {
            members: None,
            started: Some(true),
        };
        assert!(matches!(
            store.update_room("R1", patch, None),
            Err(StoreError::Denied(_))
        ));
    }

    #[test]
    fn test_start_requires_host_and_two_members() {
        let mut store = store_with("R1", &["alice"]);
        assert!(matches!(
            store.start_game("R1", "alice"),
            Err(StoreError::Denied(_))
        ));

        store
            .update_room("R1", RoomPatch::members(names(&["alice", "bob"])), None)
            .unwrap();
        assert!(matches!(
            store.start_game("R1", "bob"),
            Err(StoreError::Denied(_))
        ));
        assert!(store.start_game("R1", "alice").unwrap().started);

        // Second start leaves the row alone
        assert!(store.start_game("R1", "alice").unwrap().started);
    }

    #[test]
    fn test_host_leaving_hands_over_to_next_member() {
        let mut store = store_with("R1", &["alice", "bob", "carol"]);
        let room = store.remove_member("R1", "alice").unwrap();
        assert_eq!(room.members, names(&["bob", "carol"]));
        assert_eq!(room.host.as_deref(), Some("bob"));
    }

    #[test]
    fn test_last_member_leaving_resets_started() {
        let mut store = store_with("R1", &["alice", "bob"]);
        store.start_game("R1", "alice").unwrap();

        let room = store.remove_member("R1", "alice").unwrap();
        assert!(room.started, "non-last leave keeps the game started");

        let room = store.remove_member("R1", "bob").unwrap();
        assert!(room.members.is_empty());
        assert!(!room.started);
        assert_eq!(room.host, None);
    }

    #[test]
    fn test_remove_non_member_is_noop() {
        let mut store = store_with("R1", &["alice"]);
        let mut feed = store.feed();
        let room = store.remove_member("R1", "mallory").unwrap();
        assert_eq!(room.members, names(&["alice"]));
        assert!(feed.try_recv().is_err(), "no-op must not publish");
    }

    #[test]
    fn test_accepted_writes_are_published() {
        let mut store = store_with("R1", &[]);
        let mut feed = store.feed();

        let empty: Vec<String> = Vec::new();
        store
            .update_room("R1", RoomPatch::members(names(&["alice"])), Some(empty.as_slice()))
            .unwrap();

        let row = feed.try_recv().unwrap();
        assert_eq!(row.room_id, "R1");
        assert_eq!(row.members, names(&["alice"]));
    }

    #[test]
    fn test_list_rooms_sorted_by_id() {
        let mut store = RoomStore::new();
        store.create_room("b").unwrap();
        store.create_room("a").unwrap();
        let ids: Vec<_> = store.list_rooms().into_iter().map(|r| r.room_id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
