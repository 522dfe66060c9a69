//! Property tests for room row invariants

use lobby::client::{check_entry, EntryError};
use lobby::store::{Room, RoomPatch, RoomStore, StoreError};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Join(usize),
    Leave(usize),
    Start(usize),
}

const NAMES: &[&str] = &["alice", "bob", "carol", "dave", "erin"];

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..NAMES.len()).prop_map(Op::Join),
        (0..NAMES.len()).prop_map(Op::Leave),
        (0..NAMES.len()).prop_map(Op::Start),
    ]
}

fn apply(store: &mut RoomStore, op: &Op) -> Result<Room, StoreError> {
    match *op {
        Op::Join(i) => {
            let current = store.get_room("R1")?;
            if current.is_member(NAMES[i]) {
                return Ok(current);
            }
            let mut members = current.members.clone();
            members.push(NAMES[i].to_string());
            store.update_room("R1", RoomPatch::members(members), Some(current.members.as_slice()))
        }
        Op::Leave(i) => store.remove_member("R1", NAMES[i]),
        Op::Start(i) => store.start_game("R1", NAMES[i]),
    }
}

proptest! {
    #[test]
    fn prop_rows_stay_consistent(ops in prop::collection::vec(op(), 0..40)) {
        let mut store = RoomStore::new();
        store.create_room("R1").unwrap();

        for op in &ops {
            let before = store.get_room("R1").unwrap();
            let result = apply(&mut store, op);
            let room = store.get_room("R1").unwrap();

            // No duplicates, host is the first member, empty rooms are reset
            let mut sorted = room.members.clone();
            sorted.sort();
            sorted.dedup();
            prop_assert_eq!(sorted.len(), room.members.len());
            prop_assert_eq!(room.host.as_deref(), room.members.first().map(String::as_str));
            if room.members.is_empty() {
                prop_assert!(!room.started);
            }

            // Once started, a room stays started until it empties
            if before.started && !room.members.is_empty() {
                prop_assert!(room.started);
            }

            if let Op::Start(i) = op {
                let allowed = before.can_start(NAMES[*i]);
                prop_assert_eq!(room.started, before.started || allowed);
                if !before.started && !allowed {
                    prop_assert!(result.is_err());
                }
            }
        }
    }

    #[test]
    fn prop_leave_keeps_order(
        members in prop::collection::btree_set("[a-z]{1,8}", 1..6),
        pick in any::<prop::sample::Index>(),
    ) {
        let members: Vec<String> = members.into_iter().collect();
        let leaver = pick.get(&members).clone();

        let mut store = RoomStore::new();
        store.create_room("R1").unwrap();
        store.update_room("R1", RoomPatch::members(members.clone()), None).unwrap();
        let room = store.remove_member("R1", &leaver).unwrap();

        let expected: Vec<String> = members.into_iter().filter(|m| *m != leaver).collect();
        prop_assert_eq!(room.members, expected);
    }

    #[test]
    fn prop_stale_write_never_lands(extra in "[a-z]{1,8}") {
        let mut store = RoomStore::new();
        store.create_room("R1").unwrap();
        store.update_room("R1", RoomPatch::members(vec!["alice".to_string()]), None).unwrap();

        let stale: Vec<String> = Vec::new();
        let result = store.update_room("R1", RoomPatch::members(vec![extra]), Some(stale.as_slice()));
        let is_conflict = matches!(result, Err(StoreError::Conflict { .. }));
        prop_assert!(is_conflict);
        prop_assert_eq!(store.get_room("R1").unwrap().members, vec!["alice".to_string()]);
    }

    #[test]
    fn prop_entry_rule(started in any::<bool>(), member in any::<bool>()) {
        let mut room = Room::new("R1");
        room.started = started;
        if member {
            room.members.push("bob".to_string());
            room.host = Some("bob".to_string());
        }

        let result = check_entry(&room, "bob");
        if started && !member {
            prop_assert_eq!(result, Err(EntryError::AlreadyStarted));
        } else {
            prop_assert_eq!(result, Ok(()));
        }
    }
}
