//! End-to-end lobby flows over the socket: landing, join, start, leave

use lobby::client::{enter, join_room, EntryError, IdentityStore, RoomClient, RoomView};
use lobby::config::KeysConfig;
use lobby::server::ServerListener;
use lobby::store::{LocalStore, RoomBackend};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::timeout;

struct Lobby {
    dir: TempDir,
    socket_path: PathBuf,
    store: LocalStore,
    shutdown_tx: mpsc::Sender<()>,
}

impl Lobby {
    async fn start() -> Self {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("lobby.sock");
        let store = LocalStore::new();
        store.create_room("R1").await.unwrap();

        let server =
            ServerListener::new(socket_path.clone(), store.clone(), KeysConfig::default());
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move { server.run(shutdown_rx).await });
        tokio::time::sleep(Duration::from_millis(100)).await;

        Self {
            dir,
            socket_path,
            store,
            shutdown_tx,
        }
    }

    async fn player(&self) -> RoomClient {
        RoomClient::connect(&self.socket_path, None, Duration::from_secs(2))
            .await
            .unwrap()
    }

    fn identity(&self, who: &str) -> IdentityStore {
        IdentityStore::new(self.dir.path().join(format!("{}.toml", who)))
    }

    /// Landing plus room view setup, the way the binary does it
    async fn walk_in(
        &self,
        client: &RoomClient,
        who: &str,
        room: &str,
    ) -> Result<RoomView, EntryError> {
        let request = enter(client, &self.identity(who), who, room).await?;
        let mut view = RoomView::new(&request.room_id, &request.username);
        view.load(client).await;
        view.join(client, 3).await;
        Ok(view)
    }

    async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

#[tokio::test]
async fn test_full_room_lifecycle() {
    let lobby = Lobby::start().await;
    let alice_client = lobby.player().await;
    let bob_client = lobby.player().await;
    let carol_client = lobby.player().await;

    // Alice alone: host, but cannot start
    let mut alice = lobby.walk_in(&alice_client, "alice", "R1").await.unwrap();
    assert_eq!(alice.members(), ["alice"]);
    assert!(alice.is_host());
    assert!(!alice.can_start());

    let mut alice_feed = alice_client.subscribe("R1").await.unwrap();

    // Bob joins; alice sees it live and may now start
    let bob = lobby.walk_in(&bob_client, "bob", "R1").await.unwrap();
    assert_eq!(bob.members(), ["alice", "bob"]);
    assert!(!bob.is_host());
    assert!(!bob.can_start());

    let pushed = timeout(Duration::from_secs(2), alice_feed.recv())
        .await
        .expect("push should arrive")
        .expect("feed open");
    assert!(alice.apply_change(pushed));
    assert_eq!(alice.members(), ["alice", "bob"]);
    assert!(alice.can_start());

    alice.start(&alice_client).await;
    assert!(alice.started());
    assert!(!alice.can_start());

    // Started rooms turn newcomers away but readmit members
    assert_eq!(
        enter(&carol_client, &lobby.identity("carol"), "carol", "R1").await,
        Err(EntryError::AlreadyStarted)
    );
    assert!(enter(&bob_client, &lobby.identity("bob"), "bob", "R1").await.is_ok());

    // Host leaves: bob inherits, game stays started
    alice.leave(&alice_client).await;
    assert!(alice.is_leaving());
    let room = bob_client.get_room("R1").await.unwrap();
    assert_eq!(room.members, vec!["bob"]);
    assert_eq!(room.host.as_deref(), Some("bob"));
    assert!(room.started);

    // Last one out resets the room
    bob_client.remove_member("R1", "bob").await.unwrap();
    let room = carol_client.get_room("R1").await.unwrap();
    assert!(room.members.is_empty());
    assert_eq!(room.host, None);
    assert!(!room.started);

    assert!(lobby.walk_in(&carol_client, "carol", "R1").await.is_ok());

    lobby.stop().await;
}

#[tokio::test]
async fn test_missing_room_rejected_at_landing() {
    let lobby = Lobby::start().await;
    let client = lobby.player().await;

    assert_eq!(
        enter(&client, &lobby.identity("alice"), "alice", "R2").await,
        Err(EntryError::RoomNotFound)
    );
    assert_eq!(
        lobby.identity("alice").load().unwrap().as_deref(),
        Some("alice")
    );

    lobby.stop().await;
}

#[tokio::test]
async fn test_rejoin_does_not_duplicate() {
    let lobby = Lobby::start().await;
    let client = lobby.player().await;

    lobby.walk_in(&client, "alice", "R1").await.unwrap();
    let view = lobby.walk_in(&client, "alice", "R1").await.unwrap();
    assert_eq!(view.members(), ["alice"]);

    lobby.stop().await;
}

#[tokio::test]
async fn test_guest_cannot_start() {
    let lobby = Lobby::start().await;
    let alice_client = lobby.player().await;
    let bob_client = lobby.player().await;

    lobby.walk_in(&alice_client, "alice", "R1").await.unwrap();
    let mut bob = lobby.walk_in(&bob_client, "bob", "R1").await.unwrap();

    bob.start(&bob_client).await;
    assert!(!bob.started());
    assert!(bob_client.start_game("R1", "bob").await.is_err());
    assert!(!lobby.store.get_room("R1").await.unwrap().started);

    lobby.stop().await;
}

#[tokio::test]
async fn test_concurrent_joins_all_land() {
    let lobby = Lobby::start().await;
    let names: Vec<String> = (0..6).map(|i| format!("player{}", i)).collect();

    let mut clients = Vec::new();
    for _ in &names {
        clients.push(Arc::new(lobby.player().await));
    }

    let mut joins = JoinSet::new();
    for (client, name) in clients.iter().zip(&names) {
        let client = Arc::clone(client);
        let name = name.clone();
        joins.spawn(async move { join_room(client.as_ref(), "R1", &name, 8).await });
    }
    while let Some(result) = joins.join_next().await {
        result.unwrap().unwrap();
    }

    let room = lobby.store.get_room("R1").await.unwrap();
    assert_eq!(room.members.len(), names.len());
    for name in &names {
        assert!(room.is_member(name), "{} lost its join", name);
    }
    assert_eq!(room.host.as_deref(), room.members.first().map(String::as_str));

    lobby.stop().await;
}
