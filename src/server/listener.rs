//! Unix socket listener and server main loop

use super::connection::{
    create_error_message, create_reply, create_welcome_message, parse_client_message,
    read_message, writer_task, Access, ClientConnection,
};
use super::session::Session;
use crate::{
    config::KeysConfig,
    protocol::{
        check_version_compatibility, ClientMessage, Outcome, Request, ServerMessage,
        PROTOCOL_VERSION,
    },
    store::{LocalStore, Room, RoomBackend},
};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use uuid::Uuid;

/// Server state shared across connections
struct ServerState {
    session: Session,
    clients: HashMap<Uuid, ClientConnection>,
    store: LocalStore,
    keys: KeysConfig,
}

/// Unix socket server listener
pub struct ServerListener {
    socket_path: PathBuf,
    store: LocalStore,
    keys: KeysConfig,
}

impl ServerListener {
    /// Create a new server listener serving `store`
    pub fn new(socket_path: PathBuf, store: LocalStore, keys: KeysConfig) -> Self {
        Self {
            socket_path,
            store,
            keys,
        }
    }

    /// Check if socket already exists (another server running)
    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// Get the socket path
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Run the server
    pub async fn run(&self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Remove stale socket if it exists
        if self.socket_path.exists() {
            match UnixStream::connect(&self.socket_path).await {
                Ok(_) => {
                    return Err(anyhow!(
                        "Server already running on {:?}",
                        self.socket_path
                    ));
                }
                Err(_) => {
                    tracing::info!("Removing stale socket: {:?}", self.socket_path);
                    std::fs::remove_file(&self.socket_path)?;
                }
            }
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        tracing::info!("Server listening on {:?}", self.socket_path);

        let mut feed = self.store.feed().await;

        let state = Arc::new(RwLock::new(ServerState {
            session: Session::new(self.socket_path.clone()),
            clients: HashMap::new(),
            store: self.store.clone(),
            keys: self.keys.clone(),
        }));

        // Route every accepted write to the connections watching that room
        let feed_state = Arc::clone(&state);
        let feed_handle = tokio::spawn(async move {
            loop {
                match feed.recv().await {
                    Ok(room) => route_change(room, &feed_state).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Change feed lagged, {} rows dropped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            tracing::info!("Change feed loop finished");
        });

        // Main server loop
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Shutdown signal received");
                    break;
                }

                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _addr)) => {
                            let state = Arc::clone(&state);
                            tokio::spawn(async move {
                                if let Err(e) = handle_client(stream, state).await {
                                    tracing::error!("Client error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }

        feed_handle.abort();
        {
            let state = state.read().await;
            tracing::info!(
                "Server up for {}s, {} clients still connected",
                state.session.uptime().num_seconds(),
                state.session.info.client_count
            );
        }
        self.cleanup().await;

        Ok(())
    }

    /// Clean up server resources
    async fn cleanup(&self) {
        tracing::info!("Cleaning up server resources");

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                tracing::error!("Failed to remove socket file: {}", e);
            }
        }
    }
}

/// Decide what a `Hello` carrying `presented` is allowed to do.
/// `None` means the key was wrong.
pub fn authorize(keys: &KeysConfig, presented: Option<&str>) -> Option<Access> {
    if let (Some(service), Some(given)) = (keys.service_key.as_deref(), presented) {
        if given == service {
            return Some(Access::Service);
        }
    }

    match keys.anon_key.as_deref() {
        None if keys.service_key.is_none() => Some(Access::Service),
        None => Some(Access::Anon),
        Some(anon) if presented == Some(anon) => Some(Access::Anon),
        Some(_) => None,
    }
}

/// Handle a single client connection
async fn handle_client(stream: UnixStream, state: Arc<RwLock<ServerState>>) -> Result<()> {
    let (mut reader, writer) = stream.into_split();

    let (tx, rx) = mpsc::channel::<ServerMessage>(256);
    let (evict_tx, mut evicted) = oneshot::channel::<()>();
    let client = ClientConnection::new(tx, evict_tx);
    let client_id = client.id();

    tracing::info!("Client connected: {}", client_id);

    let session_id = {
        let mut state = state.write().await;
        state.session.add_client(client_id);
        state.clients.insert(client_id, client);
        state.session.id()
    };

    let writer_handle = tokio::spawn(writer_task(writer, rx));

    send_to(client_id, create_welcome_message(session_id), &state).await?;

    loop {
        let read = tokio::select! {
            _ = &mut evicted => {
                tracing::warn!("Client {} evicted", client_id);
                break;
            }
            read = read_message(&mut reader) => read,
        };

        match read {
            Ok(Some(bytes)) => match parse_client_message(&bytes) {
                Ok(msg) => {
                    let response = process_message(msg, client_id, &state).await;
                    if let Err(e) = send_to(client_id, response, &state).await {
                        tracing::error!("Failed to send response: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to parse message: {}", e);
                    let _ = send_to(
                        client_id,
                        create_error_message(format!("Invalid message: {}", e)),
                        &state,
                    )
                    .await;
                }
            },
            Ok(None) => {
                tracing::info!("Client disconnected: {}", client_id);
                break;
            }
            Err(e) => {
                tracing::error!("Error reading from client: {}", e);
                break;
            }
        }
    }

    drop_client(&mut *state.write().await, &client_id);
    writer_handle.abort();

    tracing::info!("Client handler finished: {}", client_id);

    Ok(())
}

/// Queue a reply for one client. The state lock is released before waiting
/// on the client's queue.
async fn send_to(
    client_id: Uuid,
    msg: ServerMessage,
    state: &Arc<RwLock<ServerState>>,
) -> Result<()> {
    let sender = state
        .read()
        .await
        .clients
        .get(&client_id)
        .map(ClientConnection::sender)
        .ok_or_else(|| anyhow!("Client {} is gone", client_id))?;

    sender
        .send(msg)
        .await
        .map_err(|_| anyhow!("Failed to send message to client {}", client_id))
}

/// Process a client message and return the reply
async fn process_message(
    msg: ClientMessage,
    client_id: Uuid,
    state: &Arc<RwLock<ServerState>>,
) -> ServerMessage {
    let ClientMessage {
        request_id,
        request,
    } = msg;

    let (store, access) = {
        let state = state.read().await;
        let access = state
            .clients
            .get(&client_id)
            .map(|c| c.access)
            .unwrap_or(Access::Pending);
        (state.store.clone(), access)
    };

    tracing::debug!("{} from {} ({:?})", request.name(), client_id, access);

    let outcome: Outcome = match request {
        Request::Hello {
            protocol_version,
            api_key,
        } => {
            if let Err(e) = check_version_compatibility(protocol_version, PROTOCOL_VERSION) {
                return create_reply(
                    request_id,
                    Outcome::Denied {
                        reason: e.to_string(),
                    },
                );
            }

            let mut state = state.write().await;
            let granted = authorize(&state.keys, api_key.as_deref());
            match (granted, state.clients.get_mut(&client_id)) {
                (Some(granted), Some(client)) => {
                    client.access = granted;
                    Outcome::Ack
                }
                (None, _) => {
                    tracing::warn!("Client {} presented a wrong key", client_id);
                    Outcome::Denied {
                        reason: "invalid api key".to_string(),
                    }
                }
                (Some(_), None) => Outcome::Failed {
                    message: "connection closed".to_string(),
                },
            }
        }

        _ if access == Access::Pending => Outcome::Denied {
            reason: "handshake required".to_string(),
        },

        Request::GetRoom { room_id } => store.get_room(&room_id).await.into(),

        Request::UpdateRoom {
            room_id,
            patch,
            expected_members,
        } => store
            .update_room(&room_id, patch, expected_members)
            .await
            .into(),

        Request::RemoveMember { room_id, username } => {
            store.remove_member(&room_id, &username).await.into()
        }

        Request::StartGame { room_id, username } => {
            store.start_game(&room_id, &username).await.into()
        }

        Request::CreateRoom { room_id } => {
            if access == Access::Service {
                store.create_room(&room_id).await.into()
            } else {
                Outcome::Denied {
                    reason: "creating rooms needs the service key".to_string(),
                }
            }
        }

        Request::ListRooms => Outcome::Rooms(store.list_rooms().await),

        Request::Subscribe { room_id } => match store.get_room(&room_id).await {
            Ok(_) => {
                let mut state = state.write().await;
                if let Some(client) = state.clients.get_mut(&client_id) {
                    client.subscriptions.insert(room_id);
                }
                Outcome::Ack
            }
            Err(e) => e.into(),
        },

        Request::Unsubscribe { room_id } => {
            let mut state = state.write().await;
            if let Some(client) = state.clients.get_mut(&client_id) {
                client.subscriptions.remove(&room_id);
            }
            Outcome::Ack
        }
    };

    create_reply(request_id, outcome)
}

/// Push a post-change row to every client subscribed to its room.
///
/// Pushes never wait: a client whose queue is full has stopped reading and is
/// disconnected, so it cannot hold up anyone else.
async fn route_change(room: Room, state: &Arc<RwLock<ServerState>>) {
    let targets: Vec<(Uuid, mpsc::Sender<ServerMessage>)> = state
        .read()
        .await
        .clients
        .values()
        .filter(|c| c.is_subscribed(&room.room_id))
        .map(|c| (c.id(), c.sender()))
        .collect();

    let timestamp = chrono::Utc::now().timestamp_millis();
    let mut laggards = Vec::new();
    for (client_id, sender) in targets {
        let msg = ServerMessage::Changed {
            room: room.clone(),
            timestamp,
        };
        match sender.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Client {} is not reading, disconnecting it", client_id);
                laggards.push(client_id);
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Client {} went away before a push", client_id);
            }
        }
    }

    if !laggards.is_empty() {
        let mut state = state.write().await;
        for client_id in &laggards {
            drop_client(&mut state, client_id);
        }
    }
}

/// Forget a client. Dropping its entry signals the handler, which closes the
/// socket.
fn drop_client(state: &mut ServerState, client_id: &Uuid) {
    state.session.remove_client(client_id);
    state.clients.remove(client_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(anon: Option<&str>, service: Option<&str>) -> KeysConfig {
        KeysConfig {
            public_url: None,
            anon_key: anon.map(String::from),
            service_key: service.map(String::from),
        }
    }

    #[test]
    fn test_open_server_grants_everything() {
        assert_eq!(authorize(&keys(None, None), None), Some(Access::Service));
    }

    #[test]
    fn test_anon_key_required_when_configured() {
        let keys = keys(Some("anon"), Some("svc"));
        assert_eq!(authorize(&keys, None), None);
        assert_eq!(authorize(&keys, Some("wrong")), None);
        assert_eq!(authorize(&keys, Some("anon")), Some(Access::Anon));
        assert_eq!(authorize(&keys, Some("svc")), Some(Access::Service));
    }

    #[test]
    fn test_service_key_only_gates_provisioning() {
        let keys = keys(None, Some("svc"));
        assert_eq!(authorize(&keys, None), Some(Access::Anon));
        assert_eq!(authorize(&keys, Some("svc")), Some(Access::Service));
    }
}
