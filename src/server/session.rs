//! Server session - identity and bookkeeping for one server run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Session metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Sent to every client in `Welcome`
    pub id: Uuid,

    /// When the server started
    pub created_at: DateTime<Utc>,

    /// Socket path for this session
    pub socket_path: PathBuf,

    /// Number of connected clients
    pub client_count: usize,
}

/// Active session state
pub struct Session {
    /// Session metadata
    pub info: SessionInfo,

    /// Connected client IDs
    client_ids: Vec<Uuid>,
}

impl Session {
    /// Create a new session
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            info: SessionInfo {
                id: Uuid::new_v4(),
                created_at: Utc::now(),
                socket_path,
                client_count: 0,
            },
            client_ids: Vec::new(),
        }
    }

    /// Register a new client connection
    pub fn add_client(&mut self, client_id: Uuid) {
        self.client_ids.push(client_id);
        self.info.client_count = self.client_ids.len();
    }

    /// Remove a client connection
    pub fn remove_client(&mut self, client_id: &Uuid) {
        self.client_ids.retain(|id| id != client_id);
        self.info.client_count = self.client_ids.len();
    }

    /// Get session ID
    pub fn id(&self) -> Uuid {
        self.info.id
    }

    pub fn uptime(&self) -> chrono::Duration {
        Utc::now() - self.info.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_count_tracks_connections() {
        let mut session = Session::new(PathBuf::from("/tmp/lobby.sock"));
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        session.add_client(a);
        session.add_client(b);
        assert_eq!(session.info.client_count, 2);

        session.remove_client(&a);
        assert_eq!(session.info.client_count, 1);
    }
}
