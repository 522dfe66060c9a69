//! Server module - Unix socket listener, client connections, health endpoint

pub mod connection;
pub mod health;
mod listener;
mod session;

pub use connection::{Access, ClientConnection};
pub use health::HealthStatus;
pub use listener::{authorize, ServerListener};
pub use session::{Session, SessionInfo};
