//! polybit-lobby - room lobby for a multiplayer board game
//!
//! This crate provides:
//! - The room store (rows keyed by room id, conditional updates, change feed)
//! - Client-server protocol
//! - The landing flow and room view used by the `lobby` client
//! - Configuration management
//!
//! # Architecture
//!
//! - The server (`lobby-server`) owns every room and pushes each accepted
//!   write to the clients subscribed to that room
//! - The client (`lobby`) validates entry, joins the room and renders it
//! - Communication happens over a Unix domain socket; a small HTTP
//!   endpoint reports server health

pub mod client;
pub mod config;
pub mod protocol;
pub mod server;
pub mod store;
