//! # World Sync Server Library
//!
//! Authoritative server for the shared world. Clients connect over WebSocket,
//! are assigned a slot, and from then on every player's state is fanned out to
//! all other connected clients at a throttled rate.
//!
//! ## Architecture
//!
//! ### Connection Tasks
//! The [`network::Server`] accept loop runs on its own task. Each accepted
//! connection gets a task that performs the optional TLS handshake and the
//! WebSocket upgrade, then registers with the hub and starts a read pump and a
//! write pump. Pumps only talk to the hub through a single ordered queue of
//! [`hub::HubEvent`]s.
//!
//! ### Session Hub
//! [`hub::ServerRuntime`] owns every piece of mutable server state: the slot
//! registry, the per-client sessions and the membership map. It is driven by
//! the host loop, which calls `tick` once per frame to drain queued events and
//! broadcast, and `advance` to step the simulation. Nothing else mutates it.
//!
//! ### Backpressure
//! Each client has a bounded outbound queue. Enqueueing never blocks the hub;
//! a client whose queue is full is disconnected instead of stalling everyone.
//!
//! ## Module Organization
//!
//! - `client`: per-connection handle and session state
//! - `config`: listener and hub settings
//! - `hub`: the session hub and its event queue
//! - `network`: accept loop, handshake and TLS loading
//! - `registry`: fixed-capacity slot allocation
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use std::time::{Duration, Instant};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (listener, mut runtime) = server::bind(ServerConfig::new("127.0.0.1:8080")).await?;
//!     tokio::spawn(listener.run());
//!
//!     let mut frame = tokio::time::interval(Duration::from_millis(16));
//!     loop {
//!         frame.tick().await;
//!         runtime.tick(Instant::now());
//!         runtime.advance();
//!     }
//! }
//! ```

pub mod client;
pub mod config;
pub mod hub;
pub mod network;
pub mod registry;

use config::ServerConfig;
use hub::ServerRuntime;
use network::{Server, ServerError};

/// Binds the listener and creates the hub it feeds.
pub async fn bind(config: ServerConfig) -> Result<(Server, ServerRuntime), ServerError> {
    let (runtime, hub) = ServerRuntime::channel(config.max_clients, config.hub_queue);
    let server = Server::bind(&config, hub).await?;
    Ok((server, runtime))
}
