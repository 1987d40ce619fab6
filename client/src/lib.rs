//! # World Sync Client Library
//!
//! Client side of the world sync protocol. A client dials the server over
//! WebSocket, is told its slot and spawn position, and from then on streams its
//! own player state to the server while mirroring everyone else's.
//!
//! ## Architecture Overview
//!
//! ### Pumps
//! [`network::connect`] performs the handshake and starts a read pump and a
//! write pump for the connection. They exchange byte frames with the runtime
//! through two bounded queues and report a lost connection exactly once.
//!
//! ### Runtime
//! [`runtime::ClientRuntime`] is driven by the host loop. Each `tick` drains
//! whatever the read pump delivered, applies it to the mirror and, at most once
//! per update interval, queues the local player's state for the server. It
//! never waits on the network. Outbound frames that do not fit the queue are
//! dropped rather than stalling the host loop.
//!
//! ### Mirror
//! [`mirror::ClientMirror`] keeps the local player plus one entry per remote
//! slot. Remote entries are overwritten by every update the server sends and
//! removed when the server announces a disconnect.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{connect, ClientConfig};
//! use std::time::{Duration, Instant};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut runtime = connect(&ClientConfig::new("127.0.0.1:8080")).await?;
//!
//!     let mut frame = tokio::time::interval(Duration::from_millis(16));
//!     loop {
//!         frame.tick().await;
//!         runtime.set_input(false, true);
//!         runtime.tick(Instant::now());
//!         runtime.advance();
//!         for (slot, player) in runtime.players() {
//!             println!("{:?} at ({}, {})", slot, player.x, player.y);
//!         }
//!     }
//! }
//! ```

pub mod mirror;
pub mod network;
pub mod runtime;

pub use mirror::ClientMirror;
pub use network::{connect, ClientConfig, ClientError};
pub use runtime::{ClientEvent, ClientRuntime};
