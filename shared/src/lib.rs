//! Protocol, simulation entity and connection pumps shared by client and server

pub mod entity;
pub mod protocol;
pub mod transport;
pub mod wire;

use std::fmt;
use std::ops::Range;
use std::time::Duration;

pub use entity::Player;
pub use protocol::{ConnectResponse, DecodeError, DisconnectPlayer, Frame, Kind, Payload, UpdatePlayer};

/// Number of client slots a server can hand out.
pub const MAX_CLIENTS: usize = 256;
/// Minimum spacing between two state broadcasts for the same player.
pub const UPDATE_INTERVAL: Duration = Duration::from_millis(15);
/// Distance a player moves per host frame while a direction key is held.
pub const PLAYER_STEP: f64 = 3.0;
/// Spawn ranges used by the server when a client is admitted.
pub const SPAWN_X: Range<i64> = 130..220;
pub const SPAWN_Y: Range<i64> = 10..40;
/// Position of the local player before the server assigns a spawn.
pub const LOCAL_START: (f64, f64) = (50.0, 380.0);
/// Upgrade path the server accepts WebSocket connections on.
pub const WS_PATH: &str = "/ws";
pub const DEFAULT_PORT: u16 = 8080;

/// Small integer identifying a live connection, reused after disconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientSlot(pub u8);

impl ClientSlot {
    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    pub fn to_wire(self) -> i32 {
        i32::from(self.0)
    }
}

impl fmt::Display for ClientSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
