use shared::transport::{Outbound, SendError};
use shared::{ClientSlot, Player};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Identity of an accepted connection, unique for the lifetime of the process
pub type ConnectionId = u64;

/// Per-client simulation state owned by the hub
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub player: Player,
    /// When this player's state was last fanned out to the other clients.
    pub last_broadcast: Option<Instant>,
}

impl Session {
    pub fn new(player: Player) -> Self {
        Session {
            player,
            last_broadcast: None,
        }
    }

    // Check if the throttle interval has passed since the last broadcast
    pub fn is_due(&self, now: Instant, interval: Duration) -> bool {
        match self.last_broadcast {
            Some(last) => now.saturating_duration_since(last) > interval,
            None => true,
        }
    }
}

// Connection handle held by the hub
#[derive(Debug)]
pub struct Client {
    pub id: ConnectionId,
    pub slot: ClientSlot,
    pub addr: SocketAddr,
    pub session: Session,
    outbound: Outbound,
}

impl Client {
    pub fn new(id: ConnectionId, slot: ClientSlot, addr: SocketAddr, outbound: Outbound) -> Self {
        Client {
            id,
            slot,
            addr,
            session: Session::default(),
            outbound,
        }
    }

    // Queue a frame for this client's write pump
    pub fn send(&self, frame: Vec<u8>) -> Result<(), SendError> {
        self.outbound.send(frame)
    }
}
