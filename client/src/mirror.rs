//! Client-side copy of the world
//!
//! The mirror holds the locally controlled player plus one lazily created
//! entry per remote slot. Remote entries are plain last-write-wins copies of
//! whatever the server last sent; there is no interpolation or prediction.

use log::{debug, info, warn};
use shared::protocol::{slot_from_wire, Frame};
use shared::{ClientSlot, Player, LOCAL_START, MAX_CLIENTS};

#[derive(Debug, Clone)]
pub struct ClientMirror {
    /// Locally controlled player, gone after disconnect
    local: Option<Player>,
    /// Remote players indexed by slot
    remotes: Vec<Option<Player>>,
    slot: Option<ClientSlot>,
    connected: bool,
}

impl ClientMirror {
    pub fn new() -> Self {
        Self {
            local: Some(Player::new(LOCAL_START.0, LOCAL_START.1)),
            remotes: vec![None; MAX_CLIENTS],
            slot: None,
            connected: false,
        }
    }

    /// Applies one decoded server frame.
    pub fn apply(&mut self, frame: &Frame) {
        match frame {
            Frame::ConnectResponse(msg) => {
                let slot = match slot_from_wire(msg.slot) {
                    Ok(slot) => slot,
                    Err(e) => {
                        warn!("Ignoring connect response: {}", e);
                        return;
                    }
                };
                info!("Connected! Client slot: {} at ({}, {})", slot, msg.x, msg.y);
                let local = self.local.get_or_insert_with(Player::default);
                local.x = msg.x;
                local.y = msg.y;
                self.slot = Some(slot);
                self.connected = true;
            }
            Frame::UpdatePlayer(msg) => {
                let slot = match slot_from_wire(msg.slot) {
                    Ok(slot) => slot,
                    Err(e) => {
                        warn!("Ignoring player update: {}", e);
                        return;
                    }
                };
                if Some(slot) == self.slot {
                    return;
                }
                self.remotes[slot.index()]
                    .get_or_insert_with(Player::default)
                    .apply_update(msg);
            }
            Frame::DisconnectPlayer(msg) => {
                if let Ok(slot) = slot_from_wire(msg.slot) {
                    if self.remotes[slot.index()].take().is_some() {
                        debug!("Player {} left", slot);
                    }
                }
            }
            Frame::Unknown { tag, payload } => {
                warn!(
                    "Unhandled netmsg kind: {} (tag {}), with data: {:?}",
                    frame.kind_name(),
                    tag,
                    payload
                );
            }
        }
    }

    /// Marks the connection as lost and drops the local player. Idempotent.
    pub fn disconnect(&mut self) {
        if self.connected {
            info!("Disconnected from server");
        }
        self.connected = false;
        self.local = None;
    }

    pub fn set_input(&mut self, left_pressed: bool, right_pressed: bool) {
        if let Some(local) = self.local.as_mut() {
            local.left_pressed = left_pressed;
            local.right_pressed = right_pressed;
        }
    }

    /// One simulation step for every entity we know about.
    pub fn advance(&mut self) {
        for player in self.local.iter_mut().chain(self.remotes.iter_mut().flatten()) {
            player.step();
        }
    }

    /// All entities, local first. The slot is `None` for the local player
    /// before it has been assigned one.
    pub fn players(&self) -> impl Iterator<Item = (Option<ClientSlot>, &Player)> + '_ {
        let local = self.local.iter().map(move |player| (self.slot, player));
        let remotes = self
            .remotes
            .iter()
            .enumerate()
            .filter_map(|(index, player)| {
                player
                    .as_ref()
                    .map(|player| (Some(ClientSlot(index as u8)), player))
            });
        local.chain(remotes)
    }

    pub fn local(&self) -> Option<&Player> {
        self.local.as_ref()
    }

    pub fn remote(&self, slot: ClientSlot) -> Option<&Player> {
        self.remotes.get(slot.index()).and_then(Option::as_ref)
    }

    pub fn remote_count(&self) -> usize {
        self.remotes.iter().flatten().count()
    }

    pub fn slot(&self) -> Option<ClientSlot> {
        self.slot
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

impl Default for ClientMirror {
    fn default() -> Self {
        Self::new()
    }
}
