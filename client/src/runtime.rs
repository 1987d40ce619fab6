//! Client synchronizer driven by the host loop

use crate::mirror::ClientMirror;
use log::{debug, warn};
use shared::protocol::{Frame, Payload};
use shared::transport::{Outbound, PeerEvents, PumpConfig};
use shared::{ClientSlot, Player, UPDATE_INTERVAL};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

/// Input to the client runtime from its pumps
#[derive(Debug, PartialEq, Eq)]
pub enum ClientEvent {
    Frame(Vec<u8>),
    Disconnected,
}

/// The single server connection
#[derive(Debug, Clone, Copy)]
pub struct ServerPeer;

impl PeerEvents for ServerPeer {
    type Event = ClientEvent;

    fn inbound(&self, frame: Vec<u8>) -> ClientEvent {
        ClientEvent::Frame(frame)
    }

    fn disconnected(&self) -> ClientEvent {
        ClientEvent::Disconnected
    }
}

pub struct ClientRuntime {
    mirror: ClientMirror,
    events: mpsc::Receiver<ClientEvent>,
    /// Dropped on disconnect, which closes the write pump
    outbound: Option<Outbound>,
    last_sent: Option<Instant>,
}

impl ClientRuntime {
    pub fn new(events: mpsc::Receiver<ClientEvent>, outbound: Outbound) -> Self {
        Self {
            mirror: ClientMirror::new(),
            events,
            outbound: Some(outbound),
            last_sent: None,
        }
    }

    /// Creates a runtime plus the pump-facing ends of its queues.
    pub fn channel(
        pump: &PumpConfig,
    ) -> (Self, mpsc::Sender<ClientEvent>, mpsc::Receiver<Vec<u8>>) {
        let (events_tx, events_rx) = mpsc::channel(pump.send_queue);
        let (outbound, queue) = Outbound::channel(pump.send_queue, pump.overflow);
        (Self::new(events_rx, outbound), events_tx, queue)
    }

    /// Drains pending server frames, then sends the local state if due.
    /// Never waits.
    pub fn tick(&mut self, now: Instant) {
        loop {
            match self.events.try_recv() {
                Ok(ClientEvent::Frame(data)) => self.handle_frame(&data, now),
                Ok(ClientEvent::Disconnected) => self.disconnect(),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.disconnect();
                    break;
                }
            }
        }

        self.send_update(now);
    }

    fn handle_frame(&mut self, data: &[u8], now: Instant) {
        match Frame::decode(data) {
            Ok(frame) => {
                if matches!(frame, Frame::ConnectResponse(_)) {
                    // First update goes out one interval after connecting
                    self.last_sent = Some(now);
                }
                self.mirror.apply(&frame);
            }
            Err(e) => warn!("Malformed frame from server: {}", e),
        }
    }

    fn disconnect(&mut self) {
        self.mirror.disconnect();
        self.outbound = None;
    }

    fn send_update(&mut self, now: Instant) {
        if !self.mirror.is_connected() {
            return;
        }
        let due = match self.last_sent {
            Some(last) => now.saturating_duration_since(last) > UPDATE_INTERVAL,
            None => true,
        };
        if !due {
            return;
        }

        let (Some(slot), Some(local), Some(outbound)) =
            (self.mirror.slot(), self.mirror.local(), self.outbound.as_ref())
        else {
            return;
        };

        self.last_sent = Some(now);
        if let Err(e) = outbound.send(local.to_update(slot).to_frame()) {
            debug!("Could not queue player update: {}", e);
        }
    }

    /// Sets the local player's input flags.
    pub fn set_input(&mut self, left_pressed: bool, right_pressed: bool) {
        self.mirror.set_input(left_pressed, right_pressed);
    }

    pub fn advance(&mut self) {
        self.mirror.advance();
    }

    pub fn players(&self) -> impl Iterator<Item = (Option<ClientSlot>, &Player)> + '_ {
        self.mirror.players()
    }

    pub fn is_connected(&self) -> bool {
        self.mirror.is_connected()
    }

    pub fn slot(&self) -> Option<ClientSlot> {
        self.mirror.slot()
    }

    pub fn mirror(&self) -> &ClientMirror {
        &self.mirror
    }
}
