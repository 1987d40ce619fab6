//! Single-threaded session hub owning membership and the authoritative world
//!
//! Connection tasks never touch server state directly. They push
//! [`HubEvent`]s into one ordered queue, and [`ServerRuntime::tick`] drains
//! whatever is queued once per host frame:
//! - `Register` admits the connection into the lowest free slot, spawns its
//!   player and replies with a `ConnectResponse`
//! - `Inbound` applies an `UpdatePlayer` from the client to its own player
//! - `Unregister` removes the client and tells everyone else it left
//!
//! After draining, every player whose state has not been broadcast for longer
//! than [`UPDATE_INTERVAL`] is fanned out to all other clients. With at most
//! 256 clients this is a plain O(n²) loop with no interest filtering.

use crate::client::{Client, ConnectionId, Session};
use crate::registry::{RegistryError, SlotRegistry};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::protocol::{ConnectResponse, DisconnectPlayer, Frame, Payload};
use shared::transport::{Outbound, PeerEvents, SendError};
use shared::{ClientSlot, Player, SPAWN_X, SPAWN_Y, UPDATE_INTERVAL};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::sync::mpsc;

/// Input to the hub from connection tasks
#[derive(Debug)]
pub enum HubEvent {
    Register {
        id: ConnectionId,
        addr: SocketAddr,
        outbound: Outbound,
    },
    Unregister {
        id: ConnectionId,
    },
    Inbound {
        id: ConnectionId,
        frame: Vec<u8>,
    },
}

/// Tags pump events with the connection they came from
#[derive(Debug, Clone, Copy)]
pub struct ConnectionPeer {
    pub id: ConnectionId,
}

impl PeerEvents for ConnectionPeer {
    type Event = HubEvent;

    fn inbound(&self, frame: Vec<u8>) -> HubEvent {
        HubEvent::Inbound { id: self.id, frame }
    }

    fn disconnected(&self) -> HubEvent {
        HubEvent::Unregister { id: self.id }
    }
}

/// Authoritative server state, driven by the host loop
pub struct ServerRuntime {
    registry: SlotRegistry,
    /// Registered clients indexed by slot
    clients: Vec<Option<Client>>,
    /// Membership: connection id to occupied slot
    members: HashMap<ConnectionId, ClientSlot>,
    events: mpsc::Receiver<HubEvent>,
    rng: StdRng,
}

impl ServerRuntime {
    pub fn new(max_clients: usize, events: mpsc::Receiver<HubEvent>) -> Self {
        let registry = SlotRegistry::new(max_clients);
        let mut clients = Vec::with_capacity(registry.capacity());
        clients.resize_with(registry.capacity(), || None);

        Self {
            registry,
            clients,
            members: HashMap::new(),
            events,
            rng: StdRng::from_entropy(),
        }
    }

    /// Creates a runtime together with the sender connection tasks use to reach it.
    pub fn channel(max_clients: usize, queue: usize) -> (Self, mpsc::Sender<HubEvent>) {
        let (tx, rx) = mpsc::channel(queue);
        (Self::new(max_clients, rx), tx)
    }

    /// Drains all queued events without waiting, then broadcasts due player states.
    pub fn tick(&mut self, now: Instant) {
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event);
        }
        self.broadcast_updates(now);
    }

    /// Runs one simulation step for every registered player.
    pub fn advance(&mut self) {
        for client in self.clients.iter_mut().flatten() {
            client.session.player.step();
        }
    }

    fn handle_event(&mut self, event: HubEvent) {
        match event {
            HubEvent::Register { id, addr, outbound } => {
                if let Err(e) = self.admit(id, addr, outbound) {
                    warn!("Rejecting connection from {}: {}", addr, e);
                }
            }
            HubEvent::Unregister { id } => self.teardown(vec![id]),
            HubEvent::Inbound { id, frame } => self.handle_frame(id, &frame),
        }
    }

    /// Assigns a slot, spawns the player and sends the connect response.
    fn admit(
        &mut self,
        id: ConnectionId,
        addr: SocketAddr,
        outbound: Outbound,
    ) -> Result<ClientSlot, RegistryError> {
        // On error the outbound queue is dropped here, which closes the connection
        let slot = self.registry.next_free()?;
        let player = Player::new(
            self.rng.gen_range(SPAWN_X) as f64,
            self.rng.gen_range(SPAWN_Y) as f64,
        );

        self.register_client(Client::new(id, slot, addr, outbound), Session::new(player))?;

        let response = ConnectResponse {
            slot: slot.to_wire(),
            x: player.x,
            y: player.y,
        };
        if let Some(client) = self.client(slot) {
            if let Err(e) = client.send(response.to_frame()) {
                debug!("Could not queue connect response for client {}: {}", slot, e);
            }
        }

        info!(
            "Client {} connected from {} at ({}, {})",
            slot, addr, player.x, player.y
        );
        Ok(slot)
    }

    /// Makes a client visible to broadcasts. The slot is marked occupied and
    /// the session payload attached. Fails without side effects if the
    /// connection is already registered or its slot is taken or out of range.
    pub fn register_client(
        &mut self,
        mut client: Client,
        session: Session,
    ) -> Result<ClientSlot, RegistryError> {
        let slot = client.slot;
        if self.members.contains_key(&client.id) {
            return Err(RegistryError::AlreadyRegistered(client.id));
        }
        if !self.registry.occupy(slot) {
            return Err(RegistryError::SlotUnavailable(slot));
        }
        client.session = session;
        self.members.insert(client.id, slot);
        self.clients[slot.index()] = Some(client);
        Ok(slot)
    }

    /// Removes a client, freeing its slot and closing its outbound queue.
    /// Returns false if the client was not registered.
    pub fn remove_client(&mut self, id: ConnectionId) -> bool {
        self.take_client(id).is_some()
    }

    fn take_client(&mut self, id: ConnectionId) -> Option<Client> {
        let slot = self.members.remove(&id)?;
        self.registry.release(slot);
        self.clients[slot.index()].take()
    }

    /// Removes the given clients and notifies the rest. Clients that overflow
    /// while being notified are queued for removal too.
    fn teardown(&mut self, mut pending: Vec<ConnectionId>) {
        while let Some(id) = pending.pop() {
            let Some(client) = self.take_client(id) else {
                continue;
            };
            info!("Client {} disconnected", client.slot);

            let frame = DisconnectPlayer {
                slot: client.slot.to_wire(),
            }
            .to_frame();
            drop(client);
            self.fan_out(None, &frame, &mut pending);
        }
    }

    fn handle_frame(&mut self, id: ConnectionId, data: &[u8]) {
        let Some(&slot) = self.members.get(&id) else {
            debug!("Dropping frame from unregistered connection {}", id);
            return;
        };

        match Frame::decode(data) {
            Ok(Frame::UpdatePlayer(update)) => {
                if let Some(client) = self.clients[slot.index()].as_mut() {
                    // The sender's own slot is authoritative, not the one in the payload
                    client.session.player.apply_update(&update);
                }
            }
            Ok(frame) => {
                warn!(
                    "Unhandled netmsg kind: {}, with data: {:?}",
                    frame.kind_name(),
                    &data[1..]
                );
            }
            Err(e) => warn!("Malformed frame from client {}: {}", slot, e),
        }
    }

    fn broadcast_updates(&mut self, now: Instant) {
        let mut due = Vec::new();
        for client in self.clients.iter_mut().flatten() {
            if client.session.is_due(now, UPDATE_INTERVAL) {
                client.session.last_broadcast = Some(now);
                due.push((client.slot, client.session.player.to_update(client.slot).to_frame()));
            }
        }

        let mut overflowed = Vec::new();
        for (slot, frame) in &due {
            self.fan_out(Some(*slot), frame, &mut overflowed);
        }

        if !overflowed.is_empty() {
            self.teardown(overflowed);
        }
    }

    /// Queues a frame for every registered client except `exclude`.
    fn fan_out(&self, exclude: Option<ClientSlot>, frame: &[u8], overflowed: &mut Vec<ConnectionId>) {
        for client in self.clients.iter().flatten() {
            if Some(client.slot) == exclude {
                continue;
            }
            match client.send(frame.to_vec()) {
                Ok(()) => {}
                Err(SendError::Full) => {
                    if !overflowed.contains(&client.id) {
                        warn!("Client {} is not keeping up, disconnecting", client.slot);
                        overflowed.push(client.id);
                    }
                }
                // Pumps already gone; their unregister event is on its way
                Err(SendError::Closed) => {}
            }
        }
    }

    pub fn client(&self, slot: ClientSlot) -> Option<&Client> {
        self.clients.get(slot.index()).and_then(Option::as_ref)
    }

    pub fn slot_of(&self, id: ConnectionId) -> Option<ClientSlot> {
        self.members.get(&id).copied()
    }

    pub fn player(&self, slot: ClientSlot) -> Option<&Player> {
        self.client(slot).map(|client| &client.session.player)
    }

    pub fn registry(&self) -> &SlotRegistry {
        &self.registry
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::protocol::UpdatePlayer;
    use shared::transport::OverflowPolicy;
    use shared::PLAYER_STEP;
    use std::time::Duration;
    use tokio::sync::mpsc::error::TryRecvError;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    fn connect(tx: &mpsc::Sender<HubEvent>, id: ConnectionId) -> mpsc::Receiver<Vec<u8>> {
        connect_with_queue(tx, id, 256)
    }

    fn connect_with_queue(
        tx: &mpsc::Sender<HubEvent>,
        id: ConnectionId,
        capacity: usize,
    ) -> mpsc::Receiver<Vec<u8>> {
        let (outbound, rx) = Outbound::channel(capacity, OverflowPolicy::Disconnect);
        tx.try_send(HubEvent::Register {
            id,
            addr: test_addr(),
            outbound,
        })
        .unwrap();
        rx
    }

    fn drain(rx: &mut mpsc::Receiver<Vec<u8>>) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(data) = rx.try_recv() {
            frames.push(Frame::decode(&data).unwrap());
        }
        frames
    }

    fn connect_slot(frames: &[Frame]) -> Option<i32> {
        frames.iter().find_map(|frame| match frame {
            Frame::ConnectResponse(msg) => Some(msg.slot),
            _ => None,
        })
    }

    fn updates(frames: &[Frame]) -> Vec<UpdatePlayer> {
        frames
            .iter()
            .filter_map(|frame| match frame {
                Frame::UpdatePlayer(msg) => Some(*msg),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_register_sends_connect_response_with_spawn() {
        let (mut runtime, tx) = ServerRuntime::channel(8, 64);
        let mut rx = connect(&tx, 1);
        runtime.tick(Instant::now());

        let frames = drain(&mut rx);
        match frames.first() {
            Some(Frame::ConnectResponse(msg)) => {
                assert_eq!(msg.slot, 0);
                assert!((130.0..220.0).contains(&msg.x));
                assert!((10.0..40.0).contains(&msg.y));
                assert_eq!(msg.x.fract(), 0.0);
            }
            other => panic!("Expected connect response, got {:?}", other),
        }
        assert_eq!(runtime.len(), 1);
        assert_eq!(runtime.slot_of(1), Some(ClientSlot(0)));
        assert!(runtime.registry().is_occupied(ClientSlot(0)));
    }

    #[test]
    fn test_capacity_admits_exactly_n() {
        let capacity = 3;
        let (mut runtime, tx) = ServerRuntime::channel(capacity, 64);
        let mut queues: Vec<_> = (0..=capacity as u64).map(|id| connect(&tx, id)).collect();
        runtime.tick(Instant::now());

        let mut slots = Vec::new();
        let mut rejected = 0;
        for rx in queues.iter_mut() {
            let frames = drain(rx);
            match connect_slot(&frames) {
                Some(slot) => slots.push(slot),
                None => {
                    assert_eq!(rx.try_recv(), Err(TryRecvError::Disconnected));
                    rejected += 1;
                }
            }
        }

        slots.sort();
        assert_eq!(slots, vec![0, 1, 2]);
        assert_eq!(rejected, 1);
        assert_eq!(runtime.len(), capacity);
    }

    fn handle(id: ConnectionId, slot: ClientSlot) -> (Client, mpsc::Receiver<Vec<u8>>) {
        let (outbound, rx) = Outbound::channel(8, OverflowPolicy::Disconnect);
        (Client::new(id, slot, test_addr(), outbound), rx)
    }

    #[test]
    fn test_register_client_rejects_occupied_slot() {
        let (mut runtime, _tx) = ServerRuntime::channel(4, 8);
        let (first, _first_rx) = handle(1, ClientSlot(0));
        let (second, mut second_rx) = handle(2, ClientSlot(0));

        assert_eq!(runtime.register_client(first, Session::default()), Ok(ClientSlot(0)));
        assert_eq!(
            runtime.register_client(second, Session::default()),
            Err(RegistryError::SlotUnavailable(ClientSlot(0)))
        );
        // The rejected handle was dropped, closing its queue
        assert_eq!(second_rx.try_recv(), Err(TryRecvError::Disconnected));

        assert_eq!(runtime.len(), 1);
        assert_eq!(runtime.slot_of(2), None);
        assert_eq!(runtime.client(ClientSlot(0)).map(|client| client.id), Some(1));

        assert!(runtime.remove_client(1));
        assert!(!runtime.registry().is_occupied(ClientSlot(0)));
        assert!(runtime.is_empty());
    }

    #[test]
    fn test_register_client_rejects_out_of_range_slot() {
        let (mut runtime, _tx) = ServerRuntime::channel(2, 8);
        let (client, _rx) = handle(1, ClientSlot(5));

        assert_eq!(
            runtime.register_client(client, Session::default()),
            Err(RegistryError::SlotUnavailable(ClientSlot(5)))
        );
        assert!(runtime.is_empty());
        assert_eq!(runtime.registry().occupied(), 0);
    }

    #[test]
    fn test_register_client_rejects_duplicate_connection() {
        let (mut runtime, _tx) = ServerRuntime::channel(4, 8);
        let (first, _first_rx) = handle(7, ClientSlot(0));
        let (again, _again_rx) = handle(7, ClientSlot(1));

        assert!(runtime.register_client(first, Session::default()).is_ok());
        assert_eq!(
            runtime.register_client(again, Session::default()),
            Err(RegistryError::AlreadyRegistered(7))
        );
        assert!(!runtime.registry().is_occupied(ClientSlot(1)));
        assert_eq!(runtime.slot_of(7), Some(ClientSlot(0)));
    }

    #[test]
    fn test_remove_client_twice() {
        let (mut runtime, tx) = ServerRuntime::channel(8, 64);
        let mut rx = connect(&tx, 1);
        runtime.tick(Instant::now());
        drain(&mut rx);

        assert!(runtime.remove_client(1));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Disconnected));
        assert!(!runtime.registry().is_occupied(ClientSlot(0)));

        assert!(!runtime.remove_client(1));
        assert!(runtime.is_empty());
        assert_eq!(runtime.registry().occupied(), 0);
    }

    #[test]
    fn test_disconnect_fans_out_to_remaining_clients() {
        let (mut runtime, tx) = ServerRuntime::channel(8, 64);
        let mut a = connect(&tx, 10);
        let mut b = connect(&tx, 11);
        let mut c = connect(&tx, 12);
        let now = Instant::now();
        runtime.tick(now);
        drain(&mut a);
        drain(&mut b);
        drain(&mut c);

        let b_slot = runtime.slot_of(11).unwrap();
        tx.try_send(HubEvent::Unregister { id: 11 }).unwrap();
        // A duplicate signal from the second pump must be harmless
        tx.try_send(HubEvent::Unregister { id: 11 }).unwrap();
        runtime.tick(now + Duration::from_millis(1));

        for rx in [&mut a, &mut c] {
            let disconnects: Vec<_> = drain(rx)
                .into_iter()
                .filter(|frame| matches!(frame, Frame::DisconnectPlayer(_)))
                .collect();
            assert_eq!(
                disconnects,
                vec![Frame::DisconnectPlayer(DisconnectPlayer {
                    slot: b_slot.to_wire()
                })]
            );
        }
        assert_eq!(b.try_recv(), Err(TryRecvError::Disconnected));

        let mut d = connect(&tx, 13);
        runtime.tick(now + Duration::from_millis(2));
        assert_eq!(connect_slot(&drain(&mut d)), Some(b_slot.to_wire()));
    }

    #[test]
    fn test_updates_are_throttled() {
        let (mut runtime, tx) = ServerRuntime::channel(8, 64);
        let mut a = connect(&tx, 1);
        let mut b = connect(&tx, 2);
        let start = Instant::now();
        runtime.tick(start);
        drain(&mut a);
        drain(&mut b);

        // The first tick already broadcast both players; 10ms later nothing is due
        runtime.tick(start + Duration::from_millis(10));
        assert!(updates(&drain(&mut a)).is_empty());
        assert!(updates(&drain(&mut b)).is_empty());

        runtime.tick(start + Duration::from_millis(16));
        assert_eq!(updates(&drain(&mut a)).len(), 1);
        assert_eq!(updates(&drain(&mut b)).len(), 1);

        runtime.tick(start + Duration::from_millis(32));
        let to_a = updates(&drain(&mut a));
        assert_eq!(to_a.len(), 1);
        assert_eq!(to_a[0].slot, 1);
    }

    #[test]
    fn test_first_tick_broadcasts_to_others_only() {
        let (mut runtime, tx) = ServerRuntime::channel(8, 64);
        let mut a = connect(&tx, 1);
        let mut b = connect(&tx, 2);
        runtime.tick(Instant::now());

        let to_a = updates(&drain(&mut a));
        let to_b = updates(&drain(&mut b));
        assert_eq!(to_a.len(), 1);
        assert_eq!(to_a[0].slot, 1);
        assert_eq!(to_b.len(), 1);
        assert_eq!(to_b[0].slot, 0);
    }

    #[test]
    fn test_update_player_moves_entity_and_fans_out() {
        let (mut runtime, tx) = ServerRuntime::channel(8, 64);
        let mut a = connect(&tx, 1);
        let mut b = connect(&tx, 2);
        let start = Instant::now();
        runtime.tick(start);
        drain(&mut a);
        drain(&mut b);

        let update = UpdatePlayer {
            slot: 0,
            x: 150.0,
            y: 20.0,
            left_pressed: true,
            right_pressed: false,
        };
        tx.try_send(HubEvent::Inbound {
            id: 1,
            frame: update.to_frame(),
        })
        .unwrap();
        runtime.tick(start + Duration::from_millis(5));
        runtime.advance();

        let player = runtime.player(ClientSlot(0)).unwrap();
        assert_approx_eq!(player.x, 150.0 - PLAYER_STEP);
        assert!(player.left_pressed);

        runtime.tick(start + Duration::from_millis(20));
        let to_b = updates(&drain(&mut b));
        assert_eq!(to_b.len(), 1);
        assert_eq!(to_b[0].slot, 0);
        assert_approx_eq!(to_b[0].x, 147.0);
        assert!(to_b[0].left_pressed);
        assert!(updates(&drain(&mut a)).iter().all(|msg| msg.slot != 0));
    }

    #[test]
    fn test_update_slot_in_payload_is_ignored() {
        let (mut runtime, tx) = ServerRuntime::channel(8, 64);
        let _a = connect(&tx, 1);
        let _b = connect(&tx, 2);
        runtime.tick(Instant::now());
        let b_before = *runtime.player(ClientSlot(1)).unwrap();

        let spoofed = UpdatePlayer {
            slot: 1,
            x: 999.0,
            ..Default::default()
        };
        tx.try_send(HubEvent::Inbound {
            id: 1,
            frame: spoofed.to_frame(),
        })
        .unwrap();
        runtime.tick(Instant::now());

        assert_approx_eq!(runtime.player(ClientSlot(0)).unwrap().x, 999.0);
        assert_eq!(*runtime.player(ClientSlot(1)).unwrap(), b_before);
    }

    #[test]
    fn test_unknown_and_malformed_frames_keep_connection() {
        let (mut runtime, tx) = ServerRuntime::channel(8, 64);
        let mut rx = connect(&tx, 1);
        runtime.tick(Instant::now());
        drain(&mut rx);

        for frame in [vec![99, 1, 2, 3], vec![2, 0x11, 0x00], vec![1, 0x08, 4], vec![]] {
            tx.try_send(HubEvent::Inbound { id: 1, frame }).unwrap();
        }
        let update = UpdatePlayer {
            slot: 0,
            x: 170.0,
            y: 15.0,
            left_pressed: false,
            right_pressed: true,
        };
        tx.try_send(HubEvent::Inbound {
            id: 1,
            frame: update.to_frame(),
        })
        .unwrap();
        runtime.tick(Instant::now());

        assert_eq!(runtime.len(), 1);
        let player = runtime.player(ClientSlot(0)).unwrap();
        assert_approx_eq!(player.x, 170.0);
        assert!(player.right_pressed);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_frames_from_unknown_connection_are_dropped() {
        let (mut runtime, tx) = ServerRuntime::channel(8, 64);
        tx.try_send(HubEvent::Inbound {
            id: 42,
            frame: UpdatePlayer::default().to_frame(),
        })
        .unwrap();
        tx.try_send(HubEvent::Unregister { id: 42 }).unwrap();
        runtime.tick(Instant::now());
        assert!(runtime.is_empty());
    }

    #[test]
    fn test_slow_client_is_disconnected() {
        let (mut runtime, tx) = ServerRuntime::channel(8, 64);
        let mut fast = connect(&tx, 1);
        // Room for the connect response only
        let mut slow = connect_with_queue(&tx, 2, 1);
        runtime.tick(Instant::now());

        assert_eq!(runtime.len(), 1);
        assert_eq!(runtime.slot_of(2), None);

        let frames = drain(&mut fast);
        assert!(frames.contains(&Frame::DisconnectPlayer(DisconnectPlayer { slot: 1 })));

        assert!(matches!(drain(&mut slow).first(), Some(Frame::ConnectResponse(_))));
        assert_eq!(slow.try_recv(), Err(TryRecvError::Disconnected));
    }

    #[test]
    fn test_advance_moves_pressed_players_only() {
        let (mut runtime, tx) = ServerRuntime::channel(8, 64);
        let _a = connect(&tx, 1);
        let _b = connect(&tx, 2);
        runtime.tick(Instant::now());

        let a_before = *runtime.player(ClientSlot(0)).unwrap();
        let b_before = *runtime.player(ClientSlot(1)).unwrap();
        tx.try_send(HubEvent::Inbound {
            id: 2,
            frame: UpdatePlayer {
                slot: 1,
                x: b_before.x,
                y: b_before.y,
                left_pressed: false,
                right_pressed: true,
            }
            .to_frame(),
        })
        .unwrap();
        runtime.tick(Instant::now());
        runtime.advance();

        assert_eq!(*runtime.player(ClientSlot(0)).unwrap(), a_before);
        assert_approx_eq!(runtime.player(ClientSlot(1)).unwrap().x, b_before.x + PLAYER_STEP);
    }
}
