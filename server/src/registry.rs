//! Fixed-capacity client slot allocation
//!
//! Every admitted connection occupies one slot in `[0, capacity)`. The lowest
//! free slot is handed out first and a slot becomes available again the moment
//! its connection is removed. The registry is owned by the session hub and is
//! never touched from any other task.

use shared::{ClientSlot, MAX_CLIENTS};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no more free client slots")]
    CapacityExceeded,
    #[error("slot {0} is occupied or out of range")]
    SlotUnavailable(ClientSlot),
    #[error("connection {0} is already registered")]
    AlreadyRegistered(u64),
}

/// Occupancy bitmap over the client slots
#[derive(Debug, Clone)]
pub struct SlotRegistry {
    slots: Vec<bool>,
}

impl SlotRegistry {
    /// Creates a registry with `capacity` slots, capped at [`MAX_CLIENTS`].
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![false; capacity.min(MAX_CLIENTS)],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Lowest slot not currently in use.
    pub fn next_free(&self) -> Result<ClientSlot, RegistryError> {
        self.slots
            .iter()
            .position(|occupied| !occupied)
            .map(|index| ClientSlot(index as u8))
            .ok_or(RegistryError::CapacityExceeded)
    }

    /// Marks a slot as in use. Returns false if it already was.
    pub fn occupy(&mut self, slot: ClientSlot) -> bool {
        match self.slots.get_mut(slot.index()) {
            Some(occupied) if !*occupied => {
                *occupied = true;
                true
            }
            _ => false,
        }
    }

    /// Finds and occupies the lowest free slot.
    pub fn allocate(&mut self) -> Result<ClientSlot, RegistryError> {
        let slot = self.next_free()?;
        self.occupy(slot);
        Ok(slot)
    }

    /// Frees a slot. Returns false if it was not occupied.
    pub fn release(&mut self, slot: ClientSlot) -> bool {
        match self.slots.get_mut(slot.index()) {
            Some(occupied) if *occupied => {
                *occupied = false;
                true
            }
            _ => false,
        }
    }

    pub fn is_occupied(&self, slot: ClientSlot) -> bool {
        self.slots.get(slot.index()).copied().unwrap_or(false)
    }

    /// Number of slots in use.
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|occupied| **occupied).count()
    }
}

impl Default for SlotRegistry {
    fn default() -> Self {
        Self::new(MAX_CLIENTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_creation() {
        let registry = SlotRegistry::new(5);
        assert_eq!(registry.capacity(), 5);
        assert_eq!(registry.occupied(), 0);
    }

    #[test]
    fn test_capacity_is_capped() {
        let registry = SlotRegistry::new(10_000);
        assert_eq!(registry.capacity(), MAX_CLIENTS);
        assert_eq!(SlotRegistry::default().capacity(), MAX_CLIENTS);
    }

    #[test]
    fn test_allocates_lowest_free_slot() {
        let mut registry = SlotRegistry::new(4);
        assert_eq!(registry.allocate(), Ok(ClientSlot(0)));
        assert_eq!(registry.allocate(), Ok(ClientSlot(1)));
        assert_eq!(registry.allocate(), Ok(ClientSlot(2)));

        assert!(registry.release(ClientSlot(1)));
        assert_eq!(registry.allocate(), Ok(ClientSlot(1)));
        assert_eq!(registry.allocate(), Ok(ClientSlot(3)));
    }

    #[test]
    fn test_capacity_exceeded() {
        for capacity in [1, 3, 16, MAX_CLIENTS] {
            let mut registry = SlotRegistry::new(capacity);
            let mut slots = Vec::new();
            for _ in 0..capacity {
                slots.push(registry.allocate().unwrap());
            }
            assert_eq!(registry.allocate(), Err(RegistryError::CapacityExceeded));

            slots.sort();
            slots.dedup();
            assert_eq!(slots.len(), capacity);
            assert_eq!(registry.occupied(), capacity);
        }
    }

    #[test]
    fn test_boundary_slot_255() {
        let mut registry = SlotRegistry::default();
        for _ in 0..255 {
            registry.allocate().unwrap();
        }
        assert_eq!(registry.allocate(), Ok(ClientSlot(255)));
        assert!(registry.is_occupied(ClientSlot(255)));
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut registry = SlotRegistry::new(2);
        let slot = registry.allocate().unwrap();
        assert!(registry.release(slot));
        assert!(!registry.release(slot));
        assert!(!registry.is_occupied(slot));
    }

    #[test]
    fn test_occupy_twice() {
        let mut registry = SlotRegistry::new(2);
        assert!(registry.occupy(ClientSlot(1)));
        assert!(!registry.occupy(ClientSlot(1)));
        assert_eq!(registry.next_free(), Ok(ClientSlot(0)));
    }

    #[test]
    fn test_out_of_range_slot() {
        let mut registry = SlotRegistry::new(2);
        assert!(!registry.occupy(ClientSlot(7)));
        assert!(!registry.release(ClientSlot(7)));
        assert!(!registry.is_occupied(ClientSlot(7)));
    }
}
