//! Residency table: which image lives in which slot, and how recently.
//!
//! The table keeps two maps that are mutual inverses over resident entries
//! (`id -> slot` and `slot -> id`) plus a recency clock per slot. Clocks are
//! logical: construction time is 0 and every stamp takes the next value of a
//! counter, so ordering is total and deterministic.
//!
//! The table is not synchronized itself; the cache owns it behind a single
//! mutex.

use crate::arena::SlotIndex;
use crate::ImageId;

/// Logical timestamp
pub type Clock = u64;

/// Clock value of slots that have never been used (or were freed)
pub const INITIAL_CLOCK: Clock = 0;

/// Bidirectional id/slot mapping with per-slot recency clocks
#[derive(Debug, Clone)]
pub struct ResidencyTable {
    id_to_slot: Vec<Option<SlotIndex>>,
    slot_to_id: Vec<Option<ImageId>>,
    slot_clock: Vec<Clock>,
    now: Clock,
}

impl ResidencyTable {
    /// Create an empty table for `view_count` ids and `slot_count` slots
    pub fn new(view_count: usize, slot_count: usize) -> Self {
        Self {
            id_to_slot: vec![None; view_count],
            slot_to_id: vec![None; slot_count],
            slot_clock: vec![INITIAL_CLOCK; slot_count],
            now: INITIAL_CLOCK,
        }
    }

    /// Number of ids the table can map
    pub fn view_count(&self) -> usize {
        self.id_to_slot.len()
    }

    /// Number of slots
    pub fn slot_count(&self) -> usize {
        self.slot_to_id.len()
    }

    /// Slot currently holding `id`
    pub fn lookup(&self, id: ImageId) -> Option<SlotIndex> {
        self.id_to_slot.get(id).copied().flatten()
    }

    /// Id currently held by `slot`
    pub fn occupant(&self, slot: SlotIndex) -> Option<ImageId> {
        self.slot_to_id[slot]
    }

    /// Recency clock of `slot`
    pub fn clock(&self, slot: SlotIndex) -> Clock {
        self.slot_clock[slot]
    }

    /// All slot clocks, indexed by slot
    pub fn clocks(&self) -> &[Clock] {
        &self.slot_clock
    }

    /// Bind `id` to `slot` and stamp the slot
    ///
    /// Any id previously held by `slot` loses its mapping, and any slot
    /// previously holding `id` is released, before the new pair is
    /// installed. Returns the displaced id, if any.
    pub fn bind(&mut self, id: ImageId, slot: SlotIndex) -> Option<ImageId> {
        let displaced = self.slot_to_id[slot].take();
        if let Some(old_id) = displaced {
            self.id_to_slot[old_id] = None;
        }

        if let Some(old_slot) = self.id_to_slot[id].take() {
            self.slot_to_id[old_slot] = None;
        }

        self.id_to_slot[id] = Some(slot);
        self.slot_to_id[slot] = Some(id);
        self.touch(slot);

        displaced.filter(|&old_id| old_id != id)
    }

    /// Stamp `slot` as most recently used without changing bindings
    pub fn touch(&mut self, slot: SlotIndex) {
        self.now += 1;
        self.slot_clock[slot] = self.now;
    }

    /// Release `slot`, clearing both directions of its mapping
    ///
    /// The slot's clock is reset so it becomes the preferred next victim.
    /// Returns the id that was bound, if any.
    pub fn unbind(&mut self, slot: SlotIndex) -> Option<ImageId> {
        let id = self.slot_to_id[slot].take();
        if let Some(id) = id {
            self.id_to_slot[id] = None;
        }
        self.slot_clock[slot] = INITIAL_CLOCK;
        id
    }

    /// Number of resident ids
    pub fn resident_count(&self) -> usize {
        self.slot_to_id.iter().filter(|id| id.is_some()).count()
    }

    /// Resident ids in slot order
    pub fn resident_ids(&self) -> Vec<ImageId> {
        self.slot_to_id.iter().flatten().copied().collect()
    }

    /// Verify that the two maps are mutual inverses
    ///
    /// Returns a description of the first violation found.
    pub fn check_invariants(&self) -> Result<(), String> {
        for (slot, id) in self.slot_to_id.iter().enumerate() {
            if let Some(id) = *id {
                if self.id_to_slot.get(id).copied().flatten() != Some(slot) {
                    return Err(format!("slot {slot} holds id {id} but id maps elsewhere"));
                }
            }
        }
        for (id, slot) in self.id_to_slot.iter().enumerate() {
            if let Some(slot) = *slot {
                if self.slot_to_id.get(slot).copied().flatten() != Some(id) {
                    return Err(format!("id {id} maps to slot {slot} but slot holds another id"));
                }
            }
        }
        Ok(())
    }
}
