//! Bidirectional item <-> slot table.
//!
//! Slot 0 is reserved for fallthrough lookups and is never assigned to an
//! explicit item, so a fresh table starts with `num_items == 1`.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{EmbeddingError, Result};
use crate::item::EmbeddingItem;

/// Row index into the embedding matrix.
pub type Slot = u32;

/// The slot reserved for fallthrough lookups.
pub const RESERVED_SLOT: Slot = 0;

/// Largest slot the persisted format can address (slots are written as `i32`).
pub const MAX_SLOT: Slot = i32::MAX as Slot;

#[derive(Debug, Clone)]
struct Slots<T> {
    forward: HashMap<T, Slot>,
    backward: HashMap<Slot, T>,
    /// Assigned slots, including the reserved one.
    num_items: usize,
}

/// Item <-> slot mapping safe to share between threads.
///
/// Both directions live behind one lock so an insert is never observed half
/// applied.
#[derive(Debug)]
pub struct ItemIndex<T> {
    slots: RwLock<Slots<T>>,
}

impl<T: EmbeddingItem> ItemIndex<T> {
    /// An empty table holding only the reserved slot.
    pub fn new() -> Self {
        Self::from_slots(Slots { forward: HashMap::new(), backward: HashMap::new(), num_items: 1 })
    }

    /// Assign slots `1..=items.len()` in order. Duplicates keep their first slot.
    pub fn with_items(items: impl IntoIterator<Item = T>) -> Result<Self> {
        let index = Self::new();
        for item in items {
            if index.contains(&item) {
                tracing::warn!(?item, "duplicate item skipped while building index");
                continue;
            }
            index.insert(item)?;
        }
        Ok(index)
    }

    /// Rebuild a table from persisted `(item, slot)` pairs.
    ///
    /// Every slot must fall in `[1, num_items)` and neither slots nor items may
    /// repeat.
    pub fn from_entries(
        entries: impl IntoIterator<Item = (T, Slot)>,
        num_items: usize,
    ) -> Result<Self> {
        if num_items == 0 {
            return Err(EmbeddingError::malformed("table must hold at least the reserved slot"));
        }
        let mut forward = HashMap::new();
        let mut backward = HashMap::new();
        for (item, slot) in entries {
            if slot == RESERVED_SLOT || slot as usize >= num_items {
                return Err(EmbeddingError::malformed(format!(
                    "slot {slot} for {item:?} is outside 1..{num_items}"
                )));
            }
            if backward.contains_key(&slot) {
                return Err(EmbeddingError::malformed(format!("slot {slot} assigned twice")));
            }
            if forward.contains_key(&item) {
                return Err(EmbeddingError::malformed(format!("item {item:?} assigned twice")));
            }
            forward.insert(item.clone(), slot);
            backward.insert(slot, item);
        }
        Ok(Self::from_slots(Slots { forward, backward, num_items }))
    }

    fn from_slots(slots: Slots<T>) -> Self {
        Self { slots: RwLock::new(slots) }
    }

    // Recover from poisoned locks: writers never leave the maps half updated.
    fn read(&self) -> RwLockReadGuard<'_, Slots<T>> {
        self.slots.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Slots<T>> {
        self.slots.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Assign the next free slot to `item`, or return the slot it already has.
    pub fn insert(&self, item: T) -> Result<Slot> {
        let mut slots = self.write();
        if let Some(&slot) = slots.forward.get(&item) {
            return Ok(slot);
        }
        let slot = Slot::try_from(slots.num_items)
            .ok()
            .filter(|&s| s <= MAX_SLOT)
            .ok_or(EmbeddingError::SlotsExhausted(slots.num_items))?;
        slots.forward.insert(item.clone(), slot);
        slots.backward.insert(slot, item);
        slots.num_items += 1;
        Ok(slot)
    }

    pub fn lookup_forward(&self, item: &T) -> Option<Slot> {
        self.read().forward.get(item).copied()
    }

    /// The item at `slot`. Always `None` for the reserved slot.
    pub fn lookup_backward(&self, slot: Slot) -> Option<T> {
        if slot == RESERVED_SLOT {
            return None;
        }
        self.read().backward.get(&slot).cloned()
    }

    pub fn contains(&self, item: &T) -> bool {
        self.read().forward.contains_key(item)
    }

    /// Number of slots, counting the reserved one.
    pub fn num_items(&self) -> usize {
        self.read().num_items
    }

    /// Number of explicit items.
    pub fn len(&self) -> usize {
        self.read().forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Explicit `(item, slot)` pairs ordered by slot.
    pub fn entries(&self) -> Vec<(T, Slot)> {
        let slots = self.read();
        let mut entries: Vec<_> = slots.forward.iter().map(|(i, &s)| (i.clone(), s)).collect();
        entries.sort_unstable_by_key(|&(_, s)| s);
        entries
    }
}

impl<T: EmbeddingItem> Default for ItemIndex<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: EmbeddingItem> Clone for ItemIndex<T> {
    fn clone(&self) -> Self {
        Self::from_slots(self.read().clone())
    }
}
