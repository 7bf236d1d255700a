//! Generational Arena
//!
//! Backing store for every record in the identity graph (domains, objects,
//! identities, references) and for session records in the session layer.
//!
//! ## Design
//!
//! Records are addressed by an [`Index`] made of a slot number and the slot's
//! generation at insertion time. Removing a record bumps the slot generation,
//! so every index handed out for the old record stops resolving. This replaces
//! intrusive back-pointers: a stale index is detected by lookup, there is no
//! unlink step that could be forgotten.

use alloc::vec::Vec;

/// Generational index into an [`Arena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Index {
    slot: usize,
    generation: u32,
}

impl Index {
    /// Slot number (reused across generations)
    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Generation of the slot when this index was issued
    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

struct Entry<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot arena with generation-checked access
pub struct Arena<T> {
    entries: Vec<Entry<T>>,
    free_slots: Vec<usize>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Create an empty arena
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            free_slots: Vec::new(),
            len: 0,
        }
    }

    /// Number of live records
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if no record is live
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert a record, reusing a vacated slot when one exists
    pub fn insert(&mut self, value: T) -> Index {
        self.len += 1;

        if let Some(slot) = self.free_slots.pop() {
            if let Some(entry) = self.entries.get_mut(slot) {
                entry.value = Some(value);
                return Index {
                    slot,
                    generation: entry.generation,
                };
            }
        }

        // Slot numbers are entry positions, so they never wrap or alias
        let slot = self.entries.len();
        self.entries.push(Entry {
            generation: 0,
            value: Some(value),
        });
        Index {
            slot,
            generation: 0,
        }
    }

    /// Look up a live record
    pub fn get(&self, index: Index) -> Option<&T> {
        self.entries
            .get(index.slot)
            .filter(|entry| entry.generation == index.generation)
            .and_then(|entry| entry.value.as_ref())
    }

    /// Look up a live record mutably
    pub fn get_mut(&mut self, index: Index) -> Option<&mut T> {
        self.entries
            .get_mut(index.slot)
            .filter(|entry| entry.generation == index.generation)
            .and_then(|entry| entry.value.as_mut())
    }

    /// True if `index` still names a live record
    #[inline]
    pub fn contains(&self, index: Index) -> bool {
        self.get(index).is_some()
    }

    /// Remove a record and retire its index
    ///
    /// Returns `None` if the index is already stale.
    pub fn remove(&mut self, index: Index) -> Option<T> {
        let entry = self.entries.get_mut(index.slot)?;
        if entry.generation != index.generation {
            return None;
        }

        let value = entry.value.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free_slots.push(index.slot);
        self.len -= 1;
        Some(value)
    }

    /// Iterate over live records
    pub fn iter(&self) -> impl Iterator<Item = (Index, &T)> {
        self.entries.iter().enumerate().filter_map(|(slot, entry)| {
            entry.value.as_ref().map(|value| {
                (
                    Index {
                        slot,
                        generation: entry.generation,
                    },
                    value,
                )
            })
        })
    }

    /// Iterate mutably over live records
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Index, &mut T)> {
        self.entries
            .iter_mut()
            .enumerate()
            .filter_map(|(slot, entry)| {
                let generation = entry.generation;
                entry.value.as_mut().map(|value| {
                    (
                        Index {
                            slot,
                            generation,
                        },
                        value,
                    )
                })
            })
    }

    /// Indices of all live records
    pub fn indices(&self) -> Vec<Index> {
        self.iter().map(|(index, _)| index).collect()
    }
}
