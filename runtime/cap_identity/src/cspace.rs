//! Capability Space
//!
//! Per-domain table mapping small integer ids (`CapId`) to identity
//! references.
//!
//! # Architecture
//! - [`CapIdAllocator`]: bump-pointer allocator with a free list, bounded by
//!   the id range configured for the kernel
//! - [`CapIndex`]: ordered index from `CapId` to the reference record, walked
//!   on every incoming invocation
//!
//! Quota enforcement (one capability slot per allocated id) is done by the
//! owning [`crate::Pd`], which wraps both.

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec::Vec;

use crate::{CapId, ReferenceId};

/// Capability id allocator
pub struct CapIdAllocator {
    /// Next never-used id
    next_id: CapId,
    /// One past the highest id this allocator may hand out
    max_id: CapId,
    /// Free list of released ids
    free_ids: Vec<CapId>,
    /// Ids currently handed out
    outstanding: BTreeSet<CapId>,
}

impl CapIdAllocator {
    /// Create an allocator for ids in `first_id..max_id`
    pub fn new(first_id: CapId, max_id: CapId) -> Self {
        Self {
            next_id: first_id,
            max_id,
            free_ids: Vec::new(),
            outstanding: BTreeSet::new(),
        }
    }

    /// Allocate an id, reusing a released one first
    ///
    /// Returns `None` once the id range is exhausted.
    pub fn allocate(&mut self) -> Option<CapId> {
        let id = match self.free_ids.pop() {
            Some(id) => id,
            None => {
                if self.next_id >= self.max_id {
                    return None;
                }
                let id = self.next_id;
                self.next_id += 1;
                id
            }
        };

        self.outstanding.insert(id);
        Some(id)
    }

    /// Release an id
    ///
    /// Returns `false` if the id was not handed out by this allocator.
    pub fn free(&mut self, id: CapId) -> bool {
        if !self.outstanding.remove(&id) {
            return false;
        }
        self.free_ids.push(id);
        true
    }

    /// True if `id` is currently handed out
    pub fn is_allocated(&self, id: CapId) -> bool {
        self.outstanding.contains(&id)
    }

    /// Number of ids currently handed out
    pub fn allocated(&self) -> usize {
        self.outstanding.len()
    }
}

/// Ordered index of the references owned by one domain
#[derive(Default)]
pub struct CapIndex {
    entries: BTreeMap<CapId, ReferenceId>,
}

impl CapIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Find the reference bound to `id`
    #[inline]
    pub fn find(&self, id: CapId) -> Option<ReferenceId> {
        self.entries.get(&id).copied()
    }

    /// Bind `id` to a reference
    ///
    /// Returns `false` without touching the index if `id` is already bound.
    pub fn insert(&mut self, id: CapId, reference: ReferenceId) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(id, reference);
        true
    }

    /// Unbind `id`
    pub fn remove(&mut self, id: CapId) -> Option<ReferenceId> {
        self.entries.remove(&id)
    }

    /// Number of bound ids
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no id is bound
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bound ids in ascending order
    pub fn ids(&self) -> impl Iterator<Item = CapId> + '_ {
        self.entries.keys().copied()
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (CapId, ReferenceId)> + '_ {
        self.entries.iter().map(|(id, reference)| (*id, *reference))
    }
}
