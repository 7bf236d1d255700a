//! Protection Domains
//!
//! A [`Pd`] owns a capability-id allocator, the ordered index of the references
//! it holds, and its two quota accounts. Allocating an id consumes one
//! capability slot from the domain's cap account; this is where the
//! capability-slot quota is enforced.

use alloc::string::String;

use crate::config::{DomainConfig, KernelConfig};
use crate::cspace::{CapIdAllocator, CapIndex};
use crate::quota::{DomainQuota, Resource};
use crate::CapId;

/// Protection domain
pub struct Pd {
    label: String,
    ids: CapIdAllocator,
    index: CapIndex,
    quota: DomainQuota,
}

impl Pd {
    pub(crate) fn new(kernel: &KernelConfig, config: DomainConfig) -> Self {
        Self {
            label: config.label,
            ids: CapIdAllocator::new(kernel.first_cap_id, kernel.max_cap_ids),
            index: CapIndex::new(),
            quota: DomainQuota::new(config.ram_quota, config.cap_quota),
        }
    }

    /// Domain label
    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Quota accounts
    #[inline]
    pub fn quota(&self) -> &DomainQuota {
        &self.quota
    }

    pub(crate) fn quota_mut(&mut self) -> &mut DomainQuota {
        &mut self.quota
    }

    /// Reference index
    #[inline]
    pub fn index(&self) -> &CapIndex {
        &self.index
    }

    pub(crate) fn index_mut(&mut self) -> &mut CapIndex {
        &mut self.index
    }

    /// Allocate a capability id, charging one capability slot
    ///
    /// Returns `None` if the cap quota or the id range is exhausted.
    pub(crate) fn allocate_id(&mut self) -> Option<CapId> {
        self.quota.caps.withdraw(Resource::Caps, 1).ok()?;

        match self.ids.allocate() {
            Some(id) => Some(id),
            None => {
                self.quota.caps.replenish(1);
                None
            }
        }
    }

    /// Return an id to the allocator and refund its capability slot
    ///
    /// Refused while a reference is still bound to `id`.
    pub(crate) fn free_id(&mut self, id: CapId) -> bool {
        if self.index.find(id).is_some() {
            return false;
        }
        if !self.ids.free(id) {
            return false;
        }
        self.quota.caps.replenish(1);
        true
    }

    /// True if `id` is allocated (bound or not)
    pub fn is_allocated(&self, id: CapId) -> bool {
        self.ids.is_allocated(id)
    }
}
