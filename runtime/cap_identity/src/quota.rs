//! Quota Accounts
//!
//! Every domain carries two independently accounted resources: RAM bytes and
//! capability slots. An account is a `(granted, used)` pair. Consuming quota
//! raises `used`, receiving a transfer raises `granted`.
//!
//! Transfers between domains are performed by [`crate::Kernel::transfer_quota`]
//! as one debit/credit pair under the kernel lock, so the sum of
//! `granted - used` over all domains is unchanged by any transfer.

use core::fmt;

use crate::{CapabilityError, Result};

/// Accounted resource kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    /// Memory, in bytes
    Ram,
    /// Capability slots
    Caps,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Ram => f.write_str("RAM"),
            Resource::Caps => f.write_str("cap"),
        }
    }
}

/// Granted/used pair for one resource of one domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuotaAccount {
    granted: u64,
    used: u64,
}

impl QuotaAccount {
    /// Create an account with an initial grant
    pub const fn new(granted: u64) -> Self {
        Self { granted, used: 0 }
    }

    /// Total quota granted to the account
    #[inline]
    pub fn granted(&self) -> u64 {
        self.granted
    }

    /// Quota consumed or passed on
    #[inline]
    pub fn used(&self) -> u64 {
        self.used
    }

    /// Remaining headroom
    #[inline]
    pub fn avail(&self) -> u64 {
        self.granted.saturating_sub(self.used)
    }

    /// Consume `amount` if the headroom allows it
    pub fn withdraw(&mut self, resource: Resource, amount: u64) -> Result<()> {
        if amount > self.avail() {
            return Err(CapabilityError::InsufficientQuota {
                resource,
                requested: amount,
                available: self.avail(),
            });
        }

        self.used += amount;
        Ok(())
    }

    /// Give back previously withdrawn quota
    pub fn replenish(&mut self, amount: u64) {
        self.used = self.used.saturating_sub(amount);
    }

    /// Raise the grant (receiving side of a transfer)
    pub fn upgrade(&mut self, amount: u64) {
        self.granted = self.granted.saturating_add(amount);
    }
}

/// Both accounts of one domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DomainQuota {
    /// RAM account
    pub ram: QuotaAccount,
    /// Capability-slot account
    pub caps: QuotaAccount,
}

impl DomainQuota {
    /// Create accounts with initial grants
    pub const fn new(ram_quota: u64, cap_quota: u64) -> Self {
        Self {
            ram: QuotaAccount::new(ram_quota),
            caps: QuotaAccount::new(cap_quota),
        }
    }

    /// Account for the given resource
    pub fn account(&self, resource: Resource) -> &QuotaAccount {
        match resource {
            Resource::Ram => &self.ram,
            Resource::Caps => &self.caps,
        }
    }

    /// Mutable account for the given resource
    pub fn account_mut(&mut self, resource: Resource) -> &mut QuotaAccount {
        match resource {
            Resource::Ram => &mut self.ram,
            Resource::Caps => &mut self.caps,
        }
    }
}
