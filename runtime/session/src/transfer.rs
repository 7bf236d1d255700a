//! Quota Transfer
//!
//! # Purpose
//! Session creation, upgrade and close move quota between the client's
//! account and the account of whoever implements the session. [`Account`] is
//! the interface a service exposes for this; it is generic over the quota type
//! so RAM and capability-slot accounts cannot be mixed up.
//!
//! An account with no quota relationship keeps the default methods: `cap`
//! names no account and `transfer` moves nothing.
//!
//! # Transfer Guard
//! [`QuotaTransfer`] performs a transfer on construction and reverts it when
//! dropped, unless [`QuotaTransfer::acknowledge`] was called. A session
//! request that fails after the client's donation has moved thereby returns
//! the donation automatically.

use core::marker::PhantomData;

use cap_identity::DomainId;

use crate::error::TransferError;
use crate::kernel::KernelHandle;
use crate::resources::Quota;

/// Names the account that receives a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountCapability<Q: Quota> {
    domain: DomainId,
    _quota: PhantomData<Q>,
}

impl<Q: Quota> AccountCapability<Q> {
    pub fn new(domain: DomainId) -> Self {
        Self {
            domain,
            _quota: PhantomData,
        }
    }

    /// Domain owning the account
    pub fn domain(&self) -> DomainId {
        self.domain
    }
}

/// Quota account of one resource
pub trait Account<Q: Quota>: Send {
    /// Move `amount` from this account to the account named by `to`
    fn transfer(&self, _to: AccountCapability<Q>, _amount: Q) -> Result<(), TransferError> {
        Ok(())
    }

    /// Capability naming this account as a transfer destination
    fn cap(&self, _amount: Q) -> Option<AccountCapability<Q>> {
        None
    }
}

/// Account without a quota relationship
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAccount;

impl<Q: Quota> Account<Q> for NullAccount {}

/// Kernel quota account of a protection domain
#[derive(Clone)]
pub struct DomainAccount {
    kernel: KernelHandle,
    domain: DomainId,
}

impl DomainAccount {
    pub fn new(kernel: KernelHandle, domain: DomainId) -> Self {
        Self { kernel, domain }
    }

    pub fn domain(&self) -> DomainId {
        self.domain
    }
}

impl<Q: Quota> Account<Q> for DomainAccount {
    fn transfer(&self, to: AccountCapability<Q>, amount: Q) -> Result<(), TransferError> {
        self.kernel
            .with(|kernel| kernel.transfer_quota(Q::RESOURCE, self.domain, to.domain, amount.value()))
            .map_err(TransferError::from)
    }

    fn cap(&self, _amount: Q) -> Option<AccountCapability<Q>> {
        Some(AccountCapability::new(self.domain))
    }
}

/// Transfer that is reverted on drop unless acknowledged
pub struct QuotaTransfer<Q: Quota> {
    from: Box<dyn Account<Q>>,
    to: Box<dyn Account<Q>>,
    amount: Q,
    moved: bool,
    acknowledged: bool,
}

impl<Q: Quota> QuotaTransfer<Q> {
    /// Move `amount` from `from` to `to`
    ///
    /// Nothing moves if `to` names no account or `amount` is zero.
    pub fn new(
        from: Box<dyn Account<Q>>,
        to: Box<dyn Account<Q>>,
        amount: Q,
    ) -> Result<Self, TransferError> {
        let moved = match to.cap(amount) {
            Some(dst) if amount.value() > 0 => {
                from.transfer(dst, amount)?;
                true
            }
            _ => false,
        };

        Ok(Self {
            from,
            to,
            amount,
            moved,
            acknowledged: false,
        })
    }

    /// Keep the transfer
    pub fn acknowledge(&mut self) {
        self.acknowledged = true;
    }

    /// True if quota actually moved
    pub fn moved(&self) -> bool {
        self.moved
    }

    /// Amount that moved (zero if nothing did)
    pub fn transferred(&self) -> u64 {
        if self.moved {
            self.amount.value()
        } else {
            0
        }
    }
}

impl<Q: Quota> Drop for QuotaTransfer<Q> {
    fn drop(&mut self) {
        if !self.moved || self.acknowledged {
            return;
        }

        let Some(src) = self.from.cap(self.amount) else {
            return;
        };
        if let Err(err) = self.to.transfer(src, self.amount) {
            log::warn!(
                "could not revert {} quota transfer of {}: {}",
                Q::RESOURCE,
                self.amount.value(),
                err
            );
        }
    }
}
