//! Capability Identity - kernel-resident capability tracking for KaaL
//!
//! # Purpose
//! Every invokable kernel object owns a list of identities; every identity
//! owns one reference per protection domain that holds a capability to the
//! object; every reference is keyed by a domain-local id and reachable through
//! that domain's ordered index. Destroying an object invalidates every
//! reference in every domain before the object is reclaimed.
//!
//! # Integration Points
//! - Depends on: nothing but `alloc`
//! - Provides to: the session layer (`kaal-session`), which delegates session
//!   capabilities between domains and moves quota between their accounts
//! - Capabilities required: N/A (this crate *is* the capability space)
//!
//! # Architecture
//! ```text
//! Kernel
//!  ├─ Arena<Pd>                       CapIdAllocator + CapIndex + quota
//!  ├─ Arena<Object>                   ──< IdentityId
//!  ├─ Arena<ObjectIdentity>           ──< ReferenceId, ──> ObjectId
//!  └─ Arena<ObjectIdentityReference>  ──> IdentityId, (DomainId, CapId)
//! ```
//! All cross-links are generational arena indices, so a link into a retired
//! record resolves to `None` rather than to a recycled record.
//!
//! # Testing Strategy
//! - Unit tests: allocator, index, accounts, graph operations
//! - Integration tests: cascading invalidation across domains, id uniqueness,
//!   quota conservation
//! - Benchmarks: index lookup

#![no_std]

#[cfg(test)]
#[macro_use]
extern crate std;

extern crate alloc;

pub mod arena;
pub mod config;
pub mod cspace;
pub mod domain;
pub mod identity;
pub mod kernel;
pub mod quota;

pub use arena::{Arena, Index};
pub use config::{DomainConfig, KernelConfig, INVALID_CAP_ID};
pub use cspace::{CapIdAllocator, CapIndex};
pub use domain::Pd;
pub use identity::{Object, ObjectIdentity, ObjectIdentityReference, ObjectKind};
pub use kernel::Kernel;
pub use quota::{DomainQuota, QuotaAccount, Resource};

use thiserror::Error;

/// Domain-local capability id (`capid_t`)
pub type CapId = u32;

/// Error types for capability operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("Out of capability slots in domain {domain:?}")]
    OutOfCaps { domain: DomainId },

    #[error("Insufficient {resource} quota (requested: {requested}, available: {available})")]
    InsufficientQuota {
        resource: Resource,
        requested: u64,
        available: u64,
    },

    #[error("Unknown domain {0:?}")]
    UnknownDomain(DomainId),
}

pub type Result<T> = core::result::Result<T, CapabilityError>;

/// Protection domain handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DomainId(pub(crate) Index);

/// Kernel object handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub(crate) Index);

/// Object identity handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IdentityId(pub(crate) Index);

/// Identity reference handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReferenceId(pub(crate) Index);

/// Unforgeable reference to an object, valid only in one domain
///
/// Only the kernel constructs capabilities. A capability can be compared,
/// copied, resolved through [`Kernel::lookup`], delegated, or released; it
/// carries no address of the object it names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Capability {
    domain: DomainId,
    id: CapId,
}

impl Capability {
    pub(crate) fn new(domain: DomainId, id: CapId) -> Self {
        Self { domain, id }
    }

    /// Domain whose capability space holds this capability
    #[inline]
    pub fn domain(&self) -> DomainId {
        self.domain
    }

    /// Domain-local id
    #[inline]
    pub fn local_id(&self) -> CapId {
        self.id
    }
}
