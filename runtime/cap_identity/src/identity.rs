//! Object Identity Graph Records
//!
//! ```text
//! Object ──< ObjectIdentity ──< ObjectIdentityReference >── Pd (CapIndex)
//! ```
//!
//! - An [`Object`] lists the identities that name it.
//! - An [`ObjectIdentity`] lists one reference per domain holding a capability
//!   to the object, and points back at its object.
//! - An [`ObjectIdentityReference`] binds a domain-local `CapId` to an identity
//!   and is also reachable through the owning domain's [`crate::CapIndex`].
//!
//! The lists hold arena indices. The graph operations that keep both
//! directions consistent live on [`crate::Kernel`].

use alloc::string::String;
use alloc::vec::Vec;

use crate::{CapId, DomainId, IdentityId, ObjectId, ReferenceId};

/// Kind of kernel object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// Protection domain
    Pd,
    /// Thread of execution
    Thread,
    /// Signal source
    Signal,
    /// Session object served by a domain's entrypoint
    Session,
    /// Any other RPC object
    Rpc,
}

/// Kernel-resident invokable entity
#[derive(Debug)]
pub struct Object {
    kind: ObjectKind,
    label: String,
    identities: Vec<IdentityId>,
}

impl Object {
    pub(crate) fn new(kind: ObjectKind, label: String) -> Self {
        Self {
            kind,
            label,
            identities: Vec::new(),
        }
    }

    /// Object kind
    #[inline]
    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// Diagnostic label
    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Identities naming this object
    #[inline]
    pub fn identities(&self) -> &[IdentityId] {
        &self.identities
    }

    pub(crate) fn attach(&mut self, identity: IdentityId) {
        self.identities.push(identity);
    }

    pub(crate) fn detach(&mut self, identity: IdentityId) {
        self.identities.retain(|id| *id != identity);
    }
}

/// Kernel-wide identity of one object
#[derive(Debug)]
pub struct ObjectIdentity {
    object: Option<ObjectId>,
    references: Vec<ReferenceId>,
}

impl ObjectIdentity {
    pub(crate) fn new(object: ObjectId) -> Self {
        Self {
            object: Some(object),
            references: Vec::new(),
        }
    }

    /// Object named by this identity, `None` once invalidated
    #[inline]
    pub fn object(&self) -> Option<ObjectId> {
        self.object
    }

    /// True while the identity still names an object
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.object.is_some()
    }

    /// Per-domain references to this identity
    #[inline]
    pub fn references(&self) -> &[ReferenceId] {
        &self.references
    }

    pub(crate) fn link(&mut self, reference: ReferenceId) {
        self.references.push(reference);
    }

    pub(crate) fn unlink(&mut self, reference: ReferenceId) {
        self.references.retain(|r| *r != reference);
    }

    /// Null the back-pointer and hand out the reference list for teardown
    pub(crate) fn take_for_invalidation(&mut self) -> (Option<ObjectId>, Vec<ReferenceId>) {
        (self.object.take(), core::mem::take(&mut self.references))
    }
}

/// Domain-local capability slot bound to an identity
#[derive(Debug, Clone, Copy)]
pub struct ObjectIdentityReference {
    capid: CapId,
    domain: DomainId,
    identity: IdentityId,
}

impl ObjectIdentityReference {
    pub(crate) fn new(capid: CapId, domain: DomainId, identity: IdentityId) -> Self {
        Self {
            capid,
            domain,
            identity,
        }
    }

    /// Domain-local id
    #[inline]
    pub fn capid(&self) -> CapId {
        self.capid
    }

    /// Owning domain
    #[inline]
    pub fn domain(&self) -> DomainId {
        self.domain
    }

    /// Identity this reference points to
    ///
    /// The index may be stale; resolve it through the kernel.
    #[inline]
    pub fn identity(&self) -> IdentityId {
        self.identity
    }
}
