//! Kernel - owner of the identity graph
//!
//! # Purpose
//! Holds every domain, object, identity, and reference, and keeps the two
//! views of a reference (identity list and domain index) consistent.
//!
//! # Invalidation
//! Destroying an object invalidates each of its identities. Invalidating an
//! identity detaches every reference in its list: the reference record is
//! retired, its id is unbound from the owning domain's index and returned to
//! the allocator. Afterwards `find` in any domain fails for the old ids. The
//! identity record itself is reclaimed, so stale `IdentityId`s resolve to
//! nothing instead of dangling.
//!
//! # Failure Semantics
//! Lookups return `Option`. Only id allocation (capability-slot quota) and
//! quota transfers return errors.

use alloc::string::String;
use alloc::vec::Vec;

use static_assertions::assert_impl_all;

use crate::arena::Arena;
use crate::config::{DomainConfig, KernelConfig, INVALID_CAP_ID};
use crate::domain::Pd;
use crate::identity::{Object, ObjectIdentity, ObjectIdentityReference, ObjectKind};
use crate::quota::{DomainQuota, Resource};
use crate::{
    CapId, Capability, CapabilityError, DomainId, IdentityId, ObjectId, ReferenceId, Result,
};

/// The identity graph and all protection domains
pub struct Kernel {
    config: KernelConfig,
    domains: Arena<Pd>,
    objects: Arena<Object>,
    identities: Arena<ObjectIdentity>,
    references: Arena<ObjectIdentityReference>,
}

assert_impl_all!(Kernel: Send);

impl Default for Kernel {
    fn default() -> Self {
        Self::new(KernelConfig::default())
    }
}

impl Kernel {
    /// Create an empty kernel
    pub fn new(mut config: KernelConfig) -> Self {
        if config.first_cap_id == INVALID_CAP_ID {
            config.first_cap_id = INVALID_CAP_ID + 1;
        }

        Self {
            config,
            domains: Arena::new(),
            objects: Arena::new(),
            identities: Arena::new(),
            references: Arena::new(),
        }
    }

    /// Kernel configuration
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Domains
    // ------------------------------------------------------------------

    /// Create a protection domain
    pub fn create_domain(&mut self, config: DomainConfig) -> DomainId {
        let label = config.label.clone();
        let id = DomainId(self.domains.insert(Pd::new(&self.config, config)));
        log::debug!("created domain {:?} ({})", id, label);
        id
    }

    /// Look up a domain
    pub fn domain(&self, id: DomainId) -> Option<&Pd> {
        self.domains.get(id.0)
    }

    /// True while the domain exists
    pub fn domain_exists(&self, id: DomainId) -> bool {
        self.domains.contains(id.0)
    }

    /// Label of a domain
    pub fn domain_label(&self, id: DomainId) -> Option<&str> {
        self.domain(id).map(Pd::label)
    }

    /// Tear down a domain and every reference it owns
    pub fn destroy_domain(&mut self, id: DomainId) -> bool {
        let Some(pd) = self.domains.get(id.0) else {
            return false;
        };

        let owned: Vec<(CapId, ReferenceId)> = pd.index().entries().collect();
        for (_, reference) in &owned {
            if let Some(record) = self.references.remove(reference.0) {
                if let Some(identity) = self.identities.get_mut(record.identity().0) {
                    identity.unlink(*reference);
                }
            }
        }

        self.domains.remove(id.0);
        log::debug!(
            "destroyed domain {:?}, dropped {} references",
            id,
            owned.len()
        );
        true
    }

    // ------------------------------------------------------------------
    // Capability ids
    // ------------------------------------------------------------------

    /// Allocate a capability id in `domain`
    ///
    /// # Errors
    /// `OutOfCaps` when the domain's capability-slot quota or id range is
    /// exhausted, `UnknownDomain` for a dead domain.
    pub fn allocate_id(&mut self, domain: DomainId) -> Result<CapId> {
        let pd = self
            .domains
            .get_mut(domain.0)
            .ok_or(CapabilityError::UnknownDomain(domain))?;

        pd.allocate_id()
            .ok_or(CapabilityError::OutOfCaps { domain })
    }

    /// Return an unbound capability id to `domain`'s allocator
    ///
    /// Ids still bound to a reference are not freed; release the capability
    /// instead.
    pub fn free_id(&mut self, domain: DomainId, id: CapId) -> bool {
        self.domains
            .get_mut(domain.0)
            .is_some_and(|pd| pd.free_id(id))
    }

    // ------------------------------------------------------------------
    // Objects and identities
    // ------------------------------------------------------------------

    /// Create a kernel object
    pub fn create_object(&mut self, kind: ObjectKind, label: &str) -> ObjectId {
        ObjectId(self.objects.insert(Object::new(kind, String::from(label))))
    }

    /// Look up an object
    pub fn object(&self, id: ObjectId) -> Option<&Object> {
        self.objects.get(id.0)
    }

    /// Create a new identity for a live object
    pub fn create_identity(&mut self, object: ObjectId) -> Option<IdentityId> {
        self.objects.get(object.0)?;
        let identity = IdentityId(self.identities.insert(ObjectIdentity::new(object)));
        self.objects.get_mut(object.0)?.attach(identity);
        Some(identity)
    }

    /// Look up an identity
    pub fn identity(&self, id: IdentityId) -> Option<&ObjectIdentity> {
        self.identities.get(id.0)
    }

    /// Invalidate an identity and every reference to it
    ///
    /// Idempotent: invalidating a stale identity does nothing.
    pub fn invalidate_identity(&mut self, id: IdentityId) {
        let Some(mut identity) = self.identities.remove(id.0) else {
            return;
        };

        let (object, references) = identity.take_for_invalidation();
        for reference in &references {
            self.detach_reference(*reference);
        }

        if let Some(object) = object.and_then(|o| self.objects.get_mut(o.0)) {
            object.detach(id);
        }

        log::trace!(
            "invalidated identity {:?}, detached {} references",
            id,
            references.len()
        );
    }

    /// Destroy an object, invalidating all of its identities first
    pub fn destroy_object(&mut self, id: ObjectId) -> bool {
        let Some(object) = self.objects.get(id.0) else {
            return false;
        };

        let identities = object.identities().to_vec();
        for identity in identities {
            self.invalidate_identity(identity);
        }

        if let Some(object) = self.objects.remove(id.0) {
            log::debug!("destroyed {:?} object '{}'", object.kind(), object.label());
        }
        true
    }

    // ------------------------------------------------------------------
    // References
    // ------------------------------------------------------------------

    /// Construct a reference to `identity` in `domain`
    ///
    /// Returns `Ok(None)` instead of constructing a reference to an
    /// invalidated identity or for a dead domain.
    ///
    /// # Errors
    /// `OutOfCaps` if `domain` cannot allocate another id.
    pub fn create_reference(
        &mut self,
        identity: IdentityId,
        domain: DomainId,
    ) -> Result<Option<Capability>> {
        let valid = self
            .identities
            .get(identity.0)
            .is_some_and(ObjectIdentity::is_valid);
        if !valid || !self.domain_exists(domain) {
            return Ok(None);
        }

        let capid = self.allocate_id(domain)?;
        let reference = ReferenceId(
            self.references
                .insert(ObjectIdentityReference::new(capid, domain, identity)),
        );

        if let Some(pd) = self.domains.get_mut(domain.0) {
            pd.index_mut().insert(capid, reference);
        }
        if let Some(identity) = self.identities.get_mut(identity.0) {
            identity.link(reference);
        }

        log::trace!("domain {:?}: bound id {} to {:?}", domain, capid, identity);
        Ok(Some(Capability::new(domain, capid)))
    }

    /// Create an object together with its first identity and a reference in
    /// `domain`
    pub fn create_object_in(
        &mut self,
        domain: DomainId,
        kind: ObjectKind,
        label: &str,
    ) -> Result<(ObjectId, Capability)> {
        if !self.domain_exists(domain) {
            return Err(CapabilityError::UnknownDomain(domain));
        }

        let object = self.create_object(kind, label);
        let cap = self
            .create_identity(object)
            .map(|identity| self.create_reference(identity, domain));

        match cap {
            Some(Ok(Some(cap))) => Ok((object, cap)),
            Some(Err(err)) => {
                self.destroy_object(object);
                Err(err)
            }
            _ => {
                self.destroy_object(object);
                Err(CapabilityError::UnknownDomain(domain))
            }
        }
    }

    /// Find the reference bound to `id` in `domain`
    pub fn find(&self, domain: DomainId, id: CapId) -> Option<ReferenceId> {
        self.domain(domain)?.index().find(id)
    }

    /// Look up a reference record
    pub fn reference(&self, id: ReferenceId) -> Option<&ObjectIdentityReference> {
        self.references.get(id.0)
    }

    /// Find the reference (if any) that `domain` holds to `identity`
    ///
    /// Linear scan of the identity's reference list.
    pub fn identity_find(&self, identity: IdentityId, domain: DomainId) -> Option<ReferenceId> {
        self.identity(identity)?
            .references()
            .iter()
            .copied()
            .find(|r| {
                self.references
                    .get(r.0)
                    .is_some_and(|record| record.domain() == domain)
            })
    }

    /// Identity named by a capability
    pub fn identity_of(&self, cap: Capability) -> Option<IdentityId> {
        let reference = self.find(cap.domain(), cap.local_id())?;
        let identity = self.reference(reference)?.identity();
        self.identities
            .get(identity.0)
            .filter(|i| i.is_valid())
            .map(|_| identity)
    }

    /// Resolve a capability to the object it names
    ///
    /// This is the dispatch-time lookup; it fails for released ids and for
    /// references whose identity has been invalidated.
    pub fn lookup(&self, cap: Capability) -> Option<ObjectId> {
        let identity = self.identity_of(cap)?;
        let object = self.identity(identity)?.object()?;
        self.objects.contains(object.0).then_some(object)
    }

    /// True if the capability still resolves to an object
    pub fn is_valid(&self, cap: Capability) -> bool {
        self.lookup(cap).is_some()
    }

    /// Hand a capability to another domain
    ///
    /// Reuses the reference `to` already holds for the same identity.
    /// Returns `Ok(None)` if `cap` no longer resolves.
    pub fn delegate(&mut self, cap: Capability, to: DomainId) -> Result<Option<Capability>> {
        let Some(identity) = self.identity_of(cap) else {
            return Ok(None);
        };

        if let Some(existing) = self.identity_find(identity, to) {
            return Ok(self
                .reference(existing)
                .map(|record| Capability::new(to, record.capid())));
        }

        self.create_reference(identity, to)
    }

    /// Drop one domain-local capability
    ///
    /// The object stays alive; only this domain's reference goes away.
    pub fn release(&mut self, cap: Capability) -> bool {
        match self.find(cap.domain(), cap.local_id()) {
            Some(reference) => {
                self.detach_reference(reference);
                true
            }
            None => false,
        }
    }

    /// Capabilities currently held by `domain`, ordered by id
    pub fn capabilities(&self, domain: DomainId) -> Vec<Capability> {
        self.domain(domain)
            .map(|pd| pd.index().ids().map(|id| Capability::new(domain, id)).collect())
            .unwrap_or_default()
    }

    fn detach_reference(&mut self, reference: ReferenceId) {
        let Some(record) = self.references.remove(reference.0) else {
            return;
        };

        if let Some(identity) = self.identities.get_mut(record.identity().0) {
            identity.unlink(reference);
        }

        if let Some(pd) = self.domains.get_mut(record.domain().0) {
            pd.index_mut().remove(record.capid());
            pd.free_id(record.capid());
        }
    }

    // ------------------------------------------------------------------
    // Quota
    // ------------------------------------------------------------------

    /// Quota accounts of a domain
    pub fn quota(&self, domain: DomainId) -> Option<DomainQuota> {
        self.domain(domain).map(|pd| *pd.quota())
    }

    /// Move `amount` of `resource` from one domain's account to another's
    ///
    /// The source's `used` rises by `amount` and the destination's `granted`
    /// rises by `amount`; nothing changes if the source lacks headroom.
    pub fn transfer_quota(
        &mut self,
        resource: Resource,
        from: DomainId,
        to: DomainId,
        amount: u64,
    ) -> Result<()> {
        if !self.domain_exists(to) {
            return Err(CapabilityError::UnknownDomain(to));
        }
        if from == to || amount == 0 {
            return if self.domain_exists(from) {
                Ok(())
            } else {
                Err(CapabilityError::UnknownDomain(from))
            };
        }

        self.domains
            .get_mut(from.0)
            .ok_or(CapabilityError::UnknownDomain(from))?
            .quota_mut()
            .account_mut(resource)
            .withdraw(resource, amount)?;

        if let Some(pd) = self.domains.get_mut(to.0) {
            pd.quota_mut().account_mut(resource).upgrade(amount);
        }

        log::debug!(
            "transferred {} {} quota from {:?} to {:?}",
            amount,
            resource,
            from,
            to
        );
        Ok(())
    }
}
