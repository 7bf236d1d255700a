//! Parent-forwarded service
//!
//! Requests are relayed to the forwarding domain's own parent. A create
//! advances only once the parent has produced a capability; until then every
//! dispatch polls the parent with the id chosen on the first dispatch, so
//! repeated dispatch never issues a second request.
//!
//! Upgrades and closes the parent answers with `Pending` stay in flight. Later
//! dispatches (usually from [`crate::SessionBroker::dispatch_pending`] after a
//! parent signal) query the parent's phase instead of repeating the request.
//! A close completes only once the parent has reclaimed its session, so the
//! quota it returns is back in the forwarding domain before this session
//! returns it to the client.

use std::collections::BTreeSet;
use std::sync::Arc;

use cap_identity::DomainId;

use crate::error::{CreateError, Result, SessionError};
use crate::id_space::ClientId;
use crate::kernel::KernelHandle;
use crate::parent::{CloseResult, Parent, SessionReply, UpgradeResult};
use crate::state::{Phase, SessionState};
use crate::transfer::DomainAccount;

/// Service provided by the parent of the forwarding domain
pub struct ParentService {
    name: String,
    domain: DomainId,
    kernel: KernelHandle,
    parent: Arc<dyn Parent>,
    next_id: u64,
    upgrading: BTreeSet<ClientId>,
    closing: BTreeSet<ClientId>,
}

impl ParentService {
    /// Forward `name` from `domain` to `parent`
    pub fn new(name: &str, kernel: KernelHandle, domain: DomainId, parent: Arc<dyn Parent>) -> Self {
        Self {
            name: String::from(name),
            domain,
            kernel,
            parent,
            next_id: 1,
            upgrading: BTreeSet::new(),
            closing: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Forwarding domain; capabilities from the parent arrive here
    pub fn domain(&self) -> DomainId {
        self.domain
    }

    pub(crate) fn account(&self) -> DomainAccount {
        DomainAccount::new(self.kernel.clone(), self.domain)
    }

    fn alloc_id(&mut self) -> ClientId {
        let id = ClientId(self.next_id);
        self.next_id += 1;
        id
    }

    pub(crate) fn initiate_request(&mut self, session: &mut SessionState) -> Result<()> {
        match session.phase() {
            Phase::CreateRequested => {
                let reply = match session.id_at_parent() {
                    Some(id) => self.parent.session_cap(id),
                    None => {
                        let id = self.alloc_id();
                        session.set_id_at_parent(id);
                        self.parent
                            .session(&self.name, id, session.args(), session.affinity())
                    }
                };

                match reply {
                    Ok(SessionReply::Ready(cap)) => session.deliver(cap),
                    Ok(SessionReply::Pending) => Ok(()),
                    Err(SessionError::Create(err)) => session.advance(err.phase()),
                    Err(err) => {
                        log::warn!("parent refused session '{}': {}", self.name, err);
                        session.advance(CreateError::Denied.phase())
                    }
                }
            }
            Phase::UpgradeRequested => {
                let Some(id) = session.id_at_parent() else {
                    return Err(SessionError::protocol(format!(
                        "upgrade of '{}' without a parent session",
                        self.name
                    )));
                };

                if self.upgrading.contains(&id) {
                    return self.poll_upgrade(id, session);
                }

                match self.parent.upgrade(id, session.upgrade_args()) {
                    Ok(UpgradeResult::Done) => session.confirm_upgrade(),
                    Ok(UpgradeResult::Pending) => {
                        self.upgrading.insert(id);
                        Ok(())
                    }
                    Err(err) => {
                        log::warn!(
                            "upgrade of '{}' not accepted by parent, retrying later: {}",
                            self.name,
                            err
                        );
                        Ok(())
                    }
                }
            }
            Phase::CloseRequested => {
                let Some(id) = session.id_at_parent() else {
                    return session.advance(Phase::Closed);
                };

                let done = if self.closing.contains(&id) {
                    self.parent.phase(id).is_none()
                } else {
                    match self.parent.close(id) {
                        CloseResult::Done => true,
                        CloseResult::Pending => {
                            self.closing.insert(id);
                            false
                        }
                    }
                };

                if !done {
                    return Ok(());
                }
                self.closing.remove(&id);
                session.advance(Phase::Closed)
            }
            _ => Ok(()),
        }
    }

    /// Confirm an in-flight upgrade once the parent session left `UpgradeRequested`
    fn poll_upgrade(&mut self, id: ClientId, session: &mut SessionState) -> Result<()> {
        let phase = self.parent.phase(id);
        if phase == Some(Phase::UpgradeRequested) {
            return Ok(());
        }

        self.upgrading.remove(&id);
        if phase != Some(Phase::CapHandedOut) {
            log::warn!(
                "parent session of '{}' ended its upgrade in {:?}",
                self.name,
                phase
            );
        }
        session.confirm_upgrade()
    }
}
