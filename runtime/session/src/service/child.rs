//! Child-backed service
//!
//! An async service whose server is a child domain. Its RAM and cap accounts
//! are bound to that child, so quota donated on create and upgrade lands in
//! the child's accounts and flows back from them on close.

use cap_identity::DomainId;

use crate::entrypoint::Entrypoint;
use crate::error::Result;
use crate::state::{Phase, SessionState};
use crate::transfer::DomainAccount;

use super::asynchronous::AsyncService;
use super::Dispatch;

/// Service provided by a child domain
pub struct ChildService {
    inner: AsyncService,
    ram: DomainAccount,
    caps: DomainAccount,
}

impl ChildService {
    /// Service `name` served by the child owning `child_ep`
    pub fn new(name: &str, child_ep: &Entrypoint) -> Self {
        let account = DomainAccount::new(child_ep.kernel().clone(), child_ep.domain());
        Self {
            inner: AsyncService::new(name, child_ep),
            ram: account.clone(),
            caps: account,
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn server(&self) -> DomainId {
        self.inner.server()
    }

    pub(crate) fn ram_account(&self) -> DomainAccount {
        self.ram.clone()
    }

    pub(crate) fn cap_account(&self) -> DomainAccount {
        self.caps.clone()
    }

    pub(crate) fn initiate_request(
        &mut self,
        session: &mut SessionState,
        ctx: &mut Dispatch<'_>,
    ) -> Result<()> {
        if session.phase().awaits_server() {
            self.inner.enroll(session, ctx);
        }
        Ok(())
    }

    pub(crate) fn wakeup(&self) {
        self.inner.wakeup();
    }
}
