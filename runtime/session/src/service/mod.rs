//! Service Abstraction
//!
//! A service is the per-name strategy that drives pending sessions toward a
//! delivered capability. Four variants share one contract:
//!
//! - **Local**: the session object is built synchronously by a
//!   [`SessionFactory`] in the brokering domain.
//! - **Parent**: the request is forwarded one level up through a
//!   [`crate::Parent`]; the phase advances when the parent answers.
//! - **Async**: the request is enrolled in the server's id space and the
//!   server is woken; it answers later through the broker.
//! - **Child**: async, plus RAM and cap accounts bound to the child domain so
//!   donations land in the child's quota.
//!
//! ## Dispatch
//!
//! [`Service::initiate_request`] is called once per phase entry and may be
//! called again while a backend is still deciding. Every variant switches on
//! the phase; phases a variant does not handle are no-ops, so dormant
//! sessions (`Available`, `CapHandedOut`) are left untouched.

use std::collections::BTreeMap;

use cap_identity::DomainId;

use crate::error::Result;
use crate::id_space::{IdSpace, ServerId, SessionKey};
use crate::resources::{CapQuota, RamQuota};
use crate::state::SessionState;
use crate::transfer::Account;

pub mod asynchronous;
pub mod child;
pub mod local;
pub mod parent;

pub use asynchronous::AsyncService;
pub use child::ChildService;
pub use local::{LocalService, SessionFactory};
pub use parent::ParentService;

/// Server id spaces, one per serving domain
pub(crate) type ServerIds = BTreeMap<DomainId, IdSpace<ServerId, SessionKey>>;

/// Broker-side context of one `initiate_request` call
pub struct Dispatch<'a> {
    key: SessionKey,
    servers: &'a mut ServerIds,
}

impl<'a> Dispatch<'a> {
    pub(crate) fn new(key: SessionKey, servers: &'a mut ServerIds) -> Self {
        Self { key, servers }
    }

    /// Key of the session being dispatched
    pub fn key(&self) -> SessionKey {
        self.key
    }

    /// Enter the session into `server`'s id space
    pub(crate) fn enroll(&mut self, server: DomainId) -> ServerId {
        self.servers.entry(server).or_default().insert(self.key)
    }
}

/// Session service bound to one name
pub enum Service {
    Local(LocalService),
    Parent(ParentService),
    Async(AsyncService),
    Child(ChildService),
}

impl Service {
    /// Service name
    pub fn name(&self) -> &str {
        match self {
            Service::Local(s) => s.name(),
            Service::Parent(s) => s.name(),
            Service::Async(s) => s.name(),
            Service::Child(s) => s.name(),
        }
    }

    /// Domain in which the session capability is produced
    pub fn server(&self) -> DomainId {
        match self {
            Service::Local(s) => s.domain(),
            Service::Parent(s) => s.domain(),
            Service::Async(s) => s.server(),
            Service::Child(s) => s.server(),
        }
    }

    /// Drive `session` forward by one phase
    pub fn initiate_request(
        &mut self,
        session: &mut SessionState,
        ctx: &mut Dispatch<'_>,
    ) -> Result<()> {
        match self {
            Service::Local(s) => s.initiate_request(session),
            Service::Parent(s) => s.initiate_request(session),
            Service::Async(s) => s.initiate_request(session, ctx),
            Service::Child(s) => s.initiate_request(session, ctx),
        }
    }

    /// Notify an asynchronous server that requests are pending
    pub fn wakeup(&self) {
        match self {
            Service::Local(_) | Service::Parent(_) => {}
            Service::Async(s) => s.wakeup(),
            Service::Child(s) => s.wakeup(),
        }
    }

    /// RAM account receiving the client's donations
    pub fn ram_account(&self) -> Box<dyn Account<RamQuota>> {
        match self {
            Service::Local(s) => Box::new(s.account()),
            Service::Parent(s) => Box::new(s.account()),
            Service::Async(s) => Box::new(s.account()),
            Service::Child(s) => Box::new(s.ram_account()),
        }
    }

    /// Cap account receiving the client's donations
    pub fn cap_account(&self) -> Box<dyn Account<CapQuota>> {
        match self {
            Service::Local(s) => Box::new(s.account()),
            Service::Parent(s) => Box::new(s.account()),
            Service::Async(s) => Box::new(s.account()),
            Service::Child(s) => Box::new(s.cap_account()),
        }
    }
}

impl From<LocalService> for Service {
    fn from(service: LocalService) -> Self {
        Service::Local(service)
    }
}

impl From<ParentService> for Service {
    fn from(service: ParentService) -> Self {
        Service::Parent(service)
    }
}

impl From<AsyncService> for Service {
    fn from(service: AsyncService) -> Self {
        Service::Async(service)
    }
}

impl From<ChildService> for Service {
    fn from(service: ChildService) -> Self {
        Service::Child(service)
    }
}
