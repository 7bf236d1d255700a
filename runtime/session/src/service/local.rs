//! Local service
//!
//! Sessions are built in-process: on `CreateRequested` the factory is called
//! directly and its [`CreateError`] maps 1:1 onto the terminal phase.

use cap_identity::{DomainId, ObjectId};

use crate::args::SessionArgs;
use crate::entrypoint::{Entrypoint, ManagedObject};
use crate::error::{CreateError, Result};
use crate::resources::Affinity;
use crate::state::{Phase, SessionState};
use crate::transfer::DomainAccount;

/// Builds and tears down session objects of a local service
pub trait SessionFactory: Send {
    /// Construct the session object
    fn create(
        &mut self,
        ep: &Entrypoint,
        args: &SessionArgs,
        affinity: &Affinity,
    ) -> core::result::Result<ManagedObject, CreateError>;

    /// Apply an upgrade that already moved the quota in `args`
    fn upgrade(&mut self, _ep: &Entrypoint, _object: ObjectId, _args: &SessionArgs) {}

    /// Destroy the session object
    fn destroy(&mut self, ep: &Entrypoint, object: ObjectId) {
        ep.dissolve(object);
    }
}

/// Service whose sessions live in the serving domain itself
pub struct LocalService {
    name: String,
    ep: Entrypoint,
    factory: Box<dyn SessionFactory>,
}

impl LocalService {
    pub fn new(name: &str, ep: Entrypoint, factory: impl SessionFactory + 'static) -> Self {
        Self {
            name: String::from(name),
            ep,
            factory: Box::new(factory),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn domain(&self) -> DomainId {
        self.ep.domain()
    }

    pub(crate) fn account(&self) -> DomainAccount {
        DomainAccount::new(self.ep.kernel().clone(), self.ep.domain())
    }

    pub(crate) fn initiate_request(&mut self, session: &mut SessionState) -> Result<()> {
        match session.phase() {
            Phase::CreateRequested => {
                match self.factory.create(&self.ep, session.args(), session.affinity()) {
                    Ok(managed) => {
                        session.set_local(managed.object);
                        session.deliver(managed.cap)
                    }
                    Err(err) => {
                        log::debug!("local service '{}' refused session: {}", self.name, err);
                        session.advance(err.phase())
                    }
                }
            }
            Phase::UpgradeRequested => {
                if let Some(object) = session.local() {
                    self.factory.upgrade(&self.ep, object, session.upgrade_args());
                }
                session.confirm_upgrade()
            }
            Phase::CloseRequested => {
                if let Some(object) = session.take_local() {
                    self.factory.destroy(&self.ep, object);
                }
                session.advance(Phase::Closed)
            }
            _ => Ok(()),
        }
    }
}
