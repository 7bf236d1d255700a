//! Asynchronous service
//!
//! Requests are entered into the server's id space and the server is woken.
//! The server inspects its pending requests and answers through
//! [`crate::SessionBroker::deliver_session_cap`] and
//! [`crate::SessionBroker::session_response`].
//!
//! A plain async service has no quota relationship with its server: donations
//! are not moved, and upgrades are accepted on the spot without waking the
//! server. [`super::ChildService`] adds the accounts.

use cap_identity::DomainId;
use crossbeam::channel::Sender;

use crate::entrypoint::{Entrypoint, Signal};
use crate::error::Result;
use crate::state::{Phase, SessionFlags, SessionState};
use crate::transfer::NullAccount;

use super::Dispatch;

/// Service answered asynchronously by a server domain
pub struct AsyncService {
    name: String,
    server: DomainId,
    wake: Sender<Signal>,
}

impl AsyncService {
    /// Service `name` served by the domain of `server_ep`
    pub fn new(name: &str, server_ep: &Entrypoint) -> Self {
        Self {
            name: String::from(name),
            server: server_ep.domain(),
            wake: server_ep.signal_sender(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn server(&self) -> DomainId {
        self.server
    }

    pub(crate) fn account(&self) -> NullAccount {
        NullAccount
    }

    /// Make the session visible to the server
    ///
    /// Enrolls at most once; later phases reuse the server id.
    pub(crate) fn enroll(&self, session: &mut SessionState, ctx: &mut Dispatch<'_>) {
        if session.id_at_server().is_none() {
            let id = ctx.enroll(self.server);
            session.set_id_at_server(Some(id));
            log::trace!("'{}': session enrolled as {:?}", self.name, id);
        }
        session.insert_flags(SessionFlags::ASYNC_CLIENT_NOTIFY);
    }

    pub(crate) fn initiate_request(
        &mut self,
        session: &mut SessionState,
        ctx: &mut Dispatch<'_>,
    ) -> Result<()> {
        match session.phase() {
            Phase::CreateRequested | Phase::CloseRequested => {
                self.enroll(session, ctx);
                Ok(())
            }
            Phase::UpgradeRequested => {
                log::warn!(
                    "'{}' has no quota account, upgrade accepted without transfer",
                    self.name
                );
                session.confirm_upgrade()
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn wakeup(&self) {
        if self.wake.send(Signal::Wakeup).is_err() {
            log::debug!("'{}': server entrypoint is gone", self.name);
        }
    }
}
