//! Connection Facade
//!
//! Client-side wrapper around one session. Construction formats the request
//! arguments, asks the parent for the session and blocks on the entrypoint
//! until the first response. Upgrades are single round trips. Dropping the
//! connection closes the session without waiting for the server.

use core::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cap_identity::{Capability, DomainId};

use crate::args::SessionArgs;
use crate::entrypoint::{Entrypoint, Signal};
use crate::error::Result;
use crate::id_space::ClientId;
use crate::kernel::KernelHandle;
use crate::parent::{CloseResult, Parent, SessionReply, UpgradeResult};
use crate::resources::{Affinity, Resources};

/// Session type, identified by its service name
pub trait SessionType {
    const SERVICE_NAME: &'static str;
}

/// Environment of a client domain
///
/// Built once when the domain starts and handed to everything that opens
/// sessions.
#[derive(Clone)]
pub struct Env {
    domain: DomainId,
    kernel: KernelHandle,
    parent: Arc<dyn Parent>,
    ep: Entrypoint,
    next_id: Arc<AtomicU64>,
}

impl Env {
    pub fn new(kernel: KernelHandle, ep: Entrypoint, parent: Arc<dyn Parent>) -> Self {
        Self {
            domain: ep.domain(),
            kernel,
            parent,
            ep,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn domain(&self) -> DomainId {
        self.domain
    }

    pub fn kernel(&self) -> &KernelHandle {
        &self.kernel
    }

    pub fn parent(&self) -> &Arc<dyn Parent> {
        &self.parent
    }

    pub fn ep(&self) -> &Entrypoint {
        &self.ep
    }

    fn alloc_id(&self) -> ClientId {
        ClientId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// Open session of type `S`
pub struct Connection<S: SessionType> {
    env: Env,
    id: ClientId,
    cap: Capability,
    _session: PhantomData<fn() -> S>,
}

impl<S: SessionType> Connection<S> {
    /// Open a session donating `resources`
    ///
    /// `extra` holds session-type specific `key=value` arguments.
    ///
    /// # Errors
    /// `SessionError::Create` ("service creation failed") when the session
    /// ends in a failure phase; no capability is left in the domain.
    pub fn new(env: &Env, resources: Resources, label: &str, extra: &str) -> Result<Self> {
        let mut args = SessionArgs::parse(extra)?;
        resources.write_to(&mut args)?;
        if !label.is_empty() {
            args.set_str("label", label)?;
        }
        Self::with_args(env, &args, &Affinity::default())
    }

    /// Open a session with preformatted arguments
    pub fn with_args(env: &Env, args: &SessionArgs, affinity: &Affinity) -> Result<Self> {
        let id = env.alloc_id();
        let mut reply = env.parent.session(S::SERVICE_NAME, id, args, affinity);

        let cap = loop {
            match reply {
                Ok(SessionReply::Ready(cap)) => break cap,
                Ok(SessionReply::Pending) => {
                    if let Err(err) = env.ep.wait_for(Signal::SessionResponse) {
                        env.parent.close(id);
                        return Err(err);
                    }
                    reply = env.parent.session_cap(id);
                }
                Err(err) => {
                    log::warn!("{} session failed: {}", S::SERVICE_NAME, err);
                    return Err(err);
                }
            }
        };

        log::debug!("{} session {:?} established", S::SERVICE_NAME, id);
        Ok(Self {
            env: env.clone(),
            id,
            cap,
            _session: PhantomData,
        })
    }

    /// Session capability in this domain
    pub fn cap(&self) -> Capability {
        self.cap
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Donate more quota to the session
    pub fn upgrade(&self, resources: Resources) -> Result<UpgradeResult> {
        let args = resources.to_args()?;
        self.env.parent.upgrade(self.id, &args)
    }

    pub fn upgrade_ram(&self, bytes: u64) -> Result<UpgradeResult> {
        self.upgrade(Resources::new(bytes, 0))
    }

    pub fn upgrade_caps(&self, caps: u64) -> Result<UpgradeResult> {
        self.upgrade(Resources::new(0, caps))
    }
}

impl<S: SessionType> Drop for Connection<S> {
    fn drop(&mut self) {
        match self.env.parent.close(self.id) {
            CloseResult::Done => log::debug!("{} session {:?} closed", S::SERVICE_NAME, self.id),
            CloseResult::Pending => {
                log::debug!("{} session {:?} closing", S::SERVICE_NAME, self.id)
            }
        }
    }
}
