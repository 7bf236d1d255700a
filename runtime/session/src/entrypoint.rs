//! Entrypoint - per-domain signal dispatch
//!
//! Each domain serializes its work through one entrypoint. Signals from other
//! domains (session responses, server wakeups) arrive over a `crossbeam`
//! channel. [`Entrypoint::wait_signal`] is the one place a domain blocks.
//!
//! The entrypoint also manages the domain's RPC objects: [`Entrypoint::manage`]
//! creates a kernel object with a capability in this domain, and
//! [`Entrypoint::dissolve`] destroys it, which invalidates every capability to
//! it in every domain.

use cap_identity::{Capability, DomainId, ObjectId, ObjectKind};
use crossbeam::channel::{self, Receiver, Sender, TryRecvError};

use crate::error::{Result, SessionError};
use crate::kernel::KernelHandle;

/// Signals delivered to an entrypoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// A session requested by this domain changed phase
    SessionResponse,
    /// Session requests are pending for this domain as a server
    Wakeup,
}

/// Object managed by an entrypoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagedObject {
    pub object: ObjectId,
    pub cap: Capability,
}

/// Dispatch context of one domain
#[derive(Clone)]
pub struct Entrypoint {
    domain: DomainId,
    kernel: KernelHandle,
    tx: Sender<Signal>,
    rx: Receiver<Signal>,
}

impl Entrypoint {
    pub fn new(kernel: KernelHandle, domain: DomainId) -> Self {
        let (tx, rx) = channel::unbounded();
        Self {
            domain,
            kernel,
            tx,
            rx,
        }
    }

    #[inline]
    pub fn domain(&self) -> DomainId {
        self.domain
    }

    pub fn kernel(&self) -> &KernelHandle {
        &self.kernel
    }

    /// Sender other domains use to signal this entrypoint
    pub fn signal_sender(&self) -> Sender<Signal> {
        self.tx.clone()
    }

    /// Create an RPC object with a capability in this domain
    pub fn manage(&self, kind: ObjectKind, label: &str) -> Result<ManagedObject> {
        let (object, cap) = self
            .kernel
            .with(|kernel| kernel.create_object_in(self.domain, kind, label))?;
        Ok(ManagedObject { object, cap })
    }

    /// Destroy a managed object, invalidating all capabilities to it
    pub fn dissolve(&self, object: ObjectId) -> bool {
        self.kernel.with(|kernel| kernel.destroy_object(object))
    }

    /// Block until the next signal arrives
    pub fn wait_signal(&self) -> Result<Signal> {
        self.rx.recv().map_err(|_| SessionError::EntrypointClosed)
    }

    /// Block until `signal` arrives, discarding others
    pub fn wait_for(&self, signal: Signal) -> Result<()> {
        loop {
            if self.wait_signal()? == signal {
                return Ok(());
            }
        }
    }

    /// Take a pending signal without blocking
    pub fn try_signal(&self) -> Result<Option<Signal>> {
        match self.rx.try_recv() {
            Ok(signal) => Ok(Some(signal)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(SessionError::EntrypointClosed),
        }
    }
}
