//! Shared access to the kernel
//!
//! Every cross-domain effect (quota transfer, delegation, invalidation) runs
//! under the one kernel lock. The lock is held only for the duration of a
//! single kernel operation and never across a blocking wait.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cap_identity::{DomainConfig, DomainId, Kernel, KernelConfig};
use static_assertions::assert_impl_all;

/// Cloneable handle to the kernel
#[derive(Clone)]
pub struct KernelHandle(Arc<Mutex<Kernel>>);

assert_impl_all!(KernelHandle: Send, Sync);

impl Default for KernelHandle {
    fn default() -> Self {
        Self::new(Kernel::default())
    }
}

impl KernelHandle {
    pub fn new(kernel: Kernel) -> Self {
        Self(Arc::new(Mutex::new(kernel)))
    }

    pub fn with_config(config: KernelConfig) -> Self {
        Self::new(Kernel::new(config))
    }

    /// Lock the kernel
    ///
    /// A domain that panicked while holding the lock does not wedge the
    /// kernel; the poisoned guard is recovered.
    pub fn lock(&self) -> MutexGuard<'_, Kernel> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` under the kernel lock
    pub fn with<R>(&self, f: impl FnOnce(&mut Kernel) -> R) -> R {
        f(&mut self.lock())
    }

    /// Create a protection domain
    pub fn create_domain(&self, config: DomainConfig) -> DomainId {
        self.with(|kernel| kernel.create_domain(config))
    }
}
