//! Kernel and domain configuration

use alloc::string::String;

use static_assertions::const_assert;

use crate::CapId;

/// Id never handed out by any allocator
pub const INVALID_CAP_ID: CapId = 0;

/// First id handed out by default
pub const DEFAULT_FIRST_CAP_ID: CapId = 1;

/// Default size of each domain's id range
pub const DEFAULT_MAX_CAP_IDS: CapId = 1 << 16;

/// Default RAM grant of a new domain (1MB)
pub const DEFAULT_RAM_QUOTA: u64 = 1024 * 1024;

/// Default capability-slot grant of a new domain
pub const DEFAULT_CAP_QUOTA: u64 = 64;

const_assert!(DEFAULT_FIRST_CAP_ID > INVALID_CAP_ID);
const_assert!(DEFAULT_MAX_CAP_IDS > DEFAULT_FIRST_CAP_ID);

/// Kernel-wide configuration
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// First id of every domain's id range
    pub first_cap_id: CapId,

    /// End (exclusive) of every domain's id range
    pub max_cap_ids: CapId,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            first_cap_id: DEFAULT_FIRST_CAP_ID,
            max_cap_ids: DEFAULT_MAX_CAP_IDS,
        }
    }
}

/// Initial configuration of a protection domain
#[derive(Debug, Clone)]
pub struct DomainConfig {
    /// Domain label (used for session-label prefixing and diagnostics)
    pub label: String,

    /// Initial RAM grant in bytes
    pub ram_quota: u64,

    /// Initial capability-slot grant
    pub cap_quota: u64,
}

impl DomainConfig {
    /// Configuration with default quotas
    pub fn new(label: &str) -> Self {
        Self {
            label: String::from(label),
            ..Default::default()
        }
    }

    /// Set the RAM grant
    pub fn ram_quota(mut self, bytes: u64) -> Self {
        self.ram_quota = bytes;
        self
    }

    /// Set the capability-slot grant
    pub fn cap_quota(mut self, caps: u64) -> Self {
        self.cap_quota = caps;
        self
    }
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            label: String::from("domain"),
            ram_quota: DEFAULT_RAM_QUOTA,
            cap_quota: DEFAULT_CAP_QUOTA,
        }
    }
}
