//! Typed quota amounts and session placement hints

use cap_identity::Resource;

use crate::args::SessionArgs;
use crate::error::ArgsError;

/// Amount of one accounted resource
pub trait Quota: Copy + Send + Sync + core::fmt::Debug + 'static {
    /// Accounted resource this amount is measured in
    const RESOURCE: Resource;

    /// Argument key carrying this amount
    const ARG_KEY: &'static str;

    fn new(value: u64) -> Self;

    fn value(&self) -> u64;
}

/// Memory quota in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct RamQuota(pub u64);

/// Capability-slot quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct CapQuota(pub u64);

impl Quota for RamQuota {
    const RESOURCE: Resource = Resource::Ram;
    const ARG_KEY: &'static str = "ram_quota";

    fn new(value: u64) -> Self {
        RamQuota(value)
    }

    #[inline]
    fn value(&self) -> u64 {
        self.0
    }
}

impl Quota for CapQuota {
    const RESOURCE: Resource = Resource::Caps;
    const ARG_KEY: &'static str = "cap_quota";

    fn new(value: u64) -> Self {
        CapQuota(value)
    }

    #[inline]
    fn value(&self) -> u64 {
        self.0
    }
}

/// Quota donated with a session request or upgrade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Resources {
    pub ram_quota: RamQuota,
    pub cap_quota: CapQuota,
}

impl Resources {
    pub fn new(ram: u64, caps: u64) -> Self {
        Self {
            ram_quota: RamQuota(ram),
            cap_quota: CapQuota(caps),
        }
    }

    /// Read `ram_quota` and `cap_quota`, missing keys count as zero
    pub fn from_args(args: &SessionArgs) -> Self {
        Self::new(
            args.ulong_value(RamQuota::ARG_KEY, 0),
            args.ulong_value(CapQuota::ARG_KEY, 0),
        )
    }

    /// Write both amounts into `args`
    pub fn write_to(&self, args: &mut SessionArgs) -> Result<(), ArgsError> {
        args.set_ulong(RamQuota::ARG_KEY, self.ram_quota.0)?;
        args.set_ulong(CapQuota::ARG_KEY, self.cap_quota.0)
    }

    /// Argument string holding only the two amounts
    pub fn to_args(&self) -> Result<SessionArgs, ArgsError> {
        let mut args = SessionArgs::new();
        self.write_to(&mut args)?;
        Ok(args)
    }

    pub fn is_zero(&self) -> bool {
        self.ram_quota.0 == 0 && self.cap_quota.0 == 0
    }
}

/// Placement hint passed through to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Affinity {
    pub xpos: i32,
    pub ypos: i32,
    pub width: u32,
    pub height: u32,
}

impl Default for Affinity {
    fn default() -> Self {
        Self {
            xpos: 0,
            ypos: 0,
            width: 1,
            height: 1,
        }
    }
}
