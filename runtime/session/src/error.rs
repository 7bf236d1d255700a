//! Session-layer errors
//!
//! Negotiation outcomes live in [`crate::Phase`]. These types are what a caller
//! observes once a phase has been read, plus the fail-fast protocol errors.

use cap_identity::{CapabilityError, Resource};
use thiserror::Error;

use crate::state::Phase;

/// Outcome of a failed session creation
///
/// Each variant corresponds to exactly one terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CreateError {
    #[error("denied")]
    Denied,

    #[error("insufficient RAM quota")]
    InsufficientRamQuota,

    #[error("insufficient cap quota")]
    InsufficientCapQuota,
}

impl CreateError {
    /// Terminal phase a session enters on this error
    pub fn phase(self) -> Phase {
        match self {
            CreateError::Denied => Phase::InvalidArgs,
            CreateError::InsufficientRamQuota => Phase::InsufficientRamQuota,
            CreateError::InsufficientCapQuota => Phase::InsufficientCapQuota,
        }
    }

    /// Error reported for a failed creation phase
    pub fn from_phase(phase: Phase) -> Option<Self> {
        match phase {
            Phase::InvalidArgs => Some(CreateError::Denied),
            Phase::InsufficientRamQuota => Some(CreateError::InsufficientRamQuota),
            Phase::InsufficientCapQuota => Some(CreateError::InsufficientCapQuota),
            _ => None,
        }
    }

    pub(crate) fn for_resource(resource: Resource) -> Self {
        match resource {
            Resource::Ram => CreateError::InsufficientRamQuota,
            Resource::Caps => CreateError::InsufficientCapQuota,
        }
    }
}

/// Quota transfer failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("{resource} quota exceeded (requested: {requested}, available: {available})")]
    Exceeded {
        resource: Resource,
        requested: u64,
        available: u64,
    },

    #[error("invalid account")]
    InvalidAccount,
}

impl TransferError {
    /// Resource whose account ran dry, if any
    pub fn resource(&self) -> Option<Resource> {
        match self {
            TransferError::Exceeded { resource, .. } => Some(*resource),
            TransferError::InvalidAccount => None,
        }
    }
}

impl From<CapabilityError> for TransferError {
    fn from(err: CapabilityError) -> Self {
        match err {
            CapabilityError::InsufficientQuota {
                resource,
                requested,
                available,
            } => TransferError::Exceeded {
                resource,
                requested,
                available,
            },
            _ => TransferError::InvalidAccount,
        }
    }
}

/// Session argument buffer errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgsError {
    #[error("argument buffer overflow ({needed} bytes, limit {limit})")]
    Overflow { needed: usize, limit: usize },

    #[error("invalid argument key '{0}'")]
    InvalidKey(String),
}

/// Errors surfaced by the session layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("service creation failed: {0}")]
    Create(#[from] CreateError),

    #[error("service '{0}' not available")]
    ServiceUnavailable(String),

    #[error("service '{0}' already announced")]
    AlreadyAnnounced(String),

    #[error("quota transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("capability operation failed: {0}")]
    Capability(#[from] CapabilityError),

    #[error("malformed session arguments: {0}")]
    Args(#[from] ArgsError),

    #[error("unknown session {0}")]
    UnknownSession(u64),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("entrypoint closed")]
    EntrypointClosed,
}

impl SessionError {
    /// Fail-fast protocol violation, logged at `error` level
    pub(crate) fn protocol(msg: String) -> Self {
        log::error!("session protocol violation: {}", msg);
        SessionError::Protocol(msg)
    }
}

pub type Result<T> = core::result::Result<T, SessionError>;
