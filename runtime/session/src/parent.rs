//! Parent interface
//!
//! The generic session RPCs a domain issues to whoever brokers its sessions.
//! [`crate::BrokerParent`] implements it on top of a [`crate::SessionBroker`];
//! [`crate::service::ParentService`] consumes it to forward requests one level
//! up the hierarchy.

use cap_identity::Capability;

use crate::args::SessionArgs;
use crate::error::Result;
use crate::id_space::ClientId;
use crate::resources::Affinity;
use crate::state::Phase;

/// Reply to a session request or poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionReply {
    /// Capability installed in the requesting domain
    Ready(Capability),
    /// Still being negotiated; a `SessionResponse` signal follows
    Pending,
}

/// Reply to an upgrade request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeResult {
    Done,
    Pending,
}

/// Reply to a close request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseResult {
    Done,
    Pending,
}

/// Server's answer to a pending request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionResponse {
    /// Upgrade applied
    Ok,
    /// Session resources released
    Closed,
    ServiceDenied,
    InsufficientRamQuota,
    InsufficientCapQuota,
}

/// Session RPC surface of a domain's parent
pub trait Parent: Send + Sync {
    /// Request a session; `id` is chosen by the caller
    fn session(
        &self,
        service: &str,
        id: ClientId,
        args: &SessionArgs,
        affinity: &Affinity,
    ) -> Result<SessionReply>;

    /// Poll a pending session request
    fn session_cap(&self, id: ClientId) -> Result<SessionReply>;

    /// Donate more quota to an established session
    fn upgrade(&self, id: ClientId, args: &SessionArgs) -> Result<UpgradeResult>;

    /// End a session
    fn close(&self, id: ClientId) -> CloseResult;

    /// Phase of a session this domain requested
    ///
    /// A closed session is still reported until its teardown has finished;
    /// `None` means the parent holds no record of it any more.
    fn phase(&self, id: ClientId) -> Option<Phase>;
}
