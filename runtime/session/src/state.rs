//! Session State Machine
//!
//! # Phases
//! ```text
//! CreateRequested ─┬─> Available ──> CapHandedOut ─┬─> UpgradeRequested ─┐
//!                  ├─> InvalidArgs         ^       │                    │
//!                  ├─> InsufficientRamQuota │       └─> CloseRequested ──> Closed
//!                  └─> InsufficientCapQuota └────────────────────────────┘
//! ```
//! `InvalidArgs`, `InsufficientRamQuota`, `InsufficientCapQuota` and `Closed`
//! are terminal. [`SessionState::advance`] refuses every other transition
//! and leaves the state untouched.
//!
//! # Quota Bookkeeping
//! Quota the client donated and the server accepted is tracked in the
//! `donated_*` totals. An upgrade in flight keeps its deltas in
//! `ram_upgrade`/`cap_upgrade` until [`SessionState::confirm_upgrade`] folds
//! them into the totals. Both are returned to the client when the session
//! record is reclaimed.

use core::fmt;

use bitflags::bitflags;
use cap_identity::{Capability, DomainId, ObjectId};

use crate::args::SessionArgs;
use crate::error::{Result, SessionError};
use crate::id_space::{ClientId, ServerId};
use crate::resources::{Affinity, Resources};

/// Negotiation phase of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    CreateRequested,
    Available,
    InvalidArgs,
    InsufficientRamQuota,
    InsufficientCapQuota,
    CapHandedOut,
    UpgradeRequested,
    CloseRequested,
    Closed,
}

impl Phase {
    /// True if `next` is a legal successor of `self`
    pub fn can_advance_to(self, next: Phase) -> bool {
        use Phase::*;

        matches!(
            (self, next),
            (
                CreateRequested,
                Available | InvalidArgs | InsufficientRamQuota | InsufficientCapQuota
            ) | (Available, CapHandedOut)
                | (CapHandedOut, UpgradeRequested | CloseRequested)
                | (UpgradeRequested, CapHandedOut)
                | (CloseRequested, Closed)
        )
    }

    /// No transition leaves this phase
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Phase::InvalidArgs
                | Phase::InsufficientRamQuota
                | Phase::InsufficientCapQuota
                | Phase::Closed
        )
    }

    /// Waiting for the client to drive the session forward
    pub fn is_dormant(self) -> bool {
        matches!(self, Phase::Available | Phase::CapHandedOut)
    }

    /// Waiting for the serving side to act
    pub fn awaits_server(self) -> bool {
        matches!(
            self,
            Phase::CreateRequested | Phase::UpgradeRequested | Phase::CloseRequested
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::CreateRequested => "CREATE_REQUESTED",
            Phase::Available => "AVAILABLE",
            Phase::InvalidArgs => "INVALID_ARGS",
            Phase::InsufficientRamQuota => "INSUFFICIENT_RAM_QUOTA",
            Phase::InsufficientCapQuota => "INSUFFICIENT_CAP_QUOTA",
            Phase::CapHandedOut => "CAP_HANDED_OUT",
            Phase::UpgradeRequested => "UPGRADE_REQUESTED",
            Phase::CloseRequested => "CLOSE_REQUESTED",
            Phase::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

bitflags! {
    /// Per-session protocol flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SessionFlags: u8 {
        /// Served asynchronously; the client is notified on every response
        const ASYNC_CLIENT_NOTIFY = 1 << 0;
        /// Client closed the session before it was handed out
        const ABANDONED           = 1 << 1;
        /// Client closed the session while an upgrade was in flight
        const CLOSE_PENDING       = 1 << 2;
    }
}

/// One negotiated client/server relationship
#[derive(Debug)]
pub struct SessionState {
    service: String,
    args: SessionArgs,
    upgrade_args: SessionArgs,
    affinity: Affinity,
    phase: Phase,

    ram_upgrade: u64,
    cap_upgrade: u64,
    donated_ram: u64,
    donated_caps: u64,

    local: Option<ObjectId>,
    cap: Option<Capability>,
    client_cap: Option<Capability>,

    client: DomainId,
    client_id: ClientId,
    id_at_server: Option<ServerId>,
    id_at_parent: Option<ClientId>,

    flags: SessionFlags,
}

impl SessionState {
    /// Fresh session record in `CreateRequested`
    pub fn new(
        service: &str,
        args: SessionArgs,
        affinity: Affinity,
        client: DomainId,
        client_id: ClientId,
    ) -> Self {
        Self {
            service: String::from(service),
            args,
            upgrade_args: SessionArgs::new(),
            affinity,
            phase: Phase::CreateRequested,
            ram_upgrade: 0,
            cap_upgrade: 0,
            donated_ram: 0,
            donated_caps: 0,
            local: None,
            cap: None,
            client_cap: None,
            client,
            client_id,
            id_at_server: None,
            id_at_parent: None,
            flags: SessionFlags::empty(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Session arguments as seen by the server
    pub fn args(&self) -> &SessionArgs {
        &self.args
    }

    /// Arguments of the upgrade in flight
    pub fn upgrade_args(&self) -> &SessionArgs {
        &self.upgrade_args
    }

    pub fn affinity(&self) -> &Affinity {
        &self.affinity
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn client(&self) -> DomainId {
        self.client
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Server-side implementation object, once constructed
    pub fn local(&self) -> Option<ObjectId> {
        self.local
    }

    /// Session capability in the serving domain
    pub fn cap(&self) -> Option<Capability> {
        self.cap
    }

    /// Session capability in the client domain, once handed out
    pub fn client_cap(&self) -> Option<Capability> {
        self.client_cap
    }

    pub fn id_at_server(&self) -> Option<ServerId> {
        self.id_at_server
    }

    pub fn id_at_parent(&self) -> Option<ClientId> {
        self.id_at_parent
    }

    pub fn flags(&self) -> SessionFlags {
        self.flags
    }

    /// Pending upgrade deltas
    pub fn pending_upgrade(&self) -> Resources {
        Resources::new(self.ram_upgrade, self.cap_upgrade)
    }

    /// Quota accepted by the server so far
    pub fn donated(&self) -> Resources {
        Resources::new(self.donated_ram, self.donated_caps)
    }

    /// Donated quota plus any unconfirmed upgrade
    pub fn outstanding_quota(&self) -> Resources {
        Resources::new(
            self.donated_ram + self.ram_upgrade,
            self.donated_caps + self.cap_upgrade,
        )
    }

    /// Move to `next`, refusing anything off the phase diagram
    pub fn advance(&mut self, next: Phase) -> Result<()> {
        if !self.phase.can_advance_to(next) {
            return Err(SessionError::protocol(format!(
                "session '{}' ({:?}): illegal transition {} -> {}",
                self.service, self.client_id, self.phase, next
            )));
        }

        log::debug!(
            "session '{}' ({:?}): {} -> {}",
            self.service,
            self.client_id,
            self.phase,
            next
        );
        self.phase = next;
        Ok(())
    }

    /// Record the session capability produced by the server
    pub fn deliver(&mut self, cap: Capability) -> Result<()> {
        if self.cap.is_some() {
            return Err(SessionError::protocol(format!(
                "session '{}' ({:?}): capability delivered twice",
                self.service, self.client_id
            )));
        }
        self.advance(Phase::Available)?;
        self.cap = Some(cap);
        Ok(())
    }

    /// Confirm the upgrade in flight and return to `CapHandedOut`
    pub fn confirm_upgrade(&mut self) -> Result<()> {
        self.advance(Phase::CapHandedOut)?;
        self.donated_ram += self.ram_upgrade;
        self.donated_caps += self.cap_upgrade;
        self.ram_upgrade = 0;
        self.cap_upgrade = 0;
        self.upgrade_args = SessionArgs::new();
        Ok(())
    }

    pub(crate) fn set_local(&mut self, object: ObjectId) {
        self.local = Some(object);
    }

    pub(crate) fn take_local(&mut self) -> Option<ObjectId> {
        self.local.take()
    }

    pub(crate) fn set_id_at_server(&mut self, id: Option<ServerId>) {
        self.id_at_server = id;
    }

    pub(crate) fn set_id_at_parent(&mut self, id: ClientId) {
        self.id_at_parent = Some(id);
    }

    pub(crate) fn insert_flags(&mut self, flags: SessionFlags) {
        self.flags.insert(flags);
    }

    pub(crate) fn remove_flags(&mut self, flags: SessionFlags) {
        self.flags.remove(flags);
    }

    pub(crate) fn hand_out(&mut self, client_cap: Capability) -> Result<()> {
        self.advance(Phase::CapHandedOut)?;
        self.client_cap = Some(client_cap);
        Ok(())
    }

    /// Walk an available session straight to `CapHandedOut` without a client
    /// capability (abandoned sessions)
    pub(crate) fn skip_hand_out(&mut self) -> Result<()> {
        self.advance(Phase::CapHandedOut)
    }

    pub(crate) fn take_client_cap(&mut self) -> Option<Capability> {
        self.client_cap.take()
    }

    pub(crate) fn record_donation(&mut self, donation: Resources) {
        self.donated_ram += donation.ram_quota.0;
        self.donated_caps += donation.cap_quota.0;
    }

    pub(crate) fn request_upgrade(&mut self, delta: Resources) -> Result<()> {
        let args = delta.to_args()?;
        self.advance(Phase::UpgradeRequested)?;
        self.ram_upgrade = delta.ram_quota.0;
        self.cap_upgrade = delta.cap_quota.0;
        self.upgrade_args = args;
        Ok(())
    }

    pub(crate) fn request_close(&mut self) -> Result<()> {
        self.advance(Phase::CloseRequested)
    }
}
