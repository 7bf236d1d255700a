//! KaaL Session - negotiated client/server sessions over capabilities
//!
//! # Purpose
//! A session is a long-lived relationship between a client domain and a
//! named service. This crate implements the protocol that turns a session
//! request into a capability in the client's capability space, moves RAM and
//! capability-slot quota between the parties when the session is created or
//! upgraded, and returns it when the session ends.
//!
//! # Integration Points
//! - Depends on: `cap-identity` (capability spaces, identity graph, quota
//!   accounts)
//! - Provides to: servers ([`SessionFactory`], [`SessionBroker`] server API)
//!   and clients ([`Connection`])
//!
//! # Architecture
//! ```text
//! Connection ──Parent──> SessionBroker ──> Service ──┬─ Local   (SessionFactory)
//!                            │                        ├─ Parent  (one level up)
//!                            │                        ├─ Async   (server id space)
//!                            │                        └─ Child   (async + child accounts)
//!                            └─ Arena<SessionState>   phase state machine
//! ```
//!
//! # Concurrency
//! Each domain blocks only in [`Entrypoint::wait_signal`]. The kernel and the
//! broker are shared behind poison-tolerant mutexes ([`KernelHandle`],
//! [`BrokerHandle`]); cross-domain effects are single kernel operations.
//!
//! # Testing Strategy
//! - Unit tests: argument parsing, phase table, transfer guard, each service
//!   variant
//! - Integration tests: end-to-end negotiation with local, child-backed and
//!   forwarded services, including servers on their own threads

pub mod args;
pub mod broker;
pub mod config;
pub mod connection;
pub mod entrypoint;
pub mod error;
pub mod id_space;
pub mod kernel;
pub mod parent;
pub mod resources;
pub mod service;
pub mod state;
pub mod transfer;

pub use args::SessionArgs;
pub use broker::{close_target, BrokerHandle, BrokerParent, RequestKind, SessionBroker, SessionRequest};
pub use config::{SessionConfig, MAX_ARGS_LEN, MAX_SERVICE_NAME_LEN};
pub use connection::{Connection, Env, SessionType};
pub use entrypoint::{Entrypoint, ManagedObject, Signal};
pub use error::{ArgsError, CreateError, Result, SessionError, TransferError};
pub use id_space::{ClientId, IdSpace, ServerId, SessionKey};
pub use kernel::KernelHandle;
pub use parent::{CloseResult, Parent, SessionReply, SessionResponse, UpgradeResult};
pub use resources::{Affinity, CapQuota, Quota, RamQuota, Resources};
pub use service::{
    AsyncService, ChildService, Dispatch, LocalService, ParentService, Service, SessionFactory,
};
pub use state::{Phase, SessionFlags, SessionState};
pub use transfer::{Account, AccountCapability, DomainAccount, NullAccount, QuotaTransfer};
