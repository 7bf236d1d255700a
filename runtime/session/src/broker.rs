//! Session Broker - parent-side session management
//!
//! # Purpose
//! The broker owns every [`SessionState`] of the domains it parents. It
//! resolves service names, moves the client's quota donation to the service's
//! account, drives each session through its [`Service`], and hands the
//! resulting capability into the client's capability space.
//!
//! # Integration Points
//! - Clients: [`SessionBroker::session`], [`SessionBroker::session_cap`],
//!   [`SessionBroker::upgrade`], [`SessionBroker::close`] (usually through
//!   [`BrokerParent`])
//! - Async servers: [`SessionBroker::pending_requests`],
//!   [`SessionBroker::deliver_session_cap`], [`SessionBroker::session_response`]
//! - Forwarding domains: [`SessionBroker::dispatch_pending`] after a parent
//!   response signal
//!
//! # Ids
//! A session is reachable by `(client domain, ClientId)` until the client
//! closes it, and by `(server domain, ServerId)` while an async server works
//! on it. The record itself lives until the session reaches a terminal phase
//! and every party that needs to observe that phase has done so.
//!
//! # Locking
//! The broker is shared as [`BrokerHandle`]. The kernel lock is taken per
//! kernel operation and is never held while a service factory runs.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cap_identity::{Arena, Capability, DomainId, ObjectId};
use crossbeam::channel::Sender;
use static_assertions::assert_impl_all;

use crate::args::SessionArgs;
use crate::config::{SessionConfig, MAX_SERVICE_NAME_LEN};
use crate::entrypoint::Signal;
use crate::error::{ArgsError, CreateError, Result, SessionError, TransferError};
use crate::id_space::{ClientId, IdSpace, ServerId, SessionKey};
use crate::kernel::KernelHandle;
use crate::parent::{CloseResult, Parent, SessionReply, SessionResponse, UpgradeResult};
use crate::resources::{Affinity, CapQuota, Quota, RamQuota, Resources};
use crate::service::{Dispatch, ServerIds, Service};
use crate::state::{Phase, SessionFlags, SessionState};
use crate::transfer::{Account, DomainAccount, QuotaTransfer};

/// Request awaiting a server decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub id: ServerId,
    pub service: String,
    pub kind: RequestKind,
}

/// What the server is asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    /// Build the session object, then deliver its capability
    Create { args: SessionArgs, affinity: Affinity },
    /// Accept additional quota, then respond `Ok`
    Upgrade { args: SessionArgs, resources: Resources },
    /// Release the session object, then respond `Closed`
    Close { cap: Option<Capability> },
}

#[derive(Default)]
struct ClientRecord {
    sigh: Option<Sender<Signal>>,
    ids: IdSpace<ClientId, SessionKey>,
    /// Sessions the client closed whose server side is still tearing down
    closing: IdSpace<ClientId, SessionKey>,
}

/// Sessions and services of one brokering domain
pub struct SessionBroker {
    domain: DomainId,
    kernel: KernelHandle,
    config: SessionConfig,
    services: BTreeMap<String, Service>,
    sessions: Arena<SessionState>,
    clients: BTreeMap<DomainId, ClientRecord>,
    servers: ServerIds,
}

assert_impl_all!(SessionBroker: Send);

impl SessionBroker {
    /// Broker running in `domain`
    pub fn new(kernel: KernelHandle, domain: DomainId, config: SessionConfig) -> Self {
        Self {
            domain,
            kernel,
            config,
            services: BTreeMap::new(),
            sessions: Arena::new(),
            clients: BTreeMap::new(),
            servers: ServerIds::new(),
        }
    }

    pub fn domain(&self) -> DomainId {
        self.domain
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Make a service available under its name
    pub fn announce(&mut self, service: impl Into<Service>) -> Result<()> {
        let service = service.into();
        let name = String::from(service.name());

        if name.len() > MAX_SERVICE_NAME_LEN {
            return Err(ArgsError::Overflow {
                needed: name.len(),
                limit: MAX_SERVICE_NAME_LEN,
            }
            .into());
        }
        if self.services.contains_key(&name) {
            return Err(SessionError::AlreadyAnnounced(name));
        }

        log::debug!("announced service '{}' served by {:?}", name, service.server());
        self.services.insert(name, service);
        Ok(())
    }

    pub fn has_service(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Register a client domain and the signal sender for its session responses
    pub fn register_client(&mut self, client: DomainId, sigh: Sender<Signal>) {
        self.clients.entry(client).or_default().sigh = Some(sigh);
    }

    /// Number of live session records
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Session record as seen by its client
    pub fn session_state(&self, client: DomainId, id: ClientId) -> Option<&SessionState> {
        let key = self.client_key(client, id).ok()?;
        self.sessions.get(key.0)
    }

    /// Session record as seen by its server
    pub fn server_session(&self, server: DomainId, id: ServerId) -> Option<&SessionState> {
        let key = self.server_key(server, id).ok()?;
        self.sessions.get(key.0)
    }

    /// Phase of a client's session
    ///
    /// A session the client has closed is still reported until it has been
    /// reclaimed.
    pub fn phase(&self, client: DomainId, id: ClientId) -> Option<Phase> {
        let record = self.clients.get(&client)?;
        let key = record.ids.get(id).or_else(|| record.closing.get(id))?;
        self.sessions.get(key.0).map(SessionState::phase)
    }

    // ------------------------------------------------------------------
    // Client side
    // ------------------------------------------------------------------

    /// Request a session of `service` for `client`
    ///
    /// # Errors
    /// - `ServiceUnavailable` if no service has that name; no session record
    ///   is created
    /// - `Create` if the session ends in a failure phase; the client's
    ///   donation is returned
    pub fn session(
        &mut self,
        client: DomainId,
        id: ClientId,
        service: &str,
        args: &SessionArgs,
        affinity: &Affinity,
    ) -> Result<SessionReply> {
        let closing = self
            .clients
            .get(&client)
            .is_some_and(|record| record.closing.contains(id));
        if closing || self.client_key(client, id).is_ok() {
            return Err(SessionError::protocol(format!(
                "{:?} reused session id {:?}",
                client, id
            )));
        }

        let Some(svc) = self.services.get(service) else {
            log::debug!("{:?} requested unknown service '{}'", client, service);
            return Err(SessionError::ServiceUnavailable(String::from(service)));
        };

        let mut args = args.clone();
        if self.config.prefix_labels {
            let client_label = self
                .kernel
                .with(|kernel| kernel.domain_label(client).map(String::from))
                .unwrap_or_default();
            let label = self.config.session_label(&client_label, args.label());
            args.set_str("label", &label)?;
        }

        let resources = Resources::from_args(&args);
        let client_account = DomainAccount::new(self.kernel.clone(), client);
        let mut ram = QuotaTransfer::<RamQuota>::new(
            Box::new(client_account.clone()),
            svc.ram_account(),
            resources.ram_quota,
        )
        .map_err(creation_shortfall)?;
        let mut caps = QuotaTransfer::<CapQuota>::new(
            Box::new(client_account),
            svc.cap_account(),
            resources.cap_quota,
        )
        .map_err(creation_shortfall)?;

        let state = SessionState::new(service, args, *affinity, client, id);
        let key = SessionKey(self.sessions.insert(state));
        self.clients.entry(client).or_default().ids.insert_at(id, key);

        if let Err(err) = self.dispatch(key) {
            self.reclaim(key);
            return Err(err);
        }

        if self.phase_of(key).is_some_and(Phase::is_terminal) {
            // Dropping the guards returns the donation
            return Err(self.finish(key));
        }

        ram.acknowledge();
        caps.acknowledge();
        if let Some(session) = self.sessions.get_mut(key.0) {
            session.record_donation(Resources::new(ram.transferred(), caps.transferred()));
        }

        self.reply(key)
    }

    /// Poll a pending session request
    pub fn session_cap(&mut self, client: DomainId, id: ClientId) -> Result<SessionReply> {
        let key = self.client_key(client, id)?;
        self.dispatch(key)?;
        self.reply(key)
    }

    /// Donate the quota named in `args` to an established session
    ///
    /// A shortfall on the client side is reported as `Transfer` and leaves
    /// the session in `CapHandedOut`.
    pub fn upgrade(
        &mut self,
        client: DomainId,
        id: ClientId,
        args: &SessionArgs,
    ) -> Result<UpgradeResult> {
        let key = self.client_key(client, id)?;
        match self.phase_of(key) {
            Some(Phase::CapHandedOut) => {}
            Some(Phase::UpgradeRequested) => return Ok(UpgradeResult::Pending),
            phase => {
                return Err(SessionError::protocol(format!(
                    "upgrade of {:?} in phase {:?}",
                    id, phase
                )))
            }
        }

        let delta = Resources::from_args(args);
        if delta.is_zero() {
            return Ok(UpgradeResult::Done);
        }

        let (mut ram, mut caps) = {
            let session = self.session_ref(key)?;
            let service = self.service_of(session)?;
            let client_account = DomainAccount::new(self.kernel.clone(), client);

            let ram = QuotaTransfer::<RamQuota>::new(
                Box::new(client_account.clone()),
                service.ram_account(),
                delta.ram_quota,
            )
            .map_err(|err| upgrade_shortfall(session, err))?;
            let caps = QuotaTransfer::<CapQuota>::new(
                Box::new(client_account),
                service.cap_account(),
                delta.cap_quota,
            )
            .map_err(|err| upgrade_shortfall(session, err))?;
            (ram, caps)
        };

        if let Some(session) = self.sessions.get_mut(key.0) {
            session.request_upgrade(delta)?;
        }
        ram.acknowledge();
        caps.acknowledge();

        self.dispatch(key)?;
        match self.phase_of(key) {
            Some(Phase::CapHandedOut) => Ok(UpgradeResult::Done),
            _ => Ok(UpgradeResult::Pending),
        }
    }

    /// End a session
    ///
    /// The client's capability is released at once; the server tears down
    /// its side afterwards.
    pub fn close(&mut self, client: DomainId, id: ClientId) -> CloseResult {
        let Some(key) = self
            .clients
            .get_mut(&client)
            .and_then(|record| record.ids.remove(id))
        else {
            return CloseResult::Done;
        };

        match self.close_session(key) {
            Ok(CloseResult::Pending) => {
                if let Some(record) = self.clients.get_mut(&client) {
                    record.closing.insert_at(id, key);
                }
                CloseResult::Pending
            }
            Ok(CloseResult::Done) => CloseResult::Done,
            Err(err) => {
                log::error!("close of {:?} by {:?} failed: {}", id, client, err);
                CloseResult::Pending
            }
        }
    }

    /// Close every session of a client domain that is going away
    pub fn destroy_client(&mut self, client: DomainId) {
        let Some(record) = self.clients.remove(&client) else {
            return;
        };

        for (id, key) in record.ids.iter() {
            if let Err(err) = self.close_session(*key) {
                log::error!("closing {:?} of dead {:?} failed: {}", id, client, err);
            }
        }
        log::debug!("dropped {} sessions of {:?}", record.ids.len(), client);
    }

    // ------------------------------------------------------------------
    // Server side
    // ------------------------------------------------------------------

    /// Requests in `server`'s id space awaiting a decision
    pub fn pending_requests(&self, server: DomainId) -> Vec<SessionRequest> {
        let Some(space) = self.servers.get(&server) else {
            return Vec::new();
        };

        space
            .iter()
            .filter_map(|(id, key)| {
                let session = self.sessions.get(key.0)?;
                let kind = match session.phase() {
                    Phase::CreateRequested => RequestKind::Create {
                        args: session.args().clone(),
                        affinity: *session.affinity(),
                    },
                    Phase::UpgradeRequested => RequestKind::Upgrade {
                        args: session.upgrade_args().clone(),
                        resources: session.pending_upgrade(),
                    },
                    Phase::CloseRequested => RequestKind::Close { cap: session.cap() },
                    _ => return None,
                };
                Some(SessionRequest {
                    id,
                    service: String::from(session.service()),
                    kind,
                })
            })
            .collect()
    }

    /// Server hands over the capability of a requested session
    ///
    /// `cap` must live in the server's own domain.
    pub fn deliver_session_cap(
        &mut self,
        server: DomainId,
        id: ServerId,
        cap: Capability,
    ) -> Result<()> {
        if cap.domain() != server {
            return Err(SessionError::protocol(format!(
                "{:?} delivered a capability of {:?}",
                server,
                cap.domain()
            )));
        }

        let key = self.server_key(server, id)?;
        self.session_mut(key)?.deliver(cap)?;
        self.settle(key)
    }

    /// Server answers a pending request
    pub fn session_response(
        &mut self,
        server: DomainId,
        id: ServerId,
        response: SessionResponse,
    ) -> Result<()> {
        let key = self.server_key(server, id)?;
        let session = self.session_mut(key)?;

        match response {
            SessionResponse::Ok => {
                if session.phase() != Phase::UpgradeRequested {
                    log::warn!(
                        "{:?}: unexpected OK for session {:?} in {}",
                        server,
                        id,
                        session.phase()
                    );
                    return Ok(());
                }
                session.confirm_upgrade()?;
            }
            SessionResponse::Closed => session.advance(Phase::Closed)?,
            SessionResponse::ServiceDenied => session.advance(Phase::InvalidArgs)?,
            SessionResponse::InsufficientRamQuota => {
                session.advance(Phase::InsufficientRamQuota)?
            }
            SessionResponse::InsufficientCapQuota => {
                session.advance(Phase::InsufficientCapQuota)?
            }
        }

        self.settle(key)
    }

    // ------------------------------------------------------------------
    // Forwarding side
    // ------------------------------------------------------------------

    /// Re-enter every session that waits on a backend
    ///
    /// Called when a parent response signal arrives at the brokering domain.
    pub fn dispatch_pending(&mut self) {
        let pending: Vec<SessionKey> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.phase().awaits_server())
            .map(|(index, _)| SessionKey(index))
            .collect();

        for key in pending {
            if let Err(err) = self.dispatch(key).and_then(|_| self.settle(key)) {
                log::error!("re-dispatch of {:?} failed: {}", key, err);
            }
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn client_key(&self, client: DomainId, id: ClientId) -> Result<SessionKey> {
        self.clients
            .get(&client)
            .and_then(|record| record.ids.get(id))
            .copied()
            .ok_or(SessionError::UnknownSession(id.0))
    }

    fn server_key(&self, server: DomainId, id: ServerId) -> Result<SessionKey> {
        self.servers
            .get(&server)
            .and_then(|space| space.get(id))
            .copied()
            .ok_or(SessionError::UnknownSession(id.0))
    }

    fn phase_of(&self, key: SessionKey) -> Option<Phase> {
        self.sessions.get(key.0).map(SessionState::phase)
    }

    fn session_ref(&self, key: SessionKey) -> Result<&SessionState> {
        self.sessions
            .get(key.0)
            .ok_or_else(|| SessionError::protocol(format!("stale session key {:?}", key)))
    }

    fn session_mut(&mut self, key: SessionKey) -> Result<&mut SessionState> {
        self.sessions
            .get_mut(key.0)
            .ok_or_else(|| SessionError::protocol(format!("stale session key {:?}", key)))
    }

    fn service_of(&self, session: &SessionState) -> Result<&Service> {
        self.services.get(session.service()).ok_or_else(|| {
            SessionError::protocol(format!("service '{}' vanished", session.service()))
        })
    }

    /// One `initiate_request` on the session's service
    fn dispatch(&mut self, key: SessionKey) -> Result<()> {
        let Self {
            services,
            sessions,
            servers,
            ..
        } = self;

        let Some(session) = sessions.get_mut(key.0) else {
            return Ok(());
        };
        let Some(service) = services.get_mut(session.service()) else {
            return Err(SessionError::protocol(format!(
                "service '{}' vanished",
                session.service()
            )));
        };

        let mut ctx = Dispatch::new(key, servers);
        service.initiate_request(session, &mut ctx)?;

        if session.phase().awaits_server() {
            service.wakeup();
        }
        Ok(())
    }

    /// Reply to the client for the session's current phase
    fn reply(&mut self, key: SessionKey) -> Result<SessionReply> {
        let session = self.session_ref(key)?;
        match session.phase() {
            Phase::CreateRequested => Ok(SessionReply::Pending),
            Phase::Available => self.hand_out(key),
            Phase::CapHandedOut | Phase::UpgradeRequested => session
                .client_cap()
                .map(SessionReply::Ready)
                .ok_or_else(|| SessionError::protocol(format!("{:?} has no client cap", key))),
            Phase::CloseRequested => Err(SessionError::UnknownSession(session.client_id().0)),
            _ => Err(self.finish(key)),
        }
    }

    /// Install the server's capability in the client's domain
    fn hand_out(&mut self, key: SessionKey) -> Result<SessionReply> {
        let session = self.session_ref(key)?;
        let (client, id) = (session.client(), session.client_id());
        let Some(cap) = session.cap() else {
            return Err(SessionError::protocol(format!(
                "{:?} available without capability",
                key
            )));
        };

        let delegated = self.kernel.with(|kernel| kernel.delegate(cap, client));
        let error = match delegated {
            Ok(Some(client_cap)) => {
                self.session_mut(key)?.hand_out(client_cap)?;
                return Ok(SessionReply::Ready(client_cap));
            }
            Ok(None) => {
                log::warn!("session capability for {:?} was revoked before hand-out", id);
                CreateError::Denied
            }
            Err(err) => {
                log::warn!("cannot install session capability in {:?}: {}", client, err);
                CreateError::InsufficientCapQuota
            }
        };

        if let Some(record) = self.clients.get_mut(&client) {
            record.ids.remove(id);
        }
        self.close_session(key)?;
        Err(error.into())
    }

    /// Walk a session toward `Closed` from whatever phase it is in
    fn close_session(&mut self, key: SessionKey) -> Result<CloseResult> {
        let session = self.session_mut(key)?;

        if let Some(cap) = session.take_client_cap() {
            self.kernel.with(|kernel| kernel.release(cap));
        }

        let session = self.session_mut(key)?;
        match session.phase() {
            Phase::CreateRequested => {
                session.insert_flags(SessionFlags::ABANDONED);
                return Ok(CloseResult::Pending);
            }
            Phase::Available => {
                session.insert_flags(SessionFlags::ABANDONED);
                session.skip_hand_out()?;
                session.request_close()?;
            }
            Phase::CapHandedOut => session.request_close()?,
            Phase::UpgradeRequested => {
                session.insert_flags(SessionFlags::CLOSE_PENDING);
                return Ok(CloseResult::Pending);
            }
            Phase::CloseRequested => return Ok(CloseResult::Pending),
            _ => {
                self.reclaim(key);
                return Ok(CloseResult::Done);
            }
        }

        self.dispatch(key)?;
        self.settle(key)?;

        if self.sessions.contains(key.0) {
            Ok(CloseResult::Pending)
        } else {
            Ok(CloseResult::Done)
        }
    }

    /// Follow up on a phase reached asynchronously
    fn settle(&mut self, key: SessionKey) -> Result<()> {
        let Some(session) = self.sessions.get_mut(key.0) else {
            return Ok(());
        };
        let flags = session.flags();

        match session.phase() {
            Phase::Available if flags.contains(SessionFlags::ABANDONED) => {
                session.skip_hand_out()?;
                session.request_close()?;
                self.dispatch(key)?;
                self.settle(key)
            }
            Phase::CapHandedOut if flags.contains(SessionFlags::CLOSE_PENDING) => {
                session.remove_flags(SessionFlags::CLOSE_PENDING);
                session.request_close()?;
                self.dispatch(key)?;
                self.settle(key)
            }
            Phase::Closed => {
                if flags.contains(SessionFlags::ASYNC_CLIENT_NOTIFY) {
                    self.notify_client(key);
                }
                self.reclaim(key);
                Ok(())
            }
            phase if phase.is_terminal() && flags.contains(SessionFlags::ABANDONED) => {
                self.reclaim(key);
                Ok(())
            }
            phase if phase.is_terminal() || phase.is_dormant() => {
                self.notify_client(key);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn notify_client(&self, key: SessionKey) {
        let Some(session) = self.sessions.get(key.0) else {
            return;
        };
        let sigh = self
            .clients
            .get(&session.client())
            .and_then(|record| record.sigh.as_ref());

        if let Some(sigh) = sigh {
            if sigh.send(Signal::SessionResponse).is_err() {
                log::debug!("client {:?} no longer listens", session.client());
            }
        }
    }

    /// Reclaim a failed session and report its failure
    fn finish(&mut self, key: SessionKey) -> SessionError {
        let error = match self.phase_of(key).and_then(CreateError::from_phase) {
            Some(err) => SessionError::Create(err),
            None => SessionError::UnknownSession(
                self.sessions.get(key.0).map_or(0, |s| s.client_id().0),
            ),
        };
        self.reclaim(key);
        error
    }

    /// Drop a session record, returning its quota to the client
    fn reclaim(&mut self, key: SessionKey) {
        let Some(mut session) = self.sessions.remove(key.0) else {
            return;
        };

        if let Some(cap) = session.take_client_cap() {
            self.kernel.with(|kernel| kernel.release(cap));
        }

        let client = session.client();
        if let Some(record) = self.clients.get_mut(&client) {
            if record.ids.get(session.client_id()) == Some(&key) {
                record.ids.remove(session.client_id());
            }
            if record.closing.get(session.client_id()) == Some(&key) {
                record.closing.remove(session.client_id());
            }
        }

        let service = self.services.get(session.service());
        if let (Some(id), Some(service)) = (session.id_at_server(), service) {
            if let Some(space) = self.servers.get_mut(&service.server()) {
                space.remove(id);
            }
        }

        let outstanding = session.outstanding_quota();
        let client_alive = self.kernel.with(|kernel| kernel.domain_exists(client));
        if let (Some(service), true) = (service, client_alive && !outstanding.is_zero()) {
            let client_account = DomainAccount::new(self.kernel.clone(), client);
            return_quota::<RamQuota>(
                &*service.ram_account(),
                &client_account,
                outstanding.ram_quota,
            );
            return_quota::<CapQuota>(
                &*service.cap_account(),
                &client_account,
                outstanding.cap_quota,
            );
        }

        log::debug!(
            "reclaimed session '{}' of {:?} in {}",
            session.service(),
            client,
            session.phase()
        );
    }
}

fn creation_shortfall(err: TransferError) -> SessionError {
    match err.resource() {
        Some(resource) => {
            log::debug!("session donation failed: {}", err);
            CreateError::for_resource(resource).into()
        }
        None => err.into(),
    }
}

fn upgrade_shortfall(session: &SessionState, err: TransferError) -> SessionError {
    log::warn!(
        "upgrade of '{}' ({:?}) refused: {}",
        session.service(),
        session.client_id(),
        err
    );
    err.into()
}

fn return_quota<Q: Quota>(from: &dyn Account<Q>, to: &dyn Account<Q>, amount: Q) {
    if amount.value() == 0 {
        return;
    }
    let Some(dst) = to.cap(amount) else {
        return;
    };
    if let Err(err) = from.transfer(dst, amount) {
        log::warn!(
            "could not return {} {} quota: {}",
            amount.value(),
            Q::RESOURCE,
            err
        );
    }
}

/// Shared broker
#[derive(Clone)]
pub struct BrokerHandle(Arc<Mutex<SessionBroker>>);

assert_impl_all!(BrokerHandle: Send, Sync);

impl BrokerHandle {
    pub fn new(broker: SessionBroker) -> Self {
        Self(Arc::new(Mutex::new(broker)))
    }

    /// Lock the broker, recovering from poisoning
    pub fn lock(&self) -> MutexGuard<'_, SessionBroker> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Parent interface for `client`, whose responses go to `sigh`
    pub fn parent_for(&self, client: DomainId, sigh: Sender<Signal>) -> Arc<dyn Parent> {
        self.lock().register_client(client, sigh);
        Arc::new(BrokerParent {
            broker: self.clone(),
            client,
        })
    }
}

/// [`Parent`] of one client domain, backed by a broker
pub struct BrokerParent {
    broker: BrokerHandle,
    client: DomainId,
}

impl Parent for BrokerParent {
    fn session(
        &self,
        service: &str,
        id: ClientId,
        args: &SessionArgs,
        affinity: &Affinity,
    ) -> Result<SessionReply> {
        self.broker
            .lock()
            .session(self.client, id, service, args, affinity)
    }

    fn session_cap(&self, id: ClientId) -> Result<SessionReply> {
        self.broker.lock().session_cap(self.client, id)
    }

    fn upgrade(&self, id: ClientId, args: &SessionArgs) -> Result<UpgradeResult> {
        self.broker.lock().upgrade(self.client, id, args)
    }

    fn close(&self, id: ClientId) -> CloseResult {
        self.broker.lock().close(self.client, id)
    }

    fn phase(&self, id: ClientId) -> Option<Phase> {
        self.broker.lock().phase(self.client, id)
    }
}

/// Object a server has to release to answer a close request
pub fn close_target(kernel: &KernelHandle, request: &SessionRequest) -> Option<ObjectId> {
    match &request.kind {
        RequestKind::Close { cap: Some(cap) } => kernel.with(|k| k.lookup(*cap)),
        _ => None,
    }
}
