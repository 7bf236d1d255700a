//! Integration tests for session negotiation
//!
//! These tests drive complete workflows through the broker:
//! - Local, child-backed and parent-forwarded services
//! - Quota donation, upgrade and return
//! - Abandonment and deferred close
//! - Client connections against servers running on their own threads

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use cap_identity::{DomainConfig, DomainId, ObjectKind};
use kaal_session::*;

// ============================================================================
// Fixtures
// ============================================================================

/// Local factory recording the labels it saw
struct Recorder {
    deny: bool,
    labels: Arc<Mutex<Vec<String>>>,
}

impl SessionFactory for Recorder {
    fn create(
        &mut self,
        ep: &Entrypoint,
        args: &SessionArgs,
        _affinity: &Affinity,
    ) -> core::result::Result<ManagedObject, CreateError> {
        self.labels.lock().unwrap().push(String::from(args.label()));
        if self.deny {
            return Err(CreateError::Denied);
        }
        ep.manage(ObjectKind::Session, args.label())
            .map_err(|_| CreateError::InsufficientCapQuota)
    }
}

struct World {
    kernel: KernelHandle,
    broker: SessionBroker,
    client: DomainId,
    client_ep: Entrypoint,
    server_ep: Entrypoint,
    labels: Arc<Mutex<Vec<String>>>,
}

const CLIENT_RAM: u64 = 64 * 1024;
const CLIENT_CAPS: u64 = 16;

fn world() -> World {
    let kernel = KernelHandle::default();
    let init = kernel.create_domain(DomainConfig::new("init"));
    let client = kernel.create_domain(
        DomainConfig::new("client")
            .ram_quota(CLIENT_RAM)
            .cap_quota(CLIENT_CAPS),
    );
    let server = kernel.create_domain(DomainConfig::new("server").ram_quota(0).cap_quota(8));

    let client_ep = Entrypoint::new(kernel.clone(), client);
    let server_ep = Entrypoint::new(kernel.clone(), server);
    let labels = Arc::new(Mutex::new(Vec::new()));

    let mut broker = SessionBroker::new(kernel.clone(), init, SessionConfig::default());
    broker.register_client(client, client_ep.signal_sender());
    broker
        .announce(LocalService::new(
            "Rom",
            Entrypoint::new(kernel.clone(), init),
            Recorder {
                deny: false,
                labels: labels.clone(),
            },
        ))
        .unwrap();
    broker
        .announce(LocalService::new(
            "Report",
            Entrypoint::new(kernel.clone(), init),
            Recorder {
                deny: true,
                labels: labels.clone(),
            },
        ))
        .unwrap();
    broker.announce(ChildService::new("Block", &server_ep)).unwrap();
    broker.announce(AsyncService::new("Nic", &server_ep)).unwrap();

    World {
        kernel,
        broker,
        client,
        client_ep,
        server_ep,
        labels,
    }
}

fn args(s: &str) -> SessionArgs {
    SessionArgs::parse(s).unwrap()
}

fn ram_avail(kernel: &KernelHandle, domain: DomainId) -> u64 {
    kernel.lock().quota(domain).unwrap().ram.avail()
}

/// Answer every pending request of the test's server domain
fn serve_pending(w: &mut World) {
    serve(&mut w.broker, &w.kernel, &w.server_ep);
}

/// Answer every pending request `broker` holds for the server behind `ep`
fn serve(broker: &mut SessionBroker, kernel: &KernelHandle, ep: &Entrypoint) {
    let server = ep.domain();
    for request in broker.pending_requests(server) {
        match request.kind {
            RequestKind::Create { .. } => {
                let managed = ep.manage(ObjectKind::Session, "blk").unwrap();
                broker
                    .deliver_session_cap(server, request.id, managed.cap)
                    .unwrap();
            }
            RequestKind::Upgrade { .. } => {
                broker
                    .session_response(server, request.id, SessionResponse::Ok)
                    .unwrap();
            }
            RequestKind::Close { .. } => {
                if let Some(object) = close_target(kernel, &request) {
                    ep.dissolve(object);
                }
                broker
                    .session_response(server, request.id, SessionResponse::Closed)
                    .unwrap();
            }
        }
    }
}

/// Open a child-backed session and pick up its capability
fn open_block(w: &mut World, id: ClientId) -> cap_identity::Capability {
    let reply = w
        .broker
        .session(w.client, id, "Block", &args("ram_quota=8192, cap_quota=1"), &Affinity::default())
        .unwrap();
    assert_eq!(reply, SessionReply::Pending);

    serve_pending(w);
    match w.broker.session_cap(w.client, id).unwrap() {
        SessionReply::Ready(cap) => cap,
        SessionReply::Pending => panic!("session not delivered"),
    }
}

// ============================================================================
// Local service
// ============================================================================

#[test]
fn test_local_session_is_handed_out() {
    let mut w = world();
    let init = w.broker.domain();
    let init_ram = w.kernel.lock().quota(init).unwrap().ram.granted();

    let reply = w
        .broker
        .session(
            w.client,
            ClientId(1),
            "Rom",
            &args(r#"ram_quota=8192, cap_quota=2, label="fonts""#),
            &Affinity::default(),
        )
        .unwrap();

    let SessionReply::Ready(cap) = reply else {
        panic!("local session should be ready at once");
    };
    assert_eq!(cap.domain(), w.client);
    assert!(w.kernel.with(|k| k.is_valid(cap)));
    assert_eq!(w.broker.phase(w.client, ClientId(1)), Some(Phase::CapHandedOut));
    assert_eq!(w.labels.lock().unwrap().as_slice(), &["client -> fonts"]);

    assert_eq!(ram_avail(&w.kernel, w.client), CLIENT_RAM - 8192);
    assert_eq!(w.kernel.lock().quota(init).unwrap().ram.granted(), init_ram + 8192);
}

#[test]
fn test_report_denial_leaves_nothing_behind() {
    let mut w = world();

    let result = w.broker.session(
        w.client,
        ClientId(1),
        "Report",
        &args("ram_quota=8192, cap_quota=2"),
        &Affinity::default(),
    );

    assert!(matches!(
        result,
        Err(SessionError::Create(CreateError::Denied))
    ));
    assert_eq!(w.broker.session_count(), 0);
    assert!(w.kernel.with(|k| k.capabilities(w.client).is_empty()));
    assert_eq!(ram_avail(&w.kernel, w.client), CLIENT_RAM);
}

#[test]
fn test_insufficient_ram_quota_is_terminal() {
    let mut w = world();

    let result = w.broker.session(
        w.client,
        ClientId(1),
        "Rom",
        &args("ram_quota=1M"),
        &Affinity::default(),
    );

    assert!(matches!(
        result,
        Err(SessionError::Create(CreateError::InsufficientRamQuota))
    ));
    assert_eq!(w.broker.session_count(), 0);
    assert_eq!(ram_avail(&w.kernel, w.client), CLIENT_RAM);
}

#[test]
fn test_client_without_cap_slot_gets_cap_quota_error() {
    let mut w = world();
    let poor = w
        .kernel
        .create_domain(DomainConfig::new("poor").ram_quota(CLIENT_RAM).cap_quota(0));
    let poor_ep = Entrypoint::new(w.kernel.clone(), poor);
    w.broker.register_client(poor, poor_ep.signal_sender());

    let result = w.broker.session(
        poor,
        ClientId(1),
        "Rom",
        &args("ram_quota=4096"),
        &Affinity::default(),
    );

    assert!(matches!(
        result,
        Err(SessionError::Create(CreateError::InsufficientCapQuota))
    ));
    assert_eq!(w.broker.phase(poor, ClientId(1)), None);
    assert_eq!(w.broker.session_count(), 0);
    assert_eq!(ram_avail(&w.kernel, poor), CLIENT_RAM);
}

#[test]
fn test_close_local_session_returns_quota() {
    let mut w = world();
    let reply = w
        .broker
        .session(w.client, ClientId(1), "Rom", &args("ram_quota=4096"), &Affinity::default())
        .unwrap();
    let SessionReply::Ready(cap) = reply else {
        panic!("not ready");
    };

    assert_eq!(w.broker.close(w.client, ClientId(1)), CloseResult::Done);

    assert!(!w.kernel.with(|k| k.is_valid(cap)));
    assert_eq!(w.broker.session_count(), 0);
    assert_eq!(ram_avail(&w.kernel, w.client), CLIENT_RAM);
}

#[test]
fn test_local_upgrade_completes_synchronously() {
    let mut w = world();
    w.broker
        .session(w.client, ClientId(1), "Rom", &SessionArgs::new(), &Affinity::default())
        .unwrap();

    let result = w
        .broker
        .upgrade(w.client, ClientId(1), &args("ram_quota=4096"))
        .unwrap();

    assert_eq!(result, UpgradeResult::Done);
    assert_eq!(w.broker.phase(w.client, ClientId(1)), Some(Phase::CapHandedOut));
    let state = w.broker.session_state(w.client, ClientId(1)).unwrap();
    assert_eq!(state.donated().ram_quota, RamQuota(4096));
}

// ============================================================================
// Child-backed and async services
// ============================================================================

#[test]
fn test_async_create_deliver_and_pickup() {
    let mut w = world();

    let reply = w
        .broker
        .session(w.client, ClientId(1), "Block", &args("ram_quota=8192"), &Affinity::default())
        .unwrap();
    assert_eq!(reply, SessionReply::Pending);
    assert_eq!(w.server_ep.try_signal().unwrap(), Some(Signal::Wakeup));

    let requests = w.broker.pending_requests(w.server_ep.domain());
    assert_eq!(requests.len(), 1);
    assert!(matches!(requests[0].kind, RequestKind::Create { .. }));

    serve_pending(&mut w);
    assert_eq!(w.client_ep.try_signal().unwrap(), Some(Signal::SessionResponse));

    let SessionReply::Ready(cap) = w.broker.session_cap(w.client, ClientId(1)).unwrap() else {
        panic!("not delivered");
    };
    assert_eq!(cap.domain(), w.client);
    assert_eq!(w.broker.phase(w.client, ClientId(1)), Some(Phase::CapHandedOut));
    assert!(w.broker.pending_requests(w.server_ep.domain()).is_empty());
}

#[test]
fn test_child_upgrade_moves_exact_quota_to_child() {
    let mut w = world();
    let child = w.server_ep.domain();
    open_block(&mut w, ClientId(1));
    let granted = w.kernel.lock().quota(child).unwrap().ram.granted();

    let result = w
        .broker
        .upgrade(w.client, ClientId(1), &Resources::new(4096, 0).to_args().unwrap())
        .unwrap();

    assert_eq!(result, UpgradeResult::Pending);
    assert_eq!(w.kernel.lock().quota(child).unwrap().ram.granted(), granted + 4096);
    assert_eq!(
        w.broker.phase(w.client, ClientId(1)),
        Some(Phase::UpgradeRequested)
    );

    serve_pending(&mut w);
    assert_eq!(w.broker.phase(w.client, ClientId(1)), Some(Phase::CapHandedOut));
    assert_eq!(w.kernel.lock().quota(child).unwrap().ram.granted(), granted + 4096);
}

#[test]
fn test_upgrade_shortfall_keeps_phase() {
    let mut w = world();
    open_block(&mut w, ClientId(1));

    let result = w
        .broker
        .upgrade(w.client, ClientId(1), &args("ram_quota=10M"));

    assert!(matches!(
        result,
        Err(SessionError::Transfer(TransferError::Exceeded { .. }))
    ));
    assert_eq!(w.broker.phase(w.client, ClientId(1)), Some(Phase::CapHandedOut));
}

#[test]
fn test_async_upgrade_without_account_is_noop() {
    let mut w = world();
    w.broker
        .session(w.client, ClientId(1), "Nic", &SessionArgs::new(), &Affinity::default())
        .unwrap();
    serve_pending(&mut w);
    w.broker.session_cap(w.client, ClientId(1)).unwrap();
    let before = ram_avail(&w.kernel, w.client);

    let result = w
        .broker
        .upgrade(w.client, ClientId(1), &args("ram_quota=4096"))
        .unwrap();

    assert_eq!(result, UpgradeResult::Done);
    assert_eq!(ram_avail(&w.kernel, w.client), before);
    assert_eq!(w.broker.phase(w.client, ClientId(1)), Some(Phase::CapHandedOut));
}

#[test]
fn test_async_denial_returns_donation() {
    let mut w = world();
    let server = w.server_ep.domain();
    w.broker
        .session(w.client, ClientId(1), "Block", &args("ram_quota=8192"), &Affinity::default())
        .unwrap();
    assert_eq!(ram_avail(&w.kernel, w.client), CLIENT_RAM - 8192);

    let id = w.broker.pending_requests(server)[0].id;
    w.broker
        .session_response(server, id, SessionResponse::ServiceDenied)
        .unwrap();

    let result = w.broker.session_cap(w.client, ClientId(1));
    assert!(matches!(
        result,
        Err(SessionError::Create(CreateError::Denied))
    ));
    assert_eq!(w.broker.session_count(), 0);
    assert_eq!(ram_avail(&w.kernel, w.client), CLIENT_RAM);
}

#[test]
fn test_double_delivery_is_rejected() {
    let mut w = world();
    let server = w.server_ep.domain();
    open_block(&mut w, ClientId(1));

    assert!(w.broker.pending_requests(server).is_empty());

    let managed = w.server_ep.manage(ObjectKind::Session, "dup").unwrap();
    let result = w.broker.deliver_session_cap(server, ServerId(1), managed.cap);

    assert!(matches!(result, Err(SessionError::Protocol(_))));
    assert_eq!(w.broker.phase(w.client, ClientId(1)), Some(Phase::CapHandedOut));
}

#[test]
fn test_close_during_create_abandons_session() {
    let mut w = world();
    let server = w.server_ep.domain();
    w.broker
        .session(w.client, ClientId(1), "Block", &args("ram_quota=8192"), &Affinity::default())
        .unwrap();

    assert_eq!(w.broker.close(w.client, ClientId(1)), CloseResult::Pending);
    let state_flags = w
        .broker
        .server_session(server, ServerId(1))
        .unwrap()
        .flags();
    assert!(state_flags.contains(SessionFlags::ABANDONED));

    // Server delivers late; the session is walked straight to close
    let managed = w.server_ep.manage(ObjectKind::Session, "late").unwrap();
    w.broker
        .deliver_session_cap(server, ServerId(1), managed.cap)
        .unwrap();
    assert_eq!(
        w.broker.server_session(server, ServerId(1)).unwrap().phase(),
        Phase::CloseRequested
    );

    serve_pending(&mut w);
    assert_eq!(w.broker.session_count(), 0);
    assert!(!w.kernel.with(|k| k.is_valid(managed.cap)));
    assert_eq!(ram_avail(&w.kernel, w.client), CLIENT_RAM);
}

#[test]
fn test_close_during_upgrade_is_deferred() {
    let mut w = world();
    let server = w.server_ep.domain();
    let cap = open_block(&mut w, ClientId(1));
    w.broker
        .upgrade(w.client, ClientId(1), &args("ram_quota=4096"))
        .unwrap();

    assert_eq!(w.broker.close(w.client, ClientId(1)), CloseResult::Pending);
    // The client's capability is gone at once
    assert!(!w.kernel.with(|k| k.is_valid(cap)));

    let requests = w.broker.pending_requests(server);
    assert!(matches!(requests[0].kind, RequestKind::Upgrade { .. }));
    w.broker
        .session_response(server, requests[0].id, SessionResponse::Ok)
        .unwrap();

    let requests = w.broker.pending_requests(server);
    assert!(matches!(requests[0].kind, RequestKind::Close { .. }));

    serve_pending(&mut w);
    assert_eq!(w.broker.session_count(), 0);
}

#[test]
fn test_destroy_client_closes_its_sessions() {
    let mut w = world();
    open_block(&mut w, ClientId(1));
    w.broker
        .session(w.client, ClientId(2), "Rom", &SessionArgs::new(), &Affinity::default())
        .unwrap();

    w.broker.destroy_client(w.client);
    serve_pending(&mut w);

    assert_eq!(w.broker.session_count(), 0);
}

// ============================================================================
// Protocol properties
// ============================================================================

#[test]
fn test_dispatch_of_dormant_sessions_changes_nothing() {
    let mut w = world();
    w.broker
        .session(w.client, ClientId(1), "Rom", &SessionArgs::new(), &Affinity::default())
        .unwrap();
    let cap = w.broker.session_state(w.client, ClientId(1)).unwrap().client_cap();

    w.broker.dispatch_pending();
    w.broker.dispatch_pending();

    let state = w.broker.session_state(w.client, ClientId(1)).unwrap();
    assert_eq!(state.phase(), Phase::CapHandedOut);
    assert_eq!(state.client_cap(), cap);
    assert_eq!(w.client_ep.try_signal().unwrap(), None);
}

#[test]
fn test_phase_walk_is_monotonic() {
    let mut w = world();
    let mut seen = Vec::new();

    w.broker
        .session(w.client, ClientId(1), "Block", &args("ram_quota=4096"), &Affinity::default())
        .unwrap();
    seen.push(w.broker.phase(w.client, ClientId(1)).unwrap());

    serve_pending(&mut w);
    seen.push(w.broker.phase(w.client, ClientId(1)).unwrap());
    w.broker.session_cap(w.client, ClientId(1)).unwrap();
    seen.push(w.broker.phase(w.client, ClientId(1)).unwrap());

    w.broker
        .upgrade(w.client, ClientId(1), &args("ram_quota=1024"))
        .unwrap();
    seen.push(w.broker.phase(w.client, ClientId(1)).unwrap());
    serve_pending(&mut w);
    seen.push(w.broker.phase(w.client, ClientId(1)).unwrap());

    assert_eq!(
        seen,
        vec![
            Phase::CreateRequested,
            Phase::Available,
            Phase::CapHandedOut,
            Phase::UpgradeRequested,
            Phase::CapHandedOut,
        ]
    );
    for pair in seen.windows(2) {
        assert!(pair[0].can_advance_to(pair[1]));
    }
}

#[test]
fn test_quota_is_conserved_across_session_lifetime() {
    let mut w = world();
    let domains = [w.broker.domain(), w.client, w.server_ep.domain()];
    let total = |kernel: &KernelHandle| -> u64 {
        domains.iter().map(|d| ram_avail(kernel, *d)).sum()
    };
    let before = total(&w.kernel);

    open_block(&mut w, ClientId(1));
    assert_eq!(total(&w.kernel), before);

    w.broker
        .upgrade(w.client, ClientId(1), &args("ram_quota=2048"))
        .unwrap();
    assert_eq!(total(&w.kernel), before);

    w.broker.close(w.client, ClientId(1));
    serve_pending(&mut w);
    assert_eq!(total(&w.kernel), before);
    assert_eq!(ram_avail(&w.kernel, w.client), CLIENT_RAM);
}

// ============================================================================
// Parent-forwarded service
// ============================================================================

#[test]
fn test_forwarded_session_reaches_upper_service() {
    let w = world();
    let upper = BrokerHandle::new(w.broker);

    let sub = w
        .kernel
        .create_domain(DomainConfig::new("sub").ram_quota(CLIENT_RAM));
    let sub_ep = Entrypoint::new(w.kernel.clone(), sub);
    let up = upper.parent_for(sub, sub_ep.signal_sender());

    let mut lower = SessionBroker::new(w.kernel.clone(), sub, SessionConfig::default());
    lower
        .announce(ParentService::new("Rom", w.kernel.clone(), sub, up))
        .unwrap();
    lower.register_client(w.client, w.client_ep.signal_sender());

    let reply = lower
        .session(
            w.client,
            ClientId(1),
            "Rom",
            &args(r#"ram_quota=4096, label="fonts""#),
            &Affinity::default(),
        )
        .unwrap();
    let SessionReply::Ready(cap) = reply else {
        panic!("forwarded local session should be ready");
    };

    assert!(w.kernel.with(|k| k.is_valid(cap)));
    assert_eq!(
        w.labels.lock().unwrap().as_slice(),
        &["sub -> client -> fonts"]
    );
    assert_eq!(ram_avail(&w.kernel, w.client), CLIENT_RAM - 4096);
    assert_eq!(ram_avail(&w.kernel, sub), CLIENT_RAM);

    assert_eq!(lower.close(w.client, ClientId(1)), CloseResult::Done);
    assert!(!w.kernel.with(|k| k.is_valid(cap)));
    assert_eq!(lower.session_count(), 0);
    assert_eq!(upper.lock().session_count(), 0);
    assert_eq!(ram_avail(&w.kernel, w.client), CLIENT_RAM);
}

#[test]
fn test_forwarded_child_session_waits_for_upper_server() {
    let w = world();
    let upper = BrokerHandle::new(w.broker);
    let server = w.server_ep.domain();

    let sub = w
        .kernel
        .create_domain(DomainConfig::new("sub").ram_quota(CLIENT_RAM));
    let sub_ep = Entrypoint::new(w.kernel.clone(), sub);
    let up = upper.parent_for(sub, sub_ep.signal_sender());

    let mut lower = SessionBroker::new(w.kernel.clone(), sub, SessionConfig::default());
    lower
        .announce(ParentService::new("Block", w.kernel.clone(), sub, up))
        .unwrap();
    lower.register_client(w.client, w.client_ep.signal_sender());

    let id = ClientId(1);
    let reply = lower
        .session(w.client, id, "Block", &args("ram_quota=8192"), &Affinity::default())
        .unwrap();
    assert_eq!(reply, SessionReply::Pending);

    serve(&mut upper.lock(), &w.kernel, &w.server_ep);
    lower.dispatch_pending();
    let SessionReply::Ready(cap) = lower.session_cap(w.client, id).unwrap() else {
        panic!("forwarded session not delivered");
    };
    assert!(w.kernel.with(|k| k.is_valid(cap)));
    assert_eq!(ram_avail(&w.kernel, w.client), CLIENT_RAM - 8192);

    // Upgrade stays in flight until the upper server answers
    let result = lower.upgrade(w.client, id, &args("ram_quota=4096")).unwrap();
    assert_eq!(result, UpgradeResult::Pending);
    lower.dispatch_pending();
    assert_eq!(lower.phase(w.client, id), Some(Phase::UpgradeRequested));
    assert_eq!(upper.lock().pending_requests(server).len(), 1);

    serve(&mut upper.lock(), &w.kernel, &w.server_ep);
    lower.dispatch_pending();
    assert_eq!(lower.phase(w.client, id), Some(Phase::CapHandedOut));
    let state = lower.session_state(w.client, id).unwrap();
    assert_eq!(state.donated().ram_quota, RamQuota(8192 + 4096));

    // Close stays in flight until the upper session is reclaimed
    assert_eq!(lower.close(w.client, id), CloseResult::Pending);
    lower.dispatch_pending();
    assert_eq!(lower.phase(w.client, id), Some(Phase::CloseRequested));
    assert_eq!(lower.session_count(), 1);

    serve(&mut upper.lock(), &w.kernel, &w.server_ep);
    assert_eq!(upper.lock().session_count(), 0);
    lower.dispatch_pending();

    assert_eq!(lower.phase(w.client, id), None);
    assert_eq!(lower.session_count(), 0);
    assert!(!w.kernel.with(|k| k.is_valid(cap)));
    assert_eq!(ram_avail(&w.kernel, w.client), CLIENT_RAM);
    assert_eq!(ram_avail(&w.kernel, sub), CLIENT_RAM);
}

// ============================================================================
// Connections against threaded servers
// ============================================================================

struct Report;

impl SessionType for Report {
    const SERVICE_NAME: &'static str = "Report";
}

struct Block;

impl SessionType for Block {
    const SERVICE_NAME: &'static str = "Block";
}

/// Serve requests on the server's own thread
///
/// The server exits once `stop` is set and nothing is pending. Both are
/// checked under the broker lock, so a close requested before `stop` is
/// always answered.
fn spawn_server(
    broker: BrokerHandle,
    kernel: KernelHandle,
    ep: Entrypoint,
    stop: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let server = ep.domain();
        while ep.wait_for(Signal::Wakeup).is_ok() {
            loop {
                let requests = {
                    let broker = broker.lock();
                    let requests = broker.pending_requests(server);
                    if requests.is_empty() {
                        if stop.load(Ordering::SeqCst) {
                            return;
                        }
                        break;
                    }
                    requests
                };

                for request in requests {
                    match &request.kind {
                        RequestKind::Create { args, .. } => {
                            let managed = ep.manage(ObjectKind::Session, args.label()).unwrap();
                            broker
                                .lock()
                                .deliver_session_cap(server, request.id, managed.cap)
                                .unwrap();
                        }
                        RequestKind::Upgrade { .. } => {
                            broker
                                .lock()
                                .session_response(server, request.id, SessionResponse::Ok)
                                .unwrap();
                        }
                        RequestKind::Close { .. } => {
                            if let Some(object) = close_target(&kernel, &request) {
                                ep.dissolve(object);
                            }
                            broker
                                .lock()
                                .session_response(server, request.id, SessionResponse::Closed)
                                .unwrap();
                        }
                    }
                }
            }
        }
    })
}

#[test]
fn test_report_connection_fails_with_creation_error() {
    let w = world();
    let kernel = w.kernel.clone();
    let client = w.client;
    let client_ep = w.client_ep.clone();
    let broker = BrokerHandle::new(w.broker);
    let env = Env::new(
        kernel.clone(),
        client_ep.clone(),
        broker.parent_for(client, client_ep.signal_sender()),
    );

    let result = Connection::<Report>::new(&env, Resources::new(8192, 2), "", "");

    let Err(err) = result else {
        panic!("Report must be denied");
    };
    assert!(err.to_string().starts_with("service creation failed"));
    assert!(kernel.with(|k| k.capabilities(client).is_empty()));
    assert_eq!(ram_avail(&kernel, client), CLIENT_RAM);
}

#[test]
fn test_connection_to_threaded_child_server() {
    let w = world();
    let child = w.server_ep.domain();
    let stop = Arc::new(AtomicBool::new(false));
    let wake_server = w.server_ep.signal_sender();

    let kernel = w.kernel.clone();
    let client = w.client;
    let client_ep = w.client_ep.clone();
    let server_ep = w.server_ep.clone();
    let broker = BrokerHandle::new(w.broker);
    let env = Env::new(
        kernel.clone(),
        client_ep.clone(),
        broker.parent_for(client, client_ep.signal_sender()),
    );
    let server = spawn_server(broker.clone(), kernel.clone(), server_ep, stop.clone());

    let conn = Connection::<Block>::new(&env, Resources::new(8192, 1), "disk0", "block_size=512")
        .unwrap();
    assert!(kernel.with(|k| k.is_valid(conn.cap())));
    assert_eq!(
        broker.lock().phase(client, conn.id()),
        Some(Phase::CapHandedOut)
    );

    let granted = kernel.lock().quota(child).unwrap().ram.granted();
    let result = conn.upgrade_ram(4096).unwrap();
    assert_eq!(kernel.lock().quota(child).unwrap().ram.granted(), granted + 4096);

    if result == UpgradeResult::Pending {
        client_ep.wait_for(Signal::SessionResponse).unwrap();
    }
    assert_eq!(
        broker.lock().phase(client, conn.id()),
        Some(Phase::CapHandedOut)
    );

    let cap = conn.cap();
    drop(conn);
    assert!(!kernel.with(|k| k.is_valid(cap)));

    stop.store(true, Ordering::SeqCst);
    wake_server.send(Signal::Wakeup).unwrap();
    server.join().unwrap();

    assert_eq!(broker.lock().session_count(), 0);
    assert_eq!(ram_avail(&kernel, client), CLIENT_RAM);
}

#[test]
fn test_many_clients_share_one_server() {
    let w = world();
    let stop = Arc::new(AtomicBool::new(false));
    let wake_server = w.server_ep.signal_sender();
    let kernel = w.kernel.clone();
    let server_ep = w.server_ep.clone();
    let broker = BrokerHandle::new(w.broker);
    let server = spawn_server(broker.clone(), kernel.clone(), server_ep, stop.clone());

    let clients: Vec<_> = (0..4)
        .map(|i| {
            let domain = kernel.create_domain(DomainConfig::new(&format!("c{}", i)));
            let ep = Entrypoint::new(kernel.clone(), domain);
            let env = Env::new(
                kernel.clone(),
                ep.clone(),
                broker.parent_for(domain, ep.signal_sender()),
            );
            let kernel = kernel.clone();
            thread::spawn(move || {
                let conn = Connection::<Block>::new(&env, Resources::new(4096, 1), "", "")
                    .unwrap();
                assert!(kernel.with(|k| k.is_valid(conn.cap())));
            })
        })
        .collect();

    for client in clients {
        client.join().unwrap();
    }

    stop.store(true, Ordering::SeqCst);
    wake_server.send(Signal::Wakeup).unwrap();
    server.join().unwrap();

    assert_eq!(broker.lock().session_count(), 0);
}
