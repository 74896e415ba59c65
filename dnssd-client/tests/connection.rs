use dnssd_client::{
    ClientState, Connection, ConnectionConfig, EntryGroup, Error, ErrorCode,
    Injector, LoopbackGateway, ServiceBrowser,
};
use serial_test::serial;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

fn open() -> (Connection, Injector) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let (gateway, injector) = LoopbackGateway::new().unwrap();
    (Connection::open(gateway).unwrap(), injector)
}

#[test]
#[cfg_attr(miri, ignore)]
fn properties_are_readable() {
    let (c, inj) = open();
    assert_eq!(c.state().unwrap(), ClientState::Running);
    assert_eq!(c.host_name().unwrap(), "loopback");
    assert_eq!(c.domain_name().unwrap(), "local");
    assert_eq!(c.host_name_fqdn().unwrap(), "loopback.local");
    assert!(c.version().unwrap().starts_with("dnssd-client loopback"));
    assert_eq!(c.last_error().unwrap(), None);

    inj.set_host_name("myhost");
    assert_eq!(c.host_name_fqdn().unwrap(), "myhost.local");
}

#[test]
#[cfg_attr(miri, ignore)]
fn open_failure_is_reported() {
    let (gateway, inj) = LoopbackGateway::new().unwrap();
    inj.set_open_error(Some(ErrorCode::NoDaemon));
    let e = Connection::open(gateway).err().unwrap();
    assert!(matches!(e, Error::Open(ErrorCode::NoDaemon)));
    assert_eq!(e.to_string(), "cannot open discovery session: Daemon not running");
}

#[test]
#[cfg_attr(miri, ignore)]
fn state_changes_reach_listeners_in_order() {
    let (c, inj) = open();
    let (tx, rx) = mpsc::channel();
    let id = c.add_state_listener(move |s| tx.send(s).unwrap());

    inj.set_state(ClientState::Collision);
    inj.set_state(ClientState::Registering);
    inj.set_state(ClientState::Running);
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), ClientState::Collision);
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), ClientState::Registering);
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), ClientState::Running);

    assert!(c.remove_state_listener(id));
    assert!(!c.remove_state_listener(id));
}

#[test]
#[cfg_attr(miri, ignore)]
fn loop_failure_reports_disconnected() {
    let (c, inj) = open();
    let (tx, rx) = mpsc::channel();
    c.add_state_listener(move |s| tx.send(s).unwrap());

    inj.fail_event_loop(ErrorCode::Disconnected);
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), ClientState::Disconnected);
    assert_eq!(c.state().unwrap(), ClientState::Disconnected);

    // Properties still work; only the loop has gone
    assert_eq!(c.host_name().unwrap(), "loopback");
    c.close();
}

#[test]
#[cfg_attr(miri, ignore)]
fn failed_loop_refuses_new_subscriptions() {
    let (c, inj) = open();
    let (tx, rx) = mpsc::channel();
    c.add_state_listener(move |s| tx.send(s).unwrap());
    inj.fail_event_loop(ErrorCode::Disconnected);
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), ClientState::Disconnected);

    let b = ServiceBrowser::new(&c, "_http._tcp").unwrap();
    assert!(matches!(
        b.add_found_listener(|_| {}),
        Err(Error::Operation {
            code: ErrorCode::BadState
        })
    ));
    assert!(!b.is_active());
    assert!(inj.active().is_empty());
    assert_eq!(inj.subscribe_count(), 0);
    assert!(matches!(
        EntryGroup::new(&c),
        Err(Error::Operation {
            code: ErrorCode::BadState
        })
    ));
    assert!(inj.groups().is_empty());
}

#[test]
#[serial]
#[cfg_attr(miri, ignore)]
fn close_with_active_queries_does_not_hang() {
    let (c, _inj) = open();
    let b = ServiceBrowser::new(&c, "_http._tcp").unwrap();
    b.add_found_listener(|_| {}).unwrap();
    let b2 = ServiceBrowser::new(&c, "_ipp._tcp").unwrap();
    b2.add_removed_listener(|_| {}).unwrap();

    let (tx, rx) = mpsc::channel();
    let closer = thread::spawn(move || {
        c.close();
        tx.send(()).unwrap();
        c
    });
    rx.recv_timeout(TIMEOUT).unwrap();
    let c = closer.join().unwrap();
    assert!(c.is_closed());

    // Orphaned queries can still be torn down
    b.dispose();
    drop(b2);
}

#[test]
#[serial]
#[cfg_attr(miri, ignore)]
fn close_from_listener() {
    let (c, inj) = open();
    let c = Arc::new(c);
    let weak = Arc::downgrade(&c);
    let (tx, rx) = mpsc::channel();
    c.add_state_listener(move |_| {
        if let Some(c) = weak.upgrade() {
            c.close();
        }
        tx.send(()).unwrap();
    });

    inj.set_state(ClientState::Collision);
    rx.recv_timeout(TIMEOUT).unwrap();
    assert!(c.is_closed());
    assert!(matches!(c.host_name(), Err(Error::Closed)));
}

#[test]
#[cfg_attr(miri, ignore)]
fn closed_connection_refuses_new_queries() {
    let (c, _inj) = open();
    let b = ServiceBrowser::in_domain(&c, "_http._tcp", "local");
    c.close();
    c.close();
    assert!(matches!(b.add_found_listener(|_| {}), Err(Error::Closed)));
    assert!(!b.is_active());
    assert!(matches!(
        ServiceBrowser::new(&c, "_http._tcp"),
        Err(Error::Closed)
    ));
}

#[test]
#[cfg_attr(miri, ignore)]
fn queries_may_outlive_connection() {
    let (c, inj) = open();
    let r = c.downgrade();
    let b = ServiceBrowser::new(&r, "_http._tcp").unwrap();
    b.add_found_listener(|_| {}).unwrap();
    drop(c);
    assert!(r.is_closed());
    assert!(b.is_active());
    b.dispose();
    assert!(!b.is_active());
    assert_eq!(inj.unsubscribe_count(), 0);
}

#[test]
#[cfg_attr(miri, ignore)]
fn custom_config_is_honoured() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let config: ConnectionConfig = toml::from_str(
        "thread_name = \"discovery\"\ndefault_domain = \"example.org\"",
    )
    .unwrap();
    let (gateway, inj) = LoopbackGateway::new().unwrap();
    let c = Connection::with_config(gateway, config).unwrap();
    let (tx, rx) = mpsc::channel();
    c.add_state_listener(move |_| {
        tx.send(thread::current().name().map(str::to_string)).unwrap();
    });
    inj.set_state(ClientState::Running);
    assert_eq!(
        rx.recv_timeout(TIMEOUT).unwrap().as_deref(),
        Some("discovery")
    );

    let b = ServiceBrowser::new(&c, "_http._tcp").unwrap();
    assert!(matches!(
        b.request(),
        dnssd_client::Request::Services { domain, .. } if domain == "example.org"
    ));
    // The session's own domain is unaffected
    assert_eq!(c.domain_name().unwrap(), "local");
}
