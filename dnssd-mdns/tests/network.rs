use dnssd_client::{
    Connection, DomainBrowser, EntryGroup, EntryGroupState, Error, ErrorCode,
    HostNameResolver, ServiceBrowser, ServiceEntry, ServiceTypeBrowser,
};
use dnssd_mdns::{MdnsConfig, MdnsGateway};
use std::sync::mpsc;
use std::time::Duration;

fn open() -> Connection {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let config = MdnsConfig {
        resolve_timeout_ms: Some(500),
        host_name: Some("dnssd-test".to_string()),
    };
    Connection::open(MdnsGateway::with_config(config).unwrap()).unwrap()
}

#[test]
#[ignore = "needs a multicast-capable network"]
fn session_properties() {
    let c = open();
    assert_eq!(c.host_name().unwrap(), "dnssd-test");
    assert_eq!(c.domain_name().unwrap(), "local");
    assert_eq!(c.host_name_fqdn().unwrap(), "dnssd-test.local");
    assert!(c.version().unwrap().starts_with("dnssd-mdns"));
}

#[test]
#[ignore = "needs a multicast-capable network"]
fn unsupported_requests_are_refused() {
    let c = open();
    let d = DomainBrowser::new(&c).unwrap();
    let e = d.add_found_listener(|_| {}).unwrap_err();
    assert!(matches!(
        e,
        Error::Operation {
            code: ErrorCode::NotSupported
        }
    ));
    assert!(!d.is_active());

    let b = ServiceBrowser::in_domain(&c, "_http._tcp", "example.org");
    assert!(b.add_found_listener(|_| {}).is_err());
    assert_eq!(c.last_error().unwrap(), Some(ErrorCode::NotSupported));
}

#[test]
#[ignore = "needs a multicast-capable network"]
fn browsers_share_one_browse() {
    let c = open();
    let a = ServiceBrowser::new(&c, "_http._tcp").unwrap();
    let b = ServiceBrowser::new(&c, "_http._tcp").unwrap();
    a.add_found_listener(|_| {}).unwrap();
    b.add_found_listener(|_| {}).unwrap();
    assert!(a.is_active() && b.is_active());
    a.dispose();
    assert!(b.is_active());
    let t = ServiceTypeBrowser::new(&c).unwrap();
    t.add_found_listener(|_| {}).unwrap();
    std::thread::sleep(Duration::from_millis(200));
}

#[test]
#[ignore = "needs a multicast-capable network"]
fn unknown_host_times_out() {
    let c = open();
    let r = HostNameResolver::new(&c, "no-such-host-dnssd-test.local");
    let (tx, rx) = mpsc::channel();
    r.add_timeout_listener(move || tx.send(()).unwrap()).unwrap();
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(r.address(), None);
}

#[test]
#[ignore = "needs a multicast-capable network"]
fn published_service_is_browsable() {
    let c = open();
    let group = EntryGroup::new(&c).unwrap();
    let (tx, rx) = mpsc::channel();
    group.add_state_listener(move |s| tx.send(s).unwrap());
    group
        .add_service(
            &ServiceEntry::new("dnssd test", "_dnssd-test._tcp", 4242)
                .with_txt("k=v"),
        )
        .unwrap();
    group.commit().unwrap();
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        EntryGroupState::Registering
    );
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        EntryGroupState::Established
    );

    let b = ServiceBrowser::new(&c, "_dnssd-test._tcp").unwrap();
    let (tx, rx) = mpsc::channel();
    b.add_found_listener(move |s| tx.send(s.name.clone()).unwrap())
        .unwrap();
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "dnssd test");
    group.dispose();
}
