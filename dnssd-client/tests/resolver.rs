use dnssd_client::{
    AddressResolver, Connection, HostAddress, HostNameResolver, Injector,
    Interface, LoopbackGateway, Notification, Protocol, RawEvent, Record,
    Request, ServiceInfo, ServiceResolver,
};
use std::net::IpAddr;
use std::sync::mpsc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

fn open() -> (Connection, Injector) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let (gateway, injector) = LoopbackGateway::new().unwrap();
    (Connection::open(gateway).unwrap(), injector)
}

fn notification(event: RawEvent) -> Notification {
    Notification {
        interface: Interface::Index(2),
        protocol: Protocol::Ipv4,
        event,
    }
}

fn printer_address() -> IpAddr {
    IpAddr::from([192, 0, 2, 5])
}

#[test]
#[cfg_attr(miri, ignore)]
fn host_name_resolves_then_times_out() {
    let (c, inj) = open();
    let r = HostNameResolver::new(&c, "printer.local");
    let (tx, rx) = mpsc::channel();
    let tx2 = tx.clone();
    r.add_found_listener(move |a| tx.send(Some(a.clone())).unwrap())
        .unwrap();
    r.add_timeout_listener(move || tx2.send(None).unwrap())
        .unwrap();
    assert_eq!(inj.subscribe_count(), 1);
    assert_eq!(
        inj.active()[0].1,
        Request::ResolveHostName {
            interface: Interface::Any,
            protocol: Protocol::Unspecified,
            host_name: "printer.local".to_string(),
            address_protocol: Protocol::Unspecified,
        }
    );

    inj.broadcast(&notification(RawEvent::Found(Record::HostAddress {
        host_name: "printer.local".to_string(),
        address: printer_address(),
    })));
    let found = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(
        found,
        Some(HostAddress {
            interface: Interface::Index(2),
            protocol: Protocol::Ipv4,
            host_name: "printer.local".to_string(),
            address: printer_address(),
        })
    );
    assert_eq!(r.address(), Some(printer_address()));
    assert_eq!(r.host_name().as_deref(), Some("printer.local"));

    inj.broadcast(&notification(RawEvent::Timeout));
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), None);
    assert_eq!(r.address(), None);
    assert_eq!(r.result(), None);
}

#[test]
#[cfg_attr(miri, ignore)]
fn newer_answer_replaces_older() {
    let (c, inj) = open();
    let r = HostNameResolver::new(&c, "printer.local");
    let (tx, rx) = mpsc::channel();
    r.add_found_listener(move |a| tx.send(a.address).unwrap())
        .unwrap();

    for address in [printer_address(), IpAddr::from([192, 0, 2, 6])] {
        inj.broadcast(&notification(RawEvent::Found(Record::HostAddress {
            host_name: "printer.local".to_string(),
            address,
        })));
        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), address);
    }
    assert_eq!(r.address(), Some(IpAddr::from([192, 0, 2, 6])));
}

#[test]
#[cfg_attr(miri, ignore)]
fn removal_counts_as_timeout() {
    let (c, inj) = open();
    let r = AddressResolver::new(&c, printer_address());
    let (tx, rx) = mpsc::channel();
    let tx2 = tx.clone();
    r.add_found_listener(move |a| tx.send(Some(a.host_name.clone())).unwrap())
        .unwrap();
    r.add_timeout_listener(move || tx2.send(None).unwrap())
        .unwrap();

    let record = Record::HostAddress {
        host_name: "printer.local".to_string(),
        address: printer_address(),
    };
    inj.broadcast(&notification(RawEvent::Found(record.clone())));
    assert_eq!(
        rx.recv_timeout(TIMEOUT).unwrap().as_deref(),
        Some("printer.local")
    );
    assert_eq!(r.host_name().as_deref(), Some("printer.local"));
    assert_eq!(r.address(), Some(printer_address()));

    inj.broadcast(&notification(RawEvent::Removed(record)));
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), None);
    assert_eq!(r.host_name(), None);
}

#[test]
#[cfg_attr(miri, ignore)]
fn service_resolves_to_host_port_and_text() {
    let (c, inj) = open();
    let r = ServiceResolver::new(&c, "Kitchen printer", "_ipp._tcp", "local");
    let (tx, rx) = mpsc::channel();
    r.add_found_listener(move |s| tx.send(s.clone()).unwrap())
        .unwrap();

    inj.broadcast(&notification(RawEvent::Found(Record::ResolvedService {
        name: "Kitchen printer".to_string(),
        service_type: "_ipp._tcp".to_string(),
        domain: "local".to_string(),
        host_name: "printer.local".to_string(),
        address: Some(printer_address()),
        port: 631,
        text: vec![b"rp=ipp/print".to_vec(), b"Color=T".to_vec()],
    })));
    let s = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(s.host_name.as_deref(), Some("printer.local"));
    assert_eq!(s.address, Some(printer_address()));
    assert_eq!(s.port, 631);
    assert_eq!(s.txt("color"), Some(&b"T"[..]));
    assert_eq!(r.service(), Some(s));
}

#[test]
#[cfg_attr(miri, ignore)]
fn resolver_for_browsed_service_keeps_its_scope() {
    let (c, inj) = open();
    let browsed = ServiceInfo::new(
        Interface::Index(3),
        Protocol::Ipv6,
        "Kitchen printer",
        "_ipp._tcp",
        "local",
    );
    let r = ServiceResolver::for_service(&c, &browsed);
    r.add_found_listener(|_| {}).unwrap();
    assert_eq!(
        inj.active()[0].1,
        Request::ResolveService {
            interface: Interface::Index(3),
            protocol: Protocol::Ipv6,
            name: "Kitchen printer".to_string(),
            service_type: "_ipp._tcp".to_string(),
            domain: "local".to_string(),
            address_protocol: Protocol::Ipv6,
        }
    );
}

#[test]
#[cfg_attr(miri, ignore)]
fn timeout_listener_alone_keeps_resolver_active() {
    let (c, inj) = open();
    let r = HostNameResolver::new(&c, "printer.local");
    let id = r.add_timeout_listener(|| {}).unwrap();
    assert!(r.is_active());
    assert!(!r.remove_found_listener(id));
    assert!(r.is_active());
    assert!(r.remove_timeout_listener(id));
    assert!(!r.is_active());
    assert_eq!(inj.unsubscribe_count(), 1);
}
