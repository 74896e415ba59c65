use dnssd_client::{
    Connection, EntryGroup, EntryGroupState, Error, ErrorCode, Injector,
    LoopbackGateway, PublishFlags, ServiceEntry,
};
use std::sync::{mpsc, Arc};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

fn open() -> (Connection, Injector) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let (gateway, injector) = LoopbackGateway::new().unwrap();
    (Connection::open(gateway).unwrap(), injector)
}

fn printer() -> ServiceEntry {
    ServiceEntry::new("Printer", "_ipp._tcp", 631).with_txt("rp=queue")
}

#[test]
#[cfg_attr(miri, ignore)]
fn commit_publishes_and_reports_progress() {
    let (c, inj) = open();
    let group = EntryGroup::new(&c).unwrap();
    let (tx, rx) = mpsc::channel();
    group.add_state_listener(move |s| tx.send(s).unwrap());

    assert_eq!(group.state().unwrap(), EntryGroupState::Uncommitted);
    assert!(group.is_empty());
    group.add_service(&printer()).unwrap();
    assert!(!group.is_empty());
    group.commit().unwrap();
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), EntryGroupState::Registering);

    let published = inj.groups();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].services[0].name, "Printer");
    assert_eq!(published[0].services[0].domain.as_deref(), Some("local"));

    assert!(inj.set_group_state(published[0].key, EntryGroupState::Established));
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), EntryGroupState::Established);
    assert_eq!(group.state().unwrap(), EntryGroupState::Established);

    // Committed groups are frozen until reset
    assert!(matches!(
        group.add_service(&ServiceEntry::new("Scanner", "_scan._tcp", 80)),
        Err(Error::Operation {
            code: ErrorCode::BadState
        })
    ));
}

#[test]
#[cfg_attr(miri, ignore)]
fn collision_is_resolved_under_alternative_name() {
    let (c, inj) = open();
    let group = Arc::new(EntryGroup::new(&c).unwrap());
    let (tx, rx) = mpsc::channel();
    let entry = printer();

    // Rename and retry from within the listener, as an application would
    let weak = Arc::downgrade(&group);
    group.add_state_listener(move |state| {
        if state == EntryGroupState::Collision {
            if let Some(group) = weak.upgrade() {
                group.reset().unwrap();
                group.add_service(&entry.alternative()).unwrap();
                group.commit().unwrap();
            }
        }
        tx.send(state).unwrap();
    });
    group.add_service(&printer()).unwrap();
    group.commit().unwrap();
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), EntryGroupState::Registering);

    let key = inj.groups()[0].key;
    inj.set_group_state(key, EntryGroupState::Collision);
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), EntryGroupState::Collision);
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), EntryGroupState::Uncommitted);
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), EntryGroupState::Registering);

    let published = inj.groups();
    assert_eq!(published[0].services.len(), 1);
    assert_eq!(published[0].services[0].name, "Printer #2");
    assert_eq!(published[0].services[0].text, vec![b"rp=queue".to_vec()]);
}

#[test]
#[cfg_attr(miri, ignore)]
fn empty_or_invalid_entries_are_refused() {
    let (c, inj) = open();
    let group = EntryGroup::new(&c).unwrap();
    assert!(matches!(
        group.commit(),
        Err(Error::Operation {
            code: ErrorCode::IsEmpty
        })
    ));
    assert!(matches!(
        group.add_service(&ServiceEntry::new("", "_ipp._tcp", 631)),
        Err(Error::Operation {
            code: ErrorCode::InvalidServiceName
        })
    ));
    assert!(group.is_empty());
    assert_eq!(inj.groups()[0].state, EntryGroupState::Uncommitted);
}

#[test]
#[cfg_attr(miri, ignore)]
fn entry_details_reach_session() {
    let (c, inj) = open();
    let group = EntryGroup::new(&c).unwrap();
    let mut entry = printer();
    entry.flags = PublishFlags::UNIQUE | PublishFlags::NO_REVERSE;
    entry.domain = Some("example.org".to_string());
    entry.host = Some("print-server.local".to_string());
    group.add_service(&entry).unwrap();

    let published = &inj.groups()[0].services[0];
    assert_eq!(published, &entry);
}

#[test]
#[cfg_attr(miri, ignore)]
fn dispose_withdraws_group() {
    let (c, inj) = open();
    let group = EntryGroup::new(&c).unwrap();
    let other = EntryGroup::new(&c).unwrap();
    assert_eq!(inj.groups().len(), 2);

    group.dispose();
    group.dispose();
    assert!(!group.is_active());
    assert_eq!(inj.groups().len(), 1);
    assert_eq!(inj.unsubscribe_count(), 1);

    drop(other);
    assert!(inj.groups().is_empty());
    assert_eq!(inj.unsubscribe_count(), 2);
}

#[test]
#[cfg_attr(miri, ignore)]
fn state_of_old_group_is_not_delivered() {
    let (c, inj) = open();
    let group = EntryGroup::new(&c).unwrap();
    let key = inj.groups()[0].key;
    let (tx, rx) = mpsc::channel();
    group.add_state_listener(move |s| tx.send(s).unwrap());
    group.dispose();

    assert!(!inj.set_group_state(key, EntryGroupState::Established));
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
#[cfg_attr(miri, ignore)]
fn closed_connection_refuses_groups() {
    let (c, _inj) = open();
    let group = EntryGroup::new(&c).unwrap();
    c.close();
    assert!(matches!(group.state(), Err(Error::Closed)));
    assert!(matches!(group.add_service(&printer()), Err(Error::Closed)));
    assert!(matches!(EntryGroup::new(&c), Err(Error::Closed)));
    drop(group);
}
