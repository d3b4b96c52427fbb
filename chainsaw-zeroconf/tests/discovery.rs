mod common;

use chainsaw_framework::VecSink;
use chainsaw_framework::config::TimingConfig;
use chainsaw_zeroconf::{
    ConnectionStatus, DiscoveryListener, PROP_FILE_URI, PROP_FORMAT, ReceiverRegistry, ServiceDescriptor,
    ServiceDiscovery, TCP_SERVICE, UDP_SERVICE,
};
use common::{FakeTransport, FlakyFactory, Journal, RecordingFactory, ScriptedProvider, vfs, wait_for};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn start(transport: &Arc<FakeTransport>) -> ServiceDiscovery {
    ServiceDiscovery::start_with_types(
        transport.clone(),
        &[TCP_SERVICE, UDP_SERVICE],
        Duration::from_secs(1),
    )
    .unwrap()
}

fn file_service(name: &str, uri: &str) -> ServiceDescriptor {
    ServiceDescriptor::new(TCP_SERVICE, name, "10.1.1.1", 4560)
        .with_property(PROP_FILE_URI, uri)
        .with_property(PROP_FORMAT, "LEVEL - MESSAGE")
}

#[derive(Default)]
struct CountingListener {
    resolved: Mutex<Vec<ServiceDescriptor>>,
    removed: Mutex<Vec<String>>,
}

impl DiscoveryListener for CountingListener {
    fn service_resolved(&self, descriptor: &ServiceDescriptor) {
        self.resolved.lock().unwrap().push(descriptor.clone());
    }

    fn service_removed(&self, _service_type: &str, instance_name: &str) {
        self.removed.lock().unwrap().push(instance_name.to_string());
    }
}

#[test]
fn test_resolved_service_is_tracked() {
    let transport = Arc::new(FakeTransport::default());
    let discovery = start(&transport);
    let listener = Arc::new(CountingListener::default());
    discovery.subscribe(listener.clone());

    transport.announce(file_service("billing", "/var/log/billing.log"));
    assert!(wait_for(|| discovery.descriptors().len() == 1));
    assert_eq!(discovery.find("billing").unwrap().port, 4560);
    assert!(wait_for(|| listener.resolved.lock().unwrap().len() == 1));

    transport.withdraw(&file_service("billing", "").key());
    assert!(wait_for(|| !listener.removed.lock().unwrap().is_empty()));
    assert!(discovery.descriptors().is_empty());
    assert_eq!(*listener.removed.lock().unwrap(), vec!["billing".to_string()]);
    discovery.shutdown();
}

#[test]
fn test_re_resolution_updates_in_place() {
    let transport = Arc::new(FakeTransport::default());
    let discovery = start(&transport);

    transport.announce(file_service("billing", "/var/log/billing.log"));
    assert!(wait_for(|| discovery.descriptors().len() == 1));

    transport.update(file_service("billing", "/var/log/billing-2.log"));
    assert!(wait_for(|| {
        discovery
            .find("billing")
            .is_some_and(|d| d.property(PROP_FILE_URI) == Some("/var/log/billing-2.log"))
    }));
    assert_eq!(discovery.descriptors().len(), 1);
    discovery.shutdown();
}

#[test]
fn test_unresolvable_service_is_ignored() {
    let transport = Arc::new(FakeTransport::default());
    let discovery = start(&transport);
    let listener = Arc::new(CountingListener::default());
    discovery.subscribe(listener.clone());

    // a type nobody browses for never reaches the dispatcher
    let stray = ServiceDescriptor::new("_other._tcp.local.", "stray", "10.1.1.9", 1);
    transport.announce(stray);
    std::thread::sleep(Duration::from_millis(100));
    assert!(discovery.descriptors().is_empty());
    assert!(listener.resolved.lock().unwrap().is_empty());
    discovery.shutdown();
}

#[test]
fn test_late_resolution_is_tracked() {
    let transport = Arc::new(FakeTransport::default());
    let discovery = start(&transport);
    let listener = Arc::new(CountingListener::default());
    discovery.subscribe(listener.clone());

    let billing = file_service("billing", "/var/log/billing.log");
    transport.announce_unresolved(&billing.key());
    std::thread::sleep(Duration::from_millis(100));
    assert!(discovery.descriptors().is_empty());

    // details arrive after the resolver gave up
    transport.update(billing.clone());
    assert!(wait_for(|| discovery.descriptors().len() == 1));
    assert!(wait_for(|| listener.resolved.lock().unwrap().len() == 1));

    // the same details again are not news
    transport.update(billing);
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(listener.resolved.lock().unwrap().len(), 1);
    discovery.shutdown();
}

#[test]
fn test_resolution_overtaken_by_removal_is_dropped() {
    let transport = Arc::new(FakeTransport::default());
    *transport.resolve_delay.lock().unwrap() = Duration::from_millis(300);
    let discovery = start(&transport);
    let listener = Arc::new(CountingListener::default());
    discovery.subscribe(listener.clone());

    let billing = file_service("billing", "/var/log/billing.log");
    transport.announce(billing.clone());
    std::thread::sleep(Duration::from_millis(50));
    transport.withdraw(&billing.key());
    assert!(wait_for(|| listener.removed.lock().unwrap().len() == 1));

    std::thread::sleep(Duration::from_millis(500));
    assert!(discovery.descriptors().is_empty());
    assert!(listener.resolved.lock().unwrap().is_empty());
    discovery.shutdown();
}

#[test]
fn test_auto_connect_on_resolve() {
    let journal = Journal::default();
    let transport = Arc::new(FakeTransport::default());
    let discovery = start(&transport);
    let registry = ReceiverRegistry::builder(Arc::new(VecSink::new()), vfs())
        .source_factory(Arc::new(RecordingFactory {
            journal: journal.clone(),
        }))
        .auto_connect(["billing"])
        .build();
    discovery.subscribe(Arc::new(registry.clone()));

    transport.announce(file_service("billing", "/var/log/billing.log"));
    transport.announce(file_service("search", "/var/log/search.log"));

    assert!(wait_for(|| journal.count("open billing") == 1));
    assert!(wait_for(|| discovery.descriptors().len() == 2));
    assert_eq!(registry.len(), 1);
    assert_eq!(journal.count("open search"), 0);

    discovery.shutdown();
    registry.shutdown();
}

#[test]
fn test_removal_keeps_established_and_drops_pending() {
    let journal = Journal::default();
    let transport = Arc::new(FakeTransport::default());
    let discovery = start(&transport);
    let registry = ReceiverRegistry::builder(Arc::new(VecSink::new()), vfs())
        .source_factory(Arc::new(RecordingFactory {
            journal: journal.clone(),
        }))
        .credential_provider(Arc::new(ScriptedProvider {
            journal: journal.clone(),
            answer: None,
            delay: Duration::ZERO,
            silent: true,
        }))
        .build();
    discovery.subscribe(Arc::new(registry.clone()));

    let established = file_service("billing", "/var/log/billing.log");
    let pending = file_service("vault", "locked://vault.example.com/var/log/vault.log");
    transport.announce(established.clone());
    transport.announce(pending.clone());
    assert!(wait_for(|| discovery.descriptors().len() == 2));

    registry.connect(established.clone()).unwrap();
    registry.connect(pending.clone()).unwrap();
    assert!(wait_for(|| {
        registry
            .connections()
            .iter()
            .any(|c| c.descriptor == established && c.status == ConnectionStatus::Receiving)
    }));
    assert!(wait_for(|| journal.count("prompt") == 1));

    transport.withdraw(&established.key());
    transport.withdraw(&pending.key());
    assert!(wait_for(|| discovery.descriptors().is_empty()));
    assert!(wait_for(|| !registry.is_connected(&pending.key())));
    assert!(registry.is_connected(&established.key()));
    assert_eq!(journal.count("open vault"), 0);

    discovery.shutdown();
    registry.shutdown();
}

#[test]
fn test_removal_keeps_reconnecting_receiver() {
    let journal = Journal::default();
    let registry = ReceiverRegistry::builder(Arc::new(VecSink::new()), vfs())
        .source_factory(Arc::new(FlakyFactory {
            journal: journal.clone(),
        }))
        .timing(TimingConfig {
            poll_interval_secs: 1,
            retry_interval_secs: 1,
        })
        .build();

    let billing = file_service("billing", "/var/log/billing.log");
    registry.connect(billing.clone()).unwrap();
    // opened once, lost the link and is now retrying
    assert!(wait_for(|| journal.count("open billing #2") == 1));
    assert_eq!(journal.count("close billing"), 1);
    assert_eq!(registry.connections()[0].status, ConnectionStatus::Connecting);

    DiscoveryListener::service_removed(&registry, TCP_SERVICE, "billing");
    assert!(registry.is_connected(&billing.key()));

    registry.shutdown();
}
