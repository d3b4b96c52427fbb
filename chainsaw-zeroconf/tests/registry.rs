mod common;

use chainsaw_framework::config::TimingConfig;
use chainsaw_framework::{ConnectionConfig, Credentials, VecSink};
use chainsaw_zeroconf::{
    ConnectionStatus, PROP_FILE_URI, PROP_FORMAT, ReceiverRegistry, RegistryError, RegistryEvent,
    ServiceDescriptor, TCP_SERVICE,
};
use common::{Journal, RecordingFactory, ScriptedProvider, vfs, wait_for};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

fn registry_with(journal: &Journal, provider: ScriptedProvider) -> ReceiverRegistry {
    ReceiverRegistry::builder(Arc::new(VecSink::new()), vfs())
        .source_factory(Arc::new(RecordingFactory {
            journal: journal.clone(),
        }))
        .credential_provider(Arc::new(provider))
        .build()
}

fn provider(journal: &Journal, answer: Option<Credentials>) -> ScriptedProvider {
    ScriptedProvider {
        journal: journal.clone(),
        answer,
        delay: Duration::from_millis(150),
        silent: false,
    }
}

fn locked_config() -> ConnectionConfig {
    let mut config = ConnectionConfig::new("locked://logs.example.com/var/log/app.log", "LEVEL - MESSAGE");
    config.prompt_for_user_info = true;
    config.tailing = true;
    config
}

#[test]
fn test_second_connect_is_rejected() {
    let journal = Journal::default();
    let registry = registry_with(&journal, provider(&journal, None));
    let descriptor = ServiceDescriptor::new(TCP_SERVICE, "app", "127.0.0.1", 4560)
        .with_property(PROP_FILE_URI, "/var/log/app.log")
        .with_property(PROP_FORMAT, "LEVEL - MESSAGE");

    registry.connect(descriptor.clone()).unwrap();
    assert!(matches!(
        registry.connect(descriptor.clone()),
        Err(RegistryError::AlreadyConnected(_))
    ));
    assert_eq!(registry.len(), 1);

    registry.disconnect(&descriptor.key()).unwrap();
    assert!(registry.is_empty());
    registry.shutdown();
}

#[test]
fn test_source_opens_only_after_credentials() {
    let journal = Journal::default();
    let registry = registry_with(
        &journal,
        provider(&journal, Some(Credentials::new("ops", "s3cret"))),
    );

    registry.connect_manual("remote", locked_config()).unwrap();
    assert_eq!(registry.connections()[0].status, ConnectionStatus::Negotiating);

    assert!(wait_for(|| journal.count("open") == 1));
    let entries = journal.entries();
    let prompt = entries.iter().position(|e| e.starts_with("prompt")).unwrap();
    let create = entries.iter().position(|e| e.starts_with("create")).unwrap();
    assert!(prompt < create);
    assert!(entries.contains(&"open remote as ops".to_string()));
    // the prompt never shows the secret or embedded user info
    assert!(!entries[prompt].contains("s3cret"));

    registry.shutdown();
    assert!(journal.entries().contains(&"close remote".to_string()));
}

#[test]
fn test_credentials_are_not_requested_twice() {
    let journal = Journal::default();
    let registry = registry_with(
        &journal,
        provider(&journal, Some(Credentials::new("ops", "s3cret"))),
    );

    registry.connect_manual("remote", locked_config()).unwrap();
    assert!(wait_for(|| journal.count("open") == 1));
    registry
        .disconnect(&ServiceDescriptor::manual("remote").key())
        .unwrap();

    registry.connect_manual("remote", locked_config()).unwrap();
    assert!(wait_for(|| journal.count("open") == 2));
    assert_eq!(journal.count("prompt"), 1);
    registry.shutdown();
}

#[test]
fn test_declined_credentials_never_open() {
    let journal = Journal::default();
    let registry = registry_with(&journal, provider(&journal, None));
    let events = registry.subscribe();

    registry.connect_manual("remote", locked_config()).unwrap();
    assert!(wait_for(|| registry.is_empty()));
    assert_eq!(journal.count("prompt"), 1);
    assert_eq!(journal.count("create"), 0);
    assert_eq!(journal.count("open"), 0);
    // nothing was connected, so nothing is reported
    assert!(events.try_recv().is_err());
}

#[test]
fn test_disconnect_cancels_pending_negotiation() {
    let journal = Journal::default();
    let registry = registry_with(
        &journal,
        ScriptedProvider {
            journal: journal.clone(),
            answer: None,
            delay: Duration::ZERO,
            silent: true,
        },
    );

    registry.connect_manual("remote", locked_config()).unwrap();
    assert!(wait_for(|| journal.count("prompt") == 1));
    registry
        .disconnect(&ServiceDescriptor::manual("remote").key())
        .unwrap();
    assert!(registry.is_empty());

    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(journal.count("open"), 0);
}

#[test]
fn test_single_pass_file_reports_lifecycle() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "INFO - first").unwrap();
    writeln!(file, "WARN - second").unwrap();
    file.flush().unwrap();

    let sink = Arc::new(VecSink::new());
    let registry = ReceiverRegistry::builder(sink.clone(), vfs())
        .timing(TimingConfig {
            poll_interval_secs: 1,
            retry_interval_secs: 1,
        })
        .build();
    let events = registry.subscribe();

    let config = ConnectionConfig::new(file.path().to_string_lossy(), "LEVEL - MESSAGE").with_tailing(false);
    registry.connect_manual("local", config).unwrap();

    let connected = events.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(connected, RegistryEvent::Connected(ServiceDescriptor::manual("local")));
    let finished = events.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(finished, RegistryEvent::Disconnected(ServiceDescriptor::manual("local")));

    let received = sink.snapshot();
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].level, "INFO");
    assert_eq!(received[1].message, "second");
    assert_eq!(received[1].source, "local");
    assert!(registry.is_empty());
}

#[test]
fn test_invalid_manual_uri_is_rejected() {
    let journal = Journal::default();
    let registry = registry_with(&journal, provider(&journal, None));
    let result = registry.connect_manual("bad", ConnectionConfig::new("   ", "MESSAGE"));
    assert!(matches!(result, Err(RegistryError::InvalidDescriptor(_))));
    assert!(registry.is_empty());
}
