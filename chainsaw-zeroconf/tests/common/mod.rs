#![allow(dead_code)]

use chainsaw_framework::{ConnectionConfig, Credentials, LineSource, PollBatch, SourceError};
use chainsaw_vfs::{FileObject, FileSystem, VfsError, VfsManager, VfsUri};
use chainsaw_zeroconf::{
    CredentialProvider, CredentialResponder, DiscoveryError, DiscoveryTransport, ReceiverKind,
    RegistryError, ServiceDescriptor, ServiceKey, SourceFactory, TransportEvent,
};
use std::collections::HashMap;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// poll `condition` for up to five seconds
pub fn wait_for(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// shared, ordered record of what happened across threads
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

/// a scheme that demands credentials; never actually opened
pub struct LockedFileSystem;

impl FileSystem for LockedFileSystem {
    fn scheme(&self) -> &'static str {
        "locked"
    }

    fn requires_credentials(&self) -> bool {
        true
    }

    fn open(&self, uri: &VfsUri, _: Option<&Credentials>) -> Result<Box<dyn FileObject>, VfsError> {
        Err(VfsError::UnsupportedScheme(uri.scheme().to_string()))
    }
}

pub fn vfs() -> Arc<VfsManager> {
    let mut vfs = VfsManager::with_defaults();
    vfs.register(Arc::new(LockedFileSystem));
    Arc::new(vfs)
}

/// source that only records being opened
pub struct RecordingSource {
    name: String,
    username: Option<String>,
    journal: Journal,
}

impl LineSource for RecordingSource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn open(&mut self) -> Result<(), SourceError> {
        let user = self.username.as_deref().unwrap_or("-");
        self.journal.record(format!("open {} as {}", self.name, user));
        Ok(())
    }

    fn close(&mut self) {
        self.journal.record(format!("close {}", self.name));
    }

    fn poll_lines(&mut self) -> Result<PollBatch, SourceError> {
        Ok(PollBatch::empty())
    }
}

pub struct RecordingFactory {
    pub journal: Journal,
}

impl SourceFactory for RecordingFactory {
    fn create(
        &self,
        name: &str,
        _kind: &ReceiverKind,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn LineSource>, RegistryError> {
        self.journal.record(format!("create {}", name));
        Ok(Box::new(RecordingSource {
            name: name.to_string(),
            username: config.credentials.as_ref().map(|c| c.username.clone()),
            journal: self.journal.clone(),
        }))
    }
}

/// opens once, loses the link on the first poll and never comes back
pub struct FlakySource {
    name: String,
    opens: usize,
    journal: Journal,
}

impl LineSource for FlakySource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn open(&mut self) -> Result<(), SourceError> {
        self.opens += 1;
        self.journal.record(format!("open {} #{}", self.name, self.opens));
        if self.opens > 1 {
            return Err(SourceError::Connection("refused".to_string()));
        }
        Ok(())
    }

    fn close(&mut self) {
        self.journal.record(format!("close {}", self.name));
    }

    fn poll_lines(&mut self) -> Result<PollBatch, SourceError> {
        Err(SourceError::Disconnected("peer went away".to_string()))
    }
}

pub struct FlakyFactory {
    pub journal: Journal,
}

impl SourceFactory for FlakyFactory {
    fn create(
        &self,
        name: &str,
        _kind: &ReceiverKind,
        _config: &ConnectionConfig,
    ) -> Result<Box<dyn LineSource>, RegistryError> {
        Ok(Box::new(FlakySource {
            name: name.to_string(),
            opens: 0,
            journal: self.journal.clone(),
        }))
    }
}

/// answers prompts from another thread after a delay, or never
pub struct ScriptedProvider {
    pub journal: Journal,
    pub answer: Option<Credentials>,
    pub delay: Duration,
    pub silent: bool,
}

impl CredentialProvider for ScriptedProvider {
    fn request_credentials(&self, redacted_uri: &str, responder: CredentialResponder) {
        self.journal.record(format!("prompt {}", redacted_uri));
        if self.silent {
            return;
        }
        let answer = self.answer.clone();
        let delay = self.delay;
        thread::spawn(move || {
            thread::sleep(delay);
            match answer {
                Some(credentials) => responder.provide(credentials),
                None => responder.cancel(),
            }
        });
    }
}

/// in-memory stand-in for multicast DNS
#[derive(Default)]
pub struct FakeTransport {
    browsers: Mutex<HashMap<String, Sender<TransportEvent>>>,
    published: Mutex<HashMap<ServiceKey, ServiceDescriptor>>,
    /// `resolve` answers with what was published when it was called, after this delay
    pub resolve_delay: Mutex<Duration>,
}

impl FakeTransport {
    /// make a service resolvable and announce its name
    pub fn announce(&self, descriptor: ServiceDescriptor) {
        let key = descriptor.key();
        self.published.lock().unwrap().insert(key.clone(), descriptor);
        self.send(
            &key.service_type,
            TransportEvent::Added {
                service_type: key.service_type.clone(),
                instance_name: key.instance_name.clone(),
            },
        );
    }

    /// announce a name that does not resolve yet
    pub fn announce_unresolved(&self, key: &ServiceKey) {
        self.send(
            &key.service_type,
            TransportEvent::Added {
                service_type: key.service_type.clone(),
                instance_name: key.instance_name.clone(),
            },
        );
    }

    /// send full details for a service, resolved before or not
    pub fn update(&self, descriptor: ServiceDescriptor) {
        self.published
            .lock()
            .unwrap()
            .insert(descriptor.key(), descriptor.clone());
        let service_type = descriptor.service_type.clone();
        self.send(&service_type, TransportEvent::Resolved(descriptor));
    }

    pub fn withdraw(&self, key: &ServiceKey) {
        self.published.lock().unwrap().remove(key);
        self.send(
            &key.service_type,
            TransportEvent::Removed {
                service_type: key.service_type.clone(),
                instance_name: key.instance_name.clone(),
            },
        );
    }

    fn send(&self, service_type: &str, event: TransportEvent) {
        if let Some(sender) = self.browsers.lock().unwrap().get(service_type) {
            sender.send(event).unwrap();
        }
    }
}

impl DiscoveryTransport for FakeTransport {
    fn browse(&self, service_type: &str, events: Sender<TransportEvent>) -> Result<(), DiscoveryError> {
        self.browsers
            .lock()
            .unwrap()
            .insert(service_type.to_string(), events);
        Ok(())
    }

    fn resolve(&self, service_type: &str, instance_name: &str, _: Duration) -> Option<ServiceDescriptor> {
        let key = ServiceKey {
            service_type: service_type.to_string(),
            instance_name: instance_name.to_string(),
        };
        let answer = self.published.lock().unwrap().get(&key).cloned();
        let delay = *self.resolve_delay.lock().unwrap();
        thread::sleep(delay);
        answer
    }

    fn stop_browse(&self, service_type: &str) {
        self.browsers.lock().unwrap().remove(service_type);
    }

    fn shutdown(&self) {
        self.browsers.lock().unwrap().clear();
    }
}
