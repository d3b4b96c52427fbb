//! The receiver registry: one running receiver per connected service.
//!
//! Every receiver goes through the same lifecycle:
//!
//! ```text
//! connect ──> Pending ──negotiate──> Negotiating ──credentials──> Running ──exit──> (removed)
//!                 │                       │
//!                 └──── declined / cancelled / disconnect ──> Stopped (removed)
//! ```
//!
//! The source is created only after negotiation succeeded, so a receiver that
//! needs credentials is never opened without them.

use crate::descriptor::{ServiceDescriptor, ServiceKey};
use crate::discovery::DiscoveryListener;
use crate::error::{NegotiationError, RegistryError};
use crate::negotiator::{ConnectionNegotiator, CredentialProvider, Negotiation};
use crate::receivers::{ReceiverKind, ReceiverSpec, receiver_for};
use chainsaw_framework::config::TimingConfig;
use chainsaw_framework::{
    ConnectionConfig, EventFilter, EventSink, LineDecoder, LineSource, ReceiverHandle, TextFilter,
    spawn_receiver_thread_with_exit,
};
use chainsaw_net::SocketSource;
use chainsaw_pattern::PatternDecoder;
use chainsaw_vfs::{TailingSource, VfsManager, VfsUri};
use chrono::{DateTime, Local};
use std::collections::{HashMap, HashSet};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// creates the line source for a receiver once its connection is settled
pub trait SourceFactory: Send + Sync {
    fn create(
        &self,
        name: &str,
        kind: &ReceiverKind,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn LineSource>, RegistryError>;
}

/// file tailing through the VFS, sockets through `chainsaw-net`
pub struct DefaultSourceFactory {
    vfs: Arc<VfsManager>,
}

impl DefaultSourceFactory {
    pub fn new(vfs: Arc<VfsManager>) -> Self {
        Self { vfs }
    }
}

impl SourceFactory for DefaultSourceFactory {
    fn create(
        &self,
        name: &str,
        kind: &ReceiverKind,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn LineSource>, RegistryError> {
        match kind.socket_kind() {
            Some(socket) => Ok(Box::new(SocketSource::new(name, socket))),
            None => {
                let source = TailingSource::new(name, config, self.vfs.clone())
                    .map_err(|e| RegistryError::Source(e.to_string()))?;
                Ok(Box::new(source))
            }
        }
    }
}

/// lifecycle notifications for registry subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Connected(ServiceDescriptor),
    Disconnected(ServiceDescriptor),
}

/// where a registered receiver is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Negotiating,
    /// the worker runs but its source is not open
    Connecting,
    Receiving,
}

#[derive(Debug, Clone)]
pub struct ConnectionSummary {
    pub descriptor: ServiceDescriptor,
    pub status: ConnectionStatus,
    pub started_at: DateTime<Local>,
}

enum ConnectionState {
    Pending,
    Negotiating(Negotiation),
    Running(ReceiverHandle),
    Stopped,
}

type SharedState = Arc<Mutex<ConnectionState>>;

struct ActiveConnection {
    descriptor: ServiceDescriptor,
    state: SharedState,
    started_at: DateTime<Local>,
}

struct Inner {
    sink: Arc<dyn EventSink>,
    factory: Arc<dyn SourceFactory>,
    negotiator: ConnectionNegotiator,
    timing: TimingConfig,
    auto_connect: HashSet<String>,
    connections: Mutex<HashMap<ServiceKey, ActiveConnection>>,
    subscribers: Mutex<Vec<mpsc::Sender<RegistryEvent>>>,
}

fn lock_state(state: &SharedState) -> MutexGuard<'_, ConnectionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    fn connections(&self) -> MutexGuard<'_, HashMap<ServiceKey, ActiveConnection>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn broadcast(&self, event: RegistryEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|s| s.send(event.clone()).is_ok());
    }

    /// remove `key` only if it still refers to `state`
    fn remove_if_current(&self, key: &ServiceKey, state: &SharedState) -> bool {
        let mut connections = self.connections();
        match connections.get(key) {
            Some(active) if Arc::ptr_eq(&active.state, state) => {
                connections.remove(key);
                true
            }
            _ => false,
        }
    }

    /// second half of `connect`, run once negotiation settles
    fn launch(
        self: &Arc<Self>,
        descriptor: ServiceDescriptor,
        kind: ReceiverKind,
        decoder: Box<dyn LineDecoder>,
        filter: Option<Arc<dyn EventFilter>>,
        state: SharedState,
        negotiated: Result<ConnectionConfig, NegotiationError>,
    ) {
        let key = descriptor.key();
        let config = match negotiated {
            Ok(config) => config,
            Err(e) => {
                log::warn!("ReceiverRegistry: not connecting {}: {}", key, e);
                self.remove_if_current(&key, &state);
                *lock_state(&state) = ConnectionState::Stopped;
                return;
            }
        };

        let mut current = lock_state(&state);
        if matches!(*current, ConnectionState::Stopped) {
            log::debug!("ReceiverRegistry: {} was disconnected during negotiation", key);
            return;
        }

        let source = match self.factory.create(&descriptor.instance_name, &kind, &config) {
            Ok(source) => source,
            Err(e) => {
                log::error!("ReceiverRegistry: cannot create source for {}: {}", key, e);
                *current = ConnectionState::Stopped;
                drop(current);
                self.remove_if_current(&key, &state);
                return;
            }
        };

        let registry = Arc::downgrade(self);
        let exit_descriptor = descriptor.clone();
        let exit_state = state.clone();
        let on_exit: Box<dyn FnOnce() + Send> = Box::new(move || {
            if let Some(inner) = registry.upgrade() {
                inner.receiver_exited(exit_descriptor, &exit_state);
            }
        });

        let handle = spawn_receiver_thread_with_exit(
            source,
            decoder,
            self.sink.clone(),
            filter,
            self.timing.receiver_options(config.tailing),
            Some(on_exit),
        );
        *current = ConnectionState::Running(handle);
        log::info!("ReceiverRegistry: connected {}", descriptor);
        // still holding the state lock so a fast exit cannot report first
        self.broadcast(RegistryEvent::Connected(descriptor));
    }

    fn receiver_exited(&self, descriptor: ServiceDescriptor, state: &SharedState) {
        let removed = self.remove_if_current(&descriptor.key(), state);
        *lock_state(state) = ConnectionState::Stopped;
        if removed {
            log::info!("ReceiverRegistry: receiver for {} finished", descriptor);
            self.broadcast(RegistryEvent::Disconnected(descriptor));
        }
    }
}

/// Tracks which services have a running receiver and starts or stops them.
///
/// Cloning is cheap and every clone refers to the same registry.
#[derive(Clone)]
pub struct ReceiverRegistry {
    inner: Arc<Inner>,
}

/// configures a [`ReceiverRegistry`]
pub struct RegistryBuilder {
    sink: Arc<dyn EventSink>,
    vfs: Arc<VfsManager>,
    factory: Option<Arc<dyn SourceFactory>>,
    provider: Option<Arc<dyn CredentialProvider>>,
    timing: TimingConfig,
    auto_connect: HashSet<String>,
}

impl RegistryBuilder {
    /// replace the default socket and file sources
    pub fn source_factory(mut self, factory: Arc<dyn SourceFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn credential_provider(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// instance names connected as soon as discovery resolves them
    pub fn auto_connect<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.auto_connect.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> ReceiverRegistry {
        let factory = self
            .factory
            .unwrap_or_else(|| Arc::new(DefaultSourceFactory::new(self.vfs.clone())));
        ReceiverRegistry {
            inner: Arc::new(Inner {
                sink: self.sink,
                factory,
                negotiator: ConnectionNegotiator::new(self.vfs, self.provider),
                timing: self.timing,
                auto_connect: self.auto_connect,
                connections: Mutex::new(HashMap::new()),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl ReceiverRegistry {
    pub fn builder(sink: Arc<dyn EventSink>, vfs: Arc<VfsManager>) -> RegistryBuilder {
        RegistryBuilder {
            sink,
            vfs,
            factory: None,
            provider: None,
            timing: TimingConfig::default(),
            auto_connect: HashSet::new(),
        }
    }

    /// Start a receiver for a discovered service.
    ///
    /// Returns once the receiver is registered; credential negotiation and
    /// opening the source continue in the background.
    pub fn connect(&self, descriptor: ServiceDescriptor) -> Result<(), RegistryError> {
        if self.is_connected(&descriptor.key()) {
            return Err(RegistryError::AlreadyConnected(descriptor.key().to_string()));
        }
        let spec = receiver_for(&descriptor)?;
        self.start(descriptor, spec)
    }

    /// Start a file-tailing receiver configured by hand.
    pub fn connect_manual(
        &self,
        name: impl Into<String>,
        config: ConnectionConfig,
    ) -> Result<(), RegistryError> {
        let descriptor = ServiceDescriptor::manual(name);
        if self.is_connected(&descriptor.key()) {
            return Err(RegistryError::AlreadyConnected(descriptor.key().to_string()));
        }
        let spec = ReceiverSpec {
            kind: ReceiverKind::VfsTail,
            config,
        };
        self.start(descriptor, spec)
    }

    fn start(&self, descriptor: ServiceDescriptor, spec: ReceiverSpec) -> Result<(), RegistryError> {
        let key = descriptor.key();
        if spec.kind == ReceiverKind::VfsTail {
            VfsUri::parse(&spec.config.uri)
                .map_err(|e| RegistryError::InvalidDescriptor(e.to_string()))?;
        }
        let decoder: Box<dyn LineDecoder> = Box::new(PatternDecoder::from_config(
            descriptor.instance_name.clone(),
            &spec.config,
        )?);
        let filter = TextFilter::from_expression(spec.config.filter_expression.as_deref())
            .map(|f| Arc::new(f) as Arc<dyn EventFilter>);

        let state: SharedState = Arc::new(Mutex::new(ConnectionState::Pending));
        {
            let mut connections = self.inner.connections();
            if connections.contains_key(&key) {
                return Err(RegistryError::AlreadyConnected(key.to_string()));
            }
            connections.insert(
                key.clone(),
                ActiveConnection {
                    descriptor: descriptor.clone(),
                    state: state.clone(),
                    started_at: Local::now(),
                },
            );
        }
        log::debug!("ReceiverRegistry: registered {}", key);

        let registry: Weak<Inner> = Arc::downgrade(&self.inner);
        let launch_state = state.clone();
        let kind = spec.kind;
        let negotiation = self.inner.negotiator.negotiate(spec.config, move |negotiated| {
            if let Some(inner) = registry.upgrade() {
                inner.launch(descriptor, kind, decoder, filter, launch_state, negotiated);
            }
        });

        let mut current = lock_state(&state);
        match *current {
            ConnectionState::Pending => *current = ConnectionState::Negotiating(negotiation),
            // disconnected before negotiate returned
            ConnectionState::Stopped => negotiation.cancel(),
            _ => {}
        }
        Ok(())
    }

    /// Stop the receiver for `key` and wait for it to close its source.
    pub fn disconnect(&self, key: &ServiceKey) -> Result<(), RegistryError> {
        let active = self
            .inner
            .connections()
            .remove(key)
            .ok_or_else(|| RegistryError::NotConnected(key.to_string()))?;

        let previous = std::mem::replace(&mut *lock_state(&active.state), ConnectionState::Stopped);
        match previous {
            ConnectionState::Negotiating(negotiation) => negotiation.cancel(),
            ConnectionState::Running(handle) => handle.stop_and_join(),
            ConnectionState::Pending | ConnectionState::Stopped => {}
        }
        log::info!("ReceiverRegistry: disconnected {}", key);
        self.inner
            .broadcast(RegistryEvent::Disconnected(active.descriptor));
        Ok(())
    }

    /// whether discovery should connect this service without being asked
    pub fn auto_connect_policy(&self, descriptor: &ServiceDescriptor) -> bool {
        self.inner.auto_connect.contains(&descriptor.instance_name)
    }

    pub fn is_connected(&self, key: &ServiceKey) -> bool {
        self.inner.connections().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.connections().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.connections().is_empty()
    }

    /// descriptors of every registered receiver, sorted by identity
    pub fn descriptors(&self) -> Vec<ServiceDescriptor> {
        let mut list: Vec<_> = self
            .inner
            .connections()
            .values()
            .map(|a| a.descriptor.clone())
            .collect();
        list.sort_by_key(|d| d.key());
        list
    }

    pub fn connections(&self) -> Vec<ConnectionSummary> {
        let connections = self.inner.connections();
        let mut list: Vec<_> = connections
            .values()
            .map(|active| {
                let status = match &*lock_state(&active.state) {
                    ConnectionState::Running(handle) if handle.is_connected() => {
                        ConnectionStatus::Receiving
                    }
                    ConnectionState::Running(_) | ConnectionState::Stopped => {
                        ConnectionStatus::Connecting
                    }
                    ConnectionState::Pending | ConnectionState::Negotiating(_) => {
                        ConnectionStatus::Negotiating
                    }
                };
                ConnectionSummary {
                    descriptor: active.descriptor.clone(),
                    status,
                    started_at: active.started_at,
                }
            })
            .collect();
        list.sort_by_key(|s| s.descriptor.key());
        list
    }

    pub fn subscribe(&self) -> mpsc::Receiver<RegistryEvent> {
        let (sender, receiver) = mpsc::channel();
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sender);
        receiver
    }

    /// Stop every receiver and wait for all of them to exit.
    pub fn shutdown(&self) {
        let drained: Vec<ActiveConnection> = self
            .inner
            .connections()
            .drain()
            .map(|(_, active)| active)
            .collect();

        let mut handles = Vec::new();
        for active in &drained {
            let previous = std::mem::replace(&mut *lock_state(&active.state), ConnectionState::Stopped);
            match previous {
                ConnectionState::Negotiating(negotiation) => negotiation.cancel(),
                ConnectionState::Running(handle) => {
                    handle.stop();
                    handles.push(handle);
                }
                ConnectionState::Pending | ConnectionState::Stopped => {}
            }
        }
        for handle in handles {
            handle.join();
        }
        for active in drained {
            self.inner
                .broadcast(RegistryEvent::Disconnected(active.descriptor));
        }
        log::debug!("ReceiverRegistry: shut down");
    }
}

impl DiscoveryListener for ReceiverRegistry {
    fn service_resolved(&self, descriptor: &ServiceDescriptor) {
        {
            let mut connections = self.inner.connections();
            if let Some(active) = connections.get_mut(&descriptor.key()) {
                // re-resolved: refresh the advertisement, keep the receiver
                active.descriptor = descriptor.clone();
                return;
            }
        }
        if !self.auto_connect_policy(descriptor) {
            return;
        }
        match self.connect(descriptor.clone()) {
            Ok(()) => log::info!("ReceiverRegistry: auto-connecting {}", descriptor),
            Err(RegistryError::AlreadyConnected(_)) => {}
            Err(e) => log::warn!("ReceiverRegistry: cannot auto-connect {}: {}", descriptor, e),
        }
    }

    fn service_removed(&self, service_type: &str, instance_name: &str) {
        let key = ServiceKey {
            service_type: service_type.to_string(),
            instance_name: instance_name.to_string(),
        };

        // established receivers outlive the advertisement, even while they
        // reconnect; anything that never opened its source is abandoned
        let abandoned = {
            let mut connections = self.inner.connections();
            let Some(active) = connections.get(&key) else {
                return;
            };
            let establishing = match &*lock_state(&active.state) {
                ConnectionState::Pending | ConnectionState::Negotiating(_) => true,
                ConnectionState::Running(handle) => !handle.has_opened(),
                ConnectionState::Stopped => false,
            };
            if !establishing {
                return;
            }
            connections.remove(&key)
        };

        if let Some(active) = abandoned {
            let previous = std::mem::replace(&mut *lock_state(&active.state), ConnectionState::Stopped);
            match previous {
                ConnectionState::Negotiating(negotiation) => negotiation.cancel(),
                // stop without joining; this runs on the discovery thread
                ConnectionState::Running(handle) => handle.stop(),
                ConnectionState::Pending | ConnectionState::Stopped => {}
            }
            log::info!("ReceiverRegistry: {} went away before connecting", key);
            self.inner
                .broadcast(RegistryEvent::Disconnected(active.descriptor));
        }
    }
}
