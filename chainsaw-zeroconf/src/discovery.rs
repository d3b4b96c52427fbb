//! Service discovery: browse for appender service types and track what resolves.
//!
//! ```text
//! transport threads ──TransportEvent──> dispatch thread ──┬─ Added ──> resolve worker ─┐
//!                                                         ├─ Resolved <────────────────┘
//!                                                         │     └─> update in place, notify listeners
//!                                                         └─ Removed ──> forget, notify listeners
//! ```

use crate::descriptor::{ServiceDescriptor, ServiceKey};
use crate::error::DiscoveryError;
use crate::receivers::KNOWN_SERVICE_TYPES;
use chainsaw_framework::Shutdown;
use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

const DISPATCH_TICK: Duration = Duration::from_millis(100);
const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

/// raw notifications from a discovery transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// a name appeared; its address and properties are not known yet
    Added {
        service_type: String,
        instance_name: String,
    },
    /// full information for a service, first time or updated
    Resolved(ServiceDescriptor),
    Removed {
        service_type: String,
        instance_name: String,
    },
}

/// a multicast-DNS (or test) backend
pub trait DiscoveryTransport: Send + Sync {
    /// start browsing; events for this type are sent to `events` until stopped
    fn browse(&self, service_type: &str, events: Sender<TransportEvent>) -> Result<(), DiscoveryError>;

    /// Block until the service resolves or `timeout` passes. Never called on the
    /// dispatch thread.
    fn resolve(&self, service_type: &str, instance_name: &str, timeout: Duration) -> Option<ServiceDescriptor>;

    fn stop_browse(&self, service_type: &str);

    fn shutdown(&self);
}

/// receives discovery notifications; calls must return quickly
pub trait DiscoveryListener: Send + Sync {
    fn service_resolved(&self, descriptor: &ServiceDescriptor);

    fn service_removed(&self, service_type: &str, instance_name: &str);
}

struct DiscoveryInner {
    transport: Arc<dyn DiscoveryTransport>,
    descriptors: Mutex<HashMap<ServiceKey, ServiceDescriptor>>,
    /// removals seen per service; locked only while `descriptors` is held
    removals: Mutex<HashMap<ServiceKey, u64>>,
    listeners: Mutex<Vec<Arc<dyn DiscoveryListener>>>,
    shutdown: Shutdown,
    resolve_timeout: Duration,
}

impl DiscoveryInner {
    fn listeners(&self) -> Vec<Arc<dyn DiscoveryListener>> {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn removals_of(&self, key: &ServiceKey) -> u64 {
        let _descriptors = self.descriptors.lock().unwrap_or_else(PoisonError::into_inner);
        self.removal_count(key)
    }

    fn removal_count(&self, key: &ServiceKey) -> u64 {
        self.removals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// `removals_seen` is the removal count when resolving started; a result
    /// that was overtaken by a removal is dropped
    fn on_resolved(&self, descriptor: ServiceDescriptor, removals_seen: Option<u64>) {
        if self.shutdown.is_closed() {
            return;
        }
        let key = descriptor.key();
        let previous = {
            let mut descriptors = self.descriptors.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(seen) = removals_seen
                && self.removal_count(&key) != seen
            {
                log::debug!("ServiceDiscovery: {} was removed while resolving", key);
                return;
            }
            descriptors.insert(key, descriptor.clone())
        };
        if previous.as_ref().is_some_and(|p| p.same_advertisement(&descriptor)) {
            return;
        }
        if previous.is_some() {
            log::debug!("ServiceDiscovery: updated {}", descriptor);
        } else {
            log::info!("ServiceDiscovery: resolved {}", descriptor);
        }
        for listener in self.listeners() {
            listener.service_resolved(&descriptor);
        }
    }

    fn on_removed(&self, service_type: &str, instance_name: &str) {
        let key = ServiceKey {
            service_type: service_type.to_string(),
            instance_name: instance_name.to_string(),
        };
        {
            let mut descriptors = self.descriptors.lock().unwrap_or_else(PoisonError::into_inner);
            descriptors.remove(&key);
            *self
                .removals
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(key.clone())
                .or_insert(0) += 1;
        }
        log::info!("ServiceDiscovery: removed {}", key);
        for listener in self.listeners() {
            listener.service_removed(service_type, instance_name);
        }
    }
}

/// Browses a set of service types and keeps one descriptor per resolved service.
pub struct ServiceDiscovery {
    inner: Arc<DiscoveryInner>,
    service_types: Vec<String>,
    dispatch: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ServiceDiscovery {
    /// browse every known appender service type
    pub fn start(transport: Arc<dyn DiscoveryTransport>) -> Result<Self, DiscoveryError> {
        Self::start_with_types(transport, KNOWN_SERVICE_TYPES, DEFAULT_RESOLVE_TIMEOUT)
    }

    pub fn start_with_types(
        transport: Arc<dyn DiscoveryTransport>,
        service_types: &[&str],
        resolve_timeout: Duration,
    ) -> Result<Self, DiscoveryError> {
        let inner = Arc::new(DiscoveryInner {
            transport,
            descriptors: Mutex::new(HashMap::new()),
            removals: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            shutdown: Shutdown::new(),
            resolve_timeout,
        });

        let (sender, receiver) = mpsc::channel();
        let dispatch_inner = inner.clone();
        let dispatch = thread::Builder::new()
            .name("discovery-dispatch".to_string())
            .spawn(move || dispatch_loop(dispatch_inner, receiver))
            .map_err(|e| DiscoveryError::Daemon(e.to_string()))?;

        let discovery = Self {
            inner,
            service_types: service_types.iter().map(|s| s.to_string()).collect(),
            dispatch: Mutex::new(Some(dispatch)),
        };

        for service_type in service_types {
            if let Err(e) = discovery.inner.transport.browse(service_type, sender.clone()) {
                discovery.shutdown();
                return Err(e);
            }
            log::debug!("ServiceDiscovery: browsing {}", service_type);
        }
        Ok(discovery)
    }

    pub fn subscribe(&self, listener: Arc<dyn DiscoveryListener>) {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// currently resolved services, sorted by identity
    pub fn descriptors(&self) -> Vec<ServiceDescriptor> {
        let descriptors = self
            .inner
            .descriptors
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut list: Vec<_> = descriptors.values().cloned().collect();
        list.sort_by_key(|d| d.key());
        list
    }

    pub fn find(&self, instance_name: &str) -> Option<ServiceDescriptor> {
        self.descriptors()
            .into_iter()
            .find(|d| d.instance_name == instance_name)
    }

    /// Stop browsing and the dispatch thread. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.shutdown.is_closed() {
            return;
        }
        self.inner.shutdown.close();
        for service_type in &self.service_types {
            self.inner.transport.stop_browse(service_type);
        }
        self.inner.transport.shutdown();

        let handle = self
            .dispatch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            log::error!("ServiceDiscovery: dispatch thread panicked");
        }
        log::debug!("ServiceDiscovery: stopped");
    }
}

impl Drop for ServiceDiscovery {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dispatch_loop(inner: Arc<DiscoveryInner>, events: mpsc::Receiver<TransportEvent>) {
    loop {
        if inner.shutdown.is_closed() {
            break;
        }
        let event = match events.recv_timeout(DISPATCH_TICK) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        match event {
            TransportEvent::Added {
                service_type,
                instance_name,
            } => {
                log::debug!("ServiceDiscovery: found {} ({})", instance_name, service_type);
                let removals_seen = inner.removals_of(&ServiceKey {
                    service_type: service_type.clone(),
                    instance_name: instance_name.clone(),
                });
                // resolving blocks; keep it off the dispatch thread
                let worker = inner.clone();
                let spawned = thread::Builder::new()
                    .name(format!("resolve-{}", instance_name))
                    .spawn(move || {
                        match worker.transport.resolve(&service_type, &instance_name, worker.resolve_timeout) {
                            Some(descriptor) => worker.on_resolved(descriptor, Some(removals_seen)),
                            None => log::warn!(
                                "ServiceDiscovery: could not resolve {} ({})",
                                instance_name,
                                service_type
                            ),
                        }
                    });
                if let Err(e) = spawned {
                    log::error!("ServiceDiscovery: failed to spawn resolver: {}", e);
                }
            }
            TransportEvent::Resolved(descriptor) => inner.on_resolved(descriptor, None),
            TransportEvent::Removed {
                service_type,
                instance_name,
            } => inner.on_removed(&service_type, &instance_name),
        }
    }
}
