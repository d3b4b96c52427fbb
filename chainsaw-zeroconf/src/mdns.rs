//! [`DiscoveryTransport`] backed by the `mdns-sd` daemon.

use crate::descriptor::{ServiceDescriptor, ServiceKey};
use crate::discovery::{DiscoveryTransport, TransportEvent};
use crate::error::DiscoveryError;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::collections::HashMap;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Default)]
struct ResolvedCache {
    services: Mutex<HashMap<ServiceKey, ServiceDescriptor>>,
    changed: Condvar,
}

pub struct MdnsTransport {
    daemon: ServiceDaemon,
    cache: Arc<ResolvedCache>,
    forwarders: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl MdnsTransport {
    pub fn new() -> Result<Self, DiscoveryError> {
        let daemon = ServiceDaemon::new().map_err(|e| DiscoveryError::Daemon(e.to_string()))?;
        Ok(Self {
            daemon,
            cache: Arc::new(ResolvedCache::default()),
            forwarders: Mutex::new(Vec::new()),
        })
    }
}

impl DiscoveryTransport for MdnsTransport {
    fn browse(&self, service_type: &str, events: Sender<TransportEvent>) -> Result<(), DiscoveryError> {
        let receiver = self.daemon.browse(service_type).map_err(|e| DiscoveryError::Browse {
            service_type: service_type.to_string(),
            reason: e.to_string(),
        })?;

        let cache = self.cache.clone();
        let thread_type = service_type.to_string();
        let forwarder = thread::Builder::new()
            .name(format!("mdns-{}", service_type))
            .spawn(move || {
                while let Ok(event) = receiver.recv() {
                    let keep_going = match event {
                        ServiceEvent::SearchStarted(_) => true,
                        ServiceEvent::ServiceFound(ty, fullname) => events
                            .send(TransportEvent::Added {
                                instance_name: instance_name(&fullname, &ty),
                                service_type: ty,
                            })
                            .is_ok(),
                        ServiceEvent::ServiceResolved(info) => {
                            let descriptor = descriptor_from_info(&info);
                            cache
                                .services
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .insert(descriptor.key(), descriptor.clone());
                            cache.changed.notify_all();
                            // also covers resolutions that arrive after `resolve` gave up
                            events.send(TransportEvent::Resolved(descriptor)).is_ok()
                        }
                        ServiceEvent::ServiceRemoved(ty, fullname) => {
                            let key = ServiceKey {
                                instance_name: instance_name(&fullname, &ty),
                                service_type: ty,
                            };
                            cache
                                .services
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .remove(&key);
                            events
                                .send(TransportEvent::Removed {
                                    service_type: key.service_type,
                                    instance_name: key.instance_name,
                                })
                                .is_ok()
                        }
                        ServiceEvent::SearchStopped(_) => false,
                    };
                    if !keep_going {
                        break;
                    }
                }
                log::debug!("MdnsTransport: browse of {} ended", thread_type);
            })
            .map_err(|e| DiscoveryError::Browse {
                service_type: service_type.to_string(),
                reason: e.to_string(),
            })?;

        self.forwarders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(forwarder);
        Ok(())
    }

    fn resolve(&self, service_type: &str, instance_name: &str, timeout: Duration) -> Option<ServiceDescriptor> {
        let key = ServiceKey {
            service_type: service_type.to_string(),
            instance_name: instance_name.to_string(),
        };
        let deadline = Instant::now() + timeout;
        let mut services = self
            .cache
            .services
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(descriptor) = services.get(&key) {
                return Some(descriptor.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            services = match self.cache.changed.wait_timeout(services, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    fn stop_browse(&self, service_type: &str) {
        if let Err(e) = self.daemon.stop_browse(service_type) {
            log::debug!("MdnsTransport: stop_browse {} failed: {}", service_type, e);
        }
    }

    fn shutdown(&self) {
        if let Err(e) = self.daemon.shutdown() {
            log::debug!("MdnsTransport: daemon shutdown failed: {}", e);
        }
        let forwarders = std::mem::take(&mut *self.forwarders.lock().unwrap_or_else(PoisonError::into_inner));
        for forwarder in forwarders {
            if forwarder.join().is_err() {
                log::error!("MdnsTransport: forwarder thread panicked");
            }
        }
    }
}

/// `"app._log4j._tcp.local."` with type `"_log4j._tcp.local."` is `"app"`
fn instance_name(fullname: &str, service_type: &str) -> String {
    fullname
        .strip_suffix(service_type)
        .and_then(|name| name.strip_suffix('.'))
        .unwrap_or(fullname)
        .to_string()
}

fn descriptor_from_info(info: &ServiceInfo) -> ServiceDescriptor {
    let service_type = info.get_type();
    // prefer a literal address; fall back to the advertised host name
    let host = info
        .get_addresses()
        .iter()
        .min()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| info.get_hostname().trim_end_matches('.').to_string());

    let mut descriptor = ServiceDescriptor::new(
        service_type,
        instance_name(info.get_fullname(), service_type),
        host,
        info.get_port(),
    );
    for property in info.get_properties().iter() {
        descriptor = descriptor.with_property(property.key(), property.val_str());
    }
    descriptor
}
