use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// service type used for receivers configured by hand rather than discovered
pub const MANUAL_SERVICE_TYPE: &str = "manual";

/// identity of a discovered service
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceKey {
    pub service_type: String,
    pub instance_name: String,
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.instance_name, self.service_type)
    }
}

/// A resolved service advertisement.
///
/// Equality and hashing only consider `(service_type, instance_name)`, so a
/// re-resolved service with new properties is still the same service.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub service_type: String,
    pub instance_name: String,
    pub host_address: String,
    pub port: u16,
    pub properties: BTreeMap<String, String>,
}

impl ServiceDescriptor {
    pub fn new(
        service_type: impl Into<String>,
        instance_name: impl Into<String>,
        host_address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            service_type: service_type.into(),
            instance_name: instance_name.into(),
            host_address: host_address.into(),
            port,
            properties: BTreeMap::new(),
        }
    }

    /// descriptor standing in for a configured receiver
    pub fn manual(name: impl Into<String>) -> Self {
        Self::new(MANUAL_SERVICE_TYPE, name, "", 0)
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// same service with the same address and properties
    pub fn same_advertisement(&self, other: &ServiceDescriptor) -> bool {
        self == other
            && self.host_address == other.host_address
            && self.port == other.port
            && self.properties == other.properties
    }

    /// non-empty property value
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn key(&self) -> ServiceKey {
        ServiceKey {
            service_type: self.service_type.clone(),
            instance_name: self.instance_name.clone(),
        }
    }

    pub fn is_manual(&self) -> bool {
        self.service_type == MANUAL_SERVICE_TYPE
    }
}

impl PartialEq for ServiceDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.service_type == other.service_type && self.instance_name == other.instance_name
    }
}

impl Eq for ServiceDescriptor {}

impl Hash for ServiceDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.service_type.hash(state);
        self.instance_name.hash(state);
    }
}

impl fmt::Display for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_manual() {
            f.write_str(&self.instance_name)
        } else {
            write!(
                f,
                "{} ({}:{}, {})",
                self.instance_name, self.host_address, self.port, self.service_type
            )
        }
    }
}
