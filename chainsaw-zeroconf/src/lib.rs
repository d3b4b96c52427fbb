// chainsaw-zeroconf - receiver discovery and lifecycle for chainsaw
//
// Browses multicast DNS for advertised log appenders, maps each resolved
// service to a receiver, negotiates credentials for remote files and keeps
// the registry of running receivers.

mod descriptor;
mod discovery;
mod error;
mod mdns;
mod negotiator;
mod receivers;
mod registry;

pub use descriptor::{MANUAL_SERVICE_TYPE, ServiceDescriptor, ServiceKey};
pub use discovery::{DiscoveryListener, DiscoveryTransport, ServiceDiscovery, TransportEvent};
pub use error::{DiscoveryError, NegotiationError, RegistryError};
pub use mdns::MdnsTransport;
pub use negotiator::{ConnectionNegotiator, CredentialProvider, CredentialResponder, Negotiation};
pub use receivers::{
    GENERIC_UDP_SERVICE, KNOWN_SERVICE_TYPES, MULTICAST_SERVICE, PROP_CONTENT_TYPE, PROP_DECODER,
    PROP_FILE_URI, PROP_FORMAT, PROP_MULTICAST_ADDRESS, PROP_TIMESTAMP_FORMAT, ReceiverKind,
    ReceiverSpec, SOCKET_HUB_SERVICE, SOCKET_SERVICE, TCP_SERVICE, UDP_SERVICE, XML_SOCKET_SERVICE,
    receiver_for,
};
pub use registry::{
    ConnectionStatus, ConnectionSummary, DefaultSourceFactory, ReceiverRegistry, RegistryBuilder,
    RegistryEvent, SourceFactory,
};
