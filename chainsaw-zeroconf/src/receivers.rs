//! The closed set of receiver kinds and how a descriptor selects one.

use crate::descriptor::ServiceDescriptor;
use crate::error::RegistryError;
use chainsaw_framework::ConnectionConfig;
use chainsaw_framework::config::{DEFAULT_LOG_FORMAT, DEFAULT_TIMESTAMP_FORMAT};
use chainsaw_net::SocketKind;
use std::net::IpAddr;

pub const MULTICAST_SERVICE: &str = "_log4j-mcast._udp.local.";
pub const UDP_SERVICE: &str = "_log4j-udp._udp.local.";
pub const XML_SOCKET_SERVICE: &str = "_log4j-xml._tcp.local.";
pub const SOCKET_SERVICE: &str = "_log4j-sock._tcp.local.";
pub const SOCKET_HUB_SERVICE: &str = "_log4j-hub._tcp.local.";
pub const TCP_SERVICE: &str = "_log4j._tcp.local.";
pub const GENERIC_UDP_SERVICE: &str = "_log4j._udp.local.";

/// every service type browsed for by default
pub const KNOWN_SERVICE_TYPES: &[&str] = &[
    MULTICAST_SERVICE,
    UDP_SERVICE,
    XML_SOCKET_SERVICE,
    SOCKET_SERVICE,
    SOCKET_HUB_SERVICE,
    TCP_SERVICE,
    GENERIC_UDP_SERVICE,
];

// advertised properties
pub const PROP_DECODER: &str = "decoder";
pub const PROP_CONTENT_TYPE: &str = "contentType";
pub const PROP_FILE_URI: &str = "fileURI";
pub const PROP_FORMAT: &str = "format";
pub const PROP_MULTICAST_ADDRESS: &str = "multicastAddress";
pub const PROP_TIMESTAMP_FORMAT: &str = "timestampFormat";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverKind {
    /// tail a file through the VFS
    VfsTail,
    Multicast { group: IpAddr, port: u16 },
    Udp { port: u16 },
    /// the appender connects to us
    TcpListen { port: u16 },
    SocketHub { host: String, port: u16 },
    Tcp { host: String, port: u16 },
}

impl ReceiverKind {
    /// the socket to open, or `None` for file tailing
    pub fn socket_kind(&self) -> Option<SocketKind> {
        match self {
            ReceiverKind::VfsTail => None,
            ReceiverKind::Multicast { group, port } => Some(SocketKind::Multicast {
                group: *group,
                port: *port,
            }),
            ReceiverKind::Udp { port } => Some(SocketKind::Udp { port: *port }),
            ReceiverKind::TcpListen { port } => Some(SocketKind::TcpListen { port: *port }),
            ReceiverKind::SocketHub { host, port } | ReceiverKind::Tcp { host, port } => {
                Some(SocketKind::TcpConnect {
                    host: host.clone(),
                    port: *port,
                })
            }
        }
    }
}

/// a receiver kind plus the connection it runs with
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiverSpec {
    pub kind: ReceiverKind,
    pub config: ConnectionConfig,
}

/// Pick the receiver for a resolved descriptor and derive its configuration.
pub fn receiver_for(descriptor: &ServiceDescriptor) -> Result<ReceiverSpec, RegistryError> {
    check_decoder(descriptor)?;

    let log_format = descriptor
        .property(PROP_FORMAT)
        .unwrap_or(DEFAULT_LOG_FORMAT);
    let timestamp_format = descriptor
        .property(PROP_TIMESTAMP_FORMAT)
        .unwrap_or(DEFAULT_TIMESTAMP_FORMAT);

    if let Some(file_uri) = descriptor.property(PROP_FILE_URI) {
        let mut config = ConnectionConfig::new(file_uri, log_format).with_timestamp_format(timestamp_format);
        // nobody configured credentials for a discovered file; ask when needed
        config.prompt_for_user_info = true;
        return Ok(ReceiverSpec {
            kind: ReceiverKind::VfsTail,
            config,
        });
    }

    let host = descriptor.host_address.clone();
    let port = descriptor.port;
    let kind = match descriptor.service_type.as_str() {
        MULTICAST_SERVICE => {
            let group = descriptor
                .property(PROP_MULTICAST_ADDRESS)
                .ok_or_else(|| {
                    RegistryError::InvalidDescriptor(format!(
                        "{} has no {}",
                        descriptor.instance_name, PROP_MULTICAST_ADDRESS
                    ))
                })?
                .parse::<IpAddr>()
                .map_err(|e| RegistryError::InvalidDescriptor(format!("multicast address: {}", e)))?;
            ReceiverKind::Multicast { group, port }
        }
        UDP_SERVICE | GENERIC_UDP_SERVICE => ReceiverKind::Udp { port },
        SOCKET_SERVICE | XML_SOCKET_SERVICE => ReceiverKind::TcpListen { port },
        SOCKET_HUB_SERVICE => ReceiverKind::SocketHub { host, port },
        TCP_SERVICE => ReceiverKind::Tcp { host, port },
        other => {
            return Err(RegistryError::InvalidDescriptor(format!(
                "unknown service type '{}' and no {}",
                other, PROP_FILE_URI
            )));
        }
    };

    // socket receivers keep listening; there is no single pass
    let uri = kind
        .socket_kind()
        .map(|socket| socket.to_string())
        .unwrap_or_default();
    let config = ConnectionConfig::new(uri, log_format)
        .with_timestamp_format(timestamp_format)
        .with_tailing(true);
    Ok(ReceiverSpec { kind, config })
}

fn check_decoder(descriptor: &ServiceDescriptor) -> Result<(), RegistryError> {
    if let Some(content_type) = descriptor.property(PROP_CONTENT_TYPE)
        && !content_type.to_ascii_lowercase().starts_with("text/plain")
    {
        return Err(RegistryError::UnsupportedDecoder(content_type.to_string()));
    }
    if let Some(decoder) = descriptor.property(PROP_DECODER) {
        let lower = decoder.to_ascii_lowercase();
        let line_oriented = ["pattern", "line", "text"]
            .iter()
            .any(|marker| lower.contains(marker));
        if !line_oriented {
            return Err(RegistryError::UnsupportedDecoder(decoder.to_string()));
        }
    }
    Ok(())
}
