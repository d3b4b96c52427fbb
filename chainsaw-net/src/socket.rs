use crate::error::NetError;
use chainsaw_framework::{LineSource, PollBatch, SourceError};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::runtime::Runtime;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TICK: Duration = Duration::from_millis(100);
const MAX_DATAGRAM: usize = 64 * 1024;

/// how a socket source obtains its lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketKind {
    /// connect to a remote appender or hub
    TcpConnect { host: String, port: u16 },
    /// accept connections from appenders
    TcpListen { port: u16 },
    Udp { port: u16 },
    Multicast { group: IpAddr, port: u16 },
}

impl fmt::Display for SocketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketKind::TcpConnect { host, port } => write!(f, "tcp://{}:{}", host, port),
            SocketKind::TcpListen { port } => write!(f, "tcp-listen://0.0.0.0:{}", port),
            SocketKind::Udp { port } => write!(f, "udp://0.0.0.0:{}", port),
            SocketKind::Multicast { group, port } => write!(f, "multicast://{}:{}", group, port),
        }
    }
}

/// a bound or connected std socket, handed to the reader thread
enum BoundSocket {
    Stream(std::net::TcpStream),
    Listener(std::net::TcpListener),
    Datagram(std::net::UdpSocket),
}

impl BoundSocket {
    /// tokio requires non-blocking std sockets
    fn set_nonblocking(&self) -> std::io::Result<()> {
        match self {
            BoundSocket::Stream(s) => s.set_nonblocking(true),
            BoundSocket::Listener(l) => l.set_nonblocking(true),
            BoundSocket::Datagram(d) => d.set_nonblocking(true),
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            BoundSocket::Stream(s) => s.local_addr().ok(),
            BoundSocket::Listener(l) => l.local_addr().ok(),
            BoundSocket::Datagram(d) => d.local_addr().ok(),
        }
    }
}

/// Line source over a TCP, UDP or multicast socket.
///
/// `open()` binds or connects synchronously so failures surface as connection
/// errors; reading then happens on a background thread with its own tokio
/// runtime, pushing lines into a buffer that `poll_lines()` drains.
pub struct SocketSource {
    name: String,
    kind: SocketKind,
    line_buffer: Arc<Mutex<Vec<String>>>,
    should_stop: Arc<Mutex<bool>>,
    /// set by the reader when the peer goes away
    disconnected: Arc<Mutex<Option<String>>>,
    thread_handle: Option<thread::JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl SocketSource {
    pub fn new(name: impl Into<String>, kind: SocketKind) -> Self {
        Self {
            name: name.into(),
            kind,
            line_buffer: Arc::new(Mutex::new(Vec::new())),
            should_stop: Arc::new(Mutex::new(false)),
            disconnected: Arc::new(Mutex::new(None)),
            thread_handle: None,
            local_addr: None,
        }
    }

    pub fn kind(&self) -> &SocketKind {
        &self.kind
    }

    /// address the socket is bound to while open
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn bind(&self) -> Result<BoundSocket, NetError> {
        match &self.kind {
            SocketKind::TcpConnect { host, port } => {
                let addr_text = format!("{}:{}", host, port);
                let addr = (host.as_str(), *port)
                    .to_socket_addrs()
                    .ok()
                    .and_then(|mut addrs| addrs.next())
                    .ok_or_else(|| NetError::Resolve(addr_text.clone()))?;
                let stream = std::net::TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
                    .map_err(|source| NetError::Connect {
                        addr: addr_text,
                        source,
                    })?;
                Ok(BoundSocket::Stream(stream))
            }
            SocketKind::TcpListen { port } => {
                let listener = std::net::TcpListener::bind((Ipv4Addr::UNSPECIFIED, *port))
                    .map_err(|source| NetError::Bind {
                        addr: format!("0.0.0.0:{}", port),
                        source,
                    })?;
                Ok(BoundSocket::Listener(listener))
            }
            SocketKind::Udp { port } => {
                let socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, *port))
                    .map_err(|source| NetError::Bind {
                        addr: format!("0.0.0.0:{}", port),
                        source,
                    })?;
                Ok(BoundSocket::Datagram(socket))
            }
            SocketKind::Multicast { group, port } => {
                let any: IpAddr = match group {
                    IpAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
                    IpAddr::V6(_) => Ipv6Addr::UNSPECIFIED.into(),
                };
                let socket = std::net::UdpSocket::bind((any, *port)).map_err(|source| {
                    NetError::Bind {
                        addr: format!("{}:{}", any, port),
                        source,
                    }
                })?;
                let joined = match group {
                    IpAddr::V4(v4) => socket.join_multicast_v4(v4, &Ipv4Addr::UNSPECIFIED),
                    IpAddr::V6(v6) => socket.join_multicast_v6(v6, 0),
                };
                joined.map_err(|source| NetError::Multicast {
                    group: group.to_string(),
                    source,
                })?;
                Ok(BoundSocket::Datagram(socket))
            }
        }
    }

    fn take_disconnect(&self) -> Option<String> {
        self.disconnected.lock().ok().and_then(|mut d| d.take())
    }
}

impl LineSource for SocketSource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn open(&mut self) -> Result<(), SourceError> {
        if self.thread_handle.is_some() {
            return Ok(());
        }
        log::debug!("SocketSource '{}': opening {}", self.name, self.kind);

        let socket = self.bind()?;
        socket.set_nonblocking().map_err(|source| NetError::Bind {
            addr: self.kind.to_string(),
            source,
        })?;
        self.local_addr = socket.local_addr();

        // fresh flags per connection so a reopen after a disconnect starts clean
        self.should_stop = Arc::new(Mutex::new(false));
        self.disconnected = Arc::new(Mutex::new(None));

        let name = self.name.clone();
        let log_buffer = self.line_buffer.clone();
        let should_stop = self.should_stop.clone();
        let disconnected = self.disconnected.clone();

        let handle = thread::Builder::new()
            .name(format!("socket-{}", self.name))
            .spawn(move || {
                // we need a tokio runtime in this thread
                let rt = match Runtime::new() {
                    Ok(rt) => rt,
                    Err(e) => {
                        log::error!("Failed to create tokio runtime: {}", e);
                        if let Ok(mut d) = disconnected.lock() {
                            *d = Some(format!("runtime unavailable: {}", e));
                        }
                        return;
                    }
                };

                let reader = Reader {
                    name,
                    log_buffer,
                    should_stop,
                    disconnected,
                };
                rt.block_on(reader.run(socket));
            })
            .map_err(NetError::Spawn)?;

        self.thread_handle = Some(handle);
        log::info!("SocketSource '{}': listening on {}", self.name, self.kind);
        Ok(())
    }

    fn close(&mut self) {
        if let Ok(mut stop) = self.should_stop.lock() {
            *stop = true;
        }
        if let Some(handle) = self.thread_handle.take() {
            join_reader(&self.name, handle);
            log::debug!("SocketSource '{}': closed", self.name);
        }
        self.local_addr = None;
    }

    fn poll_lines(&mut self) -> Result<PollBatch, SourceError> {
        if self.thread_handle.is_none() {
            return Err(SourceError::StreamClosed);
        }

        let lines: Vec<String> = match self.line_buffer.lock() {
            Ok(mut buffer) => buffer.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        if !lines.is_empty() {
            log::debug!("SocketSource '{}': polled {} lines", self.name, lines.len());
            return Ok(PollBatch::new(lines));
        }

        match self.take_disconnect() {
            Some(reason) => Err(SourceError::Disconnected(reason)),
            None => Ok(PollBatch::empty()),
        }
    }
}

/// returns `false` if the reader panicked
fn join_reader(name: &str, handle: thread::JoinHandle<()>) -> bool {
    match handle.join() {
        Ok(()) => true,
        Err(_) => {
            log::error!("SocketSource '{}': reader thread panicked", name);
            false
        }
    }
}

impl Drop for SocketSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// state shared with the background reader
#[derive(Clone)]
struct Reader {
    name: String,
    log_buffer: Arc<Mutex<Vec<String>>>,
    should_stop: Arc<Mutex<bool>>,
    disconnected: Arc<Mutex<Option<String>>>,
}

impl Reader {
    fn stopped(&self) -> bool {
        self.should_stop.lock().map(|stop| *stop).unwrap_or(true)
    }

    fn push(&self, line: String) {
        if let Ok(mut buffer) = self.log_buffer.lock() {
            buffer.push(line);
        }
    }

    fn mark_disconnected(&self, reason: impl Into<String>) {
        if let Ok(mut d) = self.disconnected.lock() {
            *d = Some(reason.into());
        }
    }

    async fn run(self, socket: BoundSocket) {
        let result = match socket {
            BoundSocket::Stream(stream) => match TcpStream::from_std(stream) {
                Ok(stream) => {
                    self.read_stream(stream).await;
                    if !self.stopped() {
                        self.mark_disconnected("connection closed by peer");
                    }
                    Ok(())
                }
                Err(e) => Err(e),
            },
            BoundSocket::Listener(listener) => match TcpListener::from_std(listener) {
                Ok(listener) => self.accept_loop(listener).await,
                Err(e) => Err(e),
            },
            BoundSocket::Datagram(socket) => match UdpSocket::from_std(socket) {
                Ok(socket) => self.receive_loop(socket).await,
                Err(e) => Err(e),
            },
        };

        if let Err(e) = result {
            log::error!("SocketSource '{}': reader failed: {}", self.name, e);
            self.mark_disconnected(e.to_string());
        }
        log::debug!("SocketSource '{}': reader stopped", self.name);
    }

    async fn read_stream(&self, stream: TcpStream) {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "?".to_string());
        let mut reader = BufReader::new(stream).lines();

        loop {
            if self.stopped() {
                break;
            }

            // read next line with a timeout so the stop flag is seen
            match tokio::time::timeout(READ_TICK, reader.next_line()).await {
                Ok(Ok(Some(line))) => {
                    let line = line.trim_end_matches('\r');
                    if !line.is_empty() {
                        self.push(line.to_string());
                    }
                }
                Ok(Ok(None)) => {
                    log::debug!("SocketSource '{}': {} closed the stream", self.name, peer);
                    break;
                }
                Ok(Err(e)) => {
                    log::warn!("SocketSource '{}': read from {} failed: {}", self.name, peer, e);
                    break;
                }
                Err(_) => continue,
            }
        }
    }

    async fn accept_loop(&self, listener: TcpListener) -> std::io::Result<()> {
        loop {
            if self.stopped() {
                return Ok(());
            }
            match tokio::time::timeout(READ_TICK, listener.accept()).await {
                Ok(Ok((stream, peer))) => {
                    log::info!("SocketSource '{}': appender connected from {}", self.name, peer);
                    let reader = self.clone();
                    tokio::spawn(async move { reader.read_stream(stream).await });
                }
                Ok(Err(e)) => {
                    log::warn!("SocketSource '{}': accept failed: {}", self.name, e);
                }
                Err(_) => continue,
            }
        }
    }

    async fn receive_loop(&self, socket: UdpSocket) -> std::io::Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            if self.stopped() {
                return Ok(());
            }
            match tokio::time::timeout(READ_TICK, socket.recv_from(&mut buf)).await {
                Ok(Ok((len, _peer))) => {
                    let text = String::from_utf8_lossy(&buf[..len]);
                    for line in text.lines() {
                        let line = line.trim_end_matches('\r');
                        if !line.is_empty() {
                            self.push(line.to_string());
                        }
                    }
                }
                Ok(Err(e)) => {
                    log::warn!("SocketSource '{}': receive failed: {}", self.name, e);
                }
                Err(_) => continue,
            }
        }
    }
}
