use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::stats::{NetworkStats, StatsCounters};

/// Transport address identifying a remote peer.
pub type Endpoint = SocketAddr;

/// Best-effort datagram send. Implementations may drop silently; there is no
/// delivery confirmation at this layer.
pub trait Socket: Send + Sync {
    fn send(&self, endpoint: Endpoint, buffer: &[u8]) -> io::Result<usize>;

    fn local_addr(&self) -> SocketAddr;
}

/// A UDP socket shared between a facade's receive thread, the message bus
/// retry thread and caller threads.
#[derive(Debug)]
pub struct UdpChannel {
    socket: UdpSocket,
    local_addr: SocketAddr,
    remote_addr: Option<SocketAddr>,
    stats: StatsCounters,
    closed: AtomicBool,
}

impl UdpChannel {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            remote_addr: None,
            stats: StatsCounters::default(),
            closed: AtomicBool::new(false),
        })
    }

    /// Binds an ephemeral local port and associates it with `host:port`.
    pub fn connect(host: &str, port: u16) -> io::Result<Self> {
        Self::connect_to(resolve(host, port)?)
    }

    pub fn connect_to(remote: SocketAddr) -> io::Result<Self> {
        let unspecified = match remote.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };

        let socket = UdpSocket::bind(SocketAddr::new(unspecified, 0))?;
        socket.connect(remote)?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            remote_addr: Some(remote),
            stats: StatsCounters::default(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn stats(&self) -> NetworkStats {
        self.stats.snapshot()
    }

    pub fn record_dropped(&self) {
        self.stats.record_dropped();
    }

    /// Bounds how long [`UdpChannel::receive`] may suspend.
    pub fn set_read_timeout(&self, timeout: Duration) -> io::Result<()> {
        self.socket.set_read_timeout(Some(timeout))
    }

    /// Waits for one datagram. `Ok(None)` means the read timeout elapsed.
    pub fn receive(&self, buffer: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        if self.is_closed() {
            return Err(closed_error());
        }

        match self.socket.recv_from(buffer) {
            Ok((size, addr)) => {
                self.stats.record_received(size);
                Ok(Some((size, addr)))
            }
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            // ICMP port-unreachable surfaces here on some platforms after
            // sending to a peer that already went away.
            Err(ref e)
                if e.kind() == io::ErrorKind::ConnectionReset
                    || e.kind() == io::ErrorKind::ConnectionRefused =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Socket for UdpChannel {
    fn send(&self, endpoint: Endpoint, buffer: &[u8]) -> io::Result<usize> {
        if self.is_closed() {
            return Err(closed_error());
        }

        let bytes = if self.remote_addr == Some(endpoint) {
            self.socket.send(buffer)?
        } else {
            self.socket.send_to(buffer, endpoint)?
        };

        self.stats.record_sent(bytes);
        Ok(bytes)
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Resolves `host:port`, preferring an IPv4 address since servers listen on
/// `0.0.0.0`. Falls back to the first address of any family.
pub fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();

    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("{}:{} did not resolve to any address", host, port),
            )
        })
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "socket is closed")
}
