//! The socket endpoint: lifecycle, ownership and connection establishment.
//!
//! Transfer primitives live in [`transfer`](crate::transfer) and socket options in
//! [`tuning`](crate::tuning); both are further `impl Endpoint` blocks.

use socket2::{SockAddr, Socket};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, ToSocketAddrs};

use crate::common::{AddressFamily, EndpointOptions, EndpointState, Protocol, SocketType};
use crate::error::EndpointError;
use crate::log;
use crate::sys::{self, RawHandle, INVALID_HANDLE};

/// A single OS socket handle with exclusive ownership.
///
/// The handle is closed when the endpoint is dropped, unless it was handed off with
/// [`detach`](Endpoint::detach). Endpoints can be moved but not cloned, so an open
/// handle is never owned by two endpoints at once.
#[derive(Debug)]
pub struct Endpoint {
    socket: Option<Socket>,
    family: AddressFamily,
    socket_type: SocketType,
    protocol: Protocol,
    state: EndpointState,
    pub(crate) options: EndpointOptions,
}

impl Endpoint {
    /// Open a new socket.
    ///
    /// A failure to create the OS socket is logged and leaves the endpoint invalid;
    /// check [`is_valid`](Endpoint::is_valid) before use, or call
    /// [`open`](Endpoint::open) to get the error.
    pub fn new(family: AddressFamily, socket_type: SocketType, protocol: Protocol) -> Self {
        match Self::open(family, socket_type, protocol) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                log::error(e.to_string());
                Self::invalid(family, socket_type, protocol)
            }
        }
    }

    /// Open a new socket, returning the OS error on failure.
    pub fn open(family: AddressFamily, socket_type: SocketType, protocol: Protocol) -> Result<Self, EndpointError> {
        let socket = open_socket(family, socket_type, protocol)?;
        Ok(Endpoint {
            socket: Some(socket),
            family,
            socket_type,
            protocol,
            state: EndpointState::Open,
            options: EndpointOptions::default(),
        })
    }

    /// Wrap an already-open `socket2` socket, taking ownership.
    pub fn from_socket(socket: Socket, family: AddressFamily, socket_type: SocketType, protocol: Protocol) -> Self {
        if let Err(e) = sys::prepare(&socket) {
            log::warn(format!("failed to prepare adopted socket: {}", e));
        }
        let state = if socket.peer_addr().is_ok() {
            EndpointState::Connected
        } else {
            EndpointState::Open
        };
        Endpoint {
            socket: Some(socket),
            family,
            socket_type,
            protocol,
            state,
            options: EndpointOptions::default(),
        }
    }

    /// Adopt a raw OS handle, typically one produced by [`detach`](Endpoint::detach)
    /// or by a platform API this crate does not wrap.
    ///
    /// Passing [`INVALID_HANDLE`] yields an invalid endpoint.
    ///
    /// # Safety
    /// `handle` must be an open socket of the given family that nothing else owns or
    /// closes.
    pub unsafe fn from_raw_handle(handle: RawHandle, family: AddressFamily) -> Self {
        if handle == INVALID_HANDLE {
            return Self::invalid(family, SocketType::Stream, default_protocol(family, SocketType::Stream));
        }
        let socket = sys::from_raw(handle);
        let socket_type = match socket.r#type() {
            Ok(ty) if ty == socket2::Type::DGRAM => SocketType::Datagram,
            _ => SocketType::Stream,
        };
        Self::from_socket(socket, family, socket_type, default_protocol(family, socket_type))
    }

    /// Close the current handle (if any) and adopt `handle` in its place.
    ///
    /// # Safety
    /// Same contract as [`from_raw_handle`](Endpoint::from_raw_handle).
    pub unsafe fn assign_raw_handle(&mut self, handle: RawHandle) {
        *self = Self::from_raw_handle(handle, self.family);
    }

    fn invalid(family: AddressFamily, socket_type: SocketType, protocol: Protocol) -> Self {
        Endpoint {
            socket: None,
            family,
            socket_type,
            protocol,
            state: EndpointState::Closed,
            options: EndpointOptions::default(),
        }
    }

    /// Give up ownership of the handle without closing it.
    ///
    /// Returns [`INVALID_HANDLE`] if the endpoint owns nothing. Afterwards the endpoint
    /// is invalid and dropping or closing it has no effect on the returned handle.
    pub fn detach(&mut self) -> RawHandle {
        self.state = EndpointState::Closed;
        match self.socket.take() {
            Some(socket) => sys::into_raw(socket),
            None => INVALID_HANDLE,
        }
    }

    /// Close the handle. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(socket) = self.socket.take() {
            log::debug(format!("closing socket {}", sys::as_raw(&socket)));
            drop(socket);
        }
        self.state = EndpointState::Closed;
    }

    /// True while the endpoint owns an open handle.
    pub fn is_valid(&self) -> bool {
        self.socket.is_some()
    }

    /// Raw OS handle for use with APIs this crate does not wrap (`select`, `poll`,
    /// raw `setsockopt`, ...). Ownership stays with the endpoint.
    pub fn native_handle(&self) -> RawHandle {
        self.socket.as_ref().map_or(INVALID_HANDLE, sys::as_raw)
    }

    /// Borrow the underlying socket, if open.
    pub fn as_socket(&self) -> Option<&Socket> {
        self.socket.as_ref()
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    pub fn socket_type(&self) -> SocketType {
        self.socket_type
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn state(&self) -> EndpointState {
        self.state
    }

    /// Tuning that has been successfully applied to this endpoint.
    pub fn options(&self) -> &EndpointOptions {
        &self.options
    }

    /// Local address of an internet endpoint.
    pub fn local_addr(&self) -> Result<SocketAddr, EndpointError> {
        let addr = self.socket()?.local_addr()?;
        addr.as_socket().ok_or(EndpointError::Unsupported(self.family))
    }

    /// Remote address of a connected internet endpoint.
    pub fn peer_addr(&self) -> Result<SocketAddr, EndpointError> {
        let addr = self.socket()?.peer_addr()?;
        addr.as_socket().ok_or(EndpointError::Unsupported(self.family))
    }

    pub(crate) fn socket(&self) -> Result<&Socket, EndpointError> {
        self.socket.as_ref().ok_or(EndpointError::NotConnected)
    }

    /// Connect to `host:port`, resolving the name first. Returns false on any failure.
    pub fn connect(&mut self, host: &str, port: u16) -> bool {
        report("connect", self.try_connect(host, port))
    }

    /// Connect to `host:port`.
    ///
    /// Every address the name resolves to is tried in order. Before each attempt after
    /// the first, or whenever the address family differs from the endpoint's, the handle
    /// is reopened with the matching family and the recorded tuning is re-applied.
    ///
    /// For unix-local endpoints `host` is the socket path and `port` is ignored.
    pub fn try_connect(&mut self, host: &str, port: u16) -> Result<(), EndpointError> {
        self.socket()?;

        #[cfg(unix)]
        {
            if self.family == AddressFamily::Unix {
                let addr = SockAddr::unix(host)?;
                return match self.socket()?.connect(&addr) {
                    Ok(()) => {
                        self.state = EndpointState::Connected;
                        Ok(())
                    }
                    Err(source) => Err(EndpointError::Connect {
                        host: host.to_string(),
                        port,
                        source,
                    }),
                };
            }
        }

        let candidates: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|source| EndpointError::Resolve {
                host: host.to_string(),
                source,
            })?
            .collect();
        if candidates.is_empty() {
            return Err(EndpointError::NoAddresses { host: host.to_string() });
        }

        let mut last_error = None;
        for (attempt, addr) in candidates.iter().enumerate() {
            let family = AddressFamily::of(addr);
            if attempt > 0 || family != self.family {
                if let Err(e) = self.reopen(family) {
                    log::debug(format!("skipping {}: {}", addr, e));
                    last_error = Some(match e {
                        EndpointError::Open { source, .. } => source,
                        other => io::Error::other(other.to_string()),
                    });
                    continue;
                }
            }
            match self.socket()?.connect(&SockAddr::from(*addr)) {
                Ok(()) => {
                    log::debug(format!("connected to {} ({})", host, addr));
                    self.state = EndpointState::Connected;
                    return Ok(());
                }
                Err(e) => {
                    log::debug(format!("connect to {} failed: {}", addr, e));
                    last_error = Some(e);
                }
            }
        }

        Err(EndpointError::Connect {
            host: host.to_string(),
            port,
            source: last_error.unwrap_or_else(|| io::Error::from(io::ErrorKind::NotConnected)),
        })
    }

    /// Replace the handle with a fresh one of `family`, keeping type, protocol and tuning.
    fn reopen(&mut self, family: AddressFamily) -> Result<(), EndpointError> {
        let socket = open_socket(family, self.socket_type, self.protocol)?;
        self.socket = Some(socket);
        self.family = family;
        self.state = EndpointState::Open;
        let options = self.options.clone();
        if !self.apply_options(&options) {
            log::warn(format!("could not re-apply all options after reopening as {:?}", family));
        }
        Ok(())
    }

    /// Bind to `port` on every local interface. Port 0 picks an ephemeral port.
    pub fn bind(&mut self, port: u16) -> bool {
        report("bind", self.try_bind(port))
    }

    pub fn try_bind(&mut self, port: u16) -> Result<(), EndpointError> {
        let socket = self.socket()?;
        let addr = match self.family {
            AddressFamily::Ipv4 => SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            AddressFamily::Ipv6 => SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)),
            #[cfg(unix)]
            AddressFamily::Unix => return Err(EndpointError::Unsupported(self.family)),
        };
        socket.bind(&SockAddr::from(addr))?;
        Ok(())
    }

    /// Put a bound socket into listening mode with the platform's maximum backlog.
    pub fn listen(&mut self) -> bool {
        report("listen", self.try_listen())
    }

    pub fn try_listen(&mut self) -> Result<(), EndpointError> {
        self.socket()?.listen(sys::DEFAULT_BACKLOG)?;
        self.state = EndpointState::Listening;
        Ok(())
    }

    /// Block until a connection arrives and return it as a new endpoint.
    ///
    /// The listener keeps its own handle and keeps listening. The returned endpoint
    /// carries the listener's recorded tuning, and is invalid if accepting failed.
    pub fn accept(&self) -> Endpoint {
        self.accept_with_peer().0
    }

    /// Like [`accept`](Endpoint::accept), also returning the peer's IPv4 address.
    pub fn accept_v4(&self) -> (Endpoint, Option<SocketAddrV4>) {
        let (endpoint, peer) = self.accept_raw();
        (endpoint, peer.and_then(|addr| addr.as_socket_ipv4()))
    }

    /// Like [`accept`](Endpoint::accept), also returning the peer's IPv6 address.
    pub fn accept_v6(&self) -> (Endpoint, Option<SocketAddrV6>) {
        let (endpoint, peer) = self.accept_raw();
        (endpoint, peer.and_then(|addr| addr.as_socket_ipv6()))
    }

    /// Like [`accept`](Endpoint::accept), also returning the peer's address.
    pub fn accept_with_peer(&self) -> (Endpoint, Option<SocketAddr>) {
        let (endpoint, peer) = self.accept_raw();
        (endpoint, peer.and_then(|addr| addr.as_socket()))
    }

    fn accept_raw(&self) -> (Endpoint, Option<SockAddr>) {
        match self.try_accept() {
            Ok((endpoint, peer)) => (endpoint, Some(peer)),
            Err(e) => {
                log_failure("accept", &e);
                (Self::invalid(self.family, self.socket_type, self.protocol), None)
            }
        }
    }

    pub fn try_accept(&self) -> Result<(Endpoint, SockAddr), EndpointError> {
        let (socket, peer) = self.socket()?.accept()?;
        sys::prepare(&socket)?;
        let mut endpoint = Endpoint {
            socket: Some(socket),
            family: self.family,
            socket_type: self.socket_type,
            protocol: self.protocol,
            state: EndpointState::Connected,
            options: EndpointOptions::default(),
        };
        // Inheritance of listener options varies by platform; set them explicitly so the
        // record matches the handle.
        if !endpoint.apply_options(&self.options) {
            log::warn(format!("accepted socket {} did not take every listener option", endpoint.native_handle()));
        }
        Ok((endpoint, peer))
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.close();
    }
}

fn open_socket(family: AddressFamily, socket_type: SocketType, protocol: Protocol) -> Result<Socket, EndpointError> {
    let socket = Socket::new(family.into(), socket_type.into(), protocol.into())
        .and_then(|socket| sys::prepare(&socket).map(|()| socket))
        .map_err(|source| EndpointError::Open { family, source })?;
    log::debug(format!("opened {:?}/{:?} socket {}", family, socket_type, sys::as_raw(&socket)));
    Ok(socket)
}

fn default_protocol(family: AddressFamily, socket_type: SocketType) -> Protocol {
    if !family.is_inet() {
        return Protocol::Default;
    }
    match socket_type {
        SocketType::Stream => Protocol::Tcp,
        SocketType::Datagram => Protocol::Udp,
    }
}

/// Collapse a fallible operation into the boolean outcome, logging the failure.
pub(crate) fn report<T>(op: &str, result: Result<T, EndpointError>) -> bool {
    match result {
        Ok(_) => true,
        Err(e) => {
            log_failure(op, &e);
            false
        }
    }
}

pub(crate) fn log_failure(op: &str, err: &EndpointError) {
    if err.is_timeout() || matches!(err, EndpointError::NotConnected) {
        log::debug(format!("{} failed: {}", op, err));
    } else {
        log::warn(format!("{} failed: {}", op, err));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn tcp4() -> Endpoint {
        Endpoint::new(AddressFamily::Ipv4, SocketType::Stream, Protocol::Tcp)
    }

    fn assert_timeout_near(actual: Option<Duration>, expected: Duration) {
        let actual = actual.expect("timeout not set");
        let diff = if actual > expected { actual - expected } else { expected - actual };
        assert!(diff <= Duration::from_millis(10), "{:?} vs {:?}", actual, expected);
    }

    fn listener() -> (Endpoint, u16) {
        let mut listener = tcp4();
        assert!(listener.bind(0));
        assert!(listener.listen());
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[test]
    fn test_new_and_close() {
        let mut sock = tcp4();
        assert!(sock.is_valid());
        assert_eq!(sock.state(), EndpointState::Open);
        assert_ne!(sock.native_handle(), INVALID_HANDLE);

        sock.close();
        assert!(!sock.is_valid());
        assert_eq!(sock.state(), EndpointState::Closed);
        assert_eq!(sock.native_handle(), INVALID_HANDLE);

        sock.close();
        assert!(!sock.is_valid());
    }

    #[test]
    fn test_udp_socket() {
        let mut sock = Endpoint::new(AddressFamily::Ipv4, SocketType::Datagram, Protocol::Udp);
        assert!(sock.is_valid());
        assert!(sock.bind(0));
        assert!(!sock.listen());
    }

    #[test]
    fn test_ipv6_socket() {
        let sock = match Endpoint::open(AddressFamily::Ipv6, SocketType::Stream, Protocol::Tcp) {
            Ok(sock) => sock,
            Err(_) => return, // host without IPv6 support
        };
        assert!(sock.is_valid());
        assert_eq!(sock.family(), AddressFamily::Ipv6);
    }

    #[test]
    fn test_detach_hands_off_handle() {
        let mut sock = tcp4();
        let raw = sock.detach();
        assert_ne!(raw, INVALID_HANDLE);
        assert!(!sock.is_valid());

        sock.close();
        assert_eq!(sock.detach(), INVALID_HANDLE);

        let mut adopted = unsafe { Endpoint::from_raw_handle(raw, AddressFamily::Ipv4) };
        assert!(adopted.is_valid());
        assert_eq!(adopted.native_handle(), raw);
        assert_eq!(adopted.socket_type(), SocketType::Stream);
        assert_eq!(adopted.protocol(), Protocol::Tcp);
        assert!(adopted.set_reuseaddr(true));
    }

    #[test]
    fn test_from_raw_invalid_handle() {
        let sock = unsafe { Endpoint::from_raw_handle(INVALID_HANDLE, AddressFamily::Ipv4) };
        assert!(!sock.is_valid());
        assert_eq!(sock.state(), EndpointState::Closed);
    }

    #[test]
    fn test_assign_raw_handle_replaces_socket() {
        let mut donor = Endpoint::new(AddressFamily::Ipv4, SocketType::Datagram, Protocol::Udp);
        let raw = donor.detach();

        let mut sock = tcp4();
        unsafe { sock.assign_raw_handle(raw) };
        assert_eq!(sock.native_handle(), raw);
        assert_eq!(sock.socket_type(), SocketType::Datagram);
        assert_eq!(sock.protocol(), Protocol::Udp);
    }

    #[test]
    fn test_operations_on_closed_endpoint_fail() {
        let mut sock = tcp4();
        sock.close();
        assert!(!sock.bind(0));
        assert!(!sock.listen());
        assert!(!sock.connect("127.0.0.1", 1));
        assert!(!sock.accept().is_valid());
        assert!(matches!(sock.try_bind(0), Err(EndpointError::NotConnected)));
        assert!(matches!(sock.local_addr(), Err(EndpointError::NotConnected)));
    }

    #[test]
    fn test_bind_address_in_use() {
        let (_listener, port) = listener();
        let mut other = tcp4();
        assert!(!other.bind(port));
    }

    #[test]
    fn test_connect_refused() {
        let port = {
            let (listener, port) = listener();
            drop(listener);
            port
        };
        let mut sock = tcp4();
        assert!(!sock.connect("127.0.0.1", port));
        assert!(matches!(sock.try_connect("127.0.0.1", port), Err(EndpointError::Connect { .. })));
        assert!(sock.is_valid());
    }

    #[test]
    fn test_connect_unresolvable() {
        let mut sock = tcp4();
        let err = sock.try_connect("", 80).unwrap_err();
        assert!(matches!(err, EndpointError::Resolve { .. } | EndpointError::NoAddresses { .. }));
    }

    #[test]
    fn test_accept_and_connect() {
        let (listener, port) = listener();
        assert_eq!(listener.state(), EndpointState::Listening);

        let client = thread::spawn(move || {
            let mut sock = tcp4();
            assert!(sock.connect("127.0.0.1", port));
            assert_eq!(sock.state(), EndpointState::Connected);
            sock.local_addr().unwrap()
        });

        let (accepted, peer) = listener.accept_v4();
        let client_addr = client.join().unwrap();

        assert!(accepted.is_valid());
        assert_eq!(accepted.state(), EndpointState::Connected);
        assert_ne!(accepted.native_handle(), listener.native_handle());
        let peer = peer.unwrap();
        assert_eq!(*peer.ip(), Ipv4Addr::LOCALHOST);
        assert_eq!(SocketAddr::V4(peer), client_addr);
        assert_eq!(listener.state(), EndpointState::Listening);
    }

    #[test]
    fn test_connect_reopens_with_resolved_family() {
        let (listener, port) = listener();
        let mut sock = match Endpoint::open(AddressFamily::Ipv6, SocketType::Stream, Protocol::Tcp) {
            Ok(sock) => sock,
            Err(_) => return, // host without IPv6 support
        };
        assert!(sock.set_rx_timeout(2_000_000));

        let server = thread::spawn(move || listener.accept().is_valid());
        assert!(sock.connect("127.0.0.1", port));
        assert!(server.join().unwrap());

        assert_eq!(sock.family(), AddressFamily::Ipv4);
        assert_eq!(sock.rx_timeout_micros(), 2_000_000);
        assert_timeout_near(sock.as_socket().unwrap().read_timeout().unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn test_accepted_endpoint_carries_listener_tuning() {
        let (mut listener, port) = listener();
        assert!(listener.set_rx_timeout(300_000));
        assert!(listener.disable_nagle());

        let client = thread::spawn(move || {
            let mut sock = tcp4();
            assert!(sock.connect("127.0.0.1", port));
            sock
        });
        let accepted = listener.accept();
        let _client = client.join().unwrap();

        assert!(accepted.is_valid());
        assert!(accepted.options().nodelay);
        assert_eq!(accepted.rx_timeout_micros(), 300_000);

        let socket = accepted.as_socket().unwrap();
        assert!(socket.nodelay().unwrap());
        assert_timeout_near(socket.read_timeout().unwrap(), Duration::from_millis(300));
    }

    #[test]
    fn test_accept_without_tuning_records_defaults() {
        let (listener, port) = listener();
        let client = thread::spawn(move || {
            let mut sock = tcp4();
            assert!(sock.connect("127.0.0.1", port));
            sock
        });
        let accepted = listener.accept();
        let _client = client.join().unwrap();

        assert_eq!(accepted.options(), &EndpointOptions::default());
        assert_eq!(accepted.as_socket().unwrap().read_timeout().unwrap(), None);
    }

    #[test]
    fn test_accept_v6_over_loopback() {
        let mut listener = match Endpoint::open(AddressFamily::Ipv6, SocketType::Stream, Protocol::Tcp) {
            Ok(sock) => sock,
            Err(_) => return, // host without IPv6 support
        };
        if !listener.bind(0) || !listener.listen() {
            return;
        }
        let port = listener.local_addr().unwrap().port();

        let mut client = match Endpoint::open(AddressFamily::Ipv6, SocketType::Stream, Protocol::Tcp) {
            Ok(sock) => sock,
            Err(_) => return,
        };
        // The pending connection sits in the backlog until accepted.
        if !client.connect("::1", port) {
            return; // no ::1 configured
        }

        let (accepted, peer) = listener.accept_v6();
        assert!(accepted.is_valid());
        assert_eq!(accepted.family(), AddressFamily::Ipv6);
        assert_eq!(accepted.state(), EndpointState::Connected);
        let peer = peer.unwrap();
        assert_eq!(*peer.ip(), Ipv6Addr::LOCALHOST);
        assert_eq!(SocketAddr::V6(peer), client.local_addr().unwrap());
    }
}
