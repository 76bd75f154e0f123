//! Platform portability layer.
//!
//! Everything that differs between BSD sockets and Winsock lives here: the raw handle
//! type and its invalid sentinel, raw ownership transfer, send flags, the default
//! listen backlog, timeout granularity, and Linux-only options.

use socket2::Socket;
use std::io;
use std::os::raw::c_int;
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};
#[cfg(windows)]
use std::os::windows::io::{AsRawSocket, FromRawSocket, IntoRawSocket, RawSocket};

/// Raw OS socket handle: a file descriptor on unix, a `SOCKET` on Windows.
#[cfg(unix)]
pub type RawHandle = RawFd;
#[cfg(windows)]
pub type RawHandle = RawSocket;

/// Sentinel returned for an endpoint that owns no handle.
#[cfg(unix)]
pub const INVALID_HANDLE: RawHandle = -1;
/// Sentinel returned for an endpoint that owns no handle (`INVALID_SOCKET`).
#[cfg(windows)]
pub const INVALID_HANDLE: RawHandle = !0;

/// Flags passed to every `send`. Suppresses `SIGPIPE` where the flag exists.
#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd"
))]
pub(crate) const SEND_FLAGS: c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd"
)))]
pub(crate) const SEND_FLAGS: c_int = 0;

/// Backlog handed to `listen`: the platform maximum.
#[cfg(unix)]
pub(crate) const DEFAULT_BACKLOG: c_int = libc::SOMAXCONN;
#[cfg(windows)]
pub(crate) const DEFAULT_BACKLOG: c_int = 0x7fff_ffff;

#[cfg(unix)]
pub(crate) fn as_raw(socket: &Socket) -> RawHandle {
    socket.as_raw_fd()
}

#[cfg(windows)]
pub(crate) fn as_raw(socket: &Socket) -> RawHandle {
    socket.as_raw_socket()
}

/// Release ownership of the handle without closing it.
#[cfg(unix)]
pub(crate) fn into_raw(socket: Socket) -> RawHandle {
    socket.into_raw_fd()
}

#[cfg(windows)]
pub(crate) fn into_raw(socket: Socket) -> RawHandle {
    socket.into_raw_socket()
}

/// # Safety
/// `handle` must be an open socket that nothing else owns.
#[cfg(unix)]
pub(crate) unsafe fn from_raw(handle: RawHandle) -> Socket {
    Socket::from_raw_fd(handle)
}

/// # Safety
/// `handle` must be an open socket that nothing else owns.
#[cfg(windows)]
pub(crate) unsafe fn from_raw(handle: RawHandle) -> Socket {
    Socket::from_raw_socket(handle)
}

/// Per-handle setup done right after a socket is created or adopted.
#[cfg_attr(not(target_vendor = "apple"), allow(unused_variables))]
pub(crate) fn prepare(socket: &Socket) -> io::Result<()> {
    // No MSG_NOSIGNAL on Apple targets, the option lives on the socket instead.
    #[cfg(target_vendor = "apple")]
    socket.set_nosigpipe(true)?;
    Ok(())
}

/// Convert a microsecond timeout to the value handed to `SO_RCVTIMEO`/`SO_SNDTIMEO`.
///
/// `0` maps to `None` (block forever). Winsock takes whole milliseconds, so anything
/// shorter is rounded up instead of collapsing to "no timeout".
pub(crate) fn timeout_from_micros(micros: u32) -> Option<Duration> {
    if micros == 0 {
        return None;
    }
    if cfg!(windows) {
        Some(Duration::from_millis(u64::from(micros).div_ceil(1000)))
    } else {
        Some(Duration::from_micros(u64::from(micros)))
    }
}

/// Enable or disable `TCP_QUICKACK`.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) fn set_quickack(socket: &Socket, on: bool) -> io::Result<()> {
    socket.set_quickack(on)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) fn set_quickack(_socket: &Socket, _on: bool) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "TCP_QUICKACK is not available on this platform",
    ))
}
