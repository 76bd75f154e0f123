//! Cross-platform blocking socket endpoint.
//!
//! [`Endpoint`] owns exactly one OS socket handle and hides the differences between
//! BSD sockets and Winsock: address-family selection, name resolution, short-read and
//! short-write retry, and per-platform option names. Higher-level protocol code can
//! treat a connection as a single resource with the same operations on every host.
//!
//! The public surface follows a two-layer convention:
//!
//! - `try_*` methods return [`Result`]s carrying an [`EndpointError`];
//! - the plain methods (`connect`, `send_looped`, `disable_nagle`, ...) report a
//!   boolean outcome, logging the underlying error.
//!
//! ```no_run
//! use unisocket::{AddressFamily, Endpoint, Protocol, SocketType};
//!
//! let mut sock = Endpoint::new(AddressFamily::Ipv4, SocketType::Stream, Protocol::Tcp);
//! if sock.connect("localhost", 5000) {
//!     sock.disable_nagle();
//!     sock.send_pascal_string("hello");
//! }
//! ```

pub mod common;
pub mod endpoint;
pub mod error;
mod log;
pub mod sys;
pub mod transfer;
pub mod tuning;

pub use common::{AddressFamily, EndpointOptions, EndpointState, Protocol, SocketType};
pub use endpoint::Endpoint;
pub use error::EndpointError;
pub use sys::{RawHandle, INVALID_HANDLE};
pub use transfer::PASCAL_LENGTH_BYTES;
