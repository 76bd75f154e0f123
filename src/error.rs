//! Error type for the fallible (`try_*`) endpoint operations.

use std::io;
use thiserror::Error;

use crate::common::AddressFamily;

/// Errors reported by endpoint operations.
///
/// The boolean methods on [`Endpoint`](crate::Endpoint) collapse all of these into
/// `false`; use the matching `try_*` method when the cause matters.
#[derive(Debug, Error)]
pub enum EndpointError {
    /// The endpoint does not own an open handle (never opened, closed, or detached).
    #[error("endpoint is not connected")]
    NotConnected,

    #[error("failed to open {family:?} socket: {source}")]
    Open {
        family: AddressFamily,
        #[source]
        source: io::Error,
    },

    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("{host} did not resolve to any address")]
    NoAddresses { host: String },

    #[error("failed to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("operation not supported on {0:?} endpoints")]
    Unsupported(AddressFamily),

    /// The peer shut down its side before the full byte count was transferred.
    #[error("peer closed the connection after {transferred} of {expected} bytes")]
    PeerClosed { transferred: usize, expected: usize },

    #[error("payload of {0} bytes does not fit the pascal-string length prefix")]
    PayloadTooLong(usize),

    #[error("pascal-string payload is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("invalid endpoint options: {0}")]
    Config(#[from] serde_json::Error),

    #[error("socket I/O failed: {0}")]
    Io(#[from] io::Error),
}

impl EndpointError {
    /// True when the error came from an expired RX/TX timeout.
    ///
    /// Unix reports an expired `SO_RCVTIMEO`/`SO_SNDTIMEO` as `EAGAIN`, Windows as
    /// `WSAETIMEDOUT`, so both kinds count.
    pub fn is_timeout(&self) -> bool {
        match self {
            EndpointError::Io(e) => matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut),
            _ => false,
        }
    }

    /// True when the connection itself is no longer usable.
    pub fn is_disconnect(&self) -> bool {
        match self {
            EndpointError::PeerClosed { .. } => true,
            EndpointError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}
