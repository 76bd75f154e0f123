//! Looped transfers and pascal-string framing.
//!
//! Pascal-string wire format: a 4-byte unsigned little-endian length followed by
//! exactly that many payload bytes, with no terminator. Both peers must use this crate
//! (or the same layout) for the framing to line up.

use socket2::Socket;
use std::io::{self, Read};

use crate::endpoint::{log_failure, report, Endpoint};
use crate::error::EndpointError;
use crate::sys;

/// Width of the pascal-string length prefix in bytes.
pub const PASCAL_LENGTH_BYTES: usize = 4;

/// Largest slice handed to a single receive while reading a pascal-string payload.
/// The payload buffer grows by at most this much per step, so a bogus length prefix
/// costs nothing until the bytes actually arrive.
const RECV_CHUNK: usize = 64 * 1024;

/// Payloads up to this size are sent in one `send` together with their prefix.
const COALESCE_LIMIT: usize = 64 * 1024;

const FLUSH_SCRATCH: usize = 4096;

impl Endpoint {
    /// Send all of `buf`, retrying short writes. Returns true only if every byte was sent.
    pub fn send_looped(&mut self, buf: &[u8]) -> bool {
        report("send", self.try_send_looped(buf))
    }

    pub fn try_send_looped(&mut self, buf: &[u8]) -> Result<(), EndpointError> {
        let socket = self.socket()?;
        let mut sent = 0;
        while sent < buf.len() {
            match socket.send_with_flags(&buf[sent..], sys::SEND_FLAGS) {
                Ok(0) => {
                    return Err(EndpointError::PeerClosed {
                        transferred: sent,
                        expected: buf.len(),
                    })
                }
                Ok(n) => sent += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Fill all of `buf`, retrying short reads.
    ///
    /// Returns false if the peer closes first, the receive timeout expires, or the
    /// connection fails; a partially filled buffer is never reported as success.
    pub fn recv_looped(&mut self, buf: &mut [u8]) -> bool {
        report("recv", self.try_recv_looped(buf))
    }

    pub fn try_recv_looped(&mut self, buf: &mut [u8]) -> Result<(), EndpointError> {
        let mut socket: &Socket = self.socket()?;
        let mut received = 0;
        while received < buf.len() {
            match socket.read(&mut buf[received..]) {
                Ok(0) => {
                    return Err(EndpointError::PeerClosed {
                        transferred: received,
                        expected: buf.len(),
                    })
                }
                Ok(n) => received += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Discard whatever is already queued for reading without waiting for more.
    ///
    /// Returns the number of bytes thrown away.
    pub fn flush_rx_buffer(&mut self) -> usize {
        match self.try_flush_rx_buffer() {
            Ok(n) => n,
            Err(e) => {
                log_failure("flush", &e);
                0
            }
        }
    }

    pub fn try_flush_rx_buffer(&mut self) -> Result<usize, EndpointError> {
        let socket = self.socket()?;
        socket.set_nonblocking(true)?;
        let drained = drain(socket);
        socket.set_nonblocking(false)?;
        Ok(drained)
    }

    pub fn send_pascal_string(&mut self, s: &str) -> bool {
        self.send_pascal_bytes(s.as_bytes())
    }

    pub fn send_pascal_bytes(&mut self, payload: &[u8]) -> bool {
        report("send pascal string", self.try_send_pascal_bytes(payload))
    }

    /// Send `payload` with its length prefix.
    pub fn try_send_pascal_bytes(&mut self, payload: &[u8]) -> Result<(), EndpointError> {
        let len = u32::try_from(payload.len()).map_err(|_| EndpointError::PayloadTooLong(payload.len()))?;
        let prefix = len.to_le_bytes();

        if payload.len() <= COALESCE_LIMIT {
            let mut frame = Vec::with_capacity(PASCAL_LENGTH_BYTES + payload.len());
            frame.extend_from_slice(&prefix);
            frame.extend_from_slice(payload);
            return self.try_send_looped(&frame);
        }

        self.try_send_looped(&prefix)?;
        self.try_send_looped(payload)
    }

    /// Receive a pascal string into `out`.
    ///
    /// On failure, including a payload that is not valid UTF-8, `out` is left empty.
    pub fn recv_pascal_string(&mut self, out: &mut String) -> bool {
        out.clear();
        match self.try_recv_pascal_string() {
            Ok(s) => {
                *out = s;
                true
            }
            Err(e) => {
                log_failure("recv pascal string", &e);
                false
            }
        }
    }

    pub fn try_recv_pascal_string(&mut self) -> Result<String, EndpointError> {
        let mut payload = Vec::new();
        self.try_recv_pascal_bytes(&mut payload)?;
        Ok(String::from_utf8(payload)?)
    }

    /// Receive a length-prefixed payload into `out`. `out` is left empty on failure.
    pub fn recv_pascal_bytes(&mut self, out: &mut Vec<u8>) -> bool {
        report("recv pascal string", self.try_recv_pascal_bytes(out))
    }

    pub fn try_recv_pascal_bytes(&mut self, out: &mut Vec<u8>) -> Result<(), EndpointError> {
        out.clear();
        let mut prefix = [0u8; PASCAL_LENGTH_BYTES];
        self.try_recv_looped(&mut prefix)?;
        let len = u32::from_le_bytes(prefix) as usize;

        while out.len() < len {
            let start = out.len();
            out.resize(start + (len - start).min(RECV_CHUNK), 0);
            if let Err(e) = self.try_recv_looped(&mut out[start..]) {
                out.clear();
                return Err(match e {
                    EndpointError::PeerClosed { transferred, .. } => EndpointError::PeerClosed {
                        transferred: start + transferred,
                        expected: len,
                    },
                    other => other,
                });
            }
        }
        Ok(())
    }
}

/// Read from a non-blocking socket until it would block, hits EOF, or errors.
fn drain(mut socket: &Socket) -> usize {
    let mut scratch = [0u8; FLUSH_SCRATCH];
    let mut total = 0;
    loop {
        match socket.read(&mut scratch) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    total
}
