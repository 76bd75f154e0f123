//! Socket options.
//!
//! Each setter returns true on success and false if the option could not be set
//! (unsupported by the platform or protocol, or the endpoint is closed). A failed
//! setter leaves the endpoint otherwise usable. Successful settings are recorded in
//! [`Endpoint::options`] and re-applied if `connect` has to reopen the handle.

use crate::common::EndpointOptions;
use crate::endpoint::{report, Endpoint};
use crate::error::EndpointError;
use crate::sys;

impl Endpoint {
    /// Set `TCP_NODELAY`.
    pub fn disable_nagle(&mut self) -> bool {
        report("disable nagle", self.try_disable_nagle())
    }

    pub fn try_disable_nagle(&mut self) -> Result<(), EndpointError> {
        self.socket()?.set_nodelay(true)?;
        self.options.nodelay = true;
        Ok(())
    }

    /// Set `TCP_QUICKACK`. Only Linux and Android support it; elsewhere this fails.
    pub fn disable_delayed_ack(&mut self) -> bool {
        report("disable delayed ack", self.try_disable_delayed_ack())
    }

    pub fn try_disable_delayed_ack(&mut self) -> Result<(), EndpointError> {
        sys::set_quickack(self.socket()?, true)?;
        self.options.quickack = true;
        Ok(())
    }

    /// Set or clear `SO_REUSEADDR`. Only meaningful before `bind`.
    pub fn set_reuseaddr(&mut self, on: bool) -> bool {
        report("set reuseaddr", self.try_set_reuseaddr(on))
    }

    pub fn try_set_reuseaddr(&mut self, on: bool) -> Result<(), EndpointError> {
        self.socket()?.set_reuse_address(on)?;
        self.options.reuse_address = on;
        Ok(())
    }

    /// Bound how long a blocking receive may wait. `0` blocks indefinitely.
    pub fn set_rx_timeout(&mut self, micros: u32) -> bool {
        report("set rx timeout", self.try_set_rx_timeout(micros))
    }

    pub fn try_set_rx_timeout(&mut self, micros: u32) -> Result<(), EndpointError> {
        self.socket()?.set_read_timeout(sys::timeout_from_micros(micros))?;
        self.options.rx_timeout_micros = micros;
        Ok(())
    }

    /// Bound how long a blocking send may wait. `0` blocks indefinitely.
    pub fn set_tx_timeout(&mut self, micros: u32) -> bool {
        report("set tx timeout", self.try_set_tx_timeout(micros))
    }

    pub fn try_set_tx_timeout(&mut self, micros: u32) -> Result<(), EndpointError> {
        self.socket()?.set_write_timeout(sys::timeout_from_micros(micros))?;
        self.options.tx_timeout_micros = micros;
        Ok(())
    }

    pub fn rx_timeout_micros(&self) -> u32 {
        self.options.rx_timeout_micros
    }

    pub fn tx_timeout_micros(&self) -> u32 {
        self.options.tx_timeout_micros
    }

    /// Request a kernel send buffer of `size` bytes. The OS may round or clamp it.
    pub fn set_tx_buffer(&mut self, size: usize) -> bool {
        report("set tx buffer", self.try_set_tx_buffer(size))
    }

    pub fn try_set_tx_buffer(&mut self, size: usize) -> Result<(), EndpointError> {
        self.socket()?.set_send_buffer_size(size)?;
        self.options.tx_buffer_size = Some(size);
        Ok(())
    }

    /// Request a kernel receive buffer of `size` bytes. The OS may round or clamp it.
    pub fn set_rx_buffer(&mut self, size: usize) -> bool {
        report("set rx buffer", self.try_set_rx_buffer(size))
    }

    pub fn try_set_rx_buffer(&mut self, size: usize) -> Result<(), EndpointError> {
        self.socket()?.set_recv_buffer_size(size)?;
        self.options.rx_buffer_size = Some(size);
        Ok(())
    }

    /// Apply every option set in `opts`.
    ///
    /// All options are attempted even if an earlier one fails; the result is true only
    /// if all of them succeeded.
    pub fn apply_options(&mut self, opts: &EndpointOptions) -> bool {
        let mut ok = true;
        if opts.nodelay {
            ok &= self.disable_nagle();
        }
        if opts.quickack {
            ok &= self.disable_delayed_ack();
        }
        if opts.reuse_address {
            ok &= self.set_reuseaddr(true);
        }
        if opts.rx_timeout_micros != 0 {
            ok &= self.set_rx_timeout(opts.rx_timeout_micros);
        }
        if opts.tx_timeout_micros != 0 {
            ok &= self.set_tx_timeout(opts.tx_timeout_micros);
        }
        if let Some(size) = opts.tx_buffer_size {
            ok &= self.set_tx_buffer(size);
        }
        if let Some(size) = opts.rx_buffer_size {
            ok &= self.set_rx_buffer(size);
        }
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{AddressFamily, Protocol, SocketType};
    use std::time::Duration;

    fn tcp4() -> Endpoint {
        Endpoint::new(AddressFamily::Ipv4, SocketType::Stream, Protocol::Tcp)
    }

    fn assert_timeout_near(actual: Option<Duration>, expected: Duration) {
        let actual = actual.expect("timeout not set");
        let diff = if actual > expected { actual - expected } else { expected - actual };
        assert!(diff <= Duration::from_millis(10), "{:?} vs {:?}", actual, expected);
    }

    #[test]
    fn test_disable_nagle() {
        let mut sock = tcp4();
        assert!(sock.disable_nagle());
        assert!(sock.as_socket().unwrap().nodelay().unwrap());
        assert!(sock.options().nodelay);
    }

    #[test]
    fn test_disable_nagle_on_udp_fails() {
        let mut sock = Endpoint::new(AddressFamily::Ipv4, SocketType::Datagram, Protocol::Udp);
        assert!(!sock.disable_nagle());
        assert!(!sock.options().nodelay);
        assert!(sock.is_valid());
    }

    #[test]
    fn test_disable_delayed_ack() {
        let mut sock = tcp4();
        let ok = sock.disable_delayed_ack();
        if cfg!(any(target_os = "linux", target_os = "android")) {
            assert!(ok);
            assert!(sock.options().quickack);
        } else {
            assert!(!ok);
        }
    }

    #[test]
    fn test_reuseaddr_toggle() {
        let mut sock = tcp4();
        assert!(sock.set_reuseaddr(true));
        assert!(sock.as_socket().unwrap().reuse_address().unwrap());
        assert!(sock.set_reuseaddr(false));
        assert!(!sock.as_socket().unwrap().reuse_address().unwrap());
        assert!(!sock.options().reuse_address);
    }

    #[test]
    fn test_timeouts_recorded_and_cleared() {
        let mut sock = tcp4();
        assert!(sock.set_rx_timeout(250_000));
        assert!(sock.set_tx_timeout(500_000));
        assert_eq!(sock.rx_timeout_micros(), 250_000);
        assert_eq!(sock.tx_timeout_micros(), 500_000);

        // The kernel rounds to its timer tick.
        let socket = sock.as_socket().unwrap();
        assert_timeout_near(socket.read_timeout().unwrap(), Duration::from_millis(250));
        assert_timeout_near(socket.write_timeout().unwrap(), Duration::from_millis(500));

        assert!(sock.set_rx_timeout(0));
        assert_eq!(sock.as_socket().unwrap().read_timeout().unwrap(), None);
        assert_eq!(sock.rx_timeout_micros(), 0);
    }

    #[test]
    fn test_buffer_sizes() {
        let mut sock = tcp4();
        assert!(sock.set_tx_buffer(64 * 1024));
        assert!(sock.set_rx_buffer(64 * 1024));
        assert!(sock.as_socket().unwrap().send_buffer_size().unwrap() > 0);
        assert!(sock.as_socket().unwrap().recv_buffer_size().unwrap() > 0);
        assert_eq!(sock.options().tx_buffer_size, Some(64 * 1024));
        assert_eq!(sock.options().rx_buffer_size, Some(64 * 1024));
    }

    #[test]
    fn test_tuning_on_closed_endpoint_fails() {
        let mut sock = tcp4();
        sock.close();
        assert!(!sock.disable_nagle());
        assert!(!sock.disable_delayed_ack());
        assert!(!sock.set_reuseaddr(true));
        assert!(!sock.set_rx_timeout(1000));
        assert!(!sock.set_tx_timeout(1000));
        assert!(!sock.set_tx_buffer(4096));
        assert!(!sock.set_rx_buffer(4096));
        assert_eq!(sock.options(), &EndpointOptions::default());
    }

    #[test]
    fn test_apply_options() {
        let mut sock = tcp4();
        let mut opts = EndpointOptions::low_latency();
        opts.quickack = false;
        opts.rx_timeout_micros = 100_000;
        assert!(sock.apply_options(&opts));
        assert_eq!(sock.options(), &opts);
    }

    #[test]
    fn test_apply_options_attempts_everything() {
        let mut sock = Endpoint::new(AddressFamily::Ipv4, SocketType::Datagram, Protocol::Udp);
        let opts = EndpointOptions {
            nodelay: true,
            reuse_address: true,
            rx_timeout_micros: 10_000,
            ..EndpointOptions::default()
        };
        assert!(!sock.apply_options(&opts));
        assert!(sock.options().reuse_address);
        assert_eq!(sock.rx_timeout_micros(), 10_000);
    }
}
