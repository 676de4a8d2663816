//! Warm-up configuration.
//!
//! There are two parts to this module: the configuration of the UDP
//! resolver that sends the actual queries, [`UdpConf`], and the
//! configuration of the driver that feeds it, [`WarmConf`], which embeds
//! the former.
//!
//! Neither is read from a file or the command line. The tool targets a
//! caching resolver on the local machine and the values here have been
//! tuned for that deployment. Use the setters if you embed the library
//! somewhere else; they cap out-of-range values instead of failing.

use crate::utils::config::DefMinMax;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

//------------ Configuration Constants ----------------------------------------

/// Limits for the number of requests in flight at any time.
///
/// 768 was measured to show no UDP receive-buffer drops against a local
/// dnsmasq while finishing as quickly as 2048 does.
const CEILING: DefMinMax<usize> = DefMinMax::new(768, 1, 65535);

/// Limits for the per-attempt timeout.
const TIMEOUT: DefMinMax<Duration> = DefMinMax::new(
    Duration::from_secs(2),
    Duration::from_millis(1),
    Duration::from_secs(60),
);

/// Limits for the number of attempts per query.
const ATTEMPTS: DefMinMax<u8> = DefMinMax::new(1, 1, 5);

/// Limits for the size of the receive buffer.
const RECV_SIZE: DefMinMax<usize> = DefMinMax::new(2000, 512, 65535);

/// The port DNS servers listen on.
pub const DNS_PORT: u16 = 53;

//------------ UdpConf -------------------------------------------------------

/// Configuration of the UDP resolver.
#[derive(Clone, Debug)]
pub struct UdpConf {
    /// The server all queries go to.
    server: SocketAddr,

    /// How long to wait for an answer to a single attempt.
    timeout: Duration,

    /// How many times a query is sent before giving up.
    attempts: u8,

    /// Size of the buffer for receiving answers.
    recv_size: usize,

    /// Number of queries after which a socket is replaced.
    ///
    /// Zero means a socket is kept forever.
    udp_max_queries: usize,
}

impl UdpConf {
    /// Creates a new config with default values.
    pub fn new() -> Self {
        Default::default()
    }

    /// Returns the server address.
    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// Sets the server address.
    pub fn set_server(&mut self, server: SocketAddr) {
        self.server = server
    }

    /// Returns the per-attempt timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sets the per-attempt timeout.
    ///
    /// If this value is too small or too large, it will be capped.
    pub fn set_timeout(&mut self, value: Duration) {
        self.timeout = TIMEOUT.limit(value)
    }

    /// Returns the number of attempts per query.
    pub fn attempts(&self) -> u8 {
        self.attempts
    }

    /// Sets the number of attempts per query.
    ///
    /// If this value is too small or too large, it will be capped.
    pub fn set_attempts(&mut self, value: u8) {
        self.attempts = ATTEMPTS.limit(value)
    }

    /// Returns the size of the receive buffer.
    pub fn recv_size(&self) -> usize {
        self.recv_size
    }

    /// Sets the size of the receive buffer.
    ///
    /// If this value is too small or too large, it will be capped.
    pub fn set_recv_size(&mut self, value: usize) {
        self.recv_size = RECV_SIZE.limit(value)
    }

    /// Returns the number of queries sent over a socket before it is
    /// replaced by a fresh one.
    pub fn udp_max_queries(&self) -> usize {
        self.udp_max_queries
    }

    /// Sets the number of queries before a socket is replaced.
    ///
    /// Zero disables replacing sockets.
    pub fn set_udp_max_queries(&mut self, value: usize) {
        self.udp_max_queries = value
    }
}

impl Default for UdpConf {
    fn default() -> Self {
        Self {
            server: SocketAddr::new(
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                DNS_PORT,
            ),
            timeout: TIMEOUT.default(),
            attempts: ATTEMPTS.default(),
            recv_size: RECV_SIZE.default(),
            udp_max_queries: 0,
        }
    }
}

//------------ WarmConf ------------------------------------------------------

/// Configuration of a warm-up run.
#[derive(Clone, Debug)]
pub struct WarmConf {
    /// Maximum number of requests in flight.
    ceiling: usize,

    /// Configuration of the resolver.
    pub udp: UdpConf,
}

impl WarmConf {
    /// Creates a new config with default values.
    pub fn new() -> Self {
        Default::default()
    }

    /// Returns the maximum number of requests in flight.
    ///
    /// Once this many requests are outstanding, submitting waits for one
    /// of them to finish.
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Sets the maximum number of requests in flight.
    ///
    /// If this value is too small or too large, it will be capped.
    pub fn set_ceiling(&mut self, value: usize) {
        self.ceiling = CEILING.limit(value)
    }
}

impl Default for WarmConf {
    fn default() -> Self {
        Self {
            ceiling: CEILING.default(),
            udp: UdpConf::default(),
        }
    }
}

//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let conf = WarmConf::default();
        assert_eq!(conf.ceiling(), 768);
        assert_eq!(
            conf.udp.server(),
            "127.0.0.1:53".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(conf.udp.timeout(), Duration::from_millis(2000));
        assert_eq!(conf.udp.attempts(), 1);
        assert_eq!(conf.udp.udp_max_queries(), 0);
    }

    #[test]
    fn setters_cap() {
        let mut conf = WarmConf::new();
        conf.set_ceiling(0);
        assert_eq!(conf.ceiling(), 1);
        conf.udp.set_attempts(0);
        assert_eq!(conf.udp.attempts(), 1);
        conf.udp.set_attempts(42);
        assert_eq!(conf.udp.attempts(), 5);
        conf.udp.set_recv_size(12);
        assert_eq!(conf.udp.recv_size(), 512);
        conf.udp.set_timeout(Duration::from_secs(3600));
        assert_eq!(conf.udp.timeout(), Duration::from_secs(60));
    }
}
