//! Bulk DNS cache warm-up.
//!
//! This crate sends an A query for every name in a list to a single
//! resolver, keeping a bounded number of queries in flight, and waits until
//! every one of them has either been answered or given up on. The answers
//! themselves are thrown away. What remains is a warm cache in the
//! resolver and a measurement of how fast it took the load.
//!
//! # Modules
//!
//! * [driver] contains [`Warmer`][driver::Warmer] which does the admission
//!   control, runs the event loop, and drains outstanding queries at the
//!   end,
//! * [resolver] defines the [`Resolver`][resolver::Resolver] trait the
//!   driver needs from whatever actually talks DNS,
//! * [udp] provides [`UdpResolver`][udp::UdpResolver], a non-blocking
//!   implementation of that trait on top of the
//!   [domain](https://github.com/nlnetlabs/domain) crate’s message types,
//! * [poll] is the thin layer over `poll(2)` the driver blocks on,
//! * [conf] holds the configuration,
//! * [error] the errors that end a run, and
//! * [logging] sets up `tracing` output.
//!
//! Everything runs on a single thread. Concurrency is purely a matter of
//! many queries being outstanding on the wire at the same time.
//!
//! The crate is for Unix-y systems only.

pub mod conf;
pub mod driver;
pub mod error;
pub mod logging;
pub mod poll;
pub mod resolver;
pub mod udp;
pub mod utils;

pub use self::conf::WarmConf;
pub use self::driver::{Report, Warmer};
pub use self::error::Error;
