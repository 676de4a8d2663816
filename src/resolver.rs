//! What the driver needs from a resolver.
//!
//! The driver never speaks DNS itself. It hands names to a type
//! implementing [`Resolver`] and learns about finished queries through a
//! [`Completion`] it passes along with every call that may finish one.
//!
//! A resolver is non-blocking throughout. Instead of waiting on its
//! sockets, it describes what it is waiting for: [`Resolver::wait_set`]
//! fills a [`WaitSet`] with the descriptors it wants watched and
//! [`Resolver::timeout`] says how long it is willing to wait for them.
//! The driver blocks on the operating system until one of them becomes
//! ready or the time is up and then calls [`Resolver::process`] with the
//! same wait set, now carrying the readiness flags.
//!
//! Every query submitted through [`Resolver::submit`] must be reported to
//! the completion exactly once, either right away from inside `submit`
//! if it could not even be sent, or later from inside `process`.

use smallvec::SmallVec;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};
use std::{error, fmt, io};

//------------ Resolver ------------------------------------------------------

/// A non-blocking resolver driven from the outside.
pub trait Resolver {
    /// Starts resolving `qname`.
    ///
    /// The query is identified by `token` in the eventual call to
    /// `sink`. If the query cannot be started, `sink` is called before
    /// this method returns.
    fn submit(&mut self, token: Token, qname: &str, sink: &mut dyn Completion);

    /// Adds the descriptors that need watching to `set`.
    ///
    /// If nothing is added, the resolver has no pending work.
    fn wait_set(&self, set: &mut WaitSet);

    /// Returns how long the driver may wait before calling `process`.
    ///
    /// Returns `None` if the resolver has no deadline at all.
    fn timeout(&self, now: Instant) -> Option<Duration>;

    /// Does whatever work became possible.
    ///
    /// The readiness flags in `set` say which descriptors became ready.
    /// If none did, the resolver only deals with expired deadlines.
    fn process(
        &mut self,
        set: &WaitSet,
        now: Instant,
        sink: &mut dyn Completion,
    );
}

impl<R: Resolver + ?Sized> Resolver for Box<R> {
    fn submit(&mut self, token: Token, qname: &str, sink: &mut dyn Completion) {
        (**self).submit(token, qname, sink)
    }

    fn wait_set(&self, set: &mut WaitSet) {
        (**self).wait_set(set)
    }

    fn timeout(&self, now: Instant) -> Option<Duration> {
        (**self).timeout(now)
    }

    fn process(
        &mut self,
        set: &WaitSet,
        now: Instant,
        sink: &mut dyn Completion,
    ) {
        (**self).process(set, now, sink)
    }
}

//------------ Completion ----------------------------------------------------

/// Receives the final outcome of submitted queries.
pub trait Completion {
    /// Called once the query identified by `token` has finished.
    fn complete(&mut self, token: Token, outcome: Outcome);
}

impl<F: FnMut(Token, Outcome)> Completion for F {
    fn complete(&mut self, token: Token, outcome: Outcome) {
        (self)(token, outcome)
    }
}

//------------ Token ---------------------------------------------------------

/// Identifies a submitted query towards its completion.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Token(u64);

impl Token {
    /// Creates a token from its raw value.
    pub const fn new(value: u64) -> Self {
        Token(value)
    }

    /// Returns the token following this one.
    pub fn next(self) -> Self {
        Token(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

//------------ Outcome -------------------------------------------------------

/// How a query ended.
///
/// The driver only counts these. An answer is an answer whatever its
/// response code says.
#[derive(Debug)]
pub enum Outcome {
    /// A matching answer arrived.
    Answered,

    /// The query could not be sent or its socket failed.
    Errored(QueryError),

    /// No answer arrived within the allotted attempts.
    TimedOut,
}

impl Outcome {
    /// Returns whether the outcome is an answer.
    pub fn is_answered(&self) -> bool {
        matches!(self, Outcome::Answered)
    }
}

//------------ QueryError ----------------------------------------------------

/// Why a single query failed locally.
#[derive(Debug)]
pub enum QueryError {
    /// The name could not be converted into a domain name.
    BadName,

    /// The query message could not be assembled.
    Build,

    /// No socket could be opened for the query.
    Socket(io::Error),

    /// Sending the query failed.
    Send(io::Error),

    /// The socket carrying the query failed while receiving.
    Receive(io::Error),
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QueryError::BadName => f.write_str("invalid domain name"),
            QueryError::Build => f.write_str("cannot build query message"),
            QueryError::Socket(_) => f.write_str("cannot open socket"),
            QueryError::Send(_) => f.write_str("error sending query"),
            QueryError::Receive(_) => f.write_str("error receiving answer"),
        }
    }
}

impl error::Error for QueryError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            QueryError::BadName | QueryError::Build => None,
            QueryError::Socket(err)
            | QueryError::Send(err)
            | QueryError::Receive(err) => Some(err),
        }
    }
}

//------------ Interest ------------------------------------------------------

/// What a resolver is waiting for on a descriptor.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Interest {
    read: bool,
    write: bool,
}

impl Interest {
    /// Wait for the descriptor to become readable.
    pub const READABLE: Interest = Interest {
        read: true,
        write: false,
    };

    /// Wait for the descriptor to become writable.
    pub const WRITABLE: Interest = Interest {
        read: false,
        write: true,
    };

    /// Returns the union of two interests.
    pub const fn add(self, other: Interest) -> Interest {
        Interest {
            read: self.read || other.read,
            write: self.write || other.write,
        }
    }

    /// Returns whether readability is of interest.
    pub fn is_readable(self) -> bool {
        self.read
    }

    /// Returns whether writability is of interest.
    pub fn is_writable(self) -> bool {
        self.write
    }
}

//------------ Watch ---------------------------------------------------------

/// A single descriptor in a wait set.
#[derive(Clone, Copy, Debug)]
pub struct Watch {
    /// The descriptor.
    fd: RawFd,

    /// What we wait for.
    interest: Interest,

    /// Did the descriptor become readable?
    readable: bool,

    /// Did the descriptor become writable?
    writable: bool,
}

impl Watch {
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn interest(&self) -> Interest {
        self.interest
    }

    pub fn is_readable(&self) -> bool {
        self.readable
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Records the readiness reported by the operating system.
    pub(crate) fn set_ready(&mut self, readable: bool, writable: bool) {
        self.readable = readable;
        self.writable = writable;
    }
}

//------------ WaitSet -------------------------------------------------------

/// The descriptors a resolver is waiting on.
///
/// There are rarely more than a handful, so they are kept inline.
#[derive(Clone, Debug, Default)]
pub struct WaitSet {
    watches: SmallVec<[Watch; 4]>,
}

impl WaitSet {
    /// Creates a new, empty wait set.
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds a descriptor.
    ///
    /// Adding the same descriptor twice merges the interests.
    pub fn watch(&mut self, fd: RawFd, interest: Interest) {
        match self.watches.iter_mut().find(|watch| watch.fd == fd) {
            Some(watch) => watch.interest = watch.interest.add(interest),
            None => self.watches.push(Watch {
                fd,
                interest,
                readable: false,
                writable: false,
            }),
        }
    }

    /// Removes all descriptors.
    pub fn clear(&mut self) {
        self.watches.clear()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.watches.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Watch> {
        self.watches.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Watch> {
        self.watches.iter_mut()
    }

    /// Returns whether `fd` was reported readable.
    pub fn is_readable(&self, fd: RawFd) -> bool {
        self.get(fd).map(Watch::is_readable).unwrap_or(false)
    }

    /// Returns whether `fd` was reported writable.
    pub fn is_writable(&self, fd: RawFd) -> bool {
        self.get(fd).map(Watch::is_writable).unwrap_or(false)
    }

    /// Returns the number of descriptors that became ready.
    pub fn ready(&self) -> usize {
        self.watches
            .iter()
            .filter(|watch| watch.readable || watch.writable)
            .count()
    }

    fn get(&self, fd: RawFd) -> Option<&Watch> {
        self.watches.iter().find(|watch| watch.fd == fd)
    }
}

//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn watch_merges_interest() {
        let mut set = WaitSet::new();
        set.watch(3, Interest::READABLE);
        set.watch(4, Interest::READABLE);
        set.watch(3, Interest::WRITABLE);
        assert_eq!(set.len(), 2);
        let first = set.iter().next().unwrap();
        assert!(first.interest().is_readable());
        assert!(first.interest().is_writable());
    }

    #[test]
    fn readiness_of_unknown_fd() {
        let mut set = WaitSet::new();
        set.watch(3, Interest::READABLE);
        assert!(!set.is_readable(3));
        assert!(!set.is_readable(7));
        set.iter_mut().for_each(|watch| watch.set_ready(true, false));
        assert!(set.is_readable(3));
        assert!(!set.is_writable(3));
        assert_eq!(set.ready(), 1);
    }

    #[test]
    fn closures_complete() {
        let mut seen = Vec::new();
        {
            let mut sink = |token: Token, outcome: Outcome| {
                seen.push((token, outcome.is_answered()))
            };
            let sink: &mut dyn Completion = &mut sink;
            sink.complete(Token::new(1), Outcome::Answered);
            sink.complete(Token::new(2), Outcome::TimedOut);
        }
        assert_eq!(seen, [(Token::new(1), true), (Token::new(2), false)]);
    }
}
