//! A non-blocking resolver sending queries over UDP.
//!
//! [`UdpResolver`] sends A queries for the class IN to a single server and
//! matches the answers coming back. It never blocks: sockets are in
//! non-blocking mode and everything that has to wait is described through
//! the [`Resolver`] trait so that whoever drives the resolver can do the
//! waiting.
//!
//! Each query gets a fixed time to be answered per attempt. The number of
//! attempts is configured once for all queries via [`UdpConf`]. Answers
//! are considered answers no matter their response code. Anything that
//! doesn’t parse as a DNS message or doesn’t match an outstanding query is
//! dropped silently.
//!
//! Queries are spread over one socket at a time. If
//! [`UdpConf::udp_max_queries`] is set, the socket is replaced with a
//! fresh one on a new random port after that many queries. The old socket
//! stays around until its last query has finished.

use self::timeout::TimeoutQueue;
use crate::conf::UdpConf;
use crate::resolver::{
    Completion, Interest, Outcome, QueryError, Resolver, Token, WaitSet,
};
use domain::base::iana::Rtype;
use domain::base::{Message, MessageBuilder, Name};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::os::fd::AsRawFd;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

//------------ Sub-modules ---------------------------------------------------

pub mod timeout;

//------------ Module Configuration ------------------------------------------

/// How many times do we try a new random port if binding fails.
const RETRY_RANDOM_PORT: usize = 10;

//------------ Key -----------------------------------------------------------

/// Identifies a query: the serial of its socket and its message ID.
type Key = (u64, u16);

//------------ UdpQuery ------------------------------------------------------

/// A query that is currently being asked.
struct UdpQuery {
    /// The token to report the outcome under.
    token: Token,

    /// The request message as sent.
    request: Message<Vec<u8>>,

    /// The number of times the request has been sent.
    attempt: u8,
}

//------------ Socket --------------------------------------------------------

/// A socket and the book-keeping for the queries it carries.
struct Socket {
    /// Identifies the socket in query keys.
    serial: u64,

    /// The socket, connected to the server.
    sock: UdpSocket,

    /// Number of queries currently using this socket.
    pending: usize,

    /// Number of queries ever assigned to this socket.
    sent: usize,

    /// IDs of queries waiting for the socket to become writable.
    backlog: VecDeque<u16>,

    /// Will this socket take new queries?
    retired: bool,
}

impl Socket {
    fn new(serial: u64, sock: UdpSocket) -> Self {
        Socket {
            serial,
            sock,
            pending: 0,
            sent: 0,
            backlog: VecDeque::new(),
            retired: false,
        }
    }
}

//------------ UdpResolver ---------------------------------------------------

/// A resolver sending UDP queries to a single server.
pub struct UdpResolver {
    /// The configuration.
    conf: UdpConf,

    /// The open sockets. Only the last one may take new queries.
    sockets: Vec<Socket>,

    /// All pending queries.
    queries: HashMap<Key, UdpQuery>,

    /// The deadlines of the sent queries by key, token, and attempt.
    ///
    /// Keys are reused once a query has finished, so only the token tells
    /// a stale deadline from one of the query now using the key.
    timeouts: TimeoutQueue<(Key, Token, u8)>,

    /// The serial for the next socket.
    next_serial: u64,

    /// Receive buffer.
    buf: Vec<u8>,
}

/// # Creation
///
impl UdpResolver {
    /// Creates a new resolver.
    ///
    /// This opens the first socket, so a failure to do so is reported here
    /// rather than for every query.
    pub fn new(conf: UdpConf) -> Result<Self, io::Error> {
        let sock = Self::bind(conf.server())?;
        debug!(
            server = %conf.server(),
            local = ?sock.local_addr().ok(),
            "opened UDP socket"
        );
        let buf = vec![0; conf.recv_size()];
        Ok(UdpResolver {
            conf,
            sockets: vec![Socket::new(0, sock)],
            queries: HashMap::new(),
            timeouts: TimeoutQueue::new(),
            next_serial: 1,
            buf,
        })
    }

    /// Opens a non-blocking socket connected to `server`.
    fn bind(server: SocketAddr) -> Result<UdpSocket, io::Error> {
        let mut i = 0;
        let sock = loop {
            let local: SocketAddr = if server.is_ipv4() {
                ([0u8; 4], 0).into()
            } else {
                ([0u16; 8], 0).into()
            };
            match UdpSocket::bind(local) {
                Ok(sock) => break sock,
                Err(err) => {
                    if i == RETRY_RANDOM_PORT {
                        return Err(err);
                    } else {
                        i += 1
                    }
                }
            }
        };
        sock.connect(server)?;
        sock.set_nonblocking(true)?;
        Ok(sock)
    }

    /// Creates the request message for `qname`.
    fn create_message(
        qname: &str,
        id: u16,
    ) -> Result<Message<Vec<u8>>, QueryError> {
        let qname =
            Name::<Vec<u8>>::from_str(qname).map_err(|_| QueryError::BadName)?;
        let mut msg = MessageBuilder::new_vec();
        msg.header_mut().set_id(id);
        msg.header_mut().set_rd(true);
        let mut msg = msg.question();
        msg.push((&qname, Rtype::A))
            .map_err(|_| QueryError::Build)?;
        Ok(msg.into_message())
    }
}

/// # Access to State
///
impl UdpResolver {
    /// Returns the configuration.
    pub fn conf(&self) -> &UdpConf {
        &self.conf
    }

    /// Returns the number of queries that have not finished yet.
    pub fn pending(&self) -> usize {
        self.queries.len()
    }

    /// Returns the number of open sockets.
    pub fn sockets(&self) -> usize {
        self.sockets.len()
    }
}

/// # Sending
///
impl UdpResolver {
    /// Starts a query, returning an error if that fails.
    fn start(&mut self, token: Token, qname: &str) -> Result<(), QueryError> {
        // Build first so a bad name doesn’t cost a socket rotation.
        let mut request = Self::create_message(qname, 0)?;
        let idx = self.current_socket().map_err(QueryError::Socket)?;
        let serial = self.sockets[idx].serial;
        let mut id = rand::random();
        while self.queries.contains_key(&(serial, id)) {
            id = rand::random()
        }
        request.header_mut().set_id(id);

        let sock = &mut self.sockets[idx];
        sock.sent += 1;
        sock.pending += 1;
        self.queries.insert(
            (serial, id),
            UdpQuery {
                token,
                request,
                attempt: 0,
            },
        );
        trace!(%token, qname, id, serial, "query started");
        if let Err(err) = self.transmit(idx, id, Instant::now()) {
            self.forget((serial, id));
            return Err(err);
        }
        Ok(())
    }

    /// Returns the index of the socket to use for a new query.
    ///
    /// Replaces the current socket if it has carried enough queries.
    fn current_socket(&mut self) -> Result<usize, io::Error> {
        let max = self.conf.udp_max_queries();
        if let Some(sock) = self.sockets.last() {
            let exhausted = (max > 0 && sock.sent >= max)
                || sock.pending >= usize::from(u16::MAX);
            if !sock.retired && !exhausted {
                return Ok(self.sockets.len() - 1);
            }
        }
        if let Some(sock) = self.sockets.last_mut() {
            sock.retired = true;
        }
        self.close_idle();
        let sock = Self::bind(self.conf.server())?;
        let serial = self.next_serial;
        self.next_serial += 1;
        debug!(serial, local = ?sock.local_addr().ok(), "rotated UDP socket");
        self.sockets.push(Socket::new(serial, sock));
        Ok(self.sockets.len() - 1)
    }

    /// Sends the query `id` on socket `idx` or queues it if the socket is
    /// full.
    fn transmit(
        &mut self,
        idx: usize,
        id: u16,
        now: Instant,
    ) -> Result<(), QueryError> {
        let sock = &mut self.sockets[idx];
        let key = (sock.serial, id);
        let query = match self.queries.get_mut(&key) {
            Some(query) => query,
            None => return Ok(()),
        };
        match sock.sock.send(query.request.as_slice()) {
            Ok(_) => {
                query.attempt += 1;
                self.timeouts.push(
                    now + self.conf.timeout(),
                    (key, query.token, query.attempt),
                );
                Ok(())
            }
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                sock.backlog.push_back(id);
                Ok(())
            }
            Err(err) => Err(QueryError::Send(err)),
        }
    }

    /// Sends queued queries on socket `idx` for as long as it takes them.
    fn flush(&mut self, idx: usize, now: Instant, sink: &mut dyn Completion) {
        let serial = self.sockets[idx].serial;
        while let Some(id) = self.sockets[idx].backlog.pop_front() {
            let before = self.sockets[idx].backlog.len();
            if let Err(err) = self.transmit(idx, id, now) {
                self.fail((serial, id), err, sink);
            } else if self.sockets[idx].backlog.len() > before {
                // Requeued at the back, so put it back in front.
                if let Some(id) = self.sockets[idx].backlog.pop_back() {
                    self.sockets[idx].backlog.push_front(id);
                }
                break;
            }
        }
    }
}

/// # Receiving and Expiring
///
impl UdpResolver {
    /// Receives everything currently waiting on socket `idx`.
    fn recv(&mut self, idx: usize, sink: &mut dyn Completion) {
        let serial = self.sockets[idx].serial;
        loop {
            let len = match self.sockets[idx].sock.recv(&mut self.buf) {
                Ok(len) => len,
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                    break
                }
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {
                    continue
                }
                Err(err) => {
                    self.recv_failed(serial, err, sink);
                    break;
                }
            };
            let key = match Message::from_octets(&self.buf[..len]) {
                Ok(answer) => {
                    let key = (serial, answer.header().id());
                    match self.queries.get(&key) {
                        Some(query) if answer.is_answer(&query.request) => {
                            key
                        }
                        _ => {
                            trace!(serial, "dropping unexpected answer");
                            continue;
                        }
                    }
                }
                Err(_) => {
                    trace!(serial, len, "dropping short message");
                    continue;
                }
            };
            if let Some(query) = self.forget(key) {
                trace!(token = %query.token, "query answered");
                sink.complete(query.token, Outcome::Answered);
            }
        }
    }

    /// Handles a failed receive on the socket with `serial`.
    ///
    /// The error is about whatever was sent last, so all queries sent over
    /// the socket are failed.
    fn recv_failed(
        &mut self,
        serial: u64,
        err: io::Error,
        sink: &mut dyn Completion,
    ) {
        if err.kind() == io::ErrorKind::ConnectionRefused {
            debug!(serial, "server refused queries");
        } else {
            warn!(serial, %err, "receiving from UDP socket failed");
        }
        self.fail_sent(serial, &err, sink);
    }

    /// Times out or resends all queries whose deadline has passed.
    fn expire(&mut self, now: Instant, sink: &mut dyn Completion) {
        while let Some((key, token, attempt)) = self.timeouts.pop_expired(now)
        {
            let retry = match self.queries.get(&key) {
                Some(query)
                    if query.token == token && query.attempt == attempt =>
                {
                    query.attempt < self.conf.attempts()
                }
                _ => continue,
            };
            let idx = self
                .sockets
                .iter()
                .position(|sock| sock.serial == key.0);
            match idx {
                Some(idx) if retry => {
                    trace!(id = key.1, attempt, "resending query");
                    if let Err(err) = self.transmit(idx, key.1, now) {
                        self.fail(key, err, sink);
                    }
                }
                _ => {
                    if let Some(query) = self.forget(key) {
                        trace!(token = %query.token, "query timed out");
                        sink.complete(query.token, Outcome::TimedOut);
                    }
                }
            }
        }
        let queries = &self.queries;
        self.timeouts.clean_head(|(key, token, attempt)| {
            queries
                .get(key)
                .map(|query| {
                    query.token != *token || query.attempt != *attempt
                })
                .unwrap_or(true)
        });
    }

    /// Fails every query on the socket that has been sent at least once.
    fn fail_sent(
        &mut self,
        serial: u64,
        err: &io::Error,
        sink: &mut dyn Completion,
    ) {
        let keys: Vec<_> = self
            .queries
            .iter()
            .filter(|(key, query)| key.0 == serial && query.attempt > 0)
            .map(|(key, _)| *key)
            .collect();
        for key in keys {
            let err = match err.raw_os_error() {
                Some(code) => io::Error::from_raw_os_error(code),
                None => err.kind().into(),
            };
            self.fail(key, QueryError::Receive(err), sink);
        }
    }
}

/// # Book-keeping
///
impl UdpResolver {
    /// Removes a query and reports it as failed.
    fn fail(&mut self, key: Key, err: QueryError, sink: &mut dyn Completion) {
        if let Some(query) = self.forget(key) {
            trace!(token = %query.token, %err, "query failed");
            sink.complete(query.token, Outcome::Errored(err));
        }
    }

    /// Removes a query and releases its slot on the socket.
    fn forget(&mut self, key: Key) -> Option<UdpQuery> {
        let query = self.queries.remove(&key)?;
        if let Some(sock) =
            self.sockets.iter_mut().find(|sock| sock.serial == key.0)
        {
            sock.pending -= 1;
        }
        Some(query)
    }

    /// Closes retired sockets without pending queries.
    fn close_idle(&mut self) {
        self.sockets.retain(|sock| {
            let keep = !sock.retired || sock.pending > 0;
            if !keep {
                trace!(serial = sock.serial, "closing retired UDP socket");
            }
            keep
        });
    }
}

//--- Resolver

impl Resolver for UdpResolver {
    fn submit(&mut self, token: Token, qname: &str, sink: &mut dyn Completion) {
        if let Err(err) = self.start(token, qname) {
            trace!(%token, qname, %err, "query failed at submission");
            sink.complete(token, Outcome::Errored(err));
        }
    }

    fn wait_set(&self, set: &mut WaitSet) {
        for sock in &self.sockets {
            if sock.pending == 0 {
                continue;
            }
            let interest = if sock.backlog.is_empty() {
                Interest::READABLE
            } else {
                Interest::READABLE.add(Interest::WRITABLE)
            };
            set.watch(sock.sock.as_raw_fd(), interest);
        }
    }

    fn timeout(&self, now: Instant) -> Option<Duration> {
        self.timeouts
            .next_timeout()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    fn process(
        &mut self,
        set: &WaitSet,
        now: Instant,
        sink: &mut dyn Completion,
    ) {
        let mut idx = 0;
        while idx < self.sockets.len() {
            let fd = self.sockets[idx].sock.as_raw_fd();
            if set.is_writable(fd) {
                self.flush(idx, now, sink);
            }
            if set.is_readable(fd) {
                self.recv(idx, sink);
            }
            idx += 1;
        }
        self.expire(now, sink);
        self.close_idle();
    }
}

impl Drop for UdpResolver {
    fn drop(&mut self) {
        if !self.queries.is_empty() {
            debug!(
                pending = self.queries.len(),
                "closing resolver with queries still pending"
            );
        }
    }
}

//============ Tests =========================================================
