#![allow(dead_code)]

use dns_warm::resolver::{
    Completion, Interest, Outcome, QueryError, Resolver, Token, WaitSet,
};
use std::collections::{HashMap, VecDeque};
use std::net::{SocketAddr, UdpSocket};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

//------------ Behaviour -----------------------------------------------------

/// What a stub resolver does with the queries it gets.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Behaviour {
    /// Answers every query after the delay.
    Answer,

    /// Times out every query after the delay.
    TimeOut,

    /// Fails every query right inside `submit`.
    Reject,

    /// Completes every query twice after the delay.
    DoubleComplete,

    /// Forgets about every query without ever completing it.
    Forget,
}

//------------ StubResolver --------------------------------------------------

/// A resolver that doesn’t talk to anyone.
///
/// Queries finish in submission order once their delay has passed. The
/// stub watches an unused local socket so the driver has a real
/// descriptor to wait on.
pub struct StubResolver {
    behaviour: Behaviour,
    delay: Duration,
    sock: UdpSocket,
    pending: VecDeque<(Instant, Token)>,

    /// All names ever submitted.
    pub submitted: Vec<String>,

    /// How often each token was completed.
    pub completions: HashMap<Token, usize>,

    /// The largest number of queries pending at once.
    pub max_pending: usize,

    /// How often `process` was called.
    pub processed: usize,
}

impl StubResolver {
    pub fn new(behaviour: Behaviour, delay: Duration) -> Self {
        StubResolver {
            behaviour,
            delay,
            sock: UdpSocket::bind("127.0.0.1:0").unwrap(),
            pending: VecDeque::new(),
            submitted: Vec::new(),
            completions: HashMap::new(),
            max_pending: 0,
            processed: 0,
        }
    }

    /// Returns whether every submitted query was completed exactly once.
    pub fn completed_exactly_once(&self) -> bool {
        self.completions.len() == self.submitted.len()
            && self.completions.values().all(|&count| count == 1)
    }

    fn complete(&mut self, token: Token, sink: &mut dyn Completion) {
        let outcome = match self.behaviour {
            Behaviour::TimeOut => Outcome::TimedOut,
            Behaviour::Reject => Outcome::Errored(QueryError::BadName),
            _ => Outcome::Answered,
        };
        *self.completions.entry(token).or_default() += 1;
        sink.complete(token, outcome);
    }
}

impl Resolver for StubResolver {
    fn submit(&mut self, token: Token, qname: &str, sink: &mut dyn Completion) {
        self.submitted.push(qname.into());
        match self.behaviour {
            Behaviour::Reject => self.complete(token, sink),
            _ => {
                self.pending.push_back((Instant::now() + self.delay, token));
                self.max_pending = self.max_pending.max(self.pending.len());
            }
        }
    }

    fn wait_set(&self, set: &mut WaitSet) {
        if self.behaviour != Behaviour::Forget && !self.pending.is_empty() {
            set.watch(self.sock.as_raw_fd(), Interest::READABLE);
        }
    }

    fn timeout(&self, now: Instant) -> Option<Duration> {
        self.pending
            .front()
            .map(|(deadline, _)| deadline.saturating_duration_since(now))
    }

    fn process(
        &mut self,
        _set: &WaitSet,
        now: Instant,
        sink: &mut dyn Completion,
    ) {
        self.processed += 1;
        while let Some(&(deadline, token)) = self.pending.front() {
            if deadline > now {
                break;
            }
            self.pending.pop_front();
            self.complete(token, sink);
            if self.behaviour == Behaviour::DoubleComplete {
                self.complete(token, sink);
            }
        }
    }
}

//------------ Responder -----------------------------------------------------

/// How the responder answers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Reply {
    /// Echo the query back as a NOERROR answer.
    NoError,

    /// Echo the query back as an NXDOMAIN answer.
    NxDomain,

    /// Send an unrelated message first, then the answer.
    GarbageFirst,
}

/// A minimal DNS server on the loopback interface.
///
/// It turns every query it receives into an answer without any records by
/// setting the QR bit and sends it straight back.
pub struct Responder {
    addr: SocketAddr,
    received: Arc<AtomicUsize>,
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Responder {
    pub fn start(reply: Reply) -> Self {
        let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
        sock.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
        let addr = sock.local_addr().unwrap();
        let received = Arc::new(AtomicUsize::new(0));
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let received = received.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let mut buf = [0u8; 2048];
                while !stop.load(Ordering::Relaxed) {
                    let (len, peer) = match sock.recv_from(&mut buf) {
                        Ok(res) => res,
                        Err(_) => continue,
                    };
                    if len < 12 {
                        continue;
                    }
                    received.fetch_add(1, Ordering::Relaxed);
                    let mut msg = buf[..len].to_vec();
                    msg[2] |= 0x80;
                    if reply == Reply::NxDomain {
                        msg[3] = (msg[3] & 0xF0) | 3;
                    }
                    if reply == Reply::GarbageFirst {
                        let _ = sock.send_to(&[0xde, 0xad], peer);
                        let mut other = msg.clone();
                        other[0] ^= 0xff;
                        let _ = sock.send_to(&other, peer);
                    }
                    let _ = sock.send_to(&msg, peer);
                }
            })
        };
        Responder {
            addr,
            received,
            stop,
            handle: Some(handle),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn received(&self) -> usize {
        self.received.load(Ordering::Relaxed)
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

//------------ Helpers -------------------------------------------------------

/// Returns the address of a local UDP port nobody listens on.
pub fn closed_port() -> SocketAddr {
    let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
    sock.local_addr().unwrap()
}

/// Returns an input with `count` distinct names, one per line.
pub fn names(count: usize) -> String {
    (0..count).map(|i| format!("host{}.test\n", i)).collect()
}
