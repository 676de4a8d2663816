//! Driving a resolver with a bounded number of queries in flight.
//!
//! A [`Warmer`] owns a [`Resolver`] and feeds it names. It keeps track of
//! how many queries are in flight and, once the configured ceiling is
//! reached, runs the event loop until a query has finished before it
//! submits the next one. After the last name, [`Warmer::drain`] runs the
//! loop until every query has finished.
//!
//! Everything happens on the calling thread. The only place that blocks is
//! the readiness wait inside [`Warmer::step`]. All completions are
//! delivered synchronously from within `step` or, for queries that fail
//! right away, from within `submit`.

use crate::conf::WarmConf;
use crate::error::{Error, Inconsistency};
use crate::poll::poll;
use crate::resolver::{Completion, Outcome, Resolver, Token, WaitSet};
use crate::udp::UdpResolver;
use std::collections::HashSet;
use std::io::{self, BufRead};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace};

//------------ Module Configuration ------------------------------------------

/// How long to wait if the resolver has descriptors but no deadline.
pub const MAX_IDLE_WAIT: Duration = Duration::from_secs(1);

//------------ InFlight ------------------------------------------------------

/// The queries currently in flight.
///
/// Only the number is of interest to the admission check. The tokens are
/// kept so that a query completing twice is caught at its second
/// completion instead of silently eating the slot of another query.
#[derive(Clone, Debug)]
pub struct InFlight {
    /// The tokens of all queries in flight.
    tokens: HashSet<Token>,

    /// The maximum number of queries in flight.
    ceiling: usize,

    /// Number of completions for tokens not in flight.
    extra: usize,
}

impl InFlight {
    /// Creates a new, empty value.
    pub fn new(ceiling: usize) -> Self {
        InFlight {
            tokens: HashSet::with_capacity(ceiling.min(usize::from(u16::MAX))),
            ceiling,
            extra: 0,
        }
    }

    /// Returns the number of queries in flight.
    pub fn count(&self) -> usize {
        self.tokens.len()
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Returns whether another query may be submitted.
    pub fn has_capacity(&self) -> bool {
        self.count() < self.ceiling
    }

    /// Returns the number of completions for queries not in flight.
    pub fn extra(&self) -> usize {
        self.extra
    }

    /// Takes a slot for `token`.
    fn acquire(&mut self, token: Token) {
        debug_assert!(self.has_capacity());
        self.tokens.insert(token);
    }

    /// Releases the slot of `token`.
    ///
    /// Returns `false` if `token` wasn’t in flight.
    fn release(&mut self, token: Token) -> bool {
        if self.tokens.remove(&token) {
            true
        } else {
            self.extra += 1;
            false
        }
    }
}

//------------ Stats ---------------------------------------------------------

/// Counters collected over a run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Stats {
    /// Number of names submitted.
    pub domains: usize,

    /// Number of submissions that had to wait for a free slot.
    pub throttled: usize,

    /// Number of times the loop waited for readiness.
    pub steps: usize,

    /// Highest number of queries in flight at once.
    pub max_in_flight: usize,

    /// Queries that received an answer.
    pub answered: usize,

    /// Queries that failed.
    pub errored: usize,

    /// Queries that timed out.
    pub timed_out: usize,
}

impl Stats {
    /// Returns the number of queries that have finished one way or another.
    pub fn completed(&self) -> usize {
        self.answered + self.errored + self.timed_out
    }
}

//------------ Step ----------------------------------------------------------

/// What a single loop iteration did.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Step {
    /// The resolver had nothing to wait on. Nothing happened.
    Idle,

    /// The loop waited and let the resolver do its work.
    Processed {
        /// Number of descriptors that became ready.
        ready: usize,
    },
}

//------------ Report --------------------------------------------------------

/// The result of a complete run.
#[derive(Clone, Copy, Debug)]
pub struct Report {
    /// Number of names submitted.
    pub domains: usize,

    /// Time from start to the end of the drain.
    pub duration: Duration,

    /// All counters.
    pub stats: Stats,
}

//------------ Warmer --------------------------------------------------------

/// Submits queries to a resolver, keeping their number bounded.
pub struct Warmer<R> {
    /// The resolver doing the actual work.
    resolver: R,

    /// The queries in flight.
    in_flight: InFlight,

    /// Counters.
    stats: Stats,

    /// The token for the next query.
    next_token: Token,

    /// The wait set, kept around to reuse its allocation.
    set: WaitSet,
}

impl Warmer<UdpResolver> {
    /// Creates a warmer using a UDP resolver for the given configuration.
    pub fn from_conf(conf: WarmConf) -> Result<Self, Error> {
        let ceiling = conf.ceiling();
        let resolver = UdpResolver::new(conf.udp).map_err(Error::Init)?;
        Ok(Warmer::new(resolver, ceiling))
    }
}

impl<R: Resolver> Warmer<R> {
    /// Creates a new warmer for `resolver`.
    ///
    /// At most `ceiling` queries will be in flight at any time. A ceiling
    /// of zero is raised to one.
    pub fn new(resolver: R, ceiling: usize) -> Self {
        Warmer {
            resolver,
            in_flight: InFlight::new(ceiling.max(1)),
            stats: Stats::default(),
            next_token: Token::new(0),
            set: WaitSet::new(),
        }
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Trades the warmer for its resolver.
    pub fn into_resolver(self) -> R {
        self.resolver
    }

    /// Submits a query for `qname`.
    ///
    /// If the ceiling has been reached, runs the loop until a slot frees
    /// up first. This may block for as long as it takes the resolver to
    /// finish a query.
    ///
    /// Errors of the query itself are never returned. An error means the
    /// loop cannot continue.
    pub fn submit(&mut self, qname: &str) -> Result<(), Error> {
        if !self.in_flight.has_capacity() {
            self.stats.throttled += 1;
            while !self.in_flight.has_capacity() {
                if self.step()? == Step::Idle {
                    return Err(self.lost_completion());
                }
            }
        }

        let token = self.next_token;
        self.next_token = token.next();
        self.in_flight.acquire(token);
        self.stats.domains += 1;
        self.stats.max_in_flight =
            self.stats.max_in_flight.max(self.in_flight.count());
        trace!(%token, qname, "submitting");
        let mut sink = Sink {
            in_flight: &mut self.in_flight,
            stats: &mut self.stats,
        };
        self.resolver.submit(token, qname, &mut sink);
        Ok(())
    }

    /// Runs a single iteration of the loop.
    ///
    /// If the resolver has nothing to wait on, returns [`Step::Idle`]
    /// right away. Otherwise waits for readiness for at most as long as
    /// the resolver asks for and hands control back to the resolver which
    /// may complete any number of queries.
    pub fn step(&mut self) -> Result<Step, Error> {
        self.set.clear();
        self.resolver.wait_set(&mut self.set);
        if self.set.is_empty() {
            return Ok(Step::Idle);
        }

        let timeout = self
            .resolver
            .timeout(Instant::now())
            .unwrap_or(MAX_IDLE_WAIT);
        let ready = match poll(&mut self.set, timeout) {
            Ok(ready) => ready,
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => 0,
            Err(err) => return Err(Error::Poll(err)),
        };
        self.stats.steps += 1;

        let mut sink = Sink {
            in_flight: &mut self.in_flight,
            stats: &mut self.stats,
        };
        self.resolver.process(&self.set, Instant::now(), &mut sink);
        Ok(Step::Processed { ready })
    }

    /// Runs the loop until all queries have finished.
    ///
    /// Fails if the resolver runs out of work while queries are still
    /// counted as in flight or if any query completed more than once.
    pub fn drain(&mut self) -> Result<(), Error> {
        while self.in_flight.count() > 0 {
            if self.step()? == Step::Idle {
                return Err(self.lost_completion());
            }
        }
        match self.in_flight.extra() {
            0 => Ok(()),
            extra => {
                Err(Inconsistency::DoubleCompletion { extra }.into())
            }
        }
    }

    /// Submits every non-empty line of `input` and drains.
    ///
    /// Lines are split at `\n`. A trailing `\r` is removed, nothing
    /// else. Whatever remains is handed to the resolver as is.
    pub fn run<B: BufRead>(&mut self, mut input: B) -> Result<Report, Error> {
        let start = Instant::now();
        let mut line = Vec::new();
        loop {
            line.clear();
            if input.read_until(b'\n', &mut line).map_err(Error::Input)? == 0
            {
                break;
            }
            if line.last() == Some(&b'\n') {
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
            }
            if line.is_empty() {
                continue;
            }
            self.submit(&String::from_utf8_lossy(&line))?;
        }
        self.drain()?;
        let duration = start.elapsed();
        debug!(
            domains = self.stats.domains,
            answered = self.stats.answered,
            errored = self.stats.errored,
            timed_out = self.stats.timed_out,
            throttled = self.stats.throttled,
            steps = self.stats.steps,
            ?duration,
            "run complete"
        );
        Ok(Report {
            domains: self.stats.domains,
            duration,
            stats: self.stats,
        })
    }

    fn lost_completion(&self) -> Error {
        let in_flight = self.in_flight.count();
        error!(in_flight, "resolver is idle but queries are in flight");
        Inconsistency::LostCompletion { in_flight }.into()
    }
}

//------------ Sink ----------------------------------------------------------

/// The completion handed to the resolver.
struct Sink<'a> {
    in_flight: &'a mut InFlight,
    stats: &'a mut Stats,
}

impl Completion for Sink<'_> {
    fn complete(&mut self, token: Token, outcome: Outcome) {
        match outcome {
            Outcome::Answered => self.stats.answered += 1,
            Outcome::Errored(err) => {
                trace!(%token, %err, "query failed");
                self.stats.errored += 1
            }
            Outcome::TimedOut => self.stats.timed_out += 1,
        }
        if !self.in_flight.release(token) {
            error!(%token, "completion for a query not in flight");
        }
    }
}

//============ Tests =========================================================
