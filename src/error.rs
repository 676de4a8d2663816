//! Errors that end a warm-up run.
//!
//! Failures of individual queries never show up here. They are counted
//! and otherwise dropped when the query completes, see
//! [`QueryError`][crate::resolver::QueryError].

use std::path::PathBuf;
use std::{error, fmt, io};

//------------ Error ---------------------------------------------------------

/// A fatal error.
#[derive(Debug)]
pub enum Error {
    /// The command line was wrong.
    Usage(String),

    /// The input file could not be opened.
    Open { path: PathBuf, source: io::Error },

    /// The resolver could not be set up.
    Init(io::Error),

    /// Reading the input failed half-way.
    Input(io::Error),

    /// Waiting for readiness failed.
    Poll(io::Error),

    /// The in-flight book-keeping doesn’t add up.
    Inconsistent(Inconsistency),
}

impl Error {
    /// Returns whether the error happened before any work was done.
    pub fn is_startup(&self) -> bool {
        matches!(self, Error::Usage(_) | Error::Open { .. } | Error::Init(_))
    }
}

impl From<Inconsistency> for Error {
    fn from(err: Inconsistency) -> Self {
        Error::Inconsistent(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Usage(usage) => write!(f, "usage: {}", usage),
            Error::Open { path, source } => {
                write!(f, "cannot open {}: {}", path.display(), source)
            }
            Error::Init(err) => {
                write!(f, "cannot initialize resolver: {}", err)
            }
            Error::Input(err) => write!(f, "error reading input: {}", err),
            Error::Poll(err) => {
                write!(f, "error waiting for readiness: {}", err)
            }
            Error::Inconsistent(err) => {
                write!(f, "loop inconsistency: {}", err)
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Usage(_) => None,
            Error::Open { source, .. } => Some(source),
            Error::Init(err) | Error::Input(err) | Error::Poll(err) => {
                Some(err)
            }
            Error::Inconsistent(err) => Some(err),
        }
    }
}

//------------ Inconsistency -------------------------------------------------

/// The resolver and the in-flight counter disagree.
///
/// Which side is wrong cannot be told from the outside: a lost completion
/// may as well be a query that was counted twice.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Inconsistency {
    /// The resolver has nothing left to wait on while queries are still
    /// counted as in flight.
    LostCompletion { in_flight: usize },

    /// Completions arrived for queries that were not in flight.
    DoubleCompletion { extra: usize },
}

impl fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Inconsistency::LostCompletion { in_flight } => write!(
                f,
                "resolver is idle with {} queries in flight",
                in_flight
            ),
            Inconsistency::DoubleCompletion { extra } => write!(
                f,
                "{} completions for queries not in flight",
                extra
            ),
        }
    }
}

impl error::Error for Inconsistency {}
