use std::fmt;

/// Error taxonomy per §7. `NotFound` is kept for callers that still want an
/// `Error` value, but most "not found" cases in this crate are modeled as
/// `Result<Option<T>>` instead, per §7.4 ("a normal result, not an error").
#[derive(Debug)]
pub enum ErrorKind {
    /// Unrecoverable file access failure. Propagate; abort current merge/query.
    Io,
    /// On-disk invariant violated: non-monotone ids, bad footer length,
    /// checksum mismatch. Fatal; the affected barrel is quarantined.
    Corruption,
    /// A term id exceeds its generator's bound.
    OutOfBounds,
    /// A term, doc, or key is absent.
    NotFound,
    /// A merge is in progress and the caller requested an incompatible
    /// operation. Retry-able.
    Busy,
    /// Invalid configuration at open time. Fatal at open, never mid-run.
    Config,
    /// Assertion-like internal failure (e.g. a skip entry pointing past the
    /// end of its stream).
    Internal,
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub context: String,
}

impl Error {
    pub fn new(kind: ErrorKind, context: impl Into<String>) -> Self {
        Error {
            kind,
            context: context.into(),
        }
    }

    pub fn corruption(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::Corruption, context)
    }

    pub fn busy(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::Busy, context)
    }

    pub fn config(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::Config, context)
    }

    pub fn out_of_bounds(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::OutOfBounds, context)
    }

    pub fn internal(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::Internal, context)
    }

    pub fn not_found(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::NotFound, context)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.context)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error {
            kind: ErrorKind::Io,
            context: err.to_string(),
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error {
            kind: ErrorKind::Corruption,
            context: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
