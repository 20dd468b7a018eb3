use std::fmt;

/// The exhaustive set of failure kinds surfaced by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Expression or schema text is ill-formed.
    Parse,
    /// A row does not match the layout it claims to inhabit.
    TypeClash,
    /// An on-disk file failed its framing or version check.
    Format,
    /// I/O failure reading or writing engine state.
    Filesystem,
    /// A data conversion failed during ingest or evaluation.
    Convert,
    /// A required option is missing or ill-typed.
    InvalidConfiguration,
    /// Schema include depth exceeded.
    RecursionLimitReached,
    /// A query exceeded its client-set deadline.
    DeadlineExceeded,
    /// An internal invariant was violated.
    Internal,
}

#[derive(Debug, Clone)]
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
            kind: ErrorKind::Filesystem,
            context: err.to_string(),
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error {
            kind: ErrorKind::Format,
            context: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
