use serde::Deserialize;
use serde::Serialize;
use std::error;
use std::fmt;

/// Categories of request failures.
///
/// Every in-flight failure surfaces as a single [`Error`] carrying one of
/// these kinds; partial results are never returned alongside it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An underlying server stream errored (all other streams are cancelled)
    StreamFailure,
    /// The message buffer could not be activated or shut down cleanly
    BufferFailure,
    /// A response message could not be placed into a correlated block
    CorrelationFailure,
    /// A response message carried neither a clock nor a timestamp list
    TimingMissing,
    /// Start-time ordering broken, or a disallowed time-domain collision
    RangeError,
    /// The same source name produced two different supported types
    TypeConflict,
    /// A column length did not match its timing key's sample count
    SizeMismatch,
    /// Configuration mutated during an in-flight request, or misuse of a
    /// component lifecycle (e.g. second activate())
    InvalidState,
    /// The caller cancelled the request
    Cancelled,
    /// The request deadline expired
    DeadlineExceeded,
}

impl ErrorKind {
    /// Sets a message on an error kind
    pub fn with_message(self, message: impl Into<String>) -> Error {
        Error {
            kind: self,
            message: message.into(),
        }
    }

    /// Constructs an error from an error kind and context
    pub fn with_context(self, context: impl fmt::Display) -> Error {
        let message = match self {
            ErrorKind::StreamFailure => format!("server stream failed; {context}"),
            ErrorKind::BufferFailure => format!("message buffer failure; {context}"),
            ErrorKind::CorrelationFailure => format!("cannot correlate message; {context}"),
            ErrorKind::RangeError => format!("time range violation; {context}"),
            ErrorKind::InvalidState => format!("invalid state; {context}"),
            _ => context.to_string(),
        };
        Error {
            kind: self,
            message,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::StreamFailure => "stream failure",
            ErrorKind::BufferFailure => "buffer failure",
            ErrorKind::CorrelationFailure => "correlation failure",
            ErrorKind::TimingMissing => "timing missing",
            ErrorKind::RangeError => "range error",
            ErrorKind::TypeConflict => "type conflict",
            ErrorKind::SizeMismatch => "size mismatch",
            ErrorKind::InvalidState => "invalid state",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::DeadlineExceeded => "deadline exceeded",
        };
        return write!(f, "{}", name);
    }
}

/// Error type returned by the engine
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    /// Returns the kind of an error
    pub const fn kind(&self) -> ErrorKind {
        return self.kind;
    }

    /// Returns the human-readable message of an error
    pub fn message(&self) -> &str {
        return &self.message;
    }
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            return write!(f, "{}", self.kind);
        }
        return write!(f, "{}: {}", self.kind, self.message);
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        return Error {
            kind,
            message: String::new(),
        };
    }
}

pub type Result<T> = std::result::Result<T, Error>;
