//! Error codes passed through the stream and operation layers
//!
//! Transport failures are opaque to the runtime: an `ErrorCode` carries a
//! category, a numeric value, and a free-form message, and is handed to the
//! user unchanged.

use std::fmt;
use std::io;

/// Generic failure kinds for errors that did not come from the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Errc {
    InvalidArgument = 1,
    Timeout = 2,
    Canceled = 3,
    Resource = 4,
    Runtime = 5,
    /// Peer closed the stream.
    Eof = 6,
}

impl Errc {
    pub fn as_str(&self) -> &'static str {
        match self {
            Errc::InvalidArgument => "invalid argument",
            Errc::Timeout => "timeout",
            Errc::Canceled => "canceled",
            Errc::Resource => "resource error",
            Errc::Runtime => "runtime error",
            Errc::Eof => "end of stream",
        }
    }

    fn from_value(v: i32) -> Option<Self> {
        match v {
            1 => Some(Errc::InvalidArgument),
            2 => Some(Errc::Timeout),
            3 => Some(Errc::Canceled),
            4 => Some(Errc::Resource),
            5 => Some(Errc::Runtime),
            6 => Some(Errc::Eof),
            _ => None,
        }
    }
}

/// Where an `ErrorCode` value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// `Errc` values.
    Generic,
    /// Raw OS errno.
    Os,
    /// Transport-defined values, named by the transport.
    Custom(&'static str),
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Generic => f.write_str("spindle"),
            Category::Os => f.write_str("os"),
            Category::Custom(name) => f.write_str(name),
        }
    }
}

/// Opaque error value: category + code + message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorCode {
    category: Category,
    value: i32,
    message: String,
}

impl ErrorCode {
    pub fn new(category: Category, value: i32, message: impl Into<String>) -> Self {
        Self {
            category,
            value,
            message: message.into(),
        }
    }

    /// A generic error with an explanatory message.
    pub fn generic(kind: Errc, message: impl Into<String>) -> Self {
        Self::new(Category::Generic, kind as i32, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::generic(Errc::InvalidArgument, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::generic(Errc::Timeout, message)
    }

    pub fn canceled(message: impl Into<String>) -> Self {
        Self::generic(Errc::Canceled, message)
    }

    pub fn resource(message: impl Into<String>) -> Self {
        Self::generic(Errc::Resource, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::generic(Errc::Runtime, message)
    }

    pub fn eof() -> Self {
        Self::generic(Errc::Eof, "")
    }

    /// Error from a raw errno value.
    pub fn from_errno(errno: i32) -> Self {
        Self::new(
            Category::Os,
            errno,
            io::Error::from_raw_os_error(errno).to_string(),
        )
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn value(&self) -> i32 {
        self.value
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The generic kind, when the category is `Generic`.
    pub fn kind(&self) -> Option<Errc> {
        match self.category {
            Category::Generic => Errc::from_value(self.value),
            _ => None,
        }
    }

    pub fn is_eof(&self) -> bool {
        self.kind() == Some(Errc::Eof)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            Some(kind) => write!(f, "{}: {}", self.category, kind.as_str())?,
            None => write!(f, "{}: error {}", self.category, self.value)?,
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorCode {}

impl From<io::Error> for ErrorCode {
    fn from(e: io::Error) -> Self {
        match (e.raw_os_error(), e.kind()) {
            (Some(errno), _) => Self::from_errno(errno),
            (None, io::ErrorKind::UnexpectedEof) => Self::eof(),
            (None, io::ErrorKind::TimedOut) => Self::timeout(e.to_string()),
            (None, io::ErrorKind::InvalidInput) => Self::invalid_argument(e.to_string()),
            (None, _) => Self::runtime(e.to_string()),
        }
    }
}

#[cfg(unix)]
impl From<nix::errno::Errno> for ErrorCode {
    fn from(e: nix::errno::Errno) -> Self {
        Self::from_errno(e as i32)
    }
}

impl From<Errc> for ErrorCode {
    fn from(kind: Errc) -> Self {
        Self::generic(kind, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_display() {
        let e = ErrorCode::timeout("connect took too long");
        assert_eq!(e.to_string(), "spindle: timeout: connect took too long");
        assert_eq!(e.kind(), Some(Errc::Timeout));

        assert_eq!(ErrorCode::eof().to_string(), "spindle: end of stream");
        assert!(ErrorCode::eof().is_eof());
    }

    #[test]
    fn test_custom_category_display() {
        let e = ErrorCode::new(Category::Custom("can"), 17, "bus off");
        assert_eq!(e.to_string(), "can: error 17: bus off");
        assert_eq!(e.kind(), None);
    }

    #[test]
    fn test_from_io_error() {
        let e: ErrorCode = io::Error::new(io::ErrorKind::UnexpectedEof, "gone").into();
        assert!(e.is_eof());
    }

    #[cfg(unix)]
    #[test]
    fn test_from_errno() {
        let e: ErrorCode = nix::errno::Errno::EPIPE.into();
        assert_eq!(e.category(), Category::Os);
        assert_eq!(e.value(), nix::errno::Errno::EPIPE as i32);
        assert!(!e.message().is_empty());

        let io_err = std::io::Error::from_raw_os_error(nix::errno::Errno::ECONNRESET as i32);
        let e: ErrorCode = io_err.into();
        assert_eq!(e, ErrorCode::from(nix::errno::Errno::ECONNRESET));
    }
}
