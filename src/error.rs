use std::fmt;
use std::time::Duration;

/// Failure of a single JNAP exchange, classified at the transport boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Timeout,
    ConnectionRefused,
    HttpStatus(u16),
    MalformedBody(String),
    /// The request could not be built, e.g. an unusable host in the URL.
    InvalidRequest(String),
}

impl TransportError {
    /// Timeouts and connection failures are transient; everything else
    /// points at a protocol or configuration mismatch.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Timeout | TransportError::ConnectionRefused)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Timeout => write!(f, "request timed out"),
            TransportError::ConnectionRefused => write!(f, "connection refused"),
            TransportError::HttpStatus(code) => write!(f, "HTTP status {code}"),
            TransportError::MalformedBody(msg) => write!(f, "malformed body: {msg}"),
            TransportError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            TransportError::InvalidRequest(e.to_string())
        } else if e.is_timeout() {
            TransportError::Timeout
        } else if let Some(status) = e.status() {
            TransportError::HttpStatus(status.as_u16())
        } else if e.is_decode() {
            TransportError::MalformedBody(e.to_string())
        } else {
            TransportError::ConnectionRefused
        }
    }
}

/// Schema violation in a JNAP response envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError(pub String);

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parse error: {}", self.0)
    }
}

impl std::error::Error for ParseError {}

impl From<ParseError> for TransportError {
    fn from(e: ParseError) -> Self {
        TransportError::MalformedBody(e.0)
    }
}

/// Retry budget exhausted on transient failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GiveUpError {
    pub attempts: u32,
    pub last: TransportError,
    /// Backoff delays slept between attempts, in order.
    pub delays: Vec<Duration>,
}

impl fmt::Display for GiveUpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gave up after {} attempts: {}", self.attempts, self.last)
    }
}

impl std::error::Error for GiveUpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.last)
    }
}

#[derive(Debug)]
pub enum Error {
    Transport(TransportError),
    Parse(ParseError),
    GiveUp(GiveUpError),
    Config(String),
    Http(reqwest::Error),
    Io(std::io::Error),
    Cancelled,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Transport(e) => write!(f, "transport error: {e}"),
            Error::Parse(e) => write!(f, "{e}"),
            Error::GiveUp(e) => write!(f, "{e}"),
            Error::Config(msg) => write!(f, "invalid config: {msg}"),
            Error::Http(e) => write!(f, "HTTP client error: {e}"),
            Error::Io(e) => write!(f, "IO error: {e}"),
            Error::Cancelled => write!(f, "poller shut down"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Transport(e) => Some(e),
            Error::Parse(e) => Some(e),
            Error::GiveUp(e) => Some(e),
            Error::Http(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Error::Transport(e)
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::Parse(e)
    }
}

impl From<GiveUpError> for Error {
    fn from(e: GiveUpError) -> Self {
        Error::GiveUp(e)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(TransportError::Timeout.is_retryable());
        assert!(TransportError::ConnectionRefused.is_retryable());
        assert!(!TransportError::HttpStatus(404).is_retryable());
        assert!(!TransportError::HttpStatus(503).is_retryable());
        assert!(!TransportError::MalformedBody("x".into()).is_retryable());
        assert!(!TransportError::InvalidRequest("bad host".into()).is_retryable());
    }

    #[test]
    fn unbuildable_request_is_not_a_connection_failure() {
        let err = reqwest::Client::new()
            .post("http://bad host/JNAP/")
            .build()
            .unwrap_err();
        let err = TransportError::from(err);
        assert!(matches!(err, TransportError::InvalidRequest(_)), "{err:?}");
        assert!(!err.is_retryable());
    }

    #[test]
    fn parse_error_classifies_as_malformed_body() {
        let err: TransportError = ParseError("missing output.vars".into()).into();
        assert_eq!(err, TransportError::MalformedBody("missing output.vars".into()));
    }

    #[test]
    fn give_up_display_names_last_error() {
        let err = GiveUpError {
            attempts: 3,
            last: TransportError::Timeout,
            delays: vec![],
        };
        assert_eq!(err.to_string(), "gave up after 3 attempts: request timed out");
    }
}
