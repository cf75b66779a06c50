//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Tool-session failure (spawn, handshake, call, teardown).
    Tool(ToolError),
    /// Completion service transport or response failure.
    Completion(String),
    /// Document-text extraction failure.
    Extract(String),
    /// HTTP request decoding or server failure.
    Http(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Tool(err) => write!(f, "tool: {err}"),
            Self::Completion(msg) => write!(f, "completion: {msg}"),
            Self::Extract(msg) => write!(f, "extract: {msg}"),
            Self::Http(msg) => write!(f, "http: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Tool(err) => Some(err),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<ToolError> for AppError {
    fn from(err: ToolError) -> Self {
        Self::Tool(err)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Cause of a [`ToolError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolErrorKind {
    /// The tool process could not be started.
    ProcessStartFailed,
    /// The initialization exchange did not complete.
    HandshakeFailed,
    /// Stream read/write failure or unexpected close.
    TransportFailure,
    /// The tool process answered with something that is not a valid response.
    MalformedResponse,
    /// The tool ran and reported an application-level failure.
    ToolReportedFailure,
    /// The session manager has been closed.
    SessionClosed,
    /// No response arrived within the configured window.
    Timeout,
    /// The call was rejected before being written (bad name or arguments).
    InvalidCall,
}

impl ToolErrorKind {
    /// Stable kebab-case label used in logs and degraded context notes.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ProcessStartFailed => "process-start-failed",
            Self::HandshakeFailed => "handshake-failed",
            Self::TransportFailure => "transport-failure",
            Self::MalformedResponse => "malformed-response",
            Self::ToolReportedFailure => "tool-reported-failure",
            Self::SessionClosed => "session-closed",
            Self::Timeout => "timeout",
            Self::InvalidCall => "invalid-call",
        }
    }
}

impl Display for ToolErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure raised by the tool-session client.
///
/// Carries a [`ToolErrorKind`] for programmatic handling and a human-readable
/// message. Displays as `"<kind>: <message>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolError {
    kind: ToolErrorKind,
    message: String,
    connecting: bool,
}

impl ToolError {
    /// Build an error of the given kind.
    #[must_use]
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            connecting: false,
        }
    }

    /// Shorthand for [`ToolErrorKind::ProcessStartFailed`].
    #[must_use]
    pub fn process_start(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::ProcessStartFailed, message)
    }

    /// Shorthand for [`ToolErrorKind::HandshakeFailed`].
    #[must_use]
    pub fn handshake(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::HandshakeFailed, message)
    }

    /// Shorthand for [`ToolErrorKind::TransportFailure`].
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::TransportFailure, message)
    }

    /// Shorthand for [`ToolErrorKind::MalformedResponse`].
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::MalformedResponse, message)
    }

    /// Shorthand for [`ToolErrorKind::ToolReportedFailure`].
    #[must_use]
    pub fn tool_reported(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::ToolReportedFailure, message)
    }

    /// Shorthand for [`ToolErrorKind::SessionClosed`].
    #[must_use]
    pub fn session_closed() -> Self {
        Self::new(ToolErrorKind::SessionClosed, "session is closed")
    }

    /// Shorthand for [`ToolErrorKind::Timeout`].
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Timeout, message)
    }

    /// Shorthand for [`ToolErrorKind::InvalidCall`].
    #[must_use]
    pub fn invalid_call(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::InvalidCall, message)
    }

    /// Cause of the failure.
    #[must_use]
    pub fn kind(&self) -> ToolErrorKind {
        self.kind
    }

    /// Human-readable message without the kind prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the session was left unusable and must be rebuilt.
    ///
    /// True when the request/response pairing on the stream can no longer be
    /// trusted. A tool-reported failure or a rejected call leaves it in sync.
    #[must_use]
    pub fn invalidates_session(&self) -> bool {
        matches!(
            self.kind,
            ToolErrorKind::TransportFailure
                | ToolErrorKind::MalformedResponse
                | ToolErrorKind::Timeout
        )
    }

    /// Mark the error as raised while the session was being started.
    #[must_use]
    pub fn while_connecting(mut self) -> Self {
        self.connecting = true;
        self
    }

    /// Whether the error was raised while the session was being started.
    #[must_use]
    pub fn is_connect_failure(&self) -> bool {
        self.connecting
    }

    /// Whether a single retry against a fresh session may succeed.
    ///
    /// A session that could not be started is not retried right away, even
    /// when the cause was a broken stream.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !self.connecting && self.invalidates_session()
    }
}

impl Display for ToolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ToolError {}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        Self::transport(err.to_string())
    }
}
