//! Error types for the diagnostics tool.
//!
//! Measurement components recover from network failures locally, so the
//! errors in this module are reserved for faults that abort a whole run:
//! bad configuration, an HTTP client that cannot be built, or a response
//! whose structure was mandatory and could not be decoded.

use std::error::Error;
use std::fmt;

/// Exit codes for the application.
pub mod exit_codes {
    /// Successful execution.
    pub const SUCCESS: i32 = 0;
    /// Network error (connection failed, timeout, etc.).
    pub const NETWORK_ERROR: i32 = 1;
    /// A destination answered with an unusable response.
    pub const HTTP_ERROR: i32 = 2;
    /// Configuration error (invalid arguments, unreadable config file).
    pub const CONFIG_ERROR: i32 = 3;
    /// Unknown/unexpected error.
    pub const UNKNOWN_ERROR: i32 = 99;
}

/// Categories of errors that can occur during a diagnostics run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network connectivity issues.
    Network,
    /// DNS resolution failures.
    Dns,
    /// Connection timeout.
    Timeout,
    /// TLS/SSL handshake failures.
    Tls,
    /// A response was received but could not be used.
    Http,
    /// Invalid configuration or arguments.
    Config,
    /// Unknown or unexpected errors.
    Unknown,
}

impl ErrorKind {
    /// Get the exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::Network
            | ErrorKind::Dns
            | ErrorKind::Timeout
            | ErrorKind::Tls => exit_codes::NETWORK_ERROR,
            ErrorKind::Http => exit_codes::HTTP_ERROR,
            ErrorKind::Config => exit_codes::CONFIG_ERROR,
            ErrorKind::Unknown => exit_codes::UNKNOWN_ERROR,
        }
    }

    /// Get a user-friendly description of this error kind.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorKind::Network => "Network error",
            ErrorKind::Dns => "DNS resolution error",
            ErrorKind::Timeout => "Connection timeout",
            ErrorKind::Tls => "TLS/SSL error",
            ErrorKind::Http => "HTTP error",
            ErrorKind::Config => "Configuration error",
            ErrorKind::Unknown => "Unknown error",
        }
    }

    fn default_suggestion(&self) -> Option<&'static str> {
        match self {
            ErrorKind::Network => {
                Some("Check your internet connection and try again.")
            }
            ErrorKind::Dns => Some(
                "Check your DNS settings or try using a different DNS server.",
            ),
            ErrorKind::Timeout => Some(
                "The server may be slow or unreachable. Try again later.",
            ),
            ErrorKind::Tls => Some(
                "There may be a certificate issue. Check your system time.",
            ),
            ErrorKind::Http => Some(
                "The destination may be blocked or rate limiting requests.",
            ),
            _ => None,
        }
    }
}

/// A user-friendly error type for diagnostics operations.
#[derive(Debug)]
pub struct DiagnosticError {
    /// The kind of error.
    pub kind: ErrorKind,
    /// User-friendly error message.
    pub message: String,
    /// Optional suggestion for how to resolve the error.
    pub suggestion: Option<String>,
    /// The underlying error, if any.
    pub source: Option<Box<dyn Error + Send + Sync>>,
}

impl DiagnosticError {
    /// Create a new DiagnosticError.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), suggestion: None, source: None }
    }

    /// Add a suggestion for how to resolve the error.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add the underlying error source.
    pub fn with_source(
        mut self,
        source: impl Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Get the exit code for this error.
    pub fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
            .with_suggestion("Check your internet connection and try again.")
    }

    /// Create a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message).with_suggestion(
            "The server may be slow or unreachable. Try again later.",
        )
    }

    /// Create an HTTP error.
    pub fn http(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Http, message).with_suggestion(
            "The destination may be blocked or rate limiting requests.",
        )
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }
}

impl fmt::Display for DiagnosticError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.description(), self.message)?;

        if let Some(ref suggestion) = self.suggestion {
            write!(f, "\n  Suggestion: {}", suggestion)?;
        }

        Ok(())
    }
}

impl Error for DiagnosticError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn Error + 'static))
    }
}

impl From<reqwest::Error> for DiagnosticError {
    fn from(error: reqwest::Error) -> Self {
        let kind = if error.is_timeout() {
            ErrorKind::Timeout
        } else if error.is_decode() {
            ErrorKind::Http
        } else if error.is_status() {
            ErrorKind::Http
        } else {
            classify_error(&error)
        };

        let mut diagnostic = DiagnosticError::new(kind, error.to_string());
        if let Some(suggestion) = kind.default_suggestion() {
            diagnostic = diagnostic.with_suggestion(suggestion);
        }
        diagnostic.with_source(error)
    }
}

impl From<serde_json::Error> for DiagnosticError {
    fn from(error: serde_json::Error) -> Self {
        DiagnosticError::http(format!("malformed JSON response: {}", error))
            .with_source(error)
    }
}

/// Classify an error into an ErrorKind based on its message.
///
/// reqwest folds resolver, socket and TLS failures into one opaque error,
/// so the message text is the only place the distinction survives.
pub fn classify_error(error: &dyn Error) -> ErrorKind {
    let mut error_str = error.to_string().to_lowercase();
    let mut source = error.source();
    while let Some(inner) = source {
        error_str.push_str(": ");
        error_str.push_str(&inner.to_string().to_lowercase());
        source = inner.source();
    }

    if error_str.contains("dns")
        || error_str.contains("resolve")
        || error_str.contains("no such host")
        || error_str.contains("failed to lookup")
    {
        return ErrorKind::Dns;
    }

    if error_str.contains("timeout")
        || error_str.contains("timed out")
        || error_str.contains("deadline")
    {
        return ErrorKind::Timeout;
    }

    if error_str.contains("tls")
        || error_str.contains("ssl")
        || error_str.contains("certificate")
        || error_str.contains("handshake")
    {
        return ErrorKind::Tls;
    }

    if error_str.contains("connection refused")
        || error_str.contains("connection reset")
        || error_str.contains("connection closed")
        || error_str.contains("network unreachable")
        || error_str.contains("host unreachable")
        || error_str.contains("no route")
        || error_str.contains("broken pipe")
        || error_str.contains("error sending request")
    {
        return ErrorKind::Network;
    }

    if error_str.contains("status: 4") || error_str.contains("status: 5") {
        return ErrorKind::Http;
    }

    ErrorKind::Unknown
}

/// One-line description of an error.
///
/// Network-class failures collapse into a single "check your connection"
/// message; anything else is shown with its own text.
pub fn error_headline(error: &DiagnosticError) -> String {
    match error.kind {
        ErrorKind::Network
        | ErrorKind::Dns
        | ErrorKind::Timeout
        | ErrorKind::Tls => format!(
            "test failed, check your connection ({})",
            error.message
        ),
        _ => error.message.clone(),
    }
}

/// Format an error for user display.
pub fn format_error_for_display(error: &DiagnosticError) -> String {
    let mut output = format!("Error: {}", error_headline(error));

    if let Some(ref suggestion) = error.suggestion {
        output.push_str(&format!("\n\nSuggestion: {}", suggestion));
    }

    output
}
