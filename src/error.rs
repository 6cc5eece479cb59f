//! Error types for pgconduit.
//!
//! Every error belongs to exactly one kind:
//!
//! - [`Error::Protocol`] — malformed frame or a response the current state
//!   cannot accept; always fatal to the connection
//! - [`Error::Server`] — an `ErrorResponse` from the backend
//! - [`Error::Auth`] — authentication failure or unsupported mechanism
//! - [`Error::Io`] / [`Error::Tls`] / [`Error::ConnectionBroken`] — transport
//! - [`Error::Parameter`] — a caller-supplied value the target type's codec
//!   cannot accept
//! - [`Error::State`] — operation issued in the wrong connection state
//!   (commands in a failed transaction block fail locally with this)
//! - [`Error::Copy`] — producer/receiver fault inside a COPY transfer
//! - [`Error::Decode`] — server bytes that do not fit the declared type

use thiserror::Error;

/// Result type for pgconduit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Fields of a PostgreSQL error or notice message, keyed by the protocol's
/// single-letter field codes.
#[derive(Debug, Clone, Default)]
pub struct ServerError {
    /// Severity (localized): ERROR, FATAL, PANIC, WARNING, NOTICE, ...
    pub severity: Option<String>,
    /// Severity (non-localized, PostgreSQL 9.6+)
    pub severity_non_localized: Option<String>,
    /// SQLSTATE code (5 characters)
    pub code: Option<String>,
    /// Primary error message
    pub message: Option<String>,
    /// Detailed error explanation
    pub detail: Option<String>,
    /// Suggestion for fixing the error
    pub hint: Option<String>,
    /// Cursor position in the query string (1-based)
    pub position: Option<u32>,
    /// Position in an internally-generated query
    pub internal_position: Option<u32>,
    /// Failed internal command text
    pub internal_query: Option<String>,
    /// Context / stack trace
    pub where_: Option<String>,
    /// Schema name
    pub schema: Option<String>,
    /// Table name
    pub table: Option<String>,
    /// Column name
    pub column: Option<String>,
    /// Data type name
    pub data_type: Option<String>,
    /// Constraint name
    pub constraint: Option<String>,
    /// Source file name
    pub file: Option<String>,
    /// Source line number
    pub line: Option<u32>,
    /// Source routine name
    pub routine: Option<String>,
}

impl ServerError {
    /// SQLSTATE code, empty string if absent.
    pub fn sqlstate(&self) -> &str {
        self.code.as_deref().unwrap_or_default()
    }

    /// Non-localized severity, falling back to the localized one.
    pub fn severity(&self) -> &str {
        self.severity_non_localized
            .as_deref()
            .or(self.severity.as_deref())
            .unwrap_or_default()
    }

    /// Primary message, empty string if absent.
    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or_default()
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} (SQLSTATE {})",
            self.severity(),
            self.message(),
            self.sqlstate()
        )?;
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {}", detail)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {}", hint)?;
        }
        Ok(())
    }
}

/// A fault raised by the copy manager, naming the offending party.
#[derive(Debug, Error)]
pub enum CopyFault {
    /// A receiver failed; it has been removed from the active set and may be
    /// readmitted with `CopyManager::reconcile`.
    #[error("copy receiver #{index} fault: {source}")]
    Receiver {
        /// Index of the receiver in the manager's receiver list
        index: usize,
        /// Underlying error
        source: Box<Error>,
    },

    /// The producer failed; no manager state was changed.
    #[error("copy producer fault: {source}")]
    Producer {
        /// Underlying error
        source: Box<Error>,
    },

    /// Abnormal exit of the manager; aggregates every exit-time error.
    #[error("copy aborted: {reason} ({} follow-up error(s))", .errors.len())]
    Aborted {
        /// Why the transfer was abandoned
        reason: String,
        /// Errors collected while failing the remaining parties
        errors: Vec<Error>,
    },
}

/// Error type for pgconduit.
#[derive(Debug, Error)]
pub enum Error {
    /// Server error response
    #[error("server error: {0}")]
    Server(Box<ServerError>),

    /// Protocol error (malformed frame, unexpected message, sequence
    /// mismatch). Fatal to the connection.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// I/O error from the transport
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Authentication failed or mechanism unsupported
    #[error("authentication failed: {0}")]
    Auth(String),

    /// TLS error
    #[cfg(feature = "tls")]
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    /// Connection is broken and cannot be reused
    #[error("connection is broken")]
    ConnectionBroken,

    /// Caller-supplied parameter the target type's codec cannot accept
    #[error("parameter {index} cannot encode as {type_name}: {reason}")]
    Parameter {
        /// Zero-based parameter index
        index: usize,
        /// Target PostgreSQL type name
        type_name: String,
        /// What went wrong
        reason: String,
    },

    /// Operation issued in the wrong connection state
    #[error("state error: {0}")]
    State(String),

    /// Producer or receiver fault in a COPY transfer
    #[error(transparent)]
    Copy(#[from] CopyFault),

    /// Server bytes that do not decode as the declared type
    #[error("decode error: {0}")]
    Decode(String),

    /// Invalid configuration or API usage
    #[error("invalid usage: {0}")]
    InvalidUsage(String),

    /// Feature the driver does not implement
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// State error raised locally when a command other than rollback is
    /// issued inside a failed transaction block. No bytes are sent.
    pub(crate) fn in_failed_block() -> Self {
        Error::State(
            "transaction block failed; only ROLLBACK or ROLLBACK TO SAVEPOINT is accepted".into(),
        )
    }

    /// Returns true if the error indicates the connection cannot be reused.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Error::Io(e) => !matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            ),
            Error::ConnectionBroken | Error::Protocol(_) => true,
            Error::Server(err) => matches!(err.severity(), "FATAL" | "PANIC"),
            _ => false,
        }
    }

    /// Returns true for a recoverable transport timeout: the connection is
    /// still usable because the protocol position is known.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::Io(e) if matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            )
        )
    }

    /// The SQLSTATE code if this is a server error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(err) => Some(err.sqlstate()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_display() {
        let err = ServerError {
            severity: Some("ERROR".into()),
            code: Some("22012".into()),
            message: Some("division by zero".into()),
            ..Default::default()
        };
        let s = err.to_string();
        assert!(s.contains("division by zero"));
        assert!(s.contains("22012"));
    }

    #[test]
    fn fatal_breaks_connection() {
        let err = Error::Server(Box::new(ServerError {
            severity_non_localized: Some("FATAL".into()),
            ..Default::default()
        }));
        assert!(err.is_connection_broken());

        let err = Error::Server(Box::new(ServerError {
            severity_non_localized: Some("ERROR".into()),
            ..Default::default()
        }));
        assert!(!err.is_connection_broken());
    }

    #[test]
    fn timeout_is_recoverable() {
        let err = Error::Io(std::io::Error::from(std::io::ErrorKind::TimedOut));
        assert!(err.is_timeout());
        assert!(!err.is_connection_broken());
    }
}
