//! Error taxonomy shared by the tunnel, the pools, the cache and the tools.
//!
//! Every variant carries owned strings so an [`Error`] can be cloned: a single
//! tunnel setup outcome is handed to every caller waiting on it.

use std::fmt;
use std::io;

use thiserror::Error;

/// Crate result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Closed set of connection failures that are worth exactly one
/// re-establish-and-retry cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransientKind {
    ConnectionReset,
    ConnectionRefused,
    /// The server or the forwarded path went away mid-session.
    ConnectionLost,
    BrokenPipe,
}

impl TransientKind {
    /// Classify an I/O error by kind. Returns `None` for anything that is not
    /// a transport-level connection failure.
    pub fn from_io(err: &io::Error) -> Option<Self> {
        match err.kind() {
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                Some(Self::ConnectionReset)
            }
            io::ErrorKind::ConnectionRefused => Some(Self::ConnectionRefused),
            io::ErrorKind::BrokenPipe => Some(Self::BrokenPipe),
            io::ErrorKind::UnexpectedEof | io::ErrorKind::NotConnected => {
                Some(Self::ConnectionLost)
            }
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionReset => "connection_reset",
            Self::ConnectionRefused => "connection_refused",
            Self::ConnectionLost => "connection_lost",
            Self::BrokenPipe => "broken_pipe",
        }
    }
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error enum.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Required credentials for a target are absent. Never retried.
    #[error("{target} is not configured (missing {missing})")]
    ConfigurationMissing { target: String, missing: String },

    /// Handshake, authentication, forwarding or pool construction failed
    /// while establishing a tunnel.
    #[error("tunnel setup for {target} failed: {message}")]
    Setup { target: String, message: String },

    /// Recoverable transport failure (reset, refused, lost, broken pipe).
    #[error("connection error ({kind}): {message}")]
    Transient { kind: TransientKind, message: String },

    /// Application-level database failure (bad SQL, constraint, timeout).
    #[error("query failed: {0}")]
    Query(String),

    /// Tool arguments failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An outbound HTTP API (completion, email) failed.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// The owning context was shut down while the operation was pending.
    #[error("shut down: {0}")]
    Shutdown(String),
}

impl Error {
    pub fn configuration_missing(target: impl Into<String>, missing: impl Into<String>) -> Self {
        Self::ConfigurationMissing {
            target: target.into(),
            missing: missing.into(),
        }
    }

    pub fn setup(target: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Setup {
            target: target.into(),
            message: message.to_string(),
        }
    }

    pub fn transient(kind: TransientKind, message: impl fmt::Display) -> Self {
        Self::Transient {
            kind,
            message: message.to_string(),
        }
    }

    pub fn query(message: impl fmt::Display) -> Self {
        Self::Query(message.to_string())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn upstream(message: impl fmt::Display) -> Self {
        Self::Upstream(message.to_string())
    }

    /// The transient classification, if this error is one.
    pub fn transient_kind(&self) -> Option<TransientKind> {
        match self {
            Self::Transient { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(io_err) => match TransientKind::from_io(io_err) {
                Some(kind) => Self::transient(kind, &err),
                None => Self::query(&err),
            },
            sqlx::Error::PoolClosed => Self::transient(TransientKind::ConnectionLost, &err),
            _ => Self::query(&err),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::upstream(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_kinds_map_to_transient_set() {
        let cases = [
            (io::ErrorKind::ConnectionReset, Some(TransientKind::ConnectionReset)),
            (io::ErrorKind::ConnectionAborted, Some(TransientKind::ConnectionReset)),
            (io::ErrorKind::ConnectionRefused, Some(TransientKind::ConnectionRefused)),
            (io::ErrorKind::BrokenPipe, Some(TransientKind::BrokenPipe)),
            (io::ErrorKind::UnexpectedEof, Some(TransientKind::ConnectionLost)),
            (io::ErrorKind::TimedOut, None),
            (io::ErrorKind::PermissionDenied, None),
        ];
        for (kind, expected) in cases {
            assert_eq!(TransientKind::from_io(&io::Error::from(kind)), expected, "{kind:?}");
        }
    }

    #[test]
    fn sqlx_io_reset_is_transient() {
        let err: Error = sqlx::Error::Io(io::Error::from(io::ErrorKind::ConnectionReset)).into();
        assert_eq!(err.transient_kind(), Some(TransientKind::ConnectionReset));
    }

    #[test]
    fn sqlx_pool_closed_is_connection_lost() {
        let err: Error = sqlx::Error::PoolClosed.into();
        assert_eq!(err.transient_kind(), Some(TransientKind::ConnectionLost));
    }

    #[test]
    fn sqlx_other_errors_are_query_errors() {
        let err: Error = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, Error::Query(_)));
        let err: Error = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, Error::Query(_)));
    }

    #[test]
    fn configuration_missing_message_names_fields() {
        let err = Error::configuration_missing("tarms", "db_password");
        assert_eq!(err.to_string(), "tarms is not configured (missing db_password)");
    }
}
