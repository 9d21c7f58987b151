//! Error types for the edclient protocol engine
//!
//! Transport failures are recoverable: the connection strategy moves on to the
//! next candidate or escalates to a daemon launch. Everything else in
//! [`ClientError`] ends the session with exit status 1.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Exit status for a successful session
pub const EXIT_SUCCESS: i32 = 0;

/// Exit status for any local, transport or server-reported failure
pub const EXIT_FAILURE: i32 = 1;

/// Reasons a single transport attempt can fail
#[derive(Debug, Error)]
pub enum TransportError {
    /// Endpoint exists but refused the connection
    #[error("connect: {source}")]
    Refused {
        #[source]
        source: io::Error,
    },

    /// No endpoint at the expected location
    #[error("can't find socket; have you started the server?\nTo start the server in Emacs, type \"M-x server-start\".")]
    Unreachable,

    /// Endpoint could not be inspected for a reason other than absence
    #[error("can't stat {path}: {source}")]
    Inaccessible {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Endpoint is owned by another user
    #[error("Invalid socket owner")]
    AuthRejected,

    /// Socket path does not fit in `sockaddr_un`
    #[error("socket-name {} too long", .0.display())]
    NameTooLong(PathBuf),
}

impl TransportError {
    /// True when nothing is listening at the location, as opposed to an
    /// endpoint that exists but cannot be trusted or reached
    pub fn is_absent(&self) -> bool {
        matches!(self, TransportError::Unreachable)
    }
}

/// Errors that end a client session
#[derive(Debug, Error)]
pub enum ClientError {
    /// A transport could not be opened and no fallback applies
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The explicitly configured socket could not be used
    #[error("error accessing socket \"{}\"", .0.display())]
    SocketAccess(PathBuf),

    /// The explicitly configured server file could not be used
    #[error("error accessing server file \"{}\"", .0.display())]
    ServerFileAccess(PathBuf),

    /// Nothing configured and nothing found
    #[error("No socket or alternate editor.  Please use:\n\n\t--socket-name\n\t--server-file      (or environment variable EMACS_SERVER_FILE)\n\t--alternate-editor (or environment variable ALTERNATE_EDITOR)")]
    NoTransport,

    /// Malformed authentication file or similar unrecoverable protocol input
    #[error("{0}")]
    ProtocolViolation(String),

    /// The daemon launcher failed to bring a server up
    #[error("Error: Could not start the Emacs daemon")]
    DaemonLaunch(#[source] io::Error),

    /// Launch succeeded but the retry pass found no server
    #[error("Error: Cannot connect even after starting the Emacs daemon")]
    DaemonUnreachable,

    /// The working directory could not be determined
    #[error("Cannot get current working directory")]
    WorkingDirectory(#[source] io::Error),

    /// Terminal information required for a tty frame is missing
    #[error("{0}")]
    Terminal(String),

    /// The alternate editor could not be executed
    #[error("error executing alternate editor \"{editor}\"")]
    AlternateEditor {
        editor: String,
        #[source]
        source: io::Error,
    },

    /// No response within the configured read timeout
    #[error("timed out waiting for the server")]
    Timeout,

    /// I/O failure on an established connection
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },
}

impl ClientError {
    /// Wrap an I/O error with a short description of the failed operation
    pub fn io(context: &'static str, source: io::Error) -> Self {
        ClientError::Io { context, source }
    }

    /// Exit status reported by the process for this error
    pub fn exit_code(&self) -> i32 {
        EXIT_FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_is_absent() {
        assert!(TransportError::Unreachable.is_absent());
        assert!(!TransportError::AuthRejected.is_absent());
        assert!(!TransportError::NameTooLong(PathBuf::from("/x")).is_absent());
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::AuthRejected;
        assert_eq!(err.to_string(), "Invalid socket owner");

        let err = TransportError::NameTooLong(PathBuf::from("/tmp/very/long"));
        assert!(err.to_string().contains("/tmp/very/long"));
        assert!(err.to_string().contains("too long"));
    }

    #[test]
    fn test_client_error_wraps_transport() {
        let err: ClientError = TransportError::Unreachable.into();
        assert!(err.to_string().contains("have you started the server?"));
        assert_eq!(err.exit_code(), EXIT_FAILURE);
    }

    #[test]
    fn test_io_error_context() {
        let err = ClientError::io(
            "failed to send",
            io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"),
        );
        let text = err.to_string();
        assert!(text.starts_with("failed to send"));
        assert!(text.contains("broken pipe"));
    }

    #[test]
    fn test_no_transport_mentions_options() {
        let text = ClientError::NoTransport.to_string();
        assert!(text.contains("--socket-name"));
        assert!(text.contains("ALTERNATE_EDITOR"));
    }
}
