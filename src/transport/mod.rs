//! Transport descriptors and the locator that produces them
//!
//! A [`Candidate`] names where a server might be listening (a socket name or a
//! server file); [`locate`] turns it into a concrete [`Transport`] or explains
//! why that candidate is not usable.

pub mod locator;

pub use locator::{local_socket_path, read_server_file, server_file_path, socket_status, ServerFile};

use crate::config::SessionConfig;
use crate::error::{ClientError, TransportError};
use crate::protocol::AUTH_KEY_LENGTH;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Name of the implicit socket and server file
pub const DEFAULT_SERVER_NAME: &str = "server";

/// A concrete endpoint, consumed by one connection attempt
#[derive(Clone, PartialEq, Eq)]
pub enum Transport {
    /// Unix domain socket at this path
    Local(PathBuf),
    /// TCP endpoint guarded by a shared secret
    Remote {
        addr: SocketAddr,
        token: [u8; AUTH_KEY_LENGTH],
    },
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Local(path) => f.debug_tuple("Local").field(path).finish(),
            Transport::Remote { addr, .. } => f
                .debug_struct("Remote")
                .field("addr", addr)
                .field("token", &"<redacted>")
                .finish(),
        }
    }
}

impl Transport {
    /// True for TCP endpoints that are not on this machine
    pub fn is_foreign(&self) -> bool {
        match self {
            Transport::Local(_) => false,
            Transport::Remote { addr, .. } => !addr.ip().is_loopback(),
        }
    }
}

/// Where to look for a server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    /// Socket name or path (`--socket-name`, `EMACS_SOCKET_NAME`, or `server`)
    Socket { name: OsString, explicit: bool },
    /// Server file name or path (`--server-file`, `EMACS_SERVER_FILE`, or `server`)
    ServerFile { name: PathBuf, explicit: bool },
}

impl Candidate {
    pub fn is_explicit(&self) -> bool {
        match self {
            Candidate::Socket { explicit, .. } | Candidate::ServerFile { explicit, .. } => *explicit,
        }
    }

    pub fn name(&self) -> &OsStr {
        match self {
            Candidate::Socket { name, .. } => name,
            Candidate::ServerFile { name, .. } => name.as_os_str(),
        }
    }

    /// Error reported when this explicit candidate fails without fallback
    pub fn access_error(&self) -> ClientError {
        match self {
            Candidate::Socket { name, .. } => ClientError::SocketAccess(PathBuf::from(name)),
            Candidate::ServerFile { name, .. } => ClientError::ServerFileAccess(name.clone()),
        }
    }
}

/// Candidates in the order they are tried.
///
/// An explicit socket or server file replaces the implicit defaults entirely;
/// otherwise the implicit socket is tried before the implicit server file.
pub fn candidates(config: &SessionConfig) -> Vec<Candidate> {
    if let Some(name) = &config.socket_name {
        return vec![Candidate::Socket { name: name.clone(), explicit: true }];
    }
    if let Some(name) = &config.server_file {
        return vec![Candidate::ServerFile { name: name.clone(), explicit: true }];
    }
    vec![
        Candidate::Socket {
            name: OsString::from(DEFAULT_SERVER_NAME),
            explicit: false,
        },
        Candidate::ServerFile {
            name: PathBuf::from(DEFAULT_SERVER_NAME),
            explicit: false,
        },
    ]
}

/// Resolve a candidate to a transport.
///
/// `ClientError::Transport` means "try the next candidate"; any other error is
/// fatal (for example a malformed server file).
pub fn locate(candidate: &Candidate, config: &SessionConfig) -> Result<Transport, ClientError> {
    match candidate {
        Candidate::Socket { name, .. } => {
            let path = local_socket_path(name, &config.env)?;
            Ok(Transport::Local(path))
        }
        Candidate::ServerFile { name, .. } => {
            let path = server_file_path(name, &config.env).ok_or(TransportError::Unreachable)?;
            match read_server_file(&path)? {
                Some(ServerFile { addr, token }) => Ok(Transport::Remote { addr, token }),
                None => Err(TransportError::Unreachable.into()),
            }
        }
    }
}
