//! Locating server endpoints on disk
//!
//! Local sockets live in `$TMPDIR/emacs<uid>/<name>` unless a path is given.
//! Before connecting, the socket must exist and belong to the effective user;
//! a socket owned by someone else is rejected rather than trusted.
//!
//! Server files hold the TCP endpoint and shared secret:
//!
//! ```text
//! 127.0.0.1:38021\n
//! <64 bytes of authentication token>
//! ```

use crate::config::Environment;
use crate::error::{ClientError, TransportError};
use crate::protocol::AUTH_KEY_LENGTH;
use nix::unistd::{geteuid, User};
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// Capacity of `sockaddr_un.sun_path`, including the terminating NUL
#[cfg(any(target_os = "macos", target_os = "freebsd", target_os = "openbsd", target_os = "netbsd"))]
const SUN_PATH_CAPACITY: usize = 104;
#[cfg(not(any(target_os = "macos", target_os = "freebsd", target_os = "openbsd", target_os = "netbsd")))]
const SUN_PATH_CAPACITY: usize = 108;

/// `fgets` buffer used for the first server-file line
const ADDRESS_LINE_MAX: usize = 31;

/// Parsed contents of a server file
#[derive(Clone, PartialEq, Eq)]
pub struct ServerFile {
    pub addr: SocketAddr,
    pub token: [u8; AUTH_KEY_LENGTH],
}

impl std::fmt::Debug for ServerFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerFile").field("addr", &self.addr).finish_non_exhaustive()
    }
}

/// Resolve and vet the socket path for `name`.
///
/// A bare name is placed in the per-user directory under `$TMPDIR` (default
/// `/tmp`). If that socket is missing or foreign and `LOGNAME`/`USER` names a
/// different account (the client is running under `su`), that account's
/// directory is checked instead.
pub fn local_socket_path(name: &OsStr, env: &Environment) -> Result<PathBuf, TransportError> {
    let euid = geteuid().as_raw();

    if name.as_bytes().iter().any(|&b| b == b'/' || b == b'\\') {
        let path = PathBuf::from(name);
        check_length(&path)?;
        socket_status(&path, euid)?;
        return Ok(path);
    }

    let tmpdir = env
        .get("TMPDIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"));

    let path = user_socket(&tmpdir, euid, name);
    check_length(&path)?;

    match socket_status(&path, euid) {
        Ok(()) => Ok(path),
        Err(first) => match login_uid(env) {
            Some(uid) if uid != euid => {
                let alternate = user_socket(&tmpdir, uid, name);
                check_length(&alternate)?;
                tracing::debug!(path = %alternate.display(), "trying socket of login user");
                socket_status(&alternate, euid).map(|()| alternate)
            }
            _ => Err(first),
        },
    }
}

/// Check that `path` exists and is owned by `euid`
pub fn socket_status(path: &Path, euid: u32) -> Result<(), TransportError> {
    let meta = fs::metadata(path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            TransportError::Unreachable
        } else {
            TransportError::Inaccessible {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })?;

    if meta.uid() != euid {
        return Err(TransportError::AuthRejected);
    }
    Ok(())
}

fn user_socket(tmpdir: &Path, uid: u32, name: &OsStr) -> PathBuf {
    tmpdir.join(format!("emacs{}", uid)).join(name)
}

fn check_length(path: &Path) -> Result<(), TransportError> {
    if path.as_os_str().as_bytes().len() >= SUN_PATH_CAPACITY {
        return Err(TransportError::NameTooLong(path.to_path_buf()));
    }
    Ok(())
}

/// Uid of the account named by `LOGNAME`, else `USER`
fn login_uid(env: &Environment) -> Option<u32> {
    let name = env.get_str("LOGNAME").or_else(|| env.get_str("USER"))?;
    match User::from_name(&name) {
        Ok(Some(user)) => Some(user.uid.as_raw()),
        _ => None,
    }
}

/// Where the server file called `name` lives.
///
/// Absolute names are used as given; others are looked up in
/// `~/.emacs.d/server/`. Returns `None` when no home directory is known.
pub fn server_file_path(name: &Path, env: &Environment) -> Option<PathBuf> {
    if name.is_absolute() {
        return Some(name.to_path_buf());
    }
    let home = env.get("HOME").map(PathBuf::from).or_else(dirs::home_dir)?;
    Some(home.join(".emacs.d").join("server").join(name))
}

/// Read a server file. A file that cannot be opened is `Ok(None)`; a file
/// that opens but does not parse is a fatal protocol violation.
pub fn read_server_file(path: &Path) -> Result<Option<ServerFile>, ClientError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "server file not readable");
            return Ok(None);
        }
    };
    parse_server_file(&bytes).map(Some)
}

/// Parse `host:port\n` followed by the raw token
pub fn parse_server_file(bytes: &[u8]) -> Result<ServerFile, ClientError> {
    let invalid = || ClientError::ProtocolViolation("invalid configuration info".to_string());

    let window = &bytes[..bytes.len().min(ADDRESS_LINE_MAX)];
    let consumed = match window.iter().position(|&b| b == b'\n') {
        Some(pos) => pos + 1,
        None => window.len(),
    };
    let line = &bytes[..consumed];

    let colon = line.iter().position(|&b| b == b':').ok_or_else(invalid)?;
    let host = std::str::from_utf8(&line[..colon]).map_err(|_| invalid())?;
    let ip: Ipv4Addr = host.trim().parse().map_err(|_| invalid())?;
    let port = leading_port(&line[colon + 1..]).ok_or_else(invalid)?;

    let token_bytes = bytes
        .get(consumed..consumed + AUTH_KEY_LENGTH)
        .ok_or_else(|| ClientError::ProtocolViolation("cannot read authentication info".to_string()))?;
    let mut token = [0u8; AUTH_KEY_LENGTH];
    token.copy_from_slice(token_bytes);

    Ok(ServerFile {
        addr: SocketAddr::V4(SocketAddrV4::new(ip, port)),
        token,
    })
}

/// Decimal port at the start of `text`, after optional blanks
fn leading_port(text: &[u8]) -> Option<u16> {
    let start = text.iter().position(|b| !b.is_ascii_whitespace())?;
    let digits: Vec<u8> = text[start..]
        .iter()
        .copied()
        .take_while(u8::is_ascii_digit)
        .collect();
    std::str::from_utf8(&digits).ok()?.parse().ok()
}
