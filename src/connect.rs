//! Connection strategy
//!
//! Candidates are tried strictly in order and the first that connects wins.
//! When all of them fail the configured policy decides what happens next:
//!
//! ```text
//! FirstPass ──all failed──▶ launch daemon ──▶ SecondPass ──all failed──▶ DaemonUnreachable
//!     │                                          │
//!     └─all failed, alternate editor─▶ Unavailable   (no launch policy)
//!     └─all failed, nothing configured─▶ NoTransport / SocketAccess / ServerFileAccess
//! ```
//!
//! The daemon is launched at most once per invocation.

use crate::config::SessionConfig;
use crate::error::ClientError;
use crate::session::Connection;
use crate::transport::{self, Candidate, Transport};
use std::ffi::OsString;
use std::io::{self, Write};
use std::process::Command;

/// Result of the connect phase
#[derive(Debug)]
pub enum Established<C> {
    Connected(C),
    /// No server reachable; hand off to the alternate editor
    Unavailable,
}

/// One connection attempt per candidate
pub trait Connector {
    type Conn;

    /// `Err(ClientError::Transport(_))` moves on to the next candidate; any
    /// other error aborts the connect phase
    fn attempt(&mut self, candidate: &Candidate) -> Result<Self::Conn, ClientError>;
}

/// Starts a server and blocks until it is ready
pub trait DaemonLauncher {
    fn launch(&mut self, config: &SessionConfig) -> io::Result<()>;
}

/// Connects with the real locator, reporting failures on `diagnostics`
pub struct SystemConnector<'a, D: Write> {
    config: &'a SessionConfig,
    diagnostics: D,
}

impl<'a, D: Write> SystemConnector<'a, D> {
    pub fn new(config: &'a SessionConfig, diagnostics: D) -> Self {
        Self { config, diagnostics }
    }

    fn report(&mut self, message: &dyn std::fmt::Display) {
        let _ = writeln!(self.diagnostics, "{}: {}", self.config.progname, message);
    }
}

impl<D: Write> Connector for SystemConnector<'_, D> {
    type Conn = Connection;

    fn attempt(&mut self, candidate: &Candidate) -> Result<Connection, ClientError> {
        tracing::debug!(?candidate, "trying");

        let transport = match transport::locate(candidate, self.config) {
            Ok(transport) => transport,
            Err(ClientError::Transport(e)) => {
                // A server file that is simply absent is not worth a message.
                if matches!(candidate, Candidate::Socket { .. }) || !e.is_absent() {
                    self.report(&e);
                }
                return Err(e.into());
            }
            Err(fatal) => return Err(fatal),
        };

        if let Transport::Remote { addr, .. } = &transport {
            if transport.is_foreign() && !self.config.quiet {
                println!("{}: connected to remote socket at {}", self.config.progname, addr.ip());
            }
        }

        Connection::open(&transport).map_err(|e| {
            self.report(&e);
            ClientError::from(e)
        })
    }
}

/// Runs `emacs --daemon` and waits for it to detach
#[derive(Debug, Default)]
pub struct EmacsDaemon;

impl DaemonLauncher for EmacsDaemon {
    fn launch(&mut self, config: &SessionConfig) -> io::Result<()> {
        let mut arg = OsString::from("--daemon");
        if let Some(name) = &config.socket_name {
            arg.push("=");
            arg.push(name);
        }
        tracing::debug!(?arg, "launching daemon");

        let status = Command::new("emacs").arg(&arg).status()?;
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::other(format!("emacs {} exited with {}", arg.to_string_lossy(), status)))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    First,
    AfterLaunch,
}

/// Try every candidate, escalating to a daemon launch at most once
pub fn establish<C, L, N>(
    config: &SessionConfig,
    connector: &mut C,
    launcher: &mut L,
    notices: &mut N,
) -> Result<Established<C::Conn>, ClientError>
where
    C: Connector,
    L: DaemonLauncher,
    N: Write,
{
    let candidates = transport::candidates(config);
    let mut pass = Pass::First;

    loop {
        if let Some(conn) = first_connecting(&candidates, connector)? {
            return Ok(Established::Connected(conn));
        }

        match pass {
            Pass::AfterLaunch => return Err(ClientError::DaemonUnreachable),
            Pass::First if config.launches_daemon() => {
                launcher.launch(config).map_err(ClientError::DaemonLaunch)?;
                let _ = writeln!(notices, "Emacs daemon should have started, trying to connect again");
                pass = Pass::AfterLaunch;
            }
            Pass::First if config.has_fallback() => return Ok(Established::Unavailable),
            Pass::First => {
                return Err(match candidates.first() {
                    Some(candidate) if candidate.is_explicit() => candidate.access_error(),
                    _ => ClientError::NoTransport,
                });
            }
        }
    }
}

fn first_connecting<C: Connector>(candidates: &[Candidate], connector: &mut C) -> Result<Option<C::Conn>, ClientError> {
    for candidate in candidates {
        match connector.attempt(candidate) {
            Ok(conn) => return Ok(Some(conn)),
            Err(ClientError::Transport(e)) => {
                tracing::debug!(candidate = ?candidate.name(), error = %e, "candidate failed");
            }
            Err(fatal) => return Err(fatal),
        }
    }
    Ok(None)
}
