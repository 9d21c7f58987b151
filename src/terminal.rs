use crate::config::Environment;
use nix::sys::signal::{kill, Signal};
use nix::unistd::{getpgrp, tcgetpgrp, ttyname, Pid};
use std::io;
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::ffi::OsStrExt;

/// Terminal name and type sent with `-tty`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtyInfo {
    pub name: Vec<u8>,
    pub term_type: String,
}

/// Whether this process group owns the controlling terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Foreground {
    Yes,
    No,
    /// No controlling terminal on stdout
    Unknown,
}

/// Job-control queries and actions on the controlling terminal (stdout)
#[derive(Debug, Clone)]
pub struct TerminalControl {
    pgid: Pid,
}

impl TerminalControl {
    pub fn new() -> Self {
        Self { pgid: getpgrp() }
    }

    fn stdout() -> BorrowedFd<'static> {
        // SAFETY: fd 1 stays open for the life of the process.
        unsafe { BorrowedFd::borrow_raw(libc::STDOUT_FILENO) }
    }

    /// Compare the terminal's foreground group with our own
    pub fn foreground(&self) -> Foreground {
        match tcgetpgrp(Self::stdout()) {
            Ok(fg) if fg == self.pgid => Foreground::Yes,
            Ok(_) => Foreground::No,
            Err(_) => Foreground::Unknown,
        }
    }

    /// Stop the whole process group with SIGTTIN, as the terminal driver
    /// would for a background reader
    pub fn stop_group(&self) -> io::Result<()> {
        kill(Pid::from_raw(-self.pgid.as_raw()), Signal::SIGTTIN).map_err(io::Error::from)
    }

    /// Before taking over the terminal, wait until we are in the foreground
    pub fn wait_for_foreground(&self) -> io::Result<()> {
        if self.foreground() == Foreground::No {
            tracing::debug!(pgid = self.pgid.as_raw(), "started in background, stopping group");
            self.stop_group()?;
        }
        Ok(())
    }
}

impl Default for TerminalControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Name and type of the terminal on stdout, or the reason there is none
pub fn tty_info(env: &Environment) -> Result<TtyInfo, String> {
    let name = ttyname(io::stdout().as_fd())
        .ok()
        .map(|path| path.into_os_string());
    check_tty(
        name.as_deref().map(OsStrExt::as_bytes),
        env.get_str("TERM").as_deref(),
        env.get_str("INSIDE_EMACS").as_deref(),
    )
}

/// Validate terminal details gathered from the environment
pub fn check_tty(
    name: Option<&[u8]>,
    term_type: Option<&str>,
    inside_emacs: Option<&str>,
) -> Result<TtyInfo, String> {
    let name = name.ok_or_else(|| "could not get terminal name".to_string())?;
    let term_type =
        term_type.ok_or_else(|| "please set the TERM variable to your terminal type".to_string())?;

    // A frame inside a term-mode buffer would lock up the server's keyboard.
    if inside_emacs.is_some_and(|v| v.contains(",term:")) && term_type.starts_with("eterm") {
        return Err("opening a frame in an Emacs term buffer is not supported".to_string());
    }

    Ok(TtyInfo {
        name: name.to_vec(),
        term_type: term_type.to_string(),
    })
}
