//! Session configuration
//!
//! [`SessionConfig`] is assembled once from the decoded [`Options`], an
//! [`Environment`] snapshot and the working directory. Nothing in the protocol
//! engine mutates it afterwards; per-session state such as the display that is
//! currently being tried lives in the session itself.

pub mod options;

pub use options::{usage, Options, OptionsError};

use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding the read timeout
pub const TIMEOUT_ENV: &str = "EDCLIENT_TIMEOUT";

/// Snapshot of the process environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: Vec<(OsString, OsString)>,
}

impl Environment {
    /// Capture the current process environment
    pub fn capture() -> Self {
        Self {
            vars: std::env::vars_os().collect(),
        }
    }

    /// Build from explicit pairs (tests, embedding)
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<OsString>,
        V: Into<OsString>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            vars: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&OsStr> {
        self.vars
            .iter()
            .find(|(k, _)| k.as_bytes() == name.as_bytes())
            .map(|(_, v)| v.as_os_str())
    }

    /// Value as UTF-8 (lossy)
    pub fn get_str(&self, name: &str) -> Option<String> {
        self.get(name).map(|v| v.to_string_lossy().into_owned())
    }

    /// `NAME=value` entries in capture order
    pub fn entries(&self) -> impl Iterator<Item = Vec<u8>> + '_ {
        self.vars.iter().map(|(k, v)| {
            let mut entry = Vec::with_capacity(k.len() + v.len() + 1);
            entry.extend_from_slice(k.as_bytes());
            entry.push(b'=');
            entry.extend_from_slice(v.as_bytes());
            entry
        })
    }
}

/// Immutable per-invocation configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Name used in diagnostics
    pub progname: String,
    pub no_wait: bool,
    pub quiet: bool,
    pub suppress_output: bool,
    pub eval: bool,
    pub create_frame: bool,
    /// Open the new frame on the current terminal
    pub tty: bool,
    /// Display to try first
    pub display: Option<String>,
    /// Display to switch to if the server cannot use `display`
    pub alt_display: Option<String>,
    pub parent_id: Option<String>,
    pub frame_parameters: Option<String>,
    /// Prefix prepended to the working directory and absolute file names
    pub tramp_prefix: Option<String>,
    /// Explicit or `EMACS_SOCKET_NAME` socket
    pub socket_name: Option<OsString>,
    /// Explicit or `EMACS_SERVER_FILE` server file
    pub server_file: Option<PathBuf>,
    /// `None`: no fallback. `Some("")`: launch a daemon and retry.
    pub alternate_editor: Option<String>,
    /// Read timeout for the reply loop; `None` blocks forever
    pub timeout: Option<Duration>,
    pub working_dir: PathBuf,
    pub items: Vec<OsString>,
    pub env: Environment,
}

impl SessionConfig {
    /// Apply environment fallbacks and display resolution to `options`
    pub fn resolve(
        progname: impl Into<String>,
        options: Options,
        env: Environment,
        working_dir: PathBuf,
    ) -> Result<Self, OptionsError> {
        let alternate_editor = options
            .alternate_editor
            .or_else(|| env.get_str("ALTERNATE_EDITOR"));
        let tramp_prefix = options
            .tramp_prefix
            .or_else(|| env.get_str("EMACSCLIENT_TRAMP"));
        let socket_name = options
            .socket_name
            .or_else(|| env.get("EMACS_SOCKET_NAME").map(OsStr::to_os_string));
        let server_file = options
            .server_file
            .or_else(|| env.get("EMACS_SERVER_FILE").map(PathBuf::from));
        let timeout = match options.timeout {
            Some(t) => Some(t),
            None => match env.get_str(TIMEOUT_ENV) {
                Some(raw) if !raw.is_empty() => Some(options::parse_timeout(&raw)?),
                _ => None,
            },
        };

        let mut tty = options.tty;
        let create_frame = options.create_frame;
        let mut display = options.display;
        let mut alt_display = None;

        // New graphical frames default to $DISPLAY, with the platform's own
        // window system as the second choice.
        if create_frame && !tty && display.is_none() {
            alt_display = platform_display().map(str::to_string);
            display = env.get_str("DISPLAY");
        }
        if display.is_none() {
            display = alt_display.take();
        }
        if display.as_deref() == Some("") {
            display = None;
        }
        if create_frame && display.is_none() {
            tty = true;
        }

        Ok(Self {
            progname: progname.into(),
            no_wait: options.no_wait,
            quiet: options.quiet,
            suppress_output: options.suppress_output,
            eval: options.eval,
            create_frame,
            tty,
            display,
            alt_display,
            parent_id: options.parent_id,
            frame_parameters: options.frame_parameters,
            tramp_prefix,
            socket_name,
            server_file,
            alternate_editor,
            timeout,
            working_dir,
            items: options.items,
            env,
        })
    }

    /// True when a failed connection should launch a daemon and retry
    pub fn launches_daemon(&self) -> bool {
        self.alternate_editor.as_deref() == Some("")
    }

    /// True when some fallback exists for a failed connection
    pub fn has_fallback(&self) -> bool {
        self.alternate_editor.is_some()
    }

    /// Whether the request may carry terminal information
    pub fn wants_terminal(&self) -> bool {
        self.create_frame || !self.eval
    }
}

/// Window system available without an X display
fn platform_display() -> Option<&'static str> {
    if cfg!(target_os = "macos") {
        Some("ns")
    } else {
        None
    }
}
