//! Wire protocol spoken with the editor server
//!
//! ## Requests (client → server)
//!
//! One line of space-separated directive groups, terminated by `\n`:
//!
//! ```text
//! -dir /home/u/ -current-frame -tty /dev/pts/3 xterm -file /tmp/a.txt \n
//! ```
//!
//! Every argument goes through [`codec::escape`], so a group is always
//! `-name arg arg ... ` with exactly one space after each token.
//!
//! ## Replies (server → client)
//!
//! Any number of `\n`-terminated lines, each starting with a directive name
//! and carrying at most one escaped argument. See [`Reply`].

pub mod codec;

use std::fmt;

/// Authentication preamble for remote transports, followed by the token and a space
pub const AUTH_PREFIX: &[u8] = b"-auth ";

/// Length of the shared secret in a server file
pub const AUTH_KEY_LENGTH: usize = 64;

/// Fixed directive sent when the terminal is handed back to the server
pub const RESUME: &[u8] = b"-resume \n";

/// Fixed directive sent when this client is about to stop
pub const SUSPEND: &[u8] = b"-suspend \n";

/// One outbound directive: a name and zero or more raw (unescaped) arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub name: &'static str,
    pub args: Vec<Vec<u8>>,
}

impl Directive {
    /// Directive with no arguments, e.g. `-nowait`
    pub fn flag(name: &'static str) -> Self {
        Self { name, args: Vec::new() }
    }

    /// Directive with a single argument
    pub fn with_arg(name: &'static str, arg: impl Into<Vec<u8>>) -> Self {
        Self { name, args: vec![arg.into()] }
    }

    /// Directive with several arguments, e.g. `-tty NAME TYPE`
    pub fn with_args(name: &'static str, args: Vec<Vec<u8>>) -> Self {
        Self { name, args }
    }

    /// Append the wire form (`-name arg... `) to `out`
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(b'-');
        out.extend_from_slice(self.name.as_bytes());
        out.push(b' ');
        for arg in &self.args {
            codec::escape_into(arg, out);
            out.push(b' ');
        }
    }
}

/// An ordered request; the server consumes the directives positionally
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    directives: Vec<Directive>,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, directive: Directive) {
        self.directives.push(directive);
    }

    /// Move every directive of `other` onto the end of this request
    pub fn append(&mut self, other: Request) {
        self.directives.extend(other.directives);
    }

    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }

    /// Encode as one complete line including the trailing newline
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 * self.directives.len().max(1));
        for directive in &self.directives {
            directive.encode_into(&mut out);
        }
        out.push(b'\n');
        out
    }
}

/// A parsed reply line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `-emacs-pid PID`
    EmacsPid(i32),
    /// `-window-system-unsupported`
    WindowSystemUnsupported,
    /// `-print TEXT` (unescaped)
    Print(Vec<u8>),
    /// `-print-nonl TEXT` (unescaped)
    PrintNonl(Vec<u8>),
    /// `-error TEXT` (unescaped)
    Error(Vec<u8>),
    /// `-suspend`
    Suspend,
    /// Anything else, kept verbatim for the diagnostic
    Unknown(Vec<u8>),
}

impl Reply {
    /// Parse one line with its terminating newline already removed
    pub fn parse(line: &[u8]) -> Self {
        if let Some(arg) = argument(line, b"-emacs-pid") {
            return match parse_pid(arg) {
                Some(pid) => Reply::EmacsPid(pid),
                None => Reply::Unknown(line.to_vec()),
            };
        }
        if argument(line, b"-window-system-unsupported").is_some() {
            return Reply::WindowSystemUnsupported;
        }
        if let Some(arg) = argument(line, b"-print") {
            return Reply::Print(codec::unescape(arg));
        }
        if let Some(arg) = argument(line, b"-print-nonl") {
            return Reply::PrintNonl(codec::unescape(arg));
        }
        if let Some(arg) = argument(line, b"-error") {
            return Reply::Error(codec::unescape(arg));
        }
        if argument(line, b"-suspend").is_some() {
            return Reply::Suspend;
        }
        Reply::Unknown(line.to_vec())
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::EmacsPid(pid) => write!(f, "-emacs-pid {}", pid),
            Reply::WindowSystemUnsupported => f.write_str("-window-system-unsupported"),
            Reply::Print(text) => write!(f, "-print {}", String::from_utf8_lossy(text)),
            Reply::PrintNonl(text) => write!(f, "-print-nonl {}", String::from_utf8_lossy(text)),
            Reply::Error(text) => write!(f, "-error {}", String::from_utf8_lossy(text)),
            Reply::Suspend => f.write_str("-suspend"),
            Reply::Unknown(line) => f.write_str(&String::from_utf8_lossy(line)),
        }
    }
}

/// Argument following `name` if `line` is that directive.
///
/// The name must be followed by a space or end the line, so `-print` does not
/// swallow `-print-nonl`.
fn argument<'a>(line: &'a [u8], name: &[u8]) -> Option<&'a [u8]> {
    let rest = line.strip_prefix(name)?;
    match rest.split_first() {
        None => Some(rest),
        Some((b' ', arg)) => Some(arg),
        Some(_) => None,
    }
}

/// Leading decimal integer, ignoring surrounding spaces
fn parse_pid(arg: &[u8]) -> Option<i32> {
    let text = std::str::from_utf8(arg).ok()?.trim();
    let digits: &str = text.split(' ').next()?;
    digits.parse().ok()
}
