//! Command-line option decoding
//!
//! Accepts the long options with one or two dashes (`-nw`, `--tty`), the
//! single-letter forms, `--opt=value`, `--opt value`, `-sNAME` and clusters of
//! flag letters. Options may appear anywhere before `--`; everything that is
//! not an option is an item (file, `+LINE[:COL]` or expression).

use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors from option decoding
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionsError {
    #[error("unrecognized option '{0}'")]
    UnknownOption(String),

    #[error("option '{0}' requires an argument")]
    MissingValue(String),

    #[error("option '{0}' doesn't allow an argument")]
    UnexpectedValue(String),

    #[error("invalid timeout '{0}'")]
    InvalidTimeout(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Opt {
    NoWait,
    Quiet,
    SuppressOutput,
    Eval,
    Help,
    Version,
    Tty,
    CreateFrame,
    AlternateEditor,
    FrameParameters,
    SocketName,
    ServerFile,
    Display,
    ParentId,
    Tramp,
    Timeout,
}

impl Opt {
    fn takes_value(self) -> bool {
        matches!(
            self,
            Opt::AlternateEditor
                | Opt::FrameParameters
                | Opt::SocketName
                | Opt::ServerFile
                | Opt::Display
                | Opt::ParentId
                | Opt::Tramp
                | Opt::Timeout
        )
    }

    fn from_short(c: u8) -> Option<Self> {
        let opt = match c {
            b'n' => Opt::NoWait,
            b'q' => Opt::Quiet,
            b'u' => Opt::SuppressOutput,
            b'e' => Opt::Eval,
            b'H' => Opt::Help,
            b'V' => Opt::Version,
            b't' => Opt::Tty,
            b'c' => Opt::CreateFrame,
            b'a' => Opt::AlternateEditor,
            b'F' => Opt::FrameParameters,
            b's' => Opt::SocketName,
            b'f' => Opt::ServerFile,
            b'd' => Opt::Display,
            b'p' => Opt::ParentId,
            b'T' => Opt::Tramp,
            b'w' => Opt::Timeout,
            _ => return None,
        };
        Some(opt)
    }
}

const LONG_OPTIONS: &[(&str, Opt)] = &[
    ("no-wait", Opt::NoWait),
    ("quiet", Opt::Quiet),
    ("suppress-output", Opt::SuppressOutput),
    ("eval", Opt::Eval),
    ("help", Opt::Help),
    ("version", Opt::Version),
    ("tty", Opt::Tty),
    ("nw", Opt::Tty),
    ("create-frame", Opt::CreateFrame),
    ("alternate-editor", Opt::AlternateEditor),
    ("frame-parameters", Opt::FrameParameters),
    ("socket-name", Opt::SocketName),
    ("server-file", Opt::ServerFile),
    ("display", Opt::Display),
    ("parent-id", Opt::ParentId),
    ("tramp", Opt::Tramp),
    ("timeout", Opt::Timeout),
];

/// Look up a long option by exact name or unambiguous prefix
fn lookup_long(name: &str) -> Option<Opt> {
    if let Some((_, opt)) = LONG_OPTIONS.iter().find(|(n, _)| *n == name) {
        return Some(*opt);
    }
    let mut candidates = LONG_OPTIONS.iter().filter(|(n, _)| n.starts_with(name));
    let (_, first) = candidates.next()?;
    if candidates.all(|(_, opt)| opt == first) {
        Some(*first)
    } else {
        None
    }
}

/// Decoded command line, before environment fallbacks are applied
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    pub no_wait: bool,
    pub quiet: bool,
    pub suppress_output: bool,
    pub eval: bool,
    pub show_help: bool,
    pub show_version: bool,
    pub tty: bool,
    pub create_frame: bool,
    pub alternate_editor: Option<String>,
    pub frame_parameters: Option<String>,
    /// Kept as raw bytes; socket names and paths need not be UTF-8
    pub socket_name: Option<OsString>,
    pub server_file: Option<PathBuf>,
    pub display: Option<String>,
    pub parent_id: Option<String>,
    pub tramp_prefix: Option<String>,
    pub timeout: Option<Duration>,
    pub items: Vec<OsString>,
}

impl Options {
    /// Decode `args`, which must not include the program name
    pub fn parse<I>(args: I) -> Result<Self, OptionsError>
    where
        I: IntoIterator<Item = OsString>,
    {
        let mut options = Options::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            let bytes = arg.as_bytes();

            if bytes == b"--" {
                options.items.extend(args.by_ref());
                break;
            }
            if bytes.len() < 2 || bytes[0] != b'-' {
                options.items.push(arg);
                continue;
            }

            if let Some(long) = bytes.strip_prefix(b"--") {
                options.parse_long(long, &mut args)?;
            } else {
                options.parse_single_dash(&bytes[1..], &mut args)?;
            }
        }

        Ok(options)
    }

    fn parse_long(
        &mut self,
        body: &[u8],
        rest: &mut impl Iterator<Item = OsString>,
    ) -> Result<(), OptionsError> {
        let (name, inline) = match body.iter().position(|&b| b == b'=') {
            Some(eq) => (&body[..eq], Some(OsStr::from_bytes(&body[eq + 1..]).to_os_string())),
            None => (body, None),
        };
        let name = String::from_utf8_lossy(name);
        let opt = lookup_long(&name).ok_or_else(|| OptionsError::UnknownOption(format!("--{}", name)))?;

        if opt.takes_value() {
            let value = match inline {
                Some(value) => value,
                None => next_value(rest, &format!("--{}", name))?,
            };
            self.apply(opt, Some(value))
        } else if inline.is_some() {
            Err(OptionsError::UnexpectedValue(format!("--{}", name)))
        } else {
            self.apply(opt, None)
        }
    }

    /// `-nw`, `-eval`, `-s NAME`, `-sNAME`, `-nqc`
    fn parse_single_dash(
        &mut self,
        body: &[u8],
        rest: &mut impl Iterator<Item = OsString>,
    ) -> Result<(), OptionsError> {
        // Long names are tried first, like getopt_long_only.
        if body.len() > 1 {
            let name = body.split(|&b| b == b'=').next().unwrap_or(body);
            if LONG_OPTIONS.iter().any(|(n, _)| n.as_bytes() == name) {
                return self.parse_long(body, rest);
            }
        }

        for (i, &c) in body.iter().enumerate() {
            let opt = Opt::from_short(c)
                .ok_or_else(|| OptionsError::UnknownOption(format!("-{}", String::from_utf8_lossy(body))))?;
            if opt.takes_value() {
                let attached = &body[i + 1..];
                let value = if attached.is_empty() {
                    next_value(rest, &format!("-{}", char::from(c)))?
                } else {
                    OsStr::from_bytes(attached).to_os_string()
                };
                return self.apply(opt, Some(value));
            }
            self.apply(opt, None)?;
        }
        Ok(())
    }

    fn apply(&mut self, opt: Opt, value: Option<OsString>) -> Result<(), OptionsError> {
        let text = |value: Option<OsString>| value.map(|v| v.to_string_lossy().into_owned());
        match opt {
            Opt::NoWait => self.no_wait = true,
            Opt::Quiet => self.quiet = true,
            Opt::SuppressOutput => self.suppress_output = true,
            Opt::Eval => self.eval = true,
            Opt::Help => self.show_help = true,
            Opt::Version => self.show_version = true,
            Opt::Tty => {
                self.tty = true;
                self.create_frame = true;
            }
            Opt::CreateFrame => self.create_frame = true,
            Opt::AlternateEditor => self.alternate_editor = text(value),
            Opt::FrameParameters => self.frame_parameters = text(value),
            Opt::SocketName => self.socket_name = value,
            Opt::ServerFile => self.server_file = value.map(PathBuf::from),
            Opt::Display => self.display = text(value),
            Opt::ParentId => {
                self.parent_id = text(value);
                self.create_frame = true;
            }
            Opt::Tramp => self.tramp_prefix = text(value),
            Opt::Timeout => {
                let raw = text(value).unwrap_or_default();
                self.timeout = Some(parse_timeout(&raw)?);
            }
        }
        Ok(())
    }
}

fn next_value(rest: &mut impl Iterator<Item = OsString>, name: &str) -> Result<OsString, OptionsError> {
    rest.next().ok_or_else(|| OptionsError::MissingValue(name.to_string()))
}

/// Text printed by `--help`
pub fn usage(progname: &str) -> String {
    format!(
        "Usage: {progname} [OPTIONS] FILE...
Tell the Emacs server to visit the specified files.
Every FILE can be either just a FILENAME or [+LINE[:COLUMN]] FILENAME.

The following OPTIONS are accepted:
-V, --version           Just print version info and return
-H, --help              Print this usage information message
-nw, -t, --tty          Open a new Emacs frame on the current terminal
-c, --create-frame      Create a new frame instead of trying to
                        use the current Emacs frame
-F ALIST, --frame-parameters=ALIST
                        Set the parameters of a new frame
-e, --eval              Evaluate the FILE arguments as ELisp expressions
-n, --no-wait           Don't wait for the server to return
-q, --quiet             Don't display messages on success
-u, --suppress-output   Don't display return values from the server
-d DISPLAY, --display=DISPLAY
                        Visit the file in the given display
--parent-id=ID          Open in parent window ID, via XEmbed
-s SOCKET, --socket-name=SOCKET
                        Set filename of the UNIX socket for communication
-f SERVER, --server-file=SERVER
                        Set filename of the TCP authentication file
-a EDITOR, --alternate-editor=EDITOR
                        Editor to fallback to if the server is not running
                        If EDITOR is the empty string, start Emacs in daemon
                        mode and try connecting again
-T PREFIX, --tramp=PREFIX
                        PREFIX to prepend to filenames sent to the server
                        for locating files remotely via Tramp
-w SECS, --timeout=SECS
                        Give up if the server sends nothing for SECS seconds
                        (also {timeout_env})
",
        timeout_env = super::TIMEOUT_ENV
    )
}

/// Seconds, possibly fractional; zero is rejected
pub fn parse_timeout(raw: &str) -> Result<Duration, OptionsError> {
    let secs: f64 = raw
        .trim()
        .parse()
        .map_err(|_| OptionsError::InvalidTimeout(raw.to_string()))?;
    if secs <= 0.0 {
        return Err(OptionsError::InvalidTimeout(raw.to_string()));
    }
    Duration::try_from_secs_f64(secs).map_err(|_| OptionsError::InvalidTimeout(raw.to_string()))
}
