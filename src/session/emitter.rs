//! Command emitter
//!
//! A request is built in two parts. The preamble (`-env`, `-dir`) is sent once
//! per connection. The body, from `-nowait` through the items, depends on the
//! [`FrameTarget`] and is rebuilt whenever the server rejects the window
//! system it was asked to use.

use crate::config::SessionConfig;
use crate::error::ClientError;
use crate::protocol::{Directive, Request};
use crate::terminal::TtyInfo;
use std::io::{self, BufRead};
use std::os::unix::ffi::OsStrExt;

/// One user-supplied item, classified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    /// Expression passed verbatim
    Eval(Vec<u8>),
    /// `+LINE` or `+LINE:COLUMN` applying to the next file
    Position(Vec<u8>),
    File(Vec<u8>),
}

/// True for `+digits` and `+digits:digits`
pub fn is_position(arg: &[u8]) -> bool {
    let Some(rest) = arg.strip_prefix(b"+") else {
        return false;
    };
    let all_digits = |s: &[u8]| !s.is_empty() && s.iter().all(u8::is_ascii_digit);
    match rest.iter().position(|&b| b == b':') {
        Some(colon) => all_digits(&rest[..colon]) && all_digits(&rest[colon + 1..]),
        None => all_digits(rest),
    }
}

/// Classify the command-line items
pub fn classify_items(config: &SessionConfig) -> Vec<Item> {
    config
        .items
        .iter()
        .map(|item| {
            let bytes = item.as_bytes().to_vec();
            if config.eval {
                Item::Eval(bytes)
            } else if is_position(&bytes) {
                Item::Position(bytes)
            } else {
                Item::File(bytes)
            }
        })
        .collect()
}

/// Read one expression per line until end of input
pub fn read_eval_lines<R: BufRead>(mut reader: R) -> io::Result<Vec<Item>> {
    let mut items = Vec::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        if !line.is_empty() {
            items.push(Item::Eval(line.clone()));
        }
    }
    Ok(items)
}

/// Where the server should open its frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameTarget {
    pub display: Option<String>,
    pub alt_display: Option<String>,
    pub tty: bool,
    pub no_wait: bool,
}

impl FrameTarget {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            display: config.display.clone(),
            alt_display: config.alt_display.clone(),
            tty: config.tty,
            no_wait: config.no_wait,
        }
    }

    /// The requested window system is unsupported: try the alternate
    /// display once, then the terminal
    pub fn fall_back(&mut self) {
        match self.alt_display.take() {
            Some(alt) => self.display = Some(alt),
            None => {
                self.no_wait = false;
                self.tty = true;
            }
        }
    }
}

/// `-env` for every variable (new frames only), then `-dir`
pub fn preamble(config: &SessionConfig) -> Request {
    let mut request = Request::new();

    if config.create_frame {
        for entry in config.env.entries() {
            request.push(Directive::with_arg("env", entry));
        }
    }

    let mut dir = Vec::new();
    if let Some(prefix) = &config.tramp_prefix {
        dir.extend_from_slice(prefix.as_bytes());
    }
    dir.extend_from_slice(config.working_dir.as_os_str().as_bytes());
    if dir.last() != Some(&b'/') {
        dir.push(b'/');
    }
    request.push(Directive::with_arg("dir", dir));

    request
}

/// The rebuildable part of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Body {
    pub request: Request,
    /// A `-tty` directive was included
    pub tty: bool,
}

/// Build the body for `target`. `terminal` is only consulted when the
/// request may carry terminal information.
pub fn body<F>(config: &SessionConfig, target: &FrameTarget, items: &[Item], terminal: F) -> Result<Body, ClientError>
where
    F: FnOnce() -> Result<TtyInfo, String>,
{
    let mut request = Request::new();

    if target.no_wait {
        request.push(Directive::flag("nowait"));
    }
    if !config.create_frame {
        request.push(Directive::flag("current-frame"));
    }
    if let Some(display) = &target.display {
        request.push(Directive::with_arg("display", display.as_bytes()));
    }
    if let Some(parent) = &config.parent_id {
        request.push(Directive::with_arg("parent-id", parent.as_bytes()));
    }
    if config.create_frame {
        if let Some(params) = &config.frame_parameters {
            request.push(Directive::with_arg("frame-parameters", params.as_bytes()));
        }
    }

    let mut tty = false;
    if config.wants_terminal() {
        match terminal() {
            Ok(info) => {
                request.push(Directive::with_args(
                    "tty",
                    vec![info.name, info.term_type.into_bytes()],
                ));
                tty = true;
            }
            Err(reason) if target.tty => return Err(ClientError::Terminal(reason)),
            Err(reason) => tracing::debug!(%reason, "no terminal information"),
        }
    }

    if config.create_frame && !target.tty {
        request.push(Directive::flag("window-system"));
    }

    for item in items {
        request.push(match item {
            Item::Eval(expr) => Directive::with_arg("eval", expr.clone()),
            Item::Position(pos) => Directive::with_arg("position", pos.clone()),
            Item::File(path) => {
                let mut arg = Vec::new();
                if path.first() == Some(&b'/') {
                    if let Some(prefix) = &config.tramp_prefix {
                        arg.extend_from_slice(prefix.as_bytes());
                    }
                }
                arg.extend_from_slice(path);
                Directive::with_arg("file", arg)
            }
        });
    }

    Ok(Body { request, tty })
}
