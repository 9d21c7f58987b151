//! Reply dispatcher
//!
//! Bytes from the server are fed in as they arrive. Complete lines are parsed
//! into [`Reply`] values and acted on; an incomplete tail is kept for the next
//! chunk. Printing is handled here; replies that need the session (pid,
//! window-system retry, suspend) go to a [`ReplyHandler`].

use crate::error::ClientError;
use crate::protocol::Reply;
use std::io::{self, Write};

/// Final status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// The server sent at least one `-error`
    ServerError,
}

impl Outcome {
    pub fn exit_code(self) -> i32 {
        match self {
            Outcome::Success => crate::error::EXIT_SUCCESS,
            Outcome::ServerError => crate::error::EXIT_FAILURE,
        }
    }
}

/// Session-level effects of replies
pub trait ReplyHandler {
    fn emacs_pid(&mut self, pid: i32);

    /// The server cannot open a frame on the requested display; the request
    /// must be rebuilt and sent again
    fn window_system_unsupported(&mut self) -> Result<(), ClientError>;

    /// Stop this process until it is continued
    fn suspend(&mut self);
}

pub struct Dispatcher<O: Write, E: Write> {
    pending: Vec<u8>,
    /// True when the last thing printed ended a line
    skip_lf: bool,
    outcome: Outcome,
    suppress_output: bool,
    out: O,
    err: E,
}

impl<O: Write, E: Write> Dispatcher<O, E> {
    pub fn new(out: O, err: E, suppress_output: bool) -> Self {
        Self {
            pending: Vec::new(),
            skip_lf: true,
            outcome: Outcome::Success,
            suppress_output,
            out,
            err,
        }
    }

    /// Print a status message that leaves the cursor on its line
    pub fn print_open(&mut self, text: &str) -> io::Result<()> {
        self.out.write_all(text.as_bytes())?;
        self.out.flush()?;
        self.skip_lf = false;
        Ok(())
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    /// Feed one chunk read from the server
    pub fn feed(&mut self, chunk: &[u8], handler: &mut dyn ReplyHandler) -> Result<(), ClientError> {
        self.pending.extend_from_slice(chunk);

        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let line = self.pending[start..end].to_vec();
            start = end + 1;
            self.dispatch_line(&line, handler)?;
        }
        self.pending.drain(..start);

        self.out.flush().map_err(|e| ClientError::io("failed to write output", e))
    }

    /// End of stream: dispatch an unterminated last line and close the output line
    pub fn finish(&mut self, handler: &mut dyn ReplyHandler) -> Result<Outcome, ClientError> {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.dispatch_line(&line, handler)?;
        }
        if !self.skip_lf {
            self.write_out(b"\n")?;
            self.skip_lf = true;
        }
        self.out.flush().map_err(|e| ClientError::io("failed to write output", e))?;
        Ok(self.outcome)
    }

    fn dispatch_line(&mut self, line: &[u8], handler: &mut dyn ReplyHandler) -> Result<(), ClientError> {
        if line.is_empty() {
            return Ok(());
        }
        let reply = Reply::parse(line);
        tracing::debug!(%reply, "reply");

        match reply {
            Reply::EmacsPid(pid) => handler.emacs_pid(pid),
            Reply::WindowSystemUnsupported => handler.window_system_unsupported()?,
            Reply::Print(text) => {
                if !self.suppress_output {
                    if !self.skip_lf {
                        self.write_out(b"\n")?;
                    }
                    self.write_out(&text)?;
                    self.track_line_end(&text);
                }
            }
            Reply::PrintNonl(text) => {
                if !self.suppress_output {
                    self.write_out(&text)?;
                    self.track_line_end(&text);
                }
            }
            Reply::Error(text) => {
                if !self.skip_lf {
                    self.write_out(b"\n")?;
                }
                self.write_err(b"*ERROR*: ")?;
                self.write_err(&text)?;
                self.track_line_end(&text);
                self.outcome = Outcome::ServerError;
            }
            Reply::Suspend => {
                if !self.skip_lf {
                    self.write_out(b"\n")?;
                }
                self.skip_lf = true;
                self.out.flush().map_err(|e| ClientError::io("failed to write output", e))?;
                handler.suspend();
            }
            Reply::Unknown(line) => {
                if !self.skip_lf {
                    self.write_out(b"\n")?;
                }
                self.write_out(b"*ERROR*: Unknown message: ")?;
                self.write_out(&line)?;
                self.write_out(b"\n")?;
                self.skip_lf = true;
            }
        }
        Ok(())
    }

    fn track_line_end(&mut self, text: &[u8]) {
        if let Some(&last) = text.last() {
            self.skip_lf = last == b'\n';
        }
    }

    fn write_out(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        self.out
            .write_all(bytes)
            .map_err(|e| ClientError::io("failed to write output", e))
    }

    fn write_err(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        self.err
            .write_all(bytes)
            .and_then(|()| self.err.flush())
            .map_err(|e| ClientError::io("failed to write output", e))
    }

    pub fn into_parts(self) -> (O, E) {
        (self.out, self.err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        pids: Vec<i32>,
        retries: usize,
        suspends: usize,
    }

    impl ReplyHandler for Recorder {
        fn emacs_pid(&mut self, pid: i32) {
            self.pids.push(pid);
        }

        fn window_system_unsupported(&mut self) -> Result<(), ClientError> {
            self.retries += 1;
            Ok(())
        }

        fn suspend(&mut self) {
            self.suspends += 1;
        }
    }

    fn dispatcher() -> Dispatcher<Vec<u8>, Vec<u8>> {
        Dispatcher::new(Vec::new(), Vec::new(), false)
    }

    fn text(bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).into_owned()
    }

    #[test]
    fn test_print_then_error() {
        let mut d = dispatcher();
        let mut rec = Recorder::default();
        d.feed(b"-print hello&_world\n-error &-bad\n", &mut rec).unwrap();
        let outcome = d.finish(&mut rec).unwrap();

        assert_eq!(outcome, Outcome::ServerError);
        let (out, err) = d.into_parts();
        assert!(text(&out).starts_with("hello world"));
        assert!(text(&err).contains("*ERROR*: -bad"));
    }

    #[test]
    fn test_error_does_not_stop_dispatch() {
        let mut d = dispatcher();
        let mut rec = Recorder::default();
        d.feed(b"-error oops\n-emacs-pid 12\n-print after\n", &mut rec).unwrap();
        assert_eq!(rec.pids, vec![12]);
        assert_eq!(d.outcome(), Outcome::ServerError);
        let (out, _) = d.into_parts();
        assert!(text(&out).contains("after"));
    }

    #[test]
    fn test_split_inside_directive_name() {
        let wire = b"-emacs-pid 99\n-print split&_line\n";
        for cut in 0..wire.len() {
            let mut d = dispatcher();
            let mut rec = Recorder::default();
            d.feed(&wire[..cut], &mut rec).unwrap();
            d.feed(&wire[cut..], &mut rec).unwrap();
            d.finish(&mut rec).unwrap();

            assert_eq!(rec.pids, vec![99], "cut at {}", cut);
            let (out, _) = d.into_parts();
            assert_eq!(text(&out), "split line\n", "cut at {}", cut);
        }
    }

    #[test]
    fn test_print_separates_lines() {
        let mut d = dispatcher();
        let mut rec = Recorder::default();
        d.feed(b"-print one\n-print two\n", &mut rec).unwrap();
        d.finish(&mut rec).unwrap();
        let (out, _) = d.into_parts();
        assert_eq!(text(&out), "one\ntwo\n");
    }

    #[test]
    fn test_print_nonl_continues_line() {
        let mut d = dispatcher();
        let mut rec = Recorder::default();
        d.feed(b"-print abc\n-print-nonl def\n-print-nonl &n\n", &mut rec).unwrap();
        d.finish(&mut rec).unwrap();
        let (out, _) = d.into_parts();
        assert_eq!(text(&out), "abcdef\n");
    }

    #[test]
    fn test_waiting_message_gets_newline() {
        let mut d = dispatcher();
        let mut rec = Recorder::default();
        d.print_open("Waiting for Emacs...").unwrap();
        d.feed(b"-print done&n\n", &mut rec).unwrap();
        d.finish(&mut rec).unwrap();
        let (out, _) = d.into_parts();
        assert_eq!(text(&out), "Waiting for Emacs...\ndone\n");
    }

    #[test]
    fn test_suppressed_output() {
        let mut d = Dispatcher::new(Vec::new(), Vec::new(), true);
        let mut rec = Recorder::default();
        d.feed(b"-print secret\n-error visible\n", &mut rec).unwrap();
        d.finish(&mut rec).unwrap();
        let (out, err) = d.into_parts();
        assert!(!text(&out).contains("secret"));
        assert!(text(&err).contains("visible"));
    }

    #[test]
    fn test_unknown_message() {
        let mut d = dispatcher();
        let mut rec = Recorder::default();
        d.feed(b"-bogus stuff\n", &mut rec).unwrap();
        assert_eq!(d.outcome(), Outcome::Success);
        let (out, _) = d.into_parts();
        assert_eq!(text(&out), "*ERROR*: Unknown message: -bogus stuff\n");
    }

    #[test]
    fn test_suspend_and_retry_reach_handler() {
        let mut d = dispatcher();
        let mut rec = Recorder::default();
        d.feed(b"-window-system-unsupported \n-suspend \n", &mut rec).unwrap();
        assert_eq!(rec.retries, 1);
        assert_eq!(rec.suspends, 1);
    }

    #[test]
    fn test_unterminated_tail_dispatched_at_finish() {
        let mut d = dispatcher();
        let mut rec = Recorder::default();
        d.feed(b"-print tail", &mut rec).unwrap();
        assert!(d.out.is_empty());
        d.finish(&mut rec).unwrap();
        let (out, _) = d.into_parts();
        assert_eq!(text(&out), "tail\n");
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Outcome::Success.exit_code(), 0);
        assert_eq!(Outcome::ServerError.exit_code(), 1);
    }
}
