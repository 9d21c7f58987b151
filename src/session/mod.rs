//! One client session on an established connection
//!
//! The session has two phases. The request phase sends the preamble and the
//! body as one line. The read phase feeds server output to the
//! [`Dispatcher`] until end of stream. A `-window-system-unsupported` reply
//! moves the [`FrameTarget`] to its fallback and re-enters the request phase
//! on the same connection, without the preamble.

pub mod channel;
pub mod dispatcher;
pub mod emitter;
pub mod platform;

pub use channel::{Connection, SharedOutbound, Stream};
pub use dispatcher::{Dispatcher, Outcome, ReplyHandler};
pub use emitter::{FrameTarget, Item};
pub use platform::{Platform, SystemPlatform};

use crate::config::SessionConfig;
use crate::error::ClientError;
use crate::protocol::Request;
use crate::signal::{ServerPid, TtyFlag};
use channel::RECV_CHUNK;
use std::io::{self, BufRead, Write};

const WAITING_MESSAGE: &str = "Waiting for Emacs...";

/// Request-phase state shared with the reply handlers
struct Driver<'a, P: Platform> {
    config: &'a SessionConfig,
    target: FrameTarget,
    items: Vec<Item>,
    outbound: SharedOutbound<Stream>,
    server_pid: ServerPid,
    /// Shared with the signal bridge
    tty: TtyFlag,
    platform: &'a mut P,
    /// Set when a reply caused the request to be sent again
    resent: bool,
}

impl<P: Platform> Driver<'_, P> {
    /// Build and send one request line; `preamble` is included on the first send only
    fn send(&mut self, preamble: Option<Request>) -> Result<(), ClientError> {
        let config = self.config;
        let platform = &*self.platform;
        let body = emitter::body(config, &self.target, &self.items, || platform.terminal(&config.env))?;

        let mut request = preamble.unwrap_or_default();
        request.append(body.request);
        let line = request.encode();
        tracing::debug!(bytes = line.len(), directives = request.directives().len(), "sending request");

        self.outbound
            .send(&line)
            .map_err(|e| ClientError::io("failed to send request", e))?;

        if body.tty {
            self.platform
                .start_signal_bridge(self.outbound.clone(), self.server_pid.clone(), self.tty.clone());
        }
        Ok(())
    }

    fn shows_waiting_message(&self) -> bool {
        !self.config.eval && !self.target.tty && !self.target.no_wait && !self.config.quiet
    }
}

impl<P: Platform> ReplyHandler for Driver<'_, P> {
    fn emacs_pid(&mut self, pid: i32) {
        self.server_pid.set(pid);
    }

    fn window_system_unsupported(&mut self) -> Result<(), ClientError> {
        self.target.fall_back();
        self.tty.set(self.target.tty);
        tracing::debug!(target = ?self.target, "window system unsupported, resending");
        self.resent = true;
        self.send(None)
    }

    fn suspend(&mut self) {
        self.platform.suspend();
    }
}

/// Run a session to completion over `conn`.
///
/// `stdin` supplies expressions when evaluating with no items. Server output
/// goes to `out`; server errors to `err`.
pub fn run<P, R, O, E>(
    config: &SessionConfig,
    conn: &mut Connection,
    platform: &mut P,
    stdin: R,
    out: O,
    err: E,
) -> Result<Outcome, ClientError>
where
    P: Platform,
    R: BufRead,
    O: Write,
    E: Write,
{
    let items = if config.eval && config.items.is_empty() {
        emitter::read_eval_lines(stdin).map_err(|e| ClientError::io("failed to read standard input", e))?
    } else {
        emitter::classify_items(config)
    };

    conn.set_read_timeout(config.timeout)
        .map_err(|e| ClientError::io("failed to set read timeout", e))?;

    let target = FrameTarget::from_config(config);
    let mut driver = Driver {
        config,
        tty: TtyFlag::new(target.tty),
        target,
        items,
        outbound: conn.outbound(),
        server_pid: ServerPid::new(),
        platform,
        resent: false,
    };
    driver.send(Some(emitter::preamble(config)))?;

    let mut dispatcher = Dispatcher::new(out, err, config.suppress_output);
    if driver.shows_waiting_message() {
        dispatcher
            .print_open(WAITING_MESSAGE)
            .map_err(|e| ClientError::io("failed to write output", e))?;
    }

    let mut buf = vec![0u8; RECV_CHUNK];
    let mut read_error = None;
    loop {
        let n = match conn.recv(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                return Err(ClientError::Timeout);
            }
            Err(e) => {
                tracing::debug!(error = %e, "read from server failed");
                read_error = Some(e);
                break;
            }
        };
        dispatcher.feed(&buf[..n], &mut driver)?;

        if std::mem::take(&mut driver.resent) && driver.shows_waiting_message() {
            dispatcher
                .print_open(WAITING_MESSAGE)
                .map_err(|e| ClientError::io("failed to write output", e))?;
        }
    }

    // Output already received is flushed even when the read failed.
    let outcome = dispatcher.finish(&mut driver)?;
    if let Err(e) = conn.close() {
        tracing::debug!(error = %e, "close failed");
    }
    match read_error {
        Some(e) => Err(ClientError::io("failed to read from server", e)),
        None => Ok(outcome),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Environment, Options};
    use crate::terminal::TtyInfo;
    use nix::sys::socket::{setsockopt, sockopt};
    use std::ffi::OsString;
    use std::io::Read;
    use std::net::{TcpListener, TcpStream};
    use std::os::unix::net::UnixStream;
    use std::path::PathBuf;
    use std::thread;
    use std::time::Duration;

    #[derive(Default)]
    struct FakePlatform {
        has_tty: bool,
        bridges: usize,
        bridge_tty: Option<TtyFlag>,
        suspends: usize,
    }

    impl Platform for FakePlatform {
        fn terminal(&self, _env: &Environment) -> Result<TtyInfo, String> {
            if self.has_tty {
                Ok(TtyInfo {
                    name: b"/dev/pts/1".to_vec(),
                    term_type: "xterm".to_string(),
                })
            } else {
                Err("could not get terminal name".to_string())
            }
        }

        fn start_signal_bridge(&mut self, _outbound: SharedOutbound<Stream>, _pid: ServerPid, tty: TtyFlag) {
            self.bridges += 1;
            self.bridge_tty.get_or_insert(tty);
        }

        fn suspend(&mut self) {
            self.suspends += 1;
        }
    }

    fn config(args: &[&str]) -> SessionConfig {
        let options = Options::parse(args.iter().map(OsString::from)).unwrap();
        SessionConfig::resolve("edclient", options, Environment::default(), PathBuf::from("/w")).unwrap()
    }

    /// Reads lines from the client and answers each with the next canned reply
    fn fake_server(mut server: UnixStream, replies: Vec<&'static [u8]>) -> thread::JoinHandle<Vec<u8>> {
        thread::spawn(move || {
            let mut received = Vec::new();
            let mut buf = [0u8; 4096];
            for reply in replies {
                loop {
                    let n = server.read(&mut buf).unwrap();
                    received.extend_from_slice(&buf[..n]);
                    if n == 0 || received.ends_with(b"\n") {
                        break;
                    }
                }
                server.write_all(reply).unwrap();
            }
            received
        })
    }

    #[test]
    fn test_session_prints_and_succeeds() {
        let (client, server) = UnixStream::pair().unwrap();
        let handle = fake_server(server, vec![b"-emacs-pid 42\n-print done\n"]);

        let mut conn = Connection::from_stream(Stream::Unix(client)).unwrap();
        let mut platform = FakePlatform { has_tty: true, ..Default::default() };
        let mut out = Vec::new();
        let outcome = run(&config(&["-q", "/tmp/a"]), &mut conn, &mut platform, io::empty(), &mut out, io::sink()).unwrap();

        assert_eq!(outcome, Outcome::Success);
        assert_eq!(out, b"done\n".to_vec());
        assert_eq!(platform.bridges, 1);
        let sent = handle.join().unwrap();
        assert_eq!(sent, b"-dir /w/ -current-frame -tty /dev/pts/1 xterm -file /tmp/a \n".to_vec());
    }

    #[test]
    fn test_window_system_unsupported_resends_body_for_terminal() {
        let (client, server) = UnixStream::pair().unwrap();
        let handle = fake_server(
            server,
            vec![b"-window-system-unsupported \n", b"-print ok\n"],
        );

        let mut conn = Connection::from_stream(Stream::Unix(client)).unwrap();
        let mut platform = FakePlatform { has_tty: true, ..Default::default() };
        let mut out = Vec::new();
        let outcome = run(&config(&["-c", "-d", ":9", "-n", "f"]), &mut conn, &mut platform, io::empty(), &mut out, io::sink()).unwrap();

        assert_eq!(outcome, Outcome::Success);
        let sent = String::from_utf8(handle.join().unwrap()).unwrap();
        let lines: Vec<&str> = sent.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("-dir /w/ -nowait -display :9 "));
        assert!(lines[0].contains("-window-system "));
        assert_eq!(lines[1], "-display :9 -tty /dev/pts/1 xterm -file f ");

        // The bridge started with the first request sees the fallback to the terminal
        let tty = platform.bridge_tty.expect("bridge started");
        assert!(tty.get());
    }

    #[test]
    fn test_connection_reset_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4096];
            let mut received = Vec::new();
            while !received.ends_with(b"\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
            }
            stream.write_all(b"-print partial\n").unwrap();
            thread::sleep(Duration::from_millis(50));
            // Zero linger turns the close into a reset
            let linger = libc::linger { l_onoff: 1, l_linger: 0 };
            setsockopt(&stream, sockopt::Linger, &linger).unwrap();
        });

        let stream = TcpStream::connect(addr).unwrap();
        let mut conn = Connection::from_stream(Stream::Tcp(stream)).unwrap();
        let mut platform = FakePlatform::default();
        let mut out = Vec::new();
        let result = run(&config(&["-e", "(x)"]), &mut conn, &mut platform, io::empty(), &mut out, io::sink());
        handle.join().unwrap();

        let err = result.unwrap_err();
        assert!(matches!(err, ClientError::Io { .. }), "{:?}", err);
        assert_eq!(err.exit_code(), 1);
        assert_eq!(out, b"partial\n".to_vec());
    }

    #[test]
    fn test_server_error_sets_failure() {
        let (client, server) = UnixStream::pair().unwrap();
        let handle = fake_server(server, vec![b"-error no&_such&_file\n-print later\n"]);

        let mut conn = Connection::from_stream(Stream::Unix(client)).unwrap();
        let mut platform = FakePlatform::default();
        let mut out = Vec::new();
        let mut err = Vec::new();
        let outcome = run(&config(&["-e", "(bad)"]), &mut conn, &mut platform, io::empty(), &mut out, &mut err).unwrap();

        handle.join().unwrap();
        assert_eq!(outcome, Outcome::ServerError);
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(err, b"*ERROR*: no such file".to_vec());
        assert!(String::from_utf8_lossy(&out).contains("later"));
        assert_eq!(platform.bridges, 0);
    }

    #[test]
    fn test_eval_reads_stdin_when_no_items() {
        let (client, server) = UnixStream::pair().unwrap();
        let handle = fake_server(server, vec![b""]);

        let mut conn = Connection::from_stream(Stream::Unix(client)).unwrap();
        let mut platform = FakePlatform::default();
        let stdin: &[u8] = b"(one)\n(two)\n";
        run(&config(&["-e"]), &mut conn, &mut platform, stdin, io::sink(), io::sink()).unwrap();

        let sent = handle.join().unwrap();
        assert_eq!(sent, b"-dir /w/ -current-frame -eval (one) -eval (two) \n".to_vec());
    }

    #[test]
    fn test_suspend_reply_reaches_platform() {
        let (client, server) = UnixStream::pair().unwrap();
        let handle = fake_server(server, vec![b"-suspend \n"]);

        let mut conn = Connection::from_stream(Stream::Unix(client)).unwrap();
        let mut platform = FakePlatform { has_tty: true, ..Default::default() };
        run(&config(&["-t"]), &mut conn, &mut platform, io::empty(), io::sink(), io::sink()).unwrap();

        handle.join().unwrap();
        assert_eq!(platform.suspends, 1);
    }
}
