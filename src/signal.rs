//! Terminal signal bridge
//!
//! While a frame is open on our terminal, job-control signals are relayed to
//! the server:
//!
//! - `SIGWINCH` is forwarded to the server process with `kill`
//! - `SIGCONT` sends `-resume` when we are in the foreground; in the
//!   background the process group is stopped again with `SIGTTIN`
//! - `SIGTSTP`/`SIGTTOU` send `-suspend`, then stop this process for real
//!
//! The low-level handler installed by `signal-hook` only queues the signal
//! number. The bridge thread turns it into an [`Intent`] and executes it, so
//! nothing but an async-signal-safe write runs in signal context.

use crate::session::channel::SharedOutbound;
use crate::protocol::{RESUME, SUSPEND};
use crate::terminal::{Foreground, TerminalControl};
use anyhow::Result;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use signal_hook::consts::{SIGCONT, SIGTSTP, SIGTTOU, SIGWINCH};
use signal_hook::iterator::{Handle, Signals};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;

/// Signals the bridge listens for
pub const BRIDGED_SIGNALS: [i32; 4] = [SIGWINCH, SIGCONT, SIGTSTP, SIGTTOU];

/// Process id of the server, as announced by `-emacs-pid`; 0 until known
#[derive(Debug, Clone, Default)]
pub struct ServerPid(Arc<AtomicI32>);

impl ServerPid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, pid: i32) {
        self.0.store(pid, Ordering::SeqCst);
    }

    pub fn get(&self) -> Option<i32> {
        match self.0.load(Ordering::SeqCst) {
            pid if pid > 0 => Some(pid),
            _ => None,
        }
    }
}

/// Whether the frame is on our terminal. Starts from the request and turns
/// true when the server falls back from a window system to the terminal.
#[derive(Debug, Clone, Default)]
pub struct TtyFlag(Arc<AtomicBool>);

impl TtyFlag {
    pub fn new(tty: bool) -> Self {
        Self(Arc::new(AtomicBool::new(tty)))
    }

    pub fn set(&self, tty: bool) {
        self.0.store(tty, Ordering::SeqCst);
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What to do about one delivered signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Pass the signal on to the server process
    Forward(i32),
    /// Tell the server it may redraw our terminal
    Resume,
    /// Continued while in the background: stop the group again
    StopGroup,
    /// Tell the server we are going away, then stop with this signal
    Suspend(i32),
    Ignore,
}

/// Decide what a signal means given our terminal state.
///
/// `tty` is true when the session opened a frame on this terminal.
pub fn intent_for(signal: i32, foreground: Foreground, tty: bool) -> Intent {
    match signal {
        SIGWINCH => Intent::Forward(signal),
        SIGCONT => match foreground {
            Foreground::Yes => Intent::Resume,
            Foreground::No if tty => Intent::StopGroup,
            _ => Intent::Ignore,
        },
        SIGTSTP | SIGTTOU => Intent::Suspend(signal),
        _ => Intent::Ignore,
    }
}

/// Job-control operations the bridge needs from the OS
pub trait JobControl {
    fn foreground(&self) -> Foreground;

    /// Stop every process in our group with `SIGTTIN`
    fn stop_group(&self) -> io::Result<()>;

    /// Apply the default (stopping) action of `signal` to this process.
    /// Returns once the process has been continued.
    fn stop_self(&self, signal: i32) -> io::Result<()>;

    fn forward(&self, pid: i32, signal: i32) -> io::Result<()>;
}

impl JobControl for TerminalControl {
    fn foreground(&self) -> Foreground {
        TerminalControl::foreground(self)
    }

    fn stop_group(&self) -> io::Result<()> {
        TerminalControl::stop_group(self)
    }

    fn stop_self(&self, signal: i32) -> io::Result<()> {
        signal_hook::low_level::emulate_default_handler(signal)
    }

    fn forward(&self, pid: i32, signal: i32) -> io::Result<()> {
        let signal = Signal::try_from(signal).map_err(io::Error::from)?;
        kill(Pid::from_raw(pid), signal).map_err(io::Error::from)
    }
}

/// Executes intents against the shared outbound buffer
pub struct BridgeState<W: Write, J: JobControl> {
    outbound: SharedOutbound<W>,
    server_pid: ServerPid,
    job: J,
    tty: TtyFlag,
}

impl<W: Write, J: JobControl> BridgeState<W, J> {
    pub fn new(outbound: SharedOutbound<W>, server_pid: ServerPid, job: J, tty: TtyFlag) -> Self {
        Self {
            outbound,
            server_pid,
            job,
            tty,
        }
    }

    /// Handle one delivered signal and report what was done
    pub fn handle(&self, signal: i32) -> io::Result<Intent> {
        let intent = intent_for(signal, self.job.foreground(), self.tty.get());
        tracing::debug!(signal, ?intent, "terminal signal");

        match intent {
            Intent::Forward(sig) => {
                if let Some(pid) = self.server_pid.get() {
                    self.job.forward(pid, sig)?;
                }
            }
            Intent::Resume => self.outbound.send(RESUME)?,
            Intent::StopGroup => self.job.stop_group()?,
            Intent::Suspend(sig) => {
                // Even if the server is gone we still have to stop.
                let sent = self.outbound.send(SUSPEND);
                self.job.stop_self(sig)?;
                sent?;
            }
            Intent::Ignore => {}
        }
        Ok(intent)
    }

    pub fn job(&self) -> &J {
        &self.job
    }
}

/// Running bridge; dropping it stops signal delivery to the bridge thread
pub struct SignalBridge {
    handle: Handle,
}

impl SignalBridge {
    /// Register the bridged signals and start the relay thread
    pub fn install<W, J>(state: BridgeState<W, J>) -> Result<Self>
    where
        W: Write + Send + 'static,
        J: JobControl + Send + 'static,
    {
        let mut signals = Signals::new(BRIDGED_SIGNALS)?;
        let handle = signals.handle();

        thread::Builder::new()
            .name("signal-bridge".to_string())
            .spawn(move || {
                for signal in signals.forever() {
                    if let Err(e) = state.handle(signal) {
                        tracing::debug!(signal, error = %e, "signal relay failed");
                    }
                }
            })?;

        Ok(Self { handle })
    }
}

impl Drop for SignalBridge {
    fn drop(&mut self) {
        self.handle.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    struct FakeJob {
        foreground: Cell<Foreground>,
        stops: Cell<usize>,
        group_stops: Cell<usize>,
        forwarded: RefCell<Vec<(i32, i32)>>,
    }

    impl FakeJob {
        fn new(foreground: Foreground) -> Self {
            Self {
                foreground: Cell::new(foreground),
                stops: Cell::new(0),
                group_stops: Cell::new(0),
                forwarded: RefCell::new(Vec::new()),
            }
        }
    }

    impl JobControl for FakeJob {
        fn foreground(&self) -> Foreground {
            self.foreground.get()
        }

        fn stop_group(&self) -> io::Result<()> {
            self.group_stops.set(self.group_stops.get() + 1);
            Ok(())
        }

        fn stop_self(&self, _signal: i32) -> io::Result<()> {
            self.stops.set(self.stops.get() + 1);
            Ok(())
        }

        fn forward(&self, pid: i32, signal: i32) -> io::Result<()> {
            self.forwarded.borrow_mut().push((pid, signal));
            Ok(())
        }
    }

    fn bridge(foreground: Foreground, tty: bool) -> (BridgeState<Vec<u8>, FakeJob>, SharedOutbound<Vec<u8>>, ServerPid) {
        let outbound = SharedOutbound::new(Vec::new());
        let pid = ServerPid::new();
        let state = BridgeState::new(outbound.clone(), pid.clone(), FakeJob::new(foreground), TtyFlag::new(tty));
        (state, outbound, pid)
    }

    fn written(outbound: &SharedOutbound<Vec<u8>>) -> Vec<u8> {
        outbound.lock().get_ref().clone()
    }

    #[test]
    fn test_intents() {
        assert_eq!(intent_for(SIGWINCH, Foreground::Unknown, false), Intent::Forward(SIGWINCH));
        assert_eq!(intent_for(SIGCONT, Foreground::Yes, false), Intent::Resume);
        assert_eq!(intent_for(SIGCONT, Foreground::No, true), Intent::StopGroup);
        assert_eq!(intent_for(SIGCONT, Foreground::No, false), Intent::Ignore);
        assert_eq!(intent_for(SIGCONT, Foreground::Unknown, true), Intent::Ignore);
        assert_eq!(intent_for(SIGTSTP, Foreground::Yes, true), Intent::Suspend(SIGTSTP));
        assert_eq!(intent_for(SIGTTOU, Foreground::No, true), Intent::Suspend(SIGTTOU));
    }

    #[test]
    fn test_suspend_then_resume_sends_each_once() {
        let (state, outbound, _pid) = bridge(Foreground::Yes, true);

        assert_eq!(state.handle(SIGTSTP).unwrap(), Intent::Suspend(SIGTSTP));
        assert_eq!(state.job().stops.get(), 1);
        assert_eq!(written(&outbound), b"-suspend \n".to_vec());

        assert_eq!(state.handle(SIGCONT).unwrap(), Intent::Resume);
        assert_eq!(written(&outbound), b"-suspend \n-resume \n".to_vec());
        assert_eq!(state.job().stops.get(), 1);
    }

    #[test]
    fn test_continue_in_background_stops_group_without_resume() {
        let (state, outbound, _pid) = bridge(Foreground::No, true);
        assert_eq!(state.handle(SIGCONT).unwrap(), Intent::StopGroup);
        assert_eq!(state.job().group_stops.get(), 1);
        assert!(written(&outbound).is_empty());
    }

    #[test]
    fn test_tty_change_after_install_is_seen() {
        let outbound = SharedOutbound::new(Vec::new());
        let tty = TtyFlag::new(false);
        let state = BridgeState::new(outbound, ServerPid::new(), FakeJob::new(Foreground::No), tty.clone());

        assert_eq!(state.handle(SIGCONT).unwrap(), Intent::Ignore);
        tty.set(true);
        assert_eq!(state.handle(SIGCONT).unwrap(), Intent::StopGroup);
        assert_eq!(state.job().group_stops.get(), 1);
    }

    #[test]
    fn test_winch_forwarded_only_with_known_pid() {
        let (state, outbound, pid) = bridge(Foreground::Yes, true);

        state.handle(SIGWINCH).unwrap();
        assert!(state.job().forwarded.borrow().is_empty());

        pid.set(4321);
        state.handle(SIGWINCH).unwrap();
        assert_eq!(*state.job().forwarded.borrow(), vec![(4321, SIGWINCH)]);
        assert!(written(&outbound).is_empty());
    }

    #[test]
    fn test_server_pid() {
        let pid = ServerPid::new();
        assert_eq!(pid.get(), None);
        pid.set(77);
        assert_eq!(pid.clone().get(), Some(77));
    }
}
