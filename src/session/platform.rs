//! OS services used by a running session

use super::channel::{SharedOutbound, Stream};
use crate::config::Environment;
use crate::signal::{BridgeState, ServerPid, SignalBridge, TtyFlag};
use crate::terminal::{self, TerminalControl, TtyInfo};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

pub trait Platform {
    /// Terminal name and type for `-tty`
    fn terminal(&self, env: &Environment) -> Result<TtyInfo, String>;

    /// Start relaying job-control signals to the server. Called once the
    /// server has been given our terminal; later calls are no-ops. `tty`
    /// stays shared with the session, which updates it on fallback.
    fn start_signal_bridge(&mut self, outbound: SharedOutbound<Stream>, server_pid: ServerPid, tty: TtyFlag);

    /// Stop this process until it is continued
    fn suspend(&mut self);
}

/// The real process: stdout's terminal, `signal-hook` delivery, `kill(2)`
#[derive(Default)]
pub struct SystemPlatform {
    bridge: Option<SignalBridge>,
}

impl SystemPlatform {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Platform for SystemPlatform {
    fn terminal(&self, env: &Environment) -> Result<TtyInfo, String> {
        terminal::tty_info(env)
    }

    fn start_signal_bridge(&mut self, outbound: SharedOutbound<Stream>, server_pid: ServerPid, tty: TtyFlag) {
        if self.bridge.is_some() {
            return;
        }
        let state = BridgeState::new(outbound, server_pid, TerminalControl::new(), tty);
        match SignalBridge::install(state) {
            Ok(bridge) => self.bridge = Some(bridge),
            Err(e) => tracing::warn!(error = %e, "terminal signals will not reach the server"),
        }
    }

    fn suspend(&mut self) {
        if let Err(e) = kill(Pid::from_raw(0), Signal::SIGSTOP) {
            tracing::debug!(error = %e, "suspend failed");
        }
    }
}
