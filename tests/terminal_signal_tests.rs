// Terminal signal bridge tests with real signal delivery
// SIGWINCH, SIGCONT and SIGTSTP are raised in this process and the bridge
// thread must turn them into the right wire directives or kills.
//
// Everything runs in one test: every installed bridge sees every signal
// raised in the process, so parallel tests would observe each other.

use edclient::session::SharedOutbound;
use edclient::signal::{BridgeState, JobControl, ServerPid, SignalBridge, TtyFlag};
use edclient::terminal::Foreground;
use signal_hook::consts::{SIGCONT, SIGTSTP, SIGWINCH};
use signal_hook::low_level::raise;
use std::io::{self, Read};
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Clone, Default)]
struct RecordingJob {
    forwarded: Arc<Mutex<Vec<(i32, i32)>>>,
    stops: Arc<Mutex<Vec<i32>>>,
}

impl JobControl for RecordingJob {
    fn foreground(&self) -> Foreground {
        Foreground::Yes
    }

    fn stop_group(&self) -> io::Result<()> {
        Ok(())
    }

    fn stop_self(&self, signal: i32) -> io::Result<()> {
        self.stops.lock().unwrap().push(signal);
        Ok(())
    }

    fn forward(&self, pid: i32, signal: i32) -> io::Result<()> {
        self.forwarded.lock().unwrap().push((pid, signal));
        Ok(())
    }
}

fn wait_until(mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for the bridge");
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn read_exactly(stream: &mut UnixStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).unwrap();
    buf
}

#[test]
fn test_bridge_relays_terminal_signals() {
    let (client, mut server) = UnixStream::pair().unwrap();
    server.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    let job = RecordingJob::default();
    let pid = ServerPid::new();
    let state = BridgeState::new(SharedOutbound::new(client), pid.clone(), job.clone(), TtyFlag::new(true));
    let _bridge = SignalBridge::install(state).unwrap();

    // Resize with the server pid known is a kill, not wire traffic
    pid.set(4242);
    raise(SIGWINCH).unwrap();
    wait_until(|| job.forwarded.lock().unwrap().contains(&(4242, SIGWINCH)));

    // Suspend key: -suspend goes out, then the default stop action runs
    raise(SIGTSTP).unwrap();
    assert_eq!(read_exactly(&mut server, 10), b"-suspend \n".to_vec());
    wait_until(|| *job.stops.lock().unwrap() == vec![SIGTSTP]);

    // Continued in the foreground: exactly one -resume
    raise(SIGCONT).unwrap();
    assert_eq!(read_exactly(&mut server, 9), b"-resume \n".to_vec());

    std::thread::sleep(Duration::from_millis(50));
    server.set_nonblocking(true).unwrap();
    let mut extra = [0u8; 16];
    let err = server.read(&mut extra).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    assert_eq!(job.stops.lock().unwrap().len(), 1);
}
