//! Supervised execution of one untrusted target
//!
//! Lifecycle of a run:
//!
//! 1. **Resolving**: build the exec image and compile the policy stack. Both
//!    allocate, so they happen before `fork`.
//! 2. **Forked**: the child installs the stack and execs the target. It only
//!    makes async-signal-safe calls and reports setup failures through a
//!    close-on-exec status pipe. The parent reads that pipe to EOF, which
//!    happens once `execve` has replaced the child's image.
//! 3. **Monitoring**: a time and a memory watchdog run on their own threads
//!    while the supervisor blocks in `waitid(WNOWAIT)`. Both measure the
//!    target from its exec onwards.
//! 4. **Joined**: both watchdogs have returned. The child is reaped only now,
//!    so its pid cannot be recycled under a watchdog still probing it.
//! 5. **Reported**: the [`Verdict`] is assembled.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitid, waitpid, Id, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, pipe2, ForkResult, Pid};
use sandbox_core::{Ceilings, RunConfig, SupervisorError, EXEC_FAILURE_EXIT};
use sandbox_seccomp::PolicyStack;

use crate::execution::image::ExecImage;
use crate::monitoring::{MemoryWatchdog, MonitorResult, TimeWatchdog, Watchdog, WatchdogConfig};
use crate::verdict::{SetupFailure, SetupStage, Verdict};

type Result<T> = std::result::Result<T, SupervisorError>;

/// Stage code plus errno, native endian
const STATUS_LEN: usize = 8;

/// Supervisor lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Resolving,
    Forked,
    Monitoring,
    Joined,
    Reported,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Resolving => "resolving",
            Phase::Forked => "forked",
            Phase::Monitoring => "monitoring",
            Phase::Joined => "joined",
            Phase::Reported => "reported",
        };
        f.write_str(name)
    }
}

struct Lifecycle {
    phase: Phase,
    pid: Option<Pid>,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            phase: Phase::Resolving,
            pid: None,
        }
    }

    fn enter(&mut self, next: Phase) {
        debug_assert!(next > self.phase, "{} -> {}", self.phase, next);
        match self.pid {
            Some(pid) => debug!("supervisor[{}]: {} -> {}", pid, self.phase, next),
            None => debug!("supervisor: {} -> {}", self.phase, next),
        }
        self.phase = next;
    }
}

/// Runs targets under a seccomp policy with time and memory watchdogs
#[derive(Debug, Clone, Copy, Default)]
pub struct Supervisor {
    ceilings: Ceilings,
    watchdog: WatchdogConfig,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits applied when a run leaves its own limit at zero
    pub fn with_ceilings(mut self, ceilings: Ceilings) -> Self {
        self.ceilings = ceilings;
        self
    }

    pub fn with_watchdog_config(mut self, watchdog: WatchdogConfig) -> Self {
        self.watchdog = watchdog;
        self
    }

    pub fn ceilings(&self) -> Ceilings {
        self.ceilings
    }

    /// Run `config` to completion.
    ///
    /// Anything the target does, including being killed by the policy or a
    /// watchdog, ends up in the [`Verdict`]. `Err` is reserved for failures
    /// of the supervisor itself.
    pub fn run(&self, config: &RunConfig) -> Result<Verdict> {
        let mut lifecycle = Lifecycle::new();

        let image = ExecImage::from_config(config)?;
        let stack = PolicyStack::for_mode(config.mode(), image.path(), config.ban_fork())?;
        let time_limit_ms = config.effective_time_limit_ms(&self.ceilings);
        let memory_limit_kb = config.effective_memory_limit_kb(&self.ceilings);
        let (status_read, status_write) = pipe2(OFlag::O_CLOEXEC).map_err(std::io::Error::from)?;

        info!(
            "Running {} in {} mode (time {} ms, memory {} kB{})",
            config.target().display(),
            config.mode(),
            time_limit_ms,
            memory_limit_kb,
            if config.ban_fork() { ", fork banned" } else { "" }
        );

        // SAFETY: the child branch only calls async-signal-safe functions on
        // data prepared above, then execs or exits.
        let child = match unsafe { fork() } {
            Ok(ForkResult::Child) => exec_child(&image, &stack, status_write.as_raw_fd()),
            Ok(ForkResult::Parent { child }) => child,
            Err(e) => return Err(SupervisorError::ForkFailed(e)),
        };
        drop(status_write);
        lifecycle.pid = Some(child);
        lifecycle.enter(Phase::Forked);

        // Blocks until exec closes the pipe or the child reports a failure.
        // Before that the child's RSS is still the supervisor's own image, so
        // the watchdogs must not start sampling yet.
        let setup_failure = match read_setup_failure(status_read) {
            Ok(failure) => failure,
            Err(e) => {
                abort_child(child, None);
                return Err(e);
            }
        };

        let time = match spawn_watchdog(TimeWatchdog::new(time_limit_ms, self.watchdog), child) {
            Ok(handle) => handle,
            Err(e) => {
                abort_child(child, None);
                return Err(e);
            }
        };
        let memory =
            match spawn_watchdog(MemoryWatchdog::new(memory_limit_kb, self.watchdog), child) {
                Ok(handle) => handle,
                Err(e) => {
                    abort_child(child, Some(time.1));
                    return Err(e);
                }
            };
        lifecycle.enter(Phase::Monitoring);

        let waited = wait_for_exit(child);
        if waited.is_err() {
            let _ = kill(child, Signal::SIGKILL);
        }

        let time = join_watchdog(time);
        let memory = join_watchdog(memory);
        lifecycle.enter(Phase::Joined);

        let (exit_status, signal) = reap(child)?;
        waited?;
        let time = time?;
        let memory = memory?;

        let verdict = Verdict {
            pid: child.as_raw(),
            exit_status,
            signal,
            time,
            memory,
            setup_failure,
        };
        lifecycle.enter(Phase::Reported);

        if let Some(failure) = setup_failure {
            warn!("Child {} could not start the target: {}", child, failure);
        }
        info!("Child {} {}", child, verdict.outcome());
        Ok(verdict)
    }
}

/// Child side of the fork. Never returns.
fn exec_child(image: &ExecImage, stack: &PolicyStack, status_fd: RawFd) -> ! {
    if let Err(err) = stack.install() {
        let errno = err.errno();
        report_setup_failure(status_fd, SetupStage::Policy, errno);
        // SAFETY: terminate without running atexit handlers or destructors
        unsafe { libc::_exit(errno.clamp(1, 255)) }
    }

    let errno = image.exec();
    report_setup_failure(status_fd, SetupStage::Exec, errno);
    // SAFETY: as above
    unsafe { libc::_exit(EXEC_FAILURE_EXIT) }
}

fn report_setup_failure(fd: RawFd, stage: SetupStage, errno: i32) {
    let mut msg = [0u8; STATUS_LEN];
    msg[..4].copy_from_slice(&stage.code().to_ne_bytes());
    msg[4..].copy_from_slice(&errno.to_ne_bytes());
    // SAFETY: `fd` is the write end of the status pipe; best effort.
    unsafe {
        libc::write(fd, msg.as_ptr() as *const libc::c_void, msg.len());
    }
}

/// Decode the status pipe. Empty means the target was exec'd.
fn read_setup_failure(pipe: OwnedFd) -> Result<Option<SetupFailure>> {
    let mut buf = Vec::with_capacity(STATUS_LEN);
    File::from(pipe).read_to_end(&mut buf)?;
    if buf.len() < STATUS_LEN {
        return Ok(None);
    }

    let mut stage = [0u8; 4];
    let mut errno = [0u8; 4];
    stage.copy_from_slice(&buf[..4]);
    errno.copy_from_slice(&buf[4..STATUS_LEN]);
    Ok(SetupStage::from_code(u32::from_ne_bytes(stage)).map(|stage| SetupFailure {
        stage,
        errno: i32::from_ne_bytes(errno),
    }))
}

type WatchdogHandle = (&'static str, JoinHandle<MonitorResult>);

fn spawn_watchdog<W: Watchdog>(watchdog: W, pid: Pid) -> Result<WatchdogHandle> {
    thread::Builder::new()
        .name(format!("{}-watchdog", W::NAME))
        .spawn(move || watchdog.watch(pid))
        .map(|handle| (W::NAME, handle))
        .map_err(|source| SupervisorError::WatchdogSpawn {
            name: W::NAME,
            source,
        })
}

fn join_watchdog((name, handle): WatchdogHandle) -> Result<MonitorResult> {
    handle
        .join()
        .map_err(|_| SupervisorError::WatchdogPanicked(name))
}

/// Kill and reap a child whose run cannot proceed. A watchdog that already
/// started is joined first so it never probes a recycled pid.
fn abort_child(pid: Pid, running: Option<JoinHandle<MonitorResult>>) {
    let _ = kill(pid, Signal::SIGKILL);
    if let Some(handle) = running {
        let _ = handle.join();
    }
    let _ = waitpid(pid, None);
}

/// Block until the child has exited, leaving it unreaped
fn wait_for_exit(pid: Pid) -> Result<()> {
    loop {
        match waitid(Id::Pid(pid), WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT) {
            Ok(_) => return Ok(()),
            Err(Errno::EINTR) => continue,
            Err(source) => {
                return Err(SupervisorError::Wait {
                    pid: pid.as_raw(),
                    source,
                })
            }
        }
    }
}

/// Reap the child: `(exit code, signal)`
fn reap(pid: Pid) -> Result<(Option<i32>, Option<i32>)> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok((Some(code), None)),
            Ok(WaitStatus::Signaled(_, signal, _)) => return Ok((None, Some(signal as i32))),
            Ok(_) | Err(Errno::EINTR) => continue,
            Err(source) => {
                return Err(SupervisorError::Wait {
                    pid: pid.as_raw(),
                    source,
                })
            }
        }
    }
}
