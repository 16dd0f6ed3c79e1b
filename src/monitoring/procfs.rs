//! Process probes via /proc
//!
//! The supervisor never reaps its child before both watchdogs are done, so an
//! exited child stays visible as a zombie. Every probe here treats a zombie as
//! dead; `kill(pid, 0)` alone would still report it alive.

use std::fs;
use std::io;

use nix::sys::signal::kill;
use nix::unistd::Pid;

/// Process state from `/proc/<pid>/stat`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Sleeping,
    DiskSleep,
    Stopped,
    Zombie,
    Dead,
    Unknown,
}

impl ProcessState {
    /// Parse the single-letter state code
    pub fn from_char(c: char) -> Self {
        match c {
            'R' => ProcessState::Running,
            'S' | 'I' => ProcessState::Sleeping,
            'D' => ProcessState::DiskSleep,
            'T' | 't' => ProcessState::Stopped,
            'Z' => ProcessState::Zombie,
            'X' | 'x' => ProcessState::Dead,
            _ => ProcessState::Unknown,
        }
    }

    /// The process has exited, whether or not it has been reaped
    pub fn is_terminated(&self) -> bool {
        matches!(self, ProcessState::Zombie | ProcessState::Dead)
    }
}

/// Read the state field of `/proc/<pid>/stat`.
///
/// The command name may itself contain spaces and parentheses, so parsing
/// starts after the last `)`.
pub fn process_state(pid: Pid) -> io::Result<ProcessState> {
    let stat = fs::read_to_string(format!("/proc/{}/stat", pid.as_raw()))?;
    let rest = stat
        .rfind(')')
        .map(|end| &stat[end + 1..])
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed stat line"))?;
    let code = rest
        .trim_start()
        .chars()
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing state field"))?;
    Ok(ProcessState::from_char(code))
}

/// Whether `pid` still runs.
///
/// False once the process is a zombie, or when it cannot be signalled or
/// inspected at all.
pub fn is_alive(pid: Pid) -> bool {
    if kill(pid, None).is_err() {
        return false;
    }
    match process_state(pid) {
        Ok(state) => !state.is_terminated(),
        Err(_) => false,
    }
}

/// System page size in bytes
pub fn page_size() -> u64 {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as u64
    } else {
        4096
    }
}

/// Current resident set size of `pid` in kilobytes, from `/proc/<pid>/statm`
pub fn resident_kb(pid: Pid) -> io::Result<u64> {
    let statm = fs::read_to_string(format!("/proc/{}/statm", pid.as_raw()))?;
    let resident: u64 = statm
        .split_whitespace()
        .nth(1)
        .and_then(|field| field.parse().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed statm line"))?;
    Ok(resident * page_size() / 1024)
}
