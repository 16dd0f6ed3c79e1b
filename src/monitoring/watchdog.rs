//! Wall-clock and memory watchdogs
//!
//! Each watchdog polls one child until it exits or crosses its limit. On a
//! breach the watchdog sends `SIGKILL` itself; the supervisor only learns about
//! it through the returned [`MonitorResult`].

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::Serialize;

use super::procfs;

/// Default sampling period of both watchdogs
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Outcome of one watchdog.
///
/// For the time watchdog the value is the measured elapsed time in ms; for the
/// memory watchdog it is the peak RSS in kB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum MonitorResult {
    /// The child exited within the limit
    Completed(u64),
    /// The limit was crossed and the child was killed
    LimitExceeded(u64),
}

impl MonitorResult {
    pub fn is_exceeded(&self) -> bool {
        matches!(self, MonitorResult::LimitExceeded(_))
    }

    pub fn value(&self) -> u64 {
        match self {
            MonitorResult::Completed(v) | MonitorResult::LimitExceeded(v) => *v,
        }
    }
}

/// Sampling configuration shared by the watchdogs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogConfig {
    pub poll_interval: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// A limit enforced on one child by polling
pub trait Watchdog: Send + 'static {
    /// Thread name and log label
    const NAME: &'static str;

    /// Block until `pid` exits or the limit is crossed
    fn watch(&self, pid: Pid) -> MonitorResult;
}

fn kill_child(watchdog: &str, pid: Pid) {
    // The child may already be a zombie; that is not an error here.
    if let Err(e) = kill(pid, Signal::SIGKILL) {
        debug!("{}: SIGKILL to {} failed: {}", watchdog, pid, e);
    }
}

/// Kills the child once `limit_ms` of wall-clock time have passed since the
/// watchdog started. The poll interval only sets how often it looks.
#[derive(Debug, Clone, Copy)]
pub struct TimeWatchdog {
    limit_ms: u64,
    interval: Duration,
}

impl TimeWatchdog {
    pub fn new(limit_ms: u64, config: WatchdogConfig) -> Self {
        Self {
            limit_ms,
            interval: config.poll_interval,
        }
    }

    pub fn limit_ms(&self) -> u64 {
        self.limit_ms
    }
}

impl Watchdog for TimeWatchdog {
    const NAME: &'static str = "time";

    fn watch(&self, pid: Pid) -> MonitorResult {
        let started = Instant::now();
        let limit = Duration::from_millis(self.limit_ms);

        loop {
            let elapsed = started.elapsed();
            if elapsed >= limit {
                break;
            }
            thread::sleep(self.interval.min(limit - elapsed));

            if !procfs::is_alive(pid) {
                let elapsed = started.elapsed();
                if elapsed < limit {
                    debug!("time: {} gone after {:?}", pid, elapsed);
                    return MonitorResult::Completed(elapsed.as_millis() as u64);
                }
                // Exit only noticed past the deadline; it still counts as a breach.
                break;
            }
        }

        warn!(
            "time: {} still running after {} ms, killing",
            pid, self.limit_ms
        );
        kill_child(Self::NAME, pid);
        MonitorResult::LimitExceeded(self.limit_ms)
    }
}

/// Kills the child once its resident set exceeds `limit_kb`
#[derive(Debug, Clone, Copy)]
pub struct MemoryWatchdog {
    limit_kb: u64,
    interval: Duration,
}

impl MemoryWatchdog {
    pub fn new(limit_kb: u64, config: WatchdogConfig) -> Self {
        Self {
            limit_kb,
            interval: config.poll_interval,
        }
    }

    pub fn limit_kb(&self) -> u64 {
        self.limit_kb
    }
}

impl Watchdog for MemoryWatchdog {
    const NAME: &'static str = "memory";

    fn watch(&self, pid: Pid) -> MonitorResult {
        let mut peak_kb = 0;

        while procfs::is_alive(pid) {
            let rss_kb = match procfs::resident_kb(pid) {
                Ok(kb) => kb,
                Err(e) => {
                    debug!("memory: statm of {} unreadable: {}", pid, e);
                    break;
                }
            };
            peak_kb = peak_kb.max(rss_kb);

            if peak_kb > self.limit_kb {
                warn!(
                    "memory: {} reached {} kB (limit {} kB), killing",
                    pid, peak_kb, self.limit_kb
                );
                kill_child(Self::NAME, pid);
                return MonitorResult::LimitExceeded(peak_kb);
            }

            thread::sleep(self.interval);
        }

        debug!("memory: {} gone, peak {} kB", pid, peak_kb);
        MonitorResult::Completed(peak_kb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serial_guard;
    use nix::sys::wait::{waitpid, WaitStatus};
    use nix::unistd::{fork, ForkResult};

    /// Fork a child running `body`, then `_exit(0)`
    fn spawn_child(body: fn()) -> Pid {
        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                body();
                unsafe { libc::_exit(0) }
            }
            Ok(ForkResult::Parent { child }) => child,
            Err(e) => panic!("fork failed: {}", e),
        }
    }

    fn nap(ms: i64) {
        let ts = libc::timespec {
            tv_sec: ms / 1000,
            tv_nsec: (ms % 1000) * 1_000_000,
        };
        unsafe { libc::nanosleep(&ts, std::ptr::null_mut()) };
    }

    /// Map and touch 128 MiB without going through the allocator
    fn touch_memory() {
        let len = 128 * 1024 * 1024;
        unsafe {
            let addr = libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            if addr == libc::MAP_FAILED {
                libc::_exit(2);
            }
            std::ptr::write_bytes(addr as *mut u8, 1, len);
        }
        nap(5_000);
    }

    #[test]
    fn test_monitor_result_accessors() {
        assert!(MonitorResult::LimitExceeded(5).is_exceeded());
        assert!(!MonitorResult::Completed(5).is_exceeded());
        assert_eq!(MonitorResult::Completed(7).value(), 7);
    }

    #[test]
    fn test_monitor_result_serializes_tagged() {
        let json = serde_json::to_string(&MonitorResult::LimitExceeded(100)).unwrap();
        assert_eq!(json, r#"{"status":"limit_exceeded","value":100}"#);
    }

    #[test]
    fn test_time_watchdog_completes_for_quick_child() {
        let _guard = serial_guard();
        let pid = spawn_child(|| nap(20));

        let result = TimeWatchdog::new(2_000, WatchdogConfig::default()).watch(pid);

        assert!(!result.is_exceeded(), "{:?}", result);
        assert!(result.value() < 2_000);
        assert_eq!(waitpid(pid, None).unwrap(), WaitStatus::Exited(pid, 0));
    }

    #[test]
    fn test_time_watchdog_reports_measured_elapsed() {
        let _guard = serial_guard();
        let pid = spawn_child(|| nap(150));

        let started = Instant::now();
        let result = TimeWatchdog::new(2_000, WatchdogConfig::default()).watch(pid);
        let wall = started.elapsed().as_millis() as u64;

        match result {
            MonitorResult::Completed(ms) => {
                assert!(ms + 20 >= 150, "reported {} ms for a 150 ms child", ms);
                assert!(ms <= wall, "reported {} ms, wall clock {} ms", ms, wall);
                assert!(ms <= 150 + 100, "reported {} ms for a 150 ms child", ms);
            }
            other => panic!("expected completion, got {:?}", other),
        }
        waitpid(pid, None).unwrap();
    }

    #[test]
    fn test_time_watchdog_kills_slow_child() {
        let _guard = serial_guard();
        let pid = spawn_child(|| nap(10_000));

        let started = Instant::now();
        let result = TimeWatchdog::new(100, WatchdogConfig::default()).watch(pid);

        assert_eq!(result, MonitorResult::LimitExceeded(100));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(
            waitpid(pid, None).unwrap(),
            WaitStatus::Signaled(pid, Signal::SIGKILL, false)
        );
    }

    #[test]
    fn test_time_watchdog_child_just_over_limit() {
        let _guard = serial_guard();
        let pid = spawn_child(|| nap(230));

        let result = TimeWatchdog::new(200, WatchdogConfig::default()).watch(pid);

        assert_eq!(result, MonitorResult::LimitExceeded(200));
        waitpid(pid, None).unwrap();
    }

    #[test]
    fn test_time_limit_independent_of_poll_interval() {
        let _guard = serial_guard();
        let pid = spawn_child(|| nap(800));
        let config = WatchdogConfig {
            poll_interval: Duration::from_millis(10),
        };

        let started = Instant::now();
        let result = TimeWatchdog::new(100, config).watch(pid);

        assert_eq!(result, MonitorResult::LimitExceeded(100));
        assert!(
            started.elapsed() < Duration::from_millis(400),
            "killed after {:?}",
            started.elapsed()
        );
        assert_eq!(
            waitpid(pid, None).unwrap(),
            WaitStatus::Signaled(pid, Signal::SIGKILL, false)
        );
    }

    #[test]
    fn test_memory_watchdog_reports_peak_for_small_child() {
        let _guard = serial_guard();
        let pid = spawn_child(|| nap(50));

        let result = MemoryWatchdog::new(1024 * 1024, WatchdogConfig::default()).watch(pid);

        assert!(!result.is_exceeded(), "{:?}", result);
        assert!(result.value() > 0);
        waitpid(pid, None).unwrap();
    }

    #[test]
    fn test_memory_watchdog_kills_hungry_child() {
        let _guard = serial_guard();
        let pid = spawn_child(touch_memory);

        let result = MemoryWatchdog::new(32 * 1024, WatchdogConfig::default()).watch(pid);

        match result {
            MonitorResult::LimitExceeded(peak) => assert!(peak > 32 * 1024),
            other => panic!("expected a breach, got {:?}", other),
        }
        assert_eq!(
            waitpid(pid, None).unwrap(),
            WaitStatus::Signaled(pid, Signal::SIGKILL, false)
        );
    }

    #[test]
    fn test_memory_watchdog_on_missing_process() {
        let result =
            MemoryWatchdog::new(1024, WatchdogConfig::default()).watch(Pid::from_raw(9_999_999));
        assert_eq!(result, MonitorResult::Completed(0));
    }
}
