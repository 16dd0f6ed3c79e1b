//! Monitoring layer: per-child watchdogs
//!
//! Two independent pollers watch the child from their own threads: one for
//! wall-clock time, one for resident memory. Both read `/proc` and may kill
//! the child; neither reaps it.

pub mod procfs;
pub mod watchdog;

pub use procfs::{is_alive, resident_kb, ProcessState};
pub use watchdog::{
    MemoryWatchdog, MonitorResult, TimeWatchdog, Watchdog, WatchdogConfig, DEFAULT_POLL_INTERVAL,
};
