//! judge-sandbox: confined execution for untrusted judge submissions
//!
//! Runs a compiler or a compiled submission under a stack of seccomp filters
//! while two watchdogs enforce a wall-clock and a resident-memory limit.
//!
//! # Modules
//!
//! - **execution**: Fork, confine, exec and reap one target
//! - **monitoring**: Time and memory watchdogs over `/proc`
//! - **verdict**: What happened to the target, and the resulting exit code
//!
//! Policy construction lives in the `sandbox-seccomp` crate; configuration and
//! error types in `sandbox-core`.
//!
//! # Example
//!
//! ```ignore
//! use judge_sandbox::{Mode, RunConfig, Supervisor};
//!
//! let config = RunConfig::builder(Mode::Runner, "./solution")
//!     .time_limit_ms(2_000)
//!     .memory_limit_kb(256 * 1024)
//!     .build()?;
//!
//! let verdict = Supervisor::new().run(&config)?;
//! for line in verdict.diagnostics() {
//!     eprintln!("{}", line);
//! }
//! std::process::exit(verdict.exit_code());
//! ```

pub mod execution;
pub mod monitoring;
pub mod verdict;

pub use execution::{ExecImage, Phase, Supervisor};
pub use monitoring::{MemoryWatchdog, MonitorResult, TimeWatchdog, Watchdog, WatchdogConfig};
pub use sandbox_core::{
    Ceilings, ConfigError, Mode, PolicyError, RunConfig, RunConfigBuilder, SandboxError,
    SupervisorError, FAILURE_SENTINEL,
};
pub use verdict::{Outcome, SetupFailure, SetupStage, Verdict};
