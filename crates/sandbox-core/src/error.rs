//! Error types for sandbox operations

use std::io;
use thiserror::Error;

/// Result type for sandbox operations
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Errors raised while resolving a run configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing target executable path")]
    MissingTarget,

    #[error("Invalid mode '{0}': expected \"compiler\" or \"runner\"")]
    InvalidMode(String),

    #[error("Target path {0:?} is not valid UTF-8")]
    NonUtf8Target(std::path::PathBuf),

    #[error("{what} contains an interior nul byte")]
    InteriorNul { what: &'static str },

    #[error("Invalid environment entry '{0}': expected KEY=VALUE")]
    InvalidEnv(String),
}

/// Errors raised by the seccomp policy builder.
///
/// `ActivationFailed` only carries an errno so that it can be built in a
/// freshly forked child without touching the allocator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Unknown syscall '{0}'")]
    UnknownSyscall(String),

    #[error("Unsupported architecture: {0}")]
    UnsupportedArch(String),

    #[error("Rule for '{syscall}' rejected: {reason}")]
    RuleRejected { syscall: String, reason: String },

    #[error("Failed to compile filter: {0}")]
    Compile(String),

    #[error("Failed to activate filter (errno {errno})")]
    ActivationFailed { errno: i32 },
}

impl PolicyError {
    /// Code reported by a child that could not install its policy.
    pub fn errno(&self) -> i32 {
        match self {
            PolicyError::ActivationFailed { errno } => *errno,
            PolicyError::UnsupportedArch(_) => libc::ENOSYS,
            _ => libc::EINVAL,
        }
    }
}

/// Errors raised by the supervisor around one run.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("fork failed: {0}")]
    ForkFailed(nix::Error),

    #[error("Failed to spawn {name} watchdog: {source}")]
    WatchdogSpawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{0} watchdog panicked")]
    WatchdogPanicked(&'static str),

    #[error("waiting for child {pid} failed: {source}")]
    Wait {
        pid: i32,
        #[source]
        source: nix::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Top-level error for the command-line front end
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Seccomp error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
