//! sandbox-core: shared types and errors for judge-sandbox
//!
//! This crate provides the foundational types used by the policy builder,
//! the supervisor and the command-line front end:
//! - Operating [`Mode`] and the immutable [`RunConfig`]
//! - Limit [`Ceilings`] and exit-code constants
//! - Error taxonomy and Result alias

pub mod config;
pub mod error;

pub use config::{
    Ceilings, DEFAULT_MEMORY_CEILING_KB, DEFAULT_TIME_CEILING_MS, EXEC_FAILURE_EXIT,
    FAILURE_SENTINEL, Mode, RunConfig, RunConfigBuilder,
};
pub use error::{ConfigError, PolicyError, Result, SandboxError, SupervisorError};
